use crate::common::{PageId, Result, StratumError, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of (name, root page id) records a header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// The header page lives at page id 0 and maps index names to their root
/// page ids. Names are at most 32 bytes, zero-padded on disk.
///
/// A zeroed page is a valid empty header, so a freshly created database
/// needs no explicit initialization.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_record_count(self.data)
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|idx| read_root(self.data, idx))
    }

    /// Adds a record for `name`, or updates it in place if one exists.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        if self.update_record(name, root_page_id) {
            return Ok(());
        }

        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return Err(StratumError::HeaderPageFull);
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        write_name(&mut self.data[offset..offset + NAME_SIZE], name);
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&((count + 1) as u32).to_le_bytes());
        Ok(())
    }

    /// Updates the record for `name`; returns false if no record exists.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(idx) = find_record(self.data, name) else {
            return false;
        };
        let offset = RECORDS_OFFSET + idx * RECORD_SIZE + NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&root_page_id.as_u32().to_le_bytes());
        true
    }
}

/// Read-only view of a header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_record_count(self.data)
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|idx| read_root(self.data, idx))
    }
}

fn read_record_count(data: &[u8]) -> usize {
    let bytes: [u8; 4] = data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
        .try_into()
        .unwrap();
    u32::from_le_bytes(bytes) as usize
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    assert!(name.len() <= NAME_SIZE, "index name too long");
    let count = read_record_count(data);
    (0..count).find(|&idx| {
        let offset = RECORDS_OFFSET + idx * RECORD_SIZE;
        let stored = &data[offset..offset + NAME_SIZE];
        let len = stored.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &stored[..len] == name.as_bytes()
    })
}

fn read_root(data: &[u8], idx: usize) -> PageId {
    let offset = RECORDS_OFFSET + idx * RECORD_SIZE + NAME_SIZE;
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    PageId::new(u32::from_le_bytes(bytes))
}

fn write_name(dst: &mut [u8], name: &str) {
    dst.fill(0);
    dst[..name.len()].copy_from_slice(name.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_page_is_empty_header() {
        let data = [0u8; PAGE_SIZE];
        let header = HeaderPageRef::new(&data);
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_record("idx"), None);
    }

    #[test]
    fn test_insert_and_get() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("orders_pk", PageId::new(7)).unwrap();
        header.insert_record("users_pk", PageId::new(9)).unwrap();

        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_record("orders_pk"), Some(PageId::new(7)));
        assert_eq!(header.get_record("users_pk"), Some(PageId::new(9)));
        assert_eq!(header.get_record("missing"), None);
    }

    #[test]
    fn test_insert_existing_updates_in_place() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("idx", PageId::new(1)).unwrap();
        header.insert_record("idx", PageId::new(2)).unwrap();

        assert_eq!(header.record_count(), 1);
        assert_eq!(header.get_record("idx"), Some(PageId::new(2)));
    }

    #[test]
    fn test_update_missing_record() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        assert!(!header.update_record("idx", PageId::new(1)));
    }

    #[test]
    fn test_full_header_rejects_insert() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        for i in 0..MAX_HEADER_RECORDS {
            header
                .insert_record(&format!("idx_{}", i), PageId::new(i as u32))
                .unwrap();
        }
        assert!(matches!(
            header.insert_record("one_too_many", PageId::new(0)),
            Err(StratumError::HeaderPageFull)
        ));
    }
}
