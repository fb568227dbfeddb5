//! The 100-byte database header at the start of page 1.
//!
//! Layout is bit-compatible with SQLite: a plain SQLite reader must be
//! able to open a file Sharc wrote, and vice versa. Every multi-byte field
//! is big-endian, which is why the struct is built from `zerocopy`'s
//! `big_endian` integer wrappers rather than native integers.

use zerocopy::{
    big_endian::{U16, U32},
    AsBytes, FromBytes, FromZeroes, Unaligned,
};

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 100;
const HEADER_STRING: [u8; 16] = *b"SQLite format 3\0";
const SQLITE_VERSION_NUMBER: u32 = 3_045_000;

#[derive(Debug, Clone, PartialEq, Eq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct DatabaseHeader {
    header_string: [u8; 16],
    page_size_raw: U16,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_bytes_per_page: u8,
    max_payload_fraction: u8,
    min_payload_fraction: u8,
    leaf_payload_fraction: u8,
    change_counter: U32,
    page_count: U32,
    freelist_trunk_page: U32,
    freelist_page_count: U32,
    schema_cookie: U32,
    schema_format: U32,
    page_cache_size: U32,
    largest_root_btree_page: U32,
    text_encoding: U32,
    user_version: U32,
    incremental_vacuum: U32,
    application_id: U32,
    reserved: [u8; 20],
    version_valid_for: U32,
    sqlite_version_number: U32,
}

impl Default for DatabaseHeader {
    fn default() -> Self {
        Self {
            header_string: HEADER_STRING,
            // SQLite's default page size since 3.12.0.
            page_size_raw: U16::new(4096),
            write_version: 1,
            read_version: 1,
            reserved_bytes_per_page: 0,
            max_payload_fraction: 64,
            min_payload_fraction: 32,
            leaf_payload_fraction: 32,
            change_counter: U32::new(1),
            page_count: U32::new(1),
            freelist_trunk_page: U32::new(0),
            freelist_page_count: U32::new(0),
            schema_cookie: U32::new(0),
            schema_format: U32::new(4),
            page_cache_size: U32::new(0),
            largest_root_btree_page: U32::new(0),
            text_encoding: U32::new(1),
            user_version: U32::new(0),
            incremental_vacuum: U32::new(0),
            application_id: U32::new(0),
            reserved: [0; 20],
            version_valid_for: U32::new(0),
            sqlite_version_number: U32::new(SQLITE_VERSION_NUMBER),
        }
    }
}

impl DatabaseHeader {
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let header = Self::read_from(bytes.as_slice())
            .ok_or_else(|| Error::InvalidFile("header did not fill 100 bytes".into()))?;
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        if self.header_string != HEADER_STRING {
            return Err(Error::InvalidFile("bad magic string".into()));
        }
        let page_size = self.page_size();
        if !page_size.is_power_of_two() || !(512..=65536).contains(&page_size) {
            return Err(Error::InvalidFile(format!(
                "page size {page_size} is not a power of two in [512, 65536]"
            )));
        }
        if self.text_encoding.get() != 1 {
            return Err(Error::UnsupportedFeature(
                "only UTF-8 text encoding is supported".into(),
            ));
        }
        Ok(())
    }

    /// Page size stored as zero means 65536 (the one case a `u16` can't
    /// represent directly).
    pub fn page_size(&self) -> u32 {
        match self.page_size_raw.get() {
            0 => 65536,
            n => n as u32,
        }
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.page_size_raw = U16::new(if page_size == 65536 {
            0
        } else {
            page_size as u16
        });
    }

    pub fn usable_page_size(&self) -> u32 {
        self.page_size() - self.reserved_bytes_per_page as u32
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.get()
    }

    pub fn set_page_count(&mut self, count: u32) {
        self.page_count.set(count);
    }

    pub fn change_counter(&self) -> u32 {
        self.change_counter.get()
    }

    pub fn bump_change_counter(&mut self) {
        self.change_counter.set(self.change_counter.get().wrapping_add(1));
    }

    pub fn freelist_trunk_page(&self) -> u32 {
        self.freelist_trunk_page.get()
    }

    pub fn set_freelist_trunk_page(&mut self, page: u32) {
        self.freelist_trunk_page.set(page);
    }

    pub fn freelist_page_count(&self) -> u32 {
        self.freelist_page_count.get()
    }

    pub fn set_freelist_page_count(&mut self, count: u32) {
        self.freelist_page_count.set(count);
    }

    pub fn schema_cookie(&self) -> u32 {
        self.schema_cookie.get()
    }

    pub fn bump_schema_cookie(&mut self) {
        self.schema_cookie.set(self.schema_cookie.get().wrapping_add(1));
    }

    pub fn user_version(&self) -> u32 {
        self.user_version.get()
    }

    pub fn set_user_version(&mut self, version: u32) {
        self.user_version.set(version);
    }

    pub fn application_id(&self) -> u32 {
        self.application_id.get()
    }

    pub fn set_application_id(&mut self, id: u32) {
        self.application_id.set(id);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.write_to(out.as_mut_slice()).expect("header is exactly 100 bytes");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_round_trips() {
        let header = DatabaseHeader::default();
        let bytes = header.to_bytes();
        let parsed = DatabaseHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.page_size(), 4096);
    }

    #[test]
    fn zero_page_size_means_65536() {
        let mut header = DatabaseHeader::default();
        header.set_page_size(65536);
        assert_eq!(header.page_size(), 65536);
        let bytes = header.to_bytes();
        let parsed = DatabaseHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.page_size(), 65536);
    }

    #[test]
    fn usable_page_size_subtracts_reserved_bytes() {
        let mut header = DatabaseHeader::default();
        header.reserved_bytes_per_page = 8;
        assert_eq!(header.usable_page_size(), 4096 - 8);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = DatabaseHeader::default().to_bytes();
        bytes[0] = b'X';
        assert!(DatabaseHeader::parse(&bytes).is_err());
    }

    #[test]
    fn schema_cookie_is_monotonic_on_bump() {
        let mut header = DatabaseHeader::default();
        let before = header.schema_cookie();
        header.bump_schema_cookie();
        assert!(header.schema_cookie() > before);
    }
}
