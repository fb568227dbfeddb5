//! The rollback journal: pre-image logging for crash-safe commits.
//!
//! On-disk format (spec section 6.1): `<magic:8>\0<page_size:4>\0<count:4>\0`
//! followed by `count` records of `<page_number:4><pre_image:page_size>`, and
//! a trailing 4-byte FNV-1a CRC over the record stream so a half-written
//! journal (crash mid-write, before the base file is touched) is detected
//! and discarded on recovery rather than partially replayed.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, warn};
use zerocopy::big_endian::U32;
use zerocopy::{AsBytes, FromBytes};

use crate::error::{Error, Result};
use crate::fingerprint::FingerprintHasher;
use crate::serial_type::SerialType;
use crate::source::WritablePageSource;

const MAGIC: &[u8; 8] = b"sharcjrn";

pub struct JournalHeader {
    pub page_size: u32,
    pub record_count: u32,
}

/// One pre-image record: the page number and its bytes before the
/// transaction touched it.
pub struct JournalRecord<'a> {
    pub page_number: u32,
    pub pre_image: &'a [u8],
}

/// Writes a complete journal file from the pages about to be overwritten.
/// `read_pre_image` supplies each dirty page's current (pre-transaction)
/// bytes from the base source.
pub fn write_journal<F>(
    path: &Path,
    page_size: u32,
    dirty_page_numbers: &[u32],
    mut read_pre_image: F,
) -> Result<()>
where
    F: FnMut(u32) -> Result<Vec<u8>>,
{
    let mut file = File::create(path)?;
    let mut body = Vec::with_capacity(dirty_page_numbers.len() * (4 + page_size as usize));

    for &page_number in dirty_page_numbers {
        let pre_image = read_pre_image(page_number)?;
        body.extend_from_slice(&page_number.to_be_bytes());
        body.extend_from_slice(&pre_image);
    }

    let mut out = Vec::with_capacity(20 + body.len() + 4);
    out.extend_from_slice(MAGIC);
    out.push(0);
    out.extend_from_slice(&page_size.to_be_bytes());
    out.push(0);
    out.extend_from_slice(&(dirty_page_numbers.len() as u32).to_be_bytes());
    out.push(0);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc_of(&body).to_be_bytes());

    file.write_all(&out)?;
    file.sync_data()?;
    debug!(
        "wrote rollback journal {:?}: {} pages, {} bytes",
        path,
        dirty_page_numbers.len(),
        out.len()
    );
    Ok(())
}

/// FNV-1a over the journal body, reusing the fingerprint module's hash
/// construction rather than a bespoke one-off hasher.
fn crc_of(body: &[u8]) -> u32 {
    let mut hasher = FingerprintHasher::new();
    hasher.write_column(SerialType::Blob(body.len() as u64), body);
    hasher.finish().guard32
}

/// Reads just the page size out of a journal file's header, trusting the
/// magic but not validating the record count or trailing CRC. Opening a
/// database whose page 1 was left corrupt by an interrupted commit needs a
/// page size to size the page source *before* recovery can run -- the full
/// validated parse in [`recover`] (via [`read_journal`]) still decides
/// whether the journal is actually safe to replay.
pub fn peek_page_size(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 13 || &bytes[0..8] != MAGIC {
        return None;
    }
    Some(U32::read_from(&bytes[9..13])?.get())
}

/// Parses an on-disk journal, verifying the trailing CRC. Returns `Ok(None)`
/// for a file that doesn't look like a journal at all (different magic),
/// and an error for one that has the right magic but a corrupt/truncated
/// body -- a half-written journal must never be silently replayed.
pub fn read_journal(bytes: &[u8]) -> Result<Option<(JournalHeader, Vec<(u32, Vec<u8>)>)>> {
    if bytes.len() < 20 || &bytes[0..8] != MAGIC {
        return Ok(None);
    }
    let page_size = U32::read_from(&bytes[9..13]).ok_or_else(|| Error::corrupt(0, "truncated journal header"))?.get();
    let record_count = U32::read_from(&bytes[14..18])
        .ok_or_else(|| Error::corrupt(0, "truncated journal header"))?
        .get();

    let record_size = 4 + page_size as usize;
    let body_len = record_count as usize * record_size;
    let body_end = 19 + body_len;
    if bytes.len() < body_end + 4 {
        return Err(Error::InvalidFile(
            "journal truncated before its CRC trailer: discarding rather than replaying".into(),
        ));
    }

    let body = &bytes[19..body_end];
    let stored_crc = U32::read_from(&bytes[body_end..body_end + 4])
        .expect("4 bytes")
        .get();
    if crc_of(body) != stored_crc {
        return Err(Error::InvalidFile(
            "journal CRC mismatch: half-written journal, discarding without replay".into(),
        ));
    }

    let mut records = Vec::with_capacity(record_count as usize);
    for i in 0..record_count as usize {
        let start = i * record_size;
        let page_number = U32::read_from(&body[start..start + 4]).expect("4 bytes").get();
        let pre_image = body[start + 4..start + record_size].to_vec();
        records.push((page_number, pre_image));
    }

    Ok(Some((
        JournalHeader {
            page_size,
            record_count,
        },
        records,
    )))
}

/// Replays a journal file onto `base`, then deletes the journal. Called on
/// open when a stale journal is found from an interrupted commit.
pub fn recover(journal_path: &Path, base: &dyn WritablePageSource) -> Result<()> {
    let bytes = fs::read(journal_path)?;
    let parsed = read_journal(&bytes)?;
    let Some((_, records)) = parsed else {
        return Ok(());
    };

    for (page_number, pre_image) in &records {
        base.write_page(*page_number, pre_image)?;
    }
    base.sync()?;
    fs::remove_file(journal_path)?;
    warn!(
        "recovered {} page(s) from rollback journal {:?}",
        records.len(),
        journal_path
    );
    Ok(())
}

pub fn delete(journal_path: &Path) -> Result<()> {
    if journal_path.exists() {
        fs::remove_file(journal_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use tempfile_shim::NamedTempFile;

    mod tempfile_shim {
        use std::path::{Path, PathBuf};

        /// Minimal stand-in for a scratch file path under the system temp
        /// directory, cleaned up on drop. Avoids pulling in a `tempfile`
        /// dependency just for these unit tests.
        pub struct NamedTempFile {
            path: PathBuf,
        }

        impl NamedTempFile {
            pub fn new(name: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("sharc-journal-test-{name}-{:?}", std::thread::current().id()));
                Self { path }
            }

            pub fn path(&self) -> &Path {
                &self.path
            }
        }

        impl Drop for NamedTempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn write_then_read_round_trips_records() {
        let temp = NamedTempFile::new("roundtrip");
        let page_size = 64u32;
        let pages = vec![vec![1u8; page_size as usize], vec![2u8; page_size as usize]];
        let numbers = [1u32, 2u32];

        write_journal(temp.path(), page_size, &numbers, |n| {
            Ok(pages[(n - 1) as usize].clone())
        })
        .unwrap();

        let bytes = fs::read(temp.path()).unwrap();
        let (header, records) = read_journal(&bytes).unwrap().unwrap();
        assert_eq!(header.record_count, 2);
        assert_eq!(records[0], (1, pages[0].clone()));
        assert_eq!(records[1], (2, pages[1].clone()));
    }

    #[test]
    fn truncated_journal_is_rejected_not_partially_replayed() {
        let temp = NamedTempFile::new("truncated");
        let page_size = 64u32;
        write_journal(temp.path(), page_size, &[1], |_| Ok(vec![9u8; page_size as usize])).unwrap();

        let mut bytes = fs::read(temp.path()).unwrap();
        bytes.truncate(bytes.len() - 10);
        assert!(read_journal(&bytes).is_err());
    }

    #[test]
    fn peek_page_size_reads_the_header_without_the_crc_trailer() {
        let temp = NamedTempFile::new("peek");
        write_journal(temp.path(), 512, &[1], |_| Ok(vec![3u8; 512])).unwrap();

        let bytes = fs::read(temp.path()).unwrap();
        assert_eq!(peek_page_size(&bytes), Some(512));
        assert_eq!(peek_page_size(b"not a journal"), None);
    }

    #[test]
    fn recover_restores_pre_images_and_deletes_the_journal() {
        let temp = NamedTempFile::new("recover");
        let page_size = 64u32;
        write_journal(temp.path(), page_size, &[1], |_| Ok(vec![7u8; page_size as usize])).unwrap();

        let base = MemorySource::new(page_size, 2);
        base.write_page(1, &vec![0xffu8; page_size as usize]).unwrap();

        recover(temp.path(), &base).unwrap();

        let mut out = vec![0u8; page_size as usize];
        base.read_page(1, &mut out).unwrap();
        assert_eq!(out, vec![7u8; page_size as usize]);
        assert!(!temp.path().exists());
    }
}
