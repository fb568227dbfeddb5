//! The page transform seam: a hook between the byte-level source and the
//! b-tree layer that can re-shape a page's bytes on the way in and out.
//!
//! `Identity` is the only transform implemented here. An authenticated
//! (AES-GCM sealed-page) transform is an external collaborator's contract
//! to fulfil against [`AuthenticatedTransform`]; this crate defines the
//! trait and the error path (`Error::CryptoVerifyFailed`) but does not
//! implement sealing or key management itself.

use crate::error::Result;

pub trait PageTransform: Send + Sync {
    /// The on-disk page size a transform needs to store `logical_size`
    /// logical bytes (e.g. an authenticated transform reserves trailing
    /// bytes for a nonce and tag).
    fn transformed_page_size(&self, logical_size: u32) -> u32;

    /// Converts a page as stored on disk (`raw`) into its logical bytes,
    /// writing into `out`.
    fn transform_read(&self, page_number: u32, raw: &[u8], out: &mut [u8]) -> Result<()>;

    /// Converts logical page bytes (`logical`) into their on-disk
    /// representation, writing into `out`.
    fn transform_write(&self, page_number: u32, logical: &[u8], out: &mut [u8]) -> Result<()>;
}

pub struct Identity;

impl PageTransform for Identity {
    fn transformed_page_size(&self, logical_size: u32) -> u32 {
        logical_size
    }

    fn transform_read(&self, _page_number: u32, raw: &[u8], out: &mut [u8]) -> Result<()> {
        out[..raw.len()].copy_from_slice(raw);
        Ok(())
    }

    fn transform_write(&self, _page_number: u32, logical: &[u8], out: &mut [u8]) -> Result<()> {
        out[..logical.len()].copy_from_slice(logical);
        Ok(())
    }
}

/// Contract for an authenticated (seal-and-verify) page transform. Not
/// implemented in this crate: a real implementation would hold a key,
/// derive a per-page nonce from `page_number` plus a transaction counter,
/// and return `Error::CryptoVerifyFailed` from `transform_read` on tag
/// mismatch.
pub trait AuthenticatedTransform: PageTransform {
    fn key_id(&self) -> &str;
}

/// Lets `OpenOptions` hold a transform behind `Arc<dyn PageTransform>`
/// while `DecryptingSource<S, T>` keeps its concrete `T: PageTransform`
/// bound rather than widening to a trait object itself.
impl PageTransform for std::sync::Arc<dyn PageTransform> {
    fn transformed_page_size(&self, logical_size: u32) -> u32 {
        self.as_ref().transformed_page_size(logical_size)
    }

    fn transform_read(&self, page_number: u32, raw: &[u8], out: &mut [u8]) -> Result<()> {
        self.as_ref().transform_read(page_number, raw, out)
    }

    fn transform_write(&self, page_number: u32, logical: &[u8], out: &mut [u8]) -> Result<()> {
        self.as_ref().transform_write(page_number, logical, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips() {
        let identity = Identity;
        let logical = vec![1u8, 2, 3, 4];
        let mut on_disk = vec![0u8; 4];
        identity.transform_write(1, &logical, &mut on_disk).unwrap();

        let mut back = vec![0u8; 4];
        identity.transform_read(1, &on_disk, &mut back).unwrap();
        assert_eq!(back, logical);
    }
}
