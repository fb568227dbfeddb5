//! B-tree page layout: header, cell pointer array, and the four cell
//! flavours (leaf/interior x table/index).
//!
//! A `BTreePageView` borrows a page buffer for the duration of one call;
//! nothing here copies cell payloads except when an overflow chain must be
//! followed (that copy happens in `btree::cursor`, not here).

use zerocopy::{
    big_endian::{U16, U32},
    AsBytes, FromBytes, FromZeroes, Unaligned,
};

use crate::error::{Error, Result};
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    InteriorIndex,
    InteriorTable,
    LeafIndex,
    LeafTable,
}

impl PageType {
    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::LeafIndex | PageType::LeafTable)
    }

    pub fn is_table(self) -> bool {
        matches!(self, PageType::InteriorTable | PageType::LeafTable)
    }

    pub fn header_size(self) -> usize {
        if self.is_leaf() {
            8
        } else {
            12
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            0x02 => Ok(PageType::InteriorIndex),
            0x05 => Ok(PageType::InteriorTable),
            0x0a => Ok(PageType::LeafIndex),
            0x0d => Ok(PageType::LeafTable),
            other => Err(Error::CorruptPage {
                page: 0,
                reason: format!("unrecognised b-tree page flag {other:#x}"),
            }),
        }
    }

    pub fn to_flag(self) -> u8 {
        match self {
            PageType::InteriorIndex => 0x02,
            PageType::InteriorTable => 0x05,
            PageType::LeafIndex => 0x0a,
            PageType::LeafTable => 0x0d,
        }
    }
}

/// Raw on-disk layout of the largest (interior) page header. For a leaf
/// page only the first 8 bytes are meaningful; `right_most_pointer` is
/// simply unused in that case, never written or read as a header field.
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct RawPageHeader {
    flags: u8,
    first_freeblock: U16,
    cell_count: U16,
    cell_content_start: U16,
    fragmented_free_bytes: u8,
    right_most_pointer: U32,
}

#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_type: PageType,
    pub first_freeblock: u16,
    pub cell_count: u16,
    pub cell_content_start: u32,
    pub fragmented_free_bytes: u8,
    pub right_most_pointer: u32,
}

impl PageHeader {
    pub fn parse(data: &[u8], page_number: u32) -> Result<Self> {
        let raw = RawPageHeader::read_from_prefix(data).ok_or_else(|| Error::CorruptPage {
            page: page_number,
            reason: "page too small for a b-tree header".into(),
        })?;
        let page_type = PageType::from_flag(raw.flags).map_err(|_| Error::CorruptPage {
            page: page_number,
            reason: format!("unrecognised b-tree page flag {:#x}", raw.flags),
        })?;

        let cell_content_start = match raw.cell_content_start.get() {
            0 => 65536,
            n => n as u32,
        };

        Ok(Self {
            page_type,
            first_freeblock: raw.first_freeblock.get(),
            cell_count: raw.cell_count.get(),
            cell_content_start,
            fragmented_free_bytes: raw.fragmented_free_bytes,
            right_most_pointer: raw.right_most_pointer.get(),
        })
    }

    pub fn size(&self) -> usize {
        self.page_type.header_size()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let raw = RawPageHeader {
            flags: self.page_type.to_flag(),
            first_freeblock: U16::new(self.first_freeblock),
            cell_count: U16::new(self.cell_count),
            cell_content_start: U16::new(if self.cell_content_start == 65536 {
                0
            } else {
                self.cell_content_start as u16
            }),
            fragmented_free_bytes: self.fragmented_free_bytes,
            right_most_pointer: U32::new(self.right_most_pointer),
        };
        raw.as_bytes()[..self.size()].to_vec()
    }
}

/// A borrowed view of one physical b-tree page, offset-relative to the
/// start of its usable region (the header is parsed starting at byte 100
/// for page 1, byte 0 otherwise -- callers pass the already-offset slice).
pub struct BTreePageView<'a> {
    pub page_number: u32,
    pub header: PageHeader,
    data: &'a [u8],
}

/// A leaf table cell: `(rowid, payload, overflow_page)`.
pub struct LeafTableCell<'a> {
    pub rowid: i64,
    pub local_payload: &'a [u8],
    pub total_payload_size: usize,
    pub overflow_page: Option<u32>,
}

pub struct InteriorTableCell {
    pub left_child: u32,
    pub rowid: i64,
}

pub struct LeafIndexCell<'a> {
    pub local_payload: &'a [u8],
    pub total_payload_size: usize,
    pub overflow_page: Option<u32>,
}

pub struct InteriorIndexCell<'a> {
    pub left_child: u32,
    pub local_payload: &'a [u8],
    pub total_payload_size: usize,
    pub overflow_page: Option<u32>,
}

impl<'a> BTreePageView<'a> {
    pub fn parse(page_number: u32, data: &'a [u8]) -> Result<Self> {
        let header = PageHeader::parse(data, page_number)?;
        Ok(Self {
            page_number,
            header,
            data,
        })
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn cell_count(&self) -> u16 {
        self.header.cell_count
    }

    fn cell_pointer_array_start(&self) -> usize {
        self.header.size()
    }

    /// Returns the cell content offset for `index`, without copying the
    /// pointer array.
    pub fn cell_pointer(&self, index: u16) -> Result<u16> {
        if index >= self.header.cell_count {
            return Err(Error::corrupt(self.page_number, "cell index out of range"));
        }
        let start = self.cell_pointer_array_start() + index as usize * 2;
        let bytes = self
            .data
            .get(start..start + 2)
            .ok_or_else(|| Error::corrupt(self.page_number, "cell pointer array truncated"))?;
        Ok(U16::read_from(bytes).expect("2 bytes").get())
    }

    fn cell_bytes(&self, index: u16) -> Result<&'a [u8]> {
        let ptr = self.cell_pointer(index)? as usize;
        self.data
            .get(ptr..)
            .ok_or_else(|| Error::corrupt(self.page_number, "cell pointer beyond page"))
    }

    /// Threshold beyond which a payload spills into an overflow chain, per
    /// the SQLite B-tree algorithm (sections 1.5/1.6 of the file format
    /// description): `usable - 35` for table leaves, and the index
    /// formula for index cells.
    pub fn local_payload_threshold(usable_page_size: u32, is_index: bool) -> usize {
        let usable = usable_page_size as i64;
        if is_index {
            (((usable - 12) * 64 / 255) - 23) as usize
        } else {
            (usable - 35) as usize
        }
    }

    fn max_local(usable_page_size: u32, is_index: bool) -> usize {
        let usable = usable_page_size as i64;
        if is_index {
            (((usable - 12) * 64 / 255) - 23) as usize
        } else {
            (usable - 35) as usize
        }
    }

    fn min_local(usable_page_size: u32) -> usize {
        let usable = usable_page_size as i64;
        (((usable - 12) * 32 / 255) - 23) as usize
    }

    /// Splits a payload into (local bytes, overflow bytes) per the SQLite
    /// payload-fitting algorithm.
    pub fn local_payload_size(total: usize, usable_page_size: u32, is_index: bool) -> usize {
        let max_local = Self::max_local(usable_page_size, is_index);
        if total <= max_local {
            return total;
        }
        let min_local = Self::min_local(usable_page_size);
        let surplus = min_local + (total - min_local) % (usable_page_size as usize - 4);
        if surplus <= max_local {
            surplus
        } else {
            min_local
        }
    }

    pub fn leaf_table_cell(&self, index: u16) -> Result<LeafTableCell<'a>> {
        if self.page_type() != PageType::LeafTable {
            return Err(Error::corrupt(self.page_number, "not a leaf table page"));
        }
        let mut cell = self.cell_bytes(index)?;
        let (payload_size, n) = varint::read(cell);
        cell = &cell[n..];
        let (rowid, n) = varint::read(cell);
        cell = &cell[n..];

        let usable = self.data.len() as u32;
        let local_size = Self::local_payload_size(payload_size as usize, usable, false);
        let (local, rest) = cell.split_at(local_size.min(cell.len()));
        let overflow_page = if local_size < payload_size as usize {
            rest.get(..4)
                .map(|b| U32::read_from(b).expect("4 bytes").get())
        } else {
            None
        };

        Ok(LeafTableCell {
            rowid,
            local_payload: local,
            total_payload_size: payload_size as usize,
            overflow_page,
        })
    }

    pub fn interior_table_cell(&self, index: u16) -> Result<InteriorTableCell> {
        if self.page_type() != PageType::InteriorTable {
            return Err(Error::corrupt(self.page_number, "not an interior table page"));
        }
        let cell = self.cell_bytes(index)?;
        let left_child = U32::read_from_prefix(cell)
            .ok_or_else(|| Error::corrupt(self.page_number, "truncated interior cell"))?
            .get();
        let (rowid, _) = varint::read(&cell[4..]);
        Ok(InteriorTableCell { left_child, rowid })
    }

    pub fn leaf_index_cell(&self, index: u16) -> Result<LeafIndexCell<'a>> {
        if self.page_type() != PageType::LeafIndex {
            return Err(Error::corrupt(self.page_number, "not a leaf index page"));
        }
        let mut cell = self.cell_bytes(index)?;
        let (payload_size, n) = varint::read(cell);
        cell = &cell[n..];

        let usable = self.data.len() as u32;
        let local_size = Self::local_payload_size(payload_size as usize, usable, true);
        let (local, rest) = cell.split_at(local_size.min(cell.len()));
        let overflow_page = if local_size < payload_size as usize {
            rest.get(..4)
                .map(|b| U32::read_from(b).expect("4 bytes").get())
        } else {
            None
        };

        Ok(LeafIndexCell {
            local_payload: local,
            total_payload_size: payload_size as usize,
            overflow_page,
        })
    }

    pub fn interior_index_cell(&self, index: u16) -> Result<InteriorIndexCell<'a>> {
        if self.page_type() != PageType::InteriorIndex {
            return Err(Error::corrupt(self.page_number, "not an interior index page"));
        }
        let cell = self.cell_bytes(index)?;
        let left_child = U32::read_from_prefix(cell)
            .ok_or_else(|| Error::corrupt(self.page_number, "truncated interior index cell"))?
            .get();
        let mut rest = &cell[4..];
        let (payload_size, n) = varint::read(rest);
        rest = &rest[n..];

        let usable = self.data.len() as u32;
        let local_size = Self::local_payload_size(payload_size as usize, usable, true);
        let (local, overflow_bytes) = rest.split_at(local_size.min(rest.len()));
        let overflow_page = if local_size < payload_size as usize {
            overflow_bytes
                .get(..4)
                .map(|b| U32::read_from(b).expect("4 bytes").get())
        } else {
            None
        };

        Ok(InteriorIndexCell {
            left_child,
            local_payload: local,
            total_payload_size: payload_size as usize,
            overflow_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_table_page(cells: &[(i64, &[u8])], usable: usize) -> Vec<u8> {
        let mut page = vec![0u8; usable];
        let mut header = PageHeader {
            page_type: PageType::LeafTable,
            first_freeblock: 0,
            cell_count: 0,
            cell_content_start: usable as u32,
            fragmented_free_bytes: 0,
            right_most_pointer: 0,
        };

        let mut content_start = usable;
        let mut pointers = Vec::new();
        for (rowid, payload) in cells {
            let mut cell = Vec::new();
            cell.extend(varint::encode_to_vec(payload.len() as i64));
            cell.extend(varint::encode_to_vec(*rowid));
            cell.extend_from_slice(payload);

            content_start -= cell.len();
            page[content_start..content_start + cell.len()].copy_from_slice(&cell);
            pointers.push(content_start as u16);
        }

        header.cell_count = cells.len() as u16;
        header.cell_content_start = content_start as u32;
        let header_bytes = header.to_bytes();
        page[..header_bytes.len()].copy_from_slice(&header_bytes);

        let mut ptr_offset = header_bytes.len();
        for ptr in pointers {
            page[ptr_offset..ptr_offset + 2].copy_from_slice(&ptr.to_be_bytes());
            ptr_offset += 2;
        }

        page
    }

    #[test]
    fn parses_leaf_table_cells_in_order() {
        let page = leaf_table_page(&[(1, b"alice"), (2, b"bob")], 512);
        let view = BTreePageView::parse(1, &page).unwrap();
        assert_eq!(view.page_type(), PageType::LeafTable);
        assert_eq!(view.cell_count(), 2);

        let c0 = view.leaf_table_cell(0).unwrap();
        assert_eq!(c0.rowid, 1);
        assert_eq!(c0.local_payload, b"alice");

        let c1 = view.leaf_table_cell(1).unwrap();
        assert_eq!(c1.rowid, 2);
        assert_eq!(c1.local_payload, b"bob");
    }

    #[test]
    fn rejects_out_of_range_cell_index() {
        let page = leaf_table_page(&[(1, b"x")], 512);
        let view = BTreePageView::parse(1, &page).unwrap();
        assert!(view.leaf_table_cell(5).is_err());
    }
}
