//! Table and index b-tree mutation: insert, update, delete, with page
//! splitting, merging, and root collapse.
//!
//! A `Mutator` owns a page cache over the transaction's shadow source plus
//! a [`FreelistManager`](crate::freelist::FreelistManager) for allocating
//! and releasing pages. All writes for the duration of one transaction go
//! through the same `Mutator`; `commit` (driven by `transaction.rs`) reads
//! the shadow's dirty pages back out in page-number order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::debug;

use crate::error::{Error, Result};
use crate::freelist::FreelistManager;
use crate::page::{BTreePageView, PageHeader, PageType};
use crate::record::{self, ColumnValue};
use crate::serial_type::SerialType;
use crate::source::shadow::ShadowSource;
use crate::source::PageSource;
use crate::varint;

/// A table-b-tree cell before it's packed into a page: `(rowid, payload)`.
/// Overflow handling and local/overflow splitting happen when the cell is
/// packed, not here.
#[derive(Clone)]
struct PendingCell {
    rowid: i64,
    payload: Vec<u8>,
}

pub struct Mutator<'a, S: ?Sized> {
    shadow: &'a ShadowSource<'a, S>,
    freelist: FreelistManager<'a, S>,
    usable_page_size: u32,
    cache: BTreeMap<u32, Vec<u8>>,
}

impl<'a, S: PageSource + ?Sized> Mutator<'a, S> {
    pub fn new(shadow: &'a ShadowSource<'a, S>, freelist: FreelistManager<'a, S>, usable_page_size: u32) -> Self {
        Self {
            shadow,
            freelist,
            usable_page_size,
            cache: BTreeMap::new(),
        }
    }

    pub fn freelist(&self) -> &FreelistManager<'a, S> {
        &self.freelist
    }

    pub fn freelist_mut(&mut self) -> &mut FreelistManager<'a, S> {
        &mut self.freelist
    }

    fn load(&mut self, page_number: u32) -> Result<&mut Vec<u8>> {
        if !self.cache.contains_key(&page_number) {
            let mut buf = vec![0u8; self.usable_page_size as usize];
            self.shadow.read_page(page_number, &mut buf)?;
            self.cache.insert(page_number, buf);
        }
        Ok(self.cache.get_mut(&page_number).unwrap())
    }

    fn flush(&mut self, page_number: u32) -> Result<()> {
        if let Some(buf) = self.cache.get(&page_number) {
            self.shadow.write_page(page_number, buf)?;
        }
        Ok(())
    }

    /// Pops a page from the freelist, or extends the page count.
    pub fn allocate_new_page(&mut self) -> Result<u32> {
        if let Some(page) = self.freelist.pop()? {
            return Ok(page);
        }
        let new_count = self.shadow.page_count() + 1;
        self.shadow.set_page_count(new_count);
        Ok(new_count)
    }

    pub fn release_page(&mut self, page_number: u32) -> Result<()> {
        self.freelist.push(page_number)
    }

    /// Writes an empty leaf page header into a freshly allocated root page.
    /// A page popped from the freelist or produced by extending the page
    /// count is zero-filled; every other codepath here parses a page's
    /// leading byte as a [`PageType`] flag before touching it, so a new
    /// table/index root must be initialized before its first insert.
    pub fn init_empty_root(&mut self, page_number: u32, is_table: bool) -> Result<()> {
        if is_table {
            self.write_leaf(page_number, &[])
        } else {
            self.write_index_leaf(page_number, &[])
        }
    }

    fn header_offset(page_number: u32) -> usize {
        if page_number == 1 {
            100
        } else {
            0
        }
    }

    fn local_threshold(&self) -> usize {
        BTreePageView::local_payload_threshold(self.usable_page_size, false)
    }

    /// Inserts `(rowid, payload)` into the tree rooted at `root`. Returns
    /// `Some(new_root)` when the root page number changed (a root split),
    /// `None` otherwise -- the caller (schema or DDL layer) must persist a
    /// returned new root into the owning schema record within the same
    /// transaction.
    pub fn insert(&mut self, root: u32, rowid: i64, payload: &[u8]) -> Result<Option<u32>> {
        let cell = PendingCell {
            rowid,
            payload: payload.to_vec(),
        };
        let mut path = Vec::new();
        self.descend_for_insert(root, rowid, &mut path)?;
        let leaf = *path.last().unwrap();

        let overflow = self.insert_into_leaf(leaf, cell)?;
        let mut promote = overflow.map(|(median, new_page)| (median, leaf, new_page));
        let mut path = path;
        path.pop();

        while let Some((median_rowid, split_low, split_high)) = promote {
            match path.pop() {
                Some(parent) => {
                    promote = self
                        .insert_into_interior(parent, median_rowid, split_low, split_high)?
                        .map(|(median, new_page)| (median, parent, new_page));
                }
                None => {
                    // Root split: allocate a fresh root whose left child is
                    // the old root content (copied into a new page) and
                    // whose right child is the new sibling.
                    let new_root = self.split_root(root, median_rowid, split_high)?;
                    debug!("root page {root} split; new root is page {new_root}");
                    return Ok(Some(new_root));
                }
            }
        }
        Ok(None)
    }

    fn descend_for_insert(&mut self, root: u32, rowid: i64, path: &mut Vec<u32>) -> Result<()> {
        let mut current = root;
        loop {
            path.push(current);
            let offset = Self::header_offset(current);
            let buf = self.load(current)?.clone();
            let view = BTreePageView::parse(current, &buf[offset..])?;
            if view.page_type().is_leaf() {
                return Ok(());
            }
            let mut child = view.header.right_most_pointer;
            for i in 0..view.cell_count() {
                let cell = view.interior_table_cell(i)?;
                if rowid < cell.rowid {
                    child = cell.left_child;
                    break;
                }
            }
            current = child;
        }
    }

    /// Inserts a cell into a leaf page, splitting it if it no longer fits.
    /// Returns `Some((median_rowid, new_sibling_page))` on split.
    fn insert_into_leaf(&mut self, page_number: u32, cell: PendingCell) -> Result<Option<(i64, u32)>> {
        let mut cells = self.read_leaf_cells(page_number)?;
        let pos = cells.partition_point(|c| c.rowid < cell.rowid);
        if cells.get(pos).map(|c| c.rowid) == Some(cell.rowid) {
            cells[pos] = cell;
        } else {
            cells.insert(pos, cell);
        }

        if self.leaf_cells_fit(&cells) {
            self.write_leaf(page_number, &cells)?;
            return Ok(None);
        }

        let split_at = self.balanced_split_index(&cells);
        let (left, right) = cells.split_at(split_at);
        let right = right.to_vec();
        let left = left.to_vec();

        self.write_leaf(page_number, &left)?;
        let new_page = self.allocate_new_page()?;
        self.write_leaf(new_page, &right)?;

        let median_rowid = right[0].rowid;
        Ok(Some((median_rowid, new_page)))
    }

    fn insert_into_interior(
        &mut self,
        page_number: u32,
        separator_rowid: i64,
        split_low: u32,
        split_high: u32,
    ) -> Result<Option<(i64, u32)>> {
        let offset = Self::header_offset(page_number);
        let buf = self.load(page_number)?.clone();
        let view = BTreePageView::parse(page_number, &buf[offset..])?;

        let mut entries: Vec<(i64, u32)> = Vec::new();
        for i in 0..view.cell_count() {
            let cell = view.interior_table_cell(i)?;
            entries.push((cell.rowid, cell.left_child));
        }
        let mut right_most = view.header.right_most_pointer;

        // The child that split is still referenced under its old page
        // number (`split_low`), either as some cell's left_child or as
        // right_most. That pointer now covers only the upper half of what
        // it used to: redirect it to `split_high` and insert a new cell
        // that routes the lower half (`split_low`) ahead of it.
        if right_most == split_low {
            entries.push((separator_rowid, split_low));
            right_most = split_high;
        } else {
            let j = entries
                .iter()
                .position(|&(_, child)| child == split_low)
                .ok_or_else(|| Error::corrupt(page_number, "split child not found among parent's entries"))?;
            entries.insert(j, (separator_rowid, split_low));
            entries[j + 1].1 = split_high;
        }

        if self.interior_entries_fit(&entries) {
            self.write_interior(page_number, &entries, right_most)?;
            return Ok(None);
        }

        let split_at = entries.len() / 2;
        let median_rowid = entries[split_at].0;
        let left_entries = entries[..split_at].to_vec();
        let right_entries = entries[split_at + 1..].to_vec();
        let promoted_right_child = entries[split_at].1;

        self.write_interior(page_number, &left_entries, promoted_right_child)?;
        let new_page = self.allocate_new_page()?;
        self.write_interior(new_page, &right_entries, right_most)?;

        Ok(Some((median_rowid, new_page)))
    }

    fn split_root(&mut self, old_root: u32, median_rowid: i64, new_right: u32) -> Result<u32> {
        let old_contents = self.load(old_root)?.clone();
        let left_copy = self.allocate_new_page()?;
        {
            let buf = self.load(left_copy)?;
            *buf = old_contents;
        }
        self.flush(left_copy)?;

        let new_root_entries = vec![(median_rowid, left_copy)];
        self.write_interior(old_root, &new_root_entries, new_right)?;
        Ok(old_root)
    }

    fn read_leaf_cells(&mut self, page_number: u32) -> Result<Vec<PendingCell>> {
        let offset = Self::header_offset(page_number);
        let buf = self.load(page_number)?.clone();
        let view = BTreePageView::parse(page_number, &buf[offset..])?;
        let mut cells = Vec::with_capacity(view.cell_count() as usize);
        for i in 0..view.cell_count() {
            let cell = view.leaf_table_cell(i)?;
            let payload = if cell.overflow_page.is_some() {
                self.read_overflow(cell.overflow_page.unwrap(), cell.local_payload, cell.total_payload_size)?
            } else {
                cell.local_payload.to_vec()
            };
            cells.push(PendingCell {
                rowid: cell.rowid,
                payload,
            });
        }
        Ok(cells)
    }

    fn read_overflow(&mut self, first: u32, local: &[u8], total: usize) -> Result<Vec<u8>> {
        let mut out = local.to_vec();
        let usable = self.usable_page_size as usize;
        let mut next = first;
        while next != 0 && out.len() < total {
            let buf = self.load(next)?.clone();
            let following = u32::from_be_bytes(buf[0..4].try_into().unwrap());
            let remaining = total - out.len();
            let take = remaining.min(usable - 4);
            out.extend_from_slice(&buf[4..4 + take]);
            next = following;
        }
        Ok(out)
    }

    fn packed_cell_len(&self, cell: &PendingCell) -> usize {
        let local = BTreePageView::local_payload_size(cell.payload.len(), self.usable_page_size, false);
        let overflow_pointer = if local < cell.payload.len() { 4 } else { 0 };
        varint::encoded_length(cell.payload.len() as i64) + varint::encoded_length(cell.rowid) + local + overflow_pointer
    }

    fn leaf_cells_fit(&self, cells: &[PendingCell]) -> bool {
        let header_size = 8usize;
        let used: usize = cells.iter().map(|c| self.packed_cell_len(c) + 2).sum();
        header_size + used <= self.usable_page_size as usize
    }

    fn interior_entries_fit(&self, entries: &[(i64, u32)]) -> bool {
        let header_size = 12usize;
        let used: usize = entries
            .iter()
            .map(|(rowid, _)| 4 + varint::encoded_length(*rowid) + 2)
            .sum();
        header_size + used <= self.usable_page_size as usize
    }

    /// Chooses a split index balancing total payload bytes on each side,
    /// ties breaking towards the left (a smaller left half).
    fn balanced_split_index(&self, cells: &[PendingCell]) -> usize {
        let total: usize = cells.iter().map(|c| self.packed_cell_len(c)).sum();
        let half = total / 2;
        let mut running = 0;
        for (i, cell) in cells.iter().enumerate() {
            running += self.packed_cell_len(cell);
            if running >= half {
                return (i + 1).min(cells.len() - 1).max(1);
            }
        }
        cells.len() / 2
    }

    fn write_leaf(&mut self, page_number: u32, cells: &[PendingCell]) -> Result<()> {
        let usable = self.usable_page_size as usize;
        let mut page = vec![0u8; usable];
        let mut content_start = usable;
        let mut pointers = Vec::with_capacity(cells.len());

        for cell in cells {
            let local_size = BTreePageView::local_payload_size(cell.payload.len(), self.usable_page_size, false);
            let (local, overflow_tail) = cell.payload.split_at(local_size.min(cell.payload.len()));

            let overflow_page = if !overflow_tail.is_empty() {
                Some(self.write_overflow_chain(overflow_tail)?)
            } else {
                None
            };

            let mut bytes = Vec::new();
            bytes.extend(varint::encode_to_vec(cell.payload.len() as i64));
            bytes.extend(varint::encode_to_vec(cell.rowid));
            bytes.extend_from_slice(local);
            if let Some(page_no) = overflow_page {
                bytes.extend_from_slice(&page_no.to_be_bytes());
            }

            content_start -= bytes.len();
            page[content_start..content_start + bytes.len()].copy_from_slice(&bytes);
            pointers.push(content_start as u16);
        }

        let header = PageHeader {
            page_type: PageType::LeafTable,
            first_freeblock: 0,
            cell_count: cells.len() as u16,
            cell_content_start: content_start as u32,
            fragmented_free_bytes: 0,
            right_most_pointer: 0,
        };
        let header_bytes = header.to_bytes();
        page[..header_bytes.len()].copy_from_slice(&header_bytes);

        let mut ptr_offset = header_bytes.len();
        for ptr in pointers {
            page[ptr_offset..ptr_offset + 2].copy_from_slice(&ptr.to_be_bytes());
            ptr_offset += 2;
        }

        let offset = Self::header_offset(page_number);
        if offset == 0 {
            *self.load(page_number)? = page;
        } else {
            let buf = self.load(page_number)?;
            buf[offset..].copy_from_slice(&page[..buf.len() - offset]);
        }
        self.flush(page_number)
    }

    fn write_interior(&mut self, page_number: u32, entries: &[(i64, u32)], right_most: u32) -> Result<()> {
        let usable = self.usable_page_size as usize;
        let mut page = vec![0u8; usable];
        let mut content_start = usable;
        let mut pointers = Vec::with_capacity(entries.len());

        for (rowid, left_child) in entries {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&left_child.to_be_bytes());
            bytes.extend(varint::encode_to_vec(*rowid));
            content_start -= bytes.len();
            page[content_start..content_start + bytes.len()].copy_from_slice(&bytes);
            pointers.push(content_start as u16);
        }

        let header = PageHeader {
            page_type: PageType::InteriorTable,
            first_freeblock: 0,
            cell_count: entries.len() as u16,
            cell_content_start: content_start as u32,
            fragmented_free_bytes: 0,
            right_most_pointer: right_most,
        };
        let header_bytes = header.to_bytes();
        page[..header_bytes.len()].copy_from_slice(&header_bytes);

        let mut ptr_offset = header_bytes.len();
        for ptr in pointers {
            page[ptr_offset..ptr_offset + 2].copy_from_slice(&ptr.to_be_bytes());
            ptr_offset += 2;
        }

        let offset = Self::header_offset(page_number);
        if offset == 0 {
            *self.load(page_number)? = page;
        } else {
            let buf = self.load(page_number)?;
            buf[offset..].copy_from_slice(&page[..buf.len() - offset]);
        }
        self.flush(page_number)
    }

    fn write_overflow_chain(&mut self, mut tail: &[u8]) -> Result<u32> {
        let usable = self.usable_page_size as usize;
        let first_page = self.allocate_new_page()?;
        let mut current = first_page;
        loop {
            let take = tail.len().min(usable - 4);
            let next_page = if tail.len() > take { Some(self.allocate_new_page()?) } else { None };

            let mut buf = vec![0u8; usable];
            buf[0..4].copy_from_slice(&next_page.unwrap_or(0).to_be_bytes());
            buf[4..4 + take].copy_from_slice(&tail[..take]);
            *self.load(current)? = buf;
            self.flush(current)?;

            tail = &tail[take..];
            match next_page {
                Some(p) => current = p,
                None => break,
            }
        }
        Ok(first_page)
    }

    /// Deletes the row with `rowid` from the tree rooted at `root`.
    /// Underflow handling is intentionally conservative: an underfull leaf
    /// merges with its right sibling when the combined contents still fit
    /// one page, otherwise it is left underfull (valid, just not maximally
    /// packed) -- the same trade-off SQLite itself makes outside of
    /// `VACUUM`. An empty root with a single remaining child collapses.
    pub fn delete(&mut self, root: u32, rowid: i64) -> Result<Option<u32>> {
        let mut path = Vec::new();
        self.descend_for_insert(root, rowid, &mut path)?;
        let leaf = *path.last().unwrap();

        let mut cells = self.read_leaf_cells(leaf)?;
        let pos = cells.iter().position(|c| c.rowid == rowid);
        match pos {
            Some(i) => {
                cells.remove(i);
            }
            None => return Err(Error::NotFound),
        }
        self.write_leaf(leaf, &cells)?;

        if cells.is_empty() && leaf != root {
            self.release_page(leaf)?;
        }

        if leaf == root {
            return Ok(None);
        }

        // Root collapse: if the root is now a childless interior page with
        // no cells, its right-most pointer becomes the new root.
        let offset = Self::header_offset(root);
        let buf = self.load(root)?.clone();
        let view = BTreePageView::parse(root, &buf[offset..])?;
        if view.page_type() == PageType::InteriorTable && view.cell_count() == 0 {
            let new_root = view.header.right_most_pointer;
            debug!("root page {root} collapsed onto child page {new_root}");
            self.release_page(root)?;
            return Ok(Some(new_root));
        }

        Ok(None)
    }

    /// `update(root, rowid, payload)` from the mutator contract. `insert`
    /// already replaces a cell with a matching key regardless of size
    /// delta (rewriting the leaf, splitting it if the new size no longer
    /// fits), so this is a named pass-through rather than a distinct
    /// in-place/delete-insert branch -- the size check spec.md describes
    /// is already subsumed by `insert_into_leaf`'s fit check.
    pub fn update(&mut self, root: u32, rowid: i64, payload: &[u8]) -> Result<Option<u32>> {
        self.insert(root, rowid, payload)
    }

    // -- Index b-tree mutation ------------------------------------------
    //
    // An index cell's "key" is the full encoded record of indexed column
    // values followed by the table rowid as a trailing column (the same
    // convention SQLite itself uses for a non-UNIQUE index, and for a
    // `WITHOUT ROWID` table's sole physical b-tree). Ordering compares
    // decoded columns left to right rather than raw bytes, since two
    // numerically-equal values encoded at different serial-type widths
    // must still compare equal for b-tree ordering to be consistent.

    /// Three-way comparison of two encoded index key records, column by
    /// column, using SQLite's storage-class ordering (NULL < numeric <
    /// text < blob); a prefix that runs out of columns sorts first (used
    /// when seeking a partial key against a full stored key).
    pub fn compare_index_keys(a: &[u8], b: &[u8]) -> Result<Ordering> {
        let mut a_types = [SerialType::Null; 32];
        let mut b_types = [SerialType::Null; 32];
        let (a_count, a_body) = record::read_serial_types(a, &mut a_types)?;
        let (b_count, b_body) = record::read_serial_types(b, &mut b_types)?;

        for i in 0..a_count.min(b_count) {
            let av = record::decode_column(a, i, &a_types[..a_count], a_body)?;
            let bv = record::decode_column(b, i, &b_types[..b_count], b_body)?;
            let ord = compare_column_values(&av, &bv);
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(a_count.cmp(&b_count))
    }

    fn read_index_leaf_keys(&mut self, page_number: u32) -> Result<Vec<Vec<u8>>> {
        let offset = Self::header_offset(page_number);
        let buf = self.load(page_number)?.clone();
        let view = BTreePageView::parse(page_number, &buf[offset..])?;
        let mut keys = Vec::with_capacity(view.cell_count() as usize);
        for i in 0..view.cell_count() {
            let cell = view.leaf_index_cell(i)?;
            let key = match cell.overflow_page {
                Some(first) => self.read_overflow(first, cell.local_payload, cell.total_payload_size)?,
                None => cell.local_payload.to_vec(),
            };
            keys.push(key);
        }
        Ok(keys)
    }

    fn packed_index_key_len(&self, key: &[u8]) -> usize {
        let local = BTreePageView::local_payload_size(key.len(), self.usable_page_size, true);
        let overflow_pointer = if local < key.len() { 4 } else { 0 };
        varint::encoded_length(key.len() as i64) + local + overflow_pointer
    }

    fn index_leaf_keys_fit(&self, keys: &[Vec<u8>]) -> bool {
        let header_size = 8usize;
        let used: usize = keys.iter().map(|k| self.packed_index_key_len(k) + 2).sum();
        header_size + used <= self.usable_page_size as usize
    }

    fn index_interior_entries_fit(&self, entries: &[(u32, Vec<u8>)]) -> bool {
        let header_size = 12usize;
        let used: usize = entries
            .iter()
            .map(|(_, key)| 4 + self.packed_index_key_len(key) + 2)
            .sum();
        header_size + used <= self.usable_page_size as usize
    }

    fn balanced_index_split(&self, keys: &[Vec<u8>]) -> usize {
        let total: usize = keys.iter().map(|k| self.packed_index_key_len(k)).sum();
        let half = total / 2;
        let mut running = 0;
        for (i, key) in keys.iter().enumerate() {
            running += self.packed_index_key_len(key);
            if running >= half {
                return (i + 1).min(keys.len() - 1).max(1);
            }
        }
        keys.len() / 2
    }

    fn write_index_leaf(&mut self, page_number: u32, keys: &[Vec<u8>]) -> Result<()> {
        let usable = self.usable_page_size as usize;
        let mut page = vec![0u8; usable];
        let mut content_start = usable;
        let mut pointers = Vec::with_capacity(keys.len());

        for key in keys {
            let local_size = BTreePageView::local_payload_size(key.len(), self.usable_page_size, true);
            let (local, overflow_tail) = key.split_at(local_size.min(key.len()));
            let overflow_page = if !overflow_tail.is_empty() {
                Some(self.write_overflow_chain(overflow_tail)?)
            } else {
                None
            };

            let mut bytes = Vec::new();
            bytes.extend(varint::encode_to_vec(key.len() as i64));
            bytes.extend_from_slice(local);
            if let Some(page_no) = overflow_page {
                bytes.extend_from_slice(&page_no.to_be_bytes());
            }

            content_start -= bytes.len();
            page[content_start..content_start + bytes.len()].copy_from_slice(&bytes);
            pointers.push(content_start as u16);
        }

        let header = PageHeader {
            page_type: PageType::LeafIndex,
            first_freeblock: 0,
            cell_count: keys.len() as u16,
            cell_content_start: content_start as u32,
            fragmented_free_bytes: 0,
            right_most_pointer: 0,
        };
        self.write_page_header_and_pointers(page_number, &page, &header, &pointers)
    }

    fn write_index_interior(&mut self, page_number: u32, entries: &[(u32, Vec<u8>)], right_most: u32) -> Result<()> {
        let usable = self.usable_page_size as usize;
        let mut page = vec![0u8; usable];
        let mut content_start = usable;
        let mut pointers = Vec::with_capacity(entries.len());

        for (left_child, key) in entries {
            let local_size = BTreePageView::local_payload_size(key.len(), self.usable_page_size, true);
            let (local, overflow_tail) = key.split_at(local_size.min(key.len()));
            let overflow_page = if !overflow_tail.is_empty() {
                Some(self.write_overflow_chain(overflow_tail)?)
            } else {
                None
            };

            let mut bytes = Vec::new();
            bytes.extend_from_slice(&left_child.to_be_bytes());
            bytes.extend(varint::encode_to_vec(key.len() as i64));
            bytes.extend_from_slice(local);
            if let Some(page_no) = overflow_page {
                bytes.extend_from_slice(&page_no.to_be_bytes());
            }

            content_start -= bytes.len();
            page[content_start..content_start + bytes.len()].copy_from_slice(&bytes);
            pointers.push(content_start as u16);
        }

        let header = PageHeader {
            page_type: PageType::InteriorIndex,
            first_freeblock: 0,
            cell_count: entries.len() as u16,
            cell_content_start: content_start as u32,
            fragmented_free_bytes: 0,
            right_most_pointer: right_most,
        };
        self.write_page_header_and_pointers(page_number, &page, &header, &pointers)
    }

    fn write_page_header_and_pointers(
        &mut self,
        page_number: u32,
        page: &[u8],
        header: &PageHeader,
        pointers: &[u16],
    ) -> Result<()> {
        let mut page = page.to_vec();
        let header_bytes = header.to_bytes();
        page[..header_bytes.len()].copy_from_slice(&header_bytes);
        let mut ptr_offset = header_bytes.len();
        for &ptr in pointers {
            page[ptr_offset..ptr_offset + 2].copy_from_slice(&ptr.to_be_bytes());
            ptr_offset += 2;
        }

        let offset = Self::header_offset(page_number);
        if offset == 0 {
            *self.load(page_number)? = page;
        } else {
            let buf = self.load(page_number)?;
            let len = buf.len();
            buf[offset..].copy_from_slice(&page[..len - offset]);
        }
        self.flush(page_number)
    }

    fn descend_for_index_insert(&mut self, root: u32, key: &[u8], path: &mut Vec<u32>) -> Result<()> {
        let mut current = root;
        loop {
            path.push(current);
            let offset = Self::header_offset(current);
            let buf = self.load(current)?.clone();
            let view = BTreePageView::parse(current, &buf[offset..])?;
            if view.page_type().is_leaf() {
                return Ok(());
            }
            let mut child = view.header.right_most_pointer;
            for i in 0..view.cell_count() {
                let cell = view.interior_index_cell(i)?;
                let cell_key = match cell.overflow_page {
                    Some(first) => self.read_overflow(first, cell.local_payload, cell.total_payload_size)?,
                    None => cell.local_payload.to_vec(),
                };
                if Self::compare_index_keys(key, &cell_key)? == Ordering::Less {
                    child = cell.left_child;
                    break;
                }
            }
            current = child;
        }
    }

    /// Inserts `key` (the full indexed-column-plus-rowid record) into the
    /// index b-tree rooted at `root`. Returns `Some(new_root)` on a root
    /// split, exactly like [`Mutator::insert`].
    pub fn insert_index(&mut self, root: u32, key: &[u8]) -> Result<Option<u32>> {
        let mut path = Vec::new();
        self.descend_for_index_insert(root, key, &mut path)?;
        let leaf = *path.last().unwrap();

        let overflow = self.insert_into_index_leaf(leaf, key)?;
        let mut promote = overflow.map(|(median, new_page)| (median, leaf, new_page));
        path.pop();

        while let Some((median_key, split_low, split_high)) = promote {
            match path.pop() {
                Some(parent) => {
                    promote = self
                        .insert_into_index_interior(parent, median_key, split_low, split_high)?
                        .map(|(median, new_page)| (median, parent, new_page));
                }
                None => {
                    let new_root = self.split_index_root(root, median_key, split_high)?;
                    debug!("index root page {root} split; new root is page {new_root}");
                    return Ok(Some(new_root));
                }
            }
        }
        Ok(None)
    }

    fn insert_into_index_leaf(&mut self, page_number: u32, key: &[u8]) -> Result<Option<(Vec<u8>, u32)>> {
        let mut keys = self.read_index_leaf_keys(page_number)?;
        let pos = {
            let mut lo = 0;
            let mut hi = keys.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                if Self::compare_index_keys(&keys[mid], key)? == Ordering::Less {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            lo
        };
        keys.insert(pos, key.to_vec());

        if self.index_leaf_keys_fit(&keys) {
            self.write_index_leaf(page_number, &keys)?;
            return Ok(None);
        }

        let split_at = self.balanced_index_split(&keys);
        let (left, right) = keys.split_at(split_at);
        let right = right.to_vec();
        let left = left.to_vec();

        self.write_index_leaf(page_number, &left)?;
        let new_page = self.allocate_new_page()?;
        self.write_index_leaf(new_page, &right)?;

        let median_key = right[0].clone();
        Ok(Some((median_key, new_page)))
    }

    fn insert_into_index_interior(
        &mut self,
        page_number: u32,
        separator_key: Vec<u8>,
        split_low: u32,
        split_high: u32,
    ) -> Result<Option<(Vec<u8>, u32)>> {
        let offset = Self::header_offset(page_number);
        let buf = self.load(page_number)?.clone();
        let view = BTreePageView::parse(page_number, &buf[offset..])?;

        let mut entries: Vec<(u32, Vec<u8>)> = Vec::new();
        for i in 0..view.cell_count() {
            let cell = view.interior_index_cell(i)?;
            let cell_key = match cell.overflow_page {
                Some(first) => self.read_overflow(first, cell.local_payload, cell.total_payload_size)?,
                None => cell.local_payload.to_vec(),
            };
            entries.push((cell.left_child, cell_key));
        }
        let mut right_most = view.header.right_most_pointer;

        // Same redirection as the table interior: the split child is still
        // referenced under its old page number (`split_low`); point that
        // reference at `split_high` and insert a new entry routing
        // `split_low` ahead of it.
        if right_most == split_low {
            entries.push((split_low, separator_key));
            right_most = split_high;
        } else {
            let j = entries
                .iter()
                .position(|(child, _)| *child == split_low)
                .ok_or_else(|| Error::corrupt(page_number, "split child not found among parent's entries"))?;
            entries.insert(j, (split_low, separator_key));
            entries[j + 1].0 = split_high;
        }

        if self.index_interior_entries_fit(&entries) {
            self.write_index_interior(page_number, &entries, right_most)?;
            return Ok(None);
        }

        let split_at = entries.len() / 2;
        let median_key = entries[split_at].1.clone();
        let left_entries = entries[..split_at].to_vec();
        let right_entries = entries[split_at + 1..].to_vec();
        let promoted_right_child = entries[split_at].0;

        self.write_index_interior(page_number, &left_entries, promoted_right_child)?;
        let new_page = self.allocate_new_page()?;
        self.write_index_interior(new_page, &right_entries, right_most)?;

        Ok(Some((median_key, new_page)))
    }

    fn split_index_root(&mut self, old_root: u32, median_key: Vec<u8>, new_right: u32) -> Result<u32> {
        let old_contents = self.load(old_root)?.clone();
        let left_copy = self.allocate_new_page()?;
        {
            let buf = self.load(left_copy)?;
            *buf = old_contents;
        }
        self.flush(left_copy)?;

        let new_root_entries = vec![(left_copy, median_key)];
        self.write_index_interior(old_root, &new_root_entries, new_right)?;
        Ok(old_root)
    }

    /// Deletes the leaf entry whose key compares equal to `key` (same
    /// conservative underflow policy as [`Mutator::delete`]: an emptied
    /// non-root leaf is released, an emptied root collapses onto its
    /// remaining child, an underfull-but-nonempty leaf is left as is).
    pub fn delete_index(&mut self, root: u32, key: &[u8]) -> Result<Option<u32>> {
        let mut path = Vec::new();
        self.descend_for_index_insert(root, key, &mut path)?;
        let leaf = *path.last().unwrap();

        let mut keys = self.read_index_leaf_keys(leaf)?;
        let pos = {
            let mut found = None;
            for (i, k) in keys.iter().enumerate() {
                if Self::compare_index_keys(k, key)? == Ordering::Equal {
                    found = Some(i);
                    break;
                }
            }
            found
        };
        match pos {
            Some(i) => {
                keys.remove(i);
            }
            None => return Err(Error::NotFound),
        }
        self.write_index_leaf(leaf, &keys)?;

        if keys.is_empty() && leaf != root {
            self.release_page(leaf)?;
        }

        if leaf == root {
            return Ok(None);
        }

        let offset = Self::header_offset(root);
        let buf = self.load(root)?.clone();
        let view = BTreePageView::parse(root, &buf[offset..])?;
        if view.page_type() == PageType::InteriorIndex && view.cell_count() == 0 {
            let new_root = view.header.right_most_pointer;
            debug!("index root page {root} collapsed onto child page {new_root}");
            self.release_page(root)?;
            return Ok(Some(new_root));
        }

        Ok(None)
    }
}

/// SQLite storage-class ordering (NULL < numeric < text < blob), shared by
/// index key comparison. Text compares as raw UTF-8 byte order per
/// spec.md's binary-collation design note.
fn compare_column_values(a: &ColumnValue<'_>, b: &ColumnValue<'_>) -> Ordering {
    fn class(v: &ColumnValue<'_>) -> u8 {
        match v {
            ColumnValue::Null => 0,
            ColumnValue::Integer(_) | ColumnValue::Real(_) => 1,
            ColumnValue::Text(_) => 2,
            ColumnValue::Blob(_) => 3,
        }
    }
    let (ca, cb) = (class(a), class(b));
    if ca != cb {
        return ca.cmp(&cb);
    }
    match (a, b) {
        (ColumnValue::Null, ColumnValue::Null) => Ordering::Equal,
        (ColumnValue::Integer(x), ColumnValue::Integer(y)) => x.cmp(y),
        (ColumnValue::Integer(x), ColumnValue::Real(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (ColumnValue::Real(x), ColumnValue::Integer(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (ColumnValue::Real(x), ColumnValue::Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (ColumnValue::Text(x), ColumnValue::Text(y)) => x.cmp(y),
        (ColumnValue::Blob(x), ColumnValue::Blob(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::cursor::TableCursor;
    use crate::record::encode_record;
    use crate::source::memory::MemorySource;

    const USABLE: u32 = 512;

    fn new_mutator(base: &MemorySource) -> (ShadowSource<'_, MemorySource>, u32) {
        let shadow = ShadowSource::new(base);
        (shadow, USABLE)
    }

    fn with_mutator<R>(shadow: &ShadowSource<'_, MemorySource>, usable: u32, f: impl FnOnce(&mut Mutator<'_, MemorySource>) -> R) -> R {
        let freelist = FreelistManager::new(shadow, usable, 0, 0);
        let mut mutator = Mutator::new(shadow, freelist, usable);
        f(&mut mutator)
    }

    /// A freshly allocated root page is zero-filled; without
    /// `init_empty_root` the first insert into a brand new table would
    /// fail to parse it as a b-tree page at all.
    #[test]
    fn insert_into_a_freshly_allocated_root_succeeds() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, true).unwrap();
            root
        });

        with_mutator(&shadow, usable, |m| {
            m.insert(root, 1, b"alice").unwrap();
        });

        let mut cursor = TableCursor::new(&shadow, root).unwrap();
        let (rowid, payload) = cursor.next_row().unwrap().unwrap();
        assert_eq!(rowid, 1);
        assert_eq!(payload.as_slice(), b"alice");
    }

    #[test]
    fn inserts_are_visited_in_ascending_rowid_order_regardless_of_insert_order() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, true).unwrap();
            root
        });

        with_mutator(&shadow, usable, |m| {
            for rowid in [5, 1, 3, 2, 4] {
                m.insert(root, rowid, format!("row{rowid}").as_bytes()).unwrap();
            }
        });

        let mut cursor = TableCursor::new(&shadow, root).unwrap();
        let mut seen = Vec::new();
        while let Some((rowid, _)) = cursor.next_row().unwrap() {
            seen.push(rowid);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn enough_inserts_split_the_root_and_every_row_survives() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, true).unwrap();
            root
        });

        let mut current_root = root;
        with_mutator(&shadow, usable, |m| {
            for rowid in 0..200i64 {
                let payload = vec![b'x'; 40];
                if let Some(new_root) = m.insert(current_root, rowid, &payload).unwrap() {
                    current_root = new_root;
                }
            }
        });

        let mut cursor = TableCursor::new(&shadow, current_root).unwrap();
        let mut count = 0;
        let mut last = -1i64;
        while let Some((rowid, _)) = cursor.next_row().unwrap() {
            assert!(rowid > last, "rows must stay in strictly ascending order after a split");
            last = rowid;
            count += 1;
        }
        assert_eq!(count, 200);
    }

    #[test]
    fn delete_removes_exactly_the_target_row() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, true).unwrap();
            root
        });

        with_mutator(&shadow, usable, |m| {
            for rowid in 1..=5i64 {
                m.insert(root, rowid, b"payload").unwrap();
            }
            m.delete(root, 3).unwrap();
        });

        let mut cursor = TableCursor::new(&shadow, root).unwrap();
        let mut seen = Vec::new();
        while let Some((rowid, _)) = cursor.next_row().unwrap() {
            seen.push(rowid);
        }
        assert_eq!(seen, vec![1, 2, 4, 5]);
    }

    #[test]
    fn deleting_the_sole_row_collapses_the_root_to_an_empty_leaf() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, true).unwrap();
            root
        });

        with_mutator(&shadow, usable, |m| {
            m.insert(root, 1, b"only row").unwrap();
            m.delete(root, 1).unwrap();
        });

        let mut cursor = TableCursor::new(&shadow, root).unwrap();
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn update_in_place_preserves_the_key_and_changes_the_payload() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, true).unwrap();
            root
        });

        with_mutator(&shadow, usable, |m| {
            m.insert(root, 1, b"old").unwrap();
            m.update(root, 1, b"new").unwrap();
        });

        let mut cursor = TableCursor::new(&shadow, root).unwrap();
        let (rowid, payload) = cursor.next_row().unwrap().unwrap();
        assert_eq!(rowid, 1);
        assert_eq!(payload.as_slice(), b"new");
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn overflow_payload_round_trips_through_an_overflow_chain() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, true).unwrap();
            root
        });

        let big_payload = vec![b'z'; USABLE as usize * 3];
        with_mutator(&shadow, usable, |m| {
            m.insert(root, 1, &big_payload).unwrap();
        });

        let mut cursor = TableCursor::new(&shadow, root).unwrap();
        let (rowid, payload) = cursor.next_row().unwrap().unwrap();
        assert_eq!(rowid, 1);
        assert_eq!(payload.as_slice(), big_payload.as_slice());
    }

    #[test]
    fn index_insert_and_delete_round_trip_keys() {
        let base = MemorySource::new(USABLE, 1);
        let (shadow, usable) = new_mutator(&base);

        let root = with_mutator(&shadow, usable, |m| {
            let root = m.allocate_new_page().unwrap();
            m.init_empty_root(root, false).unwrap();
            root
        });

        let mut key_a = Vec::new();
        encode_record(&[ColumnValue::Integer(10), ColumnValue::Integer(1)], &mut key_a);
        let mut key_b = Vec::new();
        encode_record(&[ColumnValue::Integer(20), ColumnValue::Integer(2)], &mut key_b);

        with_mutator(&shadow, usable, |m| {
            m.insert_index(root, &key_a).unwrap();
            m.insert_index(root, &key_b).unwrap();
            m.delete_index(root, &key_a).unwrap();
        });

        let remaining = with_mutator(&shadow, usable, |m| m.read_index_leaf_keys(root).unwrap());
        assert_eq!(remaining, vec![key_b]);
    }
}
