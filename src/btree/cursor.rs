//! Forward cursors over table and index b-trees.
//!
//! Both cursors keep an explicit stack of `(page, cell_index)` frames
//! rather than recursing, the same shape as the teacher's
//! `BTreeTableEntries`/`BTreeIndexEntries` iterators -- descending pushes
//! the parent frame and swaps in the child page; exhausting a page pops
//! the stack and resumes the parent one cell later.

use std::sync::Arc;

use crate::btree::fetch_page;
use crate::error::{Error, Result};
use crate::page::{BTreePageView, PageType};
use crate::source::PageSource;

/// Byte offset of the b-tree page header within the physical page: the
/// 100-byte database header occupies the start of page 1 only.
fn header_offset(page_number: u32) -> usize {
    if page_number == 1 {
        100
    } else {
        0
    }
}

struct Frame {
    page: Arc<[u8]>,
    page_number: u32,
    index: u16,
}

impl Frame {
    fn view(&self) -> BTreePageView<'_> {
        let offset = header_offset(self.page_number);
        BTreePageView::parse(self.page_number, &self.page[offset..]).expect("page was already validated on push")
    }
}

/// A forward cursor over a table b-tree, yielding `(rowid, payload)` pairs
/// in ascending rowid order. `payload` is the reassembled record bytes:
/// local cell bytes if the record didn't overflow, or local bytes followed
/// by the overflow chain's contents copied into a scratch buffer.
pub struct TableCursor<'s> {
    source: &'s dyn PageSource,
    stack: Vec<Frame>,
    current: Option<Frame>,
    exhausted: bool,
    upper_bound_exclusive: Option<i64>,
}

impl<'s> TableCursor<'s> {
    pub fn new(source: &'s dyn PageSource, root_page: u32) -> Result<Self> {
        let page = fetch_page(source, root_page)?;
        let mut cursor = Self {
            source,
            stack: Vec::new(),
            current: Some(Frame {
                page,
                page_number: root_page,
                index: 0,
            }),
            exhausted: false,
            upper_bound_exclusive: None,
        };
        cursor.descend_to_leftmost_leaf()?;
        Ok(cursor)
    }

    /// Positions the cursor at the first entry with rowid >= `rowid`,
    /// descending from the root rather than resuming wherever it was.
    pub fn seek(source: &'s dyn PageSource, root_page: u32, rowid: i64) -> Result<Self> {
        let page = fetch_page(source, root_page)?;
        let mut cursor = Self {
            source,
            stack: Vec::new(),
            current: Some(Frame {
                page,
                page_number: root_page,
                index: 0,
            }),
            exhausted: false,
            upper_bound_exclusive: None,
        };
        cursor.seek_rowid(rowid)?;
        Ok(cursor)
    }

    pub fn with_upper_bound(mut self, exclusive_bound: i64) -> Self {
        self.upper_bound_exclusive = Some(exclusive_bound);
        self
    }

    fn descend_to_leftmost_leaf(&mut self) -> Result<()> {
        loop {
            let frame = self.current.as_ref().expect("current frame always set while descending");
            let view = frame.view();
            if view.page_type().is_leaf() {
                return Ok(());
            }
            let child_number = view.interior_table_cell(0)?.left_child;
            self.push_child(child_number, 1)?;
        }
    }

    fn seek_rowid(&mut self, target: i64) -> Result<()> {
        loop {
            let frame = self.current.as_ref().expect("current frame always set while seeking");
            let view = frame.view();
            match view.page_type() {
                PageType::InteriorTable => {
                    let mut child_index = view.cell_count();
                    for i in 0..view.cell_count() {
                        if view.interior_table_cell(i)?.rowid >= target {
                            child_index = i;
                            break;
                        }
                    }
                    let child_number = if child_index < view.cell_count() {
                        view.interior_table_cell(child_index)?.left_child
                    } else {
                        view.header.right_most_pointer
                    };
                    self.push_child(child_number, child_index.saturating_add(1))?;
                }
                PageType::LeafTable => {
                    let mut leaf_index = view.cell_count();
                    for i in 0..view.cell_count() {
                        if view.leaf_table_cell(i)?.rowid >= target {
                            leaf_index = i;
                            break;
                        }
                    }
                    self.current.as_mut().unwrap().index = leaf_index;
                    return Ok(());
                }
                _ => return Err(Error::corrupt(frame.page_number, "table cursor hit a non-table page")),
            }
        }
    }

    fn push_child(&mut self, child_page_number: u32, resume_index: u16) -> Result<()> {
        let parent = self.current.take().expect("current frame always set before descending");
        let resumed = Frame {
            index: resume_index,
            ..parent
        };
        self.stack.push(resumed);
        let child_page = fetch_page(self.source, child_page_number)?;
        self.current = Some(Frame {
            page: child_page,
            page_number: child_page_number,
            index: 0,
        });
        Ok(())
    }

    /// Assembles a cell's full payload, following its overflow chain if
    /// it has one. The returned buffer is freshly allocated only for
    /// overflowing rows; non-overflowing rows are handled by the caller
    /// reading `local_payload` directly without calling this.
    fn read_overflow(&self, first_overflow_page: u32, local: &[u8], total_size: usize) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(total_size);
        payload.extend_from_slice(local);

        let usable = self.source.page_size() as usize;
        let mut next = first_overflow_page;
        while next != 0 && payload.len() < total_size {
            let page = fetch_page(self.source, next)?;
            let following = u32::from_be_bytes(page[0..4].try_into().unwrap());
            let remaining = total_size - payload.len();
            let available = usable - 4;
            let take = remaining.min(available);
            payload.extend_from_slice(&page[4..4 + take]);
            next = following;
        }

        if payload.len() != total_size {
            return Err(Error::corrupt(first_overflow_page, "overflow chain shorter than declared payload size"));
        }
        Ok(payload)
    }

    /// Advances to the next row, returning `(rowid, payload)`. `payload` is
    /// `Cow`-free: non-overflowing rows get a [`RowPayload::Local`] borrow
    /// tied to the cursor's current page buffer, overflowing rows get an
    /// owned [`RowPayload::Assembled`] buffer.
    pub fn next_row(&mut self) -> Result<Option<(i64, RowPayload)>> {
        if self.exhausted {
            return Ok(None);
        }

        loop {
            let frame = match self.current.as_ref() {
                Some(f) => f,
                None => {
                    self.exhausted = true;
                    return Ok(None);
                }
            };
            let view = frame.view();

            if frame.index < view.cell_count() {
                match view.page_type() {
                    PageType::LeafTable => {
                        let cell = view.leaf_table_cell(frame.index)?;
                        self.current.as_mut().unwrap().index += 1;

                        if let Some(bound) = self.upper_bound_exclusive {
                            if cell.rowid >= bound {
                                self.exhausted = true;
                                return Ok(None);
                            }
                        }

                        let payload = match cell.overflow_page {
                            None => RowPayload::Local {
                                page: frame.page.clone(),
                                offset: byte_offset(&frame.page, cell.local_payload),
                                len: cell.local_payload.len(),
                            },
                            Some(first_overflow) => RowPayload::Assembled(self.read_overflow(
                                first_overflow,
                                cell.local_payload,
                                cell.total_payload_size,
                            )?),
                        };
                        return Ok(Some((cell.rowid, payload)));
                    }
                    PageType::InteriorTable => {
                        let cell = view.interior_table_cell(frame.index)?;
                        self.current.as_mut().unwrap().index += 1;
                        self.push_child(cell.left_child, 0)?;
                    }
                    _ => return Err(Error::corrupt(frame.page_number, "table cursor hit a non-table page")),
                }
            } else if matches!(view.page_type(), PageType::InteriorTable) && frame.index == view.cell_count() {
                // All cells consumed, right-most child not yet visited:
                // descend it once, marking it visited by bumping `index`
                // past `cell_count` so we don't redescend on return.
                let right_most = view.header.right_most_pointer;
                self.current.as_mut().unwrap().index += 1;
                if right_most != 0 {
                    self.push_child(right_most, view.cell_count() + 1)?;
                } else if let Some(resumed) = self.stack.pop() {
                    self.current = Some(resumed);
                } else {
                    self.current = None;
                }
            } else if let Some(resumed) = self.stack.pop() {
                self.current = Some(resumed);
            } else {
                self.current = None;
            }
        }
    }
}

/// A row's reassembled payload bytes, borrowed from the owning page buffer
/// when possible.
pub enum RowPayload {
    Local { page: Arc<[u8]>, offset: usize, len: usize },
    Assembled(Vec<u8>),
}

impl RowPayload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            RowPayload::Local { page, offset, len } => &page[*offset..*offset + *len],
            RowPayload::Assembled(buf) => buf,
        }
    }
}

fn byte_offset(page: &[u8], slice: &[u8]) -> usize {
    let page_start = page.as_ptr() as usize;
    let slice_start = slice.as_ptr() as usize;
    slice_start - page_start
}

/// A forward cursor over an index b-tree, positioned by a comparator
/// closure rather than a bare rowid. `compare(key_bytes)` must return
/// `Less` if the target sorts before `key_bytes`, `Equal` on a match, and
/// `Greater` if the target sorts after -- the same three-way contract the
/// teacher's `PartialOrd<ArcBufSlice>` comparator implements, generalised
/// to an `FnMut` since index keys here are compared column-by-column
/// rather than via a single derived trait impl.
pub struct IndexSeekCursor<'s, C> {
    source: &'s dyn PageSource,
    stack: Vec<Frame>,
    current: Option<Frame>,
    compare: C,
    done: bool,
}

impl<'s, C> IndexSeekCursor<'s, C>
where
    C: FnMut(&[u8]) -> std::cmp::Ordering,
{
    pub fn seek(source: &'s dyn PageSource, root_page: u32, mut compare: C) -> Result<Self> {
        let page = fetch_page(source, root_page)?;
        let mut cursor = Self {
            source,
            stack: Vec::new(),
            current: Some(Frame {
                page,
                page_number: root_page,
                index: 0,
            }),
            compare,
            done: false,
        };
        cursor.seek_leftmost_match()?;
        Ok(cursor)
    }

    fn key_bytes(&self, local: &[u8], overflow_page: Option<u32>, total_size: usize) -> Result<Vec<u8>> {
        match overflow_page {
            None => Ok(local.to_vec()),
            Some(first) => {
                let mut buf = local.to_vec();
                let usable = self.source.page_size() as usize;
                let mut next = first;
                while next != 0 && buf.len() < total_size {
                    let page = fetch_page(self.source, next)?;
                    let following = u32::from_be_bytes(page[0..4].try_into().unwrap());
                    let remaining = total_size - buf.len();
                    let take = remaining.min(usable - 4);
                    buf.extend_from_slice(&page[4..4 + take]);
                    next = following;
                }
                Ok(buf)
            }
        }
    }

    fn seek_leftmost_match(&mut self) -> Result<()> {
        loop {
            let frame = self.current.as_ref().expect("current frame set while seeking");
            let view = frame.view();
            match view.page_type() {
                PageType::InteriorIndex => {
                    let mut child_index = view.cell_count();
                    for i in 0..view.cell_count() {
                        let cell = view.interior_index_cell(i)?;
                        let key = self.key_bytes(cell.local_payload, cell.overflow_page, cell.total_payload_size)?;
                        if (self.compare)(&key) != std::cmp::Ordering::Greater {
                            child_index = i;
                            break;
                        }
                    }
                    let child_number = if child_index < view.cell_count() {
                        view.interior_index_cell(child_index)?.left_child
                    } else {
                        view.header.right_most_pointer
                    };
                    self.push_child(child_number, child_index)?;
                }
                PageType::LeafIndex => {
                    let mut leaf_index = view.cell_count();
                    for i in 0..view.cell_count() {
                        let cell = view.leaf_index_cell(i)?;
                        let key = self.key_bytes(cell.local_payload, cell.overflow_page, cell.total_payload_size)?;
                        if (self.compare)(&key) != std::cmp::Ordering::Greater {
                            leaf_index = i;
                            break;
                        }
                    }
                    self.current.as_mut().unwrap().index = leaf_index;
                    return Ok(());
                }
                _ => return Err(Error::corrupt(frame.page_number, "index cursor hit a non-index page")),
            }
        }
    }

    fn push_child(&mut self, child_page_number: u32, resume_index: u16) -> Result<()> {
        let parent = self.current.take().expect("current frame set before descending");
        let resumed = Frame {
            index: resume_index,
            ..parent
        };
        self.stack.push(resumed);
        let child_page = fetch_page(self.source, child_page_number)?;
        self.current = Some(Frame {
            page: child_page,
            page_number: child_page_number,
            index: 0,
        });
        Ok(())
    }

    /// Advances to the next key, stopping (returning `None`) as soon as a
    /// key compares `Less` -- the point past which the seek range ends.
    pub fn next_key(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let frame = match self.current.as_ref() {
                Some(f) => f,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            let view = frame.view();

            if frame.index < view.cell_count() {
                match view.page_type() {
                    PageType::LeafIndex => {
                        let cell = view.leaf_index_cell(frame.index)?;
                        self.current.as_mut().unwrap().index += 1;
                        let key = self.key_bytes(cell.local_payload, cell.overflow_page, cell.total_payload_size)?;
                        match (self.compare)(&key) {
                            std::cmp::Ordering::Less => {
                                self.done = true;
                                return Ok(None);
                            }
                            std::cmp::Ordering::Equal => return Ok(Some(key)),
                            std::cmp::Ordering::Greater => continue,
                        }
                    }
                    PageType::InteriorIndex => {
                        let cell = view.interior_index_cell(frame.index)?;
                        self.current.as_mut().unwrap().index += 1;
                        self.push_child(cell.left_child, 0)?;
                    }
                    _ => return Err(Error::corrupt(frame.page_number, "index cursor hit a non-index page")),
                }
            } else if matches!(view.page_type(), PageType::InteriorIndex) && frame.index == view.cell_count() {
                let right_most = view.header.right_most_pointer;
                self.current.as_mut().unwrap().index += 1;
                if right_most != 0 {
                    self.push_child(right_most, view.cell_count() + 1)?;
                } else if let Some(resumed) = self.stack.pop() {
                    self.current = Some(resumed);
                } else {
                    self.current = None;
                }
            } else if let Some(resumed) = self.stack.pop() {
                self.current = Some(resumed);
            } else {
                self.current = None;
            }
        }
    }
}

/// Adapts an `IndexSeekCursor` over a `WITHOUT ROWID` table's physical
/// index b-tree to present a rowid-cursor-like view: the declared primary
/// key columns double as both the index key and the row's identity, so
/// there is no separate rowid to surface, only the full key record.
pub struct WithoutRowIdCursor<'s, C> {
    inner: IndexSeekCursor<'s, C>,
}

impl<'s, C> WithoutRowIdCursor<'s, C>
where
    C: FnMut(&[u8]) -> std::cmp::Ordering,
{
    pub fn seek(source: &'s dyn PageSource, root_page: u32, compare: C) -> Result<Self> {
        Ok(Self {
            inner: IndexSeekCursor::seek(source, root_page, compare)?,
        })
    }

    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        self.inner.next_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{encode_record, ColumnValue};
    use crate::source::memory::MemorySource;
    use crate::source::WritablePageSource;
    use crate::varint;

    fn leaf_table_page(cells: &[(i64, &[u8])], usable: usize) -> Vec<u8> {
        use crate::page::{PageHeader, PageType as PT};
        let mut page = vec![0u8; usable];
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
        let header = PageHeader {
            page_type: PT::LeafTable,
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
        page
    }

    #[test]
    fn iterates_a_single_leaf_root_in_rowid_order() {
        let usable = 512usize;
        let mut buf1 = Vec::new();
        encode_record(&[ColumnValue::Text(b"alice")], &mut buf1);
        let mut buf2 = Vec::new();
        encode_record(&[ColumnValue::Text(b"bob")], &mut buf2);

        let page = leaf_table_page(&[(1, &buf1), (2, &buf2)], usable);
        let source = MemorySource::new(usable as u32, 2);
        source.write_page(1, &page).unwrap();

        let mut cursor = TableCursor::new(&source, 1).unwrap();
        let (rowid, payload) = cursor.next_row().unwrap().unwrap();
        assert_eq!(rowid, 1);
        assert_eq!(payload.as_slice(), buf1.as_slice());

        let (rowid, payload) = cursor.next_row().unwrap().unwrap();
        assert_eq!(rowid, 2);
        assert_eq!(payload.as_slice(), buf2.as_slice());

        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn seek_positions_at_first_rowid_gte_target() {
        let usable = 512usize;
        let mut buf = Vec::new();
        encode_record(&[ColumnValue::Integer(1)], &mut buf);

        let page = leaf_table_page(&[(1, &buf), (5, &buf), (10, &buf)], usable);
        let source = MemorySource::new(usable as u32, 1);
        source.write_page(1, &page).unwrap();

        let mut cursor = TableCursor::seek(&source, 1, 5).unwrap();
        let (rowid, _) = cursor.next_row().unwrap().unwrap();
        assert_eq!(rowid, 5);
    }
}
