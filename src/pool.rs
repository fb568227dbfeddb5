//! A thread-local slot pool for reusable heap buffers.
//!
//! Grounded in the design note that prepared-handle amortisation "can be
//! realised by any local-slot abstraction" -- a cursor borrows the page
//! source for one call's lifetime and can't itself be stashed in a
//! `thread_local!` without becoming self-referential, so this pool
//! targets the one thing a repeated `PreparedQuery::execute` call
//! allocates fresh every time regardless of cursor lifetimes: the output
//! `Vec<Row>` the reader materialises into. Reusing that allocation is
//! the same amortisation the teacher's cached page buffers give reads,
//! applied to the execution engine's own output buffer.

use std::cell::RefCell;

thread_local! {
    static ROW_BUFFERS: RefCell<Vec<Vec<crate::reader::Row>>> = RefCell::new(Vec::new());
}

/// Borrows an empty, possibly-previously-allocated `Vec<Row>` from the
/// calling thread's pool. Must be returned with [`release`] once the
/// caller is done with it (typically just after the rows are copied out
/// into a [`crate::query::exec::QueryOutput`]).
pub fn acquire_row_buffer() -> Vec<crate::reader::Row> {
    ROW_BUFFERS.with(|pool| pool.borrow_mut().pop().unwrap_or_default())
}

/// Returns a buffer to the pool, clearing it but keeping its allocation.
pub fn release_row_buffer(mut buffer: Vec<crate::reader::Row>) {
    buffer.clear();
    ROW_BUFFERS.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < 8 {
            pool.push(buffer);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_is_reused_by_a_later_acquire() {
        let mut buf = acquire_row_buffer();
        buf.push(crate::reader::Row(vec![crate::value::OwnedValue::Integer(1)]));
        let ptr_before = buf.as_ptr();
        release_row_buffer(buf);

        let buf = acquire_row_buffer();
        assert_eq!(buf.as_ptr(), ptr_before);
        assert!(buf.is_empty());
    }
}
