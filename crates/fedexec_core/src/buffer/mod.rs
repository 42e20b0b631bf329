//! Tuple buffers backed by a shared buffer manager.
//!
//! The buffer manager only does accounting. Every buffered row is reserved
//! against a global ceiling, and the reservation is released when the buffer
//! is cleared or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fedexec_error::{ExecError, Result};

use crate::arrays::row::Row;

#[derive(Debug)]
pub struct BufferManager {
    max_rows: usize,
    reserved: AtomicUsize,
}

impl BufferManager {
    pub fn new(max_rows: usize) -> Arc<Self> {
        Arc::new(BufferManager {
            max_rows,
            reserved: AtomicUsize::new(0),
        })
    }

    /// Number of rows currently reserved across all buffers.
    pub fn reserved_rows(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    fn try_reserve(&self, rows: usize) -> Result<()> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |curr| {
                let next = curr.checked_add(rows)?;
                (next <= self.max_rows).then_some(next)
            })
            .map_err(|curr| {
                ExecError::component("Buffer manager row limit exceeded")
                    .with_field("reserved", curr)
                    .with_field("requested", rows)
                    .with_field("max", self.max_rows)
            })?;
        Ok(())
    }

    fn release(&self, rows: usize) {
        self.reserved.fetch_sub(rows, Ordering::AcqRel);
    }
}

/// Rows reserved against a buffer manager.
#[derive(Debug)]
pub struct Reservation {
    manager: Arc<BufferManager>,
    rows: usize,
}

impl Reservation {
    pub fn new(manager: &Arc<BufferManager>) -> Self {
        Reservation {
            manager: manager.clone(),
            rows: 0,
        }
    }

    pub fn grow(&mut self, rows: usize) -> Result<()> {
        self.manager.try_reserve(rows)?;
        self.rows += rows;
        Ok(())
    }

    pub fn release_all(&mut self) {
        self.manager.release(self.rows);
        self.rows = 0;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// An append-only buffer of rows that can be re-read by index once finalized.
#[derive(Debug)]
pub struct TupleBuffer {
    reservation: Reservation,
    rows: Vec<Row>,
    finalized: bool,
}

impl TupleBuffer {
    pub fn new(manager: &Arc<BufferManager>) -> Self {
        TupleBuffer {
            reservation: Reservation::new(manager),
            rows: Vec::new(),
            finalized: false,
        }
    }

    pub fn append(&mut self, row: Row) -> Result<()> {
        if self.finalized {
            return Err(ExecError::invariant("Cannot append to a finalized tuple buffer"));
        }
        self.reservation.grow(1)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn append_all(&mut self, rows: impl IntoIterator<Item = Row>) -> Result<()> {
        for row in rows {
            self.append(row)?;
        }
        Ok(())
    }

    /// Mark the buffer as complete. No more rows may be appended.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Get a row by its 0-based index.
    pub fn get(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Mutable access to the buffered rows, e.g. for sorting in place.
    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remove all rows and release the reservation.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.finalized = false;
        self.reservation.release_all();
    }

    /// Take the buffered rows out, releasing the reservation.
    pub fn take_rows(&mut self) -> Vec<Row> {
        let rows = std::mem::take(&mut self.rows);
        self.clear();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn reservation_released_on_drop() {
        let manager = BufferManager::new(4);
        {
            let mut buf = TupleBuffer::new(&manager);
            buf.append_all([row![1], row![2], row![3]]).unwrap();
            assert_eq!(3, manager.reserved_rows());
        }
        assert_eq!(0, manager.reserved_rows());
    }

    #[test]
    fn limit_exceeded_is_component_error() {
        let manager = BufferManager::new(2);
        let mut a = TupleBuffer::new(&manager);
        let mut b = TupleBuffer::new(&manager);
        a.append(row![1]).unwrap();
        b.append(row![2]).unwrap();
        let err = b.append(row![3]).unwrap_err();
        assert!(err.is_component());
        assert_eq!(1, b.len());

        a.clear();
        b.append(row![3]).unwrap();
    }

    #[test]
    fn append_after_finalize() {
        let manager = BufferManager::new(10);
        let mut buf = TupleBuffer::new(&manager);
        buf.append(row![1]).unwrap();
        buf.finalize();
        assert!(buf.append(row![2]).unwrap_err().is_invariant());
        assert_eq!(Some(&row![1]), buf.get(0));
    }
}
