use super::row::Row;

/// An ordered group of rows produced by a single call to `next_batch`.
///
/// Row numbers are 1-based and contiguous across all batches produced by one
/// node instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Row number of the first row in this batch.
    pub begin_row: usize,
    pub rows: Vec<Row>,
    /// If this is the last batch the node will produce.
    pub terminal: bool,
}

impl Batch {
    pub fn new(begin_row: usize, rows: Vec<Row>, terminal: bool) -> Self {
        Batch {
            begin_row,
            rows,
            terminal,
        }
    }

    /// Create an empty terminal batch beginning at `begin_row`.
    pub fn empty_terminal(begin_row: usize) -> Self {
        Batch {
            begin_row,
            rows: Vec::new(),
            terminal: true,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Row number that would follow the last row in this batch.
    pub fn end_row(&self) -> usize {
        self.begin_row + self.rows.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
