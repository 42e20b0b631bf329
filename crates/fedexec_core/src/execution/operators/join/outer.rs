use crate::arrays::row::Row;

/// Tracks which rows on one side of a join found a match.
#[derive(Debug, Clone, Default)]
pub struct OuterJoinTracker {
    matched: Vec<bool>,
}

impl OuterJoinTracker {
    pub fn new(num_rows: usize) -> Self {
        OuterJoinTracker {
            matched: vec![false; num_rows],
        }
    }

    pub fn set_matched(&mut self, idx: usize) {
        if let Some(m) = self.matched.get_mut(idx) {
            *m = true;
        }
    }

    /// Indices of rows that never matched.
    pub fn unmatched(&self) -> impl Iterator<Item = usize> + '_ {
        self.matched
            .iter()
            .enumerate()
            .filter_map(|(idx, m)| (!m).then_some(idx))
    }
}

/// Left row followed by nulls for the right side.
pub fn pad_right_nulls(left: &Row, right_arity: usize) -> Row {
    left.concat(&Row::new_null(right_arity))
}

/// Nulls for the left side followed by the right row.
pub fn pad_left_nulls(left_arity: usize, right: &Row) -> Row {
    Row::new_null(left_arity).concat(right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::scalar::ScalarValue;
    use crate::row;

    #[test]
    fn unmatched_rows() {
        let mut tracker = OuterJoinTracker::new(4);
        tracker.set_matched(1);
        tracker.set_matched(3);
        tracker.set_matched(7);
        assert_eq!(vec![0, 2], tracker.unmatched().collect::<Vec<_>>());
    }

    #[test]
    fn padding() {
        assert_eq!(
            row![1, ScalarValue::Null, ScalarValue::Null],
            pad_right_nulls(&row![1], 2)
        );
        assert_eq!(row![ScalarValue::Null, "a"], pad_left_nulls(1, &row!["a"]));
    }
}
