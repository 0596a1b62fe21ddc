//! Result iteration over backend row primitives.
//!
//! A [`RowSource`] supplies three primitives: advance, count, and seek.
//! [`Query`] builds a position-tracked cursor on top of them with extraction
//! helpers. End of data is `None`, never an empty row, since a row with no
//! columns is still a row.

use std::collections::BTreeMap;

use crate::value::{Row, Value};

/// Row access primitives supplied by a backend.
pub trait RowSource {
    /// Returns the next row, or `None` at the end.
    fn advance(&mut self) -> Option<Row>;

    /// Total number of rows.
    fn count(&self) -> usize;

    /// Moves to row `n` and returns it, or `None` if out of range.
    fn seek(&mut self, n: usize) -> Option<Row>;
}

/// A [`RowSource`] over rows already fetched into memory.
#[derive(Debug, Clone, Default)]
pub struct BufferedRows {
    rows: Vec<Row>,
    cursor: usize,
    seeks: usize,
}

impl BufferedRows {
    /// Wraps fetched rows.
    #[must_use]
    pub const fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            cursor: 0,
            seeks: 0,
        }
    }

    /// Number of `seek` calls so far.
    #[must_use]
    pub const fn seeks(&self) -> usize {
        self.seeks
    }
}

impl RowSource for BufferedRows {
    fn advance(&mut self) -> Option<Row> {
        let row = self.rows.get(self.cursor).cloned();
        if row.is_some() {
            self.cursor += 1;
        }
        row
    }

    fn count(&self) -> usize {
        self.rows.len()
    }

    fn seek(&mut self, n: usize) -> Option<Row> {
        self.seeks += 1;
        self.cursor = n.min(self.rows.len());
        self.advance()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Cursor {
    Unstarted,
    Row(Row),
    Exhausted,
}

/// Forward-iterable, rewindable view of a result set.
///
/// `key()` is `-1` before the first row and counts up from `0` as rows are
/// read.
#[derive(Debug)]
pub struct Query<S: RowSource> {
    source: S,
    position: i64,
    current: Cursor,
}

impl<S: RowSource> Query<S> {
    /// Wraps a row source.
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self {
            source,
            position: -1,
            current: Cursor::Unstarted,
        }
    }

    /// Returns the underlying source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Moves back to the first row. Does nothing on an empty result.
    pub fn rewind(&mut self) {
        if self.source.count() > 0 {
            self.current = self.source.seek(0).map_or(Cursor::Exhausted, Cursor::Row);
            self.position = 0;
        }
    }

    /// The current row, reading the first one on first access.
    pub fn current(&mut self) -> Option<&Row> {
        if self.current == Cursor::Unstarted {
            self.next_record();
        }
        match &self.current {
            Cursor::Row(row) => Some(row),
            Cursor::Unstarted | Cursor::Exhausted => None,
        }
    }

    /// Reads the next row and makes it current.
    pub fn next_record(&mut self) -> Option<&Row> {
        self.position += 1;
        self.current = self.source.advance().map_or(Cursor::Exhausted, Cursor::Row);
        match &self.current {
            Cursor::Row(row) => Some(row),
            Cursor::Unstarted | Cursor::Exhausted => None,
        }
    }

    /// Returns `true` while the cursor is on a row.
    pub fn valid(&mut self) -> bool {
        self.current().is_some()
    }

    /// Position of the current row.
    #[must_use]
    pub const fn key(&self) -> i64 {
        self.position
    }

    /// The current row as a column map.
    pub fn record(&mut self) -> Option<BTreeMap<String, Value>> {
        self.current().map(Row::to_map)
    }

    /// Total number of rows.
    #[must_use]
    pub fn count(&self) -> usize {
        self.source.count()
    }

    /// The first row, rewinding first.
    pub fn first(&mut self) -> Option<Row> {
        self.rewind();
        self.current().cloned()
    }

    /// The first column of every row, in order.
    pub fn column(&mut self) -> Vec<Value> {
        self.rows()
            .into_iter()
            .filter_map(|row| row.first().cloned())
            .collect()
    }

    /// The first column of every row, keyed by itself.
    pub fn keyed_column(&mut self) -> BTreeMap<Value, Value> {
        self.column().into_iter().map(|v| (v.clone(), v)).collect()
    }

    /// First column to second column. Later duplicate keys win.
    pub fn map(&mut self) -> BTreeMap<Value, Value> {
        self.rows()
            .into_iter()
            .filter_map(|row| {
                let key = row.nth(0)?.clone();
                let value = row.nth(1).cloned().unwrap_or(Value::Null);
                Some((key, value))
            })
            .collect()
    }

    /// The first column of the first row.
    pub fn value(&mut self) -> Option<Value> {
        self.first().and_then(|row| row.first().cloned())
    }

    fn rows(&mut self) -> Vec<Row> {
        self.rewind();
        let mut rows = Vec::new();
        if let Some(row) = self.current() {
            rows.push(row.clone());
            while let Some(row) = self.next_record() {
                rows.push(row.clone());
            }
        }
        rows
    }
}

impl<S: RowSource> IntoIterator for Query<S> {
    type Item = Row;
    type IntoIter = Rows<S>;

    fn into_iter(self) -> Rows<S> {
        Rows { query: self }
    }
}

/// Owning iterator over the remaining rows of a [`Query`], starting at the
/// current row.
#[derive(Debug)]
pub struct Rows<S: RowSource> {
    query: Query<S>,
}

impl<S: RowSource> Iterator for Rows<S> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let row = self.query.current()?.clone();
        self.query.next_record();
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_rows() -> Query<BufferedRows> {
        Query::new(BufferedRows::new(vec![
            Row::new().with("ID", 1).with("Name", "A"),
            Row::new().with("ID", 2).with("Name", "B"),
        ]))
    }

    #[test]
    fn empty_result_never_seeks() {
        let mut query = Query::new(BufferedRows::new(Vec::new()));
        query.rewind();
        assert_eq!(query.source().seeks(), 0);
        assert!(!query.valid());
        assert_eq!(query.count(), 0);
        assert!(query.column().is_empty());
        assert_eq!(query.value(), None);
    }

    #[test]
    fn keys_count_from_zero() {
        let mut query = two_rows();
        assert_eq!(query.key(), -1);
        query.next_record();
        assert_eq!(query.key(), 0);
        query.next_record();
        assert_eq!(query.key(), 1);
        assert!(query.next_record().is_none());
        assert!(!query.valid());
    }

    #[test]
    fn extraction_helpers() {
        let mut query = two_rows();
        assert_eq!(query.column(), vec![Value::Int(1), Value::Int(2)]);

        let map = query.map();
        assert_eq!(map.get(&Value::Int(1)), Some(&Value::from("A")));
        assert_eq!(map.get(&Value::Int(2)), Some(&Value::from("B")));

        let keyed = query.keyed_column();
        assert_eq!(keyed.len(), 2);
        assert_eq!(keyed.get(&Value::Int(2)), Some(&Value::Int(2)));

        assert_eq!(query.value(), Some(Value::Int(1)));
        assert_eq!(
            query.record().unwrap().get("Name"),
            Some(&Value::from("A"))
        );
    }

    #[test]
    fn map_keeps_last_duplicate() {
        let mut query = Query::new(BufferedRows::new(vec![
            Row::new().with("Type", "Page").with("Count", 1),
            Row::new().with("Type", "Page").with("Count", 2),
        ]));
        let map = query.map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::from("Page")), Some(&Value::Int(2)));
    }

    #[test]
    fn empty_row_is_still_a_row() {
        let mut query = Query::new(BufferedRows::new(vec![Row::new()]));
        assert!(query.valid());
        assert_eq!(query.current(), Some(&Row::new()));
        assert!(query.next_record().is_none());
    }

    #[test]
    fn iterates_all_rows() {
        let names: Vec<Value> = two_rows()
            .into_iter()
            .map(|row| row.get("Name").cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(names, vec![Value::from("A"), Value::from("B")]);

        let mut query = two_rows();
        query.next_record();
        assert_eq!(query.into_iter().count(), 1);
    }
}
