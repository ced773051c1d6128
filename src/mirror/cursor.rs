// ABOUTME: Cursor model for timestamp-based mirroring - sort keys, positions, batches
// ABOUTME: Defines the (timestamp, primary key) total order and canonical key sets

use mysql_async::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Separator used when a composite key is rendered as one canonical string.
const KEY_SEPARATOR: char = '\u{1f}';

/// Compare two MySQL values under a total order.
///
/// NULL sorts first, then numbers (signed, unsigned and floating point are
/// compared numerically with each other), then dates, then times, then raw
/// byte strings compared bytewise.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        other => return other,
    }

    match (a, b) {
        (Value::NULL, Value::NULL) => Ordering::Equal,
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (
            Value::Date(y1, mo1, d1, h1, mi1, s1, us1),
            Value::Date(y2, mo2, d2, h2, mi2, s2, us2),
        ) => (y1, mo1, d1, h1, mi1, s1, us1).cmp(&(y2, mo2, d2, h2, mi2, s2, us2)),
        (Value::Time(..), Value::Time(..)) => time_micros(a).cmp(&time_micros(b)),
        _ => match (as_i128(a), as_i128(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => as_f64(a).total_cmp(&as_f64(b)),
        },
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::NULL => 0,
        Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Double(_) => 1,
        Value::Date(..) => 2,
        Value::Time(..) => 3,
        Value::Bytes(_) => 4,
    }
}

fn as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::Int(v) => Some(i128::from(*v)),
        Value::UInt(v) => Some(i128::from(*v)),
        _ => None,
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::UInt(v) => *v as f64,
        Value::Float(v) => f64::from(*v),
        Value::Double(v) => *v,
        _ => 0.0,
    }
}

fn time_micros(value: &Value) -> i128 {
    match value {
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total = ((i128::from(*days) * 24 + i128::from(*hours)) * 60
                + i128::from(*minutes))
                * 60
                + i128::from(*seconds);
            let total = total * 1_000_000 + i128::from(*micros);
            if *negative {
                -total
            } else {
                total
            }
        }
        _ => 0,
    }
}

/// Compare two key tuples lexicographically.
pub fn compare_tuples(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match compare_values(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// A MySQL value carrying the total order of [`compare_values`].
#[derive(Debug, Clone)]
pub struct SortValue(pub Value);

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        compare_values(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for SortValue {}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

/// Render a value as the canonical string used for key-set comparison.
///
/// Integers of either signedness render identically, so a `BIGINT UNSIGNED`
/// key on one side matches a `BIGINT` key on the other.
pub fn canonical_value(value: &Value) -> String {
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut out = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            );
            if *micros > 0 {
                out.push_str(&format!(".{:06}", micros));
            }
            out
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let hours = u64::from(*days) * 24 + u64::from(*hours);
            let mut out = format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds);
            if *micros > 0 {
                out.push_str(&format!(".{:06}", micros));
            }
            out
        }
    }
}

/// Canonical string for a (possibly composite) key.
pub fn canonical_key(key: &[Value]) -> String {
    key.iter()
        .map(canonical_value)
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string())
}

/// Position of the last applied change for a table: `(timestamp, key)`.
///
/// Everything up to and including this position has been applied to the
/// mirror. Positions order lexicographically by timestamp, then key.
#[derive(Debug, Clone)]
pub struct CursorPosition {
    pub timestamp: Value,
    pub key: Vec<Value>,
}

impl CursorPosition {
    pub fn new(timestamp: Value, key: Vec<Value>) -> Self {
        Self { timestamp, key }
    }

    /// The "beginning of time" cursor for a table with `key_width` key columns.
    ///
    /// The timestamp is MySQL's zero date, which every real DATETIME or
    /// TIMESTAMP value compares greater than, and every key part is zero.
    pub fn beginning(key_width: usize) -> Self {
        Self {
            timestamp: Value::Date(0, 0, 0, 0, 0, 0, 0),
            key: vec![Value::Int(0); key_width.max(1)],
        }
    }

    /// The cursor flattened into seek values: `[timestamp, key...]`.
    pub fn to_seek_values(&self) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.key.len() + 1);
        values.push(self.timestamp.clone());
        values.extend(self.key.iter().cloned());
        values
    }

    /// Readable form for logs.
    pub fn describe(&self) -> String {
        format!(
            "({}, {})",
            canonical_value(&self.timestamp),
            canonical_key(&self.key)
        )
    }
}

impl PartialEq for CursorPosition {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CursorPosition {}

impl PartialOrd for CursorPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CursorPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.timestamp, &other.timestamp)
            .then_with(|| compare_tuples(&self.key, &other.key))
    }
}

/// An ordered batch of source rows, with column names in row order.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column, matched case-insensitively like MySQL column names.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Values of `columns` for the last row of the batch.
    pub fn last_values(&self, columns: &[String]) -> Option<Vec<Value>> {
        let last = self.rows.last()?;
        columns
            .iter()
            .map(|c| self.column_index(c).and_then(|i| last.get(i).cloned()))
            .collect()
    }

    /// Cursor position of the last row of the batch.
    pub fn last_position(
        &self,
        timestamp_column: &str,
        key_columns: &[String],
    ) -> Option<CursorPosition> {
        let timestamp = self.last_values(&[timestamp_column.to_string()])?;
        let key = self.last_values(key_columns)?;
        timestamp
            .into_iter()
            .next()
            .map(|ts| CursorPosition::new(ts, key))
    }
}

/// A set of primary keys keyed by canonical string.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Vec<Value>>,
}

impl KeySet {
    pub fn from_keys(keys: impl IntoIterator<Item = Vec<Value>>) -> Self {
        let keys = keys
            .into_iter()
            .map(|key| (canonical_key(&key), key))
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys present here but absent from `primary`, in canonical order.
    ///
    /// The stored values are returned so deletes bind the mirror's own
    /// representation of each key.
    pub fn orphans(&self, primary: &KeySet) -> Vec<Vec<Value>> {
        let mut orphaned: Vec<(&String, &Vec<Value>)> = self
            .keys
            .iter()
            .filter(|(canonical, _)| !primary.keys.contains_key(*canonical))
            .collect();
        orphaned.sort_by(|a, b| a.0.cmp(b.0));
        orphaned.into_iter().map(|(_, key)| key.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(second: u8) -> Value {
        Value::Date(2024, 5, 1, 12, 0, second, 0)
    }

    #[test]
    fn test_numbers_compare_across_signedness() {
        assert_eq!(
            compare_values(&Value::Int(5), &Value::UInt(5)),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&Value::Int(-1), &Value::UInt(0)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::UInt(u64::MAX), &Value::Int(i64::MAX)),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&Value::Double(2.5), &Value::Int(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            compare_values(&Value::NULL, &Value::Int(i64::MIN)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::NULL, &Value::Bytes(Vec::new())),
            Ordering::Less
        );
    }

    #[test]
    fn test_dates_and_times_order() {
        assert!(compare_values(&ts(1), &ts(2)).is_lt());
        assert!(compare_values(
            &Value::Date(2024, 5, 1, 12, 0, 1, 10),
            &Value::Date(2024, 5, 1, 12, 0, 1, 9)
        )
        .is_gt());
        assert!(compare_values(
            &Value::Time(true, 0, 1, 0, 0, 0),
            &Value::Time(false, 0, 0, 0, 0, 0)
        )
        .is_lt());
    }

    #[test]
    fn test_cursor_orders_by_timestamp_then_key() {
        let a = CursorPosition::new(ts(1), vec![Value::Int(9)]);
        let b = CursorPosition::new(ts(2), vec![Value::Int(1)]);
        let c = CursorPosition::new(ts(2), vec![Value::Int(2)]);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(c, CursorPosition::new(ts(2), vec![Value::UInt(2)]));
    }

    #[test]
    fn test_beginning_precedes_real_positions() {
        let start = CursorPosition::beginning(1);
        assert_eq!(start.key, vec![Value::Int(0)]);
        assert!(start < CursorPosition::new(Value::Date(1000, 1, 1, 0, 0, 0, 0), vec![Value::Int(0)]));
        assert!(start < CursorPosition::new(ts(0), vec![Value::Int(1)]));
        assert_eq!(CursorPosition::beginning(2).key.len(), 2);
    }

    #[test]
    fn test_seek_values_prefix_timestamp() {
        let pos = CursorPosition::new(ts(3), vec![Value::Int(7), Value::from("b")]);
        let seek = pos.to_seek_values();
        assert_eq!(seek.len(), 3);
        assert_eq!(seek[0], ts(3));
        assert_eq!(seek[1], Value::Int(7));
    }

    #[test]
    fn test_canonical_value_formats() {
        assert_eq!(canonical_value(&Value::Int(42)), "42");
        assert_eq!(canonical_value(&Value::UInt(42)), "42");
        assert_eq!(
            canonical_value(&Value::UInt(18_446_744_073_709_551_615)),
            "18446744073709551615"
        );
        assert_eq!(canonical_value(&Value::from("abc")), "abc");
        assert_eq!(
            canonical_value(&Value::Date(2024, 1, 2, 3, 4, 5, 0)),
            "2024-01-02 03:04:05"
        );
        assert_eq!(
            canonical_value(&Value::Date(2024, 1, 2, 3, 4, 5, 120)),
            "2024-01-02 03:04:05.000120"
        );
        assert_eq!(
            canonical_value(&Value::Time(true, 1, 2, 3, 4, 0)),
            "-26:03:04"
        );
    }

    #[test]
    fn test_key_set_orphans() {
        let primary = KeySet::from_keys(vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        let mirror = KeySet::from_keys(vec![
            vec![Value::UInt(1)],
            vec![Value::UInt(2)],
            vec![Value::UInt(3)],
            vec![Value::UInt(10)],
        ]);

        let orphans = mirror.orphans(&primary);
        assert_eq!(orphans, vec![vec![Value::UInt(10)], vec![Value::UInt(3)]]);
    }

    #[test]
    fn test_key_set_composite_keys() {
        let primary = KeySet::from_keys(vec![vec![Value::Int(1), Value::from("a")]]);
        let mirror = KeySet::from_keys(vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(1), Value::from("b")],
        ]);
        assert_eq!(
            mirror.orphans(&primary),
            vec![vec![Value::Int(1), Value::from("b")]]
        );
    }

    #[test]
    fn test_row_batch_last_position() {
        let batch = RowBatch::new(
            vec!["id".to_string(), "name".to_string(), "updated_at".to_string()],
            vec![
                vec![Value::Int(1), Value::from("a"), ts(1)],
                vec![Value::Int(2), Value::from("b"), ts(1)],
            ],
        );

        let pos = batch
            .last_position("UPDATED_AT", &["id".to_string()])
            .unwrap();
        assert_eq!(pos, CursorPosition::new(ts(1), vec![Value::Int(2)]));
        assert!(batch.last_position("missing", &["id".to_string()]).is_none());
        assert!(RowBatch::default().last_values(&["id".to_string()]).is_none());
    }
}
