use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cell::CellValue;

/// Tabular contents of one worksheet
///
/// `columns` holds the header row in sheet order. Every entry of `rows` has
/// exactly `columns.len()` cells; [`Dataset::new`] pads short rows with nulls
/// and cuts long ones, so the invariant holds for anything built through it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Null);
                row
            })
            .collect();

        Dataset { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Every cell of one column, in row order
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows.iter().map(move |row| &row[index])
    }

    /// One row as a JSON object keyed by column name, in header order
    pub fn row_json(&self, row: &[CellValue]) -> Value {
        let object: Map<String, Value> = self
            .columns
            .iter()
            .zip(row.iter())
            .map(|(column, cell)| (column.clone(), cell.to_json()))
            .collect();

        Value::Object(object)
    }

    pub fn rows_json(&self) -> Vec<Value> {
        self.rows.iter().map(|row| self.row_json(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn short_rows_are_null_filled() {
        let dataset = Dataset::new(
            vec!["A".into(), "B".into(), "C".into()],
            vec![vec![text("x")], vec![text("y"), CellValue::Int(1), CellValue::Int(2), CellValue::Int(3)]],
        );

        assert_eq!(dataset.rows()[0], vec![text("x"), CellValue::Null, CellValue::Null]);
        assert_eq!(dataset.rows()[1].len(), 3);
    }

    #[test]
    fn json_rows_keep_header_order() {
        let dataset = Dataset::new(
            vec!["Zeta".into(), "Alpha".into()],
            vec![vec![text("z"), CellValue::Int(1)]],
        );

        let rows = dataset.rows_json();
        let keys: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["Zeta", "Alpha"]);
        assert_eq!(rows[0], json!({"Zeta": "z", "Alpha": 1}));
    }

    #[test]
    fn column_lookup_is_case_sensitive() {
        let dataset = Dataset::new(vec!["Month".into()], Vec::new());
        assert_eq!(dataset.column_index("Month"), Some(0));
        assert_eq!(dataset.column_index("month"), None);
    }
}
