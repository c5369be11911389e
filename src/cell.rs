use calamine::Data;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single scalar read from a worksheet cell
///
/// The derived serde representation is tagged so it survives non
/// self-describing formats such as bincode. The JSON shape handed to
/// clients is produced by [`CellValue::to_json`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view used when plotting
    ///
    /// Numbers pass through, numeric text is parsed, everything else is a gap.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) if f.is_finite() => Some(*f),
            CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Plain text rendering, used for chart labels, header names and CSV
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) => Value::from(*i),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::DateTime(_) => Value::String(self.display()),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => CellValue::Null,
            Data::Bool(b) => CellValue::Bool(*b),
            Data::Int(i) => CellValue::Int(*i),
            Data::Float(f) => float_cell(*f),
            Data::String(s) => CellValue::Text(s.clone()),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(value) => CellValue::DateTime(value),
                None => float_cell(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        }
    }
}

// Workbooks store every number as a double; whole numbers come back as integers.
fn float_cell(f: f64) -> CellValue {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        CellValue::Int(f as i64)
    } else {
        CellValue::Float(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{ExcelDateTime, ExcelDateTimeType};
    use serde_json::json;

    #[test]
    fn whole_floats_become_integers() {
        assert_eq!(CellValue::from(&Data::Float(100.0)), CellValue::Int(100));
        assert_eq!(CellValue::from(&Data::Float(2.5)), CellValue::Float(2.5));
        assert_eq!(CellValue::Int(100).to_json(), json!(100));
    }

    #[test]
    fn empty_and_error_cells_are_null() {
        assert!(CellValue::from(&Data::Empty).is_null());
        assert!(CellValue::from(&Data::Error(calamine::CellErrorType::Div0)).is_null());
    }

    #[test]
    fn numeric_view_treats_text_and_null() {
        assert_eq!(CellValue::Text(" 42.5 ".into()).as_f64(), Some(42.5));
        assert_eq!(CellValue::Text("Jan".into()).as_f64(), None);
        assert_eq!(CellValue::Null.as_f64(), None);
        assert_eq!(CellValue::Float(f64::NAN).as_f64(), None);
        assert_eq!(CellValue::Float(f64::NAN).to_json(), Value::Null);
    }

    #[test]
    fn dates_render_as_iso_strings() {
        let data = Data::DateTime(ExcelDateTime::new(
            45000.5,
            ExcelDateTimeType::DateTime,
            false,
        ));
        let cell = CellValue::from(&data);

        let expected = chrono::NaiveDate::from_ymd_opt(2023, 3, 15)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        assert_eq!(cell, CellValue::DateTime(expected));
        assert_eq!(cell.display(), "2023-03-15T12:00:00");
        assert_eq!(cell.to_json(), json!("2023-03-15T12:00:00"));
        assert_eq!(cell.as_f64(), None);
    }

    #[test]
    fn survives_bincode() {
        let cells = vec![
            CellValue::Null,
            CellValue::Text("Jan".into()),
            CellValue::Int(7),
            CellValue::Float(1.5),
        ];
        let bytes = bincode::serialize(&cells).unwrap();
        let back: Vec<CellValue> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, cells);
    }
}
