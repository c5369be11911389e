use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::cell::CellValue;
use crate::dataset::Dataset;

/// Chart kinds the rasterizer knows how to draw
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    /// One rectangle per row
    Bar,
    /// Rows joined by a polyline
    Line,
    /// Line with the space down to zero filled in
    Area,
    /// Unconnected points
    Scatter,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Scatter => "scatter",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "area" => Ok(ChartType::Area),
            "scatter" => Ok(ChartType::Scatter),
            _ => Err(ChartError::UnsupportedChartType {
                chart_type: s.to_string(),
            }),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ChartError {
    #[error("Column '{column}' not found in upload")]
    ColumnNotFound { column: String },

    #[error("Unsupported chart type '{chart_type}'")]
    UnsupportedChartType { chart_type: String },
}

/// Analysis request body: `{xAxis, yAxis, chartType}`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    pub x_axis: String,
    pub y_axis: String,
    pub chart_type: String,
}

/// Everything needed to draw one chart
///
/// `labels[i]` and `values[i]` are the raw x and y cells of dataset row `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub x_column: String,
    pub y_column: String,
    pub labels: Vec<CellValue>,
    pub values: Vec<CellValue>,
}

impl ChartSpec {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label_texts(&self) -> Vec<String> {
        self.labels.iter().map(CellValue::display).collect()
    }

    /// The y series as plottable numbers; anything non-numeric is a gap
    pub fn series(&self) -> Vec<Option<f64>> {
        self.values.iter().map(CellValue::as_f64).collect()
    }

    /// Chart configuration in the shape front-end charting libraries expect
    pub fn chart_data(&self) -> Value {
        json!({
            "labels": self.label_texts(),
            "datasets": [{
                "label": self.y_column,
                "data": self.series(),
            }],
        })
    }
}

/// Project an x/y column pair of `dataset` into a [`ChartSpec`]
///
/// Both columns are checked before anything else so a bad request never
/// reaches the rasterizer. Row order is kept and cells are passed through
/// untouched.
///
/// # Arguments
/// * `dataset` - Decoded upload
/// * `x_column` - Header naming the label column
/// * `y_column` - Header naming the value column
/// * `chart_type` - `bar`, `line`, `area` or `scatter`, case-insensitive
///
/// # Returns
/// * `Result<ChartSpec, ChartError>` - Labels and values in row order, or the
///   first column or chart type that could not be resolved
pub fn build(
    dataset: &Dataset,
    x_column: &str,
    y_column: &str,
    chart_type: &str,
) -> Result<ChartSpec, ChartError> {
    let x = column(dataset, x_column)?;
    let y = column(dataset, y_column)?;
    let chart_type = chart_type.parse::<ChartType>()?;

    Ok(ChartSpec {
        chart_type,
        x_column: x_column.to_string(),
        y_column: y_column.to_string(),
        labels: dataset.column_values(x).cloned().collect(),
        values: dataset.column_values(y).cloned().collect(),
    })
}

fn column(dataset: &Dataset, name: &str) -> Result<usize, ChartError> {
    dataset
        .column_index(name)
        .ok_or_else(|| ChartError::ColumnNotFound {
            column: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Dataset {
        Dataset::new(
            vec!["Month".into(), "Sales".into(), "Note".into()],
            vec![
                vec![CellValue::Text("Jan".into()), CellValue::Int(100), CellValue::Null],
                vec![CellValue::Text("Feb".into()), CellValue::Text("n/a".into()), CellValue::Null],
                vec![CellValue::Text("Jan".into()), CellValue::Float(42.5), CellValue::Null],
            ],
        )
    }

    #[test]
    fn test_projection_keeps_row_order_and_duplicates() {
        let dataset = sales();
        let spec = build(&dataset, "Month", "Sales", "bar").unwrap();

        assert_eq!(spec.chart_type, ChartType::Bar);
        assert_eq!(spec.len(), dataset.row_count());
        assert_eq!(spec.values.len(), dataset.row_count());
        for (i, row) in dataset.rows().iter().enumerate() {
            assert_eq!(spec.labels[i], row[0]);
            assert_eq!(spec.values[i], row[1]);
        }
        assert_eq!(spec.label_texts(), ["Jan", "Feb", "Jan"]);
    }

    #[test]
    fn test_series_turns_text_into_gaps() {
        let spec = build(&sales(), "Month", "Sales", "line").unwrap();
        assert_eq!(spec.series(), vec![Some(100.0), None, Some(42.5)]);
    }

    #[test]
    fn test_missing_column_is_named() {
        let err = build(&sales(), "Nonexistent", "Sales", "bar").unwrap_err();
        assert_eq!(
            err,
            ChartError::ColumnNotFound {
                column: "Nonexistent".into()
            }
        );
        assert!(err.to_string().contains("Nonexistent"));

        let err = build(&sales(), "Month", "sales", "bar").unwrap_err();
        assert_eq!(err, ChartError::ColumnNotFound { column: "sales".into() });
    }

    #[test]
    fn test_columns_are_checked_before_chart_type() {
        let err = build(&sales(), "Nope", "Sales", "pie").unwrap_err();
        assert!(matches!(err, ChartError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_unknown_chart_type() {
        let err = build(&sales(), "Month", "Sales", "pie").unwrap_err();
        assert_eq!(
            err,
            ChartError::UnsupportedChartType {
                chart_type: "pie".into()
            }
        );
        assert_eq!("LINE".parse::<ChartType>().unwrap(), ChartType::Line);
    }

    #[test]
    fn test_empty_dataset_builds_empty_spec() {
        let dataset = Dataset::new(vec!["Month".into(), "Sales".into()], Vec::new());
        let spec = build(&dataset, "Month", "Sales", "bar").unwrap();
        assert!(spec.is_empty());
        assert_eq!(
            spec.chart_data(),
            json!({"labels": [], "datasets": [{"label": "Sales", "data": []}]})
        );
    }

    #[test]
    fn test_chart_data_shape() {
        let spec = build(&sales(), "Month", "Sales", "bar").unwrap();
        assert_eq!(
            spec.chart_data(),
            json!({
                "labels": ["Jan", "Feb", "Jan"],
                "datasets": [{"label": "Sales", "data": [100.0, null, 42.5]}],
            })
        );
    }
}
