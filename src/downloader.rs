use std::fmt;
use std::str::FromStr;

use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use thiserror::Error;

use crate::cell::CellValue;
use crate::dataset::Dataset;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CSV_MIME: &str = "text/csv; charset=utf-8";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unknown export format '{0}'")]
    UnknownFormat(String),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX export failed: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Download formats for a stored dataset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ExportFormat::Csv => CSV_MIME,
            ExportFormat::Xlsx => XLSX_MIME,
        }
    }

    pub fn export(&self, dataset: &Dataset) -> Result<Vec<u8>, ExportError> {
        match self {
            ExportFormat::Csv => to_csv(dataset).map(String::into_bytes),
            ExportFormat::Xlsx => to_xlsx(dataset),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            _ => Err(ExportError::UnknownFormat(s.to_string())),
        }
    }
}

/// Convert a dataset to CSV: the header row, then one line per row
///
/// # Arguments
/// * `dataset` - Dataset to convert
///
/// # Returns
/// * `Result<String, ExportError>` - CSV content as a string or an error
pub fn to_csv(dataset: &Dataset) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(dataset.columns())?;
    for row in dataset.rows() {
        writer.write_record(row.iter().map(CellValue::display))?;
    }

    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    // Every field came from a Rust String, so the output is valid UTF-8
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Convert a dataset to a single-sheet XLSX workbook
///
/// Numbers and booleans keep their cell types; text, dates and everything
/// else are written as strings. Null cells are left blank.
///
/// # Arguments
/// * `dataset` - Dataset to convert
///
/// # Returns
/// * `Result<Vec<u8>, ExportError>` - XLSX file content as bytes or an error
pub fn to_xlsx(dataset: &Dataset) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (c, column) in dataset.columns().iter().enumerate() {
        worksheet.write_string(0, c as u16, column.as_str())?;
    }

    for (r, row) in dataset.rows().iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            let c = c as u16;
            match cell {
                CellValue::Null => {}
                CellValue::Bool(b) => {
                    worksheet.write_boolean(r, c, *b)?;
                }
                CellValue::Int(i) => {
                    worksheet.write_number(r, c, *i as f64)?;
                }
                CellValue::Float(f) => {
                    worksheet.write_number(r, c, *f)?;
                }
                CellValue::Text(_) | CellValue::DateTime(_) => {
                    worksheet.write_string(r, c, cell.display())?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;

    fn sample() -> Dataset {
        Dataset::new(
            vec!["Month".into(), "Sales, total".into(), "Ok".into()],
            vec![
                vec![CellValue::Text("Jan".into()), CellValue::Int(100), CellValue::Bool(true)],
                vec![CellValue::Text("say \"hi\"".into()), CellValue::Float(1.5), CellValue::Null],
            ],
        )
    }

    #[test]
    fn test_csv_quotes_special_characters() {
        let csv = to_csv(&sample()).unwrap();
        assert_eq!(
            csv,
            "Month,\"Sales, total\",Ok\nJan,100,true\n\"say \"\"hi\"\"\",1.5,\n"
        );
    }

    #[test]
    fn test_xlsx_reads_back_through_loader() {
        let bytes = to_xlsx(&sample()).unwrap();
        let dataset = loader::decode(&bytes).unwrap();

        assert_eq!(dataset.columns(), sample().columns());
        assert_eq!(dataset.rows(), sample().rows());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("xlsx".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert!(matches!(
            "pdf".parse::<ExportFormat>(),
            Err(ExportError::UnknownFormat(_))
        ));
    }
}
