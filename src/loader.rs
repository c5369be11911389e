use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};

use calamine::{Data, Range, Reader, Xls, Xlsx, open_workbook_from_rs};
use thiserror::Error;
use tracing::debug;

use crate::cell::CellValue;
use crate::dataset::Dataset;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Name given to header cells that are blank
const EMPTY_HEADER: &str = "__EMPTY";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("File is not an Excel workbook")]
    UnsupportedFormat,

    #[error("Failed to read workbook: {0}")]
    Workbook(String),

    #[error("Workbook contains no sheets")]
    NoSheets,

    #[error("First sheet has no header row")]
    NoHeader,
}

/// Supported workbook containers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkbookFormat {
    /// Legacy binary `.xls` (OLE2 compound file)
    Xls,
    /// Zip-based `.xlsx`
    Xlsx,
}

impl WorkbookFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(ZIP_MAGIC) {
            Some(WorkbookFormat::Xlsx)
        } else if bytes.starts_with(OLE_MAGIC) {
            Some(WorkbookFormat::Xls)
        } else {
            None
        }
    }
}

/// Decode workbook bytes into a [`Dataset`]
///
/// The first worksheet in workbook order is read. Its first row is the
/// header; every later row inside the sheet's extent becomes a data row,
/// padded with nulls to the header width.
///
/// # Errors
/// * [`DecodeError`] if the bytes are not a readable workbook, the workbook
///   has no sheets, or the first sheet has no rows at all
pub fn decode(bytes: &[u8]) -> Result<Dataset, DecodeError> {
    let format = WorkbookFormat::sniff(bytes).ok_or(DecodeError::UnsupportedFormat)?;
    let cursor = Cursor::new(bytes);

    let range = match format {
        WorkbookFormat::Xlsx => {
            let workbook: Xlsx<_> = open_workbook_from_rs(cursor)
                .map_err(|e| DecodeError::Workbook(format!("{e:?}")))?;
            first_sheet(workbook)?
        }
        WorkbookFormat::Xls => {
            let workbook: Xls<_> = open_workbook_from_rs(cursor)
                .map_err(|e| DecodeError::Workbook(format!("{e:?}")))?;
            first_sheet(workbook)?
        }
    };

    let dataset = range_to_dataset(&range)?;
    debug!(
        ?format,
        columns = dataset.columns().len(),
        rows = dataset.row_count(),
        "Decoded workbook"
    );

    Ok(dataset)
}

fn first_sheet<RS, R>(mut workbook: R) -> Result<Range<Data>, DecodeError>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    workbook
        .worksheet_range_at(0)
        .ok_or(DecodeError::NoSheets)?
        .map_err(|e| DecodeError::Workbook(format!("{e:?}")))
}

fn range_to_dataset(range: &Range<Data>) -> Result<Dataset, DecodeError> {
    let mut rows = range.rows();
    let header = rows.next().ok_or(DecodeError::NoHeader)?;
    let columns = header_names(header);

    let data = rows
        .map(|row| row.iter().map(CellValue::from).collect())
        .collect();

    Ok(Dataset::new(columns, data))
}

/// Turn the header row into unique column names
///
/// Blank cells become `__EMPTY`, and a name seen before gets `_1`, `_2`, ...
/// appended until it is unique.
fn header_names(header: &[Data]) -> Vec<String> {
    let mut seen = HashSet::new();

    header
        .iter()
        .map(|cell| {
            let base = match CellValue::from(cell).display() {
                name if name.is_empty() => EMPTY_HEADER.to_string(),
                name => name,
            };

            let mut name = base.clone();
            let mut suffix = 0;
            while !seen.insert(name.clone()) {
                suffix += 1;
                name = format!("{base}_{suffix}");
            }
            name
        })
        .collect()
}
