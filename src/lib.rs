/*!
# Sheetchart

Upload a spreadsheet, pick two columns, get a chart back.

## Overview

Users send an Excel workbook (`.xls` or `.xlsx`) to the server. The first
worksheet is decoded into a table whose first row names the columns, and the
table is kept under a fresh upload id. Later requests name that id, an x
column, a y column and a chart type; the server renders a PNG, publishes it
under a static path and answers with the chart data and the image URL.

## Architecture

### Pipeline
- **loader**: Workbook decoding (XLS and XLSX, first sheet, header row)
- **saving**: Upload storage behind the `UploadStore` trait (memory or gzip+bincode files)
- **chart**: Projects two columns of a stored dataset into a chart spec
- **graph**: Rasterizes a chart spec to PNG without any font dependency
- **pipeline**: Runs the stages for each request and writes chart files

### Supporting modules
- **cell**: Typed cell values and their JSON form
- **dataset**: Header plus rows, always rectangular
- **downloader**: CSV and XLSX export of stored uploads
- **auth**: Verified principals from JWT bearer tokens or the `token` cookie
- **config**: Environment settings
- **error**: Application error type and its HTTP mapping
- **app**: Routing and middleware (feature `web`)

## REST API Endpoints

- `GET /health` - Liveness check
- `POST /api/uploads` - Ingest a workbook (multipart field `file`)
- `GET /api/uploads` - List uploads
- `GET /api/uploads/:id` - Upload metadata and rows
- `DELETE /api/uploads/:id` - Delete an upload and its charts
- `POST /api/uploads/:id/analyze` - Render a chart from `{xAxis, yAxis, chartType}`
- `GET /api/uploads/:id/export?format=csv|xlsx` - Download the dataset
- `GET /uploads/charts/{file}` - Rendered chart images
*/

pub mod auth;
pub mod cell;
pub mod chart;
pub mod config;
pub mod dataset;
pub mod downloader;
pub mod error;
pub mod graph;
pub mod loader;
pub mod pipeline;
pub mod saving;

#[cfg(feature = "web")]
pub mod app;

pub use auth::Principal;
pub use cell::CellValue;
pub use chart::{ChartRequest, ChartSpec, ChartType};
pub use config::Config;
pub use dataset::Dataset;
pub use error::AppError;
pub use graph::GraphOptions;
pub use pipeline::Pipeline;
pub use saving::{DiskStore, MemoryStore, Upload, UploadId, UploadStore};
