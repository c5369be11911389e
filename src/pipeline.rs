//! Request orchestration
//!
//! [`Pipeline`] strings the stages together for each request: validate and
//! decode an uploaded workbook into the store, or fetch a stored dataset,
//! check who is asking, build a chart spec, rasterize it and drop the PNG
//! into the public chart directory. Any failing stage ends the request;
//! nothing already persisted is rolled back.
//!
//! Everything here is synchronous and CPU or disk bound. The HTTP layer runs
//! it on the blocking pool.
//!
//! A delete may land while an analyze of the same upload is still rendering.
//! Delete removes the record before sweeping chart files, and analyze checks
//! the record again once its file is in place, dropping the file itself if
//! the upload is gone. Either way no chart outlives its upload.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::auth::Principal;
use crate::chart::{self, ChartRequest, ChartType};
use crate::config::{Config, DEFAULT_MAX_UPLOAD_BYTES, StoreBackend};
use crate::downloader::{ExportFormat, XLSX_MIME};
use crate::error::AppError;
use crate::graph::{self, GraphOptions};
use crate::loader;
use crate::saving::{DiskStore, MemoryStore, StoreError, Upload, UploadId, UploadStore, UploadSummary};

pub const XLS_MIME: &str = "application/vnd.ms-excel";

/// Content types accepted for ingest
pub const ACCEPTED_MIME_TYPES: [&str; 2] = [XLS_MIME, XLSX_MIME];

/// Subdirectory of the public directory holding rendered charts
pub const CHARTS_DIR: &str = "charts";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Validating,
    Decoding,
    Storing,
    Fetching,
    Authorizing,
    Building,
    Rendering,
    Persisting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One file pulled out of an upload request
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub message: &'static str,
    pub data: Vec<Value>,
    pub upload_id: UploadId,
    pub headers: Vec<String>,
    pub row_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub chart_data: Value,
    pub chart_type: ChartType,
    pub chart_url: String,
    #[serde(skip)]
    pub image_path: PathBuf,
}

/// A stored upload with its rows, as returned to the owner
#[derive(Debug, Serialize)]
pub struct UploadDetail {
    #[serde(flatten)]
    pub summary: UploadSummary,
    pub data: Vec<Value>,
}

/// A dataset rendered into a downloadable file
#[derive(Debug)]
pub struct Export {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

pub struct Pipeline {
    store: Arc<dyn UploadStore>,
    charts_dir: PathBuf,
    public_url: String,
    graph: GraphOptions,
    max_upload_bytes: usize,
}

impl Pipeline {
    /// Charts land in `<public_dir>/charts` and are linked as
    /// `<public_url>/charts/<file>`
    pub fn new(
        store: Arc<dyn UploadStore>,
        public_dir: impl AsRef<Path>,
        public_url: impl Into<String>,
    ) -> Self {
        Pipeline {
            store,
            charts_dir: public_dir.as_ref().join(CHARTS_DIR),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            graph: GraphOptions::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_graph_options(mut self, graph: GraphOptions) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Open the configured store and wire up a pipeline around it
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store: Arc<dyn UploadStore> = match config.store_backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Disk => Arc::new(DiskStore::open(&config.data_dir)?),
        };
        info!("Using {} upload store", config.store_backend);

        Ok(Pipeline::new(store, &config.public_dir, config.public_url.clone())
            .with_graph_options(config.graph)
            .with_max_upload_bytes(config.max_upload_bytes))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Validate, decode and store one workbook for `principal`
    ///
    /// Every check on the request runs before the workbook is parsed.
    ///
    /// # Arguments
    /// * `principal` - The verified caller, recorded as the owner
    /// * `files` - Every `file` part of the request; exactly one must be non-empty
    ///
    /// # Returns
    /// The new upload id with the decoded header and rows
    ///
    /// # Errors
    /// * [`AppError::Validation`] for a missing, extra, oversized or non-Excel file
    /// * [`AppError::Decode`] if the workbook cannot be read
    pub fn ingest(
        &self,
        principal: &Principal,
        files: Vec<UploadFile>,
    ) -> Result<IngestOutcome, AppError> {
        debug!(stage = %Stage::Validating, user = %principal);
        let file = self.validate(files)?;

        debug!(stage = %Stage::Decoding, file = %file.file_name, bytes = file.bytes.len());
        let dataset = loader::decode(&file.bytes)?;

        debug!(stage = %Stage::Storing, rows = dataset.row_count());
        let data = dataset.rows_json();
        let headers = dataset.columns().to_vec();
        let row_count = dataset.row_count();
        let upload_id = self.store.put(&principal.id, &file.file_name, dataset)?;

        info!(stage = %Stage::Done, %upload_id, rows = row_count, "Stored upload from {principal}");
        Ok(IngestOutcome {
            message: "File uploaded and parsed successfully",
            data,
            upload_id,
            headers,
            row_count,
        })
    }

    fn validate(&self, files: Vec<UploadFile>) -> Result<UploadFile, AppError> {
        let mut files = files.into_iter().filter(|file| !file.bytes.is_empty());

        let file = files
            .next()
            .ok_or_else(|| AppError::validation("No file uploaded"))?;
        if files.next().is_some() {
            return Err(AppError::validation("Only one file may be uploaded at a time"));
        }

        if file.bytes.len() > self.max_upload_bytes {
            return Err(AppError::validation(format!(
                "File is larger than the {} byte limit",
                self.max_upload_bytes
            )));
        }

        let content_type = file.content_type.as_deref().unwrap_or_default();
        if !ACCEPTED_MIME_TYPES.contains(&content_type) {
            return Err(AppError::validation(
                "Only Excel files (.xls, .xlsx) are allowed",
            ));
        }

        Ok(file)
    }

    /// Render one chart of a stored upload and publish it
    ///
    /// # Arguments
    /// * `principal` - The verified caller; must own the upload or be an admin
    /// * `upload_id` - Id as received on the request path
    /// * `request` - Column names and chart type
    ///
    /// # Returns
    /// Chart data for the client plus the public URL of the PNG
    ///
    /// # Errors
    /// * [`AppError::NotFound`] for an unknown id, or when the upload is deleted mid-render
    /// * [`AppError::Forbidden`] when the caller may not see the upload
    /// * [`AppError::Chart`] for an unknown column or chart type
    pub fn analyze(
        &self,
        principal: &Principal,
        upload_id: &str,
        request: &ChartRequest,
    ) -> Result<AnalysisOutcome, AppError> {
        debug!(stage = %Stage::Fetching, upload_id);
        let id = parse_id(upload_id)?;
        let upload = self.store.get(id)?;

        debug!(stage = %Stage::Authorizing, %id, user = %principal);
        authorize(principal, &upload)?;

        debug!(stage = %Stage::Building, x = %request.x_axis, y = %request.y_axis, chart_type = %request.chart_type);
        let spec = chart::build(
            &upload.dataset,
            &request.x_axis,
            &request.y_axis,
            &request.chart_type,
        )?;

        debug!(stage = %Stage::Rendering, points = spec.len());
        let png = graph::render(&spec, &self.graph)?;

        debug!(stage = %Stage::Persisting, bytes = png.len());
        let file_name = format!("{id}_{}.png", spec.chart_type);
        let image_path = self.publish(&file_name, &png)?;
        self.ensure_still_stored(id, &image_path)?;

        info!(stage = %Stage::Done, %id, chart_type = %spec.chart_type, "Rendered chart");
        Ok(AnalysisOutcome {
            chart_data: spec.chart_data(),
            chart_type: spec.chart_type,
            chart_url: format!("{}/{CHARTS_DIR}/{file_name}", self.public_url),
            image_path,
        })
    }

    /// Write `bytes` into the chart directory, replacing any earlier file
    fn publish(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, AppError> {
        fs::create_dir_all(&self.charts_dir)?;

        let mut temp = NamedTempFile::new_in(&self.charts_dir)?;
        temp.write_all(bytes)?;

        let path = self.charts_dir.join(file_name);
        temp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Drop a freshly published chart if its upload was deleted meanwhile
    fn ensure_still_stored(&self, id: UploadId, image_path: &Path) -> Result<(), AppError> {
        match self.store.get(id) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                warn!(%id, "Upload deleted while rendering, discarding chart");
                match fs::remove_file(image_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Err(AppError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Uploads visible to `principal`: their own, or all of them for admins
    pub fn list_uploads(&self, principal: &Principal) -> Result<Vec<UploadSummary>, AppError> {
        let owner = (!principal.is_admin()).then_some(principal.id.as_str());
        Ok(self.store.list(owner)?)
    }

    pub fn fetch_upload(
        &self,
        principal: &Principal,
        upload_id: &str,
    ) -> Result<UploadDetail, AppError> {
        let upload = self.authorized_upload(principal, upload_id)?;

        Ok(UploadDetail {
            summary: UploadSummary::from(upload.as_ref()),
            data: upload.dataset.rows_json(),
        })
    }

    /// Remove an upload along with every chart rendered from it
    pub fn delete_upload(&self, principal: &Principal, upload_id: &str) -> Result<(), AppError> {
        let upload = self.authorized_upload(principal, upload_id)?;
        self.store.delete(upload.id)?;

        let removed = self.remove_charts(upload.id)?;
        info!(id = %upload.id, charts = removed, "Deleted upload for {principal}");
        Ok(())
    }

    fn remove_charts(&self, id: UploadId) -> Result<usize, AppError> {
        let entries = match fs::read_dir(&self.charts_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{id}_");
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(removed)
    }

    /// Stored dataset as a CSV or XLSX download
    ///
    /// # Arguments
    /// * `format` - `csv` or `xlsx`, case-insensitive
    ///
    /// # Returns
    /// File bytes with a download name built from the uploaded file's stem
    ///
    /// # Errors
    /// Not found and forbidden are reported before an unknown format.
    pub fn export_upload(
        &self,
        principal: &Principal,
        upload_id: &str,
        format: &str,
    ) -> Result<Export, AppError> {
        let upload = self.authorized_upload(principal, upload_id)?;
        let format: ExportFormat = format.parse()?;
        let bytes = format.export(&upload.dataset)?;

        let stem = Path::new(&upload.source_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| upload.id.to_string());

        Ok(Export {
            file_name: format!("{stem}.{}", format.extension()),
            mime: format.mime(),
            bytes,
        })
    }

    fn authorized_upload(
        &self,
        principal: &Principal,
        upload_id: &str,
    ) -> Result<Arc<Upload>, AppError> {
        let upload = self.store.get(parse_id(upload_id)?)?;
        authorize(principal, &upload)?;
        Ok(upload)
    }
}

/// Ids that do not parse cannot name an upload
fn parse_id(upload_id: &str) -> Result<UploadId, AppError> {
    upload_id.trim().parse().map_err(|_| AppError::NotFound)
}

fn authorize(principal: &Principal, upload: &Upload) -> Result<(), AppError> {
    if principal.may_access(&upload.owner_id) {
        return Ok(());
    }

    warn!(id = %upload.id, "{principal} tried to access an upload they do not own");
    Err(AppError::Forbidden)
}
