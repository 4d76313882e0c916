//! Raster export: request validation, job handles and destination sinks

use crate::core::image::{Band, Image};
use crate::core::maybe_rayon::zip_for_each;
use crate::core::reduce::SamplingGrid;
use crate::io::raster::{encode_band, write_band_file, SampleFormat};
use crate::types::{GeoGrid, Roi, VerdantError, VerdantResult};
use chrono::Utc;
use ndarray::{Array2, Zip};
use quick_xml::de::from_str;
use quick_xml::se::to_string;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// The only output reference system supported
pub const SUPPORTED_CRS: &str = "EPSG:4326";

/// Bytes per exported sample (f32)
const BYTES_PER_SAMPLE: u64 = 4;

/// A single-band raster export over a region
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub image: Image,
    pub description: String,
    pub folder: String,
    pub file_name_prefix: String,
    pub region: Roi,
    /// Output ground sampling distance, meters
    pub scale: f64,
    pub crs: String,
    pub max_pixels: u64,
}

impl ExportRequest {
    /// Check the descriptor and the pixel ceiling; returns the estimated pixel count
    pub fn validate(&self) -> VerdantResult<u64> {
        if self.description.trim().is_empty() {
            return Err(VerdantError::InvalidInput("Export description is empty".to_string()));
        }
        if self.folder.trim().is_empty() {
            return Err(VerdantError::InvalidInput(format!(
                "Export '{}' has an empty folder",
                self.description
            )));
        }

        let prefix_pattern = Regex::new(r"^[A-Za-z0-9_.-]+$")
            .map_err(|e| VerdantError::InvalidInput(format!("Regex error: {}", e)))?;
        if !prefix_pattern.is_match(&self.file_name_prefix) {
            return Err(VerdantError::InvalidInput(format!(
                "Invalid file name prefix '{}' (allowed: letters, digits, '_', '.', '-')",
                self.file_name_prefix
            )));
        }

        let crs_pattern = Regex::new(r"^EPSG:\d+$")
            .map_err(|e| VerdantError::InvalidInput(format!("Regex error: {}", e)))?;
        if !crs_pattern.is_match(&self.crs) {
            return Err(VerdantError::InvalidInput(format!("Malformed CRS '{}'", self.crs)));
        }
        if self.crs != SUPPORTED_CRS {
            return Err(VerdantError::InvalidInput(format!(
                "Unsupported CRS '{}' (only {} is supported)",
                self.crs, SUPPORTED_CRS
            )));
        }

        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(VerdantError::InvalidInput(format!("Invalid export scale {} m", self.scale)));
        }
        self.image.single_band()?;

        let estimated_pixels = SamplingGrid::estimate_pixels(self.region.bounds(), self.scale)?;
        if estimated_pixels > self.max_pixels {
            return Err(VerdantError::ResourceLimit {
                estimated_pixels,
                max_pixels: self.max_pixels,
                scale: self.scale,
                bounds: *self.region.bounds(),
            });
        }
        Ok(estimated_pixels)
    }

    /// Resample onto the region lattice at the export scale; cells outside
    /// the region are masked.
    pub fn rasterize(&self) -> VerdantResult<(GeoGrid, Band)> {
        let sampling = SamplingGrid::over_region(&self.region, self.scale, self.max_pixels)?;
        let lattice = *sampling.grid();
        let source = self.image.grid();
        let band = self.image.single_band()?;

        log::debug!(
            "Rasterizing '{}' onto {}x{} cells at {} m",
            band.name(),
            lattice.rows,
            lattice.cols,
            self.scale
        );

        let mut values = Array2::from_elem(lattice.shape(), f64::NAN);
        let region = &self.region;
        zip_for_each!(Zip::indexed(&mut values), |(row, col), out| {
            let (lon, lat) = lattice.pixel_center(row, col);
            if !region.contains(lon, lat) {
                return;
            }
            if let Some(value) = source.locate(lon, lat).and_then(|(r, c)| band.get(r, c)) {
                *out = value;
            }
        });

        Ok((lattice, Band::from_values(band.name(), values)))
    }
}

/// Export header written next to the data file and sent to job services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "export")]
pub struct ExportHeader {
    pub description: String,
    pub folder: String,
    #[serde(rename = "fileNamePrefix")]
    pub file_name_prefix: String,
    pub crs: String,
    pub scale: f64,
    pub band: String,
    pub format: SampleFormat,
    pub compressed: bool,
    pub grid: GeoGrid,
    #[serde(rename = "validPixels")]
    pub valid_pixels: u64,
}

impl ExportHeader {
    fn new(request: &ExportRequest, grid: GeoGrid, band: &Band, compressed: bool) -> Self {
        Self {
            description: request.description.clone(),
            folder: request.folder.clone(),
            file_name_prefix: request.file_name_prefix.clone(),
            crs: request.crs.clone(),
            scale: request.scale,
            band: band.name().to_string(),
            format: SampleFormat::F32,
            compressed,
            grid,
            valid_pixels: band.valid_count() as u64,
        }
    }

    pub fn to_xml(&self) -> VerdantResult<String> {
        to_string(self).map_err(|e| VerdantError::XmlParsing(e.to_string()))
    }

    pub fn from_xml(xml: &str) -> VerdantResult<Self> {
        from_str(xml).map_err(|e| VerdantError::XmlParsing(e.to_string()))
    }
}

/// Export job lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed(_))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed(message) => write!(f, "FAILED: {}", message),
        }
    }
}

struct LocalState {
    status: Mutex<JobStatus>,
    changed: Condvar,
}

impl LocalState {
    fn set(&self, status: JobStatus) {
        let mut current = self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = status;
        self.changed.notify_all();
    }

    fn get(&self) -> JobStatus {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

enum JobBackend {
    Local {
        state: Arc<LocalState>,
        // Keeps the worker pool alive while the handle exists
        _runtime: Arc<tokio::runtime::Runtime>,
    },
    Remote {
        client: reqwest::blocking::Client,
        status_url: String,
        poll_interval: Duration,
        timeout: Duration,
    },
}

/// Handle to a submitted export. Dropping it does not cancel the job.
pub struct ExportJob {
    id: String,
    description: String,
    backend: JobBackend,
}

impl ExportJob {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> VerdantResult<JobStatus> {
        match &self.backend {
            JobBackend::Local { state, .. } => Ok(state.get()),
            JobBackend::Remote { client, status_url, .. } => {
                let response = client
                    .get(status_url.as_str())
                    .send()
                    .map_err(|e| VerdantError::Export(format!("Status request failed: {}", e)))?;
                let reply = read_job_reply(response)?;
                reply.status()
            }
        }
    }

    /// Block until the job finishes; a failed job is an `Export` error
    pub fn wait(&self) -> VerdantResult<()> {
        let status = match &self.backend {
            JobBackend::Local { state, .. } => {
                let mut status = state.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                while !status.is_terminal() {
                    status = state
                        .changed
                        .wait(status)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                status.clone()
            }
            JobBackend::Remote { poll_interval, timeout, .. } => {
                let started = Instant::now();
                loop {
                    let status = self.status()?;
                    if status.is_terminal() {
                        break status;
                    }
                    if started.elapsed() > *timeout {
                        return Err(VerdantError::Export(format!(
                            "Job {} still {} after {:?}",
                            self.id, status, timeout
                        )));
                    }
                    log::debug!("Job {} is {}, polling again", self.id, status);
                    std::thread::sleep(*poll_interval);
                }
            }
        };

        match status {
            JobStatus::Failed(message) => Err(VerdantError::Export(format!(
                "Export '{}' (job {}) failed: {}",
                self.description, self.id, message
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ExportJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match &self.backend {
            JobBackend::Local { .. } => "local".to_string(),
            JobBackend::Remote { status_url, .. } => status_url.clone(),
        };
        f.debug_struct("ExportJob")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("backend", &backend)
            .finish()
    }
}

/// Destination of raster exports
pub trait ExportSink {
    /// Validate and enqueue an export. Returns once the job is accepted;
    /// execution errors surface through the job handle.
    fn submit(&self, request: ExportRequest) -> VerdantResult<ExportJob>;
}

/// Writes exports under a local directory on a background worker pool.
///
/// Each job produces `<root>/<folder>/<prefix>.bin` (f32 little-endian,
/// NaN for no data, `.bin.gz` when compressed) and `<prefix>.xml`.
/// With a quota, each accepted job holds its raster size until it
/// completes; a job that fails gives the bytes back.
pub struct LocalExportSink {
    root: PathBuf,
    compress: bool,
    quota_bytes: Option<u64>,
    // Bytes held by accepted jobs; failed jobs hand theirs back
    reserved_bytes: Arc<Mutex<u64>>,
    counter: AtomicU64,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl LocalExportSink {
    pub fn new<P: AsRef<Path>>(root: P) -> VerdantResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(4)
            .thread_name("verdant-export")
            .build()?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            compress: false,
            quota_bytes: None,
            reserved_bytes: Arc::new(Mutex::new(0)),
            counter: AtomicU64::new(0),
            runtime: Arc::new(runtime),
        })
    }

    /// Sink rooted at the platform data directory (`<data_dir>/verdant/exports`)
    pub fn with_default_root() -> VerdantResult<Self> {
        let root = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| VerdantError::Export("No data or home directory available".to_string()))?
            .join("verdant")
            .join("exports");
        Self::new(root)
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Limit the total bytes this sink will accept across submissions
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn reserve(&self, bytes: u64) -> VerdantResult<()> {
        let mut reserved = self.reserved_bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(quota) = self.quota_bytes {
            if *reserved + bytes > quota {
                return Err(VerdantError::Export(format!(
                    "quota exceeded: export needs {} bytes, {} of {} remaining",
                    bytes,
                    quota.saturating_sub(*reserved),
                    quota
                )));
            }
        }
        *reserved += bytes;
        Ok(())
    }

    /// Bytes currently held against the quota
    pub fn reserved_bytes(&self) -> u64 {
        *self.reserved_bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}_{:04}", Utc::now().format("%Y%m%dT%H%M%S"), n)
    }
}

fn release(reserved: &Mutex<u64>, bytes: u64) {
    let mut reserved = reserved.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *reserved = reserved.saturating_sub(bytes);
}

fn write_local_export(request: &ExportRequest, dir: &Path, compress: bool) -> VerdantResult<u64> {
    let (grid, band) = request.rasterize()?;
    let data_name = if compress {
        format!("{}.bin.gz", request.file_name_prefix)
    } else {
        format!("{}.bin", request.file_name_prefix)
    };
    let written = write_band_file(dir.join(data_name), &band, SampleFormat::F32, None, compress)?;

    let header = ExportHeader::new(request, grid, &band, compress).to_xml()?;
    std::fs::write(dir.join(format!("{}.xml", request.file_name_prefix)), &header)?;
    Ok(written + header.len() as u64)
}

impl ExportSink for LocalExportSink {
    fn submit(&self, request: ExportRequest) -> VerdantResult<ExportJob> {
        let estimated_pixels = request.validate()?;

        let dir = self.root.join(&request.folder);
        std::fs::create_dir_all(&dir).map_err(|e| {
            VerdantError::Export(format!("Destination {} is unusable: {}", dir.display(), e))
        })?;

        let reservation = estimated_pixels * BYTES_PER_SAMPLE;
        self.reserve(reservation)?;

        let id = self.next_id();
        let description = request.description.clone();
        log::info!(
            "Submitting export '{}' as job {} ({} pixels) to {}",
            description,
            id,
            estimated_pixels,
            dir.display()
        );

        let state = Arc::new(LocalState {
            status: Mutex::new(JobStatus::Pending),
            changed: Condvar::new(),
        });
        let worker_state = Arc::clone(&state);
        let reserved = Arc::clone(&self.reserved_bytes);
        let compress = self.compress;
        let job_id = id.clone();
        // Detached: the handle reports completion through the shared state
        let _ = self.runtime.spawn_blocking(move || {
            worker_state.set(JobStatus::Running);
            match write_local_export(&request, &dir, compress) {
                Ok(bytes) => {
                    log::info!("Export job {} completed ({} bytes)", job_id, bytes);
                    worker_state.set(JobStatus::Completed);
                }
                Err(e) => {
                    log::warn!("Export job {} failed: {}", job_id, e);
                    release(&reserved, reservation);
                    worker_state.set(JobStatus::Failed(e.to_string()));
                }
            }
        });

        Ok(ExportJob {
            id,
            description,
            backend: JobBackend::Local {
                state,
                _runtime: Arc::clone(&self.runtime),
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "job")]
struct JobReply {
    id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl JobReply {
    fn status(&self) -> VerdantResult<JobStatus> {
        match self.state.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("PENDING") | Some("READY") => Ok(JobStatus::Pending),
            Some("RUNNING") => Ok(JobStatus::Running),
            Some("COMPLETED") => Ok(JobStatus::Completed),
            Some("FAILED") | Some("CANCELLED") => Ok(JobStatus::Failed(
                self.message.clone().unwrap_or_else(|| "no message".to_string()),
            )),
            Some(other) => Err(VerdantError::InvalidFormat(format!(
                "Unknown job state '{}' for job {}",
                other, self.id
            ))),
        }
    }
}

fn check_response(response: reqwest::blocking::Response, url: &str) -> VerdantResult<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        403 | 429 => Err(VerdantError::Export(format!(
            "quota exceeded (HTTP {}) at {}",
            status.as_u16(),
            url
        ))),
        code => Err(VerdantError::Export(format!(
            "HTTP {} {}: {}",
            code,
            status.canonical_reason().unwrap_or(""),
            url
        ))),
    }
}

fn read_job_reply(response: reqwest::blocking::Response) -> VerdantResult<JobReply> {
    let url = response.url().to_string();
    let response = check_response(response, &url)?;
    let body = response
        .text()
        .map_err(|e| VerdantError::Export(format!("Failed to read response body: {}", e)))?;
    from_str(&body).map_err(|e| VerdantError::XmlParsing(format!("Job reply from {}: {}", url, e)))
}

/// Submits exports to a remote job service.
///
/// The descriptor is POSTed as XML to `{endpoint}/exports`; the service
/// replies `<job><id>..</id></job>`, the f32 payload is PUT to
/// `{endpoint}/exports/{id}/data` and the job is polled at
/// `{endpoint}/exports/{id}`.
pub struct HttpExportSink {
    endpoint: String,
    client: reqwest::blocking::Client,
    poll_interval: Duration,
    timeout: Duration,
}

impl HttpExportSink {
    pub fn new(endpoint: &str) -> VerdantResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("verdant/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VerdantError::Export(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(3600),
        })
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ExportSink for HttpExportSink {
    fn submit(&self, request: ExportRequest) -> VerdantResult<ExportJob> {
        let estimated_pixels = request.validate()?;
        log::info!(
            "Submitting export '{}' ({} pixels) to {}",
            request.description,
            estimated_pixels,
            self.endpoint
        );

        let (grid, band) = request.rasterize()?;
        let descriptor = ExportHeader::new(&request, grid, &band, false).to_xml()?;

        let create_url = format!("{}/exports", self.endpoint);
        let response = self
            .client
            .post(create_url.as_str())
            .header("Content-Type", "application/xml")
            .body(descriptor)
            .send()
            .map_err(|e| VerdantError::Export(format!("HTTP request to {} failed: {}", create_url, e)))?;
        let reply = read_job_reply(response)?;
        log::debug!("Job service accepted '{}' as job {}", request.description, reply.id);

        let data_url = format!("{}/exports/{}/data", self.endpoint, reply.id);
        let payload = encode_band(&band, SampleFormat::F32, None);
        log::debug!("Uploading {} bytes to {}", payload.len(), data_url);
        // From here on the job exists remotely; errors carry its id
        self.client
            .put(data_url.as_str())
            .header("Content-Type", "application/octet-stream")
            .body(payload)
            .send()
            .map_err(|e| VerdantError::Export(format!("Upload to {} failed: {}", data_url, e)))
            .and_then(|response| check_response(response, &data_url))
            .map_err(|e| {
                log::warn!("Job {} was created but its data upload failed", reply.id);
                match e {
                    VerdantError::Export(message) => {
                        VerdantError::Export(format!("job {} left without data: {}", reply.id, message))
                    }
                    other => other,
                }
            })?;

        let status_url = format!("{}/exports/{}", self.endpoint, reply.id);
        Ok(ExportJob {
            id: reply.id,
            description: request.description,
            backend: JobBackend::Remote {
                client: self.client.clone(),
                status_url,
                poll_interval: self.poll_interval,
                timeout: self.timeout,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageProperties;
    use crate::types::{GeoTransform, METERS_PER_DEGREE};

    fn request(prefix: &str, crs: &str) -> ExportRequest {
        let grid = GeoGrid::new(GeoTransform::north_up(0.0, 1.0, 0.1, -0.1), 10, 10);
        let image = Image::new(grid, vec![Band::constant("NDVI_Difference", (10, 10), 0.15)], ImageProperties::default())
            .unwrap();
        ExportRequest {
            image,
            description: "NDVI_Difference_2024_minus_2020".to_string(),
            folder: "LULC".to_string(),
            file_name_prefix: prefix.to_string(),
            region: Roi::rectangle(0.0, 0.0, 1.0, 1.0).unwrap(),
            scale: METERS_PER_DEGREE / 10.0,
            crs: crs.to_string(),
            max_pixels: 1_000,
        }
    }

    #[test]
    fn test_descriptor_validation() {
        assert_eq!(request("NDVI_Diff_2024_2020", "EPSG:4326").validate().unwrap(), 100);
        assert!(matches!(
            request("bad prefix/..", "EPSG:4326").validate(),
            Err(VerdantError::InvalidInput(_))
        ));
        assert!(matches!(request("ok", "WGS84").validate(), Err(VerdantError::InvalidInput(_))));
        assert!(matches!(request("ok", "EPSG:32645").validate(), Err(VerdantError::InvalidInput(_))));

        let mut too_fine = request("ok", "EPSG:4326");
        too_fine.scale = 10.0;
        assert!(matches!(too_fine.validate(), Err(VerdantError::ResourceLimit { .. })));
    }

    #[test]
    fn test_rasterize_masks_outside_region() {
        let mut req = request("ok", "EPSG:4326");
        req.region = Roi::from_vertices(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]).unwrap();
        let (grid, band) = req.rasterize().unwrap();
        assert_eq!(grid.shape(), (10, 10));
        assert_eq!(band.get(9, 0), Some(0.15)); // south-west corner, inside
        assert_eq!(band.get(0, 9), None); // north-east corner, outside
    }

    #[test]
    fn test_header_xml_round_trip() {
        let req = request("NDVI_Diff_2024_2020", "EPSG:4326");
        let (grid, band) = req.rasterize().unwrap();
        let header = ExportHeader::new(&req, grid, &band, true);
        let parsed = ExportHeader::from_xml(&header.to_xml().unwrap()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.valid_pixels, 100);
    }

    #[test]
    fn test_job_reply_states() {
        let reply: JobReply = from_str("<job><id>42</id><state>running</state></job>").unwrap();
        assert_eq!(reply.status().unwrap(), JobStatus::Running);
        let reply: JobReply = from_str("<job><id>42</id><state>FAILED</state><message>disk full</message></job>").unwrap();
        assert_eq!(reply.status().unwrap(), JobStatus::Failed("disk full".to_string()));
        let reply: JobReply = from_str("<job><id>42</id></job>").unwrap();
        assert_eq!(reply.status().unwrap(), JobStatus::Pending);
    }
}
