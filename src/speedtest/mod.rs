pub mod download;
pub mod error;
pub mod orchestrator;
pub mod ping;
pub mod stats;
pub mod throughput;
pub mod upload;

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Url;

pub use error::ProbeError;
pub use stats::RateReport;

/// Number of parallel transfer lanes per throughput phase.
pub const CONCURRENCY: usize = 6;
/// Sequential round trips taken by the latency sampler.
pub const PING_SAMPLES: usize = 10;
pub const PING_INTERVAL: Duration = Duration::from_millis(100);
pub const PHASE_DURATION: Duration = Duration::from_secs(10);
/// Size of the pseudo-random buffer every upload lane sends.
pub const UPLOAD_PAYLOAD_SIZE: usize = 2 * 1024 * 1024;
/// Body slice size handed to the transport; each slice is one progress increment.
pub const UPLOAD_SLICE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    /// Reserved; nothing computes jitter yet.
    pub jitter_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestPhase {
    #[default]
    Idle,
    Ping,
    Download,
    Upload,
    Done,
    Aborted,
    Error,
}

impl TestPhase {
    /// Done, Aborted and Error absorb the run; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, TestPhase::Done | TestPhase::Aborted | TestPhase::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestPhase::Idle => "idle",
            TestPhase::Ping => "ping",
            TestPhase::Download => "download",
            TestPhase::Upload => "upload",
            TestPhase::Done => "done",
            TestPhase::Aborted => "aborted",
            TestPhase::Error => "error",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => f.write_str("download"),
            Direction::Upload => f.write_str("upload"),
        }
    }
}

/// Endpoints of the three collaborator services for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub ping_url: String,
    pub download_url: String,
    pub upload_url: String,
}

impl RunConfig {
    pub fn new(
        ping_url: impl Into<String>,
        download_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            ping_url: ping_url.into(),
            download_url: download_url.into(),
            upload_url: upload_url.into(),
        }
    }

    /// Endpoints exposed by `netgauge serve` under `base`.
    pub fn from_server(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self::new(
            format!("{base}/api/test/head"),
            format!("{base}/api/test/download"),
            format!("{base}/api/test/upload"),
        )
    }
}

/// Fixed engine constants. Only tests and embedders change these.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub ping_samples: usize,
    pub ping_interval: Duration,
    pub phase_duration: Duration,
    pub concurrency: usize,
    pub upload_payload_size: usize,
    pub upload_slice_size: usize,
    /// Minimum gap between two rate reports; `None` reports on every increment.
    pub min_report_interval: Option<Duration>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            ping_samples: PING_SAMPLES,
            ping_interval: PING_INTERVAL,
            phase_duration: PHASE_DURATION,
            concurrency: CONCURRENCY,
            upload_payload_size: UPLOAD_PAYLOAD_SIZE,
            upload_slice_size: UPLOAD_SLICE_SIZE,
            min_report_interval: None,
        }
    }
}

/// Parses `endpoint` and appends a `t=<unix-millis>-<tag>` cache-busting pair.
pub fn cache_busted(endpoint: &str, tag: usize) -> Result<Url, ProbeError> {
    let mut url = parse_endpoint(endpoint)?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    url.query_pairs_mut()
        .append_pair("t", &format!("{millis}-{tag}"));
    Ok(url)
}

pub fn parse_endpoint(endpoint: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(endpoint).map_err(|e| ProbeError::InvalidEndpoint {
        url: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProbeError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}
