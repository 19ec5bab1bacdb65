use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::stats::{Meter, ReportFn};
use super::{download, parse_endpoint, upload, Direction, ProbeError, Tuning};

/// Drives `concurrency` transfer lanes against one endpoint for a fixed duration.
pub struct ThroughputTest {
    direction: Direction,
    tuning: Tuning,
}

#[derive(Debug, Clone)]
pub struct ThroughputResult {
    pub bytes: u64,
    pub elapsed: Duration,
    pub mbps: f64,
}

impl ThroughputTest {
    pub fn new(direction: Direction, tuning: &Tuning) -> Self {
        Self {
            direction,
            tuning: tuning.clone(),
        }
    }

    /// Runs the phase until the duration elapses or `token` is cancelled.
    ///
    /// Every transferred increment produces a report through `on_report`; a
    /// final report is produced once all lanes have joined.
    pub async fn run(
        &self,
        endpoint: &str,
        token: &CancellationToken,
        on_report: Arc<ReportFn>,
    ) -> Result<ThroughputResult, ProbeError> {
        parse_endpoint(endpoint)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ProbeError::Client)?;

        let payload = match self.direction {
            Direction::Upload => Some(upload::random_payload(self.tuning.upload_payload_size)),
            Direction::Download => None,
        };

        let meter = Arc::new(Meter::new(
            self.tuning.phase_duration,
            self.tuning.min_report_interval,
            on_report,
        ));

        let mut lanes = JoinSet::new();
        for lane in 0..self.tuning.concurrency {
            let client = client.clone();
            let endpoint = endpoint.to_string();
            let meter = meter.clone();
            let token = token.clone();
            match &payload {
                Some(payload) => {
                    let payload = payload.clone();
                    let slice = self.tuning.upload_slice_size;
                    lanes.spawn(async move {
                        upload::upload_lane(&client, &endpoint, lane, payload, slice, &meter, &token).await
                    });
                }
                None => {
                    lanes.spawn(async move {
                        download::download_lane(&client, &endpoint, lane, &meter, &token).await
                    });
                }
            }
        }

        while let Some(joined) = lanes.join_next().await {
            match joined {
                Ok(Ok(())) | Ok(Err(ProbeError::Cancelled)) => {}
                Ok(Err(e)) => debug!(direction = %self.direction, error = %e, "lane ended with error"),
                Err(e) => error!(direction = %self.direction, error = %e, "lane task failed"),
            }
        }

        let report = meter.finish();
        if token.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        Ok(ThroughputResult {
            bytes: meter.bytes(),
            elapsed: meter.elapsed(),
            mbps: report.map(|r| r.mbps).unwrap_or(0.0),
        })
    }
}

/// Whether a lane should start another transfer.
pub(super) fn lane_should_continue(meter: &Meter, token: &CancellationToken) -> bool {
    !meter.expired() && !token.is_cancelled()
}

/// Awaits `fut` unless the run is cancelled or the phase deadline passes first.
///
/// `Ok(None)` means the deadline won; the future is dropped, which cancels the
/// in-flight request or body read.
pub(super) async fn bounded<F: Future>(
    meter: &Meter,
    token: &CancellationToken,
    fut: F,
) -> Result<Option<F::Output>, ProbeError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ProbeError::Cancelled),
        _ = tokio::time::sleep_until(meter.deadline().into()) => Ok(None),
        out = fut => Ok(Some(out)),
    }
}

/// Retries transient failures; only cancellation leaves the lane early.
pub(super) fn absorb(direction: Direction, lane: usize, result: Result<(), ProbeError>) -> Result<(), ProbeError> {
    match result {
        Err(ProbeError::Cancelled) => Err(ProbeError::Cancelled),
        Err(e) => {
            debug!(%direction, lane, error = %e, "transient transfer error");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::RateReport;
    use std::sync::Mutex;
    use std::time::Instant;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn short_tuning() -> Tuning {
        Tuning {
            phase_duration: Duration::from_millis(600),
            concurrency: 3,
            upload_payload_size: 256 * 1024,
            upload_slice_size: 16 * 1024,
            ..Tuning::default()
        }
    }

    fn collector() -> (Arc<ReportFn>, Arc<Mutex<Vec<RateReport>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        (Arc::new(move |r: RateReport| sink.lock().unwrap().push(r)), reports)
    }

    #[tokio::test]
    async fn download_counts_bytes_and_reports() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 512 * 1024]))
            .mount(&server)
            .await;

        let (on_report, reports) = collector();
        let test = ThroughputTest::new(Direction::Download, &short_tuning());
        let result = test
            .run(&server.uri(), &CancellationToken::new(), on_report)
            .await
            .unwrap();

        assert!(result.bytes > 0);
        assert!(result.mbps > 0.0);
        let reports = reports.lock().unwrap();
        assert!(reports.len() >= 2);
        assert!(reports.iter().all(|r| (0.0..=1.0).contains(&r.progress)));
        assert_eq!(reports.last().unwrap().progress, 1.0);
    }

    #[tokio::test]
    async fn upload_reports_partial_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (on_report, reports) = collector();
        let test = ThroughputTest::new(Direction::Upload, &short_tuning());
        let result = test
            .run(&server.uri(), &CancellationToken::new(), on_report)
            .await
            .unwrap();

        assert!(result.bytes > 0);
        // 16 KiB slices of a 256 KiB payload: many reports per request.
        assert!(reports.lock().unwrap().len() > 16);
    }

    #[tokio::test]
    async fn unreachable_sink_runs_to_the_deadline_without_failing() {
        // Nothing listens on a freshly released port.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let (on_report, _reports) = collector();
        let tuning = short_tuning();
        let test = ThroughputTest::new(Direction::Upload, &tuning);
        let started = Instant::now();
        let result = test
            .run(&format!("http://{addr}/upload"), &CancellationToken::new(), on_report)
            .await
            .unwrap();

        assert_eq!(result.bytes, 0);
        assert!(started.elapsed() >= tuning.phase_duration);
        assert!(started.elapsed() < tuning.phase_duration + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_stops_lanes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 1024])
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let (on_report, _reports) = collector();
        let tuning = Tuning {
            phase_duration: Duration::from_secs(30),
            ..short_tuning()
        };
        let started = Instant::now();
        let err = ThroughputTest::new(Direction::Download, &tuning)
            .run(&server.uri(), &token, on_report)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn progress_never_goes_backwards_across_worker_threads() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, crate::serve::router()).await.unwrap() });

        let tuning = Tuning {
            phase_duration: Duration::from_millis(800),
            concurrency: 6,
            upload_payload_size: 256 * 1024,
            upload_slice_size: 4 * 1024,
            ..Tuning::default()
        };
        for (direction, path) in [
            (Direction::Download, "/api/test/download"),
            (Direction::Upload, "/api/test/upload"),
        ] {
            let (on_report, reports) = collector();
            ThroughputTest::new(direction, &tuning)
                .run(&format!("http://{addr}{path}"), &CancellationToken::new(), on_report)
                .await
                .unwrap();

            let reports = reports.lock().unwrap();
            assert!(reports.len() > 1, "{direction}: too few reports");
            assert!(
                reports.windows(2).all(|w| w[1].progress >= w[0].progress),
                "{direction}: progress went backwards"
            );
        }
    }

    #[tokio::test]
    async fn invalid_endpoint_is_reported_up_front() {
        let (on_report, reports) = collector();
        let err = ThroughputTest::new(Direction::Download, &short_tuning())
            .run("::nonsense::", &CancellationToken::new(), on_report)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidEndpoint { .. }));
        assert!(reports.lock().unwrap().is_empty());
    }
}
