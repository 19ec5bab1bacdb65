use std::time::{Duration, Instant};

use reqwest::header::CACHE_CONTROL;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{cache_busted, ProbeError};

/// Sequential zero-body round trips against the echo service.
pub struct PingTest {
    samples: Vec<f64>,
    ping_count: usize,
    interval: Duration,
}

impl PingTest {
    pub fn new(ping_count: usize, interval: Duration) -> Self {
        Self {
            samples: Vec::with_capacity(ping_count),
            ping_count,
            interval,
        }
    }

    /// Takes `ping_count` samples and returns the lowest round-trip time in ms.
    ///
    /// Samples are spaced by `interval` so later ones don't ride an already
    /// warm keep-alive connection back to back. Any HTTP response is a
    /// completed round trip, whatever its status; only transport failures
    /// end the measurement.
    pub async fn run(&mut self, endpoint: &str, token: &CancellationToken) -> Result<f64, ProbeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ProbeError::Client)?;

        self.samples.clear();

        for i in 0..self.ping_count {
            if i > 0 {
                token
                    .run_until_cancelled(tokio::time::sleep(self.interval))
                    .await
                    .ok_or(ProbeError::Cancelled)?;
            }

            let url = cache_busted(endpoint, i)?;
            let start = Instant::now();
            let response = token
                .run_until_cancelled(client.head(url).header(CACHE_CONTROL, "no-store").send())
                .await
                .ok_or(ProbeError::Cancelled)??;
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;

            debug!(sample = i, rtt_ms = elapsed, status = %response.status(), "ping sample");
            self.samples.push(elapsed);
        }

        Ok(min_latency(&self.samples).unwrap_or(0.0))
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
}

/// The floor of the samples: the one least inflated by contention.
pub fn min_latency(samples: &[f64]) -> Option<f64> {
    samples.iter().copied().reduce(f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn min_of_samples() {
        let samples = [12.5, 9.1, 30.0, 9.3, 15.0, 11.0, 10.2, 9.9, 44.0, 13.3];
        assert_eq!(min_latency(&samples), Some(9.1));
        assert_eq!(min_latency(&[]), None);
        assert_eq!(min_latency(&[7.0]), Some(7.0));
    }

    #[tokio::test]
    async fn takes_every_sample_and_reports_the_minimum() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .expect(10)
            .mount(&server)
            .await;

        let mut test = PingTest::new(10, Duration::from_millis(1));
        let token = CancellationToken::new();
        let ping = test.run(&server.uri(), &token).await.unwrap();

        assert_eq!(test.samples().len(), 10);
        assert_eq!(Some(ping), min_latency(test.samples()));
        assert!(ping >= 0.0);
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let mut test = PingTest::new(10, Duration::from_millis(100));
        let err = test.run(&server.uri(), &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn error_status_still_counts_as_a_round_trip() {
        for status in [405, 503] {
            let server = MockServer::start().await;
            Mock::given(method("HEAD"))
                .respond_with(ResponseTemplate::new(status))
                .expect(4)
                .mount(&server)
                .await;

            let mut test = PingTest::new(4, Duration::from_millis(1));
            let ping = test.run(&server.uri(), &CancellationToken::new()).await.unwrap();
            assert_eq!(test.samples().len(), 4);
            assert_eq!(Some(ping), min_latency(test.samples()));
        }
    }

    #[tokio::test]
    async fn unreachable_echo_is_fatal() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let mut test = PingTest::new(3, Duration::from_millis(1));
        let err = test
            .run(&format!("http://{addr}/head"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Transport(_)));
    }
}
