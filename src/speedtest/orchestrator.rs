use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::ping::PingTest;
use super::stats::ReportFn;
use super::throughput::ThroughputTest;
use super::{Direction, ProbeError, RateReport, RunConfig, TestPhase, Tuning};
use crate::protocol::{Envelope, Notification, RunId};

/// State of a single run: its phase, its cancellation token and its outbox.
///
/// Every notification goes through the outbox under one lock, and the outbox
/// closes on the first terminal status. Whatever races an abort, nothing of
/// this run is delivered after its `Aborted`, `Done` or `Error`.
pub struct Run {
    id: RunId,
    token: CancellationToken,
    state: Mutex<RunState>,
    stopped: watch::Sender<bool>,
}

struct RunState {
    phase: TestPhase,
    outbox: Option<mpsc::UnboundedSender<Envelope>>,
}

impl Run {
    pub fn new(id: RunId, outbox: mpsc::UnboundedSender<Envelope>) -> Arc<Self> {
        Arc::new(Self {
            id,
            token: CancellationToken::new(),
            state: Mutex::new(RunState {
                phase: TestPhase::Idle,
                outbox: Some(outbox),
            }),
            stopped: watch::Sender::new(false),
        })
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn phase(&self) -> TestPhase {
        self.lock().phase
    }

    /// Cancels the run and announces `Aborted` right away.
    ///
    /// Cancellation is requested, not confirmed: in-flight requests unwind on
    /// their own. Use [`Run::stopped`] to wait for that. Returns `false` when
    /// the run had already ended.
    pub fn abort(&self) -> bool {
        self.token.cancel();
        self.transition(TestPhase::Aborted)
    }

    /// Resolves once the run's task has returned.
    pub async fn stopped(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, notification: Notification) -> bool {
        let state = self.lock();
        match &state.outbox {
            Some(tx) => {
                let _ = tx.send(Envelope {
                    run: self.id,
                    notification,
                });
                true
            }
            None => false,
        }
    }

    fn transition(&self, phase: TestPhase) -> bool {
        let mut state = self.lock();
        let Some(tx) = &state.outbox else {
            return false;
        };
        let _ = tx.send(Envelope {
            run: self.id,
            notification: Notification::Status(phase),
        });
        state.phase = phase;
        if phase.is_terminal() {
            state.outbox = None;
        }
        true
    }

    fn fail(&self, message: String) {
        let mut state = self.lock();
        let Some(tx) = state.outbox.take() else {
            return;
        };
        let _ = tx.send(Envelope {
            run: self.id,
            notification: Notification::Error(message),
        });
        let _ = tx.send(Envelope {
            run: self.id,
            notification: Notification::Status(TestPhase::Error),
        });
        state.phase = TestPhase::Error;
    }
}

/// Sequences ping, download and upload for one run.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    tuning: Tuning,
}

impl Orchestrator {
    pub fn new(tuning: Tuning) -> Self {
        Self { tuning }
    }

    pub async fn execute(&self, config: RunConfig, run: Arc<Run>) {
        match self.phases(&config, &run).await {
            Ok(()) => {
                run.transition(TestPhase::Done);
            }
            Err(e) if e.is_cancelled() => debug!(run = run.id(), "run cancelled"),
            Err(e) => {
                error!(run = run.id(), error = %e, "run failed");
                run.fail(e.to_string());
            }
        }
        run.stopped.send_replace(true);
    }

    async fn phases(&self, config: &RunConfig, run: &Arc<Run>) -> Result<(), ProbeError> {
        run.transition(TestPhase::Ping);
        let ping = PingTest::new(self.tuning.ping_samples, self.tuning.ping_interval)
            .run(&config.ping_url, run.token())
            .await?;
        info!(run = run.id(), ping_ms = ping, "latency measured");
        run.emit(Notification::Ping(ping));

        for direction in [Direction::Download, Direction::Upload] {
            let (phase, endpoint) = match direction {
                Direction::Download => (TestPhase::Download, &config.download_url),
                Direction::Upload => (TestPhase::Upload, &config.upload_url),
            };
            run.transition(phase);

            let reporter = run.clone();
            let on_report: Arc<ReportFn> = Arc::new(move |report: RateReport| {
                reporter.emit(match direction {
                    Direction::Download => Notification::Download(report),
                    Direction::Upload => Notification::Upload(report),
                });
            });

            let result = ThroughputTest::new(direction, &self.tuning)
                .run(endpoint, run.token(), on_report)
                .await?;
            info!(
                run = run.id(),
                %direction,
                mbps = result.mbps,
                bytes = result.bytes,
                "throughput measured"
            );
        }
        Ok(())
    }
}
