//! The boundary object a rendering surface drives.
//!
//! [`SpeedTest`] runs the orchestrator on its own OS thread with a private
//! tokio runtime. Commands go over one channel, tagged notifications come back
//! over another, in order. No mutable state is shared across the boundary.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::{Command, Envelope, Notification, RunId};
use crate::speedtest::orchestrator::{Orchestrator, Run};
use crate::speedtest::{RateReport, RunConfig, TestPhase, Tuning};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a speed test is already running")]
    AlreadyRunning,

    #[error("engine worker is no longer available")]
    WorkerUnavailable,

    #[error("failed to start engine worker: {0}")]
    Runtime(#[from] std::io::Error),
}

enum WorkerMessage {
    Command(RunId, Command),
    WaitStopped(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Default)]
struct Callbacks {
    status: Option<Box<dyn FnMut(TestPhase)>>,
    ping: Option<Box<dyn FnMut(f64)>>,
    download: Option<Box<dyn FnMut(RateReport)>>,
    upload: Option<Box<dyn FnMut(RateReport)>>,
    error: Option<Box<dyn FnMut(&str)>>,
}

impl Callbacks {
    fn fire(&mut self, notification: &Notification) {
        match notification {
            Notification::Status(phase) => {
                if let Some(cb) = self.status.as_mut() {
                    cb(*phase);
                }
            }
            Notification::Ping(ms) => {
                if let Some(cb) = self.ping.as_mut() {
                    cb(*ms);
                }
            }
            Notification::Download(report) => {
                if let Some(cb) = self.download.as_mut() {
                    cb(*report);
                }
            }
            Notification::Upload(report) => {
                if let Some(cb) = self.upload.as_mut() {
                    cb(*report);
                }
            }
            Notification::Error(message) => {
                if let Some(cb) = self.error.as_mut() {
                    cb(message);
                }
            }
        }
    }
}

/// Engine facade with fluent callback registration.
///
/// Not meant to be shared: one owner issues `start` and `abort` and pumps
/// notifications with [`SpeedTest::dispatch`], [`SpeedTest::try_next`] or
/// [`SpeedTest::recv`].
pub struct SpeedTest {
    commands: mpsc::UnboundedSender<WorkerMessage>,
    notifications: mpsc::UnboundedReceiver<Envelope>,
    callbacks: Callbacks,
    current: RunId,
    running: bool,
    phase: TestPhase,
    worker: Option<thread::JoinHandle<()>>,
}

impl SpeedTest {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_tuning(Tuning::default())
    }

    /// Spawns the worker thread and waits until its runtime is up.
    ///
    /// The runtime is built and dropped on the worker thread only, so the
    /// facade can be created and torn down from inside another runtime.
    pub fn with_tuning(tuning: Tuning) -> Result<Self, EngineError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (note_tx, note_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let worker = thread::Builder::new()
            .name("netgauge-engine".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("netgauge-lane")
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                runtime.block_on(worker_loop(tuning, command_rx, note_tx));
            })?;

        ready_rx
            .recv()
            .map_err(|_| EngineError::WorkerUnavailable)??;

        Ok(Self {
            commands: command_tx,
            notifications: note_rx,
            callbacks: Callbacks::default(),
            current: 0,
            running: false,
            phase: TestPhase::Idle,
            worker: Some(worker),
        })
    }

    pub fn on_status(mut self, cb: impl FnMut(TestPhase) + 'static) -> Self {
        self.callbacks.status = Some(Box::new(cb));
        self
    }

    pub fn on_ping(mut self, cb: impl FnMut(f64) + 'static) -> Self {
        self.callbacks.ping = Some(Box::new(cb));
        self
    }

    pub fn on_download(mut self, cb: impl FnMut(RateReport) + 'static) -> Self {
        self.callbacks.download = Some(Box::new(cb));
        self
    }

    pub fn on_upload(mut self, cb: impl FnMut(RateReport) + 'static) -> Self {
        self.callbacks.upload = Some(Box::new(cb));
        self
    }

    pub fn on_error(mut self, cb: impl FnMut(&str) + 'static) -> Self {
        self.callbacks.error = Some(Box::new(cb));
        self
    }

    /// Phase of the latest run, as of the last notification pumped.
    pub fn phase(&self) -> TestPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts a run. Fails with [`EngineError::AlreadyRunning`] while one is active.
    pub fn start(&mut self, config: RunConfig) -> Result<(), EngineError> {
        if self.running {
            return Err(EngineError::AlreadyRunning);
        }
        let run = self.current + 1;
        self.send(WorkerMessage::Command(run, Command::Start(config)))?;
        self.current = run;
        self.running = true;
        self.phase = TestPhase::Idle;
        Ok(())
    }

    /// Requests cancellation of the active run.
    ///
    /// Returns without waiting for in-flight transfers to unwind; the
    /// `Aborted` status follows through the notification channel. Commands
    /// are ordered, so a `start` issued right after is accepted.
    pub fn abort(&mut self) -> Result<(), EngineError> {
        self.send(WorkerMessage::Command(self.current, Command::Abort))?;
        self.running = false;
        Ok(())
    }

    /// Resolves once the latest run's task has fully unwound.
    pub async fn wait_stopped(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(WorkerMessage::WaitStopped(tx))?;
        rx.await.map_err(|_| EngineError::WorkerUnavailable)
    }

    /// Fires callbacks for every pending notification and returns how many there were.
    pub fn dispatch(&mut self) -> usize {
        let mut count = 0;
        while self.try_next().is_some() {
            count += 1;
        }
        count
    }

    /// Takes one pending notification, if any, after firing its callback.
    pub fn try_next(&mut self) -> Option<Notification> {
        let envelope = self.notifications.try_recv().ok()?;
        Some(self.deliver(envelope))
    }

    /// Waits for the next notification and fires its callback.
    ///
    /// Returns `None` once the worker has gone away.
    pub async fn recv(&mut self) -> Option<Notification> {
        let envelope = self.notifications.recv().await?;
        Some(self.deliver(envelope))
    }

    /// Stops the worker thread, cancelling any active run.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn deliver(&mut self, envelope: Envelope) -> Notification {
        if envelope.run == self.current {
            if let Notification::Status(phase) = &envelope.notification {
                self.phase = *phase;
                if phase.is_terminal() {
                    self.running = false;
                }
            }
        }
        self.callbacks.fire(&envelope.notification);
        envelope.notification
    }

    fn send(&self, message: WorkerMessage) -> Result<(), EngineError> {
        self.commands
            .send(message)
            .map_err(|_| EngineError::WorkerUnavailable)
    }

    fn stop_worker(&mut self) {
        let _ = self.commands.send(WorkerMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("engine worker panicked");
            }
        }
    }
}

impl Drop for SpeedTest {
    fn drop(&mut self) {
        // Detach instead of joining; the worker exits on its own once told to.
        let _ = self.commands.send(WorkerMessage::Shutdown);
    }
}

async fn worker_loop(
    tuning: Tuning,
    mut commands: mpsc::UnboundedReceiver<WorkerMessage>,
    notifications: mpsc::UnboundedSender<Envelope>,
) {
    let orchestrator = Arc::new(Orchestrator::new(tuning));
    let mut active: Option<Arc<Run>> = None;

    while let Some(message) = commands.recv().await {
        match message {
            WorkerMessage::Command(id, Command::Start(config)) => {
                if let Some(run) = active.as_ref().filter(|run| !run.phase().is_terminal()) {
                    warn!(active = run.id(), rejected = id, "start ignored, a run is already active");
                    continue;
                }
                debug!(run = id, ?config, "starting run");
                let run = Run::new(id, notifications.clone());
                let orchestrator = orchestrator.clone();
                let task_run = run.clone();
                tokio::spawn(async move { orchestrator.execute(config, task_run).await });
                active = Some(run);
            }
            WorkerMessage::Command(id, Command::Abort) => match &active {
                Some(run) if run.id() == id => {
                    if run.abort() {
                        debug!(run = id, "abort requested");
                    }
                }
                _ => debug!(run = id, "abort ignored, no such run"),
            },
            WorkerMessage::WaitStopped(reply) => {
                let run = active.clone();
                tokio::spawn(async move {
                    if let Some(run) = run {
                        run.stopped().await;
                    }
                    let _ = reply.send(());
                });
            }
            WorkerMessage::Shutdown => {
                if let Some(run) = &active {
                    run.abort();
                }
                break;
            }
        }
    }
}
