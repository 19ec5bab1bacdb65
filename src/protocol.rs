//! Messages exchanged between the rendering surface and the engine.

use crate::speedtest::{RateReport, RunConfig, TestPhase};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Begin a run if none is active.
    Start(RunConfig),
    /// Request cancellation of the active run.
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Status(TestPhase),
    /// Final latency estimate in milliseconds.
    Ping(f64),
    Download(RateReport),
    Upload(RateReport),
    Error(String),
}

impl Notification {
    /// True for the status that ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Notification::Status(phase) if phase.is_terminal())
    }
}

/// Identifies the run a notification belongs to.
pub type RunId = u64;

/// A notification tagged with the run that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub run: RunId,
    pub notification: Notification,
}
