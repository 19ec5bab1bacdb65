//! Client-driven network latency and throughput estimator.
//!
//! The [`speedtest`] module holds the measurement engine; [`engine::SpeedTest`]
//! is the facade a rendering surface drives through the messages in
//! [`protocol`].

pub mod config;
pub mod engine;
pub mod logging;
pub mod protocol;
pub mod serve;
pub mod speedtest;

pub use engine::{EngineError, SpeedTest};
pub use protocol::{Command, Notification};
pub use speedtest::{RateReport, RunConfig, TestPhase, Tuning};
