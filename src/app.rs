use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use netgauge::speedtest::{RateReport, SpeedTestResult};
use netgauge::{Notification, RunConfig, TestPhase};
use std::time::Duration;

/// Chart points kept per direction: one per half percent of the phase.
const CHART_STEP: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

/// Rate history of one direction, sampled by phase progress.
#[derive(Debug, Default)]
pub struct RateTrace {
    pub samples: Vec<f64>,
    pub progress: f64,
    pub current_mbps: f64,
    last_charted: Option<f64>,
}

impl RateTrace {
    fn record(&mut self, report: RateReport) {
        self.current_mbps = report.mbps;
        self.progress = self.progress.max(report.progress);
        let due = match self.last_charted {
            None => true,
            Some(last) => report.progress - last >= CHART_STEP || report.progress >= 1.0,
        };
        if due {
            self.samples.push(report.mbps);
            self.last_charted = Some(report.progress);
        }
    }
}

pub struct App {
    pub phase: TestPhase,
    /// Last measuring phase entered; tells which step an abort or error hit.
    pub reached: Option<TestPhase>,
    pub result: SpeedTestResult,
    pub error: Option<String>,
    pub endpoints: RunConfig,
    pub should_quit: bool,

    pub selected_panel: Panel,
    pub expanded: bool,

    pub download: RateTrace,
    pub upload: RateTrace,
}

impl App {
    pub fn new(endpoints: RunConfig) -> Self {
        Self {
            phase: TestPhase::Idle,
            reached: None,
            result: SpeedTestResult::default(),
            error: None,
            endpoints,
            should_quit: false,
            selected_panel: Panel::Download,
            expanded: false,
            download: RateTrace::default(),
            upload: RateTrace::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, TestPhase::Ping | TestPhase::Download | TestPhase::Upload)
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if !self.is_active() {
                    Some(AppAction::StartTest)
                } else {
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.is_active() {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = TestPhase::Idle;
        self.reached = None;
        self.result = SpeedTestResult::default();
        self.error = None;
        self.download = RateTrace::default();
        self.upload = RateTrace::default();
        self.expanded = false;
    }

    pub fn apply(&mut self, notification: Notification) {
        match notification {
            Notification::Status(phase) => {
                if matches!(phase, TestPhase::Ping | TestPhase::Download | TestPhase::Upload) {
                    self.reached = Some(phase);
                }
                self.phase = phase;
            }
            Notification::Ping(ms) => self.result.ping_ms = ms,
            Notification::Download(report) => {
                self.download.record(report);
                self.result.download_mbps = report.mbps;
            }
            Notification::Upload(report) => {
                self.upload.record(report);
                self.result.upload_mbps = report.mbps;
            }
            Notification::Error(message) => self.error = Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyModifiers};

    fn app() -> App {
        App::new(RunConfig::from_server("http://127.0.0.1:8080"))
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn enter_starts_only_when_idle_or_finished() {
        let mut app = app();
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), Some(AppAction::StartTest));

        app.apply(Notification::Status(TestPhase::Download));
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), None);
        assert!(app.expanded);
        app.expanded = false;
        assert_eq!(app.handle_key_event(press(KeyCode::Esc)), Some(AppAction::CancelTest));

        app.apply(Notification::Status(TestPhase::Aborted));
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), Some(AppAction::StartTest));
    }

    #[test]
    fn notifications_update_results() {
        let mut app = app();
        app.apply(Notification::Ping(12.5));
        app.apply(Notification::Download(RateReport { mbps: 80.0, progress: 0.2 }));
        app.apply(Notification::Upload(RateReport { mbps: 20.0, progress: 0.1 }));
        app.apply(Notification::Error("sink went away".into()));

        assert_eq!(app.result.ping_ms, 12.5);
        assert_eq!(app.result.download_mbps, 80.0);
        assert_eq!(app.result.upload_mbps, 20.0);
        assert_eq!(app.result.jitter_ms, None);
        assert_eq!(app.error.as_deref(), Some("sink went away"));

        app.reset_for_new_test();
        assert!(app.error.is_none());
        assert!(app.download.samples.is_empty());
    }

    #[test]
    fn chart_is_sampled_by_progress() {
        let mut trace = RateTrace::default();
        for i in 0..1000 {
            trace.record(RateReport {
                mbps: i as f64,
                progress: i as f64 / 2000.0,
            });
        }
        // 1000 reports over half the phase, one chart point per 0.5%.
        assert!((80..=101).contains(&trace.samples.len()));
        assert_eq!(trace.current_mbps, 999.0);

        trace.record(RateReport { mbps: 5.0, progress: 1.0 });
        assert_eq!(trace.progress, 1.0);
        assert_eq!(trace.samples.last(), Some(&5.0));
    }
}
