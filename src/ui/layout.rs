//! One row per measurement, or a detail view of the selected one.

use crate::app::{App, Panel, RateTrace};
use netgauge::TestPhase;
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Row, Sparkline, Table},
    Frame,
};

/// Rows in the order the run measures them.
const ROWS: [Panel; 3] = [Panel::Ping, Panel::Download, Panel::Upload];
const BAR_WIDTH: usize = 20;
const MUTED: Color = Color::DarkGray;

/// Where one measurement stands within the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Pending,
    Measuring,
    Measured,
    Aborted,
    Failed,
}

impl Step {
    fn label(self) -> &'static str {
        match self {
            Step::Pending => "pending",
            Step::Measuring => "measuring",
            Step::Measured => "measured",
            Step::Aborted => "aborted",
            Step::Failed => "failed",
        }
    }

    fn color(self) -> Color {
        match self {
            Step::Pending => MUTED,
            Step::Measuring => Color::Yellow,
            Step::Measured => Color::Green,
            Step::Aborted => Color::Gray,
            Step::Failed => Color::Red,
        }
    }
}

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let [title, body, footer, keys] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(6),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    frame.render_widget(Paragraph::new(title_line(app)), title);
    if app.expanded {
        draw_detail(frame, body, app);
    } else {
        draw_table(frame, body, app);
    }
    frame.render_widget(Paragraph::new(footer_line(app)), footer);
    frame.render_widget(
        Paragraph::new(key_hints(app)).style(Style::default().fg(MUTED)),
        keys,
    );
}

fn title_line(app: &App) -> Line<'static> {
    let (text, color) = match app.phase {
        TestPhase::Idle => ("ready", MUTED),
        TestPhase::Ping => ("measuring latency", Color::Yellow),
        TestPhase::Download => ("downloading", Color::Yellow),
        TestPhase::Upload => ("uploading", Color::Yellow),
        TestPhase::Done => ("finished", Color::Green),
        TestPhase::Aborted => ("aborted", Color::Gray),
        TestPhase::Error => ("failed", Color::Red),
    };
    Line::from(vec![
        Span::styled("netgauge", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(text, Style::default().fg(color)),
    ])
}

fn draw_table(frame: &mut Frame, area: Rect, app: &App) {
    let rows = ROWS.iter().map(|&panel| {
        let step = step(app, panel);
        let marker = if panel == app.selected_panel { "›" } else { " " };
        let row = Row::new(vec![
            Line::from(marker),
            Line::from(panel_name(panel)),
            Line::from(value_text(app, panel)),
            Line::from(bar(progress(app, panel))),
            Line::from(Span::styled(step.label(), Style::default().fg(step.color()))),
        ]);
        if panel == app.selected_panel {
            row.style(Style::default().add_modifier(Modifier::BOLD))
        } else {
            row
        }
    });

    let widths = [
        Constraint::Length(1),
        Constraint::Length(9),
        Constraint::Length(12),
        Constraint::Length(BAR_WIDTH as u16 + 5),
        Constraint::Min(9),
    ];
    let table = Table::new(rows, widths)
        .column_spacing(2)
        .header(Row::new(vec!["", "", "result", "progress", "state"]).style(Style::default().fg(MUTED)))
        .block(Block::default().borders(Borders::TOP).border_style(Style::default().fg(MUTED)));
    frame.render_widget(table, area);
}

fn draw_detail(frame: &mut Frame, area: Rect, app: &App) {
    let panel = app.selected_panel;
    let endpoint = endpoint_of(app, panel);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(MUTED))
        .title(format!(" {} · {} ", panel_name(panel), endpoint_host(endpoint)));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let [facts, history] =
        Layout::vertical([Constraint::Length(5), Constraint::Min(0)]).areas(inner);

    let step = step(app, panel);
    let mut lines = vec![
        field("result", value_text(app, panel)),
        field("state", step.label().to_string()),
    ];
    match trace_of(app, panel) {
        Some(trace) => {
            lines.push(field("progress", format!("{:.0}%", progress(app, panel) * 100.0)));
            lines.push(field("charted", format!("{} reports", trace.samples.len())));
        }
        None => {
            let jitter = app
                .result
                .jitter_ms
                .map_or("not measured".to_string(), |ms| format!("{ms:.1} ms"));
            lines.push(field("jitter", jitter));
        }
    }
    lines.push(field("endpoint", endpoint.to_string()));
    frame.render_widget(Paragraph::new(lines), facts);

    if let Some(trace) = trace_of(app, panel) {
        // Sparkline bars are integers; keep a tenth of a Mbps.
        let bars: Vec<u64> = trace
            .samples
            .iter()
            .map(|mbps| (mbps * 10.0).round() as u64)
            .collect();
        frame.render_widget(
            Sparkline::default()
                .data(&bars)
                .style(Style::default().fg(step.color())),
            history,
        );
    }
}

fn field(name: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{name:>9}  "), Style::default().fg(MUTED)),
        Span::raw(value),
    ])
}

fn footer_line(app: &App) -> Line<'static> {
    match &app.error {
        Some(message) => Line::from(Span::styled(
            format!("error: {message}"),
            Style::default().fg(Color::Red),
        )),
        None => Line::from(Span::styled(
            format!(
                "echo {}  source {}  sink {}",
                endpoint_host(&app.endpoints.ping_url),
                endpoint_host(&app.endpoints.download_url),
                endpoint_host(&app.endpoints.upload_url)
            ),
            Style::default().fg(MUTED),
        )),
    }
}

fn key_hints(app: &App) -> &'static str {
    match (app.expanded, app.is_active()) {
        (true, _) => "[esc] back  [q] quit",
        (false, true) => "[esc] abort  [tab] select  [space] details  [q] quit",
        (false, false) => "[enter] run  [tab] select  [space] details  [q] quit",
    }
}

fn rank(phase: TestPhase) -> Option<usize> {
    match phase {
        TestPhase::Ping => Some(0),
        TestPhase::Download => Some(1),
        TestPhase::Upload => Some(2),
        _ => None,
    }
}

fn panel_rank(panel: Panel) -> usize {
    match panel {
        Panel::Ping => 0,
        Panel::Download => 1,
        Panel::Upload => 2,
    }
}

fn step(app: &App, panel: Panel) -> Step {
    if app.phase == TestPhase::Done {
        return Step::Measured;
    }
    let Some(reached) = app.reached.and_then(rank) else {
        return Step::Pending;
    };
    match panel_rank(panel).cmp(&reached) {
        std::cmp::Ordering::Less => Step::Measured,
        std::cmp::Ordering::Greater => Step::Pending,
        std::cmp::Ordering::Equal => match app.phase {
            TestPhase::Aborted => Step::Aborted,
            TestPhase::Error => Step::Failed,
            _ => Step::Measuring,
        },
    }
}

fn progress(app: &App, panel: Panel) -> f64 {
    match (step(app, panel), trace_of(app, panel)) {
        (Step::Measured, _) => 1.0,
        (Step::Pending, _) | (_, None) => 0.0,
        (_, Some(trace)) => trace.progress,
    }
}

fn value_text(app: &App, panel: Panel) -> String {
    match trace_of(app, panel) {
        Some(trace) if trace.progress > 0.0 => format_rate(trace.current_mbps),
        Some(_) => "—".to_string(),
        None if app.result.ping_ms > 0.0 => format!("{:.1} ms", app.result.ping_ms),
        None => "—".to_string(),
    }
}

fn trace_of(app: &App, panel: Panel) -> Option<&RateTrace> {
    match panel {
        Panel::Download => Some(&app.download),
        Panel::Upload => Some(&app.upload),
        Panel::Ping => None,
    }
}

fn panel_name(panel: Panel) -> &'static str {
    match panel {
        Panel::Ping => "Latency",
        Panel::Download => "Download",
        Panel::Upload => "Upload",
    }
}

fn endpoint_of(app: &App, panel: Panel) -> &str {
    match panel {
        Panel::Ping => &app.endpoints.ping_url,
        Panel::Download => &app.endpoints.download_url,
        Panel::Upload => &app.endpoints.upload_url,
    }
}

fn bar(progress: f64) -> String {
    let filled = (progress.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "{}{} {:>3.0}%",
        "█".repeat(filled),
        "·".repeat(BAR_WIDTH - filled),
        progress.clamp(0.0, 1.0) * 100.0
    )
}

fn endpoint_host(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn format_rate(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{mbps:.1} Mbps")
    } else {
        format!("{:.0} kbps", mbps * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgauge::speedtest::RateReport;
    use netgauge::{Notification, RunConfig};
    use ratatui::{backend::TestBackend, Terminal};

    fn app() -> App {
        App::new(RunConfig::from_server("http://127.0.0.1:8080"))
    }

    fn screen(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(90, 14)).unwrap();
        terminal.draw(|frame| draw_ui(frame, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn steps_follow_the_run() {
        let mut app = app();
        assert!(ROWS.iter().all(|&p| step(&app, p) == Step::Pending));

        app.apply(Notification::Status(TestPhase::Ping));
        app.apply(Notification::Ping(8.0));
        app.apply(Notification::Status(TestPhase::Download));
        app.apply(Notification::Download(RateReport { mbps: 50.0, progress: 0.4 }));
        assert_eq!(step(&app, Panel::Ping), Step::Measured);
        assert_eq!(step(&app, Panel::Download), Step::Measuring);
        assert_eq!(step(&app, Panel::Upload), Step::Pending);
        assert_eq!(progress(&app, Panel::Download), 0.4);

        app.apply(Notification::Status(TestPhase::Aborted));
        assert_eq!(step(&app, Panel::Ping), Step::Measured);
        assert_eq!(step(&app, Panel::Download), Step::Aborted);
        assert_eq!(step(&app, Panel::Upload), Step::Pending);
        assert_eq!(progress(&app, Panel::Upload), 0.0);
    }

    #[test]
    fn failure_is_pinned_to_the_phase_it_hit() {
        let mut app = app();
        for phase in [TestPhase::Ping, TestPhase::Download, TestPhase::Upload] {
            app.apply(Notification::Status(phase));
        }
        app.apply(Notification::Error("sink went away".into()));
        app.apply(Notification::Status(TestPhase::Error));
        assert_eq!(step(&app, Panel::Download), Step::Measured);
        assert_eq!(step(&app, Panel::Upload), Step::Failed);

        app.reset_for_new_test();
        assert_eq!(step(&app, Panel::Upload), Step::Pending);
    }

    #[test]
    fn progress_bar_and_rates() {
        assert_eq!(bar(0.0), format!("{}   0%", "·".repeat(BAR_WIDTH)));
        assert_eq!(bar(1.0), format!("{} 100%", "█".repeat(BAR_WIDTH)));
        assert_eq!(bar(0.5).chars().filter(|c| *c == '█').count(), BAR_WIDTH / 2);
        assert_eq!(format_rate(0.25), "250 kbps");
        assert_eq!(format_rate(94.27), "94.3 Mbps");
        assert_eq!(format_rate(1500.0), "1.50 Gbps");
        assert_eq!(endpoint_host("https://speed.cloudflare.com/__up"), "speed.cloudflare.com");
        assert_eq!(endpoint_host("garbage"), "garbage");
    }

    #[test]
    fn table_shows_terminal_state_and_error() {
        let mut app = app();
        app.apply(Notification::Status(TestPhase::Ping));
        app.apply(Notification::Ping(12.0));
        app.apply(Notification::Status(TestPhase::Download));
        app.apply(Notification::Error("source refused".into()));
        app.apply(Notification::Status(TestPhase::Error));

        let text = screen(&app);
        assert!(text.contains("failed"));
        assert!(text.contains("12.0 ms"));
        assert!(text.contains("error: source refused"));
    }

    #[test]
    fn detail_view_renders_for_every_row() {
        let mut app = app();
        app.apply(Notification::Status(TestPhase::Download));
        app.apply(Notification::Download(RateReport { mbps: 80.0, progress: 0.3 }));
        app.expanded = true;
        for panel in ROWS {
            app.selected_panel = panel;
            let text = screen(&app);
            assert!(text.contains(panel_name(panel)));
            assert!(text.contains(endpoint_of(&app, panel)));
        }
        app.selected_panel = Panel::Download;
        assert!(screen(&app).contains("80.0 Mbps"));
    }
}
