mod app;
mod ui;

use std::time::{Duration, Instant};

use anyhow::Result;
use app::{poll_event, App, AppAction};
use clap::Parser;
use crossterm::event::Event;
use netgauge::config::{Cli, Mode, RunArgs};
use netgauge::logging::{self, LogTarget};
use netgauge::{serve, EngineError, Notification, RunConfig, SpeedTest};
use ratatui::DefaultTerminal;
use ui::draw_ui;

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().mode() {
        Mode::Serve(args) => {
            logging::init(LogTarget::Stderr)?;
            serve::run(args.listen).await
        }
        Mode::Run(args) if args.headless => {
            logging::init(LogTarget::Stderr)?;
            run_headless(args.run_config()).await
        }
        Mode::Run(args) => run_tui(&args),
    }
}

fn run_tui(args: &RunArgs) -> Result<()> {
    match &args.log_file {
        Some(path) => logging::init(LogTarget::File(path))?,
        None => logging::init(LogTarget::Off)?,
    }

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, args.run_config());

    ratatui::restore();
    result
}

fn run_app(terminal: &mut DefaultTerminal, config: RunConfig) -> Result<()> {
    let mut app = App::new(config.clone());
    let mut engine = SpeedTest::new()?;

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        while let Some(notification) = engine.try_next() {
            app.apply(notification);
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => match engine.start(config.clone()) {
                        Ok(()) => app.reset_for_new_test(),
                        Err(EngineError::AlreadyRunning) => {}
                        Err(e) => return Err(e.into()),
                    },
                    AppAction::CancelTest => engine.abort()?,
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    engine.shutdown();
    Ok(())
}

async fn run_headless(config: RunConfig) -> Result<()> {
    let mut last_line = Instant::now();
    let mut last_upload_line = Instant::now();

    let mut engine = SpeedTest::new()?
        .on_status(|phase| println!("status    {phase}"))
        .on_ping(|ms| println!("ping      {ms:.1} ms"))
        .on_download(move |report| {
            if last_line.elapsed() >= Duration::from_millis(500) || report.progress >= 1.0 {
                last_line = Instant::now();
                println!("download  {:>8.2} Mbps  {:>3.0}%", report.mbps, report.progress * 100.0);
            }
        })
        .on_upload(move |report| {
            if last_upload_line.elapsed() >= Duration::from_millis(500) || report.progress >= 1.0 {
                last_upload_line = Instant::now();
                println!("upload    {:>8.2} Mbps  {:>3.0}%", report.mbps, report.progress * 100.0);
            }
        })
        .on_error(|message| eprintln!("error     {message}"));

    engine.start(config)?;

    let mut failed = false;
    loop {
        let notification = tokio::select! {
            n = engine.recv() => n,
            _ = tokio::signal::ctrl_c() => {
                engine.abort()?;
                continue;
            }
        };
        match notification {
            Some(Notification::Error(_)) => failed = true,
            Some(n) if n.is_terminal() => break,
            Some(_) => {}
            None => break,
        }
    }

    engine.wait_stopped().await?;
    engine.shutdown();
    if failed {
        anyhow::bail!("speed test failed");
    }
    Ok(())
}
