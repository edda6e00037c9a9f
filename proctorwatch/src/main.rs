// proctorwatch/src/main.rs
//
// Proctorwatch: integrity monitoring for a single remote test attempt.
//
// Three subcommands:
//   serve       run the violation log HTTP server (POST /log-violation, GET /violations)
//   monitor     run one proctored session from a scripted client feed + camera frames
//   violations  print the audit trail held by a running server
//
// Usage:
//   proctorwatch serve --store ./data/violations.jsonl
//   proctorwatch monitor --mode replay --feed session.jsonl --frames ./frames --speed 4.0
//   proctorwatch monitor --mode tail --feed /tmp/proctorwatch_feed.jsonl
//   proctorwatch violations

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod detectors;
mod error;
mod events;
mod feed;
mod media;
mod reporter;
mod server;
mod session;
mod store;
#[cfg(test)]
mod testing;

use config::{FeedMode, MonitorArgs, ServeArgs, ViolationsArgs};
use detectors::face_client::HttpFaceDetection;
use events::{SessionPhase, ViolationRecord, QUESTION};
use feed::{FeedCamera, FeedDevices};
use reporter::HttpReporter;
use session::timer::format_remaining;
use session::{Collaborators, SessionHandle, SessionSnapshot, ViolationAlert};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "proctorwatch",
    about   = "Integrity monitoring for remote test sessions",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the violation log server
    Serve(ServeArgs),
    /// Run one proctored session driven by a client event feed
    Monitor(MonitorArgs),
    /// Print every logged violation, newest first
    Violations(ViolationsArgs),
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1m");
    println!("  ┌─┐┬─┐┌─┐┌─┐┌┬┐┌─┐┬─┐┬ ┬┌─┐┌┬┐┌─┐┬ ┬");
    println!("  ├─┘├┬┘│ ││   │ │ │├┬┘│││├─┤ │ │  ├─┤");
    println!("  ┴  ┴└─└─┘└─┘ ┴ └─┘┴└─└┴┘┴ ┴ ┴ └─┘┴ ┴");
    println!("\x1b[0m");
    println!("  \x1b[90mRemote test integrity monitor | tab, screen share, camera\x1b[0m\n");
}

fn print_alert(alert: &ViolationAlert) {
    let reset = "\x1b[0m";
    println!("\n\x1b[91;1m⚠️  Violation Detected: {}{}", alert.label, reset);
    println!("  Time    : {} left", format_remaining(alert.remaining_secs));
    println!("  Count   : \x1b[93m{}{}", alert.count, reset);
}

fn print_summary(snap: &SessionSnapshot) {
    let duration = match (snap.started_at, snap.submitted_at) {
        (Some(start), Some(end)) => format!("{}s", (end - start).num_seconds()),
        _ => "-".to_string(),
    };
    println!("\n\x1b[1m── session {}  duration={}  violations={}  dropped={}  answer={} chars ──\x1b[0m",
        snap.phase, duration, snap.accepted_signals, snap.dropped_signals, snap.answer.chars().count());
}

/// Prints one alert per accepted violation.
async fn print_alerts_loop(mut rx: broadcast::Receiver<ViolationAlert>) {
    loop {
        match rx.recv().await {
            Ok(alert) => print_alert(&alert),
            Err(RecvError::Lagged(n)) => warn!("{} violation alerts not shown", n),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_violations(records: &[ViolationRecord]) {
    if records.is_empty() {
        println!("  No violations logged.");
        return;
    }
    println!("  {:<26}  {:<36}  {}", "TIMESTAMP", "ID", "TYPE");
    for r in records {
        println!("  {:<26}  {:<36}  {}", r.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"), r.id, r.kind);
    }
    println!("\n  {} total", records.len());
}

// ── Subcommands ───────────────────────────────────────────────────────────────

async fn run_serve(args: ServeArgs) -> Result<()> {
    let location = args.store_location()?;
    let store    = location.open().await?;
    println!("  Mode: \x1b[96mSERVE\x1b[0m  |  {}", args.bind);
    println!("  Store: \x1b[90m{}\x1b[0m\n", location);
    server::serve(args.bind, store).await
}

async fn run_monitor(args: MonitorArgs) -> Result<()> {
    let settings = args.session_settings()?;
    let timeout  = args.http_timeout()?;
    let speed    = args.validate_speed()?;

    let camera = match &args.frames {
        Some(dir) => FeedCamera::from_dir(dir, args.camera_size).await?,
        None => {
            warn!("No --frames directory; camera sampling disabled");
            FeedCamera::empty()
        }
    };
    let devices = FeedDevices::new(camera);
    let collab  = Collaborators {
        devices:   devices.clone(),
        detection: Arc::new(HttpFaceDetection::new(&args.detector, timeout)?),
        reporter:  Arc::new(HttpReporter::new(args.log_server.clone(), timeout)?),
    };
    let (session, controller) = session::spawn(settings, collab);

    match args.mode {
        FeedMode::Tail => println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}  (new lines only)", args.feed.display()),
        FeedMode::Replay => println!(
            "  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x", args.feed.display(), speed
        ),
    }
    println!("  Log server: \x1b[90m{}\x1b[0m  Detector: \x1b[90m{}\x1b[0m", args.log_server, args.detector);
    println!("  Question: {}\n", QUESTION);
    println!("  Press Ctrl+C to submit and stop.\n");

    tokio::spawn(print_alerts_loop(session.alerts()));

    let path = args.feed.clone();
    let mut feed = match args.mode {
        FeedMode::Tail => tokio::spawn(feed::tail(path, Arc::clone(&devices), session.clone(), true)),
        FeedMode::Replay => tokio::spawn(feed::replay(path, Arc::clone(&devices), session.clone(), speed)),
    };

    tokio::select! {
        res = session.wait_until(|s| s.phase == SessionPhase::Submitted) => { res?; }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            finish(&session).await;
        }
        res = &mut feed => {
            match res {
                Ok(Ok(())) => info!("Feed finished"),
                Ok(Err(e)) => error!("Feed failed: {}", e),
                Err(e) => error!("Feed task panicked: {}", e),
            }
            finish(&session).await;
        }
    }

    // The feed holds a session handle; the controller exits once all are gone.
    feed.abort();
    let snap = session.snapshot();
    drop(session);
    controller.await?;
    print_summary(&snap);
    Ok(())
}

/// Submit on the test-taker's behalf when the feed stops early.
async fn finish(session: &SessionHandle) {
    match session.submit().await {
        Ok(true) => info!("Submitted on exit"),
        Ok(false) => {}
        Err(e) => warn!("Nothing to submit: {}", e),
    }
}

async fn run_violations(args: ViolationsArgs) -> Result<()> {
    let reporter = HttpReporter::new(args.log_server.clone(), args.http_timeout()?)?;
    let records  = reporter.list().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_violations(&records);
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("proctorwatch=info".parse()?))
        .compact().init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            print_banner();
            run_serve(args).await
        }
        Command::Monitor(args) => {
            print_banner();
            run_monitor(args).await
        }
        Command::Violations(args) => run_violations(args).await,
    }
}
