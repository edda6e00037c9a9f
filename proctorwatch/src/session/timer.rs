// proctorwatch/src/session/timer.rs
//
// Countdown ticker. The task only says "a second passed"; the controller owns
// the remaining time and decides what zero means.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub fn spawn_countdown(every: Duration, ticks: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if ticks.send(()).await.is_err() { break; }
        }
    })
}

/// `M:SS`, e.g. 300 → "5:00", 9 → "0:09".
pub fn format_remaining(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
