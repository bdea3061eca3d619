//! Verification challenge watchdog.
//!
//! OwO occasionally interrupts play with a human-verification prompt;
//! missing it gets the account banned. A background task polls recent
//! chat for the challenge, raises a shared flag the strategy loop checks
//! before every cycle, and pings the channel until a human steps in.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::chat::{ChatDriver, CommandKind};
use crate::config::VerificationConfig;

/// Known shapes of the verification prompt
static CHALLENGE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"@\w+,\s*are you a real human\?.*verify",
        r"please use the link below so i can check",
        r"please complete this within \d+ minutes",
        r"verify.*within.*minutes.*ban",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid challenge pattern"))
    .collect()
});

/// Hard cap on channel pings per challenge
const MAX_ALERT_PINGS: u32 = 50;
/// Pause between pings while the challenge persists
const ALERT_INTERVAL: Duration = Duration::from_secs(2);
/// How often a blocked strategy loop re-reads the flag
const RESOLUTION_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Bounded join when shutting the monitor down
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// How many recent messages each poll inspects
const CHALLENGE_SCAN_DEPTH: usize = 15;

/// Whether a single message reads as a verification challenge
pub fn message_is_challenge(message: &str) -> bool {
    let lower = message.to_lowercase();

    if CHALLENGE_PATTERNS.iter().any(|p| p.is_match(&lower)) {
        return true;
    }

    // Keyword fallback for prompts the patterns miss
    (lower.contains("human") && lower.contains("verify"))
        || (message.contains('@') && lower.contains("verify") && lower.contains("minutes"))
}

/// Shared view of the monitor, read by the strategy loop every cycle
pub struct MonitorHandle {
    active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    alerts_sent: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Non-blocking read; a momentarily stale value is fine at this
    /// polling cadence
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn alerts_sent(&self) -> u32 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    /// Block the caller (not the monitor) until the challenge clears or
    /// the timeout elapses. Returns whether it resolved in time.
    pub async fn wait_for_resolution(&self, timeout: Duration) -> bool {
        let started = tokio::time::Instant::now();
        loop {
            if !self.is_active() {
                return true;
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!("Verification wait timeout after {}s", timeout.as_secs());
                return false;
            }
            info!("Waiting for verification to be resolved...");
            let remaining = timeout - elapsed;
            tokio::time::sleep(RESOLUTION_POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Stop the background task and wait for it with a bounded join
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Verification monitor did not stop within join timeout");
            }
        }
        info!("Verification monitoring stopped");
    }
}

pub struct ChallengeMonitor;

impl ChallengeMonitor {
    /// Start the watchdog on its own schedule. When protection is
    /// disabled the handle is inert and always reads inactive.
    pub fn spawn(driver: Arc<dyn ChatDriver>, config: VerificationConfig) -> MonitorHandle {
        let active = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let alerts_sent = Arc::new(AtomicU32::new(0));

        if !config.enable_verification_protection {
            info!("Verification monitoring disabled in config");
            return MonitorHandle {
                active,
                stop,
                alerts_sent,
                task: None,
            };
        }

        let task = tokio::spawn(poll_loop(
            driver,
            config,
            active.clone(),
            stop.clone(),
            alerts_sent.clone(),
        ));
        info!("Verification monitoring started");

        MonitorHandle {
            active,
            stop,
            alerts_sent,
            task: Some(task),
        }
    }
}

/// One poll: read recent chat, scan for the challenge. Driver failures
/// count as "nothing detected this round" and never kill the monitor.
async fn check_for_challenge(driver: &Arc<dyn ChatDriver>) -> bool {
    match driver.recent_messages(CHALLENGE_SCAN_DEPTH).await {
        Ok(messages) => {
            for message in &messages {
                if message_is_challenge(message) {
                    error!("VERIFICATION REQUEST DETECTED!");
                    error!("Message: {}", message);
                    return true;
                }
            }
            false
        }
        Err(e) => {
            warn!("Error checking for verification: {}", e);
            false
        }
    }
}

async fn poll_loop(
    driver: Arc<dyn ChatDriver>,
    config: VerificationConfig,
    active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    alerts_sent: Arc<AtomicU32>,
) {
    let check_interval = Duration::from_secs(config.verification_check_interval_seconds.max(1));

    while !stop.load(Ordering::SeqCst) {
        let detected = check_for_challenge(&driver).await;

        if detected && !active.load(Ordering::SeqCst) {
            active.store(true, Ordering::SeqCst);
            error!("VERIFICATION DETECTED - betting must pause");
            if config.enable_verification_alerts {
                alert_loop(&driver, &active, &stop, &alerts_sent).await;
            }
        } else if !detected && active.load(Ordering::SeqCst) {
            active.store(false, Ordering::SeqCst);
            alerts_sent.store(0, Ordering::SeqCst);
            info!("Verification resolved - monitoring continues");
        }

        sleep_with_stop(check_interval, &stop).await;
    }
}

/// Ping the channel until the challenge clears or the cap is reached.
/// Re-checks chat on every iteration so it stops the moment a human
/// handles the prompt.
async fn alert_loop(
    driver: &Arc<dyn ChatDriver>,
    active: &Arc<AtomicBool>,
    stop: &Arc<AtomicBool>,
    alerts_sent: &Arc<AtomicU32>,
) {
    error!("VERIFICATION ALERT SYSTEM ACTIVATED");

    while !stop.load(Ordering::SeqCst) {
        if !check_for_challenge(driver).await {
            let pings = alerts_sent.swap(0, Ordering::SeqCst);
            active.store(false, Ordering::SeqCst);
            info!("Verification resolved after {} alerts", pings);
            return;
        }

        let pings = alerts_sent.load(Ordering::SeqCst);
        if pings >= MAX_ALERT_PINGS {
            error!(
                "MAX VERIFICATION ALERTS REACHED ({}) - manual intervention required",
                MAX_ALERT_PINGS
            );
            return;
        }

        let ping_number = pings + 1;
        warn!("VERIFICATION PING #{}", ping_number);
        let alert_text = format!(
            "VERIFICATION NEEDED! CHECK THE CHANNEL NOW! (Alert #{})",
            ping_number
        );
        if let Err(e) = driver.send_command(&alert_text, CommandKind::Alert).await {
            warn!("Error sending verification alert: {}", e);
        }
        alerts_sent.store(ping_number, Ordering::SeqCst);

        sleep_with_stop(ALERT_INTERVAL, stop).await;
    }
}

/// Sleep in short slices so a stop request is honored promptly
async fn sleep_with_stop(duration: Duration, stop: &Arc<AtomicBool>) {
    let slice = Duration::from_millis(200);
    let mut remaining = duration;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let step = slice.min(remaining);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
}
