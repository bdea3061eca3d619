//! Betting strategy loop.
//!
//! Single control loop over a session: stop checks, challenge pauses,
//! balance refreshes, wager placement, outcome resolution, humanized
//! pacing, and the periodic statistics report. The loop owns no parsing
//! and no counters; it wires the chat driver, the interpreter, and the
//! staking engine together.

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::chat::{ChatDriver, CommandKind};
use crate::config::{AutomationConfig, BotConfig};
use crate::engine::{Session, SessionStats};
use crate::monitor::MonitorHandle;
use crate::parser::{
    classify_outcome, classify_outcome_anchored, extract_balance, flip_acknowledged, FlipOutcome,
};

/// Harmless commands sent occasionally to look less mechanical
const DECOY_COMMANDS: &[&str] = &["w b", "w h"];

/// How long a challenge pause may last before the session is abandoned
const CHALLENGE_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Messages fetched when reading a balance
const BALANCE_SCAN_DEPTH: usize = 10;

/// Bounded re-poll schedule for resolving a flip outcome: wait for the
/// acknowledgement, confirm the result on a refreshed read, then one
/// late fallback over a larger batch with the anchored classifier.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub ack_delay: Duration,
    pub confirm_delay: Duration,
    pub fallback_delay: Duration,
    pub primary_batch: usize,
    pub fallback_batch: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ack_delay: Duration::from_secs(3),
            confirm_delay: Duration::from_secs(2),
            fallback_delay: Duration::from_secs(5),
            primary_batch: 5,
            fallback_batch: 10,
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy for tests against instant drivers
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            ack_delay: Duration::ZERO,
            confirm_delay: Duration::ZERO,
            fallback_delay: Duration::ZERO,
            primary_batch: 5,
            fallback_batch: 10,
        }
    }
}

/// Humanized delay ranges, in seconds. The wager and command ranges come
/// from configuration; the post-outcome ranges mimic how a person reacts
/// to a win, a recovery, or a loss.
#[derive(Debug, Clone)]
pub struct Pacing {
    bet: (f64, f64),
    command: (f64, f64),
    recovery_win: (f64, f64),
    win: (f64, f64),
    loss: (f64, f64),
}

impl Pacing {
    pub fn from_config(automation: &AutomationConfig) -> Self {
        Self {
            bet: (
                automation.bet_delay_min_seconds as f64,
                automation.bet_delay_max_seconds as f64,
            ),
            command: (
                automation.command_delay_min_seconds as f64,
                automation.command_delay_max_seconds as f64,
            ),
            recovery_win: (6.0, 12.0),
            win: (4.0, 8.0),
            loss: (3.0, 7.0),
        }
    }

    /// All-zero pacing for tests
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            bet: (0.0, 0.0),
            command: (0.0, 0.0),
            recovery_win: (0.0, 0.0),
            win: (0.0, 0.0),
            loss: (0.0, 0.0),
        }
    }

    async fn pause(range: (f64, f64)) {
        let secs = { rand::thread_rng().gen_range(range.0..=range.1) };
        if secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }

    async fn bet_pause(&self) {
        Self::pause(self.bet).await;
    }

    async fn command_pause(&self) {
        Self::pause(self.command).await;
    }

    async fn outcome_pause(&self, won: bool, was_recovery: bool) {
        let range = match (won, was_recovery) {
            (true, true) => self.recovery_win,
            (true, false) => self.win,
            (false, _) => self.loss,
        };
        Self::pause(range).await;
    }
}

pub struct StrategyRunner {
    config: BotConfig,
    driver: Arc<dyn ChatDriver>,
    session: Session,
    running: Arc<AtomicBool>,
    pacing: Pacing,
    retry: RetryPolicy,
    last_decoy: HashMap<&'static str, Instant>,
}

impl StrategyRunner {
    pub fn new(config: BotConfig, driver: Arc<dyn ChatDriver>, running: Arc<AtomicBool>) -> Self {
        let session = Session::new(config.betting.clone(), config.risk_management.clone());
        let pacing = Pacing::from_config(&config.automation);
        Self {
            config,
            driver,
            session,
            running,
            pacing,
            retry: RetryPolicy::default(),
            last_decoy: HashMap::new(),
        }
    }

    #[cfg(test)]
    fn with_test_timing(mut self) -> Self {
        self.pacing = Pacing::instant();
        self.retry = RetryPolicy::immediate();
        self
    }

    /// Send `w cash` and read the balance back from recent messages.
    /// Driver failures and unreadable batches both surface as `None`.
    async fn check_cash(&self) -> Option<f64> {
        if let Err(e) = self.driver.send_command("w cash", CommandKind::CashCheck).await {
            warn!("Error sending cash check: {}", e);
            return None;
        }
        self.pacing.command_pause().await;

        match self.driver.recent_messages(BALANCE_SCAN_DEPTH).await {
            Ok(messages) => {
                let balance = extract_balance(&messages);
                if balance.is_none() {
                    warn!("Could not find cash information in recent messages");
                }
                balance
            }
            Err(e) => {
                warn!("Error reading balance: {}", e);
                None
            }
        }
    }

    /// Resolve the outcome of the wager just placed, per the retry policy
    async fn resolve_outcome(&self, bet: f64) -> FlipOutcome {
        tokio::time::sleep(self.retry.ack_delay).await;

        match self.driver.recent_messages(self.retry.primary_batch).await {
            Ok(messages) if flip_acknowledged(&messages) => {
                // The result edits in shortly after the spin message
                tokio::time::sleep(self.retry.confirm_delay).await;
                if let Ok(refreshed) = self.driver.recent_messages(self.retry.primary_batch).await {
                    let outcome = classify_outcome(&refreshed, bet);
                    if outcome != FlipOutcome::Unknown {
                        return outcome;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Error reading flip result: {}", e),
        }

        warn!("Could not determine coin flip result immediately, waiting...");
        tokio::time::sleep(self.retry.fallback_delay).await;

        match self.driver.recent_messages(self.retry.fallback_batch).await {
            Ok(messages) => classify_outcome_anchored(&messages, bet),
            Err(e) => {
                warn!("Error reading flip result: {}", e);
                FlipOutcome::Unknown
            }
        }
    }

    /// Occasionally send a harmless command, respecting per-command cooldowns
    async fn maybe_send_decoy(&mut self) {
        let automation = &self.config.automation;
        if !automation.enable_random_commands {
            return;
        }
        let roll: f64 = { rand::thread_rng().gen() };
        if roll >= automation.random_command_chance {
            return;
        }

        let cooldown = Duration::from_secs(automation.random_command_cooldown_seconds);
        let now = Instant::now();
        let available: Vec<&'static str> = DECOY_COMMANDS
            .iter()
            .copied()
            .filter(|cmd| {
                self.last_decoy
                    .get(cmd)
                    .map_or(true, |sent| now.duration_since(*sent) >= cooldown)
            })
            .collect();

        let Some(&command) = available.choose(&mut rand::thread_rng()) else {
            return;
        };
        self.last_decoy.insert(command, now);

        info!("Sending random command: {}", command);
        self.pacing.command_pause().await;
        if let Err(e) = self.driver.send_command(command, CommandKind::Random).await {
            warn!("Error sending random command: {}", e);
        }
    }

    /// Run the betting loop until a stop condition or the shutdown flag.
    /// The final statistics report is emitted no matter how the loop ends.
    pub async fn run(&mut self, monitor: &MonitorHandle) -> SessionStats {
        info!("BETTING STRATEGY STARTED");

        // Initial read pins the starting balance
        match self.check_cash().await {
            Some(cash) if cash > 0.0 => {
                self.session.record_balance(cash);
                info!(
                    "Strategy: {}% initial bet, {}x loss multiplier",
                    self.config.betting.initial_bet_percentage, self.config.betting.loss_multiplier
                );
            }
            _ => {
                error!("No cowoncy detected - cannot start betting");
                self.session.log_statistics();
                return self.session.statistics(Utc::now());
            }
        }

        let mut resolved_bets = 0u32;

        while self.running.load(Ordering::SeqCst) {
            if let Some(reason) = self.session.should_stop(Utc::now()) {
                info!("Stopping betting: {}", reason);
                break;
            }

            if monitor.is_active() {
                warn!("Betting paused - verification detected");
                if !monitor.wait_for_resolution(CHALLENGE_WAIT_TIMEOUT).await {
                    error!(
                        "Verification timeout after {} alerts - stopping bot",
                        monitor.alerts_sent()
                    );
                    break;
                }
                info!("Verification resolved - resuming betting");
            }

            let Some(cash) = self.check_cash().await else {
                warn!("Balance unreadable, retrying next cycle");
                self.pacing.outcome_pause(false, false).await;
                continue;
            };
            self.session.record_balance(cash);
            if cash <= 0.0 {
                error!("Insufficient funds to continue");
                break;
            }

            let mut bet = self.session.next_bet();
            if bet > cash {
                warn!("Bet amount ({:.0}) exceeds balance ({:.0})", bet, cash);
                bet = cash.floor();
            }

            let streak = self.session.consecutive_losses();
            if streak == 0 {
                info!("New betting cycle: {:.0} cowoncy", bet);
            } else {
                info!("Recovery attempt #{}: {:.0} cowoncy", streak + 1, bet);
            }

            self.pacing.bet_pause().await;

            self.session.note_bet_placed(bet);
            let wager = format!("w cf {}", bet.round() as u64);
            if let Err(e) = self.driver.send_command(&wager, CommandKind::Wager).await {
                warn!("Error placing bet: {}", e);
                self.pacing.outcome_pause(false, false).await;
                continue;
            }

            match self.resolve_outcome(bet).await {
                FlipOutcome::Unknown => {
                    warn!("Could not determine bet result, continuing...");
                    self.pacing.outcome_pause(false, false).await;
                    continue;
                }
                FlipOutcome::Win { payout } => {
                    self.session.record_outcome(true);
                    info!("WIN! +{:.0} cowoncy", payout);
                    if streak > 0 {
                        info!("Recovery successful after {} losses!", streak);
                    }
                    self.pacing.outcome_pause(true, streak > 0).await;
                }
                FlipOutcome::Loss => {
                    self.session.record_outcome(false);
                    self.pacing.outcome_pause(false, false).await;
                }
            }

            resolved_bets += 1;
            let interval = self.config.logging.log_statistics_interval_bets.max(1);
            if resolved_bets % interval == 0 {
                self.session.log_statistics();
            }

            self.maybe_send_decoy().await;
            self.pacing.bet_pause().await;
        }

        self.session.log_statistics();
        self.session.statistics(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::SimulatedChat;
    use crate::config::VerificationConfig;
    use crate::monitor::ChallengeMonitor;

    fn test_config() -> BotConfig {
        let mut config = BotConfig::default();
        config.automation.bet_delay_min_seconds = 0;
        config.automation.bet_delay_max_seconds = 0;
        config.automation.command_delay_min_seconds = 0;
        config.automation.command_delay_max_seconds = 0;
        config.automation.enable_random_commands = false;
        config
    }

    fn inert_monitor() -> MonitorHandle {
        let driver = Arc::new(SimulatedChat::new(0.0, 0.5));
        let config = VerificationConfig {
            enable_verification_protection: false,
            ..Default::default()
        };
        ChallengeMonitor::spawn(driver, config)
    }

    #[tokio::test]
    async fn test_run_stops_on_max_consecutive_losses() {
        let mut config = test_config();
        config.betting.max_consecutive_losses = 2;
        config.risk_management.enable_stop_loss = false;

        let driver = Arc::new(SimulatedChat::new(10_000.0, 0.0));
        let running = Arc::new(AtomicBool::new(true));
        let mut runner =
            StrategyRunner::new(config, driver, running).with_test_timing();

        let monitor = inert_monitor();
        let stats = runner.run(&monitor).await;
        monitor.shutdown().await;

        // The flag latches on the balance read after the second loss, so
        // one more wager goes out before the stop check sees it.
        assert_eq!(stats.total_losses, 3);
        assert_eq!(stats.total_wins, 0);
        assert_eq!(stats.consecutive_losses, 3);
        assert!(stats.current_balance < stats.starting_balance);
    }

    #[tokio::test]
    async fn test_run_stops_on_profit_target() {
        let mut config = test_config();
        config.risk_management.enable_profit_target = true;
        config.risk_management.profit_target_percentage = 1.0;

        let driver = Arc::new(SimulatedChat::new(1_000.0, 1.0));
        let running = Arc::new(AtomicBool::new(true));
        let mut runner =
            StrategyRunner::new(config, driver, running).with_test_timing();

        let monitor = inert_monitor();
        let stats = runner.run(&monitor).await;
        monitor.shutdown().await;

        assert!(stats.total_wins >= 1);
        assert_eq!(stats.total_losses, 0);
        assert!(stats.total_profit > 0.0);
    }

    #[tokio::test]
    async fn test_run_aborts_without_balance() {
        // Simulator with zero balance still answers "w cash", but the
        // reported amount is 0, so the strategy refuses to start.
        let config = test_config();
        let driver = Arc::new(SimulatedChat::new(0.0, 0.5));
        let running = Arc::new(AtomicBool::new(true));
        let mut runner =
            StrategyRunner::new(config, driver, running).with_test_timing();

        let monitor = inert_monitor();
        let stats = runner.run(&monitor).await;
        monitor.shutdown().await;

        assert_eq!(stats.total_bets, 0);
    }

    #[tokio::test]
    async fn test_shutdown_flag_ends_the_loop() {
        let mut config = test_config();
        config.risk_management.enable_stop_loss = false;
        config.betting.max_consecutive_losses = 1_000_000;

        let driver = Arc::new(SimulatedChat::new(100_000.0, 0.5));
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(false, Ordering::SeqCst);
        });

        let mut runner =
            StrategyRunner::new(config, driver, running).with_test_timing();
        let monitor = inert_monitor();
        let stats = runner.run(&monitor).await;
        monitor.shutdown().await;

        assert!(stats.total_bets > 0);
        assert_eq!(stats.total_bets, stats.total_wins + stats.total_losses);
    }

    #[tokio::test]
    async fn test_challenge_pauses_and_resumes_betting() {
        let mut config = test_config();
        config.risk_management.enable_stop_loss = false;
        config.betting.max_consecutive_losses = 1_000_000;

        // Challenge appears after the first flip; the simulator clears it
        // once two alert pings have landed.
        let driver = Arc::new(SimulatedChat::new(100_000.0, 1.0).with_challenge_after(1));
        let monitor = ChallengeMonitor::spawn(
            driver.clone() as Arc<dyn ChatDriver>,
            VerificationConfig {
                enable_verification_protection: true,
                verification_check_interval_seconds: 1,
                enable_verification_alerts: true,
            },
        );

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.store(false, Ordering::SeqCst);
        });

        let mut runner =
            StrategyRunner::new(config, driver.clone(), running).with_test_timing();
        // Throttle the cycle so the 1s monitor poll lands between bets
        runner.pacing = Pacing {
            bet: (0.02, 0.05),
            command: (0.0, 0.0),
            recovery_win: (0.0, 0.0),
            win: (0.02, 0.05),
            loss: (0.0, 0.0),
        };
        let stats = runner.run(&monitor).await;

        assert!(!monitor.is_active());
        monitor.shutdown().await;

        // The monitor pinged the channel and the challenge was handled
        assert!(driver.alerts_received() >= 2);
        // Betting continued after the pause
        assert!(stats.total_bets > 1);
        assert_eq!(stats.total_losses, 0);
    }
}
