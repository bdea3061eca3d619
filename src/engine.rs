//! Staking state machine.
//!
//! Owns every counter of a betting session and all the risk bookkeeping:
//! progressive bet sizing, sticky stop flags, and the statistics report.
//! Nothing here touches the chat surface; the strategy loop feeds balances
//! and outcomes in and reads bet sizes and stop decisions out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{BettingConfig, RiskConfig};
use crate::parser::format_cowoncy;

/// Why the session must end. Checked in this exact order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopLoss,
    ProfitTarget,
    MaxConsecutiveLosses,
    InsufficientFunds,
    SessionTimeLimit,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::StopLoss => write!(f, "Stop loss triggered"),
            StopReason::ProfitTarget => write!(f, "Profit target reached"),
            StopReason::MaxConsecutiveLosses => write!(f, "Maximum consecutive losses reached"),
            StopReason::InsufficientFunds => write!(f, "Insufficient funds"),
            StopReason::SessionTimeLimit => write!(f, "Session time limit reached"),
        }
    }
}

/// Snapshot of the session for the periodic and final reports
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub runtime: String,
    pub starting_balance: f64,
    pub current_balance: f64,
    pub total_profit: f64,
    pub total_bets: u32,
    pub total_wins: u32,
    pub total_losses: u32,
    pub win_rate: f64,
    pub consecutive_losses: u32,
    pub current_bet: f64,
}

/// One betting session. Constructed once per run; risk flags only ever
/// move from false to true.
pub struct Session {
    betting: BettingConfig,
    risk: RiskConfig,

    starting_balance: Option<f64>,
    current_balance: f64,
    current_bet: f64,
    consecutive_losses: u32,
    total_bets: u32,
    total_wins: u32,
    total_losses: u32,
    total_profit: f64,
    session_start: DateTime<Utc>,

    stop_loss_triggered: bool,
    profit_target_reached: bool,
    max_losses_reached: bool,
}

impl Session {
    pub fn new(betting: BettingConfig, risk: RiskConfig) -> Self {
        Self {
            betting,
            risk,
            starting_balance: None,
            current_balance: 0.0,
            current_bet: 0.0,
            consecutive_losses: 0,
            total_bets: 0,
            total_wins: 0,
            total_losses: 0,
            total_profit: 0.0,
            session_start: Utc::now(),
            stop_loss_triggered: false,
            profit_target_reached: false,
            max_losses_reached: false,
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Record a fresh balance read. The first read pins the starting
    /// balance; every read re-evaluates the risk conditions.
    pub fn record_balance(&mut self, value: f64) {
        let previous = self.current_balance;
        self.current_balance = value;

        let starting = *self.starting_balance.get_or_insert_with(|| {
            info!("Starting balance set: {} cowoncy", format_cowoncy(value));
            value
        });
        self.total_profit = self.current_balance - starting;

        if previous > 0.0 && previous != value {
            info!(
                "Balance: {} cowoncy ({}{})",
                format_cowoncy(value),
                if value >= previous { "+" } else { "-" },
                format_cowoncy((value - previous).abs())
            );
        }

        self.check_risk_conditions();
    }

    /// Each check is independent and idempotent; flags are one-way.
    fn check_risk_conditions(&mut self) {
        let starting = self.starting_balance.unwrap_or(0.0);

        if self.risk.enable_stop_loss && starting > 0.0 {
            let loss_pct = (starting - self.current_balance) / starting * 100.0;
            if loss_pct >= self.risk.stop_loss_percentage && !self.stop_loss_triggered {
                self.stop_loss_triggered = true;
                error!(
                    "STOP LOSS TRIGGERED! Lost {:.1}% of starting balance",
                    loss_pct
                );
            }
        }

        if self.risk.enable_profit_target && starting > 0.0 {
            let profit_pct = self.total_profit / starting * 100.0;
            if profit_pct >= self.risk.profit_target_percentage && !self.profit_target_reached {
                self.profit_target_reached = true;
                info!("PROFIT TARGET REACHED! Gained {:.1}%", profit_pct);
            }
        }

        if self.consecutive_losses >= self.betting.max_consecutive_losses
            && !self.max_losses_reached
        {
            self.max_losses_reached = true;
            error!(
                "MAX CONSECUTIVE LOSSES REACHED! ({})",
                self.consecutive_losses
            );
        }
    }

    /// Compute the next stake. Pure in the session state: calling it twice
    /// without an intervening outcome yields the same value.
    pub fn next_bet(&self) -> f64 {
        let mut bet = if self.consecutive_losses == 0 {
            self.current_balance * (self.betting.initial_bet_percentage / 100.0)
        } else {
            self.current_bet * self.betting.loss_multiplier
        };

        bet = bet.max(self.betting.min_bet_amount);

        if self.risk.enable_max_bet_limit {
            let cap = self.current_balance * (self.risk.max_bet_percentage / 100.0);
            bet = bet.min(cap);
        }

        bet.round()
    }

    /// A wager went out. Attempts count here, so an unreadable outcome
    /// still shows up in `total_bets` without touching win/loss counters.
    pub fn note_bet_placed(&mut self, amount: f64) {
        self.current_bet = amount;
        self.total_bets += 1;
        info!(
            "Placing bet #{}: {} cowoncy",
            self.total_bets,
            format_cowoncy(amount)
        );
    }

    /// Record a resolved outcome for the last placed bet
    pub fn record_outcome(&mut self, won: bool) {
        if won {
            self.total_wins += 1;
            if self.consecutive_losses > 0 {
                info!("Broke loss streak of {}!", self.consecutive_losses);
                self.consecutive_losses = 0;
            }
        } else {
            self.total_losses += 1;
            self.consecutive_losses += 1;
            warn!(
                "Loss recorded, consecutive losses: {}",
                self.consecutive_losses
            );
        }
    }

    /// First applicable stop reason, in fixed priority order
    pub fn should_stop(&self, now: DateTime<Utc>) -> Option<StopReason> {
        if self.stop_loss_triggered {
            return Some(StopReason::StopLoss);
        }
        if self.profit_target_reached {
            return Some(StopReason::ProfitTarget);
        }
        if self.max_losses_reached {
            return Some(StopReason::MaxConsecutiveLosses);
        }
        if self.current_balance <= 0.0 {
            return Some(StopReason::InsufficientFunds);
        }
        if self.risk.enable_session_time_limit {
            let hours = (now - self.session_start).num_seconds() as f64 / 3600.0;
            if hours >= self.risk.session_time_limit_hours {
                return Some(StopReason::SessionTimeLimit);
            }
        }
        None
    }

    pub fn statistics(&self, now: DateTime<Utc>) -> SessionStats {
        let runtime_secs = (now - self.session_start).num_seconds().max(0);
        let win_rate = if self.total_bets > 0 {
            self.total_wins as f64 / self.total_bets as f64 * 100.0
        } else {
            0.0
        };

        SessionStats {
            runtime: format!(
                "{:02}:{:02}:{:02}",
                runtime_secs / 3600,
                (runtime_secs % 3600) / 60,
                runtime_secs % 60
            ),
            starting_balance: self.starting_balance.unwrap_or(0.0),
            current_balance: self.current_balance,
            total_profit: self.total_profit,
            total_bets: self.total_bets,
            total_wins: self.total_wins,
            total_losses: self.total_losses,
            win_rate,
            consecutive_losses: self.consecutive_losses,
            current_bet: self.current_bet,
        }
    }

    pub fn log_statistics(&self) {
        let stats = self.statistics(Utc::now());
        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║  SESSION STATISTICS                                          ║");
        info!("╚══════════════════════════════════════════════════════════════╝");
        info!("  Runtime:          {}", stats.runtime);
        info!(
            "  Starting balance: {} cowoncy",
            format_cowoncy(stats.starting_balance)
        );
        info!(
            "  Current balance:  {} cowoncy",
            format_cowoncy(stats.current_balance)
        );
        info!("  Total P&L:        {:+.0} cowoncy", stats.total_profit);
        info!(
            "  Bets: {} | Wins: {} | Losses: {} | Win rate: {:.1}%",
            stats.total_bets, stats.total_wins, stats.total_losses, stats.win_rate
        );
        info!(
            "  Loss streak: {} | Current bet: {}",
            stats.consecutive_losses,
            format_cowoncy(stats.current_bet)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;

    fn session() -> Session {
        let config = BotConfig::default();
        Session::new(config.betting, config.risk_management)
    }

    #[test]
    fn test_first_read_pins_starting_balance() {
        let mut s = session();
        s.record_balance(1000.0);
        s.record_balance(900.0);

        let stats = s.statistics(Utc::now());
        assert_eq!(stats.starting_balance, 1000.0);
        assert_eq!(stats.current_balance, 900.0);
        assert_eq!(stats.total_profit, -100.0);
    }

    #[test]
    fn test_initial_bet_is_percentage_of_balance() {
        let mut s = session();
        s.record_balance(1000.0);
        // 1% of 1000
        assert_eq!(s.next_bet(), 10.0);
        // Idempotent without an intervening outcome
        assert_eq!(s.next_bet(), 10.0);
    }

    #[test]
    fn test_recovery_bet_multiplies_previous() {
        let mut s = session();
        s.record_balance(10_000.0);

        s.note_bet_placed(s.next_bet()); // 100
        s.record_outcome(false);
        assert_eq!(s.next_bet(), 250.0); // 100 * 2.5

        s.note_bet_placed(250.0);
        s.record_outcome(false);
        assert_eq!(s.next_bet(), 625.0); // 250 * 2.5
    }

    #[test]
    fn test_min_bet_floor_applies() {
        let mut s = session();
        s.record_balance(50.0);
        // 1% of 50 = 0.5, floored to min_bet_amount = 1
        assert_eq!(s.next_bet(), 1.0);
    }

    #[test]
    fn test_max_bet_cap_applies() {
        let mut s = session();
        s.record_balance(1000.0);
        s.note_bet_placed(90.0);
        s.record_outcome(false);
        // 90 * 2.5 = 225, capped at 10% of balance = 100
        assert_eq!(s.next_bet(), 100.0);
    }

    #[test]
    fn test_win_resets_streak() {
        let mut s = session();
        s.record_balance(1000.0);

        for _ in 0..3 {
            s.note_bet_placed(10.0);
            s.record_outcome(false);
        }
        assert_eq!(s.consecutive_losses(), 3);

        s.note_bet_placed(10.0);
        s.record_outcome(true);
        assert_eq!(s.consecutive_losses(), 0);
    }

    #[test]
    fn test_attempt_counting_with_unknown_outcomes() {
        let mut s = session();
        s.record_balance(1000.0);

        s.note_bet_placed(10.0); // outcome never resolved
        s.note_bet_placed(10.0);
        s.record_outcome(true);

        let stats = s.statistics(Utc::now());
        assert_eq!(stats.total_bets, 2);
        assert_eq!(stats.total_wins, 1);
        assert_eq!(stats.total_losses, 0);
    }

    #[test]
    fn test_stop_loss_flag_is_sticky() {
        let mut s = session();
        s.record_balance(1000.0);
        // 50% drawdown trips the default stop loss
        s.record_balance(500.0);
        assert_eq!(s.should_stop(Utc::now()), Some(StopReason::StopLoss));

        // Recovering past the threshold does not clear the flag
        s.record_balance(999.0);
        assert_eq!(s.should_stop(Utc::now()), Some(StopReason::StopLoss));
    }

    #[test]
    fn test_max_losses_flag_set_on_balance_read() {
        let mut s = session();
        s.record_balance(1_000_000.0);

        for _ in 0..10 {
            s.note_bet_placed(s.next_bet());
            s.record_outcome(false);
        }
        // The flag latches on the next balance refresh
        s.record_balance(900_000.0);
        assert_eq!(
            s.should_stop(Utc::now()),
            Some(StopReason::MaxConsecutiveLosses)
        );
    }

    #[test]
    fn test_insufficient_funds_when_balance_zero() {
        let config = BotConfig::default();
        // Disable the stop loss so the zero-balance check is what fires
        let mut risk = config.risk_management.clone();
        risk.enable_stop_loss = false;
        let mut s = Session::new(config.betting, risk);

        s.record_balance(1000.0);
        s.record_balance(0.0);
        assert_eq!(
            s.should_stop(Utc::now()),
            Some(StopReason::InsufficientFunds)
        );
    }

    #[test]
    fn test_stop_priority_order() {
        // Stop loss outranks insufficient funds when both hold
        let mut s = session();
        s.record_balance(1000.0);
        s.record_balance(0.0);
        assert_eq!(s.should_stop(Utc::now()), Some(StopReason::StopLoss));
    }

    #[test]
    fn test_session_time_limit() {
        let config = BotConfig::default();
        let mut risk = config.risk_management.clone();
        risk.enable_session_time_limit = true;
        risk.session_time_limit_hours = 1.0;

        let mut s = Session::new(config.betting, risk);
        s.record_balance(1000.0);

        assert_eq!(s.should_stop(Utc::now()), None);
        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(s.should_stop(later), Some(StopReason::SessionTimeLimit));
    }

    #[test]
    fn test_three_loss_recovery_scenario() {
        // 1000 start, 1% initial, 2.5x multiplier, cap disabled:
        // bets run 10, 25, 63, 158 and the win resets the cycle.
        let config = BotConfig::default();
        let mut risk = config.risk_management.clone();
        risk.enable_max_bet_limit = false;
        risk.enable_stop_loss = false;
        let mut s = Session::new(config.betting, risk);

        s.record_balance(1000.0);
        assert_eq!(s.next_bet(), 10.0);
        s.note_bet_placed(10.0);
        s.record_outcome(false);

        s.record_balance(990.0);
        assert_eq!(s.next_bet(), 25.0);
        s.note_bet_placed(25.0);
        s.record_outcome(false);

        s.record_balance(965.0);
        assert_eq!(s.next_bet(), 63.0); // 62.5 rounds up
        s.note_bet_placed(63.0);
        s.record_outcome(false);

        s.record_balance(902.0);
        assert_eq!(s.next_bet(), 158.0); // 157.5 rounds up
        s.note_bet_placed(158.0);
        s.record_outcome(true);

        assert_eq!(s.consecutive_losses(), 0);
        s.record_balance(1060.0);
        // Fresh cycle: 1% of the updated balance
        assert_eq!(s.next_bet(), 11.0);
    }

    #[test]
    fn test_win_rate_statistics() {
        let mut s = session();
        s.record_balance(1000.0);

        s.note_bet_placed(10.0);
        s.record_outcome(true);
        s.note_bet_placed(10.0);
        s.record_outcome(false);

        let stats = s.statistics(Utc::now());
        assert_eq!(stats.total_bets, 2);
        assert!((stats.win_rate - 50.0).abs() < 1e-9);
    }
}
