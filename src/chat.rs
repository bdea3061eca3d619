//! Chat surface abstraction.
//!
//! The bot talks to the OwO channel through a [`ChatDriver`]: send a text
//! command, read back the most recent messages. A browser-automation driver
//! implements the same trait in deployment; [`SimulatedChat`] stands in for
//! paper runs and tests.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Mutex;
use thiserror::Error;

use crate::parser::format_cowoncy;

/// Command category, used by drivers to pick a pre-send delay range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    #[allow(dead_code)]
    General,
    CashCheck,
    Wager,
    Random,
    Alert,
}

/// Failures the chat surface can produce. All of them are recoverable:
/// callers log and treat the operation as inconclusive.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Raised by live drivers when the surface stops responding
    #[allow(dead_code)]
    #[error("chat surface timed out")]
    Timeout,
    #[error("chat surface unavailable: {0}")]
    SurfaceUnavailable(String),
}

#[async_trait]
pub trait ChatDriver: Send + Sync {
    /// Send a text command to the channel
    async fn send_command(&self, text: &str, kind: CommandKind) -> Result<(), ChatError>;

    /// Most recent visible messages, newest first
    async fn recent_messages(&self, limit: usize) -> Result<Vec<String>, ChatError>;
}

/// How many alert pings the simulator absorbs before the injected
/// challenge is considered handled and drops out of recent messages.
const SIM_ALERTS_TO_CLEAR: u32 = 2;

const SIM_CHALLENGE_TEXT: &str =
    "@User, are you a real human? Please use the link below so I can check! \
     Please complete this within 10 minutes or you will be banned.";

struct SimState {
    messages: Vec<String>,
    balance: f64,
    flips: u64,
    challenge_fired: bool,
    challenge_active: bool,
    alerts_seen: u32,
}

/// Paper-mode driver that emulates the OwO bot's coinflip responses.
///
/// Flips resolve instantly against a configurable win probability, so the
/// whole pipeline (balance reads, wager parsing, challenge handling) can
/// run without a real chat surface.
pub struct SimulatedChat {
    state: Mutex<SimState>,
    win_probability: f64,
    /// Post a verification challenge after this many flips, if set
    challenge_after: Option<u64>,
}

impl SimulatedChat {
    pub fn new(starting_balance: f64, win_probability: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                messages: vec!["Welcome to the channel!".to_string()],
                balance: starting_balance,
                flips: 0,
                challenge_fired: false,
                challenge_active: false,
                alerts_seen: 0,
            }),
            win_probability,
            challenge_after: None,
        }
    }

    /// Inject a verification challenge after `flips` coinflips
    pub fn with_challenge_after(mut self, flips: u64) -> Self {
        self.challenge_after = Some(flips);
        self
    }

    /// Current simulated balance (for assertions in tests)
    #[allow(dead_code)]
    pub fn balance(&self) -> f64 {
        self.state.lock().expect("sim state poisoned").balance
    }

    /// Alert pings absorbed since the challenge was posted
    #[allow(dead_code)]
    pub fn alerts_received(&self) -> u32 {
        self.state.lock().expect("sim state poisoned").alerts_seen
    }

    // Message text mimics what a browser driver reads back: rendered
    // chat, markdown already stripped.
    fn respond_cash(state: &mut SimState) {
        state.messages.push(format!(
            "\u{1f4b0} | User, you currently have {} cowoncy!",
            format_cowoncy(state.balance)
        ));
    }

    fn respond_flip(state: &mut SimState, amount: f64, won: bool) {
        state.balance -= amount;
        state.messages.push(format!(
            "User spent {} cowoncy on a coinflip and the coin spins...",
            format_cowoncy(amount)
        ));
        if won {
            state.balance += amount * 2.0;
            state.messages.push(format!(
                "\u{1fa99} | The coin landed on heads! You won {}!!",
                format_cowoncy(amount * 2.0)
            ));
        } else {
            state
                .messages
                .push("\u{1fa99} | The coin landed on tails... You lost it all...".to_string());
        }
        state.flips += 1;
    }

    fn maybe_post_challenge(&self, state: &mut SimState) {
        if let Some(after) = self.challenge_after {
            if !state.challenge_fired && state.flips >= after {
                state.challenge_fired = true;
                state.challenge_active = true;
                state.alerts_seen = 0;
            }
        }
    }

    fn absorb_alert(state: &mut SimState) {
        state.alerts_seen += 1;
        if state.alerts_seen >= SIM_ALERTS_TO_CLEAR {
            // Challenge handled: the prompt no longer shows up in chat
            state.challenge_active = false;
        }
    }
}

#[async_trait]
impl ChatDriver for SimulatedChat {
    async fn send_command(&self, text: &str, kind: CommandKind) -> Result<(), ChatError> {
        let won = rand::thread_rng().gen_bool(self.win_probability.clamp(0.0, 1.0));
        let mut state = self.state.lock().expect("sim state poisoned");

        if kind == CommandKind::Alert {
            state.messages.push(text.to_string());
            Self::absorb_alert(&mut state);
            return Ok(());
        }

        match text {
            "w cash" => Self::respond_cash(&mut state),
            "w b" => state
                .messages
                .push("\u{1f916} | **User** battled a wild creature!".to_string()),
            "w h" => state
                .messages
                .push("\u{1f43e} | **User** went hunting and caught something!".to_string()),
            cmd if cmd.starts_with("w cf ") => {
                let amount: f64 = cmd
                    .trim_start_matches("w cf ")
                    .trim()
                    .parse()
                    .map_err(|_| ChatError::SurfaceUnavailable("bad wager amount".into()))?;
                if amount > state.balance {
                    state
                        .messages
                        .push("\u{274c} | You don't have enough cowoncy!".to_string());
                } else {
                    Self::respond_flip(&mut state, amount, won);
                }
            }
            other => state.messages.push(other.to_string()),
        }

        self.maybe_post_challenge(&mut state);
        Ok(())
    }

    async fn recent_messages(&self, limit: usize) -> Result<Vec<String>, ChatError> {
        let state = self.state.lock().expect("sim state poisoned");
        let mut batch: Vec<String> = Vec::with_capacity(limit);
        // A pending challenge stays pinned at the top of chat until handled
        if state.challenge_active {
            batch.push(SIM_CHALLENGE_TEXT.to_string());
        }
        batch.extend(
            state
                .messages
                .iter()
                .rev()
                .take(limit.saturating_sub(batch.len()))
                .cloned(),
        );
        Ok(batch)
    }
}
