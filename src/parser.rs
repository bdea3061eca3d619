//! Interpretation of raw chat text.
//!
//! The OwO bot answers in free-form messages that may repeat, truncate, or
//! interleave with unrelated chatter. Everything here is a pure function
//! over message batches (newest first) so the classification rules stay
//! unit-testable with literal fixtures.

use once_cell::sync::Lazy;
use regex::Regex;

/// `1,234,567 cowoncy`: thousands-separated amount right before the keyword
static BALANCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:,\d+)*)\s*cowoncy").expect("invalid balance regex"));

/// `you won **200**!!` with the bold markers optional
static WIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)you won (?:\*\*)?(\d+(?:,\d+)*)(?:\*\*)?!!").expect("invalid win regex")
});

/// The exact phrase OwO uses for a lost coinflip
const LOSS_PHRASE: &str = "lost it all";

/// Resolved result of a single coinflip wager
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlipOutcome {
    Win { payout: f64 },
    Loss,
    /// No win/loss marker found. Never counts as a win or a loss.
    Unknown,
}

/// Render an amount the way OwO prints it: whole units, comma-grouped
pub fn format_cowoncy(amount: f64) -> String {
    let whole = amount.round().max(0.0) as u64;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

fn parse_grouped(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

/// Extract the current balance from a message batch.
///
/// Scans newest-first for a message mentioning the currency keyword and
/// takes the separated integer immediately before it. Returns `None` when
/// no message carries a readable balance.
pub fn extract_balance(messages: &[String]) -> Option<f64> {
    for message in messages {
        if !message.to_lowercase().contains("cowoncy") {
            continue;
        }
        if let Some(caps) = BALANCE_RE.captures(message) {
            if let Some(value) = parse_grouped(&caps[1]) {
                return Some(value);
            }
        }
    }
    None
}

/// Whether the batch contains the acknowledgement that our wager was taken
/// (the spend phrase together with the spinning-coin phrase).
pub fn flip_acknowledged(messages: &[String]) -> bool {
    messages.iter().any(|m| {
        let lower = m.to_lowercase();
        lower.contains("spent") && lower.contains("coin spins")
    })
}

/// Classify the flip result from a message batch.
///
/// A win marker yields [`FlipOutcome::Win`] with the payout next to the
/// marker, defaulting to twice the stake when the number is unreadable.
/// The loss phrase yields [`FlipOutcome::Loss`] regardless of amount.
pub fn classify_outcome(messages: &[String], expected_bet: f64) -> FlipOutcome {
    for message in messages {
        let lower = message.to_lowercase();
        if lower.contains("you won") {
            let payout = WIN_RE
                .captures(message)
                .and_then(|caps| parse_grouped(&caps[1]))
                .unwrap_or(expected_bet * 2.0);
            return FlipOutcome::Win { payout };
        }
        if lower.contains(LOSS_PHRASE) {
            return FlipOutcome::Loss;
        }
    }
    FlipOutcome::Unknown
}

/// Late-repoll classifier: only trusts a win/loss marker when the same
/// message also carries our stake as a standalone token. Keeps a stale
/// marker from an earlier flip (or someone else's) from being claimed as
/// ours.
pub fn classify_outcome_anchored(messages: &[String], expected_bet: f64) -> FlipOutcome {
    let grouped = format_cowoncy(expected_bet);
    let plain = format!("{}", expected_bet.round().max(0.0) as u64);
    let anchor = Regex::new(&format!(
        r"\b(?:{}|{})\b",
        regex::escape(&grouped),
        regex::escape(&plain)
    ))
    .expect("invalid anchor regex");

    for message in messages {
        if !anchor.is_match(message) {
            continue;
        }
        let lower = message.to_lowercase();
        if lower.contains("you won") {
            let payout = WIN_RE
                .captures(message)
                .and_then(|caps| parse_grouped(&caps[1]))
                .unwrap_or(expected_bet * 2.0);
            return FlipOutcome::Win { payout };
        }
        if lower.contains(LOSS_PHRASE) {
            return FlipOutcome::Loss;
        }
    }
    FlipOutcome::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_balance_grouped() {
        let messages = batch(&["You have 1,234,567 cowoncy"]);
        assert_eq!(extract_balance(&messages), Some(1_234_567.0));
    }

    #[test]
    fn test_extract_balance_skips_unrelated_messages() {
        let messages = batch(&[
            "gl on the next flip!",
            "\u{1f4b0} | **User**, you currently have **98,100** cowoncy!",
        ]);
        assert_eq!(extract_balance(&messages), Some(98_100.0));
    }

    #[test]
    fn test_extract_balance_missing_keyword() {
        let messages = batch(&["You have 1,234,567 coins"]);
        assert_eq!(extract_balance(&messages), None);
    }

    #[test]
    fn test_extract_balance_case_insensitive() {
        let messages = batch(&["You currently have 500 Cowoncy!"]);
        assert_eq!(extract_balance(&messages), Some(500.0));
    }

    #[test]
    fn test_flip_acknowledged_requires_both_phrases() {
        assert!(flip_acknowledged(&batch(&[
            "**User** spent **100** cowoncy on a coinflip and the coin spins..."
        ])));
        assert!(!flip_acknowledged(&batch(&["**User** spent **100** cowoncy"])));
        assert!(!flip_acknowledged(&batch(&["the coin spins..."])));
    }

    #[test]
    fn test_classify_win_with_payout() {
        let messages = batch(&["The coin landed on heads! You won **200**!!"]);
        assert_eq!(
            classify_outcome(&messages, 100.0),
            FlipOutcome::Win { payout: 200.0 }
        );
    }

    #[test]
    fn test_classify_win_payout_defaults_to_double() {
        let messages = batch(&["you won the flip!!"]);
        assert_eq!(
            classify_outcome(&messages, 100.0),
            FlipOutcome::Win { payout: 200.0 }
        );
    }

    #[test]
    fn test_classify_loss() {
        let messages = batch(&["The coin landed on tails... You lost it all..."]);
        assert_eq!(classify_outcome(&messages, 100.0), FlipOutcome::Loss);
    }

    #[test]
    fn test_classify_unrelated_is_unknown() {
        let messages = batch(&["anyone up for a trade?", "w h"]);
        assert_eq!(classify_outcome(&messages, 100.0), FlipOutcome::Unknown);
    }

    #[test]
    fn test_win_beats_loss_in_newer_message() {
        // Newest first: the win belongs to the latest flip
        let messages = batch(&[
            "You won **500**!!",
            "You lost it all...",
        ]);
        assert_eq!(
            classify_outcome(&messages, 250.0),
            FlipOutcome::Win { payout: 500.0 }
        );
    }

    #[test]
    fn test_anchored_requires_amount_token() {
        // Marker present but the stake (158) appears nowhere
        let messages = batch(&["Somebody else just won **42**!!"]);
        assert_eq!(
            classify_outcome_anchored(&messages, 158.0),
            FlipOutcome::Unknown
        );

        let messages = batch(&["**User** bet 158 and... You lost it all..."]);
        assert_eq!(classify_outcome_anchored(&messages, 158.0), FlipOutcome::Loss);
    }

    #[test]
    fn test_anchored_rejects_partial_digit_match() {
        // 158 must not match inside 3158
        let messages = batch(&["**User** bet 3158 and... You lost it all..."]);
        assert_eq!(
            classify_outcome_anchored(&messages, 158.0),
            FlipOutcome::Unknown
        );
    }

    #[test]
    fn test_anchored_matches_grouped_amount() {
        let messages = batch(&["You won **2,500**!! (stake 1,250)"]);
        assert_eq!(
            classify_outcome_anchored(&messages, 1250.0),
            FlipOutcome::Win { payout: 2500.0 }
        );
    }

    #[test]
    fn test_format_cowoncy_grouping() {
        assert_eq!(format_cowoncy(0.0), "0");
        assert_eq!(format_cowoncy(158.0), "158");
        assert_eq!(format_cowoncy(1250.0), "1,250");
        assert_eq!(format_cowoncy(1_234_567.0), "1,234,567");
    }
}
