use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bot configuration loaded from YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub betting: BettingConfig,
    pub risk_management: RiskConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingConfig {
    /// First bet of a cycle as % of current balance
    pub initial_bet_percentage: f64,
    /// Multiply the previous bet by this after a loss
    pub loss_multiplier: f64,
    /// Floor for every computed bet (whole cowoncy)
    pub min_bet_amount: f64,
    /// Stop after this many losses in a row
    pub max_consecutive_losses: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Stop once the balance has dropped by stop_loss_percentage
    pub enable_stop_loss: bool,
    pub stop_loss_percentage: f64,
    /// Stop once profit reaches profit_target_percentage of start
    pub enable_profit_target: bool,
    pub profit_target_percentage: f64,
    /// Never bet more than max_bet_percentage of current balance
    pub enable_max_bet_limit: bool,
    pub max_bet_percentage: f64,
    /// Stop after session_time_limit_hours of runtime
    pub enable_session_time_limit: bool,
    pub session_time_limit_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Occasionally send harmless decoy commands
    #[serde(default = "default_true")]
    pub enable_random_commands: bool,
    /// Per-cycle chance of a decoy command (0..1)
    #[serde(default = "default_random_command_chance")]
    pub random_command_chance: f64,
    /// Cooldown per decoy command (seconds)
    #[serde(default = "default_random_command_cooldown")]
    pub random_command_cooldown_seconds: u64,
    /// Delay range before a wager (seconds)
    #[serde(default = "default_bet_delay_min")]
    pub bet_delay_min_seconds: u64,
    #[serde(default = "default_bet_delay_max")]
    pub bet_delay_max_seconds: u64,
    /// Delay range before any other command (seconds)
    #[serde(default = "default_command_delay_min")]
    pub command_delay_min_seconds: u64,
    #[serde(default = "default_command_delay_max")]
    pub command_delay_max_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Watch chat for human-verification challenges
    #[serde(default = "default_true")]
    pub enable_verification_protection: bool,
    /// Seconds between challenge polls
    #[serde(default = "default_verification_interval")]
    pub verification_check_interval_seconds: u64,
    /// Ping the channel while a challenge is pending
    #[serde(default = "default_true")]
    pub enable_verification_alerts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit the statistics report every N resolved bets
    #[serde(default = "default_stats_interval")]
    pub log_statistics_interval_bets: u32,
}

fn default_true() -> bool { true }
fn default_random_command_chance() -> f64 { 0.3 }
fn default_random_command_cooldown() -> u64 { 15 }
fn default_bet_delay_min() -> u64 { 8 }
fn default_bet_delay_max() -> u64 { 15 }
fn default_command_delay_min() -> u64 { 1 }
fn default_command_delay_max() -> u64 { 4 }
fn default_verification_interval() -> u64 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_stats_interval() -> u32 { 10 }

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enable_random_commands: true,
            random_command_chance: 0.3,
            random_command_cooldown_seconds: 15,
            bet_delay_min_seconds: 8,
            bet_delay_max_seconds: 15,
            command_delay_min_seconds: 1,
            command_delay_max_seconds: 4,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enable_verification_protection: true,
            verification_check_interval_seconds: 5,
            enable_verification_alerts: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_statistics_interval_bets: 10,
        }
    }
}

impl BotConfig {
    /// Load configuration from YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: BotConfig = serde_yaml::from_str(&contents)
            .with_context(|| "Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;

        if let Ok(val) = std::env::var("BOT_INITIAL_BET_PCT") {
            config.betting.initial_bet_percentage =
                val.parse().unwrap_or(config.betting.initial_bet_percentage);
        }
        if let Ok(val) = std::env::var("BOT_LOSS_MULTIPLIER") {
            config.betting.loss_multiplier = val.parse().unwrap_or(config.betting.loss_multiplier);
        }
        if let Ok(val) = std::env::var("BOT_MAX_CONSECUTIVE_LOSSES") {
            config.betting.max_consecutive_losses =
                val.parse().unwrap_or(config.betting.max_consecutive_losses);
        }
        if let Ok(val) = std::env::var("BOT_STOP_LOSS_PCT") {
            config.risk_management.stop_loss_percentage =
                val.parse().unwrap_or(config.risk_management.stop_loss_percentage);
        }
        if let Ok(val) = std::env::var("BOT_STATS_INTERVAL") {
            config.logging.log_statistics_interval_bets =
                val.parse().unwrap_or(config.logging.log_statistics_interval_bets);
        }

        config.validate()?;
        Ok(config)
    }

    /// Save this configuration as a named profile
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize configuration")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// List the named profiles (file stems) in a config directory
    pub fn list_profiles(dir: &Path) -> Result<Vec<String>> {
        let mut profiles = Vec::new();
        if !dir.exists() {
            return Ok(profiles);
        }
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read config dir: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    profiles.push(stem.to_string());
                }
            }
        }
        profiles.sort();
        Ok(profiles)
    }

    /// Resolve a profile name to its path within a config directory
    pub fn profile_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.yaml"))
    }

    fn validate(&self) -> Result<()> {
        if self.betting.initial_bet_percentage <= 0.0 {
            anyhow::bail!("betting.initial_bet_percentage must be positive");
        }
        if self.betting.loss_multiplier < 1.0 {
            anyhow::bail!("betting.loss_multiplier must be >= 1.0");
        }
        if self.betting.min_bet_amount < 1.0 {
            anyhow::bail!("betting.min_bet_amount must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.automation.random_command_chance) {
            anyhow::bail!("automation.random_command_chance must be within 0..1");
        }
        if self.automation.bet_delay_min_seconds > self.automation.bet_delay_max_seconds {
            anyhow::bail!("automation.bet_delay range is inverted");
        }
        if self.automation.command_delay_min_seconds > self.automation.command_delay_max_seconds {
            anyhow::bail!("automation.command_delay range is inverted");
        }
        Ok(())
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            betting: BettingConfig {
                initial_bet_percentage: 1.0,
                loss_multiplier: 2.5,
                min_bet_amount: 1.0,
                max_consecutive_losses: 10,
            },
            risk_management: RiskConfig {
                enable_stop_loss: true,
                stop_loss_percentage: 50.0,
                enable_profit_target: false,
                profit_target_percentage: 100.0,
                enable_max_bet_limit: true,
                max_bet_percentage: 10.0,
                enable_session_time_limit: false,
                session_time_limit_hours: 24.0,
            },
            automation: AutomationConfig::default(),
            verification: VerificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
