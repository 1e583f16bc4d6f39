//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated), any origin if unset
    pub client_origin: Option<String>,

    /// Per-battle options
    pub battle: BattleConfig,
    /// Matchmaking queue options
    pub matchmaking: MatchmakingConfig,
}

/// Options shared by every battle session.
///
/// Deployments that used to ship separate room variants differ only in
/// these values.
#[derive(Clone, Debug)]
pub struct BattleConfig {
    /// Interval between state patches
    pub patch_rate: Duration,
    /// Maximum number of members in one battle
    pub max_members: usize,
    /// Battles can only be joined with a match id handed out by matchmaking
    pub require_matchmaking: bool,
    /// Distinct ready signals needed before `game_can_start` fires
    pub ready_quorum: usize,
    /// Members needed before `start_game` is accepted
    pub min_start_members: usize,
    /// Delay between a death and the respawn
    pub respawn_delay: Duration,
    /// How long an empty battle waits for its first member
    pub seat_reservation: Duration,
    /// Accept client-asserted damage via the `hit` message
    pub allow_client_hits: bool,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            patch_rate: Duration::from_millis(50),
            max_members: 2,
            require_matchmaking: false,
            ready_quorum: 2,
            min_start_members: 2,
            respawn_delay: Duration::from_millis(2000),
            seat_reservation: Duration::from_millis(15_000),
            allow_client_hits: true,
        }
    }
}

/// Options for the matchmaking queue
#[derive(Clone, Debug)]
pub struct MatchmakingConfig {
    /// How long a proposed match waits for both accepts
    pub accept_timeout: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_millis(30_000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let battle_defaults = BattleConfig::default();
        let battle = BattleConfig {
            patch_rate: parse_millis(&lookup, "PATCH_RATE_MS", battle_defaults.patch_rate)?,
            max_members: parse_or(&lookup, "MAX_MEMBERS", battle_defaults.max_members)?,
            require_matchmaking: parse_or(
                &lookup,
                "REQUIRE_MATCHMAKING",
                battle_defaults.require_matchmaking,
            )?,
            ready_quorum: parse_or(&lookup, "READY_QUORUM", battle_defaults.ready_quorum)?,
            min_start_members: battle_defaults.min_start_members,
            respawn_delay: parse_millis(
                &lookup,
                "RESPAWN_DELAY_MS",
                battle_defaults.respawn_delay,
            )?,
            seat_reservation: parse_millis(
                &lookup,
                "SEAT_RESERVATION_MS",
                battle_defaults.seat_reservation,
            )?,
            allow_client_hits: parse_or(
                &lookup,
                "ALLOW_CLIENT_HITS",
                battle_defaults.allow_client_hits,
            )?,
        };

        if battle.patch_rate.is_zero() {
            return Err(ConfigError::Invalid("PATCH_RATE_MS"));
        }
        if battle.max_members == 0 {
            return Err(ConfigError::Invalid("MAX_MEMBERS"));
        }

        let matchmaking = MatchmakingConfig {
            accept_timeout: parse_millis(
                &lookup,
                "MATCH_ACCEPT_TIMEOUT_MS",
                MatchmakingConfig::default().accept_timeout,
            )?,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            client_origin: lookup("CLIENT_ORIGIN").filter(|origin| !origin.trim().is_empty()),

            battle,
            matchmaking,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
