//! Engine configuration: presence timings, the card deck, and local identity retention.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/engine.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PLANNING_POKER_CONFIG_PATH";
/// Local user identities are reused for at most this long.
pub const DEFAULT_IDENTITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound spent on the final `lastSeen = 0` publish when leaving a room.
pub const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_secs(2);
/// Card value that never takes part in numeric statistics.
pub const UNSURE_CARD: &str = "?";
/// Built-in card deck in display order.
pub const DEFAULT_CARDS: [&str; 12] = [
    "0", "1", "2", "3", "5", "8", "13", "20", "35", "50", "100", UNSURE_CARD,
];

/// Liveness timings of the presence protocol.
///
/// The three values only make sense together: a participant is swept once it has been silent for
/// `participant_timeout`, the local sweep runs every `cleanup_interval`, and every client
/// publishes a heartbeat every `heartbeat_interval`. [`PresenceConfig::validate`] enforces
/// `cleanup_interval < participant_timeout` and `heartbeat_interval <= participant_timeout / 2`
/// so at least one heartbeat lands before a live participant could be swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    /// How often a client publishes its own `lastSeen`.
    pub heartbeat_interval: Duration,
    /// How often the local snapshot is swept for stale participants.
    pub cleanup_interval: Duration,
    /// Age beyond which a participant is no longer a member of the room.
    pub participant_timeout: Duration,
}

/// Reasons a set of presence timings is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresenceConfigError {
    /// One of the intervals is zero.
    #[error("presence intervals must be strictly positive")]
    ZeroInterval,
    /// The sweep would run less often than a participant can go stale.
    #[error("cleanup interval {cleanup:?} must be shorter than participant timeout {timeout:?}")]
    CleanupTooSlow {
        /// Configured cleanup interval.
        cleanup: Duration,
        /// Configured participant timeout.
        timeout: Duration,
    },
    /// Heartbeats are too sparse to keep a live participant fresh.
    #[error("heartbeat interval {heartbeat:?} must be at most half of participant timeout {timeout:?}")]
    HeartbeatTooSlow {
        /// Configured heartbeat interval.
        heartbeat: Duration,
        /// Configured participant timeout.
        timeout: Duration,
    },
}

impl PresenceConfig {
    /// Named default preset: heartbeat every 3s, sweep every 2s, stale after 10s.
    pub const STANDARD: Self = Self {
        heartbeat_interval: Duration::from_secs(3),
        cleanup_interval: Duration::from_secs(2),
        participant_timeout: Duration::from_secs(10),
    };

    /// Check the ordering relationship between the three timings.
    pub fn validate(&self) -> Result<(), PresenceConfigError> {
        if self.heartbeat_interval.is_zero()
            || self.cleanup_interval.is_zero()
            || self.participant_timeout.is_zero()
        {
            return Err(PresenceConfigError::ZeroInterval);
        }
        if self.cleanup_interval >= self.participant_timeout {
            return Err(PresenceConfigError::CleanupTooSlow {
                cleanup: self.cleanup_interval,
                timeout: self.participant_timeout,
            });
        }
        if self.heartbeat_interval * 2 > self.participant_timeout {
            return Err(PresenceConfigError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval,
                timeout: self.participant_timeout,
            });
        }
        Ok(())
    }

    /// Participant timeout in milliseconds, the unit used by row timestamps.
    pub fn timeout_ms(&self) -> i64 {
        self.participant_timeout.as_millis() as i64
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Ordered set of card values a participant may vote with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDeck {
    cards: Vec<String>,
}

impl CardDeck {
    /// Build a deck from explicit values, keeping their order.
    pub fn new<I, S>(cards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cards: cards.into_iter().map(Into::into).collect(),
        }
    }

    /// All cards in display order.
    pub fn cards(&self) -> &[String] {
        &self.cards
    }

    /// Whether `value` is one of the deck's cards.
    pub fn contains(&self, value: &str) -> bool {
        self.cards.iter().any(|card| card == value)
    }

    /// Position of `value` in the deck.
    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.cards.iter().position(|card| card == value)
    }
}

impl Default for CardDeck {
    fn default() -> Self {
        Self::new(DEFAULT_CARDS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared by every session of a client.
pub struct EngineConfig {
    /// Presence protocol timings.
    pub presence: PresenceConfig,
    /// Cards accepted as votes.
    pub deck: CardDeck,
    /// Maximum age of a locally remembered user identity.
    pub identity_ttl: Duration,
    /// Upper bound spent publishing the final leave notification.
    pub leave_timeout: Duration,
}

impl EngineConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load the configuration from `path`, falling back to built-in defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        cards = config.deck.cards().len(),
                        "loaded engine configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        Ok(raw.into())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            presence: PresenceConfig::STANDARD,
            deck: CardDeck::default(),
            identity_ttl: DEFAULT_IDENTITY_TTL,
            leave_timeout: DEFAULT_LEAVE_TIMEOUT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    presence: Option<RawPresence>,
    #[serde(default)]
    cards: Option<Vec<String>>,
    #[serde(default)]
    identity_ttl_secs: Option<u64>,
    #[serde(default)]
    leave_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of the presence timings, in milliseconds.
struct RawPresence {
    heartbeat_interval_ms: u64,
    cleanup_interval_ms: u64,
    participant_timeout_ms: u64,
}

impl From<RawPresence> for PresenceConfig {
    fn from(value: RawPresence) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(value.heartbeat_interval_ms),
            cleanup_interval: Duration::from_millis(value.cleanup_interval_ms),
            participant_timeout: Duration::from_millis(value.participant_timeout_ms),
        }
    }
}

impl From<RawConfig> for EngineConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();

        let presence = match value.presence.map(PresenceConfig::from) {
            Some(presence) => match presence.validate() {
                Ok(()) => presence,
                Err(err) => {
                    warn!(error = %err, "rejecting presence timings; using standard preset");
                    defaults.presence
                }
            },
            None => defaults.presence,
        };

        let deck = match value.cards {
            Some(cards) if !cards.is_empty() => CardDeck::new(cards),
            Some(_) => {
                warn!("configured card deck is empty; using built-in deck");
                defaults.deck
            }
            None => defaults.deck,
        };

        Self {
            presence,
            deck,
            identity_ttl: value
                .identity_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.identity_ttl),
            leave_timeout: value
                .leave_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.leave_timeout),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_preset_is_self_consistent() {
        assert_eq!(PresenceConfig::STANDARD.validate(), Ok(()));
    }

    #[test]
    fn rejects_slow_cleanup() {
        let config = PresenceConfig {
            cleanup_interval: Duration::from_secs(10),
            ..PresenceConfig::STANDARD
        };
        assert!(matches!(
            config.validate(),
            Err(PresenceConfigError::CleanupTooSlow { .. })
        ));
    }

    #[test]
    fn rejects_sparse_heartbeat() {
        let config = PresenceConfig {
            heartbeat_interval: Duration::from_secs(6),
            ..PresenceConfig::STANDARD
        };
        assert!(matches!(
            config.validate(),
            Err(PresenceConfigError::HeartbeatTooSlow { .. })
        ));
    }

    #[test]
    fn parses_partial_json() {
        let config = EngineConfig::from_json(r#"{"cards": ["1", "2", "?"]}"#).unwrap();
        assert_eq!(config.deck.cards().len(), 3);
        assert_eq!(config.presence, PresenceConfig::STANDARD);
        assert_eq!(config.identity_ttl, DEFAULT_IDENTITY_TTL);
    }

    #[test]
    fn invalid_presence_falls_back_to_standard() {
        let config = EngineConfig::from_json(
            r#"{"presence": {"heartbeat_interval_ms": 9000, "cleanup_interval_ms": 2000, "participant_timeout_ms": 10000}}"#,
        )
        .unwrap();
        assert_eq!(config.presence, PresenceConfig::STANDARD);
    }

    #[test]
    fn load_from_reads_file_and_tolerates_missing_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        assert_eq!(EngineConfig::load_from(&path), EngineConfig::default());

        fs::write(&path, r#"{"leave_timeout_ms": 250}"#).unwrap();
        let config = EngineConfig::load_from(&path);
        assert_eq!(config.leave_timeout, Duration::from_millis(250));

        fs::write(&path, "not json").unwrap();
        assert_eq!(EngineConfig::load_from(&path), EngineConfig::default());
    }

    #[test]
    fn deck_lookup() {
        let deck = CardDeck::default();
        assert_eq!(deck.index_of("13"), Some(6));
        assert!(deck.contains(UNSURE_CARD));
        assert!(!deck.contains("4"));
    }
}
