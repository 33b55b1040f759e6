//! Channel Types
//!
//! Caller-facing channel identifiers and the registry of channels the caller
//! wants joined.
//!
//! # Channel Forms
//!
//! - `$lobby`: every quote on the feed (`iex:lobby`)
//! - `$lobby_last_price`: last-price updates for every security
//!   (`iex:lobby:last_price`)
//! - any other 1-20 character string: a single ticker
//!   (`iex:securities:<ticker>`)
//!
//! The registry is independent of socket lifetime: it survives reconnects and
//! is replayed as join requests after each successful reconnect.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

/// Aggregate channel carrying every quote on the feed.
pub const LOBBY: &str = "$lobby";

/// Aggregate channel carrying last-price updates for every security.
pub const LOBBY_LAST_PRICE: &str = "$lobby_last_price";

/// Maximum length of a channel name, in characters, after trimming.
pub const MAX_CHANNEL_LEN: usize = 20;

const LOBBY_TOPIC: &str = "iex:lobby";
const LOBBY_LAST_PRICE_TOPIC: &str = "iex:lobby:last_price";
const SECURITY_TOPIC_PREFIX: &str = "iex:securities:";

// =============================================================================
// Error Type
// =============================================================================

/// Errors produced when validating a channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The name is empty or longer than [`MAX_CHANNEL_LEN`] after trimming.
    #[error("invalid channel {0:?}: must be 1-{MAX_CHANNEL_LEN} characters")]
    InvalidChannel(String),
}

// =============================================================================
// Pure Functions
// =============================================================================

/// Validate a channel name and return its canonical (trimmed) form.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidChannel`] when the trimmed name is empty or
/// longer than [`MAX_CHANNEL_LEN`] characters.
pub fn validate_channel(name: &str) -> Result<String, ChannelError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();

    if len == 0 || len > MAX_CHANNEL_LEN {
        return Err(ChannelError::InvalidChannel(name.to_string()));
    }

    Ok(trimmed.to_string())
}

/// Map a channel name to its wire-level topic.
#[must_use]
pub fn channel_to_topic(name: &str) -> String {
    match name {
        LOBBY => LOBBY_TOPIC.to_string(),
        LOBBY_LAST_PRICE => LOBBY_LAST_PRICE_TOPIC.to_string(),
        ticker => format!("{SECURITY_TOPIC_PREFIX}{ticker}"),
    }
}

// =============================================================================
// Channel
// =============================================================================

/// A validated channel name.
///
/// Construction always goes through [`validate_channel`], so a `Channel` value
/// is never empty and never longer than [`MAX_CHANNEL_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(String);

impl Channel {
    /// Parse and validate a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidChannel`] for empty or overlong names.
    pub fn parse(name: &str) -> Result<Self, ChannelError> {
        validate_channel(name).map(Self)
    }

    /// Parse a batch of channel names, failing on the first invalid one.
    ///
    /// # Errors
    ///
    /// Returns the error for the first invalid name; no channel is returned
    /// in that case.
    pub fn parse_all<I, S>(names: I) -> Result<Vec<Self>, ChannelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().map(|n| Self::parse(n.as_ref())).collect()
    }

    /// The canonical channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The wire-level topic for this channel.
    #[must_use]
    pub fn topic(&self) -> String {
        channel_to_topic(&self.0)
    }

    /// Whether this is one of the aggregate lobby channels.
    #[must_use]
    pub fn is_lobby(&self) -> bool {
        self.0 == LOBBY || self.0 == LOBBY_LAST_PRICE
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Channel {
    type Error = ChannelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Channel Registry
// =============================================================================

/// The set of channels the caller currently wants joined.
///
/// Not synchronized on its own; the connection manager serializes access.
#[derive(Debug, Default, Clone)]
pub struct ChannelRegistry {
    channels: HashSet<Channel>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. Returns `true` if it was not already present.
    pub fn add(&mut self, channel: Channel) -> bool {
        self.channels.insert(channel)
    }

    /// Remove a channel. Returns `true` if it was present.
    pub fn remove(&mut self, channel: &Channel) -> bool {
        self.channels.remove(channel)
    }

    /// Check whether a channel is registered.
    #[must_use]
    pub fn contains(&self, channel: &Channel) -> bool {
        self.channels.contains(channel)
    }

    /// Snapshot of every registered channel, in no particular order.
    #[must_use]
    pub fn all(&self) -> Vec<Channel> {
        self.channels.iter().cloned().collect()
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
