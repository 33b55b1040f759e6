//! Market Data Streaming Types
//!
//! Core domain type for quote events delivered by the feed. Quotes are
//! immutable once decoded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single quote event.
///
/// # Wire Format
///
/// ```json
/// {"ticker":"AAPL","type":"ask","price":150.25,"size":"100","timestamp":1700000000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol.
    pub ticker: String,
    /// Quote side or kind (e.g. `bid`, `ask`, `last`).
    #[serde(rename = "type")]
    pub quote_type: String,
    /// Quoted price.
    pub price: Decimal,
    /// Quoted size, as sent by the feed.
    pub size: String,
    /// Epoch timestamp in seconds.
    pub timestamp: i64,
}

impl Quote {
    /// The quote timestamp as a UTC datetime.
    ///
    /// Returns `None` if the epoch value is outside chrono's range.
    #[must_use]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}
