//! Quote Router
//!
//! Fans decoded quotes out to subscribers using tokio broadcast channels.
//!
//! # Architecture
//!
//! The `QuoteRouter` owns two channels:
//! - quotes, filtered per subscription by channel
//! - errors from the background pipeline, shared as `Arc<ClientError>`
//!
//! Publishing never blocks. A subscriber that falls behind by more than the
//! channel capacity skips the oldest quotes; other subscribers are unaffected.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::domain::channel::Channel;
use crate::domain::streaming::Quote;
use crate::infrastructure::intrinio::ClientError;
use crate::infrastructure::metrics;

// =============================================================================
// Filter
// =============================================================================

/// Which quotes a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteFilter {
    /// Every quote.
    All,
    /// Quotes whose ticker is in the set.
    Tickers(HashSet<String>),
}

impl QuoteFilter {
    /// Build a filter for a set of channels. Any lobby channel matches all.
    #[must_use]
    pub fn for_channels(channels: &[Channel]) -> Self {
        if channels.iter().any(Channel::is_lobby) {
            return Self::All;
        }
        Self::Tickers(channels.iter().map(|c| c.as_str().to_string()).collect())
    }

    /// Check whether a quote passes the filter.
    #[must_use]
    pub fn matches(&self, quote: &Quote) -> bool {
        match self {
            Self::All => true,
            Self::Tickers(tickers) => tickers.contains(&quote.ticker),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A filtered view of the quote stream.
///
/// Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct QuoteSubscription {
    rx: broadcast::Receiver<Quote>,
    filter: QuoteFilter,
}

impl QuoteSubscription {
    /// Wait for the next matching quote.
    ///
    /// Returns `None` once the router is dropped.
    pub async fn recv(&mut self) -> Option<Quote> {
        loop {
            match self.rx.recv().await {
                Ok(quote) if self.filter.matches(&quote) => return Some(quote),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Quote subscriber lagged, skipping quotes");
                    metrics::record_quotes_lagged(skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The filter applied to this subscription.
    #[must_use]
    pub const fn filter(&self) -> &QuoteFilter {
        &self.filter
    }

    /// Convert into a stream of matching quotes.
    pub fn into_stream(self) -> impl Stream<Item = Quote> + Send + Unpin + 'static {
        let filter = self.filter;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(quote) => filter.matches(&quote).then_some(quote),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Quote stream lagged, skipping quotes");
                metrics::record_quotes_lagged(skipped);
                None
            }
        })
    }
}

// =============================================================================
// Router
// =============================================================================

/// Fan-out hub for quotes and pipeline errors.
///
/// # Example
///
/// ```rust
/// use intrinio_realtime::infrastructure::broadcast::QuoteRouter;
///
/// let router = QuoteRouter::new(16, 4);
/// let _all = router.subscribe_all();
/// assert_eq!(router.quote_receiver_count(), 1);
/// ```
#[derive(Debug)]
pub struct QuoteRouter {
    quotes_tx: broadcast::Sender<Quote>,
    errors_tx: broadcast::Sender<Arc<ClientError>>,
}

impl QuoteRouter {
    /// Create a router with the given channel capacities.
    ///
    /// # Panics
    ///
    /// Panics if either capacity is zero.
    #[must_use]
    pub fn new(quote_capacity: usize, error_capacity: usize) -> Self {
        Self {
            quotes_tx: broadcast::channel(quote_capacity).0,
            errors_tx: broadcast::channel(error_capacity).0,
        }
    }

    /// Publish a quote to every subscriber.
    ///
    /// Returns the number of receivers, or `None` if there are none.
    pub fn route(&self, quote: Quote) -> Option<usize> {
        metrics::record_quote_routed();
        self.quotes_tx.send(quote).ok()
    }

    /// Publish a background error.
    pub fn publish_error(&self, error: ClientError) {
        metrics::record_error(error.kind());
        let _ = self.errors_tx.send(Arc::new(error));
    }

    /// Subscribe to every quote.
    #[must_use]
    pub fn subscribe_all(&self) -> QuoteSubscription {
        QuoteSubscription {
            rx: self.quotes_tx.subscribe(),
            filter: QuoteFilter::All,
        }
    }

    /// Subscribe to quotes for one channel.
    #[must_use]
    pub fn subscribe_channel(&self, channel: &Channel) -> QuoteSubscription {
        self.subscribe_channels(std::slice::from_ref(channel))
    }

    /// Subscribe to quotes for several channels.
    #[must_use]
    pub fn subscribe_channels(&self, channels: &[Channel]) -> QuoteSubscription {
        QuoteSubscription {
            rx: self.quotes_tx.subscribe(),
            filter: QuoteFilter::for_channels(channels),
        }
    }

    /// Subscribe to the error stream.
    #[must_use]
    pub fn errors(&self) -> broadcast::Receiver<Arc<ClientError>> {
        self.errors_tx.subscribe()
    }

    /// Number of live quote subscriptions.
    #[must_use]
    pub fn quote_receiver_count(&self) -> usize {
        self.quotes_tx.receiver_count()
    }
}

// =============================================================================
// Tests
// =============================================================================
