use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::p2p::TopicChannel;
use crate::quote::QuoteSource;

/// Where the producer sends its formatted ticks.
#[async_trait]
pub trait FeedPublisher {
    async fn publish(&self, data: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl FeedPublisher for TopicChannel {
    async fn publish(&self, data: Vec<u8>) -> Result<()> {
        TopicChannel::publish(self, data).await
    }
}

/// Formats one price tick, e.g. `BTC: $64123.46`.
pub fn format_tick(symbol: &str, price: f64) -> String {
    format!("{symbol}: ${price:.2}")
}

/// Periodically fetches a quote and publishes the formatted tick.
///
/// No iteration failure is fatal; the loop runs until cancelled.
pub struct Producer<Q, P> {
    symbol: String,
    period: Duration,
    quotes: Q,
    publisher: P,
    cancel: CancellationToken,
}

impl<Q: QuoteSource, P: FeedPublisher> Producer<Q, P> {
    pub fn new(
        symbol: impl Into<String>,
        period: Duration,
        quotes: Q,
        publisher: P,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            quotes,
            publisher,
            cancel,
        }
    }

    pub async fn run(self) {
        info!(
            symbol = %self.symbol,
            period_secs = self.period.as_secs(),
            "starting producer"
        );
        // First tick lands one full period after startup.
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("producer stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let price = match self.quotes.latest_price(&self.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(error = %e, "failed to get price");
                    continue;
                }
            };

            let message = format_tick(&self.symbol, price);
            match self.publisher.publish(message.clone().into_bytes()).await {
                Ok(()) => info!(%message, "emitting message"),
                Err(e) => warn!(error = %e, "failed to publish message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FlakyQuotes {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl QuoteSource for FlakyQuotes {
        async fn latest_price(&self, _symbol: &str) -> Result<f64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(anyhow!("quote service down"))
            } else {
                Ok(42.0)
            }
        }
    }

    /// Records every publish and cancels the producer after the first one.
    struct CountingPublisher {
        published: Arc<Mutex<Vec<Vec<u8>>>>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl FeedPublisher for CountingPublisher {
        async fn publish(&self, data: Vec<u8>) -> Result<()> {
            self.published.lock().unwrap().push(data);
            self.cancel.cancel();
            Ok(())
        }
    }

    #[test]
    fn formats_ticks_with_two_decimals() {
        assert_eq!(format_tick("ETH", 3123.456), "ETH: $3123.46");
        assert_eq!(format_tick("BTC", 42.0), "BTC: $42.00");
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failures_do_not_stop_later_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let published = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let producer = Producer::new(
            "BTC",
            Duration::from_secs(30),
            FlakyQuotes {
                calls: Arc::clone(&calls),
                failures: 2,
            },
            CountingPublisher {
                published: Arc::clone(&published),
                cancel: cancel.clone(),
            },
            cancel,
        );
        producer.run().await;

        // Two failed ticks, then exactly one publish on the third.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let published = published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].as_slice(), b"BTC: $42.00");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_before_any_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let published = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let producer = Producer::new(
            "BTC",
            Duration::from_secs(30),
            FlakyQuotes {
                calls: Arc::clone(&calls),
                failures: 0,
            },
            CountingPublisher {
                published: Arc::clone(&published),
                cancel: cancel.clone(),
            },
            cancel,
        );
        producer.run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(published.lock().unwrap().is_empty());
    }
}
