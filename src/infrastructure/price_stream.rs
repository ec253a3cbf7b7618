//! SSE price stream
//!
//! Best-effort polling loop re-emitting last-traded prices as server-sent
//! events. Consecutive failures stretch the poll delay linearly up to a small
//! cap; the SSE keep-alive comment keeps the transport open while no price
//! can be fetched. Not a guaranteed-delivery channel.

use crate::domain::repositories::quote_source::QuoteSource;
use axum::response::sse::Event;
use chrono::Utc;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Polling cadence and backoff bounds
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    pub backoff_step: Duration,
    pub max_backoff: Duration,
}

/// Build the event stream for one scrip.
///
/// Each successful poll yields an `ltp` event; failed polls yield nothing and
/// grow the delay by one backoff step, resetting on the next success.
pub fn price_events(
    quotes: Arc<dyn QuoteSource>,
    scrip: String,
    exchange: String,
    settings: StreamSettings,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(0u32, move |failures| {
        let quotes = quotes.clone();
        let scrip = scrip.clone();
        let exchange = exchange.clone();
        async move {
            let backoff = settings.backoff_step.saturating_mul(failures);
            let delay = (settings.poll_interval + backoff).min(settings.max_backoff);
            tokio::time::sleep(delay).await;

            match quotes.live_price(&scrip, &exchange).await {
                Some(quote) => {
                    let event = Event::default().event("ltp").data(
                        json!({
                            "scrip": quote.scrip,
                            "ltp": quote.ltp,
                            "at": Utc::now().to_rfc3339(),
                        })
                        .to_string(),
                    );
                    Some((Some(Ok(event)), 0))
                }
                None => {
                    debug!("No quote for {} ({} consecutive misses)", scrip, failures + 1);
                    Some((None, failures.saturating_add(1)))
                }
            }
        }
    })
    .filter_map(|item| async move { item })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::quote_source::Quote;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyQuotes {
        calls: AtomicU32,
    }

    #[async_trait]
    impl QuoteSource for FlakyQuotes {
        async fn live_price(&self, scrip: &str, _exchange: &str) -> Option<Quote> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // First two polls fail, then quotes flow
            if n < 2 {
                None
            } else {
                Some(Quote {
                    scrip: scrip.to_string(),
                    ltp: 100.0 + n as f64,
                    symbol_token: "1".to_string(),
                    trading_symbol: format!("{}-EQ", scrip),
                    scrip_full_name: scrip.to_string(),
                })
            }
        }
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            poll_interval: Duration::from_millis(1),
            backoff_step: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_stream_skips_failed_polls_and_recovers() {
        let quotes = Arc::new(FlakyQuotes {
            calls: AtomicU32::new(0),
        });
        let stream = price_events(
            quotes.clone(),
            "TCS".to_string(),
            "NSE".to_string(),
            settings(),
        );

        // The first emitted event comes from the third poll
        let mut stream = Box::pin(stream);
        let first = stream.next().await.unwrap().unwrap();
        drop(first);
        assert!(quotes.calls.load(Ordering::SeqCst) >= 3);
    }
}
