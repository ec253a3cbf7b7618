//! Quote lookup and streaming endpoints.

use crate::application::SharedState;
use crate::domain::errors::ApiError;
use crate::infrastructure::price_stream::price_events;
use crate::persistence::repository::MockQuoteRepository;
use axum::{
    extract::{Path, Query, State},
    response::sse::{KeepAlive, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub struct PriceQuery {
    pub exchange: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub scrip: String,
    pub ltp: f64,
    pub scrip_full_name: Option<String>,
    /// "live" or "fallback"
    pub source: &'static str,
}

/// GET /prices/:scrip
pub async fn get_price(
    State(state): State<SharedState>,
    Path(scrip): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    let exchange = query
        .exchange
        .unwrap_or_else(|| state.config.default_exchange.clone());

    if let Some(quote) = state.quotes.live_price(&scrip, &exchange).await {
        return Ok(Json(PriceResponse {
            scrip: quote.scrip,
            ltp: quote.ltp,
            scrip_full_name: Some(quote.scrip_full_name),
            source: "live",
        }));
    }

    let mocks = MockQuoteRepository::new(state.pool.clone());
    if let Some(row) = mocks.get(&scrip).await? {
        return Ok(Json(PriceResponse {
            scrip: row.scrip,
            ltp: row.ltp,
            scrip_full_name: row.scrip_full_name,
            source: "fallback",
        }));
    }

    Err(ApiError::NotFound(format!("no quote available for {scrip}")))
}

/// GET /prices/stream/:scrip: server-sent events, one `ltp` event per poll
pub async fn stream_price(
    State(state): State<SharedState>,
    Path(scrip): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Sse<impl futures_util::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>
{
    let exchange = query
        .exchange
        .unwrap_or_else(|| state.config.default_exchange.clone());
    let stream = price_events(state.quotes.clone(), scrip, exchange, state.config.stream);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
