pub mod challenge;
pub mod metrics;
pub mod trade;
