pub mod broker;
pub mod instrument_cache;
pub mod price_bridge;
pub mod price_stream;
