pub mod capital;
pub mod evaluator;
pub mod market_time;
