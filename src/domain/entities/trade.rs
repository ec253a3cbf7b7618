//! Simulated trade entity and its direction/status enums.

use crate::persistence::models::TradeRecord;
use chrono::{DateTime, Utc};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    /// Pnl sign: +1 for a long, -1 for a short
    pub fn direction(&self) -> f64 {
        match self {
            TradeType::Buy => 1.0,
            TradeType::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for TradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeType::Buy => write!(f, "BUY"),
            TradeType::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for TradeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(TradeType::Buy),
            "SELL" => Ok(TradeType::Sell),
            other => Err(format!("invalid trade type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Open,
    Closed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED" => Ok(TradeStatus::Closed),
            other => Err(format!("invalid trade status: {}", other)),
        }
    }
}

/// Domain view of a trade row
#[derive(Debug, Clone)]
pub struct Trade {
    pub id: i64,
    pub challenge_id: i64,
    pub scrip: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub trade_type: TradeType,
    pub status: TradeStatus,
    pub pnl: f64,
    pub entry_time: DateTime<Utc>,
}

impl TryFrom<&TradeRecord> for Trade {
    type Error = String;

    fn try_from(r: &TradeRecord) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: r.id,
            challenge_id: r.challenge_id,
            scrip: r.scrip.clone(),
            quantity: r.quantity,
            entry_price: r.entry_price,
            trade_type: r.trade_type.parse()?,
            status: r.status.parse()?,
            pnl: r.pnl,
            entry_time: r.entry_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_signs() {
        assert_eq!(TradeType::Buy.direction(), 1.0);
        assert_eq!(TradeType::Sell.direction(), -1.0);
    }

    #[test]
    fn test_parse_roundtrip() {
        assert_eq!("BUY".parse::<TradeType>().unwrap(), TradeType::Buy);
        assert_eq!(TradeType::Sell.to_string(), "SELL");
        assert!("HOLD".parse::<TradeType>().is_err());
        assert_eq!("OPEN".parse::<TradeStatus>().unwrap(), TradeStatus::Open);
    }
}
