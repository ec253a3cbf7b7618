//! Propdesk Evaluation Platform Library
//!
//! Core components for the propdesk funded-trader evaluation service:
//! simulated trade execution, capital accounting, challenge rule evaluation
//! and the live price bridge.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
