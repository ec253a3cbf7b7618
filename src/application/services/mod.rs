//! Application services orchestrating repositories, quotes and domain rules.

pub mod challenges;
pub mod trading;
