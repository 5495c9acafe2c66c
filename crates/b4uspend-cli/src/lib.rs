//! B4USpend command-line client.

pub mod commands;
pub mod config;
pub mod logging;
