pub mod amount;
pub mod analyzer;
pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod eth;
pub mod models;
pub mod stats;
pub mod storage;
