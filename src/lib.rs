//! # coa-sync
//!
//! Bulk upload of chart-of-accounts records to Xero.
//!
//! A [`Dispatcher`](engine::Dispatcher) spreads a batch across a small fixed
//! pool of workers. Each worker makes one remote upsert per attempt, retries
//! with a fixed delay up to a bounded budget, and signals completion exactly
//! once per record. The caller gets a [`BatchReport`](model::BatchReport)
//! back once every record is terminal.

pub mod config;
pub mod engine;
pub mod error;
pub mod generate;
pub mod loader;
pub mod model;
pub mod telemetry;
pub mod upload;
