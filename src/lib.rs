//! # Elspot - Nord Pool Day-Ahead Price Engine
//!
//! A Rust implementation of a day-ahead electricity price engine:
//! it fetches spot prices from the Nord Pool data portal, normalizes
//! them into consumer prices, classifies every delivery interval
//! against a persisted 72-hour rolling average, and keeps a bounded
//! snapshot of today's and tomorrow's prices ready for a display.
//!
//! ## Features
//!
//! - **Async-first**: single-owner driver loop on the Tokio runtime
//! - **Price Pipeline**: VAT + fixed-cost formula applied to raw spot prices
//! - **Rolling Average**: persisted 72-hour ring buffer of raw prices
//! - **Classification**: five price levels from ratio-to-average bands
//! - **Scheduling**: pure time arithmetic for daily fetches, minute
//!   boundaries and clock resynchronization
//! - **Freshness**: coverage-aware comparison so a worse fetch never
//!   replaces a better snapshot
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! The crate follows a modular architecture with clear separation of concerns:
//!
//! - `config`: configuration management and validation
//! - `logging`: structured logging and tracing
//! - `state`: price snapshot model, levels and resolutions
//! - `classify`: ratio-band price level classification
//! - `schedule`: time arithmetic for the fetch and resync cadence
//! - `freshness`: snapshot comparison and coverage policy
//! - `history`: persisted rolling-average ring buffer
//! - `storage`: durable blob storage and the snapshot cache
//! - `market`: fetch pipeline and the Nord Pool client
//! - `clock`: wall-clock seam for the driver
//! - `driver`: orchestration loop and runtime policy

pub mod classify;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod freshness;
pub mod history;
pub mod logging;
pub mod market;
pub mod schedule;
pub mod state;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use driver::{DriverCommand, PriceDriver};
pub use error::{ElspotError, Result};
pub use state::{PriceLevel, PriceSource, PriceState, Resolution};
