//! # Tarifa - PVPC Price Signal Engine for the Spanish 2.0TD Tariff
//!
//! A Rust implementation of a regulated-price signal engine for the
//! Spanish PVPC electricity tariff, turning the official ESIOS data feeds
//! into hourly price, tariff-period, and best-hour signals for home
//! automation and charge scheduling.
//!
//! ## Features
//!
//! - **PVPC Prices**: Hourly retail prices from the public ESIOS archive,
//!   with optional token-gated indicators (grid injection, MAG, OMIE)
//! - **Tariff Periods**: 2.0TD price and power period classification for
//!   the Peninsula and Ceuta/Melilla zones, holiday and weekend aware
//! - **Price Levels**: Day-relative classification from very cheap to
//!   very expensive
//! - **Best-Hour Search**: Next hour at or below a configured price level,
//!   with a cheapest-hour fallback
//! - **Holiday Calendar**: National holidays from the official dataset or
//!   a computed fallback, cached across restarts
//! - **Resilience**: Serve-stale refreshes, atomic snapshots, state
//!   persistence and recovery
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! The engine follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `periods`: 2.0TD tariff period tables and classification
//! - `levels`: Day-relative price levels and better-price targets
//! - `series`: Validated hourly price series and day statistics
//! - `bestprice`: Forward search for the next acceptable hour
//! - `holidays`: Holiday calendar loading, selection, and caching
//! - `esios`: ESIOS API clients and payload parsing
//! - `coordinator`: Refresh loop, snapshots, and derived values
//! - `persistence`: State persistence and recovery

pub mod bestprice;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod esios;
pub mod holidays;
pub mod levels;
pub mod logging;
pub mod periods;
pub mod persistence;
pub mod series;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{Result, TarifaError};

/// Version string baked in by the build script
pub const APP_VERSION: &str = env!("APP_VERSION");
