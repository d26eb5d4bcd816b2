//! # cdrgen-core - 911 CDR Traffic Simulation Engine
//!
//! Produces Vesta and Viper call-detail-record traffic, either replayed from
//! captured logs or synthesized, and writes it to many endpoints at once at
//! a paced, jittered rate.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        OutputManager                           │
//! │                                                                │
//! │   ┌──────────────────────┐      ┌──────────────────────┐       │
//! │   │ Channel (/dev/ttyS0) │ ...  │ Channel (tcp://...)  │       │
//! │   │                      │      │                      │       │
//! │   │  Ticker ──▶ Generator ──▶ CdrFormat ──▶ Transport   │       │
//! │   │  (pacing)   (replay |       (vesta |     (write,    │       │
//! │   │             synthetic)       viper)       flush)    │       │
//! │   └──────────────────────┘      └──────────────────────┘       │
//! │                                                                │
//! │   FormatRegistry: built once at startup, shared read-only      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Design Principles
//!
//! 1. **Channel isolation** - every endpoint runs in its own task with its
//!    own generator, random source, transport and statistics. One failing
//!    endpoint never stalls another.
//!
//! 2. **Explicit registry** - formats are registered in
//!    [`FormatRegistry::with_builtin_formats`] and passed by reference; there
//!    is no global plugin table.
//!
//! 3. **Bounded lag** - the pacing ticker holds at most one pending tick, so
//!    a slow endpoint drops ticks instead of bursting later.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cdrgen_core::{Config, DeviceOpener, FormatRegistry, OutputManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.json")?;
//! let registry = Arc::new(FormatRegistry::with_builtin_formats());
//! config.validate(&registry.list())?;
//!
//! let manager = OutputManager::new(config, registry, Arc::new(DeviceOpener));
//! manager.start().await?;
//! // ... until shutdown
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod generator;
pub mod output;
pub mod transport;

pub use config::{Config, PortConfig, RecoveryConfig, SyntheticConfig, TimingConfig};
pub use error::{
    ChannelError, ConfigError, FormatError, GeneratorError, ManagerError, TransportError,
    ValidationErrors,
};
pub use format::{CdrFormat, CdrRecord, FormatRegistry, GenerationContext, RecordKind};
pub use generator::{Generator, Mode, RateLimiter, RecordCount, Ticker};
pub use output::{Channel, ChannelInfo, ChannelState, ChannelStats, OutputManager, SentRecord, Totals};
pub use transport::{DeviceOpener, Transport, TransportOpener};
