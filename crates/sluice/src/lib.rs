//! # sluice
//!
//! Change-data-capture apply engine. Takes ordered batches of row changes
//! decoded from an upstream replication log and replays them against a
//! relational target as few, large, dependency-safe statements, one
//! transaction per batch.
//!
//! ## Pipeline
//!
//! ```text
//! EntryMessage ─decode─▶ ChangeEvent ─normalize─▶ SingleRowChange
//!     ─schedule─▶ priorities ─plan─▶ PlannedBatch ─render─▶ Statement
//!     ─execute─▶ commit | rollback
//! ```
//!
//! - [`normalize`]: one record per affected row, with key signatures and
//!   the changed-column set of each update
//! - [`schedule`]: records touching a common row land in distinct,
//!   correctly ordered priority groups
//! - [`plan`]: multi-row INSERTs and batched UPDATE/DELETE executions
//! - [`statement`] and [`marshal`]: dialect-quoted SQL with typed parameters
//! - [`executor`] and [`applier`]: one transaction per batch
//! - [`pump`]: the fetch/apply/ack loop over a [`source::LogSource`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//! use sluice_rdbc::prelude::*;
//!
//! let config = SinkConfig::from_file("sluice.yaml")?;
//! let pool = SimpleConnectionPool::new(
//!     config.target.pool_config(),
//!     Arc::new(MySqlConnectionFactory),
//! ).await?;
//!
//! let applier = Applier::new(pool, &config.apply)?;
//! let mut pump = Pump::new(source, applier, config.pump.clone());
//! pump.run(shutdown_rx).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL targets
//! - `mysql` - MySQL/MariaDB targets
//! - `full` - All targets

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod applier;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod hooks;
pub mod marshal;
pub mod normalize;
pub mod plan;
pub mod pump;
pub mod schedule;
pub mod source;
pub mod sql_type;
pub mod statement;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::applier::{ApplyOutcome, Applier, PreparedBatch};
    pub use crate::config::{ApplyConfig, PumpConfig, SinkConfig, TargetConfig};
    pub use crate::error::{ApplyError, Result};
    pub use crate::event::{
        decode, row_image, ChangeEvent, Column, EntryMessage, RowImage, RowKind, SourcePosition,
    };
    pub use crate::executor::ApplyTransaction;
    pub use crate::hooks::{ApplyHook, PassThrough};
    pub use crate::marshal::MarshalConfig;
    pub use crate::plan::{PlanConfig, UpdateColumnPolicy};
    pub use crate::pump::{CycleOutcome, Pump, PumpStats};
    pub use crate::schedule::SchedulePolicy;
    pub use crate::source::{FetchedBatch, LogSource, MemorySource};
    pub use crate::sql_type::SqlType;
    pub use crate::statement::Statement;
}

pub use applier::Applier;
pub use error::{ApplyError, Result};
pub use event::ChangeEvent;
pub use pump::Pump;
