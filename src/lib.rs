//! Event-driven hard-body gas engine with live kinetic-theory statistics.
//!
//! - [`core`]: arena, particles, event prediction and resolution.
//! - [`driver`]: run-state machine and the dedicated simulation thread.
//! - [`stats`]: accumulators, histograms and theoretical predictions.
//! - [`units`]: conversion between internal and display units.
//!
//! Internal units are nm, ps, amu, K and kJ/mol.

pub mod config;
pub mod core;
pub mod driver;
pub mod error;
pub mod stats;
pub mod units;

pub use crate::config::SimConfig;
pub use crate::core::Simulation;
pub use crate::driver::{Control, Driver, DriverHandle, RunState, Snapshot};
pub use crate::error::{Error, Result};
pub use crate::stats::{StatisticKind, StatisticsEngine, TypeSet};
