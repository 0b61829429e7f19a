//! Drift Configuration Module
//!
//! Run configuration loaded from TOML files: observation table columns,
//! reanalysis archives, the candidate model menu, and search/evaluation
//! settings.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `ICEDRIFT_CONFIG` environment variable (path to TOML file)
//! 3. `icedrift.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The loaded `DriftConfig` is handed to each stage by reference; there is
//! no process-wide config so parallel tuning trials and tests can each carry
//! their own.

mod drift_config;
pub mod defaults;
pub mod validation;

pub use drift_config::*;
