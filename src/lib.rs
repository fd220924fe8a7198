//! Mesh-radio node setup and configuration reconciliation.
//!
//! Takes a Raspberry Pi from a bare OS image to a running `meshtasticd`
//! node, and keeps the two files that configure it in the shape the
//! operator selected: the boot options file (`config.txt`) and the daemon's
//! YAML configuration. Unrelated operator content in both is preserved.
//!
//! The public API is organised into layers, leaves first:
//!
//! - **[`store`]**: load, fingerprint, and atomically commit the two artifacts
//! - **[`options`]** and **[`catalog`]**: the managed keys and HAT profiles
//! - **[`reconcile`]**: pure merge of desired values into a document
//! - **[`sequencer`]** and **[`steps`]**: resumable, dependency-ordered setup
//! - **[`commands`]**: top-level subcommand orchestration
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod options;
pub mod platform;
pub mod reconcile;
pub mod sequencer;
pub mod steps;
pub mod store;
