#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for gh-inventory
//!
//! This library consolidates all functionality for the gh-inventory tool, which walks a
//! GitHub enterprise account and writes CSV inventories of its organizations, repositories,
//! teams, collaborators, and users.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface, configuration, and orchestration
//! - [`engine`]: Rate governing, retries, caching, and the bounded concurrency pipeline
//! - [`platform`]: The remote platform abstraction and its GitHub implementation
//! - [`reports`]: Per-report orchestrators and field mappings

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

pub mod engine;
pub mod platform;
pub mod reports;

pub use crate::commands::{Host, run};
