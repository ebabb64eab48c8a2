//! Test utilities for the Sluice crates.
//!
//! This crate provides:
//! - Scripted fetchers with configurable latency, failures and panics
//! - Temporary text corpora for the file-based jobs
//! - Polling helpers for asserting on concurrent state
//!
//! It is intended for the integration tests of the workspace and is not
//! part of the public surface.

pub mod fetchers;
pub mod files;
pub mod wait;
