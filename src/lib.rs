//! fb - an interactive shell for FogBugz cases
//!
//! This crate provides the core functionality for the `fb` CLI tool.
//!
//! # Architecture
//!
//! - [`model`] - Case, snapshot, staged changes
//! - [`cache`] - Shared case cache (TTL, LRU, single-flight fetches)
//! - [`query`] - Filter language, shortcuts and the paging query engine
//! - [`client`] - Remote service boundary and its HTTP implementation
//! - [`cli`] - Command registry, dispatcher, built-ins and the REPL
//! - [`config`] - Configuration and credentials
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod validate;

pub use error::{Error, Result};
