//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the catalog sync core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the sync crate depends on. It
//! establishes the logging conventions, the validated configuration and the
//! event broadcasting mechanism used throughout the workspace. The event bus
//! doubles as the default one-way channel for the request bridge.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
