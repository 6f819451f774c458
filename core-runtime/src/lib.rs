//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the device synchronization engine:
//! - Logging and tracing infrastructure
//! - Engine configuration
//! - Event bus for outbound notifications to the host
//!
//! ## Overview
//!
//! Every other engine crate depends on this one for its logging conventions,
//! its view of the host-supplied configuration and the channel it uses to
//! tell the host that something changed.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
