//! # Core Library
//!
//! Host-side view of a device's contents: tracks arranged into artist,
//! album, genre, composer and year registries, and the bridge that keeps
//! them in step with a [`core_device::DeviceSession`].
//!
//! ## Overview
//!
//! - [`models`]: [`HostTrack`], [`GroupKind`], [`GroupKey`].
//! - [`graph`]: [`LibraryGraph`] with atomic regrouping and no empty groups.
//! - [`identity`]: [`IdentityMap`] between host ids and native track keys.
//! - [`encoding`]: rating, date, disc and album-artist conversions.
//! - [`bridge`]: [`LibraryBridge`], the materialize/reassign/forget surface.

pub mod bridge;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod identity;
pub mod models;

pub use bridge::{EditOutcome, GroupSummary, LibraryBridge, LibrarySnapshot};
pub use error::{LibraryError, Result};
pub use graph::{Group, GraphDelta, LibraryGraph};
pub use identity::IdentityMap;
pub use models::{GroupKey, GroupKind, HostTrack, HostTrackId};
