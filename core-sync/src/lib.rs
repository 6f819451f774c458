//! # Transfer Module
//!
//! Moves tracks between the host and an open device session.
//!
//! ## Overview
//!
//! This crate turns host requests into cancellable transfer jobs:
//! - Copying host files onto the device below a templated folder path
//! - Staging device tracks locally for export or playback
//! - Deleting device tracks and forgetting them in the library
//! - Pushing edited metadata to the device's own store
//!
//! ## Components
//!
//! - **Transfer Job State Machine** (`job`): job lifecycle with validated state transitions
//! - **Folder Template** (`folder_path`): `%a/%b`-style destination folders
//! - **Staging Area** (`staging`): local scratch files that clean up after themselves
//! - **Transfer Pipeline** (`pipeline`): runs jobs on the worker pool and reports outcomes

pub mod error;
pub mod folder_path;
pub mod job;
pub mod pipeline;
pub mod staging;

pub use error::{Result, SyncError};
pub use folder_path::{FolderTemplate, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_GENRE};
pub use job::{ItemOutcome, ItemResult, TransferJob, TransferJobId, TransferKind, TransferStatus};
pub use pipeline::{library_event, JobHandle, PipelineSettings, TransferPipeline};
pub use staging::{StagedFile, StagingArea, STAGING_DIR_NAME};
