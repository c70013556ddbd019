//! # warden-sync
//!
//! Reconciliation engine over the warden store.
//!
//! - [`Reconciler`] turns scan events into file and service rows.
//! - [`Converger`] drives live services through an [`ArtifactWriter`].
//! - [`Cleaner`] reaps disowned services and artifacts.
//! - [`Pipeline`] wires them to a [`Scanner`] for the CLI and the daemon.

pub mod cleaner;
pub mod converge;
pub mod error;
pub mod pipeline;
pub mod reconciler;
pub mod scanner;
pub mod writer;

pub use cleaner::{CleanSummary, Cleaner};
pub use converge::{ConvergeSummary, Converger};
pub use error::{ApplyError, SyncError};
pub use pipeline::{FileFailure, Pipeline, ScanSummary};
pub use reconciler::{Reconciler, ScanOutcome};
pub use scanner::{ScanSnapshot, Scanner};
pub use writer::{ArtifactWriter, FsArtifactWriter, Listener, WriteResult};
