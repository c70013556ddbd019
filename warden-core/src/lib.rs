//! Warden core library: domain types, service definition codec, state
//! machine, SQLite store, settings.
//!
//! - [`types`]: row types and newtypes
//! - [`codec`]: decode / canonicalize service definitions
//! - [`state`]: pure service configuration state machine
//! - [`store`]: [`Store`] persistence
//! - [`settings`]: `warden.yaml`
//! - [`error`]: error enums

pub mod codec;
pub mod error;
pub mod settings;
pub mod state;
pub mod store;
pub mod types;

pub use codec::{Definitions, ServiceDefinition};
pub use error::{DecodeError, EncodeError, SettingsError, StoreError};
pub use settings::Settings;
pub use store::{Store, StoreSummary};
pub use types::{
    ArtifactId, ArtifactKind, ConfigArtifact, File, FileId, NewService, ScanEvent, Service,
    ServiceId, ServiceState,
};
