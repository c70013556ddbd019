//! # warden-renderer
//!
//! Tera-based engine that renders reverse-proxy listener fragments for
//! services tracked by the warden store.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use warden_core::{ArtifactKind, Service, ServiceDefinition};
//! use warden_renderer::{ListenerContext, RenderOptions, Renderer};
//!
//! fn render_https(service: &Service, def: &ServiceDefinition) -> Option<String> {
//!     let renderer = Renderer::new().ok()?;
//!     let ctx = ListenerContext::new(service, None, def, &RenderOptions::default());
//!     renderer.render(&ctx, ArtifactKind::Https).ok()
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{ListenerContext, RenderOptions};
pub use engine::Renderer;
pub use error::RenderError;
