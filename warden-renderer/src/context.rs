//! Template context: serializable rendering payload for one listener.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use warden_core::{Service, ServiceDefinition};

use crate::error::RenderError;

/// Host-level paths referenced by the listener templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Webroot served for ACME HTTP-01 challenges on the plaintext listener.
    pub acme_root: PathBuf,
    /// Directory holding `<domain>/fullchain.pem` and `<domain>/privkey.pem`.
    pub certificate_dir: PathBuf,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            acme_root: PathBuf::from("/var/www/acme"),
            certificate_dir: PathBuf::from("/etc/letsencrypt/live"),
        }
    }
}

/// Rendering payload for a single listener fragment.
///
/// Deliberately free of timestamps: identical inputs must render identical
/// bytes so unchanged artifacts are not rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerContext {
    pub service: ServiceCtx,
    pub domain: String,
    pub server_names: Vec<String>,
    pub backend: Option<String>,
    pub acme_root: String,
    pub certificate_dir: String,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCtx {
    pub id: i64,
    pub name: String,
    /// Display name of the owning definition file, when known.
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub warden_version: String,
}

impl ListenerContext {
    /// Build a context from a service row and its decoded definition.
    pub fn new(
        service: &Service,
        file_name: Option<&str>,
        definition: &ServiceDefinition,
        options: &RenderOptions,
    ) -> Self {
        Self {
            service: ServiceCtx {
                id: service.id.0,
                name: service.name.clone(),
                file_name: file_name.map(str::to_string),
            },
            domain: definition.domain.clone(),
            server_names: definition
                .server_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            backend: definition.backend.clone(),
            acme_root: options.acme_root.display().to_string(),
            certificate_dir: options.certificate_dir.display().to_string(),
            meta: MetaCtx {
                warden_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(|source| RenderError::Context {
            service: self.service.name.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_core::{FileId, ServiceId, ServiceState};

    fn service() -> Service {
        Service {
            id: ServiceId(7),
            file_id: Some(FileId(1)),
            name: "blog".into(),
            content: String::new(),
            state: ServiceState::NotConfigured,
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn server_names_start_with_domain() {
        let def = ServiceDefinition {
            domain: "blog.example.com".into(),
            aliases: vec!["www.blog.example.com".into()],
            backend: None,
            tls: false,
            keep_http: false,
        };
        let ctx = ListenerContext::new(&service(), Some("sites"), &def, &RenderOptions::default());
        assert_eq!(ctx.server_names, vec!["blog.example.com", "www.blog.example.com"]);
        assert_eq!(ctx.service.id, 7);
        assert_eq!(ctx.service.file_name.as_deref(), Some("sites"));
    }

    #[test]
    fn to_tera_context_succeeds() {
        let def = ServiceDefinition {
            domain: "a.example.com".into(),
            aliases: vec![],
            backend: Some("http://127.0.0.1:8080".into()),
            tls: true,
            keep_http: false,
        };
        let ctx = ListenerContext::new(&service(), None, &def, &RenderOptions::default());
        ctx.to_tera_context().expect("context conversion");
    }
}
