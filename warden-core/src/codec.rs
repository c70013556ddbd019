//! Service definition codec.
//!
//! A definition file is a TOML table of named service tables:
//!
//! ```toml
//! [blog]
//! domain = "blog.example.com"
//! aliases = ["www.blog.example.com"]
//! backend = "http://127.0.0.1:8080"
//! tls = true
//! ```
//!
//! [`canonicalize`] re-encodes a single definition with a fixed field order so
//! that equal definitions always produce byte-identical stored text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};

/// One declared proxied endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Primary server name.
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Upstream the proxy forwards to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Serve an encrypted listener.
    #[serde(default)]
    pub tls: bool,
    /// Keep the plaintext listener once the encrypted one is live.
    #[serde(default)]
    pub keep_http: bool,
}

impl ServiceDefinition {
    /// Domain followed by aliases, in declaration order.
    pub fn server_names(&self) -> Vec<&str> {
        std::iter::once(self.domain.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .collect()
    }
}

/// Decoded payload of one file, keyed by service name.
pub type Definitions = BTreeMap<String, ServiceDefinition>;

/// Decode a whole file payload.
pub fn decode(payload: &str) -> Result<Definitions, DecodeError> {
    Ok(toml::from_str(payload)?)
}

/// Decode the canonical text of a single definition.
pub fn decode_one(text: &str) -> Result<ServiceDefinition, DecodeError> {
    Ok(toml::from_str(text)?)
}

/// Deterministic single-definition encoding.
pub fn canonicalize(definition: &ServiceDefinition) -> Result<String, EncodeError> {
    Ok(toml::to_string(definition)?)
}
