//! Tera rendering engine for listener fragments.
//!
//! | Kind    | Template          |
//! |---------|-------------------|
//! | `http`  | `http.conf.tera`  |
//! | `https` | `https.conf.tera` |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use warden_core::ArtifactKind;

use crate::context::ListenerContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/_header.tera", include_str!("templates/_partials/header.tera")),
    ("shared/_upstream.tera", include_str!("templates/_partials/upstream.tera")),
    ("http.conf.tera", include_str!("templates/http.conf.tera")),
    ("https.conf.tera", include_str!("templates/https.conf.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Override {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// `*.tera` files directly under `dir` and under `dir/shared/`.
fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    for sub in [dir.to_path_buf(), dir.join("shared")] {
        if !sub.is_dir() {
            continue;
        }
        let entries = std::fs::read_dir(&sub).map_err(|e| io_err(&sub, e))?;
        for entry in entries {
            let path = entry.map_err(|e| io_err(&sub, e))?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
                continue;
            }
            let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            templates.push((normalize_template_name(rel), contents));
        }
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())
        .map_err(|source| RenderError::Templates {
            overrides: user_template_dir.map(Path::to_path_buf),
            source,
        })?;
    Ok(tera)
}

/// Template rendered for an artifact kind.
pub fn template_name(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Http => "http.conf.tera",
        ArtifactKind::Https => "https.conf.tera",
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Tera-based renderer for both listener kinds.
///
/// Create once and reuse. Files in `user_template_dir` named like the
/// embedded templates replace them.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Renderer with embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    pub fn with_overrides(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera(user_template_dir)? })
    }

    /// Render one listener fragment. Output always uses LF line endings.
    pub fn render(&self, ctx: &ListenerContext, kind: ArtifactKind) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let template = template_name(kind);
        let rendered =
            self.tera
                .render(template, &tera_ctx)
                .map_err(|source| RenderError::Render {
                    template,
                    service: ctx.service.name.clone(),
                    source,
                })?;
        Ok(rendered.replace("\r\n", "\n"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RenderOptions;
    use chrono::Utc;
    use warden_core::{FileId, Service, ServiceDefinition, ServiceId, ServiceState};

    fn ctx(backend: Option<&str>) -> ListenerContext {
        let service = Service {
            id: ServiceId(3),
            file_id: Some(FileId(1)),
            name: "blog".into(),
            content: String::new(),
            state: ServiceState::ToConfigureHttps,
            last_modified: Utc::now(),
        };
        let def = ServiceDefinition {
            domain: "blog.example.com".into(),
            aliases: vec!["www.blog.example.com".into()],
            backend: backend.map(str::to_string),
            tls: true,
            keep_http: false,
        };
        ListenerContext::new(&service, Some("sites"), &def, &RenderOptions::default())
    }

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new().expect("embedded templates must parse");
    }

    #[test]
    fn http_listener_serves_acme_challenges() {
        let out = Renderer::new().unwrap().render(&ctx(None), ArtifactKind::Http).unwrap();
        assert!(out.contains("listen 80;"));
        assert!(out.contains("server_name blog.example.com www.blog.example.com;"));
        assert!(out.contains("root /var/www/acme;"));
        assert!(out.contains("return 404;"), "no backend means 404");
    }

    #[test]
    fn https_listener_points_at_domain_certificates() {
        let out = Renderer::new()
            .unwrap()
            .render(&ctx(Some("http://127.0.0.1:8080")), ArtifactKind::Https)
            .unwrap();
        assert!(out.contains("listen 443 ssl;"));
        assert!(out.contains("/etc/letsencrypt/live/blog.example.com/fullchain.pem"));
        assert!(out.contains("proxy_pass http://127.0.0.1:8080;"));
    }

    #[test]
    fn header_names_service_and_file() {
        let out = Renderer::new().unwrap().render(&ctx(None), ArtifactKind::Http).unwrap();
        assert!(out.contains("service: blog (id 3) from sites"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let r = Renderer::new().unwrap();
        let a = r.render(&ctx(None), ArtifactKind::Https).unwrap();
        let b = r.render(&ctx(None), ArtifactKind::Https).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn no_carriage_returns_in_output() {
        let r = Renderer::new().unwrap();
        for kind in [ArtifactKind::Http, ArtifactKind::Https] {
            assert!(!r.render(&ctx(None), kind).unwrap().contains('\r'));
        }
    }

    #[test]
    fn user_override_replaces_embedded_template() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("http.conf.tera"), "# custom {{ domain }}\n").unwrap();
        let r = Renderer::with_overrides(Some(dir.path())).unwrap();
        assert_eq!(
            r.render(&ctx(None), ArtifactKind::Http).unwrap(),
            "# custom blog.example.com\n"
        );
        assert!(r.render(&ctx(None), ArtifactKind::Https).unwrap().contains("443"));
    }

    #[test]
    fn broken_override_names_the_overrides_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("http.conf.tera"), "{% if %}\n").unwrap();
        let err = Renderer::with_overrides(Some(dir.path())).err().expect("must fail");
        match err {
            RenderError::Templates { overrides, .. } => {
                assert_eq!(overrides.as_deref(), Some(dir.path()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn render_failure_names_template_and_service() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("http.conf.tera"), "{{ no_such_variable }}\n").unwrap();
        let r = Renderer::with_overrides(Some(dir.path())).unwrap();
        let err = r.render(&ctx(None), ArtifactKind::Http).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Render { template: "http.conf.tera", ref service, .. } if service == "blog"
        ));
        assert!(err.to_string().contains("http.conf.tera"));
    }
}
