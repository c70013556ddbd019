//! Service configuration state machine.
//!
//! ```text
//! NotConfigured ──tls──▶ ToConfigureHttps ──ok──▶ Configured ──retire http──▶ ToDisableHttp
//!       ▲                                              ▲                            │
//!       │                                              └────────────ok──────────────┘
//!       └──────────── definition no longer wants tls (from any state)
//! ```
//!
//! Everything here is pure: callers persist the new state and execute the
//! returned [`Effect`]s. Only [`report`] leaves a `To*` state forward, and only
//! on [`Outcome::Success`].

use crate::codec::ServiceDefinition;
use crate::types::{ArtifactKind, ConfigArtifact, ServiceState};

/// Artifact work requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    ApplyPlaintext,
    ApplyEncrypted,
    RemovePlaintext,
    RemoveEncrypted,
}

impl Effect {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Effect::ApplyPlaintext | Effect::RemovePlaintext => ArtifactKind::Http,
            Effect::ApplyEncrypted | Effect::RemoveEncrypted => ArtifactKind::Https,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Effect::RemovePlaintext | Effect::RemoveEncrypted)
    }
}

/// What the definition asks for versus which artifacts are on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    pub wants_tls: bool,
    pub keep_http: bool,
    pub has_encrypted: bool,
    pub has_plaintext: bool,
}

impl Observation {
    /// Observation for a service that owns `artifacts`.
    pub fn of(definition: &ServiceDefinition, artifacts: &[ConfigArtifact]) -> Self {
        let has = |kind| artifacts.iter().any(|a| a.kind == kind);
        Self {
            wants_tls: definition.tls,
            keep_http: definition.keep_http,
            has_encrypted: has(ArtifactKind::Https),
            has_plaintext: has(ArtifactKind::Http),
        }
    }

    /// Observation for a freshly decoded row, which owns nothing yet.
    pub fn fresh(definition: &ServiceDefinition) -> Self {
        Self::of(definition, &[])
    }
}

/// A state change (or an effect-carrying self-loop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ServiceState,
    pub to: ServiceState,
    pub effects: Vec<Effect>,
}

impl Transition {
    pub fn changes_state(&self) -> bool {
        self.from != self.to
    }
}

/// Artifact writer report for the pending transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// State assigned to every freshly decoded service.
pub fn initial() -> ServiceState {
    ServiceState::NotConfigured
}

/// React to the current definition. `None` means nothing to do.
pub fn observe(state: ServiceState, obs: &Observation) -> Option<Transition> {
    if !obs.wants_tls {
        let mut effects = Vec::new();
        if obs.has_encrypted {
            effects.push(Effect::RemoveEncrypted);
        }
        if !obs.has_plaintext {
            effects.push(Effect::ApplyPlaintext);
        }
        if state == ServiceState::NotConfigured && effects.is_empty() {
            return None;
        }
        return Some(Transition {
            from: state,
            to: ServiceState::NotConfigured,
            effects,
        });
    }

    match state {
        ServiceState::NotConfigured if !obs.has_encrypted => Some(Transition {
            from: state,
            to: ServiceState::ToConfigureHttps,
            effects: pending_effects(ServiceState::ToConfigureHttps),
        }),
        ServiceState::Configured if !obs.keep_http && obs.has_plaintext => Some(Transition {
            from: state,
            to: ServiceState::ToDisableHttp,
            effects: pending_effects(ServiceState::ToDisableHttp),
        }),
        ServiceState::Configured if obs.keep_http && !obs.has_plaintext => Some(Transition {
            from: state,
            to: state,
            effects: vec![Effect::ApplyPlaintext],
        }),
        _ => None,
    }
}

/// Effects still owed before a `To*` state may be confirmed.
///
/// The plaintext listener serves the domain while the encrypted one is
/// provisioned, so it is applied first.
pub fn pending_effects(state: ServiceState) -> Vec<Effect> {
    match state {
        ServiceState::ToConfigureHttps => vec![Effect::ApplyPlaintext, Effect::ApplyEncrypted],
        ServiceState::ToDisableHttp => vec![Effect::RemovePlaintext],
        ServiceState::NotConfigured | ServiceState::Configured => vec![],
    }
}

/// Apply an artifact writer report.
pub fn report(state: ServiceState, outcome: Outcome) -> ServiceState {
    match (state, outcome) {
        (ServiceState::ToConfigureHttps | ServiceState::ToDisableHttp, Outcome::Success) => {
            ServiceState::Configured
        }
        (state, _) => state,
    }
}
