//! Drives live services towards their definitions through an [`ArtifactWriter`].
//!
//! One pass visits every live service once:
//!
//! 1. observe the definition against the service's recorded artifacts;
//! 2. persist the resulting transition (compare-and-set, so a row that was
//!    disowned or changed meanwhile is skipped);
//! 3. execute the transition's effects, or the effects still owed by a
//!    parked `To*` state;
//! 4. report the outcome back into the state machine.
//!
//! An artifact row is recorded before its file is written, so the store
//! always knows where every generated file may live.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use warden_core::{
    codec,
    state::{self, Effect, Observation, Outcome},
    ConfigArtifact, FileId, Service, ServiceState, Store,
};

use crate::error::SyncError;
use crate::writer::{ArtifactWriter, Listener};

/// What one converge pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvergeSummary {
    pub services: usize,
    pub transitions: usize,
    pub effects_applied: usize,
    pub effects_failed: usize,
    /// Services moved into `configured` by a successful report.
    pub confirmed: usize,
    /// Services whose stored definition could not be decoded.
    pub invalid: usize,
}

pub struct Converger {
    store: Arc<Store>,
    writer: Arc<dyn ArtifactWriter>,
}

impl Converger {
    pub fn new(store: Arc<Store>, writer: Arc<dyn ArtifactWriter>) -> Self {
        Self { store, writer }
    }

    pub fn run_pass(&self) -> Result<ConvergeSummary, SyncError> {
        let file_names: HashMap<FileId, String> = self
            .store
            .list_files()?
            .into_iter()
            .map(|f| (f.id, f.name))
            .collect();

        let mut summary = ConvergeSummary::default();
        for service in self.store.live_services()? {
            summary.services += 1;
            let Some(file_name) = service.file_id.and_then(|id| file_names.get(&id)) else {
                // Disowned after the listing above.
                continue;
            };
            self.converge_service(&service, file_name, &mut summary)?;
        }

        if summary.transitions > 0 || summary.effects_failed > 0 {
            tracing::info!(
                services = summary.services,
                transitions = summary.transitions,
                applied = summary.effects_applied,
                failed = summary.effects_failed,
                confirmed = summary.confirmed,
                "converge pass finished",
            );
        }
        Ok(summary)
    }

    fn converge_service(
        &self,
        service: &Service,
        file_name: &str,
        summary: &mut ConvergeSummary,
    ) -> Result<(), SyncError> {
        let definition = match codec::decode_one(&service.content) {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!(
                    service_id = %service.id,
                    service = %service.name,
                    error = %e,
                    "stored definition unreadable",
                );
                summary.invalid += 1;
                return Ok(());
            }
        };
        let artifacts = self.store.artifacts_of(service.id)?;
        let observation = Observation::of(&definition, &artifacts);

        let (current, effects) = match state::observe(service.state, &observation) {
            Some(transition) => {
                if transition.changes_state() {
                    if !self
                        .store
                        .set_service_state(service.id, transition.from, transition.to)?
                    {
                        return Ok(());
                    }
                    summary.transitions += 1;
                }
                (transition.to, transition.effects)
            }
            None => (service.state, state::pending_effects(service.state)),
        };
        if effects.is_empty() {
            return Ok(());
        }

        let mut outcome = Outcome::Success;
        for effect in effects {
            let listener = Listener {
                file_name,
                service,
                definition: &definition,
                kind: effect.kind(),
            };
            if self.execute(effect, &listener, &artifacts)? {
                summary.effects_applied += 1;
            } else {
                summary.effects_failed += 1;
                outcome = Outcome::Failure;
                break;
            }
        }

        self.report(service, current, outcome, summary)
    }

    /// Run one effect. `Ok(false)` is an unconfirmed effect; store errors
    /// abort the pass.
    fn execute(
        &self,
        effect: Effect,
        listener: &Listener<'_>,
        artifacts: &[ConfigArtifact],
    ) -> Result<bool, SyncError> {
        let service = listener.service;
        let existing = artifacts.iter().find(|a| a.kind == listener.kind);

        if effect.is_removal() {
            let Some(artifact) = existing else {
                return Ok(true);
            };
            return match self.writer.remove(artifact) {
                Ok(()) => {
                    self.store.delete_artifact(artifact.id)?;
                    Ok(true)
                }
                Err(e) => {
                    tracing::warn!(
                        service_id = %service.id,
                        kind = %listener.kind,
                        error = %e,
                        "artifact removal failed",
                    );
                    Ok(false)
                }
            };
        }

        let path = self.writer.artifact_path(listener);
        let recorded = self
            .store
            .record_artifact(service.id, listener.kind, &path)?;
        match self.writer.apply(listener) {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(
                    service_id = %service.id,
                    kind = %listener.kind,
                    error = %e,
                    "artifact apply failed",
                );
                // A fresh row for a file that never reached disk would read as
                // "present" on the next pass and block the retry.
                if existing.is_none() && !path.exists() {
                    self.store.delete_artifact(recorded.id)?;
                }
                Ok(false)
            }
        }
    }

    fn report(
        &self,
        service: &Service,
        current: ServiceState,
        outcome: Outcome,
        summary: &mut ConvergeSummary,
    ) -> Result<(), SyncError> {
        let next = state::report(current, outcome);
        if next != current && self.store.set_service_state(service.id, current, next)? {
            summary.confirmed += 1;
        } else if outcome == Outcome::Failure && current.is_transitional() {
            tracing::debug!(service_id = %service.id, state = %current, "service parked for retry");
        }
        Ok(())
    }
}
