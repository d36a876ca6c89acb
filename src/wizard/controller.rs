//! Step controller. Drives the wizard step state machine.

use tracing::{debug, info};

use super::draft::EnrollmentDraft;
use super::model::IdentityMode;
use super::steps::WizardStep;
use crate::error::ValidationError;
use crate::verification::VerificationStatus;

/// Result of a successful `next()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the given step.
    Moved(WizardStep),
    /// The terminal step passed validation; the draft may be submitted.
    ReadyToSubmit,
}

/// Drives the step index over 1..=5, gating forward moves on validation.
#[derive(Debug, Clone)]
pub struct StepController {
    mode: IdentityMode,
    current: WizardStep,
    error: Option<ValidationError>,
}

impl StepController {
    /// Federated sessions start at the profile step; the account step is
    /// skipped entirely.
    pub fn initialize(mode: IdentityMode) -> Self {
        let current = Self::first_step_for(mode);
        info!(%mode, step = %current, "Wizard initialized");
        Self {
            mode,
            current,
            error: None,
        }
    }

    pub fn first_step_for(mode: IdentityMode) -> WizardStep {
        match mode {
            IdentityMode::Password => WizardStep::Account,
            IdentityMode::Federated => WizardStep::Profile,
        }
    }

    pub fn mode(&self) -> IdentityMode {
        self.mode
    }

    pub fn current(&self) -> WizardStep {
        self.current
    }

    pub fn first_step(&self) -> WizardStep {
        Self::first_step_for(self.mode)
    }

    /// The user-facing error left by the last failed `next()`.
    pub fn error(&self) -> Option<&ValidationError> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Steps this session walks through, in order.
    pub fn applicable_steps(&self) -> impl Iterator<Item = WizardStep> + use<> {
        let first = self.first_step();
        WizardStep::ALL.into_iter().filter(move |s| *s >= first)
    }

    /// Validate the current step and advance on success.
    ///
    /// On failure the index is unchanged and the error is kept for display.
    pub fn next(
        &mut self,
        draft: &EnrollmentDraft,
        verification: VerificationStatus,
    ) -> Result<Advance, ValidationError> {
        if let Err(e) = self.current.validate(draft, verification) {
            debug!(step = %self.current, field = ?e.field, "Step validation failed");
            self.error = Some(e.clone());
            return Err(e);
        }

        self.error = None;
        match self.current.next() {
            Some(next) => {
                debug!(from = %self.current, to = %next, "Step advanced");
                self.current = next;
                Ok(Advance::Moved(next))
            }
            None => Ok(Advance::ReadyToSubmit),
        }
    }

    /// Step back without validating. A no-op on the first step of the session.
    pub fn prev(&mut self) -> WizardStep {
        if self.current > self.first_step()
            && let Some(prev) = self.current.prev()
        {
            debug!(from = %self.current, to = %prev, "Step back");
            self.current = prev;
        }
        self.current
    }

    /// Re-run every applicable step's validator, stopping at the first failure.
    pub fn validate_all(
        &self,
        draft: &EnrollmentDraft,
        verification: VerificationStatus,
    ) -> Result<(), ValidationError> {
        for step in self.applicable_steps() {
            step.validate(draft, verification)?;
        }
        Ok(())
    }
}
