//! Submission coordinator: final assembly and hand-off of the draft.
//!
//! The coordinator never creates the account itself. It persists the
//! serialized draft under a mode-specific key and then hands control to the
//! account-linking collaborator, which reads the entry exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::KeyValueStore;
use crate::error::{DatabaseError, EnrollmentError};
use crate::verification::VerificationStatus;
use crate::wizard::{CanonicalPayload, EnrollmentDraft, IdentityMode, StepController};

/// Store key for password-based enrollments.
pub const PASSWORD_SIGNUP_KEY: &str = "signup_payload";
/// Store key for federated enrollments awaiting account linking.
pub const FEDERATED_SIGNUP_KEY: &str = "pending_federated_signup";

pub fn handoff_key(mode: IdentityMode) -> &'static str {
    match mode {
        IdentityMode::Password => PASSWORD_SIGNUP_KEY,
        IdentityMode::Federated => FEDERATED_SIGNUP_KEY,
    }
}

/// Value stored under [`FEDERATED_SIGNUP_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedSignup {
    pub signup_data: CanonicalPayload,
    pub pending_identity_token: String,
}

/// What the account-linking collaborator is told after a hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffReceipt {
    pub key: &'static str,
    pub mode: IdentityMode,
    pub submitted_at: DateTime<Utc>,
}

/// The external stage that consumes the hand-off entry.
#[async_trait]
pub trait AccountLinker: Send + Sync {
    async fn enrollment_ready(&self, receipt: &HandoffReceipt) -> Result<(), EnrollmentError>;
}

/// Linker that only records the hand-off. The next stage polls the store.
pub struct LoggingLinker;

#[async_trait]
impl AccountLinker for LoggingLinker {
    async fn enrollment_ready(&self, receipt: &HandoffReceipt) -> Result<(), EnrollmentError> {
        info!(key = receipt.key, mode = %receipt.mode, "Enrollment ready for account linking");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    HandedOff(HandoffReceipt),
    /// Another submit was still in flight; nothing was done.
    AlreadyInFlight,
}

/// Resets the single-flight flag when the submit finishes, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SubmissionCoordinator {
    store: Arc<dyn KeyValueStore>,
    linker: Arc<dyn AccountLinker>,
    pending_token: Option<SecretString>,
    in_flight: AtomicBool,
}

impl SubmissionCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, linker: Arc<dyn AccountLinker>) -> Self {
        Self {
            store,
            linker,
            pending_token: None,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Attach the identity-provider token a federated session carries.
    pub fn with_pending_token(mut self, token: SecretString) -> Self {
        self.pending_token = Some(token);
        self
    }

    pub fn has_pending_token(&self) -> bool {
        self.pending_token.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Hand the draft off to the account-linking stage.
    ///
    /// A call made while another is in flight returns `AlreadyInFlight`
    /// instead of queueing. On any error the flag is released and nothing
    /// stays persisted, so the caller may retry with the same draft.
    pub async fn submit(
        &self,
        draft: &EnrollmentDraft,
        controller: &StepController,
        verification: VerificationStatus,
    ) -> Result<SubmitOutcome, EnrollmentError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Submit ignored, previous submit still in flight");
            return Ok(SubmitOutcome::AlreadyInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let step = controller.current();
        if !step.is_terminal() {
            return Err(EnrollmentError::InvalidState {
                operation: "submit".into(),
                state: format!("on step {}", step.number()),
            });
        }
        controller.validate_all(draft, verification)?;

        let mode = controller.mode();
        let key = handoff_key(mode);
        let value = self.handoff_value(mode, draft.serialize())?;

        self.store.put(key, &value).await?;

        let receipt = HandoffReceipt {
            key,
            mode,
            submitted_at: Utc::now(),
        };
        if let Err(e) = self.linker.enrollment_ready(&receipt).await {
            warn!(key, error = %e, "Account linking rejected hand-off, rolling back");
            if let Err(clear_err) = self.store.clear(key).await {
                warn!(key, error = %clear_err, "Failed to roll back hand-off entry");
            }
            return Err(e);
        }

        info!(key, %mode, "Enrollment handed off");
        Ok(SubmitOutcome::HandedOff(receipt))
    }

    fn handoff_value(
        &self,
        mode: IdentityMode,
        payload: CanonicalPayload,
    ) -> Result<serde_json::Value, EnrollmentError> {
        let value = match mode {
            IdentityMode::Password => serde_json::to_value(&payload),
            IdentityMode::Federated => {
                let token = self.pending_token.as_ref().ok_or_else(|| {
                    EnrollmentError::InvalidState {
                        operation: "submit".into(),
                        state: "no pending identity token".into(),
                    }
                })?;
                serde_json::to_value(FederatedSignup {
                    signup_data: payload,
                    pending_identity_token: token.expose_secret().to_string(),
                })
            }
        };
        value.map_err(|e| DatabaseError::Serialization(e.to_string()).into())
    }
}
