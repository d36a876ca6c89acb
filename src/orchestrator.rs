//! Enrollment orchestrator for one signup session.
//!
//! Composes the draft (with undo history), the step controller, phone
//! verification, and submission, and records every failure as either an
//! inline field error or the banner. Network calls run without holding the
//! wizard lock, so the single-flight guards of verification and submission
//! see concurrent callers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EnrollmentError, ValidationError};
use crate::submission::{
    AccountLinker, HandoffReceipt, KeyValueStore, SubmissionCoordinator, SubmitOutcome,
};
use crate::verification::{
    PhoneVerificationManager, SendOutcome, SendSmsRequest, SmsGateway, VerificationConfig,
    VerificationSession, VerificationStatus,
};
use crate::wizard::{
    Advance, EnrollmentDraft, Field, FieldValue, IdentityMode, StepController, TOTAL_STEPS,
    WizardStep,
};

/// Undo snapshots kept per session.
const MAX_HISTORY: usize = 50;

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct EnrollmentDeps {
    pub gateway: Arc<dyn SmsGateway>,
    pub store: Arc<dyn KeyValueStore>,
    pub linker: Arc<dyn AccountLinker>,
    pub verification: VerificationConfig,
}

/// What the user sees: the step, inline errors, the banner, and whether
/// submit is available.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardView {
    pub id: Uuid,
    pub mode: IdentityMode,
    pub step: WizardStep,
    pub step_number: u8,
    pub total_steps: u8,
    pub field_errors: BTreeMap<Field, String>,
    pub banner: Option<String>,
    pub submit_enabled: bool,
    pub submitting: bool,
    pub verification: VerificationSession,
    pub filled_fields: Vec<Field>,
    pub can_undo: bool,
    pub completed: Option<HandoffReceipt>,
}

struct WizardState {
    draft: EnrollmentDraft,
    history: Vec<EnrollmentDraft>,
    controller: StepController,
    field_errors: BTreeMap<Field, String>,
    banner: Option<String>,
    completed: Option<HandoffReceipt>,
}

impl WizardState {
    fn record(&mut self, err: &EnrollmentError) {
        match err.field() {
            Some(field) => {
                self.field_errors.insert(field, err.user_message());
            }
            None => self.banner = Some(err.user_message()),
        }
    }

    fn clear_errors(&mut self) {
        self.field_errors.clear();
        self.banner = None;
    }
}

pub struct EnrollmentOrchestrator {
    id: Uuid,
    state: RwLock<WizardState>,
    verification: PhoneVerificationManager,
    submission: SubmissionCoordinator,
    disposed: AtomicBool,
}

impl EnrollmentOrchestrator {
    /// Start a session. Federated sessions must carry the identity
    /// provider's pending token.
    pub fn start(
        mode: IdentityMode,
        deps: EnrollmentDeps,
        pending_token: Option<SecretString>,
    ) -> Result<Self, EnrollmentError> {
        let mut submission = SubmissionCoordinator::new(deps.store, deps.linker);
        match (mode, pending_token) {
            (IdentityMode::Federated, Some(token)) => {
                submission = submission.with_pending_token(token);
            }
            (IdentityMode::Federated, None) => {
                return Err(EnrollmentError::InvalidState {
                    operation: "start".into(),
                    state: "no pending identity token".into(),
                });
            }
            (IdentityMode::Password, _) => {}
        }

        let id = Uuid::new_v4();
        info!(session = %id, %mode, "Enrollment session started");
        Ok(Self {
            id,
            state: RwLock::new(WizardState {
                draft: EnrollmentDraft::new(),
                history: Vec::new(),
                controller: StepController::initialize(mode),
                field_errors: BTreeMap::new(),
                banner: None,
                completed: None,
            }),
            verification: PhoneVerificationManager::new(deps.gateway, deps.verification),
            submission,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), EnrollmentError> {
        if self.is_disposed() {
            Err(EnrollmentError::Disposed)
        } else {
            Ok(())
        }
    }

    pub async fn draft(&self) -> EnrollmentDraft {
        self.state.read().await.draft.clone()
    }

    pub async fn verification_status(&self) -> VerificationStatus {
        self.verification.status().await
    }

    /// Merge field edits into a new draft.
    ///
    /// Changing the phone number drops any verification of the old one.
    pub async fn update<I>(&self, changes: I) -> Result<(), EnrollmentError>
    where
        I: IntoIterator<Item = (Field, FieldValue)>,
    {
        self.ensure_live()?;
        let changes: Vec<(Field, FieldValue)> = changes.into_iter().collect();

        let phone_changed = {
            let mut state = self.state.write().await;
            if state.controller.mode() == IdentityMode::Federated
                && let Some((field, _)) = changes
                    .iter()
                    .find(|(f, _)| WizardStep::Account.fields().contains(f))
            {
                let err = EnrollmentError::from(ValidationError::field(
                    *field,
                    format!("{field} is not collected for federated sign-in"),
                ));
                state.record(&err);
                return Err(err);
            }

            let old_phone = state.draft.text(Field::PhoneNumber).map(String::from);
            let next = state.draft.merge(changes.iter().cloned());
            let new_phone = next.text(Field::PhoneNumber).map(String::from);

            let previous = std::mem::replace(&mut state.draft, next);
            state.history.push(previous);
            if state.history.len() > MAX_HISTORY {
                state.history.remove(0);
            }
            for (field, _) in &changes {
                state.field_errors.remove(field);
            }
            debug!(session = %self.id, fields = changes.len(), "Draft updated");
            old_phone != new_phone
        };

        if phone_changed {
            self.verification.reset().await;
        }
        Ok(())
    }

    /// Parse a JSON object of `{fieldName: value}` edits and apply them.
    pub async fn update_json(
        &self,
        changes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), EnrollmentError> {
        let parsed: Result<Vec<_>, EnrollmentError> = changes
            .iter()
            .map(|(name, value)| -> Result<(Field, FieldValue), EnrollmentError> {
                let field = Field::parse(name).ok_or_else(|| {
                    ValidationError::general(format!("Unknown field: {name}"))
                })?;
                Ok((field, FieldValue::from_json(field, value)?))
            })
            .collect();
        match parsed {
            Ok(edits) => self.update(edits).await,
            Err(e) => {
                self.state.write().await.record(&e);
                Err(e)
            }
        }
    }

    /// Restore the draft as it was before the last edit.
    pub async fn undo(&self) -> Result<bool, EnrollmentError> {
        self.ensure_live()?;
        let phone_changed = {
            let mut state = self.state.write().await;
            let Some(previous) = state.history.pop() else {
                return Ok(false);
            };
            let changed = state.draft.text(Field::PhoneNumber) != previous.text(Field::PhoneNumber);
            state.draft = previous;
            state.field_errors.clear();
            changed
        };
        if phone_changed {
            self.verification.reset().await;
        }
        debug!(session = %self.id, "Draft edit undone");
        Ok(true)
    }

    async fn sms_request(&self) -> Result<SendSmsRequest, EnrollmentError> {
        let state = self.state.read().await;
        if state.controller.mode() == IdentityMode::Federated {
            return Err(EnrollmentError::InvalidState {
                operation: "phone verification".into(),
                state: "signing in with an identity provider".into(),
            });
        }
        let text = |field| state.draft.text(field).unwrap_or_default().to_string();
        Ok(SendSmsRequest {
            name: text(Field::Name),
            phone_number: text(Field::PhoneNumber),
            resident_number: text(Field::ResidentNumber),
            carrier: text(Field::Carrier),
        })
    }

    /// Send a code to the draft's phone number.
    pub async fn send_code(&self) -> Result<SendOutcome, EnrollmentError> {
        self.ensure_live()?;
        let result = match self.sms_request().await {
            Ok(request) => self.verification.send_code(request).await,
            Err(e) => Err(e),
        };
        self.settle(result).await
    }

    pub async fn resend_code(&self) -> Result<SendOutcome, EnrollmentError> {
        self.ensure_live()?;
        let result = match self.sms_request().await {
            Ok(request) => self.verification.resend(request).await,
            Err(e) => Err(e),
        };
        self.settle(result).await
    }

    pub async fn verify_code(&self, code: &str) -> Result<(), EnrollmentError> {
        self.ensure_live()?;
        let result = self.verification.verify_code(code).await;
        self.settle(result).await
    }

    /// Record a failure for display, or clear the banner on success.
    async fn settle<T>(&self, result: Result<T, EnrollmentError>) -> Result<T, EnrollmentError> {
        if matches!(result, Err(EnrollmentError::Disposed)) {
            return result;
        }
        let mut state = self.state.write().await;
        match &result {
            Ok(_) => state.banner = None,
            Err(e) => state.record(e),
        }
        result
    }

    pub async fn next(&self) -> Result<Advance, EnrollmentError> {
        self.ensure_live()?;
        let status = self.verification.status().await;
        let mut state = self.state.write().await;
        let state = &mut *state;
        match state.controller.next(&state.draft, status) {
            Ok(advance) => {
                state.clear_errors();
                Ok(advance)
            }
            Err(e) => {
                let err = EnrollmentError::from(e);
                state.record(&err);
                Err(err)
            }
        }
    }

    pub async fn prev(&self) -> Result<WizardStep, EnrollmentError> {
        self.ensure_live()?;
        let mut state = self.state.write().await;
        state.clear_errors();
        Ok(state.controller.prev())
    }

    /// Hand the draft off. The draft is untouched whatever the outcome.
    pub async fn submit(&self) -> Result<SubmitOutcome, EnrollmentError> {
        self.ensure_live()?;
        let (draft, controller) = {
            let state = self.state.read().await;
            if state.completed.is_some() {
                return Err(EnrollmentError::InvalidState {
                    operation: "submit".into(),
                    state: "already submitted".into(),
                });
            }
            (state.draft.clone(), state.controller.clone())
        };
        let status = self.verification.status().await;

        let result = self.submission.submit(&draft, &controller, status).await;
        if self.is_disposed() {
            return Err(EnrollmentError::Disposed);
        }

        let mut state = self.state.write().await;
        match &result {
            Ok(SubmitOutcome::HandedOff(receipt)) => {
                state.clear_errors();
                state.completed = Some(receipt.clone());
                info!(session = %self.id, key = receipt.key, "Enrollment submitted");
            }
            Ok(SubmitOutcome::AlreadyInFlight) => {}
            Err(e) => state.record(e),
        }
        result
    }

    pub async fn view(&self) -> WizardView {
        let verification = self.verification.snapshot().await;
        let state = self.state.read().await;
        let step = state.controller.current();
        let submitting = self.submission.is_in_flight();
        WizardView {
            id: self.id,
            mode: state.controller.mode(),
            step,
            step_number: step.number(),
            total_steps: TOTAL_STEPS,
            field_errors: state.field_errors.clone(),
            banner: state.banner.clone(),
            submit_enabled: step.is_terminal()
                && !submitting
                && state.completed.is_none()
                && !self.is_disposed(),
            submitting,
            verification,
            filled_fields: state.draft.iter().map(|(f, _)| f).collect(),
            can_undo: !state.history.is_empty(),
            completed: state.completed.clone(),
        }
    }

    /// Tear the session down. Outstanding network results become no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.verification.dispose();
        info!(session = %self.id, "Enrollment session disposed");
    }
}

impl Drop for EnrollmentOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}
