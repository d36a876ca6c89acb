//! End-to-end enrollment flows through the public API, with a scripted SMS
//! gateway standing in for the backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;

use enrollment_orchestrator::error::{CallError, EnrollmentError};
use enrollment_orchestrator::orchestrator::{EnrollmentDeps, EnrollmentOrchestrator};
use enrollment_orchestrator::submission::{
    FEDERATED_SIGNUP_KEY, FederatedSignup, KeyValueStore, LibSqlStore, LoggingLinker,
    MemoryStore, PASSWORD_SIGNUP_KEY, SubmitOutcome,
};
use enrollment_orchestrator::verification::{
    SendOutcome, SendSmsRequest, SendSmsResponse, SmsGateway, VerificationConfig,
    VerificationStatus,
};
use enrollment_orchestrator::wizard::{
    Advance, CanonicalPayload, Field, FieldValue, IdentityMode, WizardStep,
};

/// Gateway that fails sends with the queued errors before succeeding, and
/// accepts only the code "246810".
#[derive(Default)]
struct ScriptedGateway {
    send_failures: Mutex<VecDeque<CallError>>,
    sends: AtomicUsize,
    verifies: AtomicUsize,
}

impl ScriptedGateway {
    fn failing_with(errors: Vec<CallError>) -> Arc<Self> {
        Arc::new(Self {
            send_failures: Mutex::new(errors.into()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl SmsGateway for ScriptedGateway {
    async fn send_code(&self, request: &SendSmsRequest) -> Result<SendSmsResponse, CallError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(SendSmsResponse {
            verification_id: format!("v-{}", request.phone_number),
        })
    }

    async fn verify_code(&self, _: &str, code: &str) -> Result<bool, CallError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        Ok(code == "246810")
    }
}

fn deps(gateway: Arc<ScriptedGateway>, store: Arc<dyn KeyValueStore>) -> EnrollmentDeps {
    EnrollmentDeps {
        gateway,
        store,
        linker: Arc::new(LoggingLinker),
        verification: VerificationConfig::default(),
    }
}

fn account() -> Vec<(Field, FieldValue)> {
    vec![
        (Field::Name, FieldValue::text("Park Jiwoo")),
        (Field::Password, FieldValue::text("correct-horse")),
        (Field::PasswordConfirm, FieldValue::text("correct-horse")),
        (Field::PhoneNumber, FieldValue::text("010-2222-3333")),
        (Field::ResidentNumber, FieldValue::text("880808-1")),
        (Field::Carrier, FieldValue::text("KT_MVNO")),
    ]
}

fn profile() -> Vec<(Field, FieldValue)> {
    vec![
        (
            Field::BirthDate,
            FieldValue::Date(NaiveDate::from_ymd_opt(1988, 8, 8).unwrap()),
        ),
        (Field::Gender, FieldValue::text("MALE")),
        (Field::Sido, FieldValue::text("Busan")),
        (Field::Sigungu, FieldValue::text("Haeundae-gu")),
    ]
}

fn household() -> Vec<(Field, FieldValue)> {
    vec![
        (Field::MaritalStatus, FieldValue::text("MARRIED")),
        (Field::NumberOfChildren, FieldValue::Count(2)),
        (Field::IsPregnant, FieldValue::Flag(true)),
        (
            Field::ExpectedDueDate,
            FieldValue::Date(NaiveDate::from_ymd_opt(2026, 12, 1).unwrap()),
        ),
    ]
}

fn income_and_consent() -> Vec<(Field, FieldValue)> {
    vec![
        (Field::IncomeLevel, FieldValue::text("BELOW100")),
        (
            Field::InterestCategories,
            FieldValue::list(["childcare", "housing"]),
        ),
        (Field::AgreePersonalInfo, FieldValue::Flag(true)),
        (Field::AgreeWelfareInfo, FieldValue::Flag(false)),
    ]
}

#[tokio::test]
async fn password_enrollment_end_to_end_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        LibSqlStore::new_local(&dir.path().join("enrollment.db"))
            .await
            .unwrap(),
    );
    let gateway = Arc::new(ScriptedGateway::default());
    let session = EnrollmentOrchestrator::start(
        IdentityMode::Password,
        deps(gateway.clone(), store.clone()),
        None,
    )
    .unwrap();

    session.update(account()).await.unwrap();
    assert_eq!(session.send_code().await.unwrap(), SendOutcome::Sent);
    session.verify_code("246810").await.unwrap();
    assert_eq!(session.next().await.unwrap(), Advance::Moved(WizardStep::Profile));

    session.update(profile()).await.unwrap();
    session.next().await.unwrap();
    session.update(household()).await.unwrap();
    session.next().await.unwrap();
    session.update(income_and_consent()).await.unwrap();
    session.next().await.unwrap();
    assert_eq!(session.next().await.unwrap(), Advance::ReadyToSubmit);

    let expected = session.draft().await.serialize();
    let SubmitOutcome::HandedOff(receipt) = session.submit().await.unwrap() else {
        panic!("expected hand-off");
    };
    assert_eq!(receipt.key, PASSWORD_SIGNUP_KEY);

    // The next stage reads the entry exactly once.
    let stored = store.take(PASSWORD_SIGNUP_KEY).await.unwrap().unwrap();
    let payload: CanonicalPayload = serde_json::from_value(stored).unwrap();
    assert_eq!(payload, expected);
    assert_eq!(payload.number_of_children, 2);
    assert_eq!(payload.interest_categories, "childcare,housing");
    assert_eq!(
        payload.birth_date.as_deref(),
        Some("1988-08-08T00:00:00.000Z")
    );
    assert!(store.take(PASSWORD_SIGNUP_KEY).await.unwrap().is_none());

    assert_eq!(gateway.sends.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.verifies.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn federated_enrollment_skips_account_step() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::default());
    let session = EnrollmentOrchestrator::start(
        IdentityMode::Federated,
        deps(gateway.clone(), store.clone()),
        Some(SecretString::from("kakao-pending-42".to_string())),
    )
    .unwrap();

    assert_eq!(session.view().await.step_number, 2);
    for step in [profile(), household(), income_and_consent()] {
        session.update(step).await.unwrap();
        session.next().await.unwrap();
    }
    assert_eq!(session.next().await.unwrap(), Advance::ReadyToSubmit);
    session.submit().await.unwrap();

    assert!(store.get(PASSWORD_SIGNUP_KEY).await.unwrap().is_none());
    let stored = store.take(FEDERATED_SIGNUP_KEY).await.unwrap().unwrap();
    let signup: FederatedSignup = serde_json::from_value(stored).unwrap();
    assert_eq!(signup.pending_identity_token, "kakao-pending-42");
    assert_eq!(signup.signup_data.phone_number, "");
    assert!(signup.signup_data.password.is_none());

    // No phone verification ever happened.
    assert_eq!(gateway.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_send_failures_are_retried_with_backoff() {
    let gateway = ScriptedGateway::failing_with(vec![
        CallError::status(503, "busy"),
        CallError::transport("connection reset"),
    ]);
    let session = EnrollmentOrchestrator::start(
        IdentityMode::Password,
        deps(gateway.clone(), Arc::new(MemoryStore::new())),
        None,
    )
    .unwrap();
    session.update(account()).await.unwrap();

    let start = tokio::time::Instant::now();
    assert_eq!(session.send_code().await.unwrap(), SendOutcome::Sent);
    // 500 ms, then 1000 ms.
    assert!(start.elapsed() >= Duration::from_millis(1500));
    assert_eq!(gateway.sends.load(Ordering::SeqCst), 3);
    assert_eq!(
        session.verification_status().await,
        VerificationStatus::Sent
    );
}

#[tokio::test(start_paused = true)]
async fn client_rejection_is_not_retried() {
    let gateway = ScriptedGateway::failing_with(vec![CallError::status(400, "Invalid carrier")]);
    let session = EnrollmentOrchestrator::start(
        IdentityMode::Password,
        deps(gateway.clone(), Arc::new(MemoryStore::new())),
        None,
    )
    .unwrap();
    session.update(account()).await.unwrap();

    let err = session.send_code().await.unwrap_err();
    assert!(matches!(err, EnrollmentError::Client { status: 400, .. }));
    assert_eq!(gateway.sends.load(Ordering::SeqCst), 1);
    assert_eq!(
        session.view().await.banner.as_deref(),
        Some("Invalid carrier")
    );
}

#[tokio::test(start_paused = true)]
async fn code_expires_after_five_minutes_and_can_be_resent() {
    let gateway = Arc::new(ScriptedGateway::default());
    let session = EnrollmentOrchestrator::start(
        IdentityMode::Password,
        deps(gateway.clone(), Arc::new(MemoryStore::new())),
        None,
    )
    .unwrap();
    session.update(account()).await.unwrap();
    session.send_code().await.unwrap();
    assert_eq!(session.view().await.verification.remaining_secs, 300);

    tokio::time::sleep(Duration::from_millis(299_500)).await;
    assert_eq!(
        session.verification_status().await,
        VerificationStatus::Sent
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        session.verification_status().await,
        VerificationStatus::Expired
    );
    assert!(matches!(
        session.verify_code("246810").await,
        Err(EnrollmentError::InvalidState { .. })
    ));
    assert!(session.next().await.is_err());

    assert_eq!(session.resend_code().await.unwrap(), SendOutcome::Sent);
    session.verify_code("246810").await.unwrap();
    assert_eq!(session.next().await.unwrap(), Advance::Moved(WizardStep::Profile));
    assert_eq!(gateway.sends.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn submit_twice_in_succession_hands_off_once() {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(
        EnrollmentOrchestrator::start(
            IdentityMode::Password,
            deps(Arc::new(ScriptedGateway::default()), store.clone()),
            None,
        )
        .unwrap(),
    );
    session.update(account()).await.unwrap();
    session.send_code().await.unwrap();
    session.verify_code("246810").await.unwrap();
    for step in [profile(), household(), income_and_consent()] {
        session.update(step).await.unwrap();
    }
    for _ in 0..4 {
        session.next().await.unwrap();
    }

    let (first, second) = tokio::join!(session.submit(), session.submit());
    let handed_off = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Ok(SubmitOutcome::HandedOff(_))))
        .count();
    assert_eq!(handed_off, 1);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn failed_validation_leaves_draft_and_step_untouched() {
    let session = EnrollmentOrchestrator::start(
        IdentityMode::Password,
        deps(Arc::new(ScriptedGateway::default()), Arc::new(MemoryStore::new())),
        None,
    )
    .unwrap();
    let mut edits = account();
    edits.retain(|(f, _)| *f != Field::PasswordConfirm);
    edits.push((Field::PasswordConfirm, FieldValue::text("different-pass")));
    session.update(edits).await.unwrap();
    let before = session.draft().await;

    let err = session.next().await.unwrap_err();
    assert_eq!(err.field(), Some(Field::PasswordConfirm));
    assert_eq!(session.draft().await, before);
    let view = session.view().await;
    assert_eq!(view.step, WizardStep::Account);
    assert!(view.field_errors.contains_key(&Field::PasswordConfirm));

    // Fixing the field clears its inline error.
    session
        .update([(Field::PasswordConfirm, FieldValue::text("correct-horse"))])
        .await
        .unwrap();
    assert!(session.view().await.field_errors.is_empty());
}
