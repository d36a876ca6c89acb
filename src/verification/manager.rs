//! PhoneVerificationManager owns the OTP sub-protocol: sending, the
//! countdown, verifying, expiry and resend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::gateway::{SendSmsRequest, SmsGateway};
use super::session::{VerificationSession, VerificationStatus};
use crate::error::{EnrollmentError, ValidationError};
use crate::retry::{RetryPolicy, execute_classified};
use crate::wizard::{Field, is_valid_phone};

/// Timing and retry settings for phone verification.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Lifetime of a dispatched code.
    pub code_ttl: Duration,
    /// Period of the countdown task. Each period is one `tick()`.
    pub tick_interval: Duration,
    pub send_policy: RetryPolicy,
    pub verify_policy: RetryPolicy,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(300),
            tick_interval: Duration::from_secs(1),
            send_policy: RetryPolicy::new(2, Duration::from_millis(500), 2.0),
            verify_policy: RetryPolicy::new(2, Duration::from_millis(500), 2.0),
        }
    }
}

/// What a send request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A new code was dispatched and the countdown restarted.
    Sent,
    /// Dropped by the single-flight guard; nothing was dispatched.
    Ignored,
}

struct Shared {
    session: RwLock<VerificationSession>,
    send_in_flight: AtomicBool,
    /// Bumped whenever an outstanding result must be discarded.
    generation: AtomicU64,
    disposed: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    async fn tick(&self) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        let mut session = self.session.write().await;
        let counting = session.tick();
        if !counting && session.status == VerificationStatus::Expired {
            info!(phone = ?session.phone_number, "Verification code expired");
        }
        counting
    }

    fn replace_ticker(&self, handle: Option<JoinHandle<()>>) {
        let mut slot = self.ticker.lock().unwrap_or_else(|poisoned| {
            warn!("Countdown slot was poisoned, recovering");
            poisoned.into_inner()
        });
        if let Some(old) = std::mem::replace(&mut *slot, handle) {
            old.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.disposed.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Clears the send single-flight flag when the send finishes, however it finishes.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Coordinates one enrollment session's phone verification.
pub struct PhoneVerificationManager {
    gateway: Arc<dyn SmsGateway>,
    config: VerificationConfig,
    shared: Arc<Shared>,
}

impl PhoneVerificationManager {
    pub fn new(gateway: Arc<dyn SmsGateway>, config: VerificationConfig) -> Self {
        Self {
            gateway,
            config,
            shared: Arc::new(Shared {
                session: RwLock::new(VerificationSession::default()),
                send_in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub async fn status(&self) -> VerificationStatus {
        self.shared.session.read().await.status
    }

    pub async fn snapshot(&self) -> VerificationSession {
        self.shared.session.read().await.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.shared.send_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Dispatch a code. A no-op while a send is in flight or while an
    /// unexpired code is outstanding.
    pub async fn send_code(&self, request: SendSmsRequest) -> Result<SendOutcome, EnrollmentError> {
        self.dispatch(request, false).await
    }

    /// Dispatch a fresh code, replacing an outstanding or expired one.
    ///
    /// Allowed from Sent, Expired, or Failed. The countdown restarts; the
    /// attempt history is kept.
    pub async fn resend(&self, request: SendSmsRequest) -> Result<SendOutcome, EnrollmentError> {
        let status = self.status().await;
        if matches!(
            status,
            VerificationStatus::NotStarted | VerificationStatus::Verified
        ) {
            return Err(EnrollmentError::InvalidState {
                operation: "resend".into(),
                state: status.to_string(),
            });
        }
        self.dispatch(request, true).await
    }

    async fn dispatch(&self, request: SendSmsRequest, force: bool) -> Result<SendOutcome, EnrollmentError> {
        if self.is_disposed() {
            return Err(EnrollmentError::Disposed);
        }
        if !is_valid_phone(&request.phone_number) {
            return Err(ValidationError::field(
                Field::PhoneNumber,
                "Phone number must look like 010-1234-5678.",
            )
            .into());
        }

        {
            let session = self.shared.session.read().await;
            if session.status == VerificationStatus::Verified {
                return Err(EnrollmentError::InvalidState {
                    operation: "send_code".into(),
                    state: session.status.to_string(),
                });
            }
            if !force && session.is_live() {
                debug!(remaining = session.remaining_secs, "Code still live, send ignored");
                return Ok(SendOutcome::Ignored);
            }
        }

        if self
            .shared
            .send_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Send already in flight, ignored");
            return Ok(SendOutcome::Ignored);
        }
        let _guard = InFlightGuard(&self.shared.send_in_flight);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let gateway = Arc::clone(&self.gateway);
        let result = execute_classified(
            || {
                let gateway = Arc::clone(&gateway);
                let request = request.clone();
                async move { gateway.send_code(&request).await }
            },
            &self.config.send_policy,
        )
        .await;

        if self.is_disposed() {
            debug!("Send resolved after dispose, discarded");
            return Err(EnrollmentError::Disposed);
        }
        if !self.shared.is_current(generation) {
            debug!("Send resolved after being superseded, discarded");
            return Ok(SendOutcome::Ignored);
        }

        let mut session = self.shared.session.write().await;
        match result {
            Ok(resp) => {
                session.mark_sent(
                    &request.phone_number,
                    resp.verification_id,
                    self.config.code_ttl,
                    Utc::now(),
                );
                info!(
                    phone = %request.phone_number,
                    sends = session.send_count,
                    ttl_secs = self.config.code_ttl.as_secs(),
                    "Verification code sent"
                );
                drop(session);
                self.start_ticker();
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                // A failed resend leaves a still-live code usable.
                if !session.is_live() {
                    session.mark_failed();
                }
                warn!(phone = %request.phone_number, error = %e, "Verification code send failed");
                Err(e)
            }
        }
    }

    /// Check a code. Only valid while Sent and unexpired.
    pub async fn verify_code(&self, code: &str) -> Result<(), EnrollmentError> {
        if self.is_disposed() {
            return Err(EnrollmentError::Disposed);
        }
        let code = code.trim();
        if code.is_empty() {
            return Err(ValidationError::general("Please enter the verification code.").into());
        }

        let (phone, generation) = {
            let session = self.shared.session.read().await;
            if !session.is_live() {
                return Err(EnrollmentError::InvalidState {
                    operation: "verify_code".into(),
                    state: session.status.to_string(),
                });
            }
            (
                session.phone_number.clone().unwrap_or_default(),
                self.shared.generation.load(Ordering::SeqCst),
            )
        };

        let gateway = Arc::clone(&self.gateway);
        let result = execute_classified(
            || {
                let gateway = Arc::clone(&gateway);
                let phone = phone.clone();
                let code = code.to_string();
                async move { gateway.verify_code(&phone, &code).await }
            },
            &self.config.verify_policy,
        )
        .await;

        if self.is_disposed() {
            debug!("Verify resolved after dispose, discarded");
            return Err(EnrollmentError::Disposed);
        }

        let matched = result?;
        let mut session = self.shared.session.write().await;
        if !self.shared.is_current(generation) || !session.is_live() {
            return Err(EnrollmentError::Verification {
                message: "This code is no longer valid. Please request a new one.".into(),
            });
        }

        if matched {
            session.mark_verified();
            info!(phone = %phone, attempts = session.attempt_count, "Phone verified");
            drop(session);
            self.shared.replace_ticker(None);
            Ok(())
        } else {
            session.record_mismatch();
            debug!(attempts = session.attempt_count, "Verification code mismatch");
            Err(EnrollmentError::Verification {
                message: "The verification code does not match.".into(),
            })
        }
    }

    /// Advance the countdown by one second. Called by the countdown task;
    /// exposed so a caller-driven loop can drive it instead.
    pub async fn tick(&self) -> VerificationStatus {
        if !self.shared.tick().await {
            self.shared.replace_ticker(None);
        }
        self.status().await
    }

    /// Drop the outstanding code, e.g. because the phone number changed.
    /// Late results of earlier calls are discarded.
    pub async fn reset(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.replace_ticker(None);
        let mut session = self.shared.session.write().await;
        if session.status != VerificationStatus::NotStarted {
            debug!(status = %session.status, "Verification reset");
        }
        session.reset();
    }

    /// Stop the countdown and make every pending result a no-op.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.replace_ticker(None);
        debug!("Phone verification disposed");
    }

    fn start_ticker(&self) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = self.config.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if !shared.tick().await {
                    break;
                }
            }
        });
        self.shared.replace_ticker(Some(handle));
    }
}

impl Drop for PhoneVerificationManager {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.shared.replace_ticker(None);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::CallError;
    use crate::verification::gateway::SendSmsResponse;

    /// Scripted gateway. Sends succeed unless a failure is queued; verify
    /// answers come from the queue.
    #[derive(Default)]
    struct StubGateway {
        send_failures: std::sync::Mutex<VecDeque<CallError>>,
        verify_answers: std::sync::Mutex<VecDeque<Result<bool, CallError>>>,
        sends: AtomicU32,
        verifies: AtomicU32,
        /// When set, sends wait for a notification before answering.
        gate: Option<Arc<Notify>>,
        /// Same, for verifies.
        verify_gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SmsGateway for StubGateway {
        async fn send_code(&self, _request: &SendSmsRequest) -> Result<SendSmsResponse, CallError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(SendSmsResponse {
                verification_id: format!("vid-{n}"),
            })
        }

        async fn verify_code(&self, _phone: &str, _code: &str) -> Result<bool, CallError> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.verify_gate {
                gate.notified().await;
            }
            self.verify_answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(true))
        }
    }

    fn request(phone: &str) -> SendSmsRequest {
        SendSmsRequest {
            name: "Kim Minji".into(),
            phone_number: phone.into(),
            resident_number: "940302-2".into(),
            carrier: "KT".into(),
        }
    }

    fn fast_config() -> VerificationConfig {
        VerificationConfig {
            // Long enough that the background task never fires during a test.
            tick_interval: Duration::from_secs(3600),
            send_policy: RetryPolicy::new(1, Duration::from_millis(1), 2.0),
            verify_policy: RetryPolicy::new(1, Duration::from_millis(1), 2.0),
            ..Default::default()
        }
    }

    fn manager(gateway: Arc<StubGateway>) -> PhoneVerificationManager {
        PhoneVerificationManager::new(gateway, fast_config())
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected_before_any_call() {
        let gateway = Arc::new(StubGateway::default());
        let mgr = manager(Arc::clone(&gateway));

        let err = mgr.send_code(request("01012345678")).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::Validation(_)));
        assert_eq!(gateway.sends.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.status().await, VerificationStatus::NotStarted);
    }

    #[tokio::test]
    async fn send_transitions_to_sent_with_full_countdown() {
        let gateway = Arc::new(StubGateway::default());
        let mgr = manager(Arc::clone(&gateway));

        let outcome = mgr.send_code(request("010-1234-5678")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);

        let session = mgr.snapshot().await;
        assert_eq!(session.status, VerificationStatus::Sent);
        assert_eq!(session.remaining_secs, 300);
        assert_eq!(session.verification_id.as_deref(), Some("vid-0"));
        assert!(session.deadline.is_some());
    }

    #[tokio::test]
    async fn second_send_while_live_is_ignored() {
        let gateway = Arc::new(StubGateway::default());
        let mgr = manager(Arc::clone(&gateway));

        mgr.send_code(request("010-1234-5678")).await.unwrap();
        let outcome = mgr.send_code(request("010-1234-5678")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Ignored);
        assert_eq!(gateway.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_sends_dispatch_once() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(StubGateway {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let mgr = manager(Arc::clone(&gateway));

        let first = mgr.send_code(request("010-1234-5678"));
        let second = async {
            tokio::task::yield_now().await;
            let outcome = mgr.send_code(request("010-1234-5678")).await;
            gate.notify_one();
            outcome
        };
        let (a, b) = tokio::join!(first, second);

        assert_eq!(a.unwrap(), SendOutcome::Sent);
        assert_eq!(b.unwrap(), SendOutcome::Ignored);
        assert_eq!(gateway.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expiry_after_300_ticks_then_resend() {
        let gateway = Arc::new(StubGateway::default());
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        for _ in 0..299 {
            mgr.tick().await;
        }
        assert_eq!(mgr.status().await, VerificationStatus::Sent);
        assert_eq!(mgr.tick().await, VerificationStatus::Expired);

        let err = mgr.verify_code("123456").await.unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidState { .. }));

        assert_eq!(mgr.resend(request("010-1234-5678")).await.unwrap(), SendOutcome::Sent);
        let session = mgr.snapshot().await;
        assert_eq!(session.status, VerificationStatus::Sent);
        assert_eq!(session.remaining_secs, 300);
        assert_eq!(session.send_count, 2);
    }

    #[tokio::test]
    async fn mismatch_keeps_sent_and_counts_attempts() {
        let gateway = Arc::new(StubGateway::default());
        gateway.verify_answers.lock().unwrap().extend([Ok(false), Ok(false), Ok(true)]);
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        for expected in 1..=2 {
            let err = mgr.verify_code("000000").await.unwrap_err();
            assert!(matches!(err, EnrollmentError::Verification { .. }));
            let session = mgr.snapshot().await;
            assert_eq!(session.status, VerificationStatus::Sent);
            assert_eq!(session.attempt_count, expected);
        }

        mgr.verify_code("123456").await.unwrap();
        assert_eq!(mgr.status().await, VerificationStatus::Verified);

        // No resend once verified.
        let err = mgr.resend(request("010-1234-5678")).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn mismatch_does_not_consume_send_retries() {
        let gateway = Arc::new(StubGateway::default());
        gateway.verify_answers.lock().unwrap().push_back(Ok(false));
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        let _ = mgr.verify_code("000000").await;
        assert_eq!(gateway.verifies.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn verify_transport_failure_is_network_error() {
        let gateway = Arc::new(StubGateway::default());
        gateway.verify_answers.lock().unwrap().extend([
            Err(CallError::status(502, "bad gateway")),
            Err(CallError::status(502, "bad gateway")),
        ]);
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        let err = mgr.verify_code("123456").await.unwrap_err();
        assert!(matches!(err, EnrollmentError::Network { status: Some(502), .. }));
        // One retry per the policy.
        assert_eq!(gateway.verifies.load(Ordering::SeqCst), 2);
        assert_eq!(mgr.status().await, VerificationStatus::Sent);
    }

    #[tokio::test]
    async fn failed_first_send_marks_failed_and_allows_resend() {
        let gateway = Arc::new(StubGateway::default());
        gateway
            .send_failures
            .lock()
            .unwrap()
            .push_back(CallError::status(400, "unknown carrier"));
        let mgr = manager(Arc::clone(&gateway));

        let err = mgr.send_code(request("010-1234-5678")).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::Client { status: 400, .. }));
        assert_eq!(mgr.status().await, VerificationStatus::Failed);
        assert_eq!(gateway.sends.load(Ordering::SeqCst), 1);

        assert_eq!(mgr.resend(request("010-1234-5678")).await.unwrap(), SendOutcome::Sent);
    }

    #[tokio::test]
    async fn dispose_discards_late_send_result() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(StubGateway {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let mgr = manager(Arc::clone(&gateway));

        let send = mgr.send_code(request("010-1234-5678"));
        let dispose = async {
            tokio::task::yield_now().await;
            mgr.dispose();
            gate.notify_one();
        };
        let (result, ()) = tokio::join!(send, dispose);

        assert!(matches!(result, Err(EnrollmentError::Disposed)));
        assert_eq!(mgr.status().await, VerificationStatus::NotStarted);
        assert!(matches!(
            mgr.verify_code("123456").await,
            Err(EnrollmentError::Disposed)
        ));
    }

    #[tokio::test]
    async fn dispose_discards_late_verify_result() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(StubGateway {
            verify_gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        let verify = mgr.verify_code("123456");
        let dispose = async {
            tokio::task::yield_now().await;
            mgr.dispose();
            gate.notify_one();
        };
        let (result, ()) = tokio::join!(verify, dispose);

        assert!(matches!(result, Err(EnrollmentError::Disposed)));
        assert_eq!(gateway.verifies.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.status().await, VerificationStatus::Sent);
    }

    #[tokio::test]
    async fn resend_discards_verify_of_previous_code() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(StubGateway {
            verify_gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        let verify = mgr.verify_code("123456");
        let resend = async {
            tokio::task::yield_now().await;
            let outcome = mgr.resend(request("010-1234-5678")).await;
            gate.notify_one();
            outcome
        };
        let (result, outcome) = tokio::join!(verify, resend);

        assert_eq!(outcome.unwrap(), SendOutcome::Sent);
        assert!(matches!(result, Err(EnrollmentError::Verification { .. })));
        let session = mgr.snapshot().await;
        assert_eq!(session.status, VerificationStatus::Sent);
        assert_eq!(session.verification_id.as_deref(), Some("vid-1"));
        assert_eq!(session.attempt_count, 0);
    }

    #[tokio::test]
    async fn resend_while_live_restarts_countdown_and_keeps_attempts() {
        let gateway = Arc::new(StubGateway::default());
        gateway.verify_answers.lock().unwrap().push_back(Ok(false));
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        let _ = mgr.verify_code("000000").await;
        for _ in 0..10 {
            mgr.tick().await;
        }
        let before = mgr.snapshot().await;
        assert_eq!(before.remaining_secs, 290);
        assert_eq!(before.attempt_count, 1);

        assert_eq!(mgr.resend(request("010-1234-5678")).await.unwrap(), SendOutcome::Sent);
        let after = mgr.snapshot().await;
        assert_eq!(after.status, VerificationStatus::Sent);
        assert_eq!(after.remaining_secs, 300);
        assert_eq!(after.attempt_count, 1);
        assert_eq!(after.send_count, 2);
        assert!(after.deadline >= before.deadline);
        assert_eq!(gateway.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn poisoned_countdown_slot_still_aborts_old_task() {
        let gateway = Arc::new(StubGateway::default());
        let mgr = manager(gateway);

        let task = tokio::spawn(std::future::pending::<()>());
        let abort = task.abort_handle();
        *mgr.shared.ticker.lock().unwrap() = Some(task);

        let shared = Arc::clone(&mgr.shared);
        let _ = std::thread::spawn(move || {
            let _slot = shared.ticker.lock().unwrap();
            panic!("poison the countdown slot");
        })
        .join();
        assert!(mgr.shared.ticker.is_poisoned());

        mgr.shared.replace_ticker(None);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(abort.is_finished());
        assert!(
            mgr.shared
                .ticker
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .is_none()
        );
    }

    #[tokio::test]
    async fn reset_returns_to_not_started() {
        let gateway = Arc::new(StubGateway::default());
        let mgr = manager(Arc::clone(&gateway));
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        mgr.reset().await;
        assert_eq!(mgr.status().await, VerificationStatus::NotStarted);
        // A fresh send goes through.
        assert_eq!(mgr.send_code(request("010-9999-0000")).await.unwrap(), SendOutcome::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_task_expires_code() {
        let gateway = Arc::new(StubGateway::default());
        let config = VerificationConfig {
            send_policy: RetryPolicy::new(0, Duration::ZERO, 2.0),
            ..Default::default()
        };
        let mgr = PhoneVerificationManager::new(gateway, config);
        mgr.send_code(request("010-1234-5678")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(150)).await;
        let session = mgr.snapshot().await;
        assert_eq!(session.status, VerificationStatus::Sent);
        assert!(session.remaining_secs <= 151 && session.remaining_secs >= 149);

        tokio::time::sleep(Duration::from_secs(151)).await;
        assert_eq!(mgr.status().await, VerificationStatus::Expired);
    }
}
