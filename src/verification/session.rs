//! Verification session state: status, countdown and attempt history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of the phone verification sub-protocol.
///
/// NotStarted → Sent → {Verified | Expired}. Sent → Sent on a mismatched
/// code. Sent or Expired → Sent on resend. Failed when a send never
/// produced a live code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    NotStarted,
    Sent,
    Verified,
    Expired,
    Failed,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Sent => "sent",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One enrollment session's verification state.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSession {
    pub phone_number: Option<String>,
    #[serde(skip)]
    pub verification_id: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    /// Seconds left on the countdown while Sent.
    pub remaining_secs: u32,
    /// Verification attempts that reached the server and were rejected.
    /// Never decreases, not even on resend.
    pub attempt_count: u32,
    /// Codes successfully dispatched in this session.
    pub send_count: u32,
    pub status: VerificationStatus,
}

impl VerificationSession {
    /// Whether a code is outstanding and unexpired.
    pub fn is_live(&self) -> bool {
        self.status == VerificationStatus::Sent && self.remaining_secs > 0
    }

    /// Record a dispatched code. Resets the countdown and deadline, keeps history.
    pub fn mark_sent(
        &mut self,
        phone_number: &str,
        verification_id: String,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let ttl_secs = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);
        self.phone_number = Some(phone_number.to_string());
        self.verification_id = Some(verification_id);
        self.deadline = chrono::Duration::from_std(ttl).ok().map(|d| now + d);
        self.remaining_secs = ttl_secs;
        self.send_count += 1;
        self.status = VerificationStatus::Sent;
    }

    /// Advance the countdown by one second. Returns whether counting continues.
    pub fn tick(&mut self) -> bool {
        if self.status != VerificationStatus::Sent {
            return false;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.status = VerificationStatus::Expired;
            return false;
        }
        true
    }

    pub fn record_mismatch(&mut self) {
        self.attempt_count += 1;
    }

    pub fn mark_verified(&mut self) {
        self.status = VerificationStatus::Verified;
        self.remaining_secs = 0;
    }

    pub fn mark_failed(&mut self) {
        self.status = VerificationStatus::Failed;
        self.remaining_secs = 0;
    }

    /// Forget the outstanding code (e.g. the phone number changed). History is kept.
    pub fn reset(&mut self) {
        self.phone_number = None;
        self.verification_id = None;
        self.deadline = None;
        self.remaining_secs = 0;
        self.status = VerificationStatus::NotStarted;
    }
}
