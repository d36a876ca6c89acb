//! Phone verification, the out-of-band OTP sub-protocol.
//!
//! A code is sent by SMS, counts down for five minutes, and must be
//! confirmed before the account step of the wizard can pass. Remote calls
//! go through [`crate::retry`].

pub mod gateway;
pub mod manager;
pub mod session;

pub use gateway::{HttpSmsGateway, SendSmsRequest, SendSmsResponse, SmsGateway};
pub use manager::{PhoneVerificationManager, SendOutcome, VerificationConfig};
pub use session::{VerificationSession, VerificationStatus};
