//! Signup wizard: field model, immutable draft and the step state machine.
//!
//! The wizard collects a banking enrollment across five steps. The draft is
//! rebuilt on every edit, the step controller gates forward moves on each
//! step's validator, and the account step additionally requires a verified
//! phone number (see [`crate::verification`]).

pub mod controller;
pub mod draft;
pub mod model;
pub mod steps;

pub use controller::{Advance, StepController};
pub use draft::{CanonicalPayload, EnrollmentDraft};
pub use model::{
    Carrier, Field, FieldKind, FieldValue, Gender, IdentityMode, IncomeLevel, MaritalStatus,
};
pub use steps::{TOTAL_STEPS, WizardStep, is_valid_phone};
