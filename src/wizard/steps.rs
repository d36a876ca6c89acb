//! Wizard steps and their validators.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::draft::EnrollmentDraft;
use super::model::{Field, Gender, IncomeLevel, MaritalStatus, parse_choice};
use crate::error::ValidationError;
use crate::verification::VerificationStatus;

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Total number of wizard steps.
pub const TOTAL_STEPS: u8 = 5;

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}-\d{4}-\d{4}$").expect("phone pattern compiles"));

/// Whether `phone` matches the fixed-width `NNN-NNNN-NNNN` mobile pattern.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN.is_match(phone)
}

/// The wizard steps, in order.
///
/// Progresses linearly: Account → Profile → Household → Income → Consent.
/// Consent is the last step before hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Account,
    Profile,
    Household,
    Income,
    Consent,
}

impl WizardStep {
    pub const ALL: [WizardStep; 5] = [
        WizardStep::Account,
        WizardStep::Profile,
        WizardStep::Household,
        WizardStep::Income,
        WizardStep::Consent,
    ];

    /// 1-based step index.
    pub fn number(&self) -> u8 {
        match self {
            Self::Account => 1,
            Self::Profile => 2,
            Self::Household => 3,
            Self::Income => 4,
            Self::Consent => 5,
        }
    }

    pub fn from_number(n: u8) -> Option<WizardStep> {
        Self::ALL.into_iter().find(|s| s.number() == n)
    }

    pub fn next(&self) -> Option<WizardStep> {
        Self::from_number(self.number() + 1)
    }

    pub fn prev(&self) -> Option<WizardStep> {
        self.number().checked_sub(1).and_then(Self::from_number)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Consent)
    }

    /// Fields that must be present for this step to pass.
    pub fn required_fields(&self) -> &'static [Field] {
        match self {
            Self::Account => &[
                Field::Name,
                Field::Password,
                Field::PasswordConfirm,
                Field::PhoneNumber,
            ],
            Self::Profile => &[Field::BirthDate, Field::Gender, Field::Sido],
            Self::Household => &[Field::MaritalStatus],
            Self::Income => &[Field::IncomeLevel],
            Self::Consent => &[Field::AgreePersonalInfo],
        }
    }

    /// Fields collected on this step.
    pub fn fields(&self) -> &'static [Field] {
        match self {
            Self::Account => &[
                Field::Name,
                Field::Password,
                Field::PasswordConfirm,
                Field::PhoneNumber,
                Field::ResidentNumber,
                Field::Carrier,
            ],
            Self::Profile => &[Field::BirthDate, Field::Gender, Field::Sido, Field::Sigungu],
            Self::Household => &[
                Field::MaritalStatus,
                Field::NumberOfChildren,
                Field::IsPregnant,
                Field::ExpectedDueDate,
                Field::IsSingleParent,
                Field::IsDisabled,
                Field::IsMulticultural,
            ],
            Self::Income => &[Field::IncomeLevel, Field::InterestCategories],
            Self::Consent => &[Field::AgreePersonalInfo, Field::AgreeWelfareInfo],
        }
    }

    /// Run this step's validator, reporting the first unmet requirement.
    ///
    /// `verification` only matters for the account step.
    pub fn validate(
        &self,
        draft: &EnrollmentDraft,
        verification: VerificationStatus,
    ) -> Result<(), ValidationError> {
        match self {
            Self::Account => validate_account(draft, verification),
            Self::Profile => validate_profile(draft),
            Self::Household => validate_household(draft),
            Self::Income => validate_income(draft),
            Self::Consent => validate_consent(draft),
        }
    }
}

impl std::fmt::Display for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Account => "account",
            Self::Profile => "profile",
            Self::Household => "household",
            Self::Income => "income",
            Self::Consent => "consent",
        };
        write!(f, "{s}")
    }
}

fn validate_account(
    draft: &EnrollmentDraft,
    verification: VerificationStatus,
) -> Result<(), ValidationError> {
    if draft.text(Field::Name).is_none() {
        return Err(ValidationError::field(Field::Name, "Please enter your name."));
    }

    let password = draft.raw_text(Field::Password).unwrap_or_default();
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::field(
            Field::Password,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters."),
        ));
    }
    if draft.raw_text(Field::PasswordConfirm) != Some(password) {
        return Err(ValidationError::field(
            Field::PasswordConfirm,
            "Passwords do not match.",
        ));
    }

    match draft.text(Field::PhoneNumber) {
        Some(phone) if is_valid_phone(phone) => {}
        _ => {
            return Err(ValidationError::field(
                Field::PhoneNumber,
                "Phone number must look like 010-1234-5678.",
            ));
        }
    }

    if verification != VerificationStatus::Verified {
        return Err(ValidationError::field(
            Field::PhoneNumber,
            "Please verify your phone number.",
        ));
    }
    Ok(())
}

fn validate_profile(draft: &EnrollmentDraft) -> Result<(), ValidationError> {
    if draft.date(Field::BirthDate).is_none() {
        return Err(ValidationError::field(
            Field::BirthDate,
            "Please enter your birth date.",
        ));
    }
    if draft
        .text(Field::Gender)
        .and_then(parse_choice::<Gender>)
        .is_none()
    {
        return Err(ValidationError::field(Field::Gender, "Please select your gender."));
    }
    if draft.text(Field::Sido).is_none() {
        return Err(ValidationError::field(
            Field::Sido,
            "Please select your region of residence.",
        ));
    }
    Ok(())
}

fn validate_household(draft: &EnrollmentDraft) -> Result<(), ValidationError> {
    if draft
        .text(Field::MaritalStatus)
        .and_then(parse_choice::<MaritalStatus>)
        .is_none()
    {
        return Err(ValidationError::field(
            Field::MaritalStatus,
            "Please select your marital status.",
        ));
    }
    if draft.flag(Field::IsPregnant) && draft.date(Field::ExpectedDueDate).is_none() {
        return Err(ValidationError::field(
            Field::ExpectedDueDate,
            "Please enter the expected due date.",
        ));
    }
    Ok(())
}

fn validate_income(draft: &EnrollmentDraft) -> Result<(), ValidationError> {
    if draft
        .text(Field::IncomeLevel)
        .and_then(parse_choice::<IncomeLevel>)
        .is_none()
    {
        return Err(ValidationError::field(
            Field::IncomeLevel,
            "Please select your income bracket.",
        ));
    }
    Ok(())
}

fn validate_consent(draft: &EnrollmentDraft) -> Result<(), ValidationError> {
    if !draft.flag(Field::AgreePersonalInfo) {
        return Err(ValidationError::field(
            Field::AgreePersonalInfo,
            "You must agree to the collection of personal information.",
        ));
    }
    Ok(())
}
