//! Wizard field names, field values, and the enumerated choices.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Every field the wizard collects, named as the UI names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    // Step 1: account and phone
    Name,
    Password,
    PasswordConfirm,
    PhoneNumber,
    ResidentNumber,
    Carrier,
    // Step 2: profile
    BirthDate,
    Gender,
    Sido,
    Sigungu,
    // Step 3: household
    MaritalStatus,
    NumberOfChildren,
    IsPregnant,
    ExpectedDueDate,
    IsSingleParent,
    IsDisabled,
    IsMulticultural,
    // Step 4: income and interests
    IncomeLevel,
    InterestCategories,
    // Step 5: consent
    AgreePersonalInfo,
    AgreeWelfareInfo,
}

/// Shape of the value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Flag,
    Count,
    Date,
    List,
}

impl Field {
    pub const ALL: [Field; 21] = [
        Field::Name,
        Field::Password,
        Field::PasswordConfirm,
        Field::PhoneNumber,
        Field::ResidentNumber,
        Field::Carrier,
        Field::BirthDate,
        Field::Gender,
        Field::Sido,
        Field::Sigungu,
        Field::MaritalStatus,
        Field::NumberOfChildren,
        Field::IsPregnant,
        Field::ExpectedDueDate,
        Field::IsSingleParent,
        Field::IsDisabled,
        Field::IsMulticultural,
        Field::IncomeLevel,
        Field::InterestCategories,
        Field::AgreePersonalInfo,
        Field::AgreeWelfareInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Password => "password",
            Self::PasswordConfirm => "passwordConfirm",
            Self::PhoneNumber => "phoneNumber",
            Self::ResidentNumber => "residentNumber",
            Self::Carrier => "carrier",
            Self::BirthDate => "birthDate",
            Self::Gender => "gender",
            Self::Sido => "sido",
            Self::Sigungu => "sigungu",
            Self::MaritalStatus => "maritalStatus",
            Self::NumberOfChildren => "numberOfChildren",
            Self::IsPregnant => "isPregnant",
            Self::ExpectedDueDate => "expectedDueDate",
            Self::IsSingleParent => "isSingleParent",
            Self::IsDisabled => "isDisabled",
            Self::IsMulticultural => "isMulticultural",
            Self::IncomeLevel => "incomeLevel",
            Self::InterestCategories => "interestCategories",
            Self::AgreePersonalInfo => "agreePersonalInfo",
            Self::AgreeWelfareInfo => "agreeWelfareInfo",
        }
    }

    pub fn parse(name: &str) -> Option<Field> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::IsPregnant
            | Self::IsSingleParent
            | Self::IsDisabled
            | Self::IsMulticultural
            | Self::AgreePersonalInfo
            | Self::AgreeWelfareInfo => FieldKind::Flag,
            Self::NumberOfChildren => FieldKind::Count,
            Self::BirthDate | Self::ExpectedDueDate => FieldKind::Date,
            Self::InterestCategories => FieldKind::List,
            _ => FieldKind::Text,
        }
    }

    /// Fields whose values must never be logged.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Self::Password | Self::PasswordConfirm | Self::ResidentNumber
        )
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single field value held by the draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Flag(bool),
    Count(u32),
    List(Vec<String>),
    Text(String),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u32> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Convert raw JSON input into the value shape `field` expects.
    pub fn from_json(field: Field, value: &serde_json::Value) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::field(field, format!("Invalid value for {field}"));
        match field.kind() {
            FieldKind::Text => value
                .as_str()
                .map(|s| Self::Text(s.to_string()))
                .ok_or_else(invalid),
            FieldKind::Flag => value.as_bool().map(Self::Flag).ok_or_else(invalid),
            FieldKind::Count => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Self::Count)
                .ok_or_else(invalid),
            FieldKind::Date => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .map(Self::Date)
                .ok_or_else(invalid),
            FieldKind::List => value
                .as_array()
                .and_then(|items| {
                    items
                        .iter()
                        .map(|v| v.as_str().map(String::from))
                        .collect::<Option<Vec<_>>>()
                })
                .map(Self::List)
                .ok_or_else(invalid),
        }
    }
}

/// Parse an enumerated choice from its wire name.
pub fn parse_choice<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

/// Which path produced the user's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Password-based signup; step 1 collects password and phone.
    Password,
    /// Third-party login; step 1 is skipped.
    Federated,
}

impl std::fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password => write!(f, "password"),
            Self::Federated => write!(f, "federated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Carrier {
    Skt,
    Kt,
    Lgu,
    SktMvno,
    KtMvno,
    LguMvno,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaritalStatus {
    Single,
    Married,
    Divorced,
    Widowed,
}

/// Household income relative to the national median.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomeLevel {
    Below50,
    Below75,
    Below100,
    Below150,
    Above150,
}
