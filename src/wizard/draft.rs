//! Enrollment draft: immutable accumulation of field values across steps,
//! and its canonical serialization for the backend.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use super::model::{
    Carrier, Field, FieldValue, Gender, IncomeLevel, MaritalStatus, parse_choice,
};

/// Delimiter joining the interest-category set into one backend string.
pub const CATEGORY_DELIMITER: &str = ",";

/// The in-progress aggregate of wizard values.
///
/// Never mutated in place: every update returns a new draft, so earlier
/// snapshots stay valid for undo and back navigation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnrollmentDraft {
    fields: BTreeMap<Field, FieldValue>,
}

impl EnrollmentDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Text value with surrounding whitespace removed; empty text reads as absent.
    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field)
            .and_then(FieldValue::as_text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Text value exactly as entered. Only the empty string reads as absent.
    pub fn raw_text(&self, field: Field) -> Option<&str> {
        self.get(field)
            .and_then(FieldValue::as_text)
            .filter(|s| !s.is_empty())
    }

    /// Flag value; absent flags read as `false`.
    pub fn flag(&self, field: Field) -> bool {
        self.get(field).and_then(FieldValue::as_flag).unwrap_or(false)
    }

    pub fn date(&self, field: Field) -> Option<NaiveDate> {
        self.get(field).and_then(FieldValue::as_date)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Return a new draft with one field overwritten.
    pub fn set(&self, field: Field, value: FieldValue) -> Self {
        self.merge([(field, value)])
    }

    /// Return a new draft with `update`'s keys overwritten.
    ///
    /// Changing `sido` clears `sigungu` unless the same update supplies one.
    pub fn merge<I>(&self, update: I) -> Self
    where
        I: IntoIterator<Item = (Field, FieldValue)>,
    {
        let update: BTreeMap<Field, FieldValue> = update.into_iter().collect();
        let mut fields = self.fields.clone();

        if let Some(new_sido) = update.get(&Field::Sido)
            && self.fields.get(&Field::Sido) != Some(new_sido)
            && !update.contains_key(&Field::Sigungu)
        {
            fields.remove(&Field::Sigungu);
        }

        fields.extend(update);
        Self { fields }
    }

    /// Return a new draft without the given fields.
    pub fn without(&self, remove: &[Field]) -> Self {
        let mut fields = self.fields.clone();
        for field in remove {
            fields.remove(field);
        }
        Self { fields }
    }

    /// Map the draft onto the backend contract. Total and deterministic.
    pub fn serialize(&self) -> CanonicalPayload {
        CanonicalPayload {
            name: self.text(Field::Name).map(String::from),
            password: self.raw_text(Field::Password).map(String::from),
            phone_number: self.text(Field::PhoneNumber).unwrap_or_default().to_string(),
            carrier: self.text(Field::Carrier).and_then(parse_choice),
            birth_date: self.date(Field::BirthDate).map(iso_instant),
            gender: self.text(Field::Gender).and_then(parse_choice),
            sido: self.text(Field::Sido).map(String::from),
            sigungu: self.text(Field::Sigungu).map(String::from),
            marital_status: self.text(Field::MaritalStatus).and_then(parse_choice),
            number_of_children: self
                .get(Field::NumberOfChildren)
                .and_then(FieldValue::as_count)
                .unwrap_or(0),
            is_pregnant: self.flag(Field::IsPregnant),
            expected_due_date: self.date(Field::ExpectedDueDate).map(iso_instant),
            is_single_parent: self.flag(Field::IsSingleParent),
            is_disabled: self.flag(Field::IsDisabled),
            is_multicultural: self.flag(Field::IsMulticultural),
            income_level: self.text(Field::IncomeLevel).and_then(parse_choice),
            interest_categories: self
                .get(Field::InterestCategories)
                .and_then(FieldValue::as_list)
                .map(|items| items.join(CATEGORY_DELIMITER))
                .unwrap_or_default(),
            agree_personal_info: self.flag(Field::AgreePersonalInfo),
            agree_welfare_info: self.flag(Field::AgreeWelfareInfo),
        }
    }
}

impl FromIterator<(Field, FieldValue)> for EnrollmentDraft {
    fn from_iter<T: IntoIterator<Item = (Field, FieldValue)>>(iter: T) -> Self {
        Self::new().merge(iter)
    }
}

impl std::fmt::Debug for EnrollmentDraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (field, value) in &self.fields {
            if field.is_sensitive() {
                map.entry(field, &"[REDACTED]");
            } else {
                map.entry(field, value);
            }
        }
        map.finish()
    }
}

/// A date as midnight UTC in RFC 3339 form, e.g. `2000-01-01T00:00:00.000Z`.
fn iso_instant(date: NaiveDate) -> String {
    date.and_time(NaiveTime::MIN)
        .and_utc()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The submission payload in the backend's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Empty for identity-provider users who never entered a number.
    #[serde(default)]
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<Carrier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sido: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigungu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marital_status: Option<MaritalStatus>,
    #[serde(default)]
    pub number_of_children: u32,
    #[serde(default)]
    pub is_pregnant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_due_date: Option<String>,
    #[serde(default)]
    pub is_single_parent: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub is_multicultural: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income_level: Option<IncomeLevel>,
    /// Interest categories joined with [`CATEGORY_DELIMITER`].
    #[serde(default)]
    pub interest_categories: String,
    #[serde(default)]
    pub agree_personal_info: bool,
    #[serde(default)]
    pub agree_welfare_info: bool,
}

impl CanonicalPayload {
    /// Split the joined category string back into its items.
    pub fn interest_category_list(&self) -> Vec<String> {
        self.interest_categories
            .split(CATEGORY_DELIMITER)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// The birth date recovered from its instant form.
    pub fn birth_date_value(&self) -> Option<NaiveDate> {
        self.birth_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.date_naive())
    }
}
