//! Wizard step definitions and per-step validation.
//!
//! Each step has a typed partial draft (all-`Option` fields) so a write can
//! carry any subset of the step's fields and merge last-write-wins per field.
//! Validators are pure functions over the accumulated draft: they never look
//! at another step's data, never touch I/O, and return field-level errors.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum length of a display name.
pub const MAX_DISPLAY_NAME_LEN: usize = 60;
/// Maximum length of the bio free-text field.
pub const MAX_BIO_LEN: usize = 500;
/// Inclusive bound on claimed years of experience.
pub const MAX_YEARS_EXPERIENCE: u32 = 60;

/// Ordered identifiers of the wizard steps.
///
/// Variant order is step order; `Availability` is the one optional step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    PersonalInfo,
    Qualifications,
    Availability,
}

impl StepId {
    /// All steps, in wizard order.
    pub const ALL: [StepId; 3] = [Self::PersonalInfo, Self::Qualifications, Self::Availability];

    /// Number of steps.
    pub const COUNT: usize = Self::ALL.len();

    /// Zero-based position of this step.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// Step at the given position, if in range.
    pub fn from_index(index: usize) -> Option<StepId> {
        Self::ALL.get(index).copied()
    }

    /// Whether the step must be completed before submission.
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::Availability)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PersonalInfo => "personal_info",
            Self::Qualifications => "qualifications",
            Self::Availability => "availability",
        };
        write!(f, "{s}")
    }
}

/// Partial draft for the personal-info step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalInfoDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl PersonalInfoDraft {
    /// Overlay `newer` onto `self`, field by field.
    fn apply(&mut self, newer: Self) {
        if newer.display_name.is_some() {
            self.display_name = newer.display_name;
        }
        if newer.phone.is_some() {
            self.phone = newer.phone;
        }
        if newer.timezone.is_some() {
            self.timezone = newer.timezone;
        }
    }
}

/// Partial draft for the qualifications step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualificationsDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub years_experience: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl QualificationsDraft {
    fn apply(&mut self, newer: Self) {
        if newer.subjects.is_some() {
            self.subjects = newer.subjects;
        }
        if newer.years_experience.is_some() {
            self.years_experience = newer.years_experience;
        }
        if newer.bio.is_some() {
            self.bio = newer.bio;
        }
    }
}

/// Partial draft for the availability step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_hour: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_hour: Option<u8>,
}

impl AvailabilityDraft {
    fn apply(&mut self, newer: Self) {
        if newer.days.is_some() {
            self.days = newer.days;
        }
        if newer.start_hour.is_some() {
            self.start_hour = newer.start_hour;
        }
        if newer.end_hour.is_some() {
            self.end_hour = newer.end_hour;
        }
    }

    fn is_untouched(&self) -> bool {
        self.days.is_none() && self.start_hour.is_none() && self.end_hour.is_none()
    }
}

/// A partial update targeting exactly one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepFields {
    PersonalInfo(PersonalInfoDraft),
    Qualifications(QualificationsDraft),
    Availability(AvailabilityDraft),
}

impl StepFields {
    /// Which step this update belongs to.
    pub fn step_id(&self) -> StepId {
        match self {
            Self::PersonalInfo(_) => StepId::PersonalInfo,
            Self::Qualifications(_) => StepId::Qualifications,
            Self::Availability(_) => StepId::Availability,
        }
    }

    /// Coalesce a newer same-step update into this one, field by field.
    ///
    /// Updates for different steps are left unchanged — callers are expected
    /// to check `step_id` first.
    pub fn coalesce(&mut self, newer: StepFields) {
        match (self, newer) {
            (Self::PersonalInfo(a), Self::PersonalInfo(b)) => a.apply(b),
            (Self::Qualifications(a), Self::Qualifications(b)) => a.apply(b),
            (Self::Availability(a), Self::Availability(b)) => a.apply(b),
            _ => {}
        }
    }
}

/// Accumulated draft across all steps, keyed by step.
///
/// This is the merged-payload shape sent on accept and the `draft` column of
/// the persisted wizard session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_info: Option<PersonalInfoDraft>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifications: Option<QualificationsDraft>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<AvailabilityDraft>,
}

impl DraftPayload {
    /// Merge a single-step update. Only fields present in the update are
    /// overwritten; other steps are never touched.
    pub fn merge(&mut self, update: StepFields) {
        match update {
            StepFields::PersonalInfo(p) => {
                self.personal_info.get_or_insert_with(Default::default).apply(p);
            }
            StepFields::Qualifications(q) => {
                self.qualifications.get_or_insert_with(Default::default).apply(q);
            }
            StepFields::Availability(a) => {
                self.availability.get_or_insert_with(Default::default).apply(a);
            }
        }
    }

    /// Whether no step has any data yet.
    pub fn is_empty(&self) -> bool {
        self.personal_info.is_none() && self.qualifications.is_none() && self.availability.is_none()
    }
}

/// Reason a single field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FieldError {
    #[error("value is required")]
    Missing,

    #[error("value must not be blank")]
    Empty,

    #[error("value exceeds {max} characters")]
    TooLong { max: usize },

    #[error("value must be between {min} and {max}")]
    OutOfRange { min: u32, max: u32 },

    #[error("value has an invalid format")]
    InvalidFormat,

    #[error("end must be after start")]
    EndBeforeStart,
}

/// Field-level validation errors for one step. Empty map means valid.
pub type FieldErrors = BTreeMap<&'static str, FieldError>;

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9][0-9 ().-]{5,18}[0-9]$").unwrap())
}

fn timezone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // IANA-style "Region/City" or bare "UTC"
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]+(/[A-Za-z0-9_+-]+)+$|^UTC$").unwrap())
}

const VALID_DAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Validate one step against the accumulated draft.
///
/// Runs on every field change for immediate feedback and again before any
/// step advance; the coordinator re-runs it once more server-side.
pub fn validate(step: StepId, draft: &DraftPayload) -> FieldErrors {
    match step {
        StepId::PersonalInfo => validate_personal_info(draft.personal_info.as_ref()),
        StepId::Qualifications => validate_qualifications(draft.qualifications.as_ref()),
        StepId::Availability => validate_availability(draft.availability.as_ref()),
    }
}

fn validate_personal_info(draft: Option<&PersonalInfoDraft>) -> FieldErrors {
    let mut errors = FieldErrors::new();
    let Some(draft) = draft else {
        errors.insert("display_name", FieldError::Missing);
        return errors;
    };

    match draft.display_name.as_deref() {
        None => {
            errors.insert("display_name", FieldError::Missing);
        }
        Some(name) if name.trim().is_empty() => {
            errors.insert("display_name", FieldError::Empty);
        }
        Some(name) if name.chars().count() > MAX_DISPLAY_NAME_LEN => {
            errors.insert(
                "display_name",
                FieldError::TooLong {
                    max: MAX_DISPLAY_NAME_LEN,
                },
            );
        }
        Some(_) => {}
    }

    if let Some(phone) = draft.phone.as_deref() {
        if !phone_re().is_match(phone) {
            errors.insert("phone", FieldError::InvalidFormat);
        }
    }

    if let Some(tz) = draft.timezone.as_deref() {
        if !timezone_re().is_match(tz) {
            errors.insert("timezone", FieldError::InvalidFormat);
        }
    }

    errors
}

fn validate_qualifications(draft: Option<&QualificationsDraft>) -> FieldErrors {
    let mut errors = FieldErrors::new();
    let Some(draft) = draft else {
        errors.insert("subjects", FieldError::Missing);
        errors.insert("years_experience", FieldError::Missing);
        return errors;
    };

    match draft.subjects.as_deref() {
        None => {
            errors.insert("subjects", FieldError::Missing);
        }
        Some([]) => {
            errors.insert("subjects", FieldError::Empty);
        }
        Some(subjects) if subjects.iter().any(|s| s.trim().is_empty()) => {
            errors.insert("subjects", FieldError::Empty);
        }
        Some(_) => {}
    }

    match draft.years_experience {
        None => {
            errors.insert("years_experience", FieldError::Missing);
        }
        Some(years) if years > MAX_YEARS_EXPERIENCE => {
            errors.insert(
                "years_experience",
                FieldError::OutOfRange {
                    min: 0,
                    max: MAX_YEARS_EXPERIENCE,
                },
            );
        }
        Some(_) => {}
    }

    if let Some(bio) = draft.bio.as_deref() {
        if bio.chars().count() > MAX_BIO_LEN {
            errors.insert("bio", FieldError::TooLong { max: MAX_BIO_LEN });
        }
    }

    errors
}

fn validate_availability(draft: Option<&AvailabilityDraft>) -> FieldErrors {
    let mut errors = FieldErrors::new();
    // The step is optional: an untouched draft is valid.
    let Some(draft) = draft else {
        return errors;
    };
    if draft.is_untouched() {
        return errors;
    }

    if let Some(days) = draft.days.as_deref() {
        if days.is_empty() {
            errors.insert("days", FieldError::Empty);
        } else if days
            .iter()
            .any(|d| !VALID_DAYS.contains(&d.to_ascii_lowercase().as_str()))
        {
            errors.insert("days", FieldError::InvalidFormat);
        }
    }

    // Once either bound is given, both are required and must form a range.
    match (draft.start_hour, draft.end_hour) {
        (None, None) => {}
        (None, Some(_)) => {
            errors.insert("start_hour", FieldError::Missing);
        }
        (Some(_), None) => {
            errors.insert("end_hour", FieldError::Missing);
        }
        (Some(start), Some(end)) => {
            if start > 23 {
                errors.insert("start_hour", FieldError::OutOfRange { min: 0, max: 23 });
            }
            if end > 24 {
                errors.insert("end_hour", FieldError::OutOfRange { min: 0, max: 24 });
            }
            if start <= 23 && end <= 24 && end <= start {
                errors.insert("end_hour", FieldError::EndBeforeStart);
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn personal(display_name: Option<&str>) -> StepFields {
        StepFields::PersonalInfo(PersonalInfoDraft {
            display_name: display_name.map(String::from),
            ..Default::default()
        })
    }

    #[test]
    fn step_order_and_indexing() {
        for (i, step) in StepId::ALL.iter().enumerate() {
            assert_eq!(step.index(), i);
            assert_eq!(StepId::from_index(i), Some(*step));
        }
        assert!(StepId::from_index(StepId::COUNT).is_none());
    }

    #[test]
    fn availability_is_the_only_optional_step() {
        assert!(StepId::PersonalInfo.is_required());
        assert!(StepId::Qualifications.is_required());
        assert!(!StepId::Availability.is_required());
    }

    #[test]
    fn display_matches_serde() {
        for step in StepId::ALL {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{step}\""));
        }
    }

    #[test]
    fn merge_is_per_field_and_never_crosses_steps() {
        let mut draft = DraftPayload::default();
        draft.merge(StepFields::PersonalInfo(PersonalInfoDraft {
            display_name: Some("Ada".into()),
            phone: Some("+44 20 7946 0000".into()),
            timezone: None,
        }));
        draft.merge(StepFields::Qualifications(QualificationsDraft {
            subjects: Some(vec!["maths".into()]),
            ..Default::default()
        }));
        // A later partial personal-info write must not erase phone.
        draft.merge(StepFields::PersonalInfo(PersonalInfoDraft {
            display_name: Some("Ada L.".into()),
            ..Default::default()
        }));

        let personal = draft.personal_info.as_ref().unwrap();
        assert_eq!(personal.display_name.as_deref(), Some("Ada L."));
        assert_eq!(personal.phone.as_deref(), Some("+44 20 7946 0000"));
        assert_eq!(
            draft.qualifications.as_ref().unwrap().subjects,
            Some(vec!["maths".to_string()])
        );
    }

    #[test]
    fn coalesce_same_step_updates() {
        let mut update = personal(Some("Ada"));
        update.coalesce(StepFields::PersonalInfo(PersonalInfoDraft {
            phone: Some("020 7946 0000".into()),
            ..Default::default()
        }));
        let StepFields::PersonalInfo(p) = update else {
            panic!("wrong variant");
        };
        assert_eq!(p.display_name.as_deref(), Some("Ada"));
        assert_eq!(p.phone.as_deref(), Some("020 7946 0000"));
    }

    #[test]
    fn step_fields_serde_carries_step_tag() {
        let json = serde_json::to_string(&personal(Some("Ada"))).unwrap();
        assert!(json.contains("\"step\":\"personal_info\""));
        let parsed: StepFields = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.step_id(), StepId::PersonalInfo);
    }

    #[test]
    fn empty_draft_payload_deserializes_from_empty_object() {
        let draft: DraftPayload = serde_json::from_str("{}").unwrap();
        assert!(draft.is_empty());
    }

    #[test]
    fn personal_info_requires_display_name() {
        let draft = DraftPayload::default();
        let errors = validate(StepId::PersonalInfo, &draft);
        assert_eq!(errors.get("display_name"), Some(&FieldError::Missing));

        let mut draft = DraftPayload::default();
        draft.merge(personal(Some("   ")));
        let errors = validate(StepId::PersonalInfo, &draft);
        assert_eq!(errors.get("display_name"), Some(&FieldError::Empty));

        let mut draft = DraftPayload::default();
        draft.merge(personal(Some("Ada")));
        assert!(validate(StepId::PersonalInfo, &draft).is_empty());
    }

    #[test]
    fn personal_info_optional_fields_validate_format_when_present() {
        let mut draft = DraftPayload::default();
        draft.merge(StepFields::PersonalInfo(PersonalInfoDraft {
            display_name: Some("Ada".into()),
            phone: Some("not-a-phone".into()),
            timezone: Some("Europe/London".into()),
        }));
        let errors = validate(StepId::PersonalInfo, &draft);
        assert_eq!(errors.get("phone"), Some(&FieldError::InvalidFormat));
        assert!(!errors.contains_key("timezone"));

        let mut draft = DraftPayload::default();
        draft.merge(StepFields::PersonalInfo(PersonalInfoDraft {
            display_name: Some("Ada".into()),
            timezone: Some("nowhere".into()),
            ..Default::default()
        }));
        let errors = validate(StepId::PersonalInfo, &draft);
        assert_eq!(errors.get("timezone"), Some(&FieldError::InvalidFormat));
    }

    #[test]
    fn qualifications_bounds() {
        let mut draft = DraftPayload::default();
        draft.merge(StepFields::Qualifications(QualificationsDraft {
            subjects: Some(vec![]),
            years_experience: Some(99),
            bio: Some("x".repeat(MAX_BIO_LEN + 1)),
        }));
        let errors = validate(StepId::Qualifications, &draft);
        assert_eq!(errors.get("subjects"), Some(&FieldError::Empty));
        assert_eq!(
            errors.get("years_experience"),
            Some(&FieldError::OutOfRange {
                min: 0,
                max: MAX_YEARS_EXPERIENCE
            })
        );
        assert_eq!(errors.get("bio"), Some(&FieldError::TooLong { max: MAX_BIO_LEN }));
    }

    #[test]
    fn untouched_availability_is_valid() {
        let draft = DraftPayload::default();
        assert!(validate(StepId::Availability, &draft).is_empty());
    }

    #[test]
    fn availability_cross_field_rule() {
        let mut draft = DraftPayload::default();
        draft.merge(StepFields::Availability(AvailabilityDraft {
            days: Some(vec!["monday".into()]),
            start_hour: Some(17),
            end_hour: Some(9),
        }));
        let errors = validate(StepId::Availability, &draft);
        assert_eq!(errors.get("end_hour"), Some(&FieldError::EndBeforeStart));

        let mut draft = DraftPayload::default();
        draft.merge(StepFields::Availability(AvailabilityDraft {
            days: Some(vec!["funday".into()]),
            start_hour: Some(9),
            end_hour: Some(17),
        }));
        let errors = validate(StepId::Availability, &draft);
        assert_eq!(errors.get("days"), Some(&FieldError::InvalidFormat));
    }

    #[test]
    fn availability_requires_both_bounds_once_touched() {
        let mut draft = DraftPayload::default();
        draft.merge(StepFields::Availability(AvailabilityDraft {
            start_hour: Some(9),
            ..Default::default()
        }));
        let errors = validate(StepId::Availability, &draft);
        assert_eq!(errors.get("end_hour"), Some(&FieldError::Missing));
    }
}
