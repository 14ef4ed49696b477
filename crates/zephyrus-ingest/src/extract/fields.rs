//! Field lookup helpers shared by the per-kind extractors
//!
//! Every lookup is an explicit `Option` chain. A missing path segment yields
//! `None`; only the handful of conditions in [`FailureReason`] abort a record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;

use super::{ExtractionFailure, FailureReason, MissingAmountPolicy, NormalizationWarning};
use crate::models::ResourceKind;

/// Canonical output layout, before optional fraction and offset
const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Result of normalizing one raw timestamp string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Input was empty
    Absent,
    Valid(String),
    /// Input did not parse; carries the raw value
    Invalid(String),
}

/// Re-emit an ISO-8601-like timestamp in canonical form.
///
/// A trailing `Z` is read as `+00:00`. Date-only input becomes midnight with
/// no offset. Fractional seconds are kept to microsecond precision and only
/// written when non-zero.
pub fn normalize_timestamp(raw: &str) -> Normalized {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Normalized::Absent;
    }

    let candidate = match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(head) => format!("{head}+00:00"),
        None => trimmed.to_string(),
    };

    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&candidate, format) {
            let offset = parsed.format("%:z").to_string();
            return Normalized::Valid(format!("{}{offset}", render_naive(&parsed.naive_local())));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&candidate, format) {
            return Normalized::Valid(render_naive(&parsed));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&candidate, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Normalized::Valid(render_naive(&midnight));
        }
    }

    Normalized::Invalid(raw.to_string())
}

fn render_naive(value: &NaiveDateTime) -> String {
    let base = value.format(CANONICAL_FORMAT).to_string();
    let micros = value.nanosecond() / 1_000;
    if micros == 0 {
        base
    } else {
        format!("{base}.{micros:06}")
    }
}

/// Remove a leading `"<Kind>/"` for any of the given kind names.
///
/// Values without one of the prefixes pass through unchanged, so the
/// operation is idempotent on well-formed references.
pub fn strip_reference<'a>(reference: &'a str, kinds: &[&str]) -> &'a str {
    kinds
        .iter()
        .find_map(|kind| {
            reference
                .strip_prefix(kind)
                .and_then(|rest| rest.strip_prefix('/'))
        })
        .unwrap_or(reference)
}

/// `value[key]`
pub(crate) fn child<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key)
}

/// `value[key][0]`
pub(crate) fn first<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key)?.as_array()?.first()
}

/// `value[concept].coding[0]`
pub(crate) fn coding<'a>(value: &'a Value, concept: &str) -> Option<&'a Value> {
    first(value.get(concept)?, "coding")
}

/// Scalar as text. Empty strings, objects and arrays are absent.
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Per-resource lookup state: identity for failures and a warning sink
pub(crate) struct FieldReader<'a> {
    pub body: &'a Value,
    kind: ResourceKind,
    resource_id: String,
    missing_amount: MissingAmountPolicy,
    warnings: Vec<NormalizationWarning>,
}

impl<'a> FieldReader<'a> {
    pub fn new(
        body: &'a Value,
        kind: ResourceKind,
        resource_id: String,
        missing_amount: MissingAmountPolicy,
    ) -> Self {
        Self {
            body,
            kind,
            resource_id,
            missing_amount,
            warnings: Vec::new(),
        }
    }

    pub fn resource_id(&self) -> String {
        self.resource_id.clone()
    }

    /// Top-level scalar field
    pub fn string(&self, key: &str) -> Option<String> {
        text(child(self.body, key))
    }

    /// `coding[0].code` of a top-level concept
    pub fn code_of(&self, concept: &str) -> Option<String> {
        text(coding(self.body, concept).and_then(|c| c.get("code")))
    }

    /// `(code, system, display)` of a top-level concept
    pub fn code_triple(&self, concept: &str) -> (Option<String>, Option<String>, Option<String>) {
        let coded = coding(self.body, concept);
        (
            text(coded.and_then(|c| c.get("code"))),
            text(coded.and_then(|c| c.get("system"))),
            text(coded.and_then(|c| c.get("display"))),
        )
    }

    /// `category[0].coding[0].code`
    pub fn category(&self) -> Option<String> {
        text(
            first(self.body, "category")
                .and_then(|c| first(c, "coding"))
                .and_then(|c| c.get("code")),
        )
    }

    /// `<key>.reference` with the kind prefix removed
    pub fn reference_of(&self, key: &str, kinds: &[&str]) -> Option<String> {
        reference(child(self.body, key), kinds)
    }

    /// Normalize a timestamp, recording a warning when it does not parse
    pub fn timestamp(&mut self, field: &'static str, raw: Option<&Value>) -> Option<String> {
        let raw = match raw? {
            Value::String(s) => s.as_str(),
            Value::Null => return None,
            other => {
                self.warn(field, other.to_string());
                return None;
            }
        };

        match normalize_timestamp(raw) {
            Normalized::Absent => None,
            Normalized::Valid(value) => Some(value),
            Normalized::Invalid(value) => {
                self.warn(field, value);
                None
            }
        }
    }

    /// Monetary value under the configured missing-amount policy.
    ///
    /// Numbers and numeric strings are accepted; anything else present is a
    /// type mismatch.
    pub fn amount(&self, field: &'static str, raw: Option<&Value>) -> Result<Option<f64>, ExtractionFailure> {
        let value = match raw {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => Some(parsed),
                _ => return Err(self.mismatch(field, "a numeric amount")),
            },
            Some(_) => return Err(self.mismatch(field, "a numeric amount")),
        };

        Ok(match (value, self.missing_amount) {
            (Some(v), _) => Some(v),
            (None, MissingAmountPolicy::Zero) => Some(0.0),
            (None, MissingAmountPolicy::Absent) => None,
        })
    }

    pub fn into_warnings(self) -> Vec<NormalizationWarning> {
        self.warnings
    }

    fn warn(&mut self, field: &'static str, value: String) {
        self.warnings.push(NormalizationWarning {
            kind: self.kind,
            resource_id: self.resource_id.clone(),
            field,
            value,
        });
    }

    fn mismatch(&self, field: &'static str, expected: &'static str) -> ExtractionFailure {
        ExtractionFailure {
            kind: self.kind.as_str().to_string(),
            resource_id: Some(self.resource_id.clone()),
            reason: FailureReason::TypeMismatch { field, expected },
        }
    }
}

/// `value.reference` with the kind prefix removed; empty references are absent
pub(crate) fn reference(value: Option<&Value>, kinds: &[&str]) -> Option<String> {
    let raw = value?.get("reference")?.as_str()?;
    let stripped = strip_reference(raw, kinds);
    (!stripped.is_empty()).then(|| stripped.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn valid(raw: &str) -> Option<String> {
        match normalize_timestamp(raw) {
            Normalized::Valid(v) => Some(v),
            _ => None,
        }
    }

    #[test]
    fn test_normalize_utc_suffix() {
        assert_eq!(valid("2023-07-02T13:45:00Z").as_deref(), Some("2023-07-02T13:45:00+00:00"));
    }

    #[test]
    fn test_normalize_keeps_offset() {
        assert_eq!(
            valid("2019-03-11T08:15:30-05:00").as_deref(),
            Some("2019-03-11T08:15:30-05:00")
        );
    }

    #[test]
    fn test_normalize_date_only_is_midnight() {
        assert_eq!(valid("1987-11-04").as_deref(), Some("1987-11-04T00:00:00"));
    }

    #[test]
    fn test_normalize_space_separator_and_fraction() {
        assert_eq!(
            valid("2020-01-01 10:00:00.250").as_deref(),
            Some("2020-01-01T10:00:00.250000")
        );
        assert_eq!(valid("2020-01-01T10:00").as_deref(), Some("2020-01-01T10:00:00"));
    }

    #[test]
    fn test_normalize_invalid_and_empty() {
        assert_eq!(normalize_timestamp("not-a-date"), Normalized::Invalid("not-a-date".into()));
        assert_eq!(normalize_timestamp("2023-13-45"), Normalized::Invalid("2023-13-45".into()));
        assert_eq!(normalize_timestamp(""), Normalized::Absent);
        assert_eq!(normalize_timestamp("   "), Normalized::Absent);
    }

    #[test]
    fn test_strip_reference() {
        assert_eq!(strip_reference("Patient/abc-123", &["Patient"]), "abc-123");
        assert_eq!(strip_reference("abc-123", &["Patient"]), "abc-123");
        assert_eq!(strip_reference("Encounter/e1", &["Patient"]), "Encounter/e1");
        assert_eq!(strip_reference("Practitioner/p", &["Organization", "Practitioner"]), "p");
        assert_eq!(strip_reference("PatientX/1", &["Patient"]), "PatientX/1");
    }

    #[test]
    fn test_reader_reference_ignores_empty() {
        let body = json!({"subject": {"reference": "Patient/"}, "encounter": {}});
        let reader = FieldReader::new(&body, ResourceKind::Condition, "c".into(), MissingAmountPolicy::Zero);
        assert_eq!(reader.reference_of("subject", &["Patient"]), None);
        assert_eq!(reader.reference_of("encounter", &["Encounter"]), None);
    }

    #[test]
    fn test_reader_timestamp_warns_once() {
        let body = json!({"onsetDateTime": "yesterday"});
        let mut reader = FieldReader::new(&body, ResourceKind::Condition, "c".into(), MissingAmountPolicy::Zero);
        assert_eq!(reader.timestamp("onset_date", body.get("onsetDateTime")), None);
        assert_eq!(reader.timestamp("abatement_date", None), None);

        let warnings = reader.into_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "onset_date");
        assert_eq!(warnings[0].value, "yesterday");
    }

    #[test]
    fn test_reader_amount_policies() {
        let body = json!({});
        let zero = FieldReader::new(&body, ResourceKind::Claim, "c".into(), MissingAmountPolicy::Zero);
        let absent = FieldReader::new(&body, ResourceKind::Claim, "c".into(), MissingAmountPolicy::Absent);

        assert_eq!(zero.amount("total_cost", None).ok().flatten(), Some(0.0));
        assert_eq!(absent.amount("total_cost", None).ok().flatten(), None);
        assert_eq!(absent.amount("total_cost", Some(&json!("12.5"))).ok().flatten(), Some(12.5));
        assert!(zero.amount("total_cost", Some(&json!("twelve"))).is_err());
        assert!(zero.amount("total_cost", Some(&json!({"value": 1}))).is_err());
    }

    proptest! {
        #[test]
        fn prop_strip_reference_idempotent(id in "[a-z0-9-]{1,24}") {
            let reference = format!("Patient/{id}");
            let once = strip_reference(&reference, &["Patient"]);
            prop_assert_eq!(once, id.as_str());
            prop_assert_eq!(strip_reference(once, &["Patient"]), once);
        }
    }
}
