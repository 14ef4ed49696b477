//! Field extraction
//!
//! Maps one [`RawResource`] to one flat [`TypedRecord`], or to an
//! [`ExtractionFailure`] when the resource cannot be identified. Extraction is
//! pure: no shared state and no I/O.

mod clinical;
mod fields;
mod financial;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{RawResource, ResourceKind, TypedRecord};
use fields::FieldReader;

pub use fields::{normalize_timestamp, strip_reference, Normalized};

/// How a monetary field with no value is recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingAmountPolicy {
    /// Missing totals are recorded as `0.0`
    #[default]
    Zero,
    /// Missing totals stay absent
    Absent,
}

impl FromStr for MissingAmountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zero" => Ok(Self::Zero),
            "absent" => Ok(Self::Absent),
            other => Err(format!("unknown missing-amount policy '{other}' (expected zero or absent)")),
        }
    }
}

impl fmt::Display for MissingAmountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => f.write_str("zero"),
            Self::Absent => f.write_str("absent"),
        }
    }
}

/// Why a resource could not be extracted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("unsupported resource kind")]
    UnsupportedKind,

    #[error("resource has no resourceType")]
    MissingKind,

    #[error("resource body is not an object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },
}

/// A resource entry that produced no record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} {}: {reason}", .resource_id.as_deref().unwrap_or("<unknown>"))]
pub struct ExtractionFailure {
    /// Declared kind, or `"<none>"` when the entry had none
    pub kind: String,
    pub resource_id: Option<String>,
    pub reason: FailureReason,
}

/// A field dropped to absent because its value did not normalize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationWarning {
    pub kind: ResourceKind,
    pub resource_id: String,
    pub field: &'static str,
    pub value: String,
}

impl fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: dropped unparsable {} '{}'",
            self.kind, self.resource_id, self.field, self.value
        )
    }
}

/// A successfully extracted record plus any fields dropped on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: TypedRecord,
    pub warnings: Vec<NormalizationWarning>,
}

/// Per-kind field extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor {
    missing_amount: MissingAmountPolicy,
}

impl Extractor {
    pub fn new(missing_amount: MissingAmountPolicy) -> Self {
        Self { missing_amount }
    }

    pub fn missing_amount(&self) -> MissingAmountPolicy {
        self.missing_amount
    }

    /// Extract one resource. Never panics on malformed input.
    pub fn extract(&self, raw: &RawResource) -> Result<Extraction, ExtractionFailure> {
        let declared = raw.kind.clone();
        let fail = |reason: FailureReason, resource_id: Option<String>| ExtractionFailure {
            kind: declared.clone().unwrap_or_else(|| "<none>".to_string()),
            resource_id,
            reason,
        };

        if !raw.body.is_object() {
            return Err(fail(FailureReason::NotAnObject, None));
        }

        let loose_id = raw.id().map(str::to_string);
        let kind_name = raw
            .kind
            .as_deref()
            .ok_or_else(|| fail(FailureReason::MissingKind, loose_id.clone()))?;
        let kind = ResourceKind::from_resource_type(kind_name)
            .ok_or_else(|| fail(FailureReason::UnsupportedKind, loose_id.clone()))?;

        let resource_id = match raw.body.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                return Err(fail(FailureReason::MissingField("id"), None))
            }
            Some(_) => {
                return Err(fail(
                    FailureReason::TypeMismatch {
                        field: "id",
                        expected: "a string",
                    },
                    None,
                ))
            }
        };

        let mut reader = FieldReader::new(&raw.body, kind, resource_id, self.missing_amount);
        let record = match kind {
            ResourceKind::Patient => TypedRecord::Patient(clinical::patient(&mut reader)),
            ResourceKind::Encounter => TypedRecord::Encounter(clinical::encounter(&mut reader)),
            ResourceKind::Condition => TypedRecord::Condition(clinical::condition(&mut reader)),
            ResourceKind::Observation => {
                TypedRecord::Observation(clinical::observation(&mut reader))
            }
            ResourceKind::MedicationRequest => {
                TypedRecord::Medication(clinical::medication(&mut reader))
            }
            ResourceKind::Procedure => TypedRecord::Procedure(clinical::procedure(&mut reader)),
            ResourceKind::Immunization => {
                TypedRecord::Immunization(clinical::immunization(&mut reader))
            }
            ResourceKind::DiagnosticReport => {
                TypedRecord::DiagnosticReport(clinical::diagnostic_report(&mut reader))
            }
            ResourceKind::Claim => TypedRecord::Claim(financial::claim(&mut reader)?),
            ResourceKind::ExplanationOfBenefit => {
                TypedRecord::ExplanationOfBenefit(financial::explanation_of_benefit(&mut reader)?)
            }
        };

        Ok(Extraction {
            record,
            warnings: reader.into_warnings(),
        })
    }
}
