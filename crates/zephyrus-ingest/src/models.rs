// Clinical record data models
//
// Raw bundle entries on the way in, flat typed records on the way out.

use serde::{Serialize, Serializer};
use serde_json::Value;

// ============================================================================
// Resource kinds
// ============================================================================

/// The resource kinds the pipeline extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    Patient,
    Encounter,
    Condition,
    Observation,
    MedicationRequest,
    Procedure,
    Immunization,
    DiagnosticReport,
    Claim,
    ExplanationOfBenefit,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Patient,
        ResourceKind::Encounter,
        ResourceKind::Condition,
        ResourceKind::Observation,
        ResourceKind::MedicationRequest,
        ResourceKind::Procedure,
        ResourceKind::Immunization,
        ResourceKind::DiagnosticReport,
        ResourceKind::Claim,
        ResourceKind::ExplanationOfBenefit,
    ];

    /// The `resourceType` discriminant as it appears in bundles
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Patient => "Patient",
            ResourceKind::Encounter => "Encounter",
            ResourceKind::Condition => "Condition",
            ResourceKind::Observation => "Observation",
            ResourceKind::MedicationRequest => "MedicationRequest",
            ResourceKind::Procedure => "Procedure",
            ResourceKind::Immunization => "Immunization",
            ResourceKind::DiagnosticReport => "DiagnosticReport",
            ResourceKind::Claim => "Claim",
            ResourceKind::ExplanationOfBenefit => "ExplanationOfBenefit",
        }
    }

    /// Output table (CSV file stem or database table)
    pub fn table_name(&self) -> &'static str {
        match self {
            ResourceKind::Patient => "patients",
            ResourceKind::Encounter => "encounters",
            ResourceKind::Condition => "conditions",
            ResourceKind::Observation => "observations",
            ResourceKind::MedicationRequest => "medications",
            ResourceKind::Procedure => "procedures",
            ResourceKind::Immunization => "immunizations",
            ResourceKind::DiagnosticReport => "diagnostic_reports",
            ResourceKind::Claim => "claims",
            ResourceKind::ExplanationOfBenefit => "explanations_of_benefit",
        }
    }

    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == resource_type)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Raw resources
// ============================================================================

/// One undecoded resource entry from a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct RawResource {
    /// `resourceType`, if the entry had one
    pub kind: Option<String>,

    /// The whole resource object
    pub body: Value,
}

impl RawResource {
    pub fn new(body: Value) -> Self {
        let kind = body
            .get("resourceType")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self { kind, body }
    }

    /// The resource's own `id`, when it is a string
    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }
}

// ============================================================================
// Typed records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub patient_id: String,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub race: Option<String>,
    pub ethnicity: Option<String>,
    pub gender: Option<String>,
    pub birth_sex: Option<String>,
    pub birth_place: Option<String>,
    pub marital_status: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encounter {
    pub encounter_id: String,
    pub patient_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub encounter_type: Option<String>,
    pub encounter_class: Option<String>,
    pub location_id: Option<String>,
    pub provider_id: Option<String>,
    pub reason_code: Option<String>,
    pub discharge_disposition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub condition_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub code: Option<String>,
    pub code_system: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub onset_date: Option<String>,
    pub abatement_date: Option<String>,
    pub clinical_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub observation_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub code: Option<String>,
    pub code_system: Option<String>,
    pub description: Option<String>,
    pub value: Option<String>,
    pub unit: Option<String>,
    pub date: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

/// Extracted from `MedicationRequest` resources
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Medication {
    pub medication_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub code: Option<String>,
    pub code_system: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub dosage: Option<String>,
    pub route: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Procedure {
    pub procedure_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub code: Option<String>,
    pub code_system: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub status: Option<String>,
    pub reason_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Immunization {
    pub immunization_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub vaccine_code: Option<String>,
    pub date: Option<String>,
    pub status: Option<String>,
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub report_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub code: Option<String>,
    pub code_system: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub status: Option<String>,
    /// Observation ids, written as one `;`-separated column
    #[serde(serialize_with = "serialize_id_list")]
    pub result_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Claim {
    pub claim_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub total_cost: Option<f64>,
    pub coverage_id: Option<String>,
    pub status: Option<String>,
    pub claim_type: Option<String>,
    pub submission_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationOfBenefit {
    pub eob_id: String,
    pub claim_id: Option<String>,
    pub patient_id: Option<String>,
    pub total_cost: Option<f64>,
    pub covered_amount: Option<f64>,
    pub copay_amount: Option<f64>,
    pub insurance_paid: Option<f64>,
    pub outcome: Option<String>,
    pub adjudication_date: Option<String>,
}

fn serialize_id_list<S: Serializer>(ids: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ids.join(";"))
}

/// The output of extracting one resource
#[derive(Debug, Clone, PartialEq)]
pub enum TypedRecord {
    Patient(Patient),
    Encounter(Encounter),
    Condition(Condition),
    Observation(Observation),
    Medication(Medication),
    Procedure(Procedure),
    Immunization(Immunization),
    DiagnosticReport(DiagnosticReport),
    Claim(Claim),
    ExplanationOfBenefit(ExplanationOfBenefit),
}

impl TypedRecord {
    pub fn kind(&self) -> ResourceKind {
        match self {
            TypedRecord::Patient(_) => ResourceKind::Patient,
            TypedRecord::Encounter(_) => ResourceKind::Encounter,
            TypedRecord::Condition(_) => ResourceKind::Condition,
            TypedRecord::Observation(_) => ResourceKind::Observation,
            TypedRecord::Medication(_) => ResourceKind::MedicationRequest,
            TypedRecord::Procedure(_) => ResourceKind::Procedure,
            TypedRecord::Immunization(_) => ResourceKind::Immunization,
            TypedRecord::DiagnosticReport(_) => ResourceKind::DiagnosticReport,
            TypedRecord::Claim(_) => ResourceKind::Claim,
            TypedRecord::ExplanationOfBenefit(_) => ResourceKind::ExplanationOfBenefit,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            TypedRecord::Patient(r) => r.resource_id(),
            TypedRecord::Encounter(r) => r.resource_id(),
            TypedRecord::Condition(r) => r.resource_id(),
            TypedRecord::Observation(r) => r.resource_id(),
            TypedRecord::Medication(r) => r.resource_id(),
            TypedRecord::Procedure(r) => r.resource_id(),
            TypedRecord::Immunization(r) => r.resource_id(),
            TypedRecord::DiagnosticReport(r) => r.resource_id(),
            TypedRecord::Claim(r) => r.resource_id(),
            TypedRecord::ExplanationOfBenefit(r) => r.resource_id(),
        }
    }
}

// ============================================================================
// Record batches
// ============================================================================

/// A kind-tagged view of one accumulator's buffer, handed to a sink
#[derive(Debug, Clone, Copy)]
pub enum RecordBatch<'a> {
    Patients(&'a [Patient]),
    Encounters(&'a [Encounter]),
    Conditions(&'a [Condition]),
    Observations(&'a [Observation]),
    Medications(&'a [Medication]),
    Procedures(&'a [Procedure]),
    Immunizations(&'a [Immunization]),
    DiagnosticReports(&'a [DiagnosticReport]),
    Claims(&'a [Claim]),
    ExplanationsOfBenefit(&'a [ExplanationOfBenefit]),
}

impl RecordBatch<'_> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RecordBatch::Patients(_) => ResourceKind::Patient,
            RecordBatch::Encounters(_) => ResourceKind::Encounter,
            RecordBatch::Conditions(_) => ResourceKind::Condition,
            RecordBatch::Observations(_) => ResourceKind::Observation,
            RecordBatch::Medications(_) => ResourceKind::MedicationRequest,
            RecordBatch::Procedures(_) => ResourceKind::Procedure,
            RecordBatch::Immunizations(_) => ResourceKind::Immunization,
            RecordBatch::DiagnosticReports(_) => ResourceKind::DiagnosticReport,
            RecordBatch::Claims(_) => ResourceKind::Claim,
            RecordBatch::ExplanationsOfBenefit(_) => ResourceKind::ExplanationOfBenefit,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Patients(r) => r.len(),
            RecordBatch::Encounters(r) => r.len(),
            RecordBatch::Conditions(r) => r.len(),
            RecordBatch::Observations(r) => r.len(),
            RecordBatch::Medications(r) => r.len(),
            RecordBatch::Procedures(r) => r.len(),
            RecordBatch::Immunizations(r) => r.len(),
            RecordBatch::DiagnosticReports(r) => r.len(),
            RecordBatch::Claims(r) => r.len(),
            RecordBatch::ExplanationsOfBenefit(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resource ids in buffer order
    pub fn resource_ids(&self) -> Vec<String> {
        fn ids<R: ExtractedRecord>(records: &[R]) -> Vec<String> {
            records.iter().map(|r| r.resource_id().to_string()).collect()
        }

        match self {
            RecordBatch::Patients(r) => ids(r),
            RecordBatch::Encounters(r) => ids(r),
            RecordBatch::Conditions(r) => ids(r),
            RecordBatch::Observations(r) => ids(r),
            RecordBatch::Medications(r) => ids(r),
            RecordBatch::Procedures(r) => ids(r),
            RecordBatch::Immunizations(r) => ids(r),
            RecordBatch::DiagnosticReports(r) => ids(r),
            RecordBatch::Claims(r) => ids(r),
            RecordBatch::ExplanationsOfBenefit(r) => ids(r),
        }
    }

    /// Serialize every record to a JSON array
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            RecordBatch::Patients(r) => serde_json::to_value(r),
            RecordBatch::Encounters(r) => serde_json::to_value(r),
            RecordBatch::Conditions(r) => serde_json::to_value(r),
            RecordBatch::Observations(r) => serde_json::to_value(r),
            RecordBatch::Medications(r) => serde_json::to_value(r),
            RecordBatch::Procedures(r) => serde_json::to_value(r),
            RecordBatch::Immunizations(r) => serde_json::to_value(r),
            RecordBatch::DiagnosticReports(r) => serde_json::to_value(r),
            RecordBatch::Claims(r) => serde_json::to_value(r),
            RecordBatch::ExplanationsOfBenefit(r) => serde_json::to_value(r),
        }
    }
}

/// Implemented by every flat record type so accumulators stay typed per kind
pub trait ExtractedRecord: Serialize + Send + Sync + Sized + 'static {
    const KIND: ResourceKind;

    /// Borrow a buffer of this record type as a sink batch
    fn batch(records: &[Self]) -> RecordBatch<'_>;

    /// The bare identifier of the source resource
    fn resource_id(&self) -> &str;
}

macro_rules! extracted_record {
    ($record:ident, $kind:ident, $batch:ident, $id:ident) => {
        impl ExtractedRecord for $record {
            const KIND: ResourceKind = ResourceKind::$kind;

            fn batch(records: &[Self]) -> RecordBatch<'_> {
                RecordBatch::$batch(records)
            }

            fn resource_id(&self) -> &str {
                &self.$id
            }
        }
    };
}

extracted_record!(Patient, Patient, Patients, patient_id);
extracted_record!(Encounter, Encounter, Encounters, encounter_id);
extracted_record!(Condition, Condition, Conditions, condition_id);
extracted_record!(Observation, Observation, Observations, observation_id);
extracted_record!(Medication, MedicationRequest, Medications, medication_id);
extracted_record!(Procedure, Procedure, Procedures, procedure_id);
extracted_record!(Immunization, Immunization, Immunizations, immunization_id);
extracted_record!(DiagnosticReport, DiagnosticReport, DiagnosticReports, report_id);
extracted_record!(Claim, Claim, Claims, claim_id);
extracted_record!(ExplanationOfBenefit, ExplanationOfBenefit, ExplanationsOfBenefit, eob_id);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_kind_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_resource_type(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::from_resource_type("Coverage"), None);
        assert_eq!(ResourceKind::from_resource_type("patient"), None);
    }

    #[test]
    fn test_table_names_are_unique() {
        let mut tables: Vec<_> = ResourceKind::ALL.iter().map(|k| k.table_name()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), ResourceKind::ALL.len());
    }

    #[test]
    fn test_raw_resource_reads_kind_and_id() {
        let raw = RawResource::new(json!({"resourceType": "Claim", "id": "c-1"}));
        assert_eq!(raw.kind.as_deref(), Some("Claim"));
        assert_eq!(raw.id(), Some("c-1"));

        let untyped = RawResource::new(json!({"id": 42}));
        assert_eq!(untyped.kind, None);
        assert_eq!(untyped.id(), None);
    }

    #[test]
    fn test_batch_reports_kind_and_ids() {
        let claims = vec![
            Claim {
                claim_id: "a".into(),
                patient_id: None,
                encounter_id: None,
                total_cost: Some(0.0),
                coverage_id: None,
                status: None,
                claim_type: None,
                submission_date: None,
            },
            Claim {
                claim_id: "b".into(),
                patient_id: None,
                encounter_id: None,
                total_cost: None,
                coverage_id: None,
                status: None,
                claim_type: None,
                submission_date: None,
            },
        ];

        let batch = Claim::batch(&claims);
        assert_eq!(batch.kind(), ResourceKind::Claim);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.resource_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_result_ids_serialize_as_one_column() {
        let report = DiagnosticReport {
            report_id: "r".into(),
            patient_id: None,
            encounter_id: None,
            code: None,
            code_system: None,
            description: None,
            date: None,
            status: None,
            result_ids: vec!["o1".into(), "o2".into()],
        };

        let value = serde_json::to_value(&report).unwrap_or_default();
        assert_eq!(value["result_ids"], json!("o1;o2"));
    }
}
