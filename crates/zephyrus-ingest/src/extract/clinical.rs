//! Clinical resource extractors

use serde_json::Value;

use super::fields::{child, coding, first, reference, text, FieldReader};
use crate::models::{
    Condition, DiagnosticReport, Encounter, Immunization, Medication, Observation, Patient,
    Procedure,
};

const RACE_URL: &str = "http://hl7.org/fhir/us/core/StructureDefinition/us-core-race";
const ETHNICITY_URL: &str = "http://hl7.org/fhir/us/core/StructureDefinition/us-core-ethnicity";
const BIRTH_SEX_URL: &str = "http://hl7.org/fhir/us/core/StructureDefinition/us-core-birthsex";
const BIRTH_PLACE_URL: &str = "http://hl7.org/fhir/StructureDefinition/patient-birthPlace";

const PATIENT: &[&str] = &["Patient"];
const ENCOUNTER: &[&str] = &["Encounter"];
const LOCATION: &[&str] = &["Location"];
const PROVIDER: &[&str] = &["Organization", "Practitioner", "PractitionerRole"];
const RESULT: &[&str] = &["Observation"];

/// Extension with the given url, if present
fn extension<'a>(body: &'a Value, url: &str) -> Option<&'a Value> {
    body.get("extension")?
        .as_array()?
        .iter()
        .find(|ext| ext.get("url").and_then(Value::as_str) == Some(url))
}

/// Simple (`valueString` / `valueCode`) or complex (nested `text`) extension value
fn extension_text(body: &Value, url: &str) -> Option<String> {
    let ext = extension(body, url)?;
    text(ext.get("valueString"))
        .or_else(|| text(ext.get("valueCode")))
        .or_else(|| extension(ext, "text").and_then(|inner| text(inner.get("valueString"))))
}

pub(super) fn patient(r: &mut FieldReader<'_>) -> Patient {
    let body = r.body;

    let birth_place = text(
        child(body, "birthPlace")
            .and_then(|p| p.get("address"))
            .and_then(|a| a.get("city")),
    )
    .or_else(|| {
        text(
            extension(body, BIRTH_PLACE_URL)
                .and_then(|e| e.get("valueAddress"))
                .and_then(|a| a.get("city")),
        )
    });

    Patient {
        patient_id: r.resource_id(),
        birth_date: r.timestamp("birth_date", body.get("birthDate")),
        death_date: r.timestamp("death_date", body.get("deceasedDateTime")),
        race: extension_text(body, RACE_URL),
        ethnicity: extension_text(body, ETHNICITY_URL),
        gender: r.string("gender"),
        birth_sex: extension_text(body, BIRTH_SEX_URL),
        birth_place,
        marital_status: r.code_of("maritalStatus"),
        language: text(
            first(body, "communication")
                .and_then(|c| coding(c, "language"))
                .and_then(|c| c.get("code")),
        ),
    }
}

pub(super) fn encounter(r: &mut FieldReader<'_>) -> Encounter {
    let body = r.body;
    let period = child(body, "period");

    Encounter {
        encounter_id: r.resource_id(),
        patient_id: r.reference_of("subject", PATIENT),
        start_date: r.timestamp("start_date", period.and_then(|p| p.get("start"))),
        end_date: r.timestamp("end_date", period.and_then(|p| p.get("end"))),
        encounter_type: text(
            first(body, "type")
                .and_then(|t| first(t, "coding"))
                .and_then(|c| c.get("code")),
        ),
        encounter_class: text(child(body, "class").and_then(|c| c.get("code"))),
        location_id: reference(first(body, "location").and_then(|l| l.get("location")), LOCATION),
        provider_id: r.reference_of("serviceProvider", PROVIDER),
        reason_code: text(
            first(body, "reasonCode")
                .and_then(|c| first(c, "coding"))
                .and_then(|c| c.get("code")),
        ),
        discharge_disposition: text(
            child(body, "hospitalization")
                .and_then(|h| coding(h, "dischargeDisposition"))
                .and_then(|c| c.get("code")),
        ),
    }
}

pub(super) fn condition(r: &mut FieldReader<'_>) -> Condition {
    let body = r.body;
    let (code, code_system, description) = r.code_triple("code");

    Condition {
        condition_id: r.resource_id(),
        patient_id: r.reference_of("subject", PATIENT),
        encounter_id: r.reference_of("encounter", ENCOUNTER),
        code,
        code_system,
        description,
        category: r.category(),
        onset_date: r.timestamp("onset_date", body.get("onsetDateTime")),
        abatement_date: r.timestamp("abatement_date", body.get("abatementDateTime")),
        clinical_status: r.code_of("clinicalStatus"),
    }
}

pub(super) fn observation(r: &mut FieldReader<'_>) -> Observation {
    let body = r.body;
    let (code, code_system, description) = r.code_triple("code");

    let (value, unit) = if let Some(quantity) = child(body, "valueQuantity") {
        (text(quantity.get("value")), text(quantity.get("unit")))
    } else if let Some(concept) = child(body, "valueCodeableConcept") {
        (text(first(concept, "coding").and_then(|c| c.get("code"))), None)
    } else {
        (text(child(body, "valueString")), None)
    };

    Observation {
        observation_id: r.resource_id(),
        patient_id: r.reference_of("subject", PATIENT),
        encounter_id: r.reference_of("encounter", ENCOUNTER),
        code,
        code_system,
        description,
        value,
        unit,
        date: r.timestamp("date", body.get("effectiveDateTime")),
        category: r.category(),
        status: r.string("status"),
    }
}

pub(super) fn medication(r: &mut FieldReader<'_>) -> Medication {
    let body = r.body;
    let (code, code_system, description) = r.code_triple("medicationCodeableConcept");
    let dosage = first(body, "dosageInstruction");

    Medication {
        medication_id: r.resource_id(),
        patient_id: r.reference_of("subject", PATIENT),
        encounter_id: r.reference_of("encounter", ENCOUNTER),
        code,
        code_system,
        description,
        start_date: r.timestamp("start_date", body.get("authoredOn")),
        end_date: r.timestamp(
            "end_date",
            child(body, "dispenseRequest")
                .and_then(|d| d.get("validityPeriod"))
                .and_then(|p| p.get("end")),
        ),
        dosage: text(
            dosage
                .and_then(|d| first(d, "doseAndRate"))
                .and_then(|d| d.get("doseQuantity"))
                .and_then(|q| q.get("value")),
        ),
        route: text(
            dosage
                .and_then(|d| coding(d, "route"))
                .and_then(|c| c.get("code")),
        ),
        status: r.string("status"),
    }
}

pub(super) fn procedure(r: &mut FieldReader<'_>) -> Procedure {
    let body = r.body;
    let (code, code_system, description) = r.code_triple("code");
    let performed = body
        .get("performedDateTime")
        .or_else(|| child(body, "performedPeriod").and_then(|p| p.get("start")));

    Procedure {
        procedure_id: r.resource_id(),
        patient_id: r.reference_of("subject", PATIENT),
        encounter_id: r.reference_of("encounter", ENCOUNTER),
        code,
        code_system,
        description,
        date: r.timestamp("date", performed),
        status: r.string("status"),
        reason_code: text(
            first(body, "reasonCode")
                .and_then(|c| first(c, "coding"))
                .and_then(|c| c.get("code")),
        ),
    }
}

pub(super) fn immunization(r: &mut FieldReader<'_>) -> Immunization {
    let body = r.body;

    Immunization {
        immunization_id: r.resource_id(),
        patient_id: r.reference_of("patient", PATIENT),
        encounter_id: r.reference_of("encounter", ENCOUNTER),
        vaccine_code: r.code_of("vaccineCode"),
        date: r.timestamp("date", body.get("occurrenceDateTime")),
        status: r.string("status"),
        provider_id: reference(first(body, "performer").and_then(|p| p.get("actor")), PROVIDER),
    }
}

pub(super) fn diagnostic_report(r: &mut FieldReader<'_>) -> DiagnosticReport {
    let body = r.body;
    let (code, code_system, description) = r.code_triple("code");

    let result_ids = body
        .get("result")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|result| reference(Some(result), RESULT))
                .collect()
        })
        .unwrap_or_default();

    DiagnosticReport {
        report_id: r.resource_id(),
        patient_id: r.reference_of("subject", PATIENT),
        encounter_id: r.reference_of("encounter", ENCOUNTER),
        code,
        code_system,
        description,
        date: r.timestamp("date", body.get("effectiveDateTime")),
        status: r.string("status"),
        result_ids,
    }
}
