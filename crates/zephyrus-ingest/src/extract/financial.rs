//! Billing resource extractors
//!
//! Monetary fields go through [`FieldReader::amount`], so a present but
//! non-numeric amount fails the whole record.

use super::fields::{child, coding, first, reference, text, FieldReader};
use super::ExtractionFailure;
use crate::models::{Claim, ExplanationOfBenefit};

const PATIENT: &[&str] = &["Patient"];
const ENCOUNTER: &[&str] = &["Encounter"];
const CLAIM: &[&str] = &["Claim"];
const COVERAGE: &[&str] = &["Coverage"];

pub(super) fn claim(r: &mut FieldReader<'_>) -> Result<Claim, ExtractionFailure> {
    let body = r.body;

    Ok(Claim {
        claim_id: r.resource_id(),
        patient_id: r.reference_of("patient", PATIENT),
        encounter_id: reference(
            first(body, "item").and_then(|item| first(item, "encounter")),
            ENCOUNTER,
        ),
        total_cost: r.amount("total_cost", child(body, "total").and_then(|t| t.get("value")))?,
        coverage_id: reference(
            first(body, "insurance").and_then(|i| i.get("coverage")),
            COVERAGE,
        ),
        status: r.string("status"),
        claim_type: text(coding(body, "type").and_then(|c| c.get("code"))),
        submission_date: r.timestamp("submission_date", body.get("created")),
    })
}

pub(super) fn explanation_of_benefit(
    r: &mut FieldReader<'_>,
) -> Result<ExplanationOfBenefit, ExtractionFailure> {
    let body = r.body;
    let financial = first(body, "benefitBalance").and_then(|b| first(b, "financial"));

    Ok(ExplanationOfBenefit {
        eob_id: r.resource_id(),
        claim_id: r.reference_of("claim", CLAIM),
        patient_id: r.reference_of("patient", PATIENT),
        total_cost: r.amount(
            "total_cost",
            first(body, "total")
                .and_then(|t| t.get("amount"))
                .and_then(|a| a.get("value")),
        )?,
        covered_amount: r.amount(
            "covered_amount",
            financial
                .and_then(|f| f.get("allowedMoney"))
                .and_then(|m| m.get("value")),
        )?,
        copay_amount: r.amount(
            "copay_amount",
            financial
                .and_then(|f| f.get("usedMoney"))
                .and_then(|m| m.get("value")),
        )?,
        insurance_paid: r.amount(
            "insurance_paid",
            child(body, "payment")
                .and_then(|p| p.get("amount"))
                .and_then(|a| a.get("value")),
        )?,
        outcome: r.string("outcome"),
        adjudication_date: r.timestamp("adjudication_date", body.get("created")),
    })
}
