use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::mcda::{self, ScoreOutcome, Weights};
use crate::models::{PatientBatch, PatientRecord, ScoredPatient, SpecialitySummary};

pub fn summarize_by_speciality(patients: &[PatientRecord]) -> Vec<SpecialitySummary> {
    let mut map: BTreeMap<String, (usize, Vec<f64>, usize)> = BTreeMap::new();

    for patient in patients {
        let entry = map
            .entry(patient.speciality.clone())
            .or_insert((0, Vec::new(), 0));
        entry.0 += 1;
        if let Some(acuity) = patient.acuity {
            entry.1.push(acuity);
        }
        if patient.complexity.is_none()
            || patient.acuity.is_none()
            || patient.vitals_trend.is_none()
        {
            entry.2 += 1;
        }
    }

    let mut summaries: Vec<SpecialitySummary> = map
        .into_iter()
        .map(
            |(speciality, (patient_count, acuities, incomplete_count))| SpecialitySummary {
                speciality,
                patient_count,
                avg_acuity: if acuities.is_empty() {
                    None
                } else {
                    Some(acuities.iter().sum::<f64>() / acuities.len() as f64)
                },
                incomplete_count,
            },
        )
        .collect();

    summaries.sort_by(|a, b| {
        b.patient_count
            .cmp(&a.patient_count)
            .then_with(|| a.speciality.cmp(&b.speciality))
    });

    summaries
}

pub fn build_report(
    speciality: Option<&str>,
    weights: &Weights,
    within_speciality: bool,
    generated_on: NaiveDate,
    batch: &PatientBatch,
    outcome: &ScoreOutcome,
) -> String {
    let summaries = summarize_by_speciality(&batch.patients);
    let ordered = mcda::order_all(&outcome.ranked);
    let scope = speciality.unwrap_or("all specialities");

    let mut output = String::new();
    let _ = writeln!(output, "# Pathway Triage Report");
    let _ = writeln!(
        output,
        "Generated {} for {} ({} patients on the list)",
        generated_on,
        scope,
        batch.patients.len()
    );
    let _ = writeln!(
        output,
        "Weights: complexity {:.2}, acuity {:.2}, vitals {:.2} ({})",
        weights.complexity,
        weights.acuity,
        weights.vitals,
        if within_speciality {
            "normalised within each speciality"
        } else {
            "normalised across the whole list"
        }
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Speciality Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No patients on the list.");
    } else {
        for summary in summaries.iter() {
            let avg = summary
                .avg_acuity
                .map(|a| format!("{a:.1}"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {}: {} patients (avg acuity {}, {} with missing data)",
                summary.speciality, summary.patient_count, avg, summary.incomplete_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Ranked Priorities");

    if ordered.is_empty() {
        let _ = writeln!(output, "No patients could be scored.");
    } else {
        let mut current: Option<&str> = None;
        for scored in ordered.iter() {
            if current != Some(scored.record.speciality.as_str()) {
                current = Some(scored.record.speciality.as_str());
                let _ = writeln!(output);
                let _ = writeln!(output, "### {}", scored.record.speciality);
            }
            let _ = writeln!(
                output,
                "{}. {} (NHS {}) urgency {:.3} [{}]",
                scored.rank_in_speciality,
                scored.record.full_name,
                scored.record.nhs_number,
                scored.urgency_score,
                scored.explanation
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality Exclusions");

    if outcome.excluded.is_empty() {
        let _ = writeln!(output, "Every record was scored.");
    } else {
        for exclusion in outcome.excluded.iter() {
            let _ = writeln!(output, "- {exclusion}");
        }
    }

    let mut waiting: Vec<&PatientRecord> = batch.patients.iter().collect();
    waiting.sort_by(|a, b| a.referred_at.cmp(&b.referred_at));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Longest Waiting");

    if waiting.is_empty() {
        let _ = writeln!(output, "No patients on the list.");
    } else {
        for patient in waiting.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} (NHS {}, {}) referred {}",
                patient.full_name, patient.nhs_number, patient.speciality, patient.referred_at
            );
        }
    }

    output
}

/// One flattened row per scored patient, shaped for handover to booking
/// teams rather than for re-import.
#[derive(Debug, Serialize)]
pub struct ExportRow {
    pub patient_id: Uuid,
    pub nhs_number: String,
    pub full_name: String,
    pub speciality: String,
    pub complexity: Option<f64>,
    pub acuity: Option<f64>,
    pub vitals_trend: Option<String>,
    pub referred_at: NaiveDate,
    pub urgency_score: f64,
    pub rank_in_speciality: u32,
    pub explanation: String,
}

pub fn export_rows(scored: &[ScoredPatient]) -> Vec<ExportRow> {
    mcda::order_all(scored)
        .into_iter()
        .map(|s| ExportRow {
            patient_id: s.record.patient_id,
            nhs_number: s.record.nhs_number,
            full_name: s.record.full_name,
            speciality: s.record.speciality,
            complexity: s.record.complexity,
            acuity: s.record.acuity,
            vitals_trend: s.record.vitals_trend,
            referred_at: s.record.referred_at,
            urgency_score: s.urgency_score,
            rank_in_speciality: s.rank_in_speciality,
            explanation: s.explanation,
        })
        .collect()
}

pub fn to_csv_string(rows: &[ExportRow]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}

pub fn to_json_string(rows: &[ExportRow]) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcda::{score_patients, VitalsMap};

    fn patient(
        nhs_number: &str,
        speciality: &str,
        complexity: Option<f64>,
        acuity: Option<f64>,
        vitals_trend: Option<&str>,
    ) -> PatientRecord {
        PatientRecord {
            patient_id: Uuid::nil(),
            nhs_number: nhs_number.to_string(),
            full_name: format!("Patient {nhs_number}"),
            speciality: speciality.to_string(),
            complexity,
            acuity,
            vitals_trend: vitals_trend.map(|v| v.to_string()),
            referred_at: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
        }
    }

    #[test]
    fn summaries_track_counts_averages_and_gaps() {
        let patients = vec![
            patient("111", "Cardiology", Some(3.0), Some(2.0), Some("Stable")),
            patient("222", "Cardiology", None, Some(4.0), Some("Stable")),
            patient("333", "General Surgery", Some(1.0), Some(1.0), None),
        ];

        let summaries = summarize_by_speciality(&patients);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].speciality, "Cardiology");
        assert_eq!(summaries[0].patient_count, 2);
        assert_eq!(summaries[0].avg_acuity, Some(3.0));
        assert_eq!(summaries[0].incomplete_count, 1);
        assert_eq!(summaries[1].speciality, "General Surgery");
        assert_eq!(summaries[1].incomplete_count, 1);
    }

    #[test]
    fn report_covers_every_section() {
        let batch = PatientBatch::from_records(vec![
            patient("111", "Cardiology", Some(9.0), Some(4.0), Some("Stable")),
            patient("222", "Cardiology", Some(3.0), Some(2.0), Some("Improving")),
            patient("333", "Rheumatology", None, Some(5.0), Some("Stable")),
        ]);
        let outcome = score_patients(&batch, &Weights::default(), &VitalsMap::default(), true)
            .expect("batch scores");

        let report = build_report(
            None,
            &Weights::default(),
            true,
            NaiveDate::from_ymd_opt(2026, 8, 25).unwrap(),
            &batch,
            &outcome,
        );

        assert!(report.contains("# Pathway Triage Report"));
        assert!(report.contains("## Speciality Mix"));
        assert!(report.contains("### Cardiology"));
        assert!(report.contains("1. Patient 111"));
        assert!(report.contains("## Data Quality Exclusions"));
        assert!(report.contains("333 (Patient 333) excluded"));
        assert!(report.contains("## Longest Waiting"));
    }

    #[test]
    fn export_serialises_to_csv_and_json() {
        let batch = PatientBatch::from_records(vec![
            patient("111", "Cardiology", Some(9.0), Some(4.0), Some("Stable")),
            patient("222", "Cardiology", Some(3.0), None, Some("Improving")),
        ]);
        let outcome = score_patients(&batch, &Weights::default(), &VitalsMap::default(), true)
            .expect("batch scores");
        let rows = export_rows(&outcome.ranked);

        let csv_text = to_csv_string(&rows).expect("csv serialises");
        assert!(csv_text.starts_with("patient_id,nhs_number,full_name,speciality"));
        assert!(csv_text.contains("111,Patient 111,Cardiology"));

        let json_text = to_json_string(&rows).expect("json serialises");
        assert!(json_text.contains("\"patient_id\""));
        assert!(json_text.contains("\"rank_in_speciality\": 1"));
    }
}
