use chrono::NaiveDate;
use uuid::Uuid;

/// Columns the scoring engine cannot work without. Checked once per batch,
/// against the column list the source reported, not per row.
pub const REQUIRED_COLUMNS: [&str; 4] = ["speciality", "complexity", "acuity", "vitals_trend"];

pub fn missing_required_columns<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    REQUIRED_COLUMNS
        .iter()
        .filter(|required| !columns.iter().any(|c| c.as_ref() == **required))
        .map(|required| required.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub patient_id: Uuid,
    pub nhs_number: String,
    pub full_name: String,
    pub speciality: String,
    pub complexity: Option<f64>,
    pub acuity: Option<f64>,
    pub vitals_trend: Option<String>,
    pub referred_at: NaiveDate,
}

/// An ordered set of records together with the column names the source
/// actually provided. Record order is significant: equal urgency scores are
/// ranked in batch order.
#[derive(Debug, Clone)]
pub struct PatientBatch {
    pub columns: Vec<String>,
    pub patients: Vec<PatientRecord>,
}

impl PatientBatch {
    pub fn new(columns: Vec<String>, patients: Vec<PatientRecord>) -> Self {
        Self { columns, patients }
    }

    /// Batch built from fully-typed records (the database path), where every
    /// column is present by construction.
    pub fn from_records(patients: Vec<PatientRecord>) -> Self {
        let columns = [
            "nhs_number",
            "full_name",
            "speciality",
            "complexity",
            "acuity",
            "vitals_trend",
            "referred_at",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        Self { columns, patients }
    }

    pub fn missing_required_columns(&self) -> Vec<String> {
        missing_required_columns(&self.columns)
    }
}

#[derive(Debug, Clone)]
pub struct ScoredPatient {
    pub record: PatientRecord,
    pub urgency_score: f64,
    pub rank_in_speciality: u32,
    pub explanation: String,
}

#[derive(Debug, Clone)]
pub struct SpecialitySummary {
    pub speciality: String,
    pub patient_count: usize,
    pub avg_acuity: Option<f64>,
    pub incomplete_count: usize,
}
