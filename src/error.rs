use thiserror::Error;

/// Fatal validation failures, checked before any scoring work starts.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("input is missing required column(s): {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("criterion weights must sum to a positive, finite value (got {sum})")]
    InvalidWeights { sum: f64 },
}

/// A single record that could not be scored. Non-fatal: the record is left
/// out of the ranked output and the rest of the batch proceeds.
#[derive(Debug, Clone, Error)]
#[error(
    "{nhs_number} ({full_name}) excluded: no usable {criterion} values in speciality {speciality}"
)]
pub struct DataQualityError {
    pub nhs_number: String,
    pub full_name: String,
    pub speciality: String,
    pub criterion: &'static str,
}
