use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{DataQualityError, ScoreError};
use crate::models::{PatientBatch, PatientRecord, ScoredPatient};

/// Relative importance of the three criteria. Magnitudes do not matter,
/// only ratios: the engine rescales them to sum to 1 before scoring.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub complexity: f64,
    pub acuity: f64,
    pub vitals: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            complexity: 0.5,
            acuity: 0.3,
            vitals: 0.2,
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.complexity + self.acuity + self.vitals
    }

    /// Rescale so the weights sum to 1. The sum must be finite and strictly
    /// positive; zero, negative, NaN and infinite sums are all rejected.
    pub fn normalised(&self) -> Result<Weights, ScoreError> {
        let sum = self.sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(ScoreError::InvalidWeights { sum });
        }
        Ok(Weights {
            complexity: self.complexity / sum,
            acuity: self.acuity / sum,
            vitals: self.vitals / sum,
        })
    }
}

/// Ordinal urgency value per vitals-trend label, expected in [0, 1].
/// Labels absent from the map are not an error; `score_patients` resolves
/// them to the median of the mapped scores in the batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct VitalsMap(BTreeMap<String, f64>);

impl Default for VitalsMap {
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert("Deteriorating".to_string(), 1.0);
        map.insert("Stable".to_string(), 0.5);
        map.insert("Improving".to_string(), 0.0);
        Self(map)
    }
}

impl VitalsMap {
    /// Parse a JSON object of label to value, e.g.
    /// `{"Deteriorating": 1.0, "Stable": 0.5, "Improving": 0.0}`.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn lookup(&self, label: &str) -> Option<f64> {
        self.0.get(label).copied()
    }
}

/// Result of scoring a batch: ranked records in batch order, plus the
/// records that had to be dropped and why. Exclusions never consume a rank,
/// so ranks stay contiguous 1..N over the ranked output.
#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub ranked: Vec<ScoredPatient>,
    pub excluded: Vec<DataQualityError>,
}

/// Min-max normalise a series to [0, 1], leaving missing entries missing.
/// Non-finite entries count as missing. A constant series maps every present
/// value to 0.5; an all-missing series comes back all missing.
pub fn normalize_series(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let values: Vec<Option<f64>> = values
        .iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    let present: Vec<f64> = values.iter().copied().flatten().collect();
    if present.is_empty() {
        return values;
    }
    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return values.iter().map(|v| v.map(|_| 0.5)).collect();
    }
    values
        .iter()
        .map(|v| v.map(|x| (x - min) / (max - min)))
        .collect()
}

/// Score every patient and rank them within their speciality, most urgent
/// first.
///
/// The urgency score is a convex combination of normalised complexity,
/// normalised acuity and the mapped vitals trend, so it stays in [0, 1]
/// for maps whose values are in [0, 1]. Complexity and acuity are min-max
/// normalised within each speciality, or across the whole batch when
/// `within_speciality` is false. Missing and non-finite numeric values pick
/// up their speciality's median; records the median cannot resolve are
/// reported in [`ScoreOutcome::excluded`] rather than failing the batch.
/// Vitals labels the map does not know resolve to the median of the mapped
/// scores, and a batch with no mappable label at all scores vitals at the
/// neutral 0.5.
///
/// Ties are broken by batch order: among equal scores the earlier record
/// takes the better rank, so reordering the batch can change which of
/// several tied records ranks higher. The database loader feeds patients in
/// referral order, which makes ties favour the longest-waiting patient.
pub fn score_patients(
    batch: &PatientBatch,
    weights: &Weights,
    vitals_map: &VitalsMap,
    within_speciality: bool,
) -> Result<ScoreOutcome, ScoreError> {
    let missing = batch.missing_required_columns();
    if !missing.is_empty() {
        return Err(ScoreError::Schema { missing });
    }
    let weights = weights.normalised()?;

    let patients = &batch.patients;
    let groups = speciality_groups(patients);

    let raw_vitals: Vec<Option<f64>> = patients
        .iter()
        .map(|p| {
            p.vitals_trend
                .as_deref()
                .and_then(|label| vitals_map.lookup(label))
        })
        .collect();
    let mapped: Vec<f64> = raw_vitals.iter().copied().flatten().collect();
    let unmapped_fill = median(&mapped).unwrap_or(0.5);
    let vitals_scores: Vec<f64> = raw_vitals
        .iter()
        .map(|v| v.unwrap_or(unmapped_fill))
        .collect();

    let complexity: Vec<Option<f64>> = patients.iter().map(|p| p.complexity).collect();
    let acuity: Vec<Option<f64>> = patients.iter().map(|p| p.acuity).collect();

    let norm_complexity = fill_with_group_median(
        normalize_scoped(&complexity, &groups, within_speciality),
        &groups,
    );
    let norm_acuity = fill_with_group_median(
        normalize_scoped(&acuity, &groups, within_speciality),
        &groups,
    );

    let mut ranked: Vec<ScoredPatient> = Vec::with_capacity(patients.len());
    let mut excluded = Vec::new();
    for (idx, patient) in patients.iter().enumerate() {
        let (norm_c, norm_a) = match (norm_complexity[idx], norm_acuity[idx]) {
            (Some(c), Some(a)) => (c, a),
            (complexity_value, _) => {
                let criterion = if complexity_value.is_none() {
                    "complexity"
                } else {
                    "acuity"
                };
                excluded.push(DataQualityError {
                    nhs_number: patient.nhs_number.clone(),
                    full_name: patient.full_name.clone(),
                    speciality: patient.speciality.clone(),
                    criterion,
                });
                continue;
            }
        };

        let urgency_score = weights.complexity * norm_c
            + weights.acuity * norm_a
            + weights.vitals * vitals_scores[idx];
        ranked.push(ScoredPatient {
            record: patient.clone(),
            urgency_score,
            rank_in_speciality: 0,
            explanation: explanation(patient),
        });
    }

    // Stable sort per speciality keeps batch order on equal scores.
    let mut rank_groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, scored) in ranked.iter().enumerate() {
        rank_groups
            .entry(scored.record.speciality.clone())
            .or_default()
            .push(idx);
    }
    for indices in rank_groups.values_mut() {
        indices.sort_by(|&a, &b| {
            ranked[b]
                .urgency_score
                .partial_cmp(&ranked[a].urgency_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (position, &idx) in indices.iter().enumerate() {
            ranked[idx].rank_in_speciality = position as u32 + 1;
        }
    }

    Ok(ScoreOutcome { ranked, excluded })
}

/// Flatten a scored set into display order: speciality A to Z, then rank
/// ascending inside each. Pure sort; already-ordered input comes back
/// unchanged.
pub fn order_all(scored: &[ScoredPatient]) -> Vec<ScoredPatient> {
    let mut ordered = scored.to_vec();
    ordered.sort_by(|a, b| {
        a.record
            .speciality
            .cmp(&b.record.speciality)
            .then(a.rank_in_speciality.cmp(&b.rank_in_speciality))
    });
    ordered
}

fn speciality_groups(patients: &[PatientRecord]) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, patient) in patients.iter().enumerate() {
        groups
            .entry(patient.speciality.clone())
            .or_default()
            .push(idx);
    }
    groups
}

fn normalize_scoped(
    values: &[Option<f64>],
    groups: &BTreeMap<String, Vec<usize>>,
    within_speciality: bool,
) -> Vec<Option<f64>> {
    if !within_speciality {
        return normalize_series(values);
    }
    let mut out = vec![None; values.len()];
    for indices in groups.values() {
        let series: Vec<Option<f64>> = indices.iter().map(|&i| values[i]).collect();
        let normed = normalize_series(&series);
        for (&i, value) in indices.iter().zip(normed) {
            out[i] = value;
        }
    }
    out
}

fn fill_with_group_median(
    mut values: Vec<Option<f64>>,
    groups: &BTreeMap<String, Vec<usize>>,
) -> Vec<Option<f64>> {
    for indices in groups.values() {
        let present: Vec<f64> = indices.iter().filter_map(|&i| values[i]).collect();
        if let Some(fill) = median(&present) {
            for &i in indices {
                if values[i].is_none() {
                    values[i] = Some(fill);
                }
            }
        }
    }
    values
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Audit string built from the raw inputs, never the normalised or imputed
/// values.
fn explanation(record: &PatientRecord) -> String {
    format!(
        "Acuity={}|Complexity={}|Vitals={}",
        format_raw(record.acuity),
        format_raw(record.complexity),
        record.vitals_trend.as_deref().unwrap_or("n/a"),
    )
}

fn format_raw(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "n/a".to_string(),
    }
}
