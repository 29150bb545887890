use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ScoreError;
use crate::models::{missing_required_columns, PatientBatch, PatientRecord};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let patients: Vec<(
        &str,
        &str,
        &str,
        &str,
        Option<f64>,
        Option<f64>,
        Option<&str>,
        NaiveDate,
    )> = vec![
        (
            "7d3f2b9a-5c41-4e8b-9f26-8c1d54a7e930",
            "9434765919",
            "Margaret Okafor",
            "Cardiology",
            Some(14.0),
            Some(4.0),
            Some("Deteriorating"),
            NaiveDate::from_ymd_opt(2026, 6, 18).context("invalid date")?,
        ),
        (
            "1b8e6c02-93d4-4f1a-8273-5e9a0cfb6d14",
            "6219804370",
            "Tomasz Zielinski",
            "Cardiology",
            Some(9.5),
            Some(3.0),
            Some("Stable"),
            NaiveDate::from_ymd_opt(2026, 7, 2).context("invalid date")?,
        ),
        (
            "f42a7c88-30b5-4d96-b1e4-2a6f90c8d357",
            "4857773456",
            "Priya Nair",
            "Cardiology",
            None,
            Some(5.0),
            Some("Deteriorating"),
            NaiveDate::from_ymd_opt(2026, 7, 21).context("invalid date")?,
        ),
        (
            "9c15d7e3-6a2f-4b08-a94d-7e3c218f5b60",
            "7306118429",
            "Owen Caldwell",
            "Cardiology",
            Some(4.0),
            Some(2.0),
            Some("Improving"),
            NaiveDate::from_ymd_opt(2026, 8, 5).context("invalid date")?,
        ),
        (
            "4e92a1fc-8d73-4c5a-bd08-1f6e3a92c475",
            "5502396847",
            "Fatima Hassan",
            "General Surgery",
            Some(11.0),
            Some(4.0),
            Some("Not recorded"),
            NaiveDate::from_ymd_opt(2026, 6, 30).context("invalid date")?,
        ),
        (
            "a671f309-2e8b-4d27-92c5-b04d8e7f1a36",
            "8141257903",
            "Derek Shaw",
            "General Surgery",
            Some(6.5),
            None,
            Some("Stable"),
            NaiveDate::from_ymd_opt(2026, 7, 14).context("invalid date")?,
        ),
        (
            "58d0c4b7-f19e-4a63-8b52-c7a90d3e6f18",
            "3698540217",
            "Lucy Pemberton",
            "General Surgery",
            Some(2.0),
            Some(1.0),
            Some("Improving"),
            NaiveDate::from_ymd_opt(2026, 8, 11).context("invalid date")?,
        ),
        (
            "e2397a6d-01c8-4fb5-a8e1-64d2f0b93c57",
            "2750631984",
            "Samuel Adeyemi",
            "Trauma & Orthopaedics",
            Some(16.5),
            Some(5.0),
            Some("Deteriorating"),
            NaiveDate::from_ymd_opt(2026, 7, 8).context("invalid date")?,
        ),
        // Identical criteria on the next two rows: the earlier referral
        // takes the better rank.
        (
            "c8b54f12-7a96-4038-9d6b-e3f18a25c049",
            "9082734561",
            "Harriet Voss",
            "Trauma & Orthopaedics",
            Some(8.0),
            Some(3.0),
            Some("Stable"),
            NaiveDate::from_ymd_opt(2026, 7, 27).context("invalid date")?,
        ),
        (
            "30a9e8d5-b6c2-4571-af93-528b1c6d0e74",
            "1663429078",
            "Callum McRae",
            "Trauma & Orthopaedics",
            Some(8.0),
            Some(3.0),
            Some("Stable"),
            NaiveDate::from_ymd_opt(2026, 8, 19).context("invalid date")?,
        ),
    ];

    for (id, nhs_number, full_name, speciality, complexity, acuity, vitals_trend, referred_at) in
        patients
    {
        sqlx::query(
            r#"
            INSERT INTO pathway_triage.patients
            (id, nhs_number, full_name, speciality, complexity, acuity, vitals_trend, referred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (nhs_number) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                speciality = EXCLUDED.speciality,
                complexity = EXCLUDED.complexity,
                acuity = EXCLUDED.acuity,
                vitals_trend = EXCLUDED.vitals_trend,
                referred_at = EXCLUDED.referred_at
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(nhs_number)
        .bind(full_name)
        .bind(speciality)
        .bind(complexity)
        .bind(acuity)
        .bind(vitals_trend)
        .bind(referred_at)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Fetches patients as a scoring batch, optionally restricted to one
/// speciality. Rows come back in referral order (then NHS number), so equal
/// urgency scores rank the longest-waiting patient first.
pub async fn fetch_patients(
    pool: &PgPool,
    speciality: Option<&str>,
) -> anyhow::Result<PatientBatch> {
    let mut query = String::from(
        "SELECT id, nhs_number, full_name, speciality, complexity, acuity, \
         vitals_trend, referred_at \
         FROM pathway_triage.patients",
    );

    if speciality.is_some() {
        query.push_str(" WHERE speciality = $1");
    }
    query.push_str(" ORDER BY referred_at, nhs_number");

    let mut rows = sqlx::query(&query);
    if let Some(value) = speciality {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut patients = Vec::new();

    for row in records {
        // DOUBLE PRECISION admits 'NaN'; non-finite stored values count as
        // missing.
        let complexity: Option<f64> = row.get("complexity");
        let acuity: Option<f64> = row.get("acuity");
        patients.push(PatientRecord {
            patient_id: row.get("id"),
            nhs_number: row.get("nhs_number"),
            full_name: row.get("full_name"),
            speciality: row.get("speciality"),
            complexity: complexity.filter(|v| v.is_finite()),
            acuity: acuity.filter(|v| v.is_finite()),
            vitals_trend: row.get("vitals_trend"),
            referred_at: row.get("referred_at"),
        });
    }

    Ok(PatientBatch::from_records(patients))
}

#[derive(Debug, serde::Deserialize)]
struct CsvPatientRow {
    nhs_number: String,
    full_name: String,
    speciality: String,
    complexity: Option<f64>,
    acuity: Option<f64>,
    vitals_trend: Option<String>,
    referred_at: NaiveDate,
}

/// Reads patient rows from CSV. Headers are whitespace-trimmed before the
/// required-column check, so ragged spreadsheet exports still import; blank
/// numeric and vitals fields become missing values, as do non-finite
/// numeric cells.
fn read_patient_rows<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<CsvPatientRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let missing = missing_required_columns(&headers);
    if !missing.is_empty() {
        return Err(ScoreError::Schema { missing }.into());
    }

    let mut rows = Vec::new();
    for result in rdr.deserialize::<CsvPatientRow>() {
        let mut row = result?;
        // "NaN" and "inf" cells parse as numbers; they count as missing.
        row.complexity = row.complexity.filter(|v| v.is_finite());
        row.acuity = row.acuity.filter(|v| v.is_finite());
        rows.push(row);
    }
    Ok(rows)
}

/// Upserts every CSV row on nhs_number and returns the number of rows
/// written; re-importing a file refreshes existing patients rather than
/// duplicating them.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("opening {}", csv_path.display()))?;
    let rows = read_patient_rows(file)?;

    let mut imported = 0usize;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO pathway_triage.patients
            (id, nhs_number, full_name, speciality, complexity, acuity, vitals_trend, referred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (nhs_number) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                speciality = EXCLUDED.speciality,
                complexity = EXCLUDED.complexity,
                acuity = EXCLUDED.acuity,
                vitals_trend = EXCLUDED.vitals_trend,
                referred_at = EXCLUDED.referred_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.nhs_number)
        .bind(&row.full_name)
        .bind(&row.speciality)
        .bind(row.complexity)
        .bind(row.acuity)
        .bind(&row.vitals_trend)
        .bind(row.referred_at)
        .execute(pool)
        .await?;

        imported += 1;
    }

    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_headers_are_trimmed_before_the_column_check() {
        let data = "nhs_number, full_name , speciality ,complexity,acuity, vitals_trend ,referred_at\n\
                    9434765919,Margaret Okafor,Cardiology,14.0,4,Deteriorating,2026-06-18\n\
                    6219804370,Tomasz Zielinski,Cardiology,,3,,2026-07-02\n";

        let rows = read_patient_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].speciality, "Cardiology");
        assert_eq!(rows[0].acuity, Some(4.0));
        assert_eq!(rows[1].complexity, None);
        assert_eq!(rows[1].vitals_trend, None);
    }

    #[test]
    fn csv_non_finite_numerics_import_as_missing() {
        let data = "nhs_number,full_name,speciality,complexity,acuity,vitals_trend,referred_at\n\
                    9434765919,Margaret Okafor,Cardiology,NaN,4,Deteriorating,2026-06-18\n\
                    6219804370,Tomasz Zielinski,Cardiology,inf,-inf,Stable,2026-07-02\n";

        let rows = read_patient_rows(data.as_bytes()).unwrap();
        assert_eq!(rows[0].complexity, None);
        assert_eq!(rows[0].acuity, Some(4.0));
        assert_eq!(rows[1].complexity, None);
        assert_eq!(rows[1].acuity, None);
    }

    #[test]
    fn csv_missing_required_column_is_rejected() {
        let data = "nhs_number,full_name,speciality,complexity,vitals_trend,referred_at\n\
                    9434765919,Margaret Okafor,Cardiology,14.0,Stable,2026-06-18\n";

        let err = read_patient_rows(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("acuity"));
    }
}
