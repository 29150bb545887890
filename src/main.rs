use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod db;
mod error;
mod mcda;
mod models;
mod report;

use mcda::{ScoreOutcome, VitalsMap, Weights};
use models::PatientBatch;

#[derive(Parser)]
#[command(name = "pathway-triage")]
#[command(about = "MCDA urgency scoring for elective care waiting lists", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScoringArgs {
    /// Restrict scoring to a single speciality
    #[arg(long)]
    speciality: Option<String>,
    #[arg(long, default_value_t = 0.5)]
    complexity_weight: f64,
    #[arg(long, default_value_t = 0.3)]
    acuity_weight: f64,
    #[arg(long, default_value_t = 0.2)]
    vitals_weight: f64,
    /// JSON file mapping vitals trend labels to scores in [0, 1]
    #[arg(long)]
    vitals_map: Option<PathBuf>,
    /// Normalise criteria over the whole list instead of per speciality
    #[arg(long)]
    global_norm: bool,
}

impl ScoringArgs {
    fn weights(&self) -> Weights {
        Weights {
            complexity: self.complexity_weight,
            acuity: self.acuity_weight,
            vitals: self.vitals_weight,
        }
    }

    fn load_vitals_map(&self) -> anyhow::Result<VitalsMap> {
        match &self.vitals_map {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read vitals map {}", path.display()))?;
                VitalsMap::from_json_str(&raw)
                    .with_context(|| format!("failed to parse vitals map {}", path.display()))
            }
            None => Ok(VitalsMap::default()),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import referrals from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Score urgency across the waiting list
    Score {
        #[command(flatten)]
        scoring: ScoringArgs,
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
    /// Export the ranked list to a file
    Export {
        #[command(flatten)]
        scoring: ScoringArgs,
        #[arg(long, default_value = "ranked_patients.csv")]
        out: PathBuf,
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scoring: ScoringArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn fetch_and_score(
    pool: &sqlx::PgPool,
    scoring: &ScoringArgs,
) -> anyhow::Result<(PatientBatch, ScoreOutcome)> {
    let batch = db::fetch_patients(pool, scoring.speciality.as_deref()).await?;
    let weights = scoring.weights();
    let vitals_map = scoring.load_vitals_map()?;
    let outcome = mcda::score_patients(&batch, &weights, &vitals_map, !scoring.global_norm)?;

    for exclusion in outcome.excluded.iter() {
        tracing::warn!("{exclusion}");
    }

    Ok((batch, outcome))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let imported = db::import_csv(&pool, &csv).await?;
            println!("Imported {imported} referrals from {}.", csv.display());
        }
        Commands::Score { scoring, limit } => {
            let (_, outcome) = fetch_and_score(&pool, &scoring).await?;

            if outcome.ranked.is_empty() {
                if outcome.excluded.is_empty() {
                    println!("No patients found.");
                } else {
                    println!(
                        "No patients could be scored ({} excluded for data quality).",
                        outcome.excluded.len()
                    );
                }
                return Ok(());
            }

            println!("Top priorities by speciality:");
            let ordered = mcda::order_all(&outcome.ranked);
            let mut current: Option<&str> = None;
            for scored in ordered.iter() {
                if scored.rank_in_speciality > limit {
                    continue;
                }
                if current != Some(scored.record.speciality.as_str()) {
                    current = Some(scored.record.speciality.as_str());
                    println!("{}:", scored.record.speciality);
                }
                println!(
                    "- {}. {} (NHS {}) urgency {:.3} [{}]",
                    scored.rank_in_speciality,
                    scored.record.full_name,
                    scored.record.nhs_number,
                    scored.urgency_score,
                    scored.explanation
                );
            }

            if !outcome.excluded.is_empty() {
                println!("{} records excluded for data quality.", outcome.excluded.len());
            }
        }
        Commands::Export {
            scoring,
            out,
            format,
        } => {
            let (_, outcome) = fetch_and_score(&pool, &scoring).await?;
            let rows = report::export_rows(&outcome.ranked);
            let serialised = match format {
                ExportFormat::Csv => report::to_csv_string(&rows)?,
                ExportFormat::Json => report::to_json_string(&rows)?,
            };
            std::fs::write(&out, serialised)?;
            println!(
                "Exported {} ranked patients to {}.",
                rows.len(),
                out.display()
            );
        }
        Commands::Report { scoring, out } => {
            let (batch, outcome) = fetch_and_score(&pool, &scoring).await?;
            let report_text = report::build_report(
                scoring.speciality.as_deref(),
                &scoring.weights(),
                !scoring.global_norm,
                chrono::Utc::now().date_naive(),
                &batch,
                &outcome,
            );
            std::fs::write(&out, report_text)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
