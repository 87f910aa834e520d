//! Command-line interface for hospital-course.
//!
//! Provides commands for summarizing single records or whole directories,
//! inspecting segmentation, evaluating stored summaries, and checking the
//! configured backends.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use crate::adapters;
use crate::config::Config;
use crate::core::{
    load_records, parse_judgment, segment, EvalCase, Evaluator, FactSheet, Orchestrator, PatientRecord,
    RecordSet, SummaryStore,
};
use crate::domain::{EvalReport, JudgmentKind, UnitCounts, UnitFailure};

/// hospital-course - Iterative hospital course summarization and evaluation
#[derive(Parser, Debug)]
#[command(name = "hospital-course")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .hospital-course/config.yaml discovery)
    #[arg(short, long, global = true, env = "HOSPITAL_COURSE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize one patient record
    Summarize {
        /// Record file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Patient id for the stored summary (defaults to the file name)
        #[arg(short, long)]
        patient_id: Option<String>,

        /// Print the summary without storing it
        #[arg(long)]
        no_save: bool,
    },

    /// Summarize every *.txt record in a directory
    Batch {
        /// Directory of `<patient_id>.txt` records
        records_dir: PathBuf,
    },

    /// Show how a record splits into notes
    Segment {
        /// Record file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print the note bodies as well
        #[arg(short, long)]
        full: bool,
    },

    /// Evaluate stored summaries against a fact sheet
    Evaluate {
        /// YAML fact sheet
        #[arg(short, long)]
        facts: PathBuf,

        /// Model whose summaries to evaluate (defaults to the configured generator)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Repair and parse a raw judge output
    Repair {
        /// Verdict field to extract
        #[arg(short, long, value_enum, default_value = "quality")]
        kind: RepairKind,

        /// Raw output file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Check that the generator and judge backends are reachable
    Check,

    /// Show resolved configuration
    Config,
}

/// Judgment kind for CLI (maps to JudgmentKind)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RepairKind {
    /// `fact_mentioned` 0/1
    Fact,

    /// `score` 1-10
    Quality,
}

impl From<RepairKind> for JudgmentKind {
    fn from(kind: RepairKind) -> Self {
        match kind {
            RepairKind::Fact => JudgmentKind::FactPresence,
            RepairKind::Quality => JudgmentKind::Quality,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match self.command {
            Commands::Summarize {
                input,
                patient_id,
                no_save,
            } => summarize(&config, input, patient_id, no_save).await,
            Commands::Batch { records_dir } => batch(&config, &records_dir).await,
            Commands::Segment { input, full } => show_segments(&config, input, full),
            Commands::Evaluate { facts, model } => evaluate(&config, &facts, model).await,
            Commands::Repair { kind, input } => repair(kind, input),
            Commands::Check => check(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Read input from a file, or from stdin when it is piped
fn read_input(input_file: Option<&Path>) -> Result<String> {
    let input = if let Some(path) = input_file {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    };

    if input.trim().is_empty() {
        anyhow::bail!("Input is empty");
    }

    Ok(input)
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let generator = adapters::from_config(&config.generator)?;
    Ok(Orchestrator::new(
        generator,
        config.summary_prompts()?,
        config.record_format.clone(),
    ))
}

/// Summarize one record and print the final draft
async fn summarize(
    config: &Config,
    input: Option<PathBuf>,
    patient_id: Option<String>,
    no_save: bool,
) -> Result<()> {
    let record = match input {
        Some(ref path) => {
            let mut record = PatientRecord::from_file(path)?;
            if let Some(id) = patient_id {
                record.patient_id = id;
            }
            record
        }
        None => {
            let raw = read_input(None)?;
            let patient_id = match patient_id {
                Some(id) => id,
                None if no_save => "stdin".to_string(),
                None => anyhow::bail!("--patient-id is required when reading a record from stdin"),
            };
            PatientRecord { patient_id, raw }
        }
    };

    let orchestrator = build_orchestrator(config)?;
    let refinement = match orchestrator
        .refine_with_deadline(&record.raw, config.run_timeout())
        .await
    {
        Ok(refinement) => refinement,
        Err(e) => {
            eprintln!("\n[Patient {} failed: {}]", record.patient_id, e);
            std::process::exit(1);
        }
    };

    println!("{}", refinement.final_draft.trim());

    if !no_save {
        let store = SummaryStore::open(&config.output_dir).await?;
        let path = store
            .write_summary(&record.patient_id, &config.generator.model, &refinement)
            .await?;
        eprintln!("\n[Saved to {}]", path.display());
    }

    eprintln!(
        "[Run {} completed: {} notes, {} drafts, {:.1}s]",
        refinement.run_id,
        refinement.note_count,
        refinement.drafts.len(),
        refinement.elapsed.as_secs_f64()
    );

    Ok(())
}

/// Final state of one record in a batch run
#[derive(Debug)]
enum RecordStatus {
    Stored { notes: usize, seconds: f64 },
    Failed(UnitFailure),
}

/// Summarize a directory of records, one at a time
async fn batch(config: &Config, records_dir: &Path) -> Result<()> {
    let set = load_records(records_dir)?;
    if set.is_empty() {
        println!("No records found in {}", records_dir.display());
        return Ok(());
    }

    let orchestrator = build_orchestrator(config)?;
    let store = SummaryStore::open(&config.output_dir).await?;

    eprintln!("Summarizing {} records with {}", set.len(), orchestrator.generator_name());

    println!("{:<16} {:<10} {:<8} {:<8}", "PATIENT", "STATUS", "NOTES", "SECONDS");
    println!("{}", "-".repeat(46));

    let statuses = summarize_each(
        &orchestrator,
        &store,
        &config.generator.model,
        &set,
        config.run_timeout(),
    )
    .await;

    let mut counts = UnitCounts::default();
    for (_, status) in &statuses {
        match status {
            RecordStatus::Stored { .. } => counts.succeeded += 1,
            RecordStatus::Failed(failure) => counts.record_failure(failure),
        }
    }

    println!();
    print_counts("Records", &counts);
    println!("Output: {}", config.output_dir.display());

    if counts.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Refine and store each record as soon as it finishes, printing one row
/// per record. Unreadable files and failed writes count against their
/// own patient only.
async fn summarize_each(
    orchestrator: &Orchestrator,
    store: &SummaryStore,
    model: &str,
    set: &RecordSet,
    deadline: Duration,
) -> Vec<(String, RecordStatus)> {
    let mut statuses = Vec::with_capacity(set.len());

    for bad in &set.unreadable {
        println!("{:<16} {:<10} {}", bad.patient_id, "unreadable", bad.error);
        statuses.push((bad.patient_id.clone(), RecordStatus::Failed(UnitFailure::Io(bad.error.clone()))));
    }

    for record in &set.records {
        let item = orchestrator.refine_record(record, deadline).await;
        let status = match item.result {
            Ok(ref refinement) => match store.write_summary(&item.patient_id, model, refinement).await {
                Ok(_) => RecordStatus::Stored {
                    notes: refinement.note_count,
                    seconds: refinement.elapsed.as_secs_f64(),
                },
                Err(e) => {
                    let message = format!("{:#}", e);
                    error!(patient_id = %item.patient_id, error = %message, "Summary not stored");
                    RecordStatus::Failed(UnitFailure::Io(message))
                }
            },
            Err(ref e) => RecordStatus::Failed(UnitFailure::from(e)),
        };

        match &status {
            RecordStatus::Stored { notes, seconds } => {
                println!("{:<16} {:<10} {:<8} {:<8.1}", item.patient_id, "ok", notes, seconds)
            }
            RecordStatus::Failed(failure) => {
                println!("{:<16} {:<10} {}", item.patient_id, "failed", failure_message(failure))
            }
        }
        statuses.push((item.patient_id, status));
    }

    statuses
}

fn failure_message(failure: &UnitFailure) -> &str {
    match failure {
        UnitFailure::Segmentation(m)
        | UnitFailure::Generation(m)
        | UnitFailure::Unparsable(m)
        | UnitFailure::Cancelled(m)
        | UnitFailure::Io(m)
        | UnitFailure::Aborted(m) => m,
        UnitFailure::MissingSummary => "no stored summary",
    }
}

/// Print the segmented notes of a record
fn show_segments(config: &Config, input: Option<PathBuf>, full: bool) -> Result<()> {
    let raw = read_input(input.as_deref())?;
    let record = segment(&raw, &config.record_format)?;

    println!("Notes: {}", record.note_count());
    println!();
    for note in record.chronological() {
        println!(
            "{} [{}] {} bytes",
            note.label,
            note.timestamp.as_deref().unwrap_or("no date"),
            note.body.len()
        );
        if full {
            println!("{}", note.body);
            println!();
        }
    }

    Ok(())
}

/// Judge every patient in the fact sheet and write a report
async fn evaluate(config: &Config, facts_path: &Path, model: Option<String>) -> Result<()> {
    let sheet = FactSheet::from_file(facts_path)?;
    sheet.validate(config.evaluation.facts_per_patient)?;

    let model = model.unwrap_or_else(|| config.generator.model.clone());
    let store = SummaryStore::open(&config.output_dir).await?;

    let mut cases = Vec::with_capacity(sheet.len());
    for (patient_id, facts) in &sheet.patients {
        cases.push(EvalCase {
            patient_id: patient_id.clone(),
            summary: store.read_summary(patient_id, &model).await?,
            facts: facts.clone(),
        });
    }

    let judge = adapters::from_config(&config.judge)?;
    let evaluator = Evaluator::new(judge, config.evaluation.concurrency);
    let judge_name = evaluator.judge_name().to_string();

    eprintln!(
        "Evaluating {} summaries from {} with judge {}",
        cases.len(),
        model,
        judge_name
    );

    let evaluations = evaluator.evaluate_batch(cases).await;
    let report = EvalReport::new(model, judge_name, evaluations);
    let path = store.write_report(&report).await?;

    print_counts("Fact checks", &report.fact_counts);
    print_counts("Quality ratings", &report.quality_counts);
    if let Some(recall) = report.fact_recall() {
        println!("Fact recall:  {:.1}%", recall * 100.0);
    }
    if let Some(score) = report.mean_score() {
        println!("Mean score:   {:.2}", score);
    }
    let incomplete = report.incomplete_patients();
    if !incomplete.is_empty() {
        println!("Incomplete:   {}", incomplete.join(", "));
    }
    println!("Report: {}", path.display());

    Ok(())
}

/// Parse a raw judge output and print the result as JSON
fn repair(kind: RepairKind, input: Option<PathBuf>) -> Result<()> {
    let raw = read_input(input.as_deref())?;
    let judgment = parse_judgment(&raw, kind.into())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&judgment).context("Failed to serialize judgment")?
    );
    Ok(())
}

/// Health-check the configured backends
async fn check(config: &Config) -> Result<()> {
    let mut healthy = true;

    for (role, backend) in [("generator", &config.generator), ("judge", &config.judge)] {
        let generator = adapters::from_config(backend)?;
        match generator.health_check().await {
            Ok(()) => println!("{:<10} {:<30} ok", role, generator.name()),
            Err(e) => {
                healthy = false;
                println!("{:<10} {:<30} FAILED: {}", role, generator.name(), e);
            }
        }
    }

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn print_counts(label: &str, counts: &UnitCounts) {
    println!("{}: {}/{} succeeded", label, counts.succeeded, counts.total());
    let failures = [
        ("segmentation", counts.segmentation),
        ("generation", counts.generation),
        ("unparsable", counts.unparsable),
        ("missing summary", counts.missing),
        ("cancelled", counts.cancelled),
        ("io", counts.io),
        ("aborted", counts.aborted),
    ];
    for (kind, count) in failures.iter().filter(|(_, n)| *n > 0) {
        println!("  {:<16} {}", kind, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{GenerationError, Generator};
    use crate::core::{RecordFormat, UnreadableRecord};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixed;

    #[async_trait]
    impl Generator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok("Hospital course.".into())
        }
    }

    fn record(patient_id: &str) -> PatientRecord {
        let f = RecordFormat::default();
        PatientRecord {
            patient_id: patient_id.into(),
            raw: format!("{m}hp{m}last{s}mid", m = f.marker, s = f.next_note),
        }
    }

    #[tokio::test]
    async fn test_batch_stores_each_record_and_isolates_write_failures() {
        let temp = TempDir::new().unwrap();
        let store = SummaryStore::open(temp.path()).await.unwrap();
        // A plain file where patient 2's directory should go
        std::fs::write(store.patient_dir("2"), "in the way").unwrap();

        let set = RecordSet {
            records: vec![record("1"), record("2"), record("3")],
            unreadable: vec![UnreadableRecord {
                patient_id: "4".into(),
                path: temp.path().join("4.txt"),
                error: "Failed to read record".into(),
            }],
        };
        let orchestrator = Orchestrator::with_defaults(Arc::new(Fixed));

        let statuses = summarize_each(&orchestrator, &store, "gpt-4o", &set, Duration::from_secs(5)).await;

        assert_eq!(statuses.len(), 4);
        let status = |id: &str| &statuses.iter().find(|(p, _)| p == id).unwrap().1;
        assert!(matches!(status("1"), RecordStatus::Stored { notes: 3, .. }));
        assert!(matches!(status("2"), RecordStatus::Failed(UnitFailure::Io(_))));
        assert!(matches!(status("3"), RecordStatus::Stored { .. }));
        assert!(matches!(status("4"), RecordStatus::Failed(UnitFailure::Io(_))));

        assert!(store.read_summary("1", "gpt-4o").await.unwrap().is_some());
        assert_eq!(
            store.read_summary("3", "gpt-4o").await.unwrap().as_deref(),
            Some("Hospital course.")
        );
    }

    #[test]
    fn test_parse_summarize() {
        let cli = Cli::parse_from(["hospital-course", "summarize", "-i", "p15.txt", "--no-save"]);
        match cli.command {
            Commands::Summarize {
                input, no_save, patient_id,
            } => {
                assert_eq!(input, Some(PathBuf::from("p15.txt")));
                assert!(no_save);
                assert!(patient_id.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["hospital-course", "evaluate", "-f", "facts.yaml", "--config", "c.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        assert!(matches!(cli.command, Commands::Evaluate { model: None, .. }));
    }

    #[test]
    fn test_repair_kind_mapping() {
        assert_eq!(JudgmentKind::from(RepairKind::Fact), JudgmentKind::FactPresence);
        assert_eq!(JudgmentKind::from(RepairKind::Quality), JudgmentKind::Quality);
    }
}
