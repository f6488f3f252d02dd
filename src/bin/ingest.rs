//! Ingest CLI - Command-line interface for Synheart Ingest
//!
//! Commands:
//! - import: Stream a health archive into the per-day store
//! - show: Print one stored day record
//! - doctor: Diagnose store and input configuration

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_ingest::config::ImportConfig;
use synheart_ingest::pipeline::ArchiveImporter;
use synheart_ingest::source::UploadedArchive;
use synheart_ingest::store::{DayStore, FileDayStore};
use synheart_ingest::types::{ImportEvent, ImportSummary};
use synheart_ingest::{ImportError, INGEST_VERSION, PRODUCER_NAME};

/// Ingest - Streaming importer for health data archives
#[derive(Parser)]
#[command(name = "ingest")]
#[command(author = "Synheart AI Inc")]
#[command(version = INGEST_VERSION)]
#[command(about = "Import health archives into per-day records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a health archive into the per-day store
    Import {
        /// Archive path (use - for stdin)
        path: PathBuf,

        /// Store directory (overrides the config file)
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Delete the archive once it has been read
        #[arg(long)]
        delete_source: bool,

        /// Records between progress events
        #[arg(long)]
        progress_interval: Option<u64>,

        /// Output the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the stored record for one date
    Show {
        /// Date key (YYYY-MM-DD)
        date: String,

        /// Store directory
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Diagnose store and input configuration
    Doctor {
        /// Store directory to check
        #[arg(short, long)]
        store: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), IngestCliError> {
    match cli.command {
        Commands::Import {
            path,
            store,
            config,
            delete_source,
            progress_interval,
            json,
        } => {
            let mut import_config = match (config, store) {
                (Some(config_path), store) => {
                    let mut loaded = ImportConfig::from_json_file(&config_path)?;
                    if let Some(store) = store {
                        loaded.store_dir = store;
                    }
                    loaded
                }
                (None, Some(store)) => ImportConfig::new(store),
                (None, None) => return Err(IngestCliError::MissingStore),
            };
            if let Some(interval) = progress_interval {
                import_config.progress_interval = interval;
            }
            import_config.delete_source |= delete_source;

            cmd_import(&path, &import_config, json)
        }

        Commands::Show { date, store } => cmd_show(&date, &store),

        Commands::Doctor { store, json } => cmd_doctor(&store, json),
    }
}

fn cmd_import(path: &Path, config: &ImportConfig, json: bool) -> Result<(), IngestCliError> {
    let importer = ArchiveImporter::from_config(config);

    let progress = if atty::is(atty::Stream::Stderr) && !json {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(bar)
    } else {
        None
    };

    let mut on_event = |event: &ImportEvent| {
        if let Some(bar) = &progress {
            match event {
                ImportEvent::Progress { processed } => bar.set_position(*processed),
                ImportEvent::Complete { records, .. } => {
                    bar.set_position(*records);
                    bar.finish_with_message("done");
                }
            }
        }
    };

    let result = if config.delete_source && path.to_string_lossy() != "-" {
        importer.import_upload(UploadedArchive::new(path), &mut on_event)
    } else {
        importer.import_path(path, &mut on_event)
    };

    if let Some(bar) = &progress {
        if !bar.is_finished() {
            bar.abandon();
        }
    }

    let summary = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, config);
    }
    Ok(())
}

fn print_summary(summary: &ImportSummary, config: &ImportConfig) {
    println!("Import Summary");
    println!("==============");
    println!("Job:                 {}", summary.job_id);
    println!("Store:               {}", config.store_dir.display());
    println!("Days:                {}", summary.days);
    println!("Records:             {}", summary.records);
    println!("New points:          {}", summary.points_stored);
    println!("Skipped records:     {}", summary.skipped_records);
    println!("Malformed fragments: {}", summary.malformed_fragments);
    println!("Clamped durations:   {}", summary.clamped_durations);
    println!("Clamped totals:      {}", summary.clamped_totals);
    println!(
        "Elapsed:             {:.1}s",
        (summary.finished_at - summary.started_at).num_milliseconds() as f64 / 1000.0
    );
}

fn cmd_show(date: &str, store: &Path) -> Result<(), IngestCliError> {
    let store = FileDayStore::new(store);
    match store.load(date)? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => Err(IngestCliError::NoRecord(date.to_string())),
    }
}

fn cmd_doctor(store: &Path, json: bool) -> Result<(), IngestCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "ingest_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Ingest version {}", INGEST_VERSION),
    });

    checks.push(check_store_writable(store));

    let day_store = FileDayStore::new(store);
    checks.push(match day_store.dates() {
        Ok(dates) => DoctorCheck {
            name: "day_records".to_string(),
            status: CheckStatus::Ok,
            message: match (dates.first(), dates.last()) {
                (Some(first), Some(last)) => {
                    format!("{} day record(s) from {} to {}", dates.len(), first, last)
                }
                _ => "No day records stored yet".to_string(),
            },
        },
        Err(e) => DoctorCheck {
            name: "day_records".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot list day records: {}", e),
        },
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass an archive path)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for 'ingest import -')".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: INGEST_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Ingest Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(IngestCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_store_writable(store: &Path) -> DoctorCheck {
    if !store.exists() {
        return DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist yet (created on first import)", store.display()),
        };
    }

    let probe = store.join(".ingest-doctor-probe");
    match fs::write(&probe, b"ok").and_then(|()| fs::remove_file(&probe)) {
        Ok(()) => DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} is writable", store.display()),
        },
        Err(e) => DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Error,
            message: format!("{} is not writable: {}", store.display(), e),
        },
    }
}

// Error types

#[derive(Debug)]
enum IngestCliError {
    Import(ImportError),
    Json(serde_json::Error),
    MissingStore,
    NoRecord(String),
    DoctorFailed,
}

impl From<ImportError> for IngestCliError {
    fn from(e: ImportError) -> Self {
        IngestCliError::Import(e)
    }
}

impl From<serde_json::Error> for IngestCliError {
    fn from(e: serde_json::Error) -> Self {
        IngestCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<IngestCliError> for CliError {
    fn from(e: IngestCliError) -> Self {
        match e {
            IngestCliError::Import(e) => {
                let hint = match &e {
                    ImportError::Source { .. } => "Check the archive path and that the file is readable",
                    ImportError::Store { .. } | ImportError::StoreIo { .. } => {
                        "Check free space and permissions of the store directory; re-running the import is safe"
                    }
                    ImportError::Json { .. } => "Remove or restore the corrupt day record and re-import",
                    ImportError::Config { .. } => "Fix the configuration file",
                    ImportError::Cancelled { .. } => "Re-run the import to finish the remaining days",
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            IngestCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            IngestCliError::MissingStore => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: "No store directory given".to_string(),
                hint: Some("Pass --store <dir> or a --config file with store_dir".to_string()),
            },
            IngestCliError::NoRecord(date) => CliError {
                code: "NO_RECORD".to_string(),
                message: format!("No day record stored for {}", date),
                hint: Some("Run 'ingest doctor' to list the stored date range".to_string()),
            },
            IngestCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
