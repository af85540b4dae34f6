use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

mod aggregate;
mod config;
mod db;
mod mailer;
mod models;
mod pipeline;
mod report;
mod telemetry;
mod workbook;

use config::{DepartmentMappings, MailConfig, StoreConfig, TelemetryConfig};
use db::{CsvSource, MongoSource, RecordSource};
use mailer::SmtpMailer;
use pipeline::{Collected, Delivery, RunOptions, RunOutcome};

#[derive(Parser)]
#[command(name = "latecomers-report")]
#[command(about = "Monthly repeat-latecomer reports, split by department and emailed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build last month's reports and email them
    Run {
        /// Treat this date as today (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Read records from a CSV export instead of MongoDB
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value_t = aggregate::DEFAULT_MIN_LATE_DAYS)]
        min_days: usize,
        /// Write the workbooks but send no email and delete nothing
        #[arg(long)]
        dry_run: bool,
        /// Delete the consolidated workbook once it has been sent
        #[arg(long)]
        remove_consolidated: bool,
    },
    /// Print last month's repeat latecomers without writing or sending anything
    Preview {
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value_t = aggregate::DEFAULT_MIN_LATE_DAYS)]
        min_days: usize,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
}

type DynSource = dyn RecordSource + Send + Sync;

enum RecordOrigin {
    Csv(PathBuf),
    Mongo(StoreConfig),
}

impl RecordOrigin {
    /// Store settings are only required when no CSV file is given.
    fn resolve(csv: Option<PathBuf>) -> anyhow::Result<Self> {
        match csv {
            Some(path) => Ok(Self::Csv(path)),
            None => Ok(Self::Mongo(StoreConfig::from_lookup(config::env_lookup)?)),
        }
    }

    async fn open(self) -> anyhow::Result<Box<DynSource>> {
        let source: Box<DynSource> = match self {
            Self::Csv(path) => Box::new(CsvSource::new(path)),
            Self::Mongo(store) => Box::new(
                MongoSource::connect(&store)
                    .await
                    .context("failed to connect to MongoDB")?,
            ),
        };
        Ok(source)
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    config::load_dotenv();
    telemetry::init(&TelemetryConfig::from_lookup(config::env_lookup))?;

    match cli.command {
        Commands::Run {
            as_of,
            out_dir,
            csv,
            min_days,
            dry_run,
            remove_consolidated,
        } => {
            let mappings = DepartmentMappings::from_lookup(config::env_lookup)?;
            let mail = if dry_run {
                None
            } else {
                Some(MailConfig::from_lookup(config::env_lookup)?)
            };
            let origin = RecordOrigin::resolve(csv)?;
            let mailer = mail.as_ref().map(SmtpMailer::new).transpose()?;

            let options = RunOptions {
                as_of: as_of.unwrap_or_else(today),
                out_dir,
                min_late_days: min_days,
                remove_consolidated,
            };
            let delivery = match (&mailer, &mail) {
                (Some(mailer), Some(mail)) => Some(Delivery {
                    mailer,
                    all_mail: mail.all_mail.as_str(),
                }),
                _ => None,
            };

            let source = origin.open().await?;
            let outcome = pipeline::run(&*source, &mappings, delivery, &options).await?;

            if let RunOutcome::Completed(summary) = &outcome {
                tracing::info!(
                    month = %summary.month,
                    fetched = summary.fetched,
                    rejected = summary.rejected,
                    in_window = summary.in_window,
                    students = summary.qualifying_students,
                    files = summary.files_written,
                    emails = summary.emails_sent,
                    deleted = summary.files_deleted,
                    "run summary"
                );
            }
            tracing::info!("{}", outcome.message());
        }
        Commands::Preview {
            as_of,
            csv,
            min_days,
            limit,
        } => {
            let mappings = DepartmentMappings::from_lookup(config::env_lookup)?;
            let source = RecordOrigin::resolve(csv)?.open().await?;

            match pipeline::collect(&*source, as_of.unwrap_or_else(today), min_days).await? {
                Collected::Halted(outcome) => println!("{}", outcome.message()),
                Collected::Students {
                    window, students, ..
                } => {
                    print!(
                        "{}",
                        report::build_preview(&window, &students, &mappings, limit)
                    );
                }
            }
        }
    }

    Ok(())
}
