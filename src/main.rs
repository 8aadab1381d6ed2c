use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mentor_kiosk::config::{KioskConfig, LogFormat, LoggingConfig};
use mentor_kiosk::ledger::{CheckoutLedger, CheckoutRecord, CheckoutRequest, CsvLedgerStore, LedgerError};
use mentor_kiosk::reminder::MAX_PREVIEW_HOURS;

#[derive(Parser)]
#[command(
    name = "mentor-kiosk",
    about = "Reminder scheduler and exam checkout desk for a mentor kiosk",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $MENTOR_KIOSK_CONFIG, then ./mentor-kiosk.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the kiosk (reminder loop + checkout desk on stdin)
    Run,

    /// Inspect or edit the checkout ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Inspect the reminder schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum LedgerAction {
    /// List all records
    List {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show one record
    Show {
        id: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Register an id without checking anything out
    Register {
        id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,
    },

    /// Check an exam out
    Checkout {
        id: String,

        #[arg(long)]
        exam: String,

        /// Class number the exam belongs to
        #[arg(long = "class")]
        class_number: String,

        /// Required for unregistered ids
        #[arg(long)]
        name: Option<String>,

        /// Required for unregistered ids
        #[arg(long)]
        email: Option<String>,

        /// Checkout date (YYYY-MM-DD), default today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Check the current exam back in
    Checkin { id: String },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Preview reminders firing in the next N hours
    Preview {
        /// Hours to preview (1 to 8784)
        #[arg(
            long,
            default_value = "24",
            value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_PREVIEW_HOURS))
        )]
        hours: u32,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = KioskConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run => {
            tracing::info!(ledger = %config.ledger.path.display(), "Starting mentor kiosk");
            mentor_kiosk::run(config).await?;
        }
        Commands::Ledger { action } => {
            let ledger = CheckoutLedger::open(CsvLedgerStore::new(&config.ledger.path));
            ledger_command(&ledger, action)?;
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::Preview { hours } => {
                let engine = config.reminder_engine()?;
                let now = Local::now().naive_local();
                println!("Now: {}", engine.display_state(now));

                let preview = engine.preview(now, hours);
                if preview.is_empty() {
                    println!("No reminders in the next {} hours.", hours);
                } else {
                    println!("Upcoming reminders (next {} hours):", hours);
                    for (at, trigger) in preview {
                        match trigger.action_url() {
                            Some(url) => println!("{} : {} ({})", at.format("%Y-%m-%d %H:%M"), trigger.label(), url),
                            None => println!("{} : {}", at.format("%Y-%m-%d %H:%M"), trigger.label()),
                        }
                    }
                }
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
                print!("{}", rendered);
            }
        },
    }

    Ok(())
}

fn ledger_command(ledger: &CheckoutLedger, action: LedgerAction) -> Result<()> {
    match action {
        LedgerAction::List { json } => {
            let records = ledger.records()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records found.");
            } else {
                println!(
                    "{:<12} | {:<20} | {:<24} | {:<12} | {:<10} | Since",
                    "Id", "Name", "Email", "Exam", "Class"
                );
                println!("{:-<12}-|-{:-<20}-|-{:-<24}-|-{:-<12}-|-{:-<10}-|-{:-<10}", "", "", "", "", "", "");
                for r in &records {
                    println!(
                        "{:<12} | {:<20} | {:<24} | {:<12} | {:<10} | {}",
                        r.id,
                        r.name,
                        r.email,
                        r.exam_checked_out.as_deref().unwrap_or("-"),
                        r.class_number.as_deref().unwrap_or("-"),
                        r.date_checked_out.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
        LedgerAction::Show { id, json } => {
            let record = ledger.lookup(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record);
            }
        }
        LedgerAction::Register { id, name, email } => {
            let record = ledger.register(&id, &name, &email)?;
            println!("Registered {} ({}).", record.id, record.name);
        }
        LedgerAction::Checkout {
            id,
            exam,
            class_number,
            name,
            email,
            date,
        } => {
            let known = match ledger.lookup(&id) {
                Ok(record) => Some(record),
                Err(LedgerError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let (name, email) = match (name, email, known) {
                (Some(n), Some(e), _) => (n, e),
                (n, e, Some(record)) => (n.unwrap_or(record.name), e.unwrap_or(record.email)),
                (_, _, None) => anyhow::bail!("{id} is not registered: --name and --email are required"),
            };

            let record = ledger.check_out(CheckoutRequest {
                id,
                name,
                email,
                exam,
                class_number,
                date: date.unwrap_or_else(|| Local::now().date_naive()),
            })?;
            println!(
                "{} checked out {}.",
                record.id,
                record.exam_checked_out.as_deref().unwrap_or_default()
            );
        }
        LedgerAction::Checkin { id } => {
            let record = ledger.check_in(&id)?;
            println!("{} checked in.", record.id);
        }
    }
    Ok(())
}

fn print_record(record: &CheckoutRecord) {
    println!("Id:     {}", record.id);
    println!("Name:   {}", record.name);
    println!("Email:  {}", record.email);
    println!("State:  {}", record.state());
    if let (Some(exam), Some(class), Some(date)) = (
        &record.exam_checked_out,
        &record.class_number,
        record.date_checked_out,
    ) {
        println!("Exam:   {} (class {})", exam, class);
        println!("Since:  {}", date);
    }
}
