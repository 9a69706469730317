use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use mbk_core::UnitId;
use mbk_intake::{BookingService, IntakeConfig};
use mbk_storage::PgStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mbk-cli")]
#[command(about = "Machine unit booking command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the booking API.
    Serve,
    /// Apply database migrations.
    Migrate,
    /// Preview the pickup and return window for an event.
    Resolve {
        #[arg(long)]
        unit: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// List weekends and holidays in a date range.
    OffDays {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = IntakeConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => mbk_web::serve(config).await?,
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to run migrations")?;
            let store = PgStore::connect(url, config.timezone()?).await?;
            store.migrate().await?;
            info!("migrations applied");
        }
        Commands::Resolve { unit, start, end } => {
            let service = BookingService::from_config(&config).await?;
            let preview = service.preview(Some(&UnitId::new(unit)), Some(start), end).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Commands::OffDays { from, to } => {
            let service = BookingService::from_config(&config).await?;
            for day in service.off_days(from, to)? {
                match day.holiday_name {
                    Some(name) => println!("{} {} ({name})", day.date, day.reason),
                    None => println!("{} {}", day.date, day.reason),
                }
            }
        }
    }

    Ok(())
}
