use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use medstock::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::batch,
    events::{self, EventSender},
    services::{stock_accessor::StockAccessor, StockServices},
};
use serde::Serialize;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    let outcome = match cli.command {
        Commands::Migrate => handle_migrate(&context).await,
        Commands::Stock(args) => handle_stock(&context, args, cli.json).await,
        Commands::BelowThreshold => handle_below_threshold(&context, cli.json).await,
        Commands::SweepExpired(args) => handle_sweep(&context, args, cli.json).await,
        Commands::Receive(args) => handle_receive(&context, args, cli.json).await,
        Commands::Reduce(args) => handle_reduce(&context, args, cli.json).await,
    };

    context.shutdown().await;
    outcome
}

#[derive(Parser)]
#[command(name = "medstock", about = "Pharmacy stock ledger administration", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Show the stock picture for one medicine
    Stock(StockArgs),
    /// List medicines under their alert threshold
    BelowThreshold,
    /// Report expired and expiring-soon batches and raise expiry alerts
    SweepExpired(SweepArgs),
    /// Record incoming stock
    Receive(ReceiveArgs),
    /// Remove stock, earliest expiration first unless a date is given
    Reduce(ReduceArgs),
}

#[derive(Args)]
struct StockArgs {
    #[arg(help = "Medicine id")]
    medicine_id: i64,
}

#[derive(Args)]
struct SweepArgs {
    #[arg(long, help = "Reference date (YYYY-MM-DD); defaults to today")]
    as_of: Option<NaiveDate>,
    #[arg(long, help = "Expiring-soon window in days; defaults to configuration")]
    window_days: Option<i64>,
}

#[derive(Args)]
struct ReceiveArgs {
    #[arg(long)]
    medicine: i64,
    #[arg(long)]
    location: i64,
    #[arg(long)]
    quantity: i64,
    #[arg(long, help = "Expiration date (YYYY-MM-DD)")]
    expires: NaiveDate,
}

#[derive(Args)]
struct ReduceArgs {
    #[arg(long)]
    medicine: i64,
    #[arg(long)]
    location: i64,
    #[arg(long)]
    quantity: i64,
    #[arg(long, help = "Only touch the batch with this expiration date")]
    expires: Option<NaiveDate>,
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    services: StockServices,
    event_loop: JoinHandle<()>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        let event_loop = tokio::spawn(events::process_events(event_rx));

        let services = StockServices::new(db.clone(), event_sender);

        Ok(Self {
            config,
            db,
            services,
            event_loop,
        })
    }

    /// Closes the event channel and waits until every queued event has been
    /// handled, so reorder and expiry events from this command are not lost.
    async fn shutdown(self) {
        let Self {
            services,
            event_loop,
            ..
        } = self;
        // The services hold the last senders.
        drop(services);
        if let Err(e) = event_loop.await {
            tracing::warn!(error = %e, "event loop ended abnormally");
        }
    }
}

async fn handle_migrate(context: &CliContext) -> Result<()> {
    db::run_migrations(&context.db)
        .await
        .context("migration failed")?;
    println!("Migrations applied");
    Ok(())
}

async fn handle_stock(context: &CliContext, args: StockArgs, json: bool) -> Result<()> {
    let snapshot = context
        .services
        .accessor
        .snapshot(args.medicine_id)
        .await
        .with_context(|| format!("failed to read stock for medicine {}", args.medicine_id))?;

    if json {
        return print_json(&snapshot);
    }

    let medicine = &snapshot.medicine;
    println!(
        "{} {} ({}) • total {} • threshold {}",
        medicine.name,
        medicine.dosage,
        medicine.barcode,
        snapshot.total_quantity,
        medicine.alert_threshold
    );
    match snapshot.earliest_expiration {
        Some(date) => println!("  earliest expiration: {}", date),
        None => println!("  earliest expiration: none"),
    }
    for location in &snapshot.locations {
        println!(
            "  - {} (#{}): {}",
            location.location_name, location.location_id, location.total_quantity
        );
    }
    if snapshot.needs_reorder {
        println!("  needs reorder");
    } else if snapshot.is_low_stock {
        println!("  low stock (manual reorder)");
    }
    Ok(())
}

async fn handle_below_threshold(context: &CliContext, json: bool) -> Result<()> {
    let medicines = context
        .services
        .accessor
        .below_alert_threshold()
        .await
        .context("failed to compute below-threshold report")?;

    if json {
        return print_json(&medicines);
    }

    if medicines.is_empty() {
        println!("No medicines below their alert threshold");
    }
    for m in &medicines {
        println!(
            "- #{} {} • total {} / threshold {} • short {}{}",
            m.medicine_id,
            m.name,
            m.total_quantity,
            m.alert_threshold,
            m.shortfall(),
            if m.automatic_reorder { " • auto" } else { "" }
        );
    }
    Ok(())
}

async fn handle_sweep(context: &CliContext, args: SweepArgs, json: bool) -> Result<()> {
    let as_of = args.as_of.unwrap_or_else(StockAccessor::today);
    let window = args
        .window_days
        .unwrap_or(context.config.expiring_soon_window_days);
    let report = context
        .services
        .expiry
        .run(as_of, window)
        .await
        .context("expiry sweep failed")?;

    if json {
        return print_json(&report);
    }

    println!(
        "Expiry sweep as of {} ({}-day window): {} expired, {} expiring soon, {} alerts sent, {} failed",
        report.as_of,
        report.window_days,
        report.expired.len(),
        report.expiring_soon.len(),
        report.notified,
        report.failed
    );
    for b in &report.expired {
        render_batch("expired", b);
    }
    for b in &report.expiring_soon {
        render_batch("expiring", b);
    }
    Ok(())
}

async fn handle_receive(context: &CliContext, args: ReceiveArgs, json: bool) -> Result<()> {
    let saved = context
        .services
        .mutator
        .receive_batch(args.medicine, args.location, args.quantity, args.expires)
        .await
        .context("failed to receive stock")?;

    if json {
        return print_json(&saved);
    }
    render_batch("received", &saved);
    Ok(())
}

async fn handle_reduce(context: &CliContext, args: ReduceArgs, json: bool) -> Result<()> {
    let reduction = context
        .services
        .mutator
        .reduce_stock(args.medicine, args.location, args.quantity, args.expires)
        .await
        .context("failed to reduce stock")?;

    if json {
        return print_json(&reduction);
    }

    println!(
        "Removed {} of medicine {} at location {}; {} left in total",
        reduction.removed, reduction.medicine_id, reduction.location_id, reduction.total_quantity
    );
    for draw in &reduction.draws {
        println!(
            "  - batch {} ({}): took {}, {} left",
            draw.batch_id, draw.expiration_date, draw.taken, draw.remaining
        );
    }
    if let Some(signal) = &reduction.reorder {
        println!(
            "  reorder requested: {} units (short {})",
            signal.reorder_quantity, signal.shortfall
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_batch(label: &str, b: &batch::Model) {
    println!(
        "- [{}] batch {} • medicine {} • location {} • qty {} • expires {}",
        label, b.id, b.medicine_id, b.location_id, b.quantity, b.expiration_date
    );
}
