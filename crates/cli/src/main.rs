use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use stockbook_app::books::models::{AdjustmentForm, BookId};
use stockbook_app::Application;
use stockbook_kernel::settings::Settings;

/// Operator tooling for the stockbook inventory database.
#[derive(Debug, Parser)]
#[command(name = "stockbook-cli", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations and exit
    Migrate,
    /// List all books
    Books,
    /// Show one book with its inventory log
    Show { id: i64 },
    /// List every inventory log entry, newest first
    Logs,
    /// Show the stock level of every book
    Levels,
    /// Record a stock change for a book
    Adjust {
        id: i64,
        /// Signed quantity, e.g. -3 or 5
        #[arg(allow_hyphen_values = true)]
        quantity: String,
        description: String,
        /// RFC 3339 timestamp; defaults to now in the configured time zone
        #[arg(long)]
        at: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load().with_context(|| "failed to load stockbook settings")?;
    stockbook_telemetry::init(&settings.telemetry)?;

    let app = Application::bootstrap(settings).await?;
    let result = run(&app, cli.command).await;
    app.shutdown().await?;
    result
}

async fn run(app: &Application, command: Command) -> anyhow::Result<()> {
    let books = app.books()?;

    match command {
        Command::Migrate => {
            tracing::info!("migrations complete");
            Ok(())
        }
        Command::Books => print_json(&books.queries.list_books().await?),
        Command::Show { id } => print_json(&books.queries.get_book(BookId(id)).await?),
        Command::Logs => print_json(&books.queries.list_all_logs().await?),
        Command::Levels => print_json(&books.queries.stock_levels().await?),
        Command::Adjust {
            id,
            quantity,
            description,
            at,
        } => {
            let form = AdjustmentForm {
                quantity,
                description,
                timestamp: at,
            };
            let (book, log) = books.service.adjust_inventory(BookId(id), &form).await?;
            print_json(&serde_json::json!({ "book": book, "log": log }))
        }
    }
}
