use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use pos_core::finance::month_key;
use pos_core::EntryType;
use pos_engine::{Engine, EngineConfig, EngineError, ExportPayload};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pos")]
#[command(about = "Personal OS day-state engine", long_about = None)]
struct Cli {
    /// Database file; defaults to the user data dir.
    #[arg(long, global = true, env = "POS_DB_PATH", default_value = "")]
    db: String,
    /// Log at debug level unless RUST_LOG or POS_LOG_LEVEL say otherwise.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show today's dashboard
    Status,
    /// Finish the morning and start executing
    CompleteMorning,
    /// Move from execution to the evening review
    StartEvening,
    /// Archive the day into the vault and close it
    CloseDay,
    /// Today's todos
    Todo {
        #[command(subcommand)]
        action: TodoCommands,
    },
    /// Time blocks
    Block {
        #[command(subcommand)]
        action: BlockCommands,
    },
    /// Categories, transactions and monthly totals
    Finance {
        #[command(subcommand)]
        action: FinanceCommands,
    },
    /// Delayed purchases
    Gatekeeper {
        #[command(subcommand)]
        action: GatekeeperCommands,
    },
    /// Archived days
    Vault {
        #[command(subcommand)]
        action: VaultCommands,
    },
    /// Write every record to a JSON file
    Export { out: PathBuf },
    /// Upsert every record from a JSON export
    Import {
        file: PathBuf,
        #[arg(long)]
        yes: bool,
    },
    /// Delete the database for good
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum TodoCommands {
    List,
    Add { text: String },
    Done { index: usize },
    Remove { index: usize },
}

#[derive(Subcommand)]
enum BlockCommands {
    List {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Add {
        start: String,
        end: String,
        title: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Remove { id: i64 },
    Next,
}

#[derive(Subcommand)]
enum FinanceCommands {
    Categories,
    AddCategory { kind: Kind, name: String },
    Add {
        kind: Kind,
        category: i64,
        amount: f64,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Summary {
        #[arg(long)]
        month: Option<String>,
    },
    Breakdown {
        #[arg(long)]
        month: Option<String>,
    },
}

#[derive(Subcommand)]
enum GatekeeperCommands {
    List,
    Add {
        name: String,
        price: f64,
        category: i64,
    },
    Purchase { id: i64 },
}

#[derive(Subcommand)]
enum VaultCommands {
    List,
    Show { day: NaiveDate },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Income,
    Expense,
}

impl From<Kind> for EntryType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Income => EntryType::Income,
            Kind::Expense => EntryType::Expense,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = EngineConfig::from_env();
    config.db_path = Some(resolve_db_path(&cli.db, config.db_path.take())?);
    if let Some(parent) = config.db_path.as_deref().and_then(Path::parent) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut engine = Engine::open(config).context("Failed to open the store")?;

    match cli.command {
        Commands::Status => print_json(&engine.get_today_snapshot()?)?,
        Commands::CompleteMorning => {
            let moved = engine.complete_morning()?;
            report_transition("complete-morning", moved, &engine);
        }
        Commands::StartEvening => {
            let moved = engine.start_evening()?;
            report_transition("start-evening", moved, &engine);
        }
        Commands::CloseDay => {
            let moved = engine.close_day()?;
            report_transition("close-day", moved, &engine);
        }
        Commands::Todo { action } => match action {
            TodoCommands::List => {
                let journal = engine.today_journal()?;
                for (index, todo) in journal.morning.todos.iter().enumerate() {
                    let mark = if todo.done { "x" } else { " " };
                    println!("{index}. [{mark}] {}", todo.text);
                }
                let performance = journal.performance();
                println!("{}% ({}/{})", performance.pct, performance.done, performance.total);
            }
            TodoCommands::Add { text } => {
                let index = engine.add_todo(&text).map_err(explain)?;
                println!("Added todo {index}");
            }
            TodoCommands::Done { index } => {
                let done = engine.toggle_todo_done(index).map_err(explain)?;
                println!("Todo {index} {}", if done { "done" } else { "reopened" });
            }
            TodoCommands::Remove { index } => {
                engine.remove_todo(index).map_err(explain)?;
                println!("Removed todo {index}");
            }
        },
        Commands::Block { action } => match action {
            BlockCommands::List { date } => {
                let date = date.unwrap_or_else(|| engine.get_settings().current_day_key);
                for block in engine.list_blocks(date)? {
                    println!(
                        "{} {}-{} {}",
                        block.id.unwrap_or_default(),
                        block.start,
                        block.end,
                        block.title
                    );
                }
            }
            BlockCommands::Add {
                start,
                end,
                title,
                date,
            } => {
                let date = date.unwrap_or_else(|| engine.get_settings().current_day_key);
                let block = engine.add_block(date, &start, &end, &title).map_err(explain)?;
                print_json(&block)?;
            }
            BlockCommands::Remove { id } => {
                if !engine.delete_block(id).map_err(explain)? {
                    println!("No block {id}");
                }
            }
            BlockCommands::Next => match engine.get_next_block()? {
                Some(block) => println!("{}-{} {}", block.start, block.end, block.title),
                None => println!("Nothing left today"),
            },
        },
        Commands::Finance { action } => match action {
            FinanceCommands::Categories => print_json(&engine.list_categories(None)?)?,
            FinanceCommands::AddCategory { kind, name } => {
                print_json(&engine.add_category(kind.into(), &name).map_err(explain)?)?
            }
            FinanceCommands::Add {
                kind,
                category,
                amount,
                note,
                date,
            } => {
                let date = date.unwrap_or_else(|| engine.get_settings().current_day_key);
                let tx = engine
                    .add_transaction(date, kind.into(), category, amount, &note)
                    .map_err(explain)?;
                print_json(&tx)?;
            }
            FinanceCommands::Summary { month } => {
                let month = resolve_month(&engine, month);
                print_json(&engine.get_monthly_summary(&month).map_err(explain)?)?;
            }
            FinanceCommands::Breakdown { month } => {
                let month = resolve_month(&engine, month);
                print_json(&engine.category_breakdown(&month).map_err(explain)?)?;
            }
        },
        Commands::Gatekeeper { action } => match action {
            GatekeeperCommands::List => print_json(&engine.list_gatekeeper_items()?)?,
            GatekeeperCommands::Add {
                name,
                price,
                category,
            } => {
                let item = engine
                    .add_gatekeeper_item(&name, price, category)
                    .map_err(explain)?;
                print_json(&item)?;
            }
            GatekeeperCommands::Purchase { id } => {
                print_json(&engine.purchase_gatekeeper_item(id).map_err(explain)?)?
            }
        },
        Commands::Vault { action } => match action {
            VaultCommands::List => {
                for snapshot in engine.list_vault()? {
                    println!(
                        "{} {}% ({}/{})",
                        snapshot.day_key,
                        snapshot.performance.pct,
                        snapshot.todos_done,
                        snapshot.todos_total
                    );
                }
            }
            VaultCommands::Show { day } => match engine.get_vault_snapshot(day)? {
                Some(snapshot) => print_json(&snapshot)?,
                None => println!("No snapshot for {day}"),
            },
        },
        Commands::Export { out } => {
            let payload = engine.export_all()?;
            fs::write(&out, payload.to_json_pretty()?)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Exported {} records to {}", payload.record_count(), out.display());
        }
        Commands::Import { file, yes } => {
            if !yes {
                bail!("import overwrites matching records; rerun with --yes");
            }
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let payload = ExportPayload::from_json(&raw)?;
            print_json(&engine.import_all(&payload)?)?;
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes every record; rerun with --yes");
            }
            let db = engine.config().db_path.clone();
            engine.reset_db()?;
            if let Some(db) = db {
                println!("Removed {}", db.display());
            }
        }
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let level = if let Ok(level) = std::env::var("POS_LOG_LEVEL") {
        level
    } else if debug {
        "debug".to_string()
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn resolve_db_path(db_flag: &str, from_env: Option<PathBuf>) -> Result<PathBuf> {
    if !db_flag.trim().is_empty() {
        return Ok(PathBuf::from(db_flag.trim()));
    }
    if let Some(path) = from_env {
        return Ok(path);
    }
    let data_dir = dirs::data_dir().context("No user data directory; pass --db")?;
    Ok(data_dir.join("personal-os").join("personal-os.db"))
}

fn resolve_month(engine: &Engine, month: Option<String>) -> String {
    match month {
        Some(month) if !month.trim().is_empty() => month,
        _ => month_key(engine.get_settings().current_day_key),
    }
}

fn report_transition(name: &str, moved: bool, engine: &Engine) {
    if moved {
        info!(event = "cli_transition", transition = name, status = %engine.get_day_status());
        println!("Day is now {}", engine.get_day_status());
    } else {
        println!("{name} not allowed while the day is {}", engine.get_day_status());
    }
}

fn explain(err: EngineError) -> anyhow::Error {
    let reason = err.reason();
    anyhow::Error::new(err).context(format!("rejected ({reason})"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
