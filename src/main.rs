use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use bookwise::config::Config;
use bookwise::{db, import, routes};

#[derive(Parser)]
#[command(
    name = "bookwise",
    version,
    about = "Book and expense tracker with monthly reports and support tickets"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web server (default)
    Serve,

    /// Import books and authors from a CSV file with `title` and `author` columns
    ImportBooks {
        /// Path to the CSV file
        csv_path: PathBuf,
    },
}

fn import_books(config: &Config, csv_path: &Path) -> Result<()> {
    let file = File::open(csv_path)
        .with_context(|| format!("File not found: {}", csv_path.display()))?;
    std::fs::create_dir_all(&config.data_dir)?;
    let pool = db::init_db(&config.database_path())?;
    let mut conn = pool.get()?;
    let summary = import::import_books(&mut conn, file)?;
    println!(
        "Import completed: {} imported, {} skipped, {} new authors",
        summary.imported, summary.skipped, summary.authors_created
    );
    Ok(())
}

#[rocket::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!(database = %config.database_path().display(), "starting server");
            if let Err(e) = routes::build(config)?.launch().await {
                anyhow::bail!("server failed: {e}");
            }
            info!("server shut down");
        }
        Commands::ImportBooks { csv_path } => import_books(&config, &csv_path)?,
    }
    Ok(())
}
