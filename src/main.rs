use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use branch_directory::{
    export_snapshot, import_file, init_tracing, BranchRepository, DatasetFormat, ExportFormat,
    SqliteStore,
};

#[derive(Parser)]
#[command(name = "branch-directory")]
#[command(about = "Branch directory - bulk spreadsheet import/export over the branch database")]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "./branches.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create one branch per row of a spreadsheet (xlsx, xls, ods or csv)
    Import {
        /// Path to the spreadsheet; only the first sheet is read
        file: PathBuf,
    },

    /// Write every branch to a spreadsheet
    Export {
        /// Output path; a .csv extension selects csv, anything else xlsx
        #[arg(default_value = "branches.xlsx")]
        output: PathBuf,
    },

    /// Print all branches
    List,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("Failed to open database {:?}", cli.db))?;

    match cli.command {
        Commands::Import { file } => run_import(&store, &file),
        Commands::Export { output } => run_export(&store, &output),
        Commands::List => run_list(&store),
    }
}

fn run_import(store: &SqliteStore, file: &Path) -> Result<()> {
    println!("📥 Import: spreadsheet → branches");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !file.exists() {
        bail!("File not found: {:?}", file);
    }

    let format = DatasetFormat::detect_path(file)?;
    println!("\n📂 Reading {:?} as {}...", file, format.extension());

    let before = store.count()?;
    let report = import_file(store, file, format)?;
    let after = store.count()?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Rows read:  {}", report.rows_read);
    println!("✓ Created:    {}", report.applied);
    for warning in &report.warnings {
        println!("⚠️  Row {}: {}", warning.row_number, warning.message);
    }
    for failure in &report.failed {
        println!("❌ Row {}: {}", failure.row_number, failure.reason);
    }
    println!("✓ Database contains {} branches (was {})", after, before);

    if !report.is_complete() {
        bail!("{} of {} rows failed", report.failed.len(), report.rows_read);
    }
    Ok(())
}

fn run_export(store: &SqliteStore, output: &Path) -> Result<()> {
    let format = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportFormat::Csv,
        _ => ExportFormat::Xlsx,
    };

    let artifact = export_snapshot(store, format)?;
    std::fs::write(output, &artifact.bytes)
        .with_context(|| format!("Failed to write {:?}", output))?;

    println!(
        "✓ Exported {} branches to {:?}",
        artifact.record_count, output
    );
    for field in &artifact.truncated {
        println!(
            "⚠️  Branch {}: {} cut from {} characters to fit an xlsx cell",
            field.id, field.column, field.original_chars
        );
    }
    Ok(())
}

fn run_list(store: &SqliteStore) -> Result<()> {
    let branches = store.list()?;

    println!("{:>6}  {:<24} {:<24} {:<20}", "ID", "NAME", "LOCATION", "MANAGER");
    for branch in &branches {
        println!(
            "{:>6}  {:<24} {:<24} {:<20}",
            branch.id,
            branch.name.as_deref().unwrap_or("-"),
            branch.location.as_deref().unwrap_or("-"),
            branch.manager.as_deref().unwrap_or("-"),
        );
    }
    println!("\n{} branches", branches.len());
    Ok(())
}
