//! Imports quiz JSON files (verbose, compact or batch) into the configured store.

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use quizsprint_api::{
    config::Config,
    services::{
        quiz_import::{json_files, ImportReport},
        AppState,
    },
};

#[derive(Parser, Debug)]
#[command(name = "quiz-import")]
#[command(about = "Import quizzes from JSON files")]
#[command(group(ArgGroup::new("source").required(true).args(["file", "dir"])))]
struct Args {
    /// A single quiz or batch file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Import every *.json file of this directory
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Validate and report without saving anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizsprint_api=warn".into()),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;
    let importer = state.quiz_importer();

    let files = match (&args.file, &args.dir) {
        (Some(file), _) => vec![file.clone()],
        (None, Some(dir)) => json_files(dir).await?,
        (None, None) => anyhow::bail!("either --file or --dir is required"),
    };
    if files.is_empty() {
        anyhow::bail!("no .json files found");
    }

    let (mut imported, mut skipped) = (0, 0);
    for file in &files {
        let report = importer
            .import_file(file, args.dry_run)
            .await
            .with_context(|| format!("{}", file.display()))?;
        print_report(file, &report);
        imported += report.imported.len();
        skipped += report.skipped.len();
    }

    let verb = if args.dry_run { "validated" } else { "imported" };
    println!(
        "{} {} quiz(zes) from {} file(s), {} skipped",
        verb,
        imported,
        files.len(),
        skipped
    );
    Ok(())
}

fn print_report(file: &std::path::Path, report: &ImportReport) {
    println!("{} ({} format)", file.display(), report.format);
    for quiz in &report.imported {
        println!(
            "  + {} [{}] {} question(s)",
            quiz.title, quiz.id, quiz.question_count
        );
    }
    for title in &report.skipped {
        println!("  = {} (already exists)", title);
    }
}
