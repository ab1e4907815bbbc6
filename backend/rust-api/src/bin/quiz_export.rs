//! Exports stored quizzes as compact JSON, one file per quiz or a single batch.

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};

use quizsprint_api::{
    config::Config,
    models::QuizId,
    services::{quiz_import::sanitize_filename, AppState},
};

#[derive(Parser, Debug)]
#[command(name = "quiz-export")]
#[command(about = "Export quizzes to compact JSON")]
struct Args {
    /// Export only this quiz
    #[arg(long)]
    id: Option<String>,

    /// Write all quizzes into one batch file
    #[arg(long)]
    batch: bool,

    /// List stored quizzes and exit
    #[arg(long)]
    list: bool,

    /// Output directory (stdout when omitted)
    #[arg(long)]
    dir: Option<PathBuf>,
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
    let exporter = state.quiz_exporter();

    if args.list {
        for quiz in exporter.list().await? {
            println!(
                "{}  {} ({} question(s))",
                quiz.id(),
                quiz.title(),
                quiz.questions().len()
            );
        }
        return Ok(());
    }

    if args.batch {
        let batch = exporter.export_batch().await?;
        let count = batch.quizzes.len();
        write_json(args.dir.as_deref(), "quizzes-batch.json", &batch).await?;
        eprintln!("exported {} quiz(zes) as batch", count);
        return Ok(());
    }

    let quiz_id = args.id.as_deref().map(QuizId::parse).transpose()?;
    let quizzes = exporter.export(quiz_id).await?;
    for quiz in &quizzes {
        let name = format!("{}.json", sanitize_filename(&quiz.t));
        write_json(args.dir.as_deref(), &name, quiz).await?;
    }
    eprintln!("exported {} quiz(zes)", quizzes.len());
    Ok(())
}

async fn write_json<T: Serialize>(dir: Option<&Path>, name: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize quiz")?;
    match dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let path = dir.join(name);
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
