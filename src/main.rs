//! Jimaku - Japanese audio to subtitle pipeline
//!
//! Entry point for the command line tool: transcribes audio or video with
//! whisper.cpp, annotates cues with readings and glosses, and optionally
//! translates them through an LLM.

use std::path::Path;
use anyhow::Result;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jimaku::annotate::AnnotatorFactory;
use jimaku::cli::{Args, Commands};
use jimaku::config::{Config, SecondaryLine};
use jimaku::media::SPEECH_BAND_FILTER;
use jimaku::pipeline::{CancelToken, RunReport};
use jimaku::workflow::Workflow;

const DEFAULT_CONFIG_FILE: &str = "jimaku.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    info!("Starting Jimaku - Japanese audio to subtitle pipeline");

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the current run");
            trigger.cancel();
        }
    });

    match args.command {
        Commands::Process { input, output_dir, translate, target_lang, correct, filter_audio } => {
            apply_translation_flags(&mut config, translate, target_lang);
            apply_cleanup_flags(&mut config, correct, filter_audio);
            let workflow = Workflow::new(config).await?;
            let report = workflow.process_file(&input, output_dir.as_deref(), &cancel).await?;
            print_summary(&input, &report);
        }
        Commands::Batch { input_dir, output_dir, translate, target_lang, correct, filter_audio } => {
            apply_translation_flags(&mut config, translate, target_lang);
            apply_cleanup_flags(&mut config, correct, filter_audio);
            let workflow = Workflow::new(config).await?;
            let summary = workflow.process_directory(&input_dir, output_dir.as_deref(), &cancel).await?;

            println!("Processed {} files, {} failed", summary.processed, summary.failed.len());
            for (path, error) in &summary.failed {
                println!("  {}: {}", path.display(), error);
            }
        }
        Commands::Transcribe { input, output } => {
            config.annotate.enabled = false;
            config.correct.enabled = false;
            config.translate.enabled = false;
            config.output.secondary_line = SecondaryLine::None;
            let workflow = Workflow::new(config).await?;
            let report = workflow.transcribe_file(&input, &output, &cancel).await?;
            print_summary(&input, &report);
        }
        Commands::Annotate { text } => {
            let annotator = AnnotatorFactory::create(&config.annotate).await?;
            let annotated = annotator.annotate(&text).await?;
            for failure in &annotated.lookup_failures {
                warn!("Lookup failed for '{}': {}", failure.surface, failure.error);
            }
            println!("{}", serde_json::to_string_pretty(&annotated.annotations)?);
        }
        Commands::Translate { input, output, target_lang } => {
            apply_translation_flags(&mut config, true, target_lang);
            config.annotate.enabled = false;
            let workflow = Workflow::new(config).await?;
            let report = workflow.translate_srt(&input, &output, &cancel).await?;
            print_summary(&input, &report);
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists, pass --force to overwrite", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

fn apply_translation_flags(config: &mut Config, translate: bool, target_lang: Option<String>) {
    if translate {
        config.translate.enabled = true;
    }
    if let Some(lang) = target_lang {
        config.translate.target_language = lang;
    }
}

fn apply_cleanup_flags(config: &mut Config, correct: bool, filter_audio: bool) {
    if correct {
        config.correct.enabled = true;
    }
    if filter_audio && config.audio.audio_filter.is_none() {
        config.audio.audio_filter = Some(SPEECH_BAND_FILTER.to_string());
    }
}

fn print_summary(input: &Path, report: &RunReport) {
    println!(
        "{}: {} cues, {} failed chunks, {} correction misses, {} annotation misses, {} translation misses",
        input.display(),
        report.document.len(),
        report.failed_chunks(),
        report.correction_misses(),
        report.annotation_misses(),
        report.translation_misses()
    );
    if report.filter.has_hallucinations() {
        println!("  removed {} repeated tokens in {} hallucination spans",
            report.filter.repeats, report.filter.hallucination_periods.len());
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".jimaku").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation; the guard must outlive every log call
    let file_appender = rolling::daily(&log_dir, "jimaku.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("jimaku.log").display());

    Ok(())
}
