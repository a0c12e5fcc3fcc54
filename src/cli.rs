use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe, annotate and optionally translate one audio or video file
    Process {
        /// Input audio or video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (defaults to the input's directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Translate cues with the configured LLM backend
        #[arg(long)]
        translate: bool,

        /// Target language code, overrides the config
        #[arg(short, long)]
        target_lang: Option<String>,

        /// Clean up recognized text with the configured LLM backend
        #[arg(long)]
        correct: bool,

        /// Run the audio through a speech-band ffmpeg filter before transcription
        #[arg(long)]
        filter_audio: bool,
    },

    /// Process every media file under a directory
    Batch {
        /// Input directory
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory; the input tree is mirrored under it
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Translate cues with the configured LLM backend
        #[arg(long)]
        translate: bool,

        /// Target language code, overrides the config
        #[arg(short, long)]
        target_lang: Option<String>,

        /// Clean up recognized text with the configured LLM backend
        #[arg(long)]
        correct: bool,

        /// Run the audio through a speech-band ffmpeg filter before transcription
        #[arg(long)]
        filter_audio: bool,
    },

    /// Transcribe to SRT without annotation or translation
    Transcribe {
        /// Input audio or video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output SRT file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Annotate a line of Japanese text and print the result as JSON
    Annotate {
        /// Text to annotate
        text: String,
    },

    /// Translate an existing SRT file
    Translate {
        /// Input SRT file
        #[arg(short, long)]
        input: PathBuf,

        /// Output SRT file
        #[arg(short, long)]
        output: PathBuf,

        /// Target language code, overrides the config
        #[arg(short, long)]
        target_lang: Option<String>,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination path
        #[arg(default_value = "jimaku.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
