//! Jimaku - Japanese audio to subtitle pipeline
//!
//! Cuts audio into overlapping chunks, transcribes them with whisper.cpp,
//! assembles timed subtitle cues, annotates them with MeCab and JMdict,
//! and optionally translates them through an LLM (Ollama or an
//! OpenAI-compatible API).

pub mod annotate;
pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod quality;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod workflow;
