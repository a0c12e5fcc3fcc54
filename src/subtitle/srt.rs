use std::path::Path;
use tokio::fs;
use tracing::info;

use super::{Cue, SubtitleDocument};
use crate::config::SecondaryLine;
use crate::error::{JimakuError, Result};
use crate::transcribe::Token;

/// Render the document as SRT, optionally with a second line per cue
pub fn to_srt(document: &SubtitleDocument, secondary: SecondaryLine) -> String {
    let mut srt_content = String::new();

    for (index, cue) in document.cues.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n",
            index + 1,
            format_srt_time(cue.start),
            format_srt_time(cue.end),
            cue.text.trim()
        ));
        if let Some(line) = secondary_text(cue, secondary) {
            srt_content.push_str(line.trim());
            srt_content.push('\n');
        }
        srt_content.push('\n');
    }

    srt_content
}

fn secondary_text(cue: &Cue, secondary: SecondaryLine) -> Option<String> {
    let line = match secondary {
        SecondaryLine::None => None,
        SecondaryLine::Translation => cue.translation.clone(),
        SecondaryLine::Reading => cue.reading(),
    }?;
    if line.trim().is_empty() { None } else { Some(line) }
}

/// Generate an SRT subtitle file from the document
pub async fn write_srt<P: AsRef<Path>>(
    document: &SubtitleDocument,
    output_path: P,
    secondary: SecondaryLine,
) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    fs::write(output_path, to_srt(document, secondary)).await?;

    info!("SRT file generated successfully ({} cues)", document.len());
    Ok(())
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse HH:MM:SS,mmm (a '.' separator is accepted too)
pub fn parse_srt_time(value: &str) -> Result<f64> {
    let invalid = || JimakuError::SubtitleParse(format!("Invalid SRT timestamp: '{}'", value));
    let value = value.trim();
    let (clock, millis) = value.split_once(&[',', '.'][..]).ok_or_else(invalid)?;

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let hours: u64 = parts[0].parse().map_err(|_| invalid())?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid())?;
    let secs: u64 = parts[2].parse().map_err(|_| invalid())?;
    // A fraction of 1-3 digits is decimal seconds: ",5" is 500 ms
    if millis.is_empty() || millis.len() > 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let millis: u64 = format!("{:0<3}", millis).parse().map_err(|_| invalid())?;
    if minutes >= 60 || secs >= 60 {
        return Err(invalid());
    }

    Ok((hours * 3600 + minutes * 60 + secs) as f64 + millis as f64 / 1000.0)
}

/// Parse SRT content into a document.
///
/// The first text line of each block becomes the cue text; a second line is
/// kept as the translation. Each cue holds a single token spanning the cue.
pub fn parse_srt(content: &str) -> Result<SubtitleDocument> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for (block_no, block) in content.split("\n\n").enumerate() {
        let lines: Vec<&str> = block.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.is_empty() {
            continue;
        }

        // The numeric index line is optional in the wild
        let timing_at = if lines[0].contains("-->") { 0 } else { 1 };
        let timing = lines.get(timing_at).ok_or_else(|| {
            JimakuError::SubtitleParse(format!("Block {} has no timing line", block_no + 1))
        })?;
        let (start, end) = timing.split_once("-->").ok_or_else(|| {
            JimakuError::SubtitleParse(format!("Block {} has a malformed timing line: '{}'", block_no + 1, timing))
        })?;
        let start = parse_srt_time(start)?;
        let end = parse_srt_time(end)?;

        let text_lines = &lines[timing_at + 1..];
        let Some(text) = text_lines.first() else {
            continue;
        };

        let mut cue = Cue::from_tokens(vec![Token::new(*text, start, end, 1.0)]);
        if text_lines.len() > 1 {
            cue.translation = Some(text_lines[1..].join(" "));
        }
        cues.push(cue);
    }

    Ok(SubtitleDocument::new(cues))
}

pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<SubtitleDocument> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(JimakuError::FileNotFound(path.display().to_string()));
    }
    let content = fs::read_to_string(path).await?;
    let document = parse_srt(&content)?;
    info!("Read {} cues from {}", document.len(), path.display());
    Ok(document)
}
