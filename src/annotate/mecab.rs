use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{MorphAnalyzer, MorphToken};
use crate::error::{JimakuError, Result};

/// Runs the MeCab CLI with its default (UniDic or IPADIC) output format
pub struct MecabAnalyzer {
    binary_path: String,
    args: Vec<String>,
}

impl MecabAnalyzer {
    pub fn new(binary_path: String, args: Vec<String>) -> Self {
        Self { binary_path, args }
    }
}

#[async_trait]
impl MorphAnalyzer for MecabAnalyzer {
    async fn tokenize(&self, text: &str) -> Result<Vec<MorphToken>> {
        // MeCab treats every input line as a sentence
        let input = text.replace(&['\r', '\n'][..], " ");
        if input.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing mecab command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            JimakuError::Annotation(format!("Failed to start mecab '{}': {}", self.binary_path, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JimakuError::Annotation(format!("mecab failed: {}", stderr.trim())));
        }

        parse_mecab_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `surface\tfeature,feature,...` lines up to EOS
pub fn parse_mecab_output(output: &str) -> Result<Vec<MorphToken>> {
    let mut tokens = Vec::new();

    for line in output.lines() {
        if line == "EOS" || line.trim().is_empty() {
            continue;
        }
        let (surface, features) = line.split_once('\t').ok_or_else(|| {
            JimakuError::Annotation(format!("Unexpected mecab output line: '{}'", line))
        })?;
        let fields = split_features(features);
        tokens.push(token_from_fields(surface, &fields));
    }

    Ok(tokens)
}

fn field(fields: &[String], index: usize) -> String {
    match fields.get(index).map(String::as_str) {
        Some("*") | None => String::new(),
        Some(value) => value.to_string(),
    }
}

/// Map dictionary-specific feature layouts onto lemma and reading
fn token_from_fields(surface: &str, fields: &[String]) -> MorphToken {
    let (lemma, reading) = match fields.len() {
        // UniDic 3.x: kana 20 (iConType, fConType and type come before it)
        n if n >= 29 => unidic_forms(fields, 20),
        // UniDic 2.1.2 and unidic-lite: kana 17
        n if n >= 26 => unidic_forms(fields, 17),
        // Truncated UniDic rows: lForm 6, lemma 7
        n if n >= 10 => (field(fields, 7), field(fields, 6)),
        // IPADIC: base form 6, reading 7
        n if n >= 7 => (field(fields, 6), field(fields, 7)),
        _ => (String::new(), String::new()),
    };

    MorphToken {
        surface: surface.to_string(),
        lemma,
        reading,
        pos: field(fields, 0),
    }
}

/// UniDic lemma and reading; lForm 6 stands in when the kana column is empty
fn unidic_forms(fields: &[String], kana_index: usize) -> (String, String) {
    let kana = field(fields, kana_index);
    (field(fields, 7), if kana.is_empty() { field(fields, 6) } else { kana })
}

/// Split a CSV feature string, honoring double-quoted fields
fn split_features(features: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = features.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
