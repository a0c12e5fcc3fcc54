use std::collections::HashMap;
use std::path::Path;
use serde::Deserialize;
use tracing::info;

use super::{Dictionary, Gloss};
use crate::error::{JimakuError, Result};

/// jmdict-simplified JSON (https://github.com/scriptin/jmdict-simplified)
#[derive(Debug, Deserialize)]
struct JmdictFile {
    words: Vec<JmdictWord>,
}

#[derive(Debug, Deserialize)]
struct JmdictWord {
    #[serde(default)]
    kanji: Vec<JmdictForm>,
    #[serde(default)]
    kana: Vec<JmdictForm>,
    #[serde(default)]
    sense: Vec<JmdictSense>,
}

#[derive(Debug, Deserialize)]
struct JmdictForm {
    text: String,
    #[serde(default)]
    common: bool,
}

#[derive(Debug, Deserialize)]
struct JmdictSense {
    #[serde(default)]
    gloss: Vec<JmdictGloss>,
}

#[derive(Debug, Deserialize)]
struct JmdictGloss {
    #[serde(default = "default_lang")]
    lang: String,
    text: String,
}

fn default_lang() -> String {
    "eng".to_string()
}

impl JmdictWord {
    fn is_common(&self) -> bool {
        self.kanji.iter().chain(&self.kana).any(|f| f.common)
    }

    fn to_gloss(&self) -> Gloss {
        let reading = self.kana.first().map(|k| k.text.clone()).unwrap_or_default();
        let headword = self.kanji.first().map(|k| k.text.clone()).unwrap_or_else(|| reading.clone());
        let senses = self.sense
            .iter()
            .map(|sense| {
                sense.gloss
                    .iter()
                    .filter(|g| g.lang == "eng")
                    .map(|g| g.text.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|s| !s.is_empty())
            .collect();
        Gloss { headword, reading, senses }
    }
}

/// In-memory index over a jmdict-simplified export, keyed by every kanji and kana form
pub struct JmdictDictionary {
    index: HashMap<String, Vec<Gloss>>,
}

impl JmdictDictionary {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(JimakuError::FileNotFound(format!("Dictionary file not found: {}", path.display())));
        }
        info!("Loading dictionary: {}", path.display());

        let content = tokio::fs::read_to_string(path).await?;
        let dictionary = Self::from_json(&content)?;

        info!("Dictionary loaded with {} forms", dictionary.index.len());
        Ok(dictionary)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: JmdictFile = serde_json::from_str(content)
            .map_err(|e| JimakuError::Annotation(format!("Invalid jmdict-simplified JSON: {}", e)))?;

        let mut words = file.words;
        // Common words first so the first gloss is the likely one
        words.sort_by_key(|w| !w.is_common());

        let mut index: HashMap<String, Vec<Gloss>> = HashMap::new();
        for word in &words {
            let gloss = word.to_gloss();
            for form in word.kanji.iter().chain(&word.kana) {
                let entries = index.entry(form.text.clone()).or_default();
                if !entries.contains(&gloss) {
                    entries.push(gloss.clone());
                }
            }
        }
        Ok(Self { index })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Dictionary for JmdictDictionary {
    fn lookup(&self, form: &str) -> Result<Vec<Gloss>> {
        Ok(self.index.get(form).cloned().unwrap_or_default())
    }
}

/// Dictionary held in a plain map, used when no dictionary file is configured
#[derive(Debug, Default)]
pub struct MemoryDictionary {
    entries: HashMap<String, Vec<Gloss>>,
}

impl MemoryDictionary {
    pub fn insert(&mut self, form: impl Into<String>, gloss: Gloss) {
        self.entries.entry(form.into()).or_default().push(gloss);
    }
}

impl Dictionary for MemoryDictionary {
    fn lookup(&self, form: &str) -> Result<Vec<Gloss>> {
        Ok(self.entries.get(form).cloned().unwrap_or_default())
    }
}
