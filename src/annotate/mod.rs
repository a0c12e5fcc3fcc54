// Japanese linguistic annotation
//
// - MorphAnalyzer: morphological tokenizer (MeCab today)
// - Dictionary: gloss lookup by normalized form (JMdict or in-memory)
// - Annotator: one Annotation per surface token, lookup misses recorded
//   rather than raised

pub mod dictionary;
pub mod kana;
pub mod mecab;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use dictionary::{JmdictDictionary, MemoryDictionary};
pub use mecab::MecabAnalyzer;
use crate::config::AnnotateConfig;
use crate::error::Result;

/// Token produced by the morphological analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphToken {
    pub surface: String,
    /// Dictionary form as reported by the analyzer, may be empty
    pub lemma: String,
    /// Katakana or hiragana reading, may be empty
    pub reading: String,
    pub pos: String,
}

/// One dictionary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gloss {
    pub headword: String,
    pub reading: String,
    pub senses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub surface: String,
    pub lemma: String,
    /// Hiragana
    pub reading: String,
    pub pos: String,
    pub glosses: Vec<Gloss>,
}

impl Annotation {
    pub fn new(
        surface: impl Into<String>,
        lemma: impl Into<String>,
        reading: impl Into<String>,
        pos: impl Into<String>,
        glosses: Vec<Gloss>,
    ) -> Self {
        Self {
            surface: surface.into(),
            lemma: lemma.into(),
            reading: reading.into(),
            pos: pos.into(),
            glosses,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MorphAnalyzer: Send + Sync {
    async fn tokenize(&self, text: &str) -> Result<Vec<MorphToken>>;
}

#[cfg_attr(test, mockall::automock)]
pub trait Dictionary: Send + Sync {
    /// Entries whose headword or reading equals `form` exactly
    fn lookup(&self, form: &str) -> Result<Vec<Gloss>>;
}

/// A dictionary lookup that failed for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupFailure {
    pub surface: String,
    pub form: String,
    pub error: String,
}

/// Result of annotating one cue text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotatedText {
    pub annotations: Vec<Annotation>,
    pub lookup_failures: Vec<LookupFailure>,
}

/// Bounded memo of lookup results, oldest entry evicted first
struct LookupCache {
    capacity: usize,
    entries: HashMap<String, Vec<Gloss>>,
    order: VecDeque<String>,
}

impl LookupCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, entries: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&self, form: &str) -> Option<Vec<Gloss>> {
        self.entries.get(form).cloned()
    }

    fn insert(&mut self, form: String, glosses: Vec<Gloss>) {
        if self.capacity == 0 || self.entries.contains_key(&form) {
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(form.clone());
        self.entries.insert(form, glosses);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct Annotator {
    analyzer: Arc<dyn MorphAnalyzer>,
    dictionary: Arc<dyn Dictionary>,
    cache: Mutex<LookupCache>,
}

impl Annotator {
    pub fn new(analyzer: Arc<dyn MorphAnalyzer>, dictionary: Arc<dyn Dictionary>, cache_capacity: usize) -> Self {
        Self { analyzer, dictionary, cache: Mutex::new(LookupCache::new(cache_capacity)) }
    }

    /// Annotate one cue text.
    ///
    /// Fails only when the analyzer fails; per-token lookup errors leave that
    /// token with an empty gloss list and are returned in `lookup_failures`.
    pub async fn annotate(&self, text: &str) -> Result<AnnotatedText> {
        let tokens = self.analyzer.tokenize(text).await?;
        let mut result = AnnotatedText::default();

        for token in tokens {
            // Unknown words come back without a reading; kana spells its own
            let reading = if token.reading.is_empty() && token.surface.chars().all(kana::is_kana) {
                kana::katakana_to_hiragana(&token.surface)
            } else {
                kana::katakana_to_hiragana(&token.reading)
            };
            let form = normalized_form(&token);

            let glosses = if is_punctuation(&token.pos) || form.is_empty() {
                Vec::new()
            } else {
                match self.resolve(&form) {
                    Ok(glosses) => glosses,
                    Err(e) => {
                        warn!("Dictionary lookup failed for '{}': {}", form, e);
                        result.lookup_failures.push(LookupFailure {
                            surface: token.surface.clone(),
                            form: form.clone(),
                            error: e.to_string(),
                        });
                        Vec::new()
                    }
                }
            };

            result.annotations.push(Annotation {
                surface: token.surface,
                lemma: form,
                reading,
                pos: token.pos,
                glosses,
            });
        }

        debug!(
            "Annotated '{}' with {} tokens ({} lookup failures)",
            text,
            result.annotations.len(),
            result.lookup_failures.len()
        );
        Ok(result)
    }

    /// Exact lookup, then the longest prefix that has an entry
    fn resolve(&self, form: &str) -> Result<Vec<Gloss>> {
        if let Some(hit) = self.cache_get(form) {
            return Ok(hit);
        }

        let mut glosses = self.dictionary.lookup(form)?;
        if glosses.is_empty() {
            let chars: Vec<char> = form.chars().collect();
            for len in (1..chars.len()).rev() {
                let prefix: String = chars[..len].iter().collect();
                let found = self.dictionary.lookup(&prefix)?;
                if !found.is_empty() {
                    debug!("'{}' matched by prefix '{}'", form, prefix);
                    glosses = found;
                    break;
                }
            }
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(form.to_string(), glosses.clone());
        }
        Ok(glosses)
    }

    fn cache_get(&self, form: &str) -> Option<Vec<Gloss>> {
        self.cache.lock().ok().and_then(|cache| cache.get(form))
    }

    pub fn cached_forms(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }
}

/// Lemma with any UniDic `-gloss` suffix removed, or the surface when there is no lemma
pub fn normalized_form(token: &MorphToken) -> String {
    let lemma = token.lemma.trim();
    let lemma = match lemma.split_once('-') {
        Some((head, _)) if !head.is_empty() => head,
        _ => lemma,
    };
    if lemma.is_empty() || lemma == "*" {
        token.surface.trim().to_string()
    } else {
        lemma.to_string()
    }
}

/// Punctuation, symbols and whitespace get no dictionary lookup
pub fn is_punctuation(pos: &str) -> bool {
    matches!(pos, "補助記号" | "記号" | "空白")
}

/// Factory for the annotator and its backends
pub struct AnnotatorFactory;

impl AnnotatorFactory {
    pub async fn create(config: &AnnotateConfig) -> Result<Annotator> {
        let analyzer: Arc<dyn MorphAnalyzer> =
            Arc::new(MecabAnalyzer::new(config.mecab_path.clone(), config.mecab_args.clone()));

        let dictionary: Arc<dyn Dictionary> = match &config.dictionary_path {
            Some(path) => Arc::new(JmdictDictionary::load(path).await?),
            None => {
                info!("No dictionary configured, annotations will carry no glosses");
                Arc::new(MemoryDictionary::default())
            }
        };

        Ok(Annotator::new(analyzer, dictionary, config.cache_capacity))
    }
}
