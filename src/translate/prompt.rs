use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Expected JSON payload of a translation reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Instructions shared by every backend
pub fn system_instructions(source_language: &str, target_language: &str) -> String {
    let source_name = language_code_to_name(source_language);
    let target_name = language_code_to_name(target_language);
    format!(
        "You are a professional subtitle translator.\n\
         \n\
         CRITICAL: You must translate the {} subtitle line to {} ONLY. Do not translate to any other language.\n\
         The target language is: {} (language code: {})\n\
         \n\
         Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
         Do not include any explanations, alternatives, readings, or text in other languages.",
        source_name, target_name, target_name, target_language, target_name
    )
}

/// Instructions for proofreading a recognized line without leaving its language
pub fn correction_instructions(language: &str) -> String {
    let name = language_code_to_name(language);
    format!(
        "You are proofreading {} subtitles produced by speech recognition.\n\
         \n\
         Fix misrecognized words, wrong kanji and missing punctuation in the line.\n\
         Keep the line in {} and keep its meaning. If it is already correct, return it unchanged.\n\
         \n\
         Return ONLY the corrected line in JSON format as {{\"text\":\"corrected line here\"}}.\n\
         Do not include any explanations, translations or readings.",
        name, name
    )
}

/// Build the per-cue request body, with the preceding cues as reference only
pub fn build_user_prompt(text: &str, context: &[String]) -> String {
    line_prompt(text, context, "translate")
}

/// Correction counterpart of [`build_user_prompt`]
pub fn build_correction_user_prompt(text: &str, context: &[String]) -> String {
    line_prompt(text, context, "correct")
}

fn line_prompt(text: &str, context: &[String], verb: &str) -> String {
    let mut prompt = String::new();

    let context: Vec<&str> = context.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).collect();
    if !context.is_empty() {
        prompt.push_str(&format!("[Previous lines for reference - DO NOT {} this part]\n", verb));
        for line in context {
            prompt.push_str(line);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("[Line to {}]\n", verb));
    prompt.push_str(text.trim());
    prompt.push('\n');
    prompt
}

/// Single prompt for completion-style endpoints
pub fn build_translation_prompt(
    text: &str,
    context: &[String],
    source_language: &str,
    target_language: &str,
) -> String {
    format!(
        "{}\n\n{}",
        system_instructions(source_language, target_language),
        build_user_prompt(text, context)
    )
}

/// Single correction prompt for completion-style endpoints
pub fn build_correction_prompt(text: &str, context: &[String], language: &str) -> String {
    format!("{}\n\n{}", correction_instructions(language), build_correction_user_prompt(text, context))
}

/// Pull the translation out of a model reply.
///
/// JSON `{"text": ...}` is preferred; otherwise the first line that is not
/// chatter is used. An empty reply is a transient failure.
pub fn extract_translation(raw_response: &str) -> Result<String, BackendError> {
    let raw_response = raw_response.trim();
    if raw_response.is_empty() {
        return Err(BackendError::Transient("Empty translation received".to_string()));
    }

    if let Ok(result) = serde_json::from_str::<TranslationResult>(raw_response) {
        let text = result.text.trim();
        if text.is_empty() {
            return Err(BackendError::Transient("Empty translation received".to_string()));
        }
        return Ok(text.to_string());
    }

    Ok(clean_translation_response(raw_response))
}

/// Clean up a free-form reply to extract just the translation
pub fn clean_translation_response(response: &str) -> String {
    let lines: Vec<&str> = response.lines().collect();

    for &line in &lines {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("Here is")
            || trimmed.starts_with("Here are")
            || trimmed.starts_with("Option")
            || trimmed.starts_with("**Option")
            || trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
        {
            continue;
        }

        if trimmed.starts_with("**") && trimmed.ends_with("**") {
            continue;
        }

        let trimmed = trimmed.strip_prefix("Translation:").map(str::trim).unwrap_or(trimmed);
        if !trimmed.is_empty() {
            return trimmed.trim_matches('"').to_string();
        }
    }

    response.trim().to_string()
}

/// Previous cue texts handed to the translator with cue `index`
pub fn context_window(texts: &[String], index: usize, window: usize) -> Vec<String> {
    let end = index.min(texts.len());
    let start = end.saturating_sub(window);
    texts[start..end].to_vec()
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "ja" => "Japanese".to_string(),
        "en" => "English".to_string(),
        "ko" => "Korean".to_string(),
        "zh" => "Chinese".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "es" => "Spanish".to_string(),
        "ru" => "Russian".to_string(),
        "it" => "Italian".to_string(),
        "pt" => "Portuguese".to_string(),
        "pl" => "Polish".to_string(),
        "nl" => "Dutch".to_string(),
        "tr" => "Turkish".to_string(),
        "ar" => "Arabic".to_string(),
        "hi" => "Hindi".to_string(),
        "th" => "Thai".to_string(),
        "vi" => "Vietnamese".to_string(),
        "id" => "Indonesian".to_string(),
        "sv" => "Swedish".to_string(),
        "uk" => "Ukrainian".to_string(),
        _ => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_translation() {
        assert_eq!(extract_translation(r#"{"text": " Good morning "}"#).unwrap(), "Good morning");
    }

    #[test]
    fn test_extract_free_form_translation() {
        let reply = "Here is the translation:\n\nTranslation: \"It's sunny today\"\n- alt: Today is fine";
        assert_eq!(extract_translation(reply).unwrap(), "It's sunny today");
    }

    #[test]
    fn test_empty_reply_is_transient() {
        assert!(matches!(extract_translation("  "), Err(BackendError::Transient(_))));
        assert!(matches!(extract_translation(r#"{"text": ""}"#), Err(BackendError::Transient(_))));
    }

    #[test]
    fn test_context_window_is_trailing() {
        let texts: Vec<String> = ["一", "二", "三", "四"].iter().map(|s| s.to_string()).collect();
        assert_eq!(context_window(&texts, 3, 2), vec!["二", "三"]);
        assert_eq!(context_window(&texts, 1, 2), vec!["一"]);
        assert!(context_window(&texts, 0, 2).is_empty());
        assert!(context_window(&texts, 2, 0).is_empty());
    }

    #[test]
    fn test_prompt_marks_context_as_reference() {
        let prompt = build_translation_prompt("晴れです", &["今日は".to_string()], "ja", "en");
        assert!(prompt.contains("Japanese subtitle line to English ONLY"));
        assert!(prompt.contains("DO NOT translate this part]\n今日は\n"));
        assert!(prompt.ends_with("[Line to translate]\n晴れです\n"));

        let no_context = build_user_prompt("晴れです", &[]);
        assert!(!no_context.contains("reference"));
    }

    #[test]
    fn test_correction_prompt_stays_in_source_language() {
        let prompt = build_correction_prompt("今日はいい転機", &["おはよう".to_string()], "ja");
        assert!(prompt.contains("proofreading Japanese subtitles"));
        assert!(prompt.contains("Keep the line in Japanese"));
        assert!(prompt.contains("DO NOT correct this part]\nおはよう\n"));
        assert!(prompt.ends_with("[Line to correct]\n今日はいい転機\n"));
        assert!(!prompt.contains("translate this part"));
    }
}
