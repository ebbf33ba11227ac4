//! Text handlers: extractive summary and basic statistics/sentiment.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::capabilities::{Arguments, CapabilityError};
use crate::convert::NativeValue;

const POSITIVE_WORDS: [&str; 7] = ["good", "great", "excellent", "happy", "positive", "best", "love"];
const NEGATIVE_WORDS: [&str; 7] = ["bad", "awful", "terrible", "sad", "negative", "worst", "hate"];

/// Returned when the input holds no sentences.
pub const EMPTY_SUMMARY: &str = "No text to summarize.";

/// `text.summarize`: `text`, `summary_length` → `summary`.
pub fn summarize_handler(args: Arguments) -> Result<Vec<NativeValue>, CapabilityError> {
    let text = args.text("text")?;
    let length = match args.get("summary_length") {
        Some(_) => args.integer("summary_length")?,
        None => 3,
    };
    let length = usize::try_from(length.max(1)).unwrap_or(1);
    Ok(vec![NativeValue::String(summarize(text, length))])
}

/// `text.analyze`: `text`, `include_sentiment`, `include_statistics` → `analysis_results`.
pub fn analyze_handler(args: Arguments) -> Result<Vec<NativeValue>, CapabilityError> {
    let text = args.text("text")?;
    let flag = |name: &str| match args.get(name) {
        Some(_) => args.boolean(name),
        None => Ok(true),
    };
    let result = analyze(text, flag("include_sentiment")?, flag("include_statistics")?);
    Ok(vec![NativeValue::Json(result)])
}

/// Pick the `length` highest-scoring sentences, in their original order.
///
/// A sentence scores the summed document frequency of its words longer
/// than three characters. Ties keep the earlier sentence.
pub fn summarize(text: &str, length: usize) -> String {
    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }

    let mut frequency: HashMap<String, usize> = HashMap::new();
    for word in words(text) {
        if word.chars().count() > 3 {
            *frequency.entry(word).or_default() += 1;
        }
    }

    let mut ranked: Vec<(usize, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let score = words(sentence)
                .filter_map(|w| frequency.get(&w))
                .sum::<usize>();
            (i, score)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut chosen: Vec<usize> = ranked.into_iter().take(length).map(|(i, _)| i).collect();
    chosen.sort_unstable();

    let mut summary = chosen
        .into_iter()
        .map(|i| sentences[i])
        .collect::<Vec<_>>()
        .join(". ");
    if !summary.ends_with('.') {
        summary.push('.');
    }
    summary
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Character/word/line statistics and a keyword-count sentiment verdict.
pub fn analyze(text: &str, include_sentiment: bool, include_statistics: bool) -> Value {
    let mut result = serde_json::Map::new();

    if include_statistics {
        let words: Vec<&str> = text.split_whitespace().collect();
        let letters: usize = words.iter().map(|w| w.chars().count()).sum();
        result.insert(
            "statistics".into(),
            json!({
                "character_count": text.chars().count(),
                "word_count": words.len(),
                "line_count": text.lines().count(),
                "average_word_length": letters as f64 / words.len().max(1) as f64,
            }),
        );
    }

    if include_sentiment {
        let lower = text.to_lowercase();
        let count = |list: &[&str]| list.iter().map(|w| lower.matches(w).count()).sum::<usize>();
        let positive = count(&POSITIVE_WORDS);
        let negative = count(&NEGATIVE_WORDS);
        let assessment = match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => "positive",
            std::cmp::Ordering::Less => "negative",
            std::cmp::Ordering::Equal => "neutral",
        };
        result.insert(
            "sentiment".into(),
            json!({
                "assessment": assessment,
                "positive_word_count": positive,
                "negative_word_count": negative,
            }),
        );
    }

    Value::Object(result)
}
