//! Extraction of card candidates from free-form LLM output.
//!
//! Models are asked for JSON but do not always comply, so parsing degrades in
//! steps: strict JSON, the outermost bracketed span, labelled lines
//! (`Question: ... / Answer: ... / Explanation: ...`), and finally a relaxed
//! regex over `"question": ..., "answer": ..., "explanation": ...` triples.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::card_engine::models::{AnswerValue, RawCardCandidate};
use crate::card_engine::source::SourceError;

/// Placeholder used when a labelled-line answer carries no explanation.
pub const FALLBACK_EXPLANATION: &str = "Estimate based on a typical value.";

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?\s*|\s*```$").expect("valid fence regex"));

static QUESTION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:pytanie|question)\s*[:\-]\s*(?P<value>.+?)\s*$")
        .expect("valid question regex")
});

static ANSWER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:odpowiedź|odpowiedz|answer)\s*[:\-]\s*(?P<value>[-+]?\d+(?:[ .,]\d+)*)\s*$")
        .expect("valid answer regex")
});

static EXPLANATION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:wyjaśnienie|wyjasnienie|explanation)\s*[:\-]\s*(?P<value>.+?)\s*$")
        .expect("valid explanation regex")
});

static RELAXED_TRIPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)"question"\s*:\s*"(?P<question>.*?)"\s*,\s*"answer"\s*:\s*(?P<answer>[-+]?\d+(?:[ .,]\d+)*)\s*,\s*"explanation"\s*:\s*"(?P<explanation>.*?)""#,
    )
    .expect("valid relaxed triple regex")
});

pub fn strip_code_fences(text: &str) -> String {
    FENCE_RE.replace_all(text.trim(), "").trim().to_string()
}

fn bracketed_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse an LLM reply into raw candidates. Validation of individual
/// candidates is left to the pool; this only fails when nothing card-shaped
/// can be recovered at all.
pub fn parse_cards_payload(text: &str) -> Result<Vec<RawCardCandidate>, SourceError> {
    let cleaned = strip_code_fences(text);

    if let Ok(root) = serde_json::from_str::<Value>(&cleaned) {
        return candidates_from_root(root);
    }

    let extracted = bracketed_span(&cleaned, '[', ']').or_else(|| bracketed_span(&cleaned, '{', '}'));
    match extracted {
        Some(span) => match serde_json::from_str::<Value>(span) {
            Ok(root) => candidates_from_root(root),
            Err(_) => parse_unstructured(span),
        },
        None => parse_unstructured(&cleaned),
    }
}

fn candidates_from_root(root: Value) -> Result<Vec<RawCardCandidate>, SourceError> {
    match root {
        Value::Object(ref map) => match map.get("cards") {
            Some(Value::Array(items)) => Ok(items.iter().map(RawCardCandidate::from_json).collect()),
            _ => Ok(vec![RawCardCandidate::from_json(&root)]),
        },
        Value::Array(items) => Ok(items.iter().map(RawCardCandidate::from_json).collect()),
        _ => Err(SourceError::Malformed("JSON root must be an object or an array".into())),
    }
}

fn parse_unstructured(text: &str) -> Result<Vec<RawCardCandidate>, SourceError> {
    if let Some(candidate) = parse_labelled_lines(text) {
        return Ok(vec![candidate]);
    }
    let relaxed = parse_relaxed_triples(text);
    if relaxed.is_empty() {
        Err(SourceError::Malformed("reply is not valid JSON".into()))
    } else {
        Ok(relaxed)
    }
}

fn parse_labelled_lines(text: &str) -> Option<RawCardCandidate> {
    let cleaned = strip_code_fences(text);
    let answer = ANSWER_LINE_RE.captures(&cleaned)?["value"].trim().to_string();

    let question = QUESTION_LINE_RE
        .captures(&cleaned)
        .map(|c| c["value"].trim().to_string())
        .filter(|q| !q.is_empty())
        .or_else(|| {
            let lines: Vec<&str> = cleaned.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            lines
                .iter()
                .find(|l| l.contains('?'))
                .or_else(|| lines.first())
                .map(|l| l.to_string())
        })?;

    let explanation = EXPLANATION_LINE_RE
        .captures(&cleaned)
        .map(|c| c["value"].trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| FALLBACK_EXPLANATION.to_string());

    Some(RawCardCandidate::new(question, AnswerValue::Text(answer), explanation))
}

fn parse_relaxed_triples(text: &str) -> Vec<RawCardCandidate> {
    let cleaned = strip_code_fences(text);
    RELAXED_TRIPLE_RE
        .captures_iter(&cleaned)
        .map(|c| {
            RawCardCandidate::new(
                c["question"].trim().replace('\n', " "),
                AnswerValue::Text(c["answer"].trim().to_string()),
                c["explanation"].trim().replace('\n', " "),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card_engine::models::{coerce_candidates, Card};

    fn single(text: &str) -> Card {
        let mut cands = parse_cards_payload(text).expect("parsable");
        assert_eq!(cands.len(), 1, "expected exactly one candidate in {text:?}");
        Card::try_from(cands.remove(0)).expect("valid card")
    }

    #[test]
    fn parses_plain_object() {
        let card = single(r#"{"question":"How many?","answer":12.5,"explanation":"because"}"#);
        assert_eq!(card.question, "How many?");
        assert_eq!(card.answer, 12.5);
        assert_eq!(card.explanation, "because");
    }

    #[test]
    fn strips_code_fences() {
        let card = single("```json\n{\"question\":\"Q\",\"answer\":1,\"explanation\":\"E\"}\n```");
        assert_eq!(card.question, "Q");
    }

    #[test]
    fn accepts_numeric_string_answer() {
        assert_eq!(single(r#"{"question":"Q","answer":"1.25","explanation":"E"}"#).answer, 1.25);
    }

    #[test]
    fn missing_field_survives_parsing_but_fails_coercion() {
        let cands = parse_cards_payload(r#"{"question":"Q","answer":1}"#).unwrap();
        let (cards, rejected) = coerce_candidates(cands);
        assert!(cards.is_empty());
        assert_eq!(rejected, 1);
    }

    #[test]
    fn cards_wrapper_and_bare_array_are_both_accepted() {
        let wrapped = r#"{"cards":[{"question":"A","answer":1,"explanation":"e"},{"question":"B","answer":"x","explanation":"e"}]}"#;
        assert_eq!(parse_cards_payload(wrapped).unwrap().len(), 2);

        let bare = r#"[{"question":"A","answer":1,"explanation":"e"}]"#;
        assert_eq!(parse_cards_payload(bare).unwrap().len(), 1);
    }

    #[test]
    fn json_embedded_in_prose_is_extracted() {
        let text = "Sure! Here you go: {\"question\":\"Q?\",\"answer\":7,\"explanation\":\"E\"} Enjoy.";
        assert_eq!(single(text).answer, 7.0);
    }

    #[test]
    fn labelled_lines_fallback() {
        let text = "Pytanie: Ile minut trwa mecz piłki nożnej?\nOdpowiedź: 90\nWyjaśnienie: Dwie połowy po 45 minut.";
        let card = single(text);
        assert_eq!(card.question, "Ile minut trwa mecz piłki nożnej?");
        assert_eq!(card.answer, 90.0);
        assert_eq!(card.explanation, "Dwie połowy po 45 minut.");
    }

    #[test]
    fn labelled_lines_without_explanation_use_placeholder() {
        let card = single("How many legs does a spider have?\nAnswer: 8");
        assert_eq!(card.question, "How many legs does a spider have?");
        assert_eq!(card.explanation, FALLBACK_EXPLANATION);
    }

    #[test]
    fn relaxed_triples_recover_broken_json() {
        // Space-grouped and decimal-comma numbers are not valid JSON.
        let text = r#"[{"question": "A?", "answer": 1 000, "explanation": "first"}, {"question": "B?", "answer": 2,5, "explanation": "second"}, oops]"#;
        let (cards, rejected) = coerce_candidates(parse_cards_payload(text).unwrap());
        assert_eq!(rejected, 0);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].answer, 1000.0);
        assert_eq!(cards[1].answer, 2.5);
    }

    #[test]
    fn prose_without_cards_is_malformed() {
        assert!(matches!(
            parse_cards_payload("I cannot help with that."),
            Err(SourceError::Malformed(_))
        ));
        assert!(matches!(parse_cards_payload("42"), Err(SourceError::Malformed(_))));
    }
}
