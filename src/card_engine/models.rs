use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Card
// ---------------------------------------------------------------------------

/// A ready-to-serve trivia card. Only ever built through [`Card::try_from`]
/// on a [`RawCardCandidate`] or by the CSV loader, so `answer` is always finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub question: String,
    pub answer: f64,
    pub explanation: String,
}

impl Card {
    /// Answer formatted for display: whole numbers without a fractional part.
    pub fn answer_display(&self) -> String {
        format_answer(self.answer)
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.question, self.answer_display())
    }
}

/// Render `1500.0` as `"1500"` and `2.5` as `"2.5"`.
pub fn format_answer(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Parse a human-written number: whitespace is dropped and a decimal comma
/// is accepted (`"1 250,5"` -> `1250.5`). Non-finite results are rejected.
pub fn parse_answer_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // `f64::from_str` accepts "inf" / "NaN"; those are not answers.
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Raw candidates produced by a card source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
}

impl AnswerValue {
    pub fn as_finite(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(n) => Some(*n).filter(|v| v.is_finite()),
            AnswerValue::Text(s) => parse_answer_text(s),
        }
    }
}

/// Unvalidated card as it came out of a source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawCardCandidate {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: Option<AnswerValue>,
    #[serde(default)]
    pub explanation: String,
}

impl RawCardCandidate {
    pub fn new(
        question: impl Into<String>,
        answer: AnswerValue,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: Some(answer),
            explanation: explanation.into(),
        }
    }

    /// Lenient conversion from an arbitrary JSON value. Never fails: fields
    /// that are absent or of the wrong type come out empty, and coercion
    /// rejects the candidate later.
    pub fn from_json(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_default()
        };
        let answer = match value.get("answer") {
            Some(Value::Number(n)) => n.as_f64().map(AnswerValue::Number),
            Some(Value::String(s)) => Some(AnswerValue::Text(s.clone())),
            _ => None,
        };
        Self {
            question: text("question"),
            answer,
            explanation: text("explanation"),
        }
    }
}

impl From<Card> for RawCardCandidate {
    fn from(card: Card) -> Self {
        Self {
            question: card.question,
            answer: Some(AnswerValue::Number(card.answer)),
            explanation: card.explanation,
        }
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCandidate {
    #[error("field 'question' must be a non-empty string")]
    MissingQuestion,
    #[error("field 'explanation' must be a non-empty string")]
    MissingExplanation,
    #[error("field 'answer' is missing")]
    MissingAnswer,
    #[error("field 'answer' is not a finite number: {0}")]
    NonNumericAnswer(String),
}

impl TryFrom<RawCardCandidate> for Card {
    type Error = InvalidCandidate;

    fn try_from(raw: RawCardCandidate) -> Result<Self, Self::Error> {
        let question = raw.question.trim();
        if question.is_empty() {
            return Err(InvalidCandidate::MissingQuestion);
        }
        let explanation = raw.explanation.trim();
        if explanation.is_empty() {
            return Err(InvalidCandidate::MissingExplanation);
        }
        let answer = raw.answer.ok_or(InvalidCandidate::MissingAnswer)?;
        let value = answer.as_finite().ok_or_else(|| {
            InvalidCandidate::NonNumericAnswer(match &answer {
                AnswerValue::Number(n) => n.to_string(),
                AnswerValue::Text(s) => s.clone(),
            })
        })?;
        Ok(Card {
            question: question.to_string(),
            answer: value,
            explanation: explanation.to_string(),
        })
    }
}

/// Split a batch into valid cards (in received order) and the number of
/// rejected candidates.
pub fn coerce_candidates(candidates: Vec<RawCardCandidate>) -> (Vec<Card>, usize) {
    let mut cards = Vec::with_capacity(candidates.len());
    let mut rejected = 0usize;
    for candidate in candidates {
        match Card::try_from(candidate) {
            Ok(card) => cards.push(card),
            Err(e) => {
                tracing::debug!("dropping invalid candidate: {e}");
                rejected += 1;
            }
        }
    }
    (cards, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn answer_text_accepts_decimal_comma_and_spaces() {
        assert_eq!(parse_answer_text("1 250,5"), Some(1250.5));
        assert_eq!(parse_answer_text(" 330 "), Some(330.0));
        assert_eq!(parse_answer_text("-2"), Some(-2.0));
    }

    #[test]
    fn answer_text_rejects_words_and_non_finite() {
        assert_eq!(parse_answer_text("n/a"), None);
        assert_eq!(parse_answer_text("abc"), None);
        assert_eq!(parse_answer_text("inf"), None);
        assert_eq!(parse_answer_text("NaN"), None);
        assert_eq!(parse_answer_text("1e400"), None);
        assert_eq!(parse_answer_text(""), None);
    }

    #[test]
    fn lenient_json_candidate_keeps_what_it_can() {
        let c = RawCardCandidate::from_json(&json!({"question": "Q?", "answer": true}));
        assert_eq!(c.question, "Q?");
        assert_eq!(c.answer, None);
        assert!(c.explanation.is_empty());

        let c = RawCardCandidate::from_json(&json!({"question": "Q?", "answer": "1.25", "explanation": "E"}));
        assert_eq!(Card::try_from(c).map(|c| c.answer), Ok(1.25));
    }

    #[test]
    fn coercion_trims_and_requires_all_fields() {
        let ok = RawCardCandidate::new("  Q?  ", AnswerValue::Number(12.5), " E ");
        let card = Card::try_from(ok).unwrap();
        assert_eq!(card.question, "Q?");
        assert_eq!(card.explanation, "E");

        let no_expl = RawCardCandidate::new("Q?", AnswerValue::Number(1.0), "   ");
        assert_eq!(Card::try_from(no_expl), Err(InvalidCandidate::MissingExplanation));

        let bad = RawCardCandidate::new("Q?", AnswerValue::Text("abc".into()), "E");
        assert!(matches!(Card::try_from(bad), Err(InvalidCandidate::NonNumericAnswer(_))));
    }

    #[test]
    fn coerce_candidates_counts_rejects_and_keeps_order() {
        let batch = vec![
            RawCardCandidate::new("A?", AnswerValue::Text("n/a".into()), "e"),
            RawCardCandidate::new("B?", AnswerValue::Number(2.0), "e"),
            RawCardCandidate::new("C?", AnswerValue::Text("about ten".into()), "e"),
            RawCardCandidate::new("D?", AnswerValue::Text("4".into()), "e"),
        ];
        let (cards, rejected) = coerce_candidates(batch);
        assert_eq!(rejected, 2);
        let qs: Vec<_> = cards.iter().map(|c| c.question.as_str()).collect();
        assert_eq!(qs, ["B?", "D?"]);
    }

    #[test]
    fn answer_display_drops_trailing_zero_fraction() {
        assert_eq!(format_answer(330.0), "330");
        assert_eq!(format_answer(2.5), "2.5");
    }

    proptest! {
        #[test]
        fn coerced_answers_are_always_finite(text in "\\PC*") {
            let raw = RawCardCandidate::new("Q?", AnswerValue::Text(text), "E");
            if let Ok(card) = Card::try_from(raw) {
                prop_assert!(card.answer.is_finite());
            }
        }
    }
}
