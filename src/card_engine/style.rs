//! Party-game style filter for LLM-generated candidates.
//!
//! The game wants "guess the number" trivia that people can estimate, not
//! school exercises. Candidates that read like math puzzles, physics
//! homework or scoring tasks are rejected here, before they reach the pool.
//! Keyword stems cover Polish (the default card language) and English.

use std::sync::LazyLock;

use regex::Regex;

use crate::card_engine::models::RawCardCandidate;

pub const QUESTION_CHARS: std::ops::RangeInclusive<usize> = 12..=180;
pub const ANSWER_RANGE: std::ops::RangeInclusive<f64> = 0.001..=10_000_000.0;

const MATH_KEYWORDS: &[&str] = &[
    "kombin", "permut", "wariant", "wariacj", "prawdopodob", "równan", "pierwiast", "funkcj",
    "macierz", "logaryt", "silni", "nwd", "nww", "bez powtór", "ile możliwości",
    "combination", "permutation", "probability", "equation", "square root", "factorial",
    "logarithm", "matrix", "how many ways", "pin code",
];

const TECHNICAL_KEYWORDS: &[&str] = &[
    "promień", "równik", "obwód", "gęsto", "ciśnien", "prędkoś", "przyspieszen", "wolt",
    "amper", "joule", "kelvin", "atom", "cząsteczk", "reakcj", "wzór", "π",
    "radius", "circumference", "density", "pressure", "velocity", "acceleration", "molecule",
    "formula",
];

const CALCULATION_KEYWORDS: &[&str] = &[
    "policz", "oblicz", "suma", "razem", "łącznie", "ile punkt", "talia", "karty",
    "calculate", "compute", "in total", "sum of", "how many points",
];

static MATH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d+\s*[+\-*/^]\s*\d+\b",
        // `z` is left out: it is also the most common Polish preposition.
        r"\b[xy]\b",
        // Word-anchored so "pociąg", "szkoda" and "spinacz" stay allowed.
        r"\bciąg",
        r"\bkod(?:u|y|ów|em|zie)?\b",
        r"\bpin(?:u|y|ów|em)?\b",
        r"=\s*\d",
        r"\b(?:sin|cos|tan)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid math pattern"))
    .collect()
});

static UNIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:k?m/s|[kmg]?hz|(?:kilo|mega)?wat(?:y|ów|ach|ami|t|ts)?)\b")
        .expect("valid unit pattern")
});

static ARITHMETIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"\d\s*[+\-*/^=×·∙]\s*\d", r"\b\d+\s*[xX]\s*\d+\b", r"="]
        .iter()
        .map(|p| Regex::new(p).expect("valid arithmetic pattern"))
        .collect()
});

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StyleRejection {
    #[error("question looks like a math or logic puzzle")]
    MathPuzzle,
    #[error("question looks too technical")]
    TooTechnical,
    #[error("question looks like a calculation or scoring task")]
    Calculation,
    #[error("explanation contains arithmetic")]
    ArithmeticExplanation,
    #[error("question length {0} is out of bounds")]
    QuestionLength(usize),
    #[error("answer {0} is outside the guessable range")]
    AnswerOutOfRange(f64),
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|k| haystack.contains(k))
}

pub fn looks_like_math_puzzle(question: &str) -> bool {
    let q = question.trim().to_lowercase();
    contains_any(&q, MATH_KEYWORDS) || MATH_PATTERNS.iter().any(|p| p.is_match(&q))
}

pub fn looks_too_technical(question: &str) -> bool {
    let q = question.trim().to_lowercase();
    contains_any(&q, TECHNICAL_KEYWORDS) || UNIT_PATTERN.is_match(&q)
}

/// Accepts a candidate only if it reads like party trivia. A candidate whose
/// answer does not parse passes the range check; the pool rejects it later.
pub fn check_party_style(candidate: &RawCardCandidate) -> Result<(), StyleRejection> {
    let question = candidate.question.trim();
    if looks_like_math_puzzle(question) {
        return Err(StyleRejection::MathPuzzle);
    }
    if looks_too_technical(question) {
        return Err(StyleRejection::TooTechnical);
    }
    if contains_any(&question.to_lowercase(), CALCULATION_KEYWORDS) {
        return Err(StyleRejection::Calculation);
    }
    if ARITHMETIC_PATTERNS.iter().any(|p| p.is_match(&candidate.explanation)) {
        return Err(StyleRejection::ArithmeticExplanation);
    }
    let len = question.chars().count();
    if !QUESTION_CHARS.contains(&len) {
        return Err(StyleRejection::QuestionLength(len));
    }
    if let Some(answer) = candidate.answer.as_ref().and_then(|a| a.as_finite()) {
        if !ANSWER_RANGE.contains(&answer) {
            return Err(StyleRejection::AnswerOutOfRange(answer));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card_engine::models::AnswerValue;

    fn cand(q: &str, a: f64, e: &str) -> RawCardCandidate {
        RawCardCandidate::new(q, AnswerValue::Number(a), e)
    }

    #[test]
    fn accepts_everyday_trivia() {
        let c = cand(
            "Ile mililitrów ma standardowa puszka coli?",
            330.0,
            "Najczęściej spotykana puszka w Polsce ma 330 ml.",
        );
        assert_eq!(check_party_style(&c), Ok(()));
    }

    #[test]
    fn rejects_combinatorics_and_arithmetic_explanations() {
        let pin = cand(
            "Ile różnych 4-cyfrowych kodów PIN można utworzyć z cyfr 0-9 bez powtórzeń?",
            5040.0,
            "10*9*8*7",
        );
        assert_eq!(check_party_style(&pin), Err(StyleRejection::MathPuzzle));

        let lotto = cand("Ile jest kombinacji 6 liczb z 49?", 13_983_816.0, "kombinatoryka");
        assert_eq!(check_party_style(&lotto), Err(StyleRejection::MathPuzzle));

        let expl = cand("How many minutes does a football match last?", 90.0, "45 x 2 halves");
        assert_eq!(check_party_style(&expl), Err(StyleRejection::ArithmeticExplanation));
    }

    #[test]
    fn rejects_physics_and_scoring() {
        let radius = cand("What is the radius of the Earth in kilometres?", 6371.0, "Mean value.");
        assert_eq!(check_party_style(&radius), Err(StyleRejection::TooTechnical));

        let sound = cand("How fast is sound in air in m/s at sea level?", 343.0, "Textbook value.");
        assert_eq!(check_party_style(&sound), Err(StyleRejection::TooTechnical));

        let deck = cand("Ile punktów łącznie mają wszystkie karty w talii?", 380.0, "Suma wartości.");
        assert_eq!(check_party_style(&deck), Err(StyleRejection::Calculation));
    }

    #[test]
    fn polish_stems_match_whole_words_only() {
        let rejected = [
            ("Ile cyfr ma kod do sejfu w filmie Piła?", StyleRejection::MathPuzzle),
            ("Ile jest wariantów ułożenia talerzy na stole?", StyleRejection::MathPuzzle),
            ("Jaki jest dziesiąty wyraz ciągu Fibonacciego?", StyleRejection::MathPuzzle),
            ("Ile cyfr ma numer PIN do karty SIM?", StyleRejection::MathPuzzle),
            ("Ile watów ma typowa żarówka LED w domu?", StyleRejection::TooTechnical),
        ];
        for (question, why) in rejected {
            assert_eq!(check_party_style(&cand(question, 10.0, "Tak podaje producent.")), Err(why), "{question}");
        }

        let allowed = [
            "Ile wagonów ma typowy pociąg pasażerski?",
            "Ile kalorii ma pączek z lukrem?",
            "How many litres of water does a bathtub hold?",
            "Ile spinaczy mieści się w standardowym pudełku?",
        ];
        for question in allowed {
            assert_eq!(check_party_style(&cand(question, 150.0, "Typowa wartość.")), Ok(()), "{question}");
        }
    }

    #[test]
    fn enforces_length_and_answer_range() {
        assert_eq!(
            check_party_style(&cand("Ile?", 3.0, "Bo tak.")),
            Err(StyleRejection::QuestionLength(4))
        );
        assert_eq!(
            check_party_style(&cand("How many stars are in the Milky Way?", 1e11, "Rough estimate.")),
            Err(StyleRejection::AnswerOutOfRange(1e11))
        );
    }

    #[test]
    fn unparsable_answer_is_left_for_the_pool() {
        let c = RawCardCandidate::new(
            "How many teeth does an adult human have?",
            AnswerValue::Text("thirty-two".into()),
            "Including wisdom teeth.",
        );
        assert_eq!(check_party_style(&c), Ok(()));
    }
}
