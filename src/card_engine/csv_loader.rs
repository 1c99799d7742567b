//! Loading question cards from a directory of CSV files.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::card_engine::models::{parse_answer_text, Card};

pub const CSV_EXPLANATION: &str = "Source: CSV file.";

#[derive(Debug, thiserror::Error)]
pub enum CsvLoadError {
    #[error("CSV delimiter must be a single ASCII character, got {0:?}")]
    BadDelimiter(String),

    #[error("CSV questions directory does not exist or is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no CSV files found in directory: {}", .0.display())]
    NoFiles(PathBuf),

    #[error("CSV file {} must contain columns 'question' and 'answer' (found: {found:?})", .path.display())]
    MissingColumns { path: PathBuf, found: Vec<String> },

    #[error("no valid cards loaded from CSV directory: {}", .0.display())]
    NoCards(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Validate a delimiter given as text and turn it into the byte `csv` wants.
pub fn parse_delimiter(raw: &str) -> Result<u8, CsvLoadError> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c as u8),
        _ => Err(CsvLoadError::BadDelimiter(raw.to_string())),
    }
}

/// Load every `*.csv` file in `dir` (sorted by name) into cards.
///
/// Header names are matched trimmed and case-insensitively; `question` and
/// `answer` are required, `explanation` is optional, anything else is
/// ignored. Rows with a blank question/answer are skipped silently, rows with
/// a non-numeric answer are skipped with a warning.
pub fn load_cards_from_csv_dir(dir: &Path, delimiter: u8) -> Result<Vec<Card>, CsvLoadError> {
    if !dir.is_dir() {
        return Err(CsvLoadError::NotADirectory(dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(dir).map_err(|source| CsvLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(CsvLoadError::NoFiles(dir.to_path_buf()));
    }

    let mut cards = Vec::new();
    for path in &paths {
        let loaded = load_file(path, delimiter)?;
        info!("Loaded {} cards from {}", loaded.len(), path.display());
        cards.extend(loaded);
    }

    if cards.is_empty() {
        return Err(CsvLoadError::NoCards(dir.to_path_buf()));
    }
    Ok(cards)
}

fn load_file(path: &Path, delimiter: u8) -> Result<Vec<Card>, CsvLoadError> {
    let csv_err = |source| CsvLoadError::Csv { path: path.to_path_buf(), source };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    let column = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let (Some(q_idx), Some(a_idx)) = (column("question"), column("answer")) else {
        return Err(CsvLoadError::MissingColumns {
            path: path.to_path_buf(),
            found: headers.iter().map(str::to_string).collect(),
        });
    };
    let e_idx = column("explanation");

    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut cards = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let question = record.get(q_idx).unwrap_or("").trim();
        let raw_answer = record.get(a_idx).unwrap_or("").trim();
        if question.is_empty() || raw_answer.is_empty() {
            continue;
        }
        let Some(answer) = parse_answer_text(raw_answer) else {
            warn!("Skipping row with non-numeric answer in {}: {:?}", file_name, raw_answer);
            continue;
        };
        let explanation = e_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(CSV_EXPLANATION);
        cards.push(Card {
            question: question.to_string(),
            answer,
            explanation: explanation.to_string(),
        });
    }
    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn merges_files_and_ignores_extra_columns() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.csv", "id;question;answer;unit\n1;Ile to jest?;10;g\n2;Drugie?;2.5;kg\n");
        write(tmp.path(), "b.csv", "Question ; ANSWER;category\nTrzecie?;100;cat\n");
        write(tmp.path(), "notes.txt", "question;answer\nIgnored?;1\n");

        let cards = load_cards_from_csv_dir(tmp.path(), b';').unwrap();
        assert_eq!(cards.len(), 3);
        let questions: HashSet<_> = cards.iter().map(|c| c.question.as_str()).collect();
        assert_eq!(questions, HashSet::from(["Ile to jest?", "Drugie?", "Trzecie?"]));
        let answers: Vec<f64> = cards.iter().map(|c| c.answer).collect();
        assert_eq!(answers, [10.0, 2.5, 100.0]);
        assert!(cards.iter().all(|c| c.explanation == CSV_EXPLANATION));
    }

    #[test]
    fn skips_non_numeric_and_blank_rows() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.csv", "question;answer\nOK?;10\nBAD?;n/a\n;5\nEmpty?;\n");

        let cards = load_cards_from_csv_dir(tmp.path(), b';').unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].question, "OK?");
        assert_eq!(cards[0].answer, 10.0);
    }

    #[test]
    fn uses_explanation_column_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.csv", "question,answer,explanation\nHow many?,\"1,5\",Because.\nMore?,3,\n");

        let cards = load_cards_from_csv_dir(tmp.path(), b',').unwrap();
        assert_eq!(cards[0].answer, 1.5);
        assert_eq!(cards[0].explanation, "Because.");
        assert_eq!(cards[1].explanation, CSV_EXPLANATION);
    }

    #[test]
    fn requires_question_and_answer_columns() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.csv", "foo;bar\n1;2\n");

        let err = load_cards_from_csv_dir(tmp.path(), b';').unwrap_err();
        assert!(err.to_string().contains("must contain columns 'question' and 'answer'"));
    }

    #[test]
    fn empty_or_missing_directories_are_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(load_cards_from_csv_dir(tmp.path(), b';'), Err(CsvLoadError::NoFiles(_))));

        write(tmp.path(), "a.csv", "question;answer\nBAD?;x\n");
        assert!(matches!(load_cards_from_csv_dir(tmp.path(), b';'), Err(CsvLoadError::NoCards(_))));

        let missing = tmp.path().join("nope");
        assert!(matches!(load_cards_from_csv_dir(&missing, b';'), Err(CsvLoadError::NotADirectory(_))));
    }

    #[test]
    fn delimiter_must_be_one_ascii_char() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("§").is_err());
    }
}
