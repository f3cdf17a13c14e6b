//! Named quiz definitions hosts can pick from.

use crate::error::GameError;
use log::info;
use serde::Deserialize;
use shared::{default_quiz, QuizDefinition, QuizError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_QUIZ: &str = "default";

#[derive(Debug, Error)]
pub enum QuizLoadError {
    #[error("failed to read quiz file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse quiz file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid quiz: {0}")]
    Invalid(#[from] QuizError),
}

/// A quiz file holds either one quiz or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum QuizFile {
    Many(Vec<QuizDefinition>),
    One(QuizDefinition),
}

#[derive(Debug, Clone)]
pub struct QuizLibrary {
    quizzes: HashMap<String, Arc<QuizDefinition>>,
}

impl Default for QuizLibrary {
    fn default() -> Self {
        let mut quizzes = HashMap::new();
        quizzes.insert(DEFAULT_QUIZ.to_string(), Arc::new(default_quiz()));
        Self { quizzes }
    }
}

impl QuizLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a quiz under its title.
    pub fn insert(&mut self, quiz: QuizDefinition) -> Result<(), QuizError> {
        quiz.validate()?;
        self.quizzes.insert(quiz.title.clone(), Arc::new(quiz));
        Ok(())
    }

    pub fn extend_from_json(&mut self, json: &str) -> Result<usize, QuizLoadError> {
        let quizzes = match serde_json::from_str::<QuizFile>(json)? {
            QuizFile::Many(quizzes) => quizzes,
            QuizFile::One(quiz) => vec![quiz],
        };
        // Validate everything before touching the library
        for quiz in &quizzes {
            quiz.validate()?;
        }
        let count = quizzes.len();
        for quiz in quizzes {
            self.insert(quiz)?;
        }
        Ok(count)
    }

    pub fn load(path: &Path) -> Result<Self, QuizLoadError> {
        let json = std::fs::read_to_string(path)?;
        let mut library = Self::default();
        let count = library.extend_from_json(&json)?;
        info!("Loaded {} quizzes from {}", count, path.display());
        Ok(library)
    }

    /// Resolves a quiz reference; an empty reference means the default quiz.
    pub fn get(&self, quiz_ref: &str) -> Result<Arc<QuizDefinition>, GameError> {
        let name = match quiz_ref.trim() {
            "" => DEFAULT_QUIZ,
            name => name,
        };
        self.quizzes
            .get(name)
            .cloned()
            .ok_or_else(|| GameError::UnknownQuiz(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.quizzes.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOGRAPHY: &str = r#"{
        "title": "geography",
        "questions": [
            {"text": "Longest river?", "options": ["Nile", "Rhine"], "correct_index": 0}
        ]
    }"#;

    #[test]
    fn test_default_quiz_always_available() {
        let library = QuizLibrary::new();
        assert_eq!(library.get("").unwrap().len(), 3);
        assert_eq!(library.get("default").unwrap().title, "default");
        assert_eq!(
            library.get("history").unwrap_err(),
            GameError::UnknownQuiz("history".into())
        );
    }

    #[test]
    fn test_load_single_quiz() {
        let mut library = QuizLibrary::new();
        assert_eq!(library.extend_from_json(GEOGRAPHY).unwrap(), 1);
        assert_eq!(library.names(), vec!["default", "geography"]);
        assert_eq!(library.get("geography").unwrap().questions[0].options[1], "Rhine");
    }

    #[test]
    fn test_load_quiz_list() {
        let json = format!("[{}, {}]", GEOGRAPHY, GEOGRAPHY.replace("geography", "rivers"));
        let mut library = QuizLibrary::new();
        assert_eq!(library.extend_from_json(&json).unwrap(), 2);
        assert!(library.get("rivers").is_ok());
    }

    #[test]
    fn test_invalid_quiz_leaves_library_untouched() {
        let json = r#"[
            {"title": "ok", "questions": [{"text": "A?", "options": ["a", "b"], "correct_index": 1}]},
            {"title": "bad", "questions": [{"text": "B?", "options": ["a", "b"], "correct_index": 5}]}
        ]"#;
        let mut library = QuizLibrary::new();
        assert!(matches!(
            library.extend_from_json(json),
            Err(QuizLoadError::Invalid(_))
        ));
        assert_eq!(library.names(), vec!["default"]);
    }

    #[test]
    fn test_malformed_json() {
        let mut library = QuizLibrary::new();
        assert!(matches!(
            library.extend_from_json("{not json"),
            Err(QuizLoadError::Json(_))
        ));
    }
}
