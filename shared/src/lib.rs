use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_FRAME_SIZE: usize = 64 * 1024;
pub const FRAME_HEADER_SIZE: usize = 4;
pub const MIN_OPTIONS: usize = 2;

/// Server-assigned identifier of one transport connection.
pub type ConnectionId = u32;

/// Short numeric code players type in to join a game.
pub type Pin = String;

/// Messages sent by hosts and players to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ClientMessage {
    CreateGame {
        quiz_ref: String,
    },
    JoinGame {
        pin: Pin,
        nickname: String,
    },
    StartGame {
        pin: Pin,
    },
    NextQuestion {
        pin: Pin,
    },
    SubmitAnswer {
        pin: Pin,
        question_index: usize,
        answer_index: usize,
    },
    CloseGame {
        pin: Pin,
    },
    LeaveGame {
        pin: Pin,
    },
}

/// Messages sent by the server to a single connection or to a whole session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerMessage {
    Connected {
        connection_id: ConnectionId,
    },
    GameCreated {
        pin: Pin,
    },
    UpdatePlayerList {
        players: Vec<String>,
    },
    PlayerLeft {
        nickname: String,
    },
    JoinError {
        message: String,
    },
    JoinedSuccessfully {
        nickname: String,
    },
    DisplayQuestion {
        question_index: usize,
        question_total: usize,
        question_text: String,
        options: Vec<String>,
    },
    AnswerReceived {
        question_index: usize,
    },
    AnswerError {
        message: String,
    },
    AnswerCount {
        answered: usize,
        total: usize,
    },
    ShowRoundResults {
        question_index: usize,
        correct_answer: usize,
        player_results: BTreeMap<ConnectionId, PlayerOutcome>,
        leaderboard: Vec<LeaderboardEntry>,
    },
    GameOver {
        leaderboard: Vec<LeaderboardEntry>,
    },
    GameClosed {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Per-player result of one round.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerOutcome {
    pub nickname: String,
    pub correct: bool,
    pub score_added: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub nickname: String,
    pub score: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

impl Question {
    pub fn new(text: &str, options: &[&str], correct_index: usize) -> Self {
        Self {
            text: text.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_index,
        }
    }
}

/// An ordered, immutable set of questions played in one session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QuizDefinition {
    pub title: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Error, PartialEq)]
pub enum QuizError {
    #[error("quiz '{0}' has no questions")]
    Empty(String),
    #[error("question {index} has {count} options, at least two are required")]
    TooFewOptions { index: usize, count: usize },
    #[error("question {index} marks option {correct} correct but only has {count} options")]
    CorrectIndexOutOfRange {
        index: usize,
        correct: usize,
        count: usize,
    },
}

impl QuizDefinition {
    pub fn new(title: &str, questions: Vec<Question>) -> Self {
        Self {
            title: title.to_string(),
            questions,
        }
    }

    /// Checks that every question can actually be played and scored.
    pub fn validate(&self) -> Result<(), QuizError> {
        if self.questions.is_empty() {
            return Err(QuizError::Empty(self.title.clone()));
        }

        for (index, question) in self.questions.iter().enumerate() {
            let count = question.options.len();
            if count < MIN_OPTIONS {
                return Err(QuizError::TooFewOptions { index, count });
            }
            if question.correct_index >= count {
                return Err(QuizError::CorrectIndexOutOfRange {
                    index,
                    correct: question.correct_index,
                    count,
                });
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

/// The quiz every server ships with.
pub fn default_quiz() -> QuizDefinition {
    QuizDefinition::new(
        "default",
        vec![
            Question::new(
                "What is the capital of France?",
                &["Berlin", "Madrid", "Paris", "Rome"],
                2,
            ),
            Question::new(
                "Which planet is known as the Red Planet?",
                &["Earth", "Mars", "Jupiter", "Venus"],
                1,
            ),
            Question::new("What is 2 + 2?", &["3", "4", "5", "6"], 1),
        ],
    )
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),
    #[error("malformed frame payload: {0}")]
    Codec(#[from] bincode::Error),
}

/// Serializes a message and prefixes it with its big-endian length.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads the payload length out of a frame header.
pub fn frame_len(header: [u8; FRAME_HEADER_SIZE]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }
    Ok(len)
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    Ok(bincode::deserialize(payload)?)
}
