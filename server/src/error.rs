use thiserror::Error;

/// Recoverable rejections of a client request.
///
/// None of these ever reach another connection or end a session: the caller
/// reports them to the originating connection and the session state stays as
/// it was before the request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Game PIN not found.")]
    NotFound,
    #[error("Only the host can do that.")]
    NotAuthorized,
    #[error("{0}")]
    InvalidState(String),
    #[error("Nickname already taken.")]
    DuplicateNickname,
    #[error("{0}")]
    NicknameInvalid(String),
    #[error("Cannot start a game without players.")]
    EmptyRoster,
    #[error("Too late or wrong question! (current question is {expected}, got {got})")]
    StaleQuestion { expected: usize, got: usize },
    #[error("Answer {0} is not one of the options.")]
    InvalidAnswerIndex(usize),
    #[error("You already answered!")]
    AlreadyAnswered,
    #[error("No free game PINs left, try again later.")]
    RegistryExhausted,
    #[error("Unknown quiz '{0}'.")]
    UnknownQuiz(String),
}

impl GameError {
    pub fn invalid_state(message: &str) -> Self {
        GameError::InvalidState(message.to_string())
    }
}

/// A session whose internal bookkeeping no longer adds up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("session {pin} invariant violated: {detail}")]
pub struct InvariantViolation {
    pub pin: String,
    pub detail: String,
}
