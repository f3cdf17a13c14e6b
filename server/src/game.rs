use crate::config::{ScoringConfig, SessionConfig};
use crate::error::{GameError, InvariantViolation};
use crate::roster::{nickname_key, Roster};
use crate::scoring;
use log::{debug, info};
use shared::{ConnectionId, LeaderboardEntry, Pin, QuizDefinition, ServerMessage};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

pub const HOST_LEFT_REASON: &str = "Host disconnected, game closed.";
pub const HOST_CLOSED_REASON: &str = "The host closed the game.";
pub const LOBBY_EXPIRED_REASON: &str = "Game closed: no players joined in time.";
pub const INTERNAL_ERROR_REASON: &str = "Game closed due to an internal error.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Lobby,
    QuestionActive,
    RoundResults,
    Finished,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Connection(ConnectionId),
    /// Host and every player
    Session,
}

/// A message the session wants delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipient: Recipient,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn to(connection_id: ConnectionId, message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::Connection(connection_id),
            message,
        }
    }

    pub fn broadcast(message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::Session,
            message,
        }
    }
}

/// Authoritative state of one quiz instance.
///
/// Every operation validates against the current state before touching
/// anything, so a rejected request leaves the session exactly as it was.
/// Accepted requests return the messages to deliver, in order.
#[derive(Debug)]
pub struct GameSession {
    pin: Pin,
    host: ConnectionId,
    quiz: Arc<QuizDefinition>,
    state: SessionState,
    current_question: usize,
    roster: Roster,
    round_started: Option<Instant>,
    round_deadline: Option<Instant>,
    lobby_empty_since: Option<Instant>,
    session_config: SessionConfig,
    scoring_config: ScoringConfig,
}

impl GameSession {
    pub fn new(
        pin: Pin,
        host: ConnectionId,
        quiz: Arc<QuizDefinition>,
        session_config: SessionConfig,
        scoring_config: ScoringConfig,
        now: Instant,
    ) -> Self {
        Self {
            pin,
            host,
            quiz,
            state: SessionState::Lobby,
            current_question: 0,
            roster: Roster::new(session_config.max_nickname_len),
            round_started: None,
            round_deadline: None,
            lobby_empty_since: Some(now),
            session_config,
            scoring_config,
        }
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn host(&self) -> ConnectionId {
        self.host
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn current_question(&self) -> usize {
        self.current_question
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn quiz(&self) -> &QuizDefinition {
        &self.quiz
    }

    pub fn round_deadline(&self) -> Option<Instant> {
        self.round_deadline
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        scoring::leaderboard(&self.roster)
    }

    /// Every connection a session-wide message goes to.
    pub fn recipients(&self) -> Vec<ConnectionId> {
        let mut recipients = vec![self.host];
        recipients.extend(self.roster.connection_ids());
        recipients
    }

    fn require_host(&self, connection_id: ConnectionId) -> Result<(), GameError> {
        if connection_id != self.host {
            return Err(GameError::NotAuthorized);
        }
        Ok(())
    }

    fn player_list(&self) -> ServerMessage {
        ServerMessage::UpdatePlayerList {
            players: self.roster.nicknames(),
        }
    }

    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        nickname: &str,
    ) -> Result<Vec<Outbound>, GameError> {
        match self.state {
            SessionState::Lobby => {}
            SessionState::Closed => return Err(GameError::invalid_state("Game is closed.")),
            _ => return Err(GameError::invalid_state("Game has already started.")),
        }
        if connection_id == self.host {
            return Err(GameError::invalid_state("The host cannot join as a player."));
        }

        let nickname = self.roster.add(connection_id, nickname)?;
        self.lobby_empty_since = None;
        info!(
            "Player {} ({}) joined game {}",
            nickname, connection_id, self.pin
        );

        Ok(vec![
            Outbound::to(
                connection_id,
                ServerMessage::JoinedSuccessfully { nickname },
            ),
            Outbound::broadcast(self.player_list()),
        ])
    }

    /// Removes a player in any state. Unknown connections are ignored.
    pub fn leave(&mut self, connection_id: ConnectionId, now: Instant) -> Vec<Outbound> {
        if self.is_closed() {
            return Vec::new();
        }
        let Some(player) = self.roster.remove(connection_id) else {
            return Vec::new();
        };
        info!(
            "Player {} ({}) left game {}",
            player.nickname, connection_id, self.pin
        );

        if self.state == SessionState::Lobby && self.roster.is_empty() {
            self.lobby_empty_since = Some(now);
        }

        vec![
            Outbound::broadcast(self.player_list()),
            Outbound::broadcast(ServerMessage::PlayerLeft {
                nickname: player.nickname,
            }),
        ]
    }

    pub fn start(
        &mut self,
        connection_id: ConnectionId,
        now: Instant,
    ) -> Result<Vec<Outbound>, GameError> {
        self.require_host(connection_id)?;
        if self.state != SessionState::Lobby {
            return Err(GameError::invalid_state("Game has already started."));
        }
        if self.roster.is_empty() {
            return Err(GameError::EmptyRoster);
        }

        self.current_question = 0;
        self.lobby_empty_since = None;
        info!(
            "Starting game {} with {} players",
            self.pin,
            self.roster.len()
        );
        Ok(vec![self.open_round(now)])
    }

    fn open_round(&mut self, now: Instant) -> Outbound {
        self.state = SessionState::QuestionActive;
        self.roster.clear_answers();
        self.round_started = Some(now);
        self.round_deadline = Some(now + self.scoring_config.time_budget);

        let question = &self.quiz.questions[self.current_question];
        debug!(
            "Game {} showing question {}/{}",
            self.pin,
            self.current_question + 1,
            self.quiz.len()
        );
        Outbound::broadcast(ServerMessage::DisplayQuestion {
            question_index: self.current_question,
            question_total: self.quiz.len(),
            question_text: question.text.clone(),
            options: question.options.clone(),
        })
    }

    pub fn submit_answer(
        &mut self,
        connection_id: ConnectionId,
        question_index: usize,
        answer_index: usize,
        at: Instant,
    ) -> Result<Vec<Outbound>, GameError> {
        if self.state != SessionState::QuestionActive {
            return Err(GameError::invalid_state(
                "No question is open for answers.",
            ));
        }
        let current = self.current_question;
        let option_count = self.quiz.questions[current].options.len();
        let player = self
            .roster
            .get_mut(connection_id)
            .ok_or(GameError::NotAuthorized)?;

        if question_index != current {
            return Err(GameError::StaleQuestion {
                expected: current,
                got: question_index,
            });
        }
        if player.has_answered() {
            return Err(GameError::AlreadyAnswered);
        }
        if answer_index >= option_count {
            return Err(GameError::InvalidAnswerIndex(answer_index));
        }

        player.record_answer(answer_index, at);
        debug!(
            "Player {} in game {} answered question {} with {}",
            player.nickname, self.pin, question_index, answer_index
        );

        Ok(vec![
            Outbound::to(connection_id, ServerMessage::AnswerReceived { question_index }),
            Outbound::to(
                self.host,
                ServerMessage::AnswerCount {
                    answered: self.roster.answered_count(),
                    total: self.roster.len(),
                },
            ),
        ])
    }

    pub fn advance(
        &mut self,
        connection_id: ConnectionId,
        now: Instant,
    ) -> Result<Vec<Outbound>, GameError> {
        self.require_host(connection_id)?;
        match self.state {
            SessionState::QuestionActive => Ok(vec![self.close_round()]),
            SessionState::RoundResults => {
                if self.current_question + 1 < self.quiz.len() {
                    self.current_question += 1;
                    Ok(vec![self.open_round(now)])
                } else {
                    Ok(vec![self.finish()])
                }
            }
            SessionState::Lobby => Err(GameError::invalid_state("Game has not started yet.")),
            SessionState::Finished => Err(GameError::invalid_state("Game is already over.")),
            SessionState::Closed => Err(GameError::invalid_state("Game is closed.")),
        }
    }

    fn close_round(&mut self) -> Outbound {
        let index = self.current_question;
        let question = &self.quiz.questions[index];
        let started = self.round_started.unwrap_or_else(Instant::now);
        let player_results = scoring::score_round(
            &mut self.roster,
            index,
            question,
            started,
            &self.scoring_config,
        );

        self.state = SessionState::RoundResults;
        self.round_deadline = None;
        info!(
            "Game {} round {} closed: {}/{} answered",
            self.pin,
            index + 1,
            player_results.len(),
            self.roster.len()
        );

        Outbound::broadcast(ServerMessage::ShowRoundResults {
            question_index: index,
            correct_answer: question.correct_index,
            player_results,
            leaderboard: self.leaderboard(),
        })
    }

    fn finish(&mut self) -> Outbound {
        self.current_question = self.quiz.len();
        self.state = SessionState::Finished;
        self.round_started = None;
        info!("Game {} finished", self.pin);
        Outbound::broadcast(ServerMessage::GameOver {
            leaderboard: self.leaderboard(),
        })
    }

    pub fn close(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, GameError> {
        self.require_host(connection_id)?;
        if self.is_closed() {
            return Err(GameError::invalid_state("Game is closed."));
        }
        Ok(self.force_close(HOST_CLOSED_REASON))
    }

    /// Closes the session regardless of who asked. No-op once closed.
    pub fn force_close(&mut self, reason: &str) -> Vec<Outbound> {
        if self.is_closed() {
            return Vec::new();
        }
        self.state = SessionState::Closed;
        self.round_deadline = None;
        info!("Game {} closed: {}", self.pin, reason);
        vec![Outbound::broadcast(ServerMessage::GameClosed {
            message: reason.to_string(),
        })]
    }

    /// Transport lost a connection: the host takes the game down with it.
    pub fn disconnect(&mut self, connection_id: ConnectionId, now: Instant) -> Vec<Outbound> {
        if connection_id == self.host {
            self.force_close(HOST_LEFT_REASON)
        } else {
            self.leave(connection_id, now)
        }
    }

    /// Housekeeping run on every timer tick.
    pub fn expire(&mut self, now: Instant) -> Vec<Outbound> {
        match self.state {
            SessionState::Lobby => {
                let expired = self
                    .lobby_empty_since
                    .is_some_and(|since| now.saturating_duration_since(since) > self.session_config.lobby_grace);
                if expired {
                    self.force_close(LOBBY_EXPIRED_REASON)
                } else {
                    Vec::new()
                }
            }
            SessionState::QuestionActive if self.session_config.auto_advance => {
                match self.round_deadline {
                    Some(deadline) if now >= deadline => vec![self.close_round()],
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let violation = |detail: String| InvariantViolation {
            pin: self.pin.clone(),
            detail,
        };
        let quiz_len = self.quiz.len();

        match self.state {
            SessionState::QuestionActive | SessionState::RoundResults => {
                if self.current_question >= quiz_len {
                    return Err(violation(format!(
                        "question index {} out of range for {} questions",
                        self.current_question, quiz_len
                    )));
                }
            }
            SessionState::Finished => {
                if self.current_question != quiz_len {
                    return Err(violation(format!(
                        "finished at question {} of {}",
                        self.current_question, quiz_len
                    )));
                }
            }
            SessionState::Lobby | SessionState::Closed => {}
        }

        let mut seen = HashSet::new();
        for player in self.roster.iter() {
            if !seen.insert(nickname_key(&player.nickname)) {
                return Err(violation(format!(
                    "duplicate nickname {}",
                    player.nickname
                )));
            }
            if player.score as u64 != player.audited_score() {
                return Err(violation(format!(
                    "score of {} does not match its awards",
                    player.nickname
                )));
            }
            if let Some(question) = player.scored_questions().find(|q| *q >= quiz_len) {
                return Err(violation(format!(
                    "{} scored for unknown question {}",
                    player.nickname, question
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{default_quiz, Question};
    use std::time::Duration;

    const HOST: ConnectionId = 1;
    const ANA: ConnectionId = 2;
    const BO: ConnectionId = 3;

    fn session(now: Instant) -> GameSession {
        GameSession::new(
            "123456".into(),
            HOST,
            Arc::new(default_quiz()),
            SessionConfig::default(),
            ScoringConfig::default(),
            now,
        )
    }

    fn started(now: Instant) -> GameSession {
        let mut game = session(now);
        game.join(ANA, "Ana").unwrap();
        game.join(BO, "Bo").unwrap();
        game.start(HOST, now).unwrap();
        game
    }

    #[test]
    fn test_join_broadcasts_roster_in_order() {
        let mut game = session(Instant::now());

        let out = game.join(ANA, "Ana").unwrap();
        assert_eq!(
            out[0],
            Outbound::to(
                ANA,
                ServerMessage::JoinedSuccessfully {
                    nickname: "Ana".into()
                }
            )
        );
        assert_eq!(
            out[1],
            Outbound::broadcast(ServerMessage::UpdatePlayerList {
                players: vec!["Ana".into()]
            })
        );

        let out = game.join(BO, "Bo").unwrap();
        assert_eq!(
            out[1].message,
            ServerMessage::UpdatePlayerList {
                players: vec!["Ana".into(), "Bo".into()]
            }
        );
        assert_eq!(game.recipients(), vec![HOST, ANA, BO]);
    }

    #[test]
    fn test_join_rejected_after_start() {
        let now = Instant::now();
        let mut game = started(now);
        let result = game.join(9, "Late");
        assert!(matches!(result, Err(GameError::InvalidState(_))));
        assert_eq!(game.roster().len(), 2);
    }

    #[test]
    fn test_case_folded_duplicate_keeps_session_open() {
        let mut game = session(Instant::now());
        game.join(ANA, "ΑΣ").unwrap();

        assert_eq!(game.join(BO, "ας"), Err(GameError::DuplicateNickname));
        assert!(game.check_invariants().is_ok());
        assert_eq!(game.state(), SessionState::Lobby);
        assert_eq!(game.roster().nicknames(), vec!["ΑΣ"]);
    }

    #[test]
    fn test_host_cannot_join() {
        let mut game = session(Instant::now());
        assert!(matches!(
            game.join(HOST, "Boss"),
            Err(GameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_start_requires_host_and_players() {
        let now = Instant::now();
        let mut game = session(now);

        assert_eq!(game.start(HOST, now), Err(GameError::EmptyRoster));
        game.join(ANA, "Ana").unwrap();
        assert_eq!(game.start(ANA, now), Err(GameError::NotAuthorized));
        assert_eq!(game.state(), SessionState::Lobby);

        let out = game.start(HOST, now).unwrap();
        assert_eq!(game.state(), SessionState::QuestionActive);
        assert_eq!(
            out,
            vec![Outbound::broadcast(ServerMessage::DisplayQuestion {
                question_index: 0,
                question_total: 3,
                question_text: "What is the capital of France?".into(),
                options: vec![
                    "Berlin".into(),
                    "Madrid".into(),
                    "Paris".into(),
                    "Rome".into()
                ],
            })]
        );
        assert!(matches!(
            game.start(HOST, now),
            Err(GameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_submit_answer_validation() {
        let now = Instant::now();
        let mut game = started(now);
        let at = now + Duration::from_secs(1);

        assert_eq!(
            game.submit_answer(ANA, 1, 2, at),
            Err(GameError::StaleQuestion {
                expected: 0,
                got: 1
            })
        );
        assert_eq!(
            game.submit_answer(ANA, 0, 4, at),
            Err(GameError::InvalidAnswerIndex(4))
        );
        assert_eq!(
            game.submit_answer(HOST, 0, 2, at),
            Err(GameError::NotAuthorized)
        );

        let out = game.submit_answer(ANA, 0, 2, at).unwrap();
        assert_eq!(
            out[0],
            Outbound::to(ANA, ServerMessage::AnswerReceived { question_index: 0 })
        );
        assert_eq!(
            out[1],
            Outbound::to(
                HOST,
                ServerMessage::AnswerCount {
                    answered: 1,
                    total: 2
                }
            )
        );

        assert_eq!(
            game.submit_answer(ANA, 0, 1, at),
            Err(GameError::AlreadyAnswered)
        );
        assert_eq!(game.roster().get(ANA).unwrap().current_answer.unwrap().index, 2);
    }

    #[test]
    fn test_submit_answer_outside_question() {
        let now = Instant::now();
        let mut game = session(now);
        game.join(ANA, "Ana").unwrap();
        assert!(matches!(
            game.submit_answer(ANA, 0, 1, now),
            Err(GameError::InvalidState(_))
        ));

        game.start(HOST, now).unwrap();
        game.advance(HOST, now).unwrap();
        assert!(matches!(
            game.submit_answer(ANA, 0, 1, now),
            Err(GameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_round_results_and_scoring() {
        let now = Instant::now();
        let mut game = started(now);

        game.submit_answer(ANA, 0, 2, now + Duration::from_secs(2))
            .unwrap();
        game.submit_answer(BO, 0, 0, now + Duration::from_secs(1))
            .unwrap();

        let out = game.advance(HOST, now + Duration::from_secs(3)).unwrap();
        assert_eq!(game.state(), SessionState::RoundResults);

        match &out[0].message {
            ServerMessage::ShowRoundResults {
                question_index,
                correct_answer,
                player_results,
                leaderboard,
            } => {
                assert_eq!(*question_index, 0);
                assert_eq!(*correct_answer, 2);
                assert!(player_results[&ANA].correct);
                assert_eq!(player_results[&ANA].score_added, 900);
                assert!(!player_results[&BO].correct);
                assert_eq!(player_results[&BO].score_added, 0);
                assert_eq!(leaderboard[0].nickname, "Ana");
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert_eq!(game.roster().get(ANA).unwrap().score, 900);
        assert!(game.check_invariants().is_ok());
    }

    #[test]
    fn test_full_game_reaches_finished() {
        let now = Instant::now();
        let mut game = started(now);

        for question in 0..3 {
            assert_eq!(game.current_question(), question);
            game.submit_answer(BO, question, 1, now).unwrap();
            game.advance(HOST, now).unwrap();
            let out = game.advance(HOST, now).unwrap();
            if question < 2 {
                assert_eq!(game.state(), SessionState::QuestionActive);
                assert!(matches!(
                    out[0].message,
                    ServerMessage::DisplayQuestion { .. }
                ));
            } else {
                assert_eq!(game.state(), SessionState::Finished);
                assert_eq!(game.current_question(), 3);
                match &out[0].message {
                    ServerMessage::GameOver { leaderboard } => {
                        assert_eq!(leaderboard[0].nickname, "Bo");
                        assert_eq!(leaderboard[0].score, 2000);
                        assert_eq!(leaderboard[1].nickname, "Ana");
                    }
                    other => panic!("Unexpected message {:?}", other),
                }
            }
        }

        assert!(matches!(
            game.advance(HOST, now),
            Err(GameError::InvalidState(_))
        ));
        assert!(game.check_invariants().is_ok());
    }

    #[test]
    fn test_advance_requires_host() {
        let now = Instant::now();
        let mut game = started(now);
        assert_eq!(game.advance(ANA, now), Err(GameError::NotAuthorized));
        assert_eq!(game.state(), SessionState::QuestionActive);
        assert_eq!(game.close(BO), Err(GameError::NotAuthorized));
        assert_eq!(game.state(), SessionState::QuestionActive);
    }

    #[test]
    fn test_leave_mid_game_keeps_session() {
        let now = Instant::now();
        let mut game = started(now);

        let out = game.leave(ANA, now);
        assert_eq!(
            out[1].message,
            ServerMessage::PlayerLeft {
                nickname: "Ana".into()
            }
        );
        game.leave(BO, now);
        assert!(game.roster().is_empty());
        assert_eq!(game.state(), SessionState::QuestionActive);
        assert!(game.expire(now + Duration::from_secs(3600)).is_empty());
        assert!(game.advance(HOST, now).is_ok());
    }

    #[test]
    fn test_leave_unknown_connection_is_noop() {
        let now = Instant::now();
        let mut game = session(now);
        assert!(game.leave(42, now).is_empty());
    }

    #[test]
    fn test_host_disconnect_closes() {
        let now = Instant::now();
        let mut game = started(now);

        let out = game.disconnect(HOST, now);
        assert_eq!(
            out,
            vec![Outbound::broadcast(ServerMessage::GameClosed {
                message: HOST_LEFT_REASON.into()
            })]
        );
        assert!(game.is_closed());
        assert!(game.disconnect(HOST, now).is_empty());
        assert!(matches!(game.close(HOST), Err(GameError::InvalidState(_))));
    }

    #[test]
    fn test_empty_lobby_expires_after_grace() {
        let now = Instant::now();
        let mut game = session(now);
        let grace = SessionConfig::default().lobby_grace;

        game.join(ANA, "Ana").unwrap();
        assert!(game.expire(now + grace * 2).is_empty());

        let left_at = now + Duration::from_secs(10);
        game.leave(ANA, left_at);
        assert!(game.expire(left_at + grace).is_empty());

        let out = game.expire(left_at + grace + Duration::from_secs(1));
        assert_eq!(
            out[0].message,
            ServerMessage::GameClosed {
                message: LOBBY_EXPIRED_REASON.into()
            }
        );
        assert!(game.is_closed());
    }

    #[test]
    fn test_auto_advance_closes_round_at_deadline() {
        let now = Instant::now();
        let config = SessionConfig {
            auto_advance: true,
            ..SessionConfig::default()
        };
        let quiz = QuizDefinition::new("one", vec![Question::new("Q?", &["a", "b"], 0)]);
        let mut game = GameSession::new(
            "000001".into(),
            HOST,
            Arc::new(quiz),
            config,
            ScoringConfig::default(),
            now,
        );
        game.join(ANA, "Ana").unwrap();
        game.start(HOST, now).unwrap();

        let deadline = game.round_deadline().unwrap();
        assert!(game.expire(deadline - Duration::from_millis(1)).is_empty());
        let out = game.expire(deadline);
        assert!(matches!(
            out[0].message,
            ServerMessage::ShowRoundResults { .. }
        ));
        assert_eq!(game.state(), SessionState::RoundResults);
    }
}
