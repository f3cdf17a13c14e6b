//! Player roster of a single game session
//!
//! The roster owns every player of one session and enforces the rules that
//! keep the lobby and the leaderboard unambiguous:
//! - players are kept in join order for roster and tie-break display
//! - nicknames are unique within the session, compared case-insensitively
//! - each connection holds at most one seat
//!
//! Scores only ever grow through [`Player::award`], which records the points
//! per question so a round can never be credited twice.

use crate::error::GameError;
use shared::ConnectionId;
use std::collections::BTreeMap;
use std::time::Instant;

/// A submitted answer and the instant the server received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Answer {
    pub index: usize,
    pub at: Instant,
}

/// A joined player and their per-round answer state
#[derive(Debug, Clone)]
pub struct Player {
    /// Connection that owns this seat
    pub connection_id: ConnectionId,
    /// Display name, trimmed, unique within the session
    pub nickname: String,
    /// Cumulative score, equal to the sum of `awards`
    pub score: u32,
    /// Answer for the round currently open, if any
    pub current_answer: Option<Answer>,
    /// Points credited per question index
    awards: BTreeMap<usize, u32>,
}

impl Player {
    pub fn new(connection_id: ConnectionId, nickname: String) -> Self {
        Self {
            connection_id,
            nickname,
            score: 0,
            current_answer: None,
            awards: BTreeMap::new(),
        }
    }

    pub fn has_answered(&self) -> bool {
        self.current_answer.is_some()
    }

    pub fn record_answer(&mut self, index: usize, at: Instant) {
        self.current_answer = Some(Answer { index, at });
    }

    pub fn clear_answer(&mut self) {
        self.current_answer = None;
    }

    /// Credits `points` for `question_index` exactly once.
    ///
    /// Returns false and leaves the score untouched when the question was
    /// already scored for this player.
    pub fn award(&mut self, question_index: usize, points: u32) -> bool {
        if self.awards.contains_key(&question_index) {
            return false;
        }
        self.awards.insert(question_index, points);
        self.score = self.score.saturating_add(points);
        true
    }

    pub fn is_scored(&self, question_index: usize) -> bool {
        self.awards.contains_key(&question_index)
    }

    /// Points credited for one question, if it has been scored.
    pub fn awarded_for(&self, question_index: usize) -> Option<u32> {
        self.awards.get(&question_index).copied()
    }

    /// Sum of every recorded award.
    pub fn audited_score(&self) -> u64 {
        self.awards.values().map(|p| *p as u64).sum()
    }

    pub fn scored_questions(&self) -> impl Iterator<Item = usize> + '_ {
        self.awards.keys().copied()
    }
}

/// Case-folded form under which two nicknames count as the same.
pub fn nickname_key(nickname: &str) -> String {
    nickname.to_lowercase()
}

/// Ordered set of players currently joined to a session.
#[derive(Debug, Clone)]
pub struct Roster {
    players: Vec<Player>,
    max_nickname_len: usize,
}

impl Roster {
    pub fn new(max_nickname_len: usize) -> Self {
        Self {
            players: Vec::new(),
            max_nickname_len,
        }
    }

    /// Normalizes a requested nickname, rejecting unusable ones.
    pub fn validate_nickname(&self, nickname: &str) -> Result<String, GameError> {
        let trimmed = nickname.trim();
        if trimmed.is_empty() {
            return Err(GameError::NicknameInvalid(
                "Nickname cannot be empty.".to_string(),
            ));
        }
        if trimmed.chars().count() > self.max_nickname_len {
            return Err(GameError::NicknameInvalid(format!(
                "Nickname cannot exceed {} characters.",
                self.max_nickname_len
            )));
        }
        if self.nickname_taken(trimmed) {
            return Err(GameError::DuplicateNickname);
        }
        Ok(trimmed.to_string())
    }

    pub fn nickname_taken(&self, nickname: &str) -> bool {
        let wanted = nickname_key(nickname);
        self.players
            .iter()
            .any(|p| nickname_key(&p.nickname) == wanted)
    }

    /// Seats a new player at the end of the roster and returns the stored nickname.
    pub fn add(&mut self, connection_id: ConnectionId, nickname: &str) -> Result<String, GameError> {
        if self.contains(connection_id) {
            return Err(GameError::invalid_state("You already joined this game."));
        }
        let nickname = self.validate_nickname(nickname)?;
        self.players
            .push(Player::new(connection_id, nickname.clone()));
        Ok(nickname)
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Player> {
        let position = self
            .players
            .iter()
            .position(|p| p.connection_id == connection_id)?;
        Some(self.players.remove(position))
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.get(connection_id).is_some()
    }

    /// Nicknames in join order.
    pub fn nicknames(&self) -> Vec<String> {
        self.players.iter().map(|p| p.nickname.clone()).collect()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.players.iter().map(|p| p.connection_id).collect()
    }

    pub fn clear_answers(&mut self) {
        for player in &mut self.players {
            player.clear_answer();
        }
    }

    pub fn answered_count(&self) -> usize {
        self.players.iter().filter(|p| p.has_answered()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
