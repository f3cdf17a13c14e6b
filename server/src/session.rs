//! Per-session actor
//!
//! Each live game runs in its own tokio task that exclusively owns its
//! [`GameSession`]. Requests, disconnects and timer ticks all arrive through a
//! single command channel, so operations on one PIN execute one at a time in
//! arrival order while different PINs never contend with each other.
//!
//! Every request carries a oneshot reply. The reply is sent only after the
//! resulting messages have been handed to the gateway, and after the registry
//! entry is gone when the request closed the session.

use crate::error::GameError;
use crate::game::{GameSession, Outbound, Recipient, SessionState, INTERNAL_ERROR_REASON};
use crate::gateway::Gateway;
use crate::registry::SessionRegistry;
use log::{debug, error, info};
use shared::{ConnectionId, LeaderboardEntry, Pin};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

/// Operations a connection can request from a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOp {
    Join { nickname: String },
    Leave,
    Disconnect,
    Start,
    Advance,
    SubmitAnswer {
        question_index: usize,
        answer_index: usize,
        received_at: Instant,
    },
    Close,
}

#[derive(Debug)]
pub enum SessionCommand {
    Request {
        connection_id: ConnectionId,
        op: SessionOp,
        reply: Option<oneshot::Sender<Result<(), GameError>>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Read-only view of a session at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub pin: Pin,
    pub host: ConnectionId,
    pub state: SessionState,
    pub current_question: usize,
    pub question_total: usize,
    pub players: Vec<String>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl SessionSnapshot {
    fn of(game: &GameSession) -> Self {
        Self {
            pin: game.pin().to_string(),
            host: game.host(),
            state: game.state(),
            current_question: game.current_question(),
            question_total: game.quiz().len(),
            players: game.roster().nicknames(),
            leaderboard: game.leaderboard(),
        }
    }
}

/// Cloneable address of a running session actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pin: Pin,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// Sends a request and waits for the session's verdict.
    ///
    /// A session that has already shut down answers `NotFound`.
    pub async fn request(
        &self,
        connection_id: ConnectionId,
        op: SessionOp,
    ) -> Result<(), GameError> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(SessionCommand::Request {
                connection_id,
                op,
                reply: Some(reply),
            })
            .map_err(|_| GameError::NotFound)?;
        verdict.await.map_err(|_| GameError::NotFound)?
    }

    pub async fn join(&self, connection_id: ConnectionId, nickname: &str) -> Result<(), GameError> {
        self.request(
            connection_id,
            SessionOp::Join {
                nickname: nickname.to_string(),
            },
        )
        .await
    }

    pub async fn leave(&self, connection_id: ConnectionId) -> Result<(), GameError> {
        self.request(connection_id, SessionOp::Leave).await
    }

    pub async fn start(&self, connection_id: ConnectionId) -> Result<(), GameError> {
        self.request(connection_id, SessionOp::Start).await
    }

    pub async fn advance(&self, connection_id: ConnectionId) -> Result<(), GameError> {
        self.request(connection_id, SessionOp::Advance).await
    }

    pub async fn close(&self, connection_id: ConnectionId) -> Result<(), GameError> {
        self.request(connection_id, SessionOp::Close).await
    }

    pub async fn submit_answer(
        &self,
        connection_id: ConnectionId,
        question_index: usize,
        answer_index: usize,
        received_at: Instant,
    ) -> Result<(), GameError> {
        self.request(
            connection_id,
            SessionOp::SubmitAnswer {
                question_index,
                answer_index,
                received_at,
            },
        )
        .await
    }

    /// Notifies the session that a connection is gone. Does not wait.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let _ = self.commands.send(SessionCommand::Request {
            connection_id,
            op: SessionOp::Disconnect,
            reply: None,
        });
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, GameError> {
        let (reply, snapshot) = oneshot::channel();
        self.commands
            .send(SessionCommand::Snapshot { reply })
            .map_err(|_| GameError::NotFound)?;
        snapshot.await.map_err(|_| GameError::NotFound)
    }

    /// Resolves once the session task has finished tearing down.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Starts the actor for `game` and returns its handle.
pub fn spawn_session(
    game: GameSession,
    gateway: Arc<dyn Gateway>,
    registry: Arc<SessionRegistry>,
    tick_interval: Duration,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        pin: game.pin().to_string(),
        commands: tx,
    };
    tokio::spawn(run_session(game, rx, gateway, registry, tick_interval));
    handle
}

fn apply(game: &mut GameSession, connection_id: ConnectionId, op: SessionOp) -> Result<Vec<Outbound>, GameError> {
    let now = Instant::now();
    match op {
        SessionOp::Join { nickname } => game.join(connection_id, &nickname),
        SessionOp::Leave => Ok(game.leave(connection_id, now)),
        SessionOp::Disconnect => Ok(game.disconnect(connection_id, now)),
        SessionOp::Start => game.start(connection_id, now),
        SessionOp::Advance => game.advance(connection_id, now),
        SessionOp::SubmitAnswer {
            question_index,
            answer_index,
            received_at,
        } => game.submit_answer(connection_id, question_index, answer_index, received_at),
        SessionOp::Close => game.close(connection_id),
    }
}

fn deliver(game: &GameSession, gateway: &dyn Gateway, outbound: Vec<Outbound>) {
    for Outbound { recipient, message } in outbound {
        match recipient {
            Recipient::Connection(connection_id) => gateway.send(connection_id, message),
            Recipient::Session => {
                for connection_id in game.recipients() {
                    gateway.send(connection_id, message.clone());
                }
            }
        }
    }
}

/// Force-closes a session whose bookkeeping went wrong.
fn enforce_invariants(game: &mut GameSession, gateway: &dyn Gateway) {
    if let Err(violation) = game.check_invariants() {
        error!("{}", violation);
        let outbound = game.force_close(INTERNAL_ERROR_REASON);
        deliver(game, gateway, outbound);
    }
}

async fn run_session(
    mut game: GameSession,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    gateway: Arc<dyn Gateway>,
    registry: Arc<SessionRegistry>,
    tick_interval: Duration,
) {
    let pin = game.pin().to_string();
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    ticker.tick().await;

    info!("Session {} running", pin);

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(SessionCommand::Request { connection_id, op, reply }) => {
                        let verdict = match apply(&mut game, connection_id, op.clone()) {
                            Ok(outbound) => {
                                deliver(&game, gateway.as_ref(), outbound);
                                enforce_invariants(&mut game, gateway.as_ref());
                                Ok(())
                            }
                            Err(e) => {
                                debug!("Game {} rejected {:?} from {}: {}", pin, op, connection_id, e);
                                Err(e)
                            }
                        };

                        if game.is_closed() {
                            registry.destroy(&pin).await;
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(verdict);
                        }
                    }
                    Some(SessionCommand::Snapshot { reply }) => {
                        let _ = reply.send(SessionSnapshot::of(&game));
                    }
                    None => {
                        // Every handle is gone, including the registry's
                        game.force_close(INTERNAL_ERROR_REASON);
                    }
                }
            }
            _ = ticker.tick() => {
                let outbound = game.expire(Instant::now());
                if !outbound.is_empty() {
                    deliver(&game, gateway.as_ref(), outbound);
                    enforce_invariants(&mut game, gateway.as_ref());
                }
                if game.is_closed() {
                    registry.destroy(&pin).await;
                }
            }
        }

        if game.is_closed() {
            break;
        }
    }

    info!("Session {} torn down", pin);
}
