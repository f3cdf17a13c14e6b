//! Routes inbound client messages to the session that owns their PIN.
//!
//! The dispatcher also remembers which game each connection belongs to so a
//! dropped connection can be reported to the right session, and turns
//! rejections into the error message the originating client expects.

use crate::error::GameError;
use crate::gateway::Gateway;
use crate::quiz::QuizLibrary;
use crate::registry::SessionRegistry;
use crate::session::SessionHandle;
use log::{debug, info};
use shared::{ClientMessage, ConnectionId, Pin, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    library: Arc<QuizLibrary>,
    gateway: Arc<dyn Gateway>,
    memberships: Arc<RwLock<HashMap<ConnectionId, Pin>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        library: Arc<QuizLibrary>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            registry,
            library,
            gateway,
            memberships: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handles one message; `received_at` is when the frame arrived.
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
        received_at: Instant,
    ) {
        let result = match &message {
            ClientMessage::CreateGame { quiz_ref } => self.create_game(connection_id, quiz_ref).await,
            ClientMessage::JoinGame { pin, nickname } => {
                self.join_game(connection_id, pin, nickname).await
            }
            ClientMessage::StartGame { pin } => match self.registry.lookup(pin).await {
                Ok(session) => session.start(connection_id).await,
                Err(e) => Err(e),
            },
            ClientMessage::NextQuestion { pin } => match self.registry.lookup(pin).await {
                Ok(session) => session.advance(connection_id).await,
                Err(e) => Err(e),
            },
            ClientMessage::SubmitAnswer {
                pin,
                question_index,
                answer_index,
            } => match self.registry.lookup(pin).await {
                Ok(session) => {
                    session
                        .submit_answer(connection_id, *question_index, *answer_index, received_at)
                        .await
                }
                Err(e) => Err(e),
            },
            ClientMessage::CloseGame { pin } => match self.registry.lookup(pin).await {
                Ok(session) => session.close(connection_id).await,
                Err(e) => Err(e),
            },
            ClientMessage::LeaveGame { pin } => self.leave_game(connection_id, pin).await,
        };

        if let Err(e) = result {
            debug!("Client {} request {:?} rejected: {}", connection_id, message, e);
            self.gateway.send(connection_id, error_reply(&message, &e));
        }
    }

    /// The session this connection currently belongs to, if it is still live.
    async fn current_session(&self, connection_id: ConnectionId) -> Option<SessionHandle> {
        let pin = self.memberships.read().await.get(&connection_id).cloned()?;
        match self.registry.lookup(&pin).await {
            Ok(session) => Some(session),
            Err(_) => {
                self.memberships.write().await.remove(&connection_id);
                None
            }
        }
    }

    async fn create_game(&self, connection_id: ConnectionId, quiz_ref: &str) -> Result<(), GameError> {
        if self.current_session(connection_id).await.is_some() {
            return Err(GameError::invalid_state("You are already in a game."));
        }
        let quiz = self.library.get(quiz_ref)?;
        let (pin, _) = self.registry.create_session(quiz, connection_id).await?;

        self.memberships
            .write()
            .await
            .insert(connection_id, pin.clone());
        self.gateway
            .send(connection_id, ServerMessage::GameCreated { pin });
        Ok(())
    }

    async fn join_game(
        &self,
        connection_id: ConnectionId,
        pin: &str,
        nickname: &str,
    ) -> Result<(), GameError> {
        if self.current_session(connection_id).await.is_some() {
            return Err(GameError::invalid_state("You are already in a game."));
        }
        let session = self.registry.lookup(pin.trim()).await?;

        // Bind first so a disconnect racing the join still reaches the session
        self.memberships
            .write()
            .await
            .insert(connection_id, session.pin().to_string());
        let result = session.join(connection_id, nickname).await;
        if result.is_err() {
            self.memberships.write().await.remove(&connection_id);
        }
        result
    }

    async fn leave_game(&self, connection_id: ConnectionId, pin: &str) -> Result<(), GameError> {
        let session = self.registry.lookup(pin).await?;
        session.leave(connection_id).await?;

        let mut memberships = self.memberships.write().await;
        if memberships.get(&connection_id).map(String::as_str) == Some(pin) {
            memberships.remove(&connection_id);
        }
        Ok(())
    }

    /// The transport lost `connection_id`; tell its session, if any.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let pin = self.memberships.write().await.remove(&connection_id);
        let Some(pin) = pin else {
            return;
        };
        if let Ok(session) = self.registry.lookup(&pin).await {
            info!("Client {} dropped from game {}", connection_id, pin);
            session.disconnect(connection_id);
        }
    }
}

/// Picks the reply a client expects for a rejected request.
pub fn error_reply(message: &ClientMessage, error: &GameError) -> ServerMessage {
    let text = error.to_string();
    match message {
        ClientMessage::JoinGame { .. } => ServerMessage::JoinError { message: text },
        ClientMessage::SubmitAnswer { .. } => ServerMessage::AnswerError { message: text },
        _ => ServerMessage::Error { message: text },
    }
}
