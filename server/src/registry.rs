//! PIN allocation and lookup of live sessions.

use crate::config::{RegistryConfig, ScoringConfig, SessionConfig};
use crate::error::GameError;
use crate::game::GameSession;
use crate::gateway::Gateway;
use crate::session::{spawn_session, SessionHandle};
use log::{info, warn};
use rand::Rng;
use shared::{ConnectionId, Pin, QuizDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Maps each active PIN to the session that owns it.
///
/// The map lock is only held to insert, look up or remove an entry; session
/// work itself happens in the session actors, so a slow session never blocks
/// lookups for other PINs.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Pin, SessionHandle>>,
    config: RegistryConfig,
    session_config: SessionConfig,
    scoring_config: ScoringConfig,
    gateway: Arc<dyn Gateway>,
}

impl SessionRegistry {
    pub fn new(
        config: RegistryConfig,
        session_config: SessionConfig,
        scoring_config: ScoringConfig,
        gateway: Arc<dyn Gateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            session_config,
            scoring_config,
            gateway,
        })
    }

    /// Allocates a fresh PIN and starts a lobby owned by `host`.
    pub async fn create_session(
        self: &Arc<Self>,
        quiz: Arc<QuizDefinition>,
        host: ConnectionId,
    ) -> Result<(Pin, SessionHandle), GameError> {
        let mut sessions = self.sessions.write().await;
        let pin = self.allocate_pin(&sessions)?;

        let game = GameSession::new(
            pin.clone(),
            host,
            quiz,
            self.session_config.clone(),
            self.scoring_config.clone(),
            Instant::now(),
        );
        let handle = spawn_session(
            game,
            Arc::clone(&self.gateway),
            Arc::clone(self),
            self.session_config.tick_interval,
        );
        sessions.insert(pin.clone(), handle.clone());

        info!(
            "Game created by client {} with PIN {} ({} live)",
            host,
            pin,
            sessions.len()
        );
        Ok((pin, handle))
    }

    fn allocate_pin(&self, sessions: &HashMap<Pin, SessionHandle>) -> Result<Pin, GameError> {
        let space = self.config.pin_space();
        if sessions.len() as u64 >= space {
            warn!("PIN space of {} exhausted", space);
            return Err(GameError::RegistryExhausted);
        }

        let width = self.config.pin_length as usize;
        let mut rng = rand::thread_rng();
        for _ in 0..self.config.max_attempts {
            let pin = format!("{:0width$}", rng.gen_range(0..space), width = width);
            if !sessions.contains_key(&pin) {
                return Ok(pin);
            }
        }

        warn!(
            "No free PIN after {} attempts ({} live)",
            self.config.max_attempts,
            sessions.len()
        );
        Err(GameError::RegistryExhausted)
    }

    pub async fn lookup(&self, pin: &str) -> Result<SessionHandle, GameError> {
        let sessions = self.sessions.read().await;
        sessions.get(pin).cloned().ok_or(GameError::NotFound)
    }

    /// Forgets a PIN so it can be reused. Safe to call more than once.
    pub async fn destroy(&self, pin: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(pin).is_some();
        if removed {
            info!("PIN {} retired ({} live)", pin, sessions.len());
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn pins(&self) -> Vec<Pin> {
        let mut pins: Vec<Pin> = self.sessions.read().await.keys().cloned().collect();
        pins.sort();
        pins
    }
}
