//! # Quiz Server Library
//!
//! This library provides the authoritative server for PIN-joined, real-time
//! multiplayer quizzes. A host creates a game and receives a PIN, players join
//! with that PIN and a nickname, and the host drives the quiz question by
//! question while the server scores every answer and publishes results.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game State
//! Every decision is made here: who is in a game, which question is open,
//! whether an answer counts and how many points it earns. Clients only render
//! what the server tells them.
//!
//! ### Session Lifecycle
//! Handles the complete life of a game:
//! - PIN allocation and lookup
//! - Lobby, question, results and game-over phases
//! - Host and player disconnects
//! - Teardown and PIN reuse
//!
//! ### Scoring
//! Correct answers earn points that decay with response time, floored at a
//! configurable fraction of the base points. Late and wrong answers earn
//! nothing, and no answer is ever credited twice.
//!
//! ## Architecture Design
//!
//! ### One Actor Per Session
//! Each live game runs in its own tokio task that owns its state outright.
//! Requests, disconnects and timer ticks reach it through one channel, so
//! everything that happens to a PIN happens in order, while separate games
//! run fully in parallel.
//!
//! ### Delivery Through a Gateway
//! Sessions never touch sockets. Outbound messages go through the
//! [`gateway::Gateway`] trait; the TCP server implements it with a queue, and
//! tests use [`gateway::MemoryGateway`] to inspect what every connection saw.
//!
//! ### TCP Framing
//! Each message on the wire is a big-endian `u32` length followed by a bincode
//! payload. Oversized or malformed frames drop the connection.
//!
//! ## Module Organization
//!
//! - `config`: server, registry, session and scoring settings
//! - `error`: recoverable game errors and invariant violations
//! - `roster`: players, nicknames and recorded answers
//! - `scoring`: time-decayed points, round results and leaderboards
//! - `game`: the per-session state machine
//! - `session`: the actor wrapping a game and its handle
//! - `registry`: PIN allocation and live session lookup
//! - `quiz`: the named quiz library loaded from JSON
//! - `gateway`: outbound delivery seam
//! - `dispatch`: routing of client messages to sessions
//! - `client_manager`: accepted connections and their outbound queues
//! - `network`: the TCP server and frame I/O
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::quiz::QuizLibrary;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     config.validate()?;
//!
//!     // Accepts connections, routes messages to sessions and delivers
//!     // everything the sessions send back
//!     let mut server = Server::new(&config, QuizLibrary::new()).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod gateway;
pub mod network;
pub mod quiz;
pub mod registry;
pub mod roster;
pub mod scoring;
pub mod session;
