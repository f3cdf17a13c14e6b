//! Server network layer handling TCP connections and message routing

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::gateway::{Gateway, OutboundQueue, Outgoing};
use crate::quiz::QuizLibrary;
use crate::registry::SessionRegistry;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{
    decode_payload, encode_frame, frame_len, ClientMessage, ConnectionId, FrameError,
    ServerMessage, FRAME_HEADER_SIZE,
};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

pub const SERVER_FULL_REASON: &str = "Server full";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Reads one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, NetworkError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = frame_len(header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(decode_payload(&payload)?))
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum NetworkEvent {
    ClientDisconnected { client_id: ConnectionId },
}

/// Main server accepting connections and wiring them to the dispatcher
pub struct Server {
    listener: TcpListener,
    clients: Arc<RwLock<ClientManager>>,
    dispatcher: Dispatcher,

    // Communication channels
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    outgoing_rx: Option<mpsc::UnboundedReceiver<Outgoing>>,
}

impl Server {
    pub async fn new(config: &ServerConfig, library: QuizLibrary) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let gateway: Arc<dyn Gateway> = Arc::new(OutboundQueue::new(outgoing_tx));
        let registry = SessionRegistry::new(
            config.registry.clone(),
            config.session.clone(),
            config.scoring.clone(),
            Arc::clone(&gateway),
        );
        let dispatcher = Dispatcher::new(registry, Arc::new(library), gateway);

        Ok(Server {
            listener,
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            dispatcher,
            event_tx,
            event_rx,
            outgoing_rx: Some(outgoing_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.dispatcher.registry()
    }

    /// Spawns task that routes session output to each connection's writer
    fn spawn_network_sender(&mut self) {
        let Some(mut outgoing_rx) = self.outgoing_rx.take() else {
            return;
        };
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            while let Some(Outgoing {
                connection_id,
                message,
            }) = outgoing_rx.recv().await
            {
                let mut clients_guard = clients.write().await;
                clients_guard.send_to(connection_id, message);
            }
        });
    }

    /// Registers an accepted socket and starts its reader and writer tasks
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

        let client_id = {
            let mut clients = self.clients.write().await;
            let client_id = clients.add_client(addr, tx);
            if let Some(client_id) = client_id {
                clients.send_to(
                    client_id,
                    ServerMessage::Connected {
                        connection_id: client_id,
                    },
                );
            }
            client_id
        };

        let Some(client_id) = client_id else {
            warn!("Rejecting connection from {}: server full", addr);
            tokio::spawn(async move {
                let response = ServerMessage::Error {
                    message: SERVER_FULL_REASON.to_string(),
                };
                if let Err(e) = write_frame(&mut writer, &response).await {
                    debug!("Failed to notify {}: {}", addr, e);
                }
            });
            return;
        };

        // Writer ends once the client is removed and its queue is dropped
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &message).await {
                    debug!("Write to client {} failed: {}", client_id, e);
                    break;
                }
            }
        });

        let dispatcher = self.dispatcher.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                match read_frame::<_, ClientMessage>(&mut reader).await {
                    Ok(Some(message)) => {
                        let received_at = Instant::now();
                        debug!("Client {} sent {:?}", client_id, message);
                        dispatcher.dispatch(client_id, message, received_at).await;
                    }
                    Ok(None) => {
                        debug!("Client {} closed the connection", client_id);
                        break;
                    }
                    Err(e) => {
                        warn!("Dropping client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            dispatcher.disconnect(client_id).await;
            if let Err(e) = event_tx.send(NetworkEvent::ClientDisconnected { client_id }) {
                error!("Failed to report disconnect of client {}: {}", client_id, e);
            }
        });
    }

    /// Main server loop accepting connections and retiring dropped ones
    pub async fn run(&mut self) -> Result<(), NetworkError> {
        self.spawn_network_sender();

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.handle_connection(stream, addr).await,
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                event = self.event_rx.recv() => {
                    match event {
                        Some(NetworkEvent::ClientDisconnected { client_id }) => {
                            let mut clients = self.clients.write().await;
                            clients.remove_client(&client_id);
                        }
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MAX_FRAME_SIZE;
    use tokio::io::duplex;
    use tokio::time::{timeout, Duration};

    async fn spawn_server(max_clients: usize) -> SocketAddr {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_clients,
            ..ServerConfig::default()
        };
        let mut server = Server::new(&config, QuizLibrary::new()).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });
        addr
    }

    async fn next_message(stream: &mut TcpStream) -> ServerMessage {
        timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .expect("timed out waiting for server")
            .unwrap()
            .expect("connection closed")
    }

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = duplex(1024);
        let message = ClientMessage::JoinGame {
            pin: "123456".into(),
            nickname: "Ana".into(),
        };

        write_frame(&mut a, &message).await.unwrap();
        let received: Option<ClientMessage> = read_frame(&mut b).await.unwrap();
        assert_eq!(received, Some(message));
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (a, mut b) = duplex(64);
        drop(a);
        let received: Option<ClientMessage> = read_frame(&mut b).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut a, mut b) = duplex(64);
        let len = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();

        let result: Result<Option<ClientMessage>, _> = read_frame(&mut b).await;
        assert!(matches!(
            result,
            Err(NetworkError::Frame(FrameError::TooLarge(_)))
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_error() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(&[1, 2, 3]).await.unwrap();
        drop(a);

        let result: Result<Option<ClientMessage>, _> = read_frame(&mut b).await;
        assert!(matches!(result, Err(NetworkError::Io(_))));
    }

    #[tokio::test]
    async fn test_server_greets_connection() {
        let addr = spawn_server(4).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        let ServerMessage::Connected { connection_id: a } = next_message(&mut first).await else {
            panic!("Expected greeting");
        };
        let ServerMessage::Connected { connection_id: b } = next_message(&mut second).await else {
            panic!("Expected greeting");
        };
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_server_full() {
        let addr = spawn_server(1).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            next_message(&mut first).await,
            ServerMessage::Connected { .. }
        ));

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(
            next_message(&mut second).await,
            ServerMessage::Error {
                message: SERVER_FULL_REASON.into()
            }
        );
    }

    #[tokio::test]
    async fn test_create_game_over_tcp() {
        let addr = spawn_server(4).await;
        let mut host = TcpStream::connect(addr).await.unwrap();
        next_message(&mut host).await;

        write_frame(
            &mut host,
            &ClientMessage::CreateGame {
                quiz_ref: String::new(),
            },
        )
        .await
        .unwrap();

        match next_message(&mut host).await {
            ServerMessage::GameCreated { pin } => assert_eq!(pin.len(), 6),
            other => panic!("Expected GameCreated, got {:?}", other),
        }
    }
}
