//! Scripted quiz participants for exercising a running server.
//!
//! Host mode creates a game, starts it after a lobby wait and advances every
//! round on a timer. Player mode joins a PIN with one or more bots that answer
//! at random.

use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};
use rand::Rng;
use server::network::{read_frame, write_frame};
use shared::{ClientMessage, LeaderboardEntry, ServerMessage};
use std::error::Error;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};

type BotResult = Result<(), Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Create a game and drive it instead of joining one
    #[arg(long)]
    host_game: bool,

    /// Quiz to host; empty picks the default quiz
    #[arg(long, default_value = "")]
    quiz: String,

    /// Seconds the host waits in the lobby before starting
    #[arg(long, default_value = "10")]
    lobby_wait_secs: u64,

    /// Seconds the host leaves each question open
    #[arg(long, default_value = "10")]
    round_secs: u64,

    /// PIN of the game to join
    #[arg(short = 'p', long)]
    pin: Option<String>,

    /// Number of players to simulate
    #[arg(short = 'b', long, default_value = "1")]
    bots: usize,

    /// Nickname prefix; bots are numbered from 1
    #[arg(short = 'n', long, default_value = "bot")]
    nickname: String,

    /// Longest time a bot thinks before answering, in milliseconds
    #[arg(short = 'd', long, default_value = "3000")]
    answer_delay_ms: u64,
}

fn print_leaderboard(leaderboard: &[LeaderboardEntry]) {
    for (rank, entry) in leaderboard.iter().enumerate() {
        info!("{:>2}. {:<20} {:>6}", rank + 1, entry.nickname, entry.score);
    }
}

async fn connect(server: &str) -> Result<(TcpStream, u32), Box<dyn Error + Send + Sync>> {
    let mut stream = TcpStream::connect(server).await?;
    match read_frame::<_, ServerMessage>(&mut stream).await? {
        Some(ServerMessage::Connected { connection_id }) => Ok((stream, connection_id)),
        Some(ServerMessage::Error { message }) => Err(message.into()),
        other => Err(format!("unexpected greeting: {:?}", other).into()),
    }
}

async fn run_host(args: Args) -> BotResult {
    let (stream, connection_id) = connect(&args.server).await?;
    info!("Connected to {} as client {}", args.server, connection_id);

    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Frame reads are not cancel-safe, so they get their own task
    tokio::spawn(async move {
        let mut reader = reader;
        while let Ok(Some(message)) = read_frame::<_, ServerMessage>(&mut reader).await {
            if tx.send(message).is_err() {
                break;
            }
        }
    });

    write_frame(
        &mut writer,
        &ClientMessage::CreateGame {
            quiz_ref: args.quiz.clone(),
        },
    )
    .await?;

    let mut pin = String::new();
    let mut pending: Option<(Instant, ClientMessage)> = None;

    loop {
        let wake_at = pending.as_ref().map(|(at, _)| *at);
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    warn!("Server closed the connection");
                    return Ok(());
                };
                match message {
                    ServerMessage::GameCreated { pin: created } => {
                        info!("Game created, PIN {}", created);
                        pin = created;
                        pending = Some((
                            Instant::now() + Duration::from_secs(args.lobby_wait_secs),
                            ClientMessage::StartGame { pin: pin.clone() },
                        ));
                    }
                    ServerMessage::UpdatePlayerList { players } => {
                        info!("Lobby: {}", players.join(", "));
                    }
                    ServerMessage::DisplayQuestion { question_index, question_total, question_text, .. } => {
                        info!("Question {} of {}: {}", question_index + 1, question_total, question_text);
                        pending = Some((
                            Instant::now() + Duration::from_secs(args.round_secs),
                            ClientMessage::NextQuestion { pin: pin.clone() },
                        ));
                    }
                    ServerMessage::AnswerCount { answered, total } => {
                        debug!("{} of {} answered", answered, total);
                    }
                    ServerMessage::ShowRoundResults { correct_answer, leaderboard, .. } => {
                        info!("Round over, correct answer was option {}", correct_answer);
                        print_leaderboard(&leaderboard);
                        pending = Some((
                            Instant::now() + Duration::from_secs(3),
                            ClientMessage::NextQuestion { pin: pin.clone() },
                        ));
                    }
                    ServerMessage::GameOver { leaderboard } => {
                        info!("Game over");
                        print_leaderboard(&leaderboard);
                        return Ok(());
                    }
                    ServerMessage::GameClosed { message } => {
                        info!("Game closed: {}", message);
                        return Ok(());
                    }
                    ServerMessage::Error { message } => {
                        warn!("Server rejected request: {}", message);
                        if pin.is_empty() {
                            return Err(message.into());
                        }
                    }
                    other => debug!("Ignoring {:?}", other),
                }
            }
            _ = async {
                if let Some(at) = wake_at {
                    sleep_until(at).await;
                }
            }, if wake_at.is_some() => {
                if let Some((_, request)) = pending.take() {
                    write_frame(&mut writer, &request).await?;
                }
            }
        }
    }
}

async fn run_bot(server: String, pin: String, nickname: String, max_delay_ms: u64) -> BotResult {
    let (mut stream, connection_id) = connect(&server).await?;
    debug!("{} connected as client {}", nickname, connection_id);

    write_frame(
        &mut stream,
        &ClientMessage::JoinGame {
            pin: pin.clone(),
            nickname: nickname.clone(),
        },
    )
    .await?;

    while let Some(message) = read_frame::<_, ServerMessage>(&mut stream).await? {
        match message {
            ServerMessage::JoinedSuccessfully { nickname: joined } => {
                info!("{} joined game {}", joined, pin);
            }
            ServerMessage::JoinError { message } => {
                return Err(format!("{} could not join: {}", nickname, message).into());
            }
            ServerMessage::DisplayQuestion {
                question_index,
                options,
                ..
            } => {
                let (delay, answer_index) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen_range(0..=max_delay_ms), rng.gen_range(0..options.len()))
                };
                sleep(Duration::from_millis(delay)).await;
                write_frame(
                    &mut stream,
                    &ClientMessage::SubmitAnswer {
                        pin: pin.clone(),
                        question_index,
                        answer_index,
                    },
                )
                .await?;
            }
            ServerMessage::AnswerError { message } => {
                debug!("{}: {}", nickname, message);
            }
            ServerMessage::ShowRoundResults { player_results, .. } => {
                if let Some(outcome) = player_results.get(&connection_id) {
                    info!(
                        "{} was {} (+{})",
                        nickname,
                        if outcome.correct { "right" } else { "wrong" },
                        outcome.score_added
                    );
                }
            }
            ServerMessage::GameOver { leaderboard } => {
                if let Some(rank) = leaderboard.iter().position(|e| e.nickname == nickname) {
                    info!("{} finished #{} with {}", nickname, rank + 1, leaderboard[rank].score);
                }
                return Ok(());
            }
            ServerMessage::GameClosed { message } => {
                info!("{}: game closed: {}", nickname, message);
                return Ok(());
            }
            _ => {}
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.host_game {
        return run_host(args).await.map_err(|e| -> Box<dyn Error> { e });
    }

    let Some(pin) = args.pin.clone() else {
        return Err("either --host-game or --pin is required".into());
    };

    let mut bots = Vec::with_capacity(args.bots);
    for i in 1..=args.bots {
        bots.push(tokio::spawn(run_bot(
            args.server.clone(),
            pin.clone(),
            format!("{}{}", args.nickname, i),
            args.answer_delay_ms,
        )));
    }

    for bot in bots {
        match bot.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Bot failed: {}", e),
            Err(e) => warn!("Bot task panicked: {}", e),
        }
    }

    Ok(())
}
