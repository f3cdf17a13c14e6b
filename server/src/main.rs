use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::config::{RegistryConfig, ScoringConfig, ServerConfig, SessionConfig};
use server::network::Server;
use server::quiz::QuizLibrary;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "512")]
    max_clients: usize,

    /// Number of digits in a game PIN
    #[arg(long, default_value = "6")]
    pin_length: u32,

    /// JSON file with additional quizzes
    #[arg(short, long)]
    quiz_file: Option<PathBuf>,

    /// Points for an instant correct answer
    #[arg(long, default_value = "1000")]
    base_points: u32,

    /// Seconds a question stays worth points
    #[arg(long, default_value = "20")]
    time_budget_secs: u64,

    /// Lowest share of the base points a correct answer can earn
    #[arg(long, default_value = "0.1")]
    min_fraction: f64,

    /// Seconds an empty lobby is kept before it is closed
    #[arg(long, default_value = "300")]
    lobby_grace_secs: u64,

    /// Close rounds automatically when the answer window runs out
    #[arg(long)]
    auto_advance: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            max_clients: self.max_clients,
            quiz_file: self.quiz_file,
            registry: RegistryConfig {
                pin_length: self.pin_length,
                ..RegistryConfig::default()
            },
            session: SessionConfig {
                lobby_grace: Duration::from_secs(self.lobby_grace_secs),
                auto_advance: self.auto_advance,
                ..SessionConfig::default()
            },
            scoring: ScoringConfig {
                base_points: self.base_points,
                time_budget: Duration::from_secs(self.time_budget_secs),
                min_fraction: self.min_fraction,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    config.validate()?;

    let library = match &config.quiz_file {
        Some(path) => QuizLibrary::load(path)?,
        None => QuizLibrary::new(),
    };
    info!("Quizzes available: {}", library.names().join(", "));

    let mut server = Server::new(&config, library).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
