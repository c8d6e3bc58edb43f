//! gto CLI - log in, list rooms, and play from the terminal.
//!
//! This is the main binary entry point. See the `gto` library for the core
//! functionality.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gto::constants::{CLOSE_HANDSHAKE_TIMEOUT, SESSION_COOKIE};
use gto::{
    ApiClient, Bootstrapper, Config, ConnectionEvent, GameSettings, HandoffStore, RoomSession,
    WsTransport,
};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "gto")]
#[command(version)]
#[command(about = "Terminal client for the gto drawing game")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account and store the session
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// End the session
    Logout,
    /// Renew the session cookie
    Refresh,
    /// List public rooms
    Games,
    /// Create a room and enter it
    Create {
        /// Hide the room from the public listing
        #[arg(long)]
        private: bool,
        #[arg(long, default_value_t = GameSettings::default().max_players)]
        max_players: u32,
        #[arg(long, default_value_t = GameSettings::default().rounds_count)]
        rounds: u32,
        #[arg(long, default_value_t = GameSettings::default().words_count)]
        words: u32,
        /// Seconds to pick a word
        #[arg(long, default_value_t = GameSettings::default().choosing_word_duration)]
        choosing_duration: u64,
        /// Seconds to draw
        #[arg(long, default_value_t = GameSettings::default().drawing_duration)]
        drawing_duration: u64,
    },
    /// Join a room by id
    Join {
        room_id: String,
    },
    /// Print the effective configuration
    Config,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("GTO_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

fn api_client(config: &Config) -> Result<ApiClient> {
    Ok(ApiClient::new(config.endpoints())?.with_session(config.session.clone()))
}

/// Bootstrap the room socket at `address`, then run a session on it until
/// the room closes or the user presses Ctrl-C.
async fn play(config: &Config, address: &str) -> Result<()> {
    let Some(session_token) = config.session.as_deref().filter(|s| !s.is_empty()) else {
        bail!("Not logged in. Run `gto login` first.");
    };

    let transport =
        WsTransport::new().with_header("Cookie", format!("{SESSION_COOKIE}={session_token}"));
    let store = HandoffStore::new();
    let bootstrapper = Bootstrapper::new(Arc::new(transport), store.clone());

    bootstrapper
        .bootstrap(address)
        .await
        .with_context(|| format!("Could not enter room at {address}"))?;

    let mut session =
        RoomSession::enter(&store).context("Connection opened but was not published")?;
    println!("Connected. Type a line to send it; Ctrl-C to leave.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(ConnectionEvent::Message(message)) => println!("{}", message.payload),
                Some(ConnectionEvent::Closed(info)) => {
                    println!("Room closed: {info}");
                    break;
                }
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    if let Err(e) = session.connection().send_text(line.trim()) {
                        log::warn!("[room] {e:#}");
                        break;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("[room] stdin: {e}");
                    stdin_open = false;
                }
            },
            _ = &mut ctrl_c => {
                log::info!("[room] Interrupted, leaving room");
                break;
            }
        }
    }

    if let Some(info) = session.close_and_leave(CLOSE_HANDSHAKE_TIMEOUT).await {
        log::debug!("[room] Socket closed with {info}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {panic_info}");
        default_hook(panic_info);
    }));

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Login { username, password } => {
            let mut client = api_client(&config)?;
            let token = client.login(&username, &password).await?.to_string();
            config.username = Some(username.clone());
            config.save()?;
            config.save_session(&token)?;
            println!("Logged in as {username}.");
        }
        Commands::Signup { username, password } => {
            let mut client = api_client(&config)?;
            let token = client.signup(&username, &password).await?.to_string();
            config.username = Some(username.clone());
            config.save()?;
            config.save_session(&token)?;
            println!("Account {username} created.");
        }
        Commands::Logout => {
            let mut client = api_client(&config)?;
            let result = client.logout().await;
            config.clear_session()?;
            if let Err(e) = result {
                log::warn!("[api] Server logout failed: {e}");
            }
            println!("Logged out.");
        }
        Commands::Refresh => {
            let mut client = api_client(&config)?;
            client.refresh().await?;
            if let Some(token) = client.session() {
                config.save_session(token)?;
            }
            println!("Session refreshed.");
        }
        Commands::Games => {
            let games = api_client(&config)?.public_games().await?;
            if games.is_empty() {
                println!("No public rooms.");
            }
            for game in games {
                println!(
                    "{:<12} {:>2}/{:<2} {}",
                    game.id,
                    game.players_count,
                    game.max_players,
                    if game.started { "playing" } else { "waiting" }
                );
            }
        }
        Commands::Create {
            private,
            max_players,
            rounds,
            words,
            choosing_duration,
            drawing_duration,
        } => {
            let settings = GameSettings {
                private,
                max_players,
                rounds_count: rounds,
                words_count: words,
                choosing_word_duration: choosing_duration,
                drawing_duration,
            };
            settings.validate()?;
            let address = config.endpoints().create_game(&settings)?;
            play(&config, &address).await?;
        }
        Commands::Join { room_id } => {
            let address = config.endpoints().join_room(&room_id)?;
            play(&config, &address).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("environment: {}", gto::env::Environment::current());
            println!(
                "session: {}",
                if config.has_session() { "stored" } else { "none" }
            );
        }
    }

    Ok(())
}
