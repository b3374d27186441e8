//! transitpass - command-line client for the transit ticketing service.
//!
//! Drives every core operation (login, registration, wallet, QR codes and
//! checkout) and prints the completion events each one publishes.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use transitpass_core::config::{ENV_PASSWORD, ENV_USERNAME};
use transitpass_core::{
    callback, ApiError, CheckoutInitiator, CodeImage, CodeRenderer, Config, ErrorCorrection,
    EventSubscription, Session, SessionEvent, TicketClient,
};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "transitpass", version, about = "Transit ticket client")]
struct Cli {
    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Log in and store the session credential
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create an account, then log in with it
    Register {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the stored credential
    Logout,
    /// Show session and configuration
    Status,
    /// Issue a new ticket
    Generate {
        ticket_type: String,
        /// Render the ticket payload to a PNG QR code
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// List tickets in the wallet
    Wallet,
    /// Download the server-rendered QR code for a ticket
    Qr {
        ticket_id: String,
        /// Write the image here instead of printing a data URI
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Render a payload to a QR code locally
    Render {
        payload: String,
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
        /// Pixels per module
        #[arg(long, default_value_t = 8)]
        scale: u32,
    },
    /// Start a payment checkout for a ticket type
    Checkout {
        ticket_type: String,
        /// Open the payment page in the default browser
        #[arg(long)]
        open: bool,
    },
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize the tracing subscriber for logging
///
/// The returned guard flushes the log file on drop, so keep it alive for the
/// duration of `main`.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "transitpass.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    let mut config = Config::load().context("Failed to load config")?;
    let session = Session::new(config.api_client()?, config.credential_store()?);
    info!(base_url = %session.api().base_url(), "transitpass starting");

    match cli.cmd {
        Cmd::Login { username } => login(&session, &mut config, username).await,
        Cmd::Register { username, email } => register(&session, &mut config, username, email).await,
        Cmd::Logout => {
            session.logout();
            println!("Logged out.");
            Ok(())
        }
        Cmd::Status => {
            status(&session, &config);
            Ok(())
        }
        Cmd::Generate { ticket_type, out } => generate(&session, &ticket_type, out.as_deref()).await,
        Cmd::Wallet => wallet(&session).await,
        Cmd::Qr { ticket_id, out } => qr(&session, &ticket_id, out.as_deref()).await,
        Cmd::Render {
            payload,
            out,
            scale,
        } => {
            let image = CodeRenderer::new(ErrorCorrection::Medium, scale).render(&payload)?;
            write_image(&image, &out)
        }
        Cmd::Checkout { ticket_type, open } => checkout(&session, &ticket_type, open).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn login(session: &Session, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = resolve_username(username, config)?;
    let password = resolve_password()?;

    let mut events = session.subscribe();
    let outcome = session.login(&username, &password, None).await?;
    print_events(&mut events);

    if !outcome.success {
        bail!(outcome.message);
    }
    remember_username(config, username);
    Ok(())
}

async fn register(
    session: &Session,
    config: &mut Config,
    username: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let username = resolve_username(username, config)?;
    let password = resolve_password()?;

    let mut events = session.subscribe();
    let outcome = session
        .register(&username, email.as_deref(), &password, None)
        .await?;
    print_events(&mut events);

    if !outcome.success {
        bail!(outcome.message);
    }
    remember_username(config, username);
    Ok(())
}

fn status(session: &Session, config: &Config) {
    println!("Session:     {}", session.state().label());
    println!("Server:      {}", session.api().base_url());
    println!("Credentials: {:?}", config.credential_backend);
    if let Some(ref username) = config.last_username {
        println!("Last user:   {}", username);
    }
}

async fn generate(session: &Session, ticket_type: &str, out: Option<&Path>) -> Result<()> {
    let tickets = TicketClient::new(session.clone());
    let mut events = session.subscribe();
    let result = tickets.generate_ticket(ticket_type).await?;
    print_events(&mut events);
    let payload = check(result)?;

    println!("{}", payload);
    if let Some(path) = out {
        let image = CodeRenderer::default().render(&payload)?;
        write_image(&image, path)?;
    }
    Ok(())
}

async fn wallet(session: &Session) -> Result<()> {
    let tickets = TicketClient::new(session.clone());
    let result = tickets.fetch_tickets().await?;
    let list = check(result)?;

    if list.is_empty() {
        println!("No tickets.");
    }
    for ticket in &list {
        println!("{:<24} {}", ticket.id(), ticket.type_display());
    }
    if let Some(snapshot) = tickets.wallet_snapshot() {
        println!("({} ticket(s), fetched {})", list.len(), snapshot.age_display());
    }
    Ok(())
}

async fn qr(session: &Session, ticket_id: &str, out: Option<&Path>) -> Result<()> {
    let tickets = TicketClient::new(session.clone());
    let mut events = session.subscribe();
    let result = tickets.load_code_image(ticket_id).await?;
    print_events(&mut events);
    let image = check(result)?;

    match out {
        Some(path) => write_image(&image, path),
        None => {
            println!("{}", image.data_uri());
            Ok(())
        }
    }
}

async fn checkout(session: &Session, ticket_type: &str, open_browser: bool) -> Result<()> {
    let initiator = CheckoutInitiator::new(session.clone());
    let mut events = session.subscribe();

    let on_created = open_browser.then(|| {
        callback(|url: String| {
            if let Err(e) = open::that(&url) {
                warn!(error = %e, "Failed to open browser");
            }
        })
    });

    let result = initiator
        .create_checkout_session(ticket_type, on_created)
        .await?;
    print_events(&mut events);
    let checkout = check(result)?;

    println!("{}", checkout.url);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn resolve_username(arg: Option<String>, config: &Config) -> Result<String> {
    if let Some(username) = arg.or_else(|| std::env::var(ENV_USERNAME).ok()) {
        return Ok(username);
    }

    match config.last_username {
        Some(ref last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    let username = username.trim().to_string();

    match (username.is_empty(), &config.last_username) {
        (false, _) => Ok(username),
        (true, Some(last)) => Ok(last.clone()),
        (true, None) => bail!("Username required"),
    }
}

fn resolve_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

fn remember_username(config: &mut Config, username: String) {
    if config.last_username.as_deref() == Some(username.as_str()) {
        return;
    }
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

/// Add a re-login hint when the server refused the stored credential.
fn check<T>(result: Result<T, ApiError>) -> Result<T> {
    result.map_err(|e| {
        if e.is_auth_rejected() {
            anyhow::anyhow!("{} (run `transitpass login` again)", e)
        } else {
            e.into()
        }
    })
}

fn print_events(events: &mut EventSubscription) {
    for event in events.drain() {
        let name = event.kind().name();
        match event {
            SessionEvent::LoginFinished { success, message }
            | SessionEvent::RegisterFinished { success, message } => {
                println!("[{}] success={} {}", name, success, message)
            }
            SessionEvent::TicketGenerated { .. } => println!("[{}]", name),
            SessionEvent::TicketsFetched { tickets } => println!("[{}] {} ticket(s)", name, tickets.len()),
            SessionEvent::CheckoutSessionCreated { url } => println!("[{}] {}", name, url),
            SessionEvent::Error { message } => eprintln!("[{}] {}", name, message),
        }
    }
}

fn write_image(image: &CodeImage, path: &Path) -> Result<()> {
    std::fs::write(path, &image.data)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {} ({}, {} bytes)", path.display(), image.mime_type, image.data.len());
    Ok(())
}
