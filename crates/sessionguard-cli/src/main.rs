//! Sessionguard CLI - drive a token session from the command line.
//!
//! Commands: login, profile, protected, demo, status, logout. Every command
//! first resumes the session from the persisted refresh token.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionguard_core::{ApiError, Config, ResumeOutcome, SessionController, SessionEvent};

/// Directory for an additional log file, unset means stderr only
const ENV_LOG_DIR: &str = "SESSIONGUARD_LOG_DIR";

/// Concurrent fetches issued by the `demo` command
const DEMO_REQUESTS: usize = 5;

const USAGE: &str = "Usage: sessionguard <command>

Commands:
  login [email]   Sign in (prompts for the password)
  profile         Show the signed-in profile
  protected       Fetch the protected resource
  demo            Drop the access token and fetch concurrently
  status          Show whether a session is active
  logout          Sign out and forget the stored refresh token";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sessionguard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
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

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let mut config = Config::load()?;
    let controller = Arc::new(SessionController::from_config(&config)?);
    info!(command = command, "sessionguard starting");

    let resumed = controller.resume().await;

    let result = match command {
        "login" => login(&controller, &mut config, args.get(2).cloned()).await,
        "profile" => show_profile(&controller).await,
        "protected" => show_protected(&controller).await,
        "demo" => demo(&controller).await,
        "status" => {
            match resumed {
                ResumeOutcome::Authenticated(profile) => {
                    println!("Signed in as {} ({})", profile.display_name(), profile.email);
                    if let Some(session) = controller.store().get() {
                        let access = if session.has_valid_access() {
                            "valid"
                        } else {
                            "expired, refreshed on next request"
                        };
                        println!("Access token: {}", access);
                    }
                }
                ResumeOutcome::Unauthenticated => println!("Not signed in"),
            }
            Ok(())
        }
        "logout" => {
            controller.logout();
            println!("Signed out");
            Ok(())
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn prompt_username(default: Option<&str>) -> Result<String> {
    match default {
        Some(name) => print!("Email [{}]: ", name),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    let username = username.trim();
    match (username.is_empty(), default) {
        (true, Some(name)) => Ok(name.to_string()),
        _ => Ok(username.to_string()),
    }
}

async fn login(
    controller: &SessionController,
    config: &mut Config,
    email: Option<String>,
) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    if email.is_empty() || password.is_empty() {
        return Err(anyhow::anyhow!("Email and password required"));
    }

    match controller.login(&email, &password).await {
        Ok(user) => {
            config.last_username = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Login successful! Welcome, {}.", user.name);
            Ok(())
        }
        Err(ApiError::InvalidCredentials) => Err(anyhow::anyhow!("Invalid email or password")),
        Err(e) if e.is_transport() => Err(anyhow::anyhow!(
            "Unable to connect to server. Check your connection."
        )),
        Err(e) => Err(e).context("Login failed"),
    }
}

fn session_error(e: ApiError) -> anyhow::Error {
    if e.ends_session() {
        anyhow::anyhow!("Session expired. Run `sessionguard login` to sign in again.")
    } else {
        e.into()
    }
}

async fn show_profile(controller: &SessionController) -> Result<()> {
    let profile = controller.profile().await.map_err(session_error)?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

async fn show_protected(controller: &SessionController) -> Result<()> {
    let data = controller.protected_data().await.map_err(session_error)?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

/// Drop the access token, then fire several fetches at once. They should
/// share a single refresh.
async fn demo(controller: &Arc<SessionController>) -> Result<()> {
    let mut session = controller
        .store()
        .get()
        .ok_or_else(|| anyhow::anyhow!("Not signed in. Run `sessionguard login` first."))?;
    session.access = None;
    controller.store().set(session);
    controller.cache().clear();
    let mut events = controller.subscribe();

    let fetches = (0..DEMO_REQUESTS).map(|i| {
        let controller = Arc::clone(controller);
        async move {
            let result = controller.dispatcher().fetch_protected_data().await;
            (i, result)
        }
    });
    let results = futures::future::join_all(fetches).await;

    for (i, result) in results {
        match result {
            Ok(data) => println!("request {}: ok, {} items", i + 1, data.items.len()),
            Err(e) => println!("request {}: {}", i + 1, e),
        }
    }

    let mut refreshes = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Refreshed { .. }) {
            refreshes += 1;
        }
    }
    println!("{} requests, {} token refresh(es)", DEMO_REQUESTS, refreshes);
    Ok(())
}
