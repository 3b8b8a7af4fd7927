use authclient_lib::config::{AppConfig, SystemEnvironment};
use authclient_lib::logging::init_logging;
use authclient_lib::redact::redact_secrets;
use authclient_lib::secrets::{KeyringSecretStore, MemorySecretStore, SecretStore};
use authclient_lib::session::{spawn_identity_poll, SessionController};
use authclient_lib::types::AuthState;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "authclient", version, about = "Username/password API client")]
struct Cli {
    /// Keep tokens in process memory instead of the OS keychain.
    #[arg(long, global = true)]
    memory_store: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the token pair.
    Login {
        #[arg(long, env = "AUTHCLIENT_USERNAME")]
        username: String,
        #[arg(long, env = "AUTHCLIENT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Print the signed-in profile.
    Me,
    /// Print the session status.
    Status,
    /// Restore the session and keep polling the profile until Ctrl-C.
    Watch,
    /// Forget stored tokens.
    Logout,
}

fn secret_store(config: &AppConfig, memory: bool) -> Arc<dyn SecretStore> {
    if memory {
        return Arc::new(MemorySecretStore::new());
    }
    let keyring = KeyringSecretStore::new(config.keyring_service.clone());
    if keyring.is_available() {
        Arc::new(keyring)
    } else {
        warn!("OS keychain/secret service is unavailable; tokens will not outlive this process");
        Arc::new(MemorySecretStore::new())
    }
}

fn describe(state: &AuthState) -> String {
    match state {
        AuthState::Loading => "loading".to_string(),
        AuthState::Unauthenticated => "signed out".to_string(),
        AuthState::Authenticated { user, .. } => {
            format!("signed in as {} ({})", user.display_name(), user.username)
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<(), String> {
    let store = secret_store(&config, cli.memory_store);
    let session = SessionController::from_config(&config, store).map_err(|e| e.to_string())?;
    let mut poll = None;

    match cli.command {
        Command::Login { username, password } => {
            let user = session
                .sign_in(&username, &password)
                .await
                .map_err(|e| e.to_string())?;
            println!("signed in as {} ({})", user.display_name(), user.username);
        }
        Command::Me => {
            let state = session.bootstrap().await;
            let Some(user) = state.user() else {
                return Err("not signed in".to_string());
            };
            let json = serde_json::to_string_pretty(user).map_err(|e| e.to_string())?;
            println!("{json}");
        }
        Command::Status => {
            println!("{}", describe(&session.bootstrap().await));
        }
        Command::Watch => {
            let state = session.bootstrap().await;
            println!("{}", describe(&state));

            poll = Some(spawn_identity_poll(&session, config.poll_interval));
            let mut state_rx = session.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() { break; }
                        let state = state_rx.borrow_and_update().clone();
                        println!("{}", describe(&state));
                        if !state.is_authenticated() { break; }
                    }
                }
            }
        }
        Command::Logout => {
            session.logout().await;
            println!("signed out");
        }
    }

    session.shutdown().await;
    if let Some(poll) = poll {
        if let Err(e) = poll.await {
            warn!(error = %e, "identity poll task failed");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let config = match AppConfig::from_env(&SystemEnvironment) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", redact_secrets(&msg));
            ExitCode::FAILURE
        }
    }
}
