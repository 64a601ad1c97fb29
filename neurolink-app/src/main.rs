//! NeuroLink: a terminal virtual pet whose state follows you across devices.
//!
//! Signs in with email / password, loads the pet from the cloud document
//! store (or creates one), then runs the pet simulation once per second while
//! reading commands from stdin. Progress is saved periodically, when leaving
//! the pet view and on quit.

mod companion;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use neurolink_sync::{
    AuthConfig, Authenticator, AutosaveConfig, AutosaveCoordinator, AutosaveEvent, FirestoreClient,
    IdentityToolkitClient, LoadOutcome, StoreConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Instant, MissedTickBehavior};

use companion::{Companion, GeminiClient, Offline, TextGenerator};
use state::{status_line, AppState, Command, Flow, HELP};

#[derive(Parser, Debug)]
#[command(name = "neurolink", about = "Terminal virtual pet with cloud saves")]
struct Args {
    /// Account email.
    #[arg(long, env = "NEUROLINK_EMAIL")]
    email: String,

    /// Account password.
    #[arg(long, env = "NEUROLINK_PASSWORD", hide_env_values = true)]
    password: String,

    /// Create the account instead of signing in.
    #[arg(long)]
    register: bool,

    /// Cloud project holding the pet documents.
    #[arg(long, env = "NEUROLINK_PROJECT_ID")]
    project_id: String,

    /// Web API key of the project (used for sign-in).
    #[arg(long, env = "NEUROLINK_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Override the documents root, e.g. a local emulator.
    #[arg(long, env = "NEUROLINK_STORE_URL")]
    store_url: Option<String>,

    /// Override the authentication endpoint.
    #[arg(long, env = "NEUROLINK_AUTH_URL")]
    auth_url: Option<String>,

    /// API key for the companion chat. Without it the companion answers with canned replies.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Generative model used by the companion.
    #[arg(long, env = "NEUROLINK_GEMINI_MODEL", default_value = companion::DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Seconds between background saves (0 disables them).
    #[arg(long, env = "NEUROLINK_AUTOSAVE_SECS", default_value_t = 30)]
    autosave_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let auth_config = match &args.auth_url {
        Some(url) => AuthConfig::with_endpoint(url, args.api_key.clone()),
        None => AuthConfig::new(args.api_key.clone()),
    }
    .context("invalid authentication settings")?;
    let auth = IdentityToolkitClient::new(&auth_config)?;
    let credential = if args.register {
        auth.sign_up(&args.email, &args.password).await
    } else {
        auth.sign_in(&args.email, &args.password).await
    }
    .context("could not sign in")?;

    let store_config = match &args.store_url {
        Some(url) => StoreConfig::with_base_url(url),
        None => StoreConfig::for_project(&args.project_id),
    }
    .context("invalid store settings")?;
    let store = Arc::new(FirestoreClient::new(&store_config)?);

    let autosave = AutosaveConfig::with_interval(Duration::from_secs(args.autosave_secs));
    let mut coordinator = AutosaveCoordinator::new(store, autosave);
    let mut events = coordinator
        .take_event_rx()
        .context("autosave event channel already taken")?;

    match coordinator.start_session(credential).await? {
        LoadOutcome::Restored => println!("welcome back!"),
        LoadOutcome::CreatedDefault => println!("a new pet has hatched!"),
        LoadOutcome::Degraded(err) => {
            warn!("could not load your pet ({err}); starting from a fresh one");
            println!("your saved pet could not be loaded; playing with a fresh one");
        }
    }

    let generator: Box<dyn TextGenerator> = match &args.gemini_api_key {
        Some(key) => Box::new(GeminiClient::new(
            companion::DEFAULT_GEMINI_ENDPOINT,
            args.gemini_model.clone(),
            key.clone(),
        )?),
        None => {
            info!("no generative-text key given; companion replies are canned");
            Box::new(Offline)
        }
    };
    let mut app = AppState::new(coordinator, Companion::new(generator));

    if let Some(pet) = app.coordinator.pet().await {
        println!("{}", status_line(&pet));
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            now = ticker.tick() => {
                let dt = now.duration_since(last_tick).as_secs_f64();
                last_tick = now;
                app.tick(dt).await;
            }
            Some(event) = events.recv() => match event {
                AutosaveEvent::SaveFailed { error, .. } => warn!("autosave failed: {error}"),
                AutosaveEvent::Saved { path } => info!("progress saved to {path}"),
                other => log::debug!("autosave event: {other:?}"),
            },
            line = lines.next_line() => {
                let command = match state::command_from_input(line) {
                    None => continue,
                    Some(Ok(command)) => command,
                    Some(Err(err)) => {
                        println!("{err}");
                        continue;
                    }
                };
                match app.execute(command).await {
                    Ok((Flow::Continue, reply)) => println!("{reply}"),
                    Ok((Flow::Quit, reply)) => {
                        println!("{reply}");
                        break;
                    }
                    Err(err) => {
                        error!("logout failed: {err:#}");
                        println!("your latest progress could not be saved");
                        break;
                    }
                }
            }
        }
    }

    if !app.is_active() {
        info!("session ended while away from the pet view");
    }
    Ok(())
}
