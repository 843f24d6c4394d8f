use std::sync::Arc;

use dotenvy::dotenv;
use tracing::{info, warn};

mod cli;
mod config;
mod db;
mod handlers;
mod imagegen;
mod state;
mod studio;
mod utils;

use cli::{parse_args, usage, Action, Invocation};
use config::CONFIG;
use db::Database;
use handlers::commands;
use state::AppState;
use studio::repository::{MemoryRepository, StudioRepository};
use utils::logging::{init_logging, LogSettings};

async fn dispatch<R: StudioRepository>(state: AppState<R>, action: Action) -> anyhow::Result<()> {
    match action {
        Action::Create(args) => commands::create_handler(&state, args).await,
        Action::Train(args) => commands::train_handler(&state, args).await,
        Action::Adopt(args) => commands::adopt_handler(&state, args).await,
        Action::Gallery { character_id } => commands::gallery_handler(&state, character_id).await,
        Action::Status { job_id } => commands::status_handler(&state, &job_id).await,
        Action::Resume => commands::resume_handler(&state).await,
        Action::Help => {
            println!("{}", usage());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let Invocation {
        action,
        owner_id,
        memory,
    } = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("{err}\n\n{}", usage());
            std::process::exit(2);
        }
    };
    if action == Action::Help {
        println!("{}", usage());
        return Ok(());
    }

    let _guards = init_logging(&LogSettings::from_env());
    for warning in &CONFIG.warnings {
        warn!("{warning}");
    }
    let settings = CONFIG.studio_settings();

    if memory {
        info!("Starting character studio with in-memory storage");
        let state = AppState::new(Arc::new(MemoryRepository::new()), settings, owner_id);
        return dispatch(state, action).await;
    }

    info!("Starting character studio ({})", CONFIG.database_url);
    let db = Database::init(&CONFIG.database_url).await?;
    db.health_check().await?;
    let state = AppState::new(Arc::new(db.clone()), settings, owner_id);
    let result = dispatch(state, action).await;
    db.close().await;
    result
}
