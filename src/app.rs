use std::sync::Arc;

use dotenvy::dotenv;
use salvo::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{Config, DestinationKind};
use crate::handlers;
use crate::state::AppState;
use crate::utils::init_tracing;

pub async fn run() {
    let _ = dotenv();
    let config = load_config_or_exit();
    init_tracing(&config.log_level);
    warn_on_open_configuration(&config);

    let state = Arc::new(build_state_or_exit(config.clone()));

    for destination in &config.destinations {
        info!(
            phase = "destination_registered",
            destination = %destination.name,
            kind = destination.kind_name(),
            route = %format!("/{}", destination.path),
            "Registered webhook route"
        );
        if let DestinationKind::Marketing(profile) = &destination.kind {
            debug!(
                destination = %destination.name,
                properties = ?profile.schema.property_names().collect::<Vec<_>>(),
                "Marketing property mapping"
            );
        }
    }
    info!(
        "Contact relay starting on {}:{} (request log in {})",
        config.host,
        config.port,
        config.log_dir.display()
    );

    let acceptor = TcpListener::new((config.host.as_str(), config.port)).bind().await;
    Server::new(acceptor).serve(handlers::router(state)).await;
}

fn load_config_or_exit() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Configuration Error: {error}");
            std::process::exit(1);
        }
    }
}

fn warn_on_open_configuration(config: &Config) {
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set. Inbound webhooks are accepted without a shared secret.");
    }
    for destination in &config.destinations {
        if destination.api_key.is_none() {
            warn!(
                destination = %destination.name,
                "No API key configured for destination '{}'. Deliveries to it will fail.",
                destination.name
            );
        }
    }
}

fn build_state_or_exit(config: Config) -> AppState {
    match AppState::new(config) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("Initialization Error: {error}");
            std::process::exit(1);
        }
    }
}
