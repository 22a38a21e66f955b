mod app;
mod aqi;
mod config;
mod geo;
mod logging;
mod markers;
mod model;
mod net;
mod poll;
mod runtime;
mod storage;
mod terminal_map;
mod ui;

use anyhow::{Context, Result};
use std::sync::Arc;

use app::App;
use aqi::{AqiClient, AqiEndpoints};
use config::parse_args;
use geo::{GeoEndpoints, GeoResolver};
use logging::init as init_logging;
use markers::MarkerReconciler;
use net::{HttpTransport, Transport};
use poll::{PollLoop, Query};
use runtime::{init_terminal, restore_terminal, run_app};
use terminal_map::TerminalMap;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    let config = parse_args()?;
    let _log_guard = init_logging(&config);
    info!("aqi-tui starting");
    debug!("config path: {}", config.config_path.display());

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(config.timeout(), config.insecure, &config.user_agent)
            .context("Failed to build HTTP client")?,
    );
    let geo = GeoResolver::new(
        Arc::clone(&transport),
        GeoEndpoints {
            primary: config.geocoder_url.clone(),
            secondary: config.geocoder_fallback_url.clone(),
        },
    );
    let client = AqiClient::new(
        Arc::clone(&transport),
        geo,
        AqiEndpoints {
            waqi_base: config.waqi_base.clone(),
            token: config.waqi_token.clone(),
            relay: config.relay_url.clone(),
        },
    );

    let reconciler = MarkerReconciler::new(TerminalMap::new()).with_single_zoom(config.map_zoom);
    let poll = PollLoop::new(
        reconciler,
        Arc::new(client),
        Query::Places(config.places.clone()),
        config.refresh,
    );
    let app = App::new(
        config.places.clone(),
        config.session(),
        config.home(),
        config.refresh,
        config.config_path.clone(),
    );

    let mut terminal = init_terminal()?;
    let res = run_app(&mut terminal, app, poll);
    restore_terminal(&mut terminal)?;

    if let Err(err) = res {
        warn!("runtime error: {err}");
        eprintln!("{err}");
    }

    info!("aqi-tui exited");
    Ok(())
}
