use actix_web::{middleware, web, App, HttpServer};
use blip_analyzer::config::Settings;
use blip_analyzer::engine::Engines;
use blip_analyzer::server::{self, AppState};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, process};

use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: ./blip-analyzer [config file]";

fn get_args() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    match args.len() - 1 {
        0 => None,
        1 => Some(PathBuf::from(&args[1])),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config_file = get_args();
    let settings = Settings::load(config_file.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Both models are loaded once and shared by every request
    let engines = Engines::load(&settings)?;
    let timeout = settings.server.request_timeout_secs.map(Duration::from_secs);
    let state = web::Data::new(AppState::new(engines, timeout));

    let max_payload_bytes = settings.server.max_payload_bytes;
    let addr = settings.bind_addr();
    info!("serving the analyzer on http://{addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(server::configure(max_payload_bytes))
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
