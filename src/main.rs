use crate::{
    backend::ProviderDirectory, configuration::Configuration,
    configuration_handler::ConfigurationHandler, directory::StaticDirectory, http::create_app,
    local_schedule::LocalSchedule, remote_schedule::RemoteSchedule,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod availability_stream;
mod availability_view;
mod backend;
mod booking_coordinator;
mod configuration;
mod configuration_handler;
mod directory;
mod error;
mod http;
mod local_schedule;
mod remote_schedule;
mod selection_session;
#[cfg(test)]
mod testutils;
mod types;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("##################");
    println!("# Booking Client #");
    println!("##################");

    let configuration = ConfigurationHandler::parse_arguments();
    let directory = Arc::new(StaticDirectory);

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(?err, "Failed to bind {address}");
            return;
        }
    };
    println!("Accessible at:\n{address}");

    let app = if let Some(backend_url) = configuration.backend_url() {
        info!(%backend_url, "Using remote appointment service");
        create_app(RemoteSchedule::new(&backend_url), directory)
    } else {
        info!("No backend url configured, using in-process schedule with example slots");
        let backend = LocalSchedule::default();
        let provider_ids: Vec<_> = directory
            .providers()
            .iter()
            .map(|provider| provider.id)
            .collect();
        backend.insert_example_slots(&provider_ids, configuration.example_days());
        for &provider_id in &provider_ids {
            info!(provider_id, slots = backend.slots(provider_id).len(), "Local schedule ready");
        }
        create_app(backend, directory)
    };

    if let Err(err) = axum::serve(listener, app).await {
        error!(?err, "Server stopped");
    }
}
