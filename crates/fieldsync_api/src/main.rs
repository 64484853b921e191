mod auth;
mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use fieldsync_engine::{AdapterRegistry, MemoryAdapter};
use fieldsync_protocol::EntityKind;
use fieldsync_server::SyncService;
use routes::{app_router, server_config, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fieldsync_api=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting fieldsync-api with config: {:?}", config);

    let service = Arc::new(SyncService::new(
        Arc::new(default_registry()),
        server_config(&config),
    ));
    let state = AppState::new(Arc::clone(&config), service)?;
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("fieldsync-api listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

/// In-memory adapters for every syncable kind. A deployment backed by the
/// loan database replaces these with adapters over its own services;
/// groups stay unregistered until their CRUD side exists.
fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(
        EntityKind::Clients,
        Arc::new(
            MemoryAdapter::new()
                .with_required_fields(&["clientNumber"])
                .with_delete(),
        ),
    );
    registry.register(
        EntityKind::Loans,
        Arc::new(MemoryAdapter::new().with_required_fields(&["amount"])),
    );
    registry.register(EntityKind::Visits, Arc::new(MemoryAdapter::new()));
    registry.register(EntityKind::Pledges, Arc::new(MemoryAdapter::new()));
    registry.register(EntityKind::Assessments, Arc::new(MemoryAdapter::new()));
    registry.register(
        EntityKind::Payments,
        Arc::new(MemoryAdapter::new().read_only()),
    );
    registry
}
