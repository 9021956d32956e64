use std::sync::Arc;

use invite_flow::config::FlowConfig;
use invite_flow::invitation::{InvitationRouteState, InvitationService, invitation_routes};
use invite_flow::store::{InvitationStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let port: u16 = std::env::var("INVITE_FLOW_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let db_path =
        std::env::var("INVITE_FLOW_DB_PATH").unwrap_or_else(|_| "./data/invite-flow.db".to_string());

    let config = FlowConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration: {}", e);
        std::process::exit(1);
    });

    eprintln!("✉️  Invite Flow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/invitations", port);
    eprintln!(
        "   Invitation lifetime: {} days",
        config.invitation_lifetime.num_days()
    );

    let db_path_ref = std::path::Path::new(&db_path);
    let store: Arc<dyn InvitationStore> = Arc::new(
        LibSqlBackend::new_local(db_path_ref)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );

    eprintln!("   Database: {}\n", db_path);

    let service = Arc::new(InvitationService::new(store, config.invitation_lifetime));
    let app = invitation_routes(InvitationRouteState { service });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Invitation server started");
    axum::serve(listener, app).await?;

    Ok(())
}
