use tracing::info;
use tracing_subscriber::EnvFilter;

mod api_entropy;
mod api_evolution;
mod api_system;
mod api_telemetry;
mod app_state;
mod bootstrap;
mod config;
mod openapi;
mod rate_limit;
mod responses;
mod router;
mod tasks;
mod telemetry_mw;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = config::Settings::from_env();
    let bind_addr = settings.bind_addr.clone();
    let state = match bootstrap::build_state(settings) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("error: failed to initialize control plane: {err:#}");
            std::process::exit(2);
        }
    };

    let background = tasks::BackgroundTasks::start(&state);
    let app = bootstrap::build_router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: failed to bind {bind_addr}: {err}");
            std::process::exit(2);
        }
    };
    info!(addr = %bind_addr, "archillx control plane listening");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());
    if let Err(err) = serve.await {
        eprintln!("error: server terminated: {err}");
    }

    background.shutdown().await;
    info!("shutdown complete");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
