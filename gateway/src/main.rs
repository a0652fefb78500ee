mod handlers;
mod state;

use crate::state::AppState;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("gateway=debug,engine=debug,axum=info")
        .init();

    let state = AppState::from_env();
    info!("sirviendo salidas desde {}", state.output_dir.display());

    // router HTTP
    let app = handlers::build_router(state);

    let listener = TcpListener::bind("0.0.0.0:8080").await.unwrap();
    info!("gateway escuchando en {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
