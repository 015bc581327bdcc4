//! Control surface: run launcher plus HTTP routes for a dashboard.

pub mod plane;
pub mod routes;

pub use plane::ControlPlane;
pub use routes::control_routes;

use std::sync::Arc;

use tokio::net::TcpListener;

/// Serve the control routes on `listener` until the server stops.
pub async fn serve(listener: TcpListener, plane: Arc<ControlPlane>) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Control server started");
    axum::serve(listener, control_routes(plane)).await
}
