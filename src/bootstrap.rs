//! Process wiring: logging, config, control plane and HTTP listener.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::client::{CaptchaSolver, ClientFactory};
use crate::config::{AppConfig, ControlConfig, SessionConfig};
use crate::control::{self, ControlPlane};
use crate::error::Result;
use crate::logging::{self, LogConfig};

/// Everything needed to bring the service up.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub control: ControlConfig,
    pub log: LogConfig,
}

/// A control plane with its listener bound, ready to serve.
pub struct Prepared {
    pub plane: Arc<ControlPlane>,
    pub listener: TcpListener,
}

/// Load the config file, read session overrides from the environment and
/// bind `global.server`.
pub async fn prepare(
    control: ControlConfig,
    factory: Arc<dyn ClientFactory>,
    solver: Arc<dyn CaptchaSolver>,
) -> Result<Prepared> {
    let config = AppConfig::load(&control.config_path)?;
    let session = SessionConfig::from_env();
    let listener = TcpListener::bind(&config.global.server).await?;
    info!(
        addr = %listener.local_addr()?,
        poll_secs = session.poll_interval.as_secs(),
        heartbeat_secs = session.heartbeat_interval.as_secs(),
        "Service prepared"
    );

    let plane = ControlPlane::new(config, control, factory, solver, session);
    Ok(Prepared { plane, listener })
}

/// Initialize logging, prepare the service and serve until the listener
/// fails.
pub async fn run(
    options: BootstrapOptions,
    factory: Arc<dyn ClientFactory>,
    solver: Arc<dyn CaptchaSolver>,
) -> anyhow::Result<()> {
    let _guard = logging::init(&options.log)?;
    let Prepared { plane, listener } = prepare(options.control, factory, solver).await?;
    control::serve(listener, plane).await?;
    Ok(())
}
