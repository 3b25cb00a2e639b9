use pose_propagation::{AppError, Configuration, CoordinatorBuilder};
use std::path::PathBuf;
use tracing::{Level, info};

fn init_logging(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Runs the engine side of the file handoff until Ctrl-C.
///
/// Usage: `pose-propagation [config-file]`
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let configuration = Configuration::load(config_path.as_deref())?;
    init_logging(configuration.log_level());

    info!(
        "Serving handoff requests from {}",
        configuration.handoff_dir().display()
    );
    let coordinator = CoordinatorBuilder::new(configuration).build()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    coordinator.shutdown().await
}
