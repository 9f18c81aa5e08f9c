use std::time::Duration;
use tracing::{error, info};
use crankpower::{ConsoleSink, PowerMeterSession, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 Crankpower Collection Example");

    let mut session = PowerMeterSession::from_env().await?;

    // Optional duration override in seconds as the first argument
    let duration = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .map_or(session.config().collection_duration, Duration::from_secs);

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    match session.run_until(duration, &mut ConsoleSink, shutdown).await {
        Ok(summary) => {
            info!(
                "✅ {} readings ({} with cadence), {} frames skipped",
                summary.readings_emitted, summary.cadence_readings, summary.frames_skipped
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ Session failed: {}", e);
            Err(e)
        }
    }
}
