//! Kommandozeilen-Client
//!
//! `sfu-call <eigene-stream-id> <stream-id-gegenseite>`
//!
//! Konfiguration über `SFU_BASE_URL`, `SFU_APP`, `SFU_REQUEST_TIMEOUT_MS`
//! und `SFU_ICE_SERVERS`. Beenden mit Ctrl-C.

use anyhow::{bail, Context, Result};
use sfu_call::{init_tracing, CallConfig, CallEvent, CallOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(push_stream), Some(pull_stream)) = (args.next(), args.next()) else {
        bail!("usage: sfu-call <push-stream-id> <pull-stream-id>");
    };

    let config = CallConfig::from_env().context("invalid configuration")?;
    tracing::info!("Using media server {}", config.base_url);

    let orchestrator =
        CallOrchestrator::from_config(&config).context("failed to create signaling client")?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CallEvent::CallError(message) => tracing::error!("Call error: {}", message),
                CallEvent::Warning(message) => tracing::warn!("{}", message),
                other => tracing::info!("Call event: {:?}", other),
            }
        }
    });

    if let Err(e) = orchestrator.start_call(&push_stream, &pull_stream).await {
        orchestrator.release().await;
        return Err(e).context("failed to start call");
    }

    tracing::info!("Call running, press Ctrl-C to hang up");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    for warning in orchestrator.release().await {
        tracing::warn!("Teardown: {}", warning);
    }

    Ok(())
}
