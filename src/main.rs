//! gsclient - one-shot GameServer request from the command line.
//!
//! Loads the server address from a properties file, connects (resuming a
//! stored session if there is one), requests a value and prints the
//! response envelope as JSON.
//!
//! ```text
//! gsclient gameserver.properties high_score
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gameserver_client::transport::NORMAL_CLOSURE;
use gameserver_client::{
    default_session_path, Channel, ConnectionManager, Event, FileSessionStore, TcpConnector,
};

fn usage() -> String {
    format!(
        "Usage: {} <config.properties> <value>",
        env!("CARGO_BIN_NAME")
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gameserver_client=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(value)) = (args.next(), args.next()) else {
        bail!(usage());
    };

    tracing::info!("Starting gsclient v{}", env!("CARGO_PKG_VERSION"));

    let session_path = default_session_path();
    let store = FileSessionStore::open(&session_path)
        .with_context(|| format!("Failed to open session store {}", session_path.display()))?;
    let manager = ConnectionManager::new(Arc::new(TcpConnector), Arc::new(store));

    manager
        .load_config(&PathBuf::from(&config_path))
        .await
        .with_context(|| format!("Failed to load {}", config_path))?;

    let opened = manager.next_event(Channel::Open);
    let closed = manager.next_event(Channel::Close);
    manager.open_configured()?;

    tokio::select! {
        _ = opened => {}
        event = closed => {
            if let Ok(Event::Close { code, reason }) = event {
                bail!("Connection closed before open ({}): {}", code, reason);
            }
            bail!("Connection closed before open");
        }
    }

    let result = manager.get_value(value).await;
    manager.close(NORMAL_CLOSURE, "")?;

    let response = result.context("Value request failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    tracing::info!("gsclient exited cleanly");
    Ok(())
}
