//! Reachability probe for the job server

use anyhow::{Context, Result};
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{info, warn};

/// How hard to try before declaring the server unreachable
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Fails unless a TCP connection to the server's host and port succeeds
pub async fn ensure_reachable(url: &str, settings: &ProbeSettings) -> Result<()> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid server URL {}", url))?;
    let host = parsed
        .host_str()
        .with_context(|| format!("Server URL {} has no host", url))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .with_context(|| format!("Server URL {} has no port", url))?;

    info!("Checking the availability of {}:{}", host, port);

    for attempt in 1..=settings.attempts {
        match time::timeout(
            settings.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        {
            Ok(Ok(_)) => {
                info!("{} is reachable", host);
                return Ok(());
            }
            Ok(Err(e)) => warn!(
                "Could not reach {}:{} (attempt {}/{}): {}",
                host, port, attempt, settings.attempts, e
            ),
            Err(_) => warn!(
                "Connecting to {}:{} timed out (attempt {}/{})",
                host, port, attempt, settings.attempts
            ),
        }

        if attempt < settings.attempts {
            time::sleep(settings.delay).await;
        }
    }

    anyhow::bail!(
        "Could not reach {} after {} attempts",
        url,
        settings.attempts
    )
}
