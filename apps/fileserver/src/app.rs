//! Runs the server or a client session and reports events.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{debug, info, warn};

use swiftlink_client::{ClientEvent, SwiftClient};
use swiftlink_server::{ConnectionManager, ServerEvent};
use swiftlink_transfer::{Direction, JobEvent, JobStatus};

use crate::config::Config;

/// Runs the server until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let server = ConnectionManager::new(config.server_config());
    let mut events = server
        .take_events()
        .context("server events already taken")?;

    let runner = Arc::clone(&server);
    let mut run = tokio::spawn(async move { runner.run().await });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                server.shutdown();
                break;
            }
            result = &mut run => {
                return result
                    .context("server task panicked")?
                    .context("server stopped");
            }
            Some(event) = events.recv() => log_server_event(&event),
        }
    }

    run.await
        .context("server task panicked")?
        .context("server stopped")?;
    Ok(())
}

/// Connects, sends every file, and disconnects once all transfers finished.
pub async fn send(config: Config, address: &str, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let client = SwiftClient::connect(config.client_config(address))
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    let mut events = client
        .take_events()
        .context("client events already taken")?;

    let mut pending = HashSet::new();
    for file in files {
        let id = client
            .send_file(&file)
            .await
            .with_context(|| format!("failed to start sending {}", file.display()))?;
        info!(job = %id, file = %file.display(), "sending");
        pending.insert(id);
    }

    let mut failed = 0usize;
    while !pending.is_empty() {
        let Some(event) = events.recv().await else {
            bail!("connection task stopped");
        };
        match event {
            ClientEvent::Transfer(job_event) => {
                log_job_event(None, &job_event);
                if let JobEvent::Completed(snapshot) = &job_event
                    && snapshot.direction == Direction::Transmit
                    && pending.remove(&snapshot.id)
                    && snapshot.status == JobStatus::Failed
                {
                    failed += 1;
                }
            }
            ClientEvent::Disconnected { reason } => bail!("disconnected: {reason}"),
            other => log_client_event(&other),
        }
    }

    client.disconnect().await?;
    if failed > 0 {
        bail!("{failed} transfer(s) failed");
    }
    Ok(())
}

/// Stays connected and receives files until the server ends the session or
/// Ctrl-C.
pub async fn receive(config: Config, address: &str) -> anyhow::Result<()> {
    let client = SwiftClient::connect(config.client_config(address))
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    let mut events = client
        .take_events()
        .context("client events already taken")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                client.disconnect().await?;
                return Ok(());
            }
            event = events.recv() => match event {
                Some(ClientEvent::Disconnected { reason }) => {
                    info!(reason = %reason, "session ended");
                    return Ok(());
                }
                Some(event) => log_client_event(&event),
                None => bail!("connection task stopped"),
            },
        }
    }
}

fn log_server_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected(client) => {
            info!(client = %client.id, addr = %client.addr, "client connected");
        }
        ServerEvent::ClientDisconnected { client, reason } => {
            info!(client = %client.id, reason = %reason, "client disconnected");
        }
        ServerEvent::MessageReceived { client_id, message } => {
            debug!(client = %client_id, len = message.len(), "message");
        }
        ServerEvent::Transfer { client_id, event } => log_job_event(Some(client_id), event),
    }
}

fn log_client_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected { client_id } => info!(client = %client_id, "session established"),
        ClientEvent::Disconnected { reason } => info!(reason = %reason, "disconnected"),
        ClientEvent::MessageReceived { message } => debug!(len = message.len(), "message"),
        ClientEvent::Transfer(job_event) => log_job_event(None, job_event),
    }
}

fn log_job_event(client: Option<&str>, event: &JobEvent) {
    let job = event.snapshot();
    let client = client.unwrap_or("-");
    match event {
        JobEvent::Updated(_) => {
            debug!(client, job = %job.id, status = ?job.status, "job updated");
        }
        JobEvent::Progress(_) => {
            info!(
                client,
                job = %job.id,
                percent = job.percentage(),
                bytes_per_second = job.bytes_per_second,
                eta_secs = job.eta.map(|eta| eta.as_secs()),
                "progress"
            );
        }
        JobEvent::Completed(_) if job.status == JobStatus::Success => {
            info!(
                client,
                job = %job.id,
                path = %job.file_path.display(),
                bytes = job.current_length,
                elapsed_ms = job.elapsed().as_millis() as u64,
                "transfer complete"
            );
        }
        JobEvent::Completed(_) => {
            warn!(
                client,
                job = %job.id,
                path = %job.file_path.display(),
                error = job.error.as_deref().unwrap_or("unknown"),
                "transfer failed"
            );
        }
    }
}
