//! Node orchestrator.
//!
//! Runs one overlay and bridges it onto the process's standard streams:
//! stdin lines are broadcast to the mesh, and peer output is printed.

use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;

use mesh_overlay::{Inbox, Overlay, OverlayEvent, Payload};

use crate::config::NodeConfig;
use crate::shutdown::{shutdown_channel, wait_for_shutdown, ShutdownRx, ShutdownTx};

/// The main node structure.
pub struct Node {
    /// Node configuration.
    config: NodeConfig,

    /// The overlay this node drives.
    overlay: Overlay,

    /// Read side of the overlay, taken by [`Node::run`].
    inbox: Option<Inbox>,

    /// Shutdown signal sender.
    shutdown_tx: ShutdownTx,
}

impl Node {
    /// Create a node with the given configuration.
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let (overlay, inbox) = Overlay::new(config.overlay.clone())?;
        overlay.use_named(config.middleware.as_slice())?;

        let (shutdown_tx, _) = shutdown_channel();

        Ok(Self {
            config,
            overlay,
            inbox: Some(inbox),
            shutdown_tx,
        })
    }

    /// The overlay driven by this node.
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Handle that stops [`Node::run`] without an OS signal.
    pub fn shutdown_handle(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Run the node on stdin/stdout until SIGINT, SIGTERM or the shutdown
    /// handle fires.
    pub async fn run(self) -> anyhow::Result<()> {
        let input = BufReader::new(tokio::io::stdin());
        let output = tokio::io::stdout();
        self.run_with(input, output, None).await
    }

    /// Run the node on the given streams.
    ///
    /// `bound_tx` receives the actual listen address once bound.
    pub async fn run_with<R, W>(
        mut self,
        input: R,
        output: W,
        bound_tx: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!("Starting mesh node...");
        tracing::info!("  Overlay id: {}", self.overlay.id());
        tracing::info!("  Middleware: {}", self.overlay.middleware_names().join(" -> "));
        tracing::info!("  Seeds: {}", self.config.overlay.seeds.len());

        let listener = self.overlay.listen(self.config.listen_addr).await?;
        if let Some(tx) = bound_tx {
            let _ = tx.send(listener.local_addr());
        }
        self.overlay.start();

        let events_handle = tokio::spawn(log_events(self.overlay.subscribe(), self.shutdown_tx.subscribe()));

        let input_handle = {
            let overlay = self.overlay.clone();
            let json = self.config.json_input;
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move { pump_input(overlay, input, json, shutdown_rx).await })
        };

        let output_handle = match self.inbox.take() {
            Some(inbox) => Some(tokio::spawn(async move {
                let mut output = output;
                pump_output(inbox, &mut output).await
            })),
            None => None,
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let cause = wait_for_shutdown(&mut shutdown_rx).await?;

        // Initiate shutdown
        tracing::info!(cause = %cause, "Shutting down node...");
        let _ = self.shutdown_tx.send(());
        self.overlay.shutdown().await;

        match input_handle.await {
            Ok(Ok(lines)) => tracing::info!(lines, "Input stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Input failed"),
            Err(e) => tracing::warn!(error = %e, "Input task failed"),
        }

        if let Some(handle) = output_handle {
            match handle.await {
                Ok(Ok(items)) => tracing::info!(items, "Output drained"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Output failed"),
                Err(e) => tracing::warn!(error = %e, "Output task failed"),
            }
        }

        let _ = events_handle.await;

        tracing::info!("Node shutdown complete");
        Ok(())
    }
}

/// Turn one input line into the text broadcast to peers.
///
/// Lines are newline-terminated on the wire so that `lines` middleware on the
/// receiving side can split them again. In JSON mode the line must parse and
/// is re-encoded compactly.
pub fn outgoing_line(line: &str, json: bool) -> Result<String, serde_json::Error> {
    if json {
        let value: serde_json::Value = serde_json::from_str(line)?;
        Ok(format!("{}\n", value))
    } else {
        Ok(format!("{}\n", line))
    }
}

/// Broadcast every line of `input` until it ends or shutdown is signaled.
///
/// Returns the number of lines broadcast.
pub async fn pump_input<R>(
    overlay: Overlay,
    input: R,
    json: bool,
    mut shutdown_rx: ShutdownRx,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut sent = 0;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => {
                        tracing::debug!("Input closed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match outgoing_line(&line, json) {
                    Ok(text) => {
                        let peers = overlay.write(text);
                        tracing::debug!(peers, "Line broadcast");
                        sent += 1;
                    }
                    Err(e) => tracing::warn!(error = %e, "Skipping invalid JSON line"),
                }
            }
        }
    }

    Ok(sent)
}

/// Write every inbox item to `output` until the inbox closes.
///
/// Text and JSON items are written one per line; raw bytes are copied as-is.
/// Returns the number of items written.
pub async fn pump_output<W>(mut inbox: Inbox, output: &mut W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(item) = inbox.recv().await {
        match item {
            Payload::Bytes(bytes) => output.write_all(&bytes).await?,
            Payload::Text(text) => {
                output.write_all(text.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
            Payload::Json(value) => {
                output.write_all(value.to_string().as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
        }
        output.flush().await?;
        written += 1;
    }
    Ok(written)
}

async fn log_events(mut events: broadcast::Receiver<OverlayEvent>, mut shutdown_rx: ShutdownRx) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            event = events.recv() => {
                match event {
                    Ok(OverlayEvent::PeerConnected { peer, addr }) => {
                        tracing::info!(peer = %peer, addr = ?addr, "Peer connected");
                    }
                    Ok(OverlayEvent::PeerDisconnected { peer, addr }) => {
                        tracing::info!(peer = %peer, addr = ?addr, "Peer disconnected");
                    }
                    Ok(OverlayEvent::Notice { topic, payload }) => {
                        tracing::info!(topic = %topic, payload = %payload, "Middleware notice");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event log lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
