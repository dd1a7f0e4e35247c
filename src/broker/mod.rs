//! Message switch broker — queue directory, sessions, long-polls.
//!
//! The broker listens on a TCP socket and carries named, ordered,
//! in-memory message queues. Producers enqueue onto queues; consumers
//! long-poll a set of queues past a cursor, ack what they processed,
//! and optionally enqueue a correlated reply. Per-session transient
//! queues are destroyed when their session loses its last connection.
//!
//! Architecture: channel-based actor. A single broker loop owns all
//! mutable state ([`state::BrokerState`]). Per-connection tasks
//! forward requests via mpsc channels; blocking verbs park in the
//! connection task and re-submit, so the loop itself never suspends.

mod clock;
mod connection;
mod directory;
pub mod handler;
mod queue;
mod relation;
pub mod state;
mod trace;

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use connection::{BrokerCommand, DisconnectNotice};
use state::{BrokerState, ConnectionId, SwitchConfig};

/// Broker startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the broker until SIGTERM or SIGINT.
///
/// The listener is taken pre-bound so callers can order binding
/// before daemonizing: concurrent clients never observe
/// connection-refused between fork and listen.
pub async fn run(listener: TcpListener, config: SwitchConfig) -> Result<(), BrokerError> {
    tracing::info!(addr = %listener.local_addr()?, "switch listening");

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<BrokerCommand>();
    let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel::<DisconnectNotice>();

    let mut state = BrokerState::new(config);

    // Graceful shutdown on SIGTERM or SIGINT.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    loop {
        tokio::select! {
            // -- New connection --
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        accept_connection(stream, addr, &cmd_tx, &disconnect_tx);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }

            // -- Request from a connection task --
            Some(cmd) = cmd_rx.recv() => {
                let outcome = handler::handle_request(
                    &mut state,
                    cmd.request,
                    cmd.conn_id,
                    cmd.resume,
                );
                let _ = cmd.outcome_tx.send(outcome);
            }

            // -- Connection closed --
            Some(notice) = disconnect_rx.recv() => {
                state.remove_connection(notice.connection_id);
                tracing::debug!(conn_id = ?notice.connection_id, "connection cleaned up");
            }

            // -- Shutdown signals --
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    tracing::info!("switch stopped");
    Ok(())
}

/// Accept a new connection — assign an id and spawn its task.
fn accept_connection(
    stream: TcpStream,
    addr: SocketAddr,
    cmd_tx: &mpsc::UnboundedSender<BrokerCommand>,
    disconnect_tx: &mpsc::UnboundedSender<DisconnectNotice>,
) {
    let conn_id = ConnectionId::new();
    connection::spawn_connection(stream, conn_id, cmd_tx.clone(), disconnect_tx.clone());
    tracing::debug!(?conn_id, peer = %addr, "accepted connection");
}
