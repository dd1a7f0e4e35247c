//! Per-connection task — framing, dispatch round-trips, long-polls.
//!
//! Each accepted socket spawns a tokio task that:
//! 1. Wraps the stream in the length-prefixed MessagePack codec.
//! 2. Forwards each decoded request to the broker loop and writes the
//!    response back.
//! 3. For a long-poll ([`Outcome::Wait`]) the task parks: it races the
//!    deadline timer against the queue wake channels (and the socket,
//!    so a disconnect cancels the poll), then re-submits the request.
//!    Dropping the losing futures is the cancellation.
//! 4. On exit a [`DisconnectNotice`] tells the broker loop to run the
//!    connection-closed hook.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;

use crate::ipc::codec::{CodecError, DecodeResult, FrameCodec, decode_request};
use crate::ipc::protocol::{Request, Response};

use super::handler::{Outcome, Resume, WaitPlan};
use super::state::ConnectionId;

type ServerFramed = Framed<TcpStream, FrameCodec>;

/// Request forwarded from a connection task to the broker loop.
#[derive(Debug)]
pub struct BrokerCommand {
    pub request: Request,
    /// Present when re-submitting a parked long-poll.
    pub resume: Option<Resume>,
    pub outcome_tx: oneshot::Sender<Outcome>,
    pub conn_id: ConnectionId,
}

/// Notification sent when a connection closes.
#[derive(Debug)]
pub struct DisconnectNotice {
    pub connection_id: ConnectionId,
}

/// Connection-level errors.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("malformed frame: {0}")]
    MalformedFrame(rmp_serde::decode::Error),
    #[error("request pipelined into a pending long-poll")]
    Pipelined,
    #[error("broker loop closed")]
    BrokerGone,
    #[error("outcome channel closed")]
    OutcomeDropped,
}

/// Spawn a connection handler task.
///
/// Runs until the client disconnects or violates the protocol; either
/// way the broker loop is notified for cleanup, which aborts any
/// transient-session bookkeeping tied to this connection.
pub fn spawn_connection(
    stream: TcpStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<BrokerCommand>,
    disconnect_tx: mpsc::UnboundedSender<DisconnectNotice>,
) {
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, conn_id, cmd_tx).await {
            tracing::debug!(?conn_id, error = %e, "connection closed");
        }
        let _ = disconnect_tx.send(DisconnectNotice {
            connection_id: conn_id,
        });
    });
}

async fn handle_connection(
    stream: TcpStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<BrokerCommand>,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    loop {
        let raw = match framed.next().await {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => return Err(ConnectionError::Codec(e)),
            None => return Ok(()), // Clean disconnect.
        };
        match decode_request(&raw) {
            DecodeResult::Ok(request) => {
                serve_request(&mut framed, &cmd_tx, conn_id, request).await?;
            }
            DecodeResult::UnknownVerb(envelope) => {
                tracing::debug!(?conn_id, verb = %envelope.verb, "unknown request verb");
                framed
                    .send(Response::Error {
                        reason: "unknown_type".into(),
                    })
                    .await?;
            }
            DecodeResult::Malformed(e) => {
                return Err(ConnectionError::MalformedFrame(e));
            }
        }
    }
}

/// Run one request to completion, re-submitting long-polls until the
/// dispatcher produces a reply.
async fn serve_request(
    framed: &mut ServerFramed,
    cmd_tx: &mpsc::UnboundedSender<BrokerCommand>,
    conn_id: ConnectionId,
    request: Request,
) -> Result<(), ConnectionError> {
    let mut resume: Option<Resume> = None;
    loop {
        let outcome = dispatch(cmd_tx, request.clone(), resume.take(), conn_id).await?;
        match outcome {
            Outcome::Reply(response) => {
                framed.send(response).await?;
                return Ok(());
            }
            Outcome::ReadFile(path) => {
                let response = match tokio::fs::read(&path).await {
                    Ok(body) => Response::Get { body },
                    Err(_) => Response::Error {
                        reason: "not_found".into(),
                    },
                };
                framed.send(response).await?;
                return Ok(());
            }
            Outcome::Wait(mut plan) => match park(framed, &mut plan).await? {
                Parked::Woken | Parked::DeadlineReached => {
                    resume = Some(Resume {
                        deadline: plan.deadline,
                        watched: plan.watched,
                    });
                }
                Parked::QueueDeleted => {
                    framed
                        .send(Response::Error {
                            reason: "queue_deleted".into(),
                        })
                        .await?;
                    return Ok(());
                }
                Parked::Disconnected => {
                    // No response; the outer loop observes the EOF and
                    // the broker loop runs the close hook.
                    return Ok(());
                }
            },
        }
    }
}

#[derive(Debug)]
enum Parked {
    Woken,
    DeadlineReached,
    QueueDeleted,
    Disconnected,
}

/// Park on a wait plan until something gives: a queue wake, a queue
/// deletion, the deadline, or the peer going away. The losing futures
/// are dropped, cancelling their wake registrations.
async fn park(framed: &mut ServerFramed, plan: &mut WaitPlan) -> Result<Parked, ConnectionError> {
    let sleep = tokio::time::sleep_until(plan.deadline);
    tokio::pin!(sleep);
    tokio::select! {
        () = &mut sleep => Ok(Parked::DeadlineReached),
        woken = wait_any(&mut plan.wakes) => match woken {
            Ok(()) => Ok(Parked::Woken),
            Err(_closed) => Ok(Parked::QueueDeleted),
        },
        frame = framed.next() => match frame {
            None | Some(Err(_)) => Ok(Parked::Disconnected),
            Some(Ok(_)) => Err(ConnectionError::Pipelined),
        },
    }
}

/// Resolve as soon as any watch channel signals; an error from any
/// channel means its queue was dropped. With nothing to watch, pends
/// forever (the deadline timer bounds the park).
async fn wait_any(wakes: &mut [watch::Receiver<u64>]) -> Result<(), watch::error::RecvError> {
    if wakes.is_empty() {
        return std::future::pending().await;
    }
    let changes: Vec<_> = wakes
        .iter_mut()
        .map(|rx| Box::pin(rx.changed()))
        .collect();
    let (result, _index, _rest) = futures::future::select_all(changes).await;
    result
}

/// Forward a request to the broker loop and await its outcome.
async fn dispatch(
    cmd_tx: &mpsc::UnboundedSender<BrokerCommand>,
    request: Request,
    resume: Option<Resume>,
    conn_id: ConnectionId,
) -> Result<Outcome, ConnectionError> {
    let (outcome_tx, outcome_rx) = oneshot::channel();
    cmd_tx
        .send(BrokerCommand {
            request,
            resume,
            outcome_tx,
            conn_id,
        })
        .map_err(|_| ConnectionError::BrokerGone)?;
    outcome_rx.await.map_err(|_| ConnectionError::OutcomeDropped)
}
