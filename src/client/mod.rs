//! CLI client for broker operations.
//!
//! One-shot commands connect to the broker, perform their action,
//! print the result, and exit. `tail --follow` and `serve` stay
//! connected and loop on the long-poll verbs.

mod broker_client;
mod format;

use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncReadExt;

use crate::cli::ClientCommand;
use crate::ipc::protocol::{Message, MessageId, MessageKind, TracedEvent};

use broker_client::BrokerClient;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("broker: {0}")]
    Broker(String),
    #[error("timed out waiting for reply")]
    ReplyTimeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run one client command against the broker on `port`.
pub async fn run(port: u16, action: ClientCommand) -> Result<(), ClientError> {
    let mut broker = BrokerClient::connect(port).await?;

    match action {
        ClientCommand::List { prefix } => {
            broker.login(&cli_session()).await?;
            let names = broker.list(&prefix).await?;
            format::print_queues(&names);
        }
        ClientCommand::Tail { follow } => tail(&mut broker, follow).await?,
        ClientCommand::Mscgen => {
            let events = broker.trace(-1, 0.0).await?;
            print!("{}", format::render_mscgen(&events));
        }
        ClientCommand::Ack { queue, id } => {
            broker.login(&cli_session()).await?;
            let id = MessageId(queue, id);
            broker.ack(id.clone()).await?;
            println!("acked {id}");
        }
        ClientCommand::Destroy { queue } => {
            broker.login(&cli_session()).await?;
            broker.destroy(&queue).await?;
            println!("destroyed {queue}");
        }
        ClientCommand::Diagnostics => {
            let snapshot = broker.diagnostics().await?;
            format::print_diagnostics(&snapshot)?;
        }
        ClientCommand::Call {
            queue,
            body,
            file,
            timeout,
        } => {
            let payload = match (body, file) {
                (Some(body), _) => body.into_bytes(),
                (None, Some(path)) => tokio::fs::read(path).await?,
                (None, None) => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            let reply = call_round_trip(&mut broker, &queue, payload, timeout).await?;
            format::print_payload(&reply)?;
        }
        ClientCommand::Serve { queue, program } => serve(&mut broker, &queue, program).await?,
    }

    Ok(())
}

fn cli_session() -> String {
    format!("cli-{}", std::process::id())
}

/// Cursor to poll from next: the highest event cursor seen so far.
/// Never regresses, so an empty batch re-polls from the same spot.
fn advance_cursor(from: i64, events: &[TracedEvent]) -> i64 {
    events
        .iter()
        .fold(from, |cursor, traced| cursor.max(traced.cursor as i64))
}

/// Print trace events; with `follow`, keep long-polling past the last
/// seen cursor.
async fn tail(broker: &mut BrokerClient, follow: bool) -> Result<(), ClientError> {
    let mut from = -1i64;
    loop {
        let timeout = if follow { 5.0 } else { 0.0 };
        let events = broker.trace(from, timeout).await?;
        for traced in &events {
            format::print_trace_event(traced);
        }
        from = advance_cursor(from, &events);
        if !follow {
            return Ok(());
        }
    }
}

/// RPC client: enqueue a request and long-poll the transient reply
/// queue until the correlated response arrives. Everything drained
/// from the reply queue is acked; only the matching response payload
/// is returned.
async fn call_round_trip(
    broker: &mut BrokerClient,
    queue: &str,
    payload: Vec<u8>,
    timeout: f64,
) -> Result<Vec<u8>, ClientError> {
    let session = cli_session();
    broker.login(&session).await?;
    let reply_queue = format!("{session}.reply");
    broker.create_transient(&reply_queue).await?;

    let request_id = broker
        .send(
            queue,
            Message {
                payload,
                kind: MessageKind::Request {
                    reply_to: reply_queue.clone(),
                },
            },
        )
        .await?
        .ok_or_else(|| ClientError::Broker(format!("queue {queue} does not exist")))?;

    let deadline = Instant::now() + std::time::Duration::from_secs_f64(timeout.max(0.0));
    let mut cursor: Option<String> = None;
    loop {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .as_secs_f64();
        if remaining <= 0.0 {
            return Err(ClientError::ReplyTimeout);
        }
        let result = broker
            .transfer(cursor.clone(), remaining, std::slice::from_ref(&reply_queue))
            .await?;
        cursor = Some(result.next.clone());
        for item in result.messages {
            broker.ack(item.id.clone()).await?;
            if let MessageKind::Response { in_reply_to } = &item.message.kind {
                if *in_reply_to == request_id {
                    return Ok(item.message.payload);
                }
            }
        }
    }
}

/// RPC server: long-poll a persistent queue and answer each request
/// by piping its payload through `program` (or echoing it back). The
/// request is acked only after the reply is enqueued, so a crash
/// mid-request re-delivers.
async fn serve(
    broker: &mut BrokerClient,
    queue: &str,
    program: Option<String>,
) -> Result<(), ClientError> {
    let session = format!("srv-{}", std::process::id());
    broker.login(&session).await?;
    broker.create_persistent(queue).await?;
    tracing::info!(queue, "serving");

    let queues = vec![queue.to_string()];
    let mut cursor: Option<String> = None;
    loop {
        let result = broker.transfer(cursor.clone(), 30.0, &queues).await?;
        cursor = Some(result.next.clone());
        for item in result.messages {
            let MessageKind::Request { reply_to } = &item.message.kind else {
                // Not a request; nothing to answer.
                broker.ack(item.id.clone()).await?;
                continue;
            };
            let reply = match &program {
                Some(program) => run_program(program, &item.message.payload).await?,
                None => item.message.payload.clone(),
            };
            broker
                .send(
                    reply_to,
                    Message {
                        payload: reply,
                        kind: MessageKind::Response {
                            in_reply_to: item.id.clone(),
                        },
                    },
                )
                .await?;
            broker.ack(item.id).await?;
        }
    }
}

/// Pipe `payload` through a shell command; its stdout is the reply.
async fn run_program(program: &str, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
    use tokio::io::AsyncWriteExt;

    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(payload).await?;
        // Dropping closes the pipe so the program sees EOF.
    }
    let output = child.wait_with_output().await?;
    Ok(output.stdout)
}
