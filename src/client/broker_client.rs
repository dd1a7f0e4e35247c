//! Typed broker client — one async method per verb.
//!
//! Wraps a TCP stream in the framed codec and holds the wire contract
//! of strict request/response alternation, so every method is a
//! single send followed by a single receive. Long-running commands
//! (`call`, `serve`) block inside `transfer` just like any consumer.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::Codec;
use crate::ipc::protocol::{
    DiagnosticsSnapshot, Message, MessageId, Request, Response, TracedEvent, TransferItem,
};

use super::ClientError;

/// Messages plus the cursor for the next transfer.
pub struct TransferResult {
    pub messages: Vec<TransferItem>,
    pub next: String,
}

pub struct BrokerClient {
    framed: Framed<TcpStream, Codec<Response, Request>>,
}

impl BrokerClient {
    /// Connect to the broker on localhost.
    pub async fn connect(port: u16) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|e| ClientError::Broker(format!("connect to port {port}: {e}")))?;
        Ok(Self {
            framed: Framed::new(stream, Codec::new()),
        })
    }

    async fn round_trip(&mut self, request: Request) -> Result<Response, ClientError> {
        self.framed
            .send(request)
            .await
            .map_err(|e| ClientError::Broker(format!("send: {e}")))?;
        match self.framed.next().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(ClientError::Broker(format!("receive: {e}"))),
            None => Err(ClientError::Broker("connection closed by broker".into())),
        }
    }

    pub async fn login(&mut self, session: &str) -> Result<(), ClientError> {
        match self
            .round_trip(Request::Login {
                session: session.into(),
            })
            .await?
        {
            Response::Login => Ok(()),
            other => Err(unexpected("login", other)),
        }
    }

    pub async fn create_persistent(&mut self, name: &str) -> Result<(), ClientError> {
        match self
            .round_trip(Request::CreatePersistent { name: name.into() })
            .await?
        {
            Response::Create { .. } => Ok(()),
            other => Err(unexpected("create", other)),
        }
    }

    pub async fn create_transient(&mut self, name: &str) -> Result<(), ClientError> {
        match self
            .round_trip(Request::CreateTransient { name: name.into() })
            .await?
        {
            Response::Create { .. } => Ok(()),
            other => Err(unexpected("create", other)),
        }
    }

    pub async fn destroy(&mut self, name: &str) -> Result<(), ClientError> {
        match self
            .round_trip(Request::Destroy { name: name.into() })
            .await?
        {
            Response::Destroy => Ok(()),
            other => Err(unexpected("destroy", other)),
        }
    }

    /// Returns the assigned id, or `None` if the queue does not exist.
    pub async fn send(
        &mut self,
        queue: &str,
        message: Message,
    ) -> Result<Option<MessageId>, ClientError> {
        match self
            .round_trip(Request::Send {
                queue: queue.into(),
                message,
            })
            .await?
        {
            Response::Send { id } => Ok(id),
            other => Err(unexpected("send", other)),
        }
    }

    pub async fn ack(&mut self, id: MessageId) -> Result<(), ClientError> {
        match self.round_trip(Request::Ack { id }).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected("ack", other)),
        }
    }

    pub async fn transfer(
        &mut self,
        from: Option<String>,
        timeout: f64,
        queues: &[String],
    ) -> Result<TransferResult, ClientError> {
        match self
            .round_trip(Request::Transfer {
                from,
                timeout,
                queues: queues.to_vec(),
            })
            .await?
        {
            Response::Transfer { messages, next } => Ok(TransferResult { messages, next }),
            other => Err(unexpected("transfer", other)),
        }
    }

    pub async fn trace(&mut self, from: i64, timeout: f64) -> Result<Vec<TracedEvent>, ClientError> {
        match self.round_trip(Request::Trace { from, timeout }).await? {
            Response::Trace { events } => Ok(events),
            other => Err(unexpected("trace", other)),
        }
    }

    pub async fn list(&mut self, prefix: &str) -> Result<Vec<String>, ClientError> {
        match self
            .round_trip(Request::List {
                prefix: prefix.into(),
            })
            .await?
        {
            Response::List { names } => Ok(names),
            other => Err(unexpected("list", other)),
        }
    }

    pub async fn diagnostics(&mut self) -> Result<DiagnosticsSnapshot, ClientError> {
        match self.round_trip(Request::Diagnostics).await? {
            Response::Diagnostics { snapshot } => Ok(snapshot),
            other => Err(unexpected("diagnostics", other)),
        }
    }
}

fn unexpected(context: &str, response: Response) -> ClientError {
    match response {
        Response::NotLoggedIn => ClientError::Broker(format!("{context}: not logged in")),
        Response::Error { reason } => ClientError::Broker(format!("{context}: {reason}")),
        other => ClientError::Broker(format!("{context}: unexpected response: {other:?}")),
    }
}
