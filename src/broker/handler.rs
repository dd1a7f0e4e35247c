//! Request dispatch — routes the ten verbs over [`BrokerState`].
//!
//! Pure logic, no I/O, and no suspension: the broker loop calls
//! [`handle_request`] for every request, and blocking verbs come back
//! as an [`Outcome::Wait`] that the connection task parks on before
//! re-submitting the request (carrying [`Resume`]) so each re-peek
//! happens under loop serialization. `Get` comes back as
//! [`Outcome::ReadFile`] for the same reason: the loop never touches
//! the filesystem.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::ipc::protocol::{
    Message, MessageId, MessageKind, Request, Response, TraceEvent, TraceItem, TransferItem,
};

use super::queue::Entry;
use super::state::{BrokerState, ConnectionId};

/// What the broker loop hands back to the connection task.
#[derive(Debug)]
pub enum Outcome {
    Reply(Response),
    /// Long-poll found nothing yet: park until a wake or the deadline,
    /// then re-submit the request.
    Wait(WaitPlan),
    /// Get: read this file and answer with its contents.
    ReadFile(PathBuf),
}

/// Wait primitives for a parked long-poll.
#[derive(Debug)]
pub struct WaitPlan {
    /// One receiver per watched queue (or the trace ring). A closed
    /// receiver means its queue was deleted.
    pub wakes: Vec<watch::Receiver<u64>>,
    /// Names behind `wakes`; re-submitted so the dispatcher can tell
    /// a queue deleted mid-wait from one that never existed.
    pub watched: Vec<String>,
    pub deadline: Instant,
}

/// Carried by a re-submitted long-poll request.
#[derive(Debug, Clone)]
pub struct Resume {
    pub deadline: Instant,
    pub watched: Vec<String>,
}

/// Dispatch one request.
///
/// Verbs accepted without a session: Login, Get, Trace, Diagnostics.
/// Everything else answers `NotLoggedIn` on a session-less connection.
pub fn handle_request(
    state: &mut BrokerState,
    request: Request,
    conn: ConnectionId,
    resume: Option<Resume>,
) -> Outcome {
    let session = state.session_of(conn);
    match request {
        Request::Login { session } => {
            state.login(conn, session);
            Outcome::Reply(Response::Login)
        }
        Request::Get { path } => match state.resolve_asset(&path) {
            Some(resolved) => Outcome::ReadFile(resolved),
            None => Outcome::Reply(error("not_found")),
        },
        Request::Trace { from, timeout } => handle_trace(state, from, timeout, resume),
        Request::Diagnostics => Outcome::Reply(Response::Diagnostics {
            snapshot: state.diagnostics(),
        }),
        Request::CreatePersistent { name } => {
            let Some(_) = session else {
                return Outcome::Reply(Response::NotLoggedIn);
            };
            state.directory_mut().add(&name);
            Outcome::Reply(Response::Create { name })
        }
        Request::CreateTransient { name } => {
            let Some(session) = session else {
                return Outcome::Reply(Response::NotLoggedIn);
            };
            state.register_transient(&session, &name);
            state.directory_mut().add(&name);
            Outcome::Reply(Response::Create { name })
        }
        Request::Destroy { name } => {
            let Some(_) = session else {
                return Outcome::Reply(Response::NotLoggedIn);
            };
            state.directory_mut().remove(&name);
            Outcome::Reply(Response::Destroy)
        }
        Request::Send { queue, message } => {
            let Some(session) = session else {
                return Outcome::Reply(Response::NotLoggedIn);
            };
            handle_send(state, &session, conn, queue, message)
        }
        Request::Ack { id } => {
            let Some(session) = session else {
                return Outcome::Reply(Response::NotLoggedIn);
            };
            handle_ack(state, &session, id)
        }
        Request::Transfer {
            from,
            timeout,
            queues,
        } => {
            let Some(session) = session else {
                return Outcome::Reply(Response::NotLoggedIn);
            };
            handle_transfer(state, &session, from, timeout, queues, resume)
        }
        Request::List { prefix } => {
            let Some(_) = session else {
                return Outcome::Reply(Response::NotLoggedIn);
            };
            Outcome::Reply(Response::List {
                names: state.directory().list(&prefix),
            })
        }
    }
}

// -- Individual handlers --

fn handle_send(
    state: &mut BrokerState,
    session: &str,
    conn: ConnectionId,
    queue: String,
    message: Message,
) -> Outcome {
    let origin = state.origin_of(conn);
    let now_ns = state.now_ns();
    let time = state.wall_seconds();
    let Some(q) = state.directory_mut().find_mut(&queue) else {
        // A missing queue is not an error and is not created.
        return Outcome::Reply(Response::Send { id: None });
    };
    let id = q.enqueue(origin, message.clone(), now_ns);
    state.trace_mut().append(TraceEvent {
        time,
        input: Some(session.to_string()),
        output: None,
        queue,
        item: TraceItem::Message {
            id: id.clone(),
            message,
        },
        processing_ns: None,
    });
    Outcome::Reply(Response::Send { id: Some(id) })
}

fn handle_ack(state: &mut BrokerState, session: &str, id: MessageId) -> Outcome {
    let time = state.wall_seconds();
    state.trace_mut().append(TraceEvent {
        time,
        input: Some(session.to_string()),
        output: None,
        queue: id.queue().to_string(),
        item: TraceItem::Ack { id: id.clone() },
        processing_ns: None,
    });
    // A missing queue or index is silently ignored.
    if let Some(q) = state.directory_mut().find_mut(id.queue()) {
        q.ack(id.index());
    }
    Outcome::Reply(Response::Ack)
}

fn handle_transfer(
    state: &mut BrokerState,
    session: &str,
    from: Option<String>,
    timeout: f64,
    queues: Vec<String>,
    resume: Option<Resume>,
) -> Outcome {
    let cursor: i64 = match &from {
        None => -1,
        Some(s) => match s.parse() {
            Ok(c) => c,
            Err(_) => return Outcome::Reply(error("invalid_cursor")),
        },
    };
    let timeout = sanitize_timeout(timeout);

    let deadline = match &resume {
        Some(r) => r.deadline,
        None => {
            // First pass: stamp the diagnostic deadline on every
            // requested queue.
            let expected_ns = state.now_ns() + (timeout * 1e9) as u64;
            for name in &queues {
                if let Some(q) = state.directory_mut().find_mut(name) {
                    q.set_next_transfer_expected(expected_ns);
                }
            }
            Instant::now() + Duration::from_secs_f64(timeout)
        }
    };

    // Peek every requested queue; names not in the directory
    // contribute nothing.
    let mut batch: Vec<(MessageId, Entry)> = Vec::new();
    for name in &queues {
        if let Some(q) = state.directory().find(name) {
            for (index, entry) in q.peek_after(cursor) {
                batch.push((MessageId(name.clone(), index), entry.clone()));
            }
        }
    }

    if !batch.is_empty() {
        return Outcome::Reply(deliver(state, session, cursor, batch));
    }

    if Instant::now() >= deadline {
        return Outcome::Reply(Response::Transfer {
            messages: Vec::new(),
            next: from.unwrap_or_else(|| "-1".to_string()),
        });
    }

    // A queue we were parked on has vanished: deleted mid-wait.
    if let Some(r) = &resume {
        if r.watched
            .iter()
            .any(|name| state.directory().find(name).is_none())
        {
            return Outcome::Reply(error("queue_deleted"));
        }
    }

    let mut wakes = Vec::new();
    let mut watched = Vec::new();
    for name in &queues {
        if let Some(q) = state.directory().find(name) {
            wakes.push(q.subscribe());
            watched.push(name.clone());
        }
    }
    Outcome::Wait(WaitPlan {
        wakes,
        watched,
        deadline,
    })
}

/// Package a non-empty batch and record one delivery trace event per
/// message, correlating responses back to their still-queued requests
/// for the processing-time measurement.
fn deliver(
    state: &mut BrokerState,
    session: &str,
    cursor: i64,
    batch: Vec<(MessageId, Entry)>,
) -> Response {
    let now_ns = state.now_ns();
    let time = state.wall_seconds();
    let mut messages = Vec::with_capacity(batch.len());
    let mut max_index: i64 = cursor;
    for (id, entry) in batch {
        max_index = max_index.max(id.index() as i64);
        let processing_ns = match &entry.message.kind {
            MessageKind::Response { in_reply_to } => state
                .directory()
                .find(in_reply_to.queue())
                .and_then(|q| q.find(in_reply_to.index()))
                .map(|request| now_ns.saturating_sub(request.enqueued_at_ns)),
            MessageKind::Request { .. } => None,
        };
        state.trace_mut().append(TraceEvent {
            time,
            input: None,
            output: Some(session.to_string()),
            queue: id.queue().to_string(),
            item: TraceItem::Message {
                id: id.clone(),
                message: entry.message.clone(),
            },
            processing_ns,
        });
        messages.push(TransferItem {
            id,
            message: entry.message,
        });
    }
    Response::Transfer {
        messages,
        next: max_index.to_string(),
    }
}

fn handle_trace(
    state: &mut BrokerState,
    from: i64,
    timeout: f64,
    resume: Option<Resume>,
) -> Outcome {
    let events = state.trace().get_after(from);
    if !events.is_empty() {
        return Outcome::Reply(Response::Trace { events });
    }
    let timeout = sanitize_timeout(timeout);
    let deadline = match resume {
        Some(r) => r.deadline,
        None => Instant::now() + Duration::from_secs_f64(timeout),
    };
    if Instant::now() >= deadline {
        return Outcome::Reply(Response::Trace { events: Vec::new() });
    }
    Outcome::Wait(WaitPlan {
        wakes: vec![state.trace().subscribe()],
        watched: Vec::new(),
        deadline,
    })
}

// -- Helpers --

/// Clamp a client-supplied timeout into a sane non-negative range.
fn sanitize_timeout(timeout: f64) -> f64 {
    const MAX_TIMEOUT_SECS: f64 = 86_400.0;
    if timeout.is_finite() && timeout > 0.0 {
        timeout.min(MAX_TIMEOUT_SECS)
    } else {
        0.0
    }
}

fn error(reason: &str) -> Response {
    Response::Error {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::state::SwitchConfig;
    use crate::ipc::protocol::{Origin, TracedEvent};

    fn fresh() -> (BrokerState, ConnectionId) {
        (BrokerState::new(SwitchConfig::default()), ConnectionId::new())
    }

    fn logged_in(session: &str) -> (BrokerState, ConnectionId) {
        let (mut s, c) = fresh();
        handle_request(
            &mut s,
            Request::Login {
                session: session.into(),
            },
            c,
            None,
        );
        (s, c)
    }

    fn reply(outcome: Outcome) -> Response {
        match outcome {
            Outcome::Reply(resp) => resp,
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    fn request_msg(reply_to: &str) -> Message {
        Message {
            payload: b"ping".to_vec(),
            kind: MessageKind::Request {
                reply_to: reply_to.into(),
            },
        }
    }

    fn response_msg(in_reply_to: MessageId) -> Message {
        Message {
            payload: b"pong".to_vec(),
            kind: MessageKind::Response { in_reply_to },
        }
    }

    fn create(state: &mut BrokerState, conn: ConnectionId, name: &str) {
        reply(handle_request(
            state,
            Request::CreatePersistent { name: name.into() },
            conn,
            None,
        ));
    }

    fn send(state: &mut BrokerState, conn: ConnectionId, queue: &str, msg: Message) -> Option<MessageId> {
        match reply(handle_request(
            state,
            Request::Send {
                queue: queue.into(),
                message: msg,
            },
            conn,
            None,
        )) {
            Response::Send { id } => id,
            other => panic!("expected Send, got {other:?}"),
        }
    }

    fn transfer(
        state: &mut BrokerState,
        conn: ConnectionId,
        from: Option<&str>,
        timeout: f64,
        queues: &[&str],
    ) -> Outcome {
        handle_request(
            state,
            Request::Transfer {
                from: from.map(String::from),
                timeout,
                queues: queues.iter().map(|q| q.to_string()).collect(),
            },
            conn,
            None,
        )
    }

    // -- Session gating --

    #[test]
    fn gated_verbs_require_login() {
        let (mut s, c) = fresh();
        let gated = vec![
            Request::CreatePersistent { name: "q".into() },
            Request::CreateTransient { name: "q".into() },
            Request::Destroy { name: "q".into() },
            Request::Send {
                queue: "q".into(),
                message: request_msg("r"),
            },
            Request::Ack {
                id: MessageId("q".into(), 1),
            },
            Request::Transfer {
                from: None,
                timeout: 0.0,
                queues: vec!["q".into()],
            },
            Request::List { prefix: "".into() },
        ];
        for req in gated {
            let resp = reply(handle_request(&mut s, req.clone(), c, None));
            assert_eq!(resp, Response::NotLoggedIn, "verb {req:?}");
        }
    }

    #[test]
    fn open_verbs_work_without_login() {
        let (mut s, c) = fresh();
        assert!(matches!(
            reply(handle_request(&mut s, Request::Diagnostics, c, None)),
            Response::Diagnostics { .. }
        ));
        assert!(matches!(
            reply(handle_request(
                &mut s,
                Request::Trace {
                    from: -1,
                    timeout: 0.0
                },
                c,
                None
            )),
            Response::Trace { .. }
        ));
    }

    #[test]
    fn login_enables_gated_verbs() {
        let (mut s, c) = logged_in("alice");
        let resp = reply(handle_request(
            &mut s,
            Request::List { prefix: "".into() },
            c,
            None,
        ));
        assert_eq!(resp, Response::List { names: vec![] });
    }

    // -- Create / Destroy / List --

    #[test]
    fn create_persistent_is_idempotent() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        send(&mut s, c, "svc", request_msg("r"));
        create(&mut s, c, "svc");
        // Contents survived the second create.
        assert_eq!(s.directory().find("svc").unwrap().contents().count(), 1);
    }

    #[test]
    fn destroy_removes_queue() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        reply(handle_request(
            &mut s,
            Request::Destroy { name: "svc".into() },
            c,
            None,
        ));
        assert!(s.directory().find("svc").is_none());
        // Destroying again is fine.
        let resp = reply(handle_request(
            &mut s,
            Request::Destroy { name: "svc".into() },
            c,
            None,
        ));
        assert_eq!(resp, Response::Destroy);
    }

    #[test]
    fn create_transient_registers_for_reclamation() {
        let (mut s, c) = logged_in("t");
        reply(handle_request(
            &mut s,
            Request::CreateTransient { name: "tq".into() },
            c,
            None,
        ));
        assert!(s.directory().find("tq").is_some());
        s.remove_connection(c);
        assert!(s.directory().find("tq").is_none());
    }

    #[test]
    fn list_filters_by_prefix() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc.a");
        create(&mut s, c, "svc.b");
        create(&mut s, c, "other");
        let resp = reply(handle_request(
            &mut s,
            Request::List {
                prefix: "svc.".into(),
            },
            c,
            None,
        ));
        assert_eq!(
            resp,
            Response::List {
                names: vec!["svc.a".into(), "svc.b".into()]
            }
        );
    }

    // -- Send / Ack --

    #[test]
    fn send_assigns_sequential_ids() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        assert_eq!(
            send(&mut s, c, "svc", request_msg("r")),
            Some(MessageId("svc".into(), 1))
        );
        assert_eq!(
            send(&mut s, c, "svc", request_msg("r")),
            Some(MessageId("svc".into(), 2))
        );
    }

    #[test]
    fn send_to_missing_queue_returns_none_without_creating() {
        let (mut s, c) = logged_in("alice");
        assert_eq!(send(&mut s, c, "ghost", request_msg("r")), None);
        assert!(s.directory().find("ghost").is_none());
    }

    #[test]
    fn send_stamps_named_origin() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        send(&mut s, c, "svc", request_msg("r"));
        let entry = s.directory().find("svc").unwrap().find(1).unwrap();
        assert_eq!(
            entry.origin,
            Origin::Named {
                session: "alice".into()
            }
        );
    }

    #[test]
    fn ack_removes_message() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        let id = send(&mut s, c, "svc", request_msg("r")).unwrap();
        reply(handle_request(&mut s, Request::Ack { id }, c, None));
        match reply(transfer(&mut s, c, None, 0.0, &["svc"])) {
            Response::Transfer { messages, .. } => assert!(messages.is_empty()),
            other => panic!("expected Transfer, got {other:?}"),
        }
    }

    #[test]
    fn ack_missing_queue_is_silent() {
        let (mut s, c) = logged_in("alice");
        let resp = reply(handle_request(
            &mut s,
            Request::Ack {
                id: MessageId("ghost".into(), 5),
            },
            c,
            None,
        ));
        assert_eq!(resp, Response::Ack);
    }

    // -- Transfer --

    #[test]
    fn transfer_returns_immediate_batch_in_order() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        send(&mut s, c, "svc", request_msg("r"));
        send(&mut s, c, "svc", request_msg("r"));
        match reply(transfer(&mut s, c, None, 10.0, &["svc"])) {
            Response::Transfer { messages, next } => {
                let indices: Vec<u64> = messages.iter().map(|m| m.id.index()).collect();
                assert_eq!(indices, vec![1, 2]);
                assert_eq!(next, "2");
            }
            other => panic!("expected Transfer, got {other:?}"),
        }
    }

    #[test]
    fn transfer_cursor_skips_delivered() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        for _ in 0..3 {
            send(&mut s, c, "svc", request_msg("r"));
        }
        match reply(transfer(&mut s, c, Some("1"), 0.0, &["svc"])) {
            Response::Transfer { messages, next } => {
                let indices: Vec<u64> = messages.iter().map(|m| m.id.index()).collect();
                assert_eq!(indices, vec![2, 3]);
                assert_eq!(next, "3");
            }
            other => panic!("expected Transfer, got {other:?}"),
        }
    }

    #[test]
    fn transfer_same_cursor_is_idempotent() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        send(&mut s, c, "svc", request_msg("r"));
        let first = reply(transfer(&mut s, c, None, 0.0, &["svc"]));
        let second = reply(transfer(&mut s, c, None, 0.0, &["svc"]));
        match (first, second) {
            (
                Response::Transfer { messages: m1, .. },
                Response::Transfer { messages: m2, .. },
            ) => assert_eq!(m1, m2),
            other => panic!("expected Transfers, got {other:?}"),
        }
    }

    #[test]
    fn transfer_empty_with_zero_timeout_returns_from() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "empty");
        match reply(transfer(&mut s, c, None, 0.0, &["empty"])) {
            Response::Transfer { messages, next } => {
                assert!(messages.is_empty());
                assert_eq!(next, "-1");
            }
            other => panic!("expected Transfer, got {other:?}"),
        }
        match reply(transfer(&mut s, c, Some("7"), 0.0, &["empty"])) {
            Response::Transfer { next, .. } => assert_eq!(next, "7"),
            other => panic!("expected Transfer, got {other:?}"),
        }
    }

    #[test]
    fn transfer_empty_with_budget_parks() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "x");
        create(&mut s, c, "y");
        match transfer(&mut s, c, None, 5.0, &["x", "y", "ghost"]) {
            Outcome::Wait(plan) => {
                // Only existing queues are watched.
                assert_eq!(plan.wakes.len(), 2);
                assert_eq!(plan.watched, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("expected Wait, got {other:?}"),
        }
    }

    #[test]
    fn transfer_invalid_cursor_is_an_error() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        match reply(transfer(&mut s, c, Some("abc"), 0.0, &["svc"])) {
            Response::Error { reason } => assert_eq!(reason, "invalid_cursor"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn resumed_transfer_detects_deleted_queue() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "z");
        let plan = match transfer(&mut s, c, None, 5.0, &["z"]) {
            Outcome::Wait(plan) => plan,
            other => panic!("expected Wait, got {other:?}"),
        };
        s.directory_mut().remove("z");
        let outcome = handle_request(
            &mut s,
            Request::Transfer {
                from: None,
                timeout: 5.0,
                queues: vec!["z".into()],
            },
            c,
            Some(Resume {
                deadline: plan.deadline,
                watched: plan.watched,
            }),
        );
        match reply(outcome) {
            Response::Error { reason } => assert_eq!(reason, "queue_deleted"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn transfer_stamps_next_transfer_expected() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        transfer(&mut s, c, None, 0.5, &["svc"]);
        assert!(
            s.directory()
                .find("svc")
                .unwrap()
                .next_transfer_expected()
                .is_some()
        );
    }

    // -- Trace --

    fn trace_events(state: &mut BrokerState, conn: ConnectionId) -> Vec<TracedEvent> {
        match reply(handle_request(
            state,
            Request::Trace {
                from: -1,
                timeout: 0.0,
            },
            conn,
            None,
        )) {
            Response::Trace { events } => events,
            other => panic!("expected Trace, got {other:?}"),
        }
    }

    #[test]
    fn send_and_ack_are_traced() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        let id = send(&mut s, c, "svc", request_msg("r")).unwrap();
        reply(handle_request(&mut s, Request::Ack { id }, c, None));
        let events = trace_events(&mut s, c);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event.item, TraceItem::Message { .. }));
        assert_eq!(events[0].event.input.as_deref(), Some("alice"));
        assert!(matches!(events[1].event.item, TraceItem::Ack { .. }));
    }

    #[test]
    fn delivery_is_traced_with_output_session() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        send(&mut s, c, "svc", request_msg("r"));
        reply(transfer(&mut s, c, None, 0.0, &["svc"]));
        let events = trace_events(&mut s, c);
        let delivery = events.last().unwrap();
        assert_eq!(delivery.event.output.as_deref(), Some("alice"));
        assert_eq!(delivery.event.input, None);
        // Requests never carry a processing time.
        assert_eq!(delivery.event.processing_ns, None);
    }

    #[test]
    fn response_delivery_measures_processing_time() {
        let (mut s, c) = logged_in("b");
        create(&mut s, c, "svc");
        create(&mut s, c, "reply");
        let req_id = send(&mut s, c, "svc", request_msg("reply")).unwrap();
        send(&mut s, c, "reply", response_msg(req_id.clone()));
        reply(transfer(&mut s, c, None, 0.0, &["reply"]));
        let events = trace_events(&mut s, c);
        let delivery = events.last().unwrap();
        assert!(delivery.event.processing_ns.is_some());
    }

    #[test]
    fn processing_time_is_absent_once_request_is_acked() {
        let (mut s, c) = logged_in("b");
        create(&mut s, c, "svc");
        create(&mut s, c, "reply");
        let req_id = send(&mut s, c, "svc", request_msg("reply")).unwrap();
        reply(handle_request(
            &mut s,
            Request::Ack { id: req_id.clone() },
            c,
            None,
        ));
        send(&mut s, c, "reply", response_msg(req_id));
        reply(transfer(&mut s, c, None, 0.0, &["reply"]));
        let events = trace_events(&mut s, c);
        assert_eq!(events.last().unwrap().event.processing_ns, None);
    }

    #[test]
    fn trace_cursor_pagination() {
        let (mut s, c) = logged_in("alice");
        create(&mut s, c, "svc");
        send(&mut s, c, "svc", request_msg("r"));
        send(&mut s, c, "svc", request_msg("r"));
        let all = trace_events(&mut s, c);
        assert_eq!(all.len(), 2);
        let last = all.last().unwrap().cursor;
        match reply(handle_request(
            &mut s,
            Request::Trace {
                from: last as i64,
                timeout: 0.0,
            },
            c,
            None,
        )) {
            Response::Trace { events } => assert!(events.is_empty()),
            other => panic!("expected Trace, got {other:?}"),
        }
    }

    #[test]
    fn trace_with_budget_and_no_events_parks() {
        let (mut s, c) = fresh();
        match handle_request(
            &mut s,
            Request::Trace {
                from: -1,
                timeout: 5.0,
            },
            c,
            None,
        ) {
            Outcome::Wait(plan) => {
                assert_eq!(plan.wakes.len(), 1);
                assert!(plan.watched.is_empty());
            }
            other => panic!("expected Wait, got {other:?}"),
        }
    }

    // -- Diagnostics / Get --

    #[test]
    fn diagnostics_partitions_queues() {
        let (mut s, c) = logged_in("t");
        create(&mut s, c, "perm");
        reply(handle_request(
            &mut s,
            Request::CreateTransient { name: "temp".into() },
            c,
            None,
        ));
        match reply(handle_request(&mut s, Request::Diagnostics, c, None)) {
            Response::Diagnostics { snapshot } => {
                assert_eq!(snapshot.permanent.len(), 1);
                assert_eq!(snapshot.permanent[0].name, "perm");
                assert_eq!(snapshot.transient.len(), 1);
                assert_eq!(snapshot.transient[0].name, "temp");
            }
            other => panic!("expected Diagnostics, got {other:?}"),
        }
    }

    #[test]
    fn get_resolves_under_asset_root() {
        let (mut s, c) = fresh();
        match handle_request(&mut s, Request::Get { path: "".into() }, c, None) {
            Outcome::ReadFile(path) => assert!(path.ends_with("www/index.html")),
            other => panic!("expected ReadFile, got {other:?}"),
        }
    }

    #[test]
    fn get_rejects_traversal() {
        let (mut s, c) = fresh();
        match reply(handle_request(
            &mut s,
            Request::Get {
                path: "../secret".into(),
            },
            c,
            None,
        )) {
            Response::Error { reason } => assert_eq!(reason, "not_found"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    // -- Timeout sanitization --

    #[test]
    fn hostile_timeouts_collapse_to_zero() {
        assert_eq!(sanitize_timeout(-1.0), 0.0);
        assert_eq!(sanitize_timeout(f64::NAN), 0.0);
        assert_eq!(sanitize_timeout(f64::INFINITY), 0.0);
        assert_eq!(sanitize_timeout(1e9), 86_400.0);
        assert_eq!(sanitize_timeout(2.5), 2.5);
    }
}
