//! Output formatting for client commands.
//!
//! Human-readable tables and status lines on stdout; `call` writes
//! the raw reply payload to stdout so piping works naturally
//! (`switchd call svc --body hi | jq .`). Diagnostics is JSON.

use std::io::{self, Write};

use crate::ipc::protocol::{DiagnosticsSnapshot, MessageKind, TraceItem, TracedEvent};

use super::ClientError;

/// Print queue names, one per line.
pub fn print_queues(names: &[String]) {
    if names.is_empty() {
        println!("No queues");
        return;
    }
    for name in names {
        println!("{name}");
    }
}

/// Print one trace event as a table row.
pub fn print_trace_event(traced: &TracedEvent) {
    let event = &traced.event;
    let direction = match (&event.input, &event.output) {
        (Some(input), _) => format!("{input} ->"),
        (_, Some(output)) => format!("-> {output}"),
        _ => String::new(),
    };
    let (kind, detail) = match &event.item {
        TraceItem::Message { id, message } => {
            let kind = match &message.kind {
                MessageKind::Request { reply_to } => format!("request(reply {reply_to})"),
                MessageKind::Response { in_reply_to } => format!("response({in_reply_to})"),
            };
            (kind, format!("{id} {}b", message.payload.len()))
        }
        TraceItem::Ack { id } => ("ack".to_string(), id.to_string()),
    };
    let processing = event
        .processing_ns
        .map(|ns| format!(" [{:.3}ms]", ns as f64 / 1e6))
        .unwrap_or_default();
    println!(
        "{:>6} {:>17.6} {:<16} {:<20} {kind} {detail}{processing}",
        traced.cursor, event.time, direction, event.queue,
    );
}

/// Render trace events as an mscgen sequence chart.
///
/// Sessions and queues become entities; enqueues point session →
/// queue, deliveries queue → session.
pub fn render_mscgen(events: &[TracedEvent]) -> String {
    let mut entities: Vec<String> = Vec::new();
    let mut remember = |name: &str| {
        if !entities.iter().any(|e| e == name) {
            entities.push(name.to_string());
        }
    };
    for traced in events {
        if let Some(input) = &traced.event.input {
            remember(input);
        }
        if let Some(output) = &traced.event.output {
            remember(output);
        }
        remember(&traced.event.queue);
    }

    let mut out = String::from("msc {\n");
    let declared: Vec<String> = entities.iter().map(|e| format!("\"{e}\"")).collect();
    out.push_str(&format!("  {};\n", declared.join(", ")));
    for traced in events {
        let event = &traced.event;
        let label = match &event.item {
            TraceItem::Message { id, message } => {
                format!("{id} ({}b)", message.payload.len())
            }
            TraceItem::Ack { id } => format!("ack {id}"),
        };
        match (&event.input, &event.output) {
            (Some(input), _) => out.push_str(&format!(
                "  \"{input}\" -> \"{}\" [ label = \"{label}\" ];\n",
                event.queue
            )),
            (_, Some(output)) => out.push_str(&format!(
                "  \"{}\" -> \"{output}\" [ label = \"{label}\" ];\n",
                event.queue
            )),
            _ => {}
        }
    }
    out.push_str("}\n");
    out
}

/// Print a diagnostics snapshot as pretty JSON.
pub fn print_diagnostics(snapshot: &DiagnosticsSnapshot) -> Result<(), ClientError> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

/// Write a raw payload to stdout.
pub fn print_payload(payload: &[u8]) -> Result<(), io::Error> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(payload)?;
    stdout.flush()
}
