//! Output formatter (§1): renders queue events, results, and errors as
//! text, JSON, or nothing (quiet) — the CLI's half of the exit-code
//! contract in §4.I lives here too.

use acpx_protocol::queue::{QueueResponse, SessionSendResult};
use acpx_protocol::record::SessionRecord;
use acpx_protocol::AcpxError;
use serde_json::Value;

use crate::cli::OutputFormat;

#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    pub format: OutputFormat,
}

impl Renderer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render one forwarded ACP event frame (§4.G step 4: "forwarded to the
    /// output formatter context `{sessionId, requestId, stream:"prompt"}`").
    pub fn event(&self, request_id: &str, message: &Value) {
        match self.format {
            OutputFormat::Quiet => {}
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"type": "event", "requestId": request_id, "message": message})
                );
            }
            OutputFormat::Text => {
                if let Some(line) = summarize_event(message) {
                    println!("{line}");
                }
            }
        }
    }

    pub fn result(&self, result: &SessionSendResult) {
        match self.format {
            OutputFormat::Quiet => {}
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(result).unwrap_or_default());
            }
            OutputFormat::Text => {
                println!("stop reason: {}", result.stop_reason);
                let stats = &result.permission_stats;
                if stats.approved + stats.denied + stats.auto_approved + stats.auto_denied > 0 {
                    println!(
                        "permissions: {} approved, {} denied, {} auto-approved, {} auto-denied",
                        stats.approved, stats.denied, stats.auto_approved, stats.auto_denied
                    );
                }
            }
        }
    }

    pub fn control_result(&self, label: &str, applied: bool) {
        match self.format {
            OutputFormat::Quiet => {}
            OutputFormat::Json => println!("{}", serde_json::json!({"applied": applied})),
            OutputFormat::Text => println!("{label}: {}", if applied { "applied" } else { "not applied" }),
        }
    }

    pub fn cancel_result(&self, cancelled: bool) {
        match self.format {
            OutputFormat::Quiet => {}
            OutputFormat::Json => println!("{}", serde_json::json!({"cancelled": cancelled})),
            OutputFormat::Text => println!("cancel: {}", if cancelled { "acknowledged" } else { "nothing to cancel" }),
        }
    }

    pub fn records(&self, records: &[SessionRecord]) {
        match self.format {
            OutputFormat::Quiet => {}
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(records).unwrap_or_default());
            }
            OutputFormat::Text => {
                if records.is_empty() {
                    println!("no sessions");
                    return;
                }
                for record in records {
                    println!(
                        "{}  {}  {}{}",
                        record.record_id,
                        if record.closed { "closed" } else { "open  " },
                        record.cwd,
                        record.name.as_deref().map(|n| format!("  ({n})")).unwrap_or_default(),
                    );
                }
            }
        }
    }

    pub fn record(&self, record: &SessionRecord) {
        match self.format {
            OutputFormat::Quiet => {}
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record).unwrap_or_default()),
            OutputFormat::Text => {
                println!("recordId:      {}", record.record_id);
                println!("acpSessionId:  {}", record.acp_session_id);
                println!("agentCommand:  {}", record.agent_command);
                println!("cwd:           {}", record.cwd);
                println!("closed:        {}", record.closed);
                println!("lastSeq:       {}", record.last_seq);
                println!("lastUsedAt:    {}", record.last_used_at);
            }
        }
    }

    pub fn error(&self, err: &AcpxError) {
        match self.format {
            OutputFormat::Quiet => {}
            OutputFormat::Json => eprintln!("{}", serde_json::to_string(err).unwrap_or_default()),
            OutputFormat::Text => eprintln!("error: {err}"),
        }
    }

    pub fn queue_error(&self, response: &QueueResponse) {
        if let QueueResponse::Error { code, detail_code, message, .. } = response {
            match self.format {
                OutputFormat::Quiet => {}
                OutputFormat::Json => eprintln!(
                    "{}",
                    serde_json::json!({"code": code, "detailCode": detail_code, "message": message})
                ),
                OutputFormat::Text => match detail_code {
                    Some(detail) => eprintln!("error: {message} ({code}/{detail})"),
                    None => eprintln!("error: {message} ({code})"),
                },
            }
        }
    }
}

/// A short human-readable gloss of a raw ACP JSON-RPC frame, good enough
/// to watch a prompt stream go by without dumping full payloads.
fn summarize_event(message: &Value) -> Option<String> {
    if let Some(method) = message.get("method").and_then(Value::as_str) {
        if method == "sessionUpdate" || method == "session/update" {
            let update = message.get("params").and_then(|p| p.get("update"));
            let kind = update.and_then(|u| u.get("sessionUpdate")).and_then(Value::as_str);
            return Some(match kind {
                Some(kind) => format!("[{kind}] {}", update_preview(update)),
                None => "[update]".to_string(),
            });
        }
        return Some(format!("[{method}]"));
    }
    if message.get("result").is_some() {
        return Some("[response]".to_string());
    }
    if message.get("error").is_some() {
        let msg = message
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Some(format!("[error] {msg}"));
    }
    None
}

fn update_preview(update: Option<&Value>) -> String {
    let Some(update) = update else { return String::new() };
    for key in ["content", "text", "title"] {
        if let Some(text) = update.get(key).and_then(Value::as_str) {
            let mut preview = text.replace('\n', " ");
            preview.truncate(120);
            return preview;
        }
    }
    String::new()
}
