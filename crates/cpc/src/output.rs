use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use cpc_message::{kind, FsData, FsReplyBody, Message, Request, WindowEvent};
use serde::Serialize;
use serde_json::{json, Value};

const PREVIEW_LIMIT: usize = 64;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One printable line of output: a decoded message, a connection event or
/// a file-system result.
#[derive(Debug, Serialize)]
pub struct Record {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<u8>,
    pub summary: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl Record {
    pub fn new(kind: &'static str, window_id: Option<u8>, summary: impl Into<String>) -> Self {
        Self {
            kind,
            window_id,
            summary: summary.into(),
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: impl Serialize) -> Self {
        self.detail = serde_json::to_value(detail).unwrap_or(Value::Null);
        self
    }
}

pub fn print_record(record: &Record, format: OutputFormat) {
    print_records(std::slice::from_ref(record), format);
}

pub fn print_records(records: &[Record], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for record in records {
                println!(
                    "{}",
                    serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            if records.is_empty() {
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "WINDOW", "SUMMARY"]);
            for record in records {
                table.add_row(vec![
                    record.kind.to_string(),
                    window_label(record.window_id),
                    record.summary.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                println!(
                    "{} window={} {}",
                    record.kind,
                    window_label(record.window_id),
                    record.summary
                );
            }
        }
    }
}

/// Write bytes to stdout unchanged.
pub fn print_raw(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(bytes);
    let _ = stdout.flush();
}

fn window_label(window_id: Option<u8>) -> String {
    window_id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

/// Short printable rendering of arbitrary bytes.
pub fn preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_LIMIT)];
    let mut text: String = shown
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect();
    if bytes.len() > PREVIEW_LIMIT {
        text.push_str("...");
    }
    text
}

pub fn message_record(message: &Message) -> Record {
    let window_id = Some(message.window_id());
    match message {
        Message::Terminal { state, .. } => Record::new(
            "terminal",
            window_id,
            format!(
                "{:?} {}x{} cursor ({}, {})",
                state.mode, state.width, state.height, state.cursor_x, state.cursor_y
            ),
        )
        .with_detail(state),
        Message::Window { event, .. } => {
            let summary = match event {
                WindowEvent::Opened {
                    parent_computer,
                    width,
                    height,
                    title,
                } => format!("opened {title:?} {width}x{height} parent={parent_computer}"),
                WindowEvent::Closed => "closed".to_string(),
                WindowEvent::ShutdownAll => "shutdown".to_string(),
            };
            Record::new("window", window_id, summary).with_detail(event)
        }
        Message::Notification { notification, .. } => {
            let severity = notification
                .kind()
                .map_or_else(|| format!("flags=0x{:x}", notification.flags), |k| {
                    format!("{k:?}").to_lowercase()
                });
            Record::new(
                "notification",
                window_id,
                format!("[{severity}] {}: {}", notification.title, notification.message),
            )
            .with_detail(notification)
        }
        Message::Capabilities { capabilities, .. } => Record::new(
            "capabilities",
            window_id,
            format!("bits=0x{:04x}", capabilities.to_bits()),
        )
        .with_detail(capabilities),
        Message::FsReply(reply) => Record::new(
            "fs-reply",
            window_id,
            format!(
                "#{} {} {}",
                reply.request_id,
                reply.operation.name(),
                reply_summary(&reply.body)
            ),
        )
        .with_detail(json!({
            "request_id": reply.request_id,
            "operation": reply.operation.name(),
            "result": reply_value(&reply.body),
        })),
        Message::FsData(data) => data_record(data),
        Message::Unknown { kind, .. } => {
            Record::new("unknown", window_id, format!("type {kind}"))
        }
    }
}

fn data_record(data: &FsData) -> Record {
    let summary = if data.failed {
        format!("#{} failed: {}", data.request_id, data.error_message())
    } else {
        format!(
            "#{} {} bytes {}",
            data.request_id,
            data.data.len(),
            preview(&data.data)
        )
    };
    Record::new("fs-data", Some(data.window_id), summary).with_detail(json!({
        "request_id": data.request_id,
        "failed": data.failed,
        "size": data.data.len(),
    }))
}

pub fn request_record(request: &Request) -> Record {
    match request {
        Request::Input(event) => Record::new(
            kind::name(event.kind),
            Some(event.window_id),
            format!("{} bytes {}", event.data.len(), preview(&event.data)),
        ),
        Request::Capabilities(capabilities) => Record::new(
            "capabilities",
            Some(0),
            format!("request bits=0x{:04x}", capabilities.to_bits()),
        )
        .with_detail(capabilities),
        Request::Fs(fs) => {
            let mut summary = format!("#{} {} {}", fs.request_id, fs.operation.name(), fs.path);
            if let Some(target) = &fs.target {
                summary.push_str(" -> ");
                summary.push_str(target);
            }
            Record::new("fs-request", Some(fs.computer_id), summary).with_detail(json!({
                "request_id": fs.request_id,
                "operation": fs.operation.name(),
                "path": fs.path,
                "target": fs.target,
            }))
        }
        Request::FsData(data) => data_record(data),
    }
}

fn reply_summary(body: &FsReplyBody) -> String {
    match body {
        FsReplyBody::Bool(value) => value.to_string(),
        FsReplyBody::Size(size) => size.to_string(),
        FsReplyBody::Text(text) => text.clone(),
        FsReplyBody::TextList(items) => format!("{} entries", items.len()),
        FsReplyBody::Stat(None) => "not found".to_string(),
        FsReplyBody::Stat(Some(stat)) => {
            let kind = if stat.is_dir { "dir" } else { "file" };
            format!("{kind} {} bytes", stat.size)
        }
        FsReplyBody::Done => "ok".to_string(),
        FsReplyBody::Failed(message) if message.is_empty() => "failed".to_string(),
        FsReplyBody::Failed(message) => format!("failed: {message}"),
    }
}

fn reply_value(body: &FsReplyBody) -> Value {
    match body {
        FsReplyBody::Bool(value) => json!(value),
        FsReplyBody::Size(size) => json!(size),
        FsReplyBody::Text(text) => json!(text),
        FsReplyBody::TextList(items) => json!(items),
        FsReplyBody::Stat(stat) => json!(stat),
        FsReplyBody::Done => json!("ok"),
        FsReplyBody::Failed(message) => json!({ "error": message }),
    }
}

#[cfg(test)]
mod tests {
    use cpc_message::{Capabilities, FsOperation, FsReply, Notification};

    use super::*;

    #[test]
    fn preview_masks_control_bytes_and_truncates() {
        assert_eq!(preview(b"ok\n\x00"), "ok..");
        let long = vec![b'a'; PREVIEW_LIMIT + 5];
        let text = preview(&long);
        assert!(text.ends_with("..."));
        assert_eq!(text.len(), PREVIEW_LIMIT + 3);
    }

    #[test]
    fn notification_record_names_severity() {
        let record = message_record(&Message::Notification {
            window_id: 1,
            notification: Notification {
                flags: 0x20,
                title: "Disk".to_string(),
                message: "almost full".to_string(),
            },
        });
        assert_eq!(record.kind, "notification");
        assert_eq!(record.summary, "[warning] Disk: almost full");
        assert_eq!(record.detail["flags"], 0x20);
    }

    #[test]
    fn stat_reply_record_serializes_missing_path_as_null() {
        let record = message_record(&Message::FsReply(FsReply {
            window_id: 0,
            request_id: 4,
            operation: FsOperation::Attributes,
            body: FsReplyBody::Stat(None),
        }));
        assert_eq!(record.summary, "#4 attributes not found");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["detail"]["result"], Value::Null);
        assert_eq!(json["window_id"], 0);
    }

    #[test]
    fn capability_request_record_shows_bits() {
        let record = request_record(&Request::Capabilities(Capabilities::from_bits(3)));
        assert_eq!(record.summary, "request bits=0x0003");
        assert_eq!(record.detail["filesystem"], true);
    }
}
