//! One-line terminal renderings of SDK state.

use chatwire_sdk::frame::NewMessage;
use chatwire_sdk::{ConnectionState, ConnectionStatus, Notification, Priority, Severity};

fn ansi(severity: Severity) -> &'static str {
    match severity {
        Severity::Success => "\x1b[32m",
        Severity::Info => "\x1b[34m",
        Severity::Warning => "\x1b[33m",
        Severity::Danger => "\x1b[31m",
        Severity::Neutral => "\x1b[90m",
    }
}

const RESET: &str = "\x1b[0m";

/// Status indicator, e.g. `● Reconnecting… (2/5)`.
pub fn status_line(
    status: &ConnectionStatus,
    attempts: u32,
    max_attempts: u32,
    color: bool,
) -> String {
    let mut line = if color {
        format!("{}●{RESET} {}", ansi(status.severity), status.label)
    } else {
        format!("● {}", status.label)
    };
    if status.state == ConnectionState::Reconnecting {
        line.push_str(&format!(" ({attempts}/{max_attempts})"));
    }
    line
}

pub fn notification_line(n: &Notification) -> String {
    let time = n.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S");
    let tag = match n.priority {
        Priority::Low => "",
        Priority::Medium => "",
        Priority::High => " [!]",
        Priority::Urgent => " [!!]",
    };
    if n.message.is_empty() {
        format!("[{time}]{tag} {}", n.title)
    } else {
        format!("[{time}]{tag} {}: {}", n.title, n.message)
    }
}

pub fn message_line(msg: &NewMessage) -> String {
    let room = msg
        .conversation_id
        .as_deref()
        .map(|c| format!("#{c}"))
        .or_else(|| msg.group_id.as_deref().map(|g| format!("group {g}")))
        .unwrap_or_default();
    let sender = msg.sender_name.as_deref().unwrap_or(&msg.sender_id);
    if room.is_empty() {
        format!("<{sender}> {}", msg.content)
    } else {
        format!("{room} <{sender}> {}", msg.content)
    }
}

/// `None` when nobody is typing.
pub fn typing_line(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{one} is typing…")),
        [a, b] => Some(format!("{a} and {b} are typing…")),
        [a, b, rest @ ..] => Some(format!("{a}, {b} and {} more are typing…", rest.len())),
    }
}
