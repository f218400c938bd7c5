//! Connection state machine values and the derived status shown to users.

use serde::{Deserialize, Serialize};

/// Current health of the single transport connection.
///
/// ```text
/// disconnected --connect()--> connecting --open--> connected
/// connected --close--> disconnected --auto--> reconnecting --delay--> connecting
/// connecting | reconnecting --error--> error --close--> disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn allows(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Reconnecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Reconnecting, Connecting)
                | (Reconnecting, Error)
                | (Reconnecting, Disconnected)
                | (Error, Disconnected)
                | (Error, Connecting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    /// Human-readable label for a persistent status indicator.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting…",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Reconnecting => "Reconnecting…",
            ConnectionState::Error => "Connection error",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ConnectionState::Connecting => Severity::Info,
            ConnectionState::Connected => Severity::Success,
            ConnectionState::Disconnected => Severity::Neutral,
            ConnectionState::Reconnecting => Severity::Warning,
            ConnectionState::Error => Severity::Danger,
        }
    }

    pub fn status(self) -> ConnectionStatus {
        ConnectionStatus {
            state: self,
            label: self.label(),
            severity: self.severity(),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual weight of a status, mapped to a color by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Danger,
    Neutral,
}

impl Severity {
    pub fn color(self) -> &'static str {
        match self {
            Severity::Success => "green",
            Severity::Info => "blue",
            Severity::Warning => "yellow",
            Severity::Danger => "red",
            Severity::Neutral => "gray",
        }
    }
}

/// Derived connection status: state plus its label and severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub label: &'static str,
    pub severity: Severity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn error_only_reachable_from_connecting_or_reconnecting() {
        use ConnectionState::*;
        let all = [Connecting, Connected, Disconnected, Reconnecting, Error];
        for from in all {
            let expected = matches!(from, Connecting | Reconnecting);
            assert_eq!(from.allows(Error), expected, "{from} -> error");
        }
    }

    #[test]
    fn connected_only_reachable_from_connecting() {
        use ConnectionState::*;
        for from in [Connected, Disconnected, Reconnecting, Error] {
            assert!(!from.allows(Connected), "{from} -> connected");
        }
        assert!(Connecting.allows(Connected));
    }

    #[test]
    fn status_labels_and_colors() {
        let status = ConnectionState::Reconnecting.status();
        assert_eq!(status.label, "Reconnecting…");
        assert_eq!(status.severity.color(), "yellow");
        assert_eq!(ConnectionState::Error.severity().color(), "red");
        assert_eq!(ConnectionState::Connected.severity().color(), "green");
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
    }
}
