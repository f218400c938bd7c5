//! Room membership and outbound typing signals.
//!
//! `join_*` resolves with the send outcome (not a server ack). `leave_*` is
//! fire-and-forget: nothing waits for the server to confirm removal.

use crate::connection::ConnectionManager;
use crate::error::SendError;
use crate::frame::ClientFrame;
use crate::typing::TypingScope;

impl ConnectionManager {
    pub async fn join_conversation(&self, conversation_id: &str) -> Result<(), SendError> {
        self.join(ClientFrame::JoinConversation {
            conversation_id: conversation_id.to_string(),
        })
        .await
    }

    pub fn leave_conversation(&self, conversation_id: &str) {
        self.leave(ClientFrame::LeaveConversation {
            conversation_id: conversation_id.to_string(),
        });
    }

    pub async fn join_individual_chat(&self, conversation_id: &str) -> Result<(), SendError> {
        self.join(ClientFrame::JoinIndividualChat {
            conversation_id: conversation_id.to_string(),
        })
        .await
    }

    pub fn leave_individual_chat(&self, conversation_id: &str) {
        self.leave(ClientFrame::LeaveIndividualChat {
            conversation_id: conversation_id.to_string(),
        });
    }

    pub async fn join_group_chat(&self, group_id: &str) -> Result<(), SendError> {
        self.join(ClientFrame::JoinGroupChat {
            group_id: group_id.to_string(),
        })
        .await
    }

    pub fn leave_group_chat(&self, group_id: &str) {
        self.leave(ClientFrame::LeaveGroupChat {
            group_id: group_id.to_string(),
        });
    }

    /// Subscribe to `user_online` / `user_offline` broadcasts.
    pub async fn join_user_status(&self) -> Result<(), SendError> {
        self.join(ClientFrame::JoinUserStatus).await
    }

    pub fn leave_user_status(&self) {
        self.leave(ClientFrame::LeaveUserStatus);
    }

    /// Subscribe to the admin monitoring feed.
    pub async fn join_admin_monitor(&self) -> Result<(), SendError> {
        self.join(ClientFrame::JoinAdminMonitor).await
    }

    pub fn leave_admin_monitor(&self) {
        self.leave(ClientFrame::LeaveAdminMonitor);
    }

    /// Tell the scope we started typing.
    pub async fn send_typing(&self, scope: &TypingScope) -> Result<(), SendError> {
        let (conversation_id, group_id) = scope.ids();
        self.send(&ClientFrame::Typing {
            conversation_id,
            group_id,
        })
        .await
    }

    /// Tell the scope we stopped typing.
    pub async fn send_stop_typing(&self, scope: &TypingScope) -> Result<(), SendError> {
        let (conversation_id, group_id) = scope.ids();
        self.send(&ClientFrame::StopTyping {
            conversation_id,
            group_id,
        })
        .await
    }

    async fn join(&self, frame: ClientFrame) -> Result<(), SendError> {
        let kind = frame.kind();
        match self.send(&frame).await {
            Ok(()) => {
                tracing::debug!(kind, "join sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(kind, error = %e, "join failed");
                Err(e)
            }
        }
    }

    fn leave(&self, frame: ClientFrame) {
        tracing::debug!(kind = frame.kind(), "leave");
        self.send_detached(&frame);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::auth::StaticToken;
    use crate::config::ClientConfig;
    use crate::router::EventRouter;
    use crate::testing::ScriptedConnector;

    fn manager(connector: &ScriptedConnector) -> ConnectionManager {
        ConnectionManager::new(
            ClientConfig::default(),
            Arc::new(connector.clone()),
            Arc::new(StaticToken::none()),
            EventRouter::new(),
        )
    }

    #[tokio::test]
    async fn join_and_leave_frames() {
        let connector = ScriptedConnector::accepting();
        let mgr = manager(&connector);
        mgr.connect().await.unwrap();
        let mut server = connector.next_server().await;

        mgr.join_conversation("c1").await.unwrap();
        mgr.join_individual_chat("c2").await.unwrap();
        mgr.join_group_chat("g1").await.unwrap();
        mgr.join_user_status().await.unwrap();
        mgr.join_admin_monitor().await.unwrap();
        mgr.leave_conversation("c1");
        mgr.leave_individual_chat("c2");
        mgr.leave_group_chat("g1");
        mgr.leave_user_status();
        mgr.leave_admin_monitor();

        let expected = [
            json!({"type": "join_conversation", "conversation_id": "c1"}),
            json!({"type": "join_individual_chat", "conversation_id": "c2"}),
            json!({"type": "join_group_chat", "group_id": "g1"}),
            json!({"type": "join_user_status"}),
            json!({"type": "join_admin_monitor"}),
            json!({"type": "leave_conversation", "conversation_id": "c1"}),
            json!({"type": "leave_individual_chat", "conversation_id": "c2"}),
            json!({"type": "leave_group_chat", "group_id": "g1"}),
            json!({"type": "leave_user_status"}),
            json!({"type": "leave_admin_monitor"}),
        ];
        for want in expected {
            assert_eq!(server.next_json().await.unwrap(), want);
        }
    }

    #[tokio::test]
    async fn join_rejects_when_disconnected_and_leave_is_silent() {
        let connector = ScriptedConnector::accepting();
        let mgr = manager(&connector);

        assert!(matches!(
            mgr.join_group_chat("g1").await,
            Err(SendError::NotConnected)
        ));
        mgr.leave_group_chat("g1");
    }

    #[tokio::test]
    async fn typing_signals_carry_the_scope() {
        let connector = ScriptedConnector::accepting();
        let mgr = manager(&connector);
        mgr.connect().await.unwrap();
        let mut server = connector.next_server().await;

        mgr.send_typing(&TypingScope::Group("g3".into())).await.unwrap();
        mgr.send_stop_typing(&TypingScope::Conversation("c9".into()))
            .await
            .unwrap();

        assert_eq!(
            server.next_json().await.unwrap(),
            json!({"type": "typing", "group_id": "g3"})
        );
        assert_eq!(
            server.next_json().await.unwrap(),
            json!({"type": "stop_typing", "conversation_id": "c9"})
        );
    }
}
