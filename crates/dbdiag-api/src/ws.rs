//! WebSocket chat endpoint (`/ws/chat`).
//!
//! One connection owns one implicit session. Client frames are
//! `{"type": "message"|"command", "content": "..."}`; the server replies
//! with `{"type": "output", "html": "..."}` per emission and
//! `{"type": "close", "html": "..."}` to terminate. Dropping the
//! connection mid-turn aborts the turn before the session is persisted.

use crate::render;
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use dbdiag_engine::DiagnosisMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ServerFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    html: String,
}

impl ServerFrame {
    fn output(html: String) -> Self {
        Self {
            kind: "output",
            html,
        }
    }

    fn close(html: String) -> Self {
        Self {
            kind: "close",
            html,
        }
    }
}

pub(crate) async fn ws_chat(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| chat_loop(socket, state))
}

async fn chat_loop(mut socket: WebSocket, state: Arc<AppState>) {
    let mode_label = match state.manager.mode() {
        DiagnosisMode::Hyb => "混合增强推理 (Hyb)",
        DiagnosisMode::Gar => "图谱增强推理 (GAR)",
    };
    let welcome = ServerFrame::output(render::render_welcome(mode_label));
    if send(&mut socket, &welcome).await.is_err() {
        return;
    }

    let mut session: ChatSession = ChatSession::new(state);
    while let Some(frame) = socket.recv().await {
        let message = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let parsed: ClientFrame = match serde_json::from_str(&message) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(error = %err, "ignoring malformed client frame");
                continue;
            }
        };

        let content = parsed.content.trim().to_string();
        if content.is_empty() {
            continue;
        }

        let reply = if parsed.kind == "command" || content.starts_with('/') {
            session.handle_command(&content)
        } else {
            session.handle_diagnosis(&content).await
        };

        let closing = reply.kind == "close";
        if send(&mut socket, &reply).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    info!("websocket chat connection closed");
}

async fn send(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(payload)).await
}

/// Per-connection chat state.
struct ChatSession {
    state: Arc<AppState>,
    session_id: Option<String>,
    round: u32,
}

impl ChatSession {
    fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            session_id: None,
            round: 0,
        }
    }

    async fn handle_diagnosis(&mut self, content: &str) -> ServerFrame {
        self.round += 1;
        let response = match &self.session_id {
            None => {
                let response = self.state.manager.start_conversation(content).await;
                self.session_id = Some(response.session_id.clone());
                response
            }
            Some(session_id) => {
                self.state
                    .manager
                    .continue_conversation(session_id, content)
                    .await
            }
        };
        ServerFrame::output(render::render_response(self.round, &response))
    }

    fn handle_command(&mut self, command: &str) -> ServerFrame {
        match command.to_lowercase().as_str() {
            "/help" => ServerFrame::output(render::render_help()),
            "/status" => ServerFrame::output(self.render_status()),
            "/reset" => {
                if let Some(session_id) = self.session_id.take() {
                    if let Err(err) = self.state.manager.reset_session(&session_id) {
                        warn!(error = %err, "session reset failed");
                    }
                }
                self.round = 0;
                ServerFrame::output("<div class=\"ok\">会话已重置，请重新描述问题。</div>".into())
            }
            "/exit" => ServerFrame::close("<div class=\"bye\">再见！</div>".into()),
            other => ServerFrame::output(format!(
                "<div class=\"error\">未知命令: {}，输入 /help 查看可用命令。</div>",
                render::escape(other)
            )),
        }
    }

    fn render_status(&self) -> String {
        let Some(session_id) = &self.session_id else {
            return "<div class=\"status\">还没有开始诊断会话。</div>".to_string();
        };
        match self.state.manager.session(session_id) {
            Ok(Some(session)) => {
                let hypotheses = session
                    .active_hypotheses
                    .iter()
                    .map(|h| {
                        format!(
                            "{} {:.0}%",
                            render::escape(&h.root_cause_description),
                            h.confidence * 100.0
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!(
                    "<div class=\"status\">轮次: {} · 已确认: {} · 已否定: {}<br>假设: {}</div>",
                    self.round,
                    session.confirmed_phenomena.len(),
                    session.denied_phenomena.len(),
                    if hypotheses.is_empty() { "（无）".to_string() } else { hypotheses },
                )
            }
            Ok(None) => "<div class=\"status\">会话不存在。</div>".to_string(),
            Err(err) => format!(
                "<div class=\"error\">状态读取失败: {}</div>",
                render::escape(&err.to_string())
            ),
        }
    }
}
