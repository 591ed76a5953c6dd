//! RAR: retrieval-augmented reasoning over raw tickets.
//!
//! A deliberately small variant with its own turn loop: retrieve the most
//! similar historical tickets, hand them to the LLM together with the
//! dialogue so far, and return its free-form answer. No hypothesis
//! tracking, no recommendation scoring.

use crate::retriever::Retriever;
use dbdiag_core::session::{DialogueMessage, Role, SessionState};
use dbdiag_core::{Error, Result};
use dbdiag_services::{ChatMessage, ChatModel};
use dbdiag_storage::SessionStore;
use std::sync::Arc;
use tracing::info;

/// A RAR turn result.
#[derive(Debug, Clone)]
pub struct RarResponse {
    pub session_id: String,
    pub message: String,
}

/// Pure-LLM diagnosis loop over raw-ticket retrieval.
pub struct RarDialogueManager {
    retriever: Arc<Retriever>,
    chat: Arc<dyn ChatModel>,
    sessions: Arc<SessionStore>,
    ticket_top_k: usize,
}

impl std::fmt::Debug for RarDialogueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RarDialogueManager")
            .field("ticket_top_k", &self.ticket_top_k)
            .finish()
    }
}

impl RarDialogueManager {
    pub fn new(
        retriever: Arc<Retriever>,
        chat: Arc<dyn ChatModel>,
        sessions: Arc<SessionStore>,
        ticket_top_k: usize,
    ) -> Self {
        Self {
            retriever,
            chat,
            sessions,
            ticket_top_k,
        }
    }

    pub async fn start_conversation(&self, user_problem: &str) -> Result<RarResponse> {
        let mut session = SessionState::new(user_problem);
        info!(session_id = %session.session_id, "RAR conversation started");
        self.run_turn(&mut session, user_problem).await
    }

    pub async fn continue_conversation(
        &self,
        session_id: &str,
        user_message: &str,
    ) -> Result<RarResponse> {
        let mut session = self
            .sessions
            .load(session_id)?
            .ok_or_else(|| Error::not_found(format!("session {session_id}")))?;
        self.run_turn(&mut session, user_message).await
    }

    async fn run_turn(&self, session: &mut SessionState, user_message: &str) -> Result<RarResponse> {
        session
            .dialogue_history
            .push(DialogueMessage::user(user_message));

        let matches = self
            .retriever
            .search_by_ticket_description(&session.user_problem, self.ticket_top_k)
            .await?;
        let cases = matches
            .iter()
            .map(|m| {
                format!(
                    "- [{}] 问题: {} / 根因: {}",
                    m.ticket_id, m.description, m.root_cause_text
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut messages = vec![ChatMessage::system(format!(
            "你是数据库故障诊断专家。参考以下历史工单，通过多轮对话帮助用户定位根因。\
             需要更多信息时提出具体的观察建议；证据充分时给出根因和解决方案，并引用工单号。\n\n\
             历史工单：\n{}",
            if cases.is_empty() { "（无）".to_string() } else { cases }
        ))];
        for turn in &session.dialogue_history {
            messages.push(ChatMessage {
                role: match turn.role {
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: turn.content.clone(),
            });
        }

        let answer = self.chat.chat(&messages).await?;
        session
            .dialogue_history
            .push(DialogueMessage::assistant(answer.clone()));
        self.sessions.save(session)?;

        Ok(RarResponse {
            session_id: session.session_id.clone(),
            message: answer,
        })
    }
}
