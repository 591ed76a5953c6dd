//! Terminal diagnosis rendering.
//!
//! Builds the diagnosis summary at termination: root cause, confirmed
//! evidence, remediation and ticket citations. The summary text comes from
//! the LLM; citations are post-filtered against the hypothesis' supporting
//! tickets, and a deterministic template takes over when the LLM is
//! unavailable.

use dbdiag_core::knowledge::Ticket;
use dbdiag_core::session::{Hypothesis, SessionState};
use dbdiag_core::Result;
use dbdiag_services::{ChatMessage, ChatModel};
use dbdiag_storage::KnowledgeStore;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_CITATIONS: usize = 3;

/// A terminal diagnosis.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub root_cause_id: String,
    pub root_cause_description: String,
    pub confidence: f64,
    pub solution: String,
    /// LLM-generated Markdown summary.
    pub summary: String,
    pub citations: Vec<Ticket>,
}

/// Response generator for terminal turns.
pub struct ResponseGenerator {
    store: Arc<KnowledgeStore>,
    chat: Arc<dyn ChatModel>,
}

impl std::fmt::Debug for ResponseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseGenerator").finish()
    }
}

impl ResponseGenerator {
    pub fn new(store: Arc<KnowledgeStore>, chat: Arc<dyn ChatModel>) -> Self {
        Self { store, chat }
    }

    /// Produce the diagnosis for the terminating hypothesis.
    pub async fn generate(
        &self,
        session: &SessionState,
        hypothesis: &Hypothesis,
    ) -> Result<Diagnosis> {
        let root_cause = self.store.root_cause_by_id(&hypothesis.root_cause_id)?;
        let (description, solution) = match &root_cause {
            Some(rc) => (rc.description.clone(), rc.solution.clone()),
            None => (hypothesis.root_cause_description.clone(), String::new()),
        };

        // Citations must stay within the tickets that actually supported
        // this hypothesis.
        let citations: Vec<Ticket> = self
            .store
            .tickets_by_root_cause(&hypothesis.root_cause_id, MAX_CITATIONS * 2)?
            .into_iter()
            .filter(|t| hypothesis.supporting_ticket_ids.contains(&t.ticket_id))
            .take(MAX_CITATIONS)
            .collect();

        let confirmed_details = self
            .store
            .phenomena_by_ids(&session.confirmed_ids())?;
        let mut phenomena_text = String::new();
        for cp in &session.confirmed_phenomena {
            let description = confirmed_details
                .iter()
                .find(|p| p.id == cp.phenomenon_id)
                .map(|p| p.description.as_str())
                .unwrap_or(cp.phenomenon_id.as_str());
            phenomena_text.push_str(&format!("- {description}\n  用户反馈: {}\n", cp.result_summary));
        }

        let summary = match self
            .generate_summary(session, &description, &solution, &phenomena_text, &citations)
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "summary generation failed, using template");
                self.template_summary(session, &description, &solution, &phenomena_text)
            }
        };

        debug!(
            root_cause_id = %hypothesis.root_cause_id,
            citations = citations.len(),
            "diagnosis generated"
        );
        Ok(Diagnosis {
            root_cause_id: hypothesis.root_cause_id.clone(),
            root_cause_description: description,
            confidence: hypothesis.confidence,
            solution,
            summary,
            citations,
        })
    }

    async fn generate_summary(
        &self,
        session: &SessionState,
        root_cause: &str,
        solution: &str,
        phenomena_text: &str,
        citations: &[Ticket],
    ) -> Result<String> {
        let citations_text = citations
            .iter()
            .take(2)
            .map(|t| format!("- {}: {}", t.ticket_id, t.description))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "你是数据库诊断专家。请根据以下诊断过程，生成一份简洁的诊断总结报告。\n\n\
             ## 用户问题\n{}\n\n\
             ## 已确认的现象\n{}\n\n\
             ## 定位的根因\n{}\n\n\
             ## 参考案例\n{}\n\n\
             ## 建议解决方案\n{}\n\n\
             请生成诊断总结，包含以下部分：\n\
             1. **观察到的现象**\n\
             2. **推理链路**（为什么这些现象指向该根因）\n\
             3. **恢复措施**\n\
             4. **引用工单**（只允许引用参考案例中列出的工单号）\n\n\
             要求：每部分 2-3 句话，使用 Markdown 格式。",
            session.user_problem,
            if phenomena_text.is_empty() {
                "（无明确确认的现象）"
            } else {
                phenomena_text
            },
            root_cause,
            if citations_text.is_empty() {
                "（无参考案例）".to_string()
            } else {
                citations_text
            },
            solution,
        );

        let summary = self.chat.chat(&[ChatMessage::user(prompt)]).await?;
        Ok(summary.trim().to_string())
    }

    fn template_summary(
        &self,
        session: &SessionState,
        root_cause: &str,
        solution: &str,
        phenomena_text: &str,
    ) -> String {
        format!(
            "**观察到的现象：**\n{}\n\n**推理链路：**\n基于已确认现象和历史案例，判断根因为：{}\n\n**恢复措施：**\n{}",
            if phenomena_text.is_empty() {
                format!("用户描述: {}", session.user_problem)
            } else {
                phenomena_text.to_string()
            },
            root_cause,
            solution,
        )
    }

    /// User-facing message for a diagnosis.
    pub fn render_message(diagnosis: &Diagnosis) -> String {
        let mut message = format!(
            "**根因已定位：{}** (置信度: {:.0}%)\n\n{}\n",
            diagnosis.root_cause_description,
            diagnosis.confidence * 100.0,
            diagnosis.summary,
        );
        if !diagnosis.citations.is_empty() {
            message.push_str("\n---\n");
            for (i, citation) in diagnosis.citations.iter().enumerate() {
                message.push_str(&format!(
                    "\n[{}] **Ticket {}**: {}\n",
                    i + 1,
                    citation.ticket_id,
                    citation.description
                ));
            }
        }
        message
    }
}
