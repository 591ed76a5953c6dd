//! User-feedback parsing.
//!
//! A small dedicated grammar handles the fast paths (numbered batch
//! judgments and blanket confirm/deny); everything else goes through one
//! schema-constrained LLM extraction whose result may also carry new
//! observations the user volunteered.

use dbdiag_core::knowledge::Phenomenon;
use dbdiag_core::session::SessionState;
use dbdiag_core::Result;
use dbdiag_services::{ChatMessage, ChatModel};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const BLANKET_DENY_KEYWORDS: &[&str] = &[
    "全否定", "都否定", "都不是", "全部否定", "都没有", "都没看到", "deny all", "none of",
];
const AFFIRMATIVE_KEYWORDS: &[&str] = &[
    "确认", "是的", "是", "看到了", "观察到", "都确认", "全部确认", "confirm", "yes",
];
const NEGATION_MARKERS: &[&str] = &["不", "没", "否"];

/// Structured outcome of feedback parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeedback {
    /// Phenomenon ids the user confirmed.
    pub confirmed: Vec<String>,
    /// Phenomenon ids the user denied.
    pub denied: Vec<String>,
    /// Technical observations not covered by the pending list.
    pub new_observations: Vec<String>,
}

impl ParsedFeedback {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.denied.is_empty() && self.new_observations.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct LlmFeedback {
    #[serde(default)]
    feedback: std::collections::HashMap<String, String>,
    #[serde(default)]
    new_observations: Vec<String>,
}

/// Feedback parser: regex fast paths plus the LLM slow path.
pub struct FeedbackParser {
    chat: Arc<dyn ChatModel>,
    batch_re: Regex,
    english_negation_re: Regex,
}

impl std::fmt::Debug for FeedbackParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackParser").finish()
    }
}

impl FeedbackParser {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            batch_re: Regex::new(r"(\d+)\s*(确认|否定|confirm|deny|yes|no|是|否)")
                .expect("batch feedback regex is valid"),
            english_negation_re: Regex::new(r"(?i)\b(no|not|none|never)\b")
                .expect("negation regex is valid"),
        }
    }

    /// Fast-path grammar. `pending` is the most recent recommendation's
    /// phenomenon list; numeric indices are 1-based into it and
    /// out-of-range indices are ignored.
    pub fn fast_path(&self, user_message: &str, pending: &[String]) -> Option<ParsedFeedback> {
        if pending.is_empty() {
            return None;
        }

        // Numbered batch form: "1确认 2否定 3确认". A message in batch form
        // is consumed by this path even when every index is out of range,
        // so stray indices never degrade into a blanket judgment.
        let mut parsed = ParsedFeedback::default();
        let mut batch_form = false;
        for capture in self.batch_re.captures_iter(user_message) {
            batch_form = true;
            let Ok(number) = capture[1].parse::<usize>() else {
                continue;
            };
            if number == 0 || number > pending.len() {
                debug!(index = number, pending = pending.len(), "feedback index out of range");
                continue;
            }
            let phenomenon_id = pending[number - 1].clone();
            match &capture[2] {
                "确认" | "confirm" | "yes" | "是" => parsed.confirmed.push(phenomenon_id),
                _ => parsed.denied.push(phenomenon_id),
            }
        }
        if batch_form {
            return Some(parsed);
        }

        // Blanket confirm: an affirmative keyword with no negation.
        let has_negation = NEGATION_MARKERS.iter().any(|m| user_message.contains(m))
            || self.english_negation_re.is_match(user_message);
        if !has_negation
            && AFFIRMATIVE_KEYWORDS
                .iter()
                .any(|k| user_message.contains(k))
        {
            return Some(ParsedFeedback {
                confirmed: pending.to_vec(),
                ..Default::default()
            });
        }

        // Blanket deny.
        if BLANKET_DENY_KEYWORDS.iter().any(|k| user_message.contains(k)) {
            return Some(ParsedFeedback {
                denied: pending.to_vec(),
                ..Default::default()
            });
        }

        None
    }

    /// Schema-constrained LLM extraction over the pending phenomena. Ids
    /// outside the pending list and unknown statuses are ignored; an empty
    /// feedback object simply means no structured feedback was found.
    pub async fn slow_path(
        &self,
        user_message: &str,
        pending: &[Phenomenon],
    ) -> Result<ParsedFeedback> {
        let pending_list = pending
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. [{}] {}", i + 1, p.id, p.description))
            .collect::<Vec<_>>()
            .join("\n");

        let system = ChatMessage::system(
            "你是一个对话分析助手。分析用户消息，判断用户对每个待确认现象的反馈。\n\n\
             输出 JSON 格式：\n\
             {\n\
               \"feedback\": {\"<phenomenon_id>\": \"confirmed\" | \"denied\" | \"unknown\"},\n\
               \"new_observations\": [\"用户提到的新观察\"]\n\
             }\n\n\
             判断规则：\n\
             - confirmed: 用户明确确认看到了该现象，或描述符合该现象\n\
             - denied: 用户明确否认，或描述与该现象相反（如\"正常\"对应\"异常\"）\n\
             - unknown: 用户未提及该现象\n\n\
             new_observations: 用户描述的、不在待确认列表中的新观察或现象。\
             只提取具体的技术观察，忽略闲聊。\n\n\
             只输出 JSON，不要其他内容。",
        );
        let user = ChatMessage::user(format!("待确认现象：\n{pending_list}\n\n用户消息: {user_message}"));

        let value = self.chat.chat_json(&[system, user]).await?;
        let llm_feedback: LlmFeedback = serde_json::from_value(value)
            .map_err(|e| dbdiag_core::Error::upstream_permanent(format!("feedback schema: {e}")))?;

        let mut parsed = ParsedFeedback {
            new_observations: llm_feedback.new_observations,
            ..Default::default()
        };
        for p in pending {
            match llm_feedback.feedback.get(&p.id).map(String::as_str) {
                Some("confirmed") => parsed.confirmed.push(p.id.clone()),
                Some("denied") => parsed.denied.push(p.id.clone()),
                _ => {}
            }
        }
        debug!(
            confirmed = parsed.confirmed.len(),
            denied = parsed.denied.len(),
            new_observations = parsed.new_observations.len(),
            "LLM feedback extraction finished"
        );
        Ok(parsed)
    }
}

/// Apply parsed feedback to a session. Mutations that would violate the
/// confirmed/denied exclusivity invariant are rejected individually and
/// reported back as warnings.
pub fn apply_feedback(
    session: &mut SessionState,
    parsed: &ParsedFeedback,
    user_message: &str,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for id in &parsed.confirmed {
        if let Err(err) = session.confirm(id, user_message) {
            warn!(phenomenon_id = %id, error = %err, "confirm rejected");
            warnings.push(format!("{id} 已被否定，本次确认未生效"));
        }
    }
    for id in &parsed.denied {
        if let Err(err) = session.deny(id) {
            warn!(phenomenon_id = %id, error = %err, "deny rejected");
            warnings.push(format!("{id} 已被确认，本次否定未生效"));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedChat;

    fn parser() -> FeedbackParser {
        FeedbackParser::new(Arc::new(ScriptedChat::new(&[])))
    }

    fn pending() -> Vec<String> {
        vec!["P-0001".into(), "P-0002".into(), "P-0003".into()]
    }

    #[test]
    fn test_batch_mixed_confirm_deny() {
        let parsed = parser().fast_path("1确认 2确认 3否定", &pending()).unwrap();
        assert_eq!(parsed.confirmed, vec!["P-0001", "P-0002"]);
        assert_eq!(parsed.denied, vec!["P-0003"]);
    }

    #[test]
    fn test_batch_english_forms() {
        let parsed = parser().fast_path("1 yes 2 no", &pending()).unwrap();
        assert_eq!(parsed.confirmed, vec!["P-0001"]);
        assert_eq!(parsed.denied, vec!["P-0002"]);
    }

    #[test]
    fn test_out_of_range_indices_ignored() {
        // "5确认" with 3 pending: batch form, but the index produces no
        // state change at all.
        let parsed = parser().fast_path("5确认", &pending()).unwrap();
        assert!(parsed.is_empty());

        let parsed = parser().fast_path("1确认 5否定", &pending()).unwrap();
        assert_eq!(parsed.confirmed, vec!["P-0001"]);
        assert!(parsed.denied.is_empty());
    }

    #[test]
    fn test_blanket_confirm() {
        let parsed = parser().fast_path("都确认，看到了", &pending()).unwrap();
        assert_eq!(parsed.confirmed.len(), 3);
        assert!(parsed.denied.is_empty());
    }

    #[test]
    fn test_blanket_deny_not_mistaken_for_confirm() {
        // "都不是" contains the affirmative "是" but carries a negation.
        let parsed = parser().fast_path("都不是", &pending()).unwrap();
        assert!(parsed.confirmed.is_empty());
        assert_eq!(parsed.denied.len(), 3);
    }

    #[test]
    fn test_free_form_takes_slow_path() {
        assert!(parser()
            .fast_path("IO 看起来还行，但索引涨了 6 倍", &pending())
            .is_none());
    }

    #[test]
    fn test_empty_pending_never_fast_paths() {
        assert!(parser().fast_path("确认", &[]).is_none());
    }

    #[tokio::test]
    async fn test_slow_path_parses_schema_output() {
        let chat = Arc::new(ScriptedChat::new(&[r#"{
            "feedback": {"P-0001": "denied", "P-0002": "confirmed", "P-0009": "confirmed"},
            "new_observations": ["发现很多慢查询"]
        }"#]));
        let parser = FeedbackParser::new(chat);
        let pending = vec![
            Phenomenon {
                id: "P-0001".into(),
                description: "IO 等待时间升高".into(),
                observation_method: String::new(),
                source_anomaly_ids: Vec::new(),
                cluster_size: 1,
                embedding: Vec::new(),
            },
            Phenomenon {
                id: "P-0002".into(),
                description: "索引大小异常增长".into(),
                observation_method: String::new(),
                source_anomaly_ids: Vec::new(),
                cluster_size: 1,
                embedding: Vec::new(),
            },
        ];

        let parsed = parser
            .slow_path("IO 正常，索引涨了 6 倍，另外发现很多慢查询", &pending)
            .await
            .unwrap();
        assert_eq!(parsed.confirmed, vec!["P-0002"]);
        assert_eq!(parsed.denied, vec!["P-0001"]);
        assert_eq!(parsed.new_observations, vec!["发现很多慢查询"]);
    }

    #[tokio::test]
    async fn test_slow_path_failure_propagates() {
        let parser = FeedbackParser::new(Arc::new(ScriptedChat::failing_json(2)));
        let err = parser.slow_path("自由文本", &[]).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_apply_feedback_rejects_conflicts_individually() {
        let mut session = SessionState::new("problem");
        session.deny("P-0001").unwrap();

        let parsed = ParsedFeedback {
            confirmed: vec!["P-0001".into(), "P-0002".into()],
            denied: Vec::new(),
            new_observations: Vec::new(),
        };
        let warnings = apply_feedback(&mut session, &parsed, "确认");
        assert_eq!(warnings.len(), 1);
        assert!(session.is_denied("P-0001"));
        assert!(session.is_confirmed("P-0002"));
    }
}
