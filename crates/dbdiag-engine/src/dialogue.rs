//! The dialogue manager: one shared turn loop, parameterized by mode.
//!
//! GAR walks the standardized graph only; Hyb additionally expands the
//! candidate pool from semantically similar tickets on the first turn and
//! whenever the user volunteers new observations. Turns on the same
//! session are serialized by a per-session lock; a turn that fails or
//! times out never persists, so retrying the same message is safe.

use crate::feedback::{apply_feedback, FeedbackParser, ParsedFeedback};
use crate::recommender::{Action, Recommender, ScoredPhenomenon};
use crate::response::{Diagnosis, ResponseGenerator};
use crate::retriever::Retriever;
use crate::tracker::HypothesisTracker;
use dashmap::DashMap;
use dbdiag_core::config::EngineConfig;
use dbdiag_core::knowledge::Phenomenon;
use dbdiag_core::session::{DialogueMessage, Hypothesis, SessionState};
use dbdiag_core::{Error, Result};
use dbdiag_services::{ChatModel, Embedder};
use dbdiag_storage::{KnowledgeStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Which candidate-expansion strategy the shared turn loop runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisMode {
    Gar,
    Hyb,
}

/// Kind of a turn response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Recommend,
    Diagnosis,
    AskInitialInfo,
    AskMoreInfo,
    Error,
}

/// One recommended phenomenon as shown to the user.
#[derive(Debug, Clone)]
pub struct RecommendedItem {
    pub phenomenon: Phenomenon,
    pub reason: String,
}

/// What one turn returns to the presentation surface.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub session_id: String,
    pub kind: ResponseKind,
    pub message: String,
    pub phenomena: Vec<RecommendedItem>,
    pub hypotheses: Vec<Hypothesis>,
    pub diagnosis: Option<Diagnosis>,
}

impl TurnResponse {
    fn error(session_id: String, err: &Error) -> Self {
        let message = match err {
            Error::Timeout(_) => "本轮处理超时，会话状态未改变，请重试。".to_string(),
            Error::UpstreamPermanent(_) => {
                "无法解析您的反馈，请使用 \"1确认 2否定\" 的格式重试。".to_string()
            }
            Error::Upstream(_) => "检索服务暂时不可用，请稍后重试同一条消息。".to_string(),
            Error::NotFound(_) => "会话已过期或不存在，请重新开始对话。".to_string(),
            other => format!("处理失败：{other}。请重试或联系管理员。"),
        };
        Self {
            session_id,
            kind: ResponseKind::Error,
            message,
            phenomena: Vec::new(),
            hypotheses: Vec::new(),
            diagnosis: None,
        }
    }
}

/// Dialogue manager with per-session turn serialization.
pub struct DialogueManager {
    mode: DiagnosisMode,
    engine: EngineConfig,
    sessions: Arc<SessionStore>,
    retriever: Arc<Retriever>,
    tracker: HypothesisTracker,
    recommender: Recommender,
    feedback: FeedbackParser,
    responder: ResponseGenerator,
    store: Arc<KnowledgeStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for DialogueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueManager")
            .field("mode", &self.mode)
            .finish()
    }
}

impl DialogueManager {
    pub fn new(
        mode: DiagnosisMode,
        engine: EngineConfig,
        store: Arc<KnowledgeStore>,
        sessions: Arc<SessionStore>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            embedder,
            engine.vector_candidates,
        ));
        let tracker = HypothesisTracker::new(
            store.clone(),
            retriever.clone(),
            engine.retrieve_top_k,
            engine.hypothesis_top_k,
            engine.denial_penalty,
        );
        let recommender = Recommender::new(
            store.clone(),
            engine.recommend_count,
            engine.diagnosis_threshold,
            engine.moderate_threshold,
        );
        let feedback = FeedbackParser::new(chat.clone());
        let responder = ResponseGenerator::new(store.clone(), chat);
        Self {
            mode,
            engine,
            sessions,
            retriever,
            tracker,
            recommender,
            feedback,
            responder,
            store,
            locks: DashMap::new(),
        }
    }

    pub fn mode(&self) -> DiagnosisMode {
        self.mode
    }

    /// Start a new conversation from a problem description.
    pub async fn start_conversation(&self, user_problem: &str) -> TurnResponse {
        ::metrics::counter!("dbdiag_turns_total").increment(1);
        let mut session = SessionState::new(user_problem);
        let session_id = session.session_id.clone();
        info!(session_id = %session_id, mode = ?self.mode, "conversation started");

        let budget = Duration::from_secs(self.engine.turn_budget_secs);
        match tokio::time::timeout(budget, self.first_turn(&mut session)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                ::metrics::counter!("dbdiag_turn_errors_total").increment(1);
                warn!(session_id = %session_id, error = %err, "first turn failed");
                TurnResponse::error(session_id, &err)
            }
            Err(_) => {
                ::metrics::counter!("dbdiag_turn_errors_total").increment(1);
                TurnResponse::error(session_id, &Error::timeout("turn budget exceeded"))
            }
        }
    }

    /// Continue an existing conversation. The user's message is only
    /// recorded as processed when the whole turn succeeds.
    pub async fn continue_conversation(&self, session_id: &str, user_message: &str) -> TurnResponse {
        ::metrics::counter!("dbdiag_turns_total").increment(1);

        // Two turns on the same session id must never interleave.
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let loaded = match self.sessions.load(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                return TurnResponse::error(
                    session_id.to_string(),
                    &Error::not_found(format!("session {session_id}")),
                )
            }
            Err(err) => {
                ::metrics::counter!("dbdiag_turn_errors_total").increment(1);
                return TurnResponse::error(session_id.to_string(), &err);
            }
        };

        // Work on an owned copy; the stored blob only advances on success.
        let mut session = loaded;
        let budget = Duration::from_secs(self.engine.turn_budget_secs);
        match tokio::time::timeout(budget, self.followup_turn(&mut session, user_message)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                ::metrics::counter!("dbdiag_turn_errors_total").increment(1);
                warn!(session_id = %session_id, error = %err, "turn failed, session not advanced");
                TurnResponse::error(session_id.to_string(), &err)
            }
            Err(_) => {
                ::metrics::counter!("dbdiag_turn_errors_total").increment(1);
                TurnResponse::error(
                    session_id.to_string(),
                    &Error::timeout("turn budget exceeded"),
                )
            }
        }
    }

    async fn first_turn(&self, session: &mut SessionState) -> Result<TurnResponse> {
        session
            .dialogue_history
            .push(DialogueMessage::user(session.user_problem.clone()));

        if self.mode == DiagnosisMode::Hyb {
            let query = session.user_problem.clone();
            self.expand_candidates_from_tickets(session, &query, self.engine.ticket_search_top_k)
                .await?;
        }

        session.active_hypotheses = self.tracker.update(session).await?;
        let action = self.recommender.decide(session)?;
        self.finish_turn(session, action, Vec::new()).await
    }

    async fn followup_turn(
        &self,
        session: &mut SessionState,
        user_message: &str,
    ) -> Result<TurnResponse> {
        session
            .dialogue_history
            .push(DialogueMessage::user(user_message));

        let parsed = self.parse_feedback(session, user_message).await?;
        let warnings = apply_feedback(session, &parsed, user_message);

        if self.mode == DiagnosisMode::Hyb && !parsed.new_observations.is_empty() {
            let query = parsed.new_observations.join(" ");
            self.expand_candidates_from_tickets(
                session,
                &query,
                self.engine.midturn_ticket_search_top_k,
            )
            .await?;
            session
                .new_observations
                .extend(parsed.new_observations.iter().cloned());
        }

        session.active_hypotheses = self.tracker.update(session).await?;
        let action = self.recommender.decide(session)?;
        self.finish_turn(session, action, warnings).await
    }

    /// Parse feedback: fast-path grammar first, then the single
    /// schema-constrained LLM extraction.
    async fn parse_feedback(
        &self,
        session: &SessionState,
        user_message: &str,
    ) -> Result<ParsedFeedback> {
        let latest = session.latest_recommended_ids();
        if let Some(parsed) = self.feedback.fast_path(user_message, &latest) {
            debug!(
                confirmed = parsed.confirmed.len(),
                denied = parsed.denied.len(),
                "feedback fast path matched"
            );
            return Ok(parsed);
        }

        let pending_ids = session.pending_phenomenon_ids();
        if pending_ids.is_empty() {
            return Ok(ParsedFeedback::default());
        }
        let pending = self.store.phenomena_by_ids(&pending_ids)?;
        let mut parsed = self.feedback.slow_path(user_message, &pending).await?;
        if self.mode == DiagnosisMode::Gar {
            // New observations only feed the hybrid candidate pool.
            parsed.new_observations.clear();
        }
        Ok(parsed)
    }

    /// Hyb candidate expansion: similar tickets → their phenomena → pool.
    async fn expand_candidates_from_tickets(
        &self,
        session: &mut SessionState,
        query: &str,
        top_k: usize,
    ) -> Result<()> {
        let matches = self.retriever.search_by_ticket_description(query, top_k).await?;
        if matches.is_empty() {
            return Ok(());
        }
        let ticket_ids: Vec<String> = matches.iter().map(|m| m.ticket_id.clone()).collect();
        let phenomena = self.retriever.phenomena_by_ticket_ids(&ticket_ids)?;

        let mut added = 0usize;
        for p in phenomena {
            if !session.hybrid_candidate_phenomenon_ids.contains(&p.id) {
                session.hybrid_candidate_phenomenon_ids.push(p.id);
                added += 1;
            }
        }
        debug!(
            tickets = ticket_ids.len(),
            added,
            pool = session.hybrid_candidate_phenomenon_ids.len(),
            "hybrid candidate pool expanded"
        );
        Ok(())
    }

    /// Turn an action into a response, record it on the session, persist.
    async fn finish_turn(
        &self,
        session: &mut SessionState,
        action: Action,
        warnings: Vec<String>,
    ) -> Result<TurnResponse> {
        let (kind, mut message, phenomena, diagnosis) = match action {
            Action::AskInitialInfo => (
                ResponseKind::AskInitialInfo,
                "请描述您遇到的数据库问题，包括具体症状和表现。".to_string(),
                Vec::new(),
                None,
            ),
            Action::AskMoreInfo => (
                ResponseKind::AskMoreInfo,
                self.ask_more_info_message(session)?,
                Vec::new(),
                None,
            ),
            Action::Recommend(scored) => {
                let turn = session.current_turn();
                let ids: Vec<String> = scored.iter().map(|s| s.phenomenon.id.clone()).collect();
                session.record_recommendation(&ids, turn);
                let message = render_recommendation(&scored);
                let items = scored
                    .into_iter()
                    .map(|s| RecommendedItem {
                        phenomenon: s.phenomenon,
                        reason: s.reason,
                    })
                    .collect();
                (ResponseKind::Recommend, message, items, None)
            }
            Action::Diagnose(hypothesis) => {
                let diagnosis = self.responder.generate(session, &hypothesis).await?;
                let message = ResponseGenerator::render_message(&diagnosis);
                (ResponseKind::Diagnosis, message, Vec::new(), Some(diagnosis))
            }
        };

        if !warnings.is_empty() {
            message = format!("{}\n\n{message}", warnings.join("\n"));
        }

        session
            .dialogue_history
            .push(DialogueMessage::assistant(message.clone()));
        self.sessions.save(session)?;

        Ok(TurnResponse {
            session_id: session.session_id.clone(),
            kind,
            message,
            phenomena,
            hypotheses: session.active_hypotheses.clone(),
            diagnosis,
        })
    }

    fn ask_more_info_message(&self, session: &SessionState) -> Result<String> {
        if let Some(top) = session.active_hypotheses.first() {
            if let Some(missing_id) = top.missing_phenomena.first() {
                if let Some(p) = self.store.phenomenon_by_id(missing_id)? {
                    return Ok(format!("请确认是否观察到以下现象：{}", p.description));
                }
            }
        }
        Ok("请提供更多关于问题的详细信息。".to_string())
    }

    /// Load a session for status display.
    pub fn session(&self, session_id: &str) -> Result<Option<SessionState>> {
        self.sessions.load(session_id)
    }

    /// Drop a session (the `/reset` command).
    pub fn reset_session(&self, session_id: &str) -> Result<()> {
        self.locks.remove(session_id);
        self.sessions.delete(session_id)
    }
}

fn render_recommendation(scored: &[ScoredPhenomenon]) -> String {
    let mut message = format!("建议确认以下 {} 个现象：\n", scored.len());
    for (i, item) in scored.iter().enumerate() {
        message.push_str(&format!(
            "\n{}. [{}] {}\n   观察方法: {}\n   {}\n",
            i + 1,
            item.phenomenon.id,
            item.phenomenon.description,
            if item.phenomenon.observation_method.is_empty() {
                "（未提供）"
            } else {
                item.phenomenon.observation_method.as_str()
            },
            item.reason,
        ));
    }
    message.push_str("\n请回复如 \"1确认 2否定\"，或直接描述您的观察。");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{GraphFixture, ScriptedChat};

    fn manager(fixture: &GraphFixture, mode: DiagnosisMode, chat: Arc<ScriptedChat>) -> DialogueManager {
        DialogueManager::new(
            mode,
            EngineConfig::default(),
            fixture.store.clone(),
            fixture.sessions.clone(),
            fixture.embedder.clone(),
            chat,
        )
    }

    // Scenario: happy path to diagnosis in three turns.
    #[tokio::test]
    async fn test_happy_path_three_turns_to_diagnosis() {
        let fixture = GraphFixture::slow_query_corpus();
        let chat = Arc::new(ScriptedChat::new(&["诊断总结"]));
        let dm = manager(&fixture, DiagnosisMode::Gar, chat);

        // Turn 1: recommend, including the slow-query phenomenon.
        let r1 = dm.start_conversation("查询变慢，原来几秒现在要半分钟").await;
        assert_eq!(r1.kind, ResponseKind::Recommend);
        let ids: Vec<&str> = r1.phenomena.iter().map(|p| p.phenomenon.id.as_str()).collect();
        assert!(ids.contains(&"P-0001"));
        assert_eq!(ids.len(), 3);

        // Turn 2: batch feedback; confidence strictly rises.
        let c1 = r1.hypotheses[0].confidence;
        let r2 = dm.continue_conversation(&r1.session_id, "1确认 2确认 3否定").await;
        assert_ne!(r2.kind, ResponseKind::Error);
        let session = dm.session(&r1.session_id).unwrap().unwrap();
        assert_eq!(session.confirmed_phenomena.len(), 2);
        assert_eq!(session.denied_phenomena.len(), 1);
        let top = &r2.hypotheses[0];
        assert_eq!(top.root_cause_id, "RC-0001");
        assert!(top.confidence > c1);

        // Turn 3: the only unresolved phenomenon left belongs to the rival
        // root cause; denying it exhausts the candidates and terminates at
        // moderate confidence.
        assert_eq!(r2.kind, ResponseKind::Recommend);
        let r3 = dm.continue_conversation(&r2.session_id, "1否定").await;
        assert_eq!(r3.kind, ResponseKind::Diagnosis);
        let diagnosis = r3.diagnosis.unwrap();
        assert_eq!(diagnosis.root_cause_id, "RC-0001");
        assert!(!diagnosis.citations.is_empty());
        for citation in &diagnosis.citations {
            assert!(["T-0001", "T-0002"].contains(&citation.ticket_id.as_str()));
        }
    }

    // Scenario: a denial applies the multiplicative penalty to the leader.
    #[tokio::test]
    async fn test_denial_lowers_leader_confidence() {
        let fixture = GraphFixture::slow_query_corpus();
        let dm = manager(&fixture, DiagnosisMode::Gar, Arc::new(ScriptedChat::new(&[])));

        let r1 = dm.start_conversation("查询变慢，原来几秒现在要半分钟").await;
        let r2 = dm.continue_conversation(&r1.session_id, "1确认").await;
        let confident = r2.hypotheses[0].confidence;

        let r3 = dm.continue_conversation(&r2.session_id, "1否定").await;
        assert_ne!(r3.kind, ResponseKind::Error);
        let after = r3
            .hypotheses
            .iter()
            .find(|h| h.root_cause_id == "RC-0001")
            .map(|h| h.confidence)
            .unwrap_or(0.0);
        assert!(after < confident);
    }

    // Scenario: Hyb expands the candidate pool from volunteered
    // observations; the new phenomenon becomes recommendable.
    #[tokio::test]
    async fn test_hyb_new_observation_expands_pool() {
        let fixture = GraphFixture::slow_query_corpus();
        let chat = Arc::new(ScriptedChat::new(&[r#"{
            "feedback": {},
            "new_observations": ["发现很多慢查询"]
        }"#]));
        let engine = EngineConfig {
            ticket_search_top_k: 1,
            midturn_ticket_search_top_k: 1,
            ..Default::default()
        };
        let dm = DialogueManager::new(
            DiagnosisMode::Hyb,
            engine,
            fixture.store.clone(),
            fixture.sessions.clone(),
            fixture.embedder.clone(),
            chat,
        );

        // A problem that only matches the disk ticket initially.
        let r1 = dm.start_conversation("磁盘空间一直在涨").await;
        assert_ne!(r1.kind, ResponseKind::Error);
        let before = dm.session(&r1.session_id).unwrap().unwrap();
        assert!(!before.hybrid_candidate_phenomenon_ids.contains(&"P-0001".to_string()));

        // Free-form feedback mentioning slow queries pulls in T-0001/T-0002
        // phenomena via ticket search.
        let r2 = dm
            .continue_conversation(&r1.session_id, "IO 情况说不好，另外发现很多慢查询")
            .await;
        assert_ne!(r2.kind, ResponseKind::Error);
        let after = dm.session(&r1.session_id).unwrap().unwrap();
        assert!(after.hybrid_candidate_phenomenon_ids.contains(&"P-0001".to_string()));
        assert_eq!(after.new_observations, vec!["发现很多慢查询".to_string()]);
    }

    // Scenario: LLM feedback extraction fails; the session must not
    // advance and the identical retry succeeds once the LLM recovers.
    #[tokio::test]
    async fn test_llm_failure_leaves_session_unadvanced() {
        let fixture = GraphFixture::slow_query_corpus();
        let chat = Arc::new(
            ScriptedChat::new(&[r#"{"feedback": {"P-0003": "denied"}, "new_observations": []}"#])
                .with_json_failures(1),
        );
        let dm = manager(&fixture, DiagnosisMode::Hyb, chat);

        let r1 = dm.start_conversation("查询变慢，原来几秒现在要半分钟").await;
        assert_eq!(r1.kind, ResponseKind::Recommend);
        let before = dm.session(&r1.session_id).unwrap().unwrap();

        let free_form = "IO 还在排查，索引涨了 6 倍";
        let r2 = dm.continue_conversation(&r1.session_id, free_form).await;
        assert_eq!(r2.kind, ResponseKind::Error);

        let unchanged = dm.session(&r1.session_id).unwrap().unwrap();
        assert_eq!(unchanged.dialogue_history.len(), before.dialogue_history.len());
        assert!(unchanged.confirmed_phenomena.is_empty());

        // The scripted model now succeeds; replaying the identical message
        // advances the session.
        let r3 = dm.continue_conversation(&r1.session_id, free_form).await;
        assert_ne!(r3.kind, ResponseKind::Error);
        let advanced = dm.session(&r1.session_id).unwrap().unwrap();
        assert!(advanced.dialogue_history.len() > before.dialogue_history.len());
    }

    // Single-ticket, single-anomaly corpus: one confirmation pushes the
    // only hypothesis past the diagnosis threshold.
    #[tokio::test]
    async fn test_single_ticket_corpus_terminates_after_first_confirm() {
        use dbdiag_core::knowledge::{
            Phenomenon, PhenomenonRootCause, RootCause, Ticket, TicketPhenomenon,
        };
        use dbdiag_storage::RebuildArtifacts;

        let store = Arc::new(dbdiag_storage::KnowledgeStore::in_memory().unwrap());
        store
            .rebuild(&RebuildArtifacts {
                phenomena: vec![Phenomenon {
                    id: "P-0001".into(),
                    description: "连接数超过阈值".into(),
                    observation_method: "show processlist".into(),
                    source_anomaly_ids: vec!["T-0001_anomaly_0".into()],
                    cluster_size: 1,
                    embedding: vec![1.0, 0.0],
                }],
                raw_root_causes: Vec::new(),
                root_causes: vec![RootCause {
                    id: "RC-0001".into(),
                    description: "连接池泄漏".into(),
                    solution: "修复连接释放逻辑".into(),
                    source_raw_root_cause_ids: vec!["RRC-0001".into()],
                    cluster_size: 1,
                    ticket_count: 1,
                    embedding: vec![1.0, 0.0],
                }],
                tickets: vec![Ticket {
                    ticket_id: "T-0001".into(),
                    description: "连接打满".into(),
                    root_cause_id: "RC-0001".into(),
                    solution: "修复连接释放逻辑".into(),
                }],
                ticket_phenomena: vec![TicketPhenomenon {
                    ticket_id: "T-0001".into(),
                    phenomenon_id: "P-0001".into(),
                    why_relevant: String::new(),
                    raw_anomaly_id: "T-0001_anomaly_0".into(),
                }],
                phenomenon_root_causes: vec![PhenomenonRootCause {
                    phenomenon_id: "P-0001".into(),
                    root_cause_id: "RC-0001".into(),
                    ticket_count: 1,
                }],
                ticket_index: Vec::new(),
            })
            .unwrap();

        let sessions = Arc::new(dbdiag_storage::SessionStore::in_memory().unwrap());
        let embedder = Arc::new(crate::testutil::FixedEmbedder::new(&[(
            "数据库连接打满了",
            vec![1.0, 0.0],
        )]));
        let dm = DialogueManager::new(
            DiagnosisMode::Gar,
            EngineConfig::default(),
            store,
            sessions,
            embedder,
            Arc::new(ScriptedChat::new(&["总结"])),
        );

        let r1 = dm.start_conversation("数据库连接打满了").await;
        assert_eq!(r1.kind, ResponseKind::Recommend);

        let r2 = dm.continue_conversation(&r1.session_id, "1确认").await;
        assert_eq!(r2.kind, ResponseKind::Diagnosis);
        let diagnosis = r2.diagnosis.unwrap();
        assert_eq!(diagnosis.root_cause_id, "RC-0001");
        assert!(diagnosis.confidence >= 0.80);
    }

    // Empty corpus: a fresh conversation must not crash and asks for info.
    #[tokio::test]
    async fn test_empty_corpus_asks_initial_info() {
        let store = Arc::new(dbdiag_storage::KnowledgeStore::in_memory().unwrap());
        let sessions = Arc::new(dbdiag_storage::SessionStore::in_memory().unwrap());
        let embedder = Arc::new(crate::testutil::FixedEmbedder::new(&[("q", vec![1.0, 0.0])]));
        let dm = DialogueManager::new(
            DiagnosisMode::Gar,
            EngineConfig::default(),
            store,
            sessions,
            embedder,
            Arc::new(ScriptedChat::new(&[])),
        );

        let response = dm.start_conversation("q").await;
        assert_eq!(response.kind, ResponseKind::AskInitialInfo);
        assert!(!response.message.is_empty());
    }

    // Determinism: identical input over a fixed corpus and mocks yields an
    // identical first response.
    #[tokio::test]
    async fn test_start_conversation_is_deterministic() {
        let fixture = GraphFixture::slow_query_corpus();
        let dm = manager(&fixture, DiagnosisMode::Gar, Arc::new(ScriptedChat::new(&[])));

        let a = dm.start_conversation("查询变慢，原来几秒现在要半分钟").await;
        let b = dm.start_conversation("查询变慢，原来几秒现在要半分钟").await;
        let ids = |r: &TurnResponse| {
            r.phenomena
                .iter()
                .map(|p| p.phenomenon.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(a.kind, b.kind);
        assert_eq!(ids(&a), ids(&b));
        let confs = |r: &TurnResponse| {
            r.hypotheses
                .iter()
                .map(|h| (h.root_cause_id.clone(), h.confidence))
                .collect::<Vec<_>>()
        };
        assert_eq!(confs(&a), confs(&b));
    }

    #[tokio::test]
    async fn test_unknown_session_is_error_response() {
        let fixture = GraphFixture::slow_query_corpus();
        let dm = manager(&fixture, DiagnosisMode::Gar, Arc::new(ScriptedChat::new(&[])));
        let response = dm.continue_conversation("no-such-session", "你好").await;
        assert_eq!(response.kind, ResponseKind::Error);
        assert!(response.message.contains("会话"));
    }

    #[tokio::test]
    async fn test_recommendation_history_grows_monotonically() {
        let fixture = GraphFixture::slow_query_corpus();
        let dm = manager(&fixture, DiagnosisMode::Gar, Arc::new(ScriptedChat::new(&[])));

        let r1 = dm.start_conversation("查询变慢，原来几秒现在要半分钟").await;
        let after_first = dm.session(&r1.session_id).unwrap().unwrap();
        let first_count = after_first.recommended_phenomena.len();
        assert_eq!(first_count, r1.phenomena.len());

        let r2 = dm.continue_conversation(&r1.session_id, "1否定 2否定 3否定").await;
        assert_ne!(r2.kind, ResponseKind::Error);
        let after_second = dm.session(&r1.session_id).unwrap().unwrap();
        assert!(after_second.recommended_phenomena.len() >= first_count);
    }
}
