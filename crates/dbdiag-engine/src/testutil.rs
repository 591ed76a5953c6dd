//! Shared fixtures for in-crate tests: a deterministic embedder, a scripted
//! chat model, and a small prebuilt knowledge graph.

use async_trait::async_trait;
use dbdiag_core::knowledge::{
    Phenomenon, PhenomenonRootCause, RootCause, Ticket, TicketIndexEntry, TicketPhenomenon,
};
use dbdiag_core::Result;
use dbdiag_services::{ChatMessage, ChatModel, Embedder};
use dbdiag_storage::{KnowledgeStore, RebuildArtifacts, SessionStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Deterministic embedder: exact-match table with a hashed fallback.
pub(crate) struct FixedEmbedder {
    table: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl FixedEmbedder {
    pub(crate) fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        let table: HashMap<String, Vec<f32>> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let dimension = table.values().next().map_or(4, |v| v.len());
        Self { table, dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.table.get(text) {
            return v.clone();
        }
        let mut v = vec![0.0f32; self.dimension];
        let h: usize = text
            .bytes()
            .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        v[h % self.dimension] = 1.0;
        v
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Chat model that replays scripted responses in order; `chat_json` calls
/// can be made to fail a configurable number of times first.
pub(crate) struct ScriptedChat {
    responses: Mutex<Vec<String>>,
    json_failures_remaining: AtomicUsize,
}

impl ScriptedChat {
    pub(crate) fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            json_failures_remaining: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_json(times: usize) -> Self {
        Self::new(&[]).with_json_failures(times)
    }

    pub(crate) fn with_json_failures(self, times: usize) -> Self {
        self.json_failures_remaining.store(times, Ordering::SeqCst);
        self
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| "好的".to_string())
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(self.next_response())
    }

    async fn chat_json(&self, _messages: &[ChatMessage]) -> Result<serde_json::Value> {
        if self.json_failures_remaining.load(Ordering::SeqCst) > 0 {
            self.json_failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(dbdiag_core::Error::upstream_permanent(
                "structured output still malformed",
            ));
        }
        let text = self.next_response();
        Ok(serde_json::from_str(&text)?)
    }
}

/// A small prebuilt knowledge graph shared across engine tests.
///
/// RC-0001 (index bloat) is supported by P-0001/P-0002/P-0003 via tickets
/// T-0001 and T-0002; RC-0002 (log retention) by P-0004 via T-0003.
pub(crate) struct GraphFixture {
    pub(crate) store: Arc<KnowledgeStore>,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) embedder: Arc<FixedEmbedder>,
}

impl GraphFixture {
    pub(crate) fn slow_query_corpus() -> Self {
        let store = Arc::new(KnowledgeStore::in_memory().unwrap());
        let sessions = Arc::new(SessionStore::in_memory().unwrap());

        let phenomena = vec![
            phenomenon("P-0001", "慢查询数量超过阈值", "查看慢查询日志", vec![0.9, 0.1, 0.0, 0.0]),
            phenomenon("P-0002", "索引大小异常增长", "检查索引体积", vec![0.2, 0.95, 0.0, 0.0]),
            phenomenon("P-0003", "IO 等待时间升高", "iostat 查看 IO 等待", vec![0.3, 0.2, 0.9, 0.0]),
            phenomenon("P-0004", "磁盘使用率持续增长", "df -h 查看磁盘", vec![0.0, 0.0, 0.0, 1.0]),
        ];

        let root_causes = vec![
            RootCause {
                id: "RC-0001".into(),
                description: "批量导入后索引膨胀导致查询变慢".into(),
                solution: "重建索引并更新统计信息".into(),
                source_raw_root_cause_ids: vec!["RRC-0001".into()],
                cluster_size: 1,
                ticket_count: 2,
                embedding: vec![0.9, 0.1, 0.0, 0.0],
            },
            RootCause {
                id: "RC-0002".into(),
                description: "日志保留策略配置错误导致磁盘占满".into(),
                solution: "修正日志保留策略并轮转日志".into(),
                source_raw_root_cause_ids: vec!["RRC-0002".into()],
                cluster_size: 1,
                ticket_count: 1,
                embedding: vec![0.0, 0.0, 0.0, 1.0],
            },
        ];

        let tickets = vec![
            ticket("T-0001", "查询变慢，原来几秒现在要半分钟", "RC-0001", "重建索引并更新统计信息"),
            ticket("T-0002", "订单表延迟升高", "RC-0001", "重建索引"),
            ticket("T-0003", "磁盘空间耗尽", "RC-0002", "修正日志保留策略"),
        ];

        let ticket_phenomena = vec![
            tp("T-0001", "P-0001", "T-0001_anomaly_0"),
            tp("T-0001", "P-0002", "T-0001_anomaly_1"),
            tp("T-0001", "P-0003", "T-0001_anomaly_2"),
            tp("T-0002", "P-0001", "T-0002_anomaly_0"),
            tp("T-0003", "P-0004", "T-0003_anomaly_0"),
        ];

        let phenomenon_root_causes = vec![
            prc("P-0001", "RC-0001", 2),
            prc("P-0002", "RC-0001", 1),
            prc("P-0003", "RC-0001", 1),
            prc("P-0004", "RC-0002", 1),
        ];

        let ticket_index = vec![
            index_entry("T-0001", "查询变慢，原来几秒现在要半分钟", "索引膨胀", vec![1.0, 0.0, 0.0, 0.0]),
            index_entry("T-0002", "订单表延迟升高", "索引膨胀", vec![0.8, 0.2, 0.0, 0.0]),
            index_entry("T-0003", "磁盘空间耗尽", "日志保留策略配置错误", vec![0.0, 0.0, 0.0, 1.0]),
        ];

        store
            .rebuild(&RebuildArtifacts {
                phenomena,
                raw_root_causes: Vec::new(),
                root_causes,
                tickets,
                ticket_phenomena,
                phenomenon_root_causes,
                ticket_index,
            })
            .unwrap();

        let embedder = Arc::new(FixedEmbedder::new(&[
            ("查询变慢，原来几秒现在要半分钟", vec![1.0, 0.0, 0.0, 0.0]),
            ("磁盘空间一直在涨", vec![0.0, 0.0, 0.0, 1.0]),
            ("发现很多慢查询", vec![0.85, 0.15, 0.0, 0.0]),
        ]));

        Self {
            store,
            sessions,
            embedder,
        }
    }
}

fn phenomenon(id: &str, desc: &str, method: &str, embedding: Vec<f32>) -> Phenomenon {
    Phenomenon {
        id: id.into(),
        description: desc.into(),
        observation_method: method.into(),
        source_anomaly_ids: vec![format!("{id}_src")],
        cluster_size: 1,
        embedding,
    }
}

fn ticket(id: &str, desc: &str, rc: &str, solution: &str) -> Ticket {
    Ticket {
        ticket_id: id.into(),
        description: desc.into(),
        root_cause_id: rc.into(),
        solution: solution.into(),
    }
}

fn tp(ticket_id: &str, phenomenon_id: &str, anomaly_id: &str) -> TicketPhenomenon {
    TicketPhenomenon {
        ticket_id: ticket_id.into(),
        phenomenon_id: phenomenon_id.into(),
        why_relevant: String::new(),
        raw_anomaly_id: anomaly_id.into(),
    }
}

fn prc(phenomenon_id: &str, root_cause_id: &str, ticket_count: usize) -> PhenomenonRootCause {
    PhenomenonRootCause {
        phenomenon_id: phenomenon_id.into(),
        root_cause_id: root_cause_id.into(),
        ticket_count,
    }
}

fn index_entry(ticket_id: &str, desc: &str, root_cause: &str, embedding: Vec<f32>) -> TicketIndexEntry {
    TicketIndexEntry {
        ticket_id: ticket_id.into(),
        description: desc.into(),
        root_cause_text: root_cause.into(),
        solution: String::new(),
        combined_text: format!("{desc} {root_cause}"),
        embedding,
    }
}
