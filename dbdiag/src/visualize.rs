//! Knowledge-graph export as a self-contained HTML page.
//!
//! Phenomena and root causes become nodes; `PhenomenonRootCause` rows
//! become edges weighted by their co-occurrence ticket count. The page
//! renders with vis-network loaded from a CDN.

use anyhow::Result;
use dbdiag_core::config::Config;
use dbdiag_core::Error;
use dbdiag_storage::KnowledgeStore;
use std::path::Path;

pub(crate) fn run(config: &Config, out: &Path) -> Result<()> {
    let store = KnowledgeStore::open(&config.storage.db_path)?;

    let phenomena = store.all_phenomena()?;
    let root_causes = store.all_root_causes()?;
    let associations = store.all_phenomenon_root_causes()?;

    if phenomena.is_empty() && root_causes.is_empty() {
        return Err(Error::data(
            "knowledge graph is empty; run `dbdiag import` and `dbdiag rebuild-index` first",
        )
        .into());
    }

    let mut nodes = Vec::new();
    for p in &phenomena {
        nodes.push(serde_json::json!({
            "id": p.id,
            "label": p.id,
            "title": p.description,
            "group": "phenomenon",
            "value": p.cluster_size,
        }));
    }
    for rc in &root_causes {
        nodes.push(serde_json::json!({
            "id": rc.id,
            "label": rc.id,
            "title": rc.description,
            "group": "root_cause",
            "value": rc.ticket_count,
        }));
    }
    let edges: Vec<serde_json::Value> = associations
        .iter()
        .map(|a| {
            serde_json::json!({
                "from": a.phenomenon_id,
                "to": a.root_cause_id,
                "value": a.ticket_count,
                "title": format!("{} tickets", a.ticket_count),
            })
        })
        .collect();

    let html = render_page(
        &serde_json::to_string(&nodes)?,
        &serde_json::to_string(&edges)?,
    );
    std::fs::write(out, html)
        .map_err(|e| Error::data(format!("cannot write {}: {e}", out.display())))?;

    println!(
        "wrote {} ({} phenomena, {} root causes, {} edges)",
        out.display(),
        phenomena.len(),
        root_causes.len(),
        edges.len()
    );
    Ok(())
}

fn render_page(nodes_json: &str, edges_json: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="zh">
<head>
<meta charset="utf-8">
<title>dbdiag knowledge graph</title>
<script src="https://unpkg.com/vis-network/standalone/umd/vis-network.min.js"></script>
<style>
  body {{ margin: 0; font-family: sans-serif; }}
  #graph {{ width: 100vw; height: 100vh; }}
  #legend {{ position: absolute; top: 12px; left: 12px; background: #fff;
             padding: 8px 12px; border: 1px solid #ccc; border-radius: 4px; }}
</style>
</head>
<body>
<div id="legend">蓝色: 现象 (P-…) · 橙色: 根因 (RC-…) · 边粗细: 关联工单数</div>
<div id="graph"></div>
<script>
  const nodes = new vis.DataSet({nodes_json});
  const edges = new vis.DataSet({edges_json});
  const network = new vis.Network(
    document.getElementById("graph"),
    {{ nodes, edges }},
    {{
      groups: {{
        phenomenon: {{ color: "#4f81bd", shape: "dot" }},
        root_cause: {{ color: "#e8823a", shape: "diamond" }},
      }},
      edges: {{ scaling: {{ min: 1, max: 8 }}, color: {{ opacity: 0.6 }} }},
      physics: {{ solver: "forceAtlas2Based", stabilization: {{ iterations: 120 }} }},
    }}
  );
</script>
</body>
</html>
"##
    )
}
