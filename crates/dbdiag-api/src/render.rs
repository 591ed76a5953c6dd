//! Minimal HTML rendering for the WebSocket chat surface.

use dbdiag_engine::{ResponseKind, TurnResponse};

/// Escape text for embedding into HTML.
pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn paragraph(class: &str, text: &str) -> String {
    format!(
        "<div class=\"{class}\">{}</div>",
        escape(text).replace('\n', "<br>")
    )
}

/// Render one turn response as a self-contained HTML fragment.
pub(crate) fn render_response(round: u32, response: &TurnResponse) -> String {
    let mut html = format!("<div class=\"round\">• 第 {round} 轮</div>");

    if !response.hypotheses.is_empty() {
        let summary = response
            .hypotheses
            .iter()
            .map(|h| {
                format!(
                    "{} {:.0}%",
                    escape(&h.root_cause_description),
                    h.confidence * 100.0
                )
            })
            .collect::<Vec<_>>()
            .join(" | ");
        html.push_str(&format!("<div class=\"hypotheses\">假设: {summary}</div>"));
    }

    let class = match response.kind {
        ResponseKind::Diagnosis => "diagnosis",
        ResponseKind::Error => "error",
        _ => "message",
    };
    html.push_str(&paragraph(class, &response.message));
    html
}

/// The welcome banner shown when a connection opens.
pub(crate) fn render_welcome(mode: &str) -> String {
    format!(
        "<div class=\"welcome\"><b>dbdiag</b> · {} 模式<br>\
         可用命令: /help /status /reset /exit<br>\
         请描述您遇到的数据库问题开始诊断。</div>",
        escape(mode)
    )
}

pub(crate) fn render_help() -> String {
    "<div class=\"help\">/help 显示帮助<br>/status 查看会话状态<br>\
     /reset 重置会话<br>/exit 结束对话<br>\
     反馈格式示例: \"1确认 2否定\"，或直接描述您的观察。</div>"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
    }

    #[test]
    fn test_render_response_marks_round_and_kind() {
        let response = TurnResponse {
            session_id: "s".into(),
            kind: ResponseKind::Error,
            message: "失败<脚本>".into(),
            phenomena: Vec::new(),
            hypotheses: Vec::new(),
            diagnosis: None,
        };
        let html = render_response(2, &response);
        assert!(html.contains("第 2 轮"));
        assert!(html.contains("class=\"error\""));
        assert!(html.contains("&lt;脚本&gt;"));
    }
}
