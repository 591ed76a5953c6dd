//! Interactive diagnosis loop on stdin/stdout.

use anyhow::Result;
use dbdiag_engine::{DiagnosisMode, DialogueManager, RarDialogueManager, ResponseKind};
use std::io::{BufRead, Write};

fn print_welcome(mode_label: &str) {
    println!();
    println!("dbdiag · {mode_label}");
    println!("可用命令: /help /status /reset /exit");
    println!();
    println!("请描述您遇到的数据库问题开始诊断。");
    println!();
}

fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()),
        Err(_) => None,
    }
}

/// The GAR/Hyb interactive loop.
pub(crate) async fn run(manager: DialogueManager) -> Result<()> {
    let mode_label = match manager.mode() {
        DiagnosisMode::Hyb => "混合增强推理 (Hyb)",
        DiagnosisMode::Gar => "图谱增强推理 (GAR)",
    };
    print_welcome(mode_label);

    let mut session_id: Option<String> = None;
    let mut round = 0u32;

    loop {
        let Some(input) = read_line("诊断> ") else {
            println!("\n再见！");
            break;
        };
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            match input.to_lowercase().as_str() {
                "/exit" => {
                    println!("再见！");
                    break;
                }
                "/reset" => {
                    if let Some(id) = session_id.take() {
                        manager.reset_session(&id)?;
                    }
                    round = 0;
                    println!("会话已重置，请重新描述问题。");
                }
                "/status" => print_status(&manager, session_id.as_deref(), round),
                "/help" => {
                    println!("/help 显示帮助");
                    println!("/status 查看会话状态");
                    println!("/reset 重置会话");
                    println!("/exit 结束对话");
                    println!("反馈格式示例: \"1确认 2否定\"，或直接描述您的观察。");
                }
                other => println!("未知命令: {other}，输入 /help 查看可用命令。"),
            }
            continue;
        }

        round += 1;
        let response = match &session_id {
            None => {
                let response = manager.start_conversation(&input).await;
                session_id = Some(response.session_id.clone());
                response
            }
            Some(id) => manager.continue_conversation(id, &input).await,
        };

        println!();
        println!("• 第 {round} 轮");
        if !response.hypotheses.is_empty() {
            let summary = response
                .hypotheses
                .iter()
                .map(|h| format!("{} {:.0}%", h.root_cause_description, h.confidence * 100.0))
                .collect::<Vec<_>>()
                .join(" | ");
            println!("  假设: {summary}");
        }
        println!();
        println!("{}", response.message);
        println!();

        if response.kind == ResponseKind::Diagnosis {
            println!("诊断完成。/reset 可开始新会话。");
        }
    }
    Ok(())
}

fn print_status(manager: &DialogueManager, session_id: Option<&str>, round: u32) {
    let Some(session_id) = session_id else {
        println!("还没有开始诊断会话。");
        return;
    };
    match manager.session(session_id) {
        Ok(Some(session)) => {
            println!(
                "轮次: {round} · 已确认: {} · 已否定: {} · 已推荐: {}",
                session.confirmed_phenomena.len(),
                session.denied_phenomena.len(),
                session.recommended_phenomena.len(),
            );
            for h in &session.active_hypotheses {
                println!(
                    "  [{}] {} {:.0}%",
                    h.root_cause_id,
                    h.root_cause_description,
                    h.confidence * 100.0
                );
            }
        }
        Ok(None) => println!("会话不存在。"),
        Err(err) => println!("状态读取失败: {err}"),
    }
}

/// The RAR interactive loop.
pub(crate) async fn run_rar(manager: RarDialogueManager) -> Result<()> {
    print_welcome("检索增强推理 (RAR)");

    let mut session_id: Option<String> = None;
    loop {
        let Some(input) = read_line("诊断> ") else {
            println!("\n再见！");
            break;
        };
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") {
            println!("再见！");
            break;
        }
        if input.eq_ignore_ascii_case("/reset") {
            session_id = None;
            println!("会话已重置，请重新描述问题。");
            continue;
        }

        let result = match &session_id {
            None => manager.start_conversation(&input).await,
            Some(id) => manager.continue_conversation(id, &input).await,
        };
        match result {
            Ok(response) => {
                session_id = Some(response.session_id.clone());
                println!("\n{}\n", response.message);
            }
            Err(err) => println!("处理失败: {err}"),
        }
    }
    Ok(())
}
