//! Canonicalization prompts for the index builder.

use dbdiag_services::ChatMessage;

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|d| format!("- {d}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merge multiple similar anomaly descriptions into one canonical
/// phenomenon description.
pub(crate) fn merge_phenomenon(descriptions: &[String]) -> Vec<ChatMessage> {
    let prompt = format!(
        "以下是多个相似的数据库异常现象描述：\n{}\n\n\
         请生成一个标准化的异常现象描述，要求：\n\
         1. 保留关键指标名称\n\
         2. 使用通用的阈值表述（如\"超过阈值\"而非具体数字）\n\
         3. 一句话，简洁明确\n\n\
         只输出标准化描述，不要其他内容。",
        bullet_list(descriptions)
    );
    vec![ChatMessage::user(prompt)]
}

/// Merge multiple similar root-cause descriptions into one canonical text.
pub(crate) fn merge_root_cause(descriptions: &[String]) -> Vec<ChatMessage> {
    let prompt = format!(
        "以下是多个相似的数据库问题根因描述：\n{}\n\n\
         请生成一个标准化的根因描述，要求：\n\
         1. 保留核心问题原因\n\
         2. 简洁明确\n\
         3. 不超过 50 字\n\n\
         只输出标准化描述，不要其他内容。",
        bullet_list(descriptions)
    );
    vec![ChatMessage::user(prompt)]
}

/// Merge solutions for one root cause: deduplicate steps, keep every
/// distinct remediation action.
pub(crate) fn merge_solution(solutions: &[String]) -> Vec<ChatMessage> {
    let non_empty: Vec<String> = solutions.iter().filter(|s| !s.is_empty()).cloned().collect();
    let prompt = format!(
        "以下是针对同一根因的多个解决方案：\n{}\n\n\
         请合并生成一个综合的解决方案，要求：\n\
         1. 包含所有有效的解决步骤\n\
         2. 去除重复内容\n\
         3. 按执行顺序排列\n\n\
         只输出合并后的解决方案，不要其他内容。",
        bullet_list(&non_empty)
    );
    vec![ChatMessage::user(prompt)]
}
