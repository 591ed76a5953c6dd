//! Keyword tokenization for hybrid retrieval.
//!
//! Queries mix ASCII identifiers (metric names, SQL keywords) with CJK
//! prose. ASCII runs become lowercase word tokens; CJK runs are split into
//! overlapping bigrams so substring containment works without a segmenter.
//! Stop-words and single-character tokens are dropped.

const STOP_WORDS: &[&str] = &[
    // English
    "the", "a", "an", "is", "are", "was", "be", "to", "of", "in", "on", "at", "and", "or", "it",
    "my", "we", "our", "very", "now", "has", "have", "had", "with", "for", "from", "this", "that",
    // Chinese function words / fillers
    "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一个", "现在", "原来",
    "请问", "为什么", "怎么", "问题", "出现", "发现",
];

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

/// Extract salient tokens from a free-text query.
pub fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut ascii_run = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let mut flush_ascii = |run: &mut String, out: &mut Vec<String>| {
        if run.len() >= 2 {
            let token = run.to_lowercase();
            if !STOP_WORDS.contains(&token.as_str()) {
                out.push(token);
            }
        }
        run.clear();
    };
    let mut flush_cjk = |run: &mut Vec<char>, out: &mut Vec<String>| {
        if run.len() >= 2 {
            for window in run.windows(2) {
                let bigram: String = window.iter().collect();
                if !STOP_WORDS.contains(&bigram.as_str()) {
                    out.push(bigram);
                }
            }
        }
        run.clear();
    };

    for c in query.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            flush_cjk(&mut cjk_run, &mut tokens);
            ascii_run.push(c);
        } else if is_cjk(c) {
            flush_ascii(&mut ascii_run, &mut tokens);
            cjk_run.push(c);
        } else {
            flush_ascii(&mut ascii_run, &mut tokens);
            flush_cjk(&mut cjk_run, &mut tokens);
        }
    }
    flush_ascii(&mut ascii_run, &mut tokens);
    flush_cjk(&mut cjk_run, &mut tokens);

    tokens.dedup();
    tokens
}

/// How many of the given tokens appear (as substrings, case-insensitive)
/// in the text.
pub fn count_hits(tokens: &[String], text: &str) -> usize {
    let haystack = text.to_lowercase();
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count()
}
