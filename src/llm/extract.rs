//! Pulls the code out of an LLM answer.
//!
//! Fence conventions are tried in order: "```solidity", a malformed
//! "```\nsolidity", then any "```". The code runs from the opening marker to
//! the last fence in the text. Without any fence the whole answer is the code.

const FENCE: &str = "```";
const OPENERS: [&str; 2] = ["```solidity", "```\nsolidity"];

pub fn extract_code(answer: &str) -> String {
    for opener in OPENERS {
        if let Some(start) = answer.find(opener) {
            return between(answer, start + opener.len());
        }
    }

    if let Some(start) = answer.find(FENCE) {
        let body_start = start + FENCE.len();
        return between(answer, body_start + info_string_len(&answer[body_start..]));
    }

    answer.to_string()
}

/// Text from `from` to the last fence, trimmed. An unterminated fence runs to the end.
fn between(answer: &str, from: usize) -> String {
    let end = answer
        .rfind(FENCE)
        .filter(|&end| end >= from)
        .unwrap_or(answer.len());

    answer[from..end].trim().to_string()
}

/// Length of a language tag glued to a bare fence ("```sol\n"), zero otherwise.
fn info_string_len(rest: &str) -> usize {
    let tag_len = rest
        .find('\n')
        .filter(|&n| n > 0)
        .filter(|&n| rest[..n].chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

    tag_len.unwrap_or(0)
}
