//! Tolerant parser for QA review responses.
//!
//! Reviews are asked for `QA_RESULT:`, `FILES_REVIEWED:` and `FEEDBACK:`
//! lines, but models drift. The verdict is read from a labelled line when
//! there is one, otherwise from well-known phrasings. A failed review always
//! carries non-empty feedback: a labelled block, else bullet points, else the
//! last paragraph, else a preview of the raw response.

use regex::Regex;
use std::sync::LazyLock;

const PREVIEW_CHARS: usize = 500;

static VERDICT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[\s>*#`_-]*(QA[_ ]?RESULT|VERDICT|RESULT|STATUS|DECISION)[\s*_`]*:[\s*_`]*([A-Z_ ]+)",
    )
    .expect("valid regex")
});

static FAIL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\*\*FAIL(?:ED)?\*\*|\bFAIL(?:ED|URE)?\b|\bREJECTED\b|\bCHANGES[ _]REQUESTED\b|\bNEEDS[ _]WORK\b)")
        .expect("valid regex")
});

// "0 failed", "no failures": counts, not verdicts
static ZERO_FAILURES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:0|no|zero)\s+(?:(?:tests?|checks?)\s+)?FAIL(?:ED|URES?|S)?\b").expect("valid regex")
});

static PASS_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bLGTM\b|\bAPPROVED\b|\bPASS(?:ED)?\b|looks good to me|all checks pass)")
        .expect("valid regex")
});

static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s>*#`_-]*([A-Za-z][A-Za-z _]{1,30}?)[\s*_`]*:(.*)$").expect("valid regex")
});

static BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•+]|\d+[.)])\s+(.+)$").expect("valid regex")
});

/// Outcome of parsing a review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub passed: bool,
    pub files_reviewed: Vec<String>,
    /// Empty only for passing reviews without feedback
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Verdict,
    Files,
    Feedback,
    Other,
}

fn classify(label: &str) -> Label {
    let normalized = label.trim().to_ascii_uppercase().replace(' ', "_");
    match normalized.as_str() {
        "QA_RESULT" | "QARESULT" | "VERDICT" | "RESULT" | "STATUS" | "DECISION" => Label::Verdict,
        "FILES_REVIEWED" | "FILES" | "REVIEWED_FILES" => Label::Files,
        "FEEDBACK" | "ISSUES" | "PROBLEMS" | "REASON" | "REASONS" | "REQUIRED_CHANGES" => {
            Label::Feedback
        }
        _ => Label::Other,
    }
}

/// Label of a `LABEL: value` line, if it is one we know.
fn known_label(line: &str) -> Option<(Label, String)> {
    let caps = LABEL_LINE.captures(line)?;
    let label = classify(caps.get(1)?.as_str());
    (label != Label::Other).then(|| (label, caps.get(2).map_or("", |m| m.as_str()).trim().to_string()))
}

fn is_placeholder(text: &str) -> bool {
    let t = text.trim().trim_matches(|c| c == '*' || c == '`' || c == '_');
    t.is_empty() || matches!(t.to_ascii_lowercase().as_str(), "n/a" | "na" | "none" | "-" | "nothing")
}

fn verdict_word(word: &str) -> Option<bool> {
    let word = word.trim().to_ascii_uppercase();
    if word.starts_with("PASS") || word.starts_with("APPROVED") || word.starts_with("LGTM") {
        return Some(true);
    }
    if word.starts_with("FAIL") || word.starts_with("REJECT") || word.starts_with("CHANGES") {
        return Some(false);
    }
    None
}

/// Verdict from labelled lines. A `QA_RESULT:` line outranks the looser
/// labels wherever it appears.
fn labelled_verdict(response: &str) -> Option<bool> {
    let mut first = None;
    for caps in VERDICT_LINE.captures_iter(response) {
        let Some(verdict) = caps.get(2).and_then(|m| verdict_word(m.as_str())) else {
            continue;
        };
        if caps[1].to_ascii_uppercase().starts_with("QA") {
            return Some(verdict);
        }
        first.get_or_insert(verdict);
    }
    first
}

fn parse_verdict(response: &str) -> bool {
    if let Some(verdict) = labelled_verdict(response) {
        return verdict;
    }
    // Unlabelled: any failure phrasing wins, then pass phrasings, else fail
    if FAIL_MARKER.is_match(&ZERO_FAILURES.replace_all(response, "")) {
        return false;
    }
    PASS_MARKER.is_match(response)
}

/// Lines belonging to the block that starts at a labelled line.
fn labelled_block(lines: &[&str], wanted: Label) -> Option<String> {
    let start = lines
        .iter()
        .position(|l| known_label(l).is_some_and(|(label, _)| label == wanted))?;
    let (_, first) = known_label(lines[start])?;

    let mut parts = Vec::new();
    if !first.is_empty() {
        parts.push(first);
    }
    for line in &lines[start + 1..] {
        if known_label(line).is_some() {
            break;
        }
        parts.push(line.trim_end().to_string());
    }
    let block = parts.join("\n").trim().to_string();
    (!is_placeholder(&block)).then_some(block)
}

fn clean_file(entry: &str) -> Option<String> {
    let f = entry
        .trim()
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '•' | '+'))
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .trim();
    (!is_placeholder(f)).then(|| f.to_string())
}

fn parse_files(lines: &[&str]) -> Vec<String> {
    let Some(block) = labelled_block(lines, Label::Files) else {
        return vec![];
    };
    let mut files = Vec::new();
    for line in block.lines() {
        if line.trim().is_empty() {
            break;
        }
        for entry in line.split(',') {
            if let Some(f) = clean_file(entry) {
                if !files.contains(&f) {
                    files.push(f);
                }
            }
        }
    }
    files
}

fn bullet_feedback(lines: &[&str]) -> Option<String> {
    let bullets: Vec<String> = lines
        .iter()
        .filter(|l| known_label(l).is_none())
        .filter(|l| BULLET.is_match(l))
        .map(|l| l.trim().to_string())
        .collect();
    (!bullets.is_empty()).then(|| bullets.join("\n"))
}

fn last_paragraph(lines: &[&str]) -> Option<String> {
    let text: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| known_label(l).is_none())
        .collect();
    text.join("\n")
        .rsplit("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(String::from)
}

fn preview(response: &str) -> String {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return "QA review returned an empty response".to_string();
    }
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    if trimmed.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!("QA review could not be parsed. Response preview: {preview}")
}

/// Parse a review response. Never fails.
pub fn parse_review(response: &str) -> ReviewVerdict {
    let lines: Vec<&str> = response.lines().collect();
    let passed = parse_verdict(response);
    let files_reviewed = parse_files(&lines);

    let feedback = if passed {
        labelled_block(&lines, Label::Feedback).unwrap_or_default()
    } else {
        labelled_block(&lines, Label::Feedback)
            .or_else(|| bullet_feedback(&lines))
            .or_else(|| last_paragraph(&lines))
            .unwrap_or_else(|| preview(response))
    };

    ReviewVerdict {
        passed,
        files_reviewed,
        feedback,
    }
}
