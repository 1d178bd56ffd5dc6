//! Parsing of AI conflict analyses.
//!
//! The analysis prompt asks for a JSON object. The parser accepts it bare,
//! fenced, or embedded in prose, tolerates camelCase keys, and falls back to
//! a `manual` entry for every file it cannot find an analysis for.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::domain::models::{ConflictAnalysis, ConflictResolution, FileConflictAnalysis};

const RECOMMENDATION_PREVIEW: usize = 300;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex")
});

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    conflicts: Vec<RawFileAnalysis>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default, alias = "autoResolvable")]
    auto_resolvable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawFileAnalysis {
    #[serde(alias = "path")]
    file: String,
    #[serde(default)]
    analysis: String,
    #[serde(default, alias = "suggestedResolution", alias = "resolution")]
    suggested_resolution: Option<String>,
}

fn extract_json(response: &str) -> Option<&str> {
    if let Some(m) = FENCED_JSON.captures(response).and_then(|c| c.get(1)) {
        return Some(m.as_str());
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

fn preview(response: &str) -> String {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return "Conflict analysis returned no output; resolve manually.".to_string();
    }
    trimmed.chars().take(RECOMMENDATION_PREVIEW).collect()
}

/// Parse an analysis for the given conflicted files.
pub fn parse_conflict_analysis(response: &str, files: &[String]) -> ConflictAnalysis {
    let raw = match extract_json(response).map(serde_json::from_str::<RawAnalysis>) {
        Some(Ok(raw)) => raw,
        Some(Err(e)) => {
            debug!(error = %e, "Conflict analysis JSON did not parse");
            return ConflictAnalysis::manual_fallback(files, preview(response));
        }
        None => return ConflictAnalysis::manual_fallback(files, preview(response)),
    };

    let mut analysed: Vec<FileConflictAnalysis> = raw
        .conflicts
        .into_iter()
        .map(|c| FileConflictAnalysis {
            file: c.file,
            analysis: c.analysis,
            suggested_resolution: c
                .suggested_resolution
                .as_deref()
                .map_or(ConflictResolution::Manual, ConflictResolution::parse_lenient),
        })
        .collect();

    for file in files {
        if !analysed.iter().any(|a| &a.file == file) {
            analysed.push(FileConflictAnalysis {
                file: file.clone(),
                analysis: "No analysis returned for this file; review it manually.".to_string(),
                suggested_resolution: ConflictResolution::Manual,
            });
        }
    }

    let all_automatic = analysed
        .iter()
        .all(|a| a.suggested_resolution != ConflictResolution::Manual);
    ConflictAnalysis {
        conflicts: analysed,
        recommendation: raw
            .recommendation
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "No overall recommendation given.".to_string()),
        auto_resolvable: raw.auto_resolvable.unwrap_or(all_automatic) && all_automatic,
    }
}

/// Whether text still contains merge conflict markers. A bare `=======`
/// line is not one on its own; markdown headings and config files use it.
pub fn has_conflict_markers(content: &str) -> bool {
    content.lines().any(|line| {
        line.starts_with("<<<<<<< ")
            || line == "<<<<<<<"
            || line.starts_with(">>>>>>> ")
            || line == ">>>>>>>"
    })
}
