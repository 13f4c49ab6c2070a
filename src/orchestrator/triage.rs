//! Engage-decision parsing.
//!
//! The triage model is instructed to answer with a single-line JSON object
//! or a bare YES/NO. The parser is deliberately strict: fenced output,
//! prose, multi-line JSON — anything that is not exactly the asked-for
//! shape — reads as "do not engage". A noisy classifier must bias toward
//! silence, not toward inserting the assistant into conversations.

use serde::Deserialize;

/// Parsed engage decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriageDecision {
    pub engage: bool,
    pub confidence: f32,
}

impl TriageDecision {
    const NO: Self = Self {
        engage: false,
        confidence: 0.0,
    };
}

#[derive(Debug, Deserialize)]
struct Verdict {
    decision: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    #[allow(dead_code)]
    reason: Option<String>,
}

/// Parse a raw triage response. Pure: the same input always yields the same
/// decision.
pub fn parse_decision(raw: &str, min_confidence: f32) -> TriageDecision {
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case("yes") {
        return TriageDecision {
            engage: true,
            confidence: 1.0,
        };
    }
    if trimmed.eq_ignore_ascii_case("no") {
        return TriageDecision {
            engage: false,
            confidence: 1.0,
        };
    }

    // Single line only. A model that wraps its JSON in fences or commentary
    // has not followed the contract.
    if trimmed.is_empty() || trimmed.lines().count() != 1 {
        return TriageDecision::NO;
    }

    let Ok(verdict) = serde_json::from_str::<Verdict>(trimmed) else {
        return TriageDecision::NO;
    };

    let affirmative = verdict.decision.eq_ignore_ascii_case("yes");
    TriageDecision {
        engage: affirmative && verdict.confidence >= min_confidence,
        confidence: verdict.confidence,
    }
}
