//! Rich-text normalization for model consumption.
//!
//! The chat transport delivers messages as typed segments. Before any text
//! reaches a model prompt it passes through here: member identities are
//! replaced with generic tokens, media become bracketed placeholders, and
//! quoted-reply markers are dropped. Nothing that leaves this module may
//! carry a raw user id.

use crate::{InboundMessage, Segment, UserId};

use serde::Serialize;

/// Mention classification for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MentionSummary {
    pub mentions_assistant: bool,
    pub mentions_other: bool,
    pub mentions_all: bool,
}

/// Classify who a message mentions.
///
/// A message that mentions a specific other member and not the assistant is
/// addressed at someone else; the orchestrator excludes it from
/// consideration entirely.
pub fn summarize_mentions(message: &InboundMessage, assistant: UserId) -> MentionSummary {
    let mut summary = MentionSummary {
        mentions_assistant: false,
        mentions_other: false,
        mentions_all: false,
    };
    for segment in &message.segments {
        match segment {
            Segment::Mention { user } if *user == assistant => {
                summary.mentions_assistant = true;
            }
            Segment::Mention { .. } => summary.mentions_other = true,
            Segment::MentionAll => summary.mentions_all = true,
            _ => {}
        }
    }
    summary
}

/// Flatten a message into one plain-text line.
///
/// Mentions render as fixed tokens (`@assistant`, `@other`, `@all`) so the
/// model never sees a platform id; media render as short placeholders, never
/// URLs; quoted replies are dropped (their content is duplicated elsewhere).
/// Whitespace is collapsed and the result trimmed.
pub fn normalize_message(message: &InboundMessage, assistant: UserId) -> String {
    let mut out = String::new();
    for segment in &message.segments {
        match segment {
            Segment::Text { text } => {
                out.push(' ');
                out.push_str(text);
                out.push(' ');
            }
            Segment::Mention { user } if *user == assistant => out.push_str(" @assistant "),
            Segment::Mention { .. } => out.push_str(" @other "),
            Segment::MentionAll => out.push_str(" @all "),
            Segment::Image => out.push_str(" [image] "),
            Segment::Video => out.push_str(" [video] "),
            Segment::Voice => out.push_str(" [voice] "),
            Segment::File => out.push_str(" [file] "),
            Segment::Card => out.push_str(" [card] "),
            Segment::Reply => {}
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = true;
    for character in text.chars() {
        if character.is_whitespace() {
            in_gap = true;
        } else {
            if in_gap && !out.is_empty() {
                out.push(' ');
            }
            in_gap = false;
            out.push(character);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoomId;
    use chrono::Utc;

    const ASSISTANT: UserId = UserId(10_000);

    fn message(segments: Vec<Segment>) -> InboundMessage {
        InboundMessage {
            sender: UserId(42_000_001),
            room: Some(RoomId(7)),
            segments,
            timestamp: Utc::now(),
        }
    }

    fn text(value: &str) -> Segment {
        Segment::Text { text: value.into() }
    }

    // -----------------------------------------------------------------------
    // normalize_message
    // -----------------------------------------------------------------------

    #[test]
    fn plain_text_passes_through_trimmed() {
        let msg = message(vec![text("  hello   world  ")]);
        assert_eq!(normalize_message(&msg, ASSISTANT), "hello world");
    }

    #[test]
    fn assistant_mention_renders_as_fixed_token() {
        let msg = message(vec![
            Segment::Mention { user: ASSISTANT },
            text("what's the plan?"),
        ]);
        assert_eq!(
            normalize_message(&msg, ASSISTANT),
            "@assistant what's the plan?"
        );
    }

    #[test]
    fn other_member_identity_is_never_exposed() {
        let msg = message(vec![
            Segment::Mention {
                user: UserId(55_555_555),
            },
            text("are you coming?"),
        ]);
        let normalized = normalize_message(&msg, ASSISTANT);
        assert_eq!(normalized, "@other are you coming?");
        assert!(!normalized.contains("55555555"));
    }

    #[test]
    fn media_segments_become_placeholders() {
        let msg = message(vec![
            text("look at this"),
            Segment::Image,
            Segment::Video,
            Segment::Voice,
            Segment::File,
            Segment::Card,
        ]);
        assert_eq!(
            normalize_message(&msg, ASSISTANT),
            "look at this [image] [video] [voice] [file] [card]"
        );
    }

    #[test]
    fn reply_segments_are_dropped() {
        let msg = message(vec![Segment::Reply, text("agreed")]);
        assert_eq!(normalize_message(&msg, ASSISTANT), "agreed");
    }

    #[test]
    fn whitespace_only_message_normalizes_to_empty() {
        let msg = message(vec![text("   \n\t  ")]);
        assert_eq!(normalize_message(&msg, ASSISTANT), "");
    }

    #[test]
    fn newlines_inside_text_collapse_to_spaces() {
        let msg = message(vec![text("line one\nline two")]);
        assert_eq!(normalize_message(&msg, ASSISTANT), "line one line two");
    }

    // -----------------------------------------------------------------------
    // summarize_mentions
    // -----------------------------------------------------------------------

    #[test]
    fn summary_distinguishes_assistant_from_other() {
        let msg = message(vec![
            Segment::Mention { user: ASSISTANT },
            Segment::Mention {
                user: UserId(123_456_789),
            },
        ]);
        let summary = summarize_mentions(&msg, ASSISTANT);
        assert!(summary.mentions_assistant);
        assert!(summary.mentions_other);
        assert!(!summary.mentions_all);
    }

    #[test]
    fn summary_flags_mention_all() {
        let msg = message(vec![Segment::MentionAll, text("meeting at 5")]);
        let summary = summarize_mentions(&msg, ASSISTANT);
        assert!(!summary.mentions_assistant);
        assert!(!summary.mentions_other);
        assert!(summary.mentions_all);
    }

    #[test]
    fn summary_is_empty_for_plain_text() {
        let msg = message(vec![text("no mentions here")]);
        let summary = summarize_mentions(&msg, ASSISTANT);
        assert!(!summary.mentions_assistant);
        assert!(!summary.mentions_other);
        assert!(!summary.mentions_all);
    }
}
