//! Report assembly.
//!
//! The report model is asked for two sections split by a fixed divider
//! line: a long-form rendition and a copy-paste-friendly action summary.
//! The long-form section ships as a rendered image when a renderer is
//! wired, otherwise as chunked plain text. Chunking counts code points and
//! never splits a character.

use crate::ports::{ForwardPart, ImageRenderer};

/// Divider line the report prompt demands between the two sections.
pub const SECTION_DIVIDER: &str = "====ACTION SUMMARY====";

/// Split a raw report into (long-form, action summary).
///
/// The divider must occupy a line of its own. Without it the whole output
/// is treated as long-form and no summary part is sent.
pub fn split_sections(content: &str) -> (String, Option<String>) {
    let mut long_form = Vec::new();
    let mut summary = Vec::new();
    let mut seen_divider = false;

    for line in content.lines() {
        if !seen_divider && line.trim() == SECTION_DIVIDER {
            seen_divider = true;
            continue;
        }
        if seen_divider {
            summary.push(line);
        } else {
            long_form.push(line);
        }
    }

    let long_form = long_form.join("\n").trim().to_string();
    if !seen_divider {
        return (long_form, None);
    }
    let summary = summary.join("\n").trim().to_string();
    if summary.is_empty() {
        (long_form, None)
    } else {
        (long_form, Some(summary))
    }
}

/// Split text into chunks of at most `max_chars` code points.
///
/// Indexing by `char` keeps every chunk on a character boundary; a CJK
/// glyph or emoji is never torn in half.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for character in text.chars() {
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(character);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Assemble the forward-bundle parts for a finished report.
pub fn build_forward_parts(
    long_form: &str,
    summary: Option<&str>,
    renderer: Option<&dyn ImageRenderer>,
    max_chars: usize,
) -> Vec<ForwardPart> {
    let mut parts = Vec::new();

    match renderer.and_then(|renderer| renderer.render(long_form)) {
        Some(image) => parts.push(ForwardPart::Image(image)),
        None => parts.extend(chunk_text(long_form, max_chars).into_iter().map(ForwardPart::Text)),
    }

    if let Some(summary) = summary {
        parts.extend(chunk_text(summary, max_chars).into_iter().map(ForwardPart::Text));
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRenderer(Option<Vec<u8>>);

    impl ImageRenderer for FixedRenderer {
        fn render(&self, _text: &str) -> Option<Vec<u8>> {
            self.0.clone()
        }
    }

    // -----------------------------------------------------------------------
    // split_sections
    // -----------------------------------------------------------------------

    #[test]
    fn splits_on_the_divider_line() {
        let raw = format!("the whole story\nacross lines\n{SECTION_DIVIDER}\n- do this\n- then that");
        let (long_form, summary) = split_sections(&raw);
        assert_eq!(long_form, "the whole story\nacross lines");
        assert_eq!(summary.as_deref(), Some("- do this\n- then that"));
    }

    #[test]
    fn divider_with_surrounding_spaces_still_splits() {
        let raw = format!("story\n  {SECTION_DIVIDER}  \nactions");
        let (long_form, summary) = split_sections(&raw);
        assert_eq!(long_form, "story");
        assert_eq!(summary.as_deref(), Some("actions"));
    }

    #[test]
    fn missing_divider_means_no_summary() {
        let (long_form, summary) = split_sections("just one big section");
        assert_eq!(long_form, "just one big section");
        assert!(summary.is_none());
    }

    #[test]
    fn divider_embedded_mid_line_does_not_split() {
        let raw = format!("prefix {SECTION_DIVIDER} suffix");
        let (long_form, summary) = split_sections(&raw);
        assert_eq!(long_form, raw);
        assert!(summary.is_none());
    }

    #[test]
    fn empty_summary_after_divider_collapses_to_none() {
        let raw = format!("story\n{SECTION_DIVIDER}\n   ");
        let (_, summary) = split_sections(&raw);
        assert!(summary.is_none());
    }

    // -----------------------------------------------------------------------
    // chunk_text
    // -----------------------------------------------------------------------

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn chunks_count_code_points_not_bytes() {
        // Five CJK characters are fifteen bytes; a budget of three code
        // points must split 3 + 2, on character boundaries.
        let chunks = chunk_text("你好世界啊", 3);
        assert_eq!(chunks, vec!["你好世".to_string(), "界啊".to_string()]);
    }

    #[test]
    fn emoji_are_never_torn_in_half() {
        let chunks = chunk_text("ab🦀cd🦀", 2);
        assert_eq!(
            chunks,
            vec!["ab".to_string(), "🦀c".to_string(), "d🦀".to_string()]
        );
        for chunk in &chunks {
            // Every chunk is valid UTF-8 by construction; verify boundaries.
            assert!(chunk.chars().count() <= 2);
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_chunk() {
        assert_eq!(
            chunk_text("abcdef", 3),
            vec!["abc".to_string(), "def".to_string()]
        );
    }

    // -----------------------------------------------------------------------
    // build_forward_parts
    // -----------------------------------------------------------------------

    #[test]
    fn renderer_turns_long_form_into_one_image_part() {
        let renderer = FixedRenderer(Some(vec![0x89, 0x50]));
        let parts = build_forward_parts("long story", Some("actions"), Some(&renderer), 100);
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], ForwardPart::Image(bytes) if bytes == &vec![0x89, 0x50]));
        assert_eq!(parts[1], ForwardPart::Text("actions".into()));
    }

    #[test]
    fn unavailable_renderer_falls_back_to_text_chunks() {
        let renderer = FixedRenderer(None);
        let parts = build_forward_parts("abcdef", None, Some(&renderer), 3);
        assert_eq!(
            parts,
            vec![
                ForwardPart::Text("abc".into()),
                ForwardPart::Text("def".into())
            ]
        );
    }

    #[test]
    fn no_renderer_chunks_both_sections() {
        let parts = build_forward_parts("abcd", Some("efgh"), None, 2);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], ForwardPart::Text("ab".into()));
        assert_eq!(parts[3], ForwardPart::Text("gh".into()));
    }
}
