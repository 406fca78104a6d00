//! Output truncation and summaries for tool results.

use serde::Serialize;

/// Captured text beyond this many bytes is cut before reaching the agent.
pub(crate) const MAX_OUTPUT_SIZE: usize = 30_000;
const SUMMARY_MAX_LINES: usize = 3;
const SUMMARY_MAX_CHARS: usize = 240;

/// What `truncate_with_meta` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct TruncationMeta {
    pub(crate) original_len: usize,
    pub(crate) omitted: usize,
    pub(crate) truncated: bool,
}

/// Cut `output` at `MAX_OUTPUT_SIZE` bytes on a char boundary and append a
/// note saying how much was dropped.
pub(crate) fn truncate_with_meta(output: &str) -> (String, TruncationMeta) {
    truncate_at(output, MAX_OUTPUT_SIZE)
}

fn truncate_at(output: &str, limit: usize) -> (String, TruncationMeta) {
    let original_len = output.len();
    if original_len <= limit {
        return (
            output.to_string(),
            TruncationMeta {
                original_len,
                omitted: 0,
                truncated: false,
            },
        );
    }

    let cut = floor_char_boundary(output, limit);
    let omitted = original_len - cut;
    let text = format!(
        "{}...\n\n[Output truncated at {limit} bytes. {omitted} bytes omitted.]",
        &output[..cut]
    );
    (
        text,
        TruncationMeta {
            original_len,
            omitted,
            truncated: true,
        },
    )
}

fn floor_char_boundary(text: &str, max_bytes: usize) -> usize {
    let mut cut = max_bytes.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

/// First few lines of `text`, capped in length, without the truncation note.
pub(crate) fn summarize_output(text: &str) -> String {
    let body = text
        .split_once("\n\n[Output truncated at")
        .map_or(text, |(prefix, _)| prefix);
    let summary = body
        .lines()
        .take(SUMMARY_MAX_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    let summary = summary.trim();

    match summary.char_indices().nth(SUMMARY_MAX_CHARS) {
        Some((end, _)) => format!("{}...", &summary[..end]),
        None => summary.to_string(),
    }
}
