//! Plain-text rendering of a digest.

use std::fmt::Write;

use chrono::Local;

use crate::digest::{Digest, DigestItem};

/// Banner shown when at least one item was judged important.
pub const IMPORTANT_BANNER: &str =
    "Some messages seem to be important. You might want to check them out.";
/// Banner shown when nothing was judged important.
pub const CALM_BANNER: &str = "No important messages found - you likely didn't miss anything.";
/// Heading of the section with the full texts.
pub const ORIGINALS_HEADING: &str = "------ Original messages ------";

/// One summary line: `title, sender: summary`.
#[must_use]
pub fn summary_line(item: &DigestItem) -> String {
    format!("{}, {}: {}", item.title, item.sender, item.summary)
}

/// One original-message line: `title, sender: text`.
#[must_use]
pub fn original_line(item: &DigestItem) -> String {
    format!("{}, {}: {}", item.title, item.sender, item.text)
}

/// Header lines: update time, banner and daily summary.
#[must_use]
pub fn header_lines(digest: &Digest) -> Vec<String> {
    let updated = digest.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    let mut lines = vec![format!("Updated at {updated}."), String::new()];

    if digest.any_important() {
        lines.push(IMPORTANT_BANNER.to_string());
        if !digest.daily_summary.is_empty() {
            lines.push(format!("Summary: {}", digest.daily_summary));
        }
    } else {
        lines.push(CALM_BANNER.to_string());
    }
    lines
}

/// Render the whole digest, optionally followed by the original texts.
#[must_use]
pub fn render(digest: &Digest, with_originals: bool) -> String {
    let mut out = header_lines(digest).join("\n");
    out.push_str("\n\n");

    if digest.items.is_empty() {
        out.push_str("No new messages.\n");
    }
    for item in &digest.items {
        let marker = if item.important { "* " } else { "  " };
        let _ = writeln!(out, "{marker}{}", summary_line(item));
    }

    if with_originals && !digest.items.is_empty() {
        let _ = write!(out, "\n{ORIGINALS_HEADING}\n\n");
        for item in &digest.items {
            let _ = writeln!(out, "{}\n", original_line(item));
        }
    }
    out
}
