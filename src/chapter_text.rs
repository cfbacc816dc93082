//! Cleanup of scraped chapter text before it is stored.

/// Converts a scraped chapter body to plain paragraphs.
///
/// HTML input goes through `html2md`, which keeps paragraph breaks and
/// decodes entities. Runs of blank lines collapse to a single separator.
pub fn normalize_body(raw: &str) -> String {
    let text = if looks_like_html(raw) {
        html2md::parse_html(raw)
    } else {
        raw.to_owned()
    };

    let mut out = String::with_capacity(text.len());
    let mut pending_break = false;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if pending_break {
            out.push_str("\n\n");
            pending_break = false;
        } else if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

pub fn normalize_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(raw: &str) -> bool {
    let Some(open) = raw.find('<') else {
        return false;
    };
    raw[open..].contains('>')
}
