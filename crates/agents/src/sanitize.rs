//! Reply hygiene: nothing the model emits for itself reaches a user.
//!
//! Rules run in a fixed order and the whole pass is idempotent, so a reply
//! that is sanitized twice comes out the same as one sanitized once.

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Markdown emphasis markers. Only runs in emphasis position are removed, so
/// `john_doe` and `3 * 4` survive.
const EMPHASIS_CHARS: &[char] = &['*', '_', '`'];

/// Lines that start with one of these (case-insensitive) are model-internal.
const MARKER_PREFIXES: &[&str] = &[
    "[debug",
    "[internal",
    "[trace",
    "[system",
    "[thinking",
    "note to self:",
    "internal monologue:",
    "debug:",
    "trace:",
];

/// A reply that opens with reasoning before one of these keeps only the part
/// from the greeting on.
const GREETINGS: &[&str] = &["Hello!", "Hi there!", "Hi!"];

const ELLIPSIS: char = '…';

/// Clean a raw model reply for a channel whose replies are capped at
/// `max_chars` characters. May return an empty string.
#[must_use]
pub fn sanitize(raw: &str, max_chars: usize) -> String {
    let text = strip_thinking(raw);
    let text = strip_markup(text);
    let text = drop_marker_lines(&text);
    let text = normalize_whitespace(&text);
    let text = cut_preamble(&text);
    truncate(text, max_chars)
}

/// Remove `<think>...</think>` blocks. An unclosed block hides the rest of
/// the reply; a stray closing tag is dropped.
fn strip_thinking(text: &str) -> String {
    // ASCII lowering keeps byte offsets aligned with `text`.
    let lowered = text.to_ascii_lowercase();
    let mut visible = String::with_capacity(text.len());
    let mut pos = 0;

    loop {
        let rest = &lowered[pos..];
        match rest.find(THINK_OPEN) {
            Some(start) => {
                visible.push_str(&text[pos..pos + start]);
                let after_open = pos + start + THINK_OPEN.len();
                match lowered[after_open..].find(THINK_CLOSE) {
                    Some(end) => pos = after_open + end + THINK_CLOSE.len(),
                    None => break,
                }
            },
            None => {
                visible.push_str(&text[pos..]);
                break;
            },
        }
    }

    let lowered = visible.to_ascii_lowercase();
    let mut out = String::with_capacity(visible.len());
    let mut pos = 0;
    while let Some(idx) = lowered[pos..].find(THINK_CLOSE) {
        out.push_str(&visible[pos..pos + idx]);
        pos += idx + THINK_CLOSE.len();
    }
    out.push_str(&visible[pos..]);
    out
}

/// Remove chat-template control tokens such as `<|im_end|>` or `<|eot_id|>`.
fn strip_control_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<|") {
        let after = &rest[start + 2..];
        match after.find("|>") {
            Some(end) if !after[..end].contains(['<', '>']) => {
                out.push_str(&rest[..start]);
                rest = &after[end + 2..];
            },
            _ => {
                out.push_str(&rest[..start + 2]);
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}

/// Control tokens, tags and emphasis, repeated until nothing changes:
/// removing one can expose another (`<*b>` becomes `<b>`).
fn strip_markup(mut text: String) -> String {
    loop {
        let next = strip_emphasis(&strip_tags(&strip_control_tokens(&text)));
        if next == text {
            return text;
        }
        text = next;
    }
}

/// Remove single-line HTML/SSML-style tags such as `<b>`, `</i>` or
/// `<break time="1s"/>`. A `<` not followed by a letter, `/` or `!` is text.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let opens_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        let end = after.find(['<', '>', '\n']);
        match end {
            Some(end) if opens_tag && after[end..].starts_with('>') => {
                out.push_str(&rest[..start]);
                rest = &after[end + 1..];
            },
            _ => {
                out.push_str(&rest[..=start]);
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}

/// Drop runs of emphasis markers that open (`**bold`) or close (`bold**`) a
/// word. Runs inside a word or between spaces are kept.
fn strip_emphasis(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if !EMPHASIS_CHARS.contains(&chars[i]) {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && EMPHASIS_CHARS.contains(&chars[i]) {
            i += 1;
        }
        let before = start.checked_sub(1).map(|b| chars[b]);
        let after = chars.get(i).copied();
        let opens = !before.is_some_and(char::is_alphanumeric)
            && after.is_some_and(|c| !c.is_whitespace());
        let closes = before.is_some_and(|c| !c.is_whitespace())
            && !after.is_some_and(char::is_alphanumeric);
        if !(opens || closes) {
            out.extend(&chars[start..i]);
        }
    }
    out
}

fn is_marker_line(line: &str) -> bool {
    let lowered = line.trim_start().to_lowercase();
    MARKER_PREFIXES.iter().any(|p| lowered.starts_with(p))
}

fn drop_marker_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !is_marker_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of spaces and tabs, trim every line, and keep at most one
/// blank line between paragraphs.
fn normalize_whitespace(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut previous_blank = true;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !previous_blank {
                out.push(String::new());
            }
            previous_blank = true;
        } else {
            out.push(collapsed);
            previous_blank = false;
        }
    }
    while out.last().is_some_and(String::is_empty) {
        out.pop();
    }
    out.join("\n")
}

/// Drop text before the earliest greeting that opens a line.
fn cut_preamble(text: &str) -> &str {
    let earliest = GREETINGS
        .iter()
        .filter_map(|greeting| {
            text.match_indices(greeting)
                .map(|(idx, _)| idx)
                .find(|&idx| idx == 0 || text[..idx].ends_with('\n'))
        })
        .min();
    match earliest {
        Some(idx) => &text[idx..],
        None => text,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars - 1).collect();
    // A marker run left in front of the ellipsis would read as emphasis.
    let mut kept = kept
        .trim_end_matches(|c: char| c.is_whitespace() || EMPHASIS_CHARS.contains(&c))
        .to_string();
    kept.push(ELLIPSIS);
    kept
}
