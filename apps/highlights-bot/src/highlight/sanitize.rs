//! Text cleanup for the rendered card and escaping for the quote caption.

const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// Normalizes typographic punctuation to ASCII, drops angle brackets and
/// escapes ampersands. The result is trimmed.
pub fn sanitize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '<' | '>' => {}
            '&' => out.push_str("&amp;"),
            other => out.push(other),
        }
    }
    out.trim().to_string()
}

pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// MarkdownV2 caption: the passage as a block quote, then author in bold and
/// title in italics. Built from the unsanitized text.
pub fn quote_message(text: &str, author: Option<&str>, title: Option<&str>) -> String {
    let quoted = escape_markdown_v2(text)
        .split('\n')
        .map(|line| format!(">{line}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut message = format!("{quoted}\n");
    if let Some(author) = author.filter(|author| !author.trim().is_empty()) {
        message.push_str(&format!("\n*{}*", escape_markdown_v2(author)));
    }
    if let Some(title) = title.filter(|title| !title.trim().is_empty()) {
        message.push_str(&format!("\n_{}_", escape_markdown_v2(title)));
    }
    message
}
