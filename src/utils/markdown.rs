//! Telegram MarkdownV2 helpers.

/// Characters MarkdownV2 treats as markup outside of code spans
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// Escapes every reserved character so the text renders literally
///
/// ```
/// use elschool_bot::utils::markdown::escape_markdown;
///
/// assert_eq!(escape_markdown("5.0 (итог)"), "5\\.0 \\(итог\\)");
/// ```
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Bold, escaped
pub fn bold(text: &str) -> String {
    format!("*{}*", escape_markdown(text))
}

/// Inline code span; only backticks and backslashes need escaping inside
pub fn code(text: &str) -> String {
    format!("`{}`", text.replace('\\', "\\\\").replace('`', "\\`"))
}
