//! `&`-style color code rendering.
//!
//! Group prefixes and messages may carry legacy `&a`/`&l`-style markup.
//! The console sink renders those as ANSI escapes; plain-text sinks strip
//! them. The scheduler itself never looks inside the codes.

const CODE_CHAR: char = '&';

fn ansi_for(code: char) -> Option<&'static str> {
    match code.to_ascii_lowercase() {
        '0' => Some("\x1b[30m"),
        '1' => Some("\x1b[34m"),
        '2' => Some("\x1b[32m"),
        '3' => Some("\x1b[36m"),
        '4' => Some("\x1b[31m"),
        '5' => Some("\x1b[35m"),
        '6' => Some("\x1b[33m"),
        '7' => Some("\x1b[37m"),
        '8' => Some("\x1b[90m"),
        '9' => Some("\x1b[94m"),
        'a' => Some("\x1b[92m"),
        'b' => Some("\x1b[96m"),
        'c' => Some("\x1b[91m"),
        'd' => Some("\x1b[95m"),
        'e' => Some("\x1b[93m"),
        'f' => Some("\x1b[97m"),
        // 'k' (obfuscated) has no terminal equivalent; swallow it.
        'k' => Some(""),
        'l' => Some("\x1b[1m"),
        'm' => Some("\x1b[9m"),
        'n' => Some("\x1b[4m"),
        'o' => Some("\x1b[3m"),
        'r' => Some("\x1b[0m"),
        _ => None,
    }
}

/// Render color codes as ANSI escapes. A trailing reset is appended when any
/// code was translated, so broadcasts don't bleed color into the next line.
pub fn to_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut translated = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == CODE_CHAR {
            if let Some(&next) = chars.peek() {
                if let Some(escape) = ansi_for(next) {
                    out.push_str(escape);
                    chars.next();
                    translated = true;
                    continue;
                }
            }
        }
        out.push(ch);
    }

    if translated {
        out.push_str("\x1b[0m");
    }
    out
}

/// Remove color codes entirely, leaving plain text.
pub fn strip_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == CODE_CHAR {
            if let Some(&next) = chars.peek() {
                if ansi_for(next).is_some() {
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}
