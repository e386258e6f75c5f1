use std::fmt::Write as _;

use unicode_general_category::{GeneralCategory, get_general_category};

/// Renders `input` as a single printable line.
///
/// Backslashes are always doubled, control characters use the short C escapes
/// (`\n`, `\t`, ...) or `\xNN`, other non-printable characters `\uNNNN` or
/// `\UNNNNNNNN`, and bytes that are not valid UTF-8 `\xNN`. With `ascii_only`
/// every non-ASCII character is escaped as well.
pub fn one_line(input: impl AsRef<[u8]>, ascii_only: bool) -> String {
    let bytes = input.as_ref();
    let mut out = String::with_capacity(3 * bytes.len() / 2);

    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            push_char(&mut out, c, ascii_only);
        }
        for byte in chunk.invalid() {
            push_hex_byte(&mut out, *byte);
        }
    }

    out
}

fn push_char(out: &mut String, c: char, ascii_only: bool) {
    if c == '\\' {
        out.push_str("\\\\");
        return;
    }
    if is_printable(c) && (!ascii_only || c.is_ascii()) {
        out.push(c);
        return;
    }

    match c {
        '\x07' => out.push_str("\\a"),
        '\x08' => out.push_str("\\b"),
        '\x0c' => out.push_str("\\f"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\x0b' => out.push_str("\\v"),
        c if (c as u32) < 0x20 => push_hex_byte(out, c as u8),
        c if (c as u32) < 0x10000 => {
            let _ = write!(out, "\\u{:04x}", c as u32);
        }
        c => {
            let _ = write!(out, "\\U{:08x}", c as u32);
        }
    }
}

fn push_hex_byte(out: &mut String, byte: u8) {
    let _ = write!(out, "\\x{byte:02x}");
}

/// Letters, marks, numbers, punctuation, symbols and the ASCII space.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !matches!(
        get_general_category(c),
        GeneralCategory::SpaceSeparator
            | GeneralCategory::LineSeparator
            | GeneralCategory::ParagraphSeparator
            | GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Surrogate
            | GeneralCategory::PrivateUse
            | GeneralCategory::Unassigned
    )
}
