// EmberCL Characters
//
// Canonical character names for #\ syntax and CHAR-NAME/NAME-CHAR.

/// Characters with standard names, in preferred-name-first order.
/// NAME-CHAR also accepts the aliases further down the table.
const NAMED_CHARS: &[(char, &str)] = &[
    ('\u{20}', "Space"),
    ('\u{0a}', "Newline"),
    ('\u{09}', "Tab"),
    ('\u{08}', "Backspace"),
    ('\u{0c}', "Page"),
    ('\u{0d}', "Return"),
    ('\u{7f}', "Rubout"),
    ('\u{00}', "Nul"),
    ('\u{0a}', "Linefeed"),
    ('\u{1b}', "Escape"),
];

/// The preferred name of a character, if it has one.
pub fn char_name(c: char) -> Option<&'static str> {
    NAMED_CHARS.iter().find(|(ch, _)| *ch == c).map(|(_, n)| *n)
}

/// Resolve a character name (case-insensitive). Single-character names name
/// themselves, so (name-char "a") works the way the reader's #\a does.
pub fn name_char(name: &str) -> Option<char> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(c);
    }
    NAMED_CHARS
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(c, _)| *c)
}

/// Case folding used by CHAR-EQUAL/EQUALP.
pub fn downcase(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

pub fn upcase(c: char) -> char {
    c.to_uppercase().next().unwrap_or(c)
}

pub fn char_equal_ci(a: char, b: char) -> bool {
    a == b || downcase(a) == downcase(b)
}
