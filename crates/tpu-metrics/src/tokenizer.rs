//! Normalization of composite entry strings.
//!
//! libtpu renders composite values as Python-ish strings such as
//! `"'8MB+', '2233.25', '10.0'"`. Tokenizing splits on commas, trims each
//! piece and removes every quote character.

const DELIMITER: char = ',';

/// Removes every single and double quote from `s` and trims whitespace.
#[must_use]
pub fn clean_token(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '\'' && *c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Splits an entry into normalized tokens.
///
/// An entry with N commas always yields N + 1 tokens; adjacent commas yield
/// empty tokens.
#[must_use]
pub fn tokenize(entry: &str) -> Vec<String> {
    entry.split(DELIMITER).map(clean_token).collect()
}
