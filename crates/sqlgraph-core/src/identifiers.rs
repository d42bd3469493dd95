//! SQL identifier quoting and the naming conventions that map model and
//! field names onto tables and columns.

use regex::Regex;
use std::sync::OnceLock;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use sqlgraph_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote and comma-join a list of identifiers.
pub fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn identifier_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Whether `name` is usable as a model, field or table name.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|re| re.is_match(name))
}

/// Convert a field or model name to its snake_case column name.
///
/// Runs of capitals are treated as one word, so acronyms stay together.
///
/// # Examples
///
/// ```
/// use sqlgraph_core::to_db_name;
///
/// assert_eq!(to_db_name("FirstName"), "first_name");
/// assert_eq!(to_db_name("ID"), "id");
/// assert_eq!(to_db_name("ProgrammerID"), "programmer_id");
/// ```
pub fn to_db_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Default table name for a model: the pluralized snake_case model name.
///
/// # Examples
///
/// ```
/// use sqlgraph_core::table_name_for;
///
/// assert_eq!(table_name_for("User"), "users");
/// assert_eq!(table_name_for("Quality"), "qualities");
/// assert_eq!(table_name_for("LanguageWord"), "language_words");
/// ```
pub fn table_name_for(model: &str) -> String {
    pluralize(&to_db_name(model))
}

fn pluralize(word: &str) -> String {
    let bytes = word.as_bytes();
    let consonant_y = word.len() >= 2
        && word.ends_with('y')
        && !matches!(bytes[bytes.len() - 2], b'a' | b'e' | b'i' | b'o' | b'u');
    if consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}
