//! Key pattern translation.
//!
//! Consumers invalidate with regular expressions while backends list keys
//! with glob patterns (`*` and `?`). These helpers convert between the two.

use crate::error::Result;
use regex::Regex;

/// Convert a glob pattern to an anchored regex pattern.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    out.push('^');

    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    out.push('$');
    out
}

/// Compile a glob pattern into a matcher.
pub fn compile_glob(glob: &str) -> Result<Regex> {
    Ok(Regex::new(&glob_to_regex(glob))?)
}

/// Derive the narrowest glob that is guaranteed to list every key the regex
/// can match.
///
/// A regex anchored with `^` followed by literal characters becomes
/// `literal*`; anything else lists everything (`*`). The listing is always
/// filtered through the regex afterwards, so the glob only has to be a
/// superset.
pub fn regex_to_glob(regex: &Regex) -> String {
    let source = regex.as_str();
    let Some(rest) = source.strip_prefix('^') else {
        return "*".to_string();
    };
    if rest.contains('|') {
        return "*".to_string();
    }

    let mut prefix = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next) if !next.is_ascii_alphanumeric() => {
                    chars.next();
                    prefix.push(next);
                }
                _ => break,
            },
            '.' | '+' | '(' | ')' | '[' | ']' | '}' | '^' | '$' | '|' => break,
            '*' | '?' | '{' => {
                // The quantifier applies to the previous literal.
                prefix.pop();
                break;
            }
            _ => prefix.push(c),
        }
    }

    escape_glob(&mut prefix);
    prefix.push('*');
    prefix
}

/// Escape glob metacharacters that appear literally in a key prefix.
pub(crate) fn escape_glob(prefix: &mut String) {
    if prefix.contains(['*', '?', '[', ']']) {
        let escaped: String = prefix
            .chars()
            .flat_map(|c| match c {
                '*' | '?' | '[' | ']' => vec!['\\', c],
                _ => vec![c],
            })
            .collect();
        *prefix = escaped;
    }
}
