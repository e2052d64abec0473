//! Glob matching over qualifier strings and parameter names
//!
//! `*` matches any run of characters (including `/`), every other character
//! matches itself.

/// Does the concrete `text` match `pattern`?
pub fn glob_match(text: &str, pattern: &str) -> bool {
    glob(text.as_bytes(), pattern.as_bytes())
}

fn glob(text: &[u8], pattern: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob(&text[skip..], rest)),
        Some((c, rest)) => text.first() == Some(c) && glob(&text[1..], rest),
    }
}

/// Could some concrete string match both `a` and `b`?
///
/// Both sides may contain wildcards, so `"*/1"` and `"2/*"` overlap (on
/// `"2/1"`) while `"1/2"` and `"3/4"` do not. Symmetric in its arguments.
pub fn overlaps(a: &str, b: &str) -> bool {
    overlap(a.as_bytes(), b.as_bytes())
}

fn all_wild(s: &[u8]) -> bool {
    s.iter().all(|c| *c == b'*')
}

fn overlap(a: &[u8], b: &[u8]) -> bool {
    match (a.split_first(), b.split_first()) {
        (None, None) => true,
        (None, Some(_)) => all_wild(b),
        (Some(_), None) => all_wild(a),
        // A leading star either ends here or swallows one more char of the other side
        (Some((b'*', a_rest)), _) => overlap(a_rest, b) || overlap(a, &b[1..]),
        (_, Some((b'*', b_rest))) => overlap(a, b_rest) || overlap(&a[1..], b),
        (Some((x, a_rest)), Some((y, b_rest))) => x == y && overlap(a_rest, b_rest),
    }
}
