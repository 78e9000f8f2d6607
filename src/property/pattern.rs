//! Minimal pattern matcher backing `PropertyStore::query_regex`.
//!
//! No example in the reference corpus pulls in a regex crate for this kind
//! of key matching, so rather than introduce an unrelated dependency this
//! implements the small subset actually needed for dotted property keys:
//! literal characters, `.` (any single character), `*` (any run of
//! characters), and `^`/`$` anchors. It is intentionally not a general
//! regular-expression engine.

/// Returns true if `pattern` matches `text` under the subset of syntax
/// documented above.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.strip_prefix('^').unwrap_or(pattern);
    let pattern = pattern.strip_suffix('$').unwrap_or(pattern);
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_from(&p, 0, &t, 0)
}

fn match_from(p: &[char], pi: usize, t: &[char], ti: usize) -> bool {
    if pi == p.len() {
        return ti == t.len();
    }
    match p[pi] {
        '*' => {
            // Try consuming zero or more characters of `t`.
            for skip in 0..=(t.len() - ti) {
                if match_from(p, pi + 1, t, ti + skip) {
                    return true;
                }
            }
            false
        }
        '.' => ti < t.len() && match_from(p, pi + 1, t, ti + 1),
        c => ti < t.len() && t[ti] == c && match_from(p, pi + 1, t, ti + 1),
    }
}
