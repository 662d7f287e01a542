//! Path pattern matching.
//!
//! Patterns are `/`-segmented: `**` matches any number of segments
//! (including zero), `*` matches exactly one, and a `*` inside a segment
//! matches any run of non-separator characters. Everything else is literal
//! and case-sensitive.

/// Whether `pattern` matches `path`.
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = segments(pattern);
    let path: Vec<&str> = segments(path);
    match_segments(&pattern, &path)
}

/// Byte length of the literal prefix before the first wildcard. Longer means
/// more specific; used as the secondary ordering key after priority.
pub fn literal_prefix_len(pattern: &str) -> usize {
    pattern.find('*').unwrap_or(pattern.len())
}

fn segments(s: &str) -> Vec<&str> {
    s.split('/').filter(|seg| !seg.is_empty()).collect()
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((first, rest)) => match path.split_first() {
            Some((seg, path_rest)) => match_segment(first, seg) && match_segments(rest, path_rest),
            None => false,
        },
    }
}

fn match_segment(pattern: &str, segment: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == segment;
    }
    glob(pattern.as_bytes(), segment.as_bytes())
}

fn glob(pattern: &[u8], s: &[u8]) -> bool {
    match pattern.split_first() {
        None => s.is_empty(),
        Some((b'*', rest)) => (0..=s.len()).any(|skip| glob(rest, &s[skip..])),
        Some((c, rest)) => match s.split_first() {
            Some((sc, s_rest)) => sc == c && glob(rest, s_rest),
            None => false,
        },
    }
}
