//! File names generated for catalog nodes.

/// Append `.ext` unless `name` already ends with it (case-insensitively).
///
/// `song.mp3` with extension `mp3` stays `song.mp3`; `Song` becomes
/// `Song.mp3`. An empty extension leaves the name untouched.
pub fn with_extension(name: &str, ext: &str) -> String {
    if ext.is_empty() {
        return name.to_string();
    }
    let suffix_len = ext.len() + 1;
    if name.len() > suffix_len {
        let split = name.len() - suffix_len;
        if name.is_char_boundary(split) {
            let tail = &name[split..];
            if tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(ext) {
                return name.to_string();
            }
        }
    }
    format!("{name}.{ext}")
}

/// Encode an object id as a single path component: `%` → `%25`, `/` → `%2F`.
pub fn escape_id(id: &str) -> String {
    id.replace('%', "%25").replace('/', "%2F")
}

/// Inverse of [`escape_id`]. Returns `None` for malformed escapes.
pub fn unescape_id(component: &str) -> Option<String> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest.get(idx + 1..idx + 3)?;
        match code {
            "25" => out.push('%'),
            "2F" | "2f" => out.push('/'),
            _ => return None,
        }
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Some(out)
}
