//! Shared utility helpers.

/// Return the directory holding per-session log files: `<home>/sessions`.
pub fn sessions_dir() -> std::path::PathBuf {
    crate::codeloop_home().join("sessions")
}

/// Truncate a string to `max` bytes, appending `…` if trimmed.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// Truncate an owned `String` to at most `max_bytes` on a char boundary.
pub fn truncate_utf8_owned(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s
}
