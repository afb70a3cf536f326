//! Output clamping
//!
//! Dual-limit truncation (lines + bytes) with head/tail modes.

/// Result of clamping a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clamped {
    pub text: String,
    pub truncated: bool,
    pub lines_shown: usize,
    pub lines_total: usize,
    pub bytes_shown: usize,
    pub bytes_total: usize,
}

impl Clamped {
    fn untouched(text: &str, lines_total: usize) -> Self {
        Self {
            text: text.to_string(),
            truncated: false,
            lines_shown: lines_total,
            lines_total,
            bytes_shown: text.len(),
            bytes_total: text.len(),
        }
    }

    /// Human-readable notice for the model, `None` when nothing was cut.
    pub fn notice(&self) -> Option<String> {
        if !self.truncated {
            return None;
        }
        Some(format!(
            "[Output truncated: showed {} of {} lines ({}/{} bytes)]",
            self.lines_shown, self.lines_total, self.bytes_shown, self.bytes_total,
        ))
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Keep the first `max_lines` lines, then at most `max_bytes` bytes.
/// Best for file content where the beginning is most relevant.
pub fn clamp_head(text: &str, max_lines: usize, max_bytes: usize) -> Clamped {
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && text.len() <= max_bytes {
        return Clamped::untouched(text, lines_total);
    }

    let joined = lines[..lines_total.min(max_lines)].join("\n");
    let final_text = if joined.len() > max_bytes {
        let limit = floor_char_boundary(&joined, max_bytes);
        let cutoff = joined[..limit].rfind('\n').unwrap_or(limit);
        joined[..cutoff].to_string()
    } else {
        joined
    };

    Clamped {
        lines_shown: final_text.lines().count(),
        bytes_shown: final_text.len(),
        text: final_text,
        truncated: true,
        lines_total,
        bytes_total: text.len(),
    }
}

/// Keep the last `max_lines` lines, then at most `max_bytes` bytes.
/// Best for command output where recent output is most relevant.
pub fn clamp_tail(text: &str, max_lines: usize, max_bytes: usize) -> Clamped {
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && text.len() <= max_bytes {
        return Clamped::untouched(text, lines_total);
    }

    let joined = lines[lines_total.saturating_sub(max_lines)..].join("\n");
    let final_text = if joined.len() > max_bytes {
        let skip = ceil_char_boundary(&joined, joined.len() - max_bytes);
        let start = joined[skip..]
            .find('\n')
            .map(|pos| skip + pos + 1)
            .unwrap_or(skip);
        joined[start..].to_string()
    } else {
        joined
    };

    Clamped {
        lines_shown: final_text.lines().count(),
        bytes_shown: final_text.len(),
        text: final_text,
        truncated: true,
        lines_total,
        bytes_total: text.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_needed() {
        let text = "line1\nline2\nline3";
        let result = clamp_head(text, 100, 100_000);
        assert!(!result.truncated);
        assert_eq!(result.text, text);
        assert_eq!(result.lines_shown, 3);
        assert!(result.notice().is_none());
    }

    #[test]
    fn head_keeps_exactly_max_lines() {
        let text = (1..=20).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let result = clamp_head(&text, 7, 100_000);
        assert!(result.truncated);
        assert_eq!(result.text.lines().count(), 7);
        assert!(result.text.starts_with("line1\n"));
        assert!(result.text.ends_with("line7"));
        assert_eq!(result.lines_total, 20);
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let result = clamp_tail(text, 2, 100_000);
        assert!(result.truncated);
        assert_eq!(result.text, "line4\nline5");
    }

    #[test]
    fn byte_limit_respects_utf8_boundaries() {
        let text = "é".repeat(40);
        let result = clamp_head(&text, 10, 9);
        assert!(result.truncated);
        assert!(result.text.len() <= 9);
        let result = clamp_tail(&text, 10, 9);
        assert!(result.text.len() <= 9);
    }

    #[test]
    fn notice_reports_counts() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let notice = clamp_tail(text, 2, 100_000).notice().unwrap();
        assert!(notice.contains("2 of 5 lines"));
    }
}
