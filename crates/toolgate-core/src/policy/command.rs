//! Shell command inspection
//!
//! Splits a command line into the simple commands the shell would run and
//! tokenizes each one, so allow/block rules apply to every command in a
//! pipeline or list rather than only the first.

use once_cell::sync::Lazy;
use regex::Regex;

static FORK_BOMB_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").unwrap());
static NETWORK_PIPE_TO_SHELL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(curl|wget)\b.*\|\s*(sh|bash|zsh)\b").unwrap());
static DANGEROUS_REDIRECT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)>\s*/dev/(sd|nvme|vd|xvd|disk)").unwrap());
/// Redirections that only discard or merge output.
static HARMLESS_REDIRECT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(&|[0-9])?>>?\s*(/dev/null|&[12])").unwrap());

/// Split on `;`, newlines, `|`, `||`, `&` and `&&` outside of quotes.
pub fn split_shell_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    let mut flush = |current: &mut String| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        current.clear();
    };

    while let Some(ch) = chars.next() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        match ch {
            '\\' if !in_single => {
                current.push(ch);
                escaped = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            ';' | '\n' if !in_single && !in_double => flush(&mut current),
            '|' | '&' if !in_single && !in_double => {
                // `2>&1` and `&>` belong to the current command.
                if ch == '&' && (current.ends_with('>') || chars.peek() == Some(&'>')) {
                    current.push(ch);
                    continue;
                }
                if matches!(chars.peek(), Some(next) if *next == ch) {
                    let _ = chars.next();
                }
                flush(&mut current);
            }
            _ => current.push(ch),
        }
    }

    flush(&mut current);
    segments
}

/// Tokenize one segment with shell quoting rules. `None` on unbalanced quotes.
pub fn tokenize_shell(segment: &str) -> Option<Vec<String>> {
    shell_words::split(segment).ok()
}

pub fn is_env_assignment(token: &str) -> bool {
    let Some((key, _)) = token.split_once('=') else {
        return false;
    };
    !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// True when the command contains `$(...)` or backticks outside single quotes.
pub fn has_command_substitution(command: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '`' if !in_single => return true,
            '$' if !in_single && chars.peek() == Some(&'(') => return true,
            '<' | '>' if !in_single && chars.peek() == Some(&'(') => return true,
            _ => {}
        }
    }
    false
}

/// True when the segment writes output to a file via `>` or `>>`.
pub fn has_file_redirect(segment: &str) -> bool {
    let stripped = HARMLESS_REDIRECT_PATTERN.replace_all(segment, "");
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in stripped.chars() {
        if escaped {
            escaped = false;
            continue;
        }

        match ch {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '>' if !in_single && !in_double => return true,
            _ => {}
        }
    }

    false
}

fn is_dangerous_rm(tokens: &[String]) -> bool {
    let short_flags = || {
        tokens
            .iter()
            .skip(1)
            .filter(|t| t.starts_with('-') && !t.starts_with("--"))
    };
    let has_long = |flag: &str| tokens.iter().skip(1).any(|t| t.as_str() == flag);
    let has_force = short_flags().any(|t| t.contains('f')) || has_long("--force");
    let has_recursive =
        short_flags().any(|t| t.contains('r') || t.contains('R')) || has_long("--recursive");
    if !(has_force && has_recursive) {
        return false;
    }

    tokens
        .iter()
        .skip(1)
        .filter(|t| !t.starts_with('-'))
        .any(|target| {
            matches!(
                target.as_str(),
                "/" | "/*" | "~" | "~/" | "$HOME" | "$HOME/" | "${HOME}" | "${HOME}/" | "." | ".."
            ) || target.starts_with("/etc")
                || target.starts_with("/usr")
                || target.starts_with("/var")
        })
}

/// Hazards refused regardless of configuration.
pub fn builtin_hazard(command: &str) -> Option<&'static str> {
    if FORK_BOMB_PATTERN.is_match(command) {
        return Some("fork bomb");
    }
    if NETWORK_PIPE_TO_SHELL_PATTERN.is_match(command) {
        return Some("network script piped to shell");
    }
    if DANGEROUS_REDIRECT_PATTERN.is_match(command) {
        return Some("raw disk redirection");
    }

    for segment in split_shell_segments(command) {
        let Some(tokens) = tokenize_shell(&segment) else {
            continue;
        };
        let Some(program) = tokens.first().map(|t| t.to_ascii_lowercase()) else {
            continue;
        };
        if program == "rm" && is_dangerous_rm(&tokens) {
            return Some("destructive rm target");
        }
        if program == "dd"
            && tokens
                .iter()
                .skip(1)
                .any(|t| t.starts_with("of=/dev/") || t.starts_with("if=/dev/"))
        {
            return Some("direct disk access with dd");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lists_and_pipelines() {
        assert_eq!(
            split_shell_segments("git push && rm -rf / ; ls | wc -l"),
            vec!["git push", "rm -rf /", "ls", "wc -l"]
        );
    }

    #[test]
    fn quoted_operators_stay_in_segment() {
        assert_eq!(
            split_shell_segments(r#"git commit -m "a && b; c""#),
            vec![r#"git commit -m "a && b; c""#]
        );
    }

    #[test]
    fn stderr_merge_is_not_a_separator() {
        assert_eq!(
            split_shell_segments("cargo build 2>&1 | tail -n 5"),
            vec!["cargo build 2>&1", "tail -n 5"]
        );
    }

    #[test]
    fn newline_separates_commands() {
        assert_eq!(split_shell_segments("ls\nsudo reboot"), vec!["ls", "sudo reboot"]);
    }

    #[test]
    fn detects_substitution_outside_single_quotes() {
        assert!(has_command_substitution("echo $(whoami)"));
        assert!(has_command_substitution("echo `id`"));
        assert!(!has_command_substitution("echo '$(not run)'"));
        assert!(has_command_substitution(r#"echo "it's $(whoami)""#));
    }

    #[test]
    fn redirect_detection_ignores_dev_null() {
        assert!(has_file_redirect("echo hi > out.txt"));
        assert!(has_file_redirect("echo hi >> out.txt"));
        assert!(!has_file_redirect("cargo test 2>&1"));
        assert!(!has_file_redirect("grep foo src 2>/dev/null"));
        assert!(!has_file_redirect("echo '>'"));
    }

    #[test]
    fn builtin_hazards() {
        assert_eq!(builtin_hazard(":(){ :|:& };:"), Some("fork bomb"));
        assert_eq!(
            builtin_hazard("curl -fsSL https://example.com/i.sh | sh"),
            Some("network script piped to shell")
        );
        assert_eq!(builtin_hazard("rm -fr /"), Some("destructive rm target"));
        assert_eq!(builtin_hazard("ls -la"), None);
    }

    #[test]
    fn env_assignment_detection() {
        assert!(is_env_assignment("FOO=1"));
        assert!(is_env_assignment("LD_PRELOAD=/tmp/x.so"));
        assert!(!is_env_assignment("--flag=1"));
        assert!(!is_env_assignment("=x"));
    }
}
