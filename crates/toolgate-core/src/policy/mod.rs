//! Policy engine
//!
//! Every executor asks the engine before touching the filesystem or spawning
//! a process. The engine is built once from an immutable [`PolicyConfig`] and
//! shared read-only across requests; a new policy means a new engine.
//!
//! Rules:
//! - paths are canonicalized (symlinks and `..` resolved) before comparison
//! - a path must sit under an allowed directory and under no blocked one
//! - commands are default-deny: every simple command in the line must start
//!   with an allowed prefix, and no blocked phrase may appear anywhere
//! - a block match always overrides an allow match

pub mod clamp;
pub mod command;

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::constants::limits;
use crate::error::ErrorCode;
pub use clamp::Clamped;

/// Immutable sandbox rules for one process lifetime.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub allowed_directories: Vec<PathBuf>,
    pub blocked_directories: Vec<PathBuf>,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub max_file_size: u64,
    pub max_output_lines: usize,
    pub command_timeout: Duration,
    pub env_passthrough: Vec<String>,
}

impl PolicyConfig {
    /// A policy rooted at a single directory with no command access.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            allowed_directories: vec![root.into()],
            blocked_directories: Vec::new(),
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
            max_file_size: limits::DEFAULT_MAX_FILE_SIZE_MB * 1024 * 1024,
            max_output_lines: limits::DEFAULT_MAX_OUTPUT_LINES,
            command_timeout: limits::DEFAULT_COMMAND_TIMEOUT,
            env_passthrough: Vec::new(),
        }
    }
}

/// Structured refusal. Never an exception: executors turn it into a failed
/// tool result so the conversation can continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {reason}")]
pub struct Denial {
    pub code: ErrorCode,
    pub reason: String,
}

impl Denial {
    pub fn policy(reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::PolicyDenied,
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidArgument,
            reason: reason.into(),
        }
    }
}

pub struct PolicyEngine {
    config: PolicyConfig,
    allowed_roots: Vec<PathBuf>,
    blocked_roots: Vec<PathBuf>,
    allowed_prefixes: Vec<Vec<String>>,
    blocked_phrases: Vec<Vec<String>>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("allowed_roots", &self.allowed_roots)
            .field("blocked_roots", &self.blocked_roots)
            .finish_non_exhaustive()
    }
}

fn phrase_tokens(phrase: &str) -> Vec<String> {
    phrase
        .split_whitespace()
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Symlink hops followed before giving up, matching the usual ELOOP limit.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve a path the way the OS would, tolerating missing components.
///
/// Components are walked one at a time from the root. Existing entries stay
/// canonical (symlinks, including dangling ones, are followed through their
/// targets) and missing entries are appended as-is. A `..` pops the resolved
/// path, so `missing/../link` still resolves `link` through the filesystem.
pub fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    resolve_lenient(path, 0)
}

fn resolve_lenient(path: &Path, hops: usize) -> io::Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(canonical) => return Ok(canonical),
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        Err(_) => {}
    }

    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                resolved = match std::fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        if hops >= MAX_SYMLINK_HOPS {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidInput,
                                format!("too many levels of symbolic links at {}", candidate.display()),
                            ));
                        }
                        // Relative targets are relative to the link's directory.
                        let target = std::fs::read_link(&candidate)?;
                        resolve_lenient(&resolved.join(target), hops + 1)?
                    }
                    Ok(_) => candidate,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => candidate,
                    Err(e) => return Err(e),
                };
            }
        }
    }

    if resolved.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no existing ancestor for {}", path.display()),
        ));
    }
    Ok(resolved)
}

fn canonical_roots(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for dir in dirs {
        let lexical: PathBuf = dir.components().collect();
        match canonicalize_lenient(dir) {
            Ok(canonical) => {
                if canonical != lexical {
                    roots.push(lexical);
                }
                roots.push(canonical);
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot resolve policy directory");
                roots.push(lexical);
            }
        }
    }
    roots
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        let allowed_roots = config
            .allowed_directories
            .iter()
            .filter_map(|dir| canonicalize_lenient(dir).ok())
            .collect();
        let blocked_roots = canonical_roots(&config.blocked_directories);
        let allowed_prefixes = config
            .allowed_commands
            .iter()
            .map(|c| phrase_tokens(c))
            .filter(|t| !t.is_empty())
            .collect();
        let blocked_phrases = config
            .blocked_commands
            .iter()
            .map(|c| phrase_tokens(c))
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            config,
            allowed_roots,
            blocked_roots,
            allowed_prefixes,
            blocked_phrases,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    pub fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    pub fn max_output_lines(&self) -> usize {
        self.config.max_output_lines
    }

    pub fn command_timeout(&self) -> Duration {
        self.config.command_timeout
    }

    /// Authorize an absolute path, returning its canonical form.
    pub fn authorize_path(&self, path: &Path) -> Result<PathBuf, Denial> {
        let raw = path.as_os_str();
        if raw.is_empty() {
            return Err(Denial::invalid("path is empty"));
        }
        if path.to_string_lossy().contains('\0') {
            return Err(Denial::invalid("path contains a NUL byte"));
        }
        if !path.is_absolute() {
            return Err(Denial::invalid(format!(
                "path '{}' must be absolute",
                path.display()
            )));
        }

        let canonical = canonicalize_lenient(path)
            .map_err(|e| Denial::invalid(format!("cannot resolve '{}': {}", path.display(), e)))?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    /// Prefix check on an already-canonical path. Deny wins.
    pub fn check_canonical(&self, canonical: &Path) -> Result<(), Denial> {
        if let Some(blocked) = self.blocked_roots.iter().find(|b| canonical.starts_with(b)) {
            return Err(Denial::policy(format!(
                "'{}' is inside blocked directory '{}'",
                canonical.display(),
                blocked.display()
            )));
        }
        if !self.allowed_roots.iter().any(|a| canonical.starts_with(a)) {
            return Err(Denial::policy(format!(
                "'{}' is outside the allowed directories",
                canonical.display()
            )));
        }
        Ok(())
    }

    pub fn is_allowed(&self, canonical: &Path) -> bool {
        self.check_canonical(canonical).is_ok()
    }

    /// Authorize a full command line before it reaches `sh -c`.
    pub fn authorize_command(&self, command_line: &str) -> Result<(), Denial> {
        let trimmed = command_line.trim();
        if trimmed.is_empty() {
            return Err(Denial::invalid("command is empty"));
        }
        if trimmed.contains('\0') {
            return Err(Denial::invalid("command contains a NUL byte"));
        }

        if let Some(hazard) = command::builtin_hazard(trimmed) {
            return Err(Denial::policy(format!("blocked dangerous pattern: {}", hazard)));
        }
        if command::has_command_substitution(trimmed) {
            return Err(Denial::policy("command substitution is not permitted"));
        }

        let segments = command::split_shell_segments(trimmed);
        let mut tokenized = Vec::with_capacity(segments.len());
        for segment in &segments {
            let tokens = command::tokenize_shell(segment)
                .ok_or_else(|| Denial::invalid(format!("malformed command segment '{}'", segment)))?;
            let lowered: Vec<String> = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();
            tokenized.push((segment, lowered));
        }

        // Blocked phrases first so they win over any allow match.
        for (_, tokens) in &tokenized {
            if let Some(phrase) = self
                .blocked_phrases
                .iter()
                .find(|phrase| contains_sequence(tokens, phrase))
            {
                return Err(Denial::policy(format!(
                    "command contains blocked phrase '{}'",
                    phrase.join(" ")
                )));
            }
        }

        for (segment, tokens) in &tokenized {
            let Some(program) = tokens.first() else {
                continue;
            };
            if command::is_env_assignment(program) {
                return Err(Denial::policy(
                    "inline environment assignments are not permitted",
                ));
            }
            if command::has_file_redirect(segment) {
                return Err(Denial::policy(
                    "output redirection to files is not permitted; use write_file",
                ));
            }
            if !self
                .allowed_prefixes
                .iter()
                .any(|prefix| tokens.starts_with(prefix))
            {
                return Err(Denial::policy(format!(
                    "command '{}' is not in the allowed command list",
                    program
                )));
            }
        }

        Ok(())
    }

    /// Clamp a payload to the configured line limit, keeping the head.
    pub fn clamp_output(&self, text: &str) -> Clamped {
        clamp::clamp_head(text, self.config.max_output_lines, limits::MAX_OUTPUT_BYTES)
    }

    /// Clamp a payload to the configured line limit, keeping the tail.
    pub fn clamp_output_tail(&self, text: &str) -> Clamped {
        clamp::clamp_tail(text, self.config.max_output_lines, limits::MAX_OUTPUT_BYTES)
    }
}

fn contains_sequence(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine_with(root: &Path, blocked: Vec<PathBuf>) -> PolicyEngine {
        let mut config = PolicyConfig::rooted_at(root);
        config.blocked_directories = blocked;
        config.allowed_commands = vec!["ls".into(), "git".into(), "echo".into(), "cargo test".into()];
        config.blocked_commands = vec!["rm -rf".into(), "sudo".into()];
        PolicyEngine::new(config)
    }

    #[test]
    fn allows_paths_under_allowed_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let engine = engine_with(dir.path(), vec![]);

        let resolved = engine.authorize_path(&dir.path().join("a.txt")).unwrap();
        assert!(resolved.ends_with("a.txt"));
        // Missing files resolve through their nearest existing ancestor.
        assert!(engine.authorize_path(&dir.path().join("new/b.txt")).is_ok());
    }

    #[test]
    fn blocked_prefix_wins_over_allowed_prefix() {
        let dir = TempDir::new().unwrap();
        let secrets = dir.path().join("secrets");
        std::fs::create_dir(&secrets).unwrap();
        std::fs::write(secrets.join("key.pem"), "k").unwrap();
        let engine = engine_with(dir.path(), vec![secrets.clone()]);

        for candidate in [
            secrets.clone(),
            secrets.join("key.pem"),
            secrets.join("missing/deeper.txt"),
        ] {
            let denial = engine.authorize_path(&candidate).unwrap_err();
            assert_eq!(denial.code, ErrorCode::PolicyDenied, "{}", candidate.display());
        }
    }

    #[test]
    fn traversal_resolves_outside_and_is_denied() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir(&root).unwrap();
        let engine = engine_with(&root, vec![]);

        let denial = engine
            .authorize_path(&root.join("../../etc/passwd"))
            .unwrap_err();
        assert_eq!(denial.code, ErrorCode::PolicyDenied);

        let denial = engine
            .authorize_path(&root.join("missing/../../outside.txt"))
            .unwrap_err();
        assert_eq!(denial.code, ErrorCode::PolicyDenied);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_denied() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let engine = engine_with(dir.path(), vec![]);

        let denial = engine
            .authorize_path(&dir.path().join("link/secret.txt"))
            .unwrap_err();
        assert_eq!(denial.code, ErrorCode::PolicyDenied);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_behind_missing_parent_is_still_resolved() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let engine = engine_with(dir.path(), vec![]);

        for candidate in [
            dir.path().join("missing/../link/secret.txt"),
            dir.path().join("missing/../link/new.txt"),
            dir.path().join("a/b/../../link"),
        ] {
            let denial = engine.authorize_path(&candidate).unwrap_err();
            assert_eq!(denial.code, ErrorCode::PolicyDenied, "{}", candidate.display());
        }

        let resolved = canonicalize_lenient(&dir.path().join("missing/../link/secret.txt")).unwrap();
        assert_eq!(
            resolved,
            std::fs::canonicalize(outside.path().join("secret.txt")).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_resolves_to_its_target() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("planted.txt"), dir.path().join("drop")).unwrap();
        let engine = engine_with(dir.path(), vec![]);

        let denial = engine.authorize_path(&dir.path().join("drop")).unwrap_err();
        assert_eq!(denial.code, ErrorCode::PolicyDenied);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_invalid_not_allowed() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(dir.path().join("b"), dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("a"), dir.path().join("b")).unwrap();
        let engine = engine_with(dir.path(), vec![]);

        assert!(engine.authorize_path(&dir.path().join("a/x.txt")).is_err());
    }

    #[test]
    fn sibling_with_shared_name_prefix_is_not_allowed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("app");
        let sibling = dir.path().join("app-secrets");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(&sibling).unwrap();
        let engine = engine_with(&root, vec![]);

        assert!(engine.authorize_path(&sibling.join("x")).is_err());
    }

    #[test]
    fn relative_and_empty_paths_are_invalid() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(dir.path(), vec![]);
        assert_eq!(
            engine.authorize_path(Path::new("relative.txt")).unwrap_err().code,
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            engine.authorize_path(Path::new("")).unwrap_err().code,
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn allowed_command_with_blocked_phrase_is_denied() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(dir.path(), vec![]);

        let denial = engine.authorize_command("git push && rm -rf /").unwrap_err();
        assert_eq!(denial.code, ErrorCode::PolicyDenied);
        let denial = engine.authorize_command("ls; sudo ls").unwrap_err();
        assert!(denial.reason.contains("sudo"));
    }

    #[test]
    fn command_allow_list_is_default_deny() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(dir.path(), vec![]);

        assert!(engine.authorize_command("ls -la").is_ok());
        assert!(engine.authorize_command("git status | echo done").is_ok());
        assert!(engine.authorize_command("cargo test --lib").is_ok());
        // Multi-word prefix: `cargo` alone is not allowed.
        assert!(engine.authorize_command("cargo publish").is_err());
        assert!(engine.authorize_command("python3 -c 'print(1)'").is_err());
        assert!(engine.authorize_command("ls | python3").is_err());

        let open = PolicyEngine::new(PolicyConfig::rooted_at(dir.path()));
        assert!(open.authorize_command("ls").is_err());
    }

    #[test]
    fn shell_tricks_are_denied() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(dir.path(), vec![]);

        assert!(engine.authorize_command("echo $(cat /etc/shadow)").is_err());
        assert!(engine.authorize_command("LD_PRELOAD=/tmp/x.so ls").is_err());
        assert!(engine.authorize_command("echo hi > /etc/motd").is_err());
        assert!(engine.authorize_command("ls 2>/dev/null").is_ok());
    }

    #[test]
    fn malformed_commands_are_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(dir.path(), vec![]);

        assert_eq!(
            engine.authorize_command("   ").unwrap_err().code,
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            engine.authorize_command("echo 'unterminated").unwrap_err().code,
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn clamp_output_truncates_to_exact_line_count() {
        let dir = TempDir::new().unwrap();
        let mut config = PolicyConfig::rooted_at(dir.path());
        config.max_output_lines = 5;
        let engine = PolicyEngine::new(config);

        let text = (0..50).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let clamped = engine.clamp_output(&text);
        assert!(clamped.truncated);
        assert_eq!(clamped.text.lines().count(), 5);

        let short = engine.clamp_output("a\nb");
        assert!(!short.truncated);
        assert_eq!(short.text, "a\nb");
    }
}
