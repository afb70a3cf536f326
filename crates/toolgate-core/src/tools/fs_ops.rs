//! Filesystem helpers shared by the mutating executors

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ignore::overrides::OverrideBuilder;
use ignore::{Walk, WalkBuilder};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::policy::{canonicalize_lenient, PolicyEngine};

/// Write via a sibling temp file and rename, so readers never observe a
/// partially written file.
pub async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("file"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    let write = async {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        if let Ok(meta) = fs::metadata(path).await {
            fs::set_permissions(&tmp_path, meta.permissions()).await?;
        }
        fs::rename(&tmp_path, path).await
    };

    if let Err(e) = write.await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Copy `path` into `backup_dir` as `{name}.{YYYYmmdd_HHMMSS}.backup`.
pub async fn backup_file(backup_dir: &Path, path: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(backup_dir).await?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut target = backup_dir.join(format!("{}.{}.backup", name, stamp));
    let mut n = 1;
    while fs::try_exists(&target).await.unwrap_or(false) {
        target = backup_dir.join(format!("{}.{}-{}.backup", name, stamp, n));
        n += 1;
    }
    fs::copy(path, &target).await?;
    Ok(target)
}

/// Heuristic: a NUL byte in the first `sniff` bytes means binary.
pub fn looks_binary(bytes: &[u8], sniff: usize) -> bool {
    bytes[..bytes.len().min(sniff)].contains(&0)
}

/// Walk `root` honoring `.gitignore`, pruning every entry the policy would
/// refuse. Symlinks are not followed, but a symlinked file whose target
/// escapes the allowed roots is pruned as well.
pub fn sandboxed_walk(
    root: &Path,
    policy: Arc<PolicyEngine>,
    file_pattern: Option<&str>,
) -> Result<Walk, ignore::Error> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .follow_links(false)
        .filter_entry(move |entry| {
            canonicalize_lenient(entry.path())
                .map(|resolved| policy.is_allowed(&resolved))
                .unwrap_or(false)
        });

    if let Some(pattern) = file_pattern.map(str::trim).filter(|p| !p.is_empty()) {
        let mut overrides = OverrideBuilder::new(root);
        overrides.add(pattern)?;
        builder.overrides(overrides.build()?);
    }

    Ok(builder.build())
}
