//! Whole-file JSON registry flushes, write-then-rename for crash safety.
//!
//! A plain overwrite can leave a truncated file behind if the process
//! dies mid-write; writing to a temp path and renaming it into place
//! keeps the registry file always either the old or the new contents.

use std::path::Path;

use anyhow::{Context, Result};

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;
    Ok(())
}
