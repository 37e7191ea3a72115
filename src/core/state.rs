//! AS-018: Output directory layout and lock file management.
//!
//! `<out>/<stack>/` holds the synthesized template, `state.lock.yaml` and
//! `events.jsonl`. Template and lock writes are atomic (temp file + rename).

use super::types::{StackLock, TemplateFormat};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Directory holding everything synthesized for one stack.
pub fn stack_dir(out_dir: &Path, stack: &str) -> PathBuf {
    out_dir.join(stack)
}

/// Derive the lock file path for a stack within the output directory.
pub fn lock_file_path(out_dir: &Path, stack: &str) -> PathBuf {
    stack_dir(out_dir, stack).join("state.lock.yaml")
}

/// Derive the template path for a stack and format.
pub fn template_path(out_dir: &Path, stack: &str, format: TemplateFormat) -> PathBuf {
    stack_dir(out_dir, stack).join(format!("template.{}", format.extension()))
}

fn write_atomic(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp_path.display(), path.display(), e))
}

/// Load a stack's lock file. Returns None if the file doesn't exist.
pub fn load_lock(out_dir: &Path, stack: &str) -> Result<Option<StackLock>, String> {
    let path = lock_file_path(out_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StackLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save a lock file atomically.
pub fn save_lock(out_dir: &Path, lock: &StackLock) -> Result<(), String> {
    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;
    write_atomic(&lock_file_path(out_dir, &lock.stack), &yaml)
}

/// Write a rendered template atomically. Returns the path written.
pub fn write_template(
    out_dir: &Path,
    stack: &str,
    format: TemplateFormat,
    content: &str,
) -> Result<PathBuf, String> {
    let path = template_path(out_dir, stack, format);
    write_atomic(&path, content)?;
    Ok(path)
}

/// Create a new empty lock for a stack.
pub fn new_lock(stack: &str, format: TemplateFormat) -> StackLock {
    use crate::tripwire::eventlog::now_iso8601;
    StackLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("ampstack {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        format,
        template_hash: String::new(),
        resources: IndexMap::new(),
        exports: Vec::new(),
    }
}
