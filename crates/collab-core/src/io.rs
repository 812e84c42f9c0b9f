use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting state files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Append text to a file, creating it (and its parents) if it doesn't exist.
pub fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    f.write_all(text.as_bytes())?;
    Ok(())
}

/// Read a YAML document, substituting `T::default()` when the file is missing
/// or cannot be parsed. Parse failures are logged, never returned.
pub fn read_yaml_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable state file, using defaults");
            return T::default();
        }
    };
    if data.trim().is_empty() {
        return T::default();
    }
    match serde_yaml::from_str(&data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt state file, using defaults");
            T::default()
        }
    }
}

/// Read-modify-write a shared YAML file.
///
/// The current contents are read tolerantly, `mutate` is applied, and the
/// result replaces the file through [`atomic_write`]. Concurrent writers may
/// lose updates (last writer wins) but never leave a torn file behind.
pub fn update_yaml<T, R>(path: &Path, mutate: impl FnOnce(&mut T) -> R) -> Result<R>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut value: T = read_yaml_or_default(path);
    let out = mutate(&mut value);
    let data = serde_yaml::to_string(&value)?;
    atomic_write(path, data.as_bytes())?;
    Ok(out)
}
