use std::path::{Path, PathBuf};

pub const IDENTITY_DIR: &str = "agent_chat";
pub const IDENTITY_FILE: &str = "identity.json";

#[must_use]
pub fn identity_path(data_dir: &Path) -> PathBuf {
    data_dir.join(IDENTITY_DIR).join(IDENTITY_FILE)
}

/// Sibling scratch file used while writing a fresh record.
#[must_use]
pub(crate) fn temp_path(path: &Path, nonce: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| IDENTITY_FILE.to_owned());
    path.with_file_name(format!(".{file_name}.{nonce}.tmp"))
}
