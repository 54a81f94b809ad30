// Cache path utilities.
// Locates the on-disk directories for the persistent cache tiers.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "devdash")
}

/// Base cache directory (~/.cache/devdash on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Base config directory (~/.config/devdash on Linux).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path to the settings file.
pub fn settings_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("settings.json"))
}

/// Directory holding the synchronous (local) tier under `root`.
pub fn local_tier_dir(root: &Path) -> PathBuf {
    root.join("local")
}

/// Directory holding the asynchronous (persistent) tier under `root`.
pub fn persistent_tier_dir(root: &Path) -> PathBuf {
    root.join("persistent")
}

/// Path of a single key's file inside a tier directory.
pub fn entry_path(dir: &Path, key: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_name(key), extension))
}

/// Encode a key as a file name.
///
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`, so distinct keys never share
/// a file and [`decode_name`] recovers the key.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Reverse [`sanitize_name`]. `None` for names it could not have produced.
pub fn decode_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("devdash_snapshot"), "devdash_snapshot");
        assert_eq!(sanitize_name("widget_github-stats-octocat"), "widget_github-stats-octocat");
        assert_eq!(sanitize_name("widget_a/b"), "widget_a%2Fb");
        assert_eq!(sanitize_name("owner:name"), "owner%3Aname");
        assert_eq!(sanitize_name("../escape"), "%2E%2E%2Fescape");
    }

    #[test]
    fn test_distinct_keys_get_distinct_names() {
        assert_ne!(sanitize_name("a.b"), sanitize_name("a_b"));
        assert_ne!(sanitize_name("a/b"), sanitize_name("a:b"));
        assert_ne!(sanitize_name("a%2Eb"), sanitize_name("a.b"));

        for key in ["a.b", "a_b", "100%", "héllo wörld", "widget_x/y:z"] {
            assert_eq!(decode_name(&sanitize_name(key)).as_deref(), Some(key));
        }
        assert_eq!(decode_name("bad%zz"), None);
        assert_eq!(decode_name("trailing%4"), None);
    }

    #[test]
    fn test_tier_paths() {
        let root = Path::new("/tmp/devdash");

        assert!(local_tier_dir(root).ends_with("devdash/local"));
        assert!(persistent_tier_dir(root).ends_with("devdash/persistent"));

        let entry = entry_path(&local_tier_dir(root), "devdash_widget_clock", "txt");
        assert!(entry.ends_with("local/devdash_widget_clock.txt"));
    }
}
