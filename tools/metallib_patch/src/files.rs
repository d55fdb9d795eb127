use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use walkdir::WalkDir;

/// Extension of Metal library containers.
pub const METALLIB_EXTENSION: &str = "metallib";

/// Containers to process under `root`: `root` itself if it is a file, otherwise every
/// `*.metallib` below it, sorted by path.
pub fn find_containers(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(anyhow!("no such file or directory: {}", root.display()));
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(METALLIB_EXTENSION)
        {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Where the patched copy of `input` goes: next to it when `output_dir` is `None`, otherwise at
/// the same path relative to `root` under `output_dir`.
pub fn output_path(input: &Path, root: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        None => input.to_path_buf(),
        Some(dir) => {
            let relative = input
                .strip_prefix(root)
                .ok()
                .filter(|rel| !rel.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| input.file_name().map(PathBuf::from).unwrap_or_default());
            dir.join(relative)
        }
    }
}

/// Writes `data` to `<path>.patched` and renames it over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".patched");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, data).with_context(|| format!("write {}", tmp_path.display()))?;

    // `rename` doesn't replace on Windows.
    #[cfg(windows)]
    {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "rename {} to {}",
            tmp_path.display(),
            path.display()
        )
    })
}

/// A short human label for a container: the enclosing `.framework` or `.app` bundle name plus
/// the file name, or the full path when no bundle is found within a few levels.
pub fn container_label(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.ancestors()
        .skip(1)
        .take(6)
        .filter_map(|dir| dir.file_name()?.to_str())
        .find(|name| name.ends_with(".framework") || name.ends_with(".app"))
        .map(|bundle| format!("{bundle}'s {file_name}"))
        .unwrap_or_else(|| path.display().to_string())
}

/// A file-name-safe rendering of a module name, at most 64 characters.
pub fn module_file_stem(name: &str) -> String {
    name.chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_only_metallibs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/Foo.framework")).unwrap();
        fs::write(root.join("b/Foo.framework/default.metallib"), b"x").unwrap();
        fs::write(root.join("a.metallib"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();

        let found = find_containers(root).unwrap();
        assert_eq!(
            found,
            [
                root.join("a.metallib"),
                root.join("b/Foo.framework/default.metallib")
            ]
        );
        assert_eq!(find_containers(&found[0]).unwrap(), [found[0].clone()]);
        assert!(find_containers(&root.join("missing")).is_err());
    }

    #[test]
    fn output_paths_mirror_the_tree() {
        let input = Path::new("/in/A.framework/default.metallib");
        assert_eq!(output_path(input, Path::new("/in"), None), input);
        assert_eq!(
            output_path(input, Path::new("/in"), Some(Path::new("/out"))),
            Path::new("/out/A.framework/default.metallib")
        );
        // A single-file root keeps just the file name.
        assert_eq!(
            output_path(input, input, Some(Path::new("/out"))),
            Path::new("/out/default.metallib")
        );
    }

    #[test]
    fn atomic_write_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/x.metallib");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("sub/x.metallib.patched").exists());
    }

    #[test]
    fn stems_are_file_name_safe() {
        assert_eq!(module_file_stem("Icon::shadow_vertex"), "Icon__shadow_vertex");
        assert_eq!(module_file_stem("a/b.c"), "a_b_c");
        assert_eq!(module_file_stem(&"x".repeat(100)).len(), 64);
    }

    #[test]
    fn labels_name_the_bundle() {
        let path = Path::new(
            "/System/Library/PrivateFrameworks/VFX.framework/Versions/A/Resources/default.metallib",
        );
        assert_eq!(container_label(path), "VFX.framework's default.metallib");
        assert_eq!(container_label(Path::new("/tmp/x.metallib")), "/tmp/x.metallib");
    }
}
