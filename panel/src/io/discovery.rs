//! Locate the site configuration that marks where the worker runs.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

const SKIPPED_DIRS: [&str; 2] = ["target", "node_modules"];

/// Find exactly one file named `file_name` below `root`.
///
/// Zero or several matches both mean "no configuration": the host then runs
/// without a worker.
pub fn discover_site_config(root: &Path, file_name: &str, max_depth: usize) -> Option<PathBuf> {
    let matches = find_candidates(root, file_name, max_depth);
    match matches.as_slice() {
        [single] => {
            info!(path = %single.display(), "site config discovered");
            Some(single.clone())
        }
        [] => {
            info!(root = %root.display(), file_name, "no site config found");
            None
        }
        many => {
            warn!(
                root = %root.display(),
                file_name,
                count = many.len(),
                "multiple site configs found, ignoring all"
            );
            None
        }
    }
}

/// Directory the worker is started in: the parent of the site config.
pub fn worker_dir(site_config: &Path) -> PathBuf {
    site_config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn find_candidates(root: &Path, file_name: &str, max_depth: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && entry.file_name() == file_name {
            found.push(entry.into_path());
        }
    }
    found
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let Some(name) = entry.file_name().to_str() else {
        return true;
    };
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "").expect("write");
    }

    #[test]
    fn single_match_is_returned() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "site/config.toml");
        touch(temp.path(), "site/content/index.md");

        let found = discover_site_config(temp.path(), "config.toml", 4).expect("found");
        assert_eq!(found, temp.path().join("site/config.toml"));
        assert_eq!(worker_dir(&found), temp.path().join("site"));
    }

    #[test]
    fn no_match_yields_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "README.md");
        assert_eq!(discover_site_config(temp.path(), "config.toml", 4), None);
    }

    #[test]
    fn multiple_matches_yield_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "a/config.toml");
        touch(temp.path(), "b/config.toml");
        assert_eq!(discover_site_config(temp.path(), "config.toml", 4), None);
    }

    #[test]
    fn hidden_and_build_dirs_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "config.toml");
        touch(temp.path(), ".git/config.toml");
        touch(temp.path(), "target/debug/config.toml");
        touch(temp.path(), "node_modules/pkg/config.toml");

        let found = discover_site_config(temp.path(), "config.toml", 4).expect("found");
        assert_eq!(found, temp.path().join("config.toml"));
    }

    #[test]
    fn depth_limit_applies() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "a/b/c/config.toml");
        assert_eq!(discover_site_config(temp.path(), "config.toml", 2), None);
        assert!(discover_site_config(temp.path(), "config.toml", 4).is_some());
    }
}
