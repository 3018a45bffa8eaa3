// src/project/layout.rs
//
// Fixed naming convention the repair core depends on:
//   <project>/<contracts>/X.sol   source
//   <project>/<test>/X.t.sol      candidate test
//   <scratch>/X.txt               build report
//
// The scratch directory is a sibling `<project>Compiler` that carries the
// project's configuration and libraries but not its src/ or test/ trees.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

const PRESERVED_REPORTS: [&str; 1] = ["remappings.txt"];
const UNCOPIED_DIRS: [&str; 2] = ["src", "test"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePaths {
    /// Source stem, `Foo` for `Foo.sol`.
    pub name: String,
    pub source: PathBuf,
    pub test: PathBuf,
    pub report: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub contracts_rel: String,
    pub contracts_dir: PathBuf,
    pub test_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: &Path, contracts_rel: &str, test_rel: &str) -> Self {
        let root = root.to_path_buf();
        let project_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".into());

        let scratch_dir = root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join(format!("{project_name}Compiler"));

        Self {
            contracts_dir: root.join(contracts_rel),
            contracts_rel: contracts_rel.trim_matches('/').to_string(),
            test_dir: root.join(test_rel),
            scratch_dir,
            root,
        }
    }

    pub fn candidate(&self, source_filename: &str) -> CandidatePaths {
        CandidatePaths {
            name: source_stem(source_filename).to_string(),
            source: self.contracts_dir.join(source_filename),
            test: self.test_dir.join(test_file_name(source_filename)),
            report: self.scratch_dir.join(report_file_name(source_filename)),
        }
    }

    /// Where whole-project build output is stored.
    pub fn output_dir(&self) -> PathBuf {
        self.root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join("Output")
    }

    /// Creates the scratch directory and mirrors the project into it.
    ///
    /// Top-level files are always refreshed; directories are copied only when
    /// absent. Returns the number of entries copied.
    pub fn prepare_scratch(&self) -> Result<usize, String> {
        fs::create_dir_all(&self.scratch_dir).map_err(|e| e.to_string())?;

        let mut copied = 0;
        let entries = fs::read_dir(&self.root)
            .map_err(|e| format!("{}: {}", self.root.display(), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| e.to_string())?;
            let path = entry.path();
            let name = entry.file_name();
            let dest = self.scratch_dir.join(&name);

            if path.is_dir() {
                if UNCOPIED_DIRS.iter().any(|d| name == *d) || dest.exists() {
                    continue;
                }
                copy_dir(&path, &dest)?;
                copied += 1;
            } else if path.is_file() {
                fs::copy(&path, &dest).map_err(|e| e.to_string())?;
                copied += 1;
            }
        }

        Ok(copied)
    }

    /// Removes report files left by previous runs. Returns how many were removed.
    pub fn clear_stale_reports(&self) -> Result<usize, String> {
        let pattern = format!(
            "{}/*.txt",
            glob::Pattern::escape(&self.scratch_dir.to_string_lossy())
        );

        let mut removed = 0;
        for path in glob::glob(&pattern).map_err(|e| e.to_string())?.flatten() {
            if is_preserved(&path) {
                continue;
            }

            fs::remove_file(&path).map_err(|e| e.to_string())?;
            removed += 1;
        }

        Ok(removed)
    }
}

pub fn source_stem(source_filename: &str) -> &str {
    source_filename
        .strip_suffix(".sol")
        .unwrap_or(source_filename)
}

/// `Foo.sol` -> `Foo.t.sol`
pub fn test_file_name(source_filename: &str) -> String {
    format!("{}.t.sol", source_stem(source_filename))
}

/// `Foo.sol` -> `Foo.txt`
pub fn report_file_name(source_filename: &str) -> String {
    format!("{}.txt", source_stem(source_filename))
}

/// True for scratch files that reports must never replace (`remappings.txt`).
pub fn is_preserved(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| PRESERVED_REPORTS.iter().any(|p| p.eq_ignore_ascii_case(n)))
        .unwrap_or(false)
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), String> {
    for entry in WalkDir::new(from).into_iter().filter_map(Result::ok) {
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| e.to_string())?;
        let target = to.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| e.to_string())?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            fs::copy(entry.path(), &target).map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn naming_convention_derives_the_triple() {
        let layout = ProjectLayout::new(Path::new("/work/Foundry"), "src/utils/", "test");
        let paths = layout.candidate("Foo.sol");

        assert_eq!(paths.name, "Foo");
        assert_eq!(paths.source, PathBuf::from("/work/Foundry/src/utils/Foo.sol"));
        assert_eq!(paths.test, PathBuf::from("/work/Foundry/test/Foo.t.sol"));
        assert_eq!(paths.report, PathBuf::from("/work/FoundryCompiler/Foo.txt"));
        assert_eq!(layout.contracts_rel, "src/utils");
    }

    #[test]
    fn distinct_sources_never_share_a_report_path() {
        let layout = ProjectLayout::new(Path::new("/p/Proj"), "src", "test");
        let a = layout.candidate("Vault.sol");
        let b = layout.candidate("VaultLib.sol");
        assert_ne!(a.report, b.report);
        assert_ne!(a.test, b.test);
    }

    #[test]
    fn scratch_mirrors_everything_but_src_and_test() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Proj");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("test")).unwrap();
        fs::create_dir_all(root.join("lib/forge-std/src")).unwrap();
        fs::write(root.join("lib/forge-std/src/Test.sol"), "// test").unwrap();
        fs::write(root.join("foundry.toml"), "[profile.default]").unwrap();

        let layout = ProjectLayout::new(&root, "src", "test");
        assert_eq!(layout.scratch_dir, tmp.path().join("ProjCompiler"));

        let copied = layout.prepare_scratch().unwrap();
        assert_eq!(copied, 2);
        assert!(layout.scratch_dir.join("foundry.toml").is_file());
        assert!(layout.scratch_dir.join("lib/forge-std/src/Test.sol").is_file());
        assert!(!layout.scratch_dir.join("src").exists());
        assert!(!layout.scratch_dir.join("test").exists());

        // existing directories are left alone on the second pass
        assert_eq!(layout.prepare_scratch().unwrap(), 1);
    }

    #[test]
    fn stale_reports_are_removed_except_remappings() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Proj");
        fs::create_dir_all(&root).unwrap();
        let layout = ProjectLayout::new(&root, "src", "test");
        fs::create_dir_all(&layout.scratch_dir).unwrap();

        fs::write(layout.scratch_dir.join("Foo.txt"), "old").unwrap();
        fs::write(layout.scratch_dir.join("Bar.txt"), "old").unwrap();
        fs::write(layout.scratch_dir.join("remappings.txt"), "a/=b/").unwrap();

        assert_eq!(layout.clear_stale_reports().unwrap(), 2);
        assert!(layout.scratch_dir.join("remappings.txt").exists());
        assert!(!layout.scratch_dir.join("Foo.txt").exists());
    }
}
