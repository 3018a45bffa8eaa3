use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// One contract source file. Read once, never mutated.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub filename: String,
    pub path: PathBuf,
    pub code: String,
}

impl SourceUnit {
    pub fn read(path: &Path) -> Result<Self, String> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("invalid source path: {}", path.display()))?
            .to_string();

        let code = fs::read_to_string(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;

        Ok(Self {
            filename,
            path: path.to_path_buf(),
            code,
        })
    }

    /// `Foo.sol` -> `Foo`
    pub fn stem(&self) -> &str {
        self.filename
            .strip_suffix(".sol")
            .unwrap_or(&self.filename)
    }
}

/// Lists `*.sol` files directly inside `dir`, sorted by name.
///
/// Test files (`*.t.sol`) are never treated as sources.
pub fn read_sources(dir: &Path) -> Result<Vec<SourceUnit>, String> {
    if !dir.is_dir() {
        return Err(format!("contracts directory not found: {}", dir.display()));
    }

    let mut units = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".sol") || name.ends_with(".t.sol") {
            continue;
        }

        units.push(SourceUnit::read(entry.path())?);
    }

    Ok(units)
}

/// Keeps only the units whose filename is in `selected`. Empty selection keeps all.
pub fn select(units: Vec<SourceUnit>, selected: &[String]) -> Vec<SourceUnit> {
    if selected.is_empty() {
        return units;
    }

    units
        .into_iter()
        .filter(|u| {
            selected
                .iter()
                .any(|s| s == &u.filename || s == u.stem())
        })
        .collect()
}
