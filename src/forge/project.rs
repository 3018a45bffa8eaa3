// Whole-project forge operations: build and remappings.

use std::fs;
use std::path::PathBuf;

use crate::forge::classify::{classify, ClassifierMode};
use crate::forge::invoker::{strip_ansi, BuildReport, ForgeCompiler};
use crate::project::layout::ProjectLayout;

const BUILD_OUTPUT: &str = "build_output.txt";

/// `forge build` in the project root; output lands in `<Output>/build_output.txt`.
pub fn build_project(
    forge: &ForgeCompiler,
    layout: &ProjectLayout,
    classifier: ClassifierMode,
) -> Result<BuildReport, String> {
    let out = forge.run(&["build"], &layout.root)?;
    let text = strip_ansi(&out.text);

    let dir = layout.output_dir();
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    let path = dir.join(BUILD_OUTPUT);
    fs::write(&path, &text).map_err(|e| format!("{}: {}", path.display(), e))?;

    Ok(BuildReport {
        path,
        status: classify(classifier, &text, out.exit_code),
        exit_code: out.exit_code,
        text,
    })
}

/// Regenerates `remappings.txt` from `forge remappings` plus `extra` lines.
pub fn write_remappings(
    forge: &ForgeCompiler,
    layout: &ProjectLayout,
    extra: &[String],
) -> Result<PathBuf, String> {
    let out = forge.run(&["remappings"], &layout.root)?;
    if out.exit_code != Some(0) {
        return Err(format!("forge remappings failed:\n{}", strip_ansi(&out.text)));
    }

    let mut lines: Vec<String> = strip_ansi(&out.text)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect();

    for line in extra {
        let line = line.trim();
        if !line.is_empty() && !lines.iter().any(|l| l == line) {
            lines.push(line.to_string());
        }
    }

    let path = layout.root.join("remappings.txt");
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(&path, body).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::state::CompileStatus;
    use tempfile::TempDir;

    // `sh <subcommand>` reads ./<subcommand> as a script, standing in for forge.
    fn project_with(script_name: &str, script: &str) -> (TempDir, ProjectLayout) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Proj");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(script_name), script).unwrap();
        let layout = ProjectLayout::new(&root, "src", "test");
        (tmp, layout)
    }

    #[test]
    fn build_output_is_stored_next_to_the_project() {
        let (tmp, layout) = project_with("build", "printf '\\033[32mCompiler run successful!\\033[0m\\n'\n");
        let forge = ForgeCompiler::new("sh");

        let report = build_project(&forge, &layout, ClassifierMode::Substring).unwrap();
        assert_eq!(report.status, CompileStatus::Succeeded);
        assert_eq!(report.path, tmp.path().join("Output/build_output.txt"));
        assert_eq!(fs::read_to_string(&report.path).unwrap(), "Compiler run successful!\n");
    }

    #[test]
    fn remappings_merge_extra_lines_without_duplicates() {
        let (_tmp, layout) = project_with(
            "remappings",
            "echo 'forge-std/=lib/forge-std/src/'\necho 'ds-test/=lib/ds-test/src/'\n",
        );
        let forge = ForgeCompiler::new("sh");
        let extra = vec![
            "openzeppelin/contracts/=lib/openzeppelin-contracts/contracts/".to_string(),
            "forge-std/=lib/forge-std/src/".to_string(),
        ];

        let path = write_remappings(&forge, &layout, &extra).unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "forge-std/=lib/forge-std/src/\n\
             ds-test/=lib/ds-test/src/\n\
             openzeppelin/contracts/=lib/openzeppelin-contracts/contracts/\n"
        );
    }
}
