#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const FAKE_FORGE: &str = r#"#!/bin/sh
case "$1" in
  build)
    echo "Compiler run successful!"
    ;;
  compile)
    if grep -q BROKEN "$3"; then
      echo "Error (2314): Expected ';' but got '}'"
      exit 1
    fi
    echo "Compiler run successful!"
    ;;
  *)
    exit 2
    ;;
esac
"#;

struct Project {
    tmp: TempDir,
    root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Proj");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("test")).unwrap();

        let forge = tmp.path().join("fake-forge");
        fs::write(&forge, FAKE_FORGE).unwrap();
        fs::set_permissions(&forge, fs::Permissions::from_mode(0o755)).unwrap();

        fs::write(
            root.join("invarforge.toml"),
            format!("[forge]\nbinary = \"{}\"\n", forge.display()),
        )
        .unwrap();

        Self { tmp, root }
    }

    fn contract(&self, name: &str, test: Option<&str>) {
        fs::write(
            self.root.join("src").join(format!("{name}.sol")),
            format!("pragma solidity ^0.8.19;\ncontract {name} {{}}\n"),
        )
        .unwrap();
        if let Some(body) = test {
            fs::write(self.root.join("test").join(format!("{name}.t.sol")), body).unwrap();
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        let home = self.tmp.path().join("home");
        Command::new(env!("CARGO_BIN_EXE_invarforge"))
            .arg("--project")
            .arg(&self.root)
            .args(args)
            .env("HOME", &home)
            .env("XDG_CONFIG_HOME", home.join(".config"))
            .env_remove("OPENAI_API_KEY")
            .env_remove("ANTHROPIC_API_KEY")
            .env_remove("INVARFORGE_PROVIDER")
            .output()
            .unwrap()
    }

    fn scratch(&self) -> PathBuf {
        self.tmp.path().join("ProjCompiler")
    }
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn check_lists_failing_and_missing_tests() {
    let p = Project::new();
    p.contract("Vault", Some("contract VaultTest { BROKEN }"));
    p.contract("Token", Some("contract TokenTest {}"));
    p.contract("Pool", None);

    let out = p.run(&["check"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let text = stdout(&out);
    assert!(text.contains("ok       Token"));
    assert!(text.contains("failing  Vault"));
    assert!(text.contains("missing  Pool"));
    assert!(text.contains("2 of 3 test(s) need repair"));

    let report = fs::read_to_string(p.scratch().join("Vault.txt")).unwrap();
    assert!(report.contains("Error (2314)"));
    assert!(p.scratch().join("invarforge.toml").is_file());
}

#[test]
fn check_only_touches_selected_files() {
    let p = Project::new();
    p.contract("Vault", Some("BROKEN"));
    p.contract("Token", Some("contract TokenTest {}"));

    let out = p.run(&["check", "Token"]);
    let text = stdout(&out);

    assert!(text.contains("0 of 1 test(s) need repair"));
    assert!(!Path::new(&p.scratch().join("Vault.txt")).exists());
}

#[test]
fn repair_without_an_api_key_fails_fast() {
    let p = Project::new();
    p.contract("Vault", Some("BROKEN"));

    let out = p.run(&["repair"]);

    assert!(!out.status.success());
    assert_eq!(fs::read_to_string(p.root.join("test/Vault.t.sol")).unwrap(), "BROKEN");
}

#[test]
fn build_stores_output_next_to_the_project() {
    let p = Project::new();
    p.contract("Vault", None);

    let out = p.run(&["build"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let saved = fs::read_to_string(p.tmp.path().join("Output/build_output.txt")).unwrap();
    assert_eq!(saved, "Compiler run successful!\n");
}
