//! project/references.rs
//!
//! Import resolution for LLM context.
//!
//! The whole file is parsed with `solang-parser` first. When that fails, only
//! the text before the first type declaration is parsed, which is where
//! Solidity imports live anyway; the result is then marked `partial`.

use std::fs;
use std::path::{Path, PathBuf};

use solang_parser::diagnostics::Diagnostic;
use solang_parser::pt::SourceUnitPart;

use crate::project::solidity;
use crate::project::source::SourceUnit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDirective {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub import_path: String,
    pub resolved: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum ReferenceResolution {
    /// Imports were found. Only those resolving to a readable local file are kept.
    Resolved {
        references: Vec<Reference>,
        /// True when only the pre-declaration text could be parsed.
        partial: bool,
    },
    NoImports,
    /// Neither the full text nor the pre-declaration text parsed.
    Unparsed(String),
}

impl ReferenceResolution {
    /// Referenced files inlined as `path:\n<text>\n\n`, empty when there are none.
    pub fn context_text(&self) -> String {
        match self {
            ReferenceResolution::Resolved { references, .. } => references
                .iter()
                .map(|r| format!("{}:\n{}\n\n", r.import_path, r.text))
                .collect(),
            ReferenceResolution::NoImports | ReferenceResolution::Unparsed(_) => String::new(),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            ReferenceResolution::Resolved { references, .. } => references.len(),
            _ => 0,
        }
    }
}

/* ============================================================
   Public entry
   ============================================================ */

pub fn resolve_references(unit: &SourceUnit) -> ReferenceResolution {
    let base = unit
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let (imports, partial) = match parse_imports(&unit.code) {
        Ok(imports) => (imports, false),
        Err(full_err) => match parse_imports(&solidity::pre_declaration(&unit.code)) {
            Ok(imports) => (imports, true),
            Err(pre_err) => {
                return ReferenceResolution::Unparsed(format!(
                    "{full_err}; pre-declaration: {pre_err}"
                ))
            }
        },
    };

    if imports.is_empty() {
        return ReferenceResolution::NoImports;
    }

    let references = imports
        .into_iter()
        .filter_map(|imp| {
            let resolved = base.join(&imp.path);
            let text = fs::read_to_string(&resolved).ok()?;
            Some(Reference {
                import_path: imp.path,
                resolved,
                text,
            })
        })
        .collect();

    ReferenceResolution::Resolved { references, partial }
}

/// Import paths of a Solidity source, in declaration order.
///
/// Fails when the text is not valid Solidity. `import` directives naming an
/// identifier path instead of a file are skipped.
pub fn parse_imports(code: &str) -> Result<Vec<ImportDirective>, String> {
    let (tree, _comments) = solang_parser::parse(code, 0).map_err(describe)?;

    let imports = tree
        .0
        .iter()
        .filter_map(|part| match part {
            SourceUnitPart::ImportDirective(import) => import.literal(),
            _ => None,
        })
        .map(|literal| ImportDirective {
            path: literal.string.clone(),
        })
        .collect();

    Ok(imports)
}

fn describe(diagnostics: Vec<Diagnostic>) -> String {
    let first = diagnostics
        .first()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| "parse error".into());

    match diagnostics.len() {
        0 | 1 => first,
        n => format!("{first} (+{} more)", n - 1),
    }
}
