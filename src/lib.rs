pub mod span;
pub mod diagnostics;
pub mod config;
pub mod ast;
pub mod types;
pub mod env;
pub mod template;
pub mod translator;
pub mod codegen;
pub mod emit;

use std::path::Path;

use tracing::debug;

use ast::Toplevel;
use codegen::ModuleCodegen;
use config::TranslatorConfig;
use diagnostics::TranslateError;
use emit::Artifact;

/// Translate one unit's declarations to an artifact (codegen → validate → optimize → finish).
/// `file` names the unit in positions and, by its stem, the object module.
pub fn translate(
    file: &str,
    decls: &[Toplevel],
    config: &TranslatorConfig,
    opt_level: u8,
) -> Result<Artifact, TranslateError> {
    let name = Path::new(file).file_stem().and_then(|s| s.to_str()).unwrap_or("craeft_module");
    let mut cg = ModuleCodegen::new(config, name, file)?;
    cg.codegen(decls)?;
    let mut tr = cg.finish_module()?;

    let mut report: Vec<u8> = Vec::new();
    let validated = tr.validate(&mut report);
    if !report.is_empty() {
        debug!(report = %String::from_utf8_lossy(&report), "verifier report");
    }
    validated?;

    tr.optimize(opt_level)?;
    tr.finish()
}
