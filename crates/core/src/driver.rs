use thiserror::Error;

use crate::ast::Program;
use crate::config::CompileOptions;
use crate::diag::{Diagnostic, has_errors, render_diagnostics};
use crate::layout::{ByteMap, finalize};
use crate::lower::lower_program;
use crate::sema::analyze;
use crate::span::{SourceId, SourceMap, Span};
use crate::symbols::SymbolTable;

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub byte_map: ByteMap,
    pub symbols: SymbolTable,
    /// Non-fatal diagnostics, in report order.
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Error)]
#[error("compilation failed")]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
    pub rendered: String,
}

/// Runs the code-generation pipeline over a parsed program: semantic
/// pre-scan, lowering, then layout and fixup resolution.
pub fn compile(
    program: &Program,
    source_map: &SourceMap,
    options: &CompileOptions,
) -> Result<CompileOutput, CompileError> {
    let mut diagnostics = Vec::new();

    log::debug!("analyzing {} module(s)", program.modules.len());
    let model = analyze(program, &mut diagnostics);
    if has_errors(&diagnostics) {
        return Err(fail_with_rendered(source_map, diagnostics));
    }

    log::debug!(
        "lowering {} callable(s), {} op set(s)",
        model.callables.len(),
        model.ops.len()
    );
    let emitter = lower_program(program, &model, options, &mut diagnostics);

    let anchor = program
        .modules
        .first()
        .map(|module| Span::origin(module.source_id))
        .unwrap_or_else(|| Span::origin(SourceId(0)));
    let (byte_map, symbols) = finalize(emitter, options, source_map, anchor, &mut diagnostics);
    if has_errors(&diagnostics) {
        return Err(fail_with_rendered(source_map, diagnostics));
    }

    log::debug!(
        "compiled {} byte(s), {} symbol(s)",
        byte_map.bytes.len(),
        symbols.entries.len()
    );
    Ok(CompileOutput {
        byte_map,
        symbols,
        warnings: diagnostics,
    })
}

fn fail_with_rendered(source_map: &SourceMap, diagnostics: Vec<Diagnostic>) -> CompileError {
    let rendered = render_diagnostics(source_map, &diagnostics);
    CompileError {
        diagnostics,
        rendered,
    }
}
