mod consts;
mod model;
mod types;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use zax_eval::{BinaryOp, EvalError, ImmExpr, Resolver};

use crate::ast::{
    DataDecl, DataInit, Decl, EaExpr, EnumDecl, ExternDecl, FuncDecl, Matcher, OpDecl, Param,
    Program, SectionKind, TypeDef, TypeExpr, VarDecl, VarKind, key,
};
use crate::diag::{Diagnostic, DiagnosticId};
use crate::span::Span;

use consts::{PendingType, queue_const, queue_enum, resolve_consts_and_types};
use types::TypeResolveError;

pub use model::*;

/// Builds the whole-program environment: constants and enum members, named
/// types, callables, op overload sets, storage and aliases. Runs before any
/// lowering so every declaration may be referenced before it appears.
pub fn analyze(program: &Program, diagnostics: &mut Vec<Diagnostic>) -> SemanticModel {
    let mut model = SemanticModel::default();
    let mut pending_consts = IndexMap::new();
    let mut pending_types: IndexMap<String, PendingType> = IndexMap::new();

    for module in &program.modules {
        for decl in &module.decls {
            match &decl.node {
                Decl::Const(const_decl) => queue_const(
                    &const_decl.name,
                    const_decl.value.clone(),
                    ConstKind::Const,
                    decl.span,
                    &mut pending_consts,
                    diagnostics,
                ),
                Decl::Enum(enum_decl) => {
                    collect_enum_type(
                        enum_decl,
                        decl.span,
                        &mut model,
                        &pending_types,
                        diagnostics,
                    );
                    queue_enum(enum_decl, decl.span, &mut pending_consts, diagnostics);
                }
                Decl::Type(type_decl) => {
                    let type_key = key(&type_decl.name);
                    if pending_types.contains_key(&type_key)
                        || model.type_aliases.contains_key(&type_key)
                        || is_builtin_type(&type_key)
                    {
                        diagnostics.push(Diagnostic::error(
                            DiagnosticId::Semantic,
                            decl.span,
                            format!("duplicate type '{}'", type_decl.name),
                        ));
                        continue;
                    }
                    pending_types.insert(
                        type_key,
                        PendingType {
                            name: type_decl.name.clone(),
                            def: type_decl.def.clone(),
                            span: decl.span,
                        },
                    );
                }
                _ => {}
            }
        }
    }

    resolve_consts_and_types(pending_consts, pending_types, &mut model, diagnostics);

    let mut claimed: FxHashMap<String, Span> = model
        .consts
        .iter()
        .map(|(name, meta)| (name.clone(), meta.span))
        .collect();

    for module in &program.modules {
        for decl in &module.decls {
            match &decl.node {
                Decl::Func(func) => {
                    collect_func(func, decl.span, &mut claimed, &mut model, diagnostics)
                }
                Decl::Extern(extern_decl) => {
                    collect_extern(extern_decl, &mut claimed, &mut model, diagnostics)
                }
                Decl::Op(op) => collect_op(op, decl.span, &mut claimed, &mut model, diagnostics),
                Decl::Data(data) => collect_data(data, &mut claimed, &mut model, diagnostics),
                Decl::Var(var) => collect_var(var, &mut claimed, &mut model, diagnostics),
                Decl::Bin(bin) => {
                    if bin.section == SectionKind::Var {
                        diagnostics.push(Diagnostic::error(
                            DiagnosticId::Semantic,
                            decl.span,
                            format!("bin '{}' cannot be placed in the var section", bin.name),
                        ));
                        continue;
                    }
                    if claim(&bin.name, decl.span, &mut claimed, diagnostics) {
                        insert_blob(
                            &mut model,
                            &bin.name,
                            StorageKind::Bin,
                            bin.bytes.len(),
                            decl.span,
                        );
                    }
                }
                Decl::Hex(hex) => {
                    if claim(&hex.name, decl.span, &mut claimed, diagnostics) {
                        let total = hex.chunks.iter().map(|chunk| chunk.bytes.len()).sum();
                        insert_blob(&mut model, &hex.name, StorageKind::Hex, total, decl.span);
                    }
                }
                _ => {}
            }
        }
    }

    log::debug!(
        "pre-scan: {} consts, {} types, {} callables, {} op sets, {} storage",
        model.consts.len(),
        model.aggregates.len() + model.type_aliases.len(),
        model.callables.len(),
        model.ops.len(),
        model.storage.len()
    );
    model
}

fn is_builtin_type(name: &str) -> bool {
    matches!(name, "byte" | "word" | "addr")
}

fn collect_enum_type(
    decl: &EnumDecl,
    span: Span,
    model: &mut SemanticModel,
    pending_types: &IndexMap<String, PendingType>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let type_key = key(&decl.name);
    if pending_types.contains_key(&type_key)
        || model.type_aliases.contains_key(&type_key)
        || is_builtin_type(&type_key)
    {
        diagnostics.push(Diagnostic::error(
            DiagnosticId::Semantic,
            span,
            format!("duplicate type '{}'", decl.name),
        ));
        return;
    }
    model.type_aliases.insert(type_key, Ty::Byte);
}

fn claim(
    name: &str,
    span: Span,
    claimed: &mut FxHashMap<String, Span>,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let lookup = key(name);
    if let Some(previous) = claimed.get(&lookup) {
        diagnostics.push(
            Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!("duplicate symbol '{name}'"),
            )
            .with_label(*previous, "first defined here")
            .with_help("rename one of the declarations to keep symbols unique"),
        );
        return false;
    }
    claimed.insert(lookup, span);
    true
}

fn resolve_params(
    owner: &str,
    params: &[Param],
    span: Span,
    model: &SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Vec<ParamMeta>> {
    let mut seen = FxHashSet::default();
    let mut resolved = Vec::with_capacity(params.len());
    for param in params {
        if !seen.insert(key(&param.name)) {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!("duplicate parameter '{}' in '{owner}'", param.name),
            ));
            return None;
        }
        let ty = match model.resolve_type(&param.ty) {
            Ok(ty) => ty,
            Err(message) => {
                diagnostics.push(Diagnostic::error(
                    DiagnosticId::Semantic,
                    span,
                    format!("parameter '{}' of '{owner}': {message}", param.name),
                ));
                return None;
            }
        };
        if ty.scalar().is_none() {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!(
                    "parameter '{}' of '{owner}' must be byte, word or addr, found '{ty}'",
                    param.name
                ),
            ));
            return None;
        }
        resolved.push(ParamMeta {
            name: param.name.clone(),
            ty,
        });
    }
    Some(resolved)
}

fn resolve_return(
    owner: &str,
    ret: Option<&TypeExpr>,
    span: Span,
    model: &SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Ty> {
    let ret = ret?;
    match model.resolve_type(ret) {
        Ok(ty) => Some(ty),
        Err(message) => {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!("return type of '{owner}': {message}"),
            ));
            None
        }
    }
}

fn reject_mnemonic_name(name: &str, span: Span, diagnostics: &mut Vec<Diagnostic>) -> bool {
    if zax_isaz80::is_mnemonic(name) {
        diagnostics.push(Diagnostic::error(
            DiagnosticId::Semantic,
            span,
            format!("'{name}' is an instruction mnemonic and cannot name a function"),
        ));
        return true;
    }
    false
}

fn collect_func(
    func: &FuncDecl,
    span: Span,
    claimed: &mut FxHashMap<String, Span>,
    model: &mut SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if reject_mnemonic_name(&func.name, span, diagnostics)
        || !claim(&func.name, span, claimed, diagnostics)
    {
        return;
    }
    let Some(params) = resolve_params(&func.name, &func.params, span, model, diagnostics) else {
        return;
    };
    let ret = resolve_return(&func.name, func.ret.as_ref(), span, model, diagnostics);
    model.callables.insert(
        key(&func.name),
        Callable {
            name: func.name.clone(),
            params,
            ret,
            target: CallTarget::Func,
            span,
        },
    );
}

fn collect_extern(
    decl: &ExternDecl,
    claimed: &mut FxHashMap<String, Span>,
    model: &mut SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for func in &decl.funcs {
        let span = func.span;
        let func = &func.node;
        if reject_mnemonic_name(&func.name, span, diagnostics)
            || !claim(&func.name, span, claimed, diagnostics)
        {
            continue;
        }
        let at = match zax_eval::evaluate(&func.at, &*model) {
            Ok(at) => at,
            Err(error) => {
                diagnostics.push(Diagnostic::error(
                    DiagnosticId::Semantic,
                    span,
                    format!("extern '{}' has no constant address: {error}", func.name),
                ));
                continue;
            }
        };
        let Some(params) = resolve_params(&func.name, &func.params, span, model, diagnostics)
        else {
            continue;
        };
        let ret = resolve_return(&func.name, func.ret.as_ref(), span, model, diagnostics);
        model.callables.insert(
            key(&func.name),
            Callable {
                name: func.name.clone(),
                params,
                ret,
                target: CallTarget::Extern {
                    base: decl.base.as_deref().map(key),
                    at,
                },
                span,
            },
        );
    }
}

fn collect_op(
    op: &OpDecl,
    span: Span,
    claimed: &mut FxHashMap<String, Span>,
    model: &mut SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let op_key = key(&op.name);
    if !model.ops.contains_key(&op_key) && !claim(&op.name, span, claimed, diagnostics) {
        return;
    }

    let mut seen = FxHashSet::default();
    for param in &op.params {
        if !seen.insert(key(&param.name)) {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!("duplicate parameter '{}' in op '{}'", param.name, op.name),
            ));
            return;
        }
        if matches!(&param.matcher, Matcher::Token(token) if token.trim().is_empty()) {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!("empty token matcher in op '{}'", op.name),
            ));
            return;
        }
    }

    let overloads = model.ops.entry(op_key).or_default();
    let ordinal = overloads.len();
    overloads.push(OpOverload {
        decl: op.clone(),
        span,
        ordinal,
    });
}

fn collect_data(
    data: &DataDecl,
    claimed: &mut FxHashMap<String, Span>,
    model: &mut SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for entry in &data.entries {
        let span = entry.span;
        let entry = &entry.node;
        if !claim(&entry.name, span, claimed, diagnostics) {
            continue;
        }
        let ty = match model.resolve_type(&entry.ty) {
            Ok(ty) => ty,
            Err(message) => {
                diagnostics.push(Diagnostic::error(
                    DiagnosticId::Semantic,
                    span,
                    format!("data '{}': {message}", entry.name),
                ));
                continue;
            }
        };
        let ty = match infer_data_length(model, &ty, &entry.init) {
            Ok(ty) => ty,
            Err(message) => {
                diagnostics.push(Diagnostic::error(
                    DiagnosticId::Semantic,
                    span,
                    format!("data '{}': {message}", entry.name),
                ));
                continue;
            }
        };
        let Some(size) = model.size_of(&ty) else {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!("data '{}' has no static size", entry.name),
            ));
            continue;
        };
        model.storage.insert(
            key(&entry.name),
            StorageMeta {
                name: entry.name.clone(),
                kind: StorageKind::Data,
                ty,
                size,
                span,
            },
        );
    }
}

/// Fills in the length of an unsized top-level array from its initializer.
fn infer_data_length(model: &SemanticModel, ty: &Ty, init: &DataInit) -> Result<Ty, String> {
    let Ty::Array { element, len: None } = ty else {
        return Ok(ty.clone());
    };
    let len = match init {
        DataInit::Values(values) => {
            let per_element = model
                .scalar_slots(element)
                .map(|slots| slots.len())
                .filter(|count| *count > 0)
                .ok_or_else(|| format!("array element type '{element}' has no static size"))?;
            if values.is_empty() || values.len() % per_element != 0 {
                return Err(format!(
                    "{} initializer values do not fill whole '{element}' elements",
                    values.len()
                ));
            }
            values.len() / per_element
        }
        DataInit::Str(text) => {
            if **element != Ty::Byte {
                return Err("string initializers require a byte array".to_string());
            }
            text.len()
        }
        DataInit::Zero => return Err("an unsized array needs an initializer".to_string()),
    };
    let len = u32::try_from(len)
        .ok()
        .filter(|len| *len >= 1)
        .ok_or_else(|| "array initializer is empty or too long".to_string())?;
    Ok(Ty::Array {
        element: element.clone(),
        len: Some(len),
    })
}

fn collect_var(
    var: &VarDecl,
    claimed: &mut FxHashMap<String, Span>,
    model: &mut SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for entry in &var.entries {
        let span = entry.span;
        let entry = &entry.node;
        if !claim(&entry.name, span, claimed, diagnostics) {
            continue;
        }
        match &entry.kind {
            VarKind::Alias(ea) => {
                model.aliases.insert(
                    key(&entry.name),
                    AliasMeta {
                        name: entry.name.clone(),
                        ea: ea.clone(),
                        span,
                    },
                );
            }
            VarKind::Storage(ty) => {
                let ty = match model.resolve_type(ty) {
                    Ok(ty) => ty,
                    Err(message) => {
                        diagnostics.push(Diagnostic::error(
                            DiagnosticId::Semantic,
                            span,
                            format!("var '{}': {message}", entry.name),
                        ));
                        continue;
                    }
                };
                let Some(size) = model.size_of(&ty) else {
                    diagnostics.push(Diagnostic::error(
                        DiagnosticId::Semantic,
                        span,
                        format!("var '{}' needs a statically sized type, found '{ty}'", entry.name),
                    ));
                    continue;
                };
                model.storage.insert(
                    key(&entry.name),
                    StorageMeta {
                        name: entry.name.clone(),
                        kind: StorageKind::Var,
                        ty,
                        size,
                        span,
                    },
                );
            }
        }
    }
}

fn insert_blob(model: &mut SemanticModel, name: &str, kind: StorageKind, len: usize, span: Span) {
    let size = u32::try_from(len).unwrap_or(u32::MAX);
    model.storage.insert(
        key(name),
        StorageMeta {
            name: name.to_string(),
            kind,
            ty: Ty::Array {
                element: Box::new(Ty::Byte),
                len: Some(size),
            },
            size,
            span,
        },
    );
}

/// Alias target of a module-level `var` alias.
pub fn alias_target<'a>(model: &'a SemanticModel, name: &str) -> Option<&'a EaExpr> {
    model.aliases.get(&key(name)).map(|alias| &alias.ea)
}

#[cfg(test)]
mod tests;
