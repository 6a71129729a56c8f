mod calls;
mod control;
mod data;
mod ea;
mod flow;
mod materialize;
mod memory;
mod operands;
mod ops;

#[cfg(test)]
mod tests;

use indexmap::IndexMap;
use zax_eval::ImmExpr;
use zax_isaz80::{
    Condition, IndexReg, Operand as IsaOperand, Reg8, Reg16, encode, format_instruction,
    is_mnemonic,
};

use crate::ast::{
    Decl, EaExpr, FuncDecl, Instruction, Item, LocalDecl, Program, SectionDecl, SectionKind, key,
};
use crate::config::CompileOptions;
use crate::diag::{Diagnostic, DiagnosticId};
use crate::emit::{BaseSetting, Emitter, SegmentKind};
use crate::fixup::{Fixup, FixupKind};
use crate::sema::{CallTarget, Scalar, SemanticModel, Ty};
use crate::span::{Span, Spanned};
use crate::symbols::{SymbolDef, SymbolKind, SymbolScope, SymbolValue};

use flow::{FlowState, JoinIssue};
use operands::{LOperand, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub id: DiagnosticId,
    pub message: String,
}

impl Fault {
    pub fn addressing(message: impl Into<String>) -> Self {
        Self {
            id: DiagnosticId::Addressing,
            message: message.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self {
            id: DiagnosticId::Semantic,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Patch {
    pub operand: usize,
    pub symbol: Option<String>,
    pub display: String,
    pub addend: i64,
    pub relative: bool,
}

impl Patch {
    /// Splits a value into the placeholder the encoder sees and the patch
    /// that fills it in later.
    pub fn split(value: &Value, operand: usize) -> (i64, Option<Patch>) {
        match value {
            Value::Const(value) => (*value, None),
            Value::Symbol {
                key,
                display,
                addend,
            } => (
                0,
                Some(Patch {
                    operand,
                    symbol: Some(key.clone()),
                    display: display.clone(),
                    addend: *addend,
                    relative: false,
                }),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SlotInfo {
    pub disp: i64,
    pub ty: Ty,
}

#[derive(Debug, Clone)]
pub(crate) struct LabelInfo {
    pub symbol: String,
    pub display: String,
    pub hidden: bool,
}

#[derive(Debug)]
pub(crate) struct FunctionScope {
    pub name: String,
    pub key: String,
    pub slots: IndexMap<String, SlotInfo>,
    pub aliases: IndexMap<String, EaExpr>,
    pub labels: IndexMap<String, LabelInfo>,
    /// Hidden epilogue label; present exactly when the function has a frame.
    pub epilogue: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ActiveOp {
    pub key: String,
    pub ordinal: usize,
    pub name: String,
    pub cycle_reported: bool,
}

pub(crate) struct LowerContext<'a> {
    pub model: &'a SemanticModel,
    pub emitter: Emitter,
    pub diagnostics: &'a mut Vec<Diagnostic>,
    next_id: usize,
    pub flow: FlowState,
    pub func: Option<FunctionScope>,
    pub op_stack: Vec<ActiveOp>,
    pub macro_site: Option<Span>,
}

impl<'a> LowerContext<'a> {
    fn new(
        model: &'a SemanticModel,
        options: &CompileOptions,
        diagnostics: &'a mut Vec<Diagnostic>,
    ) -> Self {
        Self {
            model,
            emitter: Emitter::new(options),
            diagnostics,
            next_id: 0,
            flow: FlowState::unreachable(),
            func: None,
            op_stack: Vec::new(),
            macro_site: None,
        }
    }

    pub fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn hidden_label(&mut self, family: &str) -> String {
        format!("__zax_{family}_{}", self.next_id())
    }

    pub fn error(&mut self, id: DiagnosticId, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(id, span, message));
    }

    pub fn report(&mut self, fault: Fault, span: Span) {
        self.diagnostics
            .push(Diagnostic::error(fault.id, span, fault.message));
    }

    pub fn uses_slots(&self) -> bool {
        self.func
            .as_ref()
            .is_some_and(|scope| scope.epilogue.is_some())
    }

    pub fn define_hidden(&mut self, label: &str, span: Span) {
        let offset = self.emitter.offset(SectionKind::Code);
        let def = SymbolDef {
            name: label.to_string(),
            kind: SymbolKind::Label,
            scope: SymbolScope::Local,
            value: SymbolValue::Section {
                section: SectionKind::Code,
                offset,
            },
            size: None,
            span,
            hidden: true,
        };
        if self.emitter.define(label.to_string(), def).is_err() {
            self.error(
                DiagnosticId::Layout,
                span,
                format!("internal label '{label}' defined twice"),
            );
        }
    }

    pub fn emit(&mut self, mnemonic: &str, operands: &[IsaOperand], span: Span) -> bool {
        self.emit_inner(mnemonic, operands, None, span, true)
    }

    pub fn emit_patched(
        &mut self,
        mnemonic: &str,
        operands: &[IsaOperand],
        patch: Option<Patch>,
        span: Span,
    ) -> bool {
        self.emit_inner(mnemonic, operands, patch, span, true)
    }

    /// Frame setup and teardown bypass the stack tracker.
    fn emit_untracked(&mut self, mnemonic: &str, operands: &[IsaOperand], span: Span) -> bool {
        self.emit_inner(mnemonic, operands, None, span, false)
    }

    fn emit_inner(
        &mut self,
        mnemonic: &str,
        operands: &[IsaOperand],
        patch: Option<Patch>,
        span: Span,
        tracked: bool,
    ) -> bool {
        let bytes = match encode(mnemonic, operands) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.error(DiagnosticId::Encode, span, error.to_string());
                return false;
            }
        };

        let (site, kind) = match self.macro_site {
            Some(site) => (site, SegmentKind::Macro),
            None => (span, SegmentKind::Code),
        };
        let offset = self.emitter.write(SectionKind::Code, &bytes, site, kind);
        let end = offset + bytes.len() as u32;
        let text = trace_text(mnemonic, operands, patch.as_ref());

        if let Some(patch) = patch {
            let (at, kind) = if patch.relative {
                (
                    end - 1,
                    FixupKind::Relative8 {
                        origin: end,
                        mnemonic: mnemonic.to_string(),
                    },
                )
            } else {
                (end - 2, FixupKind::Absolute16)
            };
            self.emitter.add_fixup(Fixup {
                section: SectionKind::Code,
                offset: at,
                symbol: patch.symbol,
                display: patch.display,
                addend: patch.addend,
                kind,
                span,
            });
        }

        log::trace!("{offset:04X}  {text}");
        self.emitter.record_trace(offset, &bytes, text);
        if tracked {
            flow::apply_effect(&mut self.flow, mnemonic, operands);
        }
        true
    }

    pub fn emit_jump(&mut self, condition: Option<Condition>, target: &str, span: Span) -> bool {
        let mut operands = Vec::with_capacity(2);
        if let Some(condition) = condition {
            operands.push(IsaOperand::Cond(condition));
        }
        operands.push(IsaOperand::Imm(0));
        let patch = Patch {
            operand: operands.len() - 1,
            symbol: Some(target.to_string()),
            display: target.to_string(),
            addend: 0,
            relative: false,
        };
        self.emit_patched("jp", &operands, Some(patch), span)
    }

    pub fn check_return(&mut self, span: Span, what: &str) {
        let state = self.flow;
        if !state.reachable {
            return;
        }
        if state.tainted {
            self.diagnostics.push(
                Diagnostic::error(
                    DiagnosticId::Stack,
                    span,
                    format!("{what} after an untracked stack pointer change"),
                )
                .with_help("only 'ld sp, <constant>' keeps the stack depth verifiable"),
            );
            return;
        }
        if state.valid && state.delta != 0 {
            let bytes = state.delta.unsigned_abs();
            let detail = if state.delta < 0 {
                "still pushed"
            } else {
                "popped beyond the entry depth"
            };
            self.error(
                DiagnosticId::Stack,
                span,
                format!("stack imbalance at {what}: {bytes} bytes {detail}"),
            );
            return;
        }
        if !state.valid && self.uses_slots() {
            self.error(
                DiagnosticId::Stack,
                span,
                format!("unknown stack depth at {what} in a function with stack slots"),
            );
        }
    }

    pub fn check_call(&mut self, span: Span) {
        let state = self.flow;
        if !state.reachable {
            return;
        }
        if state.tainted {
            self.error(
                DiagnosticId::Stack,
                span,
                "call after an untracked stack pointer change",
            );
        } else if !state.valid && self.uses_slots() {
            self.error(
                DiagnosticId::Stack,
                span,
                "call with unknown stack depth in a function with stack slots",
            );
        }
    }

    pub fn report_join(&mut self, issue: Option<JoinIssue>, span: Span, what: &str) {
        match issue {
            None => {}
            Some(JoinIssue::Mismatch { left, right }) => self.error(
                DiagnosticId::Stack,
                span,
                format!("stack depth mismatch at {what}: {left} vs {right}"),
            ),
            Some(JoinIssue::Unknown) => self.error(
                DiagnosticId::Stack,
                span,
                format!("unknown stack state at {what}"),
            ),
        }
    }

    pub fn merge(&mut self, other: FlowState, span: Span, what: &str) {
        let (merged, issue) = flow::join(self.flow, other, self.uses_slots());
        self.flow = merged;
        self.report_join(issue, span, what);
    }
}

fn trace_text(mnemonic: &str, operands: &[IsaOperand], patch: Option<&Patch>) -> String {
    let Some(patch) = patch else {
        return format_instruction(mnemonic, operands);
    };
    let target = match patch.addend {
        _ if patch.symbol.is_none() => patch.display.clone(),
        0 => patch.display.clone(),
        addend if addend > 0 => format!("{}+{addend}", patch.display),
        addend => format!("{}{addend}", patch.display),
    };
    let rendered = operands
        .iter()
        .enumerate()
        .map(|(index, operand)| match operand {
            IsaOperand::Absolute(_) if index == patch.operand => format!("({target})"),
            _ if index == patch.operand => target.clone(),
            _ => operand.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{mnemonic} {rendered}")
}

pub(crate) fn lower_program(
    program: &Program,
    model: &SemanticModel,
    options: &CompileOptions,
    diagnostics: &mut Vec<Diagnostic>,
) -> Emitter {
    let mut ctx = LowerContext::new(model, options, diagnostics);
    for module in &program.modules {
        log::debug!("lowering module '{}'", module.name);
        for decl in &module.decls {
            lower_decl(&mut ctx, &decl.node, decl.span);
        }
    }
    ctx.emitter
}

fn lower_decl(ctx: &mut LowerContext, decl: &Decl, span: Span) {
    match decl {
        Decl::Import(_) | Decl::Type(_) | Decl::Op(_) => {}
        Decl::Const(const_decl) => define_constant(ctx, &const_decl.name, span),
        Decl::Enum(enum_decl) => {
            for member in &enum_decl.members {
                define_constant(ctx, &format!("{}.{}", enum_decl.name, member.name), span);
            }
        }
        Decl::Func(func) => lower_function(ctx, func, span),
        Decl::Extern(extern_decl) => {
            for func in &extern_decl.funcs {
                define_extern(ctx, &func.node.name, func.span);
            }
        }
        Decl::Data(data_decl) => data::lower_data(ctx, data_decl),
        Decl::Var(var_decl) => data::lower_var(ctx, var_decl),
        Decl::Bin(bin) => data::lower_bin(ctx, bin, span),
        Decl::Hex(hex) => data::lower_hex(ctx, hex, span),
        Decl::Section(section) => lower_section(ctx, section, span),
        Decl::Align(value) => lower_align(ctx, value, span),
    }
}

/// Records a global symbol. Name clashes were already reported by the
/// pre-scan, so a second definition is dropped quietly.
pub(crate) fn define_global(
    ctx: &mut LowerContext,
    name: &str,
    kind: SymbolKind,
    value: SymbolValue,
    size: Option<u32>,
    span: Span,
) {
    let def = SymbolDef {
        name: name.to_string(),
        kind,
        scope: SymbolScope::Global,
        value,
        size,
        span,
        hidden: false,
    };
    let _ = ctx.emitter.define(key(name), def);
}

fn define_constant(ctx: &mut LowerContext, name: &str, span: Span) {
    let model = ctx.model;
    let Some(meta) = model.consts.get(&key(name)) else {
        return;
    };
    let value = SymbolValue::Constant(meta.value);
    define_global(ctx, &meta.name, SymbolKind::Constant, value, None, span);
}

fn define_extern(ctx: &mut LowerContext, name: &str, span: Span) {
    let model = ctx.model;
    let Some(callable) = model.callables.get(&key(name)) else {
        return;
    };
    let CallTarget::Extern { base, at } = &callable.target else {
        return;
    };
    let value = match base {
        Some(base) => SymbolValue::Relative {
            base: base.clone(),
            addend: *at,
        },
        None => SymbolValue::Absolute(*at),
    };
    define_global(ctx, name, SymbolKind::Label, value, None, span);
}

fn lower_section(ctx: &mut LowerContext, section: &SectionDecl, span: Span) {
    ctx.emitter.set_active(section.kind);
    let Some(at) = &section.at else {
        return;
    };
    let base = match zax_eval::evaluate(at, ctx.model) {
        Ok(value) if (0..=0xFFFF).contains(&value) => BaseSetting::Fixed(value),
        Ok(value) => {
            ctx.error(
                DiagnosticId::Layout,
                span,
                format!("{} section base {value} outside $0000..=$FFFF", section.kind.name()),
            );
            BaseSetting::Failed
        }
        Err(error) => {
            ctx.error(
                DiagnosticId::Layout,
                span,
                format!("cannot evaluate {} section base: {error}", section.kind.name()),
            );
            BaseSetting::Failed
        }
    };
    if let Err(previous) = ctx.emitter.set_base(section.kind, base, span) {
        ctx.diagnostics.push(
            Diagnostic::error(
                DiagnosticId::Layout,
                span,
                format!("{} section base set twice", section.kind.name()),
            )
            .with_label(previous, "first set here"),
        );
    }
}

fn lower_align(ctx: &mut LowerContext, value: &ImmExpr, span: Span) {
    let alignment = match zax_eval::evaluate(value, ctx.model) {
        Ok(value) if (1..=0x1_0000).contains(&value) => value as u32,
        Ok(value) => {
            ctx.error(
                DiagnosticId::Layout,
                span,
                format!("alignment {value} must be in 1..=65536"),
            );
            return;
        }
        Err(error) => {
            ctx.error(
                DiagnosticId::Layout,
                span,
                format!("cannot evaluate alignment: {error}"),
            );
            return;
        }
    };
    let active = ctx.emitter.active();
    ctx.emitter.align(active, alignment);
}

fn scalar_fits(scalar: Scalar, value: i64) -> bool {
    match scalar {
        Scalar::Byte => (-128..=0xFF).contains(&value),
        Scalar::Word => (-0x8000..=0xFFFF).contains(&value),
    }
}

fn lower_function(ctx: &mut LowerContext, func: &FuncDecl, span: Span) {
    let func_key = key(&func.name);
    let model = ctx.model;
    let Some(callable) = model.callables.get(&func_key) else {
        return;
    };

    let offset = ctx.emitter.offset(SectionKind::Code);
    define_global(
        ctx,
        &func.name,
        SymbolKind::Label,
        SymbolValue::Section {
            section: SectionKind::Code,
            offset,
        },
        None,
        span,
    );

    let mut scope = FunctionScope {
        name: func.name.clone(),
        key: func_key,
        slots: IndexMap::new(),
        aliases: IndexMap::new(),
        labels: IndexMap::new(),
        epilogue: None,
    };
    for (index, param) in callable.params.iter().enumerate() {
        scope.slots.insert(
            key(&param.name),
            SlotInfo {
                disp: 4 + 2 * index as i64,
                ty: param.ty.clone(),
            },
        );
    }

    let mut inits = Vec::new();
    for local in &func.locals {
        let local_key = key(local.node.name());
        if scope.slots.contains_key(&local_key) || scope.aliases.contains_key(&local_key) {
            ctx.error(
                DiagnosticId::Semantic,
                local.span,
                format!(
                    "duplicate local '{}' in function '{}'",
                    local.node.name(),
                    func.name
                ),
            );
            continue;
        }
        match &local.node {
            LocalDecl::Slot { name, ty, init } => {
                let ty = match model.resolve_type(ty) {
                    Ok(ty) if ty.scalar().is_some() => ty,
                    Ok(ty) => {
                        ctx.error(
                            DiagnosticId::Semantic,
                            local.span,
                            format!("local '{name}' must be byte, word or addr, found '{ty}'"),
                        );
                        continue;
                    }
                    Err(message) => {
                        ctx.error(
                            DiagnosticId::Semantic,
                            local.span,
                            format!("local '{name}': {message}"),
                        );
                        continue;
                    }
                };
                let value = match init.as_ref().map(|init| zax_eval::evaluate(init, model)) {
                    None => 0,
                    Some(Ok(value)) => value,
                    Some(Err(error)) => {
                        ctx.error(
                            DiagnosticId::Semantic,
                            local.span,
                            format!("initializer of local '{name}': {error}"),
                        );
                        0
                    }
                };
                if let Some(scalar) = ty.scalar() {
                    if !scalar_fits(scalar, value) {
                        ctx.error(
                            DiagnosticId::Semantic,
                            local.span,
                            format!("initializer {value} out of range for {ty} local '{name}'"),
                        );
                    }
                }
                let disp = -2 * (inits.len() as i64 + 1);
                scope.slots.insert(local_key, SlotInfo { disp, ty });
                inits.push(value & 0xFFFF);
            }
            LocalDecl::Alias { ea, .. } => {
                scope.aliases.insert(local_key, ea.clone());
            }
        }
    }

    if !scope.slots.is_empty() {
        scope.epilogue = Some(ctx.hidden_label("epilogue"));
    }
    collect_labels(ctx, &mut scope, &func.body);

    log::debug!(
        "lowering function '{}': {} slots, {} labels",
        func.name,
        scope.slots.len(),
        scope.labels.len()
    );

    let epilogue = scope.epilogue.clone();
    ctx.func = Some(scope);
    ctx.flow = FlowState::entry();

    if epilogue.is_some() {
        ctx.emit_untracked("push", &[IsaOperand::Reg16(Reg16::Ix)], span);
        ctx.emit_untracked("ld", &[IsaOperand::Reg16(Reg16::Ix), IsaOperand::Imm(0)], span);
        ctx.emit_untracked(
            "add",
            &[IsaOperand::Reg16(Reg16::Ix), IsaOperand::Reg16(Reg16::Sp)],
            span,
        );
        for value in inits {
            ctx.emit_untracked(
                "ld",
                &[IsaOperand::Reg16(Reg16::Hl), IsaOperand::Imm(value)],
                span,
            );
            ctx.emit_untracked("push", &[IsaOperand::Reg16(Reg16::Hl)], span);
        }
    }

    control::lower_body(ctx, &func.body);

    let end_span = func.body.last().map(|item| item.span).unwrap_or(span);
    if ctx.flow.reachable {
        ctx.check_return(end_span, "end of function");
        if epilogue.is_none() {
            ctx.emit("ret", &[], end_span);
        }
    }
    if let Some(epilogue) = epilogue {
        ctx.define_hidden(&epilogue, end_span);
        ctx.emit_untracked(
            "ld",
            &[IsaOperand::Reg16(Reg16::Sp), IsaOperand::Reg16(Reg16::Ix)],
            end_span,
        );
        ctx.emit_untracked("pop", &[IsaOperand::Reg16(Reg16::Ix)], end_span);
        ctx.emit_untracked("ret", &[], end_span);
    }

    ctx.flow = FlowState::unreachable();
    ctx.func = None;
}

fn collect_labels(ctx: &mut LowerContext, scope: &mut FunctionScope, body: &[Spanned<Item>]) {
    let mut first_seen: IndexMap<String, Span> = IndexMap::new();
    for item in body {
        let Item::Label(name) = &item.node else {
            continue;
        };
        let label_key = key(name);
        if let Some(previous) = first_seen.get(&label_key) {
            ctx.diagnostics.push(
                Diagnostic::error(
                    DiagnosticId::Semantic,
                    item.span,
                    format!("duplicate label '{name}' in function '{}'", scope.name),
                )
                .with_label(*previous, "first defined here"),
            );
            continue;
        }
        first_seen.insert(label_key.clone(), item.span);
        scope.labels.insert(
            label_key.clone(),
            LabelInfo {
                symbol: format!("{}::{label_key}", scope.key),
                display: name.clone(),
                hidden: false,
            },
        );
    }
}

pub(crate) fn lower_label(ctx: &mut LowerContext, name: &str, span: Span) {
    let info = ctx
        .func
        .as_ref()
        .and_then(|scope| scope.labels.get(&key(name)))
        .cloned();
    let Some(info) = info else {
        ctx.error(
            DiagnosticId::Semantic,
            span,
            format!("label '{name}' is not declared in this function"),
        );
        return;
    };
    let offset = ctx.emitter.offset(SectionKind::Code);
    let def = SymbolDef {
        name: info.display,
        kind: SymbolKind::Label,
        scope: SymbolScope::Local,
        value: SymbolValue::Section {
            section: SectionKind::Code,
            offset,
        },
        size: None,
        span,
        hidden: info.hidden,
    };
    // A second definition was already reported when the labels were collected.
    let _ = ctx.emitter.define(info.symbol, def);

    if !ctx.flow.reachable {
        ctx.flow = FlowState::unknown();
    }
}

/// The instruction pipeline: typed calls, then op expansion, then the
/// address-aware forms, then the plain encoder.
pub(crate) fn lower_instruction(ctx: &mut LowerContext, instruction: &Instruction, span: Span) {
    let name = key(&instruction.mnemonic);
    let model = ctx.model;

    if !is_mnemonic(&name) {
        if let Some(callable) = model.callables.get(&name) {
            calls::lower_call(ctx, callable, &instruction.operands, span);
            return;
        }
    }
    if model.ops.contains_key(&name) && ops::expand(ctx, &name, &instruction.operands, span) {
        return;
    }
    if !is_mnemonic(&name) {
        ctx.error(
            DiagnosticId::Encode,
            span,
            format!("unknown instruction '{}'", instruction.mnemonic),
        );
        return;
    }

    let Some(operands) = operands::lower_operands(ctx, &name, &instruction.operands, span) else {
        return;
    };
    match name.as_str() {
        "ret" => lower_ret(ctx, &operands, span),
        "call" => {
            ctx.check_call(span);
            memory::lower_generic(ctx, &name, &operands, span);
        }
        "ld" => memory::lower_ld(ctx, &operands, span),
        _ => memory::lower_generic(ctx, &name, &operands, span),
    }
}

fn lower_ret(ctx: &mut LowerContext, operands: &[LOperand], span: Span) {
    let condition = match operands {
        [] => None,
        [LOperand::Cond(condition)] => Some(*condition),
        _ => {
            ctx.error(
                DiagnosticId::Encode,
                span,
                "unsupported operand form for 'ret'",
            );
            return;
        }
    };
    ctx.check_return(span, "return");

    let epilogue = ctx.func.as_ref().and_then(|scope| scope.epilogue.clone());
    match (epilogue, condition) {
        (Some(epilogue), condition) => {
            ctx.emit_jump(condition, &epilogue, span);
        }
        (None, Some(condition)) => {
            ctx.emit("ret", &[IsaOperand::Cond(condition)], span);
        }
        (None, None) => {
            ctx.emit("ret", &[], span);
        }
    }
}

pub(crate) fn r8(reg: Reg8) -> IsaOperand {
    IsaOperand::Reg8(reg)
}

pub(crate) fn r16(reg: Reg16) -> IsaOperand {
    IsaOperand::Reg16(reg)
}

pub(crate) fn ix(disp: i64) -> IsaOperand {
    IsaOperand::Indexed {
        base: IndexReg::Ix,
        disp,
    }
}
