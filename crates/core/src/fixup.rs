use rustc_hash::FxHashMap;

use crate::ast::SectionKind;
use crate::diag::{Diagnostic, DiagnosticId};
use crate::span::Span;
use crate::symbols::{SymbolDef, SymbolValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FixupKind {
    /// Two little-endian bytes holding `symbol + addend`.
    Absolute16,
    /// One signed byte holding `symbol + addend - origin`, where `origin`
    /// is the section offset just past the branch instruction.
    Relative8 { origin: u32, mnemonic: String },
}

#[derive(Debug, Clone)]
pub(crate) struct Fixup {
    pub section: SectionKind,
    pub offset: u32,
    /// `None` for a literal target (a relative branch to a fixed address).
    pub symbol: Option<String>,
    pub display: String,
    pub addend: i64,
    pub kind: FixupKind,
    pub span: Span,
}

impl Fixup {
    pub fn width(&self) -> u32 {
        match self.kind {
            FixupKind::Absolute16 => 2,
            FixupKind::Relative8 { .. } => 1,
        }
    }
}

/// A section's bytes placed at their final base.
#[derive(Debug)]
pub(crate) struct SectionImage {
    pub kind: SectionKind,
    pub base: i64,
    pub bytes: Vec<u8>,
}

/// Computes the final value of every symbol. Section symbols are rebased;
/// extern entries declared relative to another symbol are resolved by
/// repeated passes until nothing changes.
pub(crate) fn resolve_symbols<'a>(
    symbols: impl Iterator<Item = (&'a String, &'a SymbolDef)> + Clone,
    base_of: impl Fn(SectionKind) -> i64,
    diagnostics: &mut Vec<Diagnostic>,
) -> FxHashMap<String, i64> {
    let mut addresses = FxHashMap::default();
    for (key, def) in symbols.clone() {
        let value = match &def.value {
            SymbolValue::Constant(value) | SymbolValue::Absolute(value) => *value,
            SymbolValue::Section { section, offset } => base_of(*section) + i64::from(*offset),
            SymbolValue::Relative { .. } => continue,
        };
        addresses.insert(key.clone(), value);
    }

    loop {
        let mut progressed = false;
        for (key, def) in symbols.clone() {
            let SymbolValue::Relative { base, addend } = &def.value else {
                continue;
            };
            if addresses.contains_key(key) {
                continue;
            }
            if let Some(base_value) = addresses.get(base).copied() {
                addresses.insert(key.clone(), base_value + addend);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    for (key, def) in symbols {
        if let SymbolValue::Relative { base, .. } = &def.value {
            if !addresses.contains_key(key) {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticId::Fixup,
                        def.span,
                        format!("unresolved symbol '{base}'"),
                    )
                    .with_note(format!("'{}' is declared relative to '{base}'", def.name)),
                );
            }
        }
    }

    addresses
}

/// Patches every fixup into its section image. Each fixup is consumed
/// exactly once; failures are reported and leave the placeholder bytes.
pub(crate) fn apply_fixups(
    fixups: &[Fixup],
    images: &mut [SectionImage],
    addresses: &FxHashMap<String, i64>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for fixup in fixups {
        let target = match &fixup.symbol {
            Some(symbol) => addresses.get(symbol).copied(),
            None => Some(0),
        };
        let Some(target) = target else {
            diagnostics.push(
                Diagnostic::error(
                    DiagnosticId::Fixup,
                    fixup.span,
                    format!("unresolved symbol '{}'", fixup.display),
                )
                .with_label(fixup.span, "referenced here"),
            );
            continue;
        };
        let Some(image) = images.iter_mut().find(|image| image.kind == fixup.section) else {
            continue;
        };
        let start = fixup.offset as usize;
        let end = start + fixup.width() as usize;
        let Some(slot) = image.bytes.get_mut(start..end) else {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Fixup,
                fixup.span,
                format!("fixup for '{}' writes outside its section", fixup.display),
            ));
            continue;
        };

        let value = target + fixup.addend;
        match &fixup.kind {
            FixupKind::Absolute16 => {
                if !(-0x8000..=0xFFFF).contains(&value) {
                    diagnostics.push(Diagnostic::error(
                        DiagnosticId::Fixup,
                        fixup.span,
                        format!(
                            "address {value} of '{}' does not fit in 16 bits",
                            fixup.display
                        ),
                    ));
                    continue;
                }
                slot.copy_from_slice(&((value & 0xFFFF) as u16).to_le_bytes());
            }
            FixupKind::Relative8 { origin, mnemonic } => {
                let displacement = value - (image.base + i64::from(*origin));
                if !(-128..=127).contains(&displacement) {
                    diagnostics.push(
                        Diagnostic::error(
                            DiagnosticId::Fixup,
                            fixup.span,
                            format!(
                                "'{mnemonic}' target '{}' out of range: \
                                 displacement {displacement} not in -128..=127",
                                fixup.display
                            ),
                        )
                        .with_help("use 'jp' for targets further than 127 bytes away"),
                    );
                    continue;
                }
                slot[0] = displacement as i8 as u8;
            }
        }
    }
}
