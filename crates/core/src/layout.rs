use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::SectionKind;
use crate::config::CompileOptions;
use crate::diag::{Diagnostic, DiagnosticId};
use crate::emit::{BaseSetting, Emitter, SegmentKind};
use crate::fixup::{SectionImage, apply_fixups, resolve_symbols};
use crate::span::{SourceMap, Span};
use crate::symbols::{SymbolEntry, SymbolTable};

const ADDRESS_SPACE: i64 = 0x1_0000;

/// Final machine image. Only code, data and hex bytes appear in `bytes`;
/// the var section is address accounting only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ByteMap {
    pub bytes: BTreeMap<u16, u8>,
    pub written: Option<WrittenRange>,
    pub sections: Vec<SectionRange>,
    pub segments: Vec<SourceSegment>,
    pub trace: Vec<TraceEntry>,
}

impl ByteMap {
    /// Bytes from the lowest to the highest written address, gaps zero-filled.
    pub fn contiguous(&self) -> Vec<u8> {
        let Some(range) = self.written else {
            return Vec::new();
        };
        (u32::from(range.start)..=u32::from(range.end))
            .map(|address| self.bytes.get(&(address as u16)).copied().unwrap_or(0))
            .collect()
    }
}

/// Inclusive bounds of the written addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WrittenRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionRange {
    pub section: &'static str,
    pub base: u16,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSegment {
    pub start: u16,
    /// Exclusive; may be 0x10000 for a segment ending at the top of memory.
    pub end: u32,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub kind: SegmentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub address: u16,
    pub bytes: Vec<u8>,
    pub text: String,
}

struct ResolvedBase {
    value: i64,
    resolved: bool,
}

fn round_even(value: i64) -> i64 {
    value + (value & 1)
}

fn resolve_base(
    emitter: &Emitter,
    kind: SectionKind,
    default: i64,
    predecessor: Option<(&ResolvedBase, SectionKind)>,
    anchor: Span,
    diagnostics: &mut Vec<Diagnostic>,
) -> ResolvedBase {
    let section = emitter.section(kind);
    match section.base {
        BaseSetting::Fixed(value) => ResolvedBase {
            value,
            resolved: true,
        },
        BaseSetting::Failed => ResolvedBase {
            value: 0,
            resolved: false,
        },
        BaseSetting::Unset => match predecessor {
            Some((previous, after)) if !previous.resolved => {
                if section.size > 0 {
                    diagnostics.push(
                        Diagnostic::error(
                            DiagnosticId::Layout,
                            anchor,
                            format!(
                                "{} section base defaults to 0 because the {} section base \
                                 is unresolved",
                                kind.name(),
                                after.name()
                            ),
                        )
                        .with_help(format!(
                            "set an explicit base with 'section {} at ..'",
                            kind.name()
                        )),
                    );
                }
                ResolvedBase {
                    value: 0,
                    resolved: false,
                }
            }
            _ => ResolvedBase {
                value: default,
                resolved: true,
            },
        },
    }
}

/// Places the three sections, resolves symbols and fixups, and assembles
/// the byte map and exported symbol table. Callers decide from the
/// accumulated diagnostics whether the artifact is usable.
pub(crate) fn finalize(
    emitter: Emitter,
    options: &CompileOptions,
    source_map: &SourceMap,
    anchor: Span,
    diagnostics: &mut Vec<Diagnostic>,
) -> (ByteMap, SymbolTable) {
    let code = resolve_base(
        &emitter,
        SectionKind::Code,
        i64::from(options.code_origin),
        None,
        anchor,
        diagnostics,
    );
    let code_end = code.value + i64::from(emitter.offset(SectionKind::Code));
    let data = resolve_base(
        &emitter,
        SectionKind::Data,
        round_even(code_end),
        Some((&code, SectionKind::Code)),
        anchor,
        diagnostics,
    );
    let data_end = data.value + i64::from(emitter.offset(SectionKind::Data));
    let var = resolve_base(
        &emitter,
        SectionKind::Var,
        round_even(data_end),
        Some((&data, SectionKind::Data)),
        anchor,
        diagnostics,
    );

    let bases = [
        (SectionKind::Code, code.value),
        (SectionKind::Data, data.value),
        (SectionKind::Var, var.value),
    ];
    log::debug!(
        "layout: code ${:04X}+{}, data ${:04X}+{}, var ${:04X}+{}",
        code.value,
        emitter.offset(SectionKind::Code),
        data.value,
        emitter.offset(SectionKind::Data),
        var.value,
        emitter.offset(SectionKind::Var),
    );

    check_ranges(&emitter, &bases, anchor, diagnostics);

    let base_of = |kind: SectionKind| {
        bases
            .iter()
            .find(|(section, _)| *section == kind)
            .map(|(_, base)| *base)
            .unwrap_or(0)
    };

    let addresses = resolve_symbols(emitter.symbols.iter(), base_of, diagnostics);
    let mut images = vec![
        SectionImage {
            kind: SectionKind::Code,
            base: code.value,
            bytes: emitter.section(SectionKind::Code).bytes.clone(),
        },
        SectionImage {
            kind: SectionKind::Data,
            base: data.value,
            bytes: emitter.section(SectionKind::Data).bytes.clone(),
        },
    ];
    log::debug!("resolving {} fixups", emitter.fixups.len());
    apply_fixups(&emitter.fixups, &mut images, &addresses, diagnostics);

    let mut byte_map = ByteMap::default();
    for image in &images {
        for (index, byte) in image.bytes.iter().enumerate() {
            let address = image.base + index as i64;
            if (0..ADDRESS_SPACE).contains(&address) {
                byte_map.bytes.insert(address as u16, *byte);
            }
        }
    }

    for blob in &emitter.hex {
        for (index, byte) in blob.bytes.iter().enumerate() {
            let address = i64::from(blob.address) + index as i64;
            if address >= ADDRESS_SPACE {
                diagnostics.push(Diagnostic::error(
                    DiagnosticId::Layout,
                    blob.span,
                    format!("hex '{}' writes beyond $FFFF at ${address:X}", blob.name),
                ));
                break;
            }
            let address = address as u16;
            if byte_map.bytes.contains_key(&address) {
                diagnostics.push(Diagnostic::error(
                    DiagnosticId::Layout,
                    blob.span,
                    format!(
                        "hex '{}' byte at ${address:04X} collides with an already written byte",
                        blob.name
                    ),
                ));
                continue;
            }
            byte_map.bytes.insert(address, *byte);
        }
    }

    byte_map.written = match (
        byte_map.bytes.keys().next(),
        byte_map.bytes.keys().next_back(),
    ) {
        (Some(start), Some(end)) => Some(WrittenRange {
            start: *start,
            end: *end,
        }),
        _ => None,
    };

    for (kind, base) in bases {
        let size = emitter.offset(kind);
        if size > 0 && (0..ADDRESS_SPACE).contains(&base) {
            byte_map.sections.push(SectionRange {
                section: kind.name(),
                base: base as u16,
                size,
            });
        }
    }

    for segment in &emitter.segments {
        let start = base_of(segment.section) + i64::from(segment.start);
        let end = (base_of(segment.section) + i64::from(segment.end)).min(ADDRESS_SPACE);
        if !(0..ADDRESS_SPACE).contains(&start) || end <= start {
            continue;
        }
        let Some(location) = source_map.location(segment.span) else {
            continue;
        };
        byte_map.segments.push(SourceSegment {
            start: start as u16,
            end: end as u32,
            file: location.file,
            line: location.line,
            column: location.column,
            kind: segment.kind,
        });
    }

    for entry in &emitter.trace {
        let address = code.value + i64::from(entry.offset);
        if (0..ADDRESS_SPACE).contains(&address) {
            byte_map.trace.push(TraceEntry {
                address: address as u16,
                bytes: patched(&images[0], entry.offset, entry.bytes.len()),
                text: entry.text.clone(),
            });
        }
    }

    let mut symbols = SymbolTable::default();
    for (key, def) in &emitter.symbols {
        if def.hidden {
            continue;
        }
        let Some(value) = addresses.get(key).copied() else {
            continue;
        };
        let location = source_map.location(def.span);
        symbols.entries.push(SymbolEntry {
            kind: def.kind,
            name: def.name.clone(),
            value,
            file: location.as_ref().map(|location| location.file.clone()),
            line: location.as_ref().map(|location| location.line),
            scope: def.scope,
            size: def.size,
        });
    }

    (byte_map, symbols)
}

/// Trace bytes re-read from the patched image so fixed-up operands show.
fn patched(image: &SectionImage, offset: u32, len: usize) -> Vec<u8> {
    let start = offset as usize;
    image
        .bytes
        .get(start..start + len)
        .map(<[u8]>::to_vec)
        .unwrap_or_default()
}

fn check_ranges(
    emitter: &Emitter,
    bases: &[(SectionKind, i64); 3],
    anchor: Span,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let span_of = |kind: SectionKind| emitter.section(kind).base_span.unwrap_or(anchor);

    for (kind, base) in bases {
        let end = base + i64::from(emitter.offset(*kind));
        if *base < 0 || end > ADDRESS_SPACE {
            diagnostics.push(Diagnostic::error(
                DiagnosticId::Layout,
                span_of(*kind),
                format!(
                    "{} section ${base:04X}..${end:04X} exceeds the 64K address space",
                    kind.name()
                ),
            ));
        }
    }

    for (index, (left, left_base)) in bases.iter().enumerate() {
        for (right, right_base) in &bases[index + 1..] {
            let left_end = left_base + i64::from(emitter.offset(*left));
            let right_end = right_base + i64::from(emitter.offset(*right));
            if left_end == *left_base || right_end == *right_base {
                continue;
            }
            if *left_base < right_end && *right_base < left_end {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticId::Layout,
                        span_of(*right),
                        format!(
                            "{} section ${left_base:04X}..${left_end:04X} overlaps \
                             {} section ${right_base:04X}..${right_end:04X}",
                            left.name(),
                            right.name()
                        ),
                    )
                    .with_help("move one of the sections with an explicit 'section .. at' base"),
                );
            }
        }
    }
}
