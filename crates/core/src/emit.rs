use indexmap::IndexMap;
use serde::Serialize;

use crate::ast::SectionKind;
use crate::config::CompileOptions;
use crate::fixup::Fixup;
use crate::span::Span;
use crate::symbols::SymbolDef;

/// How a section's base address was (or was not) established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BaseSetting {
    Unset,
    Fixed(i64),
    /// An explicit base was requested but could not be evaluated.
    Failed,
}

#[derive(Debug)]
pub(crate) struct SectionState {
    pub bytes: Vec<u8>,
    pub size: u32,
    pub base: BaseSetting,
    pub base_span: Option<Span>,
}

impl SectionState {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            size: 0,
            base: BaseSetting::Unset,
            base_span: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Code,
    Macro,
    Data,
}

#[derive(Debug, Clone)]
pub(crate) struct RawSegment {
    pub section: SectionKind,
    pub start: u32,
    pub end: u32,
    pub span: Span,
    pub kind: SegmentKind,
}

#[derive(Debug, Clone)]
pub(crate) struct RawTrace {
    pub offset: u32,
    pub bytes: Vec<u8>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub(crate) struct HexBlob {
    pub name: String,
    pub address: u32,
    pub bytes: Vec<u8>,
    pub span: Span,
}

/// Byte sink for one compilation: three zero-based section buffers, the
/// symbol definitions, the pending fixups and the provenance records.
#[derive(Debug)]
pub(crate) struct Emitter {
    sections: [SectionState; 3],
    active: SectionKind,
    pub symbols: IndexMap<String, SymbolDef>,
    pub fixups: Vec<Fixup>,
    pub hex: Vec<HexBlob>,
    pub segments: Vec<RawSegment>,
    pub trace: Vec<RawTrace>,
    collect_trace: bool,
    collect_segments: bool,
}

fn section_index(kind: SectionKind) -> usize {
    match kind {
        SectionKind::Code => 0,
        SectionKind::Data => 1,
        SectionKind::Var => 2,
    }
}

impl Emitter {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            sections: [SectionState::new(), SectionState::new(), SectionState::new()],
            active: SectionKind::Code,
            symbols: IndexMap::new(),
            fixups: Vec::new(),
            hex: Vec::new(),
            segments: Vec::new(),
            trace: Vec::new(),
            collect_trace: options.collect_trace,
            collect_segments: options.collect_segments,
        }
    }

    pub fn active(&self) -> SectionKind {
        self.active
    }

    pub fn set_active(&mut self, kind: SectionKind) {
        self.active = kind;
    }

    pub fn section(&self, kind: SectionKind) -> &SectionState {
        &self.sections[section_index(kind)]
    }

    fn section_mut(&mut self, kind: SectionKind) -> &mut SectionState {
        &mut self.sections[section_index(kind)]
    }

    pub fn offset(&self, kind: SectionKind) -> u32 {
        self.section(kind).size
    }

    /// Appends bytes to a code or data section and returns their offset.
    pub fn write(
        &mut self,
        kind: SectionKind,
        bytes: &[u8],
        span: Span,
        origin: SegmentKind,
    ) -> u32 {
        let section = self.section_mut(kind);
        let start = section.size;
        section.bytes.extend_from_slice(bytes);
        section.size += bytes.len() as u32;
        let end = section.size;
        if self.collect_segments && !bytes.is_empty() {
            self.record_segment(kind, start, end, span, origin);
        }
        start
    }

    fn record_segment(
        &mut self,
        section: SectionKind,
        start: u32,
        end: u32,
        span: Span,
        kind: SegmentKind,
    ) {
        if let Some(last) = self.segments.last_mut() {
            if last.section == section
                && last.end == start
                && last.span == span
                && last.kind == kind
            {
                last.end = end;
                return;
            }
        }
        self.segments.push(RawSegment {
            section,
            start,
            end,
            span,
            kind,
        });
    }

    pub fn record_trace(&mut self, offset: u32, bytes: &[u8], text: String) {
        if self.collect_trace {
            self.trace.push(RawTrace {
                offset,
                bytes: bytes.to_vec(),
                text,
            });
        }
    }

    /// Advances a section without meaningful bytes. Code and data are
    /// zero-filled; var only moves its counter.
    pub fn reserve(&mut self, kind: SectionKind, size: u32) {
        let section = self.section_mut(kind);
        if kind != SectionKind::Var {
            section.bytes.resize(section.bytes.len() + size as usize, 0);
        }
        section.size += size;
    }

    pub fn align(&mut self, kind: SectionKind, alignment: u32) {
        let size = self.offset(kind);
        let padding = (alignment - size % alignment) % alignment;
        self.reserve(kind, padding);
    }

    /// Records an explicit base. A section base may be set only once; the
    /// earlier span is returned on a second attempt.
    pub fn set_base(
        &mut self,
        kind: SectionKind,
        base: BaseSetting,
        span: Span,
    ) -> Result<(), Span> {
        let section = self.section_mut(kind);
        if let Some(previous) = section.base_span {
            return Err(previous);
        }
        section.base = base;
        section.base_span = Some(span);
        Ok(())
    }

    pub fn define(&mut self, key: String, def: SymbolDef) -> Result<(), Span> {
        if let Some(existing) = self.symbols.get(&key) {
            return Err(existing.span);
        }
        self.symbols.insert(key, def);
        Ok(())
    }

    pub fn add_fixup(&mut self, fixup: Fixup) {
        self.fixups.push(fixup);
    }
}
