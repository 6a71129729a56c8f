mod encode;

use std::fmt;

use thiserror::Error;

pub use encode::encode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    Ixh,
    Ixl,
    Iyh,
    Iyl,
    I,
    R,
}

impl Reg8 {
    pub fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
            Self::D => "d",
            Self::E => "e",
            Self::H => "h",
            Self::L => "l",
            Self::Ixh => "ixh",
            Self::Ixl => "ixl",
            Self::Iyh => "iyh",
            Self::Iyl => "iyl",
            Self::I => "i",
            Self::R => "r",
        }
    }

    /// True for the seven registers addressable by the plain `r` field.
    pub fn is_general(self) -> bool {
        matches!(
            self,
            Self::A | Self::B | Self::C | Self::D | Self::E | Self::H | Self::L
        )
    }

    pub fn is_index_half(self) -> bool {
        matches!(self, Self::Ixh | Self::Ixl | Self::Iyh | Self::Iyl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg16 {
    Bc,
    De,
    Hl,
    Sp,
    Ix,
    Iy,
    Af,
    AfShadow,
}

impl Reg16 {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bc => "bc",
            Self::De => "de",
            Self::Hl => "hl",
            Self::Sp => "sp",
            Self::Ix => "ix",
            Self::Iy => "iy",
            Self::Af => "af",
            Self::AfShadow => "af'",
        }
    }

    pub fn is_index(self) -> bool {
        matches!(self, Self::Ix | Self::Iy)
    }

    /// The two 8-bit halves as (high, low), when the pair has them.
    pub fn halves(self) -> Option<(Reg8, Reg8)> {
        match self {
            Self::Bc => Some((Reg8::B, Reg8::C)),
            Self::De => Some((Reg8::D, Reg8::E)),
            Self::Hl => Some((Reg8::H, Reg8::L)),
            Self::Ix => Some((Reg8::Ixh, Reg8::Ixl)),
            Self::Iy => Some((Reg8::Iyh, Reg8::Iyl)),
            Self::Sp | Self::Af | Self::AfShadow => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexReg {
    Ix,
    Iy,
}

impl IndexReg {
    pub fn prefix(self) -> u8 {
        match self {
            Self::Ix => 0xDD,
            Self::Iy => 0xFD,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ix => "ix",
            Self::Iy => "iy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    R8(Reg8),
    R16(Reg16),
}

impl Register {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let register = match lower.as_str() {
            "a" => Self::R8(Reg8::A),
            "b" => Self::R8(Reg8::B),
            "c" => Self::R8(Reg8::C),
            "d" => Self::R8(Reg8::D),
            "e" => Self::R8(Reg8::E),
            "h" => Self::R8(Reg8::H),
            "l" => Self::R8(Reg8::L),
            "ixh" => Self::R8(Reg8::Ixh),
            "ixl" => Self::R8(Reg8::Ixl),
            "iyh" => Self::R8(Reg8::Iyh),
            "iyl" => Self::R8(Reg8::Iyl),
            "i" => Self::R8(Reg8::I),
            "r" => Self::R8(Reg8::R),
            "bc" => Self::R16(Reg16::Bc),
            "de" => Self::R16(Reg16::De),
            "hl" => Self::R16(Reg16::Hl),
            "sp" => Self::R16(Reg16::Sp),
            "ix" => Self::R16(Reg16::Ix),
            "iy" => Self::R16(Reg16::Iy),
            "af" => Self::R16(Reg16::Af),
            "af'" => Self::R16(Reg16::AfShadow),
            _ => return None,
        };
        Some(register)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::R8(reg) => reg.name(),
            Self::R16(reg) => reg.name(),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Nz,
    Z,
    Nc,
    C,
    Po,
    Pe,
    P,
    M,
}

impl Condition {
    pub fn from_name(name: &str) -> Option<Self> {
        let condition = match name.to_ascii_lowercase().as_str() {
            "nz" => Self::Nz,
            "z" => Self::Z,
            "nc" => Self::Nc,
            "c" => Self::C,
            "po" => Self::Po,
            "pe" => Self::Pe,
            "p" => Self::P,
            "m" => Self::M,
            _ => return None,
        };
        Some(condition)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nz => "nz",
            Self::Z => "z",
            Self::Nc => "nc",
            Self::C => "c",
            Self::Po => "po",
            Self::Pe => "pe",
            Self::P => "p",
            Self::M => "m",
        }
    }

    pub fn inverse(self) -> Self {
        match self {
            Self::Nz => Self::Z,
            Self::Z => Self::Nz,
            Self::Nc => Self::C,
            Self::C => Self::Nc,
            Self::Po => Self::Pe,
            Self::Pe => Self::Po,
            Self::P => Self::M,
            Self::M => Self::P,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Nz => 0,
            Self::Z => 1,
            Self::Nc => 2,
            Self::C => 3,
            Self::Po => 4,
            Self::Pe => 5,
            Self::P => 6,
            Self::M => 7,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully evaluated operand. Relative-branch targets (`jr`, `djnz`) are
/// passed as `Imm` holding the signed displacement, not the target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg8(Reg8),
    Reg16(Reg16),
    Cond(Condition),
    Imm(i64),
    Indirect(Reg16),
    Indexed { base: IndexReg, disp: i64 },
    Absolute(i64),
    PortC,
    PortImm(i64),
}

impl Operand {
    /// Operand shape used in "unsupported form" diagnostics.
    pub fn shape(&self) -> String {
        match self {
            Self::Reg8(reg) => reg.name().to_string(),
            Self::Reg16(reg) => reg.name().to_string(),
            Self::Cond(_) => "cc".to_string(),
            Self::Imm(_) => "imm".to_string(),
            Self::Indirect(reg) => format!("({})", reg.name()),
            Self::Indexed { base, .. } => format!("({}+d)", base.name()),
            Self::Absolute(_) => "(nn)".to_string(),
            Self::PortC => "(c)".to_string(),
            Self::PortImm(_) => "(n)".to_string(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg8(reg) => f.write_str(reg.name()),
            Self::Reg16(reg) => f.write_str(reg.name()),
            Self::Cond(cond) => f.write_str(cond.name()),
            Self::Imm(value) => write!(f, "{}", HexValue(*value)),
            Self::Indirect(reg) => write!(f, "({})", reg.name()),
            Self::Indexed { base, disp } if *disp < 0 => {
                write!(f, "({}-{})", base.name(), disp.unsigned_abs())
            }
            Self::Indexed { base, disp } => write!(f, "({}+{disp})", base.name()),
            Self::Absolute(addr) => write!(f, "({})", HexValue(*addr)),
            Self::PortC => f.write_str("(c)"),
            Self::PortImm(port) => write!(f, "({})", HexValue(*port)),
        }
    }
}

struct HexValue(i64);

impl fmt::Display for HexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            value if value < 0 => write!(f, "{value}"),
            value if value <= 0xFF => write!(f, "${value:02X}"),
            value => write!(f, "${value:04X}"),
        }
    }
}

/// Renders `mnemonic op1, op2` the way trace and listing consumers expect.
pub fn format_instruction(mnemonic: &str, operands: &[Operand]) -> String {
    if operands.is_empty() {
        return mnemonic.to_ascii_lowercase();
    }
    let rendered = operands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} {rendered}", mnemonic.to_ascii_lowercase())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unknown mnemonic '{mnemonic}'")]
    UnknownMnemonic { mnemonic: String },
    #[error("unsupported operand form for '{mnemonic}': {shape}")]
    UnsupportedForm { mnemonic: String, shape: String },
    #[error("{what} {value} out of range {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("rst vector {value} is not a multiple of 8 in $00..=$38")]
    InvalidRestart { value: i64 },
}

impl EncodeError {
    pub(crate) fn unsupported(mnemonic: &str, operands: &[Operand]) -> Self {
        let shape = if operands.is_empty() {
            "<no operands>".to_string()
        } else {
            operands
                .iter()
                .map(Operand::shape)
                .collect::<Vec<_>>()
                .join(", ")
        };
        Self::UnsupportedForm {
            mnemonic: mnemonic.to_ascii_lowercase(),
            shape,
        }
    }
}

const MNEMONICS: &[&str] = &[
    "adc", "add", "and", "bit", "call", "ccf", "cp", "cpd", "cpdr", "cpi", "cpir", "cpl", "daa",
    "dec", "di", "djnz", "ei", "ex", "exx", "halt", "im", "in", "inc", "ind", "indr", "ini",
    "inir", "jp", "jr", "ld", "ldd", "lddr", "ldi", "ldir", "neg", "nop", "or", "otdr", "otir",
    "out", "outd", "outi", "pop", "push", "res", "ret", "reti", "retn", "rl", "rla", "rlc",
    "rlca", "rld", "rr", "rra", "rrc", "rrca", "rrd", "rst", "sbc", "scf", "set", "sla", "sll",
    "sra", "srl", "sub", "xor",
];

pub fn is_mnemonic(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    MNEMONICS.binary_search(&lower.as_str()).is_ok()
}

/// Mnemonics whose final operand is a signed 8-bit branch displacement.
pub fn is_relative_branch(mnemonic: &str) -> bool {
    matches!(mnemonic.to_ascii_lowercase().as_str(), "jr" | "djnz")
}

/// Mnemonics whose leading operand is a condition code when more than the
/// target is given (`ret` takes the condition alone).
pub fn takes_condition(mnemonic: &str, operand_count: usize) -> bool {
    match mnemonic.to_ascii_lowercase().as_str() {
        "jp" | "jr" | "call" => operand_count == 2,
        "ret" => operand_count == 1,
        _ => false,
    }
}

#[cfg(test)]
mod tests;
