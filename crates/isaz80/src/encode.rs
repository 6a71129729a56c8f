use crate::{Condition, EncodeError, Operand, Reg8, Reg16};

type EncodeResult = Result<Vec<u8>, EncodeError>;

const FIXED_OPCODES: &[(&str, &[u8])] = &[
    ("nop", &[0x00]),
    ("halt", &[0x76]),
    ("di", &[0xF3]),
    ("ei", &[0xFB]),
    ("exx", &[0xD9]),
    ("daa", &[0x27]),
    ("cpl", &[0x2F]),
    ("scf", &[0x37]),
    ("ccf", &[0x3F]),
    ("rlca", &[0x07]),
    ("rrca", &[0x0F]),
    ("rla", &[0x17]),
    ("rra", &[0x1F]),
    ("neg", &[0xED, 0x44]),
    ("retn", &[0xED, 0x45]),
    ("reti", &[0xED, 0x4D]),
    ("rrd", &[0xED, 0x67]),
    ("rld", &[0xED, 0x6F]),
    ("ldi", &[0xED, 0xA0]),
    ("cpi", &[0xED, 0xA1]),
    ("ini", &[0xED, 0xA2]),
    ("outi", &[0xED, 0xA3]),
    ("ldd", &[0xED, 0xA8]),
    ("cpd", &[0xED, 0xA9]),
    ("ind", &[0xED, 0xAA]),
    ("outd", &[0xED, 0xAB]),
    ("ldir", &[0xED, 0xB0]),
    ("cpir", &[0xED, 0xB1]),
    ("inir", &[0xED, 0xB2]),
    ("otir", &[0xED, 0xB3]),
    ("lddr", &[0xED, 0xB8]),
    ("cpdr", &[0xED, 0xB9]),
    ("indr", &[0xED, 0xBA]),
    ("otdr", &[0xED, 0xBB]),
];

/// Encodes one instruction. Every operand must already be evaluated; symbolic
/// operands are encoded with a placeholder value and patched later by the
/// caller.
pub fn encode(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    let lower = mnemonic.to_ascii_lowercase();
    if let Some((_, bytes)) = FIXED_OPCODES.iter().find(|(name, _)| *name == lower) {
        if !operands.is_empty() {
            return Err(EncodeError::unsupported(&lower, operands));
        }
        return Ok(bytes.to_vec());
    }

    match lower.as_str() {
        "ld" => encode_ld(&lower, operands),
        "add" | "adc" | "sub" | "sbc" | "and" | "xor" | "or" | "cp" => {
            encode_alu(&lower, operands)
        }
        "inc" | "dec" => encode_inc_dec(&lower, operands),
        "rlc" | "rrc" | "rl" | "rr" | "sla" | "sra" | "sll" | "srl" => {
            encode_shift(&lower, operands)
        }
        "bit" | "res" | "set" => encode_bit(&lower, operands),
        "jp" => encode_jp(&lower, operands),
        "jr" => encode_jr(&lower, operands),
        "djnz" => match operands {
            [Operand::Imm(disp)] => Ok(vec![0x10, rel8(*disp)?]),
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        "call" => match operands {
            [Operand::Imm(target)] => Ok(with_word(&[0xCD], *target)?),
            [cond, Operand::Imm(target)] => {
                let Some(cond) = condition_of(cond) else {
                    return Err(EncodeError::unsupported(&lower, operands));
                };
                Ok(with_word(&[0xC4 | (cond.code() << 3)], *target)?)
            }
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        "ret" => match operands {
            [] => Ok(vec![0xC9]),
            [cond] => {
                let Some(cond) = condition_of(cond) else {
                    return Err(EncodeError::unsupported(&lower, operands));
                };
                Ok(vec![0xC0 | (cond.code() << 3)])
            }
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        "rst" => match operands {
            [Operand::Imm(vector)] => {
                if (0..=0x38).contains(vector) && vector % 8 == 0 {
                    Ok(vec![0xC7 | *vector as u8])
                } else {
                    Err(EncodeError::InvalidRestart { value: *vector })
                }
            }
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        "im" => match operands {
            [Operand::Imm(0)] => Ok(vec![0xED, 0x46]),
            [Operand::Imm(1)] => Ok(vec![0xED, 0x56]),
            [Operand::Imm(2)] => Ok(vec![0xED, 0x5E]),
            [Operand::Imm(mode)] => Err(EncodeError::OutOfRange {
                what: "interrupt mode",
                value: *mode,
                min: 0,
                max: 2,
            }),
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        "push" | "pop" => encode_stack(&lower, operands),
        "ex" => match operands {
            [Operand::Reg16(Reg16::De), Operand::Reg16(Reg16::Hl)] => Ok(vec![0xEB]),
            [Operand::Reg16(Reg16::Af), Operand::Reg16(Reg16::AfShadow)] => Ok(vec![0x08]),
            [Operand::Indirect(Reg16::Sp), Operand::Reg16(Reg16::Hl)] => Ok(vec![0xE3]),
            [Operand::Indirect(Reg16::Sp), Operand::Reg16(Reg16::Ix)] => Ok(vec![0xDD, 0xE3]),
            [Operand::Indirect(Reg16::Sp), Operand::Reg16(Reg16::Iy)] => Ok(vec![0xFD, 0xE3]),
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        "in" => match operands {
            [Operand::Reg8(Reg8::A), Operand::PortImm(port)] => Ok(vec![0xDB, port8(*port)?]),
            [Operand::Reg8(reg), Operand::PortC] if reg.is_general() => {
                Ok(vec![0xED, 0x40 | (general_code(*reg) << 3)])
            }
            [Operand::PortC] => Ok(vec![0xED, 0x70]),
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        "out" => match operands {
            [Operand::PortImm(port), Operand::Reg8(Reg8::A)] => Ok(vec![0xD3, port8(*port)?]),
            [Operand::PortC, Operand::Reg8(reg)] if reg.is_general() => {
                Ok(vec![0xED, 0x41 | (general_code(*reg) << 3)])
            }
            [Operand::PortC, Operand::Imm(0)] => Ok(vec![0xED, 0x71]),
            _ => Err(EncodeError::unsupported(&lower, operands)),
        },
        _ => Err(EncodeError::UnknownMnemonic {
            mnemonic: mnemonic.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum Loc8 {
    Reg { prefix: Option<u8>, code: u8 },
    MemHl,
    Indexed { prefix: u8, disp: u8 },
}

fn loc8(operand: &Operand) -> Result<Option<Loc8>, EncodeError> {
    match *operand {
        Operand::Reg8(reg) => Ok(reg8_code(reg).map(|(prefix, code)| Loc8::Reg { prefix, code })),
        Operand::Indirect(Reg16::Hl) => Ok(Some(Loc8::MemHl)),
        Operand::Indexed { base, disp } => Ok(Some(Loc8::Indexed {
            prefix: base.prefix(),
            disp: displacement(disp)?,
        })),
        _ => Ok(None),
    }
}

fn reg8_code(reg: Reg8) -> Option<(Option<u8>, u8)> {
    match reg {
        Reg8::B => Some((None, 0)),
        Reg8::C => Some((None, 1)),
        Reg8::D => Some((None, 2)),
        Reg8::E => Some((None, 3)),
        Reg8::H => Some((None, 4)),
        Reg8::L => Some((None, 5)),
        Reg8::A => Some((None, 7)),
        Reg8::Ixh => Some((Some(0xDD), 4)),
        Reg8::Ixl => Some((Some(0xDD), 5)),
        Reg8::Iyh => Some((Some(0xFD), 4)),
        Reg8::Iyl => Some((Some(0xFD), 5)),
        Reg8::I | Reg8::R => None,
    }
}

fn general_code(reg: Reg8) -> u8 {
    match reg8_code(reg) {
        Some((None, code)) => code,
        _ => 6,
    }
}

fn pair_code(reg: Reg16) -> Option<u8> {
    match reg {
        Reg16::Bc => Some(0),
        Reg16::De => Some(1),
        Reg16::Hl => Some(2),
        Reg16::Sp => Some(3),
        _ => None,
    }
}

fn index_prefix(reg: Reg16) -> Option<u8> {
    match reg {
        Reg16::Ix => Some(0xDD),
        Reg16::Iy => Some(0xFD),
        _ => None,
    }
}

fn condition_of(operand: &Operand) -> Option<Condition> {
    match operand {
        Operand::Cond(cond) => Some(*cond),
        Operand::Reg8(Reg8::C) => Some(Condition::C),
        _ => None,
    }
}

fn displacement(value: i64) -> Result<u8, EncodeError> {
    if !(-128..=127).contains(&value) {
        return Err(EncodeError::OutOfRange {
            what: "index displacement",
            value,
            min: -128,
            max: 127,
        });
    }
    Ok(value as i8 as u8)
}

fn rel8(value: i64) -> Result<u8, EncodeError> {
    if !(-128..=127).contains(&value) {
        return Err(EncodeError::OutOfRange {
            what: "branch displacement",
            value,
            min: -128,
            max: 127,
        });
    }
    Ok(value as i8 as u8)
}

fn imm8(value: i64) -> Result<u8, EncodeError> {
    if !(-128..=255).contains(&value) {
        return Err(EncodeError::OutOfRange {
            what: "8-bit immediate",
            value,
            min: -128,
            max: 255,
        });
    }
    Ok((value & 0xFF) as u8)
}

fn port8(value: i64) -> Result<u8, EncodeError> {
    if !(0..=255).contains(&value) {
        return Err(EncodeError::OutOfRange {
            what: "port number",
            value,
            min: 0,
            max: 255,
        });
    }
    Ok(value as u8)
}

fn imm16(value: i64) -> Result<[u8; 2], EncodeError> {
    if !(-32768..=0xFFFF).contains(&value) {
        return Err(EncodeError::OutOfRange {
            what: "16-bit value",
            value,
            min: -32768,
            max: 0xFFFF,
        });
    }
    Ok(((value & 0xFFFF) as u16).to_le_bytes())
}

fn with_word(head: &[u8], value: i64) -> EncodeResult {
    let mut bytes = head.to_vec();
    bytes.extend_from_slice(&imm16(value)?);
    Ok(bytes)
}

fn with_prefix(prefix: Option<u8>, rest: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(rest.len() + 1);
    if let Some(prefix) = prefix {
        bytes.push(prefix);
    }
    bytes.extend_from_slice(rest);
    bytes
}

/// Both sides of a register-register form must agree on the index prefix;
/// an unprefixed H or L cannot pair with an index half.
fn merge_prefix(lhs: (Option<u8>, u8), rhs: (Option<u8>, u8)) -> Option<Option<u8>> {
    match (lhs.0, rhs.0) {
        (None, None) => Some(None),
        (Some(p), Some(q)) if p == q => Some(Some(p)),
        (Some(p), None) if !matches!(rhs.1, 4 | 5) => Some(Some(p)),
        (None, Some(p)) if !matches!(lhs.1, 4 | 5) => Some(Some(p)),
        _ => None,
    }
}

fn encode_ld(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    let [dst, src] = operands else {
        return Err(EncodeError::unsupported(mnemonic, operands));
    };

    match (dst, src) {
        (Operand::Reg8(Reg8::A), Operand::Indirect(Reg16::Bc)) => return Ok(vec![0x0A]),
        (Operand::Reg8(Reg8::A), Operand::Indirect(Reg16::De)) => return Ok(vec![0x1A]),
        (Operand::Indirect(Reg16::Bc), Operand::Reg8(Reg8::A)) => return Ok(vec![0x02]),
        (Operand::Indirect(Reg16::De), Operand::Reg8(Reg8::A)) => return Ok(vec![0x12]),
        (Operand::Reg8(Reg8::A), Operand::Absolute(addr)) => return with_word(&[0x3A], *addr),
        (Operand::Absolute(addr), Operand::Reg8(Reg8::A)) => return with_word(&[0x32], *addr),
        (Operand::Reg8(Reg8::A), Operand::Reg8(Reg8::I)) => return Ok(vec![0xED, 0x57]),
        (Operand::Reg8(Reg8::A), Operand::Reg8(Reg8::R)) => return Ok(vec![0xED, 0x5F]),
        (Operand::Reg8(Reg8::I), Operand::Reg8(Reg8::A)) => return Ok(vec![0xED, 0x47]),
        (Operand::Reg8(Reg8::R), Operand::Reg8(Reg8::A)) => return Ok(vec![0xED, 0x4F]),
        (Operand::Reg16(Reg16::Sp), Operand::Reg16(Reg16::Hl)) => return Ok(vec![0xF9]),
        (Operand::Reg16(Reg16::Sp), Operand::Reg16(Reg16::Ix)) => return Ok(vec![0xDD, 0xF9]),
        (Operand::Reg16(Reg16::Sp), Operand::Reg16(Reg16::Iy)) => return Ok(vec![0xFD, 0xF9]),
        (Operand::Reg16(reg), Operand::Imm(value)) => {
            if let Some(code) = pair_code(*reg) {
                return with_word(&[0x01 | (code << 4)], *value);
            }
            if let Some(prefix) = index_prefix(*reg) {
                return with_word(&[prefix, 0x21], *value);
            }
            return Err(EncodeError::unsupported(mnemonic, operands));
        }
        (Operand::Reg16(reg), Operand::Absolute(addr)) => {
            if *reg == Reg16::Hl {
                return with_word(&[0x2A], *addr);
            }
            if let Some(code) = pair_code(*reg) {
                return with_word(&[0xED, 0x4B | (code << 4)], *addr);
            }
            if let Some(prefix) = index_prefix(*reg) {
                return with_word(&[prefix, 0x2A], *addr);
            }
            return Err(EncodeError::unsupported(mnemonic, operands));
        }
        (Operand::Absolute(addr), Operand::Reg16(reg)) => {
            if *reg == Reg16::Hl {
                return with_word(&[0x22], *addr);
            }
            if let Some(code) = pair_code(*reg) {
                return with_word(&[0xED, 0x43 | (code << 4)], *addr);
            }
            if let Some(prefix) = index_prefix(*reg) {
                return with_word(&[prefix, 0x22], *addr);
            }
            return Err(EncodeError::unsupported(mnemonic, operands));
        }
        _ => {}
    }

    let Some(dst_loc) = loc8(dst)? else {
        return Err(EncodeError::unsupported(mnemonic, operands));
    };

    if let Operand::Imm(value) = src {
        let value = imm8(*value)?;
        return Ok(match dst_loc {
            Loc8::Reg { prefix, code } => with_prefix(prefix, &[0x06 | (code << 3), value]),
            Loc8::MemHl => vec![0x36, value],
            Loc8::Indexed { prefix, disp } => vec![prefix, 0x36, disp, value],
        });
    }

    let Some(src_loc) = loc8(src)? else {
        return Err(EncodeError::unsupported(mnemonic, operands));
    };

    match (dst_loc, src_loc) {
        (
            Loc8::Reg {
                prefix: dst_prefix,
                code: dst_code,
            },
            Loc8::Reg {
                prefix: src_prefix,
                code: src_code,
            },
        ) => {
            let Some(prefix) = merge_prefix((dst_prefix, dst_code), (src_prefix, src_code)) else {
                return Err(EncodeError::unsupported(mnemonic, operands));
            };
            Ok(with_prefix(prefix, &[0x40 | (dst_code << 3) | src_code]))
        }
        (Loc8::Reg { prefix: None, code }, Loc8::MemHl) => Ok(vec![0x46 | (code << 3)]),
        (Loc8::Reg { prefix: None, code }, Loc8::Indexed { prefix, disp }) => {
            Ok(vec![prefix, 0x46 | (code << 3), disp])
        }
        (Loc8::MemHl, Loc8::Reg { prefix: None, code }) => Ok(vec![0x70 | code]),
        (Loc8::Indexed { prefix, disp }, Loc8::Reg { prefix: None, code }) => {
            Ok(vec![prefix, 0x70 | code, disp])
        }
        _ => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}

fn alu_base(mnemonic: &str) -> u8 {
    match mnemonic {
        "add" => 0x80,
        "adc" => 0x88,
        "sub" => 0x90,
        "sbc" => 0x98,
        "and" => 0xA0,
        "xor" => 0xA8,
        "or" => 0xB0,
        _ => 0xB8,
    }
}

fn encode_alu(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    match operands {
        [Operand::Reg16(dst), Operand::Reg16(src)] => encode_alu16(mnemonic, *dst, *src, operands),
        [Operand::Reg8(Reg8::A), src] | [src] => {
            encode_alu8(mnemonic, alu_base(mnemonic), src, operands)
        }
        _ => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}

fn encode_alu8(mnemonic: &str, base: u8, src: &Operand, operands: &[Operand]) -> EncodeResult {
    if let Operand::Imm(value) = src {
        return Ok(vec![base + 0x46, imm8(*value)?]);
    }
    match loc8(src)? {
        Some(Loc8::Reg { prefix, code }) => Ok(with_prefix(prefix, &[base | code])),
        Some(Loc8::MemHl) => Ok(vec![base | 6]),
        Some(Loc8::Indexed { prefix, disp }) => Ok(vec![prefix, base | 6, disp]),
        None => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}

fn encode_alu16(mnemonic: &str, dst: Reg16, src: Reg16, operands: &[Operand]) -> EncodeResult {
    match (mnemonic, dst) {
        ("add", Reg16::Hl) => match pair_code(src) {
            Some(code) => Ok(vec![0x09 | (code << 4)]),
            None => Err(EncodeError::unsupported(mnemonic, operands)),
        },
        ("add", Reg16::Ix | Reg16::Iy) => {
            let code = match src {
                Reg16::Bc => 0,
                Reg16::De => 1,
                Reg16::Sp => 3,
                same if same == dst => 2,
                _ => return Err(EncodeError::unsupported(mnemonic, operands)),
            };
            let prefix = index_prefix(dst).unwrap_or(0xDD);
            Ok(vec![prefix, 0x09 | (code << 4)])
        }
        ("adc", Reg16::Hl) => match pair_code(src) {
            Some(code) => Ok(vec![0xED, 0x4A | (code << 4)]),
            None => Err(EncodeError::unsupported(mnemonic, operands)),
        },
        ("sbc", Reg16::Hl) => match pair_code(src) {
            Some(code) => Ok(vec![0xED, 0x42 | (code << 4)]),
            None => Err(EncodeError::unsupported(mnemonic, operands)),
        },
        _ => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}

fn encode_inc_dec(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    let is_inc = mnemonic == "inc";
    let [operand] = operands else {
        return Err(EncodeError::unsupported(mnemonic, operands));
    };

    if let Operand::Reg16(reg) = operand {
        if let Some(code) = pair_code(*reg) {
            let base = if is_inc { 0x03 } else { 0x0B };
            return Ok(vec![base | (code << 4)]);
        }
        if let Some(prefix) = index_prefix(*reg) {
            return Ok(vec![prefix, if is_inc { 0x23 } else { 0x2B }]);
        }
        return Err(EncodeError::unsupported(mnemonic, operands));
    }

    let base = if is_inc { 0x04 } else { 0x05 };
    match loc8(operand)? {
        Some(Loc8::Reg { prefix, code }) => Ok(with_prefix(prefix, &[base | (code << 3)])),
        Some(Loc8::MemHl) => Ok(vec![base | (6 << 3)]),
        Some(Loc8::Indexed { prefix, disp }) => Ok(vec![prefix, base | (6 << 3), disp]),
        None => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}

fn encode_stack(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    let base = if mnemonic == "push" { 0xC5 } else { 0xC1 };
    let [Operand::Reg16(reg)] = operands else {
        return Err(EncodeError::unsupported(mnemonic, operands));
    };
    let code = match reg {
        Reg16::Bc => 0,
        Reg16::De => 1,
        Reg16::Hl => 2,
        Reg16::Af => 3,
        Reg16::Ix | Reg16::Iy => {
            let prefix = index_prefix(*reg).unwrap_or(0xDD);
            return Ok(vec![prefix, base | (2 << 4)]);
        }
        Reg16::Sp | Reg16::AfShadow => {
            return Err(EncodeError::unsupported(mnemonic, operands));
        }
    };
    Ok(vec![base | (code << 4)])
}

/// Target of a CB-prefixed instruction: an optional `(prefix, disp)` for
/// indexed forms and the register field.
fn cb_target(operand: &Operand) -> Result<Option<(Option<(u8, u8)>, u8)>, EncodeError> {
    match loc8(operand)? {
        Some(Loc8::Reg { prefix: None, code }) => Ok(Some((None, code))),
        Some(Loc8::MemHl) => Ok(Some((None, 6))),
        Some(Loc8::Indexed { prefix, disp }) => Ok(Some((Some((prefix, disp)), 6))),
        _ => Ok(None),
    }
}

fn emit_cb(indexed: Option<(u8, u8)>, opcode: u8) -> Vec<u8> {
    match indexed {
        None => vec![0xCB, opcode],
        Some((prefix, disp)) => vec![prefix, 0xCB, disp, opcode],
    }
}

/// Resolves the optional copy-back register of an undocumented
/// `op (ix+d), r` form.
fn cb_destination(
    mnemonic: &str,
    target: (Option<(u8, u8)>, u8),
    dest: Option<&Operand>,
    operands: &[Operand],
) -> Result<(Option<(u8, u8)>, u8), EncodeError> {
    let Some(dest) = dest else {
        return Ok(target);
    };
    match (target.0, dest) {
        (Some(indexed), Operand::Reg8(reg)) if reg.is_general() => {
            Ok((Some(indexed), general_code(*reg)))
        }
        _ => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}

fn encode_shift(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    let base = match mnemonic {
        "rlc" => 0x00,
        "rrc" => 0x08,
        "rl" => 0x10,
        "rr" => 0x18,
        "sla" => 0x20,
        "sra" => 0x28,
        "sll" => 0x30,
        _ => 0x38,
    };
    let (target, dest) = match operands {
        [target] => (target, None),
        [target, dest] => (target, Some(dest)),
        _ => return Err(EncodeError::unsupported(mnemonic, operands)),
    };
    let Some(target) = cb_target(target)? else {
        return Err(EncodeError::unsupported(mnemonic, operands));
    };
    let (indexed, code) = cb_destination(mnemonic, target, dest, operands)?;
    Ok(emit_cb(indexed, base | code))
}

fn encode_bit(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    let base = match mnemonic {
        "bit" => 0x40,
        "res" => 0x80,
        _ => 0xC0,
    };
    let (bit, target, dest) = match operands {
        [Operand::Imm(bit), target] => (*bit, target, None),
        [Operand::Imm(bit), target, dest] if mnemonic != "bit" => (*bit, target, Some(dest)),
        _ => return Err(EncodeError::unsupported(mnemonic, operands)),
    };
    if !(0..=7).contains(&bit) {
        return Err(EncodeError::OutOfRange {
            what: "bit number",
            value: bit,
            min: 0,
            max: 7,
        });
    }
    let Some(target) = cb_target(target)? else {
        return Err(EncodeError::unsupported(mnemonic, operands));
    };
    let (indexed, code) = cb_destination(mnemonic, target, dest, operands)?;
    Ok(emit_cb(indexed, base | ((bit as u8) << 3) | code))
}

fn encode_jp(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    match operands {
        [Operand::Imm(target)] => with_word(&[0xC3], *target),
        [Operand::Indirect(Reg16::Hl)] => Ok(vec![0xE9]),
        [Operand::Indirect(Reg16::Ix)]
        | [Operand::Indexed {
            base: crate::IndexReg::Ix,
            disp: 0,
        }] => Ok(vec![0xDD, 0xE9]),
        [Operand::Indirect(Reg16::Iy)]
        | [Operand::Indexed {
            base: crate::IndexReg::Iy,
            disp: 0,
        }] => Ok(vec![0xFD, 0xE9]),
        [cond, Operand::Imm(target)] => {
            let Some(cond) = condition_of(cond) else {
                return Err(EncodeError::unsupported(mnemonic, operands));
            };
            with_word(&[0xC2 | (cond.code() << 3)], *target)
        }
        _ => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}

fn encode_jr(mnemonic: &str, operands: &[Operand]) -> EncodeResult {
    match operands {
        [Operand::Imm(disp)] => Ok(vec![0x18, rel8(*disp)?]),
        [cond, Operand::Imm(disp)] => {
            let cond = match condition_of(cond) {
                Some(cond @ (Condition::Nz | Condition::Z | Condition::Nc | Condition::C)) => cond,
                _ => return Err(EncodeError::unsupported(mnemonic, operands)),
            };
            Ok(vec![0x20 | (cond.code() << 3), rel8(*disp)?])
        }
        _ => Err(EncodeError::unsupported(mnemonic, operands)),
    }
}
