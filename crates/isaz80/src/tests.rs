use super::*;

fn enc(mnemonic: &str, operands: &[Operand]) -> Vec<u8> {
    encode(mnemonic, operands).expect("encode")
}

#[test]
fn encodes_implied_opcodes() {
    assert_eq!(enc("nop", &[]), vec![0x00]);
    assert_eq!(enc("HALT", &[]), vec![0x76]);
    assert_eq!(enc("ldir", &[]), vec![0xED, 0xB0]);
    assert_eq!(enc("neg", &[]), vec![0xED, 0x44]);
}

#[test]
fn encodes_eight_bit_loads() {
    assert_eq!(enc("ld", &[Operand::Reg8(Reg8::A), Operand::Imm(5)]), vec![0x3E, 0x05]);
    assert_eq!(
        enc("ld", &[Operand::Reg8(Reg8::B), Operand::Reg8(Reg8::C)]),
        vec![0x41]
    );
    assert_eq!(
        enc("ld", &[Operand::Reg8(Reg8::A), Operand::Indirect(Reg16::Hl)]),
        vec![0x7E]
    );
    assert_eq!(
        enc("ld", &[Operand::Indirect(Reg16::Hl), Operand::Imm(0xFF)]),
        vec![0x36, 0xFF]
    );
    assert_eq!(
        enc("ld", &[Operand::Reg8(Reg8::A), Operand::Absolute(0x8000)]),
        vec![0x3A, 0x00, 0x80]
    );
    assert_eq!(
        enc("ld", &[Operand::Reg8(Reg8::A), Operand::Imm(-1)]),
        vec![0x3E, 0xFF]
    );
}

#[test]
fn encodes_indexed_forms() {
    let ix_minus_two = Operand::Indexed {
        base: IndexReg::Ix,
        disp: -2,
    };
    assert_eq!(
        enc("ld", &[Operand::Reg8(Reg8::E), ix_minus_two]),
        vec![0xDD, 0x5E, 0xFE]
    );
    assert_eq!(
        enc("ld", &[ix_minus_two, Operand::Reg8(Reg8::D)]),
        vec![0xDD, 0x72, 0xFE]
    );
    assert_eq!(
        enc(
            "ld",
            &[
                Operand::Indexed {
                    base: IndexReg::Iy,
                    disp: 3
                },
                Operand::Imm(7)
            ]
        ),
        vec![0xFD, 0x36, 0x03, 0x07]
    );
    assert_eq!(
        enc("bit", &[Operand::Imm(3), ix_minus_two]),
        vec![0xDD, 0xCB, 0xFE, 0x5E]
    );
    assert_eq!(
        enc("add", &[Operand::Reg8(Reg8::A), ix_minus_two]),
        vec![0xDD, 0x86, 0xFE]
    );
}

#[test]
fn encodes_index_halves() {
    assert_eq!(
        enc("ld", &[Operand::Reg8(Reg8::A), Operand::Reg8(Reg8::Ixh)]),
        vec![0xDD, 0x7C]
    );
    assert_eq!(
        enc("ld", &[Operand::Reg8(Reg8::Iyl), Operand::Imm(1)]),
        vec![0xFD, 0x2E, 0x01]
    );
    let err = encode("ld", &[Operand::Reg8(Reg8::H), Operand::Reg8(Reg8::Ixl)])
        .expect_err("h cannot pair with an index half");
    assert!(matches!(err, EncodeError::UnsupportedForm { .. }));
}

#[test]
fn encodes_sixteen_bit_forms() {
    assert_eq!(
        enc("ld", &[Operand::Reg16(Reg16::Hl), Operand::Imm(0x1234)]),
        vec![0x21, 0x34, 0x12]
    );
    assert_eq!(
        enc("ld", &[Operand::Reg16(Reg16::Ix), Operand::Imm(0)]),
        vec![0xDD, 0x21, 0x00, 0x00]
    );
    assert_eq!(
        enc("ld", &[Operand::Reg16(Reg16::De), Operand::Absolute(0x4000)]),
        vec![0xED, 0x5B, 0x00, 0x40]
    );
    assert_eq!(
        enc("ld", &[Operand::Absolute(0x4000), Operand::Reg16(Reg16::Hl)]),
        vec![0x22, 0x00, 0x40]
    );
    assert_eq!(
        enc("ld", &[Operand::Reg16(Reg16::Sp), Operand::Reg16(Reg16::Ix)]),
        vec![0xDD, 0xF9]
    );
    assert_eq!(
        enc("add", &[Operand::Reg16(Reg16::Ix), Operand::Reg16(Reg16::Sp)]),
        vec![0xDD, 0x39]
    );
    assert_eq!(
        enc("sbc", &[Operand::Reg16(Reg16::Hl), Operand::Reg16(Reg16::De)]),
        vec![0xED, 0x52]
    );
    assert_eq!(enc("push", &[Operand::Reg16(Reg16::Af)]), vec![0xF5]);
    assert_eq!(enc("pop", &[Operand::Reg16(Reg16::Iy)]), vec![0xFD, 0xE1]);
    assert_eq!(enc("inc", &[Operand::Reg16(Reg16::Sp)]), vec![0x33]);
    assert_eq!(enc("dec", &[Operand::Reg8(Reg8::A)]), vec![0x3D]);
}

#[test]
fn encodes_alu_with_and_without_accumulator() {
    assert_eq!(enc("cp", &[Operand::Imm(10)]), vec![0xFE, 0x0A]);
    assert_eq!(
        enc("cp", &[Operand::Reg8(Reg8::A), Operand::Imm(10)]),
        vec![0xFE, 0x0A]
    );
    assert_eq!(enc("xor", &[Operand::Reg8(Reg8::A)]), vec![0xAF]);
    assert_eq!(enc("or", &[Operand::Indirect(Reg16::Hl)]), vec![0xB6]);
}

#[test]
fn encodes_branches() {
    assert_eq!(enc("jp", &[Operand::Imm(0x1234)]), vec![0xC3, 0x34, 0x12]);
    assert_eq!(
        enc("jp", &[Operand::Cond(Condition::Nz), Operand::Imm(0x1234)]),
        vec![0xC2, 0x34, 0x12]
    );
    assert_eq!(
        enc("jp", &[Operand::Reg8(Reg8::C), Operand::Imm(0)]),
        vec![0xDA, 0x00, 0x00]
    );
    assert_eq!(enc("jp", &[Operand::Indirect(Reg16::Hl)]), vec![0xE9]);
    assert_eq!(enc("jr", &[Operand::Imm(-2)]), vec![0x18, 0xFE]);
    assert_eq!(
        enc("jr", &[Operand::Cond(Condition::Z), Operand::Imm(4)]),
        vec![0x28, 0x04]
    );
    assert_eq!(enc("djnz", &[Operand::Imm(-5)]), vec![0x10, 0xFB]);
    assert_eq!(enc("call", &[Operand::Imm(0x0100)]), vec![0xCD, 0x00, 0x01]);
    assert_eq!(enc("ret", &[]), vec![0xC9]);
    assert_eq!(enc("ret", &[Operand::Cond(Condition::M)]), vec![0xF8]);
    assert_eq!(enc("rst", &[Operand::Imm(0x38)]), vec![0xFF]);
}

#[test]
fn encodes_misc_forms() {
    assert_eq!(
        enc("ex", &[Operand::Reg16(Reg16::De), Operand::Reg16(Reg16::Hl)]),
        vec![0xEB]
    );
    assert_eq!(
        enc("in", &[Operand::Reg8(Reg8::A), Operand::PortImm(0xFE)]),
        vec![0xDB, 0xFE]
    );
    assert_eq!(
        enc("out", &[Operand::PortC, Operand::Reg8(Reg8::B)]),
        vec![0xED, 0x41]
    );
    assert_eq!(enc("im", &[Operand::Imm(1)]), vec![0xED, 0x56]);
    assert_eq!(enc("srl", &[Operand::Reg8(Reg8::A)]), vec![0xCB, 0x3F]);
    assert_eq!(
        enc("set", &[Operand::Imm(7), Operand::Indirect(Reg16::Hl)]),
        vec![0xCB, 0xFE]
    );
}

#[test]
fn jr_rejects_parity_conditions() {
    let err = encode("jr", &[Operand::Cond(Condition::Pe), Operand::Imm(0)])
        .expect_err("jr has no pe form");
    assert_eq!(
        err,
        EncodeError::UnsupportedForm {
            mnemonic: "jr".to_string(),
            shape: "cc, imm".to_string(),
        }
    );
}

#[test]
fn reports_range_errors() {
    let err = encode("ld", &[Operand::Reg8(Reg8::A), Operand::Imm(256)]).expect_err("range");
    assert!(matches!(
        err,
        EncodeError::OutOfRange {
            what: "8-bit immediate",
            value: 256,
            ..
        }
    ));

    let err = encode("jr", &[Operand::Imm(128)]).expect_err("range");
    assert!(matches!(err, EncodeError::OutOfRange { max: 127, .. }));

    let err = encode("bit", &[Operand::Imm(8), Operand::Reg8(Reg8::A)]).expect_err("range");
    assert!(matches!(err, EncodeError::OutOfRange { what: "bit number", .. }));

    let err = encode("rst", &[Operand::Imm(3)]).expect_err("vector");
    assert_eq!(err, EncodeError::InvalidRestart { value: 3 });
}

#[test]
fn rejects_unknown_and_malformed() {
    assert_eq!(
        encode("frob", &[]).expect_err("unknown"),
        EncodeError::UnknownMnemonic {
            mnemonic: "frob".to_string()
        }
    );
    let err = encode("nop", &[Operand::Imm(1)]).expect_err("nop takes nothing");
    assert_eq!(err.to_string(), "unsupported operand form for 'nop': imm");
    let err = encode("ld", &[]).expect_err("ld needs operands");
    assert_eq!(
        err.to_string(),
        "unsupported operand form for 'ld': <no operands>"
    );
}

#[test]
fn formats_instructions_for_traces() {
    assert_eq!(
        format_instruction(
            "LD",
            &[
                Operand::Reg8(Reg8::A),
                Operand::Indexed {
                    base: IndexReg::Ix,
                    disp: -2
                }
            ]
        ),
        "ld a, (ix-2)"
    );
    assert_eq!(
        format_instruction("jp", &[Operand::Imm(0x1234)]),
        "jp $1234"
    );
    assert_eq!(format_instruction("nop", &[]), "nop");
}

#[test]
fn recognizes_mnemonics_case_insensitively() {
    assert!(is_mnemonic("LDIR"));
    assert!(is_mnemonic("djnz"));
    assert!(!is_mnemonic("main"));
}
