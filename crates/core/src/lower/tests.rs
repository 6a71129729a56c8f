use similar_asserts::assert_eq;
use zax_eval::{BinaryOp, ImmExpr};
use zax_isaz80::Reg8;

use crate::ast::{
    DataInit, Decl, EaExpr, EaIndex, Item, Matcher, SectionDecl, SectionKind, TypeExpr, VarDecl,
    VarEntry, VarKind,
};
use crate::diag::{Severity, Supplemental};
use crate::test_support::*;

fn nops(count: usize) -> Vec<Item> {
    (0..count).map(|_| ins("nop", vec![])).collect()
}

#[test]
fn straight_line_code_gets_an_implicit_ret() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            ins("ld", vec![reg("a"), imm(5)]),
            ins("add", vec![reg("a"), imm(3)]),
        ],
    )])
    .expect("compiles");

    assert_eq!(code_bytes(&output), vec![0x3E, 0x05, 0xC6, 0x03, 0xC9]);
    assert_eq!(output.symbols.get("main").map(|entry| entry.value), Some(0));
}

#[test]
fn if_else_jumps_over_the_else_arm() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            ins("or", vec![reg("a")]),
            Item::If(name("z")),
            ins("ld", vec![reg("a"), imm(1)]),
            Item::Else,
            ins("ld", vec![reg("a"), imm(2)]),
            Item::End,
        ],
    )])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xB7, // or a
            0xC2, 0x09, 0x00, // jp nz, else
            0x3E, 0x01, // ld a, 1
            0xC3, 0x0B, 0x00, // jp end
            0x3E, 0x02, // else: ld a, 2
            0xC9, // end: ret
        ]
    );
}

#[test]
fn while_loop_tests_at_the_top() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            ins("ld", vec![reg("b"), imm(3)]),
            Item::While(name("nz")),
            ins("dec", vec![reg("b")]),
            Item::End,
        ],
    )])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0x06, 0x03, // ld b, 3
            0xCA, 0x09, 0x00, // test: jp z, end
            0x05, // dec b
            0xC3, 0x02, 0x00, // jp test
            0xC9, // end: ret
        ]
    );
}

#[test]
fn forward_relative_jump_is_patched() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            ins("jr", vec![name("done")]),
            ins("nop", vec![]),
            label("done"),
            ins("ret", vec![]),
        ],
    )])
    .expect("compiles");

    assert_eq!(code_bytes(&output), vec![0x18, 0x01, 0x00, 0xC9]);
}

#[test]
fn relative_jump_out_of_range_is_reported() {
    let mut body = vec![ins("jr", vec![name("far")])];
    body.extend(nops(130));
    body.push(label("far"));
    body.push(ins("ret", vec![]));

    let error = compile_decls(vec![func("main", body)]).expect_err("out of range");
    let messages = messages(&error);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("out of range"), "{messages:?}");
    assert!(messages[0].contains("'far'"), "{messages:?}");
}

#[test]
fn unbalanced_push_is_reported_at_the_end_of_function() {
    let error = compile_decls(vec![func("main", vec![ins("push", vec![reg("hl")])])])
        .expect_err("imbalance");
    assert_eq!(
        messages(&error),
        vec!["stack imbalance at end of function: 2 bytes still pushed".to_string()]
    );
}

#[test]
fn loop_body_must_preserve_stack_depth() {
    let error = compile_decls(vec![func(
        "main",
        vec![
            Item::While(name("nz")),
            ins("push", vec![reg("hl")]),
            Item::End,
        ],
    )])
    .expect_err("mismatch");
    let messages = messages(&error);
    assert!(
        messages.iter().any(|message| message.contains("while loop back edge")),
        "{messages:?}"
    );
}

#[test]
fn framed_function_reads_its_parameter_through_ix() {
    let output = compile_decls(vec![
        func_with(
            "add1",
            vec![param("x", TypeExpr::Byte)],
            Vec::new(),
            vec![ins("ld", vec![reg("a"), mem("x")])],
        ),
        func("main", vec![ins("add1", vec![imm(7)])]),
    ])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            // add1
            0xDD, 0xE5, // push ix
            0xDD, 0x21, 0x00, 0x00, // ld ix, 0
            0xDD, 0x39, // add ix, sp
            0xDD, 0x7E, 0x04, // ld a, (ix+4)
            0xDD, 0xF9, // ld sp, ix
            0xDD, 0xE1, // pop ix
            0xC9, // ret
            // main
            0x21, 0x07, 0x00, // ld hl, 7
            0xE5, // push hl
            0xCD, 0x00, 0x00, // call add1
            0x33, 0x33, // inc sp; inc sp
            0xC9, // ret
        ]
    );
    assert_eq!(output.symbols.get("main").map(|entry| entry.value), Some(16));
}

#[test]
fn local_slots_are_initialized_in_the_prologue() {
    let output = compile_decls(vec![func_with(
        "main",
        Vec::new(),
        vec![slot("count", TypeExpr::Word, Some(0x1234))],
        vec![ins("ret", vec![])],
    )])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xDD, 0xE5, // push ix
            0xDD, 0x21, 0x00, 0x00, // ld ix, 0
            0xDD, 0x39, // add ix, sp
            0x21, 0x34, 0x12, // ld hl, $1234
            0xE5, // push hl
            0xC3, 0x0F, 0x00, // jp epilogue
            0xDD, 0xF9, // epilogue: ld sp, ix
            0xDD, 0xE1, // pop ix
            0xC9, // ret
        ]
    );
}

#[test]
fn call_arity_mismatch_names_the_signature() {
    let error = compile_decls(vec![
        func_with(
            "put",
            vec![param("x", TypeExpr::Byte)],
            Vec::new(),
            Vec::new(),
        ),
        func("main", vec![ins("put", vec![])]),
    ])
    .expect_err("arity");

    let diagnostic = &error.diagnostics[0];
    assert_eq!(diagnostic.message, "'put' expects 1 argument(s), found 0");
    let notes: Vec<&str> = diagnostic
        .supplements
        .iter()
        .filter_map(|supplement| match supplement {
            Supplemental::Note(note) => Some(note.as_str()),
            Supplemental::Help(_) => None,
        })
        .collect();
    assert_eq!(notes, vec!["signature: put(x: byte)"]);
}

#[test]
fn token_overload_beats_register_class() {
    let output = compile_decls(vec![
        op(
            "zero",
            vec![("dst", Matcher::Token("a".to_string()))],
            vec![ins("xor", vec![reg("a")])],
        ),
        op(
            "zero",
            vec![("dst", Matcher::Reg8)],
            vec![ins("ld", vec![name("dst"), imm(0)])],
        ),
        func(
            "main",
            vec![ins("zero", vec![reg("a")]), ins("zero", vec![reg("b")])],
        ),
    ])
    .expect("compiles");

    assert_eq!(code_bytes(&output), vec![0xAF, 0x06, 0x00, 0xC9]);
}

#[test]
fn equally_specific_overloads_are_ambiguous() {
    let error = compile_decls(vec![
        op("pick", vec![("x", Matcher::Imm8)], vec![ins("nop", vec![])]),
        op("pick", vec![("y", Matcher::Imm8)], vec![ins("halt", vec![])]),
        func("main", vec![ins("pick", vec![imm(1)])]),
    ])
    .expect_err("ambiguous");

    assert_eq!(
        messages(&error),
        vec!["ambiguous op 'pick': 2 overloads match equally well".to_string()]
    );
}

#[test]
fn self_expanding_op_is_cut_off() {
    let error = compile_decls(vec![
        op(
            "spin",
            vec![("r", Matcher::Reg8)],
            vec![ins("spin", vec![name("r")])],
        ),
        func("main", vec![ins("spin", vec![reg("a")])]),
    ])
    .expect_err("cycle");

    assert_eq!(
        messages(&error),
        vec!["cyclic op expansion: spin -> spin".to_string()]
    );
}

#[test]
fn repeated_self_calls_report_the_cycle_once() {
    let error = compile_decls(vec![
        op(
            "spin",
            vec![("r", Matcher::Reg8)],
            vec![ins("spin", vec![name("r")]), ins("spin", vec![name("r")])],
        ),
        func("main", vec![ins("spin", vec![reg("a")])]),
    ])
    .expect_err("cycle");

    assert_eq!(
        messages(&error),
        vec!["cyclic op expansion: spin -> spin".to_string()]
    );
}

#[test]
fn mutually_recursive_ops_report_one_cycle() {
    let error = compile_decls(vec![
        op(
            "ping",
            vec![("r", Matcher::Reg8)],
            vec![ins("pong", vec![name("r")])],
        ),
        op(
            "pong",
            vec![("r", Matcher::Reg8)],
            vec![ins("ping", vec![name("r")])],
        ),
        func("main", vec![ins("ping", vec![reg("c")])]),
    ])
    .expect_err("cycle");

    assert_eq!(
        messages(&error),
        vec!["cyclic op expansion: ping -> pong -> ping".to_string()]
    );
}

#[test]
fn op_labels_are_unique_per_expansion() {
    let output = compile_decls(vec![
        op(
            "wait",
            vec![("r", Matcher::Reg8)],
            vec![
                label("again"),
                ins("dec", vec![name("r")]),
                ins("jr", vec![name("nz"), name("again")]),
            ],
        ),
        func(
            "main",
            vec![ins("wait", vec![reg("b")]), ins("wait", vec![reg("c")])],
        ),
    ])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0x05, 0x20, 0xFD, // dec b; jr nz, again
            0x0D, 0x20, 0xFD, // dec c; jr nz, again
            0xC9,
        ]
    );
}

#[test]
fn byte_select_compares_through_hl() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            Item::Select(reg("b")),
            Item::Case(vec![ImmExpr::Literal(1)]),
            ins("ld", vec![reg("c"), imm(1)]),
            Item::Case(vec![ImmExpr::Literal(2), ImmExpr::Literal(300)]),
            ins("ld", vec![reg("c"), imm(2)]),
            Item::End,
        ],
    )])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xC3, 0x0D, 0x00, // jp dispatch
            0x0E, 0x01, // case 1: ld c, 1
            0xC3, 0x27, 0x00, // jp end
            0x0E, 0x02, // case 2: ld c, 2
            0xC3, 0x27, 0x00, // jp end
            0x68, // dispatch: ld l, b
            0x26, 0x00, // ld h, 0
            0xB7, 0x11, 0x01, 0x00, // or a; ld de, 1
            0xED, 0x52, 0x19, // sbc hl, de; add hl, de
            0xCA, 0x03, 0x00, // jp z, case 1
            0xB7, 0x11, 0x02, 0x00, // or a; ld de, 2
            0xED, 0x52, 0x19, // sbc hl, de; add hl, de
            0xCA, 0x08, 0x00, // jp z, case 2
            0xC3, 0x27, 0x00, // jp end
            0xC9, // end: ret
        ]
    );
    assert_eq!(output.warnings.len(), 1);
    assert_eq!(output.warnings[0].severity, Severity::Warning);
    assert_eq!(
        output.warnings[0].message,
        "case value 300 can never match an 8-bit selector"
    );
}

#[test]
fn duplicate_case_values_are_rejected() {
    let error = compile_decls(vec![func(
        "main",
        vec![
            Item::Select(reg("a")),
            Item::Case(vec![ImmExpr::Literal(1)]),
            ins("nop", vec![]),
            Item::Case(vec![ImmExpr::Literal(1)]),
            ins("nop", vec![]),
            Item::End,
        ],
    )])
    .expect_err("duplicate");
    assert_eq!(messages(&error), vec!["duplicate case value 1".to_string()]);
}

#[test]
fn runtime_index_goes_through_hl() {
    let output = compile_decls(vec![
        var("table", array(TypeExpr::Byte, 8)),
        func(
            "main",
            vec![ins(
                "ld",
                vec![
                    reg("a"),
                    mem_ea(EaExpr::index(
                        EaExpr::name("table"),
                        EaIndex::Reg8(Reg8::B),
                    )),
                ],
            )],
        ),
    ])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xE5, // push hl
            0xD5, // push de
            0x68, // ld l, b
            0x26, 0x00, // ld h, 0
            0x11, 0x0E, 0x00, // ld de, table
            0x19, // add hl, de
            0x7E, // ld a, (hl)
            0xD1, // pop de
            0xE1, // pop hl
            0xC9,
        ]
    );
    assert_eq!(output.symbols.get("table").map(|entry| entry.value), Some(0x0E));
}

#[test]
fn constant_index_out_of_bounds_is_reported() {
    let error = compile_decls(vec![
        var("table", array(TypeExpr::Byte, 4)),
        func(
            "main",
            vec![ins(
                "ld",
                vec![
                    reg("a"),
                    mem_ea(EaExpr::index(
                        EaExpr::name("table"),
                        EaIndex::Imm(ImmExpr::Literal(4)),
                    )),
                ],
            )],
        ),
    ])
    .expect_err("bounds");
    let messages = messages(&error);
    assert!(messages[0].contains("index 4 out of bounds"), "{messages:?}");
}

#[test]
fn data_words_referencing_code_are_fixed_up() {
    let output = compile_decls(vec![
        func("main", vec![ins("ret", vec![])]),
        data(
            "vectors",
            array(TypeExpr::Word, 2),
            DataInit::Values(vec![ImmExpr::name("main"), ImmExpr::Literal(0x1234)]),
        ),
    ])
    .expect("compiles");

    let bytes = &output.byte_map.bytes;
    assert_eq!(bytes.get(&0), Some(&0xC9));
    assert_eq!(bytes.get(&1), None);
    assert_eq!(
        (2..6).map(|address| bytes[&address]).collect::<Vec<_>>(),
        vec![0x00, 0x00, 0x34, 0x12]
    );
    assert_eq!(output.symbols.get("vectors").map(|entry| entry.value), Some(2));
}

#[test]
fn overlapping_sections_are_rejected() {
    let at = |kind, address| {
        Decl::Section(SectionDecl {
            kind,
            at: Some(ImmExpr::Literal(address)),
        })
    };
    let error = compile_decls(vec![
        at(SectionKind::Code, 0x100),
        func("main", vec![ins("ret", vec![])]),
        at(SectionKind::Data, 0x100),
        data("x", TypeExpr::Byte, DataInit::Values(vec![ImmExpr::Literal(1)])),
    ])
    .expect_err("overlap");
    let messages = messages(&error);
    assert!(
        messages.iter().any(|message| message.contains("overlaps")),
        "{messages:?}"
    );
}

#[test]
fn stray_end_is_reported() {
    let error = compile_decls(vec![func("main", vec![Item::End])]).expect_err("stray");
    assert_eq!(
        messages(&error),
        vec!["'end' without a matching opening construct".to_string()]
    );
}

#[test]
fn output_is_deterministic_and_serializable() {
    let decls = || {
        vec![
            var("buffer", array(TypeExpr::Byte, 16)),
            func(
                "main",
                vec![
                    Item::If(name("c")),
                    ins("ld", vec![reg("hl"), name("buffer")]),
                    Item::End,
                ],
            ),
        ]
    };
    let first = compile_decls(decls()).expect("compiles");
    let second = compile_decls(decls()).expect("compiles");
    assert_eq!(first.byte_map, second.byte_map);
    assert_eq!(first.symbols, second.symbols);

    let json = serde_json::to_value(&first.byte_map).expect("serializes");
    assert_eq!(json["bytes"]["0"], serde_json::json!(0xD2));
}

#[test]
fn code_origin_moves_label_addresses() {
    let options = crate::CompileOptions {
        code_origin: 0x8000,
        ..crate::CompileOptions::default()
    };
    let output = compile_with(
        vec![func("main", vec![label("top"), ins("jp", vec![name("top")])])],
        &options,
    )
    .expect("compiles");

    assert_eq!(code_bytes(&output), vec![0xC3, 0x00, 0x80]);
    assert_eq!(output.byte_map.bytes.keys().next(), Some(&0x8000));
}

fn load_a_from(ea: EaExpr) -> Decl {
    func("main", vec![ins("ld", vec![reg("a"), mem_ea(ea)])])
}

fn section_at(kind: SectionKind, address: i64) -> Decl {
    Decl::Section(SectionDecl {
        kind,
        at: Some(ImmExpr::Literal(address)),
    })
}

#[test]
fn word_array_index_is_scaled_by_doubling() {
    let output = compile_decls(vec![
        var("words", array(TypeExpr::Word, 4)),
        func(
            "main",
            vec![ins(
                "ld",
                vec![
                    reg("bc"),
                    mem_ea(EaExpr::index(EaExpr::name("words"), EaIndex::Reg8(Reg8::B))),
                ],
            )],
        ),
    ])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xE5, 0xD5, // push hl; push de
            0x68, 0x26, 0x00, // ld l, b; ld h, 0
            0x29, // add hl, hl
            0x11, 0x10, 0x00, // ld de, words
            0x19, // add hl, de
            0x4E, 0x23, 0x46, // ld c, (hl); inc hl; ld b, (hl)
            0xD1, 0xE1, // pop de; pop hl
            0xC9,
        ]
    );
}

#[test]
fn subtracted_register_index_negates_hl() {
    let index = ImmExpr::binary(BinaryOp::Sub, ImmExpr::Literal(4), ImmExpr::name("b"));
    let output = compile_decls(vec![
        var("table", array(TypeExpr::Byte, 8)),
        load_a_from(EaExpr::index(EaExpr::name("table"), EaIndex::Imm(index))),
    ])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xE5, 0xD5, // push hl; push de
            0x68, 0x26, 0x00, // ld l, b; ld h, 0
            0xEB, // ex de, hl
            0x21, 0x00, 0x00, // ld hl, 0
            0xB7, 0xED, 0x52, // or a; sbc hl, de
            0x11, 0x18, 0x00, // ld de, table + 4
            0x19, // add hl, de
            0x7E, // ld a, (hl)
            0xD1, 0xE1, // pop de; pop hl
            0xC9,
        ]
    );
    assert_eq!(output.symbols.get("table").map(|entry| entry.value), Some(0x14));
}

#[test]
fn runtime_index_into_odd_sized_elements_is_rejected() {
    let error = compile_decls(vec![
        record(
            "rgb",
            vec![
                ("red", TypeExpr::Byte),
                ("green", TypeExpr::Byte),
                ("blue", TypeExpr::Byte),
            ],
        ),
        var("pixels", array(TypeExpr::Named("rgb".to_string()), 4)),
        load_a_from(EaExpr::index(EaExpr::name("pixels"), EaIndex::Reg8(Reg8::B))),
    ])
    .expect_err("stride");

    assert_eq!(
        messages(&error),
        vec![
            "non-constant indexing requires power-of-two element size, found scale 3".to_string()
        ]
    );
}

#[test]
fn index_with_two_registers_is_rejected() {
    let index = ImmExpr::binary(BinaryOp::Add, ImmExpr::name("b"), ImmExpr::name("c"));
    let error = compile_decls(vec![
        var("table", array(TypeExpr::Byte, 8)),
        load_a_from(EaExpr::index(EaExpr::name("table"), EaIndex::Imm(index))),
    ])
    .expect_err("two atoms");

    let messages = messages(&error);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("runtime-atom budget exceeded"), "{messages:?}");
}

#[test]
fn huge_index_constant_is_an_error_not_a_crash() {
    let index = ImmExpr::binary(
        BinaryOp::Add,
        ImmExpr::name("b"),
        ImmExpr::Literal(0x4000_0000_0000_0000),
    );
    let error = compile_decls(vec![
        var("table", array(TypeExpr::Word, 8)),
        load_a_from(EaExpr::index(EaExpr::name("table"), EaIndex::Imm(index))),
    ])
    .expect_err("overflow");

    assert_eq!(
        messages(&error),
        vec!["address arithmetic overflows".to_string()]
    );
}

#[test]
fn record_field_offset_is_added_to_the_address() {
    let output = compile_decls(vec![
        record("point", vec![("x", TypeExpr::Byte), ("y", TypeExpr::Word)]),
        var("origin", TypeExpr::Named("point".to_string())),
        func(
            "main",
            vec![ins(
                "ld",
                vec![reg("hl"), mem_ea(EaExpr::field(EaExpr::name("origin"), "y"))],
            )],
        ),
    ])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0x2A, 0x05, 0x00, // ld hl, (origin + 1)
            0xC9,
        ]
    );
    assert_eq!(output.symbols.get("origin").map(|entry| entry.value), Some(4));
}

#[test]
fn repeat_until_branches_back_on_the_inverse_condition() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            ins("ld", vec![reg("b"), imm(3)]),
            Item::Repeat,
            ins("dec", vec![reg("b")]),
            Item::Until(name("z")),
        ],
    )])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0x06, 0x03, // ld b, 3
            0x05, // body: dec b
            0xC2, 0x02, 0x00, // jp nz, body
            0xC9,
        ]
    );
}

#[test]
fn constant_selector_jumps_straight_to_its_case() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            Item::Select(imm(2)),
            Item::Case(vec![ImmExpr::Literal(1)]),
            ins("nop", vec![]),
            Item::Case(vec![ImmExpr::Literal(2)]),
            ins("halt", vec![]),
            Item::End,
        ],
    )])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xC3, 0x0B, 0x00, // jp dispatch
            0x00, // case 1: nop
            0xC3, 0x0E, 0x00, // jp end
            0x76, // case 2: halt
            0xC3, 0x0E, 0x00, // jp end
            0xC3, 0x07, 0x00, // dispatch: jp case 2
            0xC9, // end: ret
        ]
    );
}

#[test]
fn word_select_compares_hl_against_each_case() {
    let output = compile_decls(vec![func(
        "main",
        vec![
            Item::Select(reg("hl")),
            Item::Case(vec![ImmExpr::Literal(0x1234)]),
            ins("nop", vec![]),
            Item::End,
        ],
    )])
    .expect("compiles");

    assert_eq!(
        code_bytes(&output),
        vec![
            0xC3, 0x07, 0x00, // jp dispatch
            0x00, // case: nop
            0xC3, 0x14, 0x00, // jp end
            0xB7, 0x11, 0x34, 0x12, // dispatch: or a; ld de, $1234
            0xED, 0x52, 0x19, // sbc hl, de; add hl, de
            0xCA, 0x03, 0x00, // jp z, case
            0xC3, 0x14, 0x00, // jp end
            0xC9, // end: ret
        ]
    );
    assert!(output.warnings.is_empty());
}

#[test]
fn return_after_loading_sp_from_a_register_is_rejected() {
    let error = compile_decls(vec![func(
        "main",
        vec![ins("ld", vec![reg("sp"), reg("hl")]), ins("ret", vec![])],
    )])
    .expect_err("taint");

    assert_eq!(
        messages(&error),
        vec!["return after an untracked stack pointer change".to_string()]
    );
}

#[test]
fn section_base_can_only_be_set_once() {
    let error = compile_decls(vec![
        section_at(SectionKind::Code, 0x100),
        func("main", vec![ins("ret", vec![])]),
        section_at(SectionKind::Code, 0x200),
    ])
    .expect_err("twice");

    assert_eq!(
        messages(&error),
        vec!["code section base set twice".to_string()]
    );
}

#[test]
fn data_base_falls_back_to_zero_after_a_bad_code_base() {
    let error = compile_decls(vec![
        section_at(SectionKind::Code, 0x1_2345),
        func("main", vec![ins("ret", vec![])]),
        data("x", TypeExpr::Byte, DataInit::Values(vec![ImmExpr::Literal(1)])),
    ])
    .expect_err("unresolved base");

    let messages = messages(&error);
    assert!(
        messages.iter().any(|message| message.contains("code section base 74565")),
        "{messages:?}"
    );
    assert!(
        messages.iter().any(|message| {
            message == "data section base defaults to 0 because the code section base is unresolved"
        }),
        "{messages:?}"
    );
}

#[test]
fn op_called_with_the_wrong_operand_count_is_rejected() {
    let error = compile_decls(vec![
        op("twice", vec![("r", Matcher::Reg8)], vec![ins("nop", vec![])]),
        func("main", vec![ins("twice", vec![reg("a"), reg("b")])]),
    ])
    .expect_err("arity");

    assert_eq!(
        messages(&error),
        vec!["no overload of op 'twice' takes 2 operand(s)".to_string()]
    );
}

#[test]
fn op_without_a_matching_overload_is_rejected() {
    let error = compile_decls(vec![
        op("twice", vec![("r", Matcher::Reg8)], vec![ins("nop", vec![])]),
        func("main", vec![ins("twice", vec![imm(1)])]),
    ])
    .expect_err("no match");

    let diagnostic = &error.diagnostics[0];
    assert_eq!(diagnostic.message, "no matching overload for op 'twice'");
    assert_eq!(error.diagnostics.len(), 1);
}

#[test]
fn alias_cycle_is_reported_with_its_chain() {
    let alias = |name: &str, target: &str| {
        Decl::Var(VarDecl {
            entries: vec![at(VarEntry {
                name: name.to_string(),
                kind: VarKind::Alias(EaExpr::name(target)),
            })],
        })
    };
    let error = compile_decls(vec![
        alias("left", "right"),
        alias("right", "left"),
        load_a_from(EaExpr::name("left")),
    ])
    .expect_err("cycle");

    assert_eq!(
        messages(&error),
        vec!["alias cycle: left -> right -> left".to_string()]
    );
}
