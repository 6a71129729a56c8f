use zax_eval::ImmExpr;

use super::*;
use crate::ast::{ConstDecl, EnumMember, Matcher};
use crate::test_support::{array, at, data, func, konst, op, program, record, var};

fn analyze_ok(decls: Vec<Decl>) -> SemanticModel {
    let mut diagnostics = Vec::new();
    let model = analyze(&program(decls), &mut diagnostics);
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
    model
}

fn analyze_err(decls: Vec<Decl>) -> Vec<String> {
    let mut diagnostics = Vec::new();
    analyze(&program(decls), &mut diagnostics);
    diagnostics
        .into_iter()
        .map(|diagnostic| diagnostic.message)
        .collect()
}

#[test]
fn constants_may_reference_later_constants() {
    let model = analyze_ok(vec![
        Decl::Const(ConstDecl {
            name: "Next".to_string(),
            value: ImmExpr::binary(BinaryOp::Add, ImmExpr::name("BASE"), ImmExpr::Literal(3)),
        }),
        konst("Base", 0x100),
    ]);
    assert_eq!(model.consts.get("next").expect("next").value, 0x103);
    assert_eq!(model.lookup("BASE"), Some(0x100));
}

#[test]
fn enum_members_count_up_from_previous_value() {
    let model = analyze_ok(vec![Decl::Enum(EnumDecl {
        name: "Mode".to_string(),
        members: vec![
            EnumMember {
                name: "Idle".to_string(),
                value: None,
            },
            EnumMember {
                name: "Run".to_string(),
                value: None,
            },
            EnumMember {
                name: "Halt".to_string(),
                value: Some(ImmExpr::Literal(10)),
            },
            EnumMember {
                name: "Reset".to_string(),
                value: None,
            },
        ],
    })]);
    assert_eq!(model.lookup("Mode.Idle"), Some(0));
    assert_eq!(model.lookup("mode.run"), Some(1));
    assert_eq!(model.lookup("Mode.Reset"), Some(11));
    assert_eq!(model.named_type("Mode"), Some(Ty::Byte));
}

#[test]
fn cyclic_constants_are_reported() {
    let errors = analyze_err(vec![
        Decl::Const(ConstDecl {
            name: "A".to_string(),
            value: ImmExpr::name("B"),
        }),
        Decl::Const(ConstDecl {
            name: "B".to_string(),
            value: ImmExpr::name("A"),
        }),
    ]);
    assert_eq!(
        errors,
        vec![
            "constant 'A' depends on itself".to_string(),
            "constant 'B' depends on itself".to_string(),
        ]
    );
}

#[test]
fn record_layout_feeds_sizeof_and_offsetof() {
    let model = analyze_ok(vec![
        Decl::Const(ConstDecl {
            name: "SPRITE_SIZE".to_string(),
            value: ImmExpr::SizeOf("Sprite".to_string()),
        }),
        Decl::Const(ConstDecl {
            name: "TILE_AT".to_string(),
            value: ImmExpr::OffsetOf {
                ty: "Sprite".to_string(),
                path: vec!["tile".to_string()],
            },
        }),
        record(
            "Sprite",
            vec![
                ("pos", TypeExpr::Named("Point".to_string())),
                ("tile", TypeExpr::Byte),
                ("flags", TypeExpr::Word),
            ],
        ),
        record("Point", vec![("x", TypeExpr::Byte), ("y", TypeExpr::Byte)]),
    ]);
    assert_eq!(model.lookup("SPRITE_SIZE"), Some(5));
    assert_eq!(model.lookup("TILE_AT"), Some(2));
    let sprite = model.named_type("sprite").expect("sprite");
    assert_eq!(
        model.field(&sprite, "flags").expect("flags"),
        (3, Ty::Word)
    );
    assert_eq!(
        model.scalar_slots(&sprite).expect("slots"),
        vec![Scalar::Byte, Scalar::Byte, Scalar::Byte, Scalar::Word]
    );
}

#[test]
fn self_containing_record_is_rejected() {
    let errors = analyze_err(vec![record(
        "Node",
        vec![("next", TypeExpr::Named("Node".to_string()))],
    )]);
    assert_eq!(
        errors,
        vec!["type 'Node' is recursive or depends on itself".to_string()]
    );
}

#[test]
fn duplicate_symbols_are_rejected_across_kinds() {
    let errors = analyze_err(vec![
        var("counter", TypeExpr::Byte),
        func("counter", Vec::new()),
    ]);
    assert_eq!(errors, vec!["duplicate symbol 'counter'".to_string()]);
}

#[test]
fn unsized_data_arrays_take_their_length_from_the_initializer() {
    let model = analyze_ok(vec![
        data(
            "table",
            TypeExpr::Array {
                element: Box::new(TypeExpr::Word),
                len: None,
            },
            DataInit::Values(vec![ImmExpr::Literal(1), ImmExpr::Literal(2), ImmExpr::Literal(3)]),
        ),
        data(
            "greeting",
            TypeExpr::Array {
                element: Box::new(TypeExpr::Byte),
                len: None,
            },
            DataInit::Str("hi!".to_string()),
        ),
        var("buffer", array(TypeExpr::Byte, 16)),
    ]);
    assert_eq!(model.storage.get("table").expect("table").size, 6);
    assert_eq!(model.storage.get("greeting").expect("greeting").size, 3);
    assert_eq!(model.storage.get("buffer").expect("buffer").size, 16);
}

#[test]
fn op_overloads_share_a_name() {
    let model = analyze_ok(vec![
        op("clear", vec![("r", Matcher::Reg8)], Vec::new()),
        op("clear", vec![("r", Matcher::Reg16)], Vec::new()),
    ]);
    let overloads = model.ops.get("clear").expect("clear");
    assert_eq!(overloads.len(), 2);
    assert_eq!(overloads[1].ordinal, 1);
    assert_eq!(overloads[1].signature(), "clear(r: reg16)");
}

#[test]
fn functions_cannot_shadow_mnemonics() {
    let errors = analyze_err(vec![func("push", Vec::new())]);
    assert_eq!(
        errors,
        vec!["'push' is an instruction mnemonic and cannot name a function".to_string()]
    );
}

#[test]
fn extern_addresses_are_constant_expressions() {
    let model = analyze_ok(vec![
        konst("ROM_BASE", 0x0000),
        Decl::Extern(crate::ast::ExternDecl {
            base: Some("Bios".to_string()),
            funcs: vec![at(crate::ast::ExternFunc {
                name: "Print".to_string(),
                params: Vec::new(),
                ret: None,
                at: ImmExpr::binary(
                    BinaryOp::Add,
                    ImmExpr::name("ROM_BASE"),
                    ImmExpr::Literal(0x10),
                ),
            })],
        }),
    ]);
    let print = model.callables.get("print").expect("print");
    assert_eq!(
        print.target,
        CallTarget::Extern {
            base: Some("bios".to_string()),
            at: 0x10
        }
    );
}
