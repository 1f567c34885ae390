//! Fixture tests that run the whole pipeline in-process: lex -> parse ->
//! build IR -> lower to machine code -> (for the full chain) wrap into an
//! ELF64 executable. These exercise the six literal scenarios and two of
//! the boundary behaviors from the working spec's "Testable Properties"
//! section, all without shelling out to any toolchain or running the
//! resulting binary.

use moneylang::back::{self, LowerOptions, StdlibImage};
use moneylang::error::Error;
use moneylang::front::ast::Ast;
use moneylang::front::lex::lex;
use moneylang::front::name_table::NameTable;
use moneylang::front::parse::parse;
use moneylang::middle::{self, IrOp};

fn compile_to_ir(src: &str, taxes: bool) -> (moneylang::middle::IrProgram, NameTable) {
    let mut names = NameTable::new(256, 2048);
    let file = internment::Intern::new("fixture.mn".to_string());
    let tokens = lex(src, file, &mut names, 4096).expect("lex");
    let mut ast = Ast::new(4096);
    parse(&tokens, &mut names, &mut ast).expect("parse");
    let ir = middle::build(&ast, &mut names, taxes, 4096).expect("build");
    (ir, names)
}

fn try_compile_to_ir(src: &str) -> Result<(moneylang::middle::IrProgram, NameTable), Error> {
    let mut names = NameTable::new(256, 2048);
    let file = internment::Intern::new("fixture.mn".to_string());
    let tokens = lex(src, file, &mut names, 4096)?;
    let mut ast = Ast::new(4096);
    parse(&tokens, &mut names, &mut ast)?;
    let ir = middle::build(&ast, &mut names, false, 4096)?;
    Ok((ir, names))
}

/// A stdlib image small enough to lower against, without a real prebuilt
/// binary on disk: only its entry addresses matter for the tests here,
/// which check the shape of the lowered output, not that it actually runs.
fn fake_stdlib() -> StdlibImage {
    StdlibImage {
        code: vec![0x90; 32],
        in_addr: -32,
        out_addr: -16,
    }
}

fn bind_stdlib_addresses(names: &mut NameTable, stdlib: &StdlibImage) {
    for (symbol, addr) in [("__stdlib_in", stdlib.in_addr), ("__stdlib_out", stdlib.out_addr)] {
        if let Some(id) = names.find(internment::Intern::new(symbol.to_string())) {
            names.set_address(id, addr);
        }
    }
}

fn push_imms(ir: &moneylang::middle::IrProgram) -> Vec<f64> {
    ir.iter_ids()
        .filter_map(|id| match ir.get(id).op {
            IrOp::PushImm(v) => Some(v),
            _ => None,
        })
        .collect()
}

// ---- §8 scenario 1: integer add ---------------------------------------

#[test]
fn scenario_integer_add() {
    let (mut ir, mut names) = compile_to_ir("Account x % x = 3\u{20BD} + 4\u{20BD} % ShowBalance x %", false);
    assert_eq!(push_imms(&ir), vec![3.0, 4.0]);
    assert!(ir.iter_ids().any(|id| matches!(ir.get(id).op, IrOp::Add)));

    let stdlib = fake_stdlib();
    bind_stdlib_addresses(&mut names, &stdlib);
    let opts = LowerOptions { emit_asm: false, emit_listing: false };
    let lowered = back::lower(&mut ir, &mut names, &opts).expect("lower");
    assert!(!lowered.code.is_empty());

    let exe = back::elf::build_executable(&stdlib.code, &lowered.code);
    assert_eq!(&exe[0..4], &[0x7F, b'E', b'L', b'F']);
    let entry = u64::from_le_bytes(exe[24..32].try_into().unwrap());
    assert_eq!(entry, 0x401000 + stdlib.code.len() as u64);
}

// ---- §8 scenario 2: dollar conversion ----------------------------------

#[test]
fn scenario_dollar_conversion() {
    let (ir, _) = compile_to_ir("Account y % y = 2$ % ShowBalance y %", false);
    assert_eq!(push_imms(&ir), vec![70.0]);
}

// ---- §8 scenario 3: while loop ------------------------------------------

#[test]
fn scenario_while_loop() {
    let (ir, _) = compile_to_ir(
        "Account i % i = 0\u{20BD} % while i < 3\u{20BD} -> < ShowBalance i % i = i + 1\u{20BD} % >",
        false,
    );
    assert!(ir.iter_ids().any(|id| matches!(
        ir.get(id).op,
        IrOp::Cmp(moneylang::middle::ir::CmpKind::Lt)
    )));
    let jmps = ir.iter_ids().filter(|&id| matches!(ir.get(id).op, IrOp::Jmp(_))).count();
    let jzs = ir.iter_ids().filter(|&id| matches!(ir.get(id).op, IrOp::Jz(_))).count();
    assert_eq!(jmps, 1, "one backward jump closing the loop body");
    assert_eq!(jzs, 1, "one forward jump out of the loop");
}

// ---- §8 scenario 4: if/else with Invest ---------------------------------

#[test]
fn scenario_if_else_with_invest() {
    let (mut ir, mut names) = compile_to_ir(
        "Account x % Invest x % if x > 0\u{20BD} -> ShowBalance 1\u{20BD} % else ShowBalance 0\u{20BD} %",
        false,
    );
    assert!(names.find(internment::Intern::new("__stdlib_in".to_string())).is_some());
    assert!(names.find(internment::Intern::new("__stdlib_out".to_string())).is_some());

    let stdlib = fake_stdlib();
    bind_stdlib_addresses(&mut names, &stdlib);
    let opts = LowerOptions { emit_asm: true, emit_listing: false };
    let lowered = back::lower(&mut ir, &mut names, &opts).expect("lower");
    let asm = lowered.asm.unwrap();
    assert!(asm.contains("IF0_ELSE"));
    assert!(asm.contains("IF0_END"));
}

// ---- §8 scenario 5: function call ---------------------------------------

#[test]
fn scenario_function_call() {
    let (mut ir, mut names) = compile_to_ir(
        "Transaction a, b -> add -> Pay a + b % Account r % r = add(2\u{20BD}, 3\u{20BD}) % ShowBalance r %",
        false,
    );
    let stdlib = fake_stdlib();
    bind_stdlib_addresses(&mut names, &stdlib);
    let opts = LowerOptions { emit_asm: false, emit_listing: false };
    let lowered = back::lower(&mut ir, &mut names, &opts).expect("lower");

    // The call site's resolved rel32 must agree with target - (self + 5),
    // both read back off the now-lowered IR (§8 "Jump encoding").
    let add_id = names.find(internment::Intern::new("add".to_string())).unwrap();
    let call_id = ir
        .iter_ids()
        .find(|&id| matches!(ir.get(id).op, IrOp::Call { callee } if callee == add_id))
        .expect("a CALL node targeting `add` exists");
    let target = names.get(add_id).address;
    let call_instr = ir.get(call_id);
    let expected_rel = target - (call_instr.start_offset as i64 + 5);
    let call_site = call_instr.start_offset as usize;
    let rel_bytes: [u8; 4] = lowered.code[call_site + 1..call_site + 5].try_into().unwrap();
    assert_eq!(i32::from_le_bytes(rel_bytes), expected_rel as i32);
}

// ---- §8 scenario 6: scope error -----------------------------------------

#[test]
fn scenario_scope_error_after_block_exit() {
    let err = try_compile_to_ir("if 1\u{20BD} > 0\u{20BD} -> < Account t % t = 1\u{20BD} % > ShowBalance t %")
        .unwrap_err();
    match err {
        Error::Scope { name, .. } => assert_eq!(name, "t"),
        other => panic!("expected a Scope error, got {other:?}"),
    }
}

// ---- boundary behaviors --------------------------------------------------

#[test]
fn single_top_level_statement_needs_no_blocks() {
    let (ir, _) = compile_to_ir("Account x %", false);
    assert!(ir.iter_ids().any(|id| matches!(ir.get(id).op, IrOp::VarDecl)));
}

#[test]
fn zero_arg_function_rejects_any_argument() {
    let err = try_compile_to_ir("Transaction -> f -> Pay 1\u{20BD} % Account r % r = f(1\u{20BD}) %").unwrap_err();
    assert!(matches!(err, Error::ArgsCount { expected: 0, found: 1, .. }));
}

#[test]
fn ast_file_round_trips_through_the_whole_frontend() {
    let mut names = NameTable::new(256, 2048);
    let file = internment::Intern::new("fixture.mn".to_string());
    let src = "Transaction a, b -> add -> Pay a + b % Account r % r = add(2\u{20BD}, 3\u{20BD}) % ShowBalance r %";
    let tokens = lex(src, file, &mut names, 4096).unwrap();
    let mut ast = Ast::new(4096);
    parse(&tokens, &mut names, &mut ast).unwrap();

    let text = moneylang::ast_io::write(&ast, &names);
    let (ast2, mut names2) = moneylang::ast_io::read(&text, 4096, 256, 2048).unwrap();

    // Both trees must build to the same IR op sequence end to end.
    let ir1 = middle::build(&ast, &mut names, false, 4096).unwrap();
    let ir2 = middle::build(&ast2, &mut names2, false, 4096).unwrap();
    let kinds = |ir: &moneylang::middle::IrProgram| {
        ir.iter_ids().map(|id| std::mem::discriminant(&ir.get(id).op)).collect::<Vec<_>>()
    };
    assert_eq!(kinds(&ir1), kinds(&ir2));
}

#[test]
fn taxes_flag_is_threaded_through_end_to_end() {
    let (ir, _) = compile_to_ir("Transaction -> f -> Pay 10\u{20BD} % Account r % r = f() %", true);
    assert!(push_imms(&ir).iter().any(|&v| (v - 0.8).abs() < f64::EPSILON));
}

#[test]
fn txt_statement_lexes_and_builds() {
    let (ir, _) = compile_to_ir("Txt \"label\" % ShowBalance 1\u{20BD} %", false);
    assert_eq!(push_imms(&ir), vec![1.0]);
}

#[test]
fn nested_block_not_last_in_parent_does_not_panic() {
    let (ir, _) = compile_to_ir(
        "< < Account a % Account b % > Account c % >",
        false,
    );
    assert_eq!(ir.iter_ids().filter(|&id| matches!(ir.get(id).op, IrOp::VarDecl)).count(), 3);
}
