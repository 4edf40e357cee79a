// Parser tests: AST shape, precedence, statement forms, error recovery.

use crate::compiler::Compiler;
use crate::compiler::ast::{BinOp, Expr, Stat, UnOp};

fn parse_ok(source: &str) -> crate::compiler::ast::Program {
    let program = Compiler::parse(source, "test");
    assert!(
        program.is_ok(),
        "unexpected syntax errors: {:?}",
        program.errors
    );
    program
}

fn first_expr(source: &str) -> Expr {
    // Wrap in a return so any expression parses as a chunk
    let mut program = parse_ok(&format!("return {}", source));
    match program.block.stats.pop() {
        Some(Stat::Return { mut values, .. }) => values.pop().expect("expression"),
        other => panic!("expected return statement, got {:?}", other),
    }
}

#[test]
fn test_precedence_mul_over_add() {
    let e = first_expr("1 + 2 * 3");
    let Expr::Binary { op: BinOp::Add, rhs, .. } = e else {
        panic!("expected top-level add: {:?}", e);
    };
    assert!(matches!(*rhs, Expr::Binary { op: BinOp::Mul, .. }));
}

#[test]
fn test_comparison_below_arithmetic() {
    let e = first_expr("a + 1 < b * 2");
    assert!(matches!(e, Expr::Binary { op: BinOp::Lt, .. }));
}

#[test]
fn test_pow_right_associative() {
    let e = first_expr("2 ^ 3 ^ 2");
    let Expr::Binary { op: BinOp::Pow, lhs, rhs, .. } = e else {
        panic!("expected pow");
    };
    assert!(matches!(*lhs, Expr::Int(2, _)));
    assert!(matches!(*rhs, Expr::Binary { op: BinOp::Pow, .. }));
}

#[test]
fn test_concat_right_associative() {
    let e = first_expr("'a' .. 'b' .. 'c'");
    let Expr::Binary { op: BinOp::Concat, rhs, .. } = e else {
        panic!("expected concat");
    };
    assert!(matches!(*rhs, Expr::Binary { op: BinOp::Concat, .. }));
}

#[test]
fn test_unary_binds_tighter_than_mul_looser_than_pow() {
    // -2 ^ 2 parses as -(2 ^ 2)
    let e = first_expr("-2 ^ 2");
    let Expr::Unary { op: UnOp::Neg, operand, .. } = e else {
        panic!("expected unary minus on the outside");
    };
    assert!(matches!(*operand, Expr::Binary { op: BinOp::Pow, .. }));
    // not a and b parses as (not a) and b
    let e = first_expr("not a and b");
    assert!(matches!(e, Expr::Binary { op: BinOp::And, .. }));
}

#[test]
fn test_suffix_chains() {
    let e = first_expr("a.b[1].c(2)");
    assert!(matches!(e, Expr::Call { .. }));
}

#[test]
fn test_method_call_is_distinct_node() {
    let e = first_expr("obj:method(1, 2)");
    let Expr::MethodCall { method, args, .. } = e else {
        panic!("expected method call");
    };
    assert_eq!(method.as_str(), "method");
    assert_eq!(args.len(), 2);
}

#[test]
fn test_string_and_table_sole_arguments() {
    assert!(matches!(first_expr("f 'str'"), Expr::Call { args, .. } if args.len() == 1));
    assert!(matches!(first_expr("f { 1, 2 }"), Expr::Call { args, .. } if args.len() == 1));
}

#[test]
fn test_table_constructor_entry_forms() {
    use crate::compiler::ast::TableEntry;
    let e = first_expr("{ 1, x = 2, [3] = 4, 5; }");
    let Expr::Table { entries, .. } = e else {
        panic!("expected table constructor");
    };
    assert_eq!(entries.len(), 4);
    assert!(matches!(entries[0], TableEntry::Item(_)));
    assert!(matches!(entries[1], TableEntry::Named(..)));
    assert!(matches!(entries[2], TableEntry::Keyed(..)));
    assert!(matches!(entries[3], TableEntry::Item(_)));
}

#[test]
fn test_statement_forms_parse() {
    parse_ok("local a, b = 1, 2");
    parse_ok("a, b = b, a");
    parse_ok("if a then b() elseif c then d() else e() end");
    parse_ok("while a do b() end");
    parse_ok("repeat a() until b");
    parse_ok("for i = 1, 10, 2 do print(i) end");
    parse_ok("for k, v in pairs(t) do print(k, v) end");
    parse_ok("do local x = 1 end");
    parse_ok("function a.b.c:d() end");
    parse_ok("local function f() return end");
    parse_ok("goto skip ::skip::");
    parse_ok("while true do break end");
    parse_ok("return 1, 2, 3");
}

#[test]
fn test_local_attributes() {
    use crate::compiler::ast::LocalAttrib;
    let program = parse_ok("local a <const>, b <close> = 1, 2");
    let Stat::Local { names, .. } = &program.block.stats[0] else {
        panic!("expected local statement");
    };
    assert_eq!(names[0].attrib, LocalAttrib::Const);
    assert_eq!(names[1].attrib, LocalAttrib::Close);
}

#[test]
fn test_method_decl_gains_self() {
    let program = parse_ok("function t:m(x) end");
    let Stat::FunctionDecl { body, is_method, .. } = &program.block.stats[0] else {
        panic!("expected function declaration");
    };
    assert!(*is_method);
    assert_eq!(body.params[0].as_str(), "self");
    assert_eq!(body.params[1].as_str(), "x");
}

#[test]
fn test_parser_totality_on_bad_input() {
    // Always a Program, never a panic; errors recorded
    for bad in [
        "if x then",
        "local = 5",
        "1 + 2",
        "function",
        "a b c",
        ")(",
        "local x = ",
        "for in do end",
    ] {
        let program = Compiler::parse(bad, "test");
        assert!(!program.is_ok(), "{:?} should produce errors", bad);
    }
}

#[test]
fn test_error_recovery_reports_multiple() {
    let program = Compiler::parse("local = 1\nlocal = 2", "test");
    assert!(program.errors.len() >= 2);
}

#[test]
fn test_error_locations() {
    let program = Compiler::parse("local x = \nlocal ?", "test");
    assert!(!program.is_ok());
    let has_line_2 = program
        .errors
        .iter()
        .any(|e| e.location.as_ref().map(|l| l.line) == Some(2));
    assert!(has_line_2, "errors: {:?}", program.errors);
}

#[test]
fn test_vararg_only_expression() {
    let e = first_expr("...");
    assert!(matches!(e, Expr::Vararg(_)));
}

#[test]
fn test_paren_truncates_marker() {
    let e = first_expr("(f())");
    assert!(matches!(e, Expr::Paren(..)));
}
