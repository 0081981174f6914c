//! End-to-end tests for the conditional-aware analyzer.
//!
//! Each test parses a small translation unit and checks the symbol index
//! and the conditions attached to it.

use cbranch::cli::{list_unit, run_help, LsArgs};
use cbranch::symbol::{Family, Linkage, Origin, Query};
use cbranch::unit::{Analyzer, TranslationUnit};

fn analyze(source: &str) -> TranslationUnit {
    Analyzer::new().analyze_source("test.c", source).unwrap()
}

fn by_name<'a>(unit: &'a TranslationUnit, name: &str) -> Vec<&'a cbranch::symbol::Symbol> {
    unit.index.find(&Query { identifier: Some(name.to_string()), ..Default::default() })
}

// ─── Conditional branching ─────────────────────────────────────────────

#[test]
fn ifdef_else_splits_symbols() {
    let unit = analyze("#define FOO 1\n#ifdef BAR\nint x;\n#else\nint y;\n#endif\n");
    let conds = unit.conditions();

    let foo = by_name(&unit, "FOO");
    assert_eq!(foo.len(), 1);
    assert_eq!(foo[0].family, Family::MacroObject);
    assert!(conds.is_top(foo[0].existence));

    let x = by_name(&unit, "x");
    assert_eq!(x.len(), 1);
    assert!(conds.equivalent(x[0].existence, conds.defined("BAR")));

    let y = by_name(&unit, "y");
    assert_eq!(y.len(), 1);
    assert!(conds.equivalent(y[0].existence, -conds.defined("BAR")));
}

#[test]
fn repeated_identical_conditionals_merge() {
    let unit = analyze("#if A\nint x;\n#endif\n#if A\nint x;\n#endif\n");
    let conds = unit.conditions();

    let x = by_name(&unit, "x");
    assert_eq!(x.len(), 1, "duplicate declarations must not add symbols");
    assert!(conds.equivalent(x[0].existence, conds.value("A")));
}

#[test]
fn elif_chain_accumulates_complements() {
    let unit = analyze("#if A\nint x;\n#elif B\nint x;\n#endif\n");
    let conds = unit.conditions();

    let x = by_name(&unit, "x");
    assert_eq!(x.len(), 1);
    let a = conds.value("A");
    let b = conds.value("B");
    let expected = conds.disjunction(a, conds.conjunction(-a, b));
    assert!(conds.equivalent(x[0].existence, expected));
}

#[test]
fn conflicting_arms_are_diagnosed() {
    let unit = analyze("#if A\nint x;\n#else\nfloat x;\n#endif\n");
    assert!(unit
        .diagnostics
        .iter()
        .any(|d| d.message.contains("conflicting symbols at x")));

    // Both shapes stay indexed; their conditions cover everything.
    let x = by_name(&unit, "x");
    assert_eq!(x.len(), 2);
    let conds = unit.conditions();
    let union = conds.disjunction(x[0].existence, x[1].existence);
    assert!(conds.is_top(union));
}

#[test]
fn parsing_resumes_unconditionally_after_endif() {
    let unit = analyze("#if A\nint x;\n#endif\nint y;\n");
    let conds = unit.conditions();

    let y = by_name(&unit, "y");
    assert_eq!(y.len(), 1);
    assert!(conds.is_top(y[0].existence), "y must not inherit the conditional");
}

#[test]
fn declaration_split_across_conditional_arms() {
    let unit = analyze("int\n#if A\nx;\n#else\ny;\n#endif\n");
    let conds = unit.conditions();

    let x = by_name(&unit, "x");
    assert_eq!(x.len(), 1);
    assert!(conds.equivalent(x[0].existence, conds.value("A")));
    assert_eq!(x[0].type_info.specifiers, "int");

    let y = by_name(&unit, "y");
    assert_eq!(y.len(), 1);
    assert!(conds.equivalent(y[0].existence, -conds.value("A")));
}

#[test]
fn nested_conditionals_conjoin() {
    let unit = analyze("#ifdef A\n#ifdef B\nint ab;\n#endif\nint a;\n#endif\n");
    let conds = unit.conditions();

    let ab = by_name(&unit, "ab");
    let expected = conds.conjunction(conds.defined("A"), conds.defined("B"));
    assert!(conds.equivalent(ab[0].existence, expected));

    let a = by_name(&unit, "a");
    assert!(conds.equivalent(a[0].existence, conds.defined("A")));
}

#[test]
fn unbalanced_braces_keep_branches_apart() {
    let source = "#if A\nvoid f() {\n#endif\nint g;\n}\nint tail;\n";
    let unit = analyze(source);
    let conds = unit.conditions();

    // `g` is a local under A and a file-scope variable under !A.
    let g = by_name(&unit, "g");
    assert_eq!(g.len(), 2);
    let origins: Vec<&Origin> = g.iter().map(|s| &s.origin).collect();
    assert!(origins.contains(&&Origin::Function("f".to_string())));
    assert!(origins.contains(&&Origin::File));

    // After the closing brace the branches reconverge.
    let tail = by_name(&unit, "tail");
    assert_eq!(tail.len(), 1);
    assert!(conds.is_top(tail[0].existence));
}

#[test]
fn else_of_impossible_condition_is_unconditional() {
    let unit = analyze("#if 0\nint dead;\n#else\nint live;\n#endif\n");
    let conds = unit.conditions();

    assert!(by_name(&unit, "dead").is_empty());
    let live = by_name(&unit, "live");
    assert_eq!(live.len(), 1);
    assert!(conds.is_top(live[0].existence));
}

// ─── Order independence ────────────────────────────────────────────────

#[test]
fn conditional_order_does_not_change_the_index() {
    let first = analyze("#ifdef A\nint x;\n#endif\n#ifdef B\nint y;\n#endif\n");
    let second = analyze("#ifdef B\nint y;\n#endif\n#ifdef A\nint x;\n#endif\n");

    for name in ["x", "y"] {
        let a = by_name(&first, name);
        let b = by_name(&second, name);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        // The two units share no table, so compare renderings.
        assert_eq!(
            first.display_cond(a[0].existence),
            second.display_cond(b[0].existence)
        );
    }
}

// ─── Declarations, definitions, scopes ─────────────────────────────────

#[test]
fn functions_parameters_and_locals() {
    let source = "int add(int a, long b) {\n  int sum = a + b;\n  return sum;\n}\n";
    let unit = analyze(source);

    let add = by_name(&unit, "add");
    assert_eq!(add.len(), 1);
    assert_eq!(add[0].family, Family::Function);
    assert_eq!(add[0].linkage, Linkage::External);
    assert_eq!(add[0].definitions.len(), 1);

    let sig = add[0].signature.as_ref().unwrap();
    assert!(sig.complete());
    assert_eq!(sig.params.len(), 2);
    assert_eq!(sig.params[0].type_text, "int");
    assert_eq!(sig.params[0].name.as_deref(), Some("a"));
    assert_eq!(sig.params[1].type_text, "long");

    let sum = by_name(&unit, "sum");
    assert_eq!(sum.len(), 1);
    assert_eq!(sum[0].origin, Origin::Function("add".to_string()));
    assert_eq!(sum[0].linkage, Linkage::None);
}

#[test]
fn typedef_struct_and_enum() {
    let source = "typedef struct node { int value; } node_t;\n\
                  enum color { RED, GREEN = 2, BLUE };\n";
    let unit = analyze(source);

    let node = by_name(&unit, "node");
    assert_eq!(node.len(), 1);
    assert_eq!(node[0].family, Family::TagStruct);
    assert_eq!(node[0].definitions.len(), 1);

    let node_t = by_name(&unit, "node_t");
    assert_eq!(node_t[0].family, Family::Typedef);
    assert_eq!(node_t[0].linkage, Linkage::Typedef);
    assert_eq!(node_t[0].type_info.specifiers, "struct node");

    let color = by_name(&unit, "color");
    assert_eq!(color[0].family, Family::TagEnum);

    for name in ["RED", "GREEN", "BLUE"] {
        let found = by_name(&unit, name);
        assert_eq!(found.len(), 1, "missing enumerator {}", name);
        assert_eq!(found[0].family, Family::EnumConstant);
    }
    // `value` is a member, not an indexed symbol.
    assert!(by_name(&unit, "value").is_empty());
}

#[test]
fn storage_classes_drive_linkage() {
    let unit = analyze("static int internal;\nextern int external;\nint defaulted;\n");
    assert_eq!(by_name(&unit, "internal")[0].linkage, Linkage::Internal);
    assert_eq!(by_name(&unit, "external")[0].linkage, Linkage::External);
    assert_eq!(by_name(&unit, "defaulted")[0].linkage, Linkage::External);
}

#[test]
fn declarator_lists_and_initializers() {
    let unit = analyze("int x = 1, *p, v[4];\n");

    let x = by_name(&unit, "x");
    assert_eq!(x[0].definitions.len(), 1);

    let p = by_name(&unit, "p");
    assert_eq!(p[0].type_info.pointer, 1);
    assert!(p[0].definitions.is_empty());

    let v = by_name(&unit, "v");
    assert!(v[0].type_info.array);
}

#[test]
fn labels_inside_functions() {
    let source = "void f(void) {\n  goto done;\ndone:\n  return;\n}\n";
    let unit = analyze(source);

    let done = by_name(&unit, "done");
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].family, Family::Label);
    assert_eq!(done[0].origin, Origin::Function("f".to_string()));
}

#[test]
fn function_like_macros() {
    let unit = analyze("#define MAX(a, b) ((a) > (b) ? (a) : (b))\n#define EMPTY\n");

    let max = by_name(&unit, "MAX");
    assert_eq!(max[0].family, Family::MacroFunction);
    assert!(max[0].type_info.specifiers.starts_with("(a, b)"));

    let empty = by_name(&unit, "EMPTY");
    assert_eq!(empty[0].family, Family::MacroObject);
}

// ─── Tokenizer integration ─────────────────────────────────────────────

#[test]
fn multiline_comment_then_code() {
    let source = "/* spans\nthree\nlines */ int after;\n";
    let unit = analyze(source);

    assert_eq!(unit.comments.len(), 1);
    assert_eq!(unit.comments[0].token.text, "/* spans\nthree\nlines */");

    let after = by_name(&unit, "after");
    assert_eq!(after.len(), 1);
}

#[test]
fn spliced_define_is_one_logical_line() {
    let unit = analyze("#define LONG \\\n  1\nint x;\n");
    let long = by_name(&unit, "LONG");
    assert_eq!(long.len(), 1);
    assert_eq!(long[0].type_info.specifiers, "1");
    assert_eq!(by_name(&unit, "x").len(), 1);
}

// ─── Track stream ──────────────────────────────────────────────────────

#[test]
fn track_records_fork_and_join() {
    let unit = analyze("#ifdef A\nint x;\n#else\nint y;\n#endif\n");
    let mut out = Vec::new();
    unit.track.write_jsonl(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains(r#""kind":"ccbranch_fork""#));
    assert!(text.contains(r#""kind":"ccbranch_join""#));
    assert!(text.contains(r#""kind":"ccbranch_join_forks""#));
    assert!(text.contains(r#""kind":"logic_line_pursue""#));
    assert!(text.contains(r#""condition":"defined(A)""#));
}

// ─── CLI surface ───────────────────────────────────────────────────────

#[test]
fn help_semantics() {
    let mut out = Vec::new();
    run_help(None, &mut out).unwrap();
    let listing = String::from_utf8(out).unwrap();
    assert!(listing.lines().count() >= 2);
    assert!(listing.lines().all(|l| l.contains("\t- ")));

    let mut out = Vec::new();
    run_help(Some("bogus"), &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "Unknown command: `bogus'\n");
}

#[test]
fn ls_each_lists_declarations_and_definitions() {
    let unit = analyze("int x = 1;\nint x;\n");
    let args = LsArgs { each: true, ..Default::default() };
    let lines = list_unit(&unit, &args);
    assert!(lines.iter().any(|l| l.contains("decl")));
    assert!(lines.iter().any(|l| l.contains("defn")));
}
