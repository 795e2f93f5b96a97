//! Semantic analyzer tests

use banjo_common::Reports;
use banjo_sir::build::UnitBuilder;
use banjo_sir::{BinaryOp, Decl, ExprKind, Primitive, Stmt, Type, UnaryOp, Unit};
use pretty_assertions::assert_eq;

fn analyze(builder: UnitBuilder) -> (Unit, Reports) {
    let mut unit = builder.finish();
    let mut reports = Reports::new();
    banjo_sema::analyze(&mut unit, &mut reports);
    (unit, reports)
}

#[test]
fn test_simple_function_types_resolve() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let i32_x = b.prim_type(Primitive::I32);
    let i32_y = b.prim_type(Primitive::I32);
    let i32_ret = b.prim_type(Primitive::I32);

    let body = b.func_body(module);
    let x = b.name("x");
    let y = b.name("y");
    let sum = b.binary(BinaryOp::Add, x, y);
    b.return_stmt(body, Some(sum));
    let func = b.add_func(module.block, "add", vec![("x", i32_x), ("y", i32_y)], Some(i32_ret), body);

    let (unit, reports) = analyze(b);
    assert!(reports.is_valid(), "unexpected errors: {:?}", reports.reports);

    let Decl::FuncDef(def) = unit.arena.decl(func) else { panic!() };
    assert_eq!(def.ty.params, vec![Type::Primitive(Primitive::I32); 2]);
    assert_eq!(*def.ty.return_type, Type::Primitive(Primitive::I32));

    // Every analyzed expression must have a concrete type.
    let Some(Stmt::Return(ret)) = unit.arena.block(def.block).stmts.first().map(|s| unit.arena.stmt(*s))
    else {
        panic!()
    };
    let value = ret.value.unwrap();
    assert!(!unit.arena.expr(value).ty.is_pseudo());
    assert_eq!(unit.arena.expr(value).ty, Type::Primitive(Primitive::I32));
}

#[test]
fn test_int_literal_defaults_to_i32() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let body = b.func_body(module);
    let value = b.int(7);
    b.var_stmt(body, "x", None, value);
    b.add_func(module.block, "f", vec![], None, body);

    let (unit, reports) = analyze(b);
    assert!(reports.is_valid());
    assert_eq!(unit.arena.expr(value).ty, Type::Primitive(Primitive::I32));
}

#[test]
fn test_type_mismatch_reports_both_types() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let bool_type = b.prim_type(Primitive::Bool);
    let body = b.func_body(module);
    let value = b.int(1);
    let pointer = b.prim_type(Primitive::I32);
    let pointer = b.pointer_type(pointer);
    b.var_stmt(body, "x", Some(pointer), value);
    let _ = bool_type;
    b.add_func(module.block, "f", vec![], None, body);

    let (_, reports) = analyze(b);
    assert!(reports.has_errors());
    let message = &reports.errors().next().unwrap().message;
    assert!(message.contains("type mismatch"), "got: {}", message);
    assert!(message.contains("*i32"), "got: {}", message);
}

#[test]
fn test_redefinition_carries_note() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    // Two locals named 'x' in the same block.
    let body = b.func_body(module);
    let first = b.int(0);
    b.var_stmt(body, "x", None, first);
    let second = b.int(1);
    b.var_stmt(body, "x", None, second);
    b.add_func(module.block, "g", vec![], None, body);

    let (_, reports) = analyze(b);
    assert!(reports.has_errors());
    let report = reports.errors().next().unwrap();
    assert!(report.message.contains("redefinition"));
    assert!(report.note.is_some());
}

#[test]
fn test_break_outside_loop_is_an_error() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let body = b.func_body(module);
    let stmt = b.stmt(Stmt::Break(banjo_common::Span::synthetic()));
    b.push_stmt(body, stmt);
    b.add_func(module.block, "f", vec![], None, body);

    let (_, reports) = analyze(b);
    assert!(reports.has_errors());
    assert!(reports.errors().next().unwrap().message.contains("break"));
}

#[test]
fn test_pointer_to_local_escape_is_diagnosed() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    // func f() -> *i32 { var x = 5; return &x; }
    let i32_type = b.prim_type(Primitive::I32);
    let return_type = b.pointer_type(i32_type);

    let body = b.func_body(module);
    let five = b.int(5);
    b.var_stmt(body, "x", None, five);
    let x = b.name("x");
    let addr = b.unary(UnaryOp::Addr, x);
    b.return_stmt(body, Some(addr));
    b.add_func(module.block, "f", vec![], Some(return_type), body);

    let (_, reports) = analyze(b);
    assert!(reports.has_errors());
    let message = &reports.errors().next().unwrap().message;
    assert!(message.contains("pointer to local escapes"), "got: {}", message);
}

#[test]
fn test_optional_coercion_wraps_value() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    // var x: ?i32 = 42;
    let i32_type = b.prim_type(Primitive::I32);
    let optional = b.optional_type(i32_type);

    let body = b.func_body(module);
    let value = b.int(42);
    b.var_stmt(body, "x", Some(optional), value);
    b.add_func(module.block, "f", vec![], None, body);

    let (unit, reports) = analyze(b);
    assert!(reports.is_valid(), "unexpected errors: {:?}", reports.reports);

    // The initializer became a call to the Optional constructor.
    assert!(matches!(
        unit.arena.expr(value).kind,
        ExprKind::Call { .. }
    ));
    assert!(matches!(unit.arena.expr(value).ty, Type::Struct(_)));
}

#[test]
fn test_generic_function_specializes_per_argument_type() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    // func id[T](x: T) -> T { return x; }
    let t_param = b.name("T");
    let t_return = b.name("T");
    let id_body = b.func_body(module);
    let x = b.name("x");
    b.return_stmt(id_body, Some(x));
    let id = b.add_generic_func(
        module.block,
        "id",
        vec!["T"],
        vec![("x", t_param)],
        Some(t_return),
        id_body,
    );

    // main calls id(42) and id[f64](3.5).
    let body = b.func_body(module);
    let callee = b.name("id");
    let forty_two = b.int(42);
    let int_call = b.call(callee, vec![forty_two]);
    b.expr_stmt(body, int_call);

    let callee = b.name("id");
    let f64_type = b.prim_type(Primitive::F64);
    let specialized = b.bracket(callee, vec![f64_type]);
    let three_point_five = b.fp(3.5);
    let fp_call = b.call(specialized, vec![three_point_five]);
    b.expr_stmt(body, fp_call);

    b.add_func(module.block, "main", vec![], None, body);

    let (unit, reports) = analyze(b);
    assert!(reports.is_valid(), "unexpected errors: {:?}", reports.reports);

    // Two monomorphic specializations of the generic definition exist.
    let mut specializations = Vec::new();
    for index in 0..unit.arena.num_decls() {
        if let Decl::FuncDef(def) = unit.arena.decl(banjo_sir::DeclId(index as u32)) {
            if def.specialization_of == Some(id) {
                specializations.push(def.specialization_args.clone());
            }
        }
    }

    assert_eq!(specializations.len(), 2);
    assert!(specializations.contains(&vec![Type::Primitive(Primitive::I32)]));
    assert!(specializations.contains(&vec![Type::Primitive(Primitive::F64)]));
}

#[test]
fn test_try_requires_result_or_optional() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let body = b.func_body(module);
    let tried = b.int(3);
    let success_table = b.unit.arena.alloc_table(banjo_sir::SymbolTable::new(None));
    let success_block = b.unit.arena.alloc_block(banjo_sir::Block {
        stmts: Vec::new(),
        table: success_table,
        span: banjo_common::Span::synthetic(),
    });
    let stmt = b.stmt(Stmt::Try(banjo_sir::TryStmt {
        ident: banjo_sir::Ident::new("v", banjo_common::Span::synthetic()),
        expr: tried,
        success_block,
        except_ident: None,
        except_block: None,
        else_block: None,
        lowered: None,
        span: banjo_common::Span::synthetic(),
    }));
    b.push_stmt(body, stmt);
    b.add_func(module.block, "f", vec![], None, body);

    let (_, reports) = analyze(b);
    assert!(reports.has_errors());
    assert!(reports
        .errors()
        .next()
        .unwrap()
        .message
        .contains("Result or Optional"));
}

#[test]
fn test_meta_if_selects_branch_at_decl_level() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    // meta if true { func chosen() } else { func skipped() }
    let condition = b.boolean(true);

    let then_table = b.unit.arena.alloc_table(banjo_sir::SymbolTable::new(Some(module.table)));
    let then_block = b.unit.arena.alloc_decl_block(banjo_sir::DeclBlock {
        decls: Vec::new(),
        table: then_table,
        span: banjo_common::Span::synthetic(),
    });
    let chosen_body = b.func_body(module);
    let chosen = b.unit.arena.alloc_decl(Decl::FuncDef(banjo_sir::FuncDef {
        ident: banjo_sir::Ident::new("chosen", banjo_common::Span::synthetic()),
        generic_params: Vec::new(),
        params: Vec::new(),
        return_type_expr: None,
        ty: banjo_sir::FuncType::new(Vec::new(), Type::Primitive(Primitive::Void)),
        block: chosen_body,
        exported: false,
        specialization_of: None,
        specialization_args: Vec::new(),
        span: banjo_common::Span::synthetic(),
    }));
    b.unit.arena.decl_block_mut(then_block).decls.push(chosen);

    b.push_decl(
        module.block,
        Decl::MetaIf(banjo_sir::MetaIfDecl {
            condition,
            then_block,
            else_block: None,
            expanded: None,
            span: banjo_common::Span::synthetic(),
        }),
    );

    let (unit, reports) = analyze(b);
    assert!(reports.is_valid(), "unexpected errors: {:?}", reports.reports);

    // The selected declaration is visible in the module scope; the user
    // module precedes the installed std module.
    let module_table = unit.arena.decl_block(unit.mods[0].block).table;
    assert!(unit.arena.lookup(module_table, "chosen").is_some());
}
