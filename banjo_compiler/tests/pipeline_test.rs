//! End-to-end pipeline tests: SIR units through analysis, SSA, machine
//! passes and object encoding.

use banjo_compiler::{CompilerConfig, Compiler};
use banjo_sir::build::UnitBuilder;
use banjo_sir::{BinaryOp, Primitive, Unit};
use banjo_target::{Arch, OperatingSystem};
use pretty_assertions::assert_eq;

fn linux_x86_64_config() -> CompilerConfig {
    CompilerConfig {
        arch: Arch::X86_64,
        os: OperatingSystem::Linux,
        ..Default::default()
    }
}

fn compile(config: &CompilerConfig, unit: Unit) -> Vec<u8> {
    let mut compiler = Compiler::new(config);
    let result = compiler.compile(unit).expect("pipeline error");
    assert!(
        compiler.reports.is_valid(),
        "diagnostics: {:?}",
        compiler.reports.reports
    );
    result.expect("no output produced")
}

/// Builds: extern puts(*u8) -> i32; func main() -> i32 { puts("Hello,
/// World!"); return 0; }
fn hello_world_unit() -> Unit {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let u8_type = b.prim_type(Primitive::U8);
    let cstr_type = b.pointer_type(u8_type);
    let i32_ret = b.prim_type(Primitive::I32);

    let puts = banjo_sir::FuncDecl {
        ident: banjo_sir::Ident::new("puts", banjo_common::Span::synthetic()),
        params: vec![banjo_sir::Param {
            ident: banjo_sir::Ident::new("s", banjo_common::Span::synthetic()),
            type_expr: cstr_type,
            ty: banjo_sir::Type::Error,
        }],
        return_type_expr: Some(i32_ret),
        ty: banjo_sir::FuncType::new(Vec::new(), banjo_sir::Type::Primitive(Primitive::Void)),
        span: banjo_common::Span::synthetic(),
    };
    b.push_decl(module.block, banjo_sir::Decl::FuncDecl(puts));

    let main_ret = b.prim_type(Primitive::I32);
    let body = b.func_body(module);
    let callee = b.name("puts");
    let message = b.string("Hello, World!");
    let call = b.call(callee, vec![message]);
    b.expr_stmt(body, call);
    let zero = b.int(0);
    b.return_stmt(body, Some(zero));
    b.add_func(module.block, "main", vec![], Some(main_ret), body);

    b.finish()
}

#[test]
fn test_hello_world_linux_object() {
    let config = linux_x86_64_config();
    let bytes = compile(&config, hello_world_unit());

    // A relocatable ELF64 object for x86-64.
    assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
    assert_eq!(bytes[4], 2);
    assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 1);
    assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 62);

    // The C string lands in the object with its terminator.
    let needle = b"Hello, World!\0";
    assert!(
        bytes.windows(needle.len()).any(|window| window == needle),
        "string constant missing from object"
    );

    // Both symbol names appear in the string table.
    assert!(bytes.windows(4).any(|w| w == b"puts"));
    assert!(bytes.windows(4).any(|w| w == b"main"));
}

#[test]
fn test_hello_world_windows_object() {
    let config = CompilerConfig {
        arch: Arch::X86_64,
        os: OperatingSystem::Windows,
        ..Default::default()
    };
    let bytes = compile(&config, hello_world_unit());

    // COFF machine type for x86-64 plus the standard section set.
    assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 0x8664);
    assert!(bytes.windows(5).any(|w| w == b".text"));
    assert!(bytes.windows(6).any(|w| w == b".pdata"));
    assert!(bytes.windows(6).any(|w| w == b".xdata"));
}

#[test]
fn test_generic_identity_produces_two_specializations() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let t_param = b.name("T");
    let t_return = b.name("T");
    let id_body = b.func_body(module);
    let x = b.name("x");
    b.return_stmt(id_body, Some(x));
    b.add_generic_func(
        module.block,
        "id",
        vec!["T"],
        vec![("x", t_param)],
        Some(t_return),
        id_body,
    );

    let body = b.func_body(module);
    let callee = b.name("id");
    let value = b.int(42);
    let int_call = b.call(callee, vec![value]);
    b.expr_stmt(body, int_call);

    let callee = b.name("id");
    let f64_type = b.prim_type(Primitive::F64);
    let specialized = b.bracket(callee, vec![f64_type]);
    let value = b.fp(3.5);
    let fp_call = b.call(specialized, vec![value]);
    b.expr_stmt(body, fp_call);
    b.add_func(module.block, "main", vec![], None, body);

    let mut unit = b.finish();
    let mut reports = banjo_common::Reports::new();
    banjo_sema::analyze(&mut unit, &mut reports);
    assert!(reports.is_valid(), "diagnostics: {:?}", reports.reports);

    let ssa = banjo_ssa::gen::generate(&unit, banjo_ssa::CallingConv::X86_64SysV);
    banjo_ssa::verify::verify_module(&ssa).expect("invalid SSA");

    let names: Vec<&str> = ssa.functions.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"main.id[i32]"), "functions: {:?}", names);
    assert!(names.contains(&"main.id[f64]"), "functions: {:?}", names);

    // The whole thing still encodes into an object.
    let config = linux_x86_64_config();
    let bytes = compile(&config, {
        let mut b = UnitBuilder::new();
        let module = b.create_module(&["main"]);
        let t_param = b.name("T");
        let t_return = b.name("T");
        let id_body = b.func_body(module);
        let x = b.name("x");
        b.return_stmt(id_body, Some(x));
        b.add_generic_func(
            module.block,
            "id",
            vec!["T"],
            vec![("x", t_param)],
            Some(t_return),
            id_body,
        );
        let body = b.func_body(module);
        let callee = b.name("id");
        let value = b.int(42);
        let call = b.call(callee, vec![value]);
        b.expr_stmt(body, call);
        b.add_func(module.block, "main", vec![], None, body);
        b.finish()
    });
    assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
}

#[test]
fn test_result_try_dispatches_on_discriminant() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    // func compute() -> Result[i32, i32] { return 7; }
    let value_type = b.prim_type(Primitive::I32);
    let error_type = b.prim_type(Primitive::I32);
    let result_type = b.result_type(value_type, error_type);
    let compute_body = b.func_body(module);
    let seven = b.int(7);
    b.return_stmt(compute_body, Some(seven));
    b.add_func(module.block, "compute", vec![], Some(result_type), compute_body);

    // func main() -> i32 { try v = compute() except e { return e; }
    //                      return v; }
    let main_ret = b.prim_type(Primitive::I32);
    let body = b.func_body(module);

    let callee = b.name("compute");
    let call = b.call(callee, vec![]);

    let success_table = b
        .unit
        .arena
        .alloc_table(banjo_sir::SymbolTable::new(None));
    let success_block = b.unit.arena.alloc_block(banjo_sir::Block {
        stmts: Vec::new(),
        table: success_table,
        span: banjo_common::Span::synthetic(),
    });
    let except_table = b
        .unit
        .arena
        .alloc_table(banjo_sir::SymbolTable::new(None));
    let except_block = b.unit.arena.alloc_block(banjo_sir::Block {
        stmts: Vec::new(),
        table: except_table,
        span: banjo_common::Span::synthetic(),
    });

    let try_stmt = b.stmt(banjo_sir::Stmt::Try(banjo_sir::TryStmt {
        ident: banjo_sir::Ident::new("v", banjo_common::Span::synthetic()),
        expr: call,
        success_block,
        except_ident: Some(banjo_sir::Ident::new("e", banjo_common::Span::synthetic())),
        except_block: Some(except_block),
        else_block: None,
        lowered: None,
        span: banjo_common::Span::synthetic(),
    }));
    b.push_stmt(body, try_stmt);

    // Branch bodies: success returns v doubled, except returns e.
    let v = b.name("v");
    let v2 = b.name("v");
    let doubled = b.binary(BinaryOp::Add, v, v2);
    let ret_v = b.stmt(banjo_sir::Stmt::Return(banjo_sir::ReturnStmt {
        value: Some(doubled),
        span: banjo_common::Span::synthetic(),
    }));
    b.unit.arena.block_mut(success_block).stmts.push(ret_v);

    let e = b.name("e");
    let ret_e = b.stmt(banjo_sir::Stmt::Return(banjo_sir::ReturnStmt {
        value: Some(e),
        span: banjo_common::Span::synthetic(),
    }));
    b.unit.arena.block_mut(except_block).stmts.push(ret_e);

    let zero = b.int(0);
    b.return_stmt(body, Some(zero));
    b.add_func(module.block, "main", vec![], Some(main_ret), body);

    let mut unit = b.finish();
    let mut reports = banjo_common::Reports::new();
    banjo_sema::analyze(&mut unit, &mut reports);
    assert!(reports.is_valid(), "diagnostics: {:?}", reports.reports);

    let ssa = banjo_ssa::gen::generate(&unit, banjo_ssa::CallingConv::X86_64SysV);
    banjo_ssa::verify::verify_module(&ssa).expect("invalid SSA");

    // The try became control flow: main has both branch blocks.
    let main = ssa.get_function("main").expect("main missing");
    assert!(main.blocks.len() >= 4, "blocks: {}", main.blocks.len());
}

#[test]
fn test_fatal_diagnostics_suppress_output() {
    let mut b = UnitBuilder::new();
    let module = b.create_module(&["main"]);

    let body = b.func_body(module);
    let missing = b.name("nowhere");
    b.expr_stmt(body, missing);
    b.add_func(module.block, "main", vec![], None, body);

    let config = linux_x86_64_config();
    let mut compiler = Compiler::new(&config);
    let result = compiler.compile(b.finish()).expect("pipeline error");

    assert!(result.is_none());
    assert!(compiler.reports.has_errors());
}

#[test]
fn test_object_file_write_round_trip() {
    let config = linux_x86_64_config();
    let bytes = compile(&config, hello_world_unit());

    // What the driver writes to disk is exactly what the backend emitted.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.o");
    std::fs::write(&path, &bytes).unwrap();

    let read_back = std::fs::read(&path).unwrap();
    assert_eq!(read_back, bytes);
    assert_eq!(&read_back[0..4], &[0x7F, b'E', b'L', b'F']);
}

#[test]
fn test_empty_unit_compiles_on_every_arch() {
    for (arch, os) in [
        (Arch::X86_64, OperatingSystem::Linux),
        (Arch::X86_64, OperatingSystem::Windows),
        (Arch::AArch64, OperatingSystem::Macos),
        (Arch::Wasm, OperatingSystem::Unknown),
    ] {
        let config = CompilerConfig {
            arch,
            os,
            ..Default::default()
        };
        let bytes = compile(&config, Unit::new());
        assert!(!bytes.is_empty(), "{:?}/{:?} produced nothing", arch, os);
    }
}
