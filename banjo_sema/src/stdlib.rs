//! The built-in `std` module
//!
//! Optional, Result, String, StringSlice, Array and Map are ordinary SIR
//! struct definitions installed into every unit before analysis. Small
//! methods carry real SIR bodies; allocation-dependent operations are
//! native declarations binding runtime symbols.

use crate::StdRefs;
use banjo_common::Span;
use banjo_sir::build::{ModuleRef, UnitBuilder};
use banjo_sir::{
    BlockId, Decl, DeclBlock, DeclBlockId, DeclId, ExprId, ExprKind, FuncDef, FuncType,
    GenericParam, Ident, NativeFuncDecl, Param, Primitive, StructDef, StructField, StructLayout,
    StructLiteralEntry, SymbolTable, TableId, Type, Unit,
};

struct StructRef {
    decl: DeclId,
    block: DeclBlockId,
    table: TableId,
}

pub fn install(unit: &mut Unit) -> StdRefs {
    let owned = std::mem::take(unit);
    let mut b = UnitBuilder { unit: owned };

    let module = b.create_module(&["std"]);

    let optional = build_optional(&mut b, module);
    let result = build_result(&mut b, module);
    let string = build_string(&mut b, module);
    let string_slice = build_string_slice(&mut b, module);
    let array_iter = build_array_iter(&mut b, module, optional.decl);
    let array = build_array(&mut b, module, array_iter.decl);
    let map = build_map(&mut b, module);

    let refs = StdRefs {
        module: module.id,
        table: module.table,
        optional: optional.decl,
        result: result.decl,
        string: string.decl,
        string_slice: string_slice.decl,
        array: array.decl,
        map: map.decl,
    };

    *unit = b.finish();
    refs
}

fn span() -> Span {
    Span::synthetic()
}

fn ident(name: &str) -> Ident {
    Ident::new(name, span())
}

fn begin_struct(
    b: &mut UnitBuilder,
    module: ModuleRef,
    name: &str,
    generic_params: &[&str],
) -> StructRef {
    let table = b.unit.arena.alloc_table(SymbolTable::new(Some(module.table)));
    let block = b.unit.arena.alloc_decl_block(DeclBlock {
        decls: Vec::new(),
        table,
        span: span(),
    });

    let def = StructDef {
        ident: ident(name),
        generic_params: generic_params
            .iter()
            .map(|n| GenericParam { ident: ident(n) })
            .collect(),
        fields: Vec::new(),
        block,
        layout: StructLayout::Default,
        impls: Vec::new(),
        specialization_of: None,
        specialization_args: Vec::new(),
        span: span(),
    };

    let decl = b.push_decl(module.block, Decl::StructDef(def));
    StructRef { decl, block, table }
}

fn add_field(b: &mut UnitBuilder, s: &StructRef, name: &str, ty: Type) -> DeclId {
    let type_expr = b.prim_type(Primitive::Void);
    let index = match b.unit.arena.decl(s.decl) {
        Decl::StructDef(def) => def.fields.len() as u32,
        _ => unreachable!(),
    };

    let field = b.unit.arena.alloc_decl(Decl::StructField(StructField {
        ident: ident(name),
        type_expr,
        ty,
        index,
        span: span(),
    }));

    if let Decl::StructDef(def) = b.unit.arena.decl_mut(s.decl) {
        def.fields.push(field);
    }
    field
}

/// The type of `Self` inside a generic struct's methods.
fn self_type(s: &StructRef, num_generics: u32) -> Type {
    if num_generics == 0 {
        Type::Struct(s.decl)
    } else {
        Type::GenericInstance {
            def: s.decl,
            args: (0..num_generics)
                .map(|index| Type::GenericParam { owner: s.decl, index })
                .collect(),
        }
    }
}

fn generic(s: &StructRef, index: u32) -> Type {
    Type::GenericParam { owner: s.decl, index }
}

fn param(b: &mut UnitBuilder, name: &str, ty: Type) -> Param {
    let type_expr = b.prim_type(Primitive::Void);
    Param { ident: ident(name), type_expr, ty }
}

fn add_method(
    b: &mut UnitBuilder,
    s: &StructRef,
    name: &str,
    params: Vec<Param>,
    return_type: Type,
    body: BlockId,
) -> DeclId {
    let ty = FuncType {
        params: params.iter().map(|p| p.ty.clone()).collect(),
        return_type: Box::new(return_type),
        variadic: false,
    };

    let func = FuncDef {
        ident: ident(name),
        generic_params: Vec::new(),
        params,
        return_type_expr: None,
        ty,
        block: body,
        exported: false,
        specialization_of: None,
        specialization_args: Vec::new(),
        span: span(),
    };

    b.push_decl(s.block, Decl::FuncDef(func))
}

fn add_native_method(
    b: &mut UnitBuilder,
    s: &StructRef,
    name: &str,
    params: Vec<Param>,
    return_type: Type,
    link_name: &str,
) -> DeclId {
    let ty = FuncType {
        params: params.iter().map(|p| p.ty.clone()).collect(),
        return_type: Box::new(return_type),
        variadic: false,
    };

    let func = NativeFuncDecl {
        ident: ident(name),
        params,
        return_type_expr: None,
        ty,
        link_name: link_name.to_string(),
        span: span(),
    };

    b.push_decl(s.block, Decl::NativeFuncDecl(func))
}

fn self_literal(b: &mut UnitBuilder, entries: Vec<(&str, ExprId)>) -> ExprId {
    let type_expr = b.name("Self");
    let entries = entries
        .into_iter()
        .map(|(name, value)| StructLiteralEntry {
            ident: ident(name),
            value,
            field_index: None,
        })
        .collect();
    b.expr(ExprKind::StructLiteral { type_expr: Some(type_expr), entries }, Type::Error)
}

fn undefined(b: &mut UnitBuilder) -> ExprId {
    b.expr(
        ExprKind::UndefinedLiteral,
        Type::Pseudo(banjo_sir::PseudoKind::UndefinedLiteral),
    )
}

fn self_field(b: &mut UnitBuilder, field: &str) -> ExprId {
    let self_expr = b.name("self");
    b.dot(self_expr, field)
}

fn build_optional(b: &mut UnitBuilder, module: ModuleRef) -> StructRef {
    let s = begin_struct(b, module, "Optional", &["T"]);
    add_field(b, &s, "value", generic(&s, 0));
    add_field(b, &s, "has_value", Type::Primitive(Primitive::Bool));

    let self_ty = self_type(&s, 1);

    // new_some(value: T) -> Self
    let body = b.begin_block(s.table);
    let value = b.name("value");
    let yes = b.boolean(true);
    let literal = self_literal(b, vec![("value", value), ("has_value", yes)]);
    b.return_stmt(body, Some(literal));
    let value_param = param(b, "value", generic(&s, 0));
    add_method(b, &s, "new_some", vec![value_param], self_ty.clone(), body);

    // new_none() -> Self
    let body = b.begin_block(s.table);
    let undef = undefined(b);
    let no = b.boolean(false);
    let literal = self_literal(b, vec![("value", undef), ("has_value", no)]);
    b.return_stmt(body, Some(literal));
    add_method(b, &s, "new_none", Vec::new(), self_ty.clone(), body);

    // unwrap(self) -> T
    let body = b.begin_block(s.table);
    let field = self_field(b, "value");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty);
    add_method(b, &s, "unwrap", vec![self_param], generic(&s, 0), body);

    s
}

fn build_result(b: &mut UnitBuilder, module: ModuleRef) -> StructRef {
    let s = begin_struct(b, module, "Result", &["T", "E"]);
    add_field(b, &s, "value", generic(&s, 0));
    add_field(b, &s, "error", generic(&s, 1));
    add_field(b, &s, "successful", Type::Primitive(Primitive::Bool));

    let self_ty = self_type(&s, 2);

    // new_success(value: T) -> Self
    let body = b.begin_block(s.table);
    let value = b.name("value");
    let undef = undefined(b);
    let yes = b.boolean(true);
    let literal = self_literal(b, vec![("value", value), ("error", undef), ("successful", yes)]);
    b.return_stmt(body, Some(literal));
    let value_param = param(b, "value", generic(&s, 0));
    add_method(b, &s, "new_success", vec![value_param], self_ty.clone(), body);

    // new_failure(error: E) -> Self
    let body = b.begin_block(s.table);
    let undef = undefined(b);
    let error = b.name("error");
    let no = b.boolean(false);
    let literal = self_literal(b, vec![("value", undef), ("error", error), ("successful", no)]);
    b.return_stmt(body, Some(literal));
    let error_param = param(b, "error", generic(&s, 1));
    add_method(b, &s, "new_failure", vec![error_param], self_ty.clone(), body);

    // unwrap(self) -> T
    let body = b.begin_block(s.table);
    let field = self_field(b, "value");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty.clone());
    add_method(b, &s, "unwrap", vec![self_param], generic(&s, 0), body);

    // unwrap_error(self) -> E
    let body = b.begin_block(s.table);
    let field = self_field(b, "error");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty);
    add_method(b, &s, "unwrap_error", vec![self_param], generic(&s, 1), body);

    s
}

fn u8_ptr() -> Type {
    Type::Primitive(Primitive::U8).pointer_to()
}

fn u64_ty() -> Type {
    Type::Primitive(Primitive::U64)
}

fn build_string(b: &mut UnitBuilder, module: ModuleRef) -> StructRef {
    let s = begin_struct(b, module, "String", &[]);
    add_field(b, &s, "data", u8_ptr());
    add_field(b, &s, "size", u64_ty());
    add_field(b, &s, "capacity", u64_ty());

    let self_ty = self_type(&s, 0);

    let cstr_param = param(b, "cstr", u8_ptr());
    add_native_method(b, &s, "from_cstr", vec![cstr_param], self_ty.clone(), "banjo_string_from_cstr");

    // length(self) -> u64
    let body = b.begin_block(s.table);
    let field = self_field(b, "size");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty.clone());
    add_method(b, &s, "length", vec![self_param], u64_ty(), body);

    // cstr(self) -> *u8
    let body = b.begin_block(s.table);
    let field = self_field(b, "data");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty);
    add_method(b, &s, "cstr", vec![self_param], u8_ptr(), body);

    s
}

fn build_string_slice(b: &mut UnitBuilder, module: ModuleRef) -> StructRef {
    let s = begin_struct(b, module, "StringSlice", &[]);
    add_field(b, &s, "data", u8_ptr());
    add_field(b, &s, "size", u64_ty());

    let self_ty = self_type(&s, 0);

    let cstr_param = param(b, "cstring", u8_ptr());
    add_native_method(
        b,
        &s,
        "of_cstring",
        vec![cstr_param],
        self_ty.clone(),
        "banjo_slice_of_cstring",
    );

    let body = b.begin_block(s.table);
    let field = self_field(b, "size");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty);
    add_method(b, &s, "length", vec![self_param], u64_ty(), body);

    s
}

fn build_array_iter(b: &mut UnitBuilder, module: ModuleRef, optional: DeclId) -> StructRef {
    let s = begin_struct(b, module, "ArrayIter", &["T"]);
    add_field(b, &s, "ptr", Type::Primitive(Primitive::Addr));
    add_field(b, &s, "remaining", u64_ty());

    let optional_t = Type::GenericInstance {
        def: optional,
        args: vec![generic(&s, 0)],
    };

    let self_param = param(b, "self", self_type(&s, 1).pointer_to());
    add_native_method(b, &s, "next", vec![self_param], optional_t, "banjo_array_iter_next");

    s
}

fn build_array(b: &mut UnitBuilder, module: ModuleRef, iter: DeclId) -> StructRef {
    let s = begin_struct(b, module, "Array", &["T"]);
    add_field(b, &s, "data", Type::Primitive(Primitive::Addr));
    add_field(b, &s, "size", u64_ty());
    add_field(b, &s, "capacity", u64_ty());

    let self_ty = self_type(&s, 1);
    let iter_ty = Type::GenericInstance {
        def: iter,
        args: vec![generic(&s, 0)],
    };

    let data_param = param(b, "data", Type::Primitive(Primitive::Addr));
    let len_param = param(b, "length", u64_ty());
    add_native_method(
        b,
        &s,
        "from",
        vec![data_param, len_param],
        self_ty.clone(),
        "banjo_array_from",
    );

    // length(self) -> u64
    let body = b.begin_block(s.table);
    let field = self_field(b, "size");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty.clone());
    add_method(b, &s, "length", vec![self_param], u64_ty(), body);

    let self_param = param(b, "self", self_ty.clone());
    add_native_method(b, &s, "iter", vec![self_param], iter_ty.clone(), "banjo_array_iter");

    let self_param = param(b, "self", self_ty.pointer_to());
    add_native_method(b, &s, "iter_ref", vec![self_param], iter_ty, "banjo_array_iter_ref");

    s
}

fn build_map(b: &mut UnitBuilder, module: ModuleRef) -> StructRef {
    let s = begin_struct(b, module, "Map", &["K", "V"]);
    add_field(b, &s, "data", Type::Primitive(Primitive::Addr));
    add_field(b, &s, "size", u64_ty());

    let self_ty = self_type(&s, 2);

    let data_param = param(b, "data", Type::Primitive(Primitive::Addr));
    let len_param = param(b, "length", u64_ty());
    add_native_method(b, &s, "from", vec![data_param, len_param], self_ty.clone(), "banjo_map_from");

    let body = b.begin_block(s.table);
    let field = self_field(b, "size");
    b.return_stmt(body, Some(field));
    let self_param = param(b, "self", self_ty);
    add_method(b, &s, "length", vec![self_param], u64_ty(), body);

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_creates_std_module() {
        let mut unit = Unit::new();
        let refs = install(&mut unit);

        assert_eq!(unit.mods[refs.module.index()].path_string(), "std");

        let Decl::StructDef(optional) = unit.arena.decl(refs.optional) else {
            panic!("Optional is not a struct");
        };
        assert_eq!(optional.ident.name, "Optional");
        assert_eq!(optional.generic_params.len(), 1);
        assert_eq!(optional.fields.len(), 2);

        let Decl::StructDef(result) = unit.arena.decl(refs.result) else {
            panic!("Result is not a struct");
        };
        assert_eq!(result.generic_params.len(), 2);
        assert_eq!(result.fields.len(), 3);
    }
}
