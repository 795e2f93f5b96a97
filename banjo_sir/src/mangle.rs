//! Function and global name mangling
//!
//! Symbol names in emitted objects are the dotted module path plus the
//! declaration name, with a bracketed argument list appended for generic
//! specializations. `main` and exported functions keep their bare names so
//! linkers and DLL import tables see them unchanged.

use crate::{Decl, FuncDef, Primitive, Type, Unit};

pub fn mangle_func_name(unit: &Unit, module_path: &[String], func: &FuncDef) -> String {
    if func.ident.name == "main" || func.exported {
        return func.ident.name.clone();
    }

    let mut name = String::new();
    for part in module_path {
        name.push_str(part);
        name.push('.');
    }
    name.push_str(&func.ident.name);

    if !func.specialization_args.is_empty() {
        name.push('[');
        for (i, arg) in func.specialization_args.iter().enumerate() {
            if i > 0 {
                name.push(',');
            }
            name.push_str(&type_name(unit, arg));
        }
        name.push(']');
    }

    name
}

pub fn mangle_global_name(module_path: &[String], name: &str) -> String {
    let mut mangled = String::new();
    for part in module_path {
        mangled.push_str(part);
        mangled.push('.');
    }
    mangled.push_str(name);
    mangled
}

/// A stable textual rendering of a type, used in specialization suffixes.
pub fn type_name(unit: &Unit, ty: &Type) -> String {
    match ty {
        Type::Primitive(p) => p.to_string(),
        Type::Pointer(base) => format!("*{}", type_name(unit, base)),
        Type::Reference { mutable, base } => {
            if *mutable {
                format!("&mut {}", type_name(unit, base))
            } else {
                format!("&{}", type_name(unit, base))
            }
        }
        Type::StaticArray { element, length } => {
            format!("[{};{}]", type_name(unit, element), length)
        }
        Type::Tuple(fields) => {
            let names: Vec<String> = fields.iter().map(|f| type_name(unit, f)).collect();
            format!("({})", names.join(","))
        }
        Type::Func(func) | Type::Closure(func) => {
            let params: Vec<String> = func.params.iter().map(|p| type_name(unit, p)).collect();
            format!("func({})->{}", params.join(","), type_name(unit, &func.return_type))
        }
        Type::Struct(decl) | Type::Enum(decl) | Type::Union(decl) | Type::Proto(decl) => {
            match unit.arena.decl(*decl) {
                Decl::StructDef(def) => def.ident.name.clone(),
                Decl::EnumDef(def) => def.ident.name.clone(),
                Decl::UnionDef(def) => def.ident.name.clone(),
                Decl::ProtoDef(def) => def.ident.name.clone(),
                _ => "?".to_string(),
            }
        }
        Type::GenericParam { index, .. } => format!("${}", index),
        Type::GenericInstance { def, args } => {
            let base = match unit.arena.decl(*def) {
                Decl::StructDef(d) => d.ident.name.clone(),
                Decl::FuncDef(d) => d.ident.name.clone(),
                _ => "?".to_string(),
            };
            let names: Vec<String> = args.iter().map(|a| type_name(unit, a)).collect();
            format!("{}[{}]", base, names.join(","))
        }
        Type::Pseudo(_) => "pseudo".to_string(),
        Type::Error => "error".to_string(),
    }
}

/// Size in bytes of an SIR primitive on 64-bit targets.
pub fn primitive_size(primitive: Primitive) -> u64 {
    match primitive {
        Primitive::I8 | Primitive::U8 | Primitive::Bool => 1,
        Primitive::I16 | Primitive::U16 => 2,
        Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
        Primitive::I64 | Primitive::U64 | Primitive::F64 | Primitive::Addr => 8,
        Primitive::Void => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::UnitBuilder;

    #[test]
    fn test_main_stays_unmangled() {
        let mut builder = UnitBuilder::new();
        let module = builder.create_module(&["main"]);
        let body = builder.func_body(module);
        let func = builder.add_func(module.block, "main", vec![], None, body);
        let unit = builder.finish();

        let Decl::FuncDef(def) = unit.arena.decl(func) else { panic!() };
        assert_eq!(mangle_func_name(&unit, &unit.mods[0].path, def), "main");
    }

    #[test]
    fn test_module_path_prefix() {
        let mut builder = UnitBuilder::new();
        let module = builder.create_module(&["app", "util"]);
        let body = builder.func_body(module);
        let func = builder.add_func(module.block, "helper", vec![], None, body);
        let unit = builder.finish();

        let Decl::FuncDef(def) = unit.arena.decl(func) else { panic!() };
        assert_eq!(mangle_func_name(&unit, &unit.mods[0].path, def), "app.util.helper");
    }
}
