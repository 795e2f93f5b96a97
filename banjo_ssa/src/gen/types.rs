//! SIR-to-SSA type conversion and ABI rules

use super::SsaGenerator;
use crate::{CallingConv, FunctionType, Primitive, Structure, Type};
use banjo_sir::Decl;

/// Argument-passing decisions made during SSA generation. Pointer-sized
/// details stay with the target backends; these rules only decide what
/// travels by address.
#[derive(Debug, Clone, Copy)]
pub struct AbiRules {
    pub calling_conv: CallingConv,
}

impl AbiRules {
    pub fn for_calling_conv(calling_conv: CallingConv) -> Self {
        Self { calling_conv }
    }

    /// Aggregates are returned through a hidden pointer in the first
    /// argument slot.
    pub fn return_in_memory(&self, gen: &SsaGenerator, ty: &banjo_sir::Type) -> bool {
        gen.is_aggregate(ty)
    }
}

impl SsaGenerator<'_> {
    pub(crate) fn convert_type(&mut self, ty: &banjo_sir::Type) -> Type {
        match ty {
            banjo_sir::Type::Primitive(p) => Type::primitive(convert_primitive(*p)),
            banjo_sir::Type::Pointer(_)
            | banjo_sir::Type::Reference { .. }
            | banjo_sir::Type::Func(_)
            | banjo_sir::Type::Closure(_)
            | banjo_sir::Type::Proto(_) => Type::ADDR,
            banjo_sir::Type::StaticArray { element, length } => {
                self.convert_type(element).array_of(*length as u32)
            }
            banjo_sir::Type::Tuple(fields) => {
                let fields = fields.iter().map(|f| self.convert_type(f)).collect();
                Type::tuple(fields)
            }
            banjo_sir::Type::Struct(decl) => {
                let id = self.structure_for(*decl);
                Type::structure(id)
            }
            banjo_sir::Type::Enum(_) => Type::primitive(Primitive::I32),
            banjo_sir::Type::Union(decl) => {
                let id = self.union_structure_for(*decl);
                Type::structure(id)
            }
            banjo_sir::Type::GenericParam { .. }
            | banjo_sir::Type::GenericInstance { .. }
            | banjo_sir::Type::Pseudo(_)
            | banjo_sir::Type::Error => Type::VOID,
        }
    }

    pub(crate) fn convert_func_type(&mut self, ty: &banjo_sir::FuncType) -> FunctionType {
        let return_in_memory = self.abi.return_in_memory(self, &ty.return_type);

        let mut params = Vec::with_capacity(ty.params.len() + 1);
        if return_in_memory {
            params.push(Type::ADDR);
        }
        for param in &ty.params {
            params.push(self.convert_type(param));
        }

        let return_type = if return_in_memory {
            Type::VOID
        } else {
            self.convert_type(&ty.return_type)
        };

        let mut func_ty = FunctionType::new(params, return_type, self.calling_conv);
        func_ty.variadic = ty.variadic;
        func_ty.first_variadic_index = ty.params.len() as u32;
        func_ty
    }

    /// Whether a SIR type is stored and passed by address.
    pub(crate) fn is_aggregate(&self, ty: &banjo_sir::Type) -> bool {
        matches!(
            ty,
            banjo_sir::Type::Struct(_)
                | banjo_sir::Type::Union(_)
                | banjo_sir::Type::Tuple(_)
                | banjo_sir::Type::StaticArray { .. }
        )
    }

    /// Register (or look up) the SSA structure for a struct definition.
    pub(crate) fn structure_for(&mut self, decl: banjo_sir::DeclId) -> u32 {
        if let Some(id) = self.struct_map.get(&decl) {
            return *id;
        }

        let Decl::StructDef(def) = self.unit.arena.decl(decl) else {
            return self.module.add_structure(Structure::new("error"));
        };

        let name = super::struct_path_segment(self.unit, def);
        // Reserve the slot first so self-referential structs terminate.
        let id = self.module.add_structure(Structure::new(name));
        self.struct_map.insert(decl, id);

        let fields = def.fields.clone();
        let mut members = Vec::with_capacity(fields.len());
        for field in fields {
            if let Decl::StructField(f) = self.unit.arena.decl(field) {
                let field_name = f.ident.name.clone();
                let field_ty = f.ty.clone();
                let ty = self.convert_type(&field_ty);
                members.push((field_name, ty));
            }
        }

        for (field_name, ty) in members {
            self.module.structures[id as usize].add(field_name, ty);
        }
        id
    }

    /// Unions lower to a tag word plus a byte blob sized for the largest
    /// case.
    pub(crate) fn union_structure_for(&mut self, decl: banjo_sir::DeclId) -> u32 {
        if let Some(id) = self.struct_map.get(&decl) {
            return *id;
        }

        let Decl::UnionDef(def) = self.unit.arena.decl(decl) else {
            return self.module.add_structure(Structure::new("error"));
        };

        let name = def.ident.name.clone();
        let payload_size = banjo_sir::layout::size_of(self.unit, &banjo_sir::Type::Union(decl)) - 4;

        let mut structure = Structure::new(name);
        structure.add("tag", Type::primitive(Primitive::U32));
        structure.add(
            "payload",
            Type::primitive(Primitive::U8).array_of(payload_size.max(1) as u32),
        );

        let id = self.module.add_structure(structure);
        self.struct_map.insert(decl, id);
        id
    }
}

pub(crate) fn convert_primitive(p: banjo_sir::Primitive) -> Primitive {
    match p {
        banjo_sir::Primitive::I8 => Primitive::I8,
        banjo_sir::Primitive::I16 => Primitive::I16,
        banjo_sir::Primitive::I32 => Primitive::I32,
        banjo_sir::Primitive::I64 => Primitive::I64,
        banjo_sir::Primitive::U8 => Primitive::U8,
        banjo_sir::Primitive::U16 => Primitive::U16,
        banjo_sir::Primitive::U32 => Primitive::U32,
        banjo_sir::Primitive::U64 => Primitive::U64,
        banjo_sir::Primitive::F32 => Primitive::F32,
        banjo_sir::Primitive::F64 => Primitive::F64,
        banjo_sir::Primitive::Bool => Primitive::U8,
        banjo_sir::Primitive::Addr => Primitive::Addr,
        banjo_sir::Primitive::Void => Primitive::Void,
    }
}
