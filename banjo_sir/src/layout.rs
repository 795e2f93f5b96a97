//! Type layout computation for 64-bit targets
//!
//! Sizes, alignments and field offsets follow the usual C layout rules.
//! Overlapping structs place every field at offset zero and take the size
//! of their largest field. All supported targets are 64-bit, so pointers
//! and references are 8 bytes.

use crate::{mangle::primitive_size, Decl, DeclId, StructLayout, Type, Unit};

pub fn size_of(unit: &Unit, ty: &Type) -> u64 {
    match ty {
        Type::Primitive(p) => primitive_size(*p),
        Type::Pointer(_) | Type::Reference { .. } | Type::Func(_) | Type::Closure(_) => 8,
        Type::StaticArray { element, length } => size_of(unit, element) * length,
        Type::Tuple(fields) => {
            let mut offset = 0;
            for field in fields {
                offset = align_up(offset, align_of(unit, field));
                offset += size_of(unit, field);
            }
            align_up(offset, align_of(unit, ty))
        }
        Type::Struct(decl) => struct_size(unit, *decl),
        Type::Enum(_) => 4,
        Type::Union(decl) => union_size(unit, *decl),
        Type::Proto(_) => 8,
        Type::GenericParam { .. } | Type::GenericInstance { .. } | Type::Pseudo(_) | Type::Error => 0,
    }
}

pub fn align_of(unit: &Unit, ty: &Type) -> u64 {
    match ty {
        Type::Primitive(p) => primitive_size(*p).max(1),
        Type::Pointer(_) | Type::Reference { .. } | Type::Func(_) | Type::Closure(_) => 8,
        Type::StaticArray { element, .. } => align_of(unit, element),
        Type::Tuple(fields) => fields.iter().map(|f| align_of(unit, f)).max().unwrap_or(1),
        Type::Struct(decl) => struct_align(unit, *decl),
        Type::Enum(_) => 4,
        Type::Union(decl) => union_align(unit, *decl),
        Type::Proto(_) => 8,
        Type::GenericParam { .. } | Type::GenericInstance { .. } | Type::Pseudo(_) | Type::Error => 1,
    }
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

fn struct_fields(unit: &Unit, decl: DeclId) -> Option<&crate::StructDef> {
    match unit.arena.decl(decl) {
        Decl::StructDef(def) => Some(def),
        _ => None,
    }
}

pub fn struct_size(unit: &Unit, decl: DeclId) -> u64 {
    let Some(def) = struct_fields(unit, decl) else {
        return 0;
    };

    if def.layout == StructLayout::Overlapping {
        let size = def
            .fields
            .iter()
            .filter_map(|f| match unit.arena.decl(*f) {
                Decl::StructField(field) => Some(size_of(unit, &field.ty)),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        return align_up(size.max(1), struct_align(unit, decl));
    }

    let mut offset = 0;
    for field in &def.fields {
        if let Decl::StructField(field) = unit.arena.decl(*field) {
            offset = align_up(offset, align_of(unit, &field.ty));
            offset += size_of(unit, &field.ty);
        }
    }
    align_up(offset.max(1), struct_align(unit, decl))
}

pub fn struct_align(unit: &Unit, decl: DeclId) -> u64 {
    let Some(def) = struct_fields(unit, decl) else {
        return 1;
    };

    def.fields
        .iter()
        .filter_map(|f| match unit.arena.decl(*f) {
            Decl::StructField(field) => Some(align_of(unit, &field.ty)),
            _ => None,
        })
        .max()
        .unwrap_or(1)
}

/// Byte offset of field `index` inside a struct.
pub fn field_offset(unit: &Unit, decl: DeclId, index: u32) -> u64 {
    let Some(def) = struct_fields(unit, decl) else {
        return 0;
    };

    if def.layout == StructLayout::Overlapping {
        return 0;
    }

    let mut offset = 0;
    for (i, field) in def.fields.iter().enumerate() {
        if let Decl::StructField(field) = unit.arena.decl(*field) {
            offset = align_up(offset, align_of(unit, &field.ty));
            if i as u32 == index {
                return offset;
            }
            offset += size_of(unit, &field.ty);
        }
    }
    offset
}

/// Byte offset of tuple element `index`.
pub fn tuple_field_offset(unit: &Unit, fields: &[Type], index: u32) -> u64 {
    let mut offset = 0;
    for (i, field) in fields.iter().enumerate() {
        offset = align_up(offset, align_of(unit, field));
        if i as u32 == index {
            return offset;
        }
        offset += size_of(unit, field);
    }
    offset
}

fn union_size(unit: &Unit, decl: DeclId) -> u64 {
    let Decl::UnionDef(def) = unit.arena.decl(decl) else {
        return 0;
    };

    // Tag word plus the largest case payload.
    let payload = def
        .cases
        .iter()
        .filter_map(|c| match unit.arena.decl(*c) {
            Decl::UnionCase(case) => {
                let mut size = 0;
                for field in &case.fields {
                    size = align_up(size, align_of(unit, &field.ty));
                    size += size_of(unit, &field.ty);
                }
                Some(size)
            }
            _ => None,
        })
        .max()
        .unwrap_or(0);

    align_up(4 + payload, union_align(unit, decl))
}

fn union_align(unit: &Unit, decl: DeclId) -> u64 {
    let Decl::UnionDef(def) = unit.arena.decl(decl) else {
        return 1;
    };

    def.cases
        .iter()
        .filter_map(|c| match unit.arena.decl(*c) {
            Decl::UnionCase(case) => {
                case.fields.iter().map(|f| align_of(unit, &f.ty)).max()
            }
            _ => None,
        })
        .max()
        .unwrap_or(4)
        .max(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Primitive;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 4), 12);
    }

    #[test]
    fn test_tuple_layout() {
        let unit = Unit::new();
        let fields = vec![
            Type::Primitive(Primitive::U8),
            Type::Primitive(Primitive::I64),
            Type::Primitive(Primitive::I32),
        ];
        assert_eq!(tuple_field_offset(&unit, &fields, 0), 0);
        assert_eq!(tuple_field_offset(&unit, &fields, 1), 8);
        assert_eq!(tuple_field_offset(&unit, &fields, 2), 16);
        assert_eq!(size_of(&unit, &Type::Tuple(fields)), 24);
    }
}
