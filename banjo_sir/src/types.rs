//! The SIR type model
//!
//! Types are plain values: cheap to clone, compared structurally. Nominal
//! types (structs, enums, unions, protocols) refer to their definitions by
//! `DeclId`, so two references to the same specialization compare equal.

use crate::DeclId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive machine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Addr,
    Void,
}

impl Primitive {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::I8
                | Primitive::I16
                | Primitive::I32
                | Primitive::I64
                | Primitive::U8
                | Primitive::U16
                | Primitive::U32
                | Primitive::U64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Primitive::I8 | Primitive::I16 | Primitive::I32 | Primitive::I64)
    }

    pub fn is_fp(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// Width in bits for integer and floating-point primitives.
    pub fn bit_width(self) -> u32 {
        match self {
            Primitive::I8 | Primitive::U8 => 8,
            Primitive::I16 | Primitive::U16 => 16,
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 32,
            Primitive::I64 | Primitive::U64 | Primitive::F64 | Primitive::Addr => 64,
            Primitive::Bool => 1,
            Primitive::Void => 0,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Bool => "bool",
            Primitive::Addr => "addr",
            Primitive::Void => "void",
        };
        write!(f, "{}", name)
    }
}

/// Pseudo types carried by unfinalized literals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PseudoKind {
    IntLiteral,
    FpLiteral,
    StringLiteral,
    ArrayLiteral,
    MapLiteral,
    NullLiteral,
    NoneLiteral,
    UndefinedLiteral,
}

/// A function signature at the SIR level
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncType {
    pub params: Vec<Type>,
    pub return_type: Box<Type>,
    pub variadic: bool,
}

impl FuncType {
    pub fn new(params: Vec<Type>, return_type: Type) -> Self {
        Self {
            params,
            return_type: Box::new(return_type),
            variadic: false,
        }
    }
}

/// The main SIR type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Placeholder carried by literals before finalization
    Pseudo(PseudoKind),
    Primitive(Primitive),
    Pointer(Box<Type>),
    Reference { mutable: bool, base: Box<Type> },
    StaticArray { element: Box<Type>, length: u64 },
    Func(FuncType),
    Closure(FuncType),
    Tuple(Vec<Type>),
    /// A monomorphic struct definition (or specialization)
    Struct(DeclId),
    Enum(DeclId),
    Union(DeclId),
    Proto(DeclId),
    /// A generic parameter awaiting substitution
    GenericParam { owner: DeclId, index: u32 },
    /// An application of a generic definition whose arguments still mention
    /// generic parameters; specialized once the arguments become concrete
    GenericInstance { def: DeclId, args: Vec<Type> },
    /// Error recovery type
    Error,
}

impl Type {
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Type::Pseudo(_))
    }

    pub fn is_primitive(&self, primitive: Primitive) -> bool {
        matches!(self, Type::Primitive(p) if *p == primitive)
    }

    pub fn is_void(&self) -> bool {
        self.is_primitive(Primitive::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_integer())
    }

    pub fn is_fp(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_fp())
    }

    /// Whether the type is represented as an address at the machine level.
    pub fn is_addr_like(&self) -> bool {
        matches!(
            self,
            Type::Primitive(Primitive::Addr) | Type::Pointer(_) | Type::Reference { .. } | Type::Func(_)
        )
    }

    pub fn pointer_to(self) -> Type {
        Type::Pointer(Box::new(self))
    }

    pub fn reference_to(self, mutable: bool) -> Type {
        Type::Reference { mutable, base: Box::new(self) }
    }

    /// The struct definition this type resolves to, if any.
    pub fn as_struct(&self) -> Option<DeclId> {
        match self {
            Type::Struct(decl) => Some(*decl),
            _ => None,
        }
    }

    /// Substitute generic parameters of `owner` with `args`.
    pub fn substitute(&self, owner: DeclId, args: &[Type]) -> Type {
        match self {
            Type::GenericParam { owner: param_owner, index } if *param_owner == owner => {
                args[*index as usize].clone()
            }
            Type::Pointer(base) => Type::Pointer(Box::new(base.substitute(owner, args))),
            Type::Reference { mutable, base } => Type::Reference {
                mutable: *mutable,
                base: Box::new(base.substitute(owner, args)),
            },
            Type::StaticArray { element, length } => Type::StaticArray {
                element: Box::new(element.substitute(owner, args)),
                length: *length,
            },
            Type::Func(func) => Type::Func(FuncType {
                params: func.params.iter().map(|p| p.substitute(owner, args)).collect(),
                return_type: Box::new(func.return_type.substitute(owner, args)),
                variadic: func.variadic,
            }),
            Type::Closure(func) => Type::Closure(FuncType {
                params: func.params.iter().map(|p| p.substitute(owner, args)).collect(),
                return_type: Box::new(func.return_type.substitute(owner, args)),
                variadic: func.variadic,
            }),
            Type::Tuple(fields) => {
                Type::Tuple(fields.iter().map(|f| f.substitute(owner, args)).collect())
            }
            Type::GenericInstance { def, args: inst_args } => Type::GenericInstance {
                def: *def,
                args: inst_args.iter().map(|a| a.substitute(owner, args)).collect(),
            },
            other => other.clone(),
        }
    }

    /// Whether the type contains a generic parameter of `owner`.
    pub fn mentions_generic_of(&self, owner: DeclId) -> bool {
        match self {
            Type::GenericParam { owner: param_owner, .. } => *param_owner == owner,
            Type::Pointer(base) => base.mentions_generic_of(owner),
            Type::Reference { base, .. } => base.mentions_generic_of(owner),
            Type::StaticArray { element, .. } => element.mentions_generic_of(owner),
            Type::Func(func) | Type::Closure(func) => {
                func.params.iter().any(|p| p.mentions_generic_of(owner))
                    || func.return_type.mentions_generic_of(owner)
            }
            Type::Tuple(fields) => fields.iter().any(|f| f.mentions_generic_of(owner)),
            Type::GenericInstance { args, .. } => {
                args.iter().any(|a| a.mentions_generic_of(owner))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_substitution() {
        let owner = DeclId(0);
        let generic = Type::GenericParam { owner, index: 0 };
        let ptr = generic.clone().pointer_to();
        let result = ptr.substitute(owner, &[Type::Primitive(Primitive::I32)]);
        assert_eq!(result, Type::Primitive(Primitive::I32).pointer_to());
    }

    #[test]
    fn test_addr_like() {
        assert!(Type::Primitive(Primitive::Addr).is_addr_like());
        assert!(Type::Primitive(Primitive::U8).pointer_to().is_addr_like());
        assert!(!Type::Primitive(Primitive::I32).is_addr_like());
    }
}
