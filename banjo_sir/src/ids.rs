//! Typed arena indices for SIR nodes

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// Index of a declaration in the unit arena
    DeclId
);
define_id!(
    /// Index of a statement in the unit arena
    StmtId
);
define_id!(
    /// Index of an expression in the unit arena
    ExprId
);
define_id!(
    /// Index of a statement block in the unit arena
    BlockId
);
define_id!(
    /// Index of a declaration block in the unit arena
    DeclBlockId
);
define_id!(
    /// Index of a symbol table in the unit arena
    TableId
);
define_id!(
    /// Index of a module in the unit
    ModuleId
);
