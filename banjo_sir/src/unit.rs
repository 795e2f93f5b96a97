//! The compilation unit: modules plus the node arenas

use crate::{
    Block, BlockId, Decl, DeclBlock, DeclBlockId, DeclId, Expr, ExprId, ModuleId, Stmt, StmtId,
    Symbol, SymbolTable, TableId,
};

/// A dot-separated module path (e.g. `app.util`)
pub type ModulePath = Vec<String>;

/// A single source module
#[derive(Debug, Clone)]
pub struct Module {
    pub path: ModulePath,
    pub block: DeclBlockId,
}

impl Module {
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

/// Owner of every SIR node in the unit
#[derive(Debug, Default)]
pub struct Arena {
    decls: Vec<Decl>,
    stmts: Vec<Stmt>,
    exprs: Vec<Expr>,
    blocks: Vec<Block>,
    decl_blocks: Vec<DeclBlock>,
    tables: Vec<SymbolTable>,
}

impl Arena {
    pub fn alloc_decl(&mut self, decl: Decl) -> DeclId {
        self.decls.push(decl);
        DeclId(self.decls.len() as u32 - 1)
    }

    pub fn alloc_stmt(&mut self, stmt: Stmt) -> StmtId {
        self.stmts.push(stmt);
        StmtId(self.stmts.len() as u32 - 1)
    }

    pub fn alloc_expr(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr);
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn alloc_block(&mut self, block: Block) -> BlockId {
        self.blocks.push(block);
        BlockId(self.blocks.len() as u32 - 1)
    }

    pub fn alloc_decl_block(&mut self, block: DeclBlock) -> DeclBlockId {
        self.decl_blocks.push(block);
        DeclBlockId(self.decl_blocks.len() as u32 - 1)
    }

    pub fn alloc_table(&mut self, table: SymbolTable) -> TableId {
        self.tables.push(table);
        TableId(self.tables.len() as u32 - 1)
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.index()]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn decl_block(&self, id: DeclBlockId) -> &DeclBlock {
        &self.decl_blocks[id.index()]
    }

    pub fn decl_block_mut(&mut self, id: DeclBlockId) -> &mut DeclBlock {
        &mut self.decl_blocks[id.index()]
    }

    pub fn table(&self, id: TableId) -> &SymbolTable {
        &self.tables[id.index()]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut SymbolTable {
        &mut self.tables[id.index()]
    }

    pub fn num_decls(&self) -> usize {
        self.decls.len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    pub fn expr_ids(&self) -> impl Iterator<Item = ExprId> {
        (0..self.exprs.len() as u32).map(ExprId)
    }

    /// Look up a name, walking the parent chain of tables.
    pub fn lookup(&self, table: TableId, name: &str) -> Option<Symbol> {
        let mut current = Some(table);

        while let Some(id) = current {
            let table = self.table(id);
            if let Some(symbol) = table.get_local(name) {
                return Some(symbol.clone());
            }
            current = table.parent;
        }

        None
    }
}

/// A whole compilation unit: every loaded module plus the node arenas
#[derive(Debug, Default)]
pub struct Unit {
    pub mods: Vec<Module>,
    pub arena: Arena,
}

impl Unit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.mods[id.index()]
    }

    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> {
        (0..self.mods.len() as u32).map(ModuleId)
    }

    pub fn find_module(&self, path: &[String]) -> Option<ModuleId> {
        self.mods
            .iter()
            .position(|m| m.path == path)
            .map(|index| ModuleId(index as u32))
    }

    pub fn add_module(&mut self, module: Module) -> ModuleId {
        self.mods.push(module);
        ModuleId(self.mods.len() as u32 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StmtId;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_walks_parent_chain() {
        let mut arena = Arena::default();
        let root = arena.alloc_table(SymbolTable::new(None));
        let child = arena.alloc_table(SymbolTable::new(Some(root)));

        arena.table_mut(root).insert("outer", Symbol::Local(StmtId(7)));

        assert_eq!(arena.lookup(child, "outer"), Some(Symbol::Local(StmtId(7))));
        assert_eq!(arena.lookup(child, "missing"), None);
    }
}
