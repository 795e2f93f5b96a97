//! Lowering from analyzed SIR to SSA-IR
//!
//! The generator walks every module twice: a declaration pass registers
//! functions, externs, globals and structures so call sites can reference
//! them by index, then a body pass lowers each function. Locals live in
//! entry-block allocas; scalar temporaries flow through virtual
//! registers; aggregate values are represented by their address with an
//! aggregate-typed operand.

mod expr;
mod stmt;
mod types;

use crate::{
    BlockId, CallingConv, Function, FunctionType, Global, GlobalInitializer, Instruction, Module,
    Opcode, Operand, Type,
};
use banjo_sir::{mangle, Decl, DeclBlockId, DeclId, StmtId, Unit};
use hashbrown::HashMap;

pub use types::AbiRules;

/// Key for a value slot in the local map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LocalKey {
    Local(StmtId),
    Param(DeclId, u32),
}

/// Where a local's storage lives
#[derive(Debug, Clone)]
pub(crate) struct LocalSlot {
    /// Virtual register holding the alloca address
    pub addr: u32,
    pub ty: banjo_sir::Type,
}

pub(crate) struct FuncCtx {
    pub func_index: u32,
    pub decl: DeclId,
    pub current_block: BlockId,
    pub locals: HashMap<LocalKey, LocalSlot>,
    /// (continue target, continue args unused, break target)
    pub loop_stack: Vec<(BlockId, BlockId)>,
    /// Number of allocas inserted at the head of the entry block
    pub entry_allocas: usize,
    /// Slot for an aggregate return value, when the ABI returns via memory
    pub sret: Option<u32>,
    pub next_label: u32,
}

impl FuncCtx {
    pub fn label(&mut self, prefix: &str) -> String {
        let label = format!("{}{}", prefix, self.next_label);
        self.next_label += 1;
        label
    }
}

pub struct SsaGenerator<'a> {
    pub(crate) unit: &'a Unit,
    pub(crate) module: Module,
    pub(crate) calling_conv: CallingConv,
    pub(crate) abi: AbiRules,
    pub(crate) struct_map: HashMap<DeclId, u32>,
    pub(crate) func_map: HashMap<DeclId, u32>,
    pub(crate) extern_func_map: HashMap<DeclId, u32>,
    pub(crate) global_map: HashMap<DeclId, u32>,
    pub(crate) extern_global_map: HashMap<DeclId, u32>,
    next_string: u32,
}

impl<'a> SsaGenerator<'a> {
    pub fn new(unit: &'a Unit, calling_conv: CallingConv) -> Self {
        Self {
            unit,
            module: Module::new(),
            calling_conv,
            abi: AbiRules::for_calling_conv(calling_conv),
            struct_map: HashMap::new(),
            func_map: HashMap::new(),
            extern_func_map: HashMap::new(),
            global_map: HashMap::new(),
            extern_global_map: HashMap::new(),
            next_string: 0,
        }
    }

    pub fn generate(mut self) -> Module {
        log::debug!("ssa: declaring module items");
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let path = self.unit.module(module).path.clone();
            let block = self.unit.module(module).block;
            self.declare_block(&path, block);
        }

        log::debug!("ssa: lowering function bodies");
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let block = self.unit.module(module).block;
            self.generate_block(block);
        }

        self.module
    }

    // -- declaration pass ---------------------------------------------------

    fn declare_block(&mut self, path: &[String], block: DeclBlockId) {
        for decl in self.unit.arena.decl_block(block).decls.clone() {
            self.declare_decl(path, decl);
        }
    }

    fn declare_decl(&mut self, path: &[String], decl: DeclId) {
        match self.unit.arena.decl(decl) {
            Decl::FuncDef(def) => {
                if def.is_generic() || self.mentions_generics(def) {
                    return;
                }

                let name = mangle::mangle_func_name(self.unit, path, def);
                let ty = self.convert_func_type(&def.ty);
                let mut function = Function::new(name.clone(), ty);
                function.global = true;
                let index = self.module.add_function(function);
                self.func_map.insert(decl, index);

                if def.exported {
                    self.module.dll_exports.push(name);
                }
            }
            Decl::FuncDecl(def) => {
                let ty = self.convert_func_type(&def.ty);
                let index = self.module.intern_external_function(&def.ident.name, ty);
                self.extern_func_map.insert(decl, index);
            }
            Decl::NativeFuncDecl(def) => {
                if self.func_type_mentions_generics(&def.ty) {
                    return;
                }
                let ty = self.convert_func_type(&def.ty);
                let link_name = def.link_name.clone();
                let index = self.module.intern_external_function(&link_name, ty);
                self.extern_func_map.insert(decl, index);
            }
            Decl::VarDecl(def) => {
                let name = mangle::mangle_global_name(path, &def.ident.name);
                let ty = self.convert_type(&def.ty);
                let initializer = self.global_initializer(def);
                let index = self.module.add_global(Global {
                    name,
                    ty,
                    initializer,
                    external: false,
                });
                self.global_map.insert(decl, index);
            }
            Decl::NativeVarDecl(def) => {
                let ty = self.convert_type(&def.ty);
                let index = self.module.add_external_global(crate::ExternGlobalDecl {
                    name: def.link_name.clone(),
                    ty,
                });
                self.extern_global_map.insert(decl, index);
            }
            Decl::StructDef(def) => {
                if def.is_generic() {
                    return;
                }

                let mut inner_path = path.to_vec();
                inner_path.push(struct_path_segment(self.unit, def));
                let block = def.block;
                self.declare_block(&inner_path, block);
            }
            Decl::MetaIf(def) => {
                if let Some(chosen) = def.expanded {
                    self.declare_block(path, chosen);
                }
            }
            _ => {}
        }
    }

    // -- body pass ----------------------------------------------------------

    fn generate_block(&mut self, block: DeclBlockId) {
        for decl in self.unit.arena.decl_block(block).decls.clone() {
            match self.unit.arena.decl(decl) {
                Decl::FuncDef(_) => {
                    if self.func_map.contains_key(&decl) {
                        self.generate_func(decl);
                    }
                }
                Decl::StructDef(def) => {
                    if !def.is_generic() {
                        self.generate_block(def.block);
                    }
                }
                Decl::MetaIf(def) => {
                    if let Some(chosen) = def.expanded {
                        self.generate_block(chosen);
                    }
                }
                _ => {}
            }
        }
    }

    fn generate_func(&mut self, decl: DeclId) {
        let Decl::FuncDef(def) = self.unit.arena.decl(decl).clone() else {
            return;
        };
        let func_index = self.func_map[&decl];

        let entry = self.module.functions[func_index as usize].create_block("entry");

        let mut ctx = FuncCtx {
            func_index,
            decl,
            current_block: entry,
            locals: HashMap::new(),
            loop_stack: Vec::new(),
            entry_allocas: 0,
            sret: None,
            next_label: 0,
        };

        // Hidden return pointer for aggregate returns.
        if self.abi.return_in_memory(self, &def.ty.return_type) {
            let reg = self.next_reg(&mut ctx);
            self.push_instr(
                &mut ctx,
                Instruction::new(
                    Opcode::LoadArg,
                    Some(reg),
                    vec![Operand::int_immediate(0, Type::ADDR)],
                ),
            );
            ctx.sret = Some(reg);
        }

        // Materialize parameters: load each argument, spill it to a slot so
        // address-of and reassignment work uniformly.
        let arg_offset = if ctx.sret.is_some() { 1 } else { 0 };
        for (index, param) in def.params.iter().enumerate() {
            let ty = self.convert_type(&param.ty);
            let arg_index = index as u32 + arg_offset;

            let value_reg = self.next_reg(&mut ctx);
            self.push_instr(
                &mut ctx,
                Instruction::new(
                    Opcode::LoadArg,
                    Some(value_reg),
                    vec![Operand::int_immediate(arg_index as i128, ty.clone())],
                ),
            );

            let slot = self.alloc_local(&mut ctx, &param.ty);
            self.store_value(
                &mut ctx,
                Operand::register(value_reg, ty),
                slot.addr,
                &param.ty,
            );
            ctx.locals.insert(LocalKey::Param(decl, index as u32), slot);
        }

        let _ = self.lower_block(&mut ctx, def.block);

        // Fall-through return for void functions.
        let block = ctx.current_block;
        if !self.module.functions[ctx.func_index as usize]
            .block(block)
            .is_terminated()
        {
            self.push_instr(&mut ctx, Instruction::new(Opcode::Ret, None, Vec::new()));
        }
    }

    fn global_initializer(&mut self, def: &banjo_sir::VarDecl) -> GlobalInitializer {
        let Some(value) = def.value else {
            return GlobalInitializer::None;
        };

        match &self.unit.arena.expr(value).kind {
            banjo_sir::ExprKind::IntLiteral(v) => GlobalInitializer::Int(*v),
            banjo_sir::ExprKind::FpLiteral(v) => GlobalInitializer::Fp(*v),
            banjo_sir::ExprKind::BoolLiteral(v) => GlobalInitializer::Int(*v as i128),
            banjo_sir::ExprKind::StringLiteral(v) => {
                let mut bytes = v.clone().into_bytes();
                bytes.push(0);
                GlobalInitializer::String(bytes)
            }
            _ => GlobalInitializer::None,
        }
    }

    // -- shared helpers -----------------------------------------------------

    pub(crate) fn next_reg(&mut self, ctx: &mut FuncCtx) -> u32 {
        self.module.functions[ctx.func_index as usize].next_virtual_reg()
    }

    pub(crate) fn push_instr(&mut self, ctx: &mut FuncCtx, instr: Instruction) {
        self.module.functions[ctx.func_index as usize]
            .block_mut(ctx.current_block)
            .append(instr);
    }

    pub(crate) fn create_block(&mut self, ctx: &mut FuncCtx, label: String) -> BlockId {
        self.module.functions[ctx.func_index as usize].create_block(label)
    }

    /// Allocate stack storage in the entry block.
    pub(crate) fn alloc_local(&mut self, ctx: &mut FuncCtx, ty: &banjo_sir::Type) -> LocalSlot {
        let ssa_ty = self.convert_type(ty);
        let reg = self.next_reg(ctx);

        let instr = Instruction::new(
            Opcode::Alloca,
            Some(reg),
            vec![Operand::type_token(ssa_ty)],
        );

        let entry = &mut self.module.functions[ctx.func_index as usize].blocks[0];
        entry.instrs.insert(ctx.entry_allocas, instr);
        ctx.entry_allocas += 1;

        LocalSlot { addr: reg, ty: ty.clone() }
    }

    /// Store a value (scalar store or aggregate copy) into a slot address.
    pub(crate) fn store_value(
        &mut self,
        ctx: &mut FuncCtx,
        value: Operand,
        addr: u32,
        sir_ty: &banjo_sir::Type,
    ) {
        let ssa_ty = self.convert_type(sir_ty);

        if self.is_aggregate(sir_ty) {
            // Aggregate operands already carry the source address.
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::Copy,
                    None,
                    vec![
                        Operand::register(addr, ssa_ty.clone()),
                        value,
                        Operand::type_token(ssa_ty),
                    ],
                ),
            );
        } else {
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::Store,
                    None,
                    vec![value, Operand::register(addr, Type::ADDR)],
                ),
            );
        }
    }

    pub(crate) fn unique_string_name(&mut self) -> String {
        let name = format!("str.{}", self.next_string);
        self.next_string += 1;
        name
    }

    fn mentions_generics(&self, def: &banjo_sir::FuncDef) -> bool {
        self.func_type_mentions_generics(&def.ty)
    }

    fn func_type_mentions_generics(&self, ty: &banjo_sir::FuncType) -> bool {
        fn is_open(ty: &banjo_sir::Type) -> bool {
            matches!(
                ty,
                banjo_sir::Type::GenericParam { .. } | banjo_sir::Type::GenericInstance { .. }
            )
        }

        ty.params.iter().any(is_open) || is_open(&ty.return_type)
    }
}

fn struct_path_segment(unit: &Unit, def: &banjo_sir::StructDef) -> String {
    if def.specialization_args.is_empty() {
        def.ident.name.clone()
    } else {
        let args: Vec<String> = def
            .specialization_args
            .iter()
            .map(|a| mangle::type_name(unit, a))
            .collect();
        format!("{}[{}]", def.ident.name, args.join(","))
    }
}

/// Convenience entry point: lower an analyzed unit for a calling
/// convention.
pub fn generate(unit: &Unit, calling_conv: CallingConv) -> Module {
    SsaGenerator::new(unit, calling_conv).generate()
}
