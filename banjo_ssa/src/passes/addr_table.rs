//! The address-table pass for hot reloading
//!
//! Collects every function defined in the module into an address table and
//! rewrites direct calls to those functions into indirect calls through
//! the table's slots, reached via the well-known `addr_table` symbol. The
//! table layout is serialized into a dedicated section at emit time so the
//! reloader can find any function's slot by name.

use crate::{
    AddrTable, ExternGlobalDecl, Instruction, Module, Opcode, Operand, OperandKind, Primitive,
    Type,
};

pub const ADDR_TABLE_SYMBOL: &str = "addr_table";

pub struct AddrTablePass;

impl AddrTablePass {
    pub fn run(&self, module: &mut Module) {
        let mut table = AddrTable::new();
        for func in &module.functions {
            table.append(func.name.clone());
        }

        // The table itself is reached through an external symbol so the
        // same code works in the batch binary and in reloaded functions.
        let table_global = module.add_external_global(ExternGlobalDecl {
            name: ADDR_TABLE_SYMBOL.to_string(),
            ty: Type::ADDR,
        });

        let slot_offsets: Vec<u64> = (0..table.entries.len())
            .map(|i| table.compute_offset(i as u32))
            .collect();

        for func in &mut module.functions {
            for block_idx in 0..func.blocks.len() {
                let mut index = 0;
                while index < func.blocks[block_idx].instrs.len() {
                    let block = &func.blocks[block_idx];
                    let instr = &block.instrs[index];
                    if instr.opcode != Opcode::Call {
                        index += 1;
                        continue;
                    }

                    let OperandKind::Func(callee_index) = instr.operands[0].kind else {
                        index += 1;
                        continue;
                    };

                    let result_ty = instr.operands[0].ty.clone();
                    let slot_offset = slot_offsets[callee_index as usize];

                    // %slot = offsetptr addr_table, slot_offset
                    // %target = load addr, %slot
                    // call %target, args...
                    let slot_reg = func.next_virtual_reg();
                    let target_reg = func.next_virtual_reg();

                    let block = &mut func.blocks[block_idx];
                    let offset_instr = Instruction::new(
                        Opcode::OffsetPtr,
                        Some(slot_reg),
                        vec![
                            Operand::extern_global(table_global, Type::primitive(Primitive::U8)),
                            Operand::int_immediate(
                                slot_offset as i128,
                                Type::primitive(Primitive::U64),
                            ),
                        ],
                    );
                    let load_instr = Instruction::new(
                        Opcode::Load,
                        Some(target_reg),
                        vec![Operand::register(slot_reg, Type::ADDR)],
                    );

                    block.instrs[index].operands[0] = Operand {
                        kind: OperandKind::Register(target_reg),
                        ty: result_ty,
                    };

                    block.instrs.insert(index, load_instr);
                    block.instrs.insert(index, offset_instr);
                    index += 3;
                }
            }
        }

        module.addr_table = Some(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallingConv, Function, FunctionType};

    #[test]
    fn test_rewrites_direct_calls() {
        let void_ty = FunctionType::new(Vec::new(), Type::VOID, CallingConv::X86_64SysV);

        let mut callee = Function::new("helper", void_ty.clone());
        let entry = callee.create_block("entry");
        callee
            .block_mut(entry)
            .append(Instruction::new(Opcode::Ret, None, Vec::new()));

        let mut caller = Function::new("main", void_ty);
        let entry = caller.create_block("entry");
        caller.block_mut(entry).append(Instruction::new(
            Opcode::Call,
            None,
            vec![Operand::func(0, Type::VOID)],
        ));
        caller
            .block_mut(entry)
            .append(Instruction::new(Opcode::Ret, None, Vec::new()));

        let mut module = Module::new();
        module.add_function(callee);
        module.add_function(caller);

        AddrTablePass.run(&mut module);

        let table = module.addr_table.as_ref().unwrap();
        assert_eq!(table.entries, vec!["helper".to_string(), "main".to_string()]);

        // The call now goes through a loaded slot.
        let caller = &module.functions[1];
        let instrs = &caller.blocks[0].instrs;
        assert_eq!(instrs[0].opcode, Opcode::OffsetPtr);
        assert_eq!(instrs[1].opcode, Opcode::Load);
        assert_eq!(instrs[2].opcode, Opcode::Call);
        assert!(matches!(
            instrs[2].operands[0].kind,
            OperandKind::Register(_)
        ));
    }
}
