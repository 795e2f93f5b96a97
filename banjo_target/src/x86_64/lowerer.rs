//! x86-64 instruction selection
//!
//! Lowers SSA functions to x86-64 machine code over virtual registers.
//! Allocas become stack slots, aggregate values travel as addresses,
//! two-address arithmetic is formed as `mov dst, lhs; op dst, rhs`, and
//! calls place arguments per the active calling convention. Block
//! parameters are satisfied by moves emitted on the incoming edges.

use super::abi::{abi_for, Abi};
use super::opcode::{self as op};
use super::register::*;
use crate::CodeModel;
use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode::{
    Function, Global, GlobalValue, IndirectAddress, IndirectBase, Instruction, Module, Operand,
    Register, RegisterClass, RegUsage, StackSlotKind, Symbol, FLAG_CALL, FLAG_FLOAT,
};
use banjo_ssa as ssa;
use banjo_ssa::{Comparison, Opcode, OperandKind};
use hashbrown::HashMap;

pub struct SsaLowerer<'a> {
    ssa: &'a ssa::Module,
    abi: &'static Abi,
    code_model: CodeModel,
    float_constants: Vec<Global>,
    next_float_label: u32,
}

struct FuncState {
    func: Function,
    vreg_map: HashMap<u32, u32>,
    alloca_slots: HashMap<u32, usize>,
    block_labels: Vec<String>,
    current: usize,
    max_call_args: u64,
}

impl FuncState {
    fn emit(&mut self, instr: Instruction) {
        self.func.blocks[self.current].append(instr);
    }
}

impl<'a> SsaLowerer<'a> {
    pub fn new(ssa: &'a ssa::Module, calling_conv: ssa::CallingConv, code_model: CodeModel) -> Self {
        Self {
            ssa,
            abi: abi_for(calling_conv),
            code_model,
            float_constants: Vec::new(),
            next_float_label: 0,
        }
    }

    pub fn lower_module(mut self) -> BanjoResult<Module> {
        let mut module = Module::new();

        for func in &self.ssa.functions {
            let lowered = self.lower_func(func)?;
            module.global_symbols.insert(func.name.clone());
            module.add_function(lowered);
        }

        for global in &self.ssa.globals {
            module.globals.push(lower_global(self.ssa, global));
        }
        module.globals.append(&mut self.float_constants);

        for decl in &self.ssa.external_functions {
            module.add_external_symbol(decl.name.clone());
        }
        for decl in &self.ssa.external_globals {
            module.add_external_symbol(decl.name.clone());
        }

        module.dll_exports = self.ssa.dll_exports.clone();
        module.addr_table = self
            .ssa
            .addr_table
            .as_ref()
            .map(|table| table.entries.clone());

        Ok(module)
    }

    fn lower_func(&mut self, ssa_func: &ssa::Function) -> BanjoResult<Function> {
        let mut state = FuncState {
            func: Function::new(ssa_func.name.clone()),
            vreg_map: HashMap::new(),
            alloca_slots: HashMap::new(),
            block_labels: Vec::new(),
            current: 0,
            max_call_args: 0,
        };

        // Create the machine blocks up front so branches can name them.
        for (index, block) in ssa_func.blocks.iter().enumerate() {
            let label = if index == 0 {
                format!("{}.entry", ssa_func.name)
            } else {
                format!("{}.{}", ssa_func.name, block.label)
            };
            state.func.create_block(label.clone());
            state.block_labels.push(label);
        }

        for (index, block) in ssa_func.blocks.iter().enumerate() {
            state.current = index;

            // Block parameters already own machine registers.
            for (reg, ty) in block.param_regs.iter().zip(&block.param_types) {
                let class = class_of(ty);
                self.map_vreg(&mut state, *reg, class);
            }

            for instr in &block.instrs {
                self.lower_instr(&mut state, ssa_func, instr)?;
            }
        }

        state.func.frame.reserved = self.abi.shadow_space + state.max_call_args;
        Ok(state.func)
    }

    fn map_vreg(&self, state: &mut FuncState, ssa_reg: u32, class: RegisterClass) -> u32 {
        if let Some(mapped) = state.vreg_map.get(&ssa_reg) {
            return *mapped;
        }
        let mapped = state.func.alloc_virtual_reg(class);
        state.vreg_map.insert(ssa_reg, mapped);
        mapped
    }

    fn temp(&self, state: &mut FuncState, class: RegisterClass) -> u32 {
        state.func.alloc_virtual_reg(class)
    }

    fn lower_instr(
        &mut self,
        state: &mut FuncState,
        ssa_func: &ssa::Function,
        instr: &ssa::Instruction,
    ) -> BanjoResult<()> {
        match instr.opcode {
            Opcode::Alloca => {
                let ty = &instr.operands[0].ty;
                let size = self.ssa.size_of(ty).max(1);
                let alignment = self.ssa.align_of(ty).max(1);
                let slot = state
                    .func
                    .frame
                    .add_slot(size, alignment, StackSlotKind::Alloca);
                state.func.unwind.alloca_size += size;

                let dest = instr.dest.unwrap();
                state.alloca_slots.insert(dest, slot);

                let mapped = self.map_vreg(state, dest, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::LEA,
                    vec![Operand::virtual_reg(mapped, 8), Operand::stack_slot(slot, 8)],
                ));
            }
            Opcode::Load => {
                let ty = &instr.operands[0].ty;
                let dest = instr.dest.unwrap();
                let address = self.address_of(state, &instr.operands[0]);
                self.emit_load(state, dest, ty, address);
            }
            Opcode::Store => {
                let value = &instr.operands[0];
                let address = self.address_of(state, &instr.operands[1]);
                self.emit_store(state, value, address);
            }
            Opcode::LoadArg => {
                let index = instr.operands[0].as_int_immediate().unwrap_or(0) as usize;
                let ty = &instr.operands[0].ty;
                let dest = instr.dest.unwrap();
                self.lower_load_arg(state, ssa_func, index, ty, dest);
            }
            Opcode::MemberPtr => {
                let base = &instr.operands[0];
                let member = instr.operands[1].as_int_immediate().unwrap_or(0) as u32;
                let offset = self.member_offset(&base.ty, member);

                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                let base_reg = self.force_gpr(state, base);
                state.emit(Instruction::new(
                    op::LEA,
                    vec![
                        Operand::virtual_reg(dest, 8),
                        Operand::indirect(
                            IndirectAddress::base_disp(
                                IndirectBase::Reg(Register::Virtual(base_reg)),
                                offset as i32,
                            ),
                            8,
                        ),
                    ],
                ));
            }
            Opcode::OffsetPtr => {
                self.lower_offset_ptr(state, instr);
            }
            Opcode::Copy => {
                self.lower_copy(state, instr);
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor => {
                self.lower_two_address(state, instr);
            }
            Opcode::Sdiv | Opcode::Srem | Opcode::Udiv | Opcode::Urem => {
                self.lower_division(state, instr);
            }
            Opcode::Shl | Opcode::Shr => {
                self.lower_shift(state, instr);
            }
            Opcode::Fadd | Opcode::Fsub | Opcode::Fmul | Opcode::Fdiv => {
                self.lower_float_arith(state, instr);
            }
            Opcode::Sqrt => {
                let ty = &instr.operands[0].ty;
                let size = self.operand_size(ty);
                let opcode = if size == 4 { op::SQRTSS } else { op::SQRTSD };

                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                let src = self.to_operand(state, &instr.operands[0]);
                let mut machine =
                    Instruction::new(opcode, vec![Operand::virtual_reg(dest, size), src]);
                machine.set_flag(FLAG_FLOAT);
                state.emit(machine);
            }
            Opcode::Uextend | Opcode::Sextend | Opcode::Truncate => {
                self.lower_int_conversion(state, instr);
            }
            Opcode::Fpromote | Opcode::Fdemote | Opcode::Utof | Opcode::Stof | Opcode::Ftou
            | Opcode::Ftos => {
                self.lower_float_conversion(state, instr);
            }
            Opcode::Jmp => {
                let target = instr.operands[0].as_branch_target().unwrap();
                self.emit_branch_args(state, ssa_func, target);
                let label = state.block_labels[target.block.index()].clone();
                state.emit(Instruction::new(op::JMP, vec![Operand::label(label)]));
            }
            Opcode::Cjmp | Opcode::Fcjmp => {
                self.lower_cond_branch(state, ssa_func, instr);
            }
            Opcode::Select => {
                self.lower_select(state, instr);
            }
            Opcode::Call => {
                self.lower_call(state, instr)?;
            }
            Opcode::Ret => {
                if let Some(value) = instr.operands.first() {
                    let size = self.operand_size(&value.ty);
                    let machine_value = self.to_operand(state, value);

                    if value.ty.is_fp() {
                        let mut mov = Instruction::new(
                            op::float_mov(size),
                            vec![Operand::physical(self.abi.float_return, size), machine_value],
                        );
                        mov.set_flag(FLAG_FLOAT);
                        state.emit(mov);
                    } else {
                        state.emit(Instruction::new(
                            op::MOV,
                            vec![Operand::physical(self.abi.int_return, size), machine_value],
                        ));
                    }
                }
                state.emit(Instruction::new(op::RET, Vec::<Operand>::new()));
            }
        }

        Ok(())
    }

    // -- memory -------------------------------------------------------------

    /// Resolve an address-producing SSA operand into a machine address.
    fn address_of(&mut self, state: &mut FuncState, operand: &ssa::Operand) -> Operand {
        let size = self.operand_size(&operand.ty);

        match &operand.kind {
            OperandKind::Register(reg) => {
                if let Some(slot) = state.alloca_slots.get(reg) {
                    return Operand::stack_slot_offset(*slot, 0, size);
                }
                let mapped = self.map_vreg(state, *reg, RegisterClass::Gpr);
                Operand::indirect(
                    IndirectAddress::base(IndirectBase::Reg(Register::Virtual(mapped))),
                    size,
                )
            }
            OperandKind::Global(index) => {
                let name = self.ssa.globals[*index as usize].name.clone();
                Operand::symbol_deref(Symbol::new(name), size)
            }
            OperandKind::ExternGlobal(index) => {
                let name = self.ssa.external_globals[*index as usize].name.clone();
                Operand::symbol_deref(Symbol::new(name), size)
            }
            _ => Operand::int_immediate(0, size),
        }
    }

    fn emit_load(&mut self, state: &mut FuncState, dest: u32, ty: &ssa::Type, address: Operand) {
        let size = self.operand_size(ty);

        if ty.is_fp() {
            let dest = self.map_vreg(state, dest, RegisterClass::Float);
            let mut mov = Instruction::new(
                op::float_mov(size),
                vec![Operand::virtual_reg(dest, size), address],
            );
            mov.set_flag(FLAG_FLOAT);
            state.emit(mov);
        } else {
            let dest = self.map_vreg(state, dest, RegisterClass::Gpr);
            state.emit(Instruction::new(
                op::MOV,
                vec![Operand::virtual_reg(dest, size), address],
            ));
        }
    }

    fn emit_store(&mut self, state: &mut FuncState, value: &ssa::Operand, mut address: Operand) {
        let size = self.operand_size(&value.ty);
        address.size = size;

        if value.ty.is_fp() {
            let reg = self.force_float(state, value);
            let mut mov = Instruction::new(
                op::float_mov(size),
                vec![address, Operand::virtual_reg(reg, size)],
            );
            mov.set_flag(FLAG_FLOAT);
            state.emit(mov);
        } else {
            match &value.kind {
                OperandKind::IntImmediate(imm) if fits_i32(*imm) => {
                    state.emit(Instruction::new(
                        op::MOV,
                        vec![address, Operand::int_immediate(*imm as i64, size)],
                    ));
                }
                _ => {
                    let reg = self.force_gpr(state, value);
                    state.emit(Instruction::new(
                        op::MOV,
                        vec![address, Operand::virtual_reg(reg, size)],
                    ));
                }
            }
        }
    }

    fn lower_load_arg(
        &mut self,
        state: &mut FuncState,
        ssa_func: &ssa::Function,
        index: usize,
        ty: &ssa::Type,
        dest: u32,
    ) {
        let size = self.operand_size(ty);
        let ms_abi = self.abi.shadow_space > 0;

        // Count how many previous parameters consumed each register file.
        let mut int_used = 0usize;
        let mut float_used = 0usize;
        for param in ssa_func.ty.params.iter().take(index) {
            if param.is_fp() {
                float_used += 1;
            } else {
                int_used += 1;
            }
            if ms_abi {
                // MS x64 slots are positional across both files.
                int_used = int_used.max(float_used);
                float_used = int_used;
            }
        }

        if ty.is_fp() {
            if let Some(reg) = self.abi.float_args.get(float_used) {
                let dest = self.map_vreg(state, dest, RegisterClass::Float);
                let mut mov = Instruction::new(
                    op::float_mov(size),
                    vec![Operand::virtual_reg(dest, size), Operand::physical(*reg, size)],
                );
                mov.set_flag(FLAG_FLOAT);
                state.emit(mov);
            } else {
                log::warn!("stack-passed parameter {} is not supported", index);
            }
        } else if let Some(reg) = self.abi.int_args.get(int_used) {
            let dest = self.map_vreg(state, dest, RegisterClass::Gpr);
            state.emit(Instruction::new(
                op::MOV,
                vec![Operand::virtual_reg(dest, size), Operand::physical(*reg, size)],
            ));
        } else {
            log::warn!("stack-passed parameter {} is not supported", index);
        }
    }

    fn lower_offset_ptr(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let base = &instr.operands[0];
        let index = &instr.operands[1];
        let element_size = self.ssa.size_of(&base.ty).max(1);

        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
        let base_reg = self.force_gpr(state, base);

        match &index.kind {
            OperandKind::IntImmediate(value) => {
                let displacement = (*value as i64) * element_size as i64;
                state.emit(Instruction::new(
                    op::LEA,
                    vec![
                        Operand::virtual_reg(dest, 8),
                        Operand::indirect(
                            IndirectAddress::base_disp(
                                IndirectBase::Reg(Register::Virtual(base_reg)),
                                displacement as i32,
                            ),
                            8,
                        ),
                    ],
                ));
            }
            _ => {
                let index_reg = self.force_gpr(state, index);

                if matches!(element_size, 1 | 2 | 4 | 8) {
                    let mut address = IndirectAddress::base_index_scale(
                        IndirectBase::Reg(Register::Virtual(base_reg)),
                        Register::Virtual(index_reg),
                        element_size as u8,
                    );
                    address.displacement = 0;
                    state.emit(Instruction::new(
                        op::LEA,
                        vec![Operand::virtual_reg(dest, 8), Operand::indirect(address, 8)],
                    ));
                } else {
                    // Scale through a multiply, then add.
                    let scaled = self.temp(state, RegisterClass::Gpr);
                    state.emit(Instruction::new(
                        op::MOV,
                        vec![
                            Operand::virtual_reg(scaled, 8),
                            Operand::virtual_reg(index_reg, 8),
                        ],
                    ));
                    state.emit(Instruction::new(
                        op::IMUL,
                        vec![
                            Operand::virtual_reg(scaled, 8),
                            Operand::int_immediate(element_size as i64, 8),
                        ],
                    ));
                    state.emit(Instruction::new(
                        op::LEA,
                        vec![
                            Operand::virtual_reg(dest, 8),
                            Operand::indirect(
                                IndirectAddress::base_index_scale(
                                    IndirectBase::Reg(Register::Virtual(base_reg)),
                                    Register::Virtual(scaled),
                                    1,
                                ),
                                8,
                            ),
                        ],
                    ));
                }
            }
        }
    }

    fn lower_copy(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let size = self.ssa.size_of(&instr.operands[2].ty);
        let dst = self.force_gpr(state, &instr.operands[0]);
        let src = self.force_gpr(state, &instr.operands[1]);

        // Chunked moves through a temporary.
        let mut offset = 0u64;
        while offset < size {
            let chunk: u64 = match size - offset {
                n if n >= 8 => 8,
                n if n >= 4 => 4,
                n if n >= 2 => 2,
                _ => 1,
            };

            let tmp = self.temp(state, RegisterClass::Gpr);
            state.emit(Instruction::new(
                op::MOV,
                vec![
                    Operand::virtual_reg(tmp, chunk as u8),
                    Operand::indirect(
                        IndirectAddress::base_disp(
                            IndirectBase::Reg(Register::Virtual(src)),
                            offset as i32,
                        ),
                        chunk as u8,
                    ),
                ],
            ));
            state.emit(Instruction::new(
                op::MOV,
                vec![
                    Operand::indirect(
                        IndirectAddress::base_disp(
                            IndirectBase::Reg(Register::Virtual(dst)),
                            offset as i32,
                        ),
                        chunk as u8,
                    ),
                    Operand::virtual_reg(tmp, chunk as u8),
                ],
            ));

            offset += chunk;
        }
    }

    fn lower_two_address(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let ty = &instr.operands[0].ty;
        let size = self.operand_size(ty);

        let opcode = match instr.opcode {
            Opcode::Add => op::ADD,
            Opcode::Sub => op::SUB,
            Opcode::Mul => op::IMUL,
            Opcode::And => op::AND,
            Opcode::Or => op::OR,
            Opcode::Xor => op::XOR,
            _ => unreachable!(),
        };

        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
        let lhs = self.to_operand(state, &instr.operands[0]);
        let rhs = self.to_operand(state, &instr.operands[1]);

        state.emit(Instruction::new(
            op::MOV,
            vec![Operand::virtual_reg(dest, size), lhs],
        ));
        state.emit(Instruction::new(
            opcode,
            vec![Operand::virtual_reg(dest, size), rhs],
        ));
    }

    fn lower_division(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let ty = &instr.operands[0].ty;
        let size = self.operand_size(ty);
        let signed = matches!(instr.opcode, Opcode::Sdiv | Opcode::Srem);
        let wants_remainder = matches!(instr.opcode, Opcode::Srem | Opcode::Urem);

        let lhs = self.to_operand(state, &instr.operands[0]);
        let rhs_reg = self.force_gpr(state, &instr.operands[1]);

        state.emit(Instruction::new(
            op::MOV,
            vec![Operand::physical(RAX, size), lhs],
        ));

        if signed {
            let extend = if size == 8 { op::CQO } else { op::CDQ };
            let mut sign_extend = Instruction::new(extend, Vec::<Operand>::new());
            sign_extend.add_reg_op(Register::Physical(RAX), RegUsage::Use);
            sign_extend.add_reg_op(Register::Physical(RDX), RegUsage::Def);
            state.emit(sign_extend);
        } else {
            let mut zero = Instruction::new(
                op::XOR,
                vec![Operand::physical(RDX, size), Operand::physical(RDX, size)],
            );
            zero.add_reg_op(Register::Physical(RDX), RegUsage::Def);
            state.emit(zero);
        }

        let divide = if signed { op::IDIV } else { op::DIV };
        let mut div_instr =
            Instruction::new(divide, vec![Operand::virtual_reg(rhs_reg, size)]);
        div_instr.add_reg_op(Register::Physical(RAX), RegUsage::UseDef);
        div_instr.add_reg_op(Register::Physical(RDX), RegUsage::UseDef);
        state.emit(div_instr);

        let result_reg = if wants_remainder { RDX } else { RAX };
        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
        state.emit(Instruction::new(
            op::MOV,
            vec![
                Operand::virtual_reg(dest, size),
                Operand::physical(result_reg, size),
            ],
        ));
    }

    fn lower_shift(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let ty = &instr.operands[0].ty;
        let size = self.operand_size(ty);
        let opcode = if instr.opcode == Opcode::Shl { op::SHL } else { op::SHR };

        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
        let lhs = self.to_operand(state, &instr.operands[0]);
        state.emit(Instruction::new(
            op::MOV,
            vec![Operand::virtual_reg(dest, size), lhs],
        ));

        match &instr.operands[1].kind {
            OperandKind::IntImmediate(amount) => {
                state.emit(Instruction::new(
                    opcode,
                    vec![
                        Operand::virtual_reg(dest, size),
                        Operand::int_immediate(*amount as i64, 1),
                    ],
                ));
            }
            _ => {
                // Variable shifts go through CL.
                let amount = self.to_operand(state, &instr.operands[1]);
                state.emit(Instruction::new(
                    op::MOV,
                    vec![Operand::physical(RCX, size), amount],
                ));
                let mut shift = Instruction::new(
                    opcode,
                    vec![Operand::virtual_reg(dest, size), Operand::physical(RCX, 1)],
                );
                shift.add_reg_op(Register::Physical(RCX), RegUsage::Use);
                state.emit(shift);
            }
        }
    }

    fn lower_float_arith(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let ty = &instr.operands[0].ty;
        let size = self.operand_size(ty);

        let opcode = match (instr.opcode, size) {
            (Opcode::Fadd, 4) => op::ADDSS,
            (Opcode::Fadd, _) => op::ADDSD,
            (Opcode::Fsub, 4) => op::SUBSS,
            (Opcode::Fsub, _) => op::SUBSD,
            (Opcode::Fmul, 4) => op::MULSS,
            (Opcode::Fmul, _) => op::MULSD,
            (Opcode::Fdiv, 4) => op::DIVSS,
            (Opcode::Fdiv, _) => op::DIVSD,
            _ => unreachable!(),
        };

        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
        let lhs = self.to_operand(state, &instr.operands[0]);
        let rhs = self.to_operand(state, &instr.operands[1]);

        let mut mov = Instruction::new(
            op::float_mov(size),
            vec![Operand::virtual_reg(dest, size), lhs],
        );
        mov.set_flag(FLAG_FLOAT);
        state.emit(mov);

        let mut arith = Instruction::new(opcode, vec![Operand::virtual_reg(dest, size), rhs]);
        arith.set_flag(FLAG_FLOAT);
        state.emit(arith);
    }

    fn lower_int_conversion(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let from_size = self.operand_size(&instr.operands[0].ty);
        let to_size = self.operand_size(&instr.operands[1].ty);

        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
        let src = self.to_operand(state, &instr.operands[0]);

        match instr.opcode {
            Opcode::Truncate => {
                state.emit(Instruction::new(
                    op::MOV,
                    vec![Operand::virtual_reg(dest, to_size), src],
                ));
            }
            Opcode::Sextend => {
                state.emit(Instruction::new(
                    op::MOVSX,
                    vec![Operand::virtual_reg(dest, to_size), src],
                ));
            }
            Opcode::Uextend => {
                if from_size == 4 {
                    // A 32-bit move zero-extends into the full register.
                    state.emit(Instruction::new(
                        op::MOV,
                        vec![Operand::virtual_reg(dest, 4), src],
                    ));
                } else {
                    state.emit(Instruction::new(
                        op::MOVZX,
                        vec![Operand::virtual_reg(dest, to_size), src],
                    ));
                }
            }
            _ => unreachable!(),
        }
    }

    fn lower_float_conversion(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let from_ty = instr.operands[0].ty.clone();
        let to_ty = instr.operands[1].ty.clone();
        let from_size = self.operand_size(&from_ty);
        let to_size = self.operand_size(&to_ty);

        match instr.opcode {
            Opcode::Fpromote | Opcode::Fdemote => {
                let opcode = if instr.opcode == Opcode::Fpromote {
                    op::CVTSS2SD
                } else {
                    op::CVTSD2SS
                };
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                let src = self.to_operand(state, &instr.operands[0]);
                let mut cvt =
                    Instruction::new(opcode, vec![Operand::virtual_reg(dest, to_size), src]);
                cvt.set_flag(FLAG_FLOAT);
                state.emit(cvt);
            }
            Opcode::Stof | Opcode::Utof => {
                let opcode = if to_size == 4 { op::CVTSI2SS } else { op::CVTSI2SD };
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                let src_reg = self.force_gpr(state, &instr.operands[0]);
                let mut cvt = Instruction::new(
                    opcode,
                    vec![
                        Operand::virtual_reg(dest, to_size),
                        Operand::virtual_reg(src_reg, from_size.max(4)),
                    ],
                );
                cvt.set_flag(FLAG_FLOAT);
                state.emit(cvt);
            }
            Opcode::Ftos | Opcode::Ftou => {
                let opcode = if from_size == 4 { op::CVTSS2SI } else { op::CVTSD2SI };
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                let src = self.to_operand(state, &instr.operands[0]);
                let mut cvt = Instruction::new(
                    opcode,
                    vec![Operand::virtual_reg(dest, to_size.max(4)), src],
                );
                cvt.set_flag(FLAG_FLOAT);
                state.emit(cvt);
            }
            _ => unreachable!(),
        }
    }

    fn lower_cond_branch(
        &mut self,
        state: &mut FuncState,
        ssa_func: &ssa::Function,
        instr: &ssa::Instruction,
    ) {
        let comparison = instr.operands[1].as_comparison().unwrap();
        let true_target = instr.operands[3].as_branch_target().unwrap().clone();
        let false_target = instr.operands[4].as_branch_target().unwrap().clone();

        let ty = instr.operands[0].ty.clone();
        let size = self.operand_size(&ty);

        if instr.opcode == Opcode::Fcjmp {
            let lhs = self.force_float(state, &instr.operands[0]);
            let rhs = self.to_operand(state, &instr.operands[2]);
            let opcode = if size == 4 { op::UCOMISS } else { op::UCOMISD };
            let mut cmp =
                Instruction::new(opcode, vec![Operand::virtual_reg(lhs, size), rhs]);
            cmp.set_flag(FLAG_FLOAT);
            state.emit(cmp);
        } else {
            let lhs_reg = self.force_gpr(state, &instr.operands[0]);
            let rhs = self.to_operand(state, &instr.operands[2]);
            state.emit(Instruction::new(
                op::CMP,
                vec![Operand::virtual_reg(lhs_reg, size), rhs],
            ));
        }

        self.emit_branch_args(state, ssa_func, &true_target);
        self.emit_branch_args(state, ssa_func, &false_target);

        let jcc = jcc_for(comparison);
        let true_label = state.block_labels[true_target.block.index()].clone();
        let false_label = state.block_labels[false_target.block.index()].clone();

        state.emit(Instruction::new(jcc, vec![Operand::label(true_label)]));
        state.emit(Instruction::new(op::JMP, vec![Operand::label(false_label)]));
    }

    fn lower_select(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let comparison = instr.operands[1].as_comparison().unwrap();
        let cmp_ty = instr.operands[0].ty.clone();
        let cmp_size = self.operand_size(&cmp_ty);
        let value_size = self.operand_size(&instr.operands[3].ty).max(2);

        if cmp_ty.is_fp() {
            let lhs_reg = self.force_float(state, &instr.operands[0]);
            let rhs = self.to_operand(state, &instr.operands[2]);
            let opcode = if cmp_size == 4 { op::UCOMISS } else { op::UCOMISD };
            let mut cmp = Instruction::new(
                opcode,
                vec![Operand::virtual_reg(lhs_reg, cmp_size), rhs],
            );
            cmp.set_flag(FLAG_FLOAT);
            state.emit(cmp);
        } else {
            let lhs_reg = self.force_gpr(state, &instr.operands[0]);
            let rhs = self.to_operand(state, &instr.operands[2]);
            state.emit(Instruction::new(
                op::CMP,
                vec![Operand::virtual_reg(lhs_reg, cmp_size), rhs],
            ));
        }

        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
        let false_value = self.to_operand(state, &instr.operands[4]);
        state.emit(Instruction::new(
            op::MOV,
            vec![Operand::virtual_reg(dest, value_size), false_value],
        ));

        // CMOV requires a register source.
        let true_reg = self.force_gpr(state, &instr.operands[3]);
        state.emit(Instruction::new(
            cmov_for(comparison),
            vec![
                Operand::virtual_reg(dest, value_size),
                Operand::virtual_reg(true_reg, value_size),
            ],
        ));
    }

    fn lower_call(&mut self, state: &mut FuncState, instr: &ssa::Instruction) -> BanjoResult<()> {
        let args = &instr.operands[1..];
        let ms_abi = self.abi.shadow_space > 0;

        // Materialize every argument first: temporaries (address loads,
        // float constants) must not land between the moves into argument
        // registers, or the allocator could hand their registers out again.
        let prepared: Vec<(bool, u8, Operand)> = args
            .iter()
            .map(|arg| {
                let size = self.operand_size(&arg.ty);
                (arg.ty.is_fp(), size, self.to_operand(state, arg))
            })
            .collect();

        let mut int_used = 0usize;
        let mut float_used = 0usize;
        let mut stack_bytes = 0u64;

        for (is_fp, size, value) in prepared {
            if is_fp {
                if let Some(reg) = self.abi.float_args.get(float_used).copied() {
                    let mut mov = Instruction::new(
                        op::float_mov(size),
                        vec![Operand::physical(reg, size), value],
                    );
                    mov.set_flag(FLAG_FLOAT);
                    state.emit(mov);
                } else {
                    self.emit_stack_arg(state, value, size, stack_bytes);
                    stack_bytes += 8;
                }
                float_used += 1;
            } else {
                if let Some(reg) = self.abi.int_args.get(int_used).copied() {
                    state.emit(Instruction::new(
                        op::MOV,
                        vec![Operand::physical(reg, size.max(4)), value],
                    ));
                } else {
                    self.emit_stack_arg(state, value, size, stack_bytes);
                    stack_bytes += 8;
                }
                int_used += 1;
            }

            if ms_abi {
                int_used = int_used.max(float_used);
                float_used = int_used;
            }
        }

        state.max_call_args = state.max_call_args.max(stack_bytes);

        // The callee operand.
        let callee = match &instr.operands[0].kind {
            OperandKind::Func(index) => {
                let name = self.ssa.functions[*index as usize].name.clone();
                self.callee_operand(state, name)
            }
            OperandKind::ExternFunc(index) => {
                let name = self.ssa.external_functions[*index as usize].name.clone();
                self.callee_operand(state, name)
            }
            OperandKind::Register(reg) => {
                let mapped = self.map_vreg(state, *reg, RegisterClass::Gpr);
                Operand::virtual_reg(mapped, 8)
            }
            _ => {
                return Err(BanjoError::codegen("unsupported call target"));
            }
        };

        let mut call = Instruction::new(op::CALL, vec![callee]);
        call.set_flag(FLAG_CALL);
        for reg in self.abi.volatile {
            call.add_reg_op(Register::Physical(*reg), RegUsage::Kill);
        }
        state.emit(call);

        // Fetch the result.
        let result_ty = instr.operands[0].ty.clone();
        if let Some(dest) = instr.dest {
            let size = self.operand_size(&result_ty);
            if result_ty.is_fp() {
                let dest = self.map_vreg(state, dest, RegisterClass::Float);
                let mut mov = Instruction::new(
                    op::float_mov(size),
                    vec![
                        Operand::virtual_reg(dest, size),
                        Operand::physical(self.abi.float_return, size),
                    ],
                );
                mov.set_flag(FLAG_FLOAT);
                state.emit(mov);
            } else {
                let dest = self.map_vreg(state, dest, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::MOV,
                    vec![
                        Operand::virtual_reg(dest, size),
                        Operand::physical(self.abi.int_return, size),
                    ],
                ));
            }
        }

        Ok(())
    }

    fn emit_stack_arg(&mut self, state: &mut FuncState, value: Operand, size: u8, offset: u64) {
        let displacement = (self.abi.shadow_space + offset) as i32;
        let address = Operand::indirect(
            IndirectAddress::base_disp(IndirectBase::Reg(Register::Physical(RSP)), displacement),
            size,
        );

        match value.kind {
            banjo_mcode::operand::OperandKind::Reg(_) => {
                state.emit(Instruction::new(op::MOV, vec![address, value]));
            }
            _ => {
                // Route immediates and memory operands through a register.
                let tmp = self.temp(state, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::MOV,
                    vec![Operand::virtual_reg(tmp, size), value],
                ));
                state.emit(Instruction::new(
                    op::MOV,
                    vec![address, Operand::virtual_reg(tmp, size)],
                ));
            }
        }
    }

    fn callee_operand(&mut self, state: &mut FuncState, name: String) -> Operand {
        match self.code_model {
            CodeModel::Small => Operand::symbol(Symbol::plt(name), 8),
            CodeModel::Large => {
                // Load the absolute address, call through the register.
                let target = self.temp(state, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::MOV,
                    vec![Operand::virtual_reg(target, 8), Operand::symbol(Symbol::new(name), 8)],
                ));
                Operand::virtual_reg(target, 8)
            }
        }
    }

    fn emit_branch_args(
        &mut self,
        state: &mut FuncState,
        ssa_func: &ssa::Function,
        target: &ssa::BranchTarget,
    ) {
        let target_block = ssa_func.block(target.block);

        for (arg, (param_reg, param_ty)) in target
            .args
            .iter()
            .zip(target_block.param_regs.iter().zip(&target_block.param_types))
        {
            let class = class_of(param_ty);
            let param = self.map_vreg(state, *param_reg, class);
            let size = self.operand_size(param_ty);
            let value = self.to_operand(state, arg);

            if param_ty.is_fp() {
                let mut mov = Instruction::new(
                    op::float_mov(size),
                    vec![Operand::virtual_reg(param, size), value],
                );
                mov.set_flag(FLAG_FLOAT);
                state.emit(mov);
            } else {
                state.emit(Instruction::new(
                    op::MOV,
                    vec![Operand::virtual_reg(param, size), value],
                ));
            }
        }
    }

    // -- operand helpers ----------------------------------------------------

    fn operand_size(&self, ty: &ssa::Type) -> u8 {
        match ty.as_primitive() {
            Some(p) => (p.size().max(1)) as u8,
            // Aggregates travel as addresses.
            None => 8,
        }
    }

    fn to_operand(&mut self, state: &mut FuncState, operand: &ssa::Operand) -> Operand {
        let size = self.operand_size(&operand.ty);

        match &operand.kind {
            OperandKind::IntImmediate(value) => Operand::int_immediate(*value as i64, size),
            OperandKind::FpImmediate(value) => {
                let label = self.float_constant(*value, size);
                Operand::symbol_deref(Symbol::new(label), size)
            }
            OperandKind::Register(reg) => {
                let class = class_of(&operand.ty);
                let mapped = self.map_vreg(state, *reg, class);
                Operand::virtual_reg(mapped, size)
            }
            OperandKind::Func(index) => {
                let name = self.ssa.functions[*index as usize].name.clone();
                let dest = self.temp(state, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::LEA,
                    vec![Operand::virtual_reg(dest, 8), Operand::symbol(Symbol::new(name), 8)],
                ));
                Operand::virtual_reg(dest, 8)
            }
            OperandKind::ExternFunc(index) => {
                let name = self.ssa.external_functions[*index as usize].name.clone();
                let dest = self.temp(state, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::LEA,
                    vec![Operand::virtual_reg(dest, 8), Operand::symbol(Symbol::new(name), 8)],
                ));
                Operand::virtual_reg(dest, 8)
            }
            OperandKind::Global(index) => {
                let name = self.ssa.globals[*index as usize].name.clone();
                let dest = self.temp(state, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::LEA,
                    vec![Operand::virtual_reg(dest, 8), Operand::symbol(Symbol::new(name), 8)],
                ));
                Operand::virtual_reg(dest, 8)
            }
            OperandKind::ExternGlobal(index) => {
                let name = self.ssa.external_globals[*index as usize].name.clone();
                let dest = self.temp(state, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::LEA,
                    vec![Operand::virtual_reg(dest, 8), Operand::symbol(Symbol::new(name), 8)],
                ));
                Operand::virtual_reg(dest, 8)
            }
            OperandKind::Undef => Operand::int_immediate(0, size),
            _ => Operand::int_immediate(0, size),
        }
    }

    /// Force an operand into a general-purpose virtual register.
    fn force_gpr(&mut self, state: &mut FuncState, operand: &ssa::Operand) -> u32 {
        let size = self.operand_size(&operand.ty);

        if let OperandKind::Register(reg) = &operand.kind {
            if !operand.ty.is_fp() {
                return self.map_vreg(state, *reg, RegisterClass::Gpr);
            }
        }

        let value = self.to_operand(state, operand);
        if let Some(Register::Virtual(reg)) = value.as_reg() {
            return reg;
        }

        let tmp = self.temp(state, RegisterClass::Gpr);
        state.emit(Instruction::new(
            op::MOV,
            vec![Operand::virtual_reg(tmp, size), value],
        ));
        tmp
    }

    fn force_float(&mut self, state: &mut FuncState, operand: &ssa::Operand) -> u32 {
        let size = self.operand_size(&operand.ty);

        if let OperandKind::Register(reg) = &operand.kind {
            return self.map_vreg(state, *reg, RegisterClass::Float);
        }

        let value = self.to_operand(state, operand);
        let tmp = self.temp(state, RegisterClass::Float);
        let mut mov = Instruction::new(
            op::float_mov(size),
            vec![Operand::virtual_reg(tmp, size), value],
        );
        mov.set_flag(FLAG_FLOAT);
        state.emit(mov);
        tmp
    }

    /// Materialize a floating-point constant in the data section.
    fn float_constant(&mut self, value: f64, size: u8) -> String {
        let name = format!("float.{}", self.next_float_label);
        self.next_float_label += 1;

        let global_value = if size == 4 {
            GlobalValue::Fp(value as f32 as f64)
        } else {
            GlobalValue::Fp(value)
        };

        self.float_constants.push(Global {
            name: name.clone(),
            size: size as u64,
            alignment: size as u64,
            value: global_value,
        });
        name
    }

    fn member_offset(&self, ty: &ssa::Type, member: u32) -> u64 {
        match &ty.kind {
            ssa::types::TypeKind::Struct(id) => self.ssa.member_offset(*id, member),
            ssa::types::TypeKind::Tuple(fields) => {
                let mut offset = 0;
                for (index, field) in fields.iter().enumerate() {
                    let align = self.ssa.align_of(field);
                    offset = (offset + align - 1) & !(align - 1);
                    if index as u32 == member {
                        return offset;
                    }
                    offset += self.ssa.size_of(field);
                }
                offset
            }
            _ => 0,
        }
    }
}

fn class_of(ty: &ssa::Type) -> RegisterClass {
    if ty.is_fp() {
        RegisterClass::Float
    } else {
        RegisterClass::Gpr
    }
}

fn fits_i32(value: i128) -> bool {
    value >= i32::MIN as i128 && value <= i32::MAX as i128
}

fn jcc_for(comparison: Comparison) -> banjo_mcode::Opcode {
    match comparison {
        Comparison::Eq | Comparison::Feq => op::JE,
        Comparison::Ne | Comparison::Fne => op::JNE,
        Comparison::Sgt => op::JG,
        Comparison::Sge => op::JGE,
        Comparison::Slt => op::JL,
        Comparison::Sle => op::JLE,
        Comparison::Ugt | Comparison::Fgt => op::JA,
        Comparison::Uge | Comparison::Fge => op::JAE,
        Comparison::Ult | Comparison::Flt => op::JB,
        Comparison::Ule | Comparison::Fle => op::JBE,
    }
}

fn cmov_for(comparison: Comparison) -> banjo_mcode::Opcode {
    match comparison {
        Comparison::Eq | Comparison::Feq => op::CMOVE,
        Comparison::Ne | Comparison::Fne => op::CMOVNE,
        Comparison::Sgt => op::CMOVG,
        Comparison::Sge => op::CMOVGE,
        Comparison::Slt => op::CMOVL,
        Comparison::Sle => op::CMOVLE,
        Comparison::Ugt | Comparison::Fgt => op::CMOVA,
        Comparison::Uge | Comparison::Fge => op::CMOVAE,
        Comparison::Ult | Comparison::Flt => op::CMOVB,
        Comparison::Ule | Comparison::Fle => op::CMOVBE,
    }
}

pub(crate) fn lower_global(ssa: &ssa::Module, global: &ssa::Global) -> Global {
    let size = ssa.size_of(&global.ty).max(1);
    let alignment = ssa.align_of(&global.ty).max(1);

    let value = match &global.initializer {
        ssa::GlobalInitializer::Int(v) => GlobalValue::Int(*v),
        ssa::GlobalInitializer::Fp(v) => GlobalValue::Fp(*v),
        ssa::GlobalInitializer::Bytes(v) => GlobalValue::Bytes(v.clone()),
        ssa::GlobalInitializer::String(v) => GlobalValue::String(v.clone()),
        ssa::GlobalInitializer::SymbolRef(v) => GlobalValue::SymbolRef(v.clone()),
        ssa::GlobalInitializer::None => GlobalValue::None,
    };

    Global {
        name: global.name.clone(),
        size,
        alignment,
        value,
    }
}
