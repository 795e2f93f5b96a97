//! AArch64 instruction selection
//!
//! Three-address selection over virtual registers. Stack addresses stay
//! symbolic (stack-slot operands) until frame lowering; offsets that
//! overflow the 12-bit immediate field are split by the stack-offset
//! fixup pass afterwards.

use super::abi::{Abi, AAPCS};
use super::opcode::{self as op};
use super::register::*;
use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode::{
    Function, Global, IndirectAddress, IndirectBase, Instruction, Module, Operand, Register,
    RegisterClass, RegUsage, StackSlotKind, Symbol, FLAG_CALL, FLAG_FLOAT,
};
use banjo_ssa as ssa;
use banjo_ssa::{Comparison, Opcode, OperandKind};
use hashbrown::HashMap;

pub struct SsaLowerer<'a> {
    ssa: &'a ssa::Module,
    abi: &'static Abi,
    float_constants: Vec<Global>,
    next_float_label: u32,
}

struct FuncState {
    func: Function,
    vreg_map: HashMap<u32, u32>,
    alloca_slots: HashMap<u32, usize>,
    block_labels: Vec<String>,
    current: usize,
}

impl FuncState {
    fn emit(&mut self, instr: Instruction) {
        self.func.blocks[self.current].append(instr);
    }
}

impl<'a> SsaLowerer<'a> {
    pub fn new(ssa: &'a ssa::Module) -> Self {
        Self {
            ssa,
            abi: &AAPCS,
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
            module
                .globals
                .push(crate::x86_64::lowerer::lower_global(self.ssa, global));
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
        };

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

            for (reg, ty) in block.param_regs.iter().zip(&block.param_types) {
                self.map_vreg(&mut state, *reg, class_of(ty));
            }

            for instr in &block.instrs {
                self.lower_instr(&mut state, ssa_func, instr)?;
            }
        }

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
                    op::ADD,
                    vec![
                        Operand::virtual_reg(mapped, 8),
                        Operand::physical(SP, 8),
                        Operand::stack_slot_offset(slot, 0, 8),
                    ],
                ));
            }
            Opcode::Load => {
                let ty = instr.operands[0].ty.clone();
                let size = operand_size(&ty);
                let address = self.address_of(state, &instr.operands[0]);

                let (opcode, class) = if ty.is_fp() {
                    (op::LDR, RegisterClass::Float)
                } else {
                    (load_op(size), RegisterClass::Gpr)
                };

                let dest = self.map_vreg(state, instr.dest.unwrap(), class);
                let mut load =
                    Instruction::new(opcode, vec![Operand::virtual_reg(dest, size), address]);
                if ty.is_fp() {
                    load.set_flag(FLAG_FLOAT);
                }
                state.emit(load);
            }
            Opcode::Store => {
                let value = instr.operands[0].clone();
                let size = operand_size(&value.ty);
                let mut address = self.address_of(state, &instr.operands[1]);
                address.size = size;

                let (opcode, src) = if value.ty.is_fp() {
                    (op::STR, self.force_reg(state, &value, RegisterClass::Float))
                } else {
                    (store_op(size), self.force_reg(state, &value, RegisterClass::Gpr))
                };

                let mut store =
                    Instruction::new(opcode, vec![address, Operand::virtual_reg(src, size)]);
                if value.ty.is_fp() {
                    store.set_flag(FLAG_FLOAT);
                }
                state.emit(store);
            }
            Opcode::LoadArg => {
                let index = instr.operands[0].as_int_immediate().unwrap_or(0) as usize;
                let ty = instr.operands[0].ty.clone();
                let size = operand_size(&ty);

                let mut int_used = 0usize;
                let mut float_used = 0usize;
                for param in ssa_func.ty.params.iter().take(index) {
                    if param.is_fp() {
                        float_used += 1;
                    } else {
                        int_used += 1;
                    }
                }

                if ty.is_fp() {
                    if let Some(reg) = self.abi.float_args.get(float_used) {
                        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                        let mut mov = Instruction::new(
                            op::FMOV,
                            vec![Operand::virtual_reg(dest, size), Operand::physical(*reg, size)],
                        );
                        mov.set_flag(FLAG_FLOAT);
                        state.emit(mov);
                    }
                } else if let Some(reg) = self.abi.int_args.get(int_used) {
                    let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                    state.emit(Instruction::new(
                        op::MOV,
                        vec![Operand::virtual_reg(dest, size), Operand::physical(*reg, size)],
                    ));
                } else {
                    log::warn!("stack-passed parameter {} is not supported", index);
                }
            }
            Opcode::MemberPtr => {
                let base = &instr.operands[0];
                let member = instr.operands[1].as_int_immediate().unwrap_or(0) as u32;
                let offset = member_offset(self.ssa, &base.ty, member);

                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                let base_reg = self.force_reg(state, base, RegisterClass::Gpr);
                state.emit(Instruction::new(
                    op::ADD,
                    vec![
                        Operand::virtual_reg(dest, 8),
                        Operand::virtual_reg(base_reg, 8),
                        Operand::int_immediate(offset as i64, 8),
                    ],
                ));
            }
            Opcode::OffsetPtr => {
                let base = &instr.operands[0];
                let index = &instr.operands[1];
                let element_size = self.ssa.size_of(&base.ty).max(1);

                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                let base_reg = self.force_reg(state, base, RegisterClass::Gpr);

                match &index.kind {
                    OperandKind::IntImmediate(value) => {
                        state.emit(Instruction::new(
                            op::ADD,
                            vec![
                                Operand::virtual_reg(dest, 8),
                                Operand::virtual_reg(base_reg, 8),
                                Operand::int_immediate(*value as i64 * element_size as i64, 8),
                            ],
                        ));
                    }
                    _ => {
                        let index_reg = self.force_reg(state, index, RegisterClass::Gpr);
                        let scale = self.temp(state, RegisterClass::Gpr);
                        let scaled = self.temp(state, RegisterClass::Gpr);
                        state.emit(Instruction::new(
                            op::MOVZ,
                            vec![
                                Operand::virtual_reg(scale, 8),
                                Operand::int_immediate(element_size as i64, 8),
                            ],
                        ));
                        state.emit(Instruction::new(
                            op::MUL,
                            vec![
                                Operand::virtual_reg(scaled, 8),
                                Operand::virtual_reg(index_reg, 8),
                                Operand::virtual_reg(scale, 8),
                            ],
                        ));
                        state.emit(Instruction::new(
                            op::ADD,
                            vec![
                                Operand::virtual_reg(dest, 8),
                                Operand::virtual_reg(base_reg, 8),
                                Operand::virtual_reg(scaled, 8),
                            ],
                        ));
                    }
                }
            }
            Opcode::Copy => {
                let size = self.ssa.size_of(&instr.operands[2].ty);
                let dst = self.force_reg(state, &instr.operands[0], RegisterClass::Gpr);
                let src = self.force_reg(state, &instr.operands[1], RegisterClass::Gpr);

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
                        load_op(chunk as u8),
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
                        store_op(chunk as u8),
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
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor
            | Opcode::Shl | Opcode::Shr | Opcode::Sdiv | Opcode::Udiv => {
                self.lower_three_address(state, instr);
            }
            Opcode::Srem | Opcode::Urem => {
                // rem = lhs - (lhs / rhs) * rhs
                let ty = instr.operands[0].ty.clone();
                let size = operand_size(&ty);
                let divide = if instr.opcode == Opcode::Srem { op::SDIV } else { op::UDIV };

                let lhs = self.force_reg(state, &instr.operands[0], RegisterClass::Gpr);
                let rhs = self.force_reg(state, &instr.operands[1], RegisterClass::Gpr);
                let quotient = self.temp(state, RegisterClass::Gpr);
                let product = self.temp(state, RegisterClass::Gpr);
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);

                state.emit(Instruction::new(
                    divide,
                    vec![
                        Operand::virtual_reg(quotient, size),
                        Operand::virtual_reg(lhs, size),
                        Operand::virtual_reg(rhs, size),
                    ],
                ));
                state.emit(Instruction::new(
                    op::MUL,
                    vec![
                        Operand::virtual_reg(product, size),
                        Operand::virtual_reg(quotient, size),
                        Operand::virtual_reg(rhs, size),
                    ],
                ));
                state.emit(Instruction::new(
                    op::SUB,
                    vec![
                        Operand::virtual_reg(dest, size),
                        Operand::virtual_reg(lhs, size),
                        Operand::virtual_reg(product, size),
                    ],
                ));
            }
            Opcode::Fadd | Opcode::Fsub | Opcode::Fmul | Opcode::Fdiv => {
                let ty = instr.operands[0].ty.clone();
                let size = operand_size(&ty);
                let opcode = match instr.opcode {
                    Opcode::Fadd => op::FADD,
                    Opcode::Fsub => op::FSUB,
                    Opcode::Fmul => op::FMUL,
                    _ => op::FDIV,
                };

                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                let lhs = self.force_reg(state, &instr.operands[0], RegisterClass::Float);
                let rhs = self.force_reg(state, &instr.operands[1], RegisterClass::Float);

                let mut arith = Instruction::new(
                    opcode,
                    vec![
                        Operand::virtual_reg(dest, size),
                        Operand::virtual_reg(lhs, size),
                        Operand::virtual_reg(rhs, size),
                    ],
                );
                arith.set_flag(FLAG_FLOAT);
                state.emit(arith);
            }
            Opcode::Sqrt => {
                let size = operand_size(&instr.operands[0].ty);
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                let src = self.force_reg(state, &instr.operands[0], RegisterClass::Float);
                let mut sqrt = Instruction::new(
                    op::FSQRT,
                    vec![Operand::virtual_reg(dest, size), Operand::virtual_reg(src, size)],
                );
                sqrt.set_flag(FLAG_FLOAT);
                state.emit(sqrt);
            }
            Opcode::Uextend | Opcode::Sextend | Opcode::Truncate => {
                let from_size = operand_size(&instr.operands[0].ty);
                let to_size = operand_size(&instr.operands[1].ty);
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                let src = self.force_reg(state, &instr.operands[0], RegisterClass::Gpr);

                let opcode = match (instr.opcode, from_size) {
                    (Opcode::Sextend, 1) => op::SXTB,
                    (Opcode::Sextend, 2) => op::SXTH,
                    (Opcode::Sextend, _) => op::SXTW,
                    (Opcode::Uextend, 4) => op::MOV,
                    (Opcode::Uextend, _) => op::UXTW,
                    (Opcode::Truncate, _) => op::MOV,
                    _ => op::MOV,
                };
                let size = if opcode == op::MOV { to_size.min(from_size) } else { to_size };

                state.emit(Instruction::new(
                    opcode,
                    vec![
                        Operand::virtual_reg(dest, size),
                        Operand::virtual_reg(src, from_size),
                    ],
                ));
            }
            Opcode::Fpromote | Opcode::Fdemote => {
                let to_size = operand_size(&instr.operands[1].ty);
                let from_size = operand_size(&instr.operands[0].ty);
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                let src = self.force_reg(state, &instr.operands[0], RegisterClass::Float);
                let mut cvt = Instruction::new(
                    op::FCVT,
                    vec![
                        Operand::virtual_reg(dest, to_size),
                        Operand::virtual_reg(src, from_size),
                    ],
                );
                cvt.set_flag(FLAG_FLOAT);
                state.emit(cvt);
            }
            Opcode::Stof | Opcode::Utof => {
                let to_size = operand_size(&instr.operands[1].ty);
                let from_size = operand_size(&instr.operands[0].ty);
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Float);
                let src = self.force_reg(state, &instr.operands[0], RegisterClass::Gpr);
                let mut cvt = Instruction::new(
                    op::SCVTF,
                    vec![
                        Operand::virtual_reg(dest, to_size),
                        Operand::virtual_reg(src, from_size.max(4)),
                    ],
                );
                cvt.set_flag(FLAG_FLOAT);
                state.emit(cvt);
            }
            Opcode::Ftos | Opcode::Ftou => {
                let to_size = operand_size(&instr.operands[1].ty);
                let from_size = operand_size(&instr.operands[0].ty);
                let opcode = if instr.opcode == Opcode::Ftos { op::FCVTZS } else { op::FCVTZU };
                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                let src = self.force_reg(state, &instr.operands[0], RegisterClass::Float);
                let mut cvt = Instruction::new(
                    opcode,
                    vec![
                        Operand::virtual_reg(dest, to_size.max(4)),
                        Operand::virtual_reg(src, from_size),
                    ],
                );
                cvt.set_flag(FLAG_FLOAT);
                state.emit(cvt);
            }
            Opcode::Jmp => {
                let target = instr.operands[0].as_branch_target().unwrap();
                self.emit_branch_args(state, ssa_func, target);
                let label = state.block_labels[target.block.index()].clone();
                state.emit(Instruction::new(op::B, vec![Operand::label(label)]));
            }
            Opcode::Cjmp | Opcode::Fcjmp => {
                let comparison = instr.operands[1].as_comparison().unwrap();
                let true_target = instr.operands[3].as_branch_target().unwrap().clone();
                let false_target = instr.operands[4].as_branch_target().unwrap().clone();
                let size = operand_size(&instr.operands[0].ty);

                if instr.opcode == Opcode::Fcjmp {
                    let lhs = self.force_reg(state, &instr.operands[0], RegisterClass::Float);
                    let rhs = self.force_reg(state, &instr.operands[2], RegisterClass::Float);
                    let mut cmp = Instruction::new(
                        op::FCMP,
                        vec![Operand::virtual_reg(lhs, size), Operand::virtual_reg(rhs, size)],
                    );
                    cmp.set_flag(FLAG_FLOAT);
                    state.emit(cmp);
                } else {
                    let lhs = self.force_reg(state, &instr.operands[0], RegisterClass::Gpr);
                    let rhs = self.operand_or_imm12(state, &instr.operands[2]);
                    state.emit(Instruction::new(
                        op::CMP,
                        vec![Operand::virtual_reg(lhs, size), rhs],
                    ));
                }

                self.emit_branch_args(state, ssa_func, &true_target);
                self.emit_branch_args(state, ssa_func, &false_target);

                let true_label = state.block_labels[true_target.block.index()].clone();
                let false_label = state.block_labels[false_target.block.index()].clone();
                state.emit(Instruction::new(
                    bcond_for(comparison),
                    vec![Operand::label(true_label)],
                ));
                state.emit(Instruction::new(op::B, vec![Operand::label(false_label)]));
            }
            Opcode::Select => {
                let comparison = instr.operands[1].as_comparison().unwrap();
                let cmp_ty = instr.operands[0].ty.clone();
                let cmp_size = operand_size(&cmp_ty);
                let value_size = operand_size(&instr.operands[3].ty);

                if cmp_ty.is_fp() {
                    let lhs = self.force_reg(state, &instr.operands[0], RegisterClass::Float);
                    let rhs = self.force_reg(state, &instr.operands[2], RegisterClass::Float);
                    let mut cmp = Instruction::new(
                        op::FCMP,
                        vec![
                            Operand::virtual_reg(lhs, cmp_size),
                            Operand::virtual_reg(rhs, cmp_size),
                        ],
                    );
                    cmp.set_flag(FLAG_FLOAT);
                    state.emit(cmp);
                } else {
                    let lhs = self.force_reg(state, &instr.operands[0], RegisterClass::Gpr);
                    let rhs = self.operand_or_imm12(state, &instr.operands[2]);
                    state.emit(Instruction::new(
                        op::CMP,
                        vec![Operand::virtual_reg(lhs, cmp_size), rhs],
                    ));
                }

                let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
                let true_reg = self.force_reg(state, &instr.operands[3], RegisterClass::Gpr);
                let false_reg = self.force_reg(state, &instr.operands[4], RegisterClass::Gpr);

                state.emit(Instruction::new(
                    op::CSEL,
                    vec![
                        Operand::virtual_reg(dest, value_size),
                        Operand::virtual_reg(true_reg, value_size),
                        Operand::virtual_reg(false_reg, value_size),
                        Operand::int_immediate(
                            op::condition_code(bcond_for(comparison)) as i64,
                            1,
                        ),
                    ],
                ));
            }
            Opcode::Call => {
                self.lower_call(state, instr)?;
            }
            Opcode::Ret => {
                if let Some(value) = instr.operands.first() {
                    let size = operand_size(&value.ty);
                    if value.ty.is_fp() {
                        let reg = self.force_reg(state, value, RegisterClass::Float);
                        let mut mov = Instruction::new(
                            op::FMOV,
                            vec![
                                Operand::physical(self.abi.float_return, size),
                                Operand::virtual_reg(reg, size),
                            ],
                        );
                        mov.set_flag(FLAG_FLOAT);
                        state.emit(mov);
                    } else {
                        let value = self.operand_or_imm12(state, value);
                        state.emit(Instruction::new(
                            op::MOV,
                            vec![Operand::physical(self.abi.int_return, size), value],
                        ));
                    }
                }
                state.emit(Instruction::new(op::RET, Vec::<Operand>::new()));
            }
        }

        Ok(())
    }

    fn lower_three_address(&mut self, state: &mut FuncState, instr: &ssa::Instruction) {
        let ty = instr.operands[0].ty.clone();
        let size = operand_size(&ty);

        let opcode = match instr.opcode {
            Opcode::Add => op::ADD,
            Opcode::Sub => op::SUB,
            Opcode::Mul => op::MUL,
            Opcode::And => op::AND,
            Opcode::Or => op::ORR,
            Opcode::Xor => op::EOR,
            Opcode::Shl => op::LSL,
            Opcode::Shr => {
                if matches!(ty.as_primitive(), Some(p) if p.is_signed()) {
                    op::ASR
                } else {
                    op::LSR
                }
            }
            Opcode::Sdiv => op::SDIV,
            Opcode::Udiv => op::UDIV,
            _ => unreachable!(),
        };

        let dest = self.map_vreg(state, instr.dest.unwrap(), RegisterClass::Gpr);
        let lhs = self.force_reg(state, &instr.operands[0], RegisterClass::Gpr);

        // ADD and SUB take a 12-bit immediate; the rest want registers.
        let rhs = if matches!(opcode, op::ADD | op::SUB) {
            self.operand_or_imm12(state, &instr.operands[1])
        } else {
            let reg = self.force_reg(state, &instr.operands[1], RegisterClass::Gpr);
            Operand::virtual_reg(reg, size)
        };

        state.emit(Instruction::new(
            opcode,
            vec![
                Operand::virtual_reg(dest, size),
                Operand::virtual_reg(lhs, size),
                rhs,
            ],
        ));
    }

    fn lower_call(&mut self, state: &mut FuncState, instr: &ssa::Instruction) -> BanjoResult<()> {
        let args = &instr.operands[1..];

        // Materialize every argument before the moves into argument
        // registers so constant-building temporaries cannot land between
        // them.
        let prepared: Vec<(bool, u8, u32)> = args
            .iter()
            .map(|arg| {
                let size = operand_size(&arg.ty);
                let class = if arg.ty.is_fp() {
                    RegisterClass::Float
                } else {
                    RegisterClass::Gpr
                };
                (arg.ty.is_fp(), size, self.force_reg(state, arg, class))
            })
            .collect();

        let mut int_used = 0usize;
        let mut float_used = 0usize;

        for (is_fp, size, value) in prepared {
            if is_fp {
                if let Some(reg) = self.abi.float_args.get(float_used).copied() {
                    let mut mov = Instruction::new(
                        op::FMOV,
                        vec![Operand::physical(reg, size), Operand::virtual_reg(value, size)],
                    );
                    mov.set_flag(FLAG_FLOAT);
                    state.emit(mov);
                } else {
                    log::warn!("stack-passed argument is not supported");
                }
                float_used += 1;
            } else {
                if let Some(reg) = self.abi.int_args.get(int_used).copied() {
                    state.emit(Instruction::new(
                        op::MOV,
                        vec![
                            Operand::physical(reg, size.max(4)),
                            Operand::virtual_reg(value, size.max(4)),
                        ],
                    ));
                } else {
                    log::warn!("stack-passed argument is not supported");
                }
                int_used += 1;
            }
        }

        let call = match &instr.operands[0].kind {
            OperandKind::Func(index) => {
                let name = self.ssa.functions[*index as usize].name.clone();
                Instruction::new(op::BL, vec![Operand::symbol(Symbol::new(name), 8)])
            }
            OperandKind::ExternFunc(index) => {
                let name = self.ssa.external_functions[*index as usize].name.clone();
                Instruction::new(op::BL, vec![Operand::symbol(Symbol::new(name), 8)])
            }
            OperandKind::Register(reg) => {
                let mapped = self.map_vreg(state, *reg, RegisterClass::Gpr);
                Instruction::new(op::BLR, vec![Operand::virtual_reg(mapped, 8)])
            }
            _ => return Err(BanjoError::codegen("unsupported call target")),
        };

        let mut call = call.with_flags(FLAG_CALL);
        for reg in self.abi.volatile {
            call.add_reg_op(Register::Physical(*reg), RegUsage::Kill);
        }
        call.add_reg_op(Register::Physical(R30), RegUsage::Kill);
        state.emit(call);

        let result_ty = instr.operands[0].ty.clone();
        if let Some(dest) = instr.dest {
            let size = operand_size(&result_ty);
            if result_ty.is_fp() {
                let dest = self.map_vreg(state, dest, RegisterClass::Float);
                let mut mov = Instruction::new(
                    op::FMOV,
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
            let size = operand_size(param_ty);

            if param_ty.is_fp() {
                let value = self.force_reg(state, arg, RegisterClass::Float);
                let mut mov = Instruction::new(
                    op::FMOV,
                    vec![Operand::virtual_reg(param, size), Operand::virtual_reg(value, size)],
                );
                mov.set_flag(FLAG_FLOAT);
                state.emit(mov);
            } else {
                let value = self.operand_or_imm12(state, arg);
                state.emit(Instruction::new(
                    op::MOV,
                    vec![Operand::virtual_reg(param, size), value],
                ));
            }
        }
    }

    /// Resolve an address-producing operand into a load/store address.
    fn address_of(&mut self, state: &mut FuncState, operand: &ssa::Operand) -> Operand {
        let size = operand_size(&operand.ty);

        match &operand.kind {
            OperandKind::Register(reg) => {
                if let Some(slot) = state.alloca_slots.get(reg) {
                    return Operand::indirect(
                        IndirectAddress::base(IndirectBase::StackSlot(*slot)),
                        size,
                    );
                }
                let mapped = self.map_vreg(state, *reg, RegisterClass::Gpr);
                Operand::indirect(
                    IndirectAddress::base(IndirectBase::Reg(Register::Virtual(mapped))),
                    size,
                )
            }
            OperandKind::Global(index) => {
                let name = self.ssa.globals[*index as usize].name.clone();
                let reg = self.symbol_address(state, &name);
                Operand::indirect(
                    IndirectAddress::base(IndirectBase::Reg(Register::Virtual(reg))),
                    size,
                )
            }
            OperandKind::ExternGlobal(index) => {
                let name = self.ssa.external_globals[*index as usize].name.clone();
                let reg = self.symbol_address(state, &name);
                Operand::indirect(
                    IndirectAddress::base(IndirectBase::Reg(Register::Virtual(reg))),
                    size,
                )
            }
            _ => Operand::int_immediate(0, size),
        }
    }

    /// Materialize a symbol's address via ADRP plus page-offset add.
    fn symbol_address(&mut self, state: &mut FuncState, name: &str) -> u32 {
        let reg = self.temp(state, RegisterClass::Gpr);
        state.emit(Instruction::new(
            op::ADRP,
            vec![Operand::virtual_reg(reg, 8), Operand::symbol(Symbol::new(name), 8)],
        ));
        state.emit(Instruction::new(
            op::ADD_PAGEOFF,
            vec![
                Operand::virtual_reg(reg, 8),
                Operand::virtual_reg(reg, 8),
                Operand::symbol(Symbol::new(name), 8),
            ],
        ));
        reg
    }

    /// Force a value into a virtual register of the given class.
    fn force_reg(
        &mut self,
        state: &mut FuncState,
        operand: &ssa::Operand,
        class: RegisterClass,
    ) -> u32 {
        let size = operand_size(&operand.ty);

        match &operand.kind {
            OperandKind::Register(reg) => self.map_vreg(state, *reg, class),
            OperandKind::IntImmediate(value) => {
                let reg = self.temp(state, RegisterClass::Gpr);
                self.load_int_constant(state, reg, *value as i64, size);
                reg
            }
            OperandKind::FpImmediate(value) => {
                let label = self.float_constant(*value, size);
                let address = self.symbol_address(state, &label);
                let reg = self.temp(state, RegisterClass::Float);
                let mut load = Instruction::new(
                    op::LDR,
                    vec![
                        Operand::virtual_reg(reg, size),
                        Operand::indirect(
                            IndirectAddress::base(IndirectBase::Reg(Register::Virtual(address))),
                            size,
                        ),
                    ],
                );
                load.set_flag(FLAG_FLOAT);
                state.emit(load);
                reg
            }
            OperandKind::Func(index) => {
                let name = self.ssa.functions[*index as usize].name.clone();
                self.symbol_address(state, &name)
            }
            OperandKind::ExternFunc(index) => {
                let name = self.ssa.external_functions[*index as usize].name.clone();
                self.symbol_address(state, &name)
            }
            OperandKind::Global(index) => {
                let name = self.ssa.globals[*index as usize].name.clone();
                self.symbol_address(state, &name)
            }
            OperandKind::ExternGlobal(index) => {
                let name = self.ssa.external_globals[*index as usize].name.clone();
                self.symbol_address(state, &name)
            }
            _ => {
                let reg = self.temp(state, RegisterClass::Gpr);
                self.load_int_constant(state, reg, 0, size);
                reg
            }
        }
    }

    /// Build a constant with MOVZ plus MOVK for each extra half-word.
    fn load_int_constant(&mut self, state: &mut FuncState, reg: u32, value: i64, size: u8) {
        let bits = value as u64;
        state.emit(Instruction::new(
            op::MOVZ,
            vec![
                Operand::virtual_reg(reg, size),
                Operand::int_immediate((bits & 0xFFFF) as i64, size),
            ],
        ));

        for half in 1..4 {
            let part = (bits >> (16 * half)) & 0xFFFF;
            if part != 0 {
                state.emit(Instruction::new(
                    op::MOVK,
                    vec![
                        Operand::virtual_reg(reg, 8),
                        Operand::int_immediate(part as i64, 8),
                        Operand::left_shift((16 * half) as u8),
                    ],
                ));
            }
        }
    }

    /// An operand usable in imm12 positions: small immediates stay
    /// immediate, everything else lands in a register.
    fn operand_or_imm12(&mut self, state: &mut FuncState, operand: &ssa::Operand) -> Operand {
        let size = operand_size(&operand.ty);

        match &operand.kind {
            OperandKind::IntImmediate(value) if (0..4096).contains(value) => {
                Operand::int_immediate(*value as i64, size)
            }
            _ => {
                let reg = self.force_reg(state, operand, RegisterClass::Gpr);
                Operand::virtual_reg(reg, size)
            }
        }
    }

    fn float_constant(&mut self, value: f64, size: u8) -> String {
        let name = format!("float.{}", self.next_float_label);
        self.next_float_label += 1;

        self.float_constants.push(Global {
            name: name.clone(),
            size: size as u64,
            alignment: size as u64,
            value: banjo_mcode::GlobalValue::Fp(value),
        });
        name
    }
}

fn operand_size(ty: &ssa::Type) -> u8 {
    match ty.as_primitive() {
        Some(p) => (p.size().max(1)) as u8,
        None => 8,
    }
}

fn class_of(ty: &ssa::Type) -> RegisterClass {
    if ty.is_fp() {
        RegisterClass::Float
    } else {
        RegisterClass::Gpr
    }
}

fn load_op(size: u8) -> banjo_mcode::Opcode {
    match size {
        1 => op::LDRB,
        2 => op::LDRH,
        _ => op::LDR,
    }
}

fn store_op(size: u8) -> banjo_mcode::Opcode {
    match size {
        1 => op::STRB,
        2 => op::STRH,
        _ => op::STR,
    }
}

fn bcond_for(comparison: Comparison) -> banjo_mcode::Opcode {
    match comparison {
        Comparison::Eq | Comparison::Feq => op::B_EQ,
        Comparison::Ne | Comparison::Fne => op::B_NE,
        Comparison::Sgt | Comparison::Fgt => op::B_GT,
        Comparison::Sge | Comparison::Fge => op::B_GE,
        Comparison::Slt | Comparison::Flt => op::B_LT,
        Comparison::Sle | Comparison::Fle => op::B_LE,
        Comparison::Ugt => op::B_HI,
        Comparison::Uge => op::B_HS,
        Comparison::Ult => op::B_LO,
        Comparison::Ule => op::B_LS,
    }
}

fn member_offset(ssa: &ssa::Module, ty: &ssa::Type, member: u32) -> u64 {
    match &ty.kind {
        ssa::types::TypeKind::Struct(id) => ssa.member_offset(*id, member),
        ssa::types::TypeKind::Tuple(fields) => {
            let mut offset = 0;
            for (index, field) in fields.iter().enumerate() {
                let align = ssa.align_of(field);
                offset = (offset + align - 1) & !(align - 1);
                if index as u32 == member {
                    return offset;
                }
                offset += ssa.size_of(field);
            }
            offset
        }
        _ => 0,
    }
}
