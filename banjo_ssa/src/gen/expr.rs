//! Expression lowering

use super::types::convert_primitive;
use super::{FuncCtx, LocalKey, SsaGenerator};
use crate::{
    BlockId, Comparison, Global, GlobalInitializer, Instruction, InstrAttr, Opcode, Operand,
    Primitive, Type,
};
use banjo_sir::{BinaryOp, Decl, ExprId, ExprKind, Symbol, UnaryOp};

impl SsaGenerator<'_> {
    /// Lower an expression to an operand. Scalars become immediates or
    /// registers; aggregates become the address of their storage, typed
    /// with the aggregate type.
    pub(crate) fn lower_value(&mut self, ctx: &mut FuncCtx, expr: ExprId) -> Operand {
        let kind = self.unit.arena.expr(expr).kind.clone();
        let sir_ty = self.unit.arena.expr(expr).ty.clone();
        let ty = self.convert_type(&sir_ty);

        match kind {
            ExprKind::IntLiteral(value) => Operand::int_immediate(value, ty),
            ExprKind::FpLiteral(value) => Operand::fp_immediate(value, ty),
            ExprKind::BoolLiteral(value) => Operand::int_immediate(value as i128, ty),
            ExprKind::CharLiteral(value) => Operand::int_immediate(value as i128, ty),
            ExprKind::NullLiteral => Operand::int_immediate(0, Type::ADDR),
            ExprKind::UndefinedLiteral => Operand::undef(ty),
            ExprKind::StringLiteral(value) => {
                let mut bytes = value.into_bytes();
                bytes.push(0);
                let length = bytes.len() as u32;

                let name = self.unique_string_name();
                let index = self.module.add_global(Global {
                    name,
                    ty: Type::primitive(Primitive::U8).array_of(length),
                    initializer: GlobalInitializer::String(bytes),
                    external: false,
                });
                Operand::global(index, Type::ADDR)
            }
            ExprKind::ArrayLiteral(elements) => self.lower_array_literal(ctx, &elements, &sir_ty),
            ExprKind::StructLiteral { entries, .. } => {
                let slot = self.alloc_local(ctx, &sir_ty);
                let base = Operand::register(slot.addr, ty.clone());

                for entry in &entries {
                    let Some(field_index) = entry.field_index else { continue };
                    let value_ty = self.unit.arena.expr(entry.value).ty.clone();
                    let value = self.lower_value(ctx, entry.value);

                    let field_ptr = self.next_reg(ctx);
                    self.push_instr(
                        ctx,
                        Instruction::new(
                            Opcode::MemberPtr,
                            Some(field_ptr),
                            vec![
                                base.clone(),
                                Operand::int_immediate(
                                    field_index as i128,
                                    Type::primitive(Primitive::U32),
                                ),
                            ],
                        ),
                    );
                    self.store_value(ctx, value, field_ptr, &value_ty);
                }

                Operand::register(slot.addr, ty)
            }
            ExprKind::Tuple(fields) => {
                let slot = self.alloc_local(ctx, &sir_ty);
                let base = Operand::register(slot.addr, ty.clone());

                for (index, field) in fields.iter().enumerate() {
                    let value_ty = self.unit.arena.expr(*field).ty.clone();
                    let value = self.lower_value(ctx, *field);

                    let field_ptr = self.next_reg(ctx);
                    self.push_instr(
                        ctx,
                        Instruction::new(
                            Opcode::MemberPtr,
                            Some(field_ptr),
                            vec![
                                base.clone(),
                                Operand::int_immediate(index as i128, Type::primitive(Primitive::U32)),
                            ],
                        ),
                    );
                    self.store_value(ctx, value, field_ptr, &value_ty);
                }

                Operand::register(slot.addr, ty)
            }
            ExprKind::Symbol(symbol) => self.lower_symbol_value(ctx, &symbol, &sir_ty),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(ctx, op, lhs, rhs, &sir_ty),
            ExprKind::Unary { op, value } => self.lower_unary(ctx, expr, op, value, &sir_ty),
            ExprKind::Cast { value, .. } => {
                let from_ty = self.unit.arena.expr(value).ty.clone();
                let operand = self.lower_value(ctx, value);
                self.lower_conversion(ctx, operand, &from_ty, &sir_ty)
            }
            ExprKind::Coercion { value } => self.lower_coercion(ctx, value, &sir_ty),
            ExprKind::Index { .. } | ExprKind::Field { .. } | ExprKind::TupleField { .. } => {
                let addr = self.lower_addr(ctx, expr);
                self.load_from(ctx, addr, &sir_ty)
            }
            ExprKind::Call { callee, args } => self.lower_call(ctx, callee, &args, &sir_ty),
            _ => Operand::undef(ty),
        }
    }

    /// Lower an l-value expression to the address of its storage.
    pub(crate) fn lower_addr(&mut self, ctx: &mut FuncCtx, expr: ExprId) -> Operand {
        let kind = self.unit.arena.expr(expr).kind.clone();
        let sir_ty = self.unit.arena.expr(expr).ty.clone();

        match kind {
            ExprKind::Symbol(symbol) => match symbol {
                Symbol::Local(stmt) => {
                    let slot = &ctx.locals[&LocalKey::Local(stmt)];
                    Operand::register(slot.addr, Type::ADDR)
                }
                Symbol::Param { func, index } => {
                    let slot = &ctx.locals[&LocalKey::Param(func, index)];
                    Operand::register(slot.addr, Type::ADDR)
                }
                Symbol::Var(decl) => {
                    let index = self.global_map[&decl];
                    Operand::global(index, Type::ADDR)
                }
                Symbol::NativeVar(decl) => {
                    let index = self.extern_global_map[&decl];
                    Operand::extern_global(index, Type::ADDR)
                }
                _ => Operand::undef(Type::ADDR),
            },
            ExprKind::Field { base, index, .. } => {
                let base_ty = self.unit.arena.expr(base).ty.clone();
                let base_operand = self.lower_aggregate_base(ctx, base, &base_ty);

                let ptr = self.next_reg(ctx);
                self.push_instr(
                    ctx,
                    Instruction::new(
                        Opcode::MemberPtr,
                        Some(ptr),
                        vec![
                            base_operand,
                            Operand::int_immediate(index as i128, Type::primitive(Primitive::U32)),
                        ],
                    ),
                );
                Operand::register(ptr, Type::ADDR)
            }
            ExprKind::TupleField { base, index } => {
                let base_ty = self.unit.arena.expr(base).ty.clone();
                let base_operand = self.lower_aggregate_base(ctx, base, &base_ty);

                let ptr = self.next_reg(ctx);
                self.push_instr(
                    ctx,
                    Instruction::new(
                        Opcode::MemberPtr,
                        Some(ptr),
                        vec![
                            base_operand,
                            Operand::int_immediate(index as i128, Type::primitive(Primitive::U32)),
                        ],
                    ),
                );
                Operand::register(ptr, Type::ADDR)
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.unit.arena.expr(base).ty.clone();
                let index_operand = self.lower_value(ctx, index);
                let element_ty = self.convert_type(&sir_ty);

                let base_addr = match &base_ty {
                    banjo_sir::Type::StaticArray { .. } => self.lower_addr(ctx, base),
                    banjo_sir::Type::Pointer(_) => self.lower_value(ctx, base),
                    banjo_sir::Type::Struct(_) => {
                        // std.Array: offset through the data pointer field.
                        let array_addr = self.lower_value(ctx, base);
                        let data_ptr = self.next_reg(ctx);
                        self.push_instr(
                            ctx,
                            Instruction::new(
                                Opcode::MemberPtr,
                                Some(data_ptr),
                                vec![
                                    array_addr,
                                    Operand::int_immediate(0, Type::primitive(Primitive::U32)),
                                ],
                            ),
                        );
                        let data = self.next_reg(ctx);
                        self.push_instr(
                            ctx,
                            Instruction::new(
                                Opcode::Load,
                                Some(data),
                                vec![Operand::register(data_ptr, Type::ADDR)],
                            ),
                        );
                        Operand::register(data, Type::ADDR)
                    }
                    _ => self.lower_value(ctx, base),
                };

                let ptr = self.next_reg(ctx);
                self.push_instr(
                    ctx,
                    Instruction::new(
                        Opcode::OffsetPtr,
                        Some(ptr),
                        vec![
                            Operand { kind: base_addr.kind, ty: element_ty },
                            index_operand,
                        ],
                    ),
                );
                Operand::register(ptr, Type::ADDR)
            }
            ExprKind::Unary { op: UnaryOp::Deref, value } => self.lower_value(ctx, value),
            // Aggregate-producing expressions already yield an address.
            _ => {
                let operand = self.lower_value(ctx, expr);
                Operand { kind: operand.kind, ty: Type::ADDR }
            }
        }
    }

    /// Lower a base expression for member access: the operand carries the
    /// aggregate type and addresses the aggregate's storage.
    fn lower_aggregate_base(
        &mut self,
        ctx: &mut FuncCtx,
        base: ExprId,
        base_ty: &banjo_sir::Type,
    ) -> Operand {
        let ssa_ty = self.convert_type(base_ty);
        let addr = self.lower_addr(ctx, base);
        Operand { kind: addr.kind, ty: ssa_ty }
    }

    fn load_from(&mut self, ctx: &mut FuncCtx, addr: Operand, sir_ty: &banjo_sir::Type) -> Operand {
        let ssa_ty = self.convert_type(sir_ty);

        if self.is_aggregate(sir_ty) {
            return Operand { kind: addr.kind, ty: ssa_ty };
        }

        let reg = self.next_reg(ctx);
        self.push_instr(
            ctx,
            Instruction::new(
                Opcode::Load,
                Some(reg),
                vec![Operand { kind: addr.kind, ty: ssa_ty.clone() }],
            ),
        );
        Operand::register(reg, ssa_ty)
    }

    fn lower_symbol_value(
        &mut self,
        ctx: &mut FuncCtx,
        symbol: &Symbol,
        sir_ty: &banjo_sir::Type,
    ) -> Operand {
        let ssa_ty = self.convert_type(sir_ty);

        match symbol {
            Symbol::Local(stmt) => {
                let slot = ctx.locals[&LocalKey::Local(*stmt)].clone();
                let addr = Operand::register(slot.addr, Type::ADDR);
                self.load_from(ctx, addr, sir_ty)
            }
            Symbol::Param { func, index } => {
                let slot = ctx.locals[&LocalKey::Param(*func, *index)].clone();
                let addr = Operand::register(slot.addr, Type::ADDR);
                self.load_from(ctx, addr, sir_ty)
            }
            Symbol::Var(decl) => {
                let index = self.global_map[decl];
                let addr = Operand::global(index, Type::ADDR);
                self.load_from(ctx, addr, sir_ty)
            }
            Symbol::NativeVar(decl) => {
                let index = self.extern_global_map[decl];
                let addr = Operand::extern_global(index, Type::ADDR);
                self.load_from(ctx, addr, sir_ty)
            }
            Symbol::Const(decl) => {
                let value = match self.unit.arena.decl(*decl) {
                    Decl::ConstDef(def) => def.value,
                    _ => return Operand::undef(ssa_ty),
                };
                self.lower_value(ctx, value)
            }
            Symbol::EnumVariant(decl) => {
                let value = match self.unit.arena.decl(*decl) {
                    Decl::EnumVariant(variant) => variant.value,
                    _ => 0,
                };
                Operand::int_immediate(value, Type::primitive(Primitive::I32))
            }
            Symbol::Func(decl) => {
                let index = self.func_map[decl];
                Operand::func(index, Type::ADDR)
            }
            Symbol::NativeFunc(decl) | Symbol::ExternFunc(decl) => {
                let index = self.extern_func_map[decl];
                Operand::extern_func(index, Type::ADDR)
            }
            _ => Operand::undef(ssa_ty),
        }
    }

    fn lower_array_literal(
        &mut self,
        ctx: &mut FuncCtx,
        elements: &[ExprId],
        sir_ty: &banjo_sir::Type,
    ) -> Operand {
        let ssa_ty = self.convert_type(sir_ty);
        let banjo_sir::Type::StaticArray { element, .. } = sir_ty else {
            return Operand::undef(ssa_ty);
        };

        // All-constant element lists become read-only globals.
        if let Some(bytes) = self.constant_array_bytes(elements, element) {
            let name = self.unique_string_name();
            let index = self.module.add_global(Global {
                name,
                ty: ssa_ty.clone(),
                initializer: GlobalInitializer::Bytes(bytes),
                external: false,
            });
            return Operand { kind: crate::OperandKind::Global(index), ty: ssa_ty };
        }

        // Otherwise build the array in a stack slot.
        let slot = self.alloc_local(ctx, sir_ty);
        let element_ssa_ty = self.convert_type(element);

        for (index, elem) in elements.iter().enumerate() {
            let value_ty = self.unit.arena.expr(*elem).ty.clone();
            let value = self.lower_value(ctx, *elem);

            let ptr = self.next_reg(ctx);
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::OffsetPtr,
                    Some(ptr),
                    vec![
                        Operand::register(slot.addr, element_ssa_ty.clone()),
                        Operand::int_immediate(index as i128, Type::primitive(Primitive::U64)),
                    ],
                ),
            );
            self.store_value(ctx, value, ptr, &value_ty);
        }

        Operand::register(slot.addr, ssa_ty)
    }

    fn constant_array_bytes(
        &self,
        elements: &[ExprId],
        element_ty: &banjo_sir::Type,
    ) -> Option<Vec<u8>> {
        let banjo_sir::Type::Primitive(p) = element_ty else {
            return None;
        };
        let size = banjo_sir::mangle::primitive_size(*p) as usize;

        let mut bytes = Vec::with_capacity(elements.len() * size);
        for element in elements {
            match &self.unit.arena.expr(*element).kind {
                ExprKind::IntLiteral(value) => {
                    bytes.extend_from_slice(&value.to_le_bytes()[..size]);
                }
                ExprKind::FpLiteral(value) => match size {
                    4 => bytes.extend_from_slice(&(*value as f32).to_le_bytes()),
                    8 => bytes.extend_from_slice(&value.to_le_bytes()),
                    _ => return None,
                },
                ExprKind::BoolLiteral(value) => bytes.push(*value as u8),
                _ => return None,
            }
        }
        Some(bytes)
    }

    fn lower_binary(
        &mut self,
        ctx: &mut FuncCtx,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        sir_ty: &banjo_sir::Type,
    ) -> Operand {
        if op.is_logical() {
            return self.lower_short_circuit(ctx, op, lhs, rhs);
        }

        let operand_sir_ty = self.unit.arena.expr(lhs).ty.clone();
        let lhs_operand = self.lower_value(ctx, lhs);
        let rhs_operand = self.lower_value(ctx, rhs);

        if op.is_comparison() {
            // Value-context comparisons select 1 or 0.
            let comparison = self.comparison_for(op, &operand_sir_ty);
            let bool_ty = Type::primitive(Primitive::U8);
            let reg = self.next_reg(ctx);
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::Select,
                    Some(reg),
                    vec![
                        lhs_operand,
                        Operand::comparison(comparison),
                        rhs_operand,
                        Operand::int_immediate(1, bool_ty.clone()),
                        Operand::int_immediate(0, bool_ty.clone()),
                    ],
                ),
            );
            return Operand::register(reg, bool_ty);
        }

        let is_fp = operand_sir_ty.is_fp();
        let signed = matches!(
            &operand_sir_ty,
            banjo_sir::Type::Primitive(p) if p.is_signed()
        );

        let opcode = match (op, is_fp) {
            (BinaryOp::Add, false) => Opcode::Add,
            (BinaryOp::Sub, false) => Opcode::Sub,
            (BinaryOp::Mul, false) => Opcode::Mul,
            (BinaryOp::Div, false) => {
                if signed {
                    Opcode::Sdiv
                } else {
                    Opcode::Udiv
                }
            }
            (BinaryOp::Mod, false) => {
                if signed {
                    Opcode::Srem
                } else {
                    Opcode::Urem
                }
            }
            (BinaryOp::Add, true) => Opcode::Fadd,
            (BinaryOp::Sub, true) => Opcode::Fsub,
            (BinaryOp::Mul, true) => Opcode::Fmul,
            (BinaryOp::Div, true) => Opcode::Fdiv,
            (BinaryOp::BitAnd, _) => Opcode::And,
            (BinaryOp::BitOr, _) => Opcode::Or,
            (BinaryOp::BitXor, _) => Opcode::Xor,
            (BinaryOp::Shl, _) => Opcode::Shl,
            (BinaryOp::Shr, _) => Opcode::Shr,
            _ => Opcode::Add,
        };

        let ssa_ty = self.convert_type(sir_ty);
        let reg = self.next_reg(ctx);
        self.push_instr(
            ctx,
            Instruction::new(opcode, Some(reg), vec![lhs_operand, rhs_operand]),
        );
        Operand::register(reg, ssa_ty)
    }

    /// `a && b` / `a || b` with short-circuit control flow; the merge block
    /// receives the result as a block parameter.
    fn lower_short_circuit(
        &mut self,
        ctx: &mut FuncCtx,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Operand {
        let bool_ty = Type::primitive(Primitive::U8);

        let rhs_block = {
            let label = ctx.label("logic.rhs");
            self.create_block(ctx, label)
        };
        let merge = {
            let label = ctx.label("logic.merge");
            self.create_block(ctx, label)
        };

        let param = self.next_reg(ctx);
        {
            let func = &mut self.module.functions[ctx.func_index as usize];
            let block = func.block_mut(merge);
            block.param_regs.push(param);
            block.param_types.push(bool_ty.clone());
        }

        let short_value = match op {
            BinaryOp::And => 0,
            _ => 1,
        };
        let short_operand = Operand::int_immediate(short_value, bool_ty.clone());

        match op {
            BinaryOp::And => {
                // lhs false -> merge(0); lhs true -> evaluate rhs.
                self.lower_condition_to(ctx, lhs, rhs_block, merge, vec![short_operand]);
            }
            _ => {
                // lhs true -> merge(1); lhs false -> evaluate rhs.
                self.lower_condition_to(ctx, lhs, merge, rhs_block, vec![short_operand]);
            }
        }

        ctx.current_block = rhs_block;
        let rhs_operand = self.lower_value(ctx, rhs);
        self.push_instr(
            ctx,
            Instruction::new(
                Opcode::Jmp,
                None,
                vec![Operand::branch_target(merge, vec![rhs_operand])],
            ),
        );

        ctx.current_block = merge;
        Operand::register(param, bool_ty)
    }

    /// Branch on a condition where one side carries merge arguments. For
    /// `And` the false edge goes to `false_target` with `false_args`; for
    /// `Or` (swapped call sites) the true edge carries them.
    fn lower_condition_to(
        &mut self,
        ctx: &mut FuncCtx,
        condition: ExprId,
        true_target: BlockId,
        false_target: BlockId,
        carried_args: Vec<Operand>,
    ) {
        let value = self.lower_value(ctx, condition);
        let (true_args, false_args) = if carried_args.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            // The carried side is whichever target is the merge block; both
            // call sites pass the short-circuit constant for their merge
            // edge.
            let func = &self.module.functions[ctx.func_index as usize];
            if func.block(true_target).param_types.is_empty() {
                (Vec::new(), carried_args)
            } else {
                (carried_args, Vec::new())
            }
        };

        self.push_instr(
            ctx,
            Instruction::new(
                Opcode::Cjmp,
                None,
                vec![
                    value,
                    Operand::comparison(Comparison::Ne),
                    Operand::int_immediate(0, Type::primitive(Primitive::U8)),
                    Operand::branch_target(true_target, true_args),
                    Operand::branch_target(false_target, false_args),
                ],
            ),
        );
    }

    /// Lower a boolean condition directly into a conditional branch,
    /// folding comparisons into CJMP/FCJMP and inverting through `!`.
    pub(crate) fn lower_condition(
        &mut self,
        ctx: &mut FuncCtx,
        condition: ExprId,
        true_target: BlockId,
        false_target: BlockId,
    ) {
        let kind = self.unit.arena.expr(condition).kind.clone();

        match kind {
            ExprKind::Binary { op, lhs, rhs } if op.is_comparison() => {
                let operand_ty = self.unit.arena.expr(lhs).ty.clone();
                let comparison = self.comparison_for(op, &operand_ty);
                let opcode = if operand_ty.is_fp() { Opcode::Fcjmp } else { Opcode::Cjmp };

                let lhs_operand = self.lower_value(ctx, lhs);
                let rhs_operand = self.lower_value(ctx, rhs);

                self.push_instr(
                    ctx,
                    Instruction::new(
                        opcode,
                        None,
                        vec![
                            lhs_operand,
                            Operand::comparison(comparison),
                            rhs_operand,
                            Operand::branch_target(true_target, Vec::new()),
                            Operand::branch_target(false_target, Vec::new()),
                        ],
                    ),
                );
            }
            ExprKind::Unary { op: UnaryOp::Not, value } => {
                self.lower_condition(ctx, value, false_target, true_target);
            }
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => {
                let rhs_block = {
                    let label = ctx.label("and.rhs");
                    self.create_block(ctx, label)
                };
                self.lower_condition(ctx, lhs, rhs_block, false_target);
                ctx.current_block = rhs_block;
                self.lower_condition(ctx, rhs, true_target, false_target);
            }
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => {
                let rhs_block = {
                    let label = ctx.label("or.rhs");
                    self.create_block(ctx, label)
                };
                self.lower_condition(ctx, lhs, true_target, rhs_block);
                ctx.current_block = rhs_block;
                self.lower_condition(ctx, rhs, true_target, false_target);
            }
            _ => {
                let value = self.lower_value(ctx, condition);
                self.push_instr(
                    ctx,
                    Instruction::new(
                        Opcode::Cjmp,
                        None,
                        vec![
                            value,
                            Operand::comparison(Comparison::Ne),
                            Operand::int_immediate(0, Type::primitive(Primitive::U8)),
                            Operand::branch_target(true_target, Vec::new()),
                            Operand::branch_target(false_target, Vec::new()),
                        ],
                    ),
                );
            }
        }
    }

    fn comparison_for(&self, op: BinaryOp, operand_ty: &banjo_sir::Type) -> Comparison {
        let is_fp = operand_ty.is_fp();
        let signed = matches!(
            operand_ty,
            banjo_sir::Type::Primitive(p) if p.is_signed()
        );

        match (op, is_fp, signed) {
            (BinaryOp::Eq, false, _) => Comparison::Eq,
            (BinaryOp::Ne, false, _) => Comparison::Ne,
            (BinaryOp::Lt, false, true) => Comparison::Slt,
            (BinaryOp::Le, false, true) => Comparison::Sle,
            (BinaryOp::Gt, false, true) => Comparison::Sgt,
            (BinaryOp::Ge, false, true) => Comparison::Sge,
            (BinaryOp::Lt, false, false) => Comparison::Ult,
            (BinaryOp::Le, false, false) => Comparison::Ule,
            (BinaryOp::Gt, false, false) => Comparison::Ugt,
            (BinaryOp::Ge, false, false) => Comparison::Uge,
            (BinaryOp::Eq, true, _) => Comparison::Feq,
            (BinaryOp::Ne, true, _) => Comparison::Fne,
            (BinaryOp::Lt, true, _) => Comparison::Flt,
            (BinaryOp::Le, true, _) => Comparison::Fle,
            (BinaryOp::Gt, true, _) => Comparison::Fgt,
            (BinaryOp::Ge, true, _) => Comparison::Fge,
            _ => Comparison::Eq,
        }
    }

    fn lower_unary(
        &mut self,
        ctx: &mut FuncCtx,
        _expr: ExprId,
        op: UnaryOp,
        value: ExprId,
        sir_ty: &banjo_sir::Type,
    ) -> Operand {
        let ssa_ty = self.convert_type(sir_ty);

        match op {
            UnaryOp::Neg => {
                let operand = self.lower_value(ctx, value);
                let reg = self.next_reg(ctx);
                if sir_ty.is_fp() {
                    self.push_instr(
                        ctx,
                        Instruction::new(
                            Opcode::Fsub,
                            Some(reg),
                            vec![Operand::fp_immediate(0.0, ssa_ty.clone()), operand],
                        ),
                    );
                } else {
                    self.push_instr(
                        ctx,
                        Instruction::new(
                            Opcode::Sub,
                            Some(reg),
                            vec![Operand::int_immediate(0, ssa_ty.clone()), operand],
                        ),
                    );
                }
                Operand::register(reg, ssa_ty)
            }
            UnaryOp::Not => {
                let operand = self.lower_value(ctx, value);
                let reg = self.next_reg(ctx);
                self.push_instr(
                    ctx,
                    Instruction::new(
                        Opcode::Xor,
                        Some(reg),
                        vec![operand, Operand::int_immediate(1, ssa_ty.clone())],
                    ),
                );
                Operand::register(reg, ssa_ty)
            }
            UnaryOp::BitNot => {
                let operand = self.lower_value(ctx, value);
                let reg = self.next_reg(ctx);
                self.push_instr(
                    ctx,
                    Instruction::new(
                        Opcode::Xor,
                        Some(reg),
                        vec![operand, Operand::int_immediate(-1, ssa_ty.clone())],
                    ),
                );
                Operand::register(reg, ssa_ty)
            }
            UnaryOp::Addr | UnaryOp::Ref => {
                let addr = self.lower_addr(ctx, value);
                Operand { kind: addr.kind, ty: Type::ADDR }
            }
            UnaryOp::Deref => {
                let pointee = sir_ty;
                let addr = self.lower_value(ctx, value);
                self.load_from(ctx, addr, pointee)
            }
        }
    }

    fn lower_conversion(
        &mut self,
        ctx: &mut FuncCtx,
        operand: Operand,
        from: &banjo_sir::Type,
        to: &banjo_sir::Type,
    ) -> Operand {
        let (banjo_sir::Type::Primitive(from_p), banjo_sir::Type::Primitive(to_p)) = (from, to)
        else {
            // Pointer and reference casts reinterpret the address.
            let to_ssa = self.convert_type(to);
            return Operand { kind: operand.kind, ty: to_ssa };
        };

        let to_ssa = Type::primitive(convert_primitive(*to_p));

        let opcode = match (from_p.is_fp(), to_p.is_fp()) {
            (false, false) => {
                let from_bits = from_p.bit_width();
                let to_bits = to_p.bit_width();
                if from_bits == to_bits {
                    return Operand { kind: operand.kind, ty: to_ssa };
                } else if from_bits < to_bits {
                    if from_p.is_signed() {
                        Opcode::Sextend
                    } else {
                        Opcode::Uextend
                    }
                } else {
                    Opcode::Truncate
                }
            }
            (false, true) => {
                if from_p.is_signed() {
                    Opcode::Stof
                } else {
                    Opcode::Utof
                }
            }
            (true, false) => {
                if to_p.is_signed() {
                    Opcode::Ftos
                } else {
                    Opcode::Ftou
                }
            }
            (true, true) => {
                if from_p.bit_width() < to_p.bit_width() {
                    Opcode::Fpromote
                } else if from_p.bit_width() > to_p.bit_width() {
                    Opcode::Fdemote
                } else {
                    return Operand { kind: operand.kind, ty: to_ssa };
                }
            }
        };

        let reg = self.next_reg(ctx);
        self.push_instr(
            ctx,
            Instruction::new(
                opcode,
                Some(reg),
                vec![operand, Operand::type_token(to_ssa.clone())],
            ),
        );
        Operand::register(reg, to_ssa)
    }

    fn lower_coercion(
        &mut self,
        ctx: &mut FuncCtx,
        value: ExprId,
        to: &banjo_sir::Type,
    ) -> Operand {
        let from_ty = self.unit.arena.expr(value).ty.clone();
        let operand = self.lower_value(ctx, value);

        // Struct into union: build the tagged representation.
        if let (banjo_sir::Type::Struct(_), banjo_sir::Type::Union(union_decl)) = (&from_ty, to) {
            let case_index = self.union_case_index_for_struct(*union_decl, &from_ty);
            let slot = self.alloc_local(ctx, to);
            let union_ssa_ty = self.convert_type(to);

            let tag_ptr = self.next_reg(ctx);
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::MemberPtr,
                    Some(tag_ptr),
                    vec![
                        Operand::register(slot.addr, union_ssa_ty.clone()),
                        Operand::int_immediate(0, Type::primitive(Primitive::U32)),
                    ],
                ),
            );
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::Store,
                    None,
                    vec![
                        Operand::int_immediate(case_index as i128, Type::primitive(Primitive::U32)),
                        Operand::register(tag_ptr, Type::ADDR),
                    ],
                ),
            );

            let payload_ptr = self.next_reg(ctx);
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::MemberPtr,
                    Some(payload_ptr),
                    vec![
                        Operand::register(slot.addr, union_ssa_ty.clone()),
                        Operand::int_immediate(1, Type::primitive(Primitive::U32)),
                    ],
                ),
            );
            let payload_ty = self.convert_type(&from_ty);
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::Copy,
                    None,
                    vec![
                        Operand::register(payload_ptr, payload_ty.clone()),
                        operand,
                        Operand::type_token(payload_ty),
                    ],
                ),
            );

            return Operand::register(slot.addr, union_ssa_ty);
        }

        // Remaining coercions reinterpret the value as an address.
        let to_ssa = self.convert_type(to);
        Operand { kind: operand.kind, ty: to_ssa }
    }

    fn union_case_index_for_struct(
        &self,
        union_decl: banjo_sir::DeclId,
        struct_ty: &banjo_sir::Type,
    ) -> u32 {
        let Decl::UnionDef(def) = self.unit.arena.decl(union_decl) else {
            return 0;
        };

        for (index, case) in def.cases.iter().enumerate() {
            if let Decl::UnionCase(c) = self.unit.arena.decl(*case) {
                if c.fields.len() == 1 && c.fields[0].ty == *struct_ty {
                    return index as u32;
                }
            }
        }
        0
    }

    fn lower_call(
        &mut self,
        ctx: &mut FuncCtx,
        callee: ExprId,
        args: &[ExprId],
        result_sir_ty: &banjo_sir::Type,
    ) -> Operand {
        let callee_sir_ty = self.unit.arena.expr(callee).ty.clone();
        let func_ty = match &callee_sir_ty {
            banjo_sir::Type::Func(ft) | banjo_sir::Type::Closure(ft) => ft.clone(),
            _ => banjo_sir::FuncType::new(Vec::new(), result_sir_ty.clone()),
        };

        let return_in_memory = self.abi.return_in_memory(self, &func_ty.return_type);

        // Evaluate the callee into an operand typed with the call's result
        // type.
        let result_ssa_ty = if return_in_memory {
            Type::VOID
        } else {
            self.convert_type(result_sir_ty)
        };

        let callee_operand = match self.unit.arena.expr(callee).kind.clone() {
            ExprKind::Symbol(Symbol::Func(decl)) => {
                let index = self.func_map[&decl];
                Operand::func(index, result_ssa_ty.clone())
            }
            ExprKind::Symbol(Symbol::NativeFunc(decl))
            | ExprKind::Symbol(Symbol::ExternFunc(decl)) => {
                let index = self.extern_func_map[&decl];
                Operand::extern_func(index, result_ssa_ty.clone())
            }
            _ => {
                let value = self.lower_value(ctx, callee);
                Operand { kind: value.kind, ty: result_ssa_ty.clone() }
            }
        };

        let mut operands = vec![callee_operand];

        // Hidden return slot first.
        let sret_slot = if return_in_memory {
            let slot = self.alloc_local(ctx, &func_ty.return_type);
            operands.push(Operand::register(slot.addr, Type::ADDR));
            Some(slot)
        } else {
            None
        };

        for arg in args {
            operands.push(self.lower_value(ctx, *arg));
        }

        let dest = if result_ssa_ty.is_void() {
            None
        } else {
            Some(self.next_reg(ctx))
        };

        let mut instr = Instruction::new(Opcode::Call, dest, operands);
        if func_ty.variadic {
            instr = instr.with_attr(InstrAttr::Variadic(func_ty.params.len() as u32 + 1));
        }
        self.push_instr(ctx, instr);

        match (sret_slot, dest) {
            (Some(slot), _) => {
                let ssa_ty = self.convert_type(result_sir_ty);
                Operand::register(slot.addr, ssa_ty)
            }
            (None, Some(reg)) => Operand::register(reg, result_ssa_ty),
            (None, None) => Operand::undef(Type::VOID),
        }
    }
}
