//! Statement lowering

use super::{FuncCtx, LocalKey, SsaGenerator};
use crate::{BlockId, Comparison, Instruction, Opcode, Operand, Primitive, Type};
use banjo_sir::{Decl, ExprKind, Stmt, StmtId, Symbol};

/// Whether control flow continues after a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Normal,
    Diverged,
}

impl SsaGenerator<'_> {
    pub(crate) fn lower_block(&mut self, ctx: &mut FuncCtx, block: banjo_sir::BlockId) -> Flow {
        let stmts = self.unit.arena.block(block).stmts.clone();

        for stmt in stmts {
            if self.lower_stmt(ctx, stmt) == Flow::Diverged {
                return Flow::Diverged;
            }
        }
        Flow::Normal
    }

    fn lower_stmt(&mut self, ctx: &mut FuncCtx, stmt: StmtId) -> Flow {
        match self.unit.arena.stmt(stmt).clone() {
            Stmt::Var(var) => {
                let value = self.lower_value(ctx, var.value);
                let slot = self.alloc_local(ctx, &var.ty);
                self.store_value(ctx, value, slot.addr, &var.ty);
                ctx.locals.insert(LocalKey::Local(stmt), slot);
                Flow::Normal
            }
            Stmt::Assign(assign) => {
                let lhs_ty = self.unit.arena.expr(assign.lhs).ty.clone();
                let addr = self.lower_addr(ctx, assign.lhs);
                let value = self.lower_value(ctx, assign.rhs);

                if self.is_aggregate(&lhs_ty) {
                    let ssa_ty = self.convert_type(&lhs_ty);
                    self.push_instr(
                        ctx,
                        Instruction::new(
                            Opcode::Copy,
                            None,
                            vec![addr, value, Operand::type_token(ssa_ty)],
                        ),
                    );
                } else {
                    self.push_instr(
                        ctx,
                        Instruction::new(Opcode::Store, None, vec![value, addr]),
                    );
                }
                Flow::Normal
            }
            Stmt::Return(ret) => {
                match (ret.value, ctx.sret) {
                    (Some(value), Some(sret)) => {
                        let value_ty = self.unit.arena.expr(value).ty.clone();
                        let operand = self.lower_value(ctx, value);
                        let ssa_ty = self.convert_type(&value_ty);
                        self.push_instr(
                            ctx,
                            Instruction::new(
                                Opcode::Copy,
                                None,
                                vec![
                                    Operand::register(sret, ssa_ty.clone()),
                                    operand,
                                    Operand::type_token(ssa_ty),
                                ],
                            ),
                        );
                        self.push_instr(ctx, Instruction::new(Opcode::Ret, None, Vec::new()));
                    }
                    (Some(value), None) => {
                        let operand = self.lower_value(ctx, value);
                        self.push_instr(
                            ctx,
                            Instruction::new(Opcode::Ret, None, vec![operand]),
                        );
                    }
                    (None, _) => {
                        self.push_instr(ctx, Instruction::new(Opcode::Ret, None, Vec::new()));
                    }
                }
                Flow::Diverged
            }
            Stmt::If(if_stmt) => {
                let merge = {
                    let label = ctx.label("if.merge");
                    self.create_block(ctx, label)
                };
                let mut all_diverged = true;

                for branch in &if_stmt.branches {
                    let then_block = {
                        let label = ctx.label("if.then");
                        self.create_block(ctx, label)
                    };
                    let next_block = {
                        let label = ctx.label("if.next");
                        self.create_block(ctx, label)
                    };

                    self.lower_condition(ctx, branch.condition, then_block, next_block);

                    ctx.current_block = then_block;
                    if self.lower_block(ctx, branch.block) == Flow::Normal {
                        all_diverged = false;
                        self.jump(ctx, merge);
                    }

                    ctx.current_block = next_block;
                }

                match if_stmt.else_block {
                    Some(else_block) => {
                        if self.lower_block(ctx, else_block) == Flow::Normal {
                            all_diverged = false;
                            self.jump(ctx, merge);
                        }
                    }
                    None => {
                        all_diverged = false;
                        self.jump(ctx, merge);
                    }
                }

                ctx.current_block = merge;
                if all_diverged {
                    // Nothing reaches the merge block.
                    Flow::Diverged
                } else {
                    Flow::Normal
                }
            }
            Stmt::While(while_stmt) => {
                self.lower_loop(ctx, Some(while_stmt.condition), while_stmt.block, None)
            }
            Stmt::Loop(loop_stmt) => {
                self.lower_loop(ctx, loop_stmt.condition, loop_stmt.block, loop_stmt.latch)
            }
            Stmt::Switch(switch) => self.lower_switch(ctx, &switch),
            Stmt::Try(try_stmt) => match try_stmt.lowered {
                Some(lowered) => self.lower_stmt(ctx, lowered),
                None => Flow::Normal,
            },
            Stmt::For(for_stmt) => match for_stmt.lowered {
                Some(lowered) => self.lower_stmt(ctx, lowered),
                None => Flow::Normal,
            },
            Stmt::Continue(_) => {
                if let Some((continue_target, _)) = ctx.loop_stack.last().copied() {
                    self.jump(ctx, continue_target);
                }
                Flow::Diverged
            }
            Stmt::Break(_) => {
                if let Some((_, break_target)) = ctx.loop_stack.last().copied() {
                    self.jump(ctx, break_target);
                }
                Flow::Diverged
            }
            Stmt::Block(block) => self.lower_block(ctx, block),
            Stmt::Expr(expr) => {
                self.lower_value(ctx, expr);
                Flow::Normal
            }
            Stmt::ExpandedMeta(expanded) => {
                for inner in expanded.stmts {
                    if self.lower_stmt(ctx, inner) == Flow::Diverged {
                        return Flow::Diverged;
                    }
                }
                Flow::Normal
            }
            // Analyzed forms only reach here through their rewrites.
            Stmt::CompAssign(_) | Stmt::MetaIf(_) | Stmt::MetaFor(_) | Stmt::Error => Flow::Normal,
        }
    }

    fn lower_loop(
        &mut self,
        ctx: &mut FuncCtx,
        condition: Option<banjo_sir::ExprId>,
        body: banjo_sir::BlockId,
        latch: Option<banjo_sir::BlockId>,
    ) -> Flow {
        let header = {
            let label = ctx.label("loop.header");
            self.create_block(ctx, label)
        };
        let body_block = {
            let label = ctx.label("loop.body");
            self.create_block(ctx, label)
        };
        let latch_block = latch.map(|_| {
            let label = ctx.label("loop.latch");
            self.create_block(ctx, label)
        });
        let exit = {
            let label = ctx.label("loop.exit");
            self.create_block(ctx, label)
        };

        self.jump(ctx, header);
        ctx.current_block = header;

        match condition {
            Some(condition) => self.lower_condition(ctx, condition, body_block, exit),
            None => self.jump(ctx, body_block),
        }

        let continue_target = latch_block.unwrap_or(header);
        ctx.loop_stack.push((continue_target, exit));

        ctx.current_block = body_block;
        if self.lower_block(ctx, body) == Flow::Normal {
            self.jump(ctx, continue_target);
        }

        if let (Some(latch), Some(latch_block)) = (latch, latch_block) {
            ctx.current_block = latch_block;
            if self.lower_block(ctx, latch) == Flow::Normal {
                self.jump(ctx, header);
            }
        }

        ctx.loop_stack.pop();
        ctx.current_block = exit;
        Flow::Normal
    }

    fn lower_switch(&mut self, ctx: &mut FuncCtx, switch: &banjo_sir::SwitchStmt) -> Flow {
        let value_ty = self.unit.arena.expr(switch.value).ty.clone();
        let banjo_sir::Type::Union(union_decl) = value_ty else {
            return Flow::Normal;
        };

        let union_value = self.lower_value(ctx, switch.value);

        // Load the tag word.
        let tag_ptr = self.next_reg(ctx);
        self.push_instr(
            ctx,
            Instruction::new(
                Opcode::MemberPtr,
                Some(tag_ptr),
                vec![
                    union_value.clone(),
                    Operand::int_immediate(0, Type::primitive(Primitive::U32)),
                ],
            ),
        );
        let tag = self.next_reg(ctx);
        self.push_instr(
            ctx,
            Instruction::new(
                Opcode::Load,
                Some(tag),
                vec![Operand::register(tag_ptr, Type::primitive(Primitive::U32))],
            ),
        );

        let merge = {
            let label = ctx.label("switch.merge");
            self.create_block(ctx, label)
        };

        for case in &switch.cases {
            let case_index = self.union_case_index(union_decl, case);

            let case_block = {
                let label = ctx.label("switch.case");
                self.create_block(ctx, label)
            };
            let next_block = {
                let label = ctx.label("switch.next");
                self.create_block(ctx, label)
            };

            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::Cjmp,
                    None,
                    vec![
                        Operand::register(tag, Type::primitive(Primitive::U32)),
                        Operand::comparison(Comparison::Eq),
                        Operand::int_immediate(case_index as i128, Type::primitive(Primitive::U32)),
                        Operand::branch_target(case_block, Vec::new()),
                        Operand::branch_target(next_block, Vec::new()),
                    ],
                ),
            );

            // Bind the payload view inside the case block.
            ctx.current_block = case_block;

            let payload_ptr = self.next_reg(ctx);
            self.push_instr(
                ctx,
                Instruction::new(
                    Opcode::MemberPtr,
                    Some(payload_ptr),
                    vec![
                        union_value.clone(),
                        Operand::int_immediate(1, Type::primitive(Primitive::U32)),
                    ],
                ),
            );

            let case_table = self.unit.arena.block(case.block).table;
            if let Some(Symbol::Local(binding)) =
                self.unit.arena.lookup(case_table, &case.ident.name)
            {
                ctx.locals.insert(
                    LocalKey::Local(binding),
                    super::LocalSlot { addr: payload_ptr, ty: case.ty.clone() },
                );
            }

            if self.lower_block(ctx, case.block) == Flow::Normal {
                self.jump(ctx, merge);
            }

            ctx.current_block = next_block;
        }

        self.jump(ctx, merge);
        ctx.current_block = merge;
        Flow::Normal
    }

    fn union_case_index(&self, union_decl: banjo_sir::DeclId, case: &banjo_sir::SwitchCase) -> u32 {
        let name = match &self.unit.arena.expr(case.type_expr).kind {
            ExprKind::Ident(ident) => ident.name.clone(),
            ExprKind::Dot { rhs, .. } => rhs.name.clone(),
            _ => return 0,
        };

        let Decl::UnionDef(def) = self.unit.arena.decl(union_decl) else {
            return 0;
        };

        def.cases
            .iter()
            .position(|c| {
                matches!(self.unit.arena.decl(*c), Decl::UnionCase(case) if case.ident.name == name)
            })
            .unwrap_or(0) as u32
    }

    pub(crate) fn jump(&mut self, ctx: &mut FuncCtx, target: BlockId) {
        self.push_instr(
            ctx,
            Instruction::new(
                Opcode::Jmp,
                None,
                vec![Operand::branch_target(target, Vec::new())],
            ),
        );
    }
}
