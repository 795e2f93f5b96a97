//! Bundle-based linear-scan register allocation
//!
//! Bundles (per-block live ranges of a virtual register) are visited in
//! start order. Candidates come from the target's register analyzer, with
//! a hint taken from register moves touching the bundle. When every
//! candidate conflicts, the latest-ending active bundle is spilled to a
//! stack slot and its uses and defs are rewritten through reloads; the
//! allocation then restarts with the fresh, short-lived registers.

use super::liveness::{self, Bundle};
use super::{DestRole, RegInfo};
use banjo_mcode::{
    operand::OperandKind, Function, IndirectBase, PhysicalReg, Register, RegisterClass,
    StackSlotKind,
};
use hashbrown::HashMap;

pub fn allocate(func: &mut Function, info: &dyn RegInfo) {
    // Spilling introduces new registers, so allocation may need several
    // rounds; each round shrinks the longest conflicting range.
    for _round in 0..32 {
        func.renumber();
        let liveness = liveness::analyze(func, info);
        let bundles = liveness::build_bundles(func, &liveness, info);

        match try_allocate(func, info, &bundles) {
            AllocationResult::Assigned(assignment) => {
                apply_assignment(func, &assignment);
                return;
            }
            AllocationResult::Spilled(vreg) => {
                spill(func, info, vreg);
            }
        }
    }

    panic!("register allocation did not converge");
}

enum AllocationResult {
    Assigned(HashMap<u32, PhysicalReg>),
    Spilled(u32),
}

fn try_allocate(func: &Function, info: &dyn RegInfo, bundles: &[Bundle]) -> AllocationResult {
    // Instruction points where physical registers are pinned: operands
    // naming them directly, plus call clobbers.
    let blocked = collect_blocked_ranges(func, info);
    let hints = collect_hints(func, info);

    let mut assignment: HashMap<u32, PhysicalReg> = HashMap::new();
    let mut active: Vec<usize> = Vec::new();

    for (index, bundle) in bundles.iter().enumerate() {
        active.retain(|other| bundles[*other].end() > bundle.start());

        let class = func
            .vreg_classes
            .get(bundle.vreg as usize)
            .copied()
            .unwrap_or(RegisterClass::Gpr);

        let mut candidates: Vec<PhysicalReg> = Vec::new();
        if let Some(hint) = hints.get(&bundle.vreg) {
            candidates.push(*hint);
        }
        candidates.extend_from_slice(info.candidates(class));

        let mut chosen = None;
        'candidates: for candidate in candidates {
            if !info.candidates(class).contains(&candidate) {
                continue;
            }

            // Conflicts with already-active bundles on the same register.
            for other in &active {
                if assignment.get(&bundles[*other].vreg) == Some(&candidate)
                    && bundle.overlaps(&bundles[*other])
                {
                    continue 'candidates;
                }
            }

            // Conflicts with pinned uses of the register.
            if let Some(points) = blocked.get(&candidate) {
                for point in points {
                    if bundle.covers(*point) {
                        continue 'candidates;
                    }
                }
            }

            chosen = Some(candidate);
            break;
        }

        match chosen {
            Some(reg) => {
                assignment.insert(bundle.vreg, reg);
                active.push(index);
            }
            None => {
                // Spill the latest-ending conflicting bundle (possibly
                // this one).
                let victim = active
                    .iter()
                    .copied()
                    .filter(|other| {
                        func.vreg_classes
                            .get(bundles[*other].vreg as usize)
                            .copied()
                            .unwrap_or(RegisterClass::Gpr)
                            == class
                    })
                    .max_by_key(|other| bundles[*other].end());

                let victim_vreg = match victim {
                    Some(other) if bundles[other].end() > bundle.end() => bundles[other].vreg,
                    _ => bundle.vreg,
                };
                return AllocationResult::Spilled(victim_vreg);
            }
        }
    }

    AllocationResult::Assigned(assignment)
}

fn collect_blocked_ranges(
    func: &Function,
    info: &dyn RegInfo,
) -> HashMap<PhysicalReg, Vec<u32>> {
    let mut blocked: HashMap<PhysicalReg, Vec<u32>> = HashMap::new();

    for block in &func.blocks {
        for instr in &block.instrs {
            let n = instr.number;

            for operand in &instr.operands {
                if let Some(Register::Physical(reg)) = operand.as_reg() {
                    blocked.entry(reg).or_default().push(n);
                }
            }

            for reg_op in &instr.reg_ops {
                if let Register::Physical(reg) = reg_op.reg {
                    blocked.entry(reg).or_default().push(n);
                }
            }

            if instr.is_flag(banjo_mcode::FLAG_CALL) {
                for reg in info.call_clobbered() {
                    blocked.entry(*reg).or_default().push(n);
                }
            }
        }
    }

    blocked
}

/// Prefer the physical side of a move for the virtual side.
fn collect_hints(func: &Function, info: &dyn RegInfo) -> HashMap<u32, PhysicalReg> {
    let mut hints = HashMap::new();

    for block in &func.blocks {
        for instr in &block.instrs {
            if !info.is_move(instr) || instr.operands.len() < 2 {
                continue;
            }

            match (instr.operands[0].as_reg(), instr.operands[1].as_reg()) {
                (Some(Register::Virtual(vreg)), Some(Register::Physical(preg)))
                | (Some(Register::Physical(preg)), Some(Register::Virtual(vreg))) => {
                    hints.entry(vreg).or_insert(preg);
                }
                _ => {}
            }
        }
    }

    hints
}

fn apply_assignment(func: &mut Function, assignment: &HashMap<u32, PhysicalReg>) {
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            for operand in &mut instr.operands {
                match &mut operand.kind {
                    OperandKind::Reg(reg @ Register::Virtual(_)) => {
                        if let Some(phys) = assignment.get(&reg.as_virtual().unwrap()) {
                            *reg = Register::Physical(*phys);
                        }
                    }
                    OperandKind::Indirect(address) => {
                        if let IndirectBase::Reg(reg @ Register::Virtual(_)) = &mut address.base {
                            if let Some(phys) = assignment.get(&reg.as_virtual().unwrap()) {
                                *reg = Register::Physical(*phys);
                            }
                        }
                        if let Some(reg @ Register::Virtual(_)) = &mut address.index {
                            if let Some(phys) = assignment.get(&reg.as_virtual().unwrap()) {
                                *reg = Register::Physical(*phys);
                            }
                        }
                    }
                    _ => {}
                }
            }

            for reg_op in &mut instr.reg_ops {
                if let Register::Virtual(vreg) = reg_op.reg {
                    if let Some(phys) = assignment.get(&vreg) {
                        reg_op.reg = Register::Physical(*phys);
                    }
                }
            }
        }
    }
}

/// Rewrite every use and def of a spilled register through a stack slot.
fn spill(func: &mut Function, info: &dyn RegInfo, vreg: u32) {
    let class = func
        .vreg_classes
        .get(vreg as usize)
        .copied()
        .unwrap_or(RegisterClass::Gpr);

    let size = operand_size_of(func, vreg).unwrap_or(8);
    let slot = func.frame.add_slot(size as u64, size as u64, StackSlotKind::Spill);

    let num_blocks = func.blocks.len();
    for block_index in 0..num_blocks {
        let mut index = 0;
        while index < func.blocks[block_index].instrs.len() {
            let instr = &func.blocks[block_index].instrs[index];

            let reads = liveness::uses(instr, info).contains(&vreg);
            let writes = liveness::defs(instr, info).contains(&vreg);

            if !reads && !writes {
                index += 1;
                continue;
            }

            // Replace with a fresh short-lived register.
            let fresh = func.alloc_virtual_reg(class);
            let instr = &mut func.blocks[block_index].instrs[index];
            rewrite_vreg(instr, vreg, fresh);

            if reads {
                let reload = info.load_from_slot(fresh, slot, size, class);
                func.blocks[block_index].insert(index, reload);
                index += 1;
            }
            if writes {
                let store = info.store_to_slot(fresh, slot, size, class);
                func.blocks[block_index].insert(index + 1, store);
                index += 1;
            }

            index += 1;
        }
    }

    log::debug!("spilled v{} to slot {}", vreg, slot);
}

fn operand_size_of(func: &Function, vreg: u32) -> Option<u8> {
    for block in &func.blocks {
        for instr in &block.instrs {
            for operand in &instr.operands {
                if operand.as_reg() == Some(Register::Virtual(vreg)) && operand.size != 0 {
                    return Some(operand.size);
                }
            }
        }
    }
    None
}

fn rewrite_vreg(instr: &mut banjo_mcode::Instruction, from: u32, to: u32) {
    for operand in &mut instr.operands {
        match &mut operand.kind {
            OperandKind::Reg(Register::Virtual(reg)) if *reg == from => *reg = to,
            OperandKind::Indirect(address) => {
                if let IndirectBase::Reg(Register::Virtual(reg)) = &mut address.base {
                    if *reg == from {
                        *reg = to;
                    }
                }
                if let Some(Register::Virtual(reg)) = &mut address.index {
                    if *reg == from {
                        *reg = to;
                    }
                }
            }
            _ => {}
        }
    }

    for reg_op in &mut instr.reg_ops {
        if reg_op.reg == Register::Virtual(from) {
            reg_op.reg = Register::Virtual(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banjo_mcode::{Instruction, Operand};

    struct TestRegInfo;

    impl RegInfo for TestRegInfo {
        fn dest_role(&self, instr: &banjo_mcode::Instruction) -> DestRole {
            match instr.opcode {
                0 => DestRole::Def,    // mov
                1 => DestRole::UseDef, // add
                _ => DestRole::None,
            }
        }

        fn candidates(&self, _class: RegisterClass) -> &[PhysicalReg] {
            &[0, 1]
        }

        fn callee_saved(&self) -> &[PhysicalReg] {
            &[]
        }

        fn call_clobbered(&self) -> &[PhysicalReg] {
            &[0, 1]
        }

        fn is_branch(&self, _instr: &banjo_mcode::Instruction) -> bool {
            false
        }

        fn is_move(&self, instr: &banjo_mcode::Instruction) -> bool {
            instr.opcode == 0
        }

        fn load_from_slot(
            &self,
            dst: u32,
            slot: usize,
            size: u8,
            _class: RegisterClass,
        ) -> Instruction {
            Instruction::new(
                0,
                vec![
                    Operand::virtual_reg(dst, size),
                    Operand::stack_slot(slot, size),
                ],
            )
        }

        fn store_to_slot(
            &self,
            src: u32,
            slot: usize,
            size: u8,
            _class: RegisterClass,
        ) -> Instruction {
            Instruction::new(
                0,
                vec![
                    Operand::stack_slot(slot, size),
                    Operand::virtual_reg(src, size),
                ],
            )
        }
    }

    #[test]
    fn test_allocates_disjoint_ranges_to_same_reg() {
        let mut func = Function::new("f");
        let entry = func.create_block("entry");

        let a = func.alloc_virtual_reg(RegisterClass::Gpr);
        let b = func.alloc_virtual_reg(RegisterClass::Gpr);

        // a defined and used, then b defined and used: ranges do not
        // overlap, so both can take register 0.
        let block = &mut func.blocks[entry];
        block.append(Instruction::new(
            0,
            vec![Operand::virtual_reg(a, 4), Operand::int_immediate(1, 4)],
        ));
        block.append(Instruction::new(
            1,
            vec![Operand::virtual_reg(a, 4), Operand::int_immediate(2, 4)],
        ));
        block.append(Instruction::new(
            0,
            vec![Operand::virtual_reg(b, 4), Operand::int_immediate(3, 4)],
        ));
        block.append(Instruction::new(
            1,
            vec![Operand::virtual_reg(b, 4), Operand::int_immediate(4, 4)],
        ));

        allocate(&mut func, &TestRegInfo);

        for block in &func.blocks {
            for instr in &block.instrs {
                for operand in &instr.operands {
                    assert!(
                        operand.as_reg().map(|r| r.is_physical()).unwrap_or(true),
                        "virtual register survived allocation: {:?}",
                        instr
                    );
                }
            }
        }
    }

    #[test]
    fn test_spills_when_pressure_exceeds_registers() {
        let mut func = Function::new("f");
        let entry = func.create_block("entry");

        // Three values live at once with only two registers.
        let regs: Vec<u32> = (0..3).map(|_| func.alloc_virtual_reg(RegisterClass::Gpr)).collect();

        let block = &mut func.blocks[entry];
        for (i, reg) in regs.iter().enumerate() {
            block.append(Instruction::new(
                0,
                vec![
                    Operand::virtual_reg(*reg, 8),
                    Operand::int_immediate(i as i64, 8),
                ],
            ));
        }
        for reg in &regs {
            block.append(Instruction::new(
                1,
                vec![Operand::virtual_reg(*reg, 8), Operand::int_immediate(1, 8)],
            ));
        }

        allocate(&mut func, &TestRegInfo);

        assert!(
            func.frame
                .slots
                .iter()
                .any(|slot| slot.kind == StackSlotKind::Spill),
            "expected at least one spill slot"
        );
    }
}
