//! Virtual-register liveness analysis
//!
//! Backward dataflow over the block graph producing live-in/live-out
//! sets, then per-block live ranges (the pieces of a bundle).

use super::{DestRole, RegInfo};
use banjo_mcode::{Function, Instruction, Register};
use hashbrown::{HashMap, HashSet};

/// Virtual registers read by an instruction
pub fn uses(instr: &Instruction, info: &dyn RegInfo) -> Vec<u32> {
    let mut result = Vec::new();
    let dest_role = info.dest_role(instr);

    for (index, operand) in instr.operands.iter().enumerate() {
        match &operand.kind {
            banjo_mcode::operand::OperandKind::Reg(Register::Virtual(reg)) => {
                let is_read = index > 0
                    || matches!(dest_role, DestRole::Use | DestRole::UseDef | DestRole::None);
                if is_read {
                    result.push(*reg);
                }
            }
            banjo_mcode::operand::OperandKind::Indirect(address) => {
                if let banjo_mcode::IndirectBase::Reg(Register::Virtual(reg)) = address.base {
                    result.push(reg);
                }
                if let Some(Register::Virtual(reg)) = address.index {
                    result.push(reg);
                }
            }
            _ => {}
        }
    }

    for reg_op in &instr.reg_ops {
        if let Register::Virtual(reg) = reg_op.reg {
            if matches!(
                reg_op.usage,
                banjo_mcode::RegUsage::Use | banjo_mcode::RegUsage::UseDef
            ) {
                result.push(reg);
            }
        }
    }

    result
}

/// Virtual registers written by an instruction
pub fn defs(instr: &Instruction, info: &dyn RegInfo) -> Vec<u32> {
    let mut result = Vec::new();

    if matches!(info.dest_role(instr), DestRole::Def | DestRole::UseDef) {
        if let Some(operand) = instr.operands.first() {
            if let Some(Register::Virtual(reg)) = operand.as_reg() {
                result.push(reg);
            }
        }
    }

    for reg_op in &instr.reg_ops {
        if let Register::Virtual(reg) = reg_op.reg {
            if matches!(
                reg_op.usage,
                banjo_mcode::RegUsage::Def | banjo_mcode::RegUsage::UseDef
            ) {
                result.push(reg);
            }
        }
    }

    result
}

pub struct Liveness {
    pub live_in: Vec<HashSet<u32>>,
    pub live_out: Vec<HashSet<u32>>,
}

pub fn analyze(func: &Function, info: &dyn RegInfo) -> Liveness {
    let num_blocks = func.blocks.len();
    let mut gen_sets: Vec<HashSet<u32>> = vec![HashSet::new(); num_blocks];
    let mut kill_sets: Vec<HashSet<u32>> = vec![HashSet::new(); num_blocks];

    for (index, block) in func.blocks.iter().enumerate() {
        for instr in &block.instrs {
            for reg in uses(instr, info) {
                if !kill_sets[index].contains(&reg) {
                    gen_sets[index].insert(reg);
                }
            }
            for reg in defs(instr, info) {
                kill_sets[index].insert(reg);
            }
        }
    }

    let mut live_in: Vec<HashSet<u32>> = vec![HashSet::new(); num_blocks];
    let mut live_out: Vec<HashSet<u32>> = vec![HashSet::new(); num_blocks];

    let mut changed = true;
    while changed {
        changed = false;

        for index in (0..num_blocks).rev() {
            let mut new_out = HashSet::new();
            for succ in &func.blocks[index].successors {
                new_out.extend(live_in[*succ].iter().copied());
            }

            let mut new_in = gen_sets[index].clone();
            for reg in &new_out {
                if !kill_sets[index].contains(reg) {
                    new_in.insert(*reg);
                }
            }

            if new_in != live_in[index] || new_out != live_out[index] {
                live_in[index] = new_in;
                live_out[index] = new_out;
                changed = true;
            }
        }
    }

    Liveness { live_in, live_out }
}

/// A virtual register's live range grouped by block: the unit of
/// allocation.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub vreg: u32,
    /// Instruction-number ranges, one per block the register is live in
    pub ranges: Vec<(u32, u32)>,
}

impl Bundle {
    pub fn start(&self) -> u32 {
        self.ranges.first().map(|r| r.0).unwrap_or(0)
    }

    pub fn end(&self) -> u32 {
        self.ranges.iter().map(|r| r.1).max().unwrap_or(0)
    }

    pub fn overlaps(&self, other: &Bundle) -> bool {
        for a in &self.ranges {
            for b in &other.ranges {
                if a.0 < b.1 && b.0 < a.1 {
                    return true;
                }
            }
        }
        false
    }

    pub fn covers(&self, point: u32) -> bool {
        self.ranges.iter().any(|r| r.0 <= point && point < r.1)
    }
}

/// Build bundles from liveness: within each block a register's range runs
/// from its first definition (or the block start if live-in) to its last
/// use (or the block end if live-out).
pub fn build_bundles(func: &Function, liveness: &Liveness, info: &dyn RegInfo) -> Vec<Bundle> {
    let mut ranges: HashMap<u32, Vec<(u32, u32)>> = HashMap::new();

    for (index, block) in func.blocks.iter().enumerate() {
        if block.instrs.is_empty() {
            continue;
        }

        let block_start = block.instrs.first().unwrap().number;
        let block_end = block.instrs.last().unwrap().number + 2;

        let mut starts: HashMap<u32, u32> = HashMap::new();
        let mut ends: HashMap<u32, u32> = HashMap::new();

        for reg in &liveness.live_in[index] {
            starts.insert(*reg, block_start);
            ends.insert(*reg, block_start);
        }

        for instr in &block.instrs {
            let n = instr.number;

            for reg in uses(instr, info) {
                starts.entry(reg).or_insert(n);
                ends.insert(reg, n + 1);
            }
            for reg in defs(instr, info) {
                starts.entry(reg).or_insert(n);
                ends.insert(reg, n + 1);
            }
        }

        for reg in &liveness.live_out[index] {
            if starts.contains_key(reg) {
                ends.insert(*reg, block_end);
            } else {
                starts.insert(*reg, block_start);
                ends.insert(*reg, block_end);
            }
        }

        for (reg, start) in starts {
            let end = ends[&reg];
            ranges
                .entry(reg)
                .or_default()
                .push((start, end.max(start + 1)));
        }
    }

    let mut bundles: Vec<Bundle> = ranges
        .into_iter()
        .map(|(vreg, mut ranges)| {
            ranges.sort_unstable();
            Bundle { vreg, ranges }
        })
        .collect();

    bundles.sort_by_key(|b| b.start());
    bundles
}
