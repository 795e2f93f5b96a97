//! AArch64 instruction encoding
//!
//! Every instruction is a fixed 4-byte word, so label branches resolve by
//! simple backpatching once all block offsets are known; no relaxation is
//! needed. Calls and address materialization leave BRANCH26, PAGE21 and
//! PAGEOFF12 relocations for the linker. Symbol names carry the Mach-O
//! underscore prefix.

use crate::binmod::{BinModule, BinSymbolUseKind};
use crate::section::{BinaryBuilder, UnwindFrame};
use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode::{
    operand::OperandKind, IndirectBase, Instruction, Module, Operand, Register,
    PSEUDO_EH_ENDPROLOG, PSEUDO_EH_PUSHREG,
};
use banjo_target::aarch64::opcode as op;
use banjo_target::aarch64::register::{encoding, SP};
use hashbrown::HashMap;

/// A pending label branch to backpatch: text offset, label symbol,
/// whether the word is a conditional branch.
struct LabelFixup {
    offset: u32,
    symbol: u32,
    conditional: bool,
}

pub struct AArch64Encoder {
    builder: BinaryBuilder,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
}

impl Default for AArch64Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AArch64Encoder {
    pub fn new() -> Self {
        Self {
            builder: BinaryBuilder::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    pub fn encode(mut self, module: &Module) -> BanjoResult<BinModule> {
        for name in &module.external_symbols {
            self.builder.add_unknown_symbol(prefixed(name));
        }

        self.builder.generate_data_slices(module);

        for func in &module.functions {
            self.encode_func(module, func)?;
        }

        self.builder.generate_addr_table_slice(module);
        self.builder.compute_slice_offsets();
        self.apply_label_fixups();

        Ok(self.builder.create_module())
    }

    fn encode_func(&mut self, module: &Module, func: &banjo_mcode::Function) -> BanjoResult<()> {
        let global = module.global_symbols.contains(&func.name);
        let start_symbol = self.builder.add_func_symbol(prefixed(&func.name), global);

        let mut frame = UnwindFrame {
            start_symbol,
            end_symbol: 0,
            alloca_size: func.unwind.alloca_size as u32,
            alloca_end_label: 0,
            pushed_regs: Vec::new(),
        };

        for block in &func.blocks {
            let label = self.ensure_label(&block.label);
            self.builder.attach_symbol_def(label);

            for instr in &block.instrs {
                self.encode_instr(instr, &mut frame)?;
            }
        }

        frame.end_symbol = self
            .builder
            .add_label_symbol(format!("{}.end", prefixed(&func.name)));
        if frame.alloca_end_label == 0 {
            frame.alloca_end_label = frame.end_symbol;
        }
        self.builder.unwind_frames.push(frame);
        Ok(())
    }

    fn ensure_label(&mut self, name: &str) -> u32 {
        if let Some(index) = self.labels.get(name) {
            return *index;
        }

        let index = self.builder.add_symbol_def(crate::section::SymbolDef {
            name: name.to_string(),
            kind: crate::binmod::BinSymbolKind::TextLabel,
            global: false,
            slice_index: 0,
            local_offset: 0,
            bin_index: 0,
            bin_offset: 0,
        });
        self.labels.insert(name.to_string(), index);
        index
    }

    fn word(&mut self, word: u32) {
        self.builder.text().write_u32(word);
    }

    fn encode_instr(&mut self, instr: &Instruction, frame: &mut UnwindFrame) -> BanjoResult<()> {
        match instr.opcode {
            PSEUDO_EH_PUSHREG => {
                let reg = instr.operands[0]
                    .as_physical_reg()
                    .map(encoding)
                    .unwrap_or(0);
                let end_label = self.builder.add_empty_label();
                frame.pushed_regs.push((reg, end_label));
                return Ok(());
            }
            PSEUDO_EH_ENDPROLOG => {
                frame.alloca_end_label = self.builder.add_empty_label();
                return Ok(());
            }
            _ => {}
        }

        match instr.opcode {
            op::MOV => self.encode_mov(instr),
            op::MOVZ => self.encode_movz_movk(instr, 0b10),
            op::MOVK => self.encode_movz_movk(instr, 0b11),
            op::ADD => self.encode_add_family(instr, 0x0B000000, 0x11000000),
            op::SUB => self.encode_add_family(instr, 0x4B000000, 0x51000000),
            op::CMP => self.encode_cmp(instr),
            op::MUL => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x1B007C00 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::SDIV => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x1AC00C00 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::UDIV => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x1AC00800 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::AND => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x0A000000 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::ORR => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x2A000000 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::EOR => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x4A000000 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::LSL => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x1AC02000 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::LSR => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x1AC02400 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::ASR => self.encode_three_reg(instr, |sf, rm, rn, rd| {
                0x1AC02800 | (sf << 31) | (rm << 16) | (rn << 5) | rd
            }),
            op::LDR | op::LDRB | op::LDRH => self.encode_load_store(instr, true),
            op::STR | op::STRB | op::STRH => self.encode_load_store(instr, false),
            op::B => self.encode_b(instr),
            opcode if op::is_bcond(opcode) => self.encode_bcond(instr, opcode),
            op::BL => self.encode_bl(instr),
            op::BLR => {
                let reg = self.reg(&instr.operands[0])?;
                self.word(0xD63F0000 | (reg << 5));
                Ok(())
            }
            op::BR => {
                let reg = self.reg(&instr.operands[0])?;
                self.word(0xD61F0000 | (reg << 5));
                Ok(())
            }
            op::RET => {
                self.word(0xD65F0000 | (30 << 5));
                Ok(())
            }
            op::ADRP => self.encode_adrp(instr),
            op::ADD_PAGEOFF => self.encode_add_pageoff(instr),
            op::CSEL => {
                let sf = sf_bit(instr.operands[0].size);
                let rd = self.reg(&instr.operands[0])?;
                let rn = self.reg(&instr.operands[1])?;
                let rm = self.reg(&instr.operands[2])?;
                let cond = instr.operands[3].as_int_immediate().unwrap_or(0) as u32;
                self.word(0x1A800000 | (sf << 31) | (rm << 16) | (cond << 12) | (rn << 5) | rd);
                Ok(())
            }
            op::FMOV => {
                let ftype = ftype_bits(instr.operands[0].size);
                let rd = self.reg(&instr.operands[0])?;
                let rn = self.reg(&instr.operands[1])?;
                self.word(0x1E204000 | (ftype << 22) | (rn << 5) | rd);
                Ok(())
            }
            op::FADD => self.encode_fp_arith(instr, 0x1E202800),
            op::FSUB => self.encode_fp_arith(instr, 0x1E203800),
            op::FMUL => self.encode_fp_arith(instr, 0x1E200800),
            op::FDIV => self.encode_fp_arith(instr, 0x1E201800),
            op::FSQRT => {
                let ftype = ftype_bits(instr.operands[0].size);
                let rd = self.reg(&instr.operands[0])?;
                let rn = self.reg(&instr.operands[1])?;
                self.word(0x1E21C000 | (ftype << 22) | (rn << 5) | rd);
                Ok(())
            }
            op::FCMP => {
                let ftype = ftype_bits(instr.operands[0].size);
                let rn = self.reg(&instr.operands[0])?;
                let rm = self.reg(&instr.operands[1])?;
                self.word(0x1E202000 | (ftype << 22) | (rm << 16) | (rn << 5));
                Ok(())
            }
            op::FCVT => {
                // Between single and double precision.
                let src_size = instr.operands[1].size;
                let rd = self.reg(&instr.operands[0])?;
                let rn = self.reg(&instr.operands[1])?;
                let (ftype, opc) = if src_size == 4 { (0b00, 0b01) } else { (0b01, 0b00) };
                self.word(0x1E224000 | (ftype << 22) | (opc << 15) | (rn << 5) | rd);
                Ok(())
            }
            op::SCVTF => {
                let sf = sf_bit(instr.operands[1].size);
                let ftype = ftype_bits(instr.operands[0].size);
                let rd = self.reg(&instr.operands[0])?;
                let rn = self.reg(&instr.operands[1])?;
                self.word(0x1E220000 | (sf << 31) | (ftype << 22) | (rn << 5) | rd);
                Ok(())
            }
            op::FCVTZS => {
                let sf = sf_bit(instr.operands[0].size);
                let ftype = ftype_bits(instr.operands[1].size);
                let rd = self.reg(&instr.operands[0])?;
                let rn = self.reg(&instr.operands[1])?;
                self.word(0x1E380000 | (sf << 31) | (ftype << 22) | (rn << 5) | rd);
                Ok(())
            }
            op::FCVTZU => {
                let sf = sf_bit(instr.operands[0].size);
                let ftype = ftype_bits(instr.operands[1].size);
                let rd = self.reg(&instr.operands[0])?;
                let rn = self.reg(&instr.operands[1])?;
                self.word(0x1E390000 | (sf << 31) | (ftype << 22) | (rn << 5) | rd);
                Ok(())
            }
            op::SXTB => self.encode_extend(instr, 0b000111),
            op::SXTH => self.encode_extend(instr, 0b001111),
            op::SXTW | op::UXTW => self.encode_extend(instr, 0b011111),
            other => Err(BanjoError::encode(format!(
                "no AArch64 encoding for opcode {}",
                other
            ))),
        }
    }

    fn reg(&self, operand: &Operand) -> BanjoResult<u32> {
        match operand.as_reg() {
            Some(Register::Physical(reg)) => Ok(encoding(reg)),
            _ => Err(BanjoError::encode("expected a physical register operand")),
        }
    }

    fn encode_mov(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let sf = sf_bit(instr.operands[0].size);
        let rd_raw = instr.operands[0].as_physical_reg();
        let rd = self.reg(&instr.operands[0])?;

        match &instr.operands[1].kind {
            OperandKind::Reg(_) => {
                let rm_raw = instr.operands[1].as_physical_reg();
                let rm = self.reg(&instr.operands[1])?;

                // Moves involving SP use ADD #0 rather than ORR.
                if rd_raw == Some(SP) || rm_raw == Some(SP) {
                    self.word(0x11000000 | (sf << 31) | (rm << 5) | rd);
                } else {
                    // MOV is an alias of ORR rd, xzr, rm.
                    self.word(0x2A0003E0 | (sf << 31) | (rm << 16) | rd);
                }
                Ok(())
            }
            OperandKind::IntImmediate(value) => {
                if (0..65536).contains(value) {
                    self.word(
                        0x52800000 | (sf << 31) | ((*value as u32 & 0xFFFF) << 5) | rd,
                    );
                    Ok(())
                } else {
                    Err(BanjoError::encode("mov immediate out of movz range"))
                }
            }
            _ => Err(BanjoError::encode("unsupported mov operand")),
        }
    }

    fn encode_movz_movk(&mut self, instr: &Instruction, opc: u32) -> BanjoResult<()> {
        let sf = sf_bit(instr.operands[0].size);
        let rd = self.reg(&instr.operands[0])?;
        let imm = instr.operands[1].as_int_immediate().unwrap_or(0) as u32 & 0xFFFF;

        let shift = instr
            .operands
            .get(2)
            .and_then(|operand| match operand.kind {
                OperandKind::LeftShift(amount) => Some(amount as u32 / 16),
                _ => None,
            })
            .unwrap_or(0);

        self.word(0x12800000 | (opc << 29) | (sf << 31) | (shift << 21) | (imm << 5) | rd);
        Ok(())
    }

    fn encode_add_family(&mut self, instr: &Instruction, reg_form: u32, imm_form: u32) -> BanjoResult<()> {
        let sf = sf_bit(instr.operands[0].size);
        let rd = self.reg(&instr.operands[0])?;
        let rn = self.reg(&instr.operands[1])?;

        match &instr.operands[2].kind {
            OperandKind::Reg(_) => {
                let rm = self.reg(&instr.operands[2])?;
                self.word(reg_form | (sf << 31) | (rm << 16) | (rn << 5) | rd);
                Ok(())
            }
            OperandKind::IntImmediate(value) => {
                let shifted = instr
                    .operands
                    .get(3)
                    .map(|operand| matches!(operand.kind, OperandKind::LeftShift(12)))
                    .unwrap_or(false);

                let imm = *value as u32;
                if imm > 0xFFF {
                    return Err(BanjoError::encode("add/sub immediate out of range"));
                }
                self.word(
                    imm_form
                        | (sf << 31)
                        | ((shifted as u32) << 22)
                        | (imm << 10)
                        | (rn << 5)
                        | rd,
                );
                Ok(())
            }
            _ => Err(BanjoError::encode("unsupported add/sub operand")),
        }
    }

    fn encode_cmp(&mut self, instr: &Instruction) -> BanjoResult<()> {
        // CMP is SUBS with the zero register destination.
        let sf = sf_bit(instr.operands[0].size);
        let rn = self.reg(&instr.operands[0])?;

        match &instr.operands[1].kind {
            OperandKind::Reg(_) => {
                let rm = self.reg(&instr.operands[1])?;
                self.word(0x6B00001F | (sf << 31) | (rm << 16) | (rn << 5));
                Ok(())
            }
            OperandKind::IntImmediate(value) => {
                let imm = *value as u32;
                if imm > 0xFFF {
                    return Err(BanjoError::encode("cmp immediate out of range"));
                }
                self.word(0x7100001F | (sf << 31) | (imm << 10) | (rn << 5));
                Ok(())
            }
            _ => Err(BanjoError::encode("unsupported cmp operand")),
        }
    }

    fn encode_three_reg(
        &mut self,
        instr: &Instruction,
        build: impl Fn(u32, u32, u32, u32) -> u32,
    ) -> BanjoResult<()> {
        let sf = sf_bit(instr.operands[0].size);
        let rd = self.reg(&instr.operands[0])?;
        let rn = self.reg(&instr.operands[1])?;
        let rm = self.reg(&instr.operands[2])?;
        self.word(build(sf, rm, rn, rd));
        Ok(())
    }

    fn encode_fp_arith(&mut self, instr: &Instruction, base: u32) -> BanjoResult<()> {
        let ftype = ftype_bits(instr.operands[0].size);
        let rd = self.reg(&instr.operands[0])?;
        let rn = self.reg(&instr.operands[1])?;
        let rm = self.reg(&instr.operands[2])?;
        self.word(base | (ftype << 22) | (rm << 16) | (rn << 5) | rd);
        Ok(())
    }

    fn encode_extend(&mut self, instr: &Instruction, imms: u32) -> BanjoResult<()> {
        // SBFM with an all-ones N for the 64-bit form.
        let rd = self.reg(&instr.operands[0])?;
        let rn = self.reg(&instr.operands[1])?;
        self.word(0x93400000 | (imms << 10) | (rn << 5) | rd);
        Ok(())
    }

    fn encode_load_store(&mut self, instr: &Instruction, is_load: bool) -> BanjoResult<()> {
        let (reg_operand, mem_operand) = if is_load {
            (&instr.operands[0], &instr.operands[1])
        } else {
            (&instr.operands[1], &instr.operands[0])
        };

        let rt = self.reg(reg_operand)?;
        let size = reg_operand.size;
        let is_float = instr.is_flag(banjo_mcode::FLAG_FLOAT);

        let OperandKind::Indirect(address) = &mem_operand.kind else {
            return Err(BanjoError::encode("expected an indirect load/store address"));
        };
        let base = match address.base {
            IndirectBase::Reg(Register::Physical(reg)) => encoding(reg),
            _ => return Err(BanjoError::encode("unresolved load/store base")),
        };

        let displacement = address.displacement;
        if displacement < 0 {
            return Err(BanjoError::encode("negative load/store offset"));
        }

        // Unsigned scaled immediate form.
        let (size_bits, scale) = match size {
            1 => (0b00, 1),
            2 => (0b01, 2),
            4 => (0b10, 4),
            _ => (0b11, 8),
        };

        if displacement % scale != 0 || (displacement / scale) > 0xFFF {
            return Err(BanjoError::encode("load/store offset out of range"));
        }
        let imm12 = (displacement / scale) as u32;

        let base_word: u32 = if is_float {
            // LDR/STR (SIMD&FP), opc depends on direction.
            let opc = if is_load { 0b01 } else { 0b00 };
            0x3D000000 | ((size_bits as u32) << 30) | (opc << 22)
        } else {
            let opc = if is_load { 0b01 } else { 0b00 };
            0x39000000 | ((size_bits as u32) << 30) | (opc << 22)
        };

        self.word(base_word | (imm12 << 10) | (base << 5) | rt);
        Ok(())
    }

    fn encode_b(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let OperandKind::Label(label) = &instr.operands[0].kind else {
            return Err(BanjoError::encode("b requires a label operand"));
        };

        let symbol = self.ensure_label(label);
        self.fixups.push(LabelFixup {
            offset: self.current_offset(),
            symbol,
            conditional: false,
        });
        self.word(0x14000000);
        Ok(())
    }

    fn encode_bcond(&mut self, instr: &Instruction, opcode: banjo_mcode::Opcode) -> BanjoResult<()> {
        let OperandKind::Label(label) = &instr.operands[0].kind else {
            return Err(BanjoError::encode("b.cond requires a label operand"));
        };

        let symbol = self.ensure_label(label);
        self.fixups.push(LabelFixup {
            offset: self.current_offset(),
            symbol,
            conditional: true,
        });
        self.word(0x54000000 | op::condition_code(opcode) as u32);
        Ok(())
    }

    fn encode_bl(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let Some(symbol) = instr.operands[0].as_symbol() else {
            return Err(BanjoError::encode("bl requires a symbol operand"));
        };

        let symbol_index = self.builder.symbol_index(&prefixed(&symbol.name));
        self.builder
            .add_text_symbol_use(symbol_index, BinSymbolUseKind::Branch26, 0);
        self.word(0x94000000);
        Ok(())
    }

    fn encode_adrp(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let rd = self.reg(&instr.operands[0])?;
        let Some(symbol) = instr.operands[1].as_symbol() else {
            return Err(BanjoError::encode("adrp requires a symbol operand"));
        };

        let symbol_index = self.builder.symbol_index(&prefixed(&symbol.name));
        self.builder
            .add_text_symbol_use(symbol_index, BinSymbolUseKind::Page21, 0);
        self.word(0x90000000 | rd);
        Ok(())
    }

    fn encode_add_pageoff(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let rd = self.reg(&instr.operands[0])?;
        let rn = self.reg(&instr.operands[1])?;
        let Some(symbol) = instr.operands[2].as_symbol() else {
            return Err(BanjoError::encode("page-offset add requires a symbol"));
        };

        let symbol_index = self.builder.symbol_index(&prefixed(&symbol.name));
        self.builder
            .add_text_symbol_use(symbol_index, BinSymbolUseKind::PageOff12, 0);
        self.word(0x91000000 | (rn << 5) | rd);
        Ok(())
    }

    fn current_offset(&self) -> u32 {
        // All text goes into the first slice; offsets are final.
        self.builder.text_slices.last().unwrap().buffer.size() as u32
    }

    fn apply_label_fixups(&mut self) {
        for fixup in &self.fixups {
            let def = &self.builder.defs[fixup.symbol as usize];
            let def_slice = &self.builder.text_slices[def.slice_index as usize];
            let target = def_slice.offset + def.local_offset;

            let delta_words = (target as i64 - fixup.offset as i64) / 4;
            let slice = self.builder.text_slices.last_mut().unwrap();

            let position = fixup.offset as usize;
            let mut word = u32::from_le_bytes(
                slice.buffer.data()[position..position + 4].try_into().unwrap(),
            );

            if fixup.conditional {
                word |= ((delta_words as u32) & 0x7FFFF) << 5;
            } else {
                word |= (delta_words as u32) & 0x03FF_FFFF;
            }

            slice.buffer.seek(position);
            slice.buffer.write_u32(word);
        }
    }
}

/// Mach-O symbol names carry a leading underscore.
fn prefixed(name: &str) -> String {
    format!("_{}", name)
}

fn sf_bit(size: u8) -> u32 {
    (size == 8) as u32
}

fn ftype_bits(size: u8) -> u32 {
    if size == 4 {
        0b00
    } else {
        0b01
    }
}

/// Encode a whole machine module.
pub fn encode(module: &Module) -> BanjoResult<BinModule> {
    AArch64Encoder::new().encode(module)
}
