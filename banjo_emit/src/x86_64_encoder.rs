//! x86-64 instruction encoding with branch relaxation
//!
//! Walks machine functions and emits bytes through the section builder.
//! Every conditional or unconditional jump to a label starts out as a
//! relaxable slice holding the 1-byte-displacement form; relaxation grows
//! slices to rel32 forms until every displacement fits, pushing later
//! slices outwards. Internal symbol uses are then patched in place and
//! external ones stay behind as relocations.

use crate::binmod::{BinModule, BinSymbolUseKind};
use crate::section::{BinaryBuilder, UnwindFrame};
use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode::{
    operand::OperandKind, IndirectBase, Instruction, Module, Operand, Register,
    PSEUDO_EH_ENDPROLOG, PSEUDO_EH_PUSHREG,
};
use banjo_target::x86_64::opcode as op;
use banjo_target::x86_64::register::{encoding, is_xmm};
use hashbrown::HashMap;

/// A resolved x86 address: either register-based or RIP-relative to a
/// symbol
#[derive(Debug, Clone, Copy)]
enum Addr {
    Reg {
        base: u8,
        index: Option<(u8, u8)>,
        displacement: i32,
    },
    Sym {
        symbol_index: u32,
        kind: BinSymbolUseKind,
        displacement: i32,
    },
}

pub struct X86_64Encoder {
    builder: BinaryBuilder,
    labels: HashMap<String, u32>,
}

impl Default for X86_64Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl X86_64Encoder {
    pub fn new() -> Self {
        Self {
            builder: BinaryBuilder::new(),
            labels: HashMap::new(),
        }
    }

    pub fn encode(mut self, module: &Module) -> BanjoResult<BinModule> {
        for name in &module.external_symbols {
            self.builder.add_unknown_symbol(name.clone());
        }

        self.builder.generate_data_slices(module);

        for func in &module.functions {
            self.encode_func(module, func)?;
        }

        self.builder.generate_addr_table_slice(module);

        self.builder.compute_slice_offsets();
        self.apply_relaxation();
        self.resolve_internal_symbols();

        Ok(self.builder.create_module())
    }

    fn encode_func(
        &mut self,
        module: &Module,
        func: &banjo_mcode::Function,
    ) -> BanjoResult<()> {
        let global = module.global_symbols.contains(&func.name);
        let start_symbol = self.builder.add_func_symbol(func.name.clone(), global);

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

        frame.end_symbol = self.builder.add_label_symbol(format!("{}.end", func.name));
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

    fn encode_instr(&mut self, instr: &Instruction, frame: &mut UnwindFrame) -> BanjoResult<()> {
        match instr.opcode {
            PSEUDO_EH_PUSHREG => {
                let reg = instr.operands[0]
                    .as_physical_reg()
                    .map(encoding)
                    .unwrap_or(0);
                let end_label = self.builder.add_empty_label();
                frame.pushed_regs.push((reg as u32, end_label));
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
            op::MOVSX => self.encode_movsx(instr),
            op::MOVZX => self.encode_movzx(instr),
            op::ADD => self.encode_basic(instr, BasicOpcodes::ADD),
            op::SUB => self.encode_basic(instr, BasicOpcodes::SUB),
            op::CMP => self.encode_basic(instr, BasicOpcodes::CMP),
            op::AND => self.encode_basic(instr, BasicOpcodes::AND),
            op::OR => self.encode_basic(instr, BasicOpcodes::OR),
            op::XOR => self.encode_basic(instr, BasicOpcodes::XOR),
            op::IMUL => self.encode_imul(instr),
            op::IDIV => self.encode_div(instr, 7),
            op::DIV => self.encode_div(instr, 6),
            op::SHL => self.encode_shift(instr, 4),
            op::SHR => self.encode_shift(instr, 5),
            op::CDQ => {
                self.builder.text().write_u8(0x99);
                Ok(())
            }
            op::CQO => {
                self.builder.text().write_u8(0x48);
                self.builder.text().write_u8(0x99);
                Ok(())
            }
            op::JMP => self.encode_jmp(instr),
            opcode if op::is_jcc(opcode) => self.encode_jcc(instr, jcc_byte(opcode)),
            opcode if op::is_cmov(opcode) => self.encode_cmov(instr, cmov_byte(opcode)),
            op::LEA => self.encode_lea(instr),
            op::CALL => self.encode_call(instr),
            op::RET => {
                self.builder.text().write_u8(0xC3);
                Ok(())
            }
            op::PUSH => {
                let reg = self.reg(&instr.operands[0])?;
                if reg >= 8 {
                    self.builder.text().write_u8(0x41);
                }
                self.builder.text().write_u8(0x50 + (reg & 7));
                Ok(())
            }
            op::POP => {
                let reg = self.reg(&instr.operands[0])?;
                if reg >= 8 {
                    self.builder.text().write_u8(0x41);
                }
                self.builder.text().write_u8(0x58 + (reg & 7));
                Ok(())
            }
            op::MOVSS => self.encode_sse_mov(instr, 0xF3),
            op::MOVSD => self.encode_sse_mov(instr, 0xF2),
            op::MOVAPS => self.encode_sse_op(instr, 0, 0x28),
            op::ADDSS => self.encode_sse_op(instr, 0xF3, 0x58),
            op::ADDSD => self.encode_sse_op(instr, 0xF2, 0x58),
            op::SUBSS => self.encode_sse_op(instr, 0xF3, 0x5C),
            op::SUBSD => self.encode_sse_op(instr, 0xF2, 0x5C),
            op::MULSS => self.encode_sse_op(instr, 0xF3, 0x59),
            op::MULSD => self.encode_sse_op(instr, 0xF2, 0x59),
            op::DIVSS => self.encode_sse_op(instr, 0xF3, 0x5E),
            op::DIVSD => self.encode_sse_op(instr, 0xF2, 0x5E),
            op::XORPS => self.encode_sse_op(instr, 0, 0x57),
            op::SQRTSS => self.encode_sse_op(instr, 0xF3, 0x51),
            op::SQRTSD => self.encode_sse_op(instr, 0xF2, 0x51),
            op::UCOMISS => self.encode_sse_op(instr, 0, 0x2E),
            op::UCOMISD => self.encode_sse_op(instr, 0x66, 0x2E),
            op::CVTSS2SD => self.encode_sse_op(instr, 0xF3, 0x5A),
            op::CVTSD2SS => self.encode_sse_op(instr, 0xF2, 0x5A),
            op::CVTSI2SS => self.encode_sse_cvt(instr, 0xF3, 0x2A),
            op::CVTSI2SD => self.encode_sse_cvt(instr, 0xF2, 0x2A),
            op::CVTSS2SI => self.encode_sse_cvt(instr, 0xF3, 0x2D),
            op::CVTSD2SI => self.encode_sse_cvt(instr, 0xF2, 0x2D),
            other => Err(BanjoError::encode(format!(
                "no x86-64 encoding for opcode {}",
                other
            ))),
        }
    }

    // -- operand classification ---------------------------------------------

    fn reg(&self, operand: &Operand) -> BanjoResult<u8> {
        match operand.as_reg() {
            Some(Register::Physical(reg)) => Ok(encoding(reg)),
            _ => Err(BanjoError::encode("expected a physical register operand")),
        }
    }

    fn reg_raw(&self, operand: &Operand) -> BanjoResult<banjo_mcode::PhysicalReg> {
        match operand.as_reg() {
            Some(Register::Physical(reg)) => Ok(reg),
            _ => Err(BanjoError::encode("expected a physical register operand")),
        }
    }

    fn is_reg(&self, operand: &Operand) -> bool {
        matches!(operand.as_reg(), Some(Register::Physical(_)))
    }

    fn is_mem(&self, operand: &Operand) -> bool {
        matches!(
            operand.kind,
            OperandKind::Indirect(_) | OperandKind::SymbolDeref(_)
        )
    }

    fn addr(&mut self, operand: &Operand) -> BanjoResult<Addr> {
        match &operand.kind {
            OperandKind::Indirect(address) => {
                let base = match address.base {
                    IndirectBase::Reg(Register::Physical(reg)) => encoding(reg),
                    _ => return Err(BanjoError::encode("unresolved indirect base")),
                };
                let index = match address.index {
                    Some(Register::Physical(reg)) => Some((encoding(reg), address.scale)),
                    Some(_) => return Err(BanjoError::encode("unresolved index register")),
                    None => None,
                };
                Ok(Addr::Reg {
                    base,
                    index,
                    displacement: address.displacement,
                })
            }
            OperandKind::SymbolDeref(symbol) | OperandKind::Symbol(symbol) => {
                let kind = if symbol.got {
                    BinSymbolUseKind::GotPcRel32
                } else {
                    BinSymbolUseKind::Rel32
                };
                let symbol_index = self.builder.symbol_index(&symbol.name);
                Ok(Addr::Sym {
                    symbol_index,
                    kind,
                    displacement: 0,
                })
            }
            _ => Err(BanjoError::encode("expected a memory operand")),
        }
    }

    // -- prefix and ModRM plumbing ------------------------------------------

    fn emit_16bit_prefix_if_required(&mut self, size: u8) {
        if size == 2 {
            self.builder.text().write_u8(0x66);
        }
    }

    fn emit_rex(&mut self, w: bool, r: bool, x: bool, b: bool) {
        let byte = 0x40 | (w as u8) << 3 | (r as u8) << 2 | (x as u8) << 1 | (b as u8);
        self.builder.text().write_u8(byte);
    }

    fn emit_rex_rr(&mut self, size: u8, reg: u8, rm: u8) {
        let w = size == 8;
        let r = reg >= 8;
        let b = rm >= 8;
        if w || r || b {
            self.emit_rex(w, r, false, b);
        }
    }

    fn emit_rex_rm(&mut self, size: u8, reg: u8, addr: Addr) {
        let w = size == 8;
        let r = reg >= 8;
        let (x, b) = match addr {
            Addr::Reg { base, index, .. } => {
                (index.map(|(i, _)| i >= 8).unwrap_or(false), base >= 8)
            }
            Addr::Sym { .. } => (false, false),
        };
        if w || r || x || b {
            self.emit_rex(w, r, x, b);
        }
    }

    fn emit_modrm(&mut self, mod_bits: u8, reg: u8, rm: u8) {
        self.builder
            .text()
            .write_u8(mod_bits << 6 | (reg & 7) << 3 | (rm & 7));
    }

    fn emit_sib(&mut self, scale: u8, index: u8, base: u8) {
        let scale_bits = match scale {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        };
        self.builder
            .text()
            .write_u8(scale_bits << 6 | (index & 7) << 3 | (base & 7));
    }

    /// ModRM (and SIB/displacement) for a register field plus memory
    /// operand. `tail_len` is the number of immediate bytes that follow,
    /// needed by RIP-relative displacements.
    fn emit_mem(&mut self, addr: Addr, reg: u8, tail_len: u32) {
        match addr {
            Addr::Sym {
                symbol_index,
                kind,
                displacement,
            } => {
                // RIP-relative: mod 00, rm 101.
                self.emit_modrm(0b00, reg, 0b101);
                self.builder
                    .add_text_symbol_use(symbol_index, kind, displacement - tail_len as i32);
                self.builder.text().write_i32(0);
            }
            Addr::Reg {
                base,
                index,
                displacement,
            } => {
                let base_low = base & 7;
                let needs_sib = index.is_some() || base_low == 0b100;

                // RBP/R13 as base with mod 00 would read as RIP-relative.
                let (mod_bits, disp_size) = if displacement == 0 && base_low != 0b101 {
                    (0b00, 0)
                } else if (-128..=127).contains(&displacement) {
                    (0b01, 1)
                } else {
                    (0b10, 4)
                };

                if needs_sib {
                    self.emit_modrm(mod_bits, reg, 0b100);
                    match index {
                        Some((index_reg, scale)) => self.emit_sib(scale, index_reg, base),
                        None => self.emit_sib(1, 0b100, base),
                    }
                } else {
                    self.emit_modrm(mod_bits, reg, base);
                }

                match disp_size {
                    1 => self.builder.text().write_i8(displacement as i8),
                    4 => self.builder.text().write_i32(displacement),
                    _ => {}
                }
            }
        }
    }

    // -- movs ---------------------------------------------------------------

    fn encode_mov(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let dst = &instr.operands[0];
        let src = &instr.operands[1];
        let size = dst.size.max(src.size);

        if self.is_reg(dst) && self.is_reg(src) {
            let dst = self.reg(dst)?;
            let src = self.reg(src)?;
            self.emit_16bit_prefix_if_required(size);
            self.emit_rex_rr(size, src, dst);
            self.builder
                .text()
                .write_u8(if size == 1 { 0x88 } else { 0x89 });
            self.emit_modrm(0b11, src, dst);
            return Ok(());
        }

        if self.is_reg(dst) {
            match &src.kind {
                OperandKind::IntImmediate(value) => {
                    return self.encode_mov_ri(self.reg(dst)?, *value, None, size);
                }
                OperandKind::Symbol(symbol) => {
                    // Absolute 64-bit address, patched through a relocation.
                    let symbol_index = self.builder.symbol_index(&symbol.name);
                    return self.encode_mov_ri(self.reg(dst)?, 0, Some(symbol_index), 8);
                }
                _ => {
                    let dst = self.reg(&instr.operands[0])?;
                    let addr = self.addr(src)?;
                    self.emit_16bit_prefix_if_required(size);
                    self.emit_rex_rm(size, dst, addr);
                    self.builder
                        .text()
                        .write_u8(if size == 1 { 0x8A } else { 0x8B });
                    self.emit_mem(addr, dst, 0);
                    return Ok(());
                }
            }
        }

        // Memory destination.
        let addr = self.addr(dst)?;
        match &src.kind {
            OperandKind::IntImmediate(value) => {
                self.emit_16bit_prefix_if_required(size);
                self.emit_rex_rm(size, 0, addr);
                self.builder
                    .text()
                    .write_u8(if size == 1 { 0xC6 } else { 0xC7 });
                let tail = if size == 1 { 1 } else { 4.min(size as u32) };
                self.emit_mem(addr, 0, tail);
                match size {
                    1 => self.builder.text().write_i8(*value as i8),
                    2 => self.builder.text().write_i16(*value as i16),
                    _ => self.builder.text().write_i32(*value as i32),
                }
                Ok(())
            }
            _ => {
                let src = self.reg(src)?;
                self.emit_16bit_prefix_if_required(size);
                self.emit_rex_rm(size, src, addr);
                self.builder
                    .text()
                    .write_u8(if size == 1 { 0x88 } else { 0x89 });
                self.emit_mem(addr, src, 0);
                Ok(())
            }
        }
    }

    fn encode_mov_ri(
        &mut self,
        dst: u8,
        value: i64,
        symbol: Option<u32>,
        size: u8,
    ) -> BanjoResult<()> {
        if symbol.is_some() || !(i32::MIN as i64..=i32::MAX as i64).contains(&value) {
            // mov r64, imm64
            self.emit_rex(true, false, false, dst >= 8);
            self.builder.text().write_u8(0xB8 + (dst & 7));
            if let Some(symbol_index) = symbol {
                self.builder
                    .add_text_symbol_use(symbol_index, BinSymbolUseKind::Abs64, 0);
            }
            self.builder.text().write_i64(value);
            return Ok(());
        }

        match size {
            1 => {
                if dst >= 8 {
                    self.emit_rex(false, false, false, true);
                }
                self.builder.text().write_u8(0xB0 + (dst & 7));
                self.builder.text().write_i8(value as i8);
            }
            8 => {
                // Sign-extended imm32 form.
                self.emit_rex(true, false, false, dst >= 8);
                self.builder.text().write_u8(0xC7);
                self.emit_modrm(0b11, 0, dst);
                self.builder.text().write_i32(value as i32);
            }
            _ => {
                self.emit_16bit_prefix_if_required(size);
                if dst >= 8 {
                    self.emit_rex(false, false, false, true);
                }
                self.builder.text().write_u8(0xB8 + (dst & 7));
                if size == 2 {
                    self.builder.text().write_i16(value as i16);
                } else {
                    self.builder.text().write_i32(value as i32);
                }
            }
        }
        Ok(())
    }

    fn encode_movsx(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let dst_size = instr.operands[0].size;
        let src_size = instr.operands[1].size;
        let dst = self.reg(&instr.operands[0])?;

        if self.is_reg(&instr.operands[1]) {
            let src = self.reg(&instr.operands[1])?;
            self.emit_rex_rr(dst_size, dst, src);
            match src_size {
                1 => {
                    self.builder.text().write_u8(0x0F);
                    self.builder.text().write_u8(0xBE);
                }
                2 => {
                    self.builder.text().write_u8(0x0F);
                    self.builder.text().write_u8(0xBF);
                }
                _ => self.builder.text().write_u8(0x63),
            }
            self.emit_modrm(0b11, dst, src);
        } else {
            let addr = self.addr(&instr.operands[1])?;
            self.emit_rex_rm(dst_size, dst, addr);
            match src_size {
                1 => {
                    self.builder.text().write_u8(0x0F);
                    self.builder.text().write_u8(0xBE);
                }
                2 => {
                    self.builder.text().write_u8(0x0F);
                    self.builder.text().write_u8(0xBF);
                }
                _ => self.builder.text().write_u8(0x63),
            }
            self.emit_mem(addr, dst, 0);
        }
        Ok(())
    }

    fn encode_movzx(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let dst_size = instr.operands[0].size;
        let src_size = instr.operands[1].size;
        let dst = self.reg(&instr.operands[0])?;
        let opcode = if src_size == 1 { 0xB6 } else { 0xB7 };

        if self.is_reg(&instr.operands[1]) {
            let src = self.reg(&instr.operands[1])?;
            self.emit_rex_rr(dst_size, dst, src);
            self.builder.text().write_u8(0x0F);
            self.builder.text().write_u8(opcode);
            self.emit_modrm(0b11, dst, src);
        } else {
            let addr = self.addr(&instr.operands[1])?;
            self.emit_rex_rm(dst_size, dst, addr);
            self.builder.text().write_u8(0x0F);
            self.builder.text().write_u8(opcode);
            self.emit_mem(addr, dst, 0);
        }
        Ok(())
    }

    // -- basic ALU forms ----------------------------------------------------

    fn encode_basic(&mut self, instr: &Instruction, opcodes: BasicOpcodes) -> BanjoResult<()> {
        let dst = &instr.operands[0];
        let src = &instr.operands[1];
        let size = dst.size.max(src.size);

        if self.is_reg(dst) && self.is_reg(src) {
            let dst = self.reg(dst)?;
            let src = self.reg(src)?;
            self.emit_16bit_prefix_if_required(size);
            self.emit_rex_rr(size, src, dst);
            self.builder.text().write_u8(if size == 1 {
                opcodes.rm8_r8
            } else {
                opcodes.rm_r
            });
            self.emit_modrm(0b11, src, dst);
            return Ok(());
        }

        if self.is_reg(dst) {
            match &src.kind {
                OperandKind::IntImmediate(value) => {
                    let dst = self.reg(&instr.operands[0])?;
                    self.emit_16bit_prefix_if_required(size);
                    self.emit_rex_rr(size, 0, dst);

                    if size != 1 && (-128..=127).contains(value) {
                        self.builder.text().write_u8(0x83);
                        self.emit_modrm(0b11, opcodes.digit, dst);
                        self.builder.text().write_i8(*value as i8);
                    } else if size == 1 {
                        self.builder.text().write_u8(0x80);
                        self.emit_modrm(0b11, opcodes.digit, dst);
                        self.builder.text().write_i8(*value as i8);
                    } else {
                        self.builder.text().write_u8(0x81);
                        self.emit_modrm(0b11, opcodes.digit, dst);
                        if size == 2 {
                            self.builder.text().write_i16(*value as i16);
                        } else {
                            self.builder.text().write_i32(*value as i32);
                        }
                    }
                    return Ok(());
                }
                _ if self.is_mem(src) => {
                    let dst = self.reg(&instr.operands[0])?;
                    let addr = self.addr(src)?;
                    self.emit_16bit_prefix_if_required(size);
                    self.emit_rex_rm(size, dst, addr);
                    self.builder.text().write_u8(if size == 1 {
                        opcodes.r8_rm8
                    } else {
                        opcodes.r_rm
                    });
                    self.emit_mem(addr, dst, 0);
                    return Ok(());
                }
                _ => {}
            }
        }

        // Memory destination with register source.
        let addr = self.addr(dst)?;
        let src = self.reg(src)?;
        self.emit_16bit_prefix_if_required(size);
        self.emit_rex_rm(size, src, addr);
        self.builder.text().write_u8(if size == 1 {
            opcodes.rm8_r8
        } else {
            opcodes.rm_r
        });
        self.emit_mem(addr, src, 0);
        Ok(())
    }

    fn encode_imul(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let dst = &instr.operands[0];
        let src = &instr.operands[1];
        let size = dst.size.max(2);
        let dst = self.reg(dst)?;

        match &src.kind {
            OperandKind::IntImmediate(value) => {
                self.emit_16bit_prefix_if_required(size);
                self.emit_rex_rr(size, dst, dst);
                if (-128..=127).contains(value) {
                    self.builder.text().write_u8(0x6B);
                    self.emit_modrm(0b11, dst, dst);
                    self.builder.text().write_i8(*value as i8);
                } else {
                    self.builder.text().write_u8(0x69);
                    self.emit_modrm(0b11, dst, dst);
                    self.builder.text().write_i32(*value as i32);
                }
            }
            _ => {
                let src = self.reg(src)?;
                self.emit_16bit_prefix_if_required(size);
                self.emit_rex_rr(size, dst, src);
                self.builder.text().write_u8(0x0F);
                self.builder.text().write_u8(0xAF);
                self.emit_modrm(0b11, dst, src);
            }
        }
        Ok(())
    }

    fn encode_div(&mut self, instr: &Instruction, digit: u8) -> BanjoResult<()> {
        let operand = &instr.operands[0];
        let size = operand.size;
        let reg = self.reg(operand)?;

        self.emit_16bit_prefix_if_required(size);
        self.emit_rex_rr(size, 0, reg);
        self.builder
            .text()
            .write_u8(if size == 1 { 0xF6 } else { 0xF7 });
        self.emit_modrm(0b11, digit, reg);
        Ok(())
    }

    fn encode_shift(&mut self, instr: &Instruction, digit: u8) -> BanjoResult<()> {
        let dst = &instr.operands[0];
        let size = dst.size;
        let reg = self.reg(dst)?;

        match &instr.operands[1].kind {
            OperandKind::IntImmediate(value) => {
                self.emit_16bit_prefix_if_required(size);
                self.emit_rex_rr(size, 0, reg);
                self.builder
                    .text()
                    .write_u8(if size == 1 { 0xC0 } else { 0xC1 });
                self.emit_modrm(0b11, digit, reg);
                self.builder.text().write_u8(*value as u8);
            }
            _ => {
                // Shift by CL.
                self.emit_16bit_prefix_if_required(size);
                self.emit_rex_rr(size, 0, reg);
                self.builder
                    .text()
                    .write_u8(if size == 1 { 0xD2 } else { 0xD3 });
                self.emit_modrm(0b11, digit, reg);
            }
        }
        Ok(())
    }

    // -- branches and calls -------------------------------------------------

    fn encode_jmp(&mut self, instr: &Instruction) -> BanjoResult<()> {
        match &instr.operands[0].kind {
            OperandKind::Label(label) => {
                let symbol = self.ensure_label(label);
                self.builder.create_relaxable_slice();
                self.builder.text().write_u8(0xEB);
                self.builder
                    .add_text_symbol_use(symbol, BinSymbolUseKind::Rel32, 0);
                self.builder.text().write_i8(0);
                self.builder.end_relaxable_slice();
                Ok(())
            }
            OperandKind::Reg(_) => {
                let reg = self.reg(&instr.operands[0])?;
                if reg >= 8 {
                    self.emit_rex(false, false, false, true);
                }
                self.builder.text().write_u8(0xFF);
                self.emit_modrm(0b11, 4, reg);
                Ok(())
            }
            _ => Err(BanjoError::encode("unsupported jmp operand")),
        }
    }

    fn encode_jcc(&mut self, instr: &Instruction, opcode: u8) -> BanjoResult<()> {
        let OperandKind::Label(label) = &instr.operands[0].kind else {
            return Err(BanjoError::encode("jcc requires a label operand"));
        };

        let symbol = self.ensure_label(label);
        self.builder.create_relaxable_slice();
        self.builder.text().write_u8(opcode);
        self.builder
            .add_text_symbol_use(symbol, BinSymbolUseKind::Rel32, 0);
        self.builder.text().write_i8(0);
        self.builder.end_relaxable_slice();
        Ok(())
    }

    fn encode_cmov(&mut self, instr: &Instruction, opcode: u8) -> BanjoResult<()> {
        let size = instr.operands[0].size.max(2);
        let dst = self.reg(&instr.operands[0])?;
        let src = self.reg(&instr.operands[1])?;

        self.emit_16bit_prefix_if_required(size);
        self.emit_rex_rr(size, dst, src);
        self.builder.text().write_u8(0x0F);
        self.builder.text().write_u8(opcode);
        self.emit_modrm(0b11, dst, src);
        Ok(())
    }

    fn encode_lea(&mut self, instr: &Instruction) -> BanjoResult<()> {
        let dst = self.reg(&instr.operands[0])?;
        let addr = self.addr(&instr.operands[1])?;

        self.emit_rex_rm(8, dst, addr);
        self.builder.text().write_u8(0x8D);
        self.emit_mem(addr, dst, 0);
        Ok(())
    }

    fn encode_call(&mut self, instr: &Instruction) -> BanjoResult<()> {
        match &instr.operands[0].kind {
            OperandKind::Symbol(symbol) => {
                let kind = if symbol.plt {
                    BinSymbolUseKind::Plt32
                } else {
                    BinSymbolUseKind::Rel32
                };
                let symbol_index = self.builder.symbol_index(&symbol.name);
                self.builder.text().write_u8(0xE8);
                self.builder.add_text_symbol_use(symbol_index, kind, 0);
                self.builder.text().write_i32(0);
                Ok(())
            }
            OperandKind::Reg(_) => {
                let reg = self.reg(&instr.operands[0])?;
                if reg >= 8 {
                    self.emit_rex(false, false, false, true);
                }
                self.builder.text().write_u8(0xFF);
                self.emit_modrm(0b11, 2, reg);
                Ok(())
            }
            _ => Err(BanjoError::encode("unsupported call operand")),
        }
    }

    // -- SSE ----------------------------------------------------------------

    fn encode_sse_mov(&mut self, instr: &Instruction, prefix: u8) -> BanjoResult<()> {
        let dst = &instr.operands[0];
        let src = &instr.operands[1];

        if self.is_reg(dst) {
            // 0F 10: xmm <- xmm/m
            let dst = self.reg_xmm(dst)?;
            self.builder.text().write_u8(prefix);
            if self.is_reg(src) {
                let src = self.reg_xmm(src)?;
                self.emit_rex_opt(dst, src);
                self.builder.text().write_u8(0x0F);
                self.builder.text().write_u8(0x10);
                self.emit_modrm(0b11, dst, src);
            } else {
                let addr = self.addr(src)?;
                self.emit_rex_rm_no_w(dst, addr);
                self.builder.text().write_u8(0x0F);
                self.builder.text().write_u8(0x10);
                self.emit_mem(addr, dst, 0);
            }
        } else {
            // 0F 11: m <- xmm
            let src = self.reg_xmm(src)?;
            let addr = self.addr(dst)?;
            self.builder.text().write_u8(prefix);
            self.emit_rex_rm_no_w(src, addr);
            self.builder.text().write_u8(0x0F);
            self.builder.text().write_u8(0x11);
            self.emit_mem(addr, src, 0);
        }
        Ok(())
    }

    fn encode_sse_op(&mut self, instr: &Instruction, prefix: u8, opcode: u8) -> BanjoResult<()> {
        let dst = self.reg_xmm(&instr.operands[0])?;
        let src = &instr.operands[1];

        if prefix != 0 {
            self.builder.text().write_u8(prefix);
        }

        if self.is_reg(src) {
            let src = self.reg_xmm(src)?;
            self.emit_rex_opt(dst, src);
            self.builder.text().write_u8(0x0F);
            self.builder.text().write_u8(opcode);
            self.emit_modrm(0b11, dst, src);
        } else {
            let addr = self.addr(src)?;
            self.emit_rex_rm_no_w(dst, addr);
            self.builder.text().write_u8(0x0F);
            self.builder.text().write_u8(opcode);
            self.emit_mem(addr, dst, 0);
        }
        Ok(())
    }

    /// Conversions between general and SSE registers carry REX.W for
    /// 64-bit general halves.
    fn encode_sse_cvt(&mut self, instr: &Instruction, prefix: u8, opcode: u8) -> BanjoResult<()> {
        let dst_raw = self.reg_raw(&instr.operands[0])?;
        let src_raw = self.reg_raw(&instr.operands[1])?;
        let dst = encoding(dst_raw);
        let src = encoding(src_raw);

        // The general-register half decides operand width.
        let gpr_size = if is_xmm(dst_raw) {
            instr.operands[1].size
        } else {
            instr.operands[0].size
        };

        self.builder.text().write_u8(prefix);
        let w = gpr_size == 8;
        if w || dst >= 8 || src >= 8 {
            self.emit_rex(w, dst >= 8, false, src >= 8);
        }
        self.builder.text().write_u8(0x0F);
        self.builder.text().write_u8(opcode);
        self.emit_modrm(0b11, dst, src);
        Ok(())
    }

    fn reg_xmm(&self, operand: &Operand) -> BanjoResult<u8> {
        self.reg(operand)
    }

    fn emit_rex_opt(&mut self, reg: u8, rm: u8) {
        if reg >= 8 || rm >= 8 {
            self.emit_rex(false, reg >= 8, false, rm >= 8);
        }
    }

    fn emit_rex_rm_no_w(&mut self, reg: u8, addr: Addr) {
        let (x, b) = match addr {
            Addr::Reg { base, index, .. } => {
                (index.map(|(i, _)| i >= 8).unwrap_or(false), base >= 8)
            }
            Addr::Sym { .. } => (false, false),
        };
        if reg >= 8 || x || b {
            self.emit_rex(false, reg >= 8, x, b);
        }
    }

    // -- relaxation and resolution ------------------------------------------

    fn apply_relaxation(&mut self) {
        let mut changed = true;

        while changed {
            changed = false;

            for index in 0..self.builder.text_slices.len() {
                if !self.builder.text_slices[index].relaxable_branch {
                    continue;
                }

                let opcode = self.builder.text_slices[index].buffer.data()[0];
                let displacement = self.compute_branch_displacement(index);

                if fits_in_i8(displacement) {
                    let slice = &mut self.builder.text_slices[index];
                    let offset = slice.uses[0].local_offset as usize;
                    slice.buffer.seek(offset);
                    slice.buffer.write_i8(displacement as i8);
                    continue;
                }

                if opcode == 0xEB {
                    changed = true;
                    self.relax_jmp(index);
                } else if (0x70..=0x7F).contains(&opcode) {
                    changed = true;
                    self.relax_jcc(index);
                }
            }
        }
    }

    fn relax_jmp(&mut self, slice_index: usize) {
        let slice = &mut self.builder.text_slices[slice_index];
        slice.buffer.seek(0);
        slice.buffer.write_u8(0xE9);
        slice.buffer.write_i32(0);
        self.builder.push_out_slices(slice_index + 1, 3);
    }

    fn relax_jcc(&mut self, slice_index: usize) {
        let slice = &mut self.builder.text_slices[slice_index];
        let opcode = slice.buffer.data()[0];
        slice.buffer.seek(0);
        slice.buffer.write_u8(0x0F);
        slice.buffer.write_u8(opcode + 0x10);
        slice.buffer.write_i32(0);
        slice.uses[0].local_offset += 1;
        self.builder.push_out_slices(slice_index + 1, 4);
    }

    fn compute_branch_displacement(&self, slice_index: usize) -> i32 {
        let slice = &self.builder.text_slices[slice_index];
        let use_ = &slice.uses[0];
        let opcode = slice.buffer.data()[0];
        let imm_size: i32 = if opcode == 0x0F || opcode == 0xE9 { 4 } else { 1 };

        let def = &self.builder.defs[use_.index as usize];
        let def_offset = {
            let def_slice = &self.builder.text_slices[def.slice_index as usize];
            def_slice.offset + def.local_offset
        };

        let use_offset = slice.offset + use_.local_offset;
        def_offset as i32 - use_offset as i32 - imm_size
    }

    fn resolve_internal_symbols(&mut self) {
        for index in 0..self.builder.text_slices.len() {
            if self.builder.text_slices[index].relaxable_branch {
                let displacement = self.compute_branch_displacement(index);
                let opcode = self.builder.text_slices[index].buffer.data()[0];
                let slice = &mut self.builder.text_slices[index];
                let offset = slice.uses[0].local_offset as usize;

                slice.buffer.seek(offset);
                if opcode == 0x0F || opcode == 0xE9 {
                    slice.buffer.write_i32(displacement);
                } else {
                    slice.buffer.write_i8(displacement as i8);
                }
                slice.uses[0].is_resolved = true;
                continue;
            }

            for use_index in 0..self.builder.text_slices[index].uses.len() {
                let (def_kind, def_offset, use_kind) = {
                    let slice = &self.builder.text_slices[index];
                    let use_ = &slice.uses[use_index];
                    let def = &self.builder.defs[use_.index as usize];
                    let def_slice = &self.builder.text_slices[def.slice_index as usize];
                    (
                        def.kind,
                        def_slice.offset + def.local_offset,
                        use_.kind,
                    )
                };

                // Only text-internal, pc-relative references resolve here.
                if def_kind != crate::binmod::BinSymbolKind::TextFunc {
                    continue;
                }
                if !matches!(use_kind, BinSymbolUseKind::Rel32 | BinSymbolUseKind::Plt32) {
                    continue;
                }

                let slice = &mut self.builder.text_slices[index];
                let use_ = &mut slice.uses[use_index];
                let displacement =
                    def_offset as i32 - (slice.offset + use_.local_offset) as i32 - 4;

                let position = use_.local_offset as usize;
                slice.buffer.seek(position);
                slice.buffer.write_i32(displacement);
                use_.is_resolved = true;
            }
        }
    }
}

struct BasicOpcodes {
    digit: u8,
    rm8_r8: u8,
    rm_r: u8,
    r8_rm8: u8,
    r_rm: u8,
}

impl BasicOpcodes {
    const ADD: BasicOpcodes = BasicOpcodes {
        digit: 0,
        rm8_r8: 0x00,
        rm_r: 0x01,
        r8_rm8: 0x02,
        r_rm: 0x03,
    };
    const SUB: BasicOpcodes = BasicOpcodes {
        digit: 5,
        rm8_r8: 0x28,
        rm_r: 0x29,
        r8_rm8: 0x2A,
        r_rm: 0x2B,
    };
    const CMP: BasicOpcodes = BasicOpcodes {
        digit: 7,
        rm8_r8: 0x38,
        rm_r: 0x39,
        r8_rm8: 0x3A,
        r_rm: 0x3B,
    };
    const AND: BasicOpcodes = BasicOpcodes {
        digit: 4,
        rm8_r8: 0x20,
        rm_r: 0x21,
        r8_rm8: 0x22,
        r_rm: 0x23,
    };
    const OR: BasicOpcodes = BasicOpcodes {
        digit: 1,
        rm8_r8: 0x08,
        rm_r: 0x09,
        r8_rm8: 0x0A,
        r_rm: 0x0B,
    };
    const XOR: BasicOpcodes = BasicOpcodes {
        digit: 6,
        rm8_r8: 0x30,
        rm_r: 0x31,
        r8_rm8: 0x32,
        r_rm: 0x33,
    };
}

fn fits_in_i8(value: i32) -> bool {
    (i8::MIN as i32..=i8::MAX as i32).contains(&value)
}

fn jcc_byte(opcode: banjo_mcode::Opcode) -> u8 {
    match opcode {
        op::JE => 0x74,
        op::JNE => 0x75,
        op::JA => 0x77,
        op::JAE => 0x73,
        op::JB => 0x72,
        op::JBE => 0x76,
        op::JG => 0x7F,
        op::JGE => 0x7D,
        op::JL => 0x7C,
        _ => 0x7E,
    }
}

fn cmov_byte(opcode: banjo_mcode::Opcode) -> u8 {
    match opcode {
        op::CMOVE => 0x44,
        op::CMOVNE => 0x45,
        op::CMOVA => 0x47,
        op::CMOVAE => 0x43,
        op::CMOVB => 0x42,
        op::CMOVBE => 0x46,
        op::CMOVG => 0x4F,
        op::CMOVGE => 0x4D,
        op::CMOVL => 0x4C,
        _ => 0x4E,
    }
}

/// Encode a whole machine module.
pub fn encode(module: &Module) -> BanjoResult<BinModule> {
    X86_64Encoder::new().encode(module)
}
