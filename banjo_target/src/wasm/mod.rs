//! The WebAssembly target
//!
//! Covers straight-line functions: constants, locals, integer and float
//! arithmetic, calls and returns. Function types, imports and local
//! groups travel to the object builder through the machine module's
//! opaque target data.

pub mod opcode;

use crate::codegen::{DestRole, MachineBackend, MachinePassRunner, RegInfo};
use crate::{Target, TargetDescription};
use banjo_common::{BanjoError, BanjoResult};
use banjo_mcode as mcode;
use banjo_mcode::{Instruction, Operand, PhysicalReg, RegisterClass};
use banjo_ssa as ssa;
use banjo_ssa::OperandKind;
use hashbrown::HashMap;

/// A WebAssembly value type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmType {
    I32,
    I64,
    F32,
    F64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WasmFuncType {
    pub params: Vec<WasmType>,
    pub result_type: Option<WasmType>,
}

#[derive(Debug, Clone)]
pub struct WasmFuncImport {
    pub module: String,
    pub name: String,
    pub ty: WasmFuncType,
}

/// Module-level payload stored in `mcode::Module::target_data`
#[derive(Debug, Clone, Default)]
pub struct WasmModData {
    pub func_imports: Vec<WasmFuncImport>,
    /// Per-function types and locals, keyed by function name
    pub func_data: HashMap<String, WasmFuncData>,
}

#[derive(Debug, Clone)]
pub struct WasmFuncData {
    pub ty: WasmFuncType,
    pub locals: Vec<WasmType>,
}

pub struct WasmTarget {
    description: TargetDescription,
    reg_info: WasmRegInfo,
}

impl WasmTarget {
    pub fn new(description: TargetDescription) -> Self {
        Self { description, reg_info: WasmRegInfo }
    }
}

impl Target for WasmTarget {
    fn description(&self) -> TargetDescription {
        self.description
    }

    fn lower(&self, module: &ssa::Module) -> BanjoResult<mcode::Module> {
        lower_module(module)
    }

    fn run_machine_passes(&self, module: &mut mcode::Module) -> BanjoResult<()> {
        // The stack machine has no registers to allocate and no frames to
        // build; the runner only numbers the instructions.
        MachinePassRunner::new(self).run(module)
    }

    fn calling_conv(&self) -> ssa::CallingConv {
        ssa::CallingConv::Wasm
    }
}

struct WasmRegInfo;

impl RegInfo for WasmRegInfo {
    fn dest_role(&self, _instr: &Instruction) -> DestRole {
        DestRole::None
    }

    fn candidates(&self, _class: RegisterClass) -> &[PhysicalReg] {
        &[]
    }

    fn callee_saved(&self) -> &[PhysicalReg] {
        &[]
    }

    fn call_clobbered(&self) -> &[PhysicalReg] {
        &[]
    }

    fn is_branch(&self, _instr: &Instruction) -> bool {
        false
    }

    fn is_move(&self, _instr: &Instruction) -> bool {
        false
    }

    fn load_from_slot(&self, _dst: u32, _slot: usize, _size: u8, _class: RegisterClass) -> Instruction {
        Instruction::new(opcode::NOP, Vec::<Operand>::new())
    }

    fn store_to_slot(&self, _src: u32, _slot: usize, _size: u8, _class: RegisterClass) -> Instruction {
        Instruction::new(opcode::NOP, Vec::<Operand>::new())
    }
}

impl MachineBackend for WasmTarget {
    fn reg_info(&self) -> &dyn RegInfo {
        &self.reg_info
    }

    fn insert_prologue_epilogue(&self, _func: &mut mcode::Function) {}
}

fn wasm_type(ty: &ssa::Type) -> WasmType {
    match ty.as_primitive() {
        Some(ssa::Primitive::F32) => WasmType::F32,
        Some(ssa::Primitive::F64) => WasmType::F64,
        Some(p) if p.size() <= 4 => WasmType::I32,
        _ => WasmType::I64,
    }
}

fn func_type(ty: &ssa::FunctionType) -> WasmFuncType {
    WasmFuncType {
        params: ty.params.iter().map(wasm_type).collect(),
        result_type: if ty.return_type.is_void() {
            None
        } else {
            Some(wasm_type(&ty.return_type))
        },
    }
}

fn lower_module(ssa_module: &ssa::Module) -> BanjoResult<mcode::Module> {
    let mut module = mcode::Module::new();
    let mut mod_data = WasmModData::default();

    for decl in &ssa_module.external_functions {
        mod_data.func_imports.push(WasmFuncImport {
            module: "env".to_string(),
            name: decl.name.clone(),
            ty: func_type(&decl.ty),
        });
        module.add_external_symbol(decl.name.clone());
    }

    for func in &ssa_module.functions {
        // The stack-machine backend covers straight-line functions only;
        // anything else is skipped rather than failing the build.
        match lower_func(func, &mut mod_data) {
            Ok(lowered) => {
                module.global_symbols.insert(func.name.clone());
                module.add_function(lowered);
            }
            Err(error) => {
                log::warn!("skipping '{}': {}", func.name, error);
            }
        }
    }

    module.target_data = Some(Box::new(mod_data));
    Ok(module)
}

struct WasmFuncState {
    func: mcode::Function,
    body: usize,
    num_params: u32,
    locals: Vec<WasmType>,
    local_map: HashMap<u32, u32>,
}

impl WasmFuncState {
    fn emit(&mut self, opcode: banjo_mcode::Opcode, operands: Vec<Operand>) {
        self.func.blocks[self.body].append(Instruction::new(opcode, operands));
    }

    fn local_for(&mut self, reg: u32, ty: WasmType) -> u32 {
        if let Some(index) = self.local_map.get(&reg) {
            return *index;
        }
        let index = self.num_params + self.locals.len() as u32;
        self.locals.push(ty);
        self.local_map.insert(reg, index);
        index
    }

    /// Push an SSA operand's value onto the wasm stack.
    fn push_operand(&mut self, operand: &ssa::Operand) {
        match &operand.kind {
            OperandKind::IntImmediate(value) => {
                let opcode = match wasm_type(&operand.ty) {
                    WasmType::I32 => opcode::I32_CONST,
                    _ => opcode::I64_CONST,
                };
                self.emit(opcode, vec![Operand::int_immediate(*value as i64, 8)]);
            }
            OperandKind::FpImmediate(value) => {
                let opcode = match wasm_type(&operand.ty) {
                    WasmType::F32 => opcode::F32_CONST,
                    _ => opcode::F64_CONST,
                };
                self.emit(opcode, vec![Operand::fp_immediate(*value, 8)]);
            }
            OperandKind::Register(reg) => {
                let index = self.local_map.get(reg).copied().unwrap_or(*reg);
                self.emit(opcode::LOCAL_GET, vec![Operand::int_immediate(index as i64, 4)]);
            }
            _ => {}
        }
    }
}

/// Lower one straight-line function into stack-machine code. SSA
/// registers that outlive the stack become WebAssembly locals.
fn lower_func(ssa_func: &ssa::Function, mod_data: &mut WasmModData) -> BanjoResult<mcode::Function> {
    if ssa_func.blocks.len() > 1 {
        return Err(BanjoError::codegen(
            "the WebAssembly backend only lowers straight-line functions",
        ));
    }

    let mut func = mcode::Function::new(ssa_func.name.clone());
    let body = func.create_block("body");

    let mut state = WasmFuncState {
        func,
        body,
        num_params: ssa_func.ty.params.len() as u32,
        locals: Vec::new(),
        local_map: HashMap::new(),
    };

    for block in ssa_func.blocks.iter().take(1) {
        for instr in &block.instrs {
            match instr.opcode {
                ssa::Opcode::LoadArg => {
                    let arg = instr.operands[0].as_int_immediate().unwrap_or(0) as u32;
                    if let Some(dest) = instr.dest {
                        state.local_map.insert(dest, arg);
                    }
                }
                ssa::Opcode::Add
                | ssa::Opcode::Sub
                | ssa::Opcode::Mul
                | ssa::Opcode::Sdiv
                | ssa::Opcode::Udiv
                | ssa::Opcode::Srem
                | ssa::Opcode::Urem
                | ssa::Opcode::Fadd => {
                    state.push_operand(&instr.operands[0]);
                    state.push_operand(&instr.operands[1]);

                    let ty = wasm_type(&instr.operands[0].ty);
                    let opcode = opcode::arith(instr.opcode, ty)?;
                    state.emit(opcode, Vec::new());

                    if let Some(dest) = instr.dest {
                        let index = state.local_for(dest, ty);
                        state.emit(
                            opcode::LOCAL_SET,
                            vec![Operand::int_immediate(index as i64, 4)],
                        );
                    }
                }
                ssa::Opcode::Call => {
                    for arg in &instr.operands[1..] {
                        state.push_operand(arg);
                    }

                    let callee_index = match &instr.operands[0].kind {
                        OperandKind::ExternFunc(index) => *index,
                        OperandKind::Func(index) => mod_data.func_imports.len() as u32 + *index,
                        _ => {
                            return Err(BanjoError::codegen("unsupported wasm call target"));
                        }
                    };
                    state.emit(
                        opcode::CALL,
                        vec![Operand::int_immediate(callee_index as i64, 4)],
                    );

                    match instr.dest {
                        Some(dest) => {
                            let ty = wasm_type(&instr.operands[0].ty);
                            let index = state.local_for(dest, ty);
                            state.emit(
                                opcode::LOCAL_SET,
                                vec![Operand::int_immediate(index as i64, 4)],
                            );
                        }
                        None => {
                            if !instr.operands[0].ty.is_void() {
                                state.emit(opcode::DROP, Vec::new());
                            }
                        }
                    }
                }
                ssa::Opcode::Ret => {
                    if let Some(value) = instr.operands.first() {
                        state.push_operand(value);
                    }
                }
                _ => {
                    return Err(BanjoError::codegen(format!(
                        "the WebAssembly backend does not lower {:?}",
                        instr.opcode
                    )));
                }
            }
        }
    }

    state.emit(opcode::END, Vec::new());

    mod_data.func_data.insert(
        ssa_func.name.clone(),
        WasmFuncData {
            ty: func_type(&ssa_func.ty),
            locals: state.locals,
        },
    );

    Ok(state.func)
}
