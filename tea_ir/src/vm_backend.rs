//! VmBack: lowers a [`ModuleData`] to a compact register-VM bytecode image
//! (§4.8, §6 "Bytecode file format").
//!
//! Grounded in the reference compiler's Luau lowering pass
//! (`lang/backends/luau/LuauLowering.{h,cpp}`: register allocation,
//! instruction selection, jump patching) and its disassembler
//! (`lang/mir/dump/dump.cpp`). The reference
//! compiler targets an actual Luau VM; this back end keeps its instruction
//! *shapes* (ABC/AD/E word formats, tag-prefixed constant pool, deferred
//! jump patching) but defines its own opcode numbering and bytecode version
//! bytes, since this project does not embed or link against a Luau runtime
//! (see DESIGN.md "VmBack opcode numbering").

use std::collections::HashMap;
use std::rc::Rc;

use tea_common::{panic as tea_panic, TeaResult};

use crate::ir::{BasicBlockData, ConstantData, FCmpPredicate, FunctionData, GlobalData, ICmpPredicate, InstrData, Item, ModuleData, OpCode, Operand, Value};

const BYTECODE_VERSION: u8 = 4;
const TYPE_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VmOp {
    Nop = 0,
    LoadNil = 1,
    LoadB = 2,
    LoadN = 3,
    LoadK = 4,
    Move = 5,
    GetGlobal = 6,
    GetImport = 7,
    Add = 8,
    Sub = 9,
    Mul = 10,
    Div = 11,
    Mod = 12,
    And = 13,
    Or = 14,
    Not = 15,
    Jump = 16,
    JumpIf = 17,
    JumpIfEq = 18,
    JumpIfNotEq = 19,
    JumpIfLt = 20,
    JumpIfLe = 21,
    Call = 22,
    Return = 23,
}

impl VmOp {
    fn from_u8(b: u8) -> Option<Self> {
        use VmOp::*;
        let all = [
            Nop, LoadNil, LoadB, LoadN, LoadK, Move, GetGlobal, GetImport, Add, Sub, Mul, Div, Mod, And, Or, Not,
            Jump, JumpIf, JumpIfEq, JumpIfNotEq, JumpIfLt, JumpIfLe, Call, Return,
        ];
        all.into_iter().find(|op| *op as u8 == b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConstTag {
    Nil = 0,
    Boolean = 1,
    Number = 2,
    String = 3,
}

fn write_varint(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> u32 {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = buf[*pos];
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    result
}

struct StringTable {
    strings: Vec<String>,
    remap: HashMap<String, u32>,
}

impl StringTable {
    fn new() -> Self {
        Self { strings: Vec::new(), remap: HashMap::new() }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.remap.get(s) {
            return *idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.remap.insert(s.to_string(), idx);
        idx
    }
}

/// One function's (or the bootstrap's) code + constant pool, independent of
/// every other proto (§4.8 "a ProtoBuilder holds...").
#[derive(Default)]
pub struct ProtoBuilder {
    code: Vec<u32>,
    k: Vec<u8>,
    maxstacksize: u8,
    numparams: u8,
    nups: u8,
    is_vararg: u8,
    flags: u8,
    sizek: u32,
}

impl ProtoBuilder {
    fn emit_abc(&mut self, op: VmOp, a: u8, b: u8, c: u8) -> u32 {
        let pc = self.code.len() as u32;
        self.code.push((op as u32) | ((a as u32) << 8) | ((b as u32) << 16) | ((c as u32) << 24));
        pc
    }

    fn emit_ad(&mut self, op: VmOp, a: u8, d: i16) -> u32 {
        let pc = self.code.len() as u32;
        self.code.push((op as u32) | ((a as u32) << 8) | (((d as u16) as u32) << 16));
        pc
    }

    fn emit_aux(&mut self, aux: u32) {
        self.code.push(aux);
    }

    fn patch_d(&mut self, pc: u32, d: i32) {
        let word = self.code[pc as usize];
        let low16 = word & 0xFFFF;
        self.code[pc as usize] = low16 | (((d as u32) & 0xFFFF) << 16);
    }

    fn add_constant_nil(&mut self) -> u32 {
        let idx = self.sizek;
        self.sizek += 1;
        self.k.push(ConstTag::Nil as u8);
        idx
    }

    fn add_constant_bool(&mut self, value: bool) -> u32 {
        let idx = self.sizek;
        self.sizek += 1;
        self.k.push(ConstTag::Boolean as u8);
        self.k.push(value as u8);
        idx
    }

    fn add_constant_number(&mut self, value: f64) -> u32 {
        let idx = self.sizek;
        self.sizek += 1;
        self.k.push(ConstTag::Number as u8);
        self.k.extend_from_slice(&value.to_le_bytes());
        idx
    }

    /// Appends a `String` constant record pointing at `string_index` in the
    /// shared string table; interning itself happens in [`VmBackend`].
    fn add_constant_string_index(&mut self, string_index: u32) -> u32 {
        let idx = self.sizek;
        self.sizek += 1;
        self.k.push(ConstTag::String as u8);
        write_varint(&mut self.k, string_index);
        idx
    }
}

/// Per-function lowering state, reset after each function is emitted.
#[derive(Default)]
struct FnState {
    next_reg: u8,
    value_regs: HashMap<usize, u8>,
    block_labels: HashMap<usize, u32>,
    jmp_reloc: Vec<(usize, u32)>,
}

pub struct VmBackend {
    strings: StringTable,
    protos: Vec<ProtoBuilder>,
    /// Global whose initializer is a string constant: `global ptr -> string index`.
    global_strings: HashMap<usize, u32>,
}

impl VmBackend {
    pub fn new() -> Self {
        Self { strings: StringTable::new(), protos: Vec::new(), global_strings: HashMap::new() }
    }

    pub fn compile(mut self, module: &ModuleData) -> TeaResult<Self> {
        self.protos.push(self.build_bootstrap());

        for item in module.items().iter() {
            if let Item::Global(g) = item {
                self.register_global(g)?;
            }
        }

        for item in module.items().iter() {
            if let Item::Function(f) = item {
                if !f.blocks().is_empty() {
                    let proto = self.lower_function(f);
                    self.protos.push(proto);
                }
            }
        }

        Ok(self)
    }

    fn build_bootstrap(&mut self) -> ProtoBuilder {
        let mut proto = ProtoBuilder::default();
        let name_idx = self.strings.intern("main");
        let k = proto.add_constant_string_index(name_idx);
        proto.emit_abc(VmOp::GetGlobal, 0, 0, 0);
        proto.emit_aux(k);
        proto.emit_abc(VmOp::Call, 0, 0, 0);
        proto
    }

    fn register_global(&mut self, g: &Rc<GlobalData>) -> TeaResult<()> {
        let initializer = g.initializer.borrow();
        match initializer.as_ref() {
            Some(Value::Constant(c)) => match &**c {
                ConstantData::String { value, .. } => {
                    let idx = self.strings.intern(value);
                    self.global_strings.insert(Rc::as_ptr(g) as usize, idx);
                    Ok(())
                }
                _ => Err(tea_common::TeaError::backend(format!(
                    "global '{}' has an initializer shape VmBack cannot lower",
                    g.name
                ))),
            },
            _ => Err(tea_common::TeaError::backend(format!(
                "global '{}' has no string initializer; unsupported by VmBack",
                g.name
            ))),
        }
    }

    fn lower_function(&mut self, f: &Rc<FunctionData>) -> ProtoBuilder {
        let mut proto = ProtoBuilder::default();
        let mut state = FnState::default();

        proto.numparams = f.params.len() as u8;
        proto.is_vararg = 0;
        proto.flags = 0;

        for p in &f.params {
            state.value_regs.insert(Rc::as_ptr(p) as usize, state.next_reg);
            state.next_reg += 1;
        }

        for block in f.blocks().iter() {
            for instr in block.instrs().iter() {
                if instr.op == OpCode::Alloca {
                    state.value_regs.insert(Rc::as_ptr(instr) as usize, state.next_reg);
                    state.next_reg += 1;
                }
            }
        }

        for block in f.blocks().iter() {
            state.block_labels.insert(Rc::as_ptr(block) as usize, proto.code.len() as u32);
            self.lower_block(&mut proto, &mut state, block);
        }

        for (target_ptr, jump_pc) in state.jmp_reloc.iter().copied() {
            let label = state.block_labels[&target_ptr];
            let offset = label as i64 - (jump_pc as i64 + 1);
            proto.patch_d(jump_pc, offset as i32);
        }

        proto.maxstacksize = proto.maxstacksize.max(state.next_reg);
        proto
    }

    fn lower_block(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, block: &Rc<BasicBlockData>) {
        for instr in block.instrs().iter() {
            self.lower_instr(proto, state, instr);
        }
    }

    fn reg_of(&self, state: &FnState, ptr: usize) -> u8 {
        state
            .value_regs
            .get(&ptr)
            .copied()
            .unwrap_or_else(|| tea_panic("internal error: value used in VmBack before it was assigned a register"))
    }

    /// Materializes `value` into register `dest`, returning the register it
    /// actually ended up in (usually `dest`, matching the C++ original).
    fn lower_value(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, value: &Value, dest: u8) -> u8 {
        match value {
            Value::Function(f) => {
                let idx = self.strings.intern(&f.name);
                let k = proto.add_constant_string_index(idx);
                proto.emit_abc(VmOp::GetGlobal, dest, 0, 0);
                proto.emit_aux(k);
                dest
            }
            Value::Constant(c) => {
                match &**c {
                    ConstantData::Number { ty, .. } if ty.is_numeric() => {
                        let int_val = c.as_u64() as i64;
                        if (-32768..=32767).contains(&int_val) {
                            proto.emit_ad(VmOp::LoadN, dest, int_val as i16);
                        } else {
                            let k = proto.add_constant_number(int_val as f64);
                            proto.emit_ad(VmOp::LoadK, dest, k as i16);
                        }
                    }
                    ConstantData::Number { .. } => {
                        let k = proto.add_constant_number(c.as_f64());
                        proto.emit_ad(VmOp::LoadK, dest, k as i16);
                    }
                    ConstantData::String { value, .. } => {
                        let idx = self.strings.intern(value);
                        let k = proto.add_constant_string_index(idx);
                        proto.emit_ad(VmOp::LoadK, dest, k as i16);
                    }
                    ConstantData::Array { .. } | ConstantData::Pointer { .. } => {
                        proto.emit_abc(VmOp::LoadNil, dest, 0, 0);
                    }
                }
                dest
            }
            Value::Global(g) => match self.global_strings.get(&(Rc::as_ptr(g) as usize)) {
                Some(idx) => {
                    let k = proto.add_constant_string_index(*idx);
                    proto.emit_ad(VmOp::LoadK, dest, k as i16);
                    dest
                }
                None => tea_panic(format!("internal error: global '{}' was never registered", g.name)),
            },
            Value::Parameter(p) => {
                let reg = self.reg_of(state, Rc::as_ptr(p) as usize);
                proto.emit_abc(VmOp::Move, dest, reg, 0);
                dest
            }
            Value::Instruction(i) => {
                let reg = self.reg_of(state, Rc::as_ptr(i) as usize);
                proto.emit_abc(VmOp::Move, dest, reg, 0);
                dest
            }
            Value::Null(_) => {
                proto.emit_abc(VmOp::LoadNil, dest, 0, 0);
                dest
            }
        }
    }

    /// A `bit32.<name>` call used for the opcodes the VM has no native
    /// instruction for (Xor/Shl/Shr).
    fn emit_bit32_call(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, name: &str, lhs: &Operand, rhs: &Operand, dest: u8) {
        let func_reg = state.next_reg;
        state.next_reg += 1;
        let name_idx = self.strings.intern(name);
        let k = proto.add_constant_string_index(name_idx);
        proto.emit_ad(VmOp::GetImport, func_reg, k as i16);
        let module_idx = self.strings.intern("bit32");
        proto.emit_aux(module_idx | (name_idx << 10) | (2 << 30));

        let lhs_reg = state.next_reg;
        state.next_reg += 1;
        self.lower_operand(proto, state, lhs, lhs_reg);
        let rhs_reg = state.next_reg;
        state.next_reg += 1;
        self.lower_operand(proto, state, rhs, rhs_reg);

        proto.emit_abc(VmOp::Call, func_reg, 3, 2);
        proto.emit_abc(VmOp::Move, dest, func_reg, 0);
    }

    fn lower_operand(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, operand: &Operand, dest: u8) -> u8 {
        match operand {
            Operand::Value(v) => self.lower_value(proto, state, v, dest),
            Operand::Block(_) => tea_panic("internal error: expected a value operand, found a block"),
        }
    }

    fn block_ptr(&self, operand: &Operand) -> usize {
        match operand {
            Operand::Block(b) => Rc::as_ptr(b) as usize,
            Operand::Value(_) => tea_panic("internal error: expected a block operand, found a value"),
        }
    }

    fn next_reg(&self, state: &mut FnState) -> u8 {
        let r = state.next_reg;
        state.next_reg += 1;
        r
    }

    fn lower_instr(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, instr: &Rc<InstrData>) {
        let has_result = !instr.result_type.is_void() && instr.op != OpCode::Alloca;
        let dest = if has_result {
            let d = self.next_reg(state);
            state.value_regs.insert(Rc::as_ptr(instr) as usize, d);
            d
        } else {
            0
        };

        match instr.op {
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                let op = match instr.op {
                    OpCode::Add => VmOp::Add,
                    OpCode::Sub => VmOp::Sub,
                    OpCode::Mul => VmOp::Mul,
                    OpCode::Div => VmOp::Div,
                    OpCode::Mod => VmOp::Mod,
                    _ => unreachable!(),
                };
                let lhs_reg = self.next_reg(state);
                let lhs = self.lower_operand(proto, state, &instr.operands[0], lhs_reg);
                let rhs_reg = self.next_reg(state);
                let rhs = self.lower_operand(proto, state, &instr.operands[1], rhs_reg);
                proto.emit_abc(op, dest, lhs, rhs);
            }
            OpCode::And | OpCode::Or => {
                let op = if instr.op == OpCode::And { VmOp::And } else { VmOp::Or };
                let lhs_reg = self.next_reg(state);
                let lhs = self.lower_operand(proto, state, &instr.operands[0], lhs_reg);
                let rhs_reg = self.next_reg(state);
                let rhs = self.lower_operand(proto, state, &instr.operands[1], rhs_reg);
                proto.emit_abc(op, dest, lhs, rhs);
            }
            OpCode::Not => {
                let reg = self.next_reg(state);
                let lhs = self.lower_operand(proto, state, &instr.operands[0], reg);
                proto.emit_abc(VmOp::Not, dest, lhs, 0);
            }
            OpCode::Xor => self.emit_bit32_call(proto, state, "bxor", &instr.operands[0], &instr.operands[1], dest),
            OpCode::Shl => self.emit_bit32_call(proto, state, "lshift", &instr.operands[0], &instr.operands[1], dest),
            OpCode::Shr => self.emit_bit32_call(proto, state, "rshift", &instr.operands[0], &instr.operands[1], dest),
            OpCode::Load => {
                let ptr = instr.operands[0].as_value().expect("load ptr operand");
                if let Some(reg) = self.value_reg_of(state, ptr) {
                    proto.emit_abc(VmOp::Move, dest, reg, 0);
                } else {
                    self.emit_builtin_call(proto, state, "__builtin_memread", &[&instr.operands[0]], dest, true);
                }
            }
            OpCode::Store => {
                let ptr = instr.operands[0].as_value().expect("store ptr operand");
                let val_reg = self.next_reg(state);
                let val_reg = self.lower_operand(proto, state, &instr.operands[1], val_reg);
                if let Some(reg) = self.value_reg_of(state, ptr) {
                    proto.emit_abc(VmOp::Move, reg, val_reg, 0);
                } else {
                    self.emit_builtin_call(proto, state, "__builtin_memwrite", &[&instr.operands[0]], val_reg, false);
                }
            }
            OpCode::Alloca => {}
            OpCode::ICmp => self.lower_icmp(proto, state, instr, dest),
            OpCode::FCmp => self.lower_fcmp(proto, state, instr, dest),
            OpCode::Br => {
                let pc = proto.emit_ad(VmOp::Jump, 0, 0);
                state.jmp_reloc.push((self.block_ptr(&instr.operands[0]), pc));
            }
            OpCode::CondBr => {
                let cond_reg = self.next_reg(state);
                let cond = self.lower_operand(proto, state, &instr.operands[0], cond_reg);
                let pc = proto.emit_ad(VmOp::JumpIf, cond, 0);
                state.jmp_reloc.push((self.block_ptr(&instr.operands[1]), pc));
                let pc2 = proto.emit_ad(VmOp::Jump, 0, 0);
                state.jmp_reloc.push((self.block_ptr(&instr.operands[2]), pc2));
            }
            OpCode::Ret => {
                if instr.operands.is_empty() {
                    proto.emit_abc(VmOp::Return, 0, 1, 0);
                } else {
                    let reg = self.next_reg(state);
                    let reg = self.lower_operand(proto, state, &instr.operands[0], reg);
                    proto.emit_abc(VmOp::Return, reg, 2, 0);
                }
            }
            OpCode::Call => {
                let callee_reg = self.next_reg(state);
                let callee = self.lower_operand(proto, state, &instr.operands[0], callee_reg);
                for (i, arg) in instr.operands[1..].iter().enumerate() {
                    let slot = callee + 1 + i as u8;
                    self.lower_operand(proto, state, arg, slot);
                }
                let nargs = instr.operands.len() as u8;
                proto.emit_abc(VmOp::Call, callee, nargs, if has_result { 2 } else { 1 });
                if has_result {
                    proto.emit_abc(VmOp::Move, dest, callee, 0);
                }
            }
            OpCode::Cast => {
                self.lower_operand(proto, state, &instr.operands[0], dest);
            }
            OpCode::Unreachable => {
                proto.emit_abc(VmOp::Return, 0, 1, 0);
            }
            OpCode::Phi | OpCode::GetElementPtr | OpCode::Nop => {}
        }
    }

    fn value_reg_of(&self, state: &FnState, value: &Value) -> Option<u8> {
        let ptr = match value {
            Value::Instruction(i) => Rc::as_ptr(i) as usize,
            Value::Parameter(p) => Rc::as_ptr(p) as usize,
            _ => return None,
        };
        state.value_regs.get(&ptr).copied()
    }

    fn emit_builtin_call(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, name: &str, extra_args: &[&Operand], dest_or_val: u8, wants_result: bool) {
        let func_reg = self.next_reg(state);
        let name_idx = self.strings.intern(name);
        let k = proto.add_constant_string_index(name_idx);
        proto.emit_ad(VmOp::GetImport, func_reg, k as i16);
        proto.emit_aux(name_idx | (1 << 30));

        let mut next_arg = func_reg + 1;
        for arg in extra_args {
            self.lower_operand(proto, state, arg, next_arg);
            next_arg += 1;
        }
        if !wants_result {
            proto.emit_abc(VmOp::Move, next_arg, dest_or_val, 0);
            next_arg += 1;
        }

        let nargs = next_arg - func_reg;
        proto.emit_abc(VmOp::Call, func_reg, nargs, if wants_result { 2 } else { 1 });
        if wants_result {
            proto.emit_abc(VmOp::Move, dest_or_val, func_reg, 0);
        }
    }

    fn lower_icmp(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, instr: &InstrData, dest: u8) {
        let lhs_reg = self.next_reg(state);
        let lhs = self.lower_operand(proto, state, &instr.operands[0], lhs_reg);
        let rhs_reg = self.next_reg(state);
        let rhs = self.lower_operand(proto, state, &instr.operands[1], rhs_reg);
        let pred = instr.icmp_pred.expect("ICmp must carry a predicate");
        self.emit_compare_skip(proto, pred_to_skip(pred.into()), lhs, rhs, dest);
    }

    fn lower_fcmp(&mut self, proto: &mut ProtoBuilder, state: &mut FnState, instr: &InstrData, dest: u8) {
        let lhs_reg = self.next_reg(state);
        let lhs = self.lower_operand(proto, state, &instr.operands[0], lhs_reg);
        let rhs_reg = self.next_reg(state);
        let rhs = self.lower_operand(proto, state, &instr.operands[1], rhs_reg);
        let pred = instr.fcmp_pred.expect("FCmp must carry a predicate");
        self.emit_compare_skip(proto, pred_to_skip(pred.into()), lhs, rhs, dest);
    }

    /// `EQ`/`NEQ`/`GT`/`GE`/`LT`/`LE` all lower to a two-instruction skip
    /// (`JUMPIF*` over two `LOADB`) per §4.8; SGT/UGT and
    /// SLT/ULT collapse identically (no signed/unsigned VM distinction).
    fn emit_compare_skip(&mut self, proto: &mut ProtoBuilder, skip: CompareSkip, lhs: u8, rhs: u8, dest: u8) {
        match skip {
            CompareSkip::Eq => {
                proto.emit_ad(VmOp::JumpIfEq, lhs, 2);
                proto.emit_aux(rhs as u32);
            }
            CompareSkip::NotEq => {
                proto.emit_ad(VmOp::JumpIfNotEq, lhs, 2);
                proto.emit_aux(rhs as u32);
            }
            CompareSkip::Gt => {
                proto.emit_ad(VmOp::JumpIfLt, rhs, 2);
                proto.emit_aux(lhs as u32);
            }
            CompareSkip::Ge => {
                proto.emit_ad(VmOp::JumpIfLe, rhs, 2);
                proto.emit_aux(lhs as u32);
            }
            CompareSkip::Lt => {
                proto.emit_ad(VmOp::JumpIfLt, lhs, 2);
                proto.emit_aux(rhs as u32);
            }
            CompareSkip::Le => {
                proto.emit_ad(VmOp::JumpIfLe, lhs, 2);
                proto.emit_aux(rhs as u32);
            }
        }
        proto.emit_abc(VmOp::LoadB, dest, 0, 1);
        proto.emit_abc(VmOp::LoadB, dest, 1, 0);
    }

    /// Serializes all protos into the wire format of §6
    /// "Bytecode file format".
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(BYTECODE_VERSION);
        out.push(TYPE_VERSION);

        write_varint(&mut out, self.strings.strings.len() as u32);
        for s in &self.strings.strings {
            write_varint(&mut out, s.len() as u32);
            out.extend_from_slice(s.as_bytes());
        }

        write_varint(&mut out, self.protos.len() as u32);
        for proto in &self.protos {
            out.push(proto.maxstacksize);
            out.push(proto.numparams);
            out.push(proto.nups);
            out.push(proto.is_vararg);
            out.push(proto.flags);

            write_varint(&mut out, 0); // type-info sentinel

            write_varint(&mut out, proto.code.len() as u32);
            for word in &proto.code {
                out.extend_from_slice(&word.to_le_bytes());
            }

            write_varint(&mut out, proto.sizek);
            out.extend_from_slice(&proto.k);

            write_varint(&mut out, 0); // sizep
            write_varint(&mut out, 0); // linedefined
            write_varint(&mut out, 0); // debugname
            out.push(0); // lineinfo sentinel
            out.push(0); // debuginfo sentinel
        }

        write_varint(&mut out, 0);
        out
    }
}

impl Default for VmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum CompareSkip {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Unifies `ICmpPredicate`/`FCmpPredicate` into the six skip shapes VmBack
/// actually distinguishes (signed/unsigned collapse, §4.8).
enum AnyPredicate {
    ICmp(ICmpPredicate),
    FCmp(FCmpPredicate),
}

impl From<ICmpPredicate> for AnyPredicate {
    fn from(p: ICmpPredicate) -> Self {
        AnyPredicate::ICmp(p)
    }
}

impl From<FCmpPredicate> for AnyPredicate {
    fn from(p: FCmpPredicate) -> Self {
        AnyPredicate::FCmp(p)
    }
}

fn pred_to_skip(pred: AnyPredicate) -> CompareSkip {
    match pred {
        AnyPredicate::ICmp(p) => match p {
            ICmpPredicate::Eq => CompareSkip::Eq,
            ICmpPredicate::Neq => CompareSkip::NotEq,
            ICmpPredicate::Sgt | ICmpPredicate::Ugt => CompareSkip::Gt,
            ICmpPredicate::Sge | ICmpPredicate::Uge => CompareSkip::Ge,
            ICmpPredicate::Slt | ICmpPredicate::Ult => CompareSkip::Lt,
            ICmpPredicate::Sle | ICmpPredicate::Ule => CompareSkip::Le,
        },
        AnyPredicate::FCmp(p) => match p {
            FCmpPredicate::Oeq => CompareSkip::Eq,
            FCmpPredicate::Oneq => CompareSkip::NotEq,
            FCmpPredicate::Ogt => CompareSkip::Gt,
            FCmpPredicate::Oge => CompareSkip::Ge,
            FCmpPredicate::Olt => CompareSkip::Lt,
            FCmpPredicate::Ole => CompareSkip::Le,
            FCmpPredicate::True | FCmpPredicate::False => CompareSkip::Eq,
        },
    }
}

/// Read-only disassembler, the inverse of [`VmBackend::to_bytes`]
/// (§4.8 "The dumper ... must round-trip all opcode formats
/// and all constant tags").
pub fn dump(bytes: &[u8]) -> String {
    let mut pos = 0usize;
    let mut out = String::new();

    let version = bytes[pos];
    pos += 1;
    out.push_str(&format!("version {version}\n"));
    let type_version = bytes[pos];
    pos += 1;
    out.push_str(&format!("type_version {type_version}\n"));

    let string_count = read_varint(bytes, &mut pos);
    let mut strings = Vec::with_capacity(string_count as usize);
    for _ in 0..string_count {
        let len = read_varint(bytes, &mut pos) as usize;
        let s = String::from_utf8_lossy(&bytes[pos..pos + len]).to_string();
        pos += len;
        strings.push(s);
    }
    out.push_str(&format!("strings: {strings:?}\n"));

    let proto_count = read_varint(bytes, &mut pos);
    for proto_idx in 0..proto_count {
        let maxstacksize = bytes[pos];
        let numparams = bytes[pos + 1];
        let nups = bytes[pos + 2];
        let is_vararg = bytes[pos + 3];
        let flags = bytes[pos + 4];
        pos += 5;
        out.push_str(&format!(
            "proto {proto_idx}: maxstacksize={maxstacksize} numparams={numparams} nups={nups} is_vararg={is_vararg} flags={flags}\n"
        ));

        let _type_info = read_varint(bytes, &mut pos);

        let code_size = read_varint(bytes, &mut pos) as usize;
        for i in 0..code_size {
            let word = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let op = VmOp::from_u8((word & 0xFF) as u8);
            out.push_str(&format!("  [{i}] {op:?} word=0x{word:08x}\n"));
        }

        let sizek = read_varint(bytes, &mut pos) as usize;
        let k_start = pos;
        let mut k_pos = 0usize;
        for _ in 0..sizek {
            let tag = bytes[k_start + k_pos];
            k_pos += 1;
            match tag {
                t if t == ConstTag::Nil as u8 => out.push_str("  k: nil\n"),
                t if t == ConstTag::Boolean as u8 => {
                    out.push_str(&format!("  k: boolean {}\n", bytes[k_start + k_pos] != 0));
                    k_pos += 1;
                }
                t if t == ConstTag::Number as u8 => {
                    let v = f64::from_le_bytes(bytes[k_start + k_pos..k_start + k_pos + 8].try_into().unwrap());
                    out.push_str(&format!("  k: number {v}\n"));
                    k_pos += 8;
                }
                t if t == ConstTag::String as u8 => {
                    let sub = &bytes[k_start + k_pos..];
                    let mut sub_pos = 0;
                    let idx = read_varint(sub, &mut sub_pos);
                    k_pos += sub_pos;
                    out.push_str(&format!("  k: string #{idx}\n"));
                }
                _ => out.push_str("  k: <unknown tag>\n"),
            }
        }
        pos += k_pos;

        let _sizep = read_varint(bytes, &mut pos);
        let _linedefined = read_varint(bytes, &mut pos);
        let _debugname = read_varint(bytes, &mut pos);
        pos += 2; // lineinfo + debuginfo sentinels
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Context as IrContext, DataLayout, ModuleData, SourceLoc, StorageClass};
    use tea_parser::CallingConv;

    #[test]
    fn bootstrap_proto_is_always_emitted_first() {
        let module = ModuleData::new("x86_64-unknown-linux-gnu", "t.tea", DataLayout::default());
        let backend = VmBackend::new().compile(&module).unwrap();
        assert_eq!(backend.protos.len(), 1);
        let bytes = backend.to_bytes();
        let text = dump(&bytes);
        assert!(text.contains("GetGlobal"));
        assert!(text.contains("Call"));
    }

    #[test]
    fn function_returning_a_constant_lowers_to_loadn_then_return() {
        let ctx = IrContext::new();
        let module = ModuleData::new("x86_64-unknown-linux-gnu", "t.tea", DataLayout::default());
        let fn_ty = ctx.types.function(ctx.types.int(true), vec![], false);
        let func = module.add_function("main", fn_ty, StorageClass::Public, CallingConv::CDecl, vec![]);
        let entry = func.append_block("entry");
        let mut b = Builder::new();
        b.insert_into(entry);
        let forty_two = ctx.const_number(42, 32, true);
        b.ret(&ctx, Some(forty_two), SourceLoc::default());

        let backend = VmBackend::new().compile(&module).unwrap();
        assert_eq!(backend.protos.len(), 2);
        let bytes = backend.to_bytes();
        let text = dump(&bytes);
        assert!(text.contains("LoadN"));
        assert!(text.contains("Return"));
    }

    #[test]
    fn round_trips_the_varint_encoding() {
        for n in [0u32, 1, 127, 128, 300, 16384, u32::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos), n);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn a_non_string_global_initializer_is_fatal() {
        let ctx = IrContext::new();
        let module = ModuleData::new("x86_64-unknown-linux-gnu", "t.tea", DataLayout::default());
        let n = ctx.const_number(1, 32, true);
        module.add_global("g", ctx.types.int(true), StorageClass::Private, Some(n));
        assert!(VmBackend::new().compile(&module).is_err());
    }
}
