//! The mid-level IR: values, instructions, basic blocks, functions, modules,
//! and the builder that constructs them (§3, §4.2).
//!
//! Grounded directly in the reference compiler's MIR
//! (`lang/mir/{mir.h,Builder.cpp,Scope.h,Context.h}`) — a complete C++
//! reference design matching the data
//! model almost field-for-field. The one deliberate structural change
//! (§9 "Cyclic ownership in IR") is ownership: the C++ original
//! is a single arena of raw pointers (`Module` owns every `Value` behind
//! `unique_ptr`, everything else is a bare pointer into that arena). Rust's
//! borrow checker won't let a `Builder` hold a raw pointer into a `Vec` that
//! the same pass is still appending to, so this uses the alternative
//! design §9 explicitly sanctions: the target language's own
//! shared-ownership primitive (`Rc`) with a single `Module`-rooted object
//! graph, `RefCell` only where construction genuinely mutates something
//! already shared (a block's instruction list, a function's block list, a
//! module's item list, a global's initializer slot).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::BuildHasherDefault;
use std::rc::{Rc, Weak};

use hashbrown::HashMap;

use tea_common::Span;
use tea_parser::CallingConv;
use tea_sema::typectx::{Fnv1a64, PrimitiveKind};
use tea_sema::{Type, TypeCtx, TypeData};

type FnvBuild = BuildHasherDefault<Fnv1a64>;

// --- enums (§4.2) ------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ICmp,
    FCmp,
    Load,
    Store,
    Alloca,
    GetElementPtr,
    Br,
    CondBr,
    Ret,
    Phi,
    Call,
    Nop,
    Cast,
    Unreachable,
}

impl OpCode {
    pub fn is_terminator(self) -> bool {
        matches!(self, OpCode::Br | OpCode::CondBr | OpCode::Ret | OpCode::Unreachable)
    }

    pub fn text(self) -> &'static str {
        match self {
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Mod => "mod",
            OpCode::Not => "not",
            OpCode::And => "and",
            OpCode::Or => "or",
            OpCode::Xor => "xor",
            OpCode::Shl => "shl",
            OpCode::Shr => "shr",
            OpCode::ICmp => "icmp",
            OpCode::FCmp => "fcmp",
            OpCode::Load => "load",
            OpCode::Store => "store",
            OpCode::Alloca => "alloca",
            OpCode::GetElementPtr => "getelementptr",
            OpCode::Br => "br",
            OpCode::CondBr => "condbr",
            OpCode::Ret => "ret",
            OpCode::Phi => "phi",
            OpCode::Call => "call",
            OpCode::Nop => "nop",
            OpCode::Cast => "cast",
            OpCode::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ICmpPredicate {
    Eq,
    Neq,
    Sgt,
    Ugt,
    Sge,
    Uge,
    Slt,
    Ult,
    Sle,
    Ule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FCmpPredicate {
    Oeq,
    Oneq,
    Ogt,
    Oge,
    Olt,
    Ole,
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Function,
    Parameter,
    Constant,
    Global,
    Instruction,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionAttributes(u32);

impl FunctionAttributes {
    pub const INLINE: u32 = 1 << 0;
    pub const NO_RETURN: u32 = 1 << 1;
    pub const NO_NAMESPACE: u32 = 1 << 2;
    pub const NO_MANGLE: u32 = 1 << 3;

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }
    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }
    pub fn has(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalAttributes(u32);

impl GlobalAttributes {
    pub const THREAD_LOCAL: u32 = 1 << 0;

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }
    pub fn has(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

impl From<Span> for SourceLoc {
    fn from(span: Span) -> Self {
        SourceLoc { line: span.start.line, column: span.start.column }
    }
}

// --- name scopes (§4.2 "Name scopes") ----------------------

/// Deduplicates names within a Function (block names) or a BasicBlock
/// (instruction-result names): `add("x")` returns `"x"`, then `"x.1"`,
/// `"x.2"`, … Empty names are shared and never numbered, per
/// the reference compiler's `lang/mir/Scope.h`.
#[derive(Default)]
pub struct NameScope {
    seen: RefCell<HashMap<String, u32>>,
}

impl NameScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str) -> String {
        if name.is_empty() {
            return String::new();
        }
        let mut seen = self.seen.borrow_mut();
        match seen.get_mut(name) {
            None => {
                seen.insert(name.to_string(), 0);
                name.to_string()
            }
            Some(count) => {
                *count += 1;
                format!("{name}.{count}")
            }
        }
    }
}

// --- values --------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ConstantData {
    Number { ty: Type, bits: u64 },
    String { ty: Type, value: String },
    Array { ty: Type, values: Vec<Value> },
    Pointer { ty: Type, address: u64 },
}

impl ConstantData {
    pub fn ty(&self) -> Type {
        match self {
            ConstantData::Number { ty, .. }
            | ConstantData::String { ty, .. }
            | ConstantData::Array { ty, .. }
            | ConstantData::Pointer { ty, .. } => ty.clone(),
        }
    }

    /// The integer payload, reinterpreting float bit patterns per
    /// `ConstantNumber::getInteger` in the reference compiler.
    pub fn as_u64(&self) -> u64 {
        match self {
            ConstantData::Number { bits, .. } => *bits,
            ConstantData::Pointer { address, .. } => *address,
            _ => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            ConstantData::Number { ty, bits } if ty.bit_width() == 64 => f64::from_bits(*bits),
            ConstantData::Number { ty, bits } if ty.bit_width() == 32 => f32::from_bits(*bits as u32) as f64,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamData {
    pub name: String,
    pub ty: Type,
    pub index: u32,
}

pub struct GlobalData {
    pub name: String,
    pub ty: Type,
    pub storage: StorageClass,
    pub attrs: Cell<GlobalAttributes>,
    pub initializer: RefCell<Option<Value>>,
}

pub struct InstrData {
    pub op: OpCode,
    pub operands: Vec<Operand>,
    pub icmp_pred: Option<ICmpPredicate>,
    pub fcmp_pred: Option<FCmpPredicate>,
    pub volatile: bool,
    pub result_type: Type,
    pub result_name: String,
    pub loc: SourceLoc,
}

/// An instruction operand: most are `Value`s, but `Br`/`CondBr` operands
/// also reference `BasicBlock`s directly (§3 "ordered operands
/// (references to Values or BasicBlocks)"). The C++ original reinterpret-casts
/// a `BasicBlock*` to `Value*` to paper over this; Rust gets a real sum type
/// instead.
#[derive(Clone)]
pub enum Operand {
    Value(Value),
    Block(Rc<BasicBlockData>),
}

impl Operand {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Operand::Value(v) => Some(v),
            Operand::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&Rc<BasicBlockData>> {
        match self {
            Operand::Block(b) => Some(b),
            Operand::Value(_) => None,
        }
    }
}

pub struct BasicBlockData {
    pub name: String,
    pub parent: Weak<FunctionData>,
    scope: NameScope,
    instrs: RefCell<Vec<Rc<InstrData>>>,
}

impl BasicBlockData {
    pub fn instrs(&self) -> std::cell::Ref<'_, Vec<Rc<InstrData>>> {
        self.instrs.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.instrs.borrow().last().map(|i| i.op.is_terminator()).unwrap_or(false)
    }

    fn append(&self, instr: InstrData) -> Rc<InstrData> {
        let rc = Rc::new(instr);
        self.instrs.borrow_mut().push(rc.clone());
        rc
    }
}

pub struct FunctionData {
    pub name: String,
    pub ty: Type,
    pub storage: StorageClass,
    pub cc: CallingConv,
    pub attrs: Cell<FunctionAttributes>,
    pub params: Vec<Rc<ParamData>>,
    pub parent: Weak<ModuleData>,
    scope: NameScope,
    blocks: RefCell<Vec<Rc<BasicBlockData>>>,
}

impl FunctionData {
    pub fn blocks(&self) -> std::cell::Ref<'_, Vec<Rc<BasicBlockData>>> {
        self.blocks.borrow()
    }

    pub fn param(&self, i: usize) -> &Rc<ParamData> {
        &self.params[i]
    }

    /// Creates a new, empty block and appends it to this function
    /// (§3 "BasicBlock: a name unique within its Function").
    /// `self` must already be behind an `Rc` so the block can hold a `Weak`
    /// back-link to it.
    pub fn append_block(self: &Rc<Self>, name: &str) -> Rc<BasicBlockData> {
        let unique = self.scope.add(name);
        let block = Rc::new(BasicBlockData {
            name: unique,
            parent: Rc::downgrade(self),
            scope: NameScope::new(),
            instrs: RefCell::new(Vec::new()),
        });
        self.blocks.borrow_mut().push(block.clone());
        block
    }

    pub fn return_type(&self) -> Type {
        match &*self.ty.0 {
            TypeData::Function { ret, .. } => ret.clone(),
            _ => unreachable!("function value must carry a Function type"),
        }
    }
}

#[derive(Clone)]
pub enum Item {
    Function(Rc<FunctionData>),
    Global(Rc<GlobalData>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// `{endianness, max_native_width_bytes}` (§3 "Module"); drives
/// `NativeBack`'s data-layout-string selection (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct DataLayout {
    pub endianness: Endianness,
    pub max_native_bytes: u8,
}

impl Default for DataLayout {
    fn default() -> Self {
        DataLayout { endianness: Endianness::Little, max_native_bytes: 8 }
    }
}

pub struct ModuleData {
    pub triple: RefCell<String>,
    pub data_layout: Cell<DataLayout>,
    pub source: RefCell<String>,
    items: RefCell<Vec<Item>>,
}

impl ModuleData {
    pub fn new(triple: impl Into<String>, source: impl Into<String>, data_layout: DataLayout) -> Rc<Self> {
        Rc::new(ModuleData {
            triple: RefCell::new(triple.into()),
            data_layout: Cell::new(data_layout),
            source: RefCell::new(source.into()),
            items: RefCell::new(Vec::new()),
        })
    }

    pub fn items(&self) -> std::cell::Ref<'_, Vec<Item>> {
        self.items.borrow()
    }

    pub fn add_function(self: &Rc<Self>, name: &str, ty: Type, storage: StorageClass, cc: CallingConv, params: Vec<Rc<ParamData>>) -> Rc<FunctionData> {
        let func = Rc::new(FunctionData {
            name: name.to_string(),
            ty,
            storage,
            cc,
            attrs: Cell::new(FunctionAttributes::default()),
            params,
            parent: Rc::downgrade(self),
            scope: NameScope::new(),
            blocks: RefCell::new(Vec::new()),
        });
        self.items.borrow_mut().push(Item::Function(func.clone()));
        func
    }

    pub fn add_global(self: &Rc<Self>, name: &str, ty: Type, storage: StorageClass, initializer: Option<Value>) -> Rc<GlobalData> {
        let global = Rc::new(GlobalData {
            name: name.to_string(),
            ty,
            storage,
            attrs: Cell::new(GlobalAttributes::default()),
            initializer: RefCell::new(initializer),
        });
        self.items.borrow_mut().push(Item::Global(global.clone()));
        global
    }

    pub fn find_function(&self, name: &str) -> Option<Rc<FunctionData>> {
        self.items.borrow().iter().find_map(|item| match item {
            Item::Function(f) if f.name == name => Some(f.clone()),
            _ => None,
        })
    }
}

/// The MIR atom (§3 "Value"). Cheap to clone: always either an
/// `Rc` or, for `Null`, a small owned `Type` handle.
#[derive(Clone)]
pub enum Value {
    Function(Rc<FunctionData>),
    Parameter(Rc<ParamData>),
    Constant(Rc<ConstantData>),
    Global(Rc<GlobalData>),
    Instruction(Rc<InstrData>),
    Null(Type),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Function(_) => ValueKind::Function,
            Value::Parameter(_) => ValueKind::Parameter,
            Value::Constant(_) => ValueKind::Constant,
            Value::Global(_) => ValueKind::Global,
            Value::Instruction(_) => ValueKind::Instruction,
            Value::Null(_) => ValueKind::Null,
        }
    }

    /// The value's type. For a `Global`, this is pointer-to-the-stored-type
    /// (§3 "Global … the Value's type is pointer to that"), not
    /// the stored type itself.
    pub fn ty(&self, ctx: &Context) -> Type {
        match self {
            Value::Function(f) => f.ty.clone(),
            Value::Parameter(p) => p.ty.clone(),
            Value::Constant(c) => c.ty(),
            Value::Global(g) => ctx.types.pointer(g.ty.clone(), false),
            Value::Instruction(i) => i.result_type.clone(),
            Value::Null(t) => t.clone(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Value::Function(f) => Some(&f.name),
            Value::Parameter(p) => Some(&p.name),
            Value::Global(g) => Some(&g.name),
            Value::Instruction(i) => Some(&i.result_name),
            Value::Constant(_) | Value::Null(_) => None,
        }
    }

    pub fn as_instruction(&self) -> Option<&Rc<InstrData>> {
        match self {
            Value::Instruction(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Rc<ConstantData>> {
        match self {
            Value::Constant(c) => Some(c),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Parameter(a), Value::Parameter(b)) => Rc::ptr_eq(a, b),
            (Value::Constant(a), Value::Constant(b)) => Rc::ptr_eq(a, b),
            (Value::Global(a), Value::Global(b)) => Rc::ptr_eq(a, b),
            (Value::Instruction(a), Value::Instruction(b)) => Rc::ptr_eq(a, b),
            (Value::Null(a), Value::Null(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?}, {:?})", self.kind(), self.name())
    }
}

// --- hash-consed IR context (§4.1 const_* API) -------------

/// Layers MIR-level constant hash-consing on top of a `TypeCtx`. Per
/// `DESIGN.md`, this lives in `tea_ir` rather than `tea_sema` because
/// `Value`/`Constant` are MIR concepts and `tea_ir` is the crate that
/// depends on `tea_sema`, not the reverse — `tea_sema::TypeCtx` alone
/// satisfies the type half of §4.1's API; this satisfies the
/// constant half.
pub struct Context {
    pub types: TypeCtx,
    /// The `0`/`1` fast path, keyed by `(width, signed, bit)` rather than
    /// width alone, so a `Bool` zero and an unsigned 8-bit zero never alias
    /// (§4.1; see DESIGN.md "Open Question resolutions").
    fast_numbers: RefCell<HashMap<(u8, bool, u64), Value, FnvBuild>>,
    numbers: RefCell<HashMap<(usize, u64), Value, FnvBuild>>,
    strings: RefCell<HashMap<String, Value, FnvBuild>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            types: TypeCtx::new(),
            fast_numbers: RefCell::new(HashMap::default()),
            numbers: RefCell::new(HashMap::default()),
            strings: RefCell::new(HashMap::default()),
        }
    }

    fn number_type(&self, width: u8, signed: bool) -> Type {
        let kind = match width {
            1 => PrimitiveKind::Bool,
            8 => PrimitiveKind::Char,
            16 => PrimitiveKind::Short,
            32 => PrimitiveKind::Int,
            64 => PrimitiveKind::Long,
            _ => PrimitiveKind::Int,
        };
        self.types.primitive(kind, false, signed)
    }

    /// `const_number(bits, width, signed)`: width 1 forces `Bool`.
    pub fn const_number(&self, bits: u64, width: u8, signed: bool) -> Value {
        let ty = self.number_type(width, signed);
        let bits = if width == 1 { bits & 1 } else { bits };
        if bits == 0 || bits == 1 {
            let key = (width, signed, bits);
            if let Some(v) = self.fast_numbers.borrow().get(&key) {
                return v.clone();
            }
            let v = Value::Constant(Rc::new(ConstantData::Number { ty, bits }));
            self.fast_numbers.borrow_mut().insert(key, v.clone());
            return v;
        }
        let key = (Rc::as_ptr(&ty.0) as usize, bits);
        if let Some(v) = self.numbers.borrow().get(&key) {
            return v.clone();
        }
        let v = Value::Constant(Rc::new(ConstantData::Number { ty, bits }));
        self.numbers.borrow_mut().insert(key, v.clone());
        v
    }

    /// The "alternate entry [that] takes a double" for Float/Double
    /// constants (§4.1).
    pub fn const_float(&self, value: f64, width: u8) -> Value {
        let bits = if width == 64 { value.to_bits() } else { (value as f32).to_bits() as u64 };
        self.const_number(bits, width, true)
    }

    pub fn const_string(&self, value: &str) -> Value {
        if let Some(v) = self.strings.borrow().get(value) {
            return v.clone();
        }
        let ty = self.types.array(self.types.char_(true), value.len() as u32, true);
        let v = Value::Constant(Rc::new(ConstantData::String { ty, value: value.to_string() }));
        self.strings.borrow_mut().insert(value.to_string(), v.clone());
        v
    }

    pub fn const_array(&self, elem: Type, values: Vec<Value>) -> Value {
        let ty = self.types.array(elem, values.len() as u32, true);
        Value::Constant(Rc::new(ConstantData::Array { ty, values }))
    }

    pub fn const_ptr(&self, pointee: Type, address: u64) -> Value {
        let ty = self.types.pointer(pointee, false);
        Value::Constant(Rc::new(ConstantData::Pointer { ty, address }))
    }

    pub fn null(&self, ty: Type) -> Value {
        Value::Null(ty)
    }
}

// --- builder (§4.2 "Builder") --------------------------------

/// Threaded with a current `BasicBlock`; every constructor appends to it and
/// returns the produced `Value`/`Instruction`. Grounded line-for-line in
/// the reference compiler's `lang/mir/Builder.cpp`.
pub struct Builder {
    block: Option<Rc<BasicBlockData>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self { block: None }
    }

    pub fn insert_into(&mut self, block: Rc<BasicBlockData>) {
        self.block = Some(block);
    }

    pub fn current_block(&self) -> &Rc<BasicBlockData> {
        self.block.as_ref().expect("Builder::insert_into must be called before building")
    }

    fn emit(&self, op: OpCode, operands: Vec<Operand>, result_type: Type, name: &str, loc: SourceLoc) -> Rc<InstrData> {
        let block = self.current_block();
        let result_name = block.scope.add(name);
        block.append(InstrData { op, operands, icmp_pred: None, fcmp_pred: None, volatile: false, result_type, result_name, loc })
    }

    pub fn ret(&mut self, ctx: &Context, value: Option<Value>, loc: SourceLoc) -> Rc<InstrData> {
        let operands = value.into_iter().map(Operand::Value).collect();
        self.emit(OpCode::Ret, operands, ctx.types.void(), "", loc)
    }

    pub fn alloca(&mut self, ctx: &Context, ty: Type, name: &str, loc: SourceLoc) -> Value {
        let ptr_ty = ctx.types.pointer(ty, false);
        Value::Instruction(self.emit(OpCode::Alloca, Vec::new(), ptr_ty, name, loc))
    }

    pub fn store(&mut self, ctx: &Context, ptr: Value, val: Value, loc: SourceLoc) -> Rc<InstrData> {
        self.emit(OpCode::Store, vec![Operand::Value(ptr), Operand::Value(val)], ctx.types.void(), "", loc)
    }

    pub fn load(&mut self, ctx: &Context, ptr: Value, name: &str, loc: SourceLoc) -> Value {
        let pointee = ptr.ty(ctx).element_type().unwrap_or_else(|| ctx.types.void());
        Value::Instruction(self.emit(OpCode::Load, vec![Operand::Value(ptr)], pointee, name, loc))
    }

    /// Pointer-to-pointer cast; short-circuits to the operand itself when
    /// its type already equals `target_type` (`Builder.cpp::cast`).
    pub fn cast(&mut self, ctx: &Context, val: Value, target_type: Type, name: &str, loc: SourceLoc) -> Value {
        if val.ty(ctx) == target_type {
            return val;
        }
        Value::Instruction(self.emit(OpCode::Cast, vec![Operand::Value(val)], target_type, name, loc))
    }

    /// Adds a private global of hash-consed `Array-of-Char` type initialized
    /// with `value`'s bytes, then returns a cast of its address to `char*`
    /// — the exact two-step `globalString` recipe from `Builder.cpp`.
    pub fn global_string(&mut self, ctx: &Context, module: &Rc<ModuleData>, value: &str, loc: SourceLoc) -> Value {
        let constant = ctx.const_string(value);
        let ty = constant.ty(ctx);
        let global = module.add_global("", ty, StorageClass::Private, Some(constant));
        let char_ptr = ctx.types.char_ptr(false);
        self.cast(ctx, Value::Global(global), char_ptr, "", loc)
    }

    /// Bitwise/shift binary ops (`Not`..`Shr`); operands must already carry
    /// the same type — Sema has checked compatibility before CodeGen lowers.
    pub fn binop(&mut self, op: OpCode, lhs: Value, rhs: Value, name: &str, loc: SourceLoc, result_type: Type) -> Value {
        debug_assert!(matches!(op, OpCode::Not | OpCode::And | OpCode::Or | OpCode::Xor | OpCode::Shl | OpCode::Shr));
        Value::Instruction(self.emit(op, vec![Operand::Value(lhs), Operand::Value(rhs)], result_type, name, loc))
    }

    /// Arithmetic ops (`Add`..`Mod`).
    pub fn arithm(&mut self, op: OpCode, lhs: Value, rhs: Value, name: &str, loc: SourceLoc, result_type: Type) -> Value {
        debug_assert!(matches!(op, OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod));
        Value::Instruction(self.emit(op, vec![Operand::Value(lhs), Operand::Value(rhs)], result_type, name, loc))
    }

    pub fn icmp(&mut self, ctx: &Context, pred: ICmpPredicate, lhs: Value, rhs: Value, name: &str, loc: SourceLoc) -> Value {
        let block = self.current_block();
        let result_name = block.scope.add(name);
        let instr = Rc::new(InstrData {
            op: OpCode::ICmp,
            operands: vec![Operand::Value(lhs), Operand::Value(rhs)],
            icmp_pred: Some(pred),
            fcmp_pred: None,
            volatile: false,
            result_type: ctx.types.bool_(),
            result_name,
            loc,
        });
        block.instrs.borrow_mut().push(instr.clone());
        Value::Instruction(instr)
    }

    pub fn fcmp(&mut self, ctx: &Context, pred: FCmpPredicate, lhs: Value, rhs: Value, name: &str, loc: SourceLoc) -> Value {
        let block = self.current_block();
        let result_name = block.scope.add(name);
        let instr = Rc::new(InstrData {
            op: OpCode::FCmp,
            operands: vec![Operand::Value(lhs), Operand::Value(rhs)],
            icmp_pred: None,
            fcmp_pred: Some(pred),
            volatile: false,
            result_type: ctx.types.bool_(),
            result_name,
            loc,
        });
        block.instrs.borrow_mut().push(instr.clone());
        Value::Instruction(instr)
    }

    pub fn unreachable(&mut self, ctx: &Context, loc: SourceLoc) -> Rc<InstrData> {
        self.emit(OpCode::Unreachable, Vec::new(), ctx.types.void(), "", loc)
    }

    /// Multi-index GEP; walks `element_type()` once per index to compute the
    /// final pointee type, matching `Builder.cpp::gep`'s element-type walk.
    pub fn gep(&mut self, ctx: &Context, ptr: Value, indices: &[Value], name: &str, loc: SourceLoc) -> Option<Value> {
        if !ptr.ty(ctx).is_indexable() || indices.is_empty() {
            return None;
        }
        let mut ty = ptr.ty(ctx);
        let mut operands = vec![Operand::Value(ptr)];
        for idx in indices {
            if !idx.ty(ctx).is_numeric() {
                return None;
            }
            operands.push(Operand::Value(idx.clone()));
            ty = ty.element_type()?;
        }
        let ptr_ty = ctx.types.pointer(ty, false);
        Some(Value::Instruction(self.emit(OpCode::GetElementPtr, operands, ptr_ty, name, loc)))
    }

    /// Emits `Br target` and moves the cursor to `target`.
    pub fn br(&mut self, ctx: &Context, target: &Rc<BasicBlockData>, loc: SourceLoc) -> Rc<InstrData> {
        let instr = self.emit(OpCode::Br, vec![Operand::Block(target.clone())], ctx.types.void(), "", loc);
        self.block = Some(target.clone());
        instr
    }

    pub fn cbr(&mut self, ctx: &Context, cond: Value, then_block: &Rc<BasicBlockData>, else_block: &Rc<BasicBlockData>, loc: SourceLoc) -> Rc<InstrData> {
        self.emit(
            OpCode::CondBr,
            vec![Operand::Value(cond), Operand::Block(then_block.clone()), Operand::Block(else_block.clone())],
            ctx.types.void(),
            "",
            loc,
        )
    }

    /// A void call leaves its result slot `Null`-typed — no value a caller
    /// could legally use — matching `Builder.cpp::call`'s "result type set
    /// only if non-void".
    pub fn call(&mut self, ctx: &Context, func: Value, args: &[Value], name: &str, loc: SourceLoc) -> Value {
        let ret_ty = match &*func.ty(ctx).0 {
            TypeData::Function { ret, .. } => ret.clone(),
            TypeData::Pointer { pointee, .. } => match &*pointee.0 {
                TypeData::Function { ret, .. } => ret.clone(),
                _ => ctx.types.void(),
            },
            _ => ctx.types.void(),
        };
        let mut operands = vec![Operand::Value(func)];
        operands.extend(args.iter().cloned().map(Operand::Value));
        Value::Instruction(self.emit(OpCode::Call, operands, ret_ty, name, loc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_module() -> Rc<ModuleData> {
        ModuleData::new("x86_64-unknown-linux-gnu", "t.tea", DataLayout::default())
    }

    #[test]
    fn name_scope_dedups_and_shares_empty_names() {
        let scope = NameScope::new();
        assert_eq!(scope.add("x"), "x");
        assert_eq!(scope.add("x"), "x.1");
        assert_eq!(scope.add("x"), "x.2");
        assert_eq!(scope.add(""), "");
        assert_eq!(scope.add(""), "");
    }

    #[test]
    fn const_number_is_hash_consed() {
        let ctx = Context::new();
        let a = ctx.const_number(0, 32, true);
        let b = ctx.const_number(0, 32, true);
        assert_eq!(a, b);
        let c = ctx.const_number(0, 1, true);
        assert_ne!(a, c, "Bool zero and Int zero must not alias");
    }

    #[test]
    fn alloca_store_load_round_trip_types() {
        let ctx = Context::new();
        let module = sample_module();
        let int_ty = ctx.types.int(true);
        let fn_ty = ctx.types.function(ctx.types.void(), vec![], false);
        let func = module.add_function("main", fn_ty, StorageClass::Public, CallingConv::CDecl, vec![]);
        let entry = func.append_block("entry");
        let mut b = Builder::new();
        b.insert_into(entry);
        let loc = SourceLoc::default();
        let slot = b.alloca(&ctx, int_ty.clone(), "x", loc);
        assert_eq!(slot.ty(&ctx).element_type().unwrap(), int_ty);
        let five = ctx.const_number(5, 32, true);
        b.store(&ctx, slot.clone(), five, loc);
        let loaded = b.load(&ctx, slot, "x.val", loc);
        assert_eq!(loaded.ty(&ctx), int_ty);
    }

    #[test]
    fn br_moves_the_cursor() {
        let ctx = Context::new();
        let module = sample_module();
        let fn_ty = ctx.types.function(ctx.types.void(), vec![], false);
        let func = module.add_function("f", fn_ty, StorageClass::Private, CallingConv::CDecl, vec![]);
        let entry = func.append_block("entry");
        let exit = func.append_block("exit");
        let mut b = Builder::new();
        b.insert_into(entry.clone());
        b.br(&ctx, &exit, SourceLoc::default());
        assert!(entry.is_terminated());
        assert!(Rc::ptr_eq(b.current_block(), &exit));
    }

    #[test]
    fn void_call_has_no_usable_result_value() {
        let ctx = Context::new();
        let module = sample_module();
        let void_fn_ty = ctx.types.function(ctx.types.void(), vec![], false);
        let callee = module.add_function("puts_like", void_fn_ty, StorageClass::Public, CallingConv::CDecl, vec![]);
        let caller_ty = ctx.types.function(ctx.types.void(), vec![], false);
        let caller = module.add_function("caller", caller_ty, StorageClass::Private, CallingConv::CDecl, vec![]);
        let entry = caller.append_block("entry");
        let mut b = Builder::new();
        b.insert_into(entry);
        let result = b.call(&ctx, Value::Function(callee), &[], "", SourceLoc::default());
        assert!(result.ty(&ctx).is_void());
    }
}
