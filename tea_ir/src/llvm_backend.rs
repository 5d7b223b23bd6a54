//! NativeBack: lowers a [`ModuleData`] to a native object file via `inkwell`
//! (§4.7).
//!
//! A context-scoped struct holding the `inkwell::module::Module`/`Builder`/
//! `TargetMachine`, forward-declare-then-compile function ordering, and
//! `target_machine.write_to_file(..., FileType::Object, ...)` for emission
//! (see `DESIGN.md` for the grounding of this shape).

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder as LlvmBuilder;
use inkwell::context::Context as LlvmContext;
use inkwell::module::{Linkage, Module as LlvmModule};
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{BasicMetadataValueEnum, BasicValue, BasicValueEnum, FunctionValue, PointerValue};
use inkwell::{AddressSpace, IntPredicate, OptimizationLevel};

use tea_common::{panic as tea_panic, TeaError, TeaResult};
use tea_parser::CallingConv;
use tea_sema::typectx::PrimitiveKind;
use tea_sema::{Type, TypeData};

use crate::ir::{
    BasicBlockData, Context as IrContext, DataLayout, Endianness, FCmpPredicate, FunctionData, GlobalData,
    ICmpPredicate, InstrData, Item, ModuleData, OpCode, Operand, StorageClass, Value,
};

/// Maps a module's `{endianness, max_native_bytes}` descriptor to an LLVM
/// data-layout string (§4.7's explicit mapping table): 8 bytes
/// gets a 64-bit `e`-layout, 4 bytes a 32-bit one, anything else an empty
/// minimal layout (endianness alone, no size/alignment specs).
fn data_layout_string(layout: DataLayout) -> String {
    let e = match layout.endianness {
        Endianness::Little => "e",
        Endianness::Big => "E",
    };
    match layout.max_native_bytes {
        8 => format!("{e}-m:e-p:64:64-i64:64-n8:16:32:64-S128"),
        4 => format!("{e}-m:e-p:32:32-i64:64-n8:16:32-S128"),
        _ => e.to_string(),
    }
}

/// LLVM calling-convention id for a function/call site (§4.7's
/// calling convention table); values are `llvm::CallingConv::ID`.
fn llvm_call_conv(cc: CallingConv) -> u32 {
    match cc {
        CallingConv::CDecl | CallingConv::Auto => 0, // C
        CallingConv::FastCall => 8,                  // Fast
        CallingConv::StdCall => 64,                  // X86_StdCall
    }
}

pub struct NativeBackend<'ctx> {
    llvm: &'ctx LlvmContext,
    module: LlvmModule<'ctx>,
    builder: LlvmBuilder<'ctx>,
    target_machine: TargetMachine,
    functions: HashMap<usize, FunctionValue<'ctx>>,
    globals: HashMap<usize, PointerValue<'ctx>>,
}

impl<'ctx> NativeBackend<'ctx> {
    /// Initializes the native target, builds a `TargetMachine` for `triple`
    /// (the host triple if `triple` is empty), and creates an empty LLVM
    /// module named `module_name`.
    pub fn new(
        llvm: &'ctx LlvmContext,
        module_name: &str,
        triple: &str,
        opt_level: u8,
        data_layout: DataLayout,
    ) -> TeaResult<Self> {
        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| TeaError::backend(format!("failed to initialize native target: {e}")))?;

        let target_triple = if triple.is_empty() {
            TargetMachine::get_default_triple()
        } else {
            TargetTriple::create(triple)
        };

        let target = Target::from_triple(&target_triple)
            .map_err(|e| TeaError::backend(format!("invalid target triple '{target_triple}': {e}")))?;

        let opt = match opt_level {
            0 => OptimizationLevel::None,
            1 => OptimizationLevel::Less,
            2 => OptimizationLevel::Default,
            _ => OptimizationLevel::Aggressive,
        };

        let target_machine = target
            .create_target_machine(&target_triple, "generic", "", opt, RelocMode::PIC, CodeModel::Default)
            .ok_or_else(|| TeaError::backend(format!("failed to create target machine for '{target_triple}'")))?;

        let module = llvm.create_module(module_name);
        module.set_triple(&target_triple);
        module.set_data_layout(&inkwell::targets::TargetData::create(&data_layout_string(data_layout)).get_data_layout());

        Ok(Self {
            llvm,
            module,
            builder: llvm.create_builder(),
            target_machine,
            functions: HashMap::new(),
            globals: HashMap::new(),
        })
    }

    /// Lowers every item of `ir_module`, verifies the result, and returns
    /// `self` ready for [`Self::emit_object`].
    pub fn compile(mut self, ctx: &IrContext, ir_module: &ModuleData) -> TeaResult<Self> {
        for item in ir_module.items().iter() {
            if let Item::Function(f) = item {
                self.declare_function(f);
            }
        }
        for item in ir_module.items().iter() {
            if let Item::Global(g) = item {
                self.declare_global(g);
            }
        }
        for item in ir_module.items().iter() {
            if let Item::Function(f) = item {
                if !f.blocks().is_empty() {
                    self.compile_function(ctx, f);
                }
            }
        }

        self.module
            .verify()
            .map_err(|e| TeaError::backend(format!("module verification failed: {e}")))?;

        Ok(self)
    }

    pub fn emit_object(&self, path: &Path) -> TeaResult<()> {
        self.target_machine
            .write_to_file(&self.module, FileType::Object, path)
            .map_err(|e| TeaError::backend(format!("failed to emit object file: {e}")))
    }

    pub fn print_to_string(&self) -> String {
        self.module.print_to_string().to_string()
    }

    // --- type mapping --------------------------------------------------------

    fn basic_type(&self, ty: &Type) -> BasicTypeEnum<'ctx> {
        match &*ty.0 {
            TypeData::Primitive { kind, .. } => match kind {
                PrimitiveKind::Bool => self.llvm.bool_type().into(),
                PrimitiveKind::Char => self.llvm.i8_type().into(),
                PrimitiveKind::Short => self.llvm.i16_type().into(),
                PrimitiveKind::Int => self.llvm.i32_type().into(),
                PrimitiveKind::Long => self.llvm.i64_type().into(),
                PrimitiveKind::Float => self.llvm.f32_type().into(),
                PrimitiveKind::Double => self.llvm.f64_type().into(),
                PrimitiveKind::String => self.llvm.ptr_type(AddressSpace::default()).into(),
                PrimitiveKind::Void => tea_panic("internal error: void has no basic LLVM type"),
            },
            TypeData::Pointer { .. } | TypeData::Function { .. } => {
                self.llvm.ptr_type(AddressSpace::default()).into()
            }
            TypeData::Array { element, length, .. } => self.basic_type(element).array_type(*length).into(),
            TypeData::Struct { fields, .. } => {
                let field_types: Vec<BasicTypeEnum> = fields.iter().map(|f| self.basic_type(f)).collect();
                self.llvm.struct_type(&field_types, false).into()
            }
        }
    }

    /// Builds an LLVM function signature from a tea `Function` or
    /// `Pointer(Function)` type.
    fn function_type(&self, ty: &Type) -> FunctionType<'ctx> {
        let inner = match &*ty.0 {
            TypeData::Function { .. } => ty.clone(),
            TypeData::Pointer { pointee, .. } => pointee.clone(),
            _ => tea_panic("internal error: expected a function (pointer) type"),
        };
        let TypeData::Function { ret, params, vararg } = &*inner.0 else {
            tea_panic("internal error: expected a function type");
        };
        let param_types: Vec<BasicMetadataTypeEnum> = params.iter().map(|p| self.basic_type(p).into()).collect();
        if ret.is_void() {
            self.llvm.void_type().fn_type(&param_types, *vararg)
        } else {
            self.basic_type(ret).fn_type(&param_types, *vararg)
        }
    }

    // --- declarations --------------------------------------------------------

    fn declare_function(&mut self, f: &Rc<FunctionData>) {
        let fn_type = self.function_type(&f.ty);
        let linkage = match f.storage {
            StorageClass::Public => Linkage::External,
            StorageClass::Private => Linkage::Internal,
        };
        let fn_val = self.module.add_function(&f.name, fn_type, Some(linkage));
        fn_val.set_call_conventions(llvm_call_conv(f.cc));
        self.functions.insert(Rc::as_ptr(f) as usize, fn_val);
    }

    fn declare_global(&mut self, g: &Rc<GlobalData>) {
        let llvm_ty = self.basic_type(&g.ty);
        let linkage = match g.storage {
            StorageClass::Public => Linkage::External,
            StorageClass::Private => Linkage::Internal,
        };
        let global = self.module.add_global(llvm_ty, None, &g.name);
        global.set_linkage(linkage);
        match g.initializer.borrow().as_ref() {
            Some(init) => global.set_initializer(&self.const_value(init)),
            None => global.set_initializer(&zero_of(llvm_ty)),
        }
        self.globals.insert(Rc::as_ptr(g) as usize, global.as_pointer_value());
    }

    // --- constants -------------------------------------------------------------

    fn const_value(&self, value: &Value) -> BasicValueEnum<'ctx> {
        match value {
            Value::Constant(c) => match &**c {
                crate::ir::ConstantData::Number { ty, bits } if ty.is_float() => {
                    if ty.bit_width() == 64 {
                        self.llvm.f64_type().const_float(f64::from_bits(*bits)).into()
                    } else {
                        self.llvm.f32_type().const_float(f32::from_bits(*bits as u32) as f64).into()
                    }
                }
                crate::ir::ConstantData::Number { ty, bits } => {
                    self.basic_type(ty).into_int_type().const_int(*bits, ty.is_signed()).into()
                }
                crate::ir::ConstantData::String { value, .. } => self.llvm.const_string(value.as_bytes(), true).into(),
                crate::ir::ConstantData::Array { values, .. } => {
                    let elems: Vec<BasicValueEnum> = values.iter().map(|v| self.const_value(v)).collect();
                    if elems.is_empty() {
                        zero_of(self.llvm.i8_type().array_type(0).into())
                    } else {
                        match elems[0].get_type() {
                            BasicTypeEnum::IntType(t) => {
                                let ints: Vec<_> = elems.iter().map(|v| v.into_int_value()).collect();
                                t.const_array(&ints).into()
                            }
                            BasicTypeEnum::FloatType(t) => {
                                let floats: Vec<_> = elems.iter().map(|v| v.into_float_value()).collect();
                                t.const_array(&floats).into()
                            }
                            other => zero_of(other),
                        }
                    }
                }
                crate::ir::ConstantData::Pointer { .. } => {
                    self.llvm.ptr_type(AddressSpace::default()).const_null().into()
                }
            },
            Value::Null(ty) => zero_of(self.basic_type(ty)),
            Value::Global(g) => self.globals[&(Rc::as_ptr(g) as usize)].into(),
            Value::Function(f) => self.functions[&(Rc::as_ptr(f) as usize)]
                .as_global_value()
                .as_pointer_value()
                .into(),
            _ => tea_panic("internal error: unsupported constant expression"),
        }
    }

    // --- function bodies -----------------------------------------------------

    fn compile_function(&mut self, ctx: &IrContext, f: &Rc<FunctionData>) {
        let fn_val = self.functions[&(Rc::as_ptr(f) as usize)];

        let mut blocks: HashMap<usize, BasicBlock<'ctx>> = HashMap::new();
        for block in f.blocks().iter() {
            let llvm_bb = self.llvm.append_basic_block(fn_val, &block.name);
            blocks.insert(Rc::as_ptr(block) as usize, llvm_bb);
        }

        let mut params: HashMap<usize, BasicValueEnum<'ctx>> = HashMap::new();
        for p in &f.params {
            let llvm_param = fn_val
                .get_nth_param(p.index)
                .unwrap_or_else(|| tea_panic(format!("internal error: missing parameter {} in '{}'", p.index, f.name)));
            params.insert(Rc::as_ptr(p) as usize, llvm_param);
        }

        let mut instrs: HashMap<usize, BasicValueEnum<'ctx>> = HashMap::new();

        for block in f.blocks().iter() {
            let llvm_bb = blocks[&(Rc::as_ptr(block) as usize)];
            self.builder.position_at_end(llvm_bb);
            for instr in block.instrs().iter() {
                self.compile_instr(ctx, instr, &blocks, &params, &mut instrs);
            }
        }
    }

    fn operand_value(
        &self,
        operand: &Operand,
        params: &HashMap<usize, BasicValueEnum<'ctx>>,
        instrs: &HashMap<usize, BasicValueEnum<'ctx>>,
    ) -> BasicValueEnum<'ctx> {
        let value = match operand {
            Operand::Value(v) => v,
            Operand::Block(_) => tea_panic("internal error: expected a value operand, found a block"),
        };
        match value {
            Value::Constant(_) | Value::Null(_) | Value::Global(_) | Value::Function(_) => self.const_value(value),
            Value::Parameter(p) => params[&(Rc::as_ptr(p) as usize)],
            Value::Instruction(i) => instrs
                .get(&(Rc::as_ptr(i) as usize))
                .copied()
                .unwrap_or_else(|| tea_panic("internal error: instruction used before it was compiled")),
        }
    }

    fn block_of<'a>(&self, operand: &Operand, blocks: &'a HashMap<usize, BasicBlock<'ctx>>) -> &'a BasicBlock<'ctx> {
        match operand {
            Operand::Block(b) => &blocks[&(Rc::as_ptr(b) as usize)],
            Operand::Value(_) => tea_panic("internal error: expected a block operand, found a value"),
        }
    }

    fn compile_instr(
        &self,
        ctx: &IrContext,
        instr: &Rc<InstrData>,
        blocks: &HashMap<usize, BasicBlock<'ctx>>,
        params: &HashMap<usize, BasicValueEnum<'ctx>>,
        instrs: &mut HashMap<usize, BasicValueEnum<'ctx>>,
    ) {
        let name = instr.result_name.as_str();
        let val = |op: &Operand| self.operand_value(op, params, instrs);

        let result: Option<BasicValueEnum<'ctx>> = match instr.op {
            OpCode::Alloca => {
                let elem_ty = self.basic_type(
                    &instr
                        .result_type
                        .element_type()
                        .unwrap_or_else(|| tea_panic("internal error: alloca result must be a pointer type")),
                );
                Some(self.builder.build_alloca(elem_ty, name).expect("build_alloca").into())
            }
            OpCode::Store => {
                let ptr = val(&instr.operands[0]).into_pointer_value();
                let v = val(&instr.operands[1]);
                self.builder.build_store(ptr, v).expect("build_store");
                None
            }
            OpCode::Load => {
                let ptr = val(&instr.operands[0]).into_pointer_value();
                let elem_ty = self.basic_type(&instr.result_type);
                Some(self.builder.build_load(elem_ty, ptr, name).expect("build_load"))
            }
            OpCode::Cast => Some(val(&instr.operands[0])),
            OpCode::GetElementPtr => {
                let ptr = val(&instr.operands[0]).into_pointer_value();
                let elem_ty = self.basic_type(
                    &instr
                        .result_type
                        .element_type()
                        .unwrap_or_else(|| tea_panic("internal error: gep result must be a pointer type")),
                );
                let indices: Vec<_> = instr.operands[1..].iter().map(|o| val(o).into_int_value()).collect();
                Some(unsafe { self.builder.build_gep(elem_ty, ptr, &indices, name) }.expect("build_gep").into())
            }
            OpCode::Br => {
                let target = *self.block_of(&instr.operands[0], blocks);
                self.builder.build_unconditional_branch(target).expect("build_br");
                None
            }
            OpCode::CondBr => {
                let cond = val(&instr.operands[0]).into_int_value();
                let then_bb = *self.block_of(&instr.operands[1], blocks);
                let else_bb = *self.block_of(&instr.operands[2], blocks);
                self.builder.build_conditional_branch(cond, then_bb, else_bb).expect("build_condbr");
                None
            }
            OpCode::Ret => {
                if let Some(op) = instr.operands.first() {
                    let v = val(op);
                    self.builder.build_return(Some(&v as &dyn BasicValue)).expect("build_ret");
                } else {
                    self.builder.build_return(None).expect("build_ret_void");
                }
                None
            }
            OpCode::Unreachable => {
                self.builder.build_unreachable().expect("build_unreachable");
                None
            }
            OpCode::ICmp => {
                let lhs = val(&instr.operands[0]).into_int_value();
                let rhs = val(&instr.operands[1]).into_int_value();
                let pred = icmp_predicate(instr.icmp_pred.expect("ICmp must carry a predicate"));
                Some(self.builder.build_int_compare(pred, lhs, rhs, name).expect("build_icmp").into())
            }
            OpCode::FCmp => {
                let lhs = val(&instr.operands[0]).into_float_value();
                let rhs = val(&instr.operands[1]).into_float_value();
                let pred = fcmp_predicate(instr.fcmp_pred.expect("FCmp must carry a predicate"));
                Some(self.builder.build_float_compare(pred, lhs, rhs, name).expect("build_fcmp").into())
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                let lhs = val(&instr.operands[0]);
                let rhs = val(&instr.operands[1]);
                Some(self.compile_arith(instr, &lhs, &rhs, name))
            }
            OpCode::And | OpCode::Or | OpCode::Xor | OpCode::Shl | OpCode::Shr | OpCode::Not => {
                let lhs = val(&instr.operands[0]).into_int_value();
                let rhs = val(&instr.operands[1]).into_int_value();
                let v = match instr.op {
                    OpCode::And => self.builder.build_and(lhs, rhs, name),
                    OpCode::Or => self.builder.build_or(lhs, rhs, name),
                    OpCode::Xor | OpCode::Not => self.builder.build_xor(lhs, rhs, name),
                    OpCode::Shl => self.builder.build_left_shift(lhs, rhs, name),
                    OpCode::Shr if instr.result_type.is_signed() => self.builder.build_right_shift(lhs, rhs, true, name),
                    OpCode::Shr => self.builder.build_right_shift(lhs, rhs, false, name),
                    _ => unreachable!(),
                };
                Some(v.expect("bitwise op").into())
            }
            OpCode::Call => {
                let args: Vec<BasicMetadataValueEnum> = instr.operands[1..].iter().map(|o| val(o).into()).collect();
                let site = match &instr.operands[0] {
                    Operand::Value(Value::Function(f)) => self
                        .builder
                        .build_call(self.functions[&(Rc::as_ptr(f) as usize)], &args, name)
                        .expect("build_call"),
                    other => {
                        let callee_value = other.as_value().expect("call target must be a value");
                        let fn_ptr = val(other).into_pointer_value();
                        let fn_ty = self.function_type(&callee_value.ty(ctx));
                        self.builder
                            .build_indirect_call(fn_ty, fn_ptr, &args, name)
                            .expect("build_indirect_call")
                    }
                };
                site.try_as_basic_value().left()
            }
            OpCode::Phi => tea_panic("internal error: Phi has no NativeBack lowering (codegen never emits it)"),
            OpCode::Nop => None,
        };

        if let Some(v) = result {
            instrs.insert(Rc::as_ptr(instr) as usize, v);
        }
    }

    fn compile_arith(
        &self,
        instr: &InstrData,
        lhs: &BasicValueEnum<'ctx>,
        rhs: &BasicValueEnum<'ctx>,
        name: &str,
    ) -> BasicValueEnum<'ctx> {
        if instr.result_type.is_float() {
            let l = lhs.into_float_value();
            let r = rhs.into_float_value();
            match instr.op {
                OpCode::Add => self.builder.build_float_add(l, r, name),
                OpCode::Sub => self.builder.build_float_sub(l, r, name),
                OpCode::Mul => self.builder.build_float_mul(l, r, name),
                OpCode::Div => self.builder.build_float_div(l, r, name),
                OpCode::Mod => self.builder.build_float_rem(l, r, name),
                _ => unreachable!(),
            }
            .expect("float arith")
            .into()
        } else {
            let l = lhs.into_int_value();
            let r = rhs.into_int_value();
            let signed = instr.result_type.is_signed();
            match instr.op {
                OpCode::Add => self.builder.build_int_add(l, r, name),
                OpCode::Sub => self.builder.build_int_sub(l, r, name),
                OpCode::Mul => self.builder.build_int_mul(l, r, name),
                OpCode::Div if signed => self.builder.build_int_signed_div(l, r, name),
                OpCode::Div => self.builder.build_int_unsigned_div(l, r, name),
                OpCode::Mod if signed => self.builder.build_int_signed_rem(l, r, name),
                OpCode::Mod => self.builder.build_int_unsigned_rem(l, r, name),
                _ => unreachable!(),
            }
            .expect("int arith")
            .into()
        }
    }
}

fn zero_of<'ctx>(ty: BasicTypeEnum<'ctx>) -> BasicValueEnum<'ctx> {
    match ty {
        BasicTypeEnum::IntType(t) => t.const_zero().into(),
        BasicTypeEnum::FloatType(t) => t.const_zero().into(),
        BasicTypeEnum::PointerType(t) => t.const_null().into(),
        BasicTypeEnum::ArrayType(t) => t.const_zero().into(),
        BasicTypeEnum::StructType(t) => t.const_zero().into(),
        BasicTypeEnum::VectorType(t) => t.const_zero().into(),
        BasicTypeEnum::ScalableVectorType(t) => t.const_zero().into(),
    }
}

fn icmp_predicate(pred: ICmpPredicate) -> IntPredicate {
    match pred {
        ICmpPredicate::Eq => IntPredicate::EQ,
        ICmpPredicate::Neq => IntPredicate::NE,
        ICmpPredicate::Sgt => IntPredicate::SGT,
        ICmpPredicate::Ugt => IntPredicate::UGT,
        ICmpPredicate::Sge => IntPredicate::SGE,
        ICmpPredicate::Uge => IntPredicate::UGE,
        ICmpPredicate::Slt => IntPredicate::SLT,
        ICmpPredicate::Ult => IntPredicate::ULT,
        ICmpPredicate::Sle => IntPredicate::SLE,
        ICmpPredicate::Ule => IntPredicate::ULE,
    }
}

fn fcmp_predicate(pred: FCmpPredicate) -> inkwell::FloatPredicate {
    use inkwell::FloatPredicate::*;
    match pred {
        FCmpPredicate::Oeq => OEQ,
        FCmpPredicate::Oneq => ONE,
        FCmpPredicate::Ogt => OGT,
        FCmpPredicate::Oge => OGE,
        FCmpPredicate::Olt => OLT,
        FCmpPredicate::Ole => OLE,
        FCmpPredicate::True => PredicateTrue,
        FCmpPredicate::False => PredicateFalse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Context as IrContext, DataLayout, ModuleData, SourceLoc, StorageClass};

    #[test]
    fn empty_module_verifies_and_prints_target_triple() {
        let ctx = IrContext::new();
        let module = ModuleData::new("x86_64-unknown-linux-gnu", "t.tea", DataLayout::default());
        let llvm = LlvmContext::create();
        let backend = NativeBackend::new(&llvm, "t", "", 0, DataLayout::default()).unwrap();
        let backend = backend.compile(&ctx, &module).unwrap();
        assert!(backend.print_to_string().contains("source_filename"));
    }

    #[test]
    fn function_returning_a_constant_compiles() {
        let ctx = IrContext::new();
        let module = ModuleData::new("x86_64-unknown-linux-gnu", "t.tea", DataLayout::default());
        let fn_ty = ctx.types.function(ctx.types.int(true), vec![], false);
        let func = module.add_function("main", fn_ty, StorageClass::Public, CallingConv::CDecl, vec![]);
        let entry = func.append_block("entry");
        let mut b = crate::ir::Builder::new();
        b.insert_into(entry);
        let zero = ctx.const_number(0, 32, true);
        b.ret(&ctx, Some(zero), SourceLoc::default());

        let llvm = LlvmContext::create();
        let backend = NativeBackend::new(&llvm, "t", "", 0, DataLayout::default()).unwrap();
        let backend = backend.compile(&ctx, &module).unwrap();
        let ir_text = backend.print_to_string();
        assert!(ir_text.contains("define i32 @main"));
        assert!(ir_text.contains("ret i32 0"));
    }
}
