//! Hash-consed type universe (§4.1).
//!
//! Grounded in the reference compiler's `lang/common/Type.{h,cpp}` (the
//! `Type::get` textual parser, the `TypeKind` tag set, the `const`/`sign`
//! bit layout) and its `lang/mir/Context.h` (the
//! per-kind cache tables). The C++ original does a linear scan with
//! `memcmp` per cache; §9 explicitly prefers a real hash map
//! keyed by a structural hash, so that's what this does — `TypeData` derives
//! `Hash`/`Eq` structurally and the cache's `HashMap` is parameterized over
//! an FNV-1a 64 hasher, with the derived
//! structural `Eq` serving as the collision tie-break on a hash match.
//!
//! Identity is by `Rc` pointer: two calls that would build the same
//! `TypeData` return a clone of the same `Rc`, so callers compare types with
//! `Rc::ptr_eq` (or just `==` on `Type`, which is pointer equality once a
//! type is cached — see `Type`'s `PartialEq` impl below).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::rc::Rc;

/// FNV-1a 64, exactly as used by the reference compiler's struct/function
/// type hashing (`1469598103934665603`/`1099511628211` are the standard
/// FNV-1a 64 offset basis and prime).
#[derive(Default)]
pub struct Fnv1a64(u64);

impl Hasher for Fnv1a64 {
    fn finish(&self) -> u64 {
        if self.0 == 0 { 1469598103934665603 } else { self.0 }
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut h = if self.0 == 0 { 1469598103934665603 } else { self.0 };
        for &b in bytes {
            h ^= b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        self.0 = h;
    }
}

type FnvBuild = BuildHasherDefault<Fnv1a64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
}

impl PrimitiveKind {
    fn text(self) -> &'static str {
        match self {
            PrimitiveKind::Void => "void",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::String => "string",
        }
    }

    fn from_text(s: &str) -> Option<PrimitiveKind> {
        Some(match s {
            "void" => PrimitiveKind::Void,
            "bool" => PrimitiveKind::Bool,
            "char" => PrimitiveKind::Char,
            "short" => PrimitiveKind::Short,
            "int" => PrimitiveKind::Int,
            "long" => PrimitiveKind::Long,
            "float" => PrimitiveKind::Float,
            "double" => PrimitiveKind::Double,
            "string" => PrimitiveKind::String,
            _ => return None,
        })
    }

    /// fp "rank" used by the compatibility matrix: float widens to double.
    fn fp_rank(self) -> u8 {
        match self {
            PrimitiveKind::Float => 1,
            PrimitiveKind::Double => 2,
            _ => 0,
        }
    }
}

/// The canonical, hash-consed type representation (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeData {
    Primitive { kind: PrimitiveKind, is_const: bool, signed: bool },
    Pointer { pointee: Type, is_const: bool },
    Array { element: Type, length: u32, is_const: bool },
    Function { ret: Type, params: Vec<Type>, vararg: bool },
    Struct { name: String, fields: Vec<Type>, packed: bool, is_const: bool },
}

/// A handle to a hash-consed `TypeData`. Two `Type`s produced by the same
/// `TypeCtx` for structurally-equal data are the same `Rc` (§8
/// "Type identity").
#[derive(Debug, Clone)]
pub struct Type(pub Rc<TypeData>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::ops::Deref for Type {
    type Target = TypeData;
    fn deref(&self) -> &TypeData {
        &self.0
    }
}

impl Type {
    pub fn kind_name(&self) -> &'static str {
        match &*self.0 {
            TypeData::Primitive { kind, .. } => kind.text(),
            TypeData::Pointer { .. } => "pointer",
            TypeData::Array { .. } => "array",
            TypeData::Function { .. } => "function",
            TypeData::Struct { .. } => "struct",
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(&*self.0, TypeData::Primitive { kind: PrimitiveKind::Void, .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            &*self.0,
            TypeData::Primitive {
                kind: PrimitiveKind::Bool
                    | PrimitiveKind::Char
                    | PrimitiveKind::Short
                    | PrimitiveKind::Int
                    | PrimitiveKind::Long,
                ..
            }
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            &*self.0,
            TypeData::Primitive { kind: PrimitiveKind::Float | PrimitiveKind::Double, .. }
        )
    }

    pub fn is_signed(&self) -> bool {
        match &*self.0 {
            TypeData::Primitive { signed, .. } => *signed,
            _ => true,
        }
    }

    pub fn is_indexable(&self) -> bool {
        matches!(&*self.0, TypeData::Array { .. } | TypeData::Pointer { .. })
    }

    pub fn is_const(&self) -> bool {
        match &*self.0 {
            TypeData::Primitive { is_const, .. }
            | TypeData::Pointer { is_const, .. }
            | TypeData::Array { is_const, .. }
            | TypeData::Struct { is_const, .. } => *is_const,
            TypeData::Function { .. } => false,
        }
    }

    pub fn element_type(&self) -> Option<Type> {
        match &*self.0 {
            TypeData::Array { element, .. } => Some(element.clone()),
            TypeData::Pointer { pointee, .. } => Some(pointee.clone()),
            _ => None,
        }
    }

    /// Bit width used by `ConstantNumber` (§4.2 `getBitwidth`).
    pub fn bit_width(&self) -> u8 {
        match &*self.0 {
            TypeData::Primitive { kind, .. } => match kind {
                PrimitiveKind::Bool => 1,
                PrimitiveKind::Char => 8,
                PrimitiveKind::Short => 16,
                PrimitiveKind::Int | PrimitiveKind::Float => 32,
                PrimitiveKind::Long | PrimitiveKind::Double => 64,
                PrimitiveKind::Void | PrimitiveKind::String => 0,
            },
            _ => 0,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            TypeData::Pointer { pointee, is_const } => {
                write!(f, "{pointee}*")?;
                if *is_const {
                    write!(f, " const")?;
                }
                Ok(())
            }
            TypeData::Function { ret, params, vararg } => {
                write!(f, "func({ret})(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                if *vararg {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            TypeData::Array { element, length, .. } => write!(f, "{element}[{length}]"),
            TypeData::Struct { name, .. } => write!(f, "{name}"),
            TypeData::Primitive { kind, is_const, signed } => {
                if *is_const {
                    write!(f, "const ")?;
                }
                if !signed && matches!(kind, PrimitiveKind::Int | PrimitiveKind::Long | PrimitiveKind::Char | PrimitiveKind::Short) {
                    write!(f, "unsigned ")?;
                }
                write!(f, "{}", kind.text())
            }
        }
    }
}

/// Type compatibility for binary operators and returns (§4.5).
pub fn compatible(a: &Type, b: &Type) -> bool {
    if a == b {
        return true;
    }
    if a.is_numeric() && b.is_numeric() {
        return true;
    }
    if a.is_float() && b.is_float() {
        return true;
    }
    match (&*a.0, &*b.0) {
        (TypeData::Pointer { pointee: pa, is_const: ca }, TypeData::Pointer { pointee: pb, .. }) => {
            pa == pb && !*ca
        }
        (TypeData::Array { element: ea, length: la, .. }, TypeData::Array { element: eb, length: lb, .. }) => {
            ea == eb && la == lb
        }
        (
            TypeData::Function { ret: ra, params: pa, vararg: va },
            TypeData::Function { ret: rb, params: pb, vararg: vb },
        ) => ra == rb && va == vb && pa.len() == pb.len() && pa.iter().zip(pb).all(|(x, y)| x == y),
        (TypeData::Struct { .. }, TypeData::Struct { .. }) => false,
        _ => false,
    }
}

/// Whether assigning/returning a `from` value as a `to`-typed one implicitly
/// widens (lower float rank widens to higher rank, per §4.5).
pub fn float_widens(from: &Type, to: &Type) -> bool {
    match (&*from.0, &*to.0) {
        (TypeData::Primitive { kind: k1, .. }, TypeData::Primitive { kind: k2, .. }) => {
            k1.fp_rank() > 0 && k2.fp_rank() > 0 && k1.fp_rank() <= k2.fp_rank()
        }
        _ => false,
    }
}

/// The hash-consing factory (§4.1). One instance per
/// compilation, shared (via `Rc`) by Sema and, downstream, by
/// `tea_ir::ir::Context`, which layers MIR-level constant hash-consing on
/// top of this same type cache — see `DESIGN.md` for why the constant
/// tables live in `tea_ir` rather than here: `Value`/`Constant` are MIR
/// concepts, and `tea_ir` is the crate that depends on `tea_sema`, not the
/// reverse.
pub struct TypeCtx {
    cache: RefCell<HashMap<TypeData, Type, FnvBuild>>,
}

impl Default for TypeCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCtx {
    pub fn new() -> Self {
        Self { cache: RefCell::new(HashMap::default()) }
    }

    fn intern(&self, data: TypeData) -> Type {
        if let Some(existing) = self.cache.borrow().get(&data) {
            return existing.clone();
        }
        let ty = Type(Rc::new(data.clone()));
        self.cache.borrow_mut().insert(data, ty.clone());
        ty
    }

    pub fn primitive(&self, kind: PrimitiveKind, is_const: bool, signed: bool) -> Type {
        self.intern(TypeData::Primitive { kind, is_const, signed })
    }

    pub fn pointer(&self, pointee: Type, is_const: bool) -> Type {
        self.intern(TypeData::Pointer { pointee, is_const })
    }

    pub fn array(&self, element: Type, length: u32, is_const: bool) -> Type {
        self.intern(TypeData::Array { element, length, is_const })
    }

    pub fn function(&self, ret: Type, params: Vec<Type>, vararg: bool) -> Type {
        self.intern(TypeData::Function { ret, params, vararg })
    }

    pub fn structt(&self, name: String, fields: Vec<Type>, packed: bool, is_const: bool) -> Type {
        self.intern(TypeData::Struct { name, fields, packed, is_const })
    }

    // --- convenience constructors, one per primitive (mirrors `Type::Int`,
    // `Type::Bool`, ... in the reference compiler) ------------------------

    pub fn void(&self) -> Type {
        self.primitive(PrimitiveKind::Void, false, true)
    }
    pub fn bool_(&self) -> Type {
        self.primitive(PrimitiveKind::Bool, false, true)
    }
    pub fn string_(&self) -> Type {
        self.primitive(PrimitiveKind::String, false, true)
    }
    pub fn char_(&self, signed: bool) -> Type {
        self.primitive(PrimitiveKind::Char, false, signed)
    }
    pub fn short_(&self, signed: bool) -> Type {
        self.primitive(PrimitiveKind::Short, false, signed)
    }
    pub fn int(&self, signed: bool) -> Type {
        self.primitive(PrimitiveKind::Int, false, signed)
    }
    pub fn long_(&self, signed: bool) -> Type {
        self.primitive(PrimitiveKind::Long, false, signed)
    }
    pub fn float_(&self) -> Type {
        self.primitive(PrimitiveKind::Float, false, true)
    }
    pub fn double_(&self) -> Type {
        self.primitive(PrimitiveKind::Double, false, true)
    }

    pub fn char_ptr(&self, is_const: bool) -> Type {
        self.pointer(self.char_(true), is_const)
    }

    /// Parse a textual type (`"unsigned int**[4]"`, `"const char*"`,
    /// `"func(int)(char*, ...)"`), ported from `Type::get` in the reference
    /// compiler. Returns `None` ("unknown type", §4.1) on
    /// anything unrecognized.
    pub fn parse(&self, text: &str) -> Option<Type> {
        let s = text.trim();

        if let Some(rest) = s.strip_prefix("func(") {
            let first_close = rest.find(')')?;
            let after_first = &rest[first_close + 1..];
            let after_first = after_first.strip_prefix('(')?;
            let second_close = after_first.find(')')?;

            let ret_text = &rest[..first_close];
            let params_text = &after_first[..second_close];

            let ret = self.parse(ret_text)?;

            let mut params = Vec::new();
            let mut vararg = false;
            for tok in params_text.split(',') {
                let tok = tok.trim();
                if tok.is_empty() {
                    continue;
                }
                if tok == "..." {
                    vararg = true;
                    continue;
                }
                params.push(self.parse(tok)?);
            }

            return Some(self.pointer(self.function(ret, params, vararg), false));
        }

        // Tokenize: split on `*`, `[`, `]`, keeping them as their own tokens.
        let mut spaced = String::new();
        for c in s.chars() {
            if matches!(c, '*' | '[' | ']') {
                spaced.push(' ');
                spaced.push(c);
                spaced.push(' ');
            } else {
                spaced.push(c);
            }
        }
        let tokens: Vec<&str> = spaced.split_whitespace().collect();

        // Pull out `[ N ]` array-dimension triples.
        let mut dims = Vec::new();
        let mut rest: Vec<&str> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i] == "[" && i + 2 < tokens.len() && tokens[i + 2] == "]" {
                dims.push(tokens[i + 1].parse::<u32>().ok()?);
                i += 3;
            } else {
                rest.push(tokens[i]);
                i += 1;
            }
        }

        let mut signed = true;
        let mut is_const = false;
        let mut base: Option<PrimitiveKind> = None;
        let mut star_indices = Vec::new();

        for (idx, tok) in rest.iter().enumerate() {
            match *tok {
                "const" => is_const = true,
                "unsigned" => signed = false,
                "signed" => signed = true,
                "*" => star_indices.push(idx),
                other => base = Some(PrimitiveKind::from_text(other)?),
            }
        }

        let mut current = self.primitive(base?, is_const, signed);

        for &idx in &star_indices {
            let ptr_const = rest.get(idx + 1) == Some(&"const");
            current = self.pointer(current, ptr_const);
        }

        for dim in dims {
            current = self.array(current, dim, false);
        }

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_primitives_are_the_same_object() {
        let ctx = TypeCtx::new();
        let a = ctx.int(true);
        let b = ctx.int(true);
        assert_eq!(a, b);
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn different_signedness_is_a_different_object() {
        let ctx = TypeCtx::new();
        assert_ne!(ctx.int(true), ctx.int(false));
    }

    #[test]
    fn parse_is_idempotent() {
        let ctx = TypeCtx::new();
        for text in ["unsigned int**[4]", "const char*", "func(int)(char*, ...)", "int"] {
            let once = ctx.parse(text).unwrap();
            let twice = ctx.parse(&once.to_string()).unwrap();
            assert_eq!(once, twice, "round-trip failed for {text}");
        }
    }

    #[test]
    fn parse_pointer_and_array() {
        let ctx = TypeCtx::new();
        let t = ctx.parse("const char*").unwrap();
        assert_eq!(t.to_string(), "const char*");
        assert!(t.element_type().unwrap().is_const());

        let arr = ctx.parse("int[4]").unwrap();
        assert_eq!(arr.to_string(), "int[4]");
    }

    #[test]
    fn parse_function_type() {
        let ctx = TypeCtx::new();
        let t = ctx.parse("func(int)(char*, ...)").unwrap();
        assert_eq!(t.to_string(), "func(int)(char*, ...)*");
    }

    #[test]
    fn unknown_type_is_none() {
        let ctx = TypeCtx::new();
        assert!(ctx.parse("nope").is_none());
    }
}
