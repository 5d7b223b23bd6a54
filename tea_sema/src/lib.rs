//! Semantic analysis for the tea language (§4.5).
//!
//! Two modules: `typectx` (the hash-consed type universe, §4.1) and
//! `checker` (the scope/type-checking pass built on top of it, §4.5).

pub mod checker;
pub mod typectx;

pub use checker::Sema;
pub use typectx::{compatible, float_widens, PrimitiveKind, Type, TypeCtx, TypeData};
