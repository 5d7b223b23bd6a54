//! Parser and AST for the tea language (§4.4).

pub mod ast;
pub mod parser;
pub mod precedence;

pub use ast::*;
pub use parser::Parser;
pub use precedence::Precedence;
