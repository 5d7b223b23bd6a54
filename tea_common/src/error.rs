//! Error taxonomy for the tea compiler (see §7).

use crate::Diagnostic;
use thiserror::Error;

/// The error taxonomy every compiler stage reports through.
///
/// Lexical, Parse, Lowering, Backend and Io errors are fatal-first: the
/// stage that detects them stops and the panic sink unwinds to the CLI
/// boundary. `Semantic` is the one variant that is a *batch*: Sema keeps
/// walking the whole AST and collects every diagnostic it finds before
/// returning this.
#[derive(Error, Debug, Clone)]
pub enum TeaError {
    #[error("{message}")]
    Lexical { message: String },

    #[error("{message}")]
    Parse { message: String },

    #[error("{} semantic error(s)", .errors.len())]
    Semantic { errors: Vec<Diagnostic> },

    #[error("{message}")]
    Lowering { message: String },

    #[error("{message}")]
    Backend { message: String },

    #[error("{message}")]
    Io { message: String },
}

/// Result type alias used by every compiler-library crate.
pub type TeaResult<T> = Result<T, TeaError>;

impl TeaError {
    pub fn lexical(message: impl Into<String>) -> Self {
        Self::Lexical { message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }

    pub fn semantic(errors: Vec<Diagnostic>) -> Self {
        Self::Semantic { errors }
    }

    pub fn lowering(message: impl Into<String>) -> Self {
        Self::Lowering { message: message.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }
}
