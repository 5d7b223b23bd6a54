//! The panic sink (§6, §9).
//!
//! Lexical, Parse, Lowering and Backend errors are fatal: the stage that
//! finds one calls [`panic`] and nothing further in this thread, for this
//! compilation, runs. We don't use `std::panic!`/`process::abort` directly
//! because a CLI embedding this compiler as a library still wants a clean
//! exit path; instead `panic` logs the message and unwinds with a payload
//! type that `catch` downcasts, so `std::panic::catch_unwind` at the CLI
//! boundary is the only place a panic is ever observed.

use std::panic::{self, AssertUnwindSafe};

/// The payload carried by a tea compiler panic. Anything caught by
/// [`catch`] that isn't this type is a genuine Rust bug and is re-raised.
#[derive(Debug, Clone)]
pub struct CompilerPanic {
    pub message: String,
}

/// Report a fatal error and unwind. Never returns.
pub fn panic(message: impl Into<String>) -> ! {
    let message = message.into();
    log::error!("{message}");
    std::panic::panic_any(CompilerPanic { message });
}

/// Run `f`, catching a [`CompilerPanic`] raised anywhere inside it and
/// turning it into an `Err`. Any other panic payload is resumed (it's not
/// ours to handle).
pub fn catch<T>(f: impl FnOnce() -> T) -> Result<T, CompilerPanic> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<CompilerPanic>() {
            Ok(panic) => Err(*panic),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}
