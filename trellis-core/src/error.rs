//! Error types for the reactive engine.
//!
//! The engine is deliberately forgiving: the ergonomic mutation methods
//! (`Value::set`, `Value::push`, `Computed::set`, ...) report policy
//! violations as warning-level tracing events and leave the data untouched.
//! Callers that want the strict behavior use the `try_` variants, which
//! surface these errors as `Result`s.

use thiserror::Error;

/// Errors produced by the fallible (`try_*`) mutation surface.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A write went through a readonly wrapper. The underlying data is
    /// unchanged and no subscriber was notified.
    #[error("write rejected: target is readonly")]
    ReadonlyWrite,

    /// A writable operation was attempted on a computed without a setter.
    #[error("computed has no setter")]
    NoSetter,

    /// The operation does not apply to this kind of value, for example
    /// `push` on an object or `set` with a string key on an array.
    #[error("{op} is not supported on {kind} values")]
    WrongKind {
        op: &'static str,
        kind: &'static str,
    },
}
