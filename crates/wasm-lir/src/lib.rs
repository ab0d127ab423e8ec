#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::too_many_lines,
    clippy::too_many_arguments,
    clippy::missing_errors_doc
)]

pub mod error;
pub mod ir;
pub mod lir;
pub mod runtime;
pub mod translate;

/// Test harness module: an interpreter for emitted LIR programs.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use error::{Error, Result};
pub use lir::{Program, Target};
pub use translate::compile_function;
