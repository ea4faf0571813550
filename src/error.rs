//! Error types for the compile, evaluation, and emission phases.
//!
//! Compile-time failures are fatal and labeled. Runtime failures in the
//! numeric sweeps propagate as `Result`s from the evaluation entry points;
//! symbolic sweeps construct graphs outside the hot loop and use the same
//! error channel.

use std::fmt;

use crate::opcode::OpCode;

/// Raised when the cooperative interrupt flag is set during a long-running
/// compile phase or textual dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Errors raised while compiling an expression graph into an algorithm.
#[derive(Clone, Debug)]
pub enum CompileError {
    /// An option key outside the recognized set was passed.
    UnknownOption(String),
    /// An option had the wrong value type.
    OptionType {
        /// The offending key.
        key: String,
        /// Name of the expected value type.
        expected: &'static str,
    },
    /// `default_in` does not have one entry per function input.
    DefaultInLength {
        /// Number of function inputs.
        expected: usize,
        /// Length of the supplied vector.
        got: usize,
    },
    /// A just-in-time compilation option was requested.
    JitUnsupported(&'static str),
    /// Node or output count exceeds `i32::MAX`.
    IntegerOverflow,
    /// An input entry is not a symbolic leaf.
    NonSymbolicInput {
        /// Index of the offending function input.
        input: usize,
    },
    /// Input or output name list has the wrong length.
    NameCount {
        /// "input" or "output".
        which: &'static str,
        /// Number of declared arguments.
        expected: usize,
        /// Number of names supplied.
        got: usize,
    },
    /// The interrupt flag was raised during compilation.
    Interrupted,
    /// A derivative sweep failed while assembling a Jacobian.
    Derivative(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnknownOption(key) => write!(f, "unknown option '{}'", key),
            CompileError::OptionType { key, expected } => {
                write!(f, "option '{}' expects a {} value", key, expected)
            }
            CompileError::DefaultInLength { expected, got } => write!(
                f,
                "option 'default_in' has incorrect length: expected {}, got {}",
                expected, got
            ),
            CompileError::JitUnsupported(key) => {
                write!(f, "option '{}' is not supported in this build", key)
            }
            CompileError::IntegerOverflow => write!(f, "integer overflow"),
            CompileError::NonSymbolicInput { input } => {
                write!(f, "input {} is not purely symbolic", input)
            }
            CompileError::NameCount {
                which,
                expected,
                got,
            } => write!(f, "expected {} {} names, got {}", expected, which, got),
            CompileError::Interrupted => write!(f, "compilation interrupted"),
            CompileError::Derivative(msg) => write!(f, "derivative sweep failed: {}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<Interrupted> for CompileError {
    fn from(_: Interrupted) -> Self {
        CompileError::Interrupted
    }
}

/// Errors raised while evaluating a compiled function.
#[derive(Clone, Debug)]
pub enum EvalError {
    /// Numeric evaluation attempted while free variables are present.
    /// Carries the display names of the free symbols.
    FreeVariables(Vec<String>),
    /// An external sub-function reported a failure.
    SubcallFailed {
        /// Name of the failing sub-function.
        function: String,
    },
    /// An external sub-function cannot produce the requested derivative.
    DerivativeUnavailable {
        /// Name of the sub-function.
        function: String,
    },
    /// A call-table entry has no bound function handle
    /// (deserialized but not finalized).
    UnboundFunction {
        /// Recorded name of the unbound sub-function.
        function: String,
    },
    /// A symbolic sweep was requested on a deserialized function that is
    /// detached from its originating arena.
    Detached,
    /// A seed vector has the wrong number of entries.
    SeedCount {
        /// Expected number of seeds per direction.
        expected: usize,
        /// Number supplied.
        got: usize,
    },
    /// An algorithm element carries an opcode that cannot appear in a
    /// compiled stream. Indicates a serialization or build bug.
    UnknownOp(OpCode),
    /// Failure reported by an external function implementation.
    External(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::FreeVariables(names) => {
                write!(f, "cannot evaluate since variables [")?;
                for (i, n) in names.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", n)?;
                }
                write!(f, "] are free")
            }
            EvalError::SubcallFailed { function } => {
                write!(f, "call to '{}' failed", function)
            }
            EvalError::DerivativeUnavailable { function } => {
                write!(f, "'{}' provides no derivative function", function)
            }
            EvalError::UnboundFunction { function } => write!(
                f,
                "call to '{}' is unbound; finalize() the deserialized function first",
                function
            ),
            EvalError::Detached => write!(
                f,
                "symbolic sweeps are unavailable on a deserialized function"
            ),
            EvalError::SeedCount { expected, got } => {
                write!(f, "expected {} seeds per direction, got {}", expected, got)
            }
            EvalError::UnknownOp(op) => write!(f, "unknown operation {:?}", op),
            EvalError::External(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EvalError {}

/// Errors raised during code emission.
#[derive(Clone, Debug)]
pub enum CodegenError {
    /// Emission attempted while free variables are present.
    FreeVariables(Vec<String>),
    /// An option key outside the recognized set was passed.
    UnknownOption(String),
    /// The requested target language is not supported.
    UnsupportedLanguage(String),
    /// The matrix-language body cannot express external sub-calls.
    CallUnsupported,
    /// Error from the underlying writer.
    Format,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::FreeVariables(names) => {
                write!(
                    f,
                    "code generation is not possible since variables {:?} are free",
                    names
                )
            }
            CodegenError::UnknownOption(key) => write!(f, "unknown option '{}'", key),
            CodegenError::UnsupportedLanguage(lang) => {
                write!(f, "unsupported target language '{}'", lang)
            }
            CodegenError::CallUnsupported => {
                write!(f, "external sub-calls cannot be emitted in this target")
            }
            CodegenError::Format => write!(f, "formatter error"),
        }
    }
}

impl std::error::Error for CodegenError {}

impl From<fmt::Error> for CodegenError {
    fn from(_: fmt::Error) -> Self {
        CodegenError::Format
    }
}

/// Errors raised while re-binding external functions after deserialization.
#[derive(Clone, Debug)]
pub enum FinalizeError {
    /// No registered function matches the recorded name.
    UnknownFunction(String),
    /// A registered function's signature does not match the recorded
    /// call-table entry.
    FunctionMismatch {
        /// Name of the mismatching function.
        function: String,
    },
}

impl fmt::Display for FinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeError::UnknownFunction(name) => {
                write!(f, "no registered function named '{}'", name)
            }
            FinalizeError::FunctionMismatch { function } => {
                write!(
                    f,
                    "registered function '{}' has a different signature",
                    function
                )
            }
        }
    }
}

impl std::error::Error for FinalizeError {}
