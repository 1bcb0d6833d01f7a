use std::path::PathBuf;

pub const ERR_OUT_OF_RANGE: u32 = 41_001;
pub const ERR_UNDERFLOW: u32 = 41_002;
pub const ERR_COMPILER_LOGIC: u32 = 41_003;
pub const ERR_DANGLING_HANDLE: u32 = 41_004;
pub const ERR_HANDLE_SPACE: u32 = 41_005;
pub const ERR_CONNECTION: u32 = 53_504;
pub const ERR_STATEMENT: u32 = 53_505;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("array element index out of bounds ({index} >= {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("pop from empty array")]
    Underflow,

    #[error("compiler logic error: {0}")]
    CompilerLogic(String),

    #[error("compiler logic error: dangling {kind} handle #{slot} (generation {generation})")]
    DanglingHandle {
        kind: &'static str,
        slot: u32,
        generation: u8,
    },

    #[error("out of {kind} handles")]
    HandleSpaceExhausted { kind: &'static str },

    #[error("cannot open database {}: {message}", path.display())]
    Connection { path: PathBuf, message: String },

    #[error("expected {expected} database file paths, got {got}")]
    MissingDatabases { expected: usize, got: usize },

    #[error("sqlite {op} failed (rc={rc}): {message}")]
    Statement {
        op: &'static str,
        rc: i32,
        message: String,
    },
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

impl RuntimeError {
    pub fn compiler_logic(msg: impl Into<String>) -> Self {
        RuntimeError::CompilerLogic(msg.into())
    }

    pub fn code(&self) -> u32 {
        match self {
            RuntimeError::OutOfRange { .. } => ERR_OUT_OF_RANGE,
            RuntimeError::Underflow => ERR_UNDERFLOW,
            RuntimeError::CompilerLogic(_) => ERR_COMPILER_LOGIC,
            RuntimeError::DanglingHandle { .. } => ERR_DANGLING_HANDLE,
            RuntimeError::HandleSpaceExhausted { .. } => ERR_HANDLE_SPACE,
            RuntimeError::Connection { .. } | RuntimeError::MissingDatabases { .. } => {
                ERR_CONNECTION
            }
            RuntimeError::Statement { .. } => ERR_STATEMENT,
        }
    }

    /// Invariant violations detected by the runtime itself, as opposed to
    /// failures reported by the relational engine.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            RuntimeError::OutOfRange { .. }
                | RuntimeError::Underflow
                | RuntimeError::CompilerLogic(_)
                | RuntimeError::DanglingHandle { .. }
        )
    }
}

/// Report `err` and terminate the process. Generated code routes every
/// runtime failure through here; nothing unwinds past this point.
pub fn trap(err: &RuntimeError) -> ! {
    tracing::error!(code = err.code(), "{err}");
    eprintln!("{err}");
    std::process::exit(1)
}

pub fn or_trap<T>(res: Result<T>) -> T {
    match res {
        Ok(v) => v,
        Err(err) => trap(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_runtime_wording() {
        let e = RuntimeError::OutOfRange { index: 3, len: 2 };
        assert_eq!(e.to_string(), "array element index out of bounds (3 >= 2)");
        let e = RuntimeError::compiler_logic("unexpected parameter marker in scalar bind");
        assert_eq!(
            e.to_string(),
            "compiler logic error: unexpected parameter marker in scalar bind"
        );
    }

    #[test]
    fn codes_and_classes() {
        assert_eq!(RuntimeError::Underflow.code(), ERR_UNDERFLOW);
        assert!(RuntimeError::Underflow.is_invariant_violation());
        let e = RuntimeError::Statement {
            op: "step",
            rc: 1,
            message: "no such table: t".to_string(),
        };
        assert_eq!(e.code(), ERR_STATEMENT);
        assert!(!e.is_invariant_violation());
    }
}
