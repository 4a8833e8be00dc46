use vproc_derive::Error;

/// Fault that ends a sandboxed process.
///
/// Every fallible step of the processor returns one of these; the first fault
/// recorded for a process is kept and later ones are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCode {
    /// Memory access outside the address space, or a descriptor index outside
    /// the descriptor table.
    #[error("out of bounds")]
    OutOfBounds,
    /// Write below the readonly barrier, or instruction fetch at or above the
    /// executable barrier.
    #[error("access violation")]
    AccessViolation,
    /// Stack pointer moved below the stack barrier.
    #[error("stack overflow")]
    StackOverflow,
    /// Unknown opcode, illegal operand encoding or invalid FPU stack transition.
    #[error("undefined behavior")]
    UndefinedBehavior,
    /// Explicit halt instruction.
    #[error("abort")]
    Abort,
    /// Syscall number with no registered handler.
    #[error("unhandled syscall")]
    UnhandledSyscall,
    /// Descriptor slot is not open.
    #[error("file descriptor not in use")]
    FDNotInUse,
    /// Filesystem-mutating syscall while the filesystem capability is off.
    #[error("filesystem access disabled")]
    FSDisabled,
    /// No free descriptor slot for `open`.
    #[error("insufficient file descriptors")]
    InsufficientFDs,
    /// Host stream or filesystem operation failed.
    #[error("host i/o failure")]
    IOFailure,
}

/// Errors raised while reading or writing an executable image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutableError {
    /// The image does not start with the expected magic literal.
    #[error("not an executable image (bad magic)")]
    WrongMagic,
    /// The image was produced for a different format version.
    #[error("unsupported executable version {found} (expected {expected})")]
    WrongVersion { expected: u64, found: u64 },
    /// Header or size information is inconsistent.
    #[error("executable format corrupt: {0}")]
    FormatCorrupt(String),
    /// Attempted to save an image with no content.
    #[error("executable is empty")]
    Empty,
    /// Host filesystem error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecutableError {
    fn from(err: std::io::Error) -> Self {
        ExecutableError::Io(err.to_string())
    }
}

/// Errors raised by process bootstrap. The processor is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    /// Segments plus stack reserve do not fit the addressable range.
    #[error("address space of {requested} bytes exceeds the limit of {limit} bytes")]
    AddressSpaceTooLarge { requested: u128, limit: u64 },
    /// Argument strings and pointers do not fit in the stack reserve.
    #[error("arguments need {required} bytes of stack but only {available} are reserved")]
    ArgumentsTooLarge { required: u64, available: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_messages() {
        assert_eq!(ErrorCode::OutOfBounds.to_string(), "out of bounds");
        assert_eq!(ErrorCode::FSDisabled.to_string(), "filesystem access disabled");
    }

    #[test]
    fn executable_error_messages() {
        let err = ExecutableError::WrongVersion {
            expected: 1,
            found: 7,
        };
        assert_eq!(err.to_string(), "unsupported executable version 7 (expected 1)");
        assert_eq!(
            ExecutableError::FormatCorrupt("truncated".into()).to_string(),
            "executable format corrupt: truncated"
        );
    }

    #[test]
    fn bootstrap_error_messages() {
        let err = BootstrapError::ArgumentsTooLarge {
            required: 64,
            available: 8,
        };
        assert_eq!(
            err.to_string(),
            "arguments need 64 bytes of stack but only 8 are reserved"
        );
    }
}
