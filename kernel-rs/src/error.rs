use core::fmt;

/// Kernel error codes surfaced at the file system facade and the system
/// call boundary. Internal-consistency violations are not represented here;
/// those panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Path, handle or sector not bound.
    NotFound,
    /// Name collision on create/mkdir.
    AlreadyExists,
    /// Bitmap exhausted, or the indirect map cannot reach that far.
    NoSpace,
    /// The object is open elsewhere; the operation was deferred.
    Busy,
    /// A system call handle that names nothing.
    BadHandle,
    /// A path that cannot be parsed or exceeds the name limits.
    BadPath,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::NotFound => "not found",
            KernelError::AlreadyExists => "already exists",
            KernelError::NoSpace => "no space",
            KernelError::Busy => "busy",
            KernelError::BadHandle => "bad handle",
            KernelError::BadPath => "bad path",
        };
        write!(f, "{}", msg)
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
