use std::io;

/// Errors returned by kaio contexts.
///
/// Kernel results are mapped through [`Error::from_errno`], which is total and
/// stable: the same code always lands in the same variant, so callers can key
/// retry policy off the variant alone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed parameters, or a request descriptor the kernel rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Queue or system limits reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// The request is unknown to this context.
    #[error("request not found")]
    NotFound,
    /// The kernel refused the operation for this caller.
    #[error("permission denied")]
    PermissionDenied,
    /// Transient; safe to retry.
    #[error("interrupted")]
    Interrupted,
    /// `destroy` was called with requests still in flight.
    #[error("context still has {0} requests in flight")]
    StillBusy(usize),
    /// Any kernel code without a dedicated bucket. The raw code is kept.
    #[error("unknown kernel error {0}")]
    Unknown(i32),
}

impl Error {
    /// Translate a kernel result code.
    ///
    /// Accepts either a negative kernel return (`-EINVAL`) or a positive errno
    /// (`EINVAL`). Zero and codes without a bucket become [`Error::Unknown`]
    /// carrying `code` unchanged.
    pub fn from_errno(code: i32) -> Self {
        let errno = match code.checked_abs() {
            Some(errno) => errno,
            None => return Error::Unknown(code),
        };
        match errno {
            libc::EINVAL => Error::InvalidArgument("EINVAL"),
            libc::EFAULT => Error::InvalidArgument("EFAULT: bad address"),
            libc::EBADF => Error::InvalidArgument("EBADF: bad file descriptor"),
            libc::ENOSYS => Error::InvalidArgument("ENOSYS: not implemented"),
            libc::EOPNOTSUPP => Error::InvalidArgument("EOPNOTSUPP: operation not supported"),
            libc::ESPIPE => Error::InvalidArgument("ESPIPE: target is not seekable"),
            libc::EISDIR => Error::InvalidArgument("EISDIR: target is a directory"),
            libc::EOVERFLOW => Error::InvalidArgument("EOVERFLOW: offset out of range"),
            libc::EAGAIN => Error::ResourceExhausted("EAGAIN"),
            libc::ENOMEM => Error::ResourceExhausted("ENOMEM: out of memory"),
            libc::ENOSPC => Error::ResourceExhausted("ENOSPC: no space left"),
            libc::EMFILE => Error::ResourceExhausted("EMFILE: too many open files"),
            libc::ENFILE => Error::ResourceExhausted("ENFILE: file table full"),
            libc::EDQUOT => Error::ResourceExhausted("EDQUOT: quota exceeded"),
            libc::ENOENT | libc::ESRCH | libc::ENXIO => Error::NotFound,
            libc::EPERM | libc::EACCES | libc::EROFS => Error::PermissionDenied,
            libc::EINTR => Error::Interrupted,
            _ => Error::Unknown(code),
        }
    }

    /// Whether retrying the same call may succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Interrupted | Error::ResourceExhausted(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if let Some(errno) = e.raw_os_error() {
            return Error::from_errno(errno);
        }
        match e.kind() {
            io::ErrorKind::InvalidInput => Error::InvalidArgument("invalid input"),
            io::ErrorKind::OutOfMemory => Error::ResourceExhausted("out of memory"),
            io::ErrorKind::NotFound => Error::NotFound,
            io::ErrorKind::PermissionDenied => Error::PermissionDenied,
            io::ErrorKind::Interrupted => Error::Interrupted,
            _ => Error::Unknown(0),
        }
    }
}

/// Result alias used throughout kaio.
pub type Result<T> = std::result::Result<T, Error>;

/// A positive errno reported by an engine, before translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Errno(pub i32);

impl Errno {
    pub(crate) fn last() -> Self {
        Errno(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error::from_errno(e.0)
    }
}
