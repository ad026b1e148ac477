//! Request descriptors and identities.

use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::abi::{self, Iocb};
use crate::notifier::Notifier;

/// Shared handle to the file a request operates on.
pub type Target = Arc<dyn AsRawFd + Send + Sync>;

/// Operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Positioned read into the request buffer.
    Read,
    /// Positioned write of the request buffer.
    Write,
    /// Flush data and metadata.
    Fsync,
    /// Flush data only.
    Fdsync,
}

impl Opcode {
    pub(crate) fn as_raw(self) -> u16 {
        match self {
            Opcode::Read => abi::IOCB_CMD_PREAD,
            Opcode::Write => abi::IOCB_CMD_PWRITE,
            Opcode::Fsync => abi::IOCB_CMD_FSYNC,
            Opcode::Fdsync => abi::IOCB_CMD_FDSYNC,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Read => write!(f, "read"),
            Opcode::Write => write!(f, "write"),
            Opcode::Fsync => write!(f, "fsync"),
            Opcode::Fdsync => write!(f, "fdsync"),
        }
    }
}

/// Per-request `RWF_*` flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RwFlags(i32);

impl RwFlags {
    pub const NONE: RwFlags = RwFlags(0);
    /// High priority (polled) I/O.
    pub const HIPRI: RwFlags = RwFlags(libc::RWF_HIPRI);
    /// Per-write `O_DSYNC`.
    pub const DSYNC: RwFlags = RwFlags(libc::RWF_DSYNC);
    /// Per-write `O_SYNC`.
    pub const SYNC: RwFlags = RwFlags(libc::RWF_SYNC);
    /// Fail with `EAGAIN` instead of blocking.
    pub const NOWAIT: RwFlags = RwFlags(libc::RWF_NOWAIT);
    /// Per-write `O_APPEND`.
    pub const APPEND: RwFlags = RwFlags(libc::RWF_APPEND);

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn contains(&self, other: RwFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RwFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        RwFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for RwFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One asynchronous I/O operation.
///
/// Built by the caller, moved into a [`Context`](crate::Context) when
/// accepted, and handed back inside the
/// [`CompletionEvent`](crate::CompletionEvent) that resolves it.
pub struct Request {
    target: Target,
    opcode: Opcode,
    offset: u64,
    buf: Vec<u8>,
    tag: u64,
    priority: Option<i16>,
    rw_flags: RwFlags,
    notifier: Option<Arc<Notifier>>,
}

impl Request {
    fn new(target: Target, opcode: Opcode, offset: u64, buf: Vec<u8>) -> Self {
        Self {
            target,
            opcode,
            offset,
            buf,
            tag: 0,
            priority: None,
            rw_flags: RwFlags::NONE,
            notifier: None,
        }
    }

    /// Read `len` bytes at `offset` into a zeroed buffer.
    pub fn read<T: AsRawFd + Send + Sync + 'static>(target: Arc<T>, offset: u64, len: usize) -> Self {
        Self::new(target, Opcode::Read, offset, vec![0; len])
    }

    /// Read into a caller-provided buffer; its length is the read length.
    pub fn read_into<T: AsRawFd + Send + Sync + 'static>(
        target: Arc<T>,
        offset: u64,
        buf: Vec<u8>,
    ) -> Self {
        Self::new(target, Opcode::Read, offset, buf)
    }

    /// Write all of `buf` at `offset`.
    pub fn write<T: AsRawFd + Send + Sync + 'static>(target: Arc<T>, offset: u64, buf: Vec<u8>) -> Self {
        Self::new(target, Opcode::Write, offset, buf)
    }

    /// Flush data and metadata of `target`.
    pub fn fsync<T: AsRawFd + Send + Sync + 'static>(target: Arc<T>) -> Self {
        Self::new(target, Opcode::Fsync, 0, Vec::new())
    }

    /// Flush data of `target`.
    pub fn fdsync<T: AsRawFd + Send + Sync + 'static>(target: Arc<T>) -> Self {
        Self::new(target, Opcode::Fdsync, 0, Vec::new())
    }

    /// Set the caller tag echoed back in the completion event.
    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = tag;
        self
    }

    /// Set the request priority (`aio_reqprio`).
    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set per-request `RWF_*` flags.
    pub fn with_rw_flags(mut self, flags: RwFlags) -> Self {
        self.rw_flags = flags;
        self
    }

    /// Signal `notifier` when this request completes.
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub(crate) fn set_notifier(&mut self, notifier: Option<Arc<Notifier>>) {
        self.notifier = notifier;
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn priority(&self) -> Option<i16> {
        self.priority
    }

    pub fn rw_flags(&self) -> RwFlags {
        self.rw_flags
    }

    pub fn notifier(&self) -> Option<&Arc<Notifier>> {
        self.notifier.as_ref()
    }

    pub fn target_fd(&self) -> RawFd {
        self.target.as_raw_fd()
    }

    /// The request buffer.
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    /// Take the buffer back, dropping the descriptor.
    pub fn into_buf(self) -> Vec<u8> {
        self.buf
    }

    /// Encode into a kernel control block carrying `data` as `aio_data`.
    ///
    /// The buffer pointer stays valid for as long as `self` is neither
    /// dropped nor mutated, which the in-flight table guarantees.
    pub(crate) fn to_iocb(&mut self, data: u64) -> Iocb {
        let mut iocb = Iocb {
            aio_data: data,
            aio_lio_opcode: self.opcode.as_raw(),
            aio_fildes: self.target.as_raw_fd() as u32,
            ..Iocb::default()
        };
        // The kernel rejects sync blocks carrying any of these.
        if matches!(self.opcode, Opcode::Read | Opcode::Write) {
            iocb.aio_buf = self.buf.as_mut_ptr() as u64;
            iocb.aio_nbytes = self.buf.len() as u64;
            iocb.aio_offset = self.offset as i64;
            iocb.aio_rw_flags = self.rw_flags.bits();
        }
        if let Some(priority) = self.priority {
            iocb.aio_flags |= abi::IOCB_FLAG_IOPRIO;
            iocb.aio_reqprio = priority;
        }
        if let Some(ref notifier) = self.notifier {
            iocb.aio_flags |= abi::IOCB_FLAG_RESFD;
            iocb.aio_resfd = notifier.as_raw_fd() as u32;
        }
        iocb
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("fd", &self.target.as_raw_fd())
            .field("opcode", &self.opcode)
            .field("offset", &self.offset)
            .field("len", &self.buf.len())
            .field("tag", &self.tag)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

/// Identity of a submitted request.
///
/// Valid for cancellation against the context that issued it. Stale ids (the
/// request already resolved) are recognised through the generation, which a
/// context never reissues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    pub(crate) context: u32,
    pub(crate) index: u32,
    pub(crate) generation: u64,
}

impl RequestId {
    /// Id of the context that issued this request.
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Value carried in the kernel control block's `aio_data`: the slot
    /// index alone.
    pub(crate) fn encode(&self) -> u64 {
        self.index as u64
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.context, self.index, self.generation)
    }
}
