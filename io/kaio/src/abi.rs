//! Kernel AIO control block layout.
//!
//! Mirrors `include/uapi/linux/aio_abi.h`. Both engines consume the same
//! control blocks so a request is encoded exactly once, at submission.

/// `IOCB_CMD_PREAD`
pub const IOCB_CMD_PREAD: u16 = 0;
/// `IOCB_CMD_PWRITE`
pub const IOCB_CMD_PWRITE: u16 = 1;
/// `IOCB_CMD_FSYNC`
pub const IOCB_CMD_FSYNC: u16 = 2;
/// `IOCB_CMD_FDSYNC`
pub const IOCB_CMD_FDSYNC: u16 = 3;

/// Set in `aio_flags` when `aio_resfd` names an eventfd to signal.
pub const IOCB_FLAG_RESFD: u32 = 1 << 0;
/// Set in `aio_flags` when `aio_reqprio` is meaningful.
pub const IOCB_FLAG_IOPRIO: u32 = 1 << 1;

/// `struct iocb`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Iocb {
    pub aio_data: u64,
    #[cfg(target_endian = "little")]
    pub aio_key: u32,
    #[cfg(target_endian = "little")]
    pub aio_rw_flags: i32,
    #[cfg(target_endian = "big")]
    pub aio_rw_flags: i32,
    #[cfg(target_endian = "big")]
    pub aio_key: u32,
    pub aio_lio_opcode: u16,
    pub aio_reqprio: i16,
    pub aio_fildes: u32,
    pub aio_buf: u64,
    pub aio_nbytes: u64,
    pub aio_offset: i64,
    pub aio_reserved2: u64,
    pub aio_flags: u32,
    pub aio_resfd: u32,
}

/// `struct io_event`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoEvent {
    /// The `aio_data` of the originating control block.
    pub data: u64,
    /// Address of the originating control block.
    pub obj: u64,
    /// Bytes transferred, or a negative errno.
    pub res: i64,
    pub res2: i64,
}
