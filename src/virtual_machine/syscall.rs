//! Syscall table and the standard handlers.
//!
//! The syscall number is taken from RAX, arguments from RBX, RCX and RDX, and
//! results are written back to RAX. Descriptor arguments are validated in a
//! fixed order: index in range (`OutOfBounds`), slot open (`FDNotInUse`), then
//! the host operation (`IOFailure`). Calls that mutate the host filesystem are
//! additionally gated on [`ProcessorConfig::fs_enabled`](super::processor::ProcessorConfig).

use crate::debug;
use crate::virtual_machine::errors::ErrorCode;
use crate::virtual_machine::processor::Processor;
use crate::virtual_machine::processor::registers::{RAX, RBX, RCX, RDX};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, SeekFrom};

pub type SyscallHandler = fn(&mut Processor) -> Result<(), ErrorCode>;

pub const SYS_READ: u64 = 0;
pub const SYS_WRITE: u64 = 1;
pub const SYS_OPEN: u64 = 2;
pub const SYS_CLOSE: u64 = 3;
pub const SYS_FLUSH: u64 = 4;
pub const SYS_SEEK: u64 = 5;
pub const SYS_TELL: u64 = 6;
pub const SYS_MOVE: u64 = 7;
pub const SYS_REMOVE: u64 = 8;
pub const SYS_MKDIR: u64 = 9;
pub const SYS_RMDIR: u64 = 10;
pub const SYS_EXIT: u64 = 11;

/// `open` flag bits (RCX).
pub mod open_flags {
    pub const READ: u64 = 1;
    pub const WRITE: u64 = 2;
    pub const APPEND: u64 = 4;
    pub const TRUNCATE: u64 = 8;
    pub const CREATE: u64 = 16;
    pub const CREATE_NEW: u64 = 32;
}

/// Maps syscall numbers to handlers.
///
/// Variants are built by composition rather than by overriding:
///
/// ```ignore
/// let table = SyscallTable::standard()
///     .without(SYS_REMOVE)
///     .with(64, my_handler);
/// ```
#[derive(Clone)]
pub struct SyscallTable {
    handlers: HashMap<u64, SyscallHandler>,
}

impl SyscallTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        Self::empty()
            .with(SYS_READ, sys_read)
            .with(SYS_WRITE, sys_write)
            .with(SYS_OPEN, sys_open)
            .with(SYS_CLOSE, sys_close)
            .with(SYS_FLUSH, sys_flush)
            .with(SYS_SEEK, sys_seek)
            .with(SYS_TELL, sys_tell)
            .with(SYS_MOVE, sys_move)
            .with(SYS_REMOVE, sys_remove)
            .with(SYS_MKDIR, sys_mkdir)
            .with(SYS_RMDIR, sys_rmdir)
            .with(SYS_EXIT, sys_exit)
    }

    pub fn with(mut self, number: u64, handler: SyscallHandler) -> Self {
        self.handlers.insert(number, handler);
        self
    }

    pub fn without(mut self, number: u64) -> Self {
        self.handlers.remove(&number);
        self
    }

    pub fn get(&self, number: u64) -> Option<SyscallHandler> {
        self.handlers.get(&number).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn arg(p: &Processor, reg: u8) -> u64 {
    p.registers().get(reg)
}

fn host_failure(op: &str, err: io::Error) -> ErrorCode {
    debug!("syscall {} failed on the host: {}", op, err);
    ErrorCode::IOFailure
}

fn require_fs(p: &Processor) -> Result<(), ErrorCode> {
    if p.config().fs_enabled {
        Ok(())
    } else {
        Err(ErrorCode::FSDisabled)
    }
}

/// read(fd, buf, len) -> bytes read
///
/// An interactive descriptor with nothing to deliver suspends the process and
/// rewinds RIP so the same `SYSCALL` runs again after resumption.
pub fn sys_read(p: &mut Processor) -> Result<(), ErrorCode> {
    let (index, buf, len) = (arg(p, RBX), arg(p, RCX), arg(p, RDX));
    let (memory, fds) = p.io_parts();
    let fd = fds.get_open(index)?;
    let dst = memory.writable_bytes(buf, len)?;
    let n = fd.read(dst)?;
    if n == 0 && len > 0 && fd.is_interactive() {
        p.suspend_read();
        return Ok(());
    }
    p.registers_mut().set(RAX, n as u64);
    Ok(())
}

/// write(fd, buf, len) -> bytes written
pub fn sys_write(p: &mut Processor) -> Result<(), ErrorCode> {
    let (index, buf, len) = (arg(p, RBX), arg(p, RCX), arg(p, RDX));
    let (memory, fds) = p.io_parts();
    let fd = fds.get_open(index)?;
    fd.write(memory.read_bytes(buf, len)?)?;
    p.registers_mut().set(RAX, len);
    Ok(())
}

/// open(path, flags) -> fd
pub fn sys_open(p: &mut Processor) -> Result<(), ErrorCode> {
    require_fs(p)?;
    let (path_ptr, flags) = (arg(p, RBX), arg(p, RCX));
    let (memory, fds) = p.io_parts();
    let slot = fds.first_free().ok_or(ErrorCode::InsufficientFDs)?;
    let path = memory.read_cstring(path_ptr)?;

    let file = OpenOptions::new()
        .read(flags & open_flags::READ != 0)
        .write(flags & open_flags::WRITE != 0)
        .append(flags & open_flags::APPEND != 0)
        .truncate(flags & open_flags::TRUNCATE != 0)
        .create(flags & open_flags::CREATE != 0)
        .create_new(flags & open_flags::CREATE_NEW != 0)
        .open(&path)
        .map_err(|e| host_failure("open", e))?;
    fds.install(slot, file, false)?;
    debug!("opened {} as fd {}", path, slot);
    p.registers_mut().set(RAX, slot as u64);
    Ok(())
}

/// close(fd)
pub fn sys_close(p: &mut Processor) -> Result<(), ErrorCode> {
    let index = arg(p, RBX);
    p.io_parts().1.close(index)
}

/// flush(fd)
pub fn sys_flush(p: &mut Processor) -> Result<(), ErrorCode> {
    let index = arg(p, RBX);
    p.io_parts().1.get_open(index)?.flush()
}

/// seek(fd, offset, origin) -> new position
pub fn sys_seek(p: &mut Processor) -> Result<(), ErrorCode> {
    let (index, offset, origin) = (arg(p, RBX), arg(p, RCX) as i64, arg(p, RDX));
    let fd = p.io_parts().1.get_open(index)?;
    let pos = match origin {
        0 => SeekFrom::Start(u64::try_from(offset).map_err(|_| ErrorCode::IOFailure)?),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Err(ErrorCode::UndefinedBehavior),
    };
    let position = fd.seek(pos)?;
    p.registers_mut().set(RAX, position);
    Ok(())
}

/// tell(fd) -> position
pub fn sys_tell(p: &mut Processor) -> Result<(), ErrorCode> {
    let index = arg(p, RBX);
    let position = p.io_parts().1.get_open(index)?.seek(SeekFrom::Current(0))?;
    p.registers_mut().set(RAX, position);
    Ok(())
}

/// move(from, to)
pub fn sys_move(p: &mut Processor) -> Result<(), ErrorCode> {
    require_fs(p)?;
    let from = p.memory().read_cstring(arg(p, RBX))?;
    let to = p.memory().read_cstring(arg(p, RCX))?;
    fs::rename(&from, &to).map_err(|e| host_failure("move", e))
}

/// remove(path)
pub fn sys_remove(p: &mut Processor) -> Result<(), ErrorCode> {
    require_fs(p)?;
    let path = p.memory().read_cstring(arg(p, RBX))?;
    fs::remove_file(&path).map_err(|e| host_failure("remove", e))
}

/// mkdir(path)
pub fn sys_mkdir(p: &mut Processor) -> Result<(), ErrorCode> {
    require_fs(p)?;
    let path = p.memory().read_cstring(arg(p, RBX))?;
    fs::create_dir(&path).map_err(|e| host_failure("mkdir", e))
}

/// rmdir(path)
pub fn sys_rmdir(p: &mut Processor) -> Result<(), ErrorCode> {
    require_fs(p)?;
    let path = p.memory().read_cstring(arg(p, RBX))?;
    fs::remove_dir(&path).map_err(|e| host_failure("rmdir", e))
}

/// exit(code): EBX is the process return value.
pub fn sys_exit(p: &mut Processor) -> Result<(), ErrorCode> {
    let code = arg(p, RBX) as u32 as i32;
    p.exit(code);
    Ok(())
}
