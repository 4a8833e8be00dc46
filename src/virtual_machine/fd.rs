//! File descriptor table and the host streams it wraps.
//!
//! Each slot owns at most one host stream. Closing takes the stream out of the
//! slot, so a stream is dropped exactly once no matter how many close paths
//! (syscall, process exit, engine teardown) run afterwards.

use crate::debug;
use crate::virtual_machine::errors::ErrorCode;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const FD_COUNT: usize = 16;

/// A host byte stream a sandboxed process can hold a descriptor to.
pub trait HostStream: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
    fn flush(&mut self) -> io::Result<()>;

    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("stream does not support {what}"))
}

impl HostStream for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

/// Read-only adapter over any [`Read`] (e.g. `std::io::Stdin`).
pub struct InputStream<R>(pub R);

impl<R: Read + Send> HostStream for InputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("writing"))
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(unsupported("seeking"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write-only adapter over any [`Write`] (e.g. `std::io::Stdout`).
pub struct OutputStream<W>(pub W);

impl<W: Write + Send> HostStream for OutputStream<W> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("reading"))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(unsupported("seeking"))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Shared in-memory byte queue.
///
/// Clones share the same queue: the host keeps one handle to feed input or
/// collect output while the descriptor table owns another. Reading an empty
/// pipe returns 0, which an interactive descriptor turns into a suspension.
#[derive(Clone, Default)]
pub struct Pipe {
    queue: Arc<Mutex<VecDeque<u8>>>,
}

impl Pipe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends bytes for the next reads.
    pub fn push(&self, data: &[u8]) {
        self.lock().extend(data);
    }

    /// Removes and returns everything currently queued.
    pub fn take_all(&self) -> Vec<u8> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl HostStream for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.lock();
        let n = buf.len().min(queue.len());
        for (dst, src) in buf.iter_mut().zip(queue.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend(buf);
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(unsupported("seeking"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn io_failure(op: &str, err: io::Error) -> ErrorCode {
    debug!("host {} failed: {}", op, err);
    ErrorCode::IOFailure
}

/// One descriptor slot.
#[derive(Default)]
pub struct FileDescriptor {
    stream: Option<Box<dyn HostStream>>,
    interactive: bool,
}

impl FileDescriptor {
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn set_interactive(&mut self, interactive: bool) {
        self.interactive = interactive;
    }

    /// Installs `stream`, closing whatever the slot held before.
    pub fn open(&mut self, stream: Box<dyn HostStream>, interactive: bool) {
        self.close();
        self.stream = Some(stream);
        self.interactive = interactive;
    }

    /// Flushes and drops the stream. Returns false if the slot was already free.
    pub fn close(&mut self) -> bool {
        self.interactive = false;
        match self.stream.take() {
            Some(mut stream) => {
                if let Err(err) = stream.flush() {
                    debug!("flush on close failed: {}", err);
                }
                true
            }
            None => false,
        }
    }

    fn stream(&mut self) -> Result<&mut Box<dyn HostStream>, ErrorCode> {
        self.stream.as_mut().ok_or(ErrorCode::FDNotInUse)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorCode> {
        self.stream()?.read(buf).map_err(|e| io_failure("read", e))
    }

    /// Writes all of `buf`.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), ErrorCode> {
        self.stream()?
            .write_all(buf)
            .map_err(|e| io_failure("write", e))
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, ErrorCode> {
        self.stream()?.seek(pos).map_err(|e| io_failure("seek", e))
    }

    pub fn flush(&mut self) -> Result<(), ErrorCode> {
        self.stream()?.flush().map_err(|e| io_failure("flush", e))
    }
}

/// Fixed-size descriptor table. Dropping it closes every open slot.
pub struct FdTable {
    slots: [FileDescriptor; FD_COUNT],
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| FileDescriptor::default()),
        }
    }

    /// The slot at `index`, open or not.
    pub fn get(&mut self, index: u64) -> Result<&mut FileDescriptor, ErrorCode> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(ErrorCode::OutOfBounds)
    }

    /// The slot at `index`, which must be open.
    pub fn get_open(&mut self, index: u64) -> Result<&mut FileDescriptor, ErrorCode> {
        let fd = self.get(index)?;
        if !fd.is_open() {
            return Err(ErrorCode::FDNotInUse);
        }
        Ok(fd)
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(FileDescriptor::is_open)
    }

    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|fd| !fd.is_open())
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|fd| fd.is_open()).count()
    }

    /// Puts `stream` in slot `index`, replacing (and closing) any previous stream.
    pub fn install<S: HostStream + 'static>(
        &mut self,
        index: usize,
        stream: S,
        interactive: bool,
    ) -> Result<(), ErrorCode> {
        self.get(index as u64)?.open(Box::new(stream), interactive);
        Ok(())
    }

    pub fn set_interactive(&mut self, index: usize, interactive: bool) -> Result<(), ErrorCode> {
        self.get_open(index as u64)?.set_interactive(interactive);
        Ok(())
    }

    pub fn close(&mut self, index: u64) -> Result<(), ErrorCode> {
        self.get_open(index)?.close();
        Ok(())
    }

    pub fn close_all(&mut self) {
        for fd in self.slots.iter_mut() {
            fd.close();
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FdTable {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how many times it was dropped.
    struct Tracked(Arc<AtomicUsize>);

    impl HostStream for Tracked {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn pipe_is_fifo_and_shared() {
        let pipe = Pipe::new();
        let mut reader = pipe.clone();
        pipe.push(b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(HostStream::read(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(pipe.len(), 1);
        assert_eq!(HostStream::read(&mut reader, &mut buf).unwrap(), 1);
        assert_eq!(HostStream::read(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn pipe_collects_writes() {
        let pipe = Pipe::new();
        let mut writer = pipe.clone();
        HostStream::write_all(&mut writer, b"out").unwrap();
        assert_eq!(pipe.take_all(), b"out");
        assert!(pipe.is_empty());
    }

    #[test]
    fn adapters_reject_the_wrong_direction() {
        let mut input = InputStream(&b"data"[..]);
        assert!(HostStream::write(&mut input, b"x").is_err());
        let mut output = OutputStream(Vec::new());
        assert!(HostStream::read(&mut output, &mut [0u8; 1]).is_err());
        HostStream::write_all(&mut output, b"ok").unwrap();
        assert_eq!(output.0, b"ok");
    }

    #[test]
    fn index_checks() {
        let mut table = FdTable::new();
        assert!(matches!(table.get(FD_COUNT as u64), Err(ErrorCode::OutOfBounds)));
        assert!(matches!(table.get(u64::MAX), Err(ErrorCode::OutOfBounds)));
        assert!(matches!(table.get_open(0), Err(ErrorCode::FDNotInUse)));
        assert_eq!(table.close(3), Err(ErrorCode::FDNotInUse));
        assert_eq!(table.install(FD_COUNT, Pipe::new(), false), Err(ErrorCode::OutOfBounds));
    }

    #[test]
    fn first_free_skips_open_slots() {
        let mut table = FdTable::new();
        table.install(0, Pipe::new(), true).unwrap();
        table.install(1, Pipe::new(), false).unwrap();
        assert_eq!(table.first_free(), Some(2));
        assert_eq!(table.open_count(), 2);
        assert!(table.get_open(0).unwrap().is_interactive());

        for i in 2..FD_COUNT {
            table.install(i, Pipe::new(), false).unwrap();
        }
        assert_eq!(table.first_free(), None);
    }

    #[test]
    fn close_is_idempotent() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut table = FdTable::new();
        table.install(4, Tracked(drops.clone()), true).unwrap();
        table.close(4).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(table.close(4), Err(ErrorCode::FDNotInUse));
        table.close_all();
        drop(table);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_open_streams() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut table = FdTable::new();
        table.install(0, Tracked(drops.clone()), false).unwrap();
        table.install(9, Tracked(drops.clone()), false).unwrap();
        drop(table);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn install_replaces_and_closes_previous() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut table = FdTable::new();
        table.install(2, Tracked(drops.clone()), false).unwrap();
        table.install(2, Pipe::new(), false).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(table.is_open(2));
    }

    #[test]
    fn host_errors_map_to_io_failure() {
        let mut table = FdTable::new();
        table.install(1, OutputStream(Vec::new()), false).unwrap();
        let fd = table.get_open(1).unwrap();
        assert_eq!(fd.read(&mut [0u8; 4]), Err(ErrorCode::IOFailure));
        assert_eq!(fd.seek(SeekFrom::Start(0)), Err(ErrorCode::IOFailure));
        assert!(fd.write(b"fine").is_ok());
    }
}
