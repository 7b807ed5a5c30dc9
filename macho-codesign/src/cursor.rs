// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded random-access readers and growable writers over binary data.
//!
//! [ByteCursor] provides position-tracked reads of primitive integers with a
//! configurable byte order over a window of some backing storage (a file or an
//! in-memory buffer). Cursors can be narrowed with [ByteCursor::slice], which
//! produces an independent cursor sharing the same backing storage. The storage
//! itself is guarded by a mutex, so every read is a seek followed by a read
//! under a single lock.
//!
//! [BlobWriter] is the companion for producing data. It writes primitive
//! values in a fixed byte order and supports reserving fields that are
//! backpatched once their value is known.

use {
    crate::error::AppleCodesignError,
    scroll::{ctx::TryFromCtx, Endian, IOwrite, Pread},
    std::{
        fs::{File, OpenOptions},
        io::{Read, Seek, SeekFrom, Write},
        path::Path,
        sync::{Arc, Mutex, MutexGuard},
    },
};

enum Backing {
    File(File),
    Memory(Vec<u8>),
}

impl Backing {
    fn len(&mut self) -> std::io::Result<u64> {
        match self {
            Self::File(fh) => Ok(fh.metadata()?.len()),
            Self::Memory(data) => Ok(data.len() as u64),
        }
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Self::File(fh) => {
                fh.seek(SeekFrom::Start(offset))?;
                fh.read_exact(buf)
            }
            Self::Memory(data) => {
                let start = offset as usize;
                let source = data.get(start..start + buf.len()).ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "read past end")
                })?;
                buf.copy_from_slice(source);
                Ok(())
            }
        }
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::File(fh) => {
                fh.seek(SeekFrom::Start(offset))?;
                fh.write_all(buf)?;
                fh.flush()
            }
            Self::Memory(data) => {
                let start = offset as usize;
                if data.len() < start + buf.len() {
                    data.resize(start + buf.len(), 0);
                }
                data[start..start + buf.len()].copy_from_slice(buf);
                Ok(())
            }
        }
    }
}

/// A bounded, position-tracked reader over shared backing storage.
///
/// Offsets passed to methods are relative to the start of the cursor's
/// window. Reads that would cross the window's limit fail with
/// [AppleCodesignError::CursorOutOfBounds].
#[derive(Clone)]
pub struct ByteCursor {
    backing: Arc<Mutex<Backing>>,
    base: u64,
    limit: u64,
    position: u64,
    endian: Endian,
}

impl std::fmt::Debug for ByteCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteCursor")
            .field("base", &self.base)
            .field("limit", &self.limit)
            .field("position", &self.position)
            .field("endian", &self.endian)
            .finish()
    }
}

impl ByteCursor {
    /// Open a file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppleCodesignError> {
        Self::from_file(File::open(path.as_ref())?)
    }

    /// Open a file for reading and in-place writing.
    pub fn open_writable(path: impl AsRef<Path>) -> Result<Self, AppleCodesignError> {
        Self::from_file(OpenOptions::new().read(true).write(true).open(path.as_ref())?)
    }

    fn from_file(fh: File) -> Result<Self, AppleCodesignError> {
        let mut backing = Backing::File(fh);
        let limit = backing.len()?;

        Ok(Self {
            backing: Arc::new(Mutex::new(backing)),
            base: 0,
            limit,
            position: 0,
            endian: Endian::Big,
        })
    }

    /// Construct an instance over an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let limit = data.len() as u64;

        Self {
            backing: Arc::new(Mutex::new(Backing::Memory(data))),
            base: 0,
            limit,
            position: 0,
            endian: Endian::Big,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Backing>, AppleCodesignError> {
        self.backing.lock().map_err(|_| {
            AppleCodesignError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "backing storage lock poisoned",
            ))
        })
    }

    fn check_bounds(&self, offset: u64, len: u64) -> Result<(), AppleCodesignError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.limit => Ok(()),
            _ => Err(AppleCodesignError::CursorOutOfBounds {
                offset,
                len,
                limit: self.limit,
            }),
        }
    }

    /// The byte order integers are read in.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Obtain a copy of this cursor reading in a different byte order.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Offset of this window within the backing storage.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size of the window in bytes.
    pub fn len(&self) -> u64 {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the read position. Positions up to and including the limit are allowed.
    pub fn set_position(&mut self, position: u64) -> Result<(), AppleCodesignError> {
        self.check_bounds(position, 0)?;
        self.position = position;

        Ok(())
    }

    /// Advance the read position by `count` bytes.
    pub fn skip(&mut self, count: u64) -> Result<(), AppleCodesignError> {
        self.set_position(self.position + count)
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.position
    }

    /// Read bytes at an offset without moving the read position.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), AppleCodesignError> {
        self.check_bounds(offset, buf.len() as u64)?;
        self.lock()?.read_exact_at(self.base + offset, buf)?;

        Ok(())
    }

    /// Fill a buffer from the current position and advance.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<(), AppleCodesignError> {
        self.read_at(self.position, buf)?;
        self.position += buf.len() as u64;

        Ok(())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, AppleCodesignError> {
        let mut buf = vec![0u8; count];
        self.read_into(&mut buf)?;

        Ok(buf)
    }

    fn read_value<T, const N: usize>(&mut self) -> Result<T, AppleCodesignError>
    where
        T: for<'a> TryFromCtx<'a, Endian, Error = scroll::Error>,
    {
        let mut buf = [0u8; N];
        self.read_into(&mut buf)?;

        Ok(buf[..].pread_with::<T>(0, self.endian)?)
    }

    pub fn read_u8(&mut self) -> Result<u8, AppleCodesignError> {
        self.read_value::<u8, 1>()
    }

    pub fn read_u16(&mut self) -> Result<u16, AppleCodesignError> {
        self.read_value::<u16, 2>()
    }

    pub fn read_u32(&mut self) -> Result<u32, AppleCodesignError> {
        self.read_value::<u32, 4>()
    }

    pub fn read_i32(&mut self) -> Result<i32, AppleCodesignError> {
        self.read_value::<i32, 4>()
    }

    pub fn read_u64(&mut self) -> Result<u64, AppleCodesignError> {
        self.read_value::<u64, 8>()
    }

    pub fn read_i64(&mut self) -> Result<i64, AppleCodesignError> {
        self.read_value::<i64, 8>()
    }

    /// Obtain a cursor over a sub-window of this one.
    ///
    /// The new cursor shares backing storage, starts at position 0 and inherits
    /// the byte order of this cursor.
    pub fn slice(&self, offset: u64, len: u64) -> Result<ByteCursor, AppleCodesignError> {
        self.check_bounds(offset, len)?;

        Ok(Self {
            backing: self.backing.clone(),
            base: self.base + offset,
            limit: len,
            position: 0,
            endian: self.endian,
        })
    }

    /// Read the entire window into memory.
    pub fn to_vec(&self) -> Result<Vec<u8>, AppleCodesignError> {
        let mut buf = vec![0u8; self.limit as usize];
        self.read_at(0, &mut buf)?;

        Ok(buf)
    }

    /// Overwrite bytes at an offset within the window.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), AppleCodesignError> {
        self.check_bounds(offset, data.len() as u64)?;
        self.lock()?.write_all_at(self.base + offset, data)?;

        Ok(())
    }
}

/// A growable writer with position control and backpatching.
///
/// Writing past the end extends the buffer. Moving the position backwards
/// and writing overwrites existing bytes.
pub struct BlobWriter {
    cursor: std::io::Cursor<Vec<u8>>,
    endian: Endian,
}

impl Default for BlobWriter {
    fn default() -> Self {
        Self::new(Endian::Big)
    }
}

impl BlobWriter {
    pub fn new(endian: Endian) -> Self {
        Self {
            cursor: std::io::Cursor::new(Vec::new()),
            endian,
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Move the write position, zero-extending the buffer if needed.
    pub fn set_position(&mut self, position: usize) {
        let buffer = self.cursor.get_mut();
        if buffer.len() < position {
            buffer.resize(position, 0);
        }
        self.cursor.set_position(position as u64);
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), AppleCodesignError> {
        self.cursor.iowrite_with(v, self.endian)?;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), AppleCodesignError> {
        self.cursor.iowrite_with(v, self.endian)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), AppleCodesignError> {
        self.cursor.iowrite_with(v, self.endian)?;
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), AppleCodesignError> {
        self.cursor.iowrite_with(v, self.endian)?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), AppleCodesignError> {
        self.cursor.iowrite_with(v, self.endian)?;
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), AppleCodesignError> {
        self.cursor.iowrite_with(v, self.endian)?;
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), AppleCodesignError> {
        self.cursor.write_all(data)?;
        Ok(())
    }

    /// Write `count` zero bytes.
    pub fn write_zeros(&mut self, count: usize) -> Result<(), AppleCodesignError> {
        self.write_bytes(&vec![0u8; count])
    }

    /// Write zeros until the position is a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> Result<(), AppleCodesignError> {
        match self.position() % alignment {
            0 => Ok(()),
            extra => self.write_zeros(alignment - extra),
        }
    }

    /// Write a placeholder u32 and return its position for a later [Self::patch_u32].
    pub fn reserve_u32(&mut self) -> Result<usize, AppleCodesignError> {
        let position = self.position();
        self.write_u32(0)?;

        Ok(position)
    }

    /// Overwrite a u32 at a position, restoring the current position afterwards.
    pub fn patch_u32(&mut self, at: usize, v: u32) -> Result<(), AppleCodesignError> {
        let current = self.position();
        self.cursor.set_position(at as u64);
        self.write_u32(v)?;
        self.cursor.set_position(current as u64);

        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}
