// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mach-O primitives related to code signing

A Mach-O file is either a single image or a universal ("fat") file holding
one image per architecture. Each image is a *slice*.

Code signing data lives at the end of the `__LINKEDIT` segment. An
`LC_CODE_SIGNATURE` load command in the Mach-O header points at it. Only the
header and load commands are interpreted here. Everything else is opaque.

Growing a binary to make room for a signature requires rewriting segment
layout, which is delegated to an external tool (see
[crate::macho_signing::SignatureAllocator]).
*/

use {
    crate::{cursor::ByteCursor, error::AppleCodesignError},
    goblin::mach::{
        constants::cputype::{CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64},
        fat::{FAT_CIGAM, FAT_MAGIC},
        header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64},
        load_command::LC_CODE_SIGNATURE,
    },
    scroll::Endian,
    std::path::{Path, PathBuf},
};

/// Human readable name of a Mach-O CPU type.
pub fn arch_name(cpu_type: u32) -> String {
    match cpu_type {
        CPU_TYPE_X86 => "x86".to_string(),
        CPU_TYPE_X86_64 => "x86_64".to_string(),
        CPU_TYPE_ARM => "armv7".to_string(),
        CPU_TYPE_ARM64 => "arm64".to_string(),
        _ => format!("unknown {}", cpu_type),
    }
}

/// Location of code signature data within a slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeSignatureRange {
    /// Offset relative to the start of the slice.
    pub offset: u64,
    /// Reserved size.
    pub size: u64,
}

/// A single architecture image.
#[derive(Clone, Debug)]
pub struct MachOSlice {
    file_offset: u64,
    cursor: ByteCursor,
    cpu_type: u32,
    cpu_subtype: u32,
    is_64: bool,
    code_signature: Option<CodeSignatureRange>,
}

impl MachOSlice {
    /// Parse the Mach header and load commands of a slice.
    ///
    /// `cursor` covers exactly the slice.
    fn parse(file_offset: u64, mut cursor: ByteCursor) -> Result<Self, AppleCodesignError> {
        cursor.set_endian(Endian::Big);
        let magic = cursor.read_u32()?;

        let (endian, is_64) = match magic {
            MH_MAGIC => (Endian::Big, false),
            MH_CIGAM => (Endian::Little, false),
            MH_MAGIC_64 => (Endian::Big, true),
            MH_CIGAM_64 => (Endian::Little, true),
            _ => {
                return Err(AppleCodesignError::InvalidBinary(format!(
                    "unexpected Mach header magic {:#x}",
                    magic
                )))
            }
        };
        cursor.set_endian(endian);

        let cpu_type = cursor.read_u32()?;
        let cpu_subtype = cursor.read_u32()?;
        let _file_type = cursor.read_u32()?;
        let command_count = cursor.read_u32()?;
        let _commands_size = cursor.read_u32()?;
        let _flags = cursor.read_u32()?;
        if is_64 {
            let _reserved = cursor.read_u32()?;
        }

        let mut code_signature = None;

        for _ in 0..command_count {
            let position = cursor.position();
            let command = cursor.read_u32()?;
            let command_size = cursor.read_u32()?;

            if command_size < 8 {
                return Err(AppleCodesignError::InvalidBinary(format!(
                    "load command {:#x} has invalid size {}",
                    command, command_size
                )));
            }

            if command == LC_CODE_SIGNATURE {
                let offset = cursor.read_u32()? as u64;
                let size = cursor.read_u32()? as u64;

                if offset + size > cursor.len() {
                    return Err(AppleCodesignError::InvalidBinary(
                        "code signature extends past end of slice".to_string(),
                    ));
                }

                code_signature = Some(CodeSignatureRange { offset, size });
                break;
            }

            cursor.set_position(position + command_size as u64)?;
        }

        cursor.set_position(0)?;

        let slice = Self {
            file_offset,
            cursor,
            cpu_type,
            cpu_subtype,
            is_64,
            code_signature,
        };

        log::debug!(
            "found {} slice at {:#x} ({} bytes); signature {:?}",
            slice.arch_name(),
            file_offset,
            slice.size(),
            code_signature
        );

        Ok(slice)
    }

    pub fn cpu_type(&self) -> u32 {
        self.cpu_type
    }

    pub fn cpu_subtype(&self) -> u32 {
        self.cpu_subtype
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    pub fn arch_name(&self) -> String {
        arch_name(self.cpu_type)
    }

    /// Offset of this slice within its file.
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn size(&self) -> u64 {
        self.cursor.len()
    }

    /// Cursor over the whole slice.
    pub fn bytes(&self) -> &ByteCursor {
        &self.cursor
    }

    pub fn code_signature(&self) -> Option<CodeSignatureRange> {
        self.code_signature
    }

    /// Cursor over the reserved code signature region, if any.
    ///
    /// Signature data is always big-endian.
    pub fn code_signature_bytes(&self) -> Result<Option<ByteCursor>, AppleCodesignError> {
        match self.code_signature {
            Some(range) if range.size > 0 => Ok(Some(
                self.cursor
                    .slice(range.offset, range.size)?
                    .with_endian(Endian::Big),
            )),
            _ => Ok(None),
        }
    }

    /// The end of the signed byte range.
    ///
    /// This is the start of the signature region or the end of the slice.
    pub fn code_limit(&self) -> u64 {
        match self.code_signature {
            Some(range) => range.offset,
            None => self.size(),
        }
    }
}

/// A loaded Mach-O file with its slices.
#[derive(Debug)]
pub struct MachOFile {
    path: Option<PathBuf>,
    cursor: ByteCursor,
    slices: Vec<MachOSlice>,
}

impl MachOFile {
    /// Load a file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppleCodesignError> {
        let path = path.as_ref();
        let mut res = Self::from_cursor(ByteCursor::open(path)?)?;
        res.path = Some(path.to_path_buf());

        Ok(res)
    }

    /// Load a file for reading and writing signature data.
    pub fn open_writable(path: impl AsRef<Path>) -> Result<Self, AppleCodesignError> {
        let path = path.as_ref();
        let mut res = Self::from_cursor(ByteCursor::open_writable(path)?)?;
        res.path = Some(path.to_path_buf());

        Ok(res)
    }

    /// Parse slices from a cursor over an entire file.
    pub fn from_cursor(mut cursor: ByteCursor) -> Result<Self, AppleCodesignError> {
        cursor.set_endian(Endian::Big);
        let magic = cursor.read_u32()?;

        let mut slices = vec![];

        if magic == FAT_MAGIC || magic == FAT_CIGAM {
            let mut fat = cursor.slice(4, cursor.len() - 4)?.with_endian(if magic == FAT_MAGIC {
                Endian::Big
            } else {
                Endian::Little
            });

            let count = fat.read_u32()?;

            for _ in 0..count {
                let _cpu_type = fat.read_u32()?;
                let _cpu_subtype = fat.read_u32()?;
                let offset = fat.read_u32()? as u64;
                let size = fat.read_u32()? as u64;
                let _align = fat.read_u32()?;

                slices.push(MachOSlice::parse(offset, cursor.slice(offset, size)?)?);
            }
        } else {
            slices.push(MachOSlice::parse(0, cursor.slice(0, cursor.len())?)?);
        }

        Ok(Self {
            path: None,
            cursor,
            slices,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn slices(&self) -> &[MachOSlice] {
        &self.slices
    }

    /// Write data at a file offset, zero filling the rest of a reserved region.
    pub fn write_section(
        &self,
        file_offset: u64,
        data: &[u8],
        reserved_size: u64,
    ) -> Result<(), AppleCodesignError> {
        if data.len() as u64 > reserved_size {
            return Err(AppleCodesignError::SignatureDataTooLarge {
                needed: data.len(),
                available: reserved_size as usize,
            });
        }

        let mut padded = Vec::with_capacity(reserved_size as usize);
        padded.extend_from_slice(data);
        padded.resize(reserved_size as usize, 0);

        self.cursor.write_at(file_offset, &padded)
    }
}
