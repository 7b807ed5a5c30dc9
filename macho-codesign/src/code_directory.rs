// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code directory data structure and related types.

use {
    crate::{
        code_hash::{code_slot_count, compute_code_hashes},
        cursor::{BlobWriter, ByteCursor},
        digest::{Digest, DigestType},
        embedded_signature::{
            read_and_validate_blob_header, Blob, CodeSigningMagic, CodeSigningSlot,
        },
        error::AppleCodesignError,
    },
    scroll::Pread,
    std::{borrow::Cow, collections::HashMap},
};

bitflags::bitflags! {
    /// Code signature flags.
    ///
    /// These flags are embedded in the Code Directory and govern use of the embedded
    /// signature.
    pub struct CodeSignatureFlags: u32 {
        /// Code may act as a host that controls and supervises guest code.
        const HOST = 0x0001;
        /// The code has been sealed without a signing identity.
        const ADHOC = 0x0002;
        /// Set the "hard" status bit for the code when it starts running.
        const FORCE_HARD = 0x0100;
        /// Implicitly set the "kill" status bit for the code when it starts running.
        const FORCE_KILL = 0x0200;
        /// Force certificate expiration checks.
        const FORCE_EXPIRATION = 0x0400;
        /// Restrict dyld loading.
        const RESTRICT = 0x0800;
        /// Enforce code signing.
        const ENFORCEMENT = 0x1000;
        /// Library validation required.
        const LIBRARY_VALIDATION = 0x2000;
        /// Apply runtime hardening policies.
        const RUNTIME = 0x10000;
        /// The code was automatically signed by the linker.
        const LINKER_SIGNED = 0x20000;
    }
}

/// Version of Code Directory data structure.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
pub enum CodeDirectoryVersion {
    Initial = 0x20000,
    SupportsScatter = 0x20100,
    SupportsTeamId = 0x20200,
    SupportsCodeLimit64 = 0x20300,
    SupportsExecutableSegment = 0x20400,
    SupportsRuntime = 0x20500,
    SupportsLinkage = 0x20600,
}

/// Highest special slot a code directory may carry.
const MAX_SPECIAL_SLOTS: u32 = 7;

/// Linkage fields of version 0x20600 code directories.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Linkage {
    pub hash_type: u8,
    pub truncated: u8,
    pub spare4: u16,
    pub offset: u32,
    pub size: u32,
}

fn read_cstr(
    data: &[u8],
    offset: usize,
    err: AppleCodesignError,
) -> Result<&str, AppleCodesignError> {
    let tail = match data.get(offset..) {
        Some(tail) if offset >= 8 => tail,
        _ => return Err(err),
    };

    match tail.iter().position(|b| *b == 0) {
        Some(end) => std::str::from_utf8(&tail[..end]).map_err(|_| err),
        None => Err(err),
    }
}

fn get_hashes(
    data: &[u8],
    offset: usize,
    count: usize,
    hash_size: usize,
) -> Result<Vec<Digest<'_>>, AppleCodesignError> {
    let end = count
        .checked_mul(hash_size)
        .and_then(|len| len.checked_add(offset))
        .ok_or(AppleCodesignError::CodeDirectoryMalformed("hash array overflow"))?;

    let hashes = data
        .get(offset..end)
        .ok_or(AppleCodesignError::CodeDirectoryMalformed(
            "hash array out of bounds",
        ))?;

    Ok(hashes
        .chunks(hash_size)
        .map(|data| Digest { data: data.into() })
        .collect())
}

/// Represents a code directory blob entry.
///
/// This struct is versioned and has been extended over time.
///
/// The struct here represents a superset of all fields in all versions.
///
/// The parser will set `Option<T>` fields to `None` for instances
/// where the version is lower than the version that field was introduced in.
#[derive(Debug)]
pub struct CodeDirectoryBlob<'a> {
    /// Compatibility version.
    pub version: u32,
    /// Setup and mode flags.
    pub flags: CodeSignatureFlags,
    /// Limit to main image signature range.
    ///
    /// This is the offset within the slice to stop digesting code data at.
    /// It corresponds to the start of the embedded signature data.
    pub code_limit: u32,
    /// Size of each hash in bytes.
    pub hash_size: u8,
    /// Type of hash.
    pub hash_type: DigestType,
    /// Platform identifier. 0 if not platform binary.
    pub platform: u8,
    /// Page size in bytes. 0 means the code range is a single page.
    pub page_size: u32,
    /// Unused (must be 0).
    pub spare2: u32,
    // Version 0x20100
    pub scatter_offset: Option<u32>,
    // Version 0x20300
    pub spare3: Option<u32>,
    pub code_limit_64: Option<u64>,
    // Version 0x20400
    pub exec_seg_base: Option<u64>,
    pub exec_seg_limit: Option<u64>,
    pub exec_seg_flags: Option<u64>,
    // Version 0x20500
    pub runtime: Option<u32>,
    pub pre_encrypt_offset: Option<u32>,
    // Version 0x20600
    pub linkage: Option<Linkage>,

    pub ident: Cow<'a, str>,
    pub team_name: Option<Cow<'a, str>>,
    pub code_hashes: Vec<Digest<'a>>,
    pub special_hashes: HashMap<CodeSigningSlot, Digest<'a>>,
}

impl<'a> Blob<'a> for CodeDirectoryBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::CodeDirectory)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        read_and_validate_blob_header(data, Self::magic(), "code directory blob")?;

        let offset = &mut 8;

        let version = data.gread_with::<u32>(offset, scroll::BE)?;
        let flags = data.gread_with::<u32>(offset, scroll::BE)?;
        let flags = unsafe { CodeSignatureFlags::from_bits_unchecked(flags) };
        let hash_offset = data.gread_with::<u32>(offset, scroll::BE)? as usize;
        let ident_offset = data.gread_with::<u32>(offset, scroll::BE)? as usize;
        let n_special_slots = data.gread_with::<u32>(offset, scroll::BE)?;
        let n_code_slots = data.gread_with::<u32>(offset, scroll::BE)?;
        let code_limit = data.gread_with(offset, scroll::BE)?;
        let hash_size = data.gread_with::<u8>(offset, scroll::BE)?;
        let hash_type = DigestType::from(data.gread_with::<u8>(offset, scroll::BE)?);
        let platform = data.gread_with(offset, scroll::BE)?;
        let page_size = match data.gread_with::<u8>(offset, scroll::BE)? {
            0 => 0,
            shift if shift < 32 => 1u32 << shift,
            _ => return Err(AppleCodesignError::CodeDirectoryMalformed("page size")),
        };
        let spare2 = data.gread_with(offset, scroll::BE)?;

        match hash_type.hash_len() {
            Ok(len) if len == hash_size as usize => {}
            _ => {
                return Err(AppleCodesignError::CodeDirectoryHashSizeMismatch {
                    digest: hash_type.to_string(),
                    hash_size,
                })
            }
        }

        if n_special_slots > MAX_SPECIAL_SLOTS {
            return Err(AppleCodesignError::CodeDirectoryTooManySpecialSlots(
                n_special_slots,
            ));
        }

        let at_least = |v: CodeDirectoryVersion| version >= v as u32;

        let scatter_offset = if at_least(CodeDirectoryVersion::SupportsScatter) {
            Some(data.gread_with::<u32>(offset, scroll::BE)?).filter(|v| *v != 0)
        } else {
            None
        };

        let team_offset = if at_least(CodeDirectoryVersion::SupportsTeamId) {
            Some(data.gread_with::<u32>(offset, scroll::BE)? as usize).filter(|v| *v != 0)
        } else {
            None
        };

        let (spare3, code_limit_64) = if at_least(CodeDirectoryVersion::SupportsCodeLimit64) {
            (
                Some(data.gread_with(offset, scroll::BE)?),
                Some(data.gread_with(offset, scroll::BE)?),
            )
        } else {
            (None, None)
        };

        let (exec_seg_base, exec_seg_limit, exec_seg_flags) =
            if at_least(CodeDirectoryVersion::SupportsExecutableSegment) {
                (
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                )
            } else {
                (None, None, None)
            };

        let (runtime, pre_encrypt_offset) = if at_least(CodeDirectoryVersion::SupportsRuntime) {
            (
                Some(data.gread_with(offset, scroll::BE)?),
                Some(data.gread_with(offset, scroll::BE)?),
            )
        } else {
            (None, None)
        };

        let linkage = if at_least(CodeDirectoryVersion::SupportsLinkage) {
            Some(Linkage {
                hash_type: data.gread_with(offset, scroll::BE)?,
                truncated: data.gread_with(offset, scroll::BE)?,
                spare4: data.gread_with(offset, scroll::BE)?,
                offset: data.gread_with(offset, scroll::BE)?,
                size: data.gread_with(offset, scroll::BE)?,
            })
        } else {
            None
        };

        let ident = Cow::from(read_cstr(
            data,
            ident_offset,
            AppleCodesignError::CodeDirectoryMalformedIdentifier,
        )?);

        let team_name = match team_offset {
            Some(team_offset) => Some(Cow::from(read_cstr(
                data,
                team_offset,
                AppleCodesignError::CodeDirectoryMalformedTeam,
            )?)),
            None => None,
        };

        let code_hashes = get_hashes(
            data,
            hash_offset,
            n_code_slots as usize,
            hash_size as usize,
        )?;

        // Special hashes are stored in reverse slot order and end at the hash offset.
        let specials_start = hash_offset
            .checked_sub(hash_size as usize * n_special_slots as usize)
            .filter(|start| *start >= 8)
            .ok_or(AppleCodesignError::CodeDirectoryMalformed(
                "special slots precede header",
            ))?;

        let special_hashes = get_hashes(
            data,
            specials_start,
            n_special_slots as usize,
            hash_size as usize,
        )?
        .into_iter()
        .enumerate()
        .map(|(i, h)| (CodeSigningSlot::from(n_special_slots - i as u32), h))
        .collect();

        Ok(Self {
            version,
            flags,
            code_limit,
            hash_size,
            hash_type,
            platform,
            page_size,
            spare2,
            scatter_offset,
            spare3,
            code_limit_64,
            exec_seg_base,
            exec_seg_limit,
            exec_seg_flags,
            runtime,
            pre_encrypt_offset,
            linkage,
            ident,
            team_name,
            code_hashes,
            special_hashes,
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError> {
        if self.scatter_offset.is_some() {
            return Err(AppleCodesignError::Unimplemented("scatter offset"));
        }

        let hash_size = self.hash_size as usize;

        if self
            .code_hashes
            .iter()
            .chain(self.special_hashes.values())
            .any(|h| h.data.len() != hash_size)
        {
            return Err(AppleCodesignError::CodeDirectoryHashSizeMismatch {
                digest: self.hash_type.to_string(),
                hash_size: self.hash_size,
            });
        }

        // The payload excludes the 8 byte blob header but recorded offsets
        // are relative to the start of the blob.
        let mut writer = BlobWriter::default();

        writer.write_u32(self.version)?;
        writer.write_u32(self.flags.bits)?;
        let hash_offset_position = writer.reserve_u32()?;
        let ident_offset_position = writer.reserve_u32()?;

        // Every slot up to the highest populated one occupies space.
        let highest_slot = self
            .special_hashes
            .keys()
            .map(|slot| u32::from(*slot))
            .max()
            .unwrap_or(0);

        if highest_slot > MAX_SPECIAL_SLOTS {
            return Err(AppleCodesignError::CodeDirectoryTooManySpecialSlots(
                highest_slot,
            ));
        }

        writer.write_u32(highest_slot)?;
        writer.write_u32(self.code_hashes.len() as u32)?;
        writer.write_u32(self.code_limit)?;
        writer.write_u8(self.hash_size)?;
        writer.write_u8(u8::from(self.hash_type))?;
        writer.write_u8(self.platform)?;
        writer.write_u8(if self.page_size == 0 {
            0
        } else {
            self.page_size.trailing_zeros() as u8
        })?;
        writer.write_u32(self.spare2)?;

        let at_least = |v: CodeDirectoryVersion| self.version >= v as u32;
        let mut team_offset_position = None;

        if at_least(CodeDirectoryVersion::SupportsScatter) {
            writer.write_u32(0)?;
        }
        if at_least(CodeDirectoryVersion::SupportsTeamId) {
            team_offset_position = Some(writer.reserve_u32()?);
        }
        if at_least(CodeDirectoryVersion::SupportsCodeLimit64) {
            writer.write_u32(self.spare3.unwrap_or(0))?;
            writer.write_u64(self.code_limit_64.unwrap_or(0))?;
        }
        if at_least(CodeDirectoryVersion::SupportsExecutableSegment) {
            writer.write_u64(self.exec_seg_base.unwrap_or(0))?;
            writer.write_u64(self.exec_seg_limit.unwrap_or(0))?;
            writer.write_u64(self.exec_seg_flags.unwrap_or(0))?;
        }
        if at_least(CodeDirectoryVersion::SupportsRuntime) {
            writer.write_u32(self.runtime.unwrap_or(0))?;
            writer.write_u32(self.pre_encrypt_offset.unwrap_or(0))?;
        }
        if at_least(CodeDirectoryVersion::SupportsLinkage) {
            let linkage = self.linkage.unwrap_or_default();
            writer.write_u8(linkage.hash_type)?;
            writer.write_u8(linkage.truncated)?;
            writer.write_u16(linkage.spare4)?;
            writer.write_u32(linkage.offset)?;
            writer.write_u32(linkage.size)?;
        }

        let ident_offset = writer.position();
        writer.write_bytes(self.ident.as_bytes())?;
        writer.write_u8(0)?;

        let team_offset = writer.position();
        let team_name = match (team_offset_position, &self.team_name) {
            (Some(position), Some(team_name)) => {
                writer.write_bytes(team_name.as_bytes())?;
                writer.write_u8(0)?;
                Some(position)
            }
            _ => None,
        };

        for slot_index in (1..highest_slot + 1).rev() {
            match self.special_hashes.get(&CodeSigningSlot::from(slot_index)) {
                Some(hash) => writer.write_bytes(&hash.data)?,
                None => writer.write_zeros(hash_size)?,
            }
        }

        let code_hashes_offset = writer.position();

        for hash in &self.code_hashes {
            writer.write_bytes(&hash.data)?;
        }

        writer.patch_u32(hash_offset_position, code_hashes_offset as u32 + 8)?;
        writer.patch_u32(ident_offset_position, ident_offset as u32 + 8)?;
        if let Some(position) = team_name {
            writer.patch_u32(position, team_offset as u32 + 8)?;
        }

        Ok(writer.into_inner())
    }
}

impl CodeDirectoryBlob<'static> {
    /// Construct an empty code directory for the given identity and digest.
    pub fn new(
        ident: impl ToString,
        team_name: Option<String>,
        hash_type: DigestType,
        page_size: u32,
    ) -> Result<Self, AppleCodesignError> {
        if page_size != 0 && !page_size.is_power_of_two() {
            return Err(AppleCodesignError::CodeDirectoryMalformed(
                "page size not a power of 2",
            ));
        }

        Ok(Self {
            version: CodeDirectoryVersion::SupportsTeamId as u32,
            flags: CodeSignatureFlags::empty(),
            code_limit: 0,
            hash_size: hash_type.hash_len()? as u8,
            hash_type,
            platform: 0,
            page_size,
            spare2: 0,
            scatter_offset: None,
            spare3: None,
            code_limit_64: None,
            exec_seg_base: None,
            exec_seg_limit: None,
            exec_seg_flags: None,
            runtime: None,
            pre_encrypt_offset: None,
            linkage: None,
            ident: Cow::Owned(ident.to_string()),
            team_name: team_name.map(Cow::Owned),
            code_hashes: vec![],
            special_hashes: HashMap::new(),
        })
    }
}

impl<'a> CodeDirectoryBlob<'a> {
    /// Set code hashes covering `[0, code_limit)`.
    pub fn set_code_hashes(&mut self, code_limit: u32, hashes: Vec<Vec<u8>>) {
        self.code_limit = code_limit;
        self.code_hashes = hashes.into_iter().map(Digest::from).collect();
    }

    /// Set the digest recorded for a special slot.
    pub fn set_special_hash(
        &mut self,
        slot: CodeSigningSlot,
        digest: Vec<u8>,
    ) -> Result<(), AppleCodesignError> {
        if !slot.is_code_directory_specials_expressible() {
            return Err(AppleCodesignError::CodeDirectoryMalformed(
                "slot not expressible as special hash",
            ));
        }

        if digest.len() != self.hash_size as usize {
            return Err(AppleCodesignError::CodeDirectoryHashSizeMismatch {
                digest: self.hash_type.to_string(),
                hash_size: self.hash_size,
            });
        }

        self.special_hashes.insert(slot, digest.into());

        Ok(())
    }

    /// Obtain the digest recorded for a special slot.
    ///
    /// Parsed directories hold a null digest for every unpopulated slot below
    /// the highest one. Use [Digest::is_null] to tell those apart.
    pub fn special_hash(&self, slot: CodeSigningSlot) -> Option<&Digest<'a>> {
        self.special_hashes.get(&slot)
    }

    /// Number of special slots that serialization records.
    pub fn special_slot_count(&self) -> u32 {
        self.special_hashes
            .keys()
            .map(|slot| u32::from(*slot))
            .max()
            .unwrap_or(0)
    }

    /// Verify recorded code hashes against the content of a slice.
    ///
    /// The slot count must match the page count of the code limit.
    pub fn verify_code_hashes(&self, cursor: &ByteCursor) -> Result<(), AppleCodesignError> {
        let expected = code_slot_count(self.code_limit as u64, self.page_size as u64);

        if expected != self.code_hashes.len() {
            return Err(AppleCodesignError::CodeSlotCountMismatch {
                expected,
                actual: self.code_hashes.len(),
            });
        }

        let actual = compute_code_hashes(
            cursor,
            self.code_limit as u64,
            self.hash_type,
            self.page_size as usize,
            false,
        )?;

        for (index, (recorded, actual)) in self.code_hashes.iter().zip(actual.iter()).enumerate() {
            if recorded.data.as_ref() != actual.as_slice() {
                return Err(AppleCodesignError::CodeSlotHashMismatch(index));
            }
        }

        Ok(())
    }

    pub fn to_owned(&self) -> CodeDirectoryBlob<'static> {
        CodeDirectoryBlob {
            version: self.version,
            flags: self.flags,
            code_limit: self.code_limit,
            hash_size: self.hash_size,
            hash_type: self.hash_type,
            platform: self.platform,
            page_size: self.page_size,
            spare2: self.spare2,
            scatter_offset: self.scatter_offset,
            spare3: self.spare3,
            code_limit_64: self.code_limit_64,
            exec_seg_base: self.exec_seg_base,
            exec_seg_limit: self.exec_seg_limit,
            exec_seg_flags: self.exec_seg_flags,
            runtime: self.runtime,
            pre_encrypt_offset: self.pre_encrypt_offset,
            linkage: self.linkage,
            ident: Cow::Owned(self.ident.clone().into_owned()),
            team_name: self
                .team_name
                .as_ref()
                .map(|x| Cow::Owned(x.clone().into_owned())),
            code_hashes: self.code_hashes.iter().map(|h| h.to_owned()).collect(),
            special_hashes: self
                .special_hashes
                .iter()
                .map(|(k, v)| (*k, v.to_owned()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::code_hash::paged_digests};

    fn sample(hash_type: DigestType) -> (Vec<u8>, CodeDirectoryBlob<'static>) {
        let code = (0..10_000u32).map(|x| (x * 7) as u8).collect::<Vec<_>>();

        let mut cd =
            CodeDirectoryBlob::new("com.example.app", Some("TEAM123".into()), hash_type, 4096)
                .unwrap();
        cd.set_code_hashes(
            code.len() as u32,
            paged_digests(&code, hash_type, 4096).unwrap(),
        );
        cd.set_special_hash(
            CodeSigningSlot::RequirementSet,
            hash_type.digest_data(b"requirements").unwrap(),
        )
        .unwrap();

        (code, cd)
    }

    #[test]
    fn build_parse_build() {
        for hash_type in [DigestType::Sha1, DigestType::Sha256, DigestType::Sha256Truncated] {
            let (_, cd) = sample(hash_type);
            let built = cd.to_blob_bytes().unwrap();

            let parsed = CodeDirectoryBlob::from_blob_bytes(&built).unwrap();
            assert_eq!(parsed.ident, "com.example.app");
            assert_eq!(parsed.team_name.as_deref(), Some("TEAM123"));
            assert_eq!(parsed.hash_type, hash_type);
            assert_eq!(parsed.page_size, 4096);
            assert_eq!(parsed.code_hashes.len(), 3);
            assert_eq!(parsed.special_slot_count(), 2);
            // Slot 1 is a gap and serialized as zeros.
            assert!(parsed.special_hash(CodeSigningSlot::Info).unwrap().is_null());
            assert!(parsed.special_hash(CodeSigningSlot::ResourceDir).is_none());

            assert_eq!(parsed.to_blob_bytes().unwrap(), built);
        }
    }

    #[test]
    fn layout() {
        let (_, cd) = sample(DigestType::Sha1);
        let built = cd.to_blob_bytes().unwrap();

        assert_eq!(built.pread_with::<u32>(0, scroll::BE).unwrap(), 0xfade0c02);
        assert_eq!(built.pread_with::<u32>(4, scroll::BE).unwrap(), built.len() as u32);
        assert_eq!(built.pread_with::<u32>(8, scroll::BE).unwrap(), 0x20200);

        // Header through team offset is 0x34 bytes, identifier follows.
        let ident_offset = built.pread_with::<u32>(0x14, scroll::BE).unwrap() as usize;
        assert_eq!(ident_offset, 0x34);
        assert_eq!(&built[ident_offset..ident_offset + 16], b"com.example.app\0");

        let hash_offset = built.pread_with::<u32>(0x10, scroll::BE).unwrap() as usize;
        assert_eq!(built.len(), hash_offset + 3 * 20);
        // Slot 2 is furthest from the code hashes.
        assert_eq!(
            &built[hash_offset - 40..hash_offset - 20],
            DigestType::Sha1.digest_data(b"requirements").unwrap().as_slice()
        );
        assert_eq!(&built[hash_offset - 20..hash_offset], &[0u8; 20]);
    }

    #[test]
    fn null_special_hash_preserved() {
        let mut cd = CodeDirectoryBlob::new("id", None, DigestType::Sha1, 4096).unwrap();
        cd.set_special_hash(CodeSigningSlot::Info, vec![0; 20]).unwrap();

        let hash = cd.special_hash(CodeSigningSlot::Info).unwrap();
        assert!(hash.is_null());
        assert_eq!(hash.to_vec(), vec![0; 20]);
        assert_eq!(cd.special_slot_count(), 1);
    }

    #[test]
    fn special_slots_independent() {
        for populated in 1u32..=5 {
            for other in 1u32..=5 {
                let mut cd =
                    CodeDirectoryBlob::new("id", None, DigestType::Sha256, 4096).unwrap();

                let hash = vec![populated as u8; 32];
                cd.set_special_hash(CodeSigningSlot::from(populated), hash.clone())
                    .unwrap();
                if other != populated {
                    cd.set_special_hash(CodeSigningSlot::from(other), vec![0xee; 32])
                        .unwrap();
                }

                let built = cd.to_blob_bytes().unwrap();
                let parsed = CodeDirectoryBlob::from_blob_bytes(&built).unwrap();

                assert_eq!(
                    parsed
                        .special_hash(CodeSigningSlot::from(populated))
                        .unwrap()
                        .to_vec(),
                    hash
                );
                assert_eq!(parsed.special_slot_count(), populated.max(other));
            }
        }
    }

    #[test]
    fn rejects_bad_specials() {
        let mut cd = CodeDirectoryBlob::new("id", None, DigestType::Sha1, 4096).unwrap();

        assert!(cd
            .set_special_hash(CodeSigningSlot::CodeDirectory, vec![0; 20])
            .is_err());
        assert!(cd
            .set_special_hash(CodeSigningSlot::Signature, vec![0; 20])
            .is_err());
        assert!(matches!(
            cd.set_special_hash(CodeSigningSlot::Entitlements, vec![0; 32]),
            Err(AppleCodesignError::CodeDirectoryHashSizeMismatch { .. })
        ));
    }

    #[test]
    fn parse_rejects_malformed() {
        let (_, cd) = sample(DigestType::Sha256);
        let built = cd.to_blob_bytes().unwrap();

        // Hash size that doesn't match the digest.
        let mut bad = built.clone();
        bad[0x24] = 20;
        assert!(matches!(
            CodeDirectoryBlob::from_blob_bytes(&bad),
            Err(AppleCodesignError::CodeDirectoryHashSizeMismatch { .. })
        ));

        // Too many special slots.
        let mut bad = built.clone();
        bad[0x18..0x1c].copy_from_slice(&9u32.to_be_bytes());
        assert!(matches!(
            CodeDirectoryBlob::from_blob_bytes(&bad),
            Err(AppleCodesignError::CodeDirectoryTooManySpecialSlots(9))
        ));

        // Code slots running past the end.
        let mut bad = built.clone();
        bad[0x1c..0x20].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            CodeDirectoryBlob::from_blob_bytes(&bad),
            Err(AppleCodesignError::CodeDirectoryMalformed(_))
        ));

        // Identifier offset past the end.
        let mut bad = built;
        bad[0x14..0x18].copy_from_slice(&0xffffu32.to_be_bytes());
        assert!(matches!(
            CodeDirectoryBlob::from_blob_bytes(&bad),
            Err(AppleCodesignError::CodeDirectoryMalformedIdentifier)
        ));
    }

    #[test]
    fn whole_range_page() {
        let mut cd = CodeDirectoryBlob::new("id", None, DigestType::Sha1, 0).unwrap();
        cd.set_code_hashes(100, vec![DigestType::Sha1.digest_data(&[1u8; 100]).unwrap()]);

        let built = cd.to_blob_bytes().unwrap();
        assert_eq!(built[0x27], 0);

        let parsed = CodeDirectoryBlob::from_blob_bytes(&built).unwrap();
        assert_eq!(parsed.page_size, 0);
        parsed
            .verify_code_hashes(&ByteCursor::from_vec(vec![1u8; 100]))
            .unwrap();

        assert!(CodeDirectoryBlob::new("id", None, DigestType::Sha1, 1000).is_err());
    }

    #[test]
    fn verify_code_hashes() {
        let (code, cd) = sample(DigestType::Sha256);

        cd.verify_code_hashes(&ByteCursor::from_vec(code.clone()))
            .unwrap();

        let mut tampered = code.clone();
        tampered[5000] ^= 0xff;
        assert!(matches!(
            cd.verify_code_hashes(&ByteCursor::from_vec(tampered)),
            Err(AppleCodesignError::CodeSlotHashMismatch(1))
        ));

        let mut short = cd.to_owned();
        short.code_hashes.pop();
        assert!(matches!(
            short.verify_code_hashes(&ByteCursor::from_vec(code)),
            Err(AppleCodesignError::CodeSlotCountMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
