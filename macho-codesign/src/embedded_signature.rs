// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common embedded signature data structures (superblobs, magic values, etc).
//!
//! This module defines types and data structures that are common to Apple's
//! embedded signature format.
//!
//! Within this module are constants for header magic, definitions of
//! serialized data structures like superblobs and blobs, and some common
//! enumerations.
//!
//! The best description of the format comes from Apple's open source headers,
//! notably cs_blobs.h (e.g.
//! <https://opensource.apple.com/source/xnu/xnu-7195.81.3/osfmk/kern/cs_blobs.h.auto.html>).
//!
//! The high-level format of embedded signature data is roughly as follows:
//!
//! * A `SuperBlob` header describes the total length of data and the number of
//!   *blob* sections that follow.
//! * An array of `BlobIndex` describing the type and offset of all *blob* sections
//!   that follow. The *type* here is a *slot* and describes what type of data the
//!   *blob* contains (code directory, entitlements, embedded signature, etc).
//! * N *blob* sections of varying formats and lengths, each starting on a 4 byte
//!   boundary.
//!
//! The same layout is used for the requirement set blob, whose index types are
//! [RequirementType] values instead of slots.

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        code_requirement::{CodeRequirementExpression, RequirementType},
        cursor::BlobWriter,
        digest::DigestType,
        error::AppleCodesignError,
    },
    cryptographic_message_syntax::SignedData,
    scroll::Pread,
    std::{borrow::Cow, cmp::Ordering, collections::BTreeMap, fmt::Write as _},
};

/// Defines header magic for various payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSigningMagic {
    /// Code requirement blob.
    Requirement,
    /// Code requirements blob.
    RequirementSet,
    /// CodeDirectory blob.
    CodeDirectory,
    /// Embedded signature.
    ///
    /// This is the magic of the root SuperBlob.
    EmbeddedSignature,
    /// Entitlements blob.
    Entitlements,
    /// DER encoded entitlements blob.
    EntitlementsDer,
    /// Multi-arch collection of embedded signatures.
    DetachedSignature,
    /// Detached requirement set.
    CodeSignDrs,
    /// Generic blob wrapper.
    ///
    /// The CMS signature is stored in this type.
    BlobWrapper,
    /// Unknown magic.
    Unknown(u32),
}

impl From<u32> for CodeSigningMagic {
    fn from(v: u32) -> Self {
        match v {
            0xfade0c00 => Self::Requirement,
            0xfade0c01 => Self::RequirementSet,
            0xfade0c02 => Self::CodeDirectory,
            0xfade0cc0 => Self::EmbeddedSignature,
            0xfade7171 => Self::Entitlements,
            0xfade7172 => Self::EntitlementsDer,
            0xfade0cc1 => Self::DetachedSignature,
            0xfade0c05 => Self::CodeSignDrs,
            0xfade0b01 => Self::BlobWrapper,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningMagic> for u32 {
    fn from(magic: CodeSigningMagic) -> u32 {
        match magic {
            CodeSigningMagic::Requirement => 0xfade0c00,
            CodeSigningMagic::RequirementSet => 0xfade0c01,
            CodeSigningMagic::CodeDirectory => 0xfade0c02,
            CodeSigningMagic::EmbeddedSignature => 0xfade0cc0,
            CodeSigningMagic::Entitlements => 0xfade7171,
            CodeSigningMagic::EntitlementsDer => 0xfade7172,
            CodeSigningMagic::DetachedSignature => 0xfade0cc1,
            CodeSigningMagic::CodeSignDrs => 0xfade0c05,
            CodeSigningMagic::BlobWrapper => 0xfade0b01,
            CodeSigningMagic::Unknown(v) => v,
        }
    }
}

/// A well-known slot within code signing data.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeSigningSlot {
    CodeDirectory,
    Info,
    RequirementSet,
    ResourceDir,
    Application,
    Entitlements,
    RepSpecific,
    EntitlementsDer,
    AlternateCodeDirectory0,
    AlternateCodeDirectory1,
    AlternateCodeDirectory2,
    AlternateCodeDirectory3,
    AlternateCodeDirectory4,
    Signature,
    Unknown(u32),
}

impl std::fmt::Debug for CodeSigningSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CodeDirectory => "CodeDirectory".to_string(),
            Self::Info => "Info".to_string(),
            Self::RequirementSet => "RequirementSet".to_string(),
            Self::ResourceDir => "Resources".to_string(),
            Self::Application => "Application".to_string(),
            Self::Entitlements => "Entitlements".to_string(),
            Self::RepSpecific => "Rep Specific".to_string(),
            Self::EntitlementsDer => "DER Entitlements".to_string(),
            Self::AlternateCodeDirectory0
            | Self::AlternateCodeDirectory1
            | Self::AlternateCodeDirectory2
            | Self::AlternateCodeDirectory3
            | Self::AlternateCodeDirectory4 => {
                format!("CodeDirectory Alternate #{}", u32::from(*self) - 0x1000)
            }
            Self::Signature => "CMS Signature".to_string(),
            Self::Unknown(_) => "Unknown".to_string(),
        };

        f.write_fmt(format_args!("{} ({})", name, u32::from(*self)))
    }
}

impl From<u32> for CodeSigningSlot {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::CodeDirectory,
            1 => Self::Info,
            2 => Self::RequirementSet,
            3 => Self::ResourceDir,
            4 => Self::Application,
            5 => Self::Entitlements,
            6 => Self::RepSpecific,
            7 => Self::EntitlementsDer,
            0x1000 => Self::AlternateCodeDirectory0,
            0x1001 => Self::AlternateCodeDirectory1,
            0x1002 => Self::AlternateCodeDirectory2,
            0x1003 => Self::AlternateCodeDirectory3,
            0x1004 => Self::AlternateCodeDirectory4,
            0x10000 => Self::Signature,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningSlot> for u32 {
    fn from(v: CodeSigningSlot) -> Self {
        match v {
            CodeSigningSlot::CodeDirectory => 0,
            CodeSigningSlot::Info => 1,
            CodeSigningSlot::RequirementSet => 2,
            CodeSigningSlot::ResourceDir => 3,
            CodeSigningSlot::Application => 4,
            CodeSigningSlot::Entitlements => 5,
            CodeSigningSlot::RepSpecific => 6,
            CodeSigningSlot::EntitlementsDer => 7,
            CodeSigningSlot::AlternateCodeDirectory0 => 0x1000,
            CodeSigningSlot::AlternateCodeDirectory1 => 0x1001,
            CodeSigningSlot::AlternateCodeDirectory2 => 0x1002,
            CodeSigningSlot::AlternateCodeDirectory3 => 0x1003,
            CodeSigningSlot::AlternateCodeDirectory4 => 0x1004,
            CodeSigningSlot::Signature => 0x10000,
            CodeSigningSlot::Unknown(v) => v,
        }
    }
}

impl PartialOrd for CodeSigningSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        u32::from(*self).partial_cmp(&u32::from(*other))
    }
}

impl Ord for CodeSigningSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        u32::from(*self).cmp(&u32::from(*other))
    }
}

impl CodeSigningSlot {
    /// Whether this slot has external data (as opposed to provided via a blob).
    pub fn has_external_content(&self) -> bool {
        matches!(self, Self::Info | Self::ResourceDir)
    }

    /// Whether this slot can be referenced from a code directory's special hashes.
    pub fn is_code_directory_specials_expressible(&self) -> bool {
        (1..=7).contains(&u32::from(*self))
    }

    /// The slot holding the alternate code directory with the given index.
    pub fn alternate_code_directory(index: usize) -> Result<Self, AppleCodesignError> {
        match Self::from(0x1000 + index as u32) {
            Self::Unknown(_) => Err(AppleCodesignError::Unimplemented(
                "more than 5 alternate code directories",
            )),
            slot => Ok(slot),
        }
    }

    pub fn is_alternate_code_directory(&self) -> bool {
        (0x1000..=0x1004).contains(&u32::from(*self))
    }
}

/// Read the header from a Blob.
///
/// Blobs begin with a u32 magic and u32 length, inclusive.
fn read_blob_header(data: &[u8]) -> Result<(u32, usize, &[u8]), scroll::Error> {
    let magic = data.pread_with(0, scroll::BE)?;
    let length = data.pread_with::<u32>(4, scroll::BE)?;

    Ok((magic, length as usize, &data[8..]))
}

pub(crate) fn read_and_validate_blob_header<'a>(
    data: &'a [u8],
    expected_magic: u32,
    what: &'static str,
) -> Result<&'a [u8], AppleCodesignError> {
    let (magic, _, data) = read_blob_header(data)?;

    if magic != expected_magic {
        Err(AppleCodesignError::BadMagic(what))
    } else {
        Ok(data)
    }
}

/// Create the binary content for a SuperBlob.
///
/// Blobs are written in iteration order. Every blob's data starts on a
/// 4 byte boundary.
pub fn create_superblob<'a>(
    magic: CodeSigningMagic,
    blobs: impl Iterator<Item = (u32, &'a [u8])>,
) -> Result<Vec<u8>, AppleCodesignError> {
    let blobs = blobs.collect::<Vec<_>>();

    let mut writer = BlobWriter::default();
    writer.write_u32(u32::from(magic))?;
    let length_position = writer.reserve_u32()?;
    writer.write_u32(blobs.len() as u32)?;

    // magic + total length + blob count + 8 bytes for each blob index.
    let mut data_offset = 12 + 8 * blobs.len();

    for (typ, data) in &blobs {
        writer.write_u32(*typ)?;
        writer.write_u32(data_offset as u32)?;
        data_offset += align4(data.len());
    }

    for (_, data) in &blobs {
        writer.write_bytes(data)?;
        writer.align(4)?;
    }

    writer.patch_u32(length_position, writer.len() as u32)?;

    Ok(writer.into_inner())
}

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Parse the header and index of a SuperBlob into its entries.
///
/// Each entry's slice is bounded by the length advertised in the blob's own
/// header. Offsets must point past the index region and blobs must lie within
/// the data.
fn parse_superblob_entries<'a>(
    data: &'a [u8],
    expected_magic: CodeSigningMagic,
    what: &'static str,
) -> Result<(u32, Vec<BlobEntry<'a>>), AppleCodesignError> {
    let offset = &mut 0;

    let magic = CodeSigningMagic::from(data.gread_with::<u32>(offset, scroll::BE)?);
    if magic != expected_magic {
        return Err(AppleCodesignError::BadMagic(what));
    }

    let length = data.gread_with::<u32>(offset, scroll::BE)?;
    let count = data.gread_with::<u32>(offset, scroll::BE)?;

    let index_end = 12usize
        .checked_add(8usize.saturating_mul(count as usize))
        .ok_or(AppleCodesignError::SuperblobMalformed)?;
    if index_end > data.len() {
        return Err(AppleCodesignError::SuperblobMalformed);
    }

    let mut entries = Vec::with_capacity(count as usize);

    for index in 0..count as usize {
        let typ = data.gread_with::<u32>(offset, scroll::BE)?;
        let blob_offset = data.gread_with::<u32>(offset, scroll::BE)? as usize;

        if blob_offset < index_end || blob_offset + 8 > data.len() {
            return Err(AppleCodesignError::SuperblobMalformed);
        }

        let (blob_magic, blob_length, _) = read_blob_header(&data[blob_offset..])?;

        if blob_length < 8 || blob_offset + blob_length > data.len() {
            return Err(AppleCodesignError::SuperblobMalformed);
        }

        entries.push(BlobEntry {
            index,
            slot: CodeSigningSlot::from(typ),
            offset: blob_offset,
            magic: blob_magic.into(),
            length: blob_length,
            data: &data[blob_offset..blob_offset + blob_length],
        });
    }

    Ok((length, entries))
}

/// Represents a single blob as defined by a SuperBlob index entry.
///
/// Instances have copies of their own index info, including the relative
/// order, slot type, and start offset within the `SuperBlob`.
#[derive(Clone)]
pub struct BlobEntry<'a> {
    /// Our blob index within the `SuperBlob`.
    pub index: usize,

    /// The slot type.
    pub slot: CodeSigningSlot,

    /// Our start offset within the `SuperBlob`.
    ///
    /// First byte is start of our magic.
    pub offset: usize,

    /// The magic value appearing at the beginning of the blob.
    pub magic: CodeSigningMagic,

    /// The length of the blob, including its header.
    pub length: usize,

    /// The raw data in this blob, including magic and length.
    pub data: &'a [u8],
}

impl<'a> std::fmt::Debug for BlobEntry<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BlobEntry")
            .field("index", &self.index)
            .field("slot", &self.slot)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("magic", &self.magic)
            .finish()
    }
}

impl<'a> BlobEntry<'a> {
    /// Attempt to convert to a [ParsedBlob].
    pub fn into_parsed_blob(self) -> Result<ParsedBlob<'a>, AppleCodesignError> {
        self.try_into()
    }

    /// Obtain the payload of this blob.
    ///
    /// This is the data in the blob without the blob header.
    pub fn payload(&self) -> Result<&'a [u8], AppleCodesignError> {
        Ok(read_blob_header(self.data)?.2)
    }

    /// Compute the content digest of this blob using the specified hash type.
    pub fn digest_with(&self, hash: DigestType) -> Result<Vec<u8>, AppleCodesignError> {
        hash.digest_data(self.data)
    }
}

/// Provides common features for a parsed blob type.
pub trait Blob<'a>
where
    Self: Sized,
{
    /// The header magic that identifies this format.
    fn magic() -> u32;

    /// Attempt to construct an instance by parsing a bytes slice.
    ///
    /// The slice begins with the 8 byte blob header denoting the magic
    /// and length.
    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError>;

    /// Serialize the payload of this blob to bytes.
    ///
    /// Does not include the magic or length header fields common to blobs.
    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError>;

    /// Serialize this blob to bytes.
    ///
    /// This is [Blob::serialize_payload] with the blob magic and length
    /// prepended.
    fn to_blob_bytes(&self) -> Result<Vec<u8>, AppleCodesignError> {
        let payload = self.serialize_payload()?;

        let mut writer = BlobWriter::default();
        writer.write_u32(Self::magic())?;
        // Length includes our own header.
        writer.write_u32(payload.len() as u32 + 8)?;
        writer.write_bytes(&payload)?;

        Ok(writer.into_inner())
    }

    /// Obtain the digest of the blob using the specified hasher.
    ///
    /// Default implementation calls [Blob::to_blob_bytes] and digests that, which
    /// should always be correct.
    fn digest_with(&self, hash_type: DigestType) -> Result<Vec<u8>, AppleCodesignError> {
        hash_type.digest_data(&self.to_blob_bytes()?)
    }
}

/// Represents a Requirement blob.
///
/// The payload is a u32 kind (1 for an expression) followed by the binary
/// expression tree.
pub struct RequirementBlob<'a> {
    pub data: Cow<'a, [u8]>,
}

/// Requirement blob kind holding an expression tree.
const REQUIREMENT_KIND_EXPRESSION: u32 = 1;

impl<'a> Blob<'a> for RequirementBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::Requirement)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        let data = read_and_validate_blob_header(data, Self::magic(), "requirement blob")?;

        Ok(Self { data: data.into() })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError> {
        Ok(self.data.to_vec())
    }
}

impl<'a> std::fmt::Debug for RequirementBlob<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("RequirementBlob({})", hex::encode(&self.data)))
    }
}

impl<'a> RequirementBlob<'a> {
    pub fn to_owned(&self) -> RequirementBlob<'static> {
        RequirementBlob {
            data: Cow::Owned(self.data.clone().into_owned()),
        }
    }

    /// Construct an instance holding an expression.
    pub fn from_expression(
        expr: &CodeRequirementExpression,
    ) -> Result<RequirementBlob<'static>, AppleCodesignError> {
        let mut writer = BlobWriter::default();
        writer.write_u32(REQUIREMENT_KIND_EXPRESSION)?;
        expr.write_to(&mut writer)?;

        Ok(RequirementBlob {
            data: Cow::Owned(writer.into_inner()),
        })
    }

    /// Parse the binary data in this blob into a Code Requirement expression.
    pub fn parse_expression(&self) -> Result<CodeRequirementExpression, AppleCodesignError> {
        let kind = self.data.pread_with::<u32>(0, scroll::BE)?;
        if kind != REQUIREMENT_KIND_EXPRESSION {
            return Err(AppleCodesignError::RequirementMalformed(
                "unsupported requirement kind",
            ));
        }

        let (expr, remaining) = CodeRequirementExpression::from_bytes(&self.data[4..])?;
        if !remaining.is_empty() {
            return Err(AppleCodesignError::RequirementMalformed(
                "trailing data after expression",
            ));
        }

        Ok(expr)
    }
}

/// Represents a Requirement set blob.
///
/// A Requirement set blob is a SuperBlob whose children are Requirement blobs
/// indexed by [RequirementType].
#[derive(Debug, Default)]
pub struct RequirementSetBlob<'a> {
    pub requirements: BTreeMap<RequirementType, RequirementBlob<'a>>,
}

impl<'a> Blob<'a> for RequirementSetBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::RequirementSet)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        let (_, entries) = parse_superblob_entries(
            data,
            CodeSigningMagic::RequirementSet,
            "requirement set blob",
        )?;

        let mut requirements = BTreeMap::new();

        for entry in entries {
            if entry.magic != CodeSigningMagic::Requirement {
                return Err(AppleCodesignError::BadMagic("requirement blob"));
            }

            requirements.insert(
                RequirementType::from(u32::from(entry.slot)),
                RequirementBlob::from_blob_bytes(entry.data)?,
            );
        }

        Ok(Self { requirements })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError> {
        Ok(self.to_blob_bytes()?[8..].to_vec())
    }

    fn to_blob_bytes(&self) -> Result<Vec<u8>, AppleCodesignError> {
        let blobs = self
            .requirements
            .iter()
            .map(|(typ, requirement)| Ok((u32::from(*typ), requirement.to_blob_bytes()?)))
            .collect::<Result<Vec<_>, AppleCodesignError>>()?;

        create_superblob(
            CodeSigningMagic::RequirementSet,
            blobs.iter().map(|(typ, data)| (*typ, data.as_slice())),
        )
    }
}

impl<'a> RequirementSetBlob<'a> {
    pub fn to_owned(&self) -> RequirementSetBlob<'static> {
        RequirementSetBlob {
            requirements: self
                .requirements
                .iter()
                .map(|(flavor, blob)| (*flavor, blob.to_owned()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Set the requirements for a given [RequirementType].
    pub fn set_requirements(&mut self, slot: RequirementType, blob: RequirementBlob<'a>) {
        self.requirements.insert(slot, blob);
    }
}

/// Represents an Entitlements blob.
///
/// An entitlements blob contains an XML plist with a dict. Keys are
/// strings of the entitlements being requested and values appear to be
/// simple bools.
#[derive(Debug)]
pub struct EntitlementsBlob<'a> {
    plist: Cow<'a, str>,
}

impl<'a> Blob<'a> for EntitlementsBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::Entitlements)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        let data = read_and_validate_blob_header(data, Self::magic(), "entitlements blob")?;
        let s = std::str::from_utf8(data).map_err(AppleCodesignError::EntitlementsBadUtf8)?;

        Ok(Self { plist: s.into() })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError> {
        Ok(self.plist.as_bytes().to_vec())
    }
}

impl<'a> EntitlementsBlob<'a> {
    /// Construct an instance using any string as the payload.
    ///
    /// Line separators are normalized to `\n`.
    pub fn from_string(s: &(impl ToString + ?Sized)) -> Self {
        Self {
            plist: s.to_string().replace("\r\n", "\n").replace('\r', "\n").into(),
        }
    }

    /// Obtain the plist representation as a string.
    pub fn as_str(&self) -> &str {
        &self.plist
    }
}

impl<'a> std::fmt::Display for EntitlementsBlob<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.plist)
    }
}

/// DER encoded entitlements.
///
/// These are preserved when encountered but never generated.
#[derive(Debug)]
pub struct EntitlementsDerBlob<'a> {
    der: Cow<'a, [u8]>,
}

impl<'a> Blob<'a> for EntitlementsDerBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::EntitlementsDer)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        let der = read_and_validate_blob_header(data, Self::magic(), "DER entitlements blob")?;

        Ok(Self { der: der.into() })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError> {
        Ok(self.der.to_vec())
    }
}

/// Represents a generic blob wrapper.
pub struct BlobWrapperBlob<'a> {
    data: Cow<'a, [u8]>,
}

impl<'a> Blob<'a> for BlobWrapperBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::BlobWrapper)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        Ok(Self {
            data: read_and_validate_blob_header(data, Self::magic(), "blob wrapper blob")?.into(),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError> {
        Ok(self.data.to_vec())
    }
}

impl<'a> std::fmt::Debug for BlobWrapperBlob<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", hex::encode(&self.data)))
    }
}

impl<'a> BlobWrapperBlob<'a> {
    /// Construct an instance where the payload (post blob header) is given data.
    pub fn from_data_borrowed(data: &'a [u8]) -> BlobWrapperBlob<'a> {
        Self { data: data.into() }
    }

    /// The wrapped payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl BlobWrapperBlob<'static> {
    /// Construct an instance with payload data.
    pub fn from_data_owned(data: Vec<u8>) -> BlobWrapperBlob<'static> {
        Self { data: data.into() }
    }
}

/// Represents a single, parsed Blob entry/slot.
///
/// Each variant corresponds to a [CodeSigningMagic] blob type that can
/// appear inside an embedded signature.
#[derive(Debug)]
pub enum BlobData<'a> {
    Requirement(Box<RequirementBlob<'a>>),
    RequirementSet(Box<RequirementSetBlob<'a>>),
    CodeDirectory(Box<CodeDirectoryBlob<'a>>),
    Entitlements(Box<EntitlementsBlob<'a>>),
    EntitlementsDer(Box<EntitlementsDerBlob<'a>>),
    BlobWrapper(Box<BlobWrapperBlob<'a>>),
}

impl<'a> Blob<'a> for BlobData<'a> {
    fn magic() -> u32 {
        u32::MAX
    }

    /// Parse blob data by reading its magic and feeding into magic-specific parser.
    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        let (magic, length, _) = read_blob_header(data)?;

        let data = data
            .get(0..length)
            .ok_or(AppleCodesignError::SuperblobMalformed)?;

        Ok(match CodeSigningMagic::from(magic) {
            CodeSigningMagic::Requirement => {
                Self::Requirement(Box::new(RequirementBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::RequirementSet => {
                Self::RequirementSet(Box::new(RequirementSetBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::CodeDirectory => {
                Self::CodeDirectory(Box::new(CodeDirectoryBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::Entitlements => {
                Self::Entitlements(Box::new(EntitlementsBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::EntitlementsDer => {
                Self::EntitlementsDer(Box::new(EntitlementsDerBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::BlobWrapper => {
                Self::BlobWrapper(Box::new(BlobWrapperBlob::from_blob_bytes(data)?))
            }
            _ => return Err(AppleCodesignError::UnknownBlobMagic(magic)),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleCodesignError> {
        match self {
            Self::Requirement(b) => b.serialize_payload(),
            Self::RequirementSet(b) => b.serialize_payload(),
            Self::CodeDirectory(b) => b.serialize_payload(),
            Self::Entitlements(b) => b.serialize_payload(),
            Self::EntitlementsDer(b) => b.serialize_payload(),
            Self::BlobWrapper(b) => b.serialize_payload(),
        }
    }

    fn to_blob_bytes(&self) -> Result<Vec<u8>, AppleCodesignError> {
        match self {
            Self::Requirement(b) => b.to_blob_bytes(),
            Self::RequirementSet(b) => b.to_blob_bytes(),
            Self::CodeDirectory(b) => b.to_blob_bytes(),
            Self::Entitlements(b) => b.to_blob_bytes(),
            Self::EntitlementsDer(b) => b.to_blob_bytes(),
            Self::BlobWrapper(b) => b.to_blob_bytes(),
        }
    }
}

impl<'a> BlobData<'a> {
    /// The magic of the wrapped blob.
    pub fn blob_magic(&self) -> CodeSigningMagic {
        match self {
            Self::Requirement(_) => CodeSigningMagic::Requirement,
            Self::RequirementSet(_) => CodeSigningMagic::RequirementSet,
            Self::CodeDirectory(_) => CodeSigningMagic::CodeDirectory,
            Self::Entitlements(_) => CodeSigningMagic::Entitlements,
            Self::EntitlementsDer(_) => CodeSigningMagic::EntitlementsDer,
            Self::BlobWrapper(_) => CodeSigningMagic::BlobWrapper,
        }
    }
}

impl<'a> From<RequirementBlob<'a>> for BlobData<'a> {
    fn from(b: RequirementBlob<'a>) -> Self {
        Self::Requirement(Box::new(b))
    }
}

impl<'a> From<RequirementSetBlob<'a>> for BlobData<'a> {
    fn from(b: RequirementSetBlob<'a>) -> Self {
        Self::RequirementSet(Box::new(b))
    }
}

impl<'a> From<CodeDirectoryBlob<'a>> for BlobData<'a> {
    fn from(b: CodeDirectoryBlob<'a>) -> Self {
        Self::CodeDirectory(Box::new(b))
    }
}

impl<'a> From<EntitlementsBlob<'a>> for BlobData<'a> {
    fn from(b: EntitlementsBlob<'a>) -> Self {
        Self::Entitlements(Box::new(b))
    }
}

impl<'a> From<EntitlementsDerBlob<'a>> for BlobData<'a> {
    fn from(b: EntitlementsDerBlob<'a>) -> Self {
        Self::EntitlementsDer(Box::new(b))
    }
}

impl<'a> From<BlobWrapperBlob<'a>> for BlobData<'a> {
    fn from(b: BlobWrapperBlob<'a>) -> Self {
        Self::BlobWrapper(Box::new(b))
    }
}

/// Represents the parsed content of a blob entry.
#[derive(Debug)]
pub struct ParsedBlob<'a> {
    /// The blob record this blob came from.
    pub blob_entry: BlobEntry<'a>,

    /// The parsed blob data.
    pub blob: BlobData<'a>,
}

impl<'a> ParsedBlob<'a> {
    /// Compute the content digest of this blob using the specified hash type.
    pub fn digest_with(&self, hash: DigestType) -> Result<Vec<u8>, AppleCodesignError> {
        hash.digest_data(self.blob_entry.data)
    }
}

impl<'a> TryFrom<BlobEntry<'a>> for ParsedBlob<'a> {
    type Error = AppleCodesignError;

    fn try_from(blob_entry: BlobEntry<'a>) -> Result<Self, Self::Error> {
        let blob = BlobData::from_blob_bytes(blob_entry.data)?;

        Ok(Self { blob_entry, blob })
    }
}

/// Represents Apple's common embedded code signature data structures.
///
/// This type represents a parsed `SuperBlob` with [CodeSigningMagic::EmbeddedSignature].
/// Every blob is parsed when the signature is parsed. A blob with a magic that
/// isn't recognized fails the parse.
pub struct EmbeddedSignature<'a> {
    /// Magic value from header.
    pub magic: CodeSigningMagic,
    /// Length of this super blob.
    pub length: u32,
    /// Number of blobs in this super blob.
    pub count: u32,

    /// Raw data backing this super blob.
    pub data: &'a [u8],

    /// All the blobs within this super blob.
    pub blobs: Vec<ParsedBlob<'a>>,
}

impl<'a> std::fmt::Debug for EmbeddedSignature<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SuperBlob")
            .field("magic", &self.magic)
            .field("length", &self.length)
            .field("count", &self.count)
            .field("blobs", &self.blobs)
            .finish()
    }
}

impl<'a> EmbeddedSignature<'a> {
    /// Attempt to parse an embedded signature super blob from data.
    ///
    /// The argument to this function is likely the region of the Mach-O
    /// that the `LC_CODE_SIGNATURE` load command points at. Trailing zero
    /// padding after the superblob is ignored.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, AppleCodesignError> {
        let (length, entries) = parse_superblob_entries(
            data,
            CodeSigningMagic::EmbeddedSignature,
            "embedded signature super blob",
        )?;

        let blobs = entries
            .into_iter()
            .map(|entry| {
                log::debug!(
                    "parsing {:?} blob in slot {:?} ({} bytes)",
                    entry.magic,
                    entry.slot,
                    entry.length
                );
                entry.into_parsed_blob()
            })
            .collect::<Result<Vec<_>, AppleCodesignError>>()?;

        Ok(Self {
            magic: CodeSigningMagic::EmbeddedSignature,
            length,
            count: blobs.len() as u32,
            data,
            blobs,
        })
    }

    /// Find the first occurrence of the specified slot.
    pub fn find_slot(&self, slot: CodeSigningSlot) -> Option<&ParsedBlob<'a>> {
        self.blobs.iter().find(|e| e.blob_entry.slot == slot)
    }

    /// Find the first blob having the given magic.
    pub fn blob_by_magic(&self, magic: CodeSigningMagic) -> Option<&ParsedBlob<'a>> {
        self.blobs.iter().find(|e| e.blob_entry.magic == magic)
    }

    /// Find all blobs having the given magic, in superblob order.
    pub fn blobs_by_magic(&self, magic: CodeSigningMagic) -> Vec<&ParsedBlob<'a>> {
        self.blobs
            .iter()
            .filter(|e| e.blob_entry.magic == magic)
            .collect()
    }

    /// Resolve the primary code directory.
    ///
    /// Returns Err if the code directory slot holds some other blob.
    ///
    /// Returns `Ok(None)` if there is no code directory slot.
    pub fn code_directory(&self) -> Result<Option<&CodeDirectoryBlob<'a>>, AppleCodesignError> {
        match self.find_slot(CodeSigningSlot::CodeDirectory) {
            Some(ParsedBlob {
                blob: BlobData::CodeDirectory(cd),
                ..
            }) => Ok(Some(cd)),
            Some(_) => Err(AppleCodesignError::BadMagic("code directory blob")),
            None => Ok(None),
        }
    }

    /// Resolve all code directories, primary first, with their raw bytes.
    ///
    /// The raw bytes are what cdhashes are computed over.
    pub fn all_code_directories(
        &self,
    ) -> Result<Vec<(&CodeDirectoryBlob<'a>, &'a [u8])>, AppleCodesignError> {
        let mut res = Vec::new();

        for parsed in &self.blobs {
            let slot = parsed.blob_entry.slot;

            if slot == CodeSigningSlot::CodeDirectory || slot.is_alternate_code_directory() {
                match &parsed.blob {
                    BlobData::CodeDirectory(cd) => {
                        res.push((slot, cd.as_ref(), parsed.blob_entry.data))
                    }
                    _ => return Err(AppleCodesignError::BadMagic("code directory blob")),
                }
            }
        }

        // Slot 0 sorts before the alternates, which sort by index.
        res.sort_by_key(|(slot, _, _)| *slot);

        let res = res.into_iter().map(|(_, cd, data)| (cd, data)).collect();

        Ok(res)
    }

    /// Resolve the entitlements blob, if present.
    pub fn entitlements(&self) -> Result<Option<&EntitlementsBlob<'a>>, AppleCodesignError> {
        match self.find_slot(CodeSigningSlot::Entitlements) {
            Some(ParsedBlob {
                blob: BlobData::Entitlements(entitlements),
                ..
            }) => Ok(Some(entitlements)),
            Some(_) => Err(AppleCodesignError::BadMagic("entitlements blob")),
            None => Ok(None),
        }
    }

    /// Resolve the requirement set blob, if present.
    pub fn code_requirements(
        &self,
    ) -> Result<Option<&RequirementSetBlob<'a>>, AppleCodesignError> {
        match self.find_slot(CodeSigningSlot::RequirementSet) {
            Some(ParsedBlob {
                blob: BlobData::RequirementSet(reqs),
                ..
            }) => Ok(Some(reqs)),
            Some(_) => Err(AppleCodesignError::BadMagic("requirements blob")),
            None => Ok(None),
        }
    }

    /// Attempt to resolve raw CMS signature data.
    ///
    /// The returned data is likely DER PKCS#7 with the root object
    /// pkcs7-signedData (1.2.840.113549.1.7.2).
    pub fn signature_data(&self) -> Result<Option<&[u8]>, AppleCodesignError> {
        match self.find_slot(CodeSigningSlot::Signature) {
            Some(ParsedBlob {
                blob: BlobData::BlobWrapper(wrapper),
                ..
            }) => Ok(Some(wrapper.data())),
            Some(_) => Err(AppleCodesignError::BadMagic("blob wrapper blob")),
            None => Ok(None),
        }
    }

    /// Obtain the parsed CMS [SignedData].
    pub fn signed_data(&self) -> Result<Option<SignedData>, AppleCodesignError> {
        match self.signature_data()? {
            Some(data) if !data.is_empty() => Ok(Some(SignedData::parse_ber(data)?)),
            _ => Ok(None),
        }
    }

    /// Render a human readable description of every blob.
    pub fn describe(&self) -> Result<String, AppleCodesignError> {
        let mut s = String::new();

        let _ = writeln!(
            s,
            "superblob: {} bytes, {} blobs",
            self.length,
            self.blobs.len()
        );

        for parsed in &self.blobs {
            let entry = &parsed.blob_entry;
            let _ = writeln!(
                s,
                "- slot {:?}: {:?} at offset {}, {} bytes",
                entry.slot, entry.magic, entry.offset, entry.length
            );

            match &parsed.blob {
                BlobData::CodeDirectory(cd) => {
                    let _ = writeln!(s, "  version: {:#x}", cd.version);
                    let _ = writeln!(s, "  identifier: {}", cd.ident);
                    if let Some(team) = &cd.team_name {
                        let _ = writeln!(s, "  team: {}", team);
                    }
                    let _ = writeln!(s, "  digest: {}", cd.hash_type);
                    let _ = writeln!(s, "  code limit: {}", cd.code_limit);
                    let _ = writeln!(s, "  page size: {}", cd.page_size);
                    let _ = writeln!(
                        s,
                        "  cdhash: {}",
                        hex::encode(parsed.digest_with(cd.hash_type)?)
                    );
                    for (slot, digest) in &cd.special_hashes {
                        let _ = writeln!(s, "  special {:?}: {}", slot, digest.as_hex());
                    }
                    for (i, digest) in cd.code_hashes.iter().enumerate() {
                        let _ = writeln!(s, "  code {}: {}", i, digest.as_hex());
                    }
                }
                BlobData::RequirementSet(reqs) => {
                    for (typ, req) in &reqs.requirements {
                        let _ = writeln!(s, "  {:?}: {}", typ, req.parse_expression()?);
                    }
                }
                BlobData::Requirement(req) => {
                    let _ = writeln!(s, "  {}", req.parse_expression()?);
                }
                BlobData::Entitlements(entitlements) => {
                    for line in entitlements.as_str().lines() {
                        let _ = writeln!(s, "  {}", line);
                    }
                }
                BlobData::EntitlementsDer(_) => {}
                BlobData::BlobWrapper(wrapper) => {
                    let _ = writeln!(s, "  CMS data: {} bytes", wrapper.data().len());
                }
            }
        }

        Ok(s)
    }
}
