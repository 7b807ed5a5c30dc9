// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::verify::VerificationProblem,
    cryptographic_message_syntax::CmsError,
    std::path::PathBuf,
    thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// Unified error type for Mach-O code signing.
#[derive(Debug, Error)]
pub enum AppleCodesignError {
    #[error("{0}")]
    CliGeneralError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data structure parse error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("read of {len} bytes at offset {offset} exceeds limit {limit}")]
    CursorOutOfBounds { offset: u64, len: u64, limit: u64 },

    #[error("invalid Mach-O binary: {0}")]
    InvalidBinary(String),

    #[error("binary does not have code signature data")]
    BinaryNoCodeSignature,

    #[error("Code signature is missing for {0}")]
    SliceNoCodeSignature(String),

    #[error("bad header magic in {0}")]
    BadMagic(&'static str),

    #[error("SuperBlob data is malformed")]
    SuperblobMalformed,

    #[error("unknown blob magic in superblob: {0:#x}")]
    UnknownBlobMagic(u32),

    #[error("error parsing plist XML: {0}")]
    PlistParseXml(plist::Error),

    #[error("error serializing plist to XML: {0}")]
    PlistSerializeXml(plist::Error),

    #[error("malformed identifier string in code directory")]
    CodeDirectoryMalformedIdentifier,

    #[error("malformed team name string in code directory")]
    CodeDirectoryMalformedTeam,

    #[error("code directory hash size {hash_size} does not match digest {digest}")]
    CodeDirectoryHashSizeMismatch { digest: String, hash_size: u8 },

    #[error("code directory data malformed: {0}")]
    CodeDirectoryMalformed(&'static str),

    #[error("code directory declares {0} special slots; at most 7 are supported")]
    CodeDirectoryTooManySpecialSlots(u32),

    #[error("code slot count {actual} does not match expected {expected}")]
    CodeSlotCountMismatch { expected: usize, actual: usize },

    #[error("CodeSlot hash mismatch at pos: {0:#x}")]
    CodeSlotHashMismatch(usize),

    #[error("functionality not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("entitlements data not valid UTF-8: {0}")]
    EntitlementsBadUtf8(std::str::Utf8Error),

    #[error("unknown code requirement opcode: {0}")]
    RequirementUnknownOpcode(u32),

    #[error("unknown code requirement match expression: {0}")]
    RequirementUnknownMatchExpression(u32),

    #[error("code requirement data malformed: {0}")]
    RequirementMalformed(&'static str),

    #[error("plist error in code resources: {0}")]
    ResourcesPlist(plist::Error),

    #[error("plist parse error in code resources: {0}")]
    ResourcesPlistParse(String),

    #[error("bad regular expression in code resources: {0}; {1}")]
    ResourcesBadRegex(String, regex::Error),

    #[error("file not present in seal {0}")]
    SealFileNotPresent(String),

    #[error("file signature error, computed: {computed} expected: {expected}")]
    SealFileMismatch { computed: String, expected: String },

    #[error("files are mentioned in reference but missing in actualSeal: {0}")]
    SealFilesMissing(String),

    #[error("error building embedded signature: {0}")]
    SignatureBuilder(&'static str),

    #[error("malformed CMS signed attribute: {0}")]
    CmsAttributeMalformed(&'static str),

    #[error("no identifier string provided")]
    NoIdentifier,

    #[error("no signing certificate")]
    NoSigningCertificate,

    #[error("signature data too large: {needed} bytes needed but only {available} reserved")]
    SignatureDataTooLarge { needed: usize, available: usize },

    #[error("unknown digest algorithm")]
    DigestUnknownAlgorithm,

    #[error("unsupported digest algorithm")]
    DigestUnsupportedAlgorithm,

    #[error("no Info.plist found; probably not a bundle: {0}")]
    BundleNoInfoPlist(PathBuf),

    #[error("bundle executable does not exist: {0}")]
    BundleNoMainExecutable(PathBuf),

    #[error("Bundle is not signed, no CodeResources found: {0}")]
    BundleNotSigned(PathBuf),

    #[error("codesign_allocate not found; use CODESIGN_ALLOCATE env variable or settings to specify it")]
    CodesignAllocateNotFound,

    #[error("codesign_allocate failed due {status} with out {stdout}")]
    CodesignAllocateFailed { status: String, stdout: String },

    #[error("ASN.1 decode error: {0}")]
    Asn1Decode(bcder::decode::DecodeError<std::convert::Infallible>),

    #[error("PEM error: {0}")]
    CertificatePem(pem::PemError),

    #[error("incorrect password given when decrypting PFX data")]
    PfxBadPassword,

    #[error("error parsing PFX data: {0}")]
    PfxParseError(String),

    #[error("verification failed: {0}")]
    Verification(VerificationProblem),

    #[error("problems reported during verification")]
    VerificationProblems,
}
