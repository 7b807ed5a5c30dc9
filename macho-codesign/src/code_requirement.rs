// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Code requirement language primitives.

Code signatures contain a binary encoded expression tree denoting requirements.

# Binary Encoding

Requirement expressions consist of opcodes. An opcode is defined by a u32 where
the high byte contains flags and the lower 3 bytes denote the opcode value.

Some opcodes have payloads and the payload varies by opcode. A common pattern
is to length encode arbitrary data via a u32 denoting the length and N bytes
to follow.

String data is not guaranteed to be terminated by a NULL. However, variable
length data is padded with NULL bytes so the next opcode is always aligned
on 4 byte boundaries.

`And` and `Or` are binary. Longer conjunctions nest to the right.
*/

use {
    crate::{cursor::BlobWriter, error::AppleCodesignError},
    bcder::Oid,
    bytes::Bytes,
    chrono::{DateTime, TimeZone, Utc},
    scroll::Pread,
    std::fmt::{Display, Formatter},
};

const OPCODE_FLAG_MASK: u32 = 0xff000000;
const OPCODE_VALUE_MASK: u32 = 0x00ffffff;

/// DER content of OID 1.2.840.113635.100.6.2.1, present on Apple WWDR intermediates.
pub const OID_APPLE_WWDR_INTERMEDIATE: &[u8] =
    &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x06, 0x02, 0x01];

fn truncated() -> AppleCodesignError {
    AppleCodesignError::RequirementMalformed("truncated data")
}

/// Read a length prefixed value and skip its padding.
fn read_data(data: &[u8]) -> Result<(&[u8], &[u8]), AppleCodesignError> {
    let length = data.pread_with::<u32>(0, scroll::BE)? as usize;

    let value = data.get(4..4 + length).ok_or_else(truncated)?;

    // Next element is aligned on next 4 byte boundary.
    let offset = 4 + length + (4 - length % 4) % 4;
    let remaining = data.get(offset..).ok_or_else(truncated)?;

    Ok((value, remaining))
}

fn write_data(dest: &mut BlobWriter, data: &[u8]) -> Result<(), AppleCodesignError> {
    dest.write_u32(data.len() as u32)?;
    dest.write_bytes(data)?;
    dest.write_zeros((4 - data.len() % 4) % 4)
}

fn read_i32(data: &[u8]) -> Result<(i32, &[u8]), AppleCodesignError> {
    Ok((data.pread_with::<i32>(0, scroll::BE)?, &data[4..]))
}

fn read_string<'a>(
    data: &'a [u8],
    what: &'static str,
) -> Result<(String, &'a [u8]), AppleCodesignError> {
    let (value, data) = read_data(data)?;
    let s = std::str::from_utf8(value)
        .map_err(|_| AppleCodesignError::RequirementMalformed(what))?;

    Ok((s.to_string(), data))
}

fn read_oid(data: &[u8]) -> Result<(Oid, &[u8]), AppleCodesignError> {
    let (value, data) = read_data(data)?;

    Ok((Oid(Bytes::copy_from_slice(value)), data))
}

/// Format a certificate slot's value to human form.
fn format_certificate_slot(slot: i32) -> String {
    match slot {
        -1 => "root".to_string(),
        0 => "leaf".to_string(),
        _ => format!("{}", slot),
    }
}

/// A value in a code requirement expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeRequirementValue {
    String(String),
    Bytes(Vec<u8>),
}

impl From<&[u8]> for CodeRequirementValue {
    fn from(value: &[u8]) -> Self {
        let is_ascii_printable = |c: &u8| -> bool {
            c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || c.is_ascii_punctuation()
        };

        match std::str::from_utf8(value) {
            Ok(s) if value.iter().all(is_ascii_printable) => Self::String(s.to_string()),
            _ => Self::Bytes(value.to_vec()),
        }
    }
}

impl From<&str> for CodeRequirementValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for CodeRequirementValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl Display for CodeRequirementValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                f.write_str(s)
            }
            Self::String(s) => f.write_fmt(format_args!("\"{}\"", s)),
            Self::Bytes(data) => f.write_fmt(format_args!("H\"{}\"", hex::encode(data))),
        }
    }
}

impl CodeRequirementValue {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::String(s) => s.as_bytes(),
            Self::Bytes(data) => data,
        }
    }
}

/// An opcode representing a code requirement expression.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
enum RequirementOpCode {
    False = 0,
    True = 1,
    Identifier = 2,
    AnchorApple = 3,
    AnchorCertificateHash = 4,
    InfoKeyValue = 5,
    And = 6,
    Or = 7,
    CodeDirectoryHash = 8,
    Not = 9,
    InfoPlistExpression = 10,
    CertificateField = 11,
    CertificateTrusted = 12,
    AnchorTrusted = 13,
    CertificateGeneric = 14,
    AnchorAppleGeneric = 15,
    EntitlementsField = 16,
    CertificatePolicy = 17,
    NamedAnchor = 18,
    NamedCode = 19,
    Platform = 20,
    Notarized = 21,
    CertificateFieldDate = 22,
    LegacyDeveloperId = 23,
}

impl TryFrom<u32> for RequirementOpCode {
    type Error = AppleCodesignError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => Self::False,
            1 => Self::True,
            2 => Self::Identifier,
            3 => Self::AnchorApple,
            4 => Self::AnchorCertificateHash,
            5 => Self::InfoKeyValue,
            6 => Self::And,
            7 => Self::Or,
            8 => Self::CodeDirectoryHash,
            9 => Self::Not,
            10 => Self::InfoPlistExpression,
            11 => Self::CertificateField,
            12 => Self::CertificateTrusted,
            13 => Self::AnchorTrusted,
            14 => Self::CertificateGeneric,
            15 => Self::AnchorAppleGeneric,
            16 => Self::EntitlementsField,
            17 => Self::CertificatePolicy,
            18 => Self::NamedAnchor,
            19 => Self::NamedCode,
            20 => Self::Platform,
            21 => Self::Notarized,
            22 => Self::CertificateFieldDate,
            23 => Self::LegacyDeveloperId,
            _ => return Err(AppleCodesignError::RequirementUnknownOpcode(v)),
        })
    }
}

/// Defines a code requirement expression.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeRequirementExpression {
    /// `false`
    False,

    /// `true`
    True,

    /// `identifier <string>`
    ///
    /// Matches the signing identifier.
    Identifier(String),

    /// `anchor apple`
    AnchorApple,

    /// `certificate <slot> = H"<hash>"`
    ///
    /// Slot followed by length prefixed digest of the certificate.
    AnchorCertificateHash(i32, Vec<u8>),

    /// `info[<key>] = <value>`
    ///
    /// Legacy form of [Self::InfoPlistKeyField] with equality match.
    InfoKeyValue(String, String),

    /// `<expr> and <expr>`
    And(Box<CodeRequirementExpression>, Box<CodeRequirementExpression>),

    /// `<expr> or <expr>`
    Or(Box<CodeRequirementExpression>, Box<CodeRequirementExpression>),

    /// `cdhash H"<hash>"`
    CodeDirectoryHash(Vec<u8>),

    /// `! <expr>`
    Not(Box<CodeRequirementExpression>),

    /// `info[<key>] <match>`
    InfoPlistKeyField(String, CodeRequirementMatchExpression),

    /// `certificate <slot>[<field>] <match>`
    CertificateField(i32, String, CodeRequirementMatchExpression),

    /// `certificate <slot> trusted`
    CertificateTrusted(i32),

    /// `anchor trusted`
    AnchorTrusted,

    /// `certificate <slot>[field.<oid>] <match>`
    CertificateGeneric(i32, Oid, CodeRequirementMatchExpression),

    /// `anchor apple generic`
    AnchorAppleGeneric,

    /// `entitlement[<key>] <match>`
    EntitlementsKey(String, CodeRequirementMatchExpression),

    /// `certificate <slot>[policy.<oid>] <match>`
    CertificatePolicy(i32, Oid, CodeRequirementMatchExpression),

    /// `anchor apple <name>`
    NamedAnchor(String),

    /// `(<name>)`
    NamedCode(String),

    /// `platform = <value>`
    Platform(u32),

    /// `notarized`
    Notarized,

    /// `certificate <slot>[timestamp.<oid>] <match>`
    CertificateFieldDate(i32, Oid, CodeRequirementMatchExpression),

    /// `legacy`
    LegacyDeveloperId,

    /// An expression whose opcode carried flag bits in its high byte.
    ///
    /// Flags do not change the rendered expression but are written back out
    /// with the inner opcode.
    Flagged(u32, Box<CodeRequirementExpression>),
}

/// Syntax levels driving parenthesization when rendering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SyntaxLevel {
    Primary,
    And,
    Or,
    Top,
}

impl Display for CodeRequirementExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_level(f, SyntaxLevel::Top)
    }
}

impl CodeRequirementExpression {
    fn fmt_level(&self, f: &mut Formatter<'_>, level: SyntaxLevel) -> std::fmt::Result {
        match self {
            Self::False => f.write_str("false"),
            Self::True => f.write_str("true"),
            Self::Identifier(value) => f.write_fmt(format_args!(
                "identifier {}",
                CodeRequirementValue::from(value.as_str())
            )),
            Self::AnchorApple => f.write_str("anchor apple"),
            Self::AnchorCertificateHash(slot, digest) => f.write_fmt(format_args!(
                "certificate {} = H\"{}\"",
                format_certificate_slot(*slot),
                hex::encode(digest)
            )),
            Self::InfoKeyValue(key, value) => f.write_fmt(format_args!(
                "info[{}] = {}",
                key,
                CodeRequirementValue::from(value.as_str())
            )),
            Self::And(a, b) => Self::fmt_binary(f, level, SyntaxLevel::And, "and", a, b),
            Self::Or(a, b) => Self::fmt_binary(f, level, SyntaxLevel::Or, "or", a, b),
            Self::CodeDirectoryHash(digest) => {
                f.write_fmt(format_args!("cdhash H\"{}\"", hex::encode(digest)))
            }
            Self::Not(expr) => {
                f.write_str("! ")?;
                expr.fmt_level(f, SyntaxLevel::Primary)
            }
            Self::InfoPlistKeyField(key, expr) => {
                f.write_fmt(format_args!("info[{}] {}", key, expr))
            }
            Self::CertificateField(slot, field, expr) => f.write_fmt(format_args!(
                "certificate {}[{}] {}",
                format_certificate_slot(*slot),
                field,
                expr
            )),
            Self::CertificateTrusted(slot) => f.write_fmt(format_args!(
                "certificate {} trusted",
                format_certificate_slot(*slot)
            )),
            Self::AnchorTrusted => f.write_str("anchor trusted"),
            Self::CertificateGeneric(slot, oid, expr) => f.write_fmt(format_args!(
                "certificate {}[field.{}] {}",
                format_certificate_slot(*slot),
                oid,
                expr
            )),
            Self::AnchorAppleGeneric => f.write_str("anchor apple generic"),
            Self::EntitlementsKey(key, expr) => {
                f.write_fmt(format_args!("entitlement[{}] {}", key, expr))
            }
            Self::CertificatePolicy(slot, oid, expr) => f.write_fmt(format_args!(
                "certificate {}[policy.{}] {}",
                format_certificate_slot(*slot),
                oid,
                expr
            )),
            Self::NamedAnchor(name) => f.write_fmt(format_args!("anchor apple {}", name)),
            Self::NamedCode(name) => f.write_fmt(format_args!("({})", name)),
            Self::Platform(platform) => f.write_fmt(format_args!("platform = {}", platform)),
            Self::Notarized => f.write_str("notarized"),
            Self::CertificateFieldDate(slot, oid, expr) => f.write_fmt(format_args!(
                "certificate {}[timestamp.{}] {}",
                format_certificate_slot(*slot),
                oid,
                expr
            )),
            Self::LegacyDeveloperId => f.write_str("legacy"),
            Self::Flagged(_, expr) => expr.fmt_level(f, level),
        }
    }

    fn fmt_binary(
        f: &mut Formatter<'_>,
        level: SyntaxLevel,
        own: SyntaxLevel,
        word: &str,
        a: &Self,
        b: &Self,
    ) -> std::fmt::Result {
        let parens = level < own;

        if parens {
            f.write_str("(")?;
        }
        a.fmt_level(f, own)?;
        f.write_fmt(format_args!(" {} ", word))?;
        b.fmt_level(f, own)?;
        if parens {
            f.write_str(")")?;
        }

        Ok(())
    }

    fn opcode(&self) -> RequirementOpCode {
        match self {
            Self::False => RequirementOpCode::False,
            Self::True => RequirementOpCode::True,
            Self::Identifier(_) => RequirementOpCode::Identifier,
            Self::AnchorApple => RequirementOpCode::AnchorApple,
            Self::AnchorCertificateHash(_, _) => RequirementOpCode::AnchorCertificateHash,
            Self::InfoKeyValue(_, _) => RequirementOpCode::InfoKeyValue,
            Self::And(_, _) => RequirementOpCode::And,
            Self::Or(_, _) => RequirementOpCode::Or,
            Self::CodeDirectoryHash(_) => RequirementOpCode::CodeDirectoryHash,
            Self::Not(_) => RequirementOpCode::Not,
            Self::InfoPlistKeyField(_, _) => RequirementOpCode::InfoPlistExpression,
            Self::CertificateField(_, _, _) => RequirementOpCode::CertificateField,
            Self::CertificateTrusted(_) => RequirementOpCode::CertificateTrusted,
            Self::AnchorTrusted => RequirementOpCode::AnchorTrusted,
            Self::CertificateGeneric(_, _, _) => RequirementOpCode::CertificateGeneric,
            Self::AnchorAppleGeneric => RequirementOpCode::AnchorAppleGeneric,
            Self::EntitlementsKey(_, _) => RequirementOpCode::EntitlementsField,
            Self::CertificatePolicy(_, _, _) => RequirementOpCode::CertificatePolicy,
            Self::NamedAnchor(_) => RequirementOpCode::NamedAnchor,
            Self::NamedCode(_) => RequirementOpCode::NamedCode,
            Self::Platform(_) => RequirementOpCode::Platform,
            Self::Notarized => RequirementOpCode::Notarized,
            Self::CertificateFieldDate(_, _, _) => RequirementOpCode::CertificateFieldDate,
            Self::LegacyDeveloperId => RequirementOpCode::LegacyDeveloperId,
            Self::Flagged(_, expr) => expr.opcode(),
        }
    }

    /// Construct an expression element by reading from a slice.
    ///
    /// Returns the newly constructed element and remaining data in the slice.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, &[u8]), AppleCodesignError> {
        let opcode_raw = data.pread_with::<u32>(0, scroll::BE)?;

        let flags = opcode_raw & OPCODE_FLAG_MASK;
        let opcode = RequirementOpCode::try_from(opcode_raw & OPCODE_VALUE_MASK)?;

        let data = &data[4..];

        let (expr, data) = match opcode {
            RequirementOpCode::False => (Self::False, data),
            RequirementOpCode::True => (Self::True, data),
            RequirementOpCode::Identifier => {
                let (value, data) = read_string(data, "identifier value not a UTF-8 string")?;
                (Self::Identifier(value), data)
            }
            RequirementOpCode::AnchorApple => (Self::AnchorApple, data),
            RequirementOpCode::AnchorCertificateHash => {
                let (slot, data) = read_i32(data)?;
                let (digest, data) = read_data(data)?;
                (Self::AnchorCertificateHash(slot, digest.to_vec()), data)
            }
            RequirementOpCode::InfoKeyValue => {
                let (key, data) = read_string(data, "info key not a UTF-8 string")?;
                let (value, data) = read_string(data, "info value not a UTF-8 string")?;
                (Self::InfoKeyValue(key, value), data)
            }
            RequirementOpCode::And => {
                let (a, data) = Self::from_bytes(data)?;
                let (b, data) = Self::from_bytes(data)?;
                (Self::And(Box::new(a), Box::new(b)), data)
            }
            RequirementOpCode::Or => {
                let (a, data) = Self::from_bytes(data)?;
                let (b, data) = Self::from_bytes(data)?;
                (Self::Or(Box::new(a), Box::new(b)), data)
            }
            RequirementOpCode::CodeDirectoryHash => {
                let (value, data) = read_data(data)?;
                (Self::CodeDirectoryHash(value.to_vec()), data)
            }
            RequirementOpCode::Not => {
                let (expr, data) = Self::from_bytes(data)?;
                (Self::Not(Box::new(expr)), data)
            }
            RequirementOpCode::InfoPlistExpression => {
                let (key, data) = read_string(data, "key is not valid UTF-8")?;
                let (expr, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                (Self::InfoPlistKeyField(key, expr), data)
            }
            RequirementOpCode::CertificateField => {
                let (slot, data) = read_i32(data)?;
                let (field, data) = read_string(data, "certificate field is not valid UTF-8")?;
                let (expr, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                (Self::CertificateField(slot, field, expr), data)
            }
            RequirementOpCode::CertificateTrusted => {
                let (slot, data) = read_i32(data)?;
                (Self::CertificateTrusted(slot), data)
            }
            RequirementOpCode::AnchorTrusted => (Self::AnchorTrusted, data),
            RequirementOpCode::CertificateGeneric => {
                let (slot, data) = read_i32(data)?;
                let (oid, data) = read_oid(data)?;
                let (expr, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                (Self::CertificateGeneric(slot, oid, expr), data)
            }
            RequirementOpCode::AnchorAppleGeneric => (Self::AnchorAppleGeneric, data),
            RequirementOpCode::EntitlementsField => {
                let (key, data) = read_string(data, "entitlement key is not UTF-8")?;
                let (expr, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                (Self::EntitlementsKey(key, expr), data)
            }
            RequirementOpCode::CertificatePolicy => {
                let (slot, data) = read_i32(data)?;
                let (oid, data) = read_oid(data)?;
                let (expr, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                (Self::CertificatePolicy(slot, oid, expr), data)
            }
            RequirementOpCode::NamedAnchor => {
                let (name, data) = read_string(data, "named anchor isn't UTF-8")?;
                (Self::NamedAnchor(name), data)
            }
            RequirementOpCode::NamedCode => {
                let (name, data) = read_string(data, "named code isn't UTF-8")?;
                (Self::NamedCode(name), data)
            }
            RequirementOpCode::Platform => {
                let value = data.pread_with::<u32>(0, scroll::BE)?;
                (Self::Platform(value), &data[4..])
            }
            RequirementOpCode::Notarized => (Self::Notarized, data),
            RequirementOpCode::CertificateFieldDate => {
                let (slot, data) = read_i32(data)?;
                let (oid, data) = read_oid(data)?;
                let (expr, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                (Self::CertificateFieldDate(slot, oid, expr), data)
            }
            RequirementOpCode::LegacyDeveloperId => (Self::LegacyDeveloperId, data),
        };

        if flags == 0 {
            Ok((expr, data))
        } else {
            Ok((Self::Flagged(flags, Box::new(expr)), data))
        }
    }

    /// Write binary representation of this expression to a destination.
    ///
    /// Each node writes its opcode followed by its operands, recursing into
    /// sub-expressions in order.
    pub fn write_to(&self, dest: &mut BlobWriter) -> Result<(), AppleCodesignError> {
        self.write_with_flags(dest, 0)
    }

    fn write_with_flags(
        &self,
        dest: &mut BlobWriter,
        flags: u32,
    ) -> Result<(), AppleCodesignError> {
        if let Self::Flagged(inner_flags, expr) = self {
            return expr.write_with_flags(dest, flags | (inner_flags & OPCODE_FLAG_MASK));
        }

        dest.write_u32(self.opcode() as u32 | flags)?;

        match self {
            Self::False
            | Self::True
            | Self::AnchorApple
            | Self::AnchorTrusted
            | Self::AnchorAppleGeneric
            | Self::Notarized
            | Self::LegacyDeveloperId => {}
            Self::Identifier(s) | Self::NamedAnchor(s) | Self::NamedCode(s) => {
                write_data(dest, s.as_bytes())?;
            }
            Self::AnchorCertificateHash(slot, digest) => {
                dest.write_i32(*slot)?;
                write_data(dest, digest)?;
            }
            Self::InfoKeyValue(key, value) => {
                write_data(dest, key.as_bytes())?;
                write_data(dest, value.as_bytes())?;
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.write_to(dest)?;
                b.write_to(dest)?;
            }
            Self::CodeDirectoryHash(digest) => {
                write_data(dest, digest)?;
            }
            Self::Not(expr) => {
                expr.write_to(dest)?;
            }
            Self::InfoPlistKeyField(key, m) | Self::EntitlementsKey(key, m) => {
                write_data(dest, key.as_bytes())?;
                m.write_to(dest)?;
            }
            Self::CertificateField(slot, field, m) => {
                dest.write_i32(*slot)?;
                write_data(dest, field.as_bytes())?;
                m.write_to(dest)?;
            }
            Self::CertificateTrusted(slot) => {
                dest.write_i32(*slot)?;
            }
            Self::CertificateGeneric(slot, oid, m)
            | Self::CertificatePolicy(slot, oid, m)
            | Self::CertificateFieldDate(slot, oid, m) => {
                dest.write_i32(*slot)?;
                write_data(dest, oid.as_ref())?;
                m.write_to(dest)?;
            }
            Self::Platform(value) => {
                dest.write_u32(*value)?;
            }
            Self::Flagged(_, _) => {}
        }

        Ok(())
    }

    /// Obtain the binary representation of this expression.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AppleCodesignError> {
        let mut writer = BlobWriter::default();
        self.write_to(&mut writer)?;

        Ok(writer.into_inner())
    }

    /// Construct the designated requirement used when signing.
    ///
    /// `identifier <identifier> and anchor apple generic and
    /// certificate leaf[subject.CN] = <common_name> and
    /// certificate 1[field.1.2.840.113635.100.6.2.1] exists`
    pub fn designated_requirement(identifier: &str, common_name: &str) -> Self {
        Self::And(
            Box::new(Self::Identifier(identifier.to_string())),
            Box::new(Self::And(
                Box::new(Self::AnchorAppleGeneric),
                Box::new(Self::And(
                    Box::new(Self::CertificateField(
                        0,
                        "subject.CN".to_string(),
                        CodeRequirementMatchExpression::Equal(common_name.into()),
                    )),
                    Box::new(Self::CertificateGeneric(
                        1,
                        Oid(Bytes::from_static(OID_APPLE_WWDR_INTERMEDIATE)),
                        CodeRequirementMatchExpression::Exists,
                    )),
                )),
            )),
        )
    }
}

/// A match expression type.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
enum MatchType {
    Exists = 0,
    Equal = 1,
    Contains = 2,
    BeginsWith = 3,
    EndsWith = 4,
    LessThan = 5,
    GreaterThan = 6,
    LessThanEqual = 7,
    GreaterThanEqual = 8,
    On = 9,
    Before = 10,
    After = 11,
    OnOrBefore = 12,
    OnOrAfter = 13,
    Absent = 14,
}

impl TryFrom<u32> for MatchType {
    type Error = AppleCodesignError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => Self::Exists,
            1 => Self::Equal,
            2 => Self::Contains,
            3 => Self::BeginsWith,
            4 => Self::EndsWith,
            5 => Self::LessThan,
            6 => Self::GreaterThan,
            7 => Self::LessThanEqual,
            8 => Self::GreaterThanEqual,
            9 => Self::On,
            10 => Self::Before,
            11 => Self::After,
            12 => Self::OnOrBefore,
            13 => Self::OnOrAfter,
            14 => Self::Absent,
            _ => return Err(AppleCodesignError::RequirementUnknownMatchExpression(v)),
        })
    }
}

/// An instance of a match expression in a [CodeRequirementExpression].
///
/// Value carrying variants hold a length prefixed, padded operand. Date
/// variants hold a big-endian i64 of seconds since the UNIX epoch.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeRequirementMatchExpression {
    Exists,
    Equal(CodeRequirementValue),
    Contains(CodeRequirementValue),
    BeginsWith(CodeRequirementValue),
    EndsWith(CodeRequirementValue),
    LessThan(CodeRequirementValue),
    GreaterThan(CodeRequirementValue),
    LessThanEqual(CodeRequirementValue),
    GreaterThanEqual(CodeRequirementValue),
    On(DateTime<Utc>),
    Before(DateTime<Utc>),
    After(DateTime<Utc>),
    OnOrBefore(DateTime<Utc>),
    OnOrAfter(DateTime<Utc>),
    Absent,
}

impl Display for CodeRequirementMatchExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exists => f.write_str("/* exists */"),
            Self::Equal(value) => f.write_fmt(format_args!("= {}", value)),
            Self::Contains(value) => f.write_fmt(format_args!("~ {}", value)),
            Self::BeginsWith(value) => f.write_fmt(format_args!("= {}*", value)),
            Self::EndsWith(value) => f.write_fmt(format_args!("= *{}", value)),
            Self::LessThan(value) => f.write_fmt(format_args!("< {}", value)),
            Self::GreaterThan(value) => f.write_fmt(format_args!("> {}", value)),
            Self::LessThanEqual(value) => f.write_fmt(format_args!("<= {}", value)),
            Self::GreaterThanEqual(value) => f.write_fmt(format_args!(">= {}", value)),
            Self::On(value) => f.write_fmt(format_args!("= <{}>", value)),
            Self::Before(value) => f.write_fmt(format_args!("< <{}>", value)),
            Self::After(value) => f.write_fmt(format_args!("> <{}>", value)),
            Self::OnOrBefore(value) => f.write_fmt(format_args!("<= <{}>", value)),
            Self::OnOrAfter(value) => f.write_fmt(format_args!(">= <{}>", value)),
            Self::Absent => f.write_str("/* absent */"),
        }
    }
}

impl CodeRequirementMatchExpression {
    fn match_type(&self) -> MatchType {
        match self {
            Self::Exists => MatchType::Exists,
            Self::Equal(_) => MatchType::Equal,
            Self::Contains(_) => MatchType::Contains,
            Self::BeginsWith(_) => MatchType::BeginsWith,
            Self::EndsWith(_) => MatchType::EndsWith,
            Self::LessThan(_) => MatchType::LessThan,
            Self::GreaterThan(_) => MatchType::GreaterThan,
            Self::LessThanEqual(_) => MatchType::LessThanEqual,
            Self::GreaterThanEqual(_) => MatchType::GreaterThanEqual,
            Self::On(_) => MatchType::On,
            Self::Before(_) => MatchType::Before,
            Self::After(_) => MatchType::After,
            Self::OnOrBefore(_) => MatchType::OnOrBefore,
            Self::OnOrAfter(_) => MatchType::OnOrAfter,
            Self::Absent => MatchType::Absent,
        }
    }

    /// Parse a match expression from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, &[u8]), AppleCodesignError> {
        let typ = MatchType::try_from(data.pread_with::<u32>(0, scroll::BE)?)?;
        let data = &data[4..];

        fn value(data: &[u8]) -> Result<(CodeRequirementValue, &[u8]), AppleCodesignError> {
            let (value, data) = read_data(data)?;
            Ok((CodeRequirementValue::from(value), data))
        }

        fn date(data: &[u8]) -> Result<(DateTime<Utc>, &[u8]), AppleCodesignError> {
            let seconds = data.pread_with::<i64>(0, scroll::BE)?;
            let date = Utc
                .timestamp_opt(seconds, 0)
                .single()
                .ok_or(AppleCodesignError::RequirementMalformed("timestamp out of range"))?;
            Ok((date, &data[8..]))
        }

        Ok(match typ {
            MatchType::Exists => (Self::Exists, data),
            MatchType::Absent => (Self::Absent, data),
            MatchType::Equal => {
                let (v, data) = value(data)?;
                (Self::Equal(v), data)
            }
            MatchType::Contains => {
                let (v, data) = value(data)?;
                (Self::Contains(v), data)
            }
            MatchType::BeginsWith => {
                let (v, data) = value(data)?;
                (Self::BeginsWith(v), data)
            }
            MatchType::EndsWith => {
                let (v, data) = value(data)?;
                (Self::EndsWith(v), data)
            }
            MatchType::LessThan => {
                let (v, data) = value(data)?;
                (Self::LessThan(v), data)
            }
            MatchType::GreaterThan => {
                let (v, data) = value(data)?;
                (Self::GreaterThan(v), data)
            }
            MatchType::LessThanEqual => {
                let (v, data) = value(data)?;
                (Self::LessThanEqual(v), data)
            }
            MatchType::GreaterThanEqual => {
                let (v, data) = value(data)?;
                (Self::GreaterThanEqual(v), data)
            }
            MatchType::On => {
                let (d, data) = date(data)?;
                (Self::On(d), data)
            }
            MatchType::Before => {
                let (d, data) = date(data)?;
                (Self::Before(d), data)
            }
            MatchType::After => {
                let (d, data) = date(data)?;
                (Self::After(d), data)
            }
            MatchType::OnOrBefore => {
                let (d, data) = date(data)?;
                (Self::OnOrBefore(d), data)
            }
            MatchType::OnOrAfter => {
                let (d, data) = date(data)?;
                (Self::OnOrAfter(d), data)
            }
        })
    }

    /// Write binary representation of this match expression.
    pub fn write_to(&self, dest: &mut BlobWriter) -> Result<(), AppleCodesignError> {
        dest.write_u32(self.match_type() as u32)?;

        match self {
            Self::Exists | Self::Absent => {}
            Self::Equal(v)
            | Self::Contains(v)
            | Self::BeginsWith(v)
            | Self::EndsWith(v)
            | Self::LessThan(v)
            | Self::GreaterThan(v)
            | Self::LessThanEqual(v)
            | Self::GreaterThanEqual(v) => write_data(dest, v.as_bytes())?,
            Self::On(d)
            | Self::Before(d)
            | Self::After(d)
            | Self::OnOrBefore(d)
            | Self::OnOrAfter(d) => dest.write_i64(d.timestamp())?,
        }

        Ok(())
    }
}

/// Defines the type of requirement stored in a requirement set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequirementType {
    /// What hosts may run on us.
    Host,
    /// What guests we may run.
    Guest,
    /// Designated requirement.
    Designated,
    /// What libraries we may link against.
    Library,
    /// What plug-ins we may load.
    Plugin,
    /// Unknown requirement type.
    Unknown(u32),
}

impl From<u32> for RequirementType {
    fn from(v: u32) -> Self {
        match v {
            1 => Self::Host,
            2 => Self::Guest,
            3 => Self::Designated,
            4 => Self::Library,
            5 => Self::Plugin,
            _ => Self::Unknown(v),
        }
    }
}

impl From<RequirementType> for u32 {
    fn from(t: RequirementType) -> Self {
        match t {
            RequirementType::Host => 1,
            RequirementType::Guest => 2,
            RequirementType::Designated => 3,
            RequirementType::Library => 4,
            RequirementType::Plugin => 5,
            RequirementType::Unknown(v) => v,
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::embedded_signature::{Blob, RequirementBlob, RequirementSetBlob},
    };

    fn verify_roundtrip(source: &[u8]) -> CodeRequirementExpression {
        let (expr, remaining) = CodeRequirementExpression::from_bytes(source).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(expr.to_bytes().unwrap(), source);

        expr
    }

    #[test]
    fn parse_simple_opcodes() {
        for (source, expected, text) in [
            ("00000000", CodeRequirementExpression::False, "false"),
            ("00000001", CodeRequirementExpression::True, "true"),
            ("00000003", CodeRequirementExpression::AnchorApple, "anchor apple"),
            ("0000000d", CodeRequirementExpression::AnchorTrusted, "anchor trusted"),
            (
                "0000000f",
                CodeRequirementExpression::AnchorAppleGeneric,
                "anchor apple generic",
            ),
            ("00000015", CodeRequirementExpression::Notarized, "notarized"),
            ("00000017", CodeRequirementExpression::LegacyDeveloperId, "legacy"),
        ] {
            let expr = verify_roundtrip(&hex::decode(source).unwrap());
            assert_eq!(expr, expected);
            assert_eq!(expr.to_string(), text);
        }
    }

    #[test]
    fn parse_identifier() {
        let expr = verify_roundtrip(&hex::decode("0000000200000007666f6f2e62617200").unwrap());

        assert_eq!(
            expr,
            CodeRequirementExpression::Identifier("foo.bar".into())
        );
        assert_eq!(expr.to_string(), "identifier \"foo.bar\"");
    }

    #[test]
    fn parse_anchor_certificate_hash() {
        let expr = verify_roundtrip(
            &hex::decode("00000004ffffffff00000014deadbeefdeadbeefdeadbeefdeadbeefdeadbeef")
                .unwrap(),
        );

        assert_eq!(
            expr.to_string(),
            "certificate root = H\"deadbeefdeadbeefdeadbeefdeadbeefdeadbeef\""
        );
    }

    #[test]
    fn parse_info_key_value() {
        let expr = verify_roundtrip(
            &hex::decode("00000005000000036b6579000000000576616c7565000000").unwrap(),
        );

        assert_eq!(
            expr,
            CodeRequirementExpression::InfoKeyValue("key".into(), "value".into())
        );
        assert_eq!(expr.to_string(), "info[key] = \"value\"");
    }

    #[test]
    fn parse_not_and_or() {
        let expr = verify_roundtrip(&hex::decode("000000090000000600000001000000070000000000000001").unwrap());

        assert_eq!(
            expr,
            CodeRequirementExpression::Not(Box::new(CodeRequirementExpression::And(
                Box::new(CodeRequirementExpression::True),
                Box::new(CodeRequirementExpression::Or(
                    Box::new(CodeRequirementExpression::False),
                    Box::new(CodeRequirementExpression::True),
                )),
            )))
        );
        assert_eq!(expr.to_string(), "! (true and (false or true))");
    }

    #[test]
    fn precedence() {
        use CodeRequirementExpression as E;

        let and_in_or = E::Or(
            Box::new(E::And(Box::new(E::True), Box::new(E::False))),
            Box::new(E::AnchorApple),
        );
        assert_eq!(and_in_or.to_string(), "true and false or anchor apple");

        let or_in_and = E::And(
            Box::new(E::Or(Box::new(E::True), Box::new(E::False))),
            Box::new(E::AnchorApple),
        );
        assert_eq!(or_in_and.to_string(), "(true or false) and anchor apple");
    }

    #[test]
    fn parse_certificate_field() {
        let expr = verify_roundtrip(
            &hex::decode("0000000b000000000000000a7375626a6563742e434e0000000000010000000346656f00")
                .unwrap(),
        );

        assert_eq!(
            expr,
            CodeRequirementExpression::CertificateField(
                0,
                "subject.CN".into(),
                CodeRequirementMatchExpression::Equal("Feo".into())
            )
        );
        assert_eq!(expr.to_string(), "certificate leaf[subject.CN] = \"Feo\"");
    }

    #[test]
    fn parse_certificate_generic() {
        let expr =
            verify_roundtrip(&hex::decode("0000000effffffff000000035504030000000000").unwrap());

        assert_eq!(expr.to_string(), "certificate root[field.2.5.4.3] /* exists */");
    }

    #[test]
    fn parse_platform_and_named() {
        let expr = verify_roundtrip(&hex::decode("000000140000000a").unwrap());
        assert_eq!(expr.to_string(), "platform = 10");

        let expr = verify_roundtrip(&hex::decode("0000001200000003666f6f00").unwrap());
        assert_eq!(expr.to_string(), "anchor apple foo");

        let expr = verify_roundtrip(&hex::decode("0000001300000003666f6f00").unwrap());
        assert_eq!(expr.to_string(), "(foo)");
    }

    #[test]
    fn match_rendering() {
        use CodeRequirementMatchExpression as M;

        for (m, text) in [
            (M::Exists, "info[k] /* exists */"),
            (M::Equal("v".into()), "info[k] = \"v\""),
            (M::Contains("v".into()), "info[k] ~ \"v\""),
            (M::BeginsWith("v".into()), "info[k] = \"v\"*"),
            (M::EndsWith("v".into()), "info[k] = *\"v\""),
            (M::LessThan("10".into()), "info[k] < 10"),
            (M::GreaterThan("10".into()), "info[k] > 10"),
            (M::LessThanEqual("10".into()), "info[k] <= 10"),
            (M::GreaterThanEqual("10".into()), "info[k] >= 10"),
        ] {
            let expr = CodeRequirementExpression::InfoPlistKeyField("k".into(), m);
            assert_eq!(expr.to_string(), text);

            let bytes = expr.to_bytes().unwrap();
            assert_eq!(verify_roundtrip(&bytes), expr);
        }
    }

    #[test]
    fn match_dates() {
        let expr = verify_roundtrip(
            &hex::decode("0000000a000000036b6579000000000900000000605fca30").unwrap(),
        );

        match expr {
            CodeRequirementExpression::InfoPlistKeyField(_, CodeRequirementMatchExpression::On(d)) => {
                assert_eq!(d.timestamp(), 0x605fca30)
            }
            _ => panic!("unexpected expression"),
        }

        // Date operand shorter than 8 bytes.
        assert!(CodeRequirementExpression::from_bytes(
            &hex::decode("0000000a000000036b657900000000090000605f").unwrap()
        )
        .is_err());
    }

    #[test]
    fn operand_padding() {
        for n in 0..9usize {
            let value = "x".repeat(n);
            let bytes = CodeRequirementExpression::Identifier(value)
                .to_bytes()
                .unwrap();

            // Opcode, then the operand.
            assert_eq!(bytes.len() - 4, 4 + n + (4 - n % 4) % 4);
            assert!(bytes[8 + n..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn unknown_opcodes() {
        assert!(matches!(
            CodeRequirementExpression::from_bytes(&hex::decode("00000063").unwrap()),
            Err(AppleCodesignError::RequirementUnknownOpcode(0x63))
        ));
        assert!(matches!(
            CodeRequirementExpression::from_bytes(
                &hex::decode("0000000a000000036b65790000000063").unwrap()
            ),
            Err(AppleCodesignError::RequirementUnknownMatchExpression(0x63))
        ));
        // Truncated operand.
        assert!(CodeRequirementExpression::from_bytes(
            &hex::decode("0000000200000010666f").unwrap()
        )
        .is_err());
    }

    #[test]
    fn opcode_flags_preserved() {
        let expr = verify_roundtrip(&hex::decode("80000001").unwrap());
        assert_eq!(
            expr,
            CodeRequirementExpression::Flagged(
                0x80000000,
                Box::new(CodeRequirementExpression::True)
            )
        );
        assert_eq!(expr.to_string(), "true");

        // Flags on nested nodes survive as well.
        let expr = verify_roundtrip(
            &hex::decode("000000064000000200000003666f6f0080000003").unwrap(),
        );
        assert_eq!(expr.to_string(), "identifier \"foo\" and anchor apple");
    }

    #[test]
    fn designated_requirement() {
        let expr = CodeRequirementExpression::designated_requirement("com.example", "Dev Name");

        assert_eq!(
            expr.to_string(),
            "identifier \"com.example\" and anchor apple generic and \
             certificate leaf[subject.CN] = \"Dev Name\" and \
             certificate 1[field.1.2.840.113635.100.6.2.1] /* exists */"
        );

        let blob = RequirementBlob::from_expression(&expr).unwrap();
        let mut set = RequirementSetBlob::default();
        set.set_requirements(RequirementType::Designated, blob);

        let data = set.to_blob_bytes().unwrap();
        let parsed = RequirementSetBlob::from_blob_bytes(&data).unwrap();
        assert_eq!(
            parsed.requirements[&RequirementType::Designated]
                .parse_expression()
                .unwrap(),
            expr
        );
        assert_eq!(parsed.to_blob_bytes().unwrap(), data);

        // Single designated entry at offset 20.
        assert_eq!(data.pread_with::<u32>(8, scroll::BE).unwrap(), 1);
        assert_eq!(data.pread_with::<u32>(12, scroll::BE).unwrap(), 3);
        assert_eq!(data.pread_with::<u32>(16, scroll::BE).unwrap(), 20);
    }
}
