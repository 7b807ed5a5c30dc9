// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Digest algorithms used by code signatures.

use {
    crate::{cursor::ByteCursor, error::AppleCodesignError},
    std::{
        borrow::Cow,
        fmt::{Display, Formatter},
        io::Read,
        path::Path,
    },
};

/// Block size used when digesting streams.
const STREAM_BLOCK_SIZE: usize = 65536;

/// Represents a digest type encountered in code signature data structures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestType {
    None,
    Sha1,
    Sha256,
    Sha256Truncated,
    Sha384,
    Sha512,
    Unknown(u8),
}

impl Default for DigestType {
    fn default() -> Self {
        Self::Sha256
    }
}

impl From<u8> for DigestType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Sha1,
            2 => Self::Sha256,
            3 => Self::Sha256Truncated,
            4 => Self::Sha384,
            5 => Self::Sha512,
            _ => Self::Unknown(v),
        }
    }
}

impl From<DigestType> for u8 {
    fn from(v: DigestType) -> u8 {
        match v {
            DigestType::None => 0,
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
            DigestType::Sha256Truncated => 3,
            DigestType::Sha384 => 4,
            DigestType::Sha512 => 5,
            DigestType::Unknown(v) => v,
        }
    }
}

impl Display for DigestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestType::None => f.write_str("none"),
            DigestType::Sha1 => f.write_str("sha1"),
            DigestType::Sha256 => f.write_str("sha256"),
            DigestType::Sha256Truncated => f.write_str("sha256-truncated"),
            DigestType::Sha384 => f.write_str("sha384"),
            DigestType::Sha512 => f.write_str("sha512"),
            DigestType::Unknown(v) => f.write_fmt(format_args!("unknown: {}", v)),
        }
    }
}

impl TryFrom<&str> for DigestType {
    type Error = AppleCodesignError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha256-truncated" => Ok(Self::Sha256Truncated),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(AppleCodesignError::DigestUnknownAlgorithm),
        }
    }
}

impl DigestType {
    /// Obtain the size of hashes for this hash type.
    pub fn hash_len(&self) -> Result<usize, AppleCodesignError> {
        match self {
            Self::Sha1 | Self::Sha256Truncated => Ok(20),
            Self::Sha256 => Ok(32),
            Self::Sha384 => Ok(48),
            Self::Sha512 => Ok(64),
            Self::None | Self::Unknown(_) => Err(AppleCodesignError::DigestUnknownAlgorithm),
        }
    }

    /// Obtain a hasher for this digest type.
    pub fn as_hasher(&self) -> Result<ring::digest::Context, AppleCodesignError> {
        match self {
            Self::None => Err(AppleCodesignError::DigestUnknownAlgorithm),
            Self::Sha1 => Ok(ring::digest::Context::new(
                &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            )),
            Self::Sha256 | Self::Sha256Truncated => {
                Ok(ring::digest::Context::new(&ring::digest::SHA256))
            }
            Self::Sha384 => Ok(ring::digest::Context::new(&ring::digest::SHA384)),
            Self::Sha512 => Ok(ring::digest::Context::new(&ring::digest::SHA512)),
            Self::Unknown(_) => Err(AppleCodesignError::DigestUnknownAlgorithm),
        }
    }

    fn finish(&self, hasher: ring::digest::Context) -> Result<Vec<u8>, AppleCodesignError> {
        let mut hash = hasher.finish().as_ref().to_vec();
        hash.truncate(self.hash_len()?);

        Ok(hash)
    }

    /// Digest data given the configured hasher.
    pub fn digest_data(&self, data: &[u8]) -> Result<Vec<u8>, AppleCodesignError> {
        let mut hasher = self.as_hasher()?;
        hasher.update(data);

        self.finish(hasher)
    }

    /// Digest `len` bytes of `data` starting at `offset`.
    pub fn digest_range(
        &self,
        data: &[u8],
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, AppleCodesignError> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        let range = data
            .get(offset..end)
            .ok_or(AppleCodesignError::CursorOutOfBounds {
                offset: offset as u64,
                len: len as u64,
                limit: data.len() as u64,
            })?;

        self.digest_data(range)
    }

    /// Digest everything a reader produces, in fixed-size blocks.
    pub fn digest_reader(&self, reader: &mut impl Read) -> Result<Vec<u8>, AppleCodesignError> {
        let mut hasher = self.as_hasher()?;
        let mut buffer = vec![0u8; STREAM_BLOCK_SIZE];

        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }

        self.finish(hasher)
    }

    /// Digest the content of a file.
    pub fn digest_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, AppleCodesignError> {
        let mut fh = std::fs::File::open(path.as_ref())?;

        self.digest_reader(&mut fh)
    }

    /// Digest the whole window of a cursor.
    ///
    /// The cursor's read position is not consulted or modified.
    pub fn digest_cursor(&self, cursor: &ByteCursor) -> Result<Vec<u8>, AppleCodesignError> {
        let mut hasher = self.as_hasher()?;
        let mut buffer = vec![0u8; STREAM_BLOCK_SIZE];
        let mut offset = 0;

        while offset < cursor.len() {
            let count = std::cmp::min(STREAM_BLOCK_SIZE as u64, cursor.len() - offset) as usize;
            cursor.read_at(offset, &mut buffer[..count])?;
            hasher.update(&buffer[..count]);
            offset += count as u64;
        }

        self.finish(hasher)
    }
}

pub struct Digest<'a> {
    pub data: Cow<'a, [u8]>,
}

impl<'a> Digest<'a> {
    /// Whether this is the null hash (all 0s).
    pub fn is_null(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub fn to_owned(&self) -> Digest<'static> {
        Digest {
            data: Cow::Owned(self.data.clone().into_owned()),
        }
    }

    pub fn as_hex(&self) -> String {
        hex::encode(&self.data)
    }
}

impl<'a> Clone for Digest<'a> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<'a> PartialEq for Digest<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'a> std::fmt::Debug for Digest<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.data))
    }
}

impl<'a> From<Vec<u8>> for Digest<'a> {
    fn from(v: Vec<u8>) -> Self {
        Self { data: v.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_lengths() {
        for (digest, len) in [
            (DigestType::Sha1, 20),
            (DigestType::Sha256, 32),
            (DigestType::Sha256Truncated, 20),
            (DigestType::Sha384, 48),
        ] {
            assert_eq!(digest.hash_len().unwrap(), len);
            assert_eq!(digest.digest_data(b"hello").unwrap().len(), len);
        }

        assert!(DigestType::None.hash_len().is_err());
        assert!(DigestType::Unknown(42).digest_data(b"").is_err());
    }

    #[test]
    fn truncated_is_prefix() {
        let full = DigestType::Sha256.digest_data(b"hello, world").unwrap();
        let truncated = DigestType::Sha256Truncated
            .digest_data(b"hello, world")
            .unwrap();

        assert_eq!(&full[0..20], truncated.as_slice());
    }

    #[test]
    fn known_sha1() {
        assert_eq!(
            hex::encode(DigestType::Sha1.digest_data(b"abc").unwrap()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn range_and_stream_agree() {
        let data = (0..200_000u32).map(|x| x as u8).collect::<Vec<_>>();

        let direct = DigestType::Sha256.digest_data(&data[100..150_100]).unwrap();
        let range = DigestType::Sha256
            .digest_range(&data, 100, 150_000)
            .unwrap();
        let stream = DigestType::Sha256
            .digest_reader(&mut std::io::Cursor::new(&data[100..150_100]))
            .unwrap();
        let cursor = ByteCursor::from_vec(data.clone())
            .slice(100, 150_000)
            .unwrap();
        let from_cursor = DigestType::Sha256.digest_cursor(&cursor).unwrap();

        assert_eq!(direct, range);
        assert_eq!(direct, stream);
        assert_eq!(direct, from_cursor);

        assert!(DigestType::Sha256
            .digest_range(&data, 199_990, 20)
            .is_err());
    }

    #[test]
    fn file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            DigestType::Sha1.digest_file(&path).unwrap(),
            DigestType::Sha1.digest_data(b"abc").unwrap()
        );
    }
}
