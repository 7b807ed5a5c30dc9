// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Functionality related to hashing code.

One aspect of Apple code signing is binary integrity verification.

The Mach-O signature data contains cryptographic hashes of content
of the thing being signed. The signed byte range is split into pages
(e.g. of 4096 bytes). The cryptographic hash of each page is computed
and the hashes are written to the code directory. When the binary is
loaded, as a page is brought into the kernel, its hash is verified
against what is inside the binary.

This module contains code related to reading and writing these so-called
*code hashes*.
*/

use crate::{cursor::ByteCursor, digest::DigestType, error::AppleCodesignError};

/// Compute paged hashes.
///
/// This function takes a reference to data, chunks it into segments of `page_size`
/// and then hashes it with the specified algorithm, producing a vector of binary hashes.
pub fn paged_digests(
    data: &[u8],
    hash: DigestType,
    page_size: usize,
) -> Result<Vec<Vec<u8>>, AppleCodesignError> {
    data.chunks(page_size)
        .map(|chunk| hash.digest_data(chunk))
        .collect::<Result<Vec<_>, AppleCodesignError>>()
}

/// Number of code slots covering `code_limit` bytes with pages of `page_size`.
///
/// A page size of 0 means the whole range is a single page.
pub fn code_slot_count(code_limit: u64, page_size: u64) -> usize {
    if page_size == 0 {
        usize::from(code_limit > 0)
    } else {
        ((code_limit + page_size - 1) / page_size) as usize
    }
}

/// Compute per-page digests of `[0, code_limit)` of a cursor's window.
///
/// When `estimate` is set no data is read and zero-filled digests of the
/// correct length are returned instead.
pub fn compute_code_hashes(
    cursor: &ByteCursor,
    code_limit: u64,
    hash: DigestType,
    page_size: usize,
    estimate: bool,
) -> Result<Vec<Vec<u8>>, AppleCodesignError> {
    let count = code_slot_count(code_limit, page_size as u64);

    if estimate {
        return Ok(vec![vec![0u8; hash.hash_len()?]; count]);
    }

    let page_size = if page_size == 0 {
        code_limit as usize
    } else {
        page_size
    };

    let mut buffer = vec![0u8; page_size];

    (0..count)
        .map(|index| {
            let offset = (index * page_size) as u64;
            let len = std::cmp::min(page_size as u64, code_limit - offset) as usize;
            cursor.read_at(offset, &mut buffer[..len])?;

            hash.digest_data(&buffer[..len])
        })
        .collect::<Result<Vec<_>, AppleCodesignError>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_count() {
        assert_eq!(code_slot_count(0, 4096), 0);
        assert_eq!(code_slot_count(1, 4096), 1);
        assert_eq!(code_slot_count(4096, 4096), 1);
        assert_eq!(code_slot_count(4097, 4096), 2);
        assert_eq!(code_slot_count(12288, 4096), 3);
        assert_eq!(code_slot_count(12289, 0), 1);

        for limit in [1u64, 100, 4095, 4096, 8191, 65537] {
            for page in [512u64, 1024, 4096, 16384] {
                let pages = code_slot_count(limit, page) as u64;
                assert!(pages * page >= limit);
                assert!((pages - 1) * page < limit);
            }
        }
    }

    #[test]
    fn cursor_hashes_match_paged_digests() {
        let data = (0..10_000u32).map(|x| (x % 251) as u8).collect::<Vec<_>>();
        let cursor = ByteCursor::from_vec(data.clone());

        let from_cursor =
            compute_code_hashes(&cursor, 9000, DigestType::Sha256, 4096, false).unwrap();
        let from_slice = paged_digests(&data[0..9000], DigestType::Sha256, 4096).unwrap();

        assert_eq!(from_cursor.len(), 3);
        assert_eq!(from_cursor, from_slice);
    }

    #[test]
    fn estimate_is_zero_filled() {
        let cursor = ByteCursor::from_vec(vec![0xffu8; 100]);

        let hashes = compute_code_hashes(&cursor, 9000, DigestType::Sha1, 4096, true).unwrap();
        assert_eq!(hashes.len(), 3);
        assert!(hashes.iter().all(|h| h.len() == 20 && h.iter().all(|b| *b == 0)));
    }
}
