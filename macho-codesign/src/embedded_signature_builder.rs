// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provides primitives for constructing embeddable signature data structures.

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        embedded_signature::{
            create_superblob, Blob, BlobData, BlobWrapperBlob, CodeSigningMagic, CodeSigningSlot,
        },
        error::AppleCodesignError,
    },
    std::collections::BTreeMap,
};

#[derive(Clone, Copy, Debug, PartialEq)]
enum BlobsState {
    Empty,
    SpecialAdded,
    CodeDirectoryAdded,
    SignatureAdded,
}

impl Default for BlobsState {
    fn default() -> Self {
        Self::Empty
    }
}

/// An entity for producing an embedded signature superblob.
///
/// Special blobs (requirements, entitlements) are registered first. Code
/// directories are registered next and have the digests of the special blobs
/// recorded in them. The CMS signature is registered last.
///
/// Blobs are emitted in slot order, which yields the code directory in slot
/// 0, requirements in 2, entitlements in 5, alternate code directories from
/// 0x1000 and the signature in 0x10000.
#[derive(Debug, Default)]
pub struct EmbeddedSignatureBuilder<'a> {
    state: BlobsState,
    blobs: BTreeMap<CodeSigningSlot, BlobData<'a>>,
    estimate: bool,
}

impl<'a> EmbeddedSignatureBuilder<'a> {
    /// Construct a builder that only needs to produce correctly sized output.
    ///
    /// Special blob digests are recorded as null digests of the right length.
    pub fn new_estimate() -> Self {
        Self {
            estimate: true,
            ..Default::default()
        }
    }

    fn code_directory_in_slot(&self, slot: CodeSigningSlot) -> Option<&CodeDirectoryBlob<'a>> {
        match self.blobs.get(&slot) {
            Some(BlobData::CodeDirectory(cd)) => Some(cd.as_ref()),
            _ => None,
        }
    }

    /// Obtain the primary code directory registered with this instance.
    pub fn code_directory(&self) -> Option<&CodeDirectoryBlob<'a>> {
        self.code_directory_in_slot(CodeSigningSlot::CodeDirectory)
    }

    /// Obtain all registered code directories, primary first.
    pub fn code_directories(&self) -> Vec<&CodeDirectoryBlob<'a>> {
        self.blobs
            .iter()
            .filter_map(|(slot, blob)| match blob {
                BlobData::CodeDirectory(cd)
                    if *slot == CodeSigningSlot::CodeDirectory
                        || slot.is_alternate_code_directory() =>
                {
                    Some(cd.as_ref())
                }
                _ => None,
            })
            .collect()
    }

    /// Register a blob into a slot.
    ///
    /// There can only be a single blob per slot. Last write wins.
    ///
    /// The code directory and embedded signature cannot be added using this method.
    ///
    /// Blobs cannot be registered after a code directory or signature are added, as this
    /// would invalidate the signature.
    pub fn add_blob(
        &mut self,
        slot: CodeSigningSlot,
        blob: BlobData<'a>,
    ) -> Result<(), AppleCodesignError> {
        match self.state {
            BlobsState::Empty | BlobsState::SpecialAdded => {}
            BlobsState::CodeDirectoryAdded | BlobsState::SignatureAdded => {
                return Err(AppleCodesignError::SignatureBuilder(
                    "cannot add blobs after code directory or signature is registered",
                ));
            }
        }

        if matches!(blob, BlobData::CodeDirectory(_)) || slot == CodeSigningSlot::Signature {
            return Err(AppleCodesignError::SignatureBuilder(
                "cannot register code directory or signature blob via add_blob()",
            ));
        }

        self.blobs.insert(slot, blob);

        self.state = BlobsState::SpecialAdded;

        Ok(())
    }

    /// Record digests of registered special blobs in a code directory.
    fn populate_special_hashes(
        &self,
        cd: &mut CodeDirectoryBlob<'a>,
    ) -> Result<(), AppleCodesignError> {
        for (slot, blob) in &self.blobs {
            if slot.is_code_directory_specials_expressible() {
                let digest = if self.estimate {
                    vec![0; cd.hash_type.hash_len()?]
                } else {
                    blob.digest_with(cd.hash_type)?
                };

                cd.set_special_hash(*slot, digest)?;
            }
        }

        Ok(())
    }

    /// Register the primary [CodeDirectoryBlob] with this builder.
    ///
    /// Digests of previously registered blobs are added to the code
    /// directory's special slots.
    pub fn add_code_directory(
        &mut self,
        mut cd: CodeDirectoryBlob<'a>,
    ) -> Result<&CodeDirectoryBlob<'a>, AppleCodesignError> {
        if matches!(self.state, BlobsState::SignatureAdded) {
            return Err(AppleCodesignError::SignatureBuilder(
                "cannot add code directory after signature data added",
            ));
        }

        self.populate_special_hashes(&mut cd)?;

        self.blobs.insert(CodeSigningSlot::CodeDirectory, cd.into());
        self.state = BlobsState::CodeDirectoryAdded;

        self.code_directory()
            .ok_or(AppleCodesignError::SignatureBuilder("code directory not registered"))
    }

    /// Register an alternate [CodeDirectoryBlob] in the next free alternate slot.
    ///
    /// The primary code directory must be registered first.
    pub fn add_alternate_code_directory(
        &mut self,
        mut cd: CodeDirectoryBlob<'a>,
    ) -> Result<&CodeDirectoryBlob<'a>, AppleCodesignError> {
        match self.state {
            BlobsState::CodeDirectoryAdded => {}
            BlobsState::SignatureAdded => {
                return Err(AppleCodesignError::SignatureBuilder(
                    "cannot add code directory after signature data added",
                ));
            }
            BlobsState::Empty | BlobsState::SpecialAdded => {
                return Err(AppleCodesignError::SignatureBuilder(
                    "primary code directory must be added before alternates",
                ));
            }
        }

        let index = self
            .blobs
            .keys()
            .filter(|slot| slot.is_alternate_code_directory())
            .count();
        let slot = CodeSigningSlot::alternate_code_directory(index)?;

        self.populate_special_hashes(&mut cd)?;

        self.blobs.insert(slot, cd.into());

        self.code_directory_in_slot(slot)
            .ok_or(AppleCodesignError::SignatureBuilder("code directory not registered"))
    }

    /// Add CMS signature data to this builder.
    pub fn add_cms_signature(&mut self, der_data: Vec<u8>) -> Result<(), AppleCodesignError> {
        if !matches!(self.state, BlobsState::CodeDirectoryAdded) {
            return Err(AppleCodesignError::SignatureBuilder(
                "signature requires a code directory and can only be added once",
            ));
        }

        self.blobs.insert(
            CodeSigningSlot::Signature,
            BlobData::BlobWrapper(Box::new(BlobWrapperBlob::from_data_owned(der_data))),
        );

        self.state = BlobsState::SignatureAdded;

        Ok(())
    }

    /// Create the embedded signature "superblob" data.
    pub fn create_superblob(&self) -> Result<Vec<u8>, AppleCodesignError> {
        if matches!(self.state, BlobsState::Empty | BlobsState::SpecialAdded) {
            return Err(AppleCodesignError::SignatureBuilder(
                "code directory required in order to materialize superblob",
            ));
        }

        let blobs = self
            .blobs
            .iter()
            .map(|(slot, blob)| Ok((u32::from(*slot), blob.to_blob_bytes()?)))
            .collect::<Result<Vec<_>, AppleCodesignError>>()?;

        create_superblob(
            CodeSigningMagic::EmbeddedSignature,
            blobs.iter().map(|(slot, data)| (*slot, data.as_slice())),
        )
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            code_requirement::{CodeRequirementExpression, RequirementType},
            digest::DigestType,
            embedded_signature::{
                EmbeddedSignature, EntitlementsBlob, RequirementBlob, RequirementSetBlob,
            },
        },
    };

    fn requirements() -> BlobData<'static> {
        let expr = CodeRequirementExpression::designated_requirement("com.example", "Dev");

        let mut set = RequirementSetBlob::default();
        set.set_requirements(
            RequirementType::Designated,
            RequirementBlob::from_expression(&expr).unwrap(),
        );

        set.into()
    }

    fn code_directory(hash: DigestType) -> CodeDirectoryBlob<'static> {
        let mut cd = CodeDirectoryBlob::new("com.example", None, hash, 4096).unwrap();
        cd.set_code_hashes(4096, vec![hash.digest_data(&[0u8; 4096]).unwrap()]);

        cd
    }

    #[test]
    fn blob_order_and_special_hashes() {
        let mut builder = EmbeddedSignatureBuilder::default();

        builder
            .add_blob(
                CodeSigningSlot::Entitlements,
                EntitlementsBlob::from_string("<plist/>").into(),
            )
            .unwrap();
        builder
            .add_blob(CodeSigningSlot::RequirementSet, requirements())
            .unwrap();

        let cd = builder.add_code_directory(code_directory(DigestType::Sha1)).unwrap();
        assert_eq!(cd.special_slot_count(), 5);

        builder
            .add_alternate_code_directory(code_directory(DigestType::Sha256))
            .unwrap();
        builder.add_cms_signature(vec![0x30, 0x00]).unwrap();

        let data = builder.create_superblob().unwrap();
        let sig = EmbeddedSignature::from_bytes(&data).unwrap();

        let slots = sig
            .blobs
            .iter()
            .map(|b| u32::from(b.blob_entry.slot))
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 2, 5, 0x1000, 0x10000]);

        let entitlements = sig.find_slot(CodeSigningSlot::Entitlements).unwrap();
        for (cd, _) in sig.all_code_directories().unwrap() {
            assert_eq!(
                cd.special_hash(CodeSigningSlot::Entitlements).unwrap().to_vec(),
                entitlements.digest_with(cd.hash_type).unwrap()
            );
            assert!(cd.special_hash(CodeSigningSlot::Info).unwrap().is_null());
        }
    }

    #[test]
    fn estimate_records_null_special_hashes() {
        let build = |mut builder: EmbeddedSignatureBuilder<'static>| {
            builder
                .add_blob(CodeSigningSlot::RequirementSet, requirements())
                .unwrap();
            builder.add_code_directory(code_directory(DigestType::Sha1)).unwrap();
            builder
                .add_alternate_code_directory(code_directory(DigestType::Sha256))
                .unwrap();

            for cd in builder.code_directories() {
                let digest = cd.special_hash(CodeSigningSlot::RequirementSet).unwrap();
                assert_eq!(digest.data.len(), cd.hash_type.hash_len().unwrap());
            }

            let estimated = builder
                .code_directories()
                .iter()
                .all(|cd| cd.special_hash(CodeSigningSlot::RequirementSet).unwrap().is_null());

            builder.add_cms_signature(vec![0x30, 0x00]).unwrap();

            (estimated, builder.create_superblob().unwrap().len())
        };

        let (estimated, estimate_len) = build(EmbeddedSignatureBuilder::new_estimate());
        assert!(estimated);

        let (estimated, real_len) = build(EmbeddedSignatureBuilder::default());
        assert!(!estimated);
        assert_eq!(estimate_len, real_len);
    }

    #[test]
    fn state_transitions() {
        let mut builder = EmbeddedSignatureBuilder::default();

        assert!(builder.create_superblob().is_err());
        assert!(builder.add_cms_signature(vec![]).is_err());
        assert!(builder
            .add_alternate_code_directory(code_directory(DigestType::Sha256))
            .is_err());

        builder.add_code_directory(code_directory(DigestType::Sha1)).unwrap();
        assert!(builder
            .add_blob(CodeSigningSlot::RequirementSet, requirements())
            .is_err());

        builder.add_cms_signature(vec![]).unwrap();
        assert!(builder.add_cms_signature(vec![]).is_err());
        assert!(builder.create_superblob().is_ok());
    }
}
