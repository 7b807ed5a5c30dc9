// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing and verifying Mach-O binaries.
//!
//! Signing is a two pass process. The first pass runs the signature pipeline
//! in [SigningMode::Estimate], which skips all hashing and uses a zero-filled
//! CMS placeholder, to learn how much space each slice needs. If a slice lacks
//! an `LC_CODE_SIGNATURE` reservation or its reservation is too small, an
//! external [SignatureAllocator] re-lays out the file. The second pass
//! produces real signatures and writes them into the reserved regions.
//!
//! If a real signature still doesn't fit, the file is reallocated once more
//! with enlarged sizes and signing is retried. There is no further retry.

use {
    crate::{
        cms::{create_cms_signature, estimate_cms_signature_size, verify_cms_signature},
        code_directory::CodeDirectoryBlob,
        code_hash::compute_code_hashes,
        code_requirement::{CodeRequirementExpression, RequirementType},
        cursor::ByteCursor,
        embedded_signature::{
            CodeSigningSlot, EmbeddedSignature, EntitlementsBlob, RequirementBlob,
            RequirementSetBlob,
        },
        embedded_signature_builder::EmbeddedSignatureBuilder,
        error::AppleCodesignError,
        macho::{MachOFile, MachOSlice},
        signing_settings::SigningSettings,
        verify::{VerificationContext, VerificationProblem, VerificationProblemType, VerificationSink},
    },
    log::{debug, info, warn},
    std::{
        ffi::OsString,
        fmt::Write as _,
        path::{Path, PathBuf},
    },
};

/// Whether the signature pipeline computes real content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningMode {
    /// Skip hashing and signing. Produces data of the final size.
    Estimate,
    /// Produce the real signature.
    Sign,
}

/// Files outside the binary whose digests are recorded in special slots.
#[derive(Clone, Debug, Default)]
pub struct SpecialFiles {
    /// Recorded in the [CodeSigningSlot::Info] slot.
    pub info_plist: Option<PathBuf>,
    /// Recorded in the [CodeSigningSlot::ResourceDir] slot.
    pub code_resources: Option<PathBuf>,
}

impl SpecialFiles {
    /// Obtain the file backing a special slot.
    pub fn path_for_slot(&self, slot: CodeSigningSlot) -> Option<&Path> {
        match slot {
            CodeSigningSlot::Info => self.info_plist.as_deref(),
            CodeSigningSlot::ResourceDir => self.code_resources.as_deref(),
            _ => None,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (CodeSigningSlot, &Path)> {
        [CodeSigningSlot::Info, CodeSigningSlot::ResourceDir]
            .into_iter()
            .filter_map(|slot| self.path_for_slot(slot).map(|path| (slot, path)))
    }
}

/// Round a signature size up to the 16 byte alignment of reservations.
fn align_signature_size(size: usize) -> usize {
    (size + 15) & !15
}

/// Create embedded signature superblob data for a slice.
///
/// `cursor` views the slice and `code_limit` is the length of its signed
/// prefix. In [SigningMode::Estimate] no data is hashed and the result only
/// has the correct size.
pub fn create_embedded_signature(
    cursor: &ByteCursor,
    code_limit: u64,
    identifier: &str,
    settings: &SigningSettings,
    files: &SpecialFiles,
    mode: SigningMode,
) -> Result<Vec<u8>, AppleCodesignError> {
    let estimate = mode == SigningMode::Estimate;

    let identity = settings
        .signing_identity()
        .ok_or(AppleCodesignError::NoSigningCertificate)?;
    let common_name = identity
        .common_name()?
        .ok_or(AppleCodesignError::NoSigningCertificate)?;
    let team_id = settings.team_id()?;

    let code_limit32 = u32::try_from(code_limit).map_err(|_| {
        AppleCodesignError::InvalidBinary(format!(
            "code limit {} does not fit in 32 bits",
            code_limit
        ))
    })?;

    let mut builder = if estimate {
        EmbeddedSignatureBuilder::new_estimate()
    } else {
        EmbeddedSignatureBuilder::default()
    };

    let requirement = CodeRequirementExpression::designated_requirement(identifier, &common_name);
    if !estimate {
        info!("designated requirement: {}", requirement);
    }

    let mut requirements = RequirementSetBlob::default();
    requirements.set_requirements(
        RequirementType::Designated,
        RequirementBlob::from_expression(&requirement)?,
    );
    builder.add_blob(CodeSigningSlot::RequirementSet, requirements.into())?;

    if let Some(entitlements) = settings.entitlements_xml() {
        builder.add_blob(
            CodeSigningSlot::Entitlements,
            EntitlementsBlob::from_string(entitlements).into(),
        )?;
    }

    for (index, digest) in settings.digests().iter().enumerate() {
        let mut cd = CodeDirectoryBlob::new(
            identifier,
            team_id.clone(),
            *digest,
            settings.page_size(),
        )?;

        let hashes = compute_code_hashes(
            cursor,
            code_limit,
            *digest,
            settings.page_size() as usize,
            estimate,
        )?;
        cd.set_code_hashes(code_limit32, hashes);

        for (slot, path) in files.iter() {
            let hash = if estimate {
                vec![0u8; digest.hash_len()?]
            } else {
                digest.digest_file(path)?
            };
            cd.set_special_hash(slot, hash)?;
        }

        if index == 0 {
            builder.add_code_directory(cd)?;
        } else {
            builder.add_alternate_code_directory(cd)?;
        }
    }

    let cms = if estimate {
        vec![0u8; estimate_cms_signature_size(identity.all_certificates().count())]
    } else {
        create_cms_signature(identity, &builder.code_directories())?
    };
    builder.add_cms_signature(cms)?;

    builder.create_superblob()
}

/// Estimate the reservation a slice's signature needs.
pub fn estimate_signature_size(
    slice: &MachOSlice,
    identifier: &str,
    settings: &SigningSettings,
    files: &SpecialFiles,
) -> Result<usize, AppleCodesignError> {
    let data = create_embedded_signature(
        slice.bytes(),
        slice.code_limit(),
        identifier,
        settings,
        files,
        SigningMode::Estimate,
    )?;

    Ok(align_signature_size(data.len()))
}

/// Re-lays out a Mach-O file to reserve signature space.
pub trait SignatureAllocator {
    /// Write a copy of `input` to `output` reserving `size` bytes of
    /// signature data for each `(arch, size)` entry.
    fn allocate(
        &self,
        input: &Path,
        output: &Path,
        sizes: &[(String, usize)],
    ) -> Result<(), AppleCodesignError>;
}

/// A [SignatureAllocator] running Apple's `codesign_allocate` tool.
#[derive(Clone, Debug)]
pub struct CodesignAllocate {
    path: PathBuf,
}

impl CodesignAllocate {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Resolve the tool from signing settings.
    pub fn from_settings(settings: &SigningSettings) -> Result<Self, AppleCodesignError> {
        Ok(Self::new(settings.resolve_codesign_allocate()?))
    }

    fn arguments(input: &Path, output: &Path, sizes: &[(String, usize)]) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-i"),
            input.as_os_str().to_os_string(),
            OsString::from("-o"),
            output.as_os_str().to_os_string(),
        ];

        for (arch, size) in sizes {
            // The tool knows 32-bit Intel by its NXArch name.
            let arch = if arch == "x86" { "i386" } else { arch.as_str() };

            args.push(OsString::from("-a"));
            args.push(OsString::from(arch));
            args.push(OsString::from(size.to_string()));
        }

        args
    }
}

impl SignatureAllocator for CodesignAllocate {
    fn allocate(
        &self,
        input: &Path,
        output: &Path,
        sizes: &[(String, usize)],
    ) -> Result<(), AppleCodesignError> {
        let args = Self::arguments(input, output, sizes);

        info!("invoking {} with args: {:?}", self.path.display(), args);

        let output = duct::cmd(&self.path, args)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AppleCodesignError::CodesignAllocateNotFound
                } else {
                    AppleCodesignError::Io(e)
                }
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(AppleCodesignError::CodesignAllocateFailed {
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            })
        }
    }
}

/// Reallocate a file in place through a temporary file next to it.
fn reallocate(
    path: &Path,
    allocator: &dyn SignatureAllocator,
    sizes: &[(String, usize)],
) -> Result<(), AppleCodesignError> {
    info!("reserving signature space in {}: {:?}", path.display(), sizes);

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp_path = tempfile::Builder::new()
        .prefix(".codesign-allocate")
        .tempfile_in(dir)?
        .into_temp_path();

    allocator.allocate(path, &temp_path, sizes)?;

    std::fs::set_permissions(&temp_path, std::fs::metadata(path)?.permissions())?;
    temp_path.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Sign a Mach-O file in place.
///
/// Every slice receives a signature with the same identifier. `allocator` is
/// only invoked when a slice has no reservation or one that is too small.
pub fn sign_macho_file(
    path: &Path,
    identifier: &str,
    settings: &SigningSettings,
    files: &SpecialFiles,
    allocator: &dyn SignatureAllocator,
) -> Result<(), AppleCodesignError> {
    let (estimates, needs_allocation) = {
        let macho = MachOFile::open(path)?;

        let mut estimates = vec![];
        let mut needs_allocation = false;

        for slice in macho.slices() {
            let estimate = estimate_signature_size(slice, identifier, settings, files)?;
            info!("{}: estimated signature size {} bytes", slice.arch_name(), estimate);

            match slice.code_signature() {
                Some(range) if range.size as usize >= estimate => {}
                Some(range) => {
                    info!(
                        "{}: reserved {} bytes is smaller than estimate",
                        slice.arch_name(),
                        range.size
                    );
                    needs_allocation = true;
                }
                None => {
                    info!("{}: no code signature reservation", slice.arch_name());
                    needs_allocation = true;
                }
            }

            estimates.push((slice.arch_name(), estimate));
        }

        (estimates, needs_allocation)
    };

    if needs_allocation {
        reallocate(path, allocator, &estimates)?;
    }

    let mut forced = false;

    loop {
        let macho = MachOFile::open_writable(path)?;

        let signatures = macho
            .slices()
            .iter()
            .map(|slice| {
                create_embedded_signature(
                    slice.bytes(),
                    slice.code_limit(),
                    identifier,
                    settings,
                    files,
                    SigningMode::Sign,
                )
            })
            .collect::<Result<Vec<_>, AppleCodesignError>>()?;

        let mut overflow = None;
        for (slice, signature) in macho.slices().iter().zip(&signatures) {
            let available = slice.code_signature().map(|r| r.size as usize).unwrap_or(0);

            if signature.len() > available {
                overflow = Some(AppleCodesignError::SignatureDataTooLarge {
                    needed: signature.len(),
                    available,
                });
                break;
            }
        }

        match overflow {
            None => {
                for (slice, signature) in macho.slices().iter().zip(&signatures) {
                    let range = slice
                        .code_signature()
                        .ok_or_else(|| AppleCodesignError::SliceNoCodeSignature(slice.arch_name()))?;

                    info!(
                        "{}: writing {} byte signature into {} byte reservation",
                        slice.arch_name(),
                        signature.len(),
                        range.size
                    );
                    macho.write_section(slice.file_offset() + range.offset, signature, range.size)?;
                }

                return Ok(());
            }
            Some(err) if forced => return Err(err),
            Some(err) => {
                warn!("{}; reallocating and retrying", err);

                let sizes = estimates
                    .iter()
                    .zip(&signatures)
                    .map(|((arch, estimate), signature)| {
                        (
                            arch.clone(),
                            std::cmp::max(*estimate, align_signature_size(signature.len())),
                        )
                    })
                    .collect::<Vec<_>>();

                drop(macho);
                reallocate(path, allocator, &sizes)?;
                forced = true;
            }
        }
    }
}

/// Verify the embedded signature of a single slice.
///
/// Special slot and CMS problems are reported to `sink`. Structural problems
/// and code page digest mismatches are errors.
pub fn verify_macho_slice(
    slice: &MachOSlice,
    files: &SpecialFiles,
    context: &VerificationContext,
    sink: &mut dyn VerificationSink,
) -> Result<(), AppleCodesignError> {
    let data = slice
        .code_signature_bytes()?
        .ok_or_else(|| AppleCodesignError::SliceNoCodeSignature(slice.arch_name()))?
        .to_vec()?;

    let signature = EmbeddedSignature::from_bytes(&data)?;
    let code_directories = signature.all_code_directories()?;

    if code_directories.is_empty() {
        return Err(AppleCodesignError::BinaryNoCodeSignature);
    }

    let mut report = |problem| {
        sink.report(VerificationProblem {
            context: context.clone(),
            problem,
        })
    };

    for (cd, _) in &code_directories {
        debug!(
            "{}: verifying {} code directory for {}",
            slice.arch_name(),
            cd.hash_type,
            cd.ident
        );

        for slot in (1..=7).map(CodeSigningSlot::from) {
            let actual = if slot.has_external_content() {
                match files.path_for_slot(slot) {
                    Some(path) => Some(cd.hash_type.digest_file(path)?),
                    None => None,
                }
            } else {
                match signature.find_slot(slot) {
                    Some(blob) => Some(blob.digest_with(cd.hash_type)?),
                    None => None,
                }
            };

            let expected = cd.special_hash(slot).filter(|digest| !digest.is_null());

            match (expected, actual) {
                (Some(expected), Some(actual)) if expected.data.as_ref() != actual.as_slice() => {
                    report(VerificationProblemType::SlotDigestMismatch(
                        slot,
                        expected.to_vec(),
                        actual,
                    ))?;
                }
                (Some(_), None) | (None, Some(_)) => {
                    report(VerificationProblemType::SlotDigestMissing(slot))?;
                }
                _ => {}
            }
        }

        cd.verify_code_hashes(slice.bytes())?;
    }

    match signature.signature_data()? {
        Some(cms) if !cms.is_empty() => {
            verify_cms_signature(cms, &code_directories, context, sink)?;
        }
        _ => {
            sink.report(VerificationProblem {
                context: context.clone(),
                problem: VerificationProblemType::NoCryptographicSignature,
            })?;
        }
    }

    Ok(())
}

/// Verify every slice of a Mach-O file.
pub fn verify_macho_file(
    path: &Path,
    files: &SpecialFiles,
    sink: &mut dyn VerificationSink,
) -> Result<(), AppleCodesignError> {
    let macho = MachOFile::open(path)?;
    let context = VerificationContext::with_path(path);

    for slice in macho.slices() {
        info!("verifying {} slice of {}", slice.arch_name(), path.display());
        verify_macho_slice(slice, files, &context.for_arch(slice.arch_name()), sink)?;
    }

    Ok(())
}

/// Render the signature data of every slice as text.
pub fn describe_macho_file(path: &Path) -> Result<String, AppleCodesignError> {
    let macho = MachOFile::open(path)?;

    let mut s = String::new();

    for slice in macho.slices() {
        let _ = writeln!(
            s,
            "{} slice at offset {} ({} bytes)",
            slice.arch_name(),
            slice.file_offset(),
            slice.size()
        );

        match slice.code_signature_bytes()? {
            Some(cursor) => {
                let data = cursor.to_vec()?;
                s.push_str(&EmbeddedSignature::from_bytes(&data)?.describe()?);
            }
            None => {
                s.push_str("no code signature\n");
            }
        }
    }

    Ok(s)
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{
            digest::DigestType,
            macho::tests::{synthetic_macho, SYNTHETIC_HEADER_SIZE},
            signing_identity::{tests::self_signed, SigningIdentity},
            verify::VerificationProblems,
        },
        std::cell::RefCell,
    };

    /// Produces synthetic images, optionally clamping the reserved size.
    pub(crate) struct FakeAllocator {
        body: Vec<u8>,
        clamp: Option<usize>,
        pub(crate) calls: RefCell<Vec<Vec<(String, usize)>>>,
    }

    impl FakeAllocator {
        pub(crate) fn new(body: &[u8], clamp: Option<usize>) -> Self {
            Self {
                body: body.to_vec(),
                clamp,
                calls: RefCell::new(vec![]),
            }
        }
    }

    impl SignatureAllocator for FakeAllocator {
        fn allocate(
            &self,
            input: &Path,
            output: &Path,
            sizes: &[(String, usize)],
        ) -> Result<(), AppleCodesignError> {
            assert!(input.exists());
            assert_eq!(sizes.len(), 1);
            assert_eq!(sizes[0].0, "arm64");

            let size = match self.clamp {
                Some(clamp) if self.calls.borrow().is_empty() || clamp < 256 => clamp,
                _ => sizes[0].1,
            };
            self.calls.borrow_mut().push(sizes.to_vec());

            std::fs::write(output, synthetic_macho(&self.body, Some(size as u32)))?;

            Ok(())
        }
    }

    pub(crate) fn body() -> Vec<u8> {
        (0..10000u32).map(|i| (i % 251) as u8).collect()
    }

    fn settings(identity: &SigningIdentity) -> SigningSettings {
        let mut settings = SigningSettings::default();
        settings.set_signing_identity(identity);
        settings
    }

    fn unsigned_file(dir: &Path) -> PathBuf {
        let path = dir.join("libtest.dylib");
        std::fs::write(&path, synthetic_macho(&body(), None)).unwrap();
        path
    }

    #[test]
    fn sign_and_verify() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let path = unsigned_file(td.path());
        let identity = self_signed("Apple Development: Dev", "TEAM123456");
        let allocator = FakeAllocator::new(&body(), None);

        sign_macho_file(
            &path,
            "com.example.test",
            &settings(&identity),
            &SpecialFiles::default(),
            &allocator,
        )?;
        assert_eq!(allocator.calls.borrow().len(), 1);

        let mut problems = VerificationProblems::default();
        verify_macho_file(&path, &SpecialFiles::default(), &mut problems)?;
        assert!(problems.is_empty(), "{:?}", problems.problems());

        let macho = MachOFile::open(&path)?;
        let slice = &macho.slices()[0];
        let data = slice.code_signature_bytes()?.unwrap().to_vec()?;
        let signature = EmbeddedSignature::from_bytes(&data)?;

        let cds = signature.all_code_directories()?;
        assert_eq!(cds.len(), 2);
        assert_eq!(cds[0].0.hash_type, DigestType::Sha1);
        assert_eq!(cds[1].0.hash_type, DigestType::Sha256);
        assert_eq!(cds[0].0.ident, "com.example.test");
        assert_eq!(cds[0].0.team_name.as_deref(), Some("TEAM123456"));
        assert_eq!(cds[0].0.code_limit as u64, slice.code_limit());

        let describe = describe_macho_file(&path)?;
        assert!(describe.contains("arm64 slice"));
        assert!(describe.contains("com.example.test"));

        Ok(())
    }

    #[test]
    fn tampered_code_is_fatal() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let path = unsigned_file(td.path());
        let identity = self_signed("Dev", "TEAM");
        let allocator = FakeAllocator::new(&body(), None);

        sign_macho_file(
            &path,
            "com.example.test",
            &settings(&identity),
            &SpecialFiles::default(),
            &allocator,
        )?;

        let mut data = std::fs::read(&path)?;
        data[SYNTHETIC_HEADER_SIZE + 5000] ^= 0xff;
        std::fs::write(&path, data)?;

        let mut problems = VerificationProblems::default();
        let res = verify_macho_file(&path, &SpecialFiles::default(), &mut problems);
        assert!(matches!(res, Err(AppleCodesignError::CodeSlotHashMismatch(1))));

        Ok(())
    }

    #[test]
    fn estimate_covers_signature() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let path = unsigned_file(td.path());
        let identity = self_signed("Dev", "TEAM");
        let allocator = FakeAllocator::new(&body(), None);

        sign_macho_file(
            &path,
            "com.example.test",
            &settings(&identity),
            &SpecialFiles::default(),
            &allocator,
        )?;

        let reserved = allocator.calls.borrow()[0][0].1;
        assert_eq!(reserved % 16, 0);

        let macho = MachOFile::open(&path)?;
        let data = macho.slices()[0].code_signature_bytes()?.unwrap().to_vec()?;
        let signature = EmbeddedSignature::from_bytes(&data)?;
        assert!(signature.length as usize <= reserved);

        Ok(())
    }

    #[test]
    fn resign_with_entitlements_reallocates() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let path = unsigned_file(td.path());
        let identity = self_signed("Dev", "TEAM");
        let allocator = FakeAllocator::new(&body(), None);

        let mut settings = settings(&identity);
        sign_macho_file(
            &path,
            "com.example.test",
            &settings,
            &SpecialFiles::default(),
            &allocator,
        )?;

        let mut entitlements = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\">\n<dict>\n",
        );
        for i in 0..100 {
            entitlements.push_str(&format!(
                "\t<key>com.example.entitlement.{}</key>\n\t<true/>\n",
                i
            ));
        }
        entitlements.push_str("</dict>\n</plist>\n");
        settings.set_entitlements_xml(&entitlements)?;

        sign_macho_file(
            &path,
            "com.example.test",
            &settings,
            &SpecialFiles::default(),
            &allocator,
        )?;

        let calls = allocator.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls[1][0].1 > calls[0][0].1);

        let mut problems = VerificationProblems::default();
        verify_macho_file(&path, &SpecialFiles::default(), &mut problems)?;
        assert!(problems.is_empty(), "{:?}", problems.problems());

        let macho = MachOFile::open(&path)?;
        let data = macho.slices()[0].code_signature_bytes()?.unwrap().to_vec()?;
        let signature = EmbeddedSignature::from_bytes(&data)?;
        assert_eq!(
            signature.entitlements()?.map(|e| e.as_str().to_string()),
            Some(entitlements)
        );

        Ok(())
    }

    #[test]
    fn undersized_reservation_retried_once() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let identity = self_signed("Dev", "TEAM");

        // First reservation is too small, the forced one is honored.
        let path = unsigned_file(td.path());
        let allocator = FakeAllocator::new(&body(), Some(1024));
        sign_macho_file(
            &path,
            "com.example.test",
            &settings(&identity),
            &SpecialFiles::default(),
            &allocator,
        )?;
        assert_eq!(allocator.calls.borrow().len(), 2);

        let mut problems = VerificationProblems::default();
        verify_macho_file(&path, &SpecialFiles::default(), &mut problems)?;
        assert!(problems.is_empty());

        // Every reservation is too small.
        let path = unsigned_file(td.path());
        let allocator = FakeAllocator::new(&body(), Some(64));
        let res = sign_macho_file(
            &path,
            "com.example.test",
            &settings(&identity),
            &SpecialFiles::default(),
            &allocator,
        );
        assert!(matches!(
            res,
            Err(AppleCodesignError::SignatureDataTooLarge { available: 64, .. })
        ));
        assert_eq!(allocator.calls.borrow().len(), 2);

        Ok(())
    }

    #[test]
    fn special_files() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let path = unsigned_file(td.path());
        let info_plist = td.path().join("Info.plist");
        std::fs::write(&info_plist, b"<plist/>")?;

        let identity = self_signed("Dev", "TEAM");
        let allocator = FakeAllocator::new(&body(), None);
        let files = SpecialFiles {
            info_plist: Some(info_plist.clone()),
            code_resources: None,
        };

        sign_macho_file(&path, "com.example.test", &settings(&identity), &files, &allocator)?;

        let mut problems = VerificationProblems::default();
        verify_macho_file(&path, &files, &mut problems)?;
        assert!(problems.is_empty());

        std::fs::write(&info_plist, b"<plist></plist>")?;
        let mut problems = VerificationProblems::default();
        verify_macho_file(&path, &files, &mut problems)?;
        // One mismatch per code directory.
        assert_eq!(problems.problems().len(), 2);
        assert!(problems.problems().iter().all(|p| matches!(
            p.problem,
            VerificationProblemType::SlotDigestMismatch(CodeSigningSlot::Info, _, _)
        )));

        let mut problems = VerificationProblems::default();
        verify_macho_file(&path, &SpecialFiles::default(), &mut problems)?;
        assert!(problems.problems().iter().all(|p| p.problem
            == VerificationProblemType::SlotDigestMissing(CodeSigningSlot::Info)));

        Ok(())
    }

    #[test]
    fn unsigned_file_rejected() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let path = unsigned_file(td.path());

        let mut problems = VerificationProblems::default();
        assert!(matches!(
            verify_macho_file(&path, &SpecialFiles::default(), &mut problems),
            Err(AppleCodesignError::SliceNoCodeSignature(_))
        ));

        Ok(())
    }

    #[test]
    fn signing_requires_identity() {
        let cursor = ByteCursor::from_vec(vec![0u8; 4096]);

        assert!(matches!(
            create_embedded_signature(
                &cursor,
                4096,
                "com.example",
                &SigningSettings::default(),
                &SpecialFiles::default(),
                SigningMode::Estimate
            ),
            Err(AppleCodesignError::NoSigningCertificate)
        ));
    }

    #[test]
    fn codesign_allocate_arguments() {
        let args = CodesignAllocate::arguments(
            Path::new("in"),
            Path::new("out"),
            &[("x86".to_string(), 1024), ("arm64".to_string(), 2048)],
        );

        assert_eq!(
            args,
            ["-i", "in", "-o", "out", "-a", "i386", "1024", "-a", "arm64", "2048"]
                .iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[cfg(unix)]
    #[test]
    fn codesign_allocate_failure() -> Result<(), AppleCodesignError> {
        use std::os::unix::fs::PermissionsExt;

        let td = tempfile::tempdir()?;
        let tool = td.path().join("codesign_allocate");
        std::fs::write(&tool, "#!/bin/sh\necho refusing to allocate\nexit 3\n")?;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755))?;

        let res = CodesignAllocate::new(&tool).allocate(
            Path::new("in"),
            Path::new("out"),
            &[("arm64".to_string(), 1024)],
        );

        match res {
            Err(AppleCodesignError::CodesignAllocateFailed { stdout, .. }) => {
                assert_eq!(stdout.trim(), "refusing to allocate");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let res = CodesignAllocate::new(td.path().join("missing")).allocate(
            Path::new("in"),
            Path::new("out"),
            &[],
        );
        assert!(matches!(res, Err(AppleCodesignError::CodesignAllocateNotFound)));

        Ok(())
    }
}
