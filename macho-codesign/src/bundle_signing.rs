// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing bundles.
//!
//! A bundle is a directory with an `Info.plist` and a main executable. Its
//! non-code content is sealed in `_CodeSignature/CodeResources` and the seal
//! and `Info.plist` are bound to the executable's signature through special
//! slots.

use {
    crate::{
        code_resources::{
            code_resources_link_path, code_resources_path, CodeResources, CodeResourcesBuilder,
            CODE_SIGNATURE_DIRECTORY,
        },
        error::AppleCodesignError,
        macho_signing::{sign_macho_file, verify_macho_file, SignatureAllocator, SpecialFiles},
        signing_settings::SigningSettings,
        verify::VerificationSink,
    },
    log::info,
    std::path::{Path, PathBuf},
};

/// A bundle that can be signed or verified in place.
#[derive(Clone, Debug)]
pub struct BundleSigner {
    bundle_dir: PathBuf,
    info_plist: plist::Dictionary,
}

impl BundleSigner {
    /// Construct an instance from a bundle directory.
    ///
    /// The directory must contain an `Info.plist`.
    pub fn new_from_path(path: impl AsRef<Path>) -> Result<Self, AppleCodesignError> {
        let bundle_dir = path.as_ref().to_path_buf();
        let info_plist_path = bundle_dir.join("Info.plist");

        if !info_plist_path.is_file() {
            return Err(AppleCodesignError::BundleNoInfoPlist(bundle_dir));
        }

        let info_plist = plist::Value::from_file(&info_plist_path)
            .map_err(AppleCodesignError::PlistParseXml)?
            .into_dictionary()
            .ok_or_else(|| {
                AppleCodesignError::ResourcesPlistParse(format!(
                    "{} root is not a dict",
                    info_plist_path.display()
                ))
            })?;

        Ok(Self {
            bundle_dir,
            info_plist,
        })
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    pub fn info_plist_path(&self) -> PathBuf {
        self.bundle_dir.join("Info.plist")
    }

    fn info_string(&self, key: &str) -> Option<&str> {
        self.info_plist.get(key).and_then(|v| v.as_string())
    }

    /// Name of the main executable.
    ///
    /// This is `CFBundleExecutable`, else the bundle directory name without
    /// its extension.
    pub fn main_executable_name(&self) -> String {
        match self.info_string("CFBundleExecutable") {
            Some(name) => name.to_string(),
            None => self
                .bundle_dir
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn main_executable_path(&self) -> PathBuf {
        self.bundle_dir.join(self.main_executable_name())
    }

    /// Resolve the signing identifier.
    ///
    /// An identifier in settings wins over `CFBundleIdentifier`.
    pub fn identifier(&self, settings: &SigningSettings) -> Result<String, AppleCodesignError> {
        settings
            .identifier()
            .or_else(|| self.info_string("CFBundleIdentifier"))
            .map(|s| s.to_string())
            .ok_or(AppleCodesignError::NoIdentifier)
    }

    fn existing_main_executable(&self) -> Result<PathBuf, AppleCodesignError> {
        let path = self.main_executable_path();

        if path.is_file() {
            Ok(path)
        } else {
            Err(AppleCodesignError::BundleNoMainExecutable(path))
        }
    }

    fn special_files(&self) -> SpecialFiles {
        SpecialFiles {
            info_plist: Some(self.info_plist_path()),
            code_resources: Some(code_resources_path(&self.bundle_dir)),
        }
    }

    /// Sign the bundle in place.
    ///
    /// Any existing seal is discarded. A new seal is written and then every
    /// slice of the main executable is signed.
    pub fn sign(
        &self,
        settings: &SigningSettings,
        allocator: &dyn SignatureAllocator,
    ) -> Result<(), AppleCodesignError> {
        let executable = self.existing_main_executable()?;
        let identifier = self.identifier(settings)?;

        info!(
            "signing bundle {} with identifier {}",
            self.bundle_dir.display(),
            identifier
        );

        let link = code_resources_link_path(&self.bundle_dir);
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        let signature_dir = self.bundle_dir.join(CODE_SIGNATURE_DIRECTORY);
        if signature_dir.exists() {
            std::fs::remove_dir_all(&signature_dir)?;
        }

        let seal = CodeResourcesBuilder::for_signing(&self.bundle_dir, Some(&executable))?.build()?;
        info!(
            "sealed {} files ({} in files2)",
            seal.files().len(),
            seal.files2().len()
        );
        seal.write_to(&code_resources_path(&self.bundle_dir))?;

        sign_macho_file(
            &executable,
            &identifier,
            settings,
            &self.special_files(),
            allocator,
        )
    }

    /// Verify the bundle.
    ///
    /// Every slice of the main executable is verified, then the seal is
    /// recomputed with its own rules and compared.
    pub fn verify(&self, sink: &mut dyn VerificationSink) -> Result<(), AppleCodesignError> {
        let executable = self.existing_main_executable()?;
        let seal = CodeResources::from_bundle(&self.bundle_dir)?;

        verify_macho_file(&executable, &self.special_files(), sink)?;

        let actual =
            CodeResourcesBuilder::for_verification(&self.bundle_dir, Some(&executable), &seal)?
                .build()?;
        seal.verify(&actual)?;

        info!("resource seal of {} verified", self.bundle_dir.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            embedded_signature::CodeSigningSlot,
            macho::tests::synthetic_macho,
            macho_signing::tests::{body, FakeAllocator},
            signing_identity::tests::self_signed,
            verify::{VerificationProblemType, VerificationProblems},
        },
    };

    fn create_bundle(root: &Path, executable: Option<&str>) -> PathBuf {
        let bundle = root.join("Test.app");
        std::fs::create_dir_all(bundle.join("en.lproj")).unwrap();

        let mut info = plist::Dictionary::new();
        info.insert(
            "CFBundleIdentifier".to_string(),
            plist::Value::String("com.example.bundle".to_string()),
        );
        if let Some(name) = executable {
            info.insert(
                "CFBundleExecutable".to_string(),
                plist::Value::String(name.to_string()),
            );
        }
        plist::Value::Dictionary(info)
            .to_file_xml(bundle.join("Info.plist"))
            .unwrap();

        std::fs::write(
            bundle.join(executable.unwrap_or("Test")),
            synthetic_macho(&body(), None),
        )
        .unwrap();
        std::fs::write(bundle.join("resource.dat"), b"resource").unwrap();
        std::fs::write(bundle.join("en.lproj/Main.strings"), b"strings").unwrap();

        bundle
    }

    #[test]
    fn sign_and_verify() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let bundle = create_bundle(td.path(), Some("Runner"));
        std::fs::write(bundle.join("CodeResources"), b"stale")?;

        let identity = self_signed("Dev", "TEAM");
        let mut settings = SigningSettings::default();
        settings.set_signing_identity(&identity);

        let signer = BundleSigner::new_from_path(&bundle)?;
        assert_eq!(signer.main_executable_name(), "Runner");
        assert_eq!(signer.identifier(&settings)?, "com.example.bundle");

        let allocator = FakeAllocator::new(&body(), None);
        signer.sign(&settings, &allocator)?;

        assert!(!bundle.join("CodeResources").exists());
        let seal = CodeResources::from_bundle(&bundle)?;
        assert!(seal.files2().contains_key("resource.dat"));
        assert!(!seal.files2().contains_key("Runner"));
        assert!(!seal.files().contains_key("Runner"));

        let mut problems = VerificationProblems::default();
        signer.verify(&mut problems)?;
        assert!(problems.is_empty(), "{:?}", problems.problems());

        // Signing again replaces the seal and reuses the reservation.
        signer.sign(&settings, &allocator)?;
        assert_eq!(allocator.calls.borrow().len(), 1);
        let mut problems = VerificationProblems::default();
        signer.verify(&mut problems)?;
        assert!(problems.is_empty());

        Ok(())
    }

    #[test]
    fn tampered_resource() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let bundle = create_bundle(td.path(), None);

        let identity = self_signed("Dev", "TEAM");
        let mut settings = SigningSettings::default();
        settings.set_signing_identity(&identity);
        settings.set_identifier("com.example.override");

        let signer = BundleSigner::new_from_path(&bundle)?;
        assert_eq!(signer.main_executable_name(), "Test");
        signer.sign(&settings, &FakeAllocator::new(&body(), None))?;

        std::fs::write(bundle.join("resource.dat"), b"tampered")?;
        let mut problems = VerificationProblems::default();
        assert!(matches!(
            signer.verify(&mut problems),
            Err(AppleCodesignError::SealFileMismatch { .. })
        ));
        assert!(problems.is_empty());

        std::fs::write(bundle.join("resource.dat"), b"resource")?;
        std::fs::write(bundle.join("extra.dat"), b"extra")?;
        let mut problems = VerificationProblems::default();
        assert!(matches!(
            signer.verify(&mut problems),
            Err(AppleCodesignError::SealFileNotPresent(path)) if path == "extra.dat"
        ));

        Ok(())
    }

    #[test]
    fn tampered_seal_is_reported() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let bundle = create_bundle(td.path(), None);

        let identity = self_signed("Dev", "TEAM");
        let mut settings = SigningSettings::default();
        settings.set_signing_identity(&identity);

        let signer = BundleSigner::new_from_path(&bundle)?;
        signer.sign(&settings, &FakeAllocator::new(&body(), None))?;

        let seal_path = code_resources_path(&bundle);
        let mut seal = std::fs::read(&seal_path)?;
        seal.extend_from_slice(b"\n");
        std::fs::write(&seal_path, seal)?;

        let mut problems = VerificationProblems::default();
        signer.verify(&mut problems)?;
        assert_eq!(problems.problems().len(), 2);
        assert!(problems.problems().iter().all(|p| matches!(
            p.problem,
            VerificationProblemType::SlotDigestMismatch(CodeSigningSlot::ResourceDir, _, _)
        )));

        Ok(())
    }

    #[test]
    fn not_a_bundle() {
        let td = tempfile::tempdir().unwrap();

        assert!(matches!(
            BundleSigner::new_from_path(td.path()),
            Err(AppleCodesignError::BundleNoInfoPlist(_))
        ));
    }

    #[test]
    fn unsigned_bundle() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let bundle = create_bundle(td.path(), None);

        let signer = BundleSigner::new_from_path(&bundle)?;
        let mut problems = VerificationProblems::default();
        assert!(matches!(
            signer.verify(&mut problems),
            Err(AppleCodesignError::BundleNotSigned(_))
        ));

        std::fs::remove_file(bundle.join("Test"))?;
        assert!(matches!(
            signer.verify(&mut problems),
            Err(AppleCodesignError::BundleNoMainExecutable(_))
        ));

        Ok(())
    }
}
