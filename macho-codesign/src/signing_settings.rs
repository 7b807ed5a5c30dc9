// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code signing settings.

use {
    crate::{digest::DigestType, error::AppleCodesignError, signing_identity::SigningIdentity},
    std::path::{Path, PathBuf},
};

/// Environment variable consulted for the `codesign_allocate` path.
pub const CODESIGN_ALLOCATE_ENV: &str = "CODESIGN_ALLOCATE";

/// Represents code signing settings.
///
/// An instance is consumed by a signing operation. It holds the signing
/// identity, the identifiers written to code directories and the knobs
/// controlling what gets hashed.
#[derive(Clone, Debug)]
pub struct SigningSettings<'key> {
    signing_identity: Option<&'key SigningIdentity>,
    identifier: Option<String>,
    team_id: Option<String>,
    entitlements_xml: Option<String>,
    digests: Vec<DigestType>,
    page_size: u32,
    codesign_allocate: Option<PathBuf>,
}

impl<'key> Default for SigningSettings<'key> {
    fn default() -> Self {
        Self {
            signing_identity: None,
            identifier: None,
            team_id: None,
            entitlements_xml: None,
            digests: vec![DigestType::Sha1, DigestType::Sha256],
            page_size: 4096,
            codesign_allocate: None,
        }
    }
}

impl<'key> SigningSettings<'key> {
    /// Obtain the signing identity to use.
    pub fn signing_identity(&self) -> Option<&'key SigningIdentity> {
        self.signing_identity
    }

    /// Set the identity producing the cryptographic signature.
    ///
    /// Its leaf certificate common name is embedded in the designated
    /// requirement and its organizational unit is the default team identifier.
    pub fn set_signing_identity(&mut self, identity: &'key SigningIdentity) {
        self.signing_identity = Some(identity);
    }

    /// Obtain the explicit binary identifier, if one was set.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Set the binary identifier written to code directories.
    ///
    /// Bundles default to their `CFBundleIdentifier`.
    pub fn set_identifier(&mut self, value: impl ToString) {
        self.identifier = Some(value.to_string());
    }

    /// Obtain the team identifier for signed binaries.
    ///
    /// An explicit value wins. Otherwise the organizational unit of the
    /// signing certificate is used, if present.
    pub fn team_id(&self) -> Result<Option<String>, AppleCodesignError> {
        if let Some(team_id) = &self.team_id {
            return Ok(Some(team_id.clone()));
        }

        match self.signing_identity {
            Some(identity) => identity.team_id(),
            None => Ok(None),
        }
    }

    /// Set the team identifier for signed binaries.
    pub fn set_team_id(&mut self, value: impl ToString) {
        self.team_id = Some(value.to_string());
    }

    /// Obtain the entitlements XML plist to embed.
    pub fn entitlements_xml(&self) -> Option<&str> {
        self.entitlements_xml.as_deref()
    }

    /// Set the entitlements to embed from XML plist content.
    ///
    /// The content is validated as a plist but embedded verbatim.
    pub fn set_entitlements_xml(&mut self, value: impl ToString) -> Result<(), AppleCodesignError> {
        let value = value.to_string();

        plist::Value::from_reader_xml(value.as_bytes())
            .map_err(AppleCodesignError::PlistParseXml)?;

        self.entitlements_xml = Some(value);

        Ok(())
    }

    /// Obtain the digests to produce code directories for.
    ///
    /// The first entry is the primary code directory.
    pub fn digests(&self) -> &[DigestType] {
        &self.digests
    }

    /// Set the digests to produce code directories for.
    ///
    /// The first digest produces the primary code directory, which the
    /// CMS signature covers. The remaining produce alternate code directories.
    pub fn set_digests(
        &mut self,
        digests: impl IntoIterator<Item = DigestType>,
    ) -> Result<(), AppleCodesignError> {
        let digests = digests.into_iter().collect::<Vec<_>>();

        if digests.is_empty() {
            return Err(AppleCodesignError::SignatureBuilder(
                "at least one digest is required",
            ));
        }

        for digest in &digests {
            digest.hash_len()?;
        }

        self.digests = digests;

        Ok(())
    }

    /// Obtain the page size for code hashes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Set the page size for code hashes.
    ///
    /// Must be 0 or a power of 2. 0 hashes the whole code range as one page.
    pub fn set_page_size(&mut self, page_size: u32) -> Result<(), AppleCodesignError> {
        if page_size != 0 && !page_size.is_power_of_two() {
            return Err(AppleCodesignError::CodeDirectoryMalformed(
                "page size not a power of 2",
            ));
        }

        self.page_size = page_size;

        Ok(())
    }

    /// Obtain the explicitly configured `codesign_allocate` path.
    pub fn codesign_allocate(&self) -> Option<&Path> {
        self.codesign_allocate.as_deref()
    }

    /// Set the path of the `codesign_allocate` tool.
    pub fn set_codesign_allocate(&mut self, path: impl AsRef<Path>) {
        self.codesign_allocate = Some(path.as_ref().to_path_buf());
    }

    /// Resolve the `codesign_allocate` executable.
    ///
    /// The explicit setting is used first, then the `CODESIGN_ALLOCATE`
    /// environment variable, then a `PATH` search.
    pub fn resolve_codesign_allocate(&self) -> Result<PathBuf, AppleCodesignError> {
        if let Some(path) = &self.codesign_allocate {
            return Ok(path.clone());
        }

        if let Some(path) = std::env::var_os(CODESIGN_ALLOCATE_ENV) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        which::which("codesign_allocate").map_err(|_| AppleCodesignError::CodesignAllocateNotFound)
    }
}
