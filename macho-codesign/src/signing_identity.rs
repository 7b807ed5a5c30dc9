// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing keys and certificates.
//!
//! A [SigningIdentity] pairs a private key with its leaf certificate and the
//! chain of issuing certificates that is embedded in CMS signatures after
//! the leaf.

use {
    crate::{digest::DigestType, error::AppleCodesignError},
    bcder::Oid,
    std::path::Path,
    x509_certificate::{rfc4519, CapturedX509Certificate, InMemorySigningKeyPair},
};

/// A private key with its certificate chain.
pub struct SigningIdentity {
    key: InMemorySigningKeyPair,
    certificate: CapturedX509Certificate,
    chain: Vec<CapturedX509Certificate>,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("certificate", &self.certificate.subject_name().user_friendly_str())
            .field("chain", &self.chain.len())
            .finish()
    }
}

/// Encode a password as a NULL terminated big-endian UTF-16 string.
///
/// This is the form PKCS#12 key derivation expects.
fn bmp_string(s: &str) -> Vec<u8> {
    let mut bytes = s
        .encode_utf16()
        .flat_map(|c| c.to_be_bytes())
        .collect::<Vec<_>>();
    bytes.extend_from_slice(&[0x00, 0x00]);

    bytes
}

fn pfx_error(message: impl ToString) -> AppleCodesignError {
    AppleCodesignError::PfxParseError(message.to_string())
}

impl SigningIdentity {
    pub fn new(key: InMemorySigningKeyPair, certificate: CapturedX509Certificate) -> Self {
        Self {
            key,
            certificate,
            chain: vec![],
        }
    }

    /// Load an identity from PKCS#12 data.
    ///
    /// The password is verified against the PFX MAC before anything is
    /// decrypted. The data must hold one X.509 certificate bag and one
    /// PKCS#8 shrouded key bag.
    pub fn from_pfx_data(data: &[u8], password: &str) -> Result<Self, AppleCodesignError> {
        let pfx = p12::PFX::parse(data)
            .map_err(|e| pfx_error(format!("data does not appear to be PFX: {:?}", e)))?;

        if !pfx.verify_mac(password) {
            return Err(AppleCodesignError::PfxBadPassword);
        }

        let data = match pfx.auth_safe {
            p12::ContentInfo::Data(data) => data,
            _ => return Err(pfx_error("unexpected PFX content info")),
        };

        let content_infos = yasna::parse_der(&data, |reader| {
            reader.collect_sequence_of(p12::ContentInfo::parse)
        })
        .map_err(|e| pfx_error(format!("failed parsing inner ContentInfo: {:?}", e)))?;

        let password = bmp_string(password);

        let mut certificate = None;
        let mut key = None;

        for content in content_infos {
            let bags_data = match content {
                p12::ContentInfo::Data(inner) => inner,
                p12::ContentInfo::EncryptedData(encrypted) => encrypted
                    .data(&password)
                    .ok_or_else(|| pfx_error("failed decrypting inner EncryptedData"))?,
                p12::ContentInfo::OtherContext(_) => {
                    return Err(pfx_error("unexpected OtherContent in inner PFX data"));
                }
            };

            let bags = yasna::parse_ber(&bags_data, |reader| {
                reader.collect_sequence_of(p12::SafeBag::parse)
            })
            .map_err(|e| pfx_error(format!("failed parsing SafeBag: {:?}", e)))?;

            for bag in bags {
                match bag.bag {
                    p12::SafeBagKind::CertBag(p12::CertBag::X509(der)) => {
                        certificate = Some(CapturedX509Certificate::from_der(der)?);
                    }
                    p12::SafeBagKind::CertBag(p12::CertBag::SDSI(_)) => {
                        return Err(pfx_error("unexpected SDSI certificate data"));
                    }
                    p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                        let decrypted = key_bag
                            .decrypt(&password)
                            .ok_or_else(|| pfx_error("error decrypting PKCS#8 shrouded key bag"))?;

                        key = Some(InMemorySigningKeyPair::from_pkcs8_der(&decrypted)?);
                    }
                    p12::SafeBagKind::OtherBagKind(_) => {
                        return Err(pfx_error("unexpected bag type in inner PFX content"));
                    }
                }
            }
        }

        match (certificate, key) {
            (Some(certificate), Some(key)) => Ok(Self::new(key, certificate)),
            (None, _) => Err(pfx_error("failed to find x509 certificate in PFX data")),
            (_, None) => Err(pfx_error("failed to find signing key in PFX data")),
        }
    }

    /// Load an identity from a `.p12` / `.pfx` file.
    pub fn from_pfx_file(
        path: impl AsRef<Path>,
        password: &str,
    ) -> Result<Self, AppleCodesignError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_pfx_data(&data, password)
    }

    /// Load an identity from PEM encoded certificate and PKCS#8 private key.
    pub fn from_pem_data(
        certificate: &[u8],
        key: &[u8],
    ) -> Result<Self, AppleCodesignError> {
        let certificate = CapturedX509Certificate::from_pem(certificate)?;
        let key = InMemorySigningKeyPair::from_pkcs8_pem(key)?;

        Ok(Self::new(key, certificate))
    }

    /// Append PEM encoded certificates to the chain, in order.
    pub fn add_chain_pem(&mut self, data: &[u8]) -> Result<(), AppleCodesignError> {
        self.chain
            .extend(CapturedX509Certificate::from_pem_multiple(data)?);

        Ok(())
    }

    pub fn signing_key(&self) -> &InMemorySigningKeyPair {
        &self.key
    }

    pub fn certificate(&self) -> &CapturedX509Certificate {
        &self.certificate
    }

    /// Issuing certificates, nearest issuer first.
    pub fn chain(&self) -> &[CapturedX509Certificate] {
        &self.chain
    }

    /// The leaf followed by the chain.
    pub fn all_certificates(&self) -> impl Iterator<Item = &CapturedX509Certificate> {
        std::iter::once(&self.certificate).chain(self.chain.iter())
    }

    fn subject_attribute(&self, oid: &[u8]) -> Result<Option<String>, AppleCodesignError> {
        self.certificate
            .subject_name()
            .find_first_attribute_string(Oid(oid.to_vec().into()))
            .map_err(AppleCodesignError::Asn1Decode)
    }

    /// The team identifier, which is the subject organizational unit.
    pub fn team_id(&self) -> Result<Option<String>, AppleCodesignError> {
        self.subject_attribute(rfc4519::OID_ORGANIZATIONAL_UNIT_NAME.as_ref())
    }

    /// The subject common name.
    pub fn common_name(&self) -> Result<Option<String>, AppleCodesignError> {
        self.subject_attribute(rfc4519::OID_COMMON_NAME.as_ref())
    }

    /// Hex SHA-1 of the leaf certificate DER.
    pub fn fingerprint(&self) -> Result<String, AppleCodesignError> {
        Ok(hex::encode(
            DigestType::Sha1.digest_data(self.certificate.constructed_data())?,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        x509_certificate::{EcdsaCurve, KeyAlgorithm, X509CertificateBuilder},
    };

    /// A self-signed ECDSA identity.
    pub(crate) fn self_signed(common_name: &str, team_id: &str) -> SigningIdentity {
        let (certificate, key, _) = self_signed_with_document(common_name, team_id);

        SigningIdentity::new(key, certificate)
    }

    fn self_signed_with_document(
        common_name: &str,
        team_id: &str,
    ) -> (
        CapturedX509Certificate,
        InMemorySigningKeyPair,
        ring::pkcs8::Document,
    ) {
        let mut builder = X509CertificateBuilder::new(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1));
        builder
            .subject()
            .append_common_name_utf8_string(common_name)
            .unwrap();
        builder
            .subject()
            .append_organizational_unit_utf8_string(team_id)
            .unwrap();

        builder.create_with_random_keypair().unwrap()
    }

    #[test]
    fn subject_fields() {
        let identity = self_signed("Apple Development: Dev", "TEAM123456");

        assert_eq!(
            identity.common_name().unwrap(),
            Some("Apple Development: Dev".to_string())
        );
        assert_eq!(identity.team_id().unwrap(), Some("TEAM123456".to_string()));

        let fingerprint = identity.fingerprint().unwrap();
        assert_eq!(fingerprint.len(), 40);
        assert_eq!(fingerprint, identity.fingerprint().unwrap());
    }

    #[test]
    fn pem_loading_and_chain() {
        let (certificate, _, document) = self_signed_with_document("Leaf", "TEAM");
        let key_pem = pem::encode(&pem::Pem {
            tag: "PRIVATE KEY".to_string(),
            contents: document.as_ref().to_vec(),
        });

        let mut identity =
            SigningIdentity::from_pem_data(certificate.encode_pem().as_bytes(), key_pem.as_bytes())
                .unwrap();
        assert_eq!(identity.common_name().unwrap(), Some("Leaf".to_string()));

        let intermediate = self_signed("Intermediate", "CA").certificate().encode_pem();
        let root = self_signed("Root", "CA").certificate().encode_pem();
        identity
            .add_chain_pem(format!("{}{}", intermediate, root).as_bytes())
            .unwrap();

        let names = identity
            .all_certificates()
            .map(|c| {
                c.subject_name()
                    .find_first_attribute_string(Oid(rfc4519::OID_COMMON_NAME.as_ref().into()))
                    .unwrap()
                    .unwrap()
            })
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Leaf", "Intermediate", "Root"]);
    }

    #[test]
    fn bad_pfx() {
        assert!(matches!(
            SigningIdentity::from_pfx_data(b"not a pfx", "pass"),
            Err(AppleCodesignError::PfxParseError(_))
        ));
    }

    #[test]
    fn bmp_password() {
        assert_eq!(bmp_string("ab"), vec![0, b'a', 0, b'b', 0, 0]);
    }
}
