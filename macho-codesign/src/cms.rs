// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! CMS signatures over code directories.

The signature slot of an embedded signature holds a detached CMS `SignedData`
whose message digest covers the serialized bytes of the primary code
directory.

When a signature carries more than one code directory, a signed attribute
with OID `1.2.840.113635.100.9.1` holds an XML plist of the form
`{cdhashes: [<data>, ...]}` with one cdhash per code directory, in slot order.
A cdhash is the digest of a code directory's bytes using that directory's
own digest, truncated to 20 bytes.
*/

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        digest::DigestType,
        embedded_signature::Blob,
        error::AppleCodesignError,
        signing_identity::SigningIdentity,
        verify::{VerificationContext, VerificationProblem, VerificationProblemType, VerificationSink},
    },
    bcder::{decode::Constructed, Mode, OctetString, Oid},
    bytes::Bytes,
    cryptographic_message_syntax::{SignedData, SignedDataBuilder, SignerBuilder},
};

/// OID of the signed attribute holding the cdhashes plist.
pub const OID_CDHASHES_PLIST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x09, 0x01];

/// Length of a cdhash.
pub const CDHASH_LENGTH: usize = 20;

/// Placeholder size reserved for a CMS signature with up to three certificates.
const CMS_ESTIMATE_BASE: usize = 9 * 1024;

/// Additional placeholder size per certificate beyond three.
const CMS_ESTIMATE_PER_EXTRA_CERTIFICATE: usize = 2 * 1024;

/// Compute the cdhash of serialized code directory bytes.
pub fn code_directory_hash(
    cd_data: &[u8],
    hash_type: DigestType,
) -> Result<Vec<u8>, AppleCodesignError> {
    let mut digest = hash_type.digest_data(cd_data)?;
    digest.truncate(CDHASH_LENGTH);

    Ok(digest)
}

/// Obtain the XML plist containing code directory hashes.
///
/// Line separators are always `\n`.
pub fn create_code_directory_hashes_plist(
    cdhashes: &[Vec<u8>],
) -> Result<Vec<u8>, AppleCodesignError> {
    let mut plist = plist::Dictionary::new();
    plist.insert(
        "cdhashes".to_string(),
        plist::Value::Array(
            cdhashes
                .iter()
                .map(|h| plist::Value::Data(h.clone()))
                .collect(),
        ),
    );

    let mut buffer = Vec::<u8>::new();
    plist::Value::from(plist)
        .to_writer_xml(&mut buffer)
        .map_err(AppleCodesignError::PlistSerializeXml)?;

    let mut xml = String::from_utf8_lossy(&buffer).replace("\r\n", "\n");
    if !xml.ends_with('\n') {
        xml.push('\n');
    }

    Ok(xml.into_bytes())
}

/// Parse the cdhashes plist from a signed attribute.
pub fn parse_code_directory_hashes_plist(
    data: &[u8],
) -> Result<Vec<Vec<u8>>, AppleCodesignError> {
    let value = plist::Value::from_reader_xml(data).map_err(AppleCodesignError::PlistParseXml)?;

    let hashes = value
        .as_dictionary()
        .and_then(|d| d.get("cdhashes"))
        .and_then(|v| v.as_array())
        .ok_or(AppleCodesignError::CmsAttributeMalformed(
            "cdhashes plist lacks a cdhashes array",
        ))?;

    hashes
        .iter()
        .map(|v| {
            v.as_data()
                .map(|d| d.to_vec())
                .ok_or(AppleCodesignError::CmsAttributeMalformed(
                    "cdhashes entry is not data",
                ))
        })
        .collect()
}

/// Number of bytes to reserve for a CMS signature in estimate mode.
pub fn estimate_cms_signature_size(certificate_count: usize) -> usize {
    CMS_ESTIMATE_BASE
        + certificate_count.saturating_sub(3) * CMS_ESTIMATE_PER_EXTRA_CERTIFICATE
}

/// Create a CMS `SignedData` structure over code directories.
///
/// The first code directory is the primary one. Its serialized bytes are what
/// the signature's message digest covers. The leaf certificate is followed by
/// the identity's chain in the certificate set.
pub fn create_cms_signature(
    identity: &SigningIdentity,
    code_directories: &[&CodeDirectoryBlob],
) -> Result<Vec<u8>, AppleCodesignError> {
    let primary = code_directories
        .first()
        .ok_or(AppleCodesignError::SignatureBuilder(
            "at least one code directory is required to sign",
        ))?;

    let primary_data = primary.to_blob_bytes()?;

    let mut signer = SignerBuilder::new(identity.signing_key(), identity.certificate().clone())
        .message_id_content(primary_data);

    if code_directories.len() > 1 {
        let cdhashes = code_directories
            .iter()
            .map(|cd| code_directory_hash(&cd.to_blob_bytes()?, cd.hash_type))
            .collect::<Result<Vec<_>, AppleCodesignError>>()?;

        let plist = create_code_directory_hashes_plist(&cdhashes)?;

        signer = signer.signed_attribute_octet_string(
            Oid(Bytes::copy_from_slice(OID_CDHASHES_PLIST)),
            &plist,
        );
    }

    let mut builder = SignedDataBuilder::default().signer(signer);
    for cert in identity.all_certificates() {
        builder = builder.certificate(cert.clone());
    }

    let der = builder.build_der()?;

    log::debug!("created {} byte CMS signature", der.len());

    Ok(der)
}

/// Find the cdhashes plist among a signer's signed attributes.
fn find_cdhashes_attribute(
    signed_data: &SignedData,
) -> Result<Option<Vec<u8>>, AppleCodesignError> {
    for signer in signed_data.signers() {
        let attributes = match signer.signed_attributes() {
            Some(attributes) => attributes,
            None => continue,
        };

        for attribute in attributes.attributes().iter() {
            if attribute.typ.as_ref() != OID_CDHASHES_PLIST {
                continue;
            }

            if let Some(value) = attribute.values.first() {
                let data = Constructed::decode(value.as_slice(), Mode::Der, |cons| {
                    OctetString::take_from(cons)
                })
                .map_err(AppleCodesignError::Asn1Decode)?;

                return Ok(Some(data.to_bytes().to_vec()));
            }
        }
    }

    Ok(None)
}

/// Verify a CMS signature against code directories.
///
/// `code_directories` holds every code directory with its serialized bytes,
/// primary first. Signer failures and cdhash problems are reported to the
/// sink, as is a cdhashes attribute that can't be decoded. Data that isn't
/// parseable CMS is an error.
pub fn verify_cms_signature(
    cms_data: &[u8],
    code_directories: &[(&CodeDirectoryBlob, &[u8])],
    context: &VerificationContext,
    sink: &mut dyn VerificationSink,
) -> Result<(), AppleCodesignError> {
    let report = |sink: &mut dyn VerificationSink, problem| {
        sink.report(VerificationProblem {
            context: context.clone(),
            problem,
        })
    };

    let (_, primary_data) = code_directories
        .first()
        .ok_or(AppleCodesignError::BinaryNoCodeSignature)?;

    let signed_data = SignedData::parse_ber(cms_data)?;

    for (index, signer) in signed_data.signers().enumerate() {
        if let Err(e) = signer.verify_signature_with_signed_data(&signed_data) {
            report(
                sink,
                VerificationProblemType::CmsSignerFailed(index, e.to_string()),
            )?;
        }

        if let Err(e) = signer.verify_message_digest_with_content(primary_data) {
            report(
                sink,
                VerificationProblemType::CmsSignerFailed(index, e.to_string()),
            )?;
        }
    }

    if code_directories.len() < 2 {
        return Ok(());
    }

    let signed = match find_cdhashes_attribute(&signed_data)
        .and_then(|plist| plist.map(|p| parse_code_directory_hashes_plist(&p)).transpose())
    {
        Ok(Some(hashes)) => hashes,
        Ok(None) => {
            return report(sink, VerificationProblemType::CdHashesMissing);
        }
        Err(e) => {
            return report(sink, VerificationProblemType::CdHashesMalformed(e.to_string()));
        }
    };

    if signed.len() != code_directories.len() {
        return report(
            sink,
            VerificationProblemType::CdHashesCountMismatch {
                expected: code_directories.len(),
                actual: signed.len(),
            },
        );
    }

    for (index, ((cd, data), expected)) in code_directories.iter().zip(signed).enumerate() {
        let actual = code_directory_hash(data, cd.hash_type)?;

        if actual != expected {
            report(
                sink,
                VerificationProblemType::CdHashMismatch(index, expected, actual),
            )?;
        }
    }

    Ok(())
}
