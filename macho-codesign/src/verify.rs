// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collection of verification problems.
//!
//! Structural problems with signature data abort verification with an
//! [AppleCodesignError]. Problems with metadata covered by a signature
//! (special slot digests, CMS signers, the cdhashes attribute) are reported
//! to a [VerificationSink] instead so that a single verification pass can
//! report all of them. The sink decides whether a problem is fatal.

use {
    crate::{embedded_signature::CodeSigningSlot, error::AppleCodesignError},
    std::path::PathBuf,
};

/// Context for a verification issue.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VerificationContext {
    /// Path of binary or bundle.
    pub path: Option<PathBuf>,

    /// Architecture of the Mach-O slice that is problematic.
    pub arch: Option<String>,
}

impl VerificationContext {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            arch: None,
        }
    }

    /// Derive a context for a given slice.
    pub fn for_arch(&self, arch: impl ToString) -> Self {
        Self {
            path: self.path.clone(),
            arch: Some(arch.to_string()),
        }
    }
}

/// Describes a problem with verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationProblemType {
    /// No CMS signature blob is present.
    NoCryptographicSignature,
    /// A special slot has a recorded digest but the data it covers is absent.
    SlotDigestMissing(CodeSigningSlot),
    /// Digest of data covered by a special slot differs from the recorded one.
    SlotDigestMismatch(CodeSigningSlot, Vec<u8>, Vec<u8>),
    /// A CMS signer failed verification.
    CmsSignerFailed(usize, String),
    /// Multiple code directories but no cdhashes attribute.
    CdHashesMissing,
    /// The cdhashes attribute could not be decoded.
    CdHashesMalformed(String),
    /// Number of cdhashes differs from number of code directories.
    CdHashesCountMismatch { expected: usize, actual: usize },
    /// A cdhash differs from the digest of its code directory.
    CdHashMismatch(usize, Vec<u8>, Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationProblem {
    pub context: VerificationContext,
    pub problem: VerificationProblemType,
}

impl std::fmt::Display for VerificationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let context = match (&self.context.path, &self.context.arch) {
            (None, None) => None,
            (Some(path), None) => Some(format!("{}", path.display())),
            (None, Some(arch)) => Some(format!("@{}", arch)),
            (Some(path), Some(arch)) => Some(format!("{}@{}", path.display(), arch)),
        };

        let message = match &self.problem {
            VerificationProblemType::NoCryptographicSignature => {
                "no cryptographic signature present".to_string()
            }
            VerificationProblemType::SlotDigestMissing(slot) => {
                format!("data for slot {:?} is missing", slot)
            }
            VerificationProblemType::SlotDigestMismatch(slot, expected, actual) => format!(
                "special slot {:?} hash mismatch; recorded {}, actual {}",
                slot,
                hex::encode(expected),
                hex::encode(actual)
            ),
            VerificationProblemType::CmsSignerFailed(index, message) => {
                format!("CMS signer {} failed verification: {}", index, message)
            }
            VerificationProblemType::CdHashesMissing => {
                "multiple code directories but no cdhashes attribute".to_string()
            }
            VerificationProblemType::CdHashesMalformed(message) => {
                format!("cdhashes attribute is malformed: {}", message)
            }
            VerificationProblemType::CdHashesCountMismatch { expected, actual } => format!(
                "cdhashes attribute has {} entries; expected {}",
                actual, expected
            ),
            VerificationProblemType::CdHashMismatch(index, expected, actual) => format!(
                "cdhash {} mismatch; signed {}, actual {}",
                index,
                hex::encode(expected),
                hex::encode(actual)
            ),
        };

        match context {
            Some(context) => f.write_fmt(format_args!("{}: {}", context, message)),
            None => f.write_str(&message),
        }
    }
}

/// Receives skippable verification problems.
pub trait VerificationSink {
    /// Record a problem.
    ///
    /// Returning `Err` aborts verification.
    fn report(&mut self, problem: VerificationProblem) -> Result<(), AppleCodesignError>;
}

/// A sink that records every problem.
#[derive(Debug, Default)]
pub struct VerificationProblems {
    problems: Vec<VerificationProblem>,
}

impl VerificationProblems {
    pub fn problems(&self) -> &[VerificationProblem] {
        &self.problems
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Convert to an error if any problem was recorded.
    pub fn into_result(self) -> Result<(), AppleCodesignError> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(AppleCodesignError::VerificationProblems)
        }
    }
}

impl VerificationSink for VerificationProblems {
    fn report(&mut self, problem: VerificationProblem) -> Result<(), AppleCodesignError> {
        log::warn!("{}", problem);
        self.problems.push(problem);

        Ok(())
    }
}

/// A sink that fails on the first problem.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrictVerification;

impl VerificationSink for StrictVerification {
    fn report(&mut self, problem: VerificationProblem) -> Result<(), AppleCodesignError> {
        log::warn!("{}", problem);

        Err(AppleCodesignError::Verification(problem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> VerificationProblem {
        VerificationProblem {
            context: VerificationContext::with_path("/tmp/bin").for_arch("arm64"),
            problem: VerificationProblemType::SlotDigestMismatch(
                CodeSigningSlot::Entitlements,
                vec![0xaa],
                vec![0xbb],
            ),
        }
    }

    #[test]
    fn collecting_sink() {
        let mut sink = VerificationProblems::default();
        assert!(sink.is_empty());

        sink.report(problem()).unwrap();
        sink.report(problem()).unwrap();

        assert_eq!(sink.problems().len(), 2);
        assert!(matches!(
            sink.into_result(),
            Err(AppleCodesignError::VerificationProblems)
        ));
    }

    #[test]
    fn strict_sink() {
        let mut sink = StrictVerification;

        match sink.report(problem()) {
            Err(AppleCodesignError::Verification(p)) => assert_eq!(p, problem()),
            _ => panic!("expected verification error"),
        }
    }

    #[test]
    fn context_equality() {
        let context = VerificationContext::with_path("/tmp/bin");

        assert_eq!(
            context.for_arch("arm64"),
            VerificationContext::with_path("/tmp/bin").for_arch("arm64")
        );
        assert_ne!(context, context.for_arch("arm64"));
        assert_ne!(context, VerificationContext::default());
    }

    #[test]
    fn display() {
        assert_eq!(
            problem().to_string(),
            "/tmp/bin@arm64: special slot Entitlements (5) hash mismatch; recorded aa, actual bb"
        );
    }
}
