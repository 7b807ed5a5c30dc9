// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mach-O code signing in pure Rust.
//!
//! This crate produces and verifies the embedded code signatures Apple
//! platforms require of executables, plus the resource seal
//! (`_CodeSignature/CodeResources`) covering the non-code content of bundles.
//!
//! # Features and Capabilities
//!
//! * Find code signature data in thin and universal Mach-O binaries. (See
//!   [MachOFile].)
//! * Parse signature superblobs into typed blobs. (See [EmbeddedSignature],
//!   [CodeDirectoryBlob] and [CodeRequirementExpression].)
//! * Build code directories, designated requirements and CMS signatures
//!   from a [SigningIdentity] and write them into space reserved by
//!   `codesign_allocate`. (See [sign_macho_file].)
//! * Compute, serialize and verify bundle resource seals. (See
//!   [CodeResources] and [CodeResourcesBuilder].)
//! * Sign and verify whole bundles. (See [BundleSigner].)
//!
//! Signature space is reserved by an external tool. Verification reports
//! skippable problems to a [VerificationSink] and fails hard on structural
//! damage.

mod bundle_signing;
pub use bundle_signing::*;
mod cms;
pub use cms::*;
mod code_directory;
pub use code_directory::*;
mod code_hash;
pub use code_hash::*;
pub mod code_requirement;
pub use code_requirement::*;
mod code_resources;
pub use code_resources::*;
mod cursor;
pub use cursor::*;
mod digest;
pub use digest::*;
pub mod embedded_signature;
pub use embedded_signature::*;
mod embedded_signature_builder;
pub use embedded_signature_builder::*;
mod error;
pub use error::*;
mod macho;
pub use macho::*;
mod macho_signing;
pub use macho_signing::*;
mod signing_identity;
pub use signing_identity::*;
mod signing_settings;
pub use signing_settings::*;
mod verify;
pub use verify::*;
