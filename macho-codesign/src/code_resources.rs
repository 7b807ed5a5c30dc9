// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Functionality related to "code resources," external resources captured in signatures.
//!
//! Bundles can contain a `_CodeSignature/CodeResources` XML plist file
//! denoting digests of resources not in the binary. The signature data
//! in the binary records the digest of this file in the
//! [crate::CodeSigningSlot::ResourceDir] special slot so integrity is
//! transitively verified.
//!
//! The file holds two generations of rules and files. `rules` and `files` are
//! the legacy generation with SHA-1 digests. `rules2` and `files2` carry
//! SHA-1 and SHA-256 digests and honor the `omit` flag of rules.
//!
//! We coerce [plist::Value] instances instead of deriving `Deserialize`
//! because entries can be either scalars or dicts.

use {
    crate::{digest::DigestType, error::AppleCodesignError},
    log::{debug, info},
    plist::{Dictionary, Value},
    std::{
        collections::BTreeMap,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Name of the directory holding signature files inside a bundle.
pub const CODE_SIGNATURE_DIRECTORY: &str = "_CodeSignature";

/// Name of the resource seal file.
pub const CODE_RESOURCES_FILE: &str = "CodeResources";

/// Path of the resource seal of a bundle.
pub fn code_resources_path(bundle_dir: &Path) -> PathBuf {
    bundle_dir
        .join(CODE_SIGNATURE_DIRECTORY)
        .join(CODE_RESOURCES_FILE)
}

/// Path of the legacy resource seal link of a bundle.
pub fn code_resources_link_path(bundle_dir: &Path) -> PathBuf {
    bundle_dir.join(CODE_RESOURCES_FILE)
}

fn parse_error(message: String) -> AppleCodesignError {
    AppleCodesignError::ResourcesPlistParse(message)
}

fn expect_bool(value: &Value, what: &str) -> Result<bool, AppleCodesignError> {
    value
        .as_boolean()
        .ok_or_else(|| parse_error(format!("expected bool for {}, got {:?}", what, value)))
}

fn expect_data(value: &Value, what: &str) -> Result<Vec<u8>, AppleCodesignError> {
    value
        .as_data()
        .map(|data| data.to_vec())
        .ok_or_else(|| parse_error(format!("expected <data> for {}, got {:?}", what, value)))
}

/// A rule classifying bundle paths.
///
/// This type represents `<rules>` and `<rules2>` entries as well as the
/// exclusion rules a builder adds internally.
#[derive(Clone, Debug)]
pub struct CodeResourcesRule {
    /// The rule pattern.
    ///
    /// The `<key>` in the `<rules>` or `<rules2>` dict.
    pub pattern: String,

    /// Whether this is an exclusion rule.
    ///
    /// Exclusion rules stop rule resolution and are never serialized.
    pub exclude: bool,

    /// Directories matching this rule hold nested code and aren't descended into.
    pub nested: bool,

    /// Matching files are not sealed.
    pub omit: bool,

    /// Whether matching files may be absent.
    pub optional: bool,

    /// Weighting to apply to the rule.
    pub weight: Option<f64>,

    re: regex::Regex,
}

impl PartialEq for CodeResourcesRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && self.exclude == other.exclude
            && self.nested == other.nested
            && self.omit == other.omit
            && self.optional == other.optional
            && self.weight == other.weight
    }
}

impl CodeResourcesRule {
    /// Construct a rule from a regular expression.
    ///
    /// Matching is case-insensitive and unanchored.
    pub fn new(pattern: impl ToString) -> Result<Self, AppleCodesignError> {
        let pattern = pattern.to_string();

        let re = regex::RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| AppleCodesignError::ResourcesBadRegex(pattern.clone(), e))?;

        Ok(Self {
            pattern,
            exclude: false,
            nested: false,
            omit: false,
            optional: false,
            weight: None,
            re,
        })
    }

    /// Mark this as an exclusion rule.
    #[must_use]
    pub fn exclude(mut self) -> Self {
        self.exclude = true;
        self
    }

    /// Mark the rule as nested.
    #[must_use]
    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    /// Set the omit field.
    #[must_use]
    pub fn omit(mut self) -> Self {
        self.omit = true;
        self
    }

    /// Mark the files matched by this rule are optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the weight of this rule.
    #[must_use]
    pub fn weight(mut self, v: f64) -> Self {
        self.weight = Some(v);
        self
    }

    /// Whether the pattern matches anywhere in a path.
    pub fn matches(&self, path: &str) -> bool {
        self.re.is_match(path)
    }

    fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(0.0)
    }

    fn from_plist(pattern: &str, value: &Value) -> Result<Self, AppleCodesignError> {
        let mut rule = Self::new(pattern)?;

        match value {
            Value::Boolean(true) => {}
            Value::Boolean(false) => {
                rule.omit = true;
            }
            Value::Dictionary(dict) => {
                for (key, value) in dict {
                    match key.as_str() {
                        "optional" => rule.optional = expect_bool(value, "rule optional key")?,
                        "omit" => rule.omit = expect_bool(value, "rule omit key")?,
                        "nested" => rule.nested = expect_bool(value, "rule nested key")?,
                        "weight" => {
                            rule.weight = Some(
                                value
                                    .as_real()
                                    .or_else(|| value.as_signed_integer().map(|v| v as f64))
                                    .ok_or_else(|| {
                                        parse_error(format!(
                                            "expected number for rule weight, got {:?}",
                                            value
                                        ))
                                    })?,
                            );
                        }
                        key => {
                            return Err(parse_error(format!("unexpected key in rule dict: {}", key)));
                        }
                    }
                }
            }
            _ => {
                return Err(parse_error(format!(
                    "invalid value for rule {}: {:?}",
                    pattern, value
                )));
            }
        }

        Ok(rule)
    }

    fn to_plist(&self) -> Value {
        if !self.optional && !self.omit && !self.nested && self.weight.is_none() {
            return Value::Boolean(true);
        }

        let mut dict = Dictionary::new();

        if self.nested {
            dict.insert("nested".to_string(), Value::Boolean(true));
        }
        if self.omit {
            dict.insert("omit".to_string(), Value::Boolean(true));
        }
        if self.optional {
            dict.insert("optional".to_string(), Value::Boolean(true));
        }
        if let Some(weight) = self.weight {
            dict.insert("weight".to_string(), Value::Real(weight));
        }

        Value::Dictionary(dict)
    }
}

/// Resolve the rule governing a bundle relative path.
///
/// Rules are tried in order. An exclusion or omit rule that matches wins
/// immediately. Otherwise the matching rule with the highest weight wins.
/// `None` means no rule matched, which behaves as a rule without flags.
pub fn find_rule<'r>(
    rules: impl IntoIterator<Item = &'r CodeResourcesRule>,
    path: &str,
) -> Option<&'r CodeResourcesRule> {
    let mut best: Option<&CodeResourcesRule> = None;

    for rule in rules {
        if !rule.matches(path) {
            continue;
        }

        if rule.exclude || rule.omit {
            return Some(rule);
        }

        let best_weight = best.map(|r| r.effective_weight()).unwrap_or(0.0);
        if rule.effective_weight() > best_weight {
            best = Some(rule);
        }
    }

    best
}

/// Digests recorded for a sealed file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedFile {
    /// SHA-1 of the content.
    pub hash: Option<Vec<u8>>,
    /// SHA-256 of the content. Only recorded in `files2`.
    pub hash2: Option<Vec<u8>>,
    pub optional: bool,
}

impl std::fmt::Display for SealedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(hash) = &self.hash {
            write!(f, "hash={}", hex::encode(hash))?;
        }
        if let Some(hash2) = &self.hash2 {
            write!(f, " hash2={}", hex::encode(hash2))?;
        }
        if self.optional {
            f.write_str(" (optional)")?;
        }

        Ok(())
    }
}

impl SealedFile {
    /// Digest a file on disk.
    pub fn from_path(path: &Path, v2: bool, optional: bool) -> Result<Self, AppleCodesignError> {
        Ok(Self {
            hash: Some(DigestType::Sha1.digest_file(path)?),
            hash2: if v2 {
                Some(DigestType::Sha256.digest_file(path)?)
            } else {
                None
            },
            optional,
        })
    }

    /// Whether this entry matches a reference entry.
    ///
    /// The secondary hash is only compared for `files2`.
    pub fn matches(&self, reference: &SealedFile, v2: bool) -> bool {
        self.optional == reference.optional
            && self.hash == reference.hash
            && (!v2 || self.hash2 == reference.hash2)
    }

    fn from_plist(value: &Value) -> Result<Self, AppleCodesignError> {
        match value {
            Value::Data(hash) => Ok(Self {
                hash: Some(hash.to_vec()),
                hash2: None,
                optional: false,
            }),
            Value::Dictionary(dict) => {
                let mut res = Self {
                    hash: None,
                    hash2: None,
                    optional: false,
                };

                for (key, value) in dict {
                    match key.as_str() {
                        "hash" => res.hash = Some(expect_data(value, "files hash key")?),
                        "hash2" => res.hash2 = Some(expect_data(value, "files hash2 key")?),
                        "optional" => res.optional = expect_bool(value, "files optional key")?,
                        key => {
                            return Err(parse_error(format!(
                                "unexpected key in files dict entry: {}",
                                key
                            )));
                        }
                    }
                }

                Ok(res)
            }
            _ => Err(parse_error(format!(
                "bad value in files <dict>; expected <data> or <dict>, got {:?}",
                value
            ))),
        }
    }

    fn to_plist(&self, v2: bool) -> Value {
        if !v2 && !self.optional {
            if let Some(hash) = &self.hash {
                return Value::Data(hash.clone());
            }
        }

        let mut dict = Dictionary::new();
        if let Some(hash) = &self.hash {
            dict.insert("hash".to_string(), Value::Data(hash.clone()));
        }
        if v2 {
            if let Some(hash2) = &self.hash2 {
                dict.insert("hash2".to_string(), Value::Data(hash2.clone()));
            }
        }
        if self.optional {
            dict.insert("optional".to_string(), Value::Boolean(true));
        }

        Value::Dictionary(dict)
    }
}

/// Represents a `_CodeSignature/CodeResources` XML plist.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodeResources {
    rules: Vec<CodeResourcesRule>,
    rules2: Vec<CodeResourcesRule>,
    files: BTreeMap<String, SealedFile>,
    files2: BTreeMap<String, SealedFile>,
}

impl CodeResources {
    /// An instance with the default rules and no files.
    pub fn template() -> Result<Self, AppleCodesignError> {
        let rules = vec![
            CodeResourcesRule::new("^")?,
            CodeResourcesRule::new("^.*\\.lproj/")?
                .optional()
                .weight(1000.0),
            CodeResourcesRule::new("^.*\\.lproj/locversion.plist$")?
                .omit()
                .weight(1100.0),
            CodeResourcesRule::new("^version.plist$")?,
        ];

        let rules2 = vec![
            CodeResourcesRule::new(".*\\.dSYM($|/)")?.weight(11.0),
            CodeResourcesRule::new("^(.*/)?\\.DS_Store$")?
                .omit()
                .weight(2000.0),
            CodeResourcesRule::new(
                "^(Frameworks|SharedFrameworks|PlugIns|Plug-ins|XPCServices|Helpers|MacOS|Library/(Automator|Spotlight|LoginItems))/",
            )?
            .nested()
            .weight(10.0),
            CodeResourcesRule::new("^.*")?,
            CodeResourcesRule::new("^.*\\.lproj/")?
                .optional()
                .weight(1000.0),
            CodeResourcesRule::new("^.*\\.lproj/locversion.plist$")?
                .omit()
                .weight(1100.0),
            CodeResourcesRule::new("^Info\\.plist$")?.omit().weight(20.0),
            CodeResourcesRule::new("^PkgInfo$")?.omit().weight(20.0),
            CodeResourcesRule::new("^[^/]+$")?.nested().weight(10.0),
            CodeResourcesRule::new("^embedded\\.provisionprofile$")?.weight(20.0),
            CodeResourcesRule::new("^version\\.plist$")?.weight(20.0),
        ];

        Ok(Self {
            rules,
            rules2,
            ..Default::default()
        })
    }

    /// Construct an instance by parsing an XML plist.
    pub fn from_xml(xml: &[u8]) -> Result<Self, AppleCodesignError> {
        let plist = Value::from_reader_xml(xml).map_err(AppleCodesignError::ResourcesPlist)?;

        let dict = plist.into_dictionary().ok_or_else(|| {
            parse_error("plist root element should be a <dict>".to_string())
        })?;

        let mut res = Self::default();

        for (key, value) in dict.iter() {
            let entries = value.as_dictionary().ok_or_else(|| {
                parse_error(format!("expecting {} to be a dict, got {:?}", key, value))
            })?;

            match key.as_str() {
                "files" | "files2" => {
                    let files = entries
                        .iter()
                        .map(|(path, value)| Ok((path.clone(), SealedFile::from_plist(value)?)))
                        .collect::<Result<BTreeMap<_, _>, AppleCodesignError>>()?;

                    if key == "files" {
                        res.files = files;
                    } else {
                        res.files2 = files;
                    }
                }
                "rules" | "rules2" => {
                    let rules = entries
                        .iter()
                        .map(|(pattern, value)| CodeResourcesRule::from_plist(pattern, value))
                        .collect::<Result<Vec<_>, AppleCodesignError>>()?;

                    if key == "rules" {
                        res.rules = rules;
                    } else {
                        res.rules2 = rules;
                    }
                }
                key => {
                    return Err(parse_error(format!("unexpected key in root dict: {}", key)));
                }
            }
        }

        Ok(res)
    }

    /// Read the resource seal of a bundle.
    pub fn from_bundle(bundle_dir: &Path) -> Result<Self, AppleCodesignError> {
        let path = code_resources_path(bundle_dir);

        if !path.exists() {
            return Err(AppleCodesignError::BundleNotSigned(bundle_dir.to_path_buf()));
        }

        Self::from_xml(&std::fs::read(path)?)
    }

    /// Legacy rules.
    pub fn rules(&self) -> &[CodeResourcesRule] {
        &self.rules
    }

    /// Version 2 rules.
    pub fn rules2(&self) -> &[CodeResourcesRule] {
        &self.rules2
    }

    /// Legacy sealed files.
    pub fn files(&self) -> &BTreeMap<String, SealedFile> {
        &self.files
    }

    /// Version 2 sealed files.
    pub fn files2(&self) -> &BTreeMap<String, SealedFile> {
        &self.files2
    }

    /// Serialize an instance to XML.
    ///
    /// The output follows Apple's formatting: empty elements have no space
    /// before the slash, lines end with `\n` and the document ends with a
    /// newline.
    pub fn to_writer_xml(&self, mut writer: impl Write) -> Result<(), AppleCodesignError> {
        let value = Value::from(self);

        let mut data = Vec::<u8>::new();
        value
            .to_writer_xml(&mut data)
            .map_err(AppleCodesignError::ResourcesPlist)?;

        let data = String::from_utf8(data)
            .map_err(|e| parse_error(format!("plist writer emitted invalid UTF-8: {}", e)))?;
        let data = data
            .replace("\r\n", "\n")
            .replace("<dict />", "<dict/>")
            .replace("<true />", "<true/>")
            .replace("<false />", "<false/>");

        writer.write_all(data.as_bytes())?;
        if !data.ends_with('\n') {
            writer.write_all(b"\n")?;
        }

        Ok(())
    }

    /// Serialize to XML bytes.
    pub fn to_xml(&self) -> Result<Vec<u8>, AppleCodesignError> {
        let mut data = vec![];
        self.to_writer_xml(&mut data)?;

        Ok(data)
    }

    /// Write the seal to a file.
    pub fn write_to(&self, path: &Path) -> Result<(), AppleCodesignError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, self.to_xml()?)?;
        info!("wrote resource seal {}", path.display());

        Ok(())
    }

    /// Verify a seal computed from actual bundle content against this one.
    ///
    /// Every actual file must be present in this seal with matching digests
    /// and every file in this seal must be present in the actual one.
    pub fn verify(&self, actual: &CodeResources) -> Result<(), AppleCodesignError> {
        verify_files(&self.files, &actual.files, false)?;
        verify_files(&self.files2, &actual.files2, true)
    }
}

fn verify_files(
    reference: &BTreeMap<String, SealedFile>,
    actual: &BTreeMap<String, SealedFile>,
    v2: bool,
) -> Result<(), AppleCodesignError> {
    for (path, file) in actual {
        let expected = reference
            .get(path)
            .ok_or_else(|| AppleCodesignError::SealFileNotPresent(path.clone()))?;

        if !file.matches(expected, v2) {
            return Err(AppleCodesignError::SealFileMismatch {
                computed: format!("{} {}", path, file),
                expected: format!("{} {}", path, expected),
            });
        }
    }

    let missing = reference
        .keys()
        .filter(|path| !actual.contains_key(*path))
        .cloned()
        .collect::<Vec<_>>();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppleCodesignError::SealFilesMissing(missing.join(",")))
    }
}

impl From<&CodeResources> for Value {
    fn from(cr: &CodeResources) -> Self {
        let files = |files: &BTreeMap<String, SealedFile>, v2| {
            Value::Dictionary(
                files
                    .iter()
                    .map(|(path, file)| (path.clone(), file.to_plist(v2)))
                    .collect::<Dictionary>(),
            )
        };
        let rules = |rules: &[CodeResourcesRule]| {
            Value::Dictionary(
                rules
                    .iter()
                    .map(|rule| (rule.pattern.clone(), rule.to_plist()))
                    .collect::<Dictionary>(),
            )
        };

        let mut dict = Dictionary::new();
        dict.insert("files".to_string(), files(&cr.files, false));
        dict.insert("files2".to_string(), files(&cr.files2, true));
        dict.insert("rules".to_string(), rules(&cr.rules));
        dict.insert("rules2".to_string(), rules(&cr.rules2));

        Value::Dictionary(dict)
    }
}

/// Interface for computing a [CodeResources] from bundle content.
///
/// Besides the serialized rules, the builder excludes the signature
/// directory, the legacy seal link and the main executable.
#[derive(Clone, Debug)]
pub struct CodeResourcesBuilder {
    bundle_dir: PathBuf,
    rules: Vec<CodeResourcesRule>,
    rules2: Vec<CodeResourcesRule>,
    exclusions: Vec<CodeResourcesRule>,
}

impl CodeResourcesBuilder {
    fn new(
        bundle_dir: &Path,
        main_executable: Option<&Path>,
        rules: Vec<CodeResourcesRule>,
        rules2: Vec<CodeResourcesRule>,
    ) -> Result<Self, AppleCodesignError> {
        let mut exclusions = vec![
            CodeResourcesRule::new(format!("^{}/", CODE_SIGNATURE_DIRECTORY))?.exclude(),
            CodeResourcesRule::new(format!("^{}$", CODE_RESOURCES_FILE))?.exclude(),
        ];

        if let Some(exe) = main_executable {
            let relative = exe.strip_prefix(bundle_dir).unwrap_or(exe);
            let relative = relative.to_string_lossy().replace('\\', "/");

            exclusions.push(
                CodeResourcesRule::new(format!("^{}$", regex::escape(&relative)))?.exclude(),
            );
        }

        Ok(Self {
            bundle_dir: bundle_dir.to_path_buf(),
            rules,
            rules2,
            exclusions,
        })
    }

    /// A builder with the default rules, for signing.
    pub fn for_signing(
        bundle_dir: &Path,
        main_executable: Option<&Path>,
    ) -> Result<Self, AppleCodesignError> {
        let template = CodeResources::template()?;

        Self::new(bundle_dir, main_executable, template.rules, template.rules2)
    }

    /// A builder with the rules of an existing seal, for verifying it.
    pub fn for_verification(
        bundle_dir: &Path,
        main_executable: Option<&Path>,
        seal: &CodeResources,
    ) -> Result<Self, AppleCodesignError> {
        Self::new(
            bundle_dir,
            main_executable,
            seal.rules.clone(),
            seal.rules2.clone(),
        )
    }

    /// Walk the bundle and digest every sealed file.
    pub fn build(&self) -> Result<CodeResources, AppleCodesignError> {
        Ok(CodeResources {
            files: self.scan(&self.rules, false)?,
            files2: self.scan(&self.rules2, true)?,
            rules: self.rules.clone(),
            rules2: self.rules2.clone(),
        })
    }

    fn scan(
        &self,
        rules: &[CodeResourcesRule],
        v2: bool,
    ) -> Result<BTreeMap<String, SealedFile>, AppleCodesignError> {
        let mut files = BTreeMap::new();

        let mut walker = walkdir::WalkDir::new(&self.bundle_dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| AppleCodesignError::Io(e.into()))?;

            let relative = entry
                .path()
                .strip_prefix(&self.bundle_dir)
                .unwrap_or_else(|_| entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            let is_dir = entry.file_type().is_dir();

            // Directories match with a trailing slash so `dir/` rules prune them.
            let rule = if is_dir {
                find_rule(
                    rules.iter().chain(self.exclusions.iter()),
                    &format!("{}/", relative),
                )
            } else {
                find_rule(rules.iter().chain(self.exclusions.iter()), &relative)
            };

            match rule {
                Some(rule) if rule.exclude => {
                    debug!("{} excluded by {}", relative, rule.pattern);
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                Some(rule) if rule.omit && v2 => {
                    debug!("{} omitted by {}", relative, rule.pattern);
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                Some(rule)
                    if rule.nested && is_dir && entry.file_name().to_string_lossy().contains('.') =>
                {
                    debug!("{} is nested code per {}", relative, rule.pattern);
                    walker.skip_current_dir();
                    continue;
                }
                _ => {}
            }

            if is_dir {
                continue;
            }

            let optional = rule.map(|r| r.optional).unwrap_or(false);

            debug!(
                "sealing {} ({})",
                relative,
                if v2 { "files2" } else { "files" }
            );
            files.insert(relative, SealedFile::from_path(entry.path(), v2, optional)?);
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    const SEAL_SNIPPET: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
        <plist version="1.0">
        <dict>
        	<key>files</key>
        	<dict>
        		<key>Resources/XUL.sig</key>
        		<data>Y0SEPxyC6hCQ+rl4LTRmXy7F9DQ=</data>
        		<key>en.lproj/InfoPlist.strings</key>
        		<dict>
        			<key>hash</key>
        			<data>U8LTYe+cVqPcBu9aLvcyyfp+dAg=</data>
        			<key>optional</key>
        			<true/>
        		</dict>
        	</dict>
        	<key>files2</key>
        	<dict>
        		<key>Resources/XUL.sig</key>
        		<dict>
        			<key>hash</key>
        			<data>Y0SEPxyC6hCQ+rl4LTRmXy7F9DQ=</data>
        			<key>hash2</key>
        			<data>iMnDHpWkKTI6xLi9Av93eNuIhxXhv3C18D4fljCfw2Y=</data>
        		</dict>
        	</dict>
        	<key>rules</key>
        	<dict>
        		<key>^</key>
        		<true/>
        		<key>^.*\.lproj/</key>
        		<dict>
        			<key>optional</key>
        			<true/>
        			<key>weight</key>
        			<real>1000</real>
        		</dict>
        		<key>^Legacy$</key>
        		<false/>
        	</dict>
        	<key>rules2</key>
        	<dict>
        		<key>^(.*/)?\.DS_Store$</key>
        		<dict>
        			<key>omit</key>
        			<true/>
        			<key>weight</key>
        			<real>2000</real>
        		</dict>
        		<key>^[^/]+$</key>
        		<dict>
        			<key>nested</key>
        			<true/>
        			<key>weight</key>
        			<real>10</real>
        		</dict>
        	</dict>
        </dict>
        </plist>
    "#};

    fn write_file(root: &Path, path: &str, content: &[u8]) {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn parse_and_serialize() {
        let resources = CodeResources::from_xml(SEAL_SNIPPET.as_bytes()).unwrap();

        assert_eq!(resources.files().len(), 2);
        assert!(resources.files()["en.lproj/InfoPlist.strings"].optional);
        assert_eq!(resources.rules().len(), 3);
        assert!(resources.rules()[2].omit);
        assert_eq!(resources.rules2()[1].weight, Some(10.0));
        assert!(resources.rules2()[1].nested);

        let xml = String::from_utf8(resources.to_xml().unwrap()).unwrap();
        assert!(xml.ends_with("</plist>\n"));
        assert!(!xml.contains("<true />"));
        assert!(!xml.contains('\r'));

        assert_eq!(CodeResources::from_xml(xml.as_bytes()).unwrap(), resources);
    }

    #[test]
    fn exclusion_short_circuits_weight() {
        let rules = vec![
            CodeResourcesRule::new("^a/").unwrap().weight(1.0),
            CodeResourcesRule::new("^a/b$").unwrap().weight(2.0).exclude(),
        ];

        assert!(find_rule(&rules, "a/b").unwrap().exclude);

        let rules = vec![
            CodeResourcesRule::new("^a/b$").unwrap().exclude(),
            CodeResourcesRule::new("^a/").unwrap().weight(100.0),
        ];
        assert!(find_rule(&rules, "a/b").unwrap().exclude);
        assert_eq!(find_rule(&rules, "a/c").unwrap().pattern, "^a/");
    }

    #[test]
    fn rule_resolution() {
        let rules = vec![
            CodeResourcesRule::new("^").unwrap(),
            CodeResourcesRule::new("\\.lproj/").unwrap().optional().weight(1000.0),
            CodeResourcesRule::new("^Resources/").unwrap().weight(20.0),
        ];

        // Weightless rules never beat no rule.
        assert!(find_rule(&rules, "file").is_none());
        assert_eq!(find_rule(&rules, "Resources/x").unwrap().pattern, "^Resources/");
        // Unanchored and case-insensitive.
        assert!(find_rule(&rules, "RESOURCES/EN.LPROJ/x").unwrap().optional);
    }

    #[test]
    fn nested_code_boundaries() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let bundle = td.path().join("App.app");

        write_file(&bundle, "Frameworks/libfoo.dylib", b"dylib");
        write_file(&bundle, "Frameworks/Foo.framework/Foo", b"framework");
        write_file(&bundle, "Frameworks/Foo.framework/Resources/Info.plist", b"<plist/>");
        write_file(&bundle, "PlugIns/Ext.appex/Ext", b"extension");
        write_file(&bundle, "PlugIns/common/shared.dat", b"shared");

        let seal = CodeResourcesBuilder::for_signing(&bundle, None)?.build()?;

        let files2 = seal.files2().keys().map(|s| s.as_str()).collect::<Vec<_>>();
        assert_eq!(
            files2,
            vec!["Frameworks/libfoo.dylib", "PlugIns/common/shared.dat"]
        );

        // v1 rules carry no nested rules.
        assert_eq!(seal.files().len(), 5);

        Ok(())
    }

    #[test]
    fn build_and_verify() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let bundle = td.path().join("App.app");

        write_file(&bundle, "a.txt", b"a");
        write_file(&bundle, "Info.plist", b"<plist/>");
        write_file(&bundle, "App", b"executable");
        write_file(&bundle, "en.lproj/Localizable.strings", b"strings");
        write_file(&bundle, ".DS_Store", b"junk");
        write_file(&bundle, "Frameworks/Foo.framework/Foo", b"nested");
        write_file(&bundle, "_CodeSignature/seal.plist", b"seal");
        write_file(&bundle, "CodeResources", b"legacy");

        let exe = bundle.join("App");
        let seal = CodeResourcesBuilder::for_signing(&bundle, Some(&exe))?.build()?;

        let files = seal.files().keys().map(|s| s.as_str()).collect::<Vec<_>>();
        assert_eq!(
            files,
            vec![
                ".DS_Store",
                "Frameworks/Foo.framework/Foo",
                "Info.plist",
                "a.txt",
                "en.lproj/Localizable.strings"
            ]
        );

        let files2 = seal.files2().keys().map(|s| s.as_str()).collect::<Vec<_>>();
        assert_eq!(files2, vec!["a.txt", "en.lproj/Localizable.strings"]);

        let a = &seal.files2()["a.txt"];
        assert_eq!(a.hash, Some(DigestType::Sha1.digest_data(b"a")?));
        assert_eq!(a.hash2, Some(DigestType::Sha256.digest_data(b"a")?));
        assert!(!a.optional);
        assert!(seal.files2()["en.lproj/Localizable.strings"].optional);

        seal.write_to(&code_resources_path(&bundle))?;
        let stored = CodeResources::from_bundle(&bundle)?;
        assert_eq!(stored, seal);

        let actual = CodeResourcesBuilder::for_verification(&bundle, Some(&exe), &stored)?.build()?;
        stored.verify(&actual)?;

        Ok(())
    }

    #[test]
    fn verify_failures() -> Result<(), AppleCodesignError> {
        let td = tempfile::tempdir()?;
        let bundle = td.path();

        write_file(bundle, "a.txt", b"a");
        write_file(bundle, "_CodeSignature/seal.plist", b"seal");

        let builder = CodeResourcesBuilder::for_signing(bundle, None)?;
        let actual = builder.build()?;
        assert_eq!(actual.files2().len(), 1);

        let mut reference = actual.clone();
        reference.files.remove("a.txt");
        assert!(matches!(
            reference.verify(&actual),
            Err(AppleCodesignError::SealFileNotPresent(path)) if path == "a.txt"
        ));

        let mut reference = actual.clone();
        let extra = reference.files["a.txt"].clone();
        reference.files.insert("b.txt".to_string(), extra.clone());
        reference.files2.insert("b.txt".to_string(), extra);
        assert!(matches!(
            reference.verify(&actual),
            Err(AppleCodesignError::SealFilesMissing(paths)) if paths == "b.txt"
        ));

        write_file(bundle, "a.txt", b"changed");
        let changed = builder.build()?;
        assert!(matches!(
            actual.verify(&changed),
            Err(AppleCodesignError::SealFileMismatch { .. })
        ));

        Ok(())
    }

    #[test]
    fn missing_seal() {
        let td = tempfile::tempdir().unwrap();

        assert!(matches!(
            CodeResources::from_bundle(td.path()),
            Err(AppleCodesignError::BundleNotSigned(_))
        ));
    }

    #[test]
    fn bad_regex() {
        assert!(matches!(
            CodeResourcesRule::new("("),
            Err(AppleCodesignError::ResourcesBadRegex(_, _))
        ));
    }
}
