// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::{anyhow, Context, Result},
    clap::{Arg, ArgMatches, Command},
    log::{info, warn, LevelFilter},
    macho_codesign::{
        describe_macho_file, sign_macho_file, verify_macho_file, AppleCodesignError,
        BundleSigner, CodesignAllocate, DigestType, SigningIdentity, SigningSettings,
        SpecialFiles, StrictVerification, VerificationProblems, VerificationSink,
    },
    std::path::Path,
};

const SUPPORTED_HASHES: &[&str; 5] = &["sha1", "sha256", "sha256-truncated", "sha384", "sha512"];

const SIGN_ABOUT: &str = "\
Sign a Mach-O binary or a bundle in place.

If PATH is a directory, it is treated as a bundle: its resources are sealed
into _CodeSignature/CodeResources and its main executable is signed with the
seal and Info.plist bound to the signature. Otherwise PATH is signed as a
standalone Mach-O file.

The signing identity comes from either a PKCS#12 file (--p12-file) or a pair
of PEM files (--pem-certificate and --pem-key). Intermediate certificates can
be appended with --chain-pem.

Signature space is reserved by codesign_allocate. Its location is taken from
--codesign-allocate, then the CODESIGN_ALLOCATE environment variable, then
PATH.
";

fn load_identity(args: &ArgMatches) -> Result<SigningIdentity> {
    let mut identity = if let Some(p12_path) = args.value_of("p12_path") {
        let password = if let Some(path) = args.value_of("p12_password_file") {
            std::fs::read_to_string(path)
                .with_context(|| format!("reading password from {}", path))?
                .trim_end_matches(&['\r', '\n'][..])
                .to_string()
        } else {
            args.value_of("p12_password").unwrap_or_default().to_string()
        };

        SigningIdentity::from_pfx_file(p12_path, &password)
            .with_context(|| format!("loading identity from {}", p12_path))?
    } else {
        let cert_path = args
            .value_of("pem_certificate")
            .ok_or_else(|| anyhow!("a signing identity is required: use --p12-file or --pem-certificate/--pem-key"))?;
        let key_path = args
            .value_of("pem_key")
            .ok_or_else(|| anyhow!("--pem-certificate requires --pem-key"))?;

        SigningIdentity::from_pem_data(&std::fs::read(cert_path)?, &std::fs::read(key_path)?)?
    };

    if let Some(paths) = args.values_of("chain_pem") {
        for path in paths {
            identity.add_chain_pem(&std::fs::read(path)?)?;
        }
    }

    Ok(identity)
}

fn command_sign(args: &ArgMatches) -> Result<()> {
    let path = Path::new(args.value_of("path").ok_or(AppleCodesignError::CliGeneralError(
        "path is required".to_string(),
    ))?);

    let identity = load_identity(args)?;
    info!(
        "signing with certificate {} (SHA-1 {})",
        identity.common_name()?.unwrap_or_default(),
        identity.fingerprint()?
    );

    let mut settings = SigningSettings::default();
    settings.set_signing_identity(&identity);

    if let Some(identifier) = args.value_of("identifier") {
        settings.set_identifier(identifier);
    }
    if let Some(team_id) = args.value_of("team_id") {
        settings.set_team_id(team_id);
    }
    if let Some(entitlements) = args.value_of("entitlements_xml_path") {
        let xml = std::fs::read_to_string(entitlements)
            .with_context(|| format!("reading entitlements from {}", entitlements))?;
        settings.set_entitlements_xml(xml)?;
    }
    if let Some(digests) = args.values_of("digest") {
        settings.set_digests(
            digests
                .map(DigestType::try_from)
                .collect::<Result<Vec<_>, _>>()?,
        )?;
    }
    if let Some(page_size) = args.value_of("page_size") {
        settings.set_page_size(page_size.parse()?)?;
    }
    if let Some(tool) = args.value_of("codesign_allocate") {
        settings.set_codesign_allocate(tool);
    }

    let allocator = CodesignAllocate::from_settings(&settings)?;

    if path.is_dir() {
        BundleSigner::new_from_path(path)?.sign(&settings, &allocator)?;
    } else {
        let identifier = settings
            .identifier()
            .map(|s| s.to_string())
            .or_else(|| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
            .ok_or(AppleCodesignError::NoIdentifier)?;

        sign_macho_file(
            path,
            &identifier,
            &settings,
            &SpecialFiles::default(),
            &allocator,
        )?;
    }

    info!("signed {}", path.display());

    Ok(())
}

fn command_verify(args: &ArgMatches) -> Result<()> {
    let path = Path::new(args.value_of("path").ok_or(AppleCodesignError::CliGeneralError(
        "path is required".to_string(),
    ))?);

    let mut problems = VerificationProblems::default();
    let mut strict = StrictVerification;

    let sink: &mut dyn VerificationSink = if args.is_present("strict") {
        &mut strict
    } else {
        &mut problems
    };

    if path.is_dir() {
        BundleSigner::new_from_path(path)?.verify(sink)?;
    } else {
        verify_macho_file(path, &SpecialFiles::default(), sink)?;
    }

    for problem in problems.problems() {
        println!("{}", problem);
    }

    if problems.is_empty() {
        eprintln!("no problems detected!");
        Ok(())
    } else {
        Err(AppleCodesignError::VerificationProblems.into())
    }
}

fn command_print_signature(args: &ArgMatches) -> Result<()> {
    let path = args.value_of("path").ok_or(AppleCodesignError::CliGeneralError(
        "path is required".to_string(),
    ))?;

    print!("{}", describe_macho_file(Path::new(path))?);

    Ok(())
}

fn main_impl() -> Result<()> {
    let app = Command::new("Mach-O code signing in pure Rust")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Sign and verify Mach-O binaries and bundles")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("print-signature")
            .about("Print the embedded signature of every slice of a Mach-O binary")
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path of Mach-O binary to examine"),
            ),
    );

    let app = app.subcommand(
        Command::new("sign")
            .about("Sign a Mach-O binary or bundle")
            .long_about(SIGN_ABOUT)
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to Mach-O binary or bundle directory to sign"),
            )
            .arg(
                Arg::new("p12_path")
                    .long("p12-file")
                    .takes_value(true)
                    .conflicts_with_all(&["pem_certificate", "pem_key"])
                    .help("Path to a PKCS#12 file holding the signing certificate and key"),
            )
            .arg(
                Arg::new("p12_password")
                    .long("p12-password")
                    .takes_value(true)
                    .requires("p12_path")
                    .help("Password of the PKCS#12 file"),
            )
            .arg(
                Arg::new("p12_password_file")
                    .long("p12-password-file")
                    .takes_value(true)
                    .requires("p12_path")
                    .conflicts_with("p12_password")
                    .help("Path to a file holding the password of the PKCS#12 file"),
            )
            .arg(
                Arg::new("pem_certificate")
                    .long("pem-certificate")
                    .takes_value(true)
                    .requires("pem_key")
                    .help("Path to the PEM encoded signing certificate"),
            )
            .arg(
                Arg::new("pem_key")
                    .long("pem-key")
                    .takes_value(true)
                    .requires("pem_certificate")
                    .help("Path to the PEM encoded PKCS#8 private key"),
            )
            .arg(
                Arg::new("chain_pem")
                    .long("chain-pem")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("Path to PEM certificates to append to the chain, leaf first"),
            )
            .arg(
                Arg::new("identifier")
                    .long("identifier")
                    .takes_value(true)
                    .help("Identifier to embed in code directories"),
            )
            .arg(
                Arg::new("team_id")
                    .long("team-id")
                    .takes_value(true)
                    .help("Team identifier to embed in code directories"),
            )
            .arg(
                Arg::new("entitlements_xml_path")
                    .long("entitlements-xml-path")
                    .takes_value(true)
                    .help("Path to a plist file containing entitlements"),
            )
            .arg(
                Arg::new("digest")
                    .long("digest")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .possible_values(SUPPORTED_HASHES)
                    .help("Digest algorithm to produce a code directory for; the first is primary"),
            )
            .arg(
                Arg::new("page_size")
                    .long("page-size")
                    .takes_value(true)
                    .help("Chunk size to digest code over"),
            )
            .arg(
                Arg::new("codesign_allocate")
                    .long("codesign-allocate")
                    .takes_value(true)
                    .help("Path to the codesign_allocate executable"),
            ),
    );

    let app = app.subcommand(
        Command::new("verify")
            .about("Verifies a signed Mach-O binary or bundle")
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path of Mach-O binary or bundle to examine"),
            )
            .arg(
                Arg::new("strict")
                    .long("strict")
                    .help("Fail on the first problem instead of reporting all of them"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(format!(
            "warn,macho_codesign={},rcodesign_lite={}",
            log_level, log_level
        )),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("print-signature", args)) => command_print_signature(args),
        Some(("sign", args)) => command_sign(args),
        Some(("verify", args)) => command_verify(args),
        _ => {
            warn!("unknown command");
            Err(AppleCodesignError::CliGeneralError("unknown command".to_string()).into())
        }
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
