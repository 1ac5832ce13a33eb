// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::{info, warn, LevelFilter},
    simple_deb::{
        deb::builder::DebBuilder,
        descriptor::PackageDescriptor,
        error::SimpleDebError,
        fetch::HttpFetcher,
        index::PackageIndexEntry,
        repository::{
            builder::RepositoryConfig,
            filesystem::{FilesystemIndexReader, FilesystemRepositoryWriter},
            publish_repository, PublishEvent, PublishOptions, ReleaseSigner, RepositoryReader,
            RepositoryWriter,
        },
    },
    std::path::{Path, PathBuf},
    thiserror::Error,
};

const BUILD_ABOUT: &str = "\
Build a .deb package from a descriptor.

The descriptor is a JSON document (YAML is accepted as well) with `meta`,
`control` and `files` sections. The package is written to
`<output>/<name>_<version>_<arch>.deb`.

Relative `file` sources are resolved against the working directory.
`url` sources are fetched over HTTP.

With --index, the package index document consumed by `repo` is written next
to the package.

--index-only builds a package without data files to
`<name>_<version>_<arch>.index-only.deb` and writes its index document. It is
meant for inspecting package metadata. The stub is not installable, and the
size and digests in its index document describe the stub rather than the real
package, so that document must not be published.
";

const INDEX_ABOUT: &str = "\
Write package index documents for existing .deb files.

The control file of each package is read back to recover its descriptor.
";

const REPO_ABOUT: &str = "\
Publish APT repository metadata.

Package index documents are read from `<input>/<codename>/**`. For every
codename, `Packages`, `Packages.gz` and `Release` files are written below
`<output>/<codename>/`.

Input and output are local paths or `s3://bucket/prefix` URLs. The AWS client
is configured from `AWS_*` environment variables.

With --signing-key, every `Release` file is signed with the ASCII armored PGP
private key at that path. `Release.gpg`, `InRelease` and `repository.gpg` are
written next to it.
";

const GENERATE_SIGNING_KEY_ABOUT: &str = "\
Generate a PGP key pair for signing repository metadata.

The ASCII armored private key is written to `<output-dir>/private.asc` and the
public key to `<output-dir>/public.asc`. The private key is not passphrase
protected.
";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    SimpleDeb(#[from] SimpleDebError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid date {0}: {1}")]
    Date(String, chrono::ParseError),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unsupported repository location: {0}")]
    UnsupportedLocation(String),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("{0} support is not enabled in this build")]
    FeatureDisabled(&'static str),
}

pub type Result<T> = std::result::Result<T, CliError>;

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", num_cpus::get());

    let app = Command::new("simple-deb")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Build .deb packages and APT repositories")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("max-parallel-io")
                .long("max-parallel-io")
                .takes_value(true)
                .default_value(&default_threads)
                .global(true)
                .help("Maximum number of parallel I/O operations to perform"),
        );

    let app = app.subcommand(
        Command::new("build")
            .about("Build a .deb package")
            .long_about(BUILD_ABOUT)
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to the package descriptor"),
            )
            .arg(
                Arg::new("output")
                    .short('o')
                    .long("output")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to write the package to"),
            )
            .arg(
                Arg::new("working-dir")
                    .short('C')
                    .long("working-dir")
                    .takes_value(true)
                    .default_value(".")
                    .allow_invalid_utf8(true)
                    .help("Directory relative file sources are resolved against"),
            )
            .arg(
                Arg::new("index")
                    .long("index")
                    .help("Also write the package index document"),
            )
            .arg(
                Arg::new("index-only")
                    .long("index-only")
                    .help("Build without data files and write the package index document"),
            ),
    );

    let app = app.subcommand(
        Command::new("index")
            .about("Write index documents for existing .deb files")
            .long_about(INDEX_ABOUT)
            .arg(
                Arg::new("output")
                    .short('o')
                    .long("output")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to write index documents to"),
            )
            .arg(
                Arg::new("deb")
                    .takes_value(true)
                    .multiple_values(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help(".deb files to index"),
            ),
    );

    let app = app.subcommand(
        Command::new("repo")
            .about("Publish APT repository metadata from package index documents")
            .long_about(REPO_ABOUT)
            .arg(
                Arg::new("input")
                    .short('i')
                    .long("input")
                    .takes_value(true)
                    .required(true)
                    .help("Location of package index documents"),
            )
            .arg(
                Arg::new("output")
                    .short('o')
                    .long("output")
                    .takes_value(true)
                    .required(true)
                    .help("Location to write repository files to"),
            )
            .arg(
                Arg::new("codename")
                    .short('c')
                    .long("codename")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("Codename to publish. All codenames are published by default"),
            )
            .arg(
                Arg::new("origin")
                    .long("origin")
                    .takes_value(true)
                    .help("Value of the Origin field. Defaults to the codename"),
            )
            .arg(
                Arg::new("label")
                    .long("label")
                    .takes_value(true)
                    .help("Value of the Label field. Defaults to the codename"),
            )
            .arg(
                Arg::new("date")
                    .long("date")
                    .takes_value(true)
                    .help("RFC 3339 timestamp for the Date field. Defaults to now"),
            )
            .arg(
                Arg::new("signing-key")
                    .long("signing-key")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path to an ASCII armored PGP private key to sign Release files with"),
            )
            .arg(
                Arg::new("signing-key-passphrase")
                    .long("signing-key-passphrase")
                    .takes_value(true)
                    .requires("signing-key")
                    .help("Passphrase unlocking the signing key"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("generate-signing-key")
            .about("Generate a PGP key pair for signing repository metadata")
            .long_about(GENERATE_SIGNING_KEY_ABOUT)
            .arg(
                Arg::new("user-id")
                    .long("user-id")
                    .takes_value(true)
                    .required(true)
                    .help("Primary user id of the key, e.g. `Name <email>`"),
            )
            .arg(
                Arg::new("output-dir")
                    .short('o')
                    .long("output-dir")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to write the key pair to"),
            ),
    );

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
    }

    builder.init();

    match matches.subcommand() {
        Some(("build", args)) => command_build(args).await,
        Some(("index", args)) => command_index(args),
        Some(("repo", args)) => command_repo(args).await,
        Some(("generate-signing-key", args)) => command_generate_signing_key(args),
        Some((command, _)) => Err(CliError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

/// Load a descriptor, trying JSON before YAML.
///
/// A document starting with `{` is JSON and reports JSON errors as such.
fn load_descriptor(path: &Path) -> Result<PackageDescriptor> {
    let data = std::fs::read(path)?;

    let is_json = data.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');

    match PackageDescriptor::from_json(&data) {
        Ok(descriptor) => Ok(descriptor),
        Err(e) if is_json => Err(e.into()),
        Err(_) => Ok(serde_yaml::from_slice(&data)?),
    }
}

fn path_arg(args: &ArgMatches, name: &str) -> Option<PathBuf> {
    args.value_of_os(name).map(PathBuf::from)
}

async fn command_build(args: &ArgMatches) -> Result<()> {
    let config = path_arg(args, "config")
        .ok_or_else(|| CliError::InvalidSubCommand("--config is required".into()))?;
    let output = path_arg(args, "output")
        .ok_or_else(|| CliError::InvalidSubCommand("--output is required".into()))?;
    let working_dir = path_arg(args, "working-dir").unwrap_or_else(|| PathBuf::from("."));
    let index_only = args.is_present("index-only");
    let write_index = index_only || args.is_present("index");

    let descriptor = load_descriptor(&config)?;

    // The HTTP client blocks, so it must live outside the async runtime.
    tokio::task::spawn_blocking(move || -> Result<()> {
        let builder = DebBuilder::new(&working_dir).set_fetcher(HttpFetcher::new()?);

        let (_, deb) = builder.build_to_directory(&descriptor, &output, index_only)?;

        if write_index {
            let path = PackageIndexEntry::new(descriptor, &deb).write_to_directory(&output)?;

            if index_only {
                warn!(
                    "index document {} describes the index-only stub; do not publish it",
                    path.display()
                );
            } else {
                info!("wrote index document {}", path.display());
            }
        }

        Ok(())
    })
    .await?
}

fn command_index(args: &ArgMatches) -> Result<()> {
    let output = path_arg(args, "output")
        .ok_or_else(|| CliError::InvalidSubCommand("--output is required".into()))?;

    for deb_path in args.values_of_os("deb").into_iter().flatten() {
        let deb = std::fs::read(deb_path)?;
        let path = PackageIndexEntry::from_deb(&deb)?.write_to_directory(&output)?;

        info!("indexed {} to {}", Path::new(deb_path).display(), path.display());
    }

    Ok(())
}

fn repository_reader(location: &str, threads: usize) -> Result<Box<dyn RepositoryReader>> {
    if location.starts_with("s3://") {
        #[cfg(feature = "s3")]
        {
            return simple_deb::repository::s3::S3IndexReader::from_url(location)
                .map(|reader| Box::new(reader.set_threads(threads)) as Box<dyn RepositoryReader>)
                .ok_or_else(|| CliError::UnsupportedLocation(location.to_string()));
        }

        #[cfg(not(feature = "s3"))]
        {
            let _ = threads;
            return Err(CliError::UnsupportedLocation(location.to_string()));
        }
    }

    Ok(Box::new(FilesystemIndexReader::new(location)))
}

fn repository_writer(location: &str) -> Result<Box<dyn RepositoryWriter>> {
    if location.starts_with("s3://") {
        #[cfg(feature = "s3")]
        {
            return simple_deb::repository::s3::S3RepositoryWriter::from_url(location)
                .map(|writer| Box::new(writer) as Box<dyn RepositoryWriter>)
                .ok_or_else(|| CliError::UnsupportedLocation(location.to_string()));
        }

        #[cfg(not(feature = "s3"))]
        {
            return Err(CliError::UnsupportedLocation(location.to_string()));
        }
    }

    Ok(Box::new(FilesystemRepositoryWriter::new(location)))
}

#[cfg(feature = "signing")]
fn load_release_signer(path: &Path, passphrase: &str) -> Result<Box<dyn ReleaseSigner>> {
    let armored = std::fs::read_to_string(path)?;

    Ok(Box::new(
        simple_deb::signing::PgpReleaseSigner::from_armored(&armored, passphrase)?,
    ))
}

#[cfg(not(feature = "signing"))]
fn load_release_signer(_path: &Path, _passphrase: &str) -> Result<Box<dyn ReleaseSigner>> {
    Err(CliError::FeatureDisabled("signing"))
}

/// Write a new key pair as `private.asc` and `public.asc` below `dir`.
#[cfg(feature = "signing")]
fn write_signing_key(user_id: &str, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let (private, public) = simple_deb::signing::generate_armored_signing_key(user_id)?;

    std::fs::create_dir_all(dir)?;
    let private_path = dir.join("private.asc");
    let public_path = dir.join("public.asc");
    std::fs::write(&private_path, private)?;
    std::fs::write(&public_path, public)?;

    Ok((private_path, public_path))
}

#[cfg(not(feature = "signing"))]
fn write_signing_key(_user_id: &str, _dir: &Path) -> Result<(PathBuf, PathBuf)> {
    Err(CliError::FeatureDisabled("signing"))
}

fn command_generate_signing_key(args: &ArgMatches) -> Result<()> {
    let user_id = args
        .value_of("user-id")
        .ok_or_else(|| CliError::InvalidSubCommand("--user-id is required".into()))?;
    let output = path_arg(args, "output-dir")
        .ok_or_else(|| CliError::InvalidSubCommand("--output-dir is required".into()))?;

    let (private_path, public_path) = write_signing_key(user_id, &output)?;

    info!("wrote private key to {}", private_path.display());
    info!("wrote public key to {}", public_path.display());

    Ok(())
}

async fn command_repo(args: &ArgMatches) -> Result<()> {
    let threads = args.value_of_t::<usize>("max-parallel-io")?;

    let input = args.value_of("input").unwrap_or(".");
    let output = args.value_of("output").unwrap_or(".");

    let date = match args.value_of("date") {
        Some(value) => chrono::DateTime::parse_from_rfc3339(value)
            .map_err(|e| CliError::Date(value.to_string(), e))?
            .with_timezone(&chrono::Utc),
        None => chrono::Utc::now(),
    };

    let options = PublishOptions {
        config: RepositoryConfig {
            origin: args.value_of("origin").map(|s| s.to_string()),
            label: args.value_of("label").map(|s| s.to_string()),
        },
        date,
        codenames: args
            .values_of("codename")
            .into_iter()
            .flatten()
            .map(|s| s.to_string())
            .collect(),
        threads,
    };

    let reader = repository_reader(input, threads)?;
    let writer = repository_writer(output)?;

    let signer = match path_arg(args, "signing-key") {
        Some(path) => Some(load_release_signer(
            &path,
            args.value_of("signing-key-passphrase").unwrap_or_default(),
        )?),
        None => None,
    };

    let cb = |event: PublishEvent| match event {
        // The library already warns about missing codenames.
        PublishEvent::FileWritten(_, _) | PublishEvent::CodenameMissing(_) => {
            log::debug!("{}", event)
        }
        _ => info!("{}", event),
    };

    publish_repository(
        reader.as_ref(),
        writer.as_ref(),
        &options,
        signer.as_deref(),
        &Some(cb),
    )
    .await?
    .into_result()?;

    Ok(())
}
