// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository primitives.

A Debian repository is a collection of files holding packages and other
support primitives. See <https://wiki.debian.org/DebianRepository/Format>
for the canonical definition of a Debian repository.

Repository metadata is produced from persisted [PackageIndexEntry] documents.
[RepositoryReader] obtains those documents grouped by codename and
[RepositoryWriter] persists the rendered files. [publish_repository()] drives
both, optionally signing `Release` files through a [ReleaseSigner].
*/

use {
    crate::{
        error::{Result, SimpleDebError},
        index::PackageIndexEntry,
        io::ContentIntegrity,
        repository::{
            builder::{aggregate_repository, Repository, RepositoryConfig},
            release::RELEASE_PATH,
        },
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    futures::{AsyncRead, Future, StreamExt},
    log::{info, warn},
    std::{
        borrow::Cow,
        collections::{BTreeMap, BTreeSet},
        pin::Pin,
    },
};

pub mod builder;
pub mod filesystem;
pub mod release;
#[cfg(feature = "s3")]
pub mod s3;

/// Provides previously built package index entries.
#[async_trait]
pub trait RepositoryReader: Sync {
    /// Read every package index entry, grouped by codename.
    ///
    /// The result must be a complete snapshot: aggregation starts once this returns.
    async fn read_index_metadata(&self) -> Result<BTreeMap<String, Vec<PackageIndexEntry>>>;
}

#[derive(Clone, Debug)]
pub struct RepositoryWrite<'a> {
    /// The path that was written.
    pub path: Cow<'a, str>,
    /// The number of bytes written.
    pub bytes_written: u64,
}

/// Outcome of writing a batch of files.
///
/// Every file is attempted. Failures are collected rather than aborting the batch.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Paths written with the number of bytes written, in path order.
    pub written: Vec<(String, u64)>,
    /// Paths that could not be written with the error encountered, in path order.
    pub failed: Vec<(String, SimpleDebError)>,
}

impl WriteReport {
    /// Whether every file was written.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Convert into an error naming every failed path if any write failed.
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(SimpleDebError::RepositoryWriteFailures(
                self.failed.into_iter().map(|(path, _)| path).collect(),
            ))
        }
    }
}

#[async_trait]
pub trait RepositoryWriter: Sync {
    /// Write data to a given path.
    ///
    /// The data to write is provided by an [AsyncRead] reader. Parent
    /// directories (or their equivalent) are created as needed.
    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<RepositoryWrite<'path>>;

    /// Write the content of every file, with up to `threads` writes in flight.
    async fn write_files(
        &self,
        files: &BTreeMap<String, ContentIntegrity>,
        threads: usize,
    ) -> WriteReport {
        let mut writes: Vec<Pin<Box<dyn Future<Output = (String, Result<u64>)> + Send + '_>>> =
            vec![];

        for (path, integrity) in files {
            let data = integrity.content().to_vec();

            writes.push(Box::pin(async move {
                let res = self
                    .write_path(
                        Cow::Owned(path.clone()),
                        Box::pin(futures::io::Cursor::new(data)),
                    )
                    .await
                    .map(|write| write.bytes_written);

                (path.clone(), res)
            }));
        }

        let mut fs = futures::stream::iter(writes).buffer_unordered(threads.max(1));

        let mut report = WriteReport::default();

        while let Some((path, res)) = fs.next().await {
            match res {
                Ok(size) => report.written.push((path, size)),
                Err(e) => {
                    warn!("failed to write {}: {}", path, e);
                    report.failed.push((path, e));
                }
            }
        }

        report.written.sort_by(|a, b| a.0.cmp(&b.0));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));

        report
    }
}

/// Signatures of a `Release` file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReleaseSignatures {
    /// ASCII armored detached signature, published as `Release.gpg`.
    pub detached_signature: Vec<u8>,
    /// Cleartext signed `Release` content, published as `InRelease`.
    pub cleartext_signed: Vec<u8>,
    /// ASCII armored public key, published as `repository.gpg`.
    pub public_key_armored: Vec<u8>,
}

/// Produces PGP signatures of `Release` files.
pub trait ReleaseSigner: Sync {
    fn sign(&self, release: &[u8]) -> Result<ReleaseSignatures>;
}

/// Sign every `Release` file in a flattened repository file map.
///
/// Each `<dir>/Release` gains `<dir>/Release.gpg`, `<dir>/InRelease` and
/// `<dir>/repository.gpg`. Returns the signed `Release` paths.
pub fn sign_release_files(
    files: &mut BTreeMap<String, ContentIntegrity>,
    signer: &dyn ReleaseSigner,
) -> Result<Vec<String>> {
    let releases = files
        .iter()
        .filter(|(path, _)| *path == RELEASE_PATH || path.ends_with("/Release"))
        .map(|(path, integrity)| (path.clone(), integrity.content().to_vec()))
        .collect::<Vec<_>>();

    let mut signed = vec![];

    for (path, content) in releases {
        let signatures = signer.sign(&content)?;
        let prefix = &path[..path.len() - RELEASE_PATH.len()];

        for (name, data) in [
            (format!("{}.gpg", path), signatures.detached_signature),
            (format!("{}InRelease", prefix), signatures.cleartext_signed),
            (format!("{}repository.gpg", prefix), signatures.public_key_armored),
        ] {
            files.insert(name.clone(), ContentIntegrity::of(data, name));
        }

        signed.push(path);
    }

    Ok(signed)
}

/// Describes an event during repository publishing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublishEvent {
    /// Index entries read for a codename.
    IndexEntriesRead(String, usize),

    /// A codename that was excluded from publishing.
    CodenameSkipped(String),

    /// A requested codename without any package index entries.
    CodenameMissing(String),

    /// A codename was finalized into the given number of files.
    CodenameFinalized(String, usize),

    /// A `Release` file at the given path was signed.
    ReleaseSigned(String),

    /// A file with the given path and size was written.
    FileWritten(String, u64),

    /// Writing the file at the given path failed.
    FileWriteFailed(String),
}

impl std::fmt::Display for PublishEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexEntriesRead(codename, count) => {
                write!(f, "read {} package index entries for {}", count, codename)
            }
            Self::CodenameSkipped(codename) => {
                write!(f, "skipping codename {}", codename)
            }
            Self::CodenameMissing(codename) => {
                write!(f, "no package index entries for requested codename {}", codename)
            }
            Self::CodenameFinalized(codename, count) => {
                write!(f, "rendered {} files for {}", count, codename)
            }
            Self::ReleaseSigned(path) => {
                write!(f, "signed {}", path)
            }
            Self::FileWritten(path, size) => {
                write!(f, "wrote {} bytes to {}", size, path)
            }
            Self::FileWriteFailed(path) => {
                write!(f, "failed to write {}", path)
            }
        }
    }
}

/// Settings for [publish_repository()].
#[derive(Clone, Debug)]
pub struct PublishOptions {
    pub config: RepositoryConfig,
    /// Value of the `Date` field of every `Release` file.
    pub date: DateTime<Utc>,
    /// Codenames to publish. All codenames are published when empty.
    pub codenames: BTreeSet<String>,
    /// Maximum number of concurrent write operations.
    pub threads: usize,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            config: RepositoryConfig::default(),
            date: Utc::now(),
            codenames: BTreeSet::new(),
            threads: 1,
        }
    }
}

/// Aggregate index entries from a reader into repository files and write them.
///
/// The returned [WriteReport] lists every written and failed path. Write
/// failures don't abort the publication; use [WriteReport::into_result()] to
/// treat them as an error.
pub async fn publish_repository<F>(
    reader: &dyn RepositoryReader,
    writer: &dyn RepositoryWriter,
    options: &PublishOptions,
    signer: Option<&dyn ReleaseSigner>,
    progress_cb: &Option<F>,
) -> Result<WriteReport>
where
    F: Fn(PublishEvent),
{
    let metadata = reader.read_index_metadata().await?;

    for codename in &options.codenames {
        if !metadata.contains_key(codename) {
            warn!("requested codename {} has no package index entries", codename);
            if let Some(cb) = progress_cb {
                cb(PublishEvent::CodenameMissing(codename.clone()));
            }
        }
    }

    let mut repository = Repository::new(options.config.clone(), options.date);

    for (codename, entries) in metadata {
        if !options.codenames.is_empty() && !options.codenames.contains(&codename) {
            if let Some(cb) = progress_cb {
                cb(PublishEvent::CodenameSkipped(codename));
            }
            continue;
        }

        if let Some(cb) = progress_cb {
            cb(PublishEvent::IndexEntriesRead(codename.clone(), entries.len()));
        }

        let section = repository.codename_section_mut(&codename);
        for entry in entries {
            section.add_entry(entry);
        }
    }

    repository.finalize()?;

    if let Some(cb) = progress_cb {
        for section in repository.sections() {
            cb(PublishEvent::CodenameFinalized(
                section.codename().to_string(),
                section.rendered_files().len(),
            ));
        }
    }

    let mut files = aggregate_repository(&repository);

    if let Some(signer) = signer {
        for path in sign_release_files(&mut files, signer)? {
            if let Some(cb) = progress_cb {
                cb(PublishEvent::ReleaseSigned(path));
            }
        }
    }

    let report = writer.write_files(&files, options.threads).await;

    if let Some(cb) = progress_cb {
        for (path, size) in &report.written {
            cb(PublishEvent::FileWritten(path.clone(), *size));
        }
        for (path, _) in &report.failed {
            cb(PublishEvent::FileWriteFailed(path.clone()));
        }
    }

    info!(
        "published {} files ({} failed)",
        report.written.len(),
        report.failed.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::descriptor::{Architecture, ControlFields, PackageDescriptor, PackageMeta},
        chrono::TimeZone,
        futures::AsyncReadExt,
        std::sync::Mutex,
    };

    struct StaticReader(BTreeMap<String, Vec<PackageIndexEntry>>);

    #[async_trait]
    impl RepositoryReader for StaticReader {
        async fn read_index_metadata(&self) -> Result<BTreeMap<String, Vec<PackageIndexEntry>>> {
            Ok(self.0.clone())
        }
    }

    /// Keeps written files in memory, refusing paths containing `fail`.
    #[derive(Default)]
    struct MemoryWriter {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl RepositoryWriter for MemoryWriter {
        async fn write_path<'path, 'reader>(
            &self,
            path: Cow<'path, str>,
            mut reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
        ) -> Result<RepositoryWrite<'path>> {
            if path.contains("fail") {
                return Err(SimpleDebError::RepositoryIoPath(
                    path.to_string(),
                    std::io::Error::new(std::io::ErrorKind::Other, "refused"),
                ));
            }

            let mut data = vec![];
            reader.read_to_end(&mut data).await?;
            let bytes_written = data.len() as u64;
            self.files.lock().unwrap().insert(path.to_string(), data);

            Ok(RepositoryWrite {
                path,
                bytes_written,
            })
        }
    }

    struct FakeSigner;

    impl ReleaseSigner for FakeSigner {
        fn sign(&self, release: &[u8]) -> Result<ReleaseSignatures> {
            Ok(ReleaseSignatures {
                detached_signature: b"sig".to_vec(),
                cleartext_signed: [b"signed:".as_slice(), release].concat(),
                public_key_armored: b"key".to_vec(),
            })
        }
    }

    fn entry(name: &str, arch: Architecture) -> PackageIndexEntry {
        PackageIndexEntry::new(
            PackageDescriptor::new(
                PackageMeta::new(name, "1.0", arch),
                ControlFields::new("maintainer", "description"),
            ),
            name.as_bytes(),
        )
    }

    fn options() -> PublishOptions {
        PublishOptions {
            date: Utc.with_ymd_and_hms(2025, 7, 2, 6, 24, 42).unwrap(),
            threads: 4,
            ..Default::default()
        }
    }

    fn reader() -> StaticReader {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "jammy".to_string(),
            vec![entry("a", Architecture::Amd64), entry("b", Architecture::Arm64)],
        );
        metadata.insert("focal".to_string(), vec![entry("c", Architecture::Amd64)]);

        StaticReader(metadata)
    }

    #[tokio::test]
    async fn publish_all_codenames() -> Result<()> {
        let writer = MemoryWriter::default();
        let events = Mutex::new(vec![]);
        let cb = Some(|e: PublishEvent| events.lock().unwrap().push(e));

        let report = publish_repository(&reader(), &writer, &options(), None, &cb)
            .await?
            .into_result()?;

        let files = writer.files.lock().unwrap();
        assert_eq!(report.written.len(), files.len());
        assert_eq!(files.len(), 3 + 5);
        assert!(files.contains_key("jammy/main/binary-arm64/Packages.gz"));
        assert!(files.contains_key("focal/Release"));
        assert!(!files.contains_key("jammy/InRelease"));

        let events = events.lock().unwrap();
        assert!(events.contains(&PublishEvent::IndexEntriesRead("jammy".into(), 2)));
        assert!(events.contains(&PublishEvent::CodenameFinalized("jammy".into(), 5)));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, PublishEvent::FileWritten(_, _)))
                .count(),
            8
        );

        Ok(())
    }

    #[tokio::test]
    async fn publish_selected_codenames_signed() -> Result<()> {
        let writer = MemoryWriter::default();
        let mut options = options();
        options.codenames.insert("focal".to_string());

        publish_repository(
            &reader(),
            &writer,
            &options,
            Some(&FakeSigner),
            &None::<fn(PublishEvent)>,
        )
        .await?
        .into_result()?;

        let files = writer.files.lock().unwrap();
        assert_eq!(
            files.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            vec![
                "focal/InRelease",
                "focal/Release",
                "focal/Release.gpg",
                "focal/main/binary-amd64/Packages",
                "focal/main/binary-amd64/Packages.gz",
                "focal/repository.gpg",
            ]
        );
        assert_eq!(
            files["focal/InRelease"],
            [b"signed:".as_slice(), files["focal/Release"].as_slice()].concat()
        );
        assert_eq!(files["focal/Release.gpg"], b"sig");

        Ok(())
    }

    #[tokio::test]
    async fn unknown_codename_is_reported() -> Result<()> {
        let writer = MemoryWriter::default();
        let events = Mutex::new(vec![]);
        let cb = Some(|e: PublishEvent| events.lock().unwrap().push(e));
        let mut options = options();
        options.codenames.insert("jammy".to_string());
        options.codenames.insert("noble".to_string());

        publish_repository(&reader(), &writer, &options, None, &cb)
            .await?
            .into_result()?;

        let events = events.lock().unwrap();
        assert!(events.contains(&PublishEvent::CodenameMissing("noble".into())));
        assert!(!events.contains(&PublishEvent::CodenameMissing("jammy".into())));
        assert!(events.contains(&PublishEvent::CodenameSkipped("focal".into())));

        let files = writer.files.lock().unwrap();
        assert!(files.contains_key("jammy/Release"));
        assert!(!files.keys().any(|k| k.starts_with("noble/")));

        Ok(())
    }

    #[tokio::test]
    async fn write_failures_are_reported() -> Result<()> {
        let writer = MemoryWriter::default();
        let mut files = BTreeMap::new();
        for path in ["a/ok", "b/fail", "c/ok", "d/fail"] {
            files.insert(path.to_string(), ContentIntegrity::of(path, path));
        }

        let report = writer.write_files(&files, 2).await;

        assert!(!report.is_success());
        assert_eq!(
            report.written,
            vec![("a/ok".to_string(), 4), ("c/ok".to_string(), 4)]
        );

        match report.into_result() {
            Err(SimpleDebError::RepositoryWriteFailures(paths)) => {
                assert_eq!(paths, vec!["b/fail".to_string(), "d/fail".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn sign_root_release() -> Result<()> {
        let mut files = BTreeMap::new();
        files.insert("Release".to_string(), ContentIntegrity::of("r", "Release"));

        let signed = sign_release_files(&mut files, &FakeSigner)?;

        assert_eq!(signed, vec!["Release".to_string()]);
        assert!(files.contains_key("Release.gpg"));
        assert!(files.contains_key("InRelease"));
        assert!(files.contains_key("repository.gpg"));

        Ok(())
    }
}
