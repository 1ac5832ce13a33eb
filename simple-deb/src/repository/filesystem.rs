// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem based Debian repositories. */

use {
    crate::{
        descriptor::INDEX_FILENAME_SUFFIX,
        error::{Result, SimpleDebError},
        index::PackageIndexEntry,
        repository::{RepositoryReader, RepositoryWrite, RepositoryWriter},
    },
    async_trait::async_trait,
    futures::AsyncRead,
    log::debug,
    std::{
        borrow::Cow,
        collections::BTreeMap,
        path::{Path, PathBuf},
        pin::Pin,
    },
};

fn io_path_error(path: &Path, e: std::io::Error) -> SimpleDebError {
    SimpleDebError::RepositoryIoPath(format!("{}", path.display()), e)
}

/// Reads package index documents from a directory tree.
///
/// Every immediate sub-directory of the root is a codename. Index documents
/// can live at any depth below their codename directory.
#[derive(Clone, Debug)]
pub struct FilesystemIndexReader {
    root_dir: PathBuf,
}

impl FilesystemIndexReader {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    fn codename_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut dirs = vec![];

        for entry in
            std::fs::read_dir(&self.root_dir).map_err(|e| io_path_error(&self.root_dir, e))?
        {
            let entry = entry.map_err(|e| io_path_error(&self.root_dir, e))?;
            let path = entry.path();

            if path.is_dir() {
                dirs.push((entry.file_name().to_string_lossy().to_string(), path));
            }
        }

        dirs.sort();

        Ok(dirs)
    }

    fn read_codename(&self, dir: &Path) -> Result<Vec<PackageIndexEntry>> {
        let mut entries = vec![];

        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                io_path_error(&path, e.into())
            })?;

            if !entry.file_type().is_file()
                || !entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(INDEX_FILENAME_SUFFIX)
            {
                continue;
            }

            debug!("reading {}", entry.path().display());
            let data = std::fs::read(entry.path()).map_err(|e| io_path_error(entry.path(), e))?;
            entries.push(PackageIndexEntry::from_json(&data)?);
        }

        Ok(entries)
    }
}

#[async_trait]
impl RepositoryReader for FilesystemIndexReader {
    async fn read_index_metadata(&self) -> Result<BTreeMap<String, Vec<PackageIndexEntry>>> {
        let mut res = BTreeMap::new();

        for (codename, dir) in self.codename_dirs()? {
            res.insert(codename, self.read_codename(&dir)?);
        }

        Ok(res)
    }
}

/// A writable Debian repository backed by a filesystem.
#[derive(Clone, Debug)]
pub struct FilesystemRepositoryWriter {
    root_dir: PathBuf,
}

impl FilesystemRepositoryWriter {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed. The directory does not need to exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RepositoryWriter for FilesystemRepositoryWriter {
    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<RepositoryWrite<'path>> {
        let dest_path = self.root_dir.join(path.as_ref());

        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_path_error(parent, e))?;
        }

        let fh = std::fs::File::create(&dest_path).map_err(|e| io_path_error(&dest_path, e))?;

        let mut writer = futures::io::AllowStdIo::new(fh);

        let bytes_written = futures::io::copy(reader, &mut writer)
            .await
            .map_err(|e| io_path_error(&dest_path, e))?;

        Ok(RepositoryWrite {
            path,
            bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            descriptor::{Architecture, ControlFields, PackageDescriptor, PackageMeta},
            io::ContentIntegrity,
            repository::{publish_repository, PublishEvent, PublishOptions},
        },
        chrono::{TimeZone, Utc},
    };

    fn entry(name: &str, arch: Architecture) -> PackageIndexEntry {
        PackageIndexEntry::new(
            PackageDescriptor::new(
                PackageMeta::new(name, "0.0.1", arch),
                ControlFields::new("maintainer", "description"),
            ),
            name.as_bytes(),
        )
    }

    #[tokio::test]
    async fn read_index_documents() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = td.path();

        entry("b", Architecture::Amd64).write_to_directory(root.join("jammy"))?;
        entry("a", Architecture::Arm64).write_to_directory(root.join("jammy").join("nested"))?;
        entry("c", Architecture::Amd64).write_to_directory(root.join("focal"))?;
        std::fs::create_dir_all(root.join("empty"))?;
        std::fs::write(root.join("jammy").join("hello.deb"), b"ignored")?;
        std::fs::write(root.join("stray.simple-deb-4j-index.json"), b"not json")?;

        let metadata = FilesystemIndexReader::new(root).read_index_metadata().await?;

        assert_eq!(
            metadata.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            vec!["empty", "focal", "jammy"]
        );
        assert!(metadata["empty"].is_empty());
        assert_eq!(
            metadata["jammy"]
                .iter()
                .map(|e| e.descriptor.meta.name.as_str())
                .collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert_eq!(metadata["focal"][0], entry("c", Architecture::Amd64));

        Ok(())
    }

    #[tokio::test]
    async fn malformed_document_is_error() -> Result<()> {
        let td = tempfile::tempdir()?;
        std::fs::create_dir_all(td.path().join("jammy"))?;
        std::fs::write(
            td.path().join("jammy").join("x.simple-deb-4j-index.json"),
            b"{",
        )?;

        let res = FilesystemIndexReader::new(td.path())
            .read_index_metadata()
            .await;
        assert!(matches!(res, Err(SimpleDebError::Json(_))));

        Ok(())
    }

    #[tokio::test]
    async fn missing_root_is_error() -> Result<()> {
        let td = tempfile::tempdir()?;

        let res = FilesystemIndexReader::new(td.path().join("missing"))
            .read_index_metadata()
            .await;
        assert!(matches!(res, Err(SimpleDebError::RepositoryIoPath(_, _))));

        Ok(())
    }

    #[tokio::test]
    async fn write_creates_parents() -> Result<()> {
        let td = tempfile::tempdir()?;
        let writer = FilesystemRepositoryWriter::new(td.path().join("out"));

        let mut files = BTreeMap::new();
        for path in ["jammy/Release", "jammy/main/binary-amd64/Packages"] {
            files.insert(path.to_string(), ContentIntegrity::of(path, path));
        }

        let report = writer.write_files(&files, 2).await.into_result()?;

        assert_eq!(report.written.len(), 2);
        assert_eq!(
            std::fs::read(td.path().join("out/jammy/main/binary-amd64/Packages"))?,
            b"jammy/main/binary-amd64/Packages"
        );

        Ok(())
    }

    #[tokio::test]
    async fn publish_between_directories() -> Result<()> {
        let td = tempfile::tempdir()?;
        let input = td.path().join("input");
        let output = td.path().join("output");

        entry("hello", Architecture::Amd64).write_to_directory(input.join("jammy"))?;

        let options = PublishOptions {
            date: Utc.with_ymd_and_hms(2025, 7, 2, 6, 24, 42).unwrap(),
            ..Default::default()
        };

        let report = publish_repository(
            &FilesystemIndexReader::new(&input),
            &FilesystemRepositoryWriter::new(&output),
            &options,
            None,
            &None::<fn(PublishEvent)>,
        )
        .await?;

        assert!(report.is_success());
        let release = String::from_utf8(std::fs::read(output.join("jammy/Release"))?)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        assert!(release.starts_with("Origin: jammy\n"));
        assert!(release.contains(" main/binary-amd64/Packages.gz\n"));
        assert!(output.join("jammy/main/binary-amd64/Packages").is_file());

        Ok(())
    }
}
