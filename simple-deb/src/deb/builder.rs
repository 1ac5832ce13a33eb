// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Create .deb package files and their components. */

use {
    crate::{
        deb::{CONTROL_TAR_MEMBER, DATA_TAR_MEMBER, DEBIAN_BINARY, DEBIAN_BINARY_MEMBER},
        descriptor::{FileSpec, PackageDescriptor},
        error::{Result, SimpleDebError},
        fetch::{FetchRequest, OfflineFetcher, UrlFetcher},
        io::gzip_compress_into,
    },
    log::{debug, info, warn},
    std::{
        io::Write,
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

/// Mode of tar members that don't declare one.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// A resolved member of a tar archive.
#[derive(Clone, Debug)]
pub struct TarMember<'a> {
    pub path: &'a str,
    pub mode: Option<u32>,
    pub data: Vec<u8>,
}

/// A builder for `.deb` package files.
///
/// `file` specs are resolved relative to the working directory and `url`
/// specs through a [UrlFetcher]. Without an explicit fetcher, `url` specs fail.
pub struct DebBuilder {
    working_dir: PathBuf,

    fetcher: Box<dyn UrlFetcher + Send + Sync>,

    mtime: Option<SystemTime>,
}

impl DebBuilder {
    /// Construct a new instance resolving source paths relative to `working_dir`.
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            fetcher: Box::new(OfflineFetcher),
            mtime: None,
        }
    }

    /// Set the [UrlFetcher] used to resolve `url` file specs.
    pub fn set_fetcher(mut self, fetcher: impl UrlFetcher + Send + Sync + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    /// Set the modified time to use on archive members.
    ///
    /// If this is called, all archive members will use the specified time, helping
    /// to make archive content deterministic.
    ///
    /// If not called, the current time will be used.
    pub fn set_mtime(mut self, time: Option<SystemTime>) -> Self {
        self.mtime = time;
        self
    }

    fn mtime(&self) -> u64 {
        self.mtime
            .unwrap_or_else(SystemTime::now)
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// The directory `file` specs are resolved against.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Resolve a [FileSpec] to its content.
    pub fn resolve(&self, spec: &FileSpec) -> Result<Vec<u8>> {
        match spec {
            FileSpec::Text { content, .. } => Ok(content.as_bytes().to_vec()),
            FileSpec::Binary { content, .. } => Ok(content.clone()),
            FileSpec::FromPath { source_path, .. } => {
                let path = self.working_dir.join(source_path);
                std::fs::read(&path).map_err(|e| SimpleDebError::SourceRead(path, e))
            }
            FileSpec::FromUrl {
                url,
                bearer_token,
                headers,
                ..
            } => self.fetcher.fetch(&FetchRequest {
                url,
                bearer_token: bearer_token.as_deref(),
                headers,
            }),
        }
    }

    fn resolve_all<'a>(&self, specs: &'a [FileSpec]) -> Result<Vec<TarMember<'a>>> {
        specs
            .iter()
            .map(|spec| {
                Ok(TarMember {
                    path: spec.path(),
                    mode: spec.mode(),
                    data: self.resolve(spec)?,
                })
            })
            .collect()
    }

    /// Build a `.deb` with the full payload.
    pub fn build(&self, descriptor: &PackageDescriptor) -> Result<Vec<u8>> {
        self.build_internal(descriptor, false)
    }

    /// Build a `.deb` whose `data.tar.gz` holds an empty archive.
    ///
    /// Data file specs are not resolved. The result carries the full control
    /// metadata but is not installable, and its size and digests differ from
    /// those of the full package. An index entry made from it must not be
    /// published next to the full package.
    pub fn build_index_only(&self, descriptor: &PackageDescriptor) -> Result<Vec<u8>> {
        let data = self.build_internal(descriptor, true)?;

        warn!(
            "{} built without data files: it is not installable and its size and digests \
            do not match the full package",
            descriptor.deb_filename()
        );

        Ok(data)
    }

    fn build_internal(&self, descriptor: &PackageDescriptor, index_only: bool) -> Result<Vec<u8>> {
        descriptor.validate()?;

        // Every source is resolved before any archive is assembled.
        let control = descriptor.render_control();
        let mut control_members = self.resolve_all(&descriptor.files.control_files)?;
        control_members.push(TarMember {
            path: "control",
            mode: None,
            data: control.into_bytes(),
        });

        let data_members = if index_only {
            vec![]
        } else {
            self.resolve_all(&descriptor.files.data_files)?
        };

        let mtime = self.mtime();

        let control_tar = write_deb_tar_gz(vec![], &control_members, mtime)?;
        let data_tar = write_deb_tar_gz(vec![], &data_members, mtime)?;

        let mut buffer = vec![];
        write_deb_ar(&mut buffer, &control_tar, &data_tar, mtime)?;

        info!(
            "built {}{} ({} bytes)",
            descriptor.deb_filename(),
            if index_only { " for indexing" } else { "" },
            buffer.len()
        );

        Ok(buffer)
    }

    /// Build a `.deb` and write it to `<dest_dir>/<name>_<version>_<arch>.deb`.
    ///
    /// With `index_only`, the payload-free variant is written to
    /// `<name>_<version>_<arch>.index-only.deb` instead. Returns the written path
    /// and the archive content.
    pub fn build_to_directory(
        &self,
        descriptor: &PackageDescriptor,
        dest_dir: impl AsRef<Path>,
        index_only: bool,
    ) -> Result<(PathBuf, Vec<u8>)> {
        let data = if index_only {
            self.build_index_only(descriptor)?
        } else {
            self.build(descriptor)?
        };

        // The stub never takes the place of the full package.
        let filename = if index_only {
            descriptor.index_only_deb_filename()
        } else {
            descriptor.deb_filename()
        };

        let dest_dir = dest_dir.as_ref();
        std::fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(filename);
        std::fs::write(&path, &data)?;

        info!("created .deb package: {}", path.display());

        Ok((path, data))
    }
}

fn new_tar_header(mtime: u64, size: usize, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(mtime);
    header.set_mode(mode);
    header.set_size(size as _);
    header.set_entry_type(tar::EntryType::Regular);

    header
}

/// Write a tar archive suitable for inclusion in a `.deb` archive.
///
/// Members are written in the given order. Paths longer than the tar header
/// field use GNU long name entries.
pub fn write_deb_tar<W: Write>(writer: W, members: &[TarMember<'_>], mtime: u64) -> Result<()> {
    let mut builder = tar::Builder::new(writer);

    for member in members {
        let path = member.path.trim_start_matches('/');
        let mut header = new_tar_header(
            mtime,
            member.data.len(),
            member.mode.unwrap_or(DEFAULT_FILE_MODE),
        );
        header
            .set_username("root")
            .map_err(SimpleDebError::Archive)?;
        header
            .set_groupname("root")
            .map_err(SimpleDebError::Archive)?;

        debug!("adding {} ({} bytes) to tar", path, member.data.len());
        builder
            .append_data(&mut header, path, member.data.as_slice())
            .map_err(SimpleDebError::Archive)?;
    }

    builder.finish().map_err(SimpleDebError::Archive)?;

    Ok(())
}

fn tar_to_vec(members: &[TarMember<'_>], mtime: u64) -> Result<Vec<u8>> {
    let mut buffer = vec![];
    write_deb_tar(&mut buffer, members, mtime)?;

    Ok(buffer)
}

/// Write a gzip compressed tar archive of `members`, returning the writer.
pub fn write_deb_tar_gz<W: Write>(writer: W, members: &[TarMember<'_>], mtime: u64) -> Result<W> {
    let tar = tar_to_vec(members, mtime)?;

    gzip_compress_into(writer, &tar).map_err(SimpleDebError::Archive)
}

/// Write the outer `ar` archive of a `.deb`.
pub fn write_deb_ar<W: Write>(
    writer: &mut W,
    control_tar: &[u8],
    data_tar: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut ar_builder = ar::Builder::new(writer);

    for (name, data) in [
        (DEBIAN_BINARY_MEMBER, DEBIAN_BINARY),
        (CONTROL_TAR_MEMBER, control_tar),
        (DATA_TAR_MEMBER, data_tar),
    ] {
        let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as _);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        ar_builder
            .append(&header, data)
            .map_err(SimpleDebError::Archive)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            descriptor::{Architecture, ControlFields, PackageMeta},
            index::PackageIndexEntry,
            io::gzip_decompress,
        },
        std::io::Read,
    };

    fn hello() -> PackageDescriptor {
        PackageDescriptor::new(
            PackageMeta::new("hello", "0.0.1", Architecture::Amd64),
            ControlFields::new("maintainer", "description").set_depends("libc6"),
        )
    }

    fn builder() -> DebBuilder {
        DebBuilder::new(".").set_mtime(Some(SystemTime::UNIX_EPOCH))
    }

    fn ar_members(deb: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
        let mut archive = ar::Archive::new(std::io::Cursor::new(deb));
        let mut res = vec![];

        while let Some(entry) = archive.next_entry() {
            let mut entry = entry?;
            let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
            let mut data = vec![];
            entry.read_to_end(&mut data)?;
            res.push((name, data));
        }

        Ok(res)
    }

    fn tar_members(tar_gz: &[u8]) -> Result<Vec<(String, u32, Vec<u8>)>> {
        let tar = gzip_decompress(tar_gz)?;
        let mut archive = tar::Archive::new(std::io::Cursor::new(tar));
        let mut res = vec![];

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.display().to_string();
            let mode = entry.header().mode()?;
            let mut data = vec![];
            entry.read_to_end(&mut data)?;
            res.push((path, mode, data));
        }

        Ok(res)
    }

    #[test]
    fn outer_member_order() -> Result<()> {
        let deb = builder().build(&hello())?;
        let members = ar_members(&deb)?;

        assert_eq!(
            members.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            vec!["debian-binary", "control.tar.gz", "data.tar.gz"]
        );
        assert_eq!(members[0].1, b"2.0\n");

        Ok(())
    }

    #[test]
    fn control_file_is_last() -> Result<()> {
        let mut d = hello();
        d.files
            .control_files
            .push(FileSpec::text("postinst", "#!/bin/sh\nexit 0\n").with_mode(0o755));
        d.files
            .control_files
            .push(FileSpec::text("conffiles", "/etc/hello.conf\n"));

        let deb = builder().build(&d)?;
        let members = ar_members(&deb)?;
        let control = tar_members(&members[1].1)?;

        assert_eq!(
            control.iter().map(|(p, _, _)| p.as_str()).collect::<Vec<_>>(),
            vec!["postinst", "conffiles", "control"]
        );
        assert_eq!(control[0].1, 0o755);
        assert_eq!(control[1].1, 0o644);
        assert_eq!(control[2].2, d.render_control().into_bytes());

        Ok(())
    }

    #[test]
    fn data_members_and_long_paths() -> Result<()> {
        let long_path = format!("usr/share/hello/f{}.txt", "u".repeat(200));

        let mut d = hello();
        d.files.data_files.push(FileSpec::Binary {
            path: "/usr/bin/hello".into(),
            mode: Some(0o755),
            content: vec![0, 1, 2],
        });
        d.files.data_files.push(FileSpec::text(&long_path, "x"));

        let deb = builder().build(&d)?;
        let members = ar_members(&deb)?;
        let data = tar_members(&members[2].1)?;

        assert_eq!(data.len(), 2);
        assert_eq!(data[0], ("usr/bin/hello".to_string(), 0o755, vec![0, 1, 2]));
        assert_eq!(data[1].0, long_path);
        assert_eq!(data[1].2, b"x");

        Ok(())
    }

    #[test]
    fn index_only_has_empty_data() -> Result<()> {
        let mut d = hello();
        // Never resolved for index builds.
        d.files.data_files.push(FileSpec::FromPath {
            path: "usr/bin/hello".into(),
            mode: None,
            source_path: "does-not-exist".into(),
        });

        let deb = builder().build_index_only(&d)?;
        let members = ar_members(&deb)?;

        assert_eq!(members.len(), 3);
        assert!(tar_members(&members[2].1)?.is_empty());
        assert_eq!(tar_members(&members[1].1)?.len(), 1);

        Ok(())
    }

    #[test]
    fn index_only_does_not_describe_full_package() -> Result<()> {
        let mut d = hello();
        d.files
            .data_files
            .push(FileSpec::text("usr/share/hello/README", "hello world\n"));

        let full = PackageIndexEntry::new(d.clone(), &builder().build(&d)?);
        let stub = PackageIndexEntry::new(d.clone(), &builder().build_index_only(&d)?);

        assert_eq!(full.descriptor, stub.descriptor);
        assert_ne!(full.size, stub.size);
        assert_ne!(full.integrity.md5(), stub.integrity.md5());
        assert_ne!(full.integrity.sha256(), stub.integrity.sha256());

        Ok(())
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn compression_failure_is_archive_error() {
        let members = [TarMember {
            path: "control",
            mode: None,
            data: b"Package: hello\n".to_vec(),
        }];

        assert!(matches!(
            write_deb_tar_gz(FailingWriter, &members, 0),
            Err(SimpleDebError::Archive(_))
        ));
    }

    #[test]
    fn source_paths_relative_to_working_dir() -> Result<()> {
        let td = tempfile::tempdir()?;
        std::fs::create_dir_all(td.path().join("build"))?;
        std::fs::write(td.path().join("build/hello"), b"binary")?;

        let mut d = hello();
        d.files.data_files.push(FileSpec::FromPath {
            path: "usr/bin/hello".into(),
            mode: Some(0o755),
            source_path: "build/hello".into(),
        });

        let builder = DebBuilder::new(td.path()).set_mtime(Some(SystemTime::UNIX_EPOCH));
        let deb = builder.build(&d)?;
        let data = tar_members(&ar_members(&deb)?[2].1)?;
        assert_eq!(data[0].2, b"binary");

        d.files.data_files[0] = FileSpec::FromPath {
            path: "usr/bin/hello".into(),
            mode: None,
            source_path: "build/missing".into(),
        };
        assert!(matches!(
            builder.build(&d),
            Err(SimpleDebError::SourceRead(_, _))
        ));

        Ok(())
    }

    struct StaticFetcher(Vec<u8>);

    impl UrlFetcher for StaticFetcher {
        fn fetch(&self, _request: &FetchRequest<'_>) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn url_specs_use_fetcher() -> Result<()> {
        let mut d = hello();
        d.files.data_files.push(FileSpec::FromUrl {
            path: "usr/share/hello/remote".into(),
            mode: None,
            url: url::Url::parse("https://example.com/remote")?,
            bearer_token: None,
            headers: Default::default(),
        });

        assert!(matches!(
            builder().build(&d),
            Err(SimpleDebError::Fetch(_, _))
        ));

        let deb = builder()
            .set_fetcher(StaticFetcher(b"remote".to_vec()))
            .build(&d)?;
        let data = tar_members(&ar_members(&deb)?[2].1)?;
        assert_eq!(data[0].2, b"remote");

        Ok(())
    }

    #[test]
    fn invalid_descriptor_rejected() {
        let d = PackageDescriptor::new(
            PackageMeta::new("", "1", Architecture::Amd64),
            ControlFields::new("m", "d"),
        );

        assert!(matches!(
            builder().build(&d),
            Err(SimpleDebError::Validation(_))
        ));
    }

    #[test]
    fn fixed_mtime_is_deterministic() -> Result<()> {
        let a = builder().build(&hello())?;
        let b = builder().build(&hello())?;

        assert_eq!(a, b);

        Ok(())
    }

    #[test]
    fn build_to_directory_writes_file() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (path, data) = builder().build_to_directory(&hello(), td.path().join("out"), false)?;

        assert_eq!(path, td.path().join("out").join("hello_0.0.1_amd64.deb"));
        assert_eq!(std::fs::read(&path)?, data);

        Ok(())
    }

    #[test]
    fn index_only_keeps_canonical_path_free() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (path, data) = builder().build_to_directory(&hello(), td.path(), true)?;

        assert_eq!(path, td.path().join("hello_0.0.1_amd64.index-only.deb"));
        assert_eq!(std::fs::read(&path)?, data);
        assert!(!td.path().join("hello_0.0.1_amd64.deb").exists());

        Ok(())
    }
}
