// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Persisted index metadata of built packages.

A [PackageIndexEntry] is written next to every built `.deb` as a JSON document
named `<name>_<version>_<arch>.simple-deb-4j-index.json`. Repositories are
aggregated from these documents alone, so `.deb` files never need to be
rebuilt or downloaded to regenerate repository metadata.
*/

use {
    crate::{
        deb::reader::read_descriptor, descriptor::PackageDescriptor, error::Result,
        io::ContentIntegrity,
    },
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

/// Descriptor of a built package plus the integrity of its `.deb` bytes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageIndexEntry {
    #[serde(rename = "debPackageConfig")]
    pub descriptor: PackageDescriptor,
    #[serde(rename = "hashes")]
    pub integrity: ContentIntegrity,
    pub size: u64,
    #[serde(
        rename = "installedSize",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub installed_size: Option<u64>,
}

impl PackageIndexEntry {
    /// Construct an entry from a descriptor and the `.deb` built from it.
    pub fn new(descriptor: PackageDescriptor, deb: &[u8]) -> Self {
        let integrity = ContentIntegrity::of_unnamed(deb).without_content();
        let size = integrity.size();

        Self {
            descriptor,
            integrity,
            size,
            installed_size: None,
        }
    }

    /// Construct an entry for an existing `.deb`, recovering its descriptor from the archive.
    pub fn from_deb(deb: &[u8]) -> Result<Self> {
        Ok(Self::new(read_descriptor(deb)?, deb))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Filename of the persisted document.
    pub fn index_filename(&self) -> String {
        self.descriptor.index_filename()
    }

    /// Write the JSON document into a directory, returning its path.
    pub fn write_to_directory(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.index_filename());
        std::fs::write(&path, self.to_json()?)?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            deb::builder::DebBuilder,
            descriptor::{Architecture, ControlFields, PackageMeta},
        },
        std::time::SystemTime,
    };

    fn hello() -> PackageDescriptor {
        PackageDescriptor::new(
            PackageMeta::new("hello", "0.0.1", Architecture::Amd64),
            ControlFields::new("maintainer", "description"),
        )
    }

    #[test]
    fn entry_hashes_deb() -> Result<()> {
        let entry = PackageIndexEntry::new(hello(), b"hello");

        assert_eq!(entry.size, 5);
        assert_eq!(entry.integrity.md5(), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(
            entry.index_filename(),
            "hello_0.0.1_amd64.simple-deb-4j-index.json"
        );

        let json: serde_json::Value = serde_json::from_slice(&entry.to_json()?)?;
        assert_eq!(json["debPackageConfig"]["meta"]["arch"], "amd64");
        assert_eq!(json["hashes"]["sha1"], "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_eq!(json["size"], 5);
        assert!(json.get("installedSize").is_none());

        assert_eq!(PackageIndexEntry::from_json(&entry.to_json()?)?, entry);

        Ok(())
    }

    #[test]
    fn reads_documents_with_null_path() -> Result<()> {
        let json = r#"{
            "debPackageConfig": {
                "meta": {"name": "hello", "version": "0.0.1", "arch": "arm64"},
                "control": {"maintainer": "m", "description": "d"},
                "files": {"controlFiles": null, "dataFiles": []}
            },
            "hashes": {"path": null, "size": 5, "md5": "a", "sha1": "b", "sha256": "c", "sha512": "d"},
            "size": 5
        }"#;

        let entry = PackageIndexEntry::from_json(json.as_bytes())?;
        assert_eq!(entry.descriptor.meta.arch, Architecture::Arm64);
        assert_eq!(entry.integrity.path(), "");
        assert_eq!(entry.integrity.sha512(), "d");

        Ok(())
    }

    #[test]
    fn from_existing_deb() -> Result<()> {
        let deb = DebBuilder::new(".")
            .set_mtime(Some(SystemTime::UNIX_EPOCH))
            .build(&hello())?;

        let entry = PackageIndexEntry::from_deb(&deb)?;
        assert_eq!(entry.descriptor, hello());
        assert_eq!(entry.size, deb.len() as u64);

        let td = tempfile::tempdir()?;
        let path = entry.write_to_directory(td.path())?;
        assert_eq!(
            PackageIndexEntry::from_json(&std::fs::read(path)?)?,
            entry
        );

        Ok(())
    }
}
