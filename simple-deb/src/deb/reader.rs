// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reading of .deb package files. */

use {
    crate::{
        control::ControlParagraph,
        deb::{CONTROL_TAR_MEMBER, DATA_TAR_MEMBER},
        descriptor::{
            Architecture, ControlFields, PackageDescriptor, PackageMeta, CONTROL_FIELD_ORDER,
        },
        error::{Result, SimpleDebError},
        io::gzip_decompress,
    },
    std::io::{Cursor, Read},
};

/// A member of the outer `ar` archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArMember {
    pub name: String,
    pub data: Vec<u8>,
}

/// Reads the members of a binary package `.deb` file.
pub struct BinaryPackageReader {
    members: Vec<ArMember>,
}

impl BinaryPackageReader {
    /// Read all members of the `.deb` in `data`.
    pub fn new(data: &[u8]) -> Result<Self> {
        let mut archive = ar::Archive::new(Cursor::new(data));
        let mut members = vec![];

        while let Some(entry) = archive.next_entry() {
            let mut entry = entry.map_err(SimpleDebError::Archive)?;
            let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
            let mut data = vec![];
            entry
                .read_to_end(&mut data)
                .map_err(SimpleDebError::Archive)?;

            members.push(ArMember { name, data });
        }

        Ok(Self { members })
    }

    /// Members in archive order.
    pub fn members(&self) -> &[ArMember] {
        &self.members
    }

    /// Obtain a member by name.
    pub fn member(&self, name: &str) -> Option<&ArMember> {
        self.members.iter().find(|m| m.name == name)
    }

    fn tar_entries(&self, member: &'static str) -> Result<Vec<(String, Vec<u8>)>> {
        let member = self
            .member(member)
            .ok_or(SimpleDebError::DebMemberMissing(member))?;

        let tar = gzip_decompress(&member.data)?;
        let mut archive = tar::Archive::new(Cursor::new(tar));
        let mut res = vec![];

        for entry in archive.entries().map_err(SimpleDebError::Archive)? {
            let mut entry = entry.map_err(SimpleDebError::Archive)?;
            let path = entry
                .path()
                .map_err(SimpleDebError::Archive)?
                .display()
                .to_string();
            let mut data = vec![];
            entry
                .read_to_end(&mut data)
                .map_err(SimpleDebError::Archive)?;

            res.push((path, data));
        }

        Ok(res)
    }

    /// Files in `control.tar.gz`, in archive order.
    pub fn control_entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.tar_entries(CONTROL_TAR_MEMBER)
    }

    /// Files in `data.tar.gz`, in archive order.
    pub fn data_entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.tar_entries(DATA_TAR_MEMBER)
    }

    /// Text of the `control` file.
    pub fn control_text(&self) -> Result<String> {
        self.control_entries()?
            .into_iter()
            .find(|(path, _)| path.trim_start_matches("./") == "control")
            .map(|(_, data)| String::from_utf8_lossy(&data).to_string())
            .ok_or(SimpleDebError::DebMemberMissing("control"))
    }

    /// Reconstruct the [PackageDescriptor] from the `control` file.
    ///
    /// File lists are empty since archive payloads are not mapped back to specs.
    pub fn descriptor(&self) -> Result<PackageDescriptor> {
        descriptor_from_control(&self.control_text()?)
    }
}

/// Parse the known fields of a `control` file into a [PackageDescriptor].
pub fn descriptor_from_control(text: &str) -> Result<PackageDescriptor> {
    let para = ControlParagraph::parse_known_fields(text, CONTROL_FIELD_ORDER)?;

    let required = |name: &'static str| {
        para.field_str(name)
            .ok_or(SimpleDebError::ControlFieldMissing(name))
    };
    let optional = |name: &str| para.field_str(name).unwrap_or("").to_string();

    let meta = PackageMeta::new(
        required("Package")?,
        required("Version")?,
        Architecture::from_debian_name(required("Architecture")?.trim())?,
    );

    let control = ControlFields::new(optional("Maintainer"), optional("Description"))
        .set_depends(optional("Depends"))
        .set_recommends(optional("Recommends"))
        .set_conflicts(optional("Conflicts"))
        .set_homepage(optional("Homepage"))
        .set_section(optional("Section"))
        .set_priority(optional("Priority"));

    Ok(PackageDescriptor::new(meta, control))
}

/// Read the [PackageDescriptor] of a `.deb`.
pub fn read_descriptor(deb: &[u8]) -> Result<PackageDescriptor> {
    BinaryPackageReader::new(deb)?.descriptor()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{deb::builder::DebBuilder, descriptor::FileSpec},
        std::time::SystemTime,
    };

    #[test]
    fn control_round_trip() -> Result<()> {
        let mut d = PackageDescriptor::new(
            PackageMeta::new("hello", "1.2.3-1", Architecture::Arm64),
            ControlFields::new("Jane <jane@example.com>", "greets\n second line")
                .set_depends("libc6 (>= 2.4), libx11-6")
                .set_conflicts("goodbye")
                .set_homepage("https://example.com")
                .set_section("utils"),
        );
        d.files
            .control_files
            .push(FileSpec::text("postinst", "#!/bin/sh\n"));
        d.files.data_files.push(FileSpec::text("usr/share/x", "x"));

        let deb = DebBuilder::new(".")
            .set_mtime(Some(SystemTime::UNIX_EPOCH))
            .build(&d)?;

        let reader = BinaryPackageReader::new(&deb)?;
        assert_eq!(reader.members().len(), 3);
        assert_eq!(reader.data_entries()?.len(), 1);

        let parsed = reader.descriptor()?;
        assert_eq!(parsed.meta, d.meta);
        assert_eq!(parsed.control, d.control);
        assert!(parsed.files.control_files.is_empty());

        Ok(())
    }

    #[test]
    fn missing_control_member() {
        let mut buffer = vec![];
        {
            let mut builder = ar::Builder::new(&mut buffer);
            let header = ar::Header::new(b"debian-binary".to_vec(), 4);
            builder.append(&header, &b"2.0\n"[..]).unwrap();
        }

        assert!(matches!(
            read_descriptor(&buffer),
            Err(SimpleDebError::DebMemberMissing("control.tar.gz"))
        ));
    }

    #[test]
    fn missing_required_field() {
        assert!(matches!(
            descriptor_from_control("Package: x\nArchitecture: amd64\n"),
            Err(SimpleDebError::ControlFieldMissing("Version"))
        ));
        assert!(matches!(
            descriptor_from_control("Package: x\nVersion: 1\nArchitecture: i386\n"),
            Err(SimpleDebError::UnknownArchitecture(_))
        ));
    }
}
