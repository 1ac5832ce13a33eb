// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file primitives.

A `Release` file is the top-level document of a repository distribution. It
starts with a control paragraph of repository metadata ([ReleaseHeader]) and
continues with one section per [ChecksumType] listing every indices file with
its digest, size and path.

The `Release` file lists itself. Its entry is the digest of the header text
alone, computed before the hash sections exist.
*/

use {
    crate::{control::ControlParagraph, descriptor::Architecture, io::ContentIntegrity},
    chrono::{DateTime, Utc},
    std::collections::{BTreeMap, BTreeSet},
};

/// Formatter string for dates in release files.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Path under which the `Release` file lists its own header.
pub const RELEASE_PATH: &str = "Release";

/// Checksum type / digest mechanism used in a release file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,

    /// SHA-512.
    Sha512,
}

impl ChecksumType {
    /// Emit variants in the order their sections appear in `Release` files.
    pub fn release_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512].into_iter()
    }

    /// Name of the control field in `Release` files holding this variant type.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Name of the field in `Packages` stanzas holding this variant type.
    pub fn packages_field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }
}

/// Metadata paragraph at the top of a `Release` file.
#[derive(Clone, Debug)]
pub struct ReleaseHeader<'a> {
    pub origin: Option<&'a str>,
    pub label: Option<&'a str>,
    pub codename: &'a str,
    pub architectures: &'a BTreeSet<Architecture>,
    pub components: &'a BTreeSet<String>,
    pub date: DateTime<Utc>,
}

impl<'a> ReleaseHeader<'a> {
    /// Obtain the header as a control paragraph.
    ///
    /// `Origin` and `Label` fall back to the codename.
    pub fn to_paragraph(&self) -> ControlParagraph<'static> {
        let mut architectures = self
            .architectures
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>();
        architectures.sort();

        let components = self
            .components
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut para = ControlParagraph::default();

        for (name, value) in [
            ("Origin", self.origin.unwrap_or(self.codename).to_string()),
            ("Label", self.label.unwrap_or(self.codename).to_string()),
            ("Suite", self.codename.to_string()),
            ("Codename", self.codename.to_string()),
            ("Architectures", architectures.join(" ")),
            ("Components", components),
            ("Date", self.date.format(DATE_FORMAT).to_string()),
            ("Description", format!("Repository for {}", self.codename)),
        ] {
            para.set_field_from_string(name.into(), value.into());
        }

        para
    }

    /// Render the header text, terminated by a newline.
    pub fn render(&self) -> String {
        self.to_paragraph().to_string()
    }
}

/// Render the hash section of a given flavor.
///
/// Files are listed in path order. Sizes are right aligned in a 16 character column.
pub fn render_hash_section(
    checksum: ChecksumType,
    files: &BTreeMap<String, ContentIntegrity>,
) -> String {
    let lines = files
        .iter()
        .map(|(path, integrity)| {
            format!(
                " {} {:>16} {}",
                integrity.digest_hex(checksum),
                integrity.size(),
                path
            )
        })
        .collect::<Vec<_>>();

    format!("{}:\n{}", checksum.field_name(), lines.join("\n"))
}

/// Render a complete `Release` document.
///
/// `files` must already contain the `Release` entry for `header`.
pub fn render_release(header: &str, files: &BTreeMap<String, ContentIntegrity>) -> String {
    let sections = ChecksumType::release_order()
        .map(|checksum| render_hash_section(checksum, files))
        .collect::<Vec<_>>();

    format!("{}{}\n", header, sections.join("\n"))
}
