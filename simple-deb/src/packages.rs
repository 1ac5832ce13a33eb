// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Rendering of `Packages` indices files. */

use crate::{
    control::ControlParagraph, index::PackageIndexEntry, repository::release::ChecksumType,
};

/// Renders [PackageIndexEntry] into `Packages` stanzas.
///
/// `Filename` fields point into `pool/<pool path>/`.
#[derive(Clone, Debug)]
pub struct PackagesIndex {
    pool_path: String,
}

impl PackagesIndex {
    /// Construct an instance for a pool path, usually the codename.
    ///
    /// Leading and trailing `/` are stripped.
    pub fn new(pool_path: impl AsRef<str>) -> Self {
        Self {
            pool_path: pool_path.as_ref().trim_matches('/').to_string(),
        }
    }

    pub fn pool_path(&self) -> &str {
        &self.pool_path
    }

    /// Build the stanza describing one package.
    pub fn paragraph(&self, entry: &PackageIndexEntry) -> ControlParagraph<'static> {
        let meta = &entry.descriptor.meta;
        let control = &entry.descriptor.control;

        let mut para = ControlParagraph::default();
        para.set_field_from_string("Package".into(), meta.name.clone().into());
        para.set_field_from_string("Version".into(), meta.version.clone().into());
        para.set_field_from_string("Architecture".into(), meta.arch.to_string().into());
        para.set_field_from_string("Maintainer".into(), control.maintainer().to_string().into());
        para.set_field_if_not_blank("Depends".into(), control.depends().to_string().into());
        para.set_field_if_not_blank("Conflicts".into(), control.conflicts().to_string().into());
        para.set_field_if_not_blank(
            "Recommends".into(),
            control.recommends().to_string().into(),
        );
        para.set_field_from_string(
            "Filename".into(),
            format!("pool/{}/{}", self.pool_path, meta.deb_filename()).into(),
        );
        if let Some(installed_size) = entry.installed_size {
            para.set_field_from_string("Installed-Size".into(), installed_size.to_string().into());
        }
        para.set_field_from_string("Size".into(), entry.size.to_string().into());

        for checksum in ChecksumType::release_order() {
            para.set_field_from_string(
                checksum.packages_field_name().into(),
                entry.integrity.digest_hex(checksum).to_string().into(),
            );
        }

        para.set_field_from_string("Section".into(), control.section().to_string().into());
        para.set_field_from_string("Priority".into(), control.priority().to_string().into());
        if !control.homepage().is_empty() {
            para.set_field_from_string("Homepage".into(), control.homepage().to_string().into());
        }
        para.set_field_from_string(
            "Description".into(),
            control.description().to_string().into(),
        );

        para
    }

    /// Render entries, in order, separated by blank lines.
    pub fn render<'a>(&self, entries: impl IntoIterator<Item = &'a PackageIndexEntry>) -> String {
        entries
            .into_iter()
            .map(|entry| self.paragraph(entry).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
