// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build repository metadata from package index entries.

A [Repository] holds one [RepositoryCodenameSection] per codename. Entries are
added to sections, each section is finalized into its `Packages`,
`Packages.gz` and `Release` files, and [aggregate_repository] flattens every
section into a single map keyed by `<codename>/<path>`.
*/

use {
    crate::{
        descriptor::Architecture,
        error::Result,
        index::PackageIndexEntry,
        io::{gzip_compress, ContentIntegrity},
        packages::PackagesIndex,
        repository::release::{render_release, ReleaseHeader, RELEASE_PATH},
    },
    chrono::{DateTime, Utc},
    log::debug,
    serde::Deserialize,
    std::collections::{BTreeMap, BTreeSet},
};

/// Repository wide settings.
///
/// Unset values fall back to the codename of each distribution.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    pub origin: Option<String>,
    pub label: Option<String>,
}

/// All package entries and rendered files of one codename.
#[derive(Clone, Debug)]
pub struct RepositoryCodenameSection {
    codename: String,
    origin: Option<String>,
    label: Option<String>,
    architectures: BTreeSet<Architecture>,
    components: BTreeSet<String>,
    date: DateTime<Utc>,
    entries: Vec<PackageIndexEntry>,
    rendered_files: BTreeMap<String, ContentIntegrity>,
}

impl RepositoryCodenameSection {
    pub fn new(codename: impl ToString, date: DateTime<Utc>) -> Self {
        Self {
            codename: codename.to_string(),
            origin: None,
            label: None,
            architectures: BTreeSet::new(),
            components: BTreeSet::new(),
            date,
            entries: vec![],
            rendered_files: BTreeMap::new(),
        }
    }

    /// Apply `Origin` and `Label` from a [RepositoryConfig].
    pub fn set_config(&mut self, config: &RepositoryConfig) {
        self.origin = config.origin.clone();
        self.label = config.label.clone();
    }

    pub fn codename(&self) -> &str {
        &self.codename
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn architectures(&self) -> &BTreeSet<Architecture> {
        &self.architectures
    }

    pub fn components(&self) -> &BTreeSet<String> {
        &self.components
    }

    pub fn entries(&self) -> &[PackageIndexEntry] {
        &self.entries
    }

    /// Record a package entry.
    ///
    /// Its architecture and section join the architectures and components of the codename.
    pub fn add_entry(&mut self, entry: PackageIndexEntry) {
        self.architectures.insert(entry.descriptor.meta.arch);
        self.components
            .insert(entry.descriptor.control.section().to_string());
        self.entries.push(entry);
    }

    /// Files produced by the last [Self::finalize()], keyed by path relative to the codename.
    pub fn rendered_files(&self) -> &BTreeMap<String, ContentIntegrity> {
        &self.rendered_files
    }

    /// The finalized `Release` file.
    pub fn release(&self) -> Option<&ContentIntegrity> {
        self.rendered_files.get(RELEASE_PATH)
    }

    /// Render `Packages`, `Packages.gz` and `Release` for the accumulated entries.
    ///
    /// Every `(component, architecture)` pair gets a `Packages` file listing the
    /// entries of that architecture. Calling this again discards the previous
    /// output and renders it anew.
    pub fn finalize(&mut self) -> Result<&BTreeMap<String, ContentIntegrity>> {
        let packages_index = PackagesIndex::new(&self.codename);
        let mut files = BTreeMap::new();

        for component in &self.components {
            for arch in &self.architectures {
                let path = format!("{}/binary-{}/Packages", component, arch);
                let content =
                    packages_index.render(self.entries.iter().filter(|e| e.descriptor.meta.arch == *arch));

                let gz_path = format!("{}.gz", path);
                let gz = gzip_compress(content.as_bytes())?;

                debug!("{}: rendered {} ({} bytes)", self.codename, path, content.len());

                files.insert(gz_path.clone(), ContentIntegrity::of(gz, gz_path));
                files.insert(path.clone(), ContentIntegrity::of(content, path));
            }
        }

        let header = ReleaseHeader {
            origin: self.origin.as_deref(),
            label: self.label.as_deref(),
            codename: &self.codename,
            architectures: &self.architectures,
            components: &self.components,
            date: self.date,
        }
        .render();

        // The Release file lists the digest of its header only.
        files.insert(
            RELEASE_PATH.to_string(),
            ContentIntegrity::of(header.as_str(), RELEASE_PATH),
        );

        let release = render_release(&header, &files);
        files.insert(
            RELEASE_PATH.to_string(),
            ContentIntegrity::of(release, RELEASE_PATH),
        );

        self.rendered_files = files;

        Ok(&self.rendered_files)
    }
}

/// A collection of codename sections sharing a date and [RepositoryConfig].
#[derive(Clone, Debug)]
pub struct Repository {
    config: RepositoryConfig,
    date: DateTime<Utc>,
    sections: BTreeMap<String, RepositoryCodenameSection>,
}

impl Repository {
    pub fn new(config: RepositoryConfig, date: DateTime<Utc>) -> Self {
        Self {
            config,
            date,
            sections: BTreeMap::new(),
        }
    }

    /// Obtain the section for a codename, creating it if needed.
    pub fn codename_section_mut(&mut self, codename: &str) -> &mut RepositoryCodenameSection {
        let config = &self.config;
        let date = self.date;

        self.sections
            .entry(codename.to_string())
            .or_insert_with(|| {
                let mut section = RepositoryCodenameSection::new(codename, date);
                section.set_config(config);
                section
            })
    }

    /// Add an entry to the section of a codename.
    pub fn add_entry(&mut self, codename: &str, entry: PackageIndexEntry) {
        self.codename_section_mut(codename).add_entry(entry);
    }

    pub fn sections(&self) -> impl Iterator<Item = &RepositoryCodenameSection> {
        self.sections.values()
    }

    pub fn section(&self, codename: &str) -> Option<&RepositoryCodenameSection> {
        self.sections.get(codename)
    }

    /// Finalize every codename section.
    pub fn finalize(&mut self) -> Result<()> {
        for section in self.sections.values_mut() {
            section.finalize()?;
        }

        Ok(())
    }
}

/// Flatten the finalized files of every section, keyed by `<codename>/<path>`.
pub fn aggregate_repository(repository: &Repository) -> BTreeMap<String, ContentIntegrity> {
    repository
        .sections()
        .flat_map(|section| {
            section
                .rendered_files()
                .iter()
                .map(move |(path, integrity)| {
                    (format!("{}/{}", section.codename(), path), integrity.clone())
                })
        })
        .collect()
}
