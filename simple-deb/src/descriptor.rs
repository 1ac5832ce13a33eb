// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Declarative description of a binary package.

A [PackageDescriptor] holds everything needed to build a `.deb`: identity
metadata ([PackageMeta]), the values of the `control` file ([ControlFields])
and the files to place in the control and data archives ([FileSpec]).

Descriptors are plain `serde` types. The wire format uses the property names
`meta`, `control` and `files`, with file specs tagged by a `type` property.
*/

use {
    crate::{
        control::ControlParagraph,
        error::{Result, SimpleDebError},
    },
    serde::{Deserialize, Deserializer, Serialize},
    std::{collections::BTreeMap, str::FromStr},
    url::Url,
};

/// Suffix of persisted package index documents.
pub const INDEX_FILENAME_SUFFIX: &str = ".simple-deb-4j-index.json";

/// Default value of the `Section` field.
pub const DEFAULT_SECTION: &str = "main";

/// Default value of the `Priority` field.
pub const DEFAULT_PRIORITY: &str = "optional";

/// Placeholder written to the `Installed-Size` field of `control` files.
pub const INSTALLED_SIZE_PLACEHOLDER: &str = "10";

/// Fields of a `control` file in the order they are rendered.
pub const CONTROL_FIELD_ORDER: &[&str] = &[
    "Package",
    "Version",
    "Depends",
    "Recommends",
    "Section",
    "Priority",
    "Homepage",
    "Conflicts",
    "Architecture",
    "Installed-Size",
    "Maintainer",
    "Description",
];

/// A supported Debian machine architecture.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    /// Resolve the architecture of the machine this code runs on.
    ///
    /// Returns `None` for CPUs that don't have a supported Debian architecture.
    pub fn host() -> Option<Self> {
        Self::from_cpu(std::env::consts::ARCH)
    }

    /// Resolve an architecture from a Rust/LLVM CPU name (e.g. `x86_64`).
    pub fn from_cpu(cpu: &str) -> Option<Self> {
        match cpu {
            "x86_64" => Some(Self::Amd64),
            "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }

    /// Parse a Debian architecture name, erroring on unsupported values.
    pub fn from_debian_name(s: &str) -> Result<Self> {
        Self::from_str(s).map_err(|_| SimpleDebError::UnknownArchitecture(s.to_string()))
    }
}

/// Identity of a package.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageMeta {
    pub name: String,
    pub version: String,
    pub arch: Architecture,
}

impl PackageMeta {
    pub fn new(name: impl ToString, version: impl ToString, arch: Architecture) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            arch,
        }
    }

    fn base_filename(&self) -> String {
        format!("{}_{}_{}", self.name, self.version, self.arch)
    }

    /// The canonical `.deb` filename: `<name>_<version>_<arch>.deb`.
    pub fn deb_filename(&self) -> String {
        format!("{}.deb", self.base_filename())
    }

    /// Filename of the payload-free variant: `<name>_<version>_<arch>.index-only.deb`.
    pub fn index_only_deb_filename(&self) -> String {
        format!("{}.index-only.deb", self.base_filename())
    }

    /// The filename of the persisted index document for this package.
    pub fn index_filename(&self) -> String {
        format!("{}{}", self.base_filename(), INDEX_FILENAME_SUFFIX)
    }
}

fn or_default_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn section_or_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    Ok(normalize(
        Option::<String>::deserialize(deserializer)?,
        DEFAULT_SECTION,
    ))
}

fn priority_or_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    Ok(normalize(
        Option::<String>::deserialize(deserializer)?,
        DEFAULT_PRIORITY,
    ))
}

fn normalize(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

/// Values for the `control` file of a package.
///
/// `section` and `priority` never hold blank values: blanks are replaced with
/// `main` and `optional` when constructed or deserialized.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ControlFields {
    #[serde(alias = "Depends", deserialize_with = "or_default_string")]
    depends: String,
    #[serde(alias = "Recommends", deserialize_with = "or_default_string")]
    recommends: String,
    #[serde(alias = "Section", deserialize_with = "section_or_default")]
    section: String,
    #[serde(alias = "Priority", deserialize_with = "priority_or_default")]
    priority: String,
    #[serde(alias = "Homepage", deserialize_with = "or_default_string")]
    homepage: String,
    #[serde(alias = "Conflicts", deserialize_with = "or_default_string")]
    conflicts: String,
    #[serde(alias = "Maintainer", deserialize_with = "or_default_string")]
    maintainer: String,
    #[serde(alias = "Description", deserialize_with = "or_default_string")]
    description: String,
}

impl Default for ControlFields {
    fn default() -> Self {
        Self {
            depends: String::new(),
            recommends: String::new(),
            section: DEFAULT_SECTION.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
            homepage: String::new(),
            conflicts: String::new(),
            maintainer: String::new(),
            description: String::new(),
        }
    }
}

impl ControlFields {
    /// Construct an instance with the two required fields set.
    pub fn new(maintainer: impl ToString, description: impl ToString) -> Self {
        Self {
            maintainer: maintainer.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn set_depends(mut self, value: impl ToString) -> Self {
        self.depends = value.to_string();
        self
    }

    pub fn set_recommends(mut self, value: impl ToString) -> Self {
        self.recommends = value.to_string();
        self
    }

    pub fn set_conflicts(mut self, value: impl ToString) -> Self {
        self.conflicts = value.to_string();
        self
    }

    pub fn set_homepage(mut self, value: impl ToString) -> Self {
        self.homepage = value.to_string();
        self
    }

    /// Set the section. Blank values resolve to `main`.
    pub fn set_section(mut self, value: impl ToString) -> Self {
        self.section = normalize(Some(value.to_string()), DEFAULT_SECTION);
        self
    }

    /// Set the priority. Blank values resolve to `optional`.
    pub fn set_priority(mut self, value: impl ToString) -> Self {
        self.priority = normalize(Some(value.to_string()), DEFAULT_PRIORITY);
        self
    }

    pub fn depends(&self) -> &str {
        &self.depends
    }

    pub fn recommends(&self) -> &str {
        &self.recommends
    }

    pub fn conflicts(&self) -> &str {
        &self.conflicts
    }

    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    /// The section, which also names the repository component.
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn priority(&self) -> &str {
        &self.priority
    }

    pub fn maintainer(&self) -> &str {
        &self.maintainer
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Render the text of the `control` file for a package.
    ///
    /// Every field is emitted, blank or not, in [CONTROL_FIELD_ORDER]. The result
    /// is trimmed and ends with exactly one newline.
    pub fn render(&self, meta: &PackageMeta) -> String {
        let mut para = ControlParagraph::default();
        let arch = meta.arch.to_string();

        let values = [
            meta.name.as_str(),
            meta.version.as_str(),
            self.depends.as_str(),
            self.recommends.as_str(),
            self.section.as_str(),
            self.priority.as_str(),
            self.homepage.as_str(),
            self.conflicts.as_str(),
            arch.as_str(),
            INSTALLED_SIZE_PLACEHOLDER,
            self.maintainer.as_str(),
            self.description.as_str(),
        ]
        .map(|v| v.to_string());

        for (name, value) in CONTROL_FIELD_ORDER.iter().zip(values) {
            para.set_field_from_string((*name).into(), value.into());
        }

        format!("{}\n", para.to_string().trim())
    }
}

mod base64_content {
    use {
        base64::{engine::general_purpose::STANDARD, Engine},
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A file to place in a tar archive of a `.deb`.
///
/// Each variant carries the destination `path` and an optional Unix `mode`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum FileSpec {
    /// Inline UTF-8 text.
    #[serde(rename = "text")]
    Text {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
        content: String,
    },

    /// Inline bytes, base64 encoded on the wire.
    #[serde(rename = "binary")]
    Binary {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
        #[serde(with = "base64_content")]
        content: Vec<u8>,
    },

    /// A file read relative to the build working directory.
    #[serde(rename = "file")]
    FromPath {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
        #[serde(rename = "sourcePath")]
        source_path: String,
    },

    /// Content fetched with an HTTP GET at build time.
    #[serde(rename = "url")]
    FromUrl {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
        url: Url,
        #[serde(
            rename = "bearerToken",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        bearer_token: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, Vec<String>>,
    },
}

impl FileSpec {
    /// Construct a text file entry with the default mode.
    pub fn text(path: impl ToString, content: impl ToString) -> Self {
        Self::Text {
            path: path.to_string(),
            mode: None,
            content: content.to_string(),
        }
    }

    /// The destination path within the archive.
    pub fn path(&self) -> &str {
        match self {
            Self::Text { path, .. }
            | Self::Binary { path, .. }
            | Self::FromPath { path, .. }
            | Self::FromUrl { path, .. } => path,
        }
    }

    /// The Unix mode of the archive member, if explicitly set.
    pub fn mode(&self) -> Option<u32> {
        match self {
            Self::Text { mode, .. }
            | Self::Binary { mode, .. }
            | Self::FromPath { mode, .. }
            | Self::FromUrl { mode, .. } => *mode,
        }
    }

    /// Return a copy with the mode set.
    pub fn with_mode(mut self, value: u32) -> Self {
        match &mut self {
            Self::Text { mode, .. }
            | Self::Binary { mode, .. }
            | Self::FromPath { mode, .. }
            | Self::FromUrl { mode, .. } => *mode = Some(value),
        }
        self
    }

    fn collect_problems(&self, label: &str, problems: &mut Vec<String>) {
        if self.path().trim().is_empty() {
            problems.push(format!("{}: path must not be blank", label));
        }

        match self {
            Self::Text { content, .. } if content.trim().is_empty() => {
                problems.push(format!("{}: text content must not be blank", label));
            }
            Self::Binary { content, .. } if content.is_empty() => {
                problems.push(format!("{}: binary content must not be empty", label));
            }
            Self::FromPath { source_path, .. } if source_path.trim().is_empty() => {
                problems.push(format!("{}: sourcePath must not be blank", label));
            }
            _ => {}
        }
    }
}

/// Files of the control and data archives.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DebFiles {
    #[serde(rename = "controlFiles", deserialize_with = "or_default_specs")]
    pub control_files: Vec<FileSpec>,
    #[serde(rename = "dataFiles", deserialize_with = "or_default_specs")]
    pub data_files: Vec<FileSpec>,
}

fn or_default_specs<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<FileSpec>, D::Error> {
    Ok(Option::<Vec<FileSpec>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Full description of a package to build.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageDescriptor {
    pub meta: PackageMeta,
    pub control: ControlFields,
    #[serde(default)]
    pub files: DebFiles,
}

impl PackageDescriptor {
    pub fn new(meta: PackageMeta, control: ControlFields) -> Self {
        Self {
            meta,
            control,
            files: DebFiles::default(),
        }
    }

    /// Parse a descriptor from JSON.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Check every constraint on the descriptor.
    ///
    /// All violations are reported together in [SimpleDebError::Validation].
    pub fn validate(&self) -> Result<()> {
        let mut problems = vec![];

        if self.meta.name.trim().is_empty() {
            problems.push("meta.name must not be blank".to_string());
        }
        if self.meta.version.trim().is_empty() {
            problems.push("meta.version must not be blank".to_string());
        }
        if self.control.maintainer.trim().is_empty() {
            problems.push("control.maintainer must not be blank".to_string());
        }
        if self.control.description.trim().is_empty() {
            problems.push("control.description must not be blank".to_string());
        }

        for (i, spec) in self.files.control_files.iter().enumerate() {
            spec.collect_problems(&format!("files.controlFiles[{}]", i), &mut problems);
        }
        for (i, spec) in self.files.data_files.iter().enumerate() {
            spec.collect_problems(&format!("files.dataFiles[{}]", i), &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SimpleDebError::Validation(problems))
        }
    }

    /// Render the `control` file content.
    pub fn render_control(&self) -> String {
        self.control.render(&self.meta)
    }

    pub fn deb_filename(&self) -> String {
        self.meta.deb_filename()
    }

    pub fn index_only_deb_filename(&self) -> String {
        self.meta.index_only_deb_filename()
    }

    pub fn index_filename(&self) -> String {
        self.meta.index_filename()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> PackageDescriptor {
        PackageDescriptor::new(
            PackageMeta::new("hello", "0.0.1", Architecture::Amd64),
            ControlFields::new("maintainer", "description"),
        )
    }

    #[test]
    fn architecture_names() -> Result<()> {
        assert_eq!(Architecture::Amd64.to_string(), "amd64");
        assert_eq!(Architecture::from_debian_name("arm64")?, Architecture::Arm64);
        assert!(matches!(
            Architecture::from_debian_name("i386"),
            Err(SimpleDebError::UnknownArchitecture(_))
        ));
        assert_eq!(Architecture::from_cpu("x86_64"), Some(Architecture::Amd64));
        assert_eq!(Architecture::from_cpu("aarch64"), Some(Architecture::Arm64));
        assert_eq!(Architecture::from_cpu("riscv64"), None);

        Ok(())
    }

    #[test]
    fn filenames() {
        let d = hello();
        assert_eq!(d.deb_filename(), "hello_0.0.1_amd64.deb");
        assert_eq!(
            d.index_filename(),
            "hello_0.0.1_amd64.simple-deb-4j-index.json"
        );
    }

    #[test]
    fn render_control_prints_all_fields() {
        let d = hello();

        assert_eq!(
            d.render_control(),
            "Package: hello\n\
             Version: 0.0.1\n\
             Depends: \n\
             Recommends: \n\
             Section: main\n\
             Priority: optional\n\
             Homepage: \n\
             Conflicts: \n\
             Architecture: amd64\n\
             Installed-Size: 10\n\
             Maintainer: maintainer\n\
             Description: description\n"
        );
    }

    #[test]
    fn section_and_priority_defaults() {
        let c = ControlFields::new("m", "d").set_section("  ").set_priority("");
        assert_eq!(c.section(), "main");
        assert_eq!(c.priority(), "optional");

        let c = c.set_section("contrib").set_priority("extra");
        assert_eq!(c.section(), "contrib");
        assert_eq!(c.priority(), "extra");
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut d = PackageDescriptor::new(
            PackageMeta::new(" ", "", Architecture::Arm64),
            ControlFields::new("", ""),
        );
        d.files.data_files.push(FileSpec::FromPath {
            path: "".into(),
            mode: None,
            source_path: "".into(),
        });

        match d.validate() {
            Err(SimpleDebError::Validation(problems)) => {
                assert_eq!(problems.len(), 6);
                assert!(problems[0].contains("meta.name"));
                assert!(problems[5].contains("sourcePath"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        assert!(hello().validate().is_ok());
    }

    #[test]
    fn deserialize_wire_format() -> Result<()> {
        let json = r##"{
            "meta": {"name": "hello", "version": "1.0", "arch": "arm64"},
            "control": {
                "Depends": "libc6",
                "section": "",
                "priority": null,
                "maintainer": "me",
                "description": "desc",
                "unknown": true
            },
            "files": {
                "controlFiles": [
                    {"type": "text", "path": "postinst", "content": "#!/bin/sh", "mode": 493}
                ],
                "dataFiles": [
                    {"type": "binary", "path": "usr/share/x", "content": "aGVsbG8="},
                    {"type": "file", "path": "usr/bin/x", "sourcePath": "build/x"},
                    {"type": "url", "path": "usr/lib/y", "url": "https://example.com/y",
                     "bearerToken": "t", "headers": {"X-A": ["1", "2"]}}
                ]
            }
        }"##;

        let d = PackageDescriptor::from_json(json.as_bytes())?;

        assert_eq!(d.meta.arch, Architecture::Arm64);
        assert_eq!(d.control.depends(), "libc6");
        assert_eq!(d.control.section(), "main");
        assert_eq!(d.control.priority(), "optional");
        assert_eq!(d.files.control_files[0].mode(), Some(0o755));
        assert_eq!(
            d.files.data_files[0],
            FileSpec::Binary {
                path: "usr/share/x".into(),
                mode: None,
                content: b"hello".to_vec(),
            }
        );
        match &d.files.data_files[2] {
            FileSpec::FromUrl {
                url,
                bearer_token,
                headers,
                ..
            } => {
                assert_eq!(url.as_str(), "https://example.com/y");
                assert_eq!(bearer_token.as_deref(), Some("t"));
                assert_eq!(headers["X-A"], vec!["1".to_string(), "2".to_string()]);
            }
            other => panic!("unexpected spec {:?}", other),
        }

        let reparsed = PackageDescriptor::from_json(&serde_json::to_vec(&d)?)?;
        assert_eq!(reparsed, d);

        Ok(())
    }

    #[test]
    fn unknown_architecture_rejected() {
        let json = r#"{"meta": {"name": "a", "version": "1", "arch": "i386"},
            "control": {"maintainer": "m", "description": "d"}}"#;

        assert!(PackageDescriptor::from_json(json.as_bytes()).is_err());
    }
}
