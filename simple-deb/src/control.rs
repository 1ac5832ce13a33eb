// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Defines primitives in control files.

Control files are the `Name: value` documents used throughout Debian packaging:
the `control` member of a `.deb`, the stanzas of a `Packages` index and the
header of a `Release` file all share the syntax.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>
for the canonical source of truth for how control files work.
*/

use {
    crate::error::Result,
    regex::Regex,
    std::borrow::Cow,
};

/// A field in a control file.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlField<'a> {
    name: Cow<'a, str>,
    value: Cow<'a, str>,
}

impl<'a> ControlField<'a> {
    /// Construct an instance from a field name and value.
    pub fn new(name: Cow<'a, str>, value: Cow<'a, str>) -> Self {
        Self { name, value }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Obtain the value as a [&str].
    pub fn value_str(&self) -> &str {
        self.value.as_ref()
    }
}

/// Renders as `Name: value` plus a newline. An empty value keeps the `Name: ` prefix.
impl<'a> ToString for ControlField<'a> {
    fn to_string(&self) -> String {
        format!("{}: {}\n", self.name, self.value_str())
    }
}

/// A paragraph in a control file.
///
/// A paragraph is an ordered series of control fields. Iteration and serialization
/// follow insertion order, which is significant for the documents this crate emits.
///
/// Field names are case insensitive on read and case preserving on set.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlParagraph<'a> {
    fields: Vec<ControlField<'a>>,
}

impl<'a> ControlParagraph<'a> {
    /// Set the value of a field via a [ControlField].
    ///
    /// If a field with the same name (case insensitive compare) already exists, the old value
    /// will be replaced by the incoming value, which moves to the end of the paragraph.
    pub fn set_field(&mut self, field: ControlField<'a>) {
        self.fields
            .retain(|cf| cf.name.to_lowercase() != field.name.to_lowercase());
        self.fields.push(field);
    }

    /// Set the value of a field defined via strings.
    pub fn set_field_from_string(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        self.set_field(ControlField::new(name, value));
    }

    /// Set a field only if its value has non-whitespace content.
    pub fn set_field_if_not_blank(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        if !value.trim().is_empty() {
            self.set_field_from_string(name, value);
        }
    }

    /// Whether a named field is present in this paragraph.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in this paragraph.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField<'a>> {
        self.fields.iter()
    }

    /// Obtain the field with a given name in this paragraph.
    pub fn field(&self, name: &str) -> Option<&'_ ControlField<'a>> {
        self.fields
            .iter()
            .find(|f| f.name.as_ref().to_lowercase() == name.to_lowercase())
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Parse a paragraph, recognizing only the named fields.
    ///
    /// A recognized field starts at the beginning of a line with `<Name>: ` and its
    /// value extends up to the line break preceding the next recognized field. Values
    /// can therefore span multiple lines and contain text that looks like an unknown
    /// field. Content before the first recognized field is ignored.
    pub fn parse_known_fields(data: &str, names: &[&str]) -> Result<ControlParagraph<'static>> {
        let pattern = format!(
            "(?m)^({}): ",
            names
                .iter()
                .map(|name| regex::escape(name))
                .collect::<Vec<_>>()
                .join("|")
        );
        let re = Regex::new(&pattern)?;

        let matches = re.captures_iter(data).collect::<Vec<_>>();

        let mut para = ControlParagraph::default();

        for (i, captures) in matches.iter().enumerate() {
            let (whole, name) = match (captures.get(0), captures.get(1)) {
                (Some(whole), Some(name)) => (whole, name),
                _ => continue,
            };

            let end = matches
                .get(i + 1)
                .and_then(|c| c.get(0))
                .map(|m| m.start())
                .unwrap_or(data.len());

            let value = data[whole.end()..end].trim_end_matches('\n');

            para.set_field_from_string(
                name.as_str().to_string().into(),
                value.to_string().into(),
            );
        }

        Ok(para)
    }
}

/// Renders every field in order. No blank line follows the final field.
impl<'a> ToString for ControlParagraph<'a> {
    fn to_string(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("")
    }
}
