// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Interfaces for .deb package files.

A `.deb` is an `ar` archive holding exactly three members, in order:

1. `debian-binary`, containing `2.0\n`.
2. `control.tar.gz`, the package metadata with the `control` file last.
3. `data.tar.gz`, the files installed by the package.

[builder::DebBuilder] writes these archives and [reader::BinaryPackageReader]
reads them back.
*/

pub mod builder;
pub mod reader;

/// Content of the `debian-binary` member.
pub const DEBIAN_BINARY: &[u8] = b"2.0\n";

/// Name of the `debian-binary` member.
pub const DEBIAN_BINARY_MEMBER: &str = "debian-binary";

/// Name of the control archive member.
pub const CONTROL_TAR_MEMBER: &str = "control.tar.gz";

/// Name of the data archive member.
pub const DATA_TAR_MEMBER: &str = "data.tar.gz";
