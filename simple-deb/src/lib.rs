// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Building Debian packages and APT repositories.

This crate produces `.deb` binary packages from declarative descriptors and
aggregates built packages into the metadata of an APT repository.

# Goals

## Determinism and Reproducibility

Given the same descriptor, a `.deb` is byte-for-byte identical across builds
once a modification time is pinned via [deb::builder::DebBuilder::set_mtime()].
Repository metadata is a pure function of the indexed packages and the
publication date.

## No Rebuilds for Republishing

Every built package has a small JSON document, a [index::PackageIndexEntry],
persisted next to it. Repository metadata is regenerated from those documents
alone, so packages never need to be rebuilt or downloaded to publish.

# A Tour of Functionality

A package is described by [descriptor::PackageDescriptor]: metadata
([descriptor::PackageMeta]), control fields ([descriptor::ControlFields]) and
the files to place in the control and data archives ([descriptor::FileSpec]).
Descriptors are `serde` types and are usually deserialized from JSON.

[deb::builder::DebBuilder] turns a descriptor into `.deb` bytes, resolving
files from the local filesystem or through a [fetch::UrlFetcher]. The
[deb::reader] module reads built archives back.

Control paragraphs are modeled by [control::ControlParagraph]. Content digests
and gzip helpers live in [io].

[packages::PackagesIndex] renders `Packages` files and
[repository::builder::Repository] aggregates index entries by codename,
component and architecture into `Packages`, `Packages.gz` and `Release` files.
[repository::publish_repository()] drives a [repository::RepositoryReader] and a
[repository::RepositoryWriter]. Filesystem and S3 (feature `s3`) implementations
of those traits are provided. `Release` files are signed through a
[repository::ReleaseSigner]; the `signing` feature provides a PGP one.

# Crate Features

`http` (default) enables [fetch::HttpFetcher] for `url` file specs.

`s3` (default) enables the [repository::s3] module.

`signing` (default) enables the `signing` module with a PGP backed
[repository::ReleaseSigner].
*/

pub mod control;
pub mod deb;
pub mod descriptor;
pub mod error;
pub mod fetch;
pub mod index;
pub mod io;
pub mod packages;
pub mod repository;
#[cfg(feature = "signing")]
pub mod signing;
