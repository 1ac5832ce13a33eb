// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {std::path::PathBuf, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum SimpleDebError {
    #[error("package descriptor is invalid: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("unsupported architecture: {0}")]
    UnknownArchitecture(String),

    #[error("unable to read source file {0}: {1:?}")]
    SourceRead(PathBuf, std::io::Error),

    #[error("unable to fetch {0}: {1}")]
    Fetch(String, String),

    #[error("archive construction error: {0:?}")]
    Archive(std::io::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("regex error: {0:?}")]
    Regex(#[from] regex::Error),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("required field missing in control file: {0}")]
    ControlFieldMissing(&'static str),

    #[error("member not found in .deb archive: {0}")]
    DebMemberMissing(&'static str),

    #[error("repository I/O error on path {0}: {1:?}")]
    RepositoryIoPath(String, std::io::Error),

    #[error("failed to write repository paths: {}", .0.join(", "))]
    RepositoryWriteFailures(Vec<String>),

    #[error("release signing error: {0}")]
    Signing(String),

    #[cfg(feature = "signing")]
    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, SimpleDebError>;
