// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::repository::release::ChecksumType,
    digest::Digest,
    libflate::gzip::{Decoder, EncodeOptions, Encoder, HeaderBuilder},
    serde::{Deserialize, Serialize},
    std::io::{Read, Write},
};

/// Holds hex digests of every [ChecksumType] for one piece of content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiContentDigest {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

impl MultiContentDigest {
    /// Obtain the hex digest for a given [ChecksumType].
    pub fn digest_from_checksum(&self, checksum: ChecksumType) -> &str {
        match checksum {
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Sha256 => &self.sha256,
            ChecksumType::Sha512 => &self.sha512,
        }
    }
}

/// A content digester that simultaneously computes multiple digest types.
#[derive(Default)]
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    sha512: sha2::Sha512,
    size: u64,
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
        self.size += data.len() as u64;
    }

    /// Finish digesting content.
    ///
    /// Consumes the instance and returns the number of bytes digested and a
    /// [MultiContentDigest] holding all the digests.
    pub fn finish(self) -> (u64, MultiContentDigest) {
        (
            self.size,
            MultiContentDigest {
                md5: hex::encode(self.md5.finalize()),
                sha1: hex::encode(self.sha1.finalize()),
                sha256: hex::encode(self.sha256.finalize()),
                sha512: hex::encode(self.sha512.finalize()),
            },
        )
    }
}

impl Write for MultiDigester {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Content plus its size and digests.
///
/// Instances are created once by hashing a byte blob and never change afterwards.
/// The content itself is carried for writing but is not part of the serialized form.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ContentIntegrity {
    #[serde(skip)]
    content: Vec<u8>,
    #[serde(default)]
    path: Option<String>,
    size: u64,
    md5: String,
    sha1: String,
    sha256: String,
    sha512: String,
}

impl ContentIntegrity {
    /// Hash content destined for a repository path.
    pub fn of(content: impl Into<Vec<u8>>, path: impl ToString) -> Self {
        Self::new(content.into(), Some(path.to_string()))
    }

    /// Hash content that isn't associated with a path.
    pub fn of_unnamed(content: impl Into<Vec<u8>>) -> Self {
        Self::new(content.into(), None)
    }

    fn new(content: Vec<u8>, path: Option<String>) -> Self {
        let mut digester = MultiDigester::default();
        digester.update(&content);
        let (size, digests) = digester.finish();

        Self {
            content,
            path,
            size,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
            sha512: digests.sha512,
        }
    }

    /// The hashed content.
    ///
    /// Empty for instances that were deserialized.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Drop the hashed content, keeping size and digests.
    pub fn without_content(mut self) -> Self {
        self.content = vec![];
        self
    }

    /// Consume self, returning the hashed content.
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// The repository-relative path. Empty if unnamed.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn md5(&self) -> &str {
        &self.md5
    }

    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn sha512(&self) -> &str {
        &self.sha512
    }

    /// Obtain the hex digest of a given flavor.
    pub fn digest_hex(&self, checksum: ChecksumType) -> &str {
        match checksum {
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Sha256 => &self.sha256,
            ChecksumType::Sha512 => &self.sha512,
        }
    }
}

/// Gzip compress data into a writer, returning the writer.
///
/// The gzip header carries a zero modification time so identical input always
/// produces identical output.
pub fn gzip_compress_into<W: Write>(writer: W, data: &[u8]) -> std::io::Result<W> {
    let options =
        EncodeOptions::new().header(HeaderBuilder::new().modification_time(0).finish());
    let mut encoder = Encoder::with_options(writer, options)?;
    encoder.write_all(data)?;

    encoder.finish().into_result()
}

/// Gzip compress data.
pub fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    gzip_compress_into(Vec::new(), data)
}

/// Decompress gzip data.
pub fn gzip_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = Decoder::new(data)?;
    let mut res = vec![];
    decoder.read_to_end(&mut res)?;

    Ok(res)
}
