// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! S3 backed repository reading and writing. */

use {
    crate::{
        descriptor::INDEX_FILENAME_SUFFIX,
        error::{Result, SimpleDebError},
        index::PackageIndexEntry,
        repository::{RepositoryReader, RepositoryWrite, RepositoryWriter},
    },
    async_trait::async_trait,
    base64::{engine::general_purpose::STANDARD, Engine},
    digest::Digest,
    futures::{AsyncRead, AsyncReadExt as FuturesAsyncReadExt, StreamExt},
    log::debug,
    rusoto_core::{ByteStream, Region},
    rusoto_s3::{GetObjectRequest, ListObjectsV2Request, PutObjectRequest, S3Client, S3},
    std::{borrow::Cow, collections::BTreeMap, pin::Pin},
    tokio::io::AsyncReadExt as TokioAsyncReadExt,
};

fn s3_error(path: impl ToString, e: impl std::fmt::Debug) -> SimpleDebError {
    SimpleDebError::RepositoryIoPath(
        path.to_string(),
        std::io::Error::new(std::io::ErrorKind::Other, format!("S3 error: {:?}", e)),
    )
}

fn normalize_prefix(prefix: Option<&str>) -> Option<String> {
    prefix
        .map(|x| x.trim_matches('/').to_string())
        .filter(|x| !x.is_empty())
}

/// Parse a `s3://bucket/prefix` location into its bucket and optional key prefix.
///
/// Returns `None` if the string isn't an `s3://` URL or names no bucket.
pub fn parse_s3_url(s: &str) -> Option<(String, Option<String>)> {
    let rest = s.strip_prefix("s3://")?;

    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, normalize_prefix(Some(prefix))),
        None => (rest, None),
    };

    if bucket.is_empty() {
        None
    } else {
        Some((bucket.to_string(), prefix))
    }
}

/// Resolve the codename of an index document key.
///
/// The codename is the first path segment after the prefix. Keys directly
/// below the prefix belong to no codename.
fn key_codename<'a>(key_prefix: Option<&str>, key: &'a str) -> Option<&'a str> {
    let relative = match key_prefix {
        Some(prefix) => key.strip_prefix(prefix)?.strip_prefix('/')?,
        None => key,
    };

    match relative.split_once('/') {
        Some((codename, _)) if !codename.is_empty() => Some(codename),
        _ => None,
    }
}

/// Reads package index documents stored in an S3 bucket.
pub struct S3IndexReader {
    client: S3Client,
    bucket: String,
    key_prefix: Option<String>,
    threads: usize,
}

impl S3IndexReader {
    /// Create a new reader bound to a named bucket with optional key prefix.
    pub fn new(region: Region, bucket: impl ToString, key_prefix: Option<&str>) -> Self {
        Self {
            client: S3Client::new(region),
            bucket: bucket.to_string(),
            key_prefix: normalize_prefix(key_prefix),
            threads: 1,
        }
    }

    /// Create a reader from a `s3://bucket/prefix` location.
    ///
    /// The region is resolved from the environment, as other AWS clients do.
    pub fn from_url(url: &str) -> Option<Self> {
        let (bucket, prefix) = parse_s3_url(url)?;

        Some(Self::new(Region::default(), bucket, prefix.as_deref()))
    }

    /// Set the maximum number of concurrent object fetches.
    pub fn set_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// List every index document key below the prefix.
    async fn list_index_keys(&self) -> Result<Vec<String>> {
        let mut keys = vec![];
        let mut continuation_token = None;

        loop {
            let req = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: self.key_prefix.as_ref().map(|p| format!("{}/", p)),
                continuation_token: continuation_token.take(),
                ..Default::default()
            };

            let output = self
                .client
                .list_objects_v2(req)
                .await
                .map_err(|e| s3_error(&self.bucket, e))?;

            keys.extend(
                output
                    .contents
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|o| o.key)
                    .filter(|k| k.ends_with(INDEX_FILENAME_SUFFIX)),
            );

            match (output.is_truncated, output.next_continuation_token) {
                (Some(true), Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        keys.sort();

        Ok(keys)
    }

    async fn get_object(&self, key: String) -> Result<Vec<u8>> {
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: key.clone(),
            ..Default::default()
        };

        let output = self
            .client
            .get_object(req)
            .await
            .map_err(|e| s3_error(&key, e))?;

        let mut data = vec![];
        if let Some(body) = output.body {
            body.into_async_read()
                .read_to_end(&mut data)
                .await
                .map_err(|e| SimpleDebError::RepositoryIoPath(key.clone(), e))?;
        }

        debug!("fetched {} ({} bytes)", key, data.len());

        Ok(data)
    }
}

#[async_trait]
impl RepositoryReader for S3IndexReader {
    async fn read_index_metadata(&self) -> Result<BTreeMap<String, Vec<PackageIndexEntry>>> {
        let keys = self
            .list_index_keys()
            .await?
            .into_iter()
            .filter_map(|key| {
                key_codename(self.key_prefix.as_deref(), &key)
                    .map(|codename| (codename.to_string(), key.clone()))
            })
            .collect::<Vec<_>>();

        let mut fs = futures::stream::iter(keys.into_iter().map(|(codename, key)| async move {
            let data = self.get_object(key).await?;
            Ok::<_, SimpleDebError>((codename, PackageIndexEntry::from_json(&data)?))
        }))
        .buffered(self.threads);

        let mut res: BTreeMap<String, Vec<PackageIndexEntry>> = BTreeMap::new();

        while let Some(item) = fs.next().await {
            let (codename, entry) = item?;
            res.entry(codename).or_default().push(entry);
        }

        Ok(res)
    }
}

/// Writes repository files into an S3 bucket.
pub struct S3RepositoryWriter {
    client: S3Client,
    bucket: String,
    key_prefix: Option<String>,
}

impl S3RepositoryWriter {
    /// Create a new S3 writer bound to a named bucket with optional key prefix.
    pub fn new(region: Region, bucket: impl ToString, key_prefix: Option<&str>) -> Self {
        Self {
            client: S3Client::new(region),
            bucket: bucket.to_string(),
            key_prefix: normalize_prefix(key_prefix),
        }
    }

    /// Create a writer from a `s3://bucket/prefix` location.
    ///
    /// The region is resolved from the environment, as other AWS clients do.
    pub fn from_url(url: &str) -> Option<Self> {
        let (bucket, prefix) = parse_s3_url(url)?;

        Some(Self::new(Region::default(), bucket, prefix.as_deref()))
    }

    /// Compute the S3 key name given a repository relative path.
    pub fn path_to_key(&self, path: &str) -> String {
        path_to_key(self.key_prefix.as_deref(), path)
    }
}

fn path_to_key(key_prefix: Option<&str>, path: &str) -> String {
    if let Some(prefix) = key_prefix {
        format!("{}/{}", prefix, path.trim_matches('/'))
    } else {
        path.trim_matches('/').to_string()
    }
}

#[async_trait]
impl RepositoryWriter for S3RepositoryWriter {
    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        mut reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<RepositoryWrite<'path>> {
        let mut buf = vec![];
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SimpleDebError::RepositoryIoPath(path.to_string(), e))?;

        let bytes_written = buf.len() as u64;
        let content_md5 = STANDARD.encode(md5::Md5::digest(&buf));

        let req = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: self.path_to_key(path.as_ref()),
            body: Some(ByteStream::from(buf)),
            content_md5: Some(content_md5),
            content_length: Some(bytes_written as i64),
            ..Default::default()
        };

        match self.client.put_object(req).await {
            Ok(_) => Ok(RepositoryWrite {
                path,
                bytes_written,
            }),
            Err(e) => Err(s3_error(path.as_ref(), e)),
        }
    }
}
