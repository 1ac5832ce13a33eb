// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fetching remote file content for `url` file specs. */

use {
    crate::error::{Result, SimpleDebError},
    std::collections::BTreeMap,
    url::Url,
};

/// A request for the content of a URL.
#[derive(Clone, Debug)]
pub struct FetchRequest<'a> {
    pub url: &'a Url,
    pub bearer_token: Option<&'a str>,
    pub headers: &'a BTreeMap<String, Vec<String>>,
}

/// Resolves URLs to their content.
///
/// Implementations must fail when the server reports an unsuccessful status or
/// when the response body is empty.
pub trait UrlFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<u8>>;
}

/// A [UrlFetcher] that refuses every request.
///
/// Useful for builds that must not touch the network.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineFetcher;

impl UrlFetcher for OfflineFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<u8>> {
        Err(SimpleDebError::Fetch(
            request.url.to_string(),
            "network access is disabled".to_string(),
        ))
    }
}

#[cfg(feature = "http")]
mod http {
    use {
        super::*,
        log::debug,
        reqwest::{
            blocking::{Client, ClientBuilder},
            header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION},
        },
    };

    /// Obtain an HTTP client, taking proxy environment variables into account.
    pub fn get_http_client() -> reqwest::Result<Client> {
        let mut builder = ClientBuilder::new();

        for (key, value) in std::env::vars() {
            let key = key.to_lowercase();
            if key.ends_with("_proxy") {
                let end = key.len() - "_proxy".len();
                let schema = &key[..end];

                if let Ok(url) = Url::parse(&value) {
                    if let Some(Ok(proxy)) = match schema {
                        "http" => Some(reqwest::Proxy::http(url.as_str())),
                        "https" => Some(reqwest::Proxy::https(url.as_str())),
                        _ => None,
                    } {
                        builder = builder.proxy(proxy);
                    }
                }
            }
        }

        builder.build()
    }

    /// A [UrlFetcher] performing blocking HTTP GET requests.
    #[derive(Clone, Debug)]
    pub struct HttpFetcher {
        client: Client,
    }

    impl HttpFetcher {
        pub fn new() -> Result<Self> {
            Ok(Self {
                client: get_http_client()?,
            })
        }

        /// Construct an instance from an existing client.
        pub fn from_client(client: Client) -> Self {
            Self { client }
        }
    }

    fn request_headers(request: &FetchRequest<'_>) -> Result<HeaderMap> {
        let fetch_error =
            |e: &dyn std::fmt::Display| SimpleDebError::Fetch(request.url.to_string(), e.to_string());

        let mut headers = HeaderMap::new();

        for (name, values) in request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| fetch_error(&e))?;

            for value in values {
                headers.append(
                    name.clone(),
                    HeaderValue::from_str(value).map_err(|e| fetch_error(&e))?,
                );
            }
        }

        if let Some(token) = request.bearer_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| fetch_error(&e))?,
            );
        }

        Ok(headers)
    }

    impl UrlFetcher for HttpFetcher {
        fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<u8>> {
            debug!("fetching {}", request.url);

            let res = self
                .client
                .get(request.url.clone())
                .headers(request_headers(request)?)
                .send()
                .map_err(|e| SimpleDebError::Fetch(request.url.to_string(), e.to_string()))?;

            let status = res.status();
            if !status.is_success() {
                return Err(SimpleDebError::Fetch(
                    request.url.to_string(),
                    format!("HTTP status {}", status),
                ));
            }

            let body = res
                .bytes()
                .map_err(|e| SimpleDebError::Fetch(request.url.to_string(), e.to_string()))?;

            if body.is_empty() {
                return Err(SimpleDebError::Fetch(
                    request.url.to_string(),
                    "empty response body".to_string(),
                ));
            }

            Ok(body.to_vec())
        }
    }

}

#[cfg(feature = "http")]
pub use http::{get_http_client, HttpFetcher};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_fetcher_refuses() -> Result<()> {
        let url = Url::parse("https://example.com/x")?;
        let headers = BTreeMap::new();

        let res = OfflineFetcher.fetch(&FetchRequest {
            url: &url,
            bearer_token: None,
            headers: &headers,
        });

        match res {
            Err(SimpleDebError::Fetch(u, _)) => assert_eq!(u, "https://example.com/x"),
            other => panic!("unexpected result: {:?}", other),
        }

        Ok(())
    }
}
