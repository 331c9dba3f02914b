use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::RANGE;
use tracing::debug;

use crate::part::{Part, SourceInfo, SourceKind};
use crate::store::USER_AGENT;

use super::{alias_for, base_name, check_alias_arity, SourceError, TransferSource};

const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP origin over pre-signed or public URLs. The server must honor
/// `Range` requests; each part is fetched with a single bounded GET.
#[derive(Debug)]
pub struct HttpSource {
    sources: Vec<SourceInfo>,
    urls: Vec<String>,
    client: Client,
}

impl HttpSource {
    pub fn open(
        urls: Vec<String>,
        target_aliases: Vec<String>,
        block_size: u64,
    ) -> Result<Self, SourceError> {
        if urls.is_empty() {
            return Err(SourceError::Empty);
        }
        check_alias_arity(&target_aliases, urls.len())?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()?;

        let mut sources = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let size = probe_size(&client, url)?;
            let alias = alias_for(&target_aliases, index)
                .unwrap_or_else(|| default_alias(url));
            debug!("enumerated http source {url} size={size} alias={alias}");
            sources.push(SourceInfo::new(
                url.clone(),
                Some(alias),
                size,
                block_size,
                SourceKind::HttpRange,
            ));
        }

        Ok(Self {
            sources,
            urls,
            client,
        })
    }

    /// Splits the URL list into independent pipeline batches.
    pub fn open_pipelines(
        urls: Vec<String>,
        target_aliases: Vec<String>,
        block_size: u64,
        files_per_pipeline: usize,
    ) -> Result<Vec<Self>, SourceError> {
        if urls.is_empty() {
            return Err(SourceError::Empty);
        }
        check_alias_arity(&target_aliases, urls.len())?;
        let paired: Vec<(String, Option<String>)> = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| (url, alias_for(&target_aliases, i)))
            .collect();
        crate::part::split_for_pipelines(paired, files_per_pipeline)
            .into_iter()
            .map(|batch| {
                let (urls, aliases): (Vec<_>, Vec<Option<String>>) = batch.into_iter().unzip();
                let aliases = aliases.into_iter().flatten().collect();
                Self::open(urls, aliases, block_size)
            })
            .collect()
    }
}

impl TransferSource for HttpSource {
    fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    fn read_part(&self, part: &Part, buf: &mut [u8]) -> Result<(), SourceError> {
        let url = &self.urls[part.source_index];
        let end = part.offset + part.bytes_to_read - 1;
        let resp = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={}-{end}", part.offset))
            .send()?;
        let status = resp.status();
        if status.as_u16() != 206 {
            return Err(SourceError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let body = resp.bytes()?;
        if body.len() != buf.len() {
            return Err(SourceError::ShortRead {
                offset: part.offset,
                wanted: buf.len(),
                got: body.len(),
            });
        }
        buf.copy_from_slice(&body);
        Ok(())
    }
}

fn probe_size(client: &Client, url: &str) -> Result<u64, SourceError> {
    let resp = client.head(url).send()?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    // Read the header directly; the body length hint of a HEAD response is
    // always zero.
    resp.headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| SourceError::UnknownSize(url.to_string()))
}

fn default_alias(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    base_name(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_defaults_to_url_basename_without_query() {
        assert_eq!(default_alias("https://h/c/blob.bin?sig=abc"), "blob.bin");
        assert_eq!(default_alias("https://h/deep/path/x"), "x");
    }

    #[test]
    fn empty_url_list_is_rejected() {
        let err = HttpSource::open(Vec::new(), Vec::new(), 4).expect_err("empty");
        assert!(matches!(err, SourceError::Empty));
    }
}
