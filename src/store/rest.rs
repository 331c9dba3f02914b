use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use tracing::{debug, warn};

use super::{BlobEntry, BlobStore, PageWriteAction, StoreError, USER_AGENT};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Blob service client speaking the REST dialect of the store. Credential
/// material arrives pre-built as a SAS-style query string; this client only
/// moves bytes. The inner transport is an immutable `Client` behind a swap:
/// `reset_client` replaces it wholesale, which other workers observe
/// atomically on their next call.
pub struct RestBlobStore {
    base_url: String,
    sas_pairs: Vec<(String, String)>,
    timeout: Duration,
    client: RwLock<Arc<Client>>,
}

impl RestBlobStore {
    pub fn new(base_url: &str, sas_query: Option<&str>) -> Result<Self, StoreError> {
        let sas_pairs = sas_query
            .unwrap_or("")
            .split('&')
            .filter(|kv| !kv.is_empty())
            .map(|kv| match kv.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (kv.to_string(), String::new()),
            })
            .collect();
        let client = build_client(DEFAULT_TIMEOUT)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            sas_pairs,
            timeout: DEFAULT_TIMEOUT,
            client: RwLock::new(Arc::new(client)),
        })
    }

    fn client(&self) -> Arc<Client> {
        self.client.read().unwrap().clone()
    }

    fn object_url(&self, container: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, container, name)
    }

    fn container_url(&self, container: &str) -> String {
        format!("{}/{}", self.base_url, container)
    }

    fn query<'a>(&self, extra: &[(&'a str, String)]) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        pairs.extend(self.sas_pairs.iter().cloned());
        pairs
    }
}

impl BlobStore for RestBlobStore {
    fn create_page_blob(&self, container: &str, name: &str, size: u64) -> Result<(), StoreError> {
        let resp = self
            .client()
            .put(self.object_url(container, name))
            .query(&self.query(&[]))
            .header("x-ms-blob-type", "PageBlob")
            .header("x-ms-blob-content-length", size)
            .send()?;
        check("create_page_blob", resp).map(drop)
    }

    fn put_block(
        &self,
        container: &str,
        name: &str,
        block_id: &str,
        data: &[u8],
        content_md5: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut req = self
            .client()
            .put(self.object_url(container, name))
            .query(&self.query(&[("comp", "block".to_string()), ("blockid", block_id.to_string())]))
            .body(data.to_vec());
        if let Some(md5) = content_md5 {
            req = req.header("Content-MD5", md5);
        }
        check("put_block", req.send()?).map(drop)
    }

    fn put_block_list(
        &self,
        container: &str,
        name: &str,
        block_ids: &[String],
    ) -> Result<(), StoreError> {
        let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
        for id in block_ids {
            body.push_str("<Latest>");
            body.push_str(id);
            body.push_str("</Latest>");
        }
        body.push_str("</BlockList>");

        let resp = self
            .client()
            .put(self.object_url(container, name))
            .query(&self.query(&[("comp", "blocklist".to_string())]))
            .body(body)
            .send()?;
        check("put_block_list", resp).map(drop)
    }

    fn put_page(
        &self,
        container: &str,
        name: &str,
        start: u64,
        end: u64,
        action: PageWriteAction,
        data: &[u8],
        content_md5: Option<&str>,
    ) -> Result<(), StoreError> {
        let write_kind = match action {
            PageWriteAction::Update => "update",
            PageWriteAction::Clear => "clear",
        };
        let mut req = self
            .client()
            .put(self.object_url(container, name))
            .query(&self.query(&[("comp", "page".to_string())]))
            .header("x-ms-range", format!("bytes={start}-{end}"))
            .header("x-ms-page-write", write_kind);
        if matches!(action, PageWriteAction::Update) {
            req = req.body(data.to_vec());
        }
        if let Some(md5) = content_md5 {
            req = req.header("Content-MD5", md5);
        }
        check("put_page", req.send()?).map(drop)
    }

    fn get_blob_range(
        &self,
        container: &str,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client()
            .get(self.object_url(container, name))
            .query(&self.query(&[]))
            .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
            .send()?;
        let resp = check("get_blob_range", resp)?;
        Ok(resp.bytes()?.to_vec())
    }

    fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<BlobEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut marker = String::new();
        loop {
            let mut params = vec![
                ("restype", "container".to_string()),
                ("comp", "list".to_string()),
                ("prefix", prefix.to_string()),
            ];
            if !marker.is_empty() {
                params.push(("marker", marker.clone()));
            }
            let resp = self
                .client()
                .get(self.container_url(container))
                .query(&self.query(&params))
                .send()?;
            let body = check("list_blobs", resp)?.text()?;
            entries.extend(parse_blob_list(&body));
            match tag_text(&body, "NextMarker") {
                Some(next) if !next.trim().is_empty() => marker = next.trim().to_string(),
                _ => break,
            }
        }
        debug!("listed {} blobs under {container}/{prefix}", entries.len());
        Ok(entries)
    }

    fn reset_client(&self) {
        match build_client(self.timeout) {
            Ok(client) => {
                *self.client.write().unwrap() = Arc::new(client);
                debug!("http client reset");
            }
            Err(err) => warn!("http client reset failed, keeping previous client: {err}"),
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client, StoreError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

fn check(operation: &'static str, resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status.as_u16() {
        404 => Err(StoreError::NotFound(resp.url().path().to_string())),
        409 | 412 => Err(StoreError::CommitConflict(resp.url().path().to_string())),
        code => Err(StoreError::Status {
            operation,
            status: code,
        }),
    }
}

fn parse_blob_list(xml: &str) -> Vec<BlobEntry> {
    let mut entries = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Blob>") {
        let after = &rest[start + "<Blob>".len()..];
        let Some(end) = after.find("</Blob>") else {
            break;
        };
        let body = &after[..end];
        if let Some(name) = tag_text(body, "Name") {
            let size = tag_text(body, "Content-Length")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            entries.push(BlobEntry {
                name: name.to_string(),
                size,
            });
        }
        rest = &after[end + "</Blob>".len()..];
    }
    entries
}

fn tag_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_names_and_sizes() {
        let xml = "<EnumerationResults><Blobs>\
            <Blob><Name>a.bin</Name><Properties><Content-Length>10</Content-Length></Properties></Blob>\
            <Blob><Name>dir/b.bin</Name><Properties><Content-Length>2048</Content-Length></Properties></Blob>\
            </Blobs><NextMarker/></EnumerationResults>";
        let entries = parse_blob_list(xml);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.bin");
        assert_eq!(entries[0].size, 10);
        assert_eq!(entries[1].name, "dir/b.bin");
        assert_eq!(entries[1].size, 2048);
    }

    #[test]
    fn tolerates_blob_without_size() {
        let xml = "<Blobs><Blob><Name>x</Name></Blob></Blobs>";
        let entries = parse_blob_list(xml);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 0);
    }

    #[test]
    fn sas_query_is_split_into_pairs() {
        let store = RestBlobStore::new("http://localhost:10000/acct/", Some("sv=2021&sig=abc"))
            .expect("client");
        assert_eq!(store.base_url, "http://localhost:10000/acct");
        assert_eq!(
            store.sas_pairs,
            vec![("sv".to_string(), "2021".to_string()), ("sig".to_string(), "abc".to_string())]
        );
    }
}
