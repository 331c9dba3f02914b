//! Shared test infrastructure for transfer tests.
//!
//! Provides the canonical test corpus (1 MiB files of 0x01 bytes, with and
//! without a 123-byte tail), a collecting observer, and a minimal local HTTP
//! server with range support for the HTTP source tests.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytebarge::part::WorkerResult;
use bytebarge::pipeline::{TransferObserver, TransferParams};
use bytebarge::retry::RetryPolicy;

pub const MIB: usize = 1024 * 1024;

/// A 1 MiB + 123 byte file of 0x01 bytes; size is deliberately not a
/// multiple of the block size or the page size.
pub fn create_file(dir: &Path, name: &str) -> PathBuf {
    let mut data = vec![1u8; MIB];
    data.extend_from_slice(&[1u8; 123]);
    let path = dir.join(name);
    std::fs::write(&path, &data).expect("write test file");
    path
}

/// A 1 MiB file of 0x01 bytes; page-aligned.
pub fn create_page_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![1u8; MIB]).expect("write page file");
    path
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        jitter_pct: 0,
    }
}

pub fn params(block_size: u64) -> TransferParams {
    TransferParams {
        block_size,
        num_readers: 4,
        num_workers: 4,
        pool_size: 8,
        md5: false,
        retry: fast_retry(),
    }
}

/// Observer that records every result together with the reported buffer
/// level, for asserting delivery and pool bounds.
#[derive(Default)]
pub struct CollectingObserver {
    pub seen: Mutex<Vec<(WorkerResult, u64, usize)>>,
}

impl TransferObserver for CollectingObserver {
    fn on_part(&self, result: &WorkerResult, committed_count: u64, buffers_free: usize) {
        self.seen
            .lock()
            .unwrap()
            .push((result.clone(), committed_count, buffers_free));
    }
}

/// Serves one fixed body on a local port, honoring HEAD and Range GET.
/// The accept loop runs on a detached thread for the life of the test
/// process.
pub struct RangeServer {
    pub url: String,
}

impl RangeServer {
    pub fn serve(body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let body = Arc::new(body);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let body = body.clone();
                thread::spawn(move || handle_request(stream, &body));
            }
        });
        Self {
            url: format!("http://{addr}/data.bin"),
        }
    }
}

fn handle_request(stream: TcpStream, body: &[u8]) {
    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let is_head = request_line.starts_with("HEAD");

    let mut range: Option<(usize, usize)> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
            break;
        }
        if let Some(spec) = line
            .to_ascii_lowercase()
            .strip_prefix("range: bytes=")
            .map(str::trim)
            .map(String::from)
        {
            if let Some((s, e)) = spec.split_once('-') {
                if let (Ok(s), Ok(e)) = (s.parse(), e.parse()) {
                    range = Some((s, e));
                }
            }
        }
    }

    let mut stream = &stream;
    match range {
        Some((start, end)) if end < body.len() && start <= end => {
            let slice = &body[start..=end];
            let header = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end}/{}\r\nConnection: close\r\n\r\n",
                slice.len(),
                body.len()
            );
            let _ = stream.write_all(header.as_bytes());
            if !is_head {
                let _ = stream.write_all(slice);
            }
        }
        Some(_) => {
            let _ = stream.write_all(b"HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        }
        None => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes());
            if !is_head {
                let _ = stream.write_all(body);
            }
        }
    }
    let _ = stream.flush();
    // Drain whatever the client still has buffered before closing.
    let mut sink = [0u8; 256];
    let _ = reader.get_ref().set_read_timeout(Some(Duration::from_millis(10)));
    let _ = reader.read(&mut sink);
}

pub fn no_cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
