use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sketchmat_contracts::image_ref::ImageReference;

/// Loads the bytes behind an image reference.
///
/// Inline references are decoded in place; handles are read from disk
/// (`file://` or a bare path) or fetched over HTTP(S). Failures are logged
/// and returned unchanged to the caller.
pub fn resolve_to_bytes(reference: &ImageReference) -> Result<Vec<u8>> {
    let resolved = match reference {
        ImageReference::Inline { data, .. } => BASE64
            .decode(data.as_bytes())
            .context("inline image base64 decode failed"),
        ImageReference::Handle { location } => resolve_handle(location),
    };
    if let Err(err) = &resolved {
        tracing::warn!(reference = %reference, error = %format!("{err:#}"), "image resolution failed");
    }
    resolved
}

fn resolve_handle(location: &str) -> Result<Vec<u8>> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        bail!("image handle is empty");
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return fetch_remote(trimmed);
    }
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    fs::read(Path::new(path)).with_context(|| format!("failed reading {path}"))
}

fn fetch_remote(url: &str) -> Result<Vec<u8>> {
    let response = reqwest::blocking::get(url).with_context(|| format!("fetch failed ({url})"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("fetch failed ({url}): HTTP {}", status.as_u16());
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("fetch body read failed ({url})"))?;
    Ok(bytes.to_vec())
}

/// One-shot loopback HTTP responder for resolver and router tests.
#[cfg(test)]
pub(crate) mod loopback {
    use std::io::{self, BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Answers exactly one request with `status` and `body`, then closes.
    pub(crate) fn serve_once(
        status: u16,
        body: &'static [u8],
    ) -> io::Result<(String, JoinHandle<io::Result<()>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/sketch.png", listener.local_addr()?);
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept()?;
            let mut reader = BufReader::new(stream.try_clone()?);
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line)? == 0 || line == "\r\n" {
                    break;
                }
            }
            let reason = if status == 200 { "OK" } else { "Not Found" };
            write!(
                stream,
                "HTTP/1.1 {status} {reason}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )?;
            stream.write_all(body)?;
            stream.flush()
        });
        Ok((url, server))
    }
}
