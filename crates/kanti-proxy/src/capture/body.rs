//! Response body capture: content-type classification, capping, and
//! decompression for textual payloads.

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZlibDecoder};
use tokio::io::AsyncReadExt;

const TEXTUAL_MARKERS: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-www-form-urlencoded",
    "application/graphql",
];

/// Whether a response body should be decoded and stored as text, based on
/// its `Content-Type`. An absent/empty content-type is treated as textual.
pub fn is_textual(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) if ct.trim().is_empty() => true,
        Some(ct) => {
            let lower = ct.to_ascii_lowercase();
            TEXTUAL_MARKERS.iter().any(|marker| lower.contains(marker))
        }
    }
}

/// Decodes `raw` per `content_encoding`, returning `None` (fall back to
/// empty) on any decode failure rather than aborting the capture.
pub async fn decompress(raw: &[u8], content_encoding: Option<&str>) -> Option<Vec<u8>> {
    match content_encoding.map(|s| s.to_ascii_lowercase()) {
        None => Some(raw.to_vec()),
        Some(enc) if enc.is_empty() || enc == "identity" => Some(raw.to_vec()),
        Some(enc) if enc.contains("gzip") => read_all(GzipDecoder::new(raw)).await,
        Some(enc) if enc.contains("br") => read_all(BrotliDecoder::new(raw)).await,
        Some(enc) if enc.contains("deflate") => {
            if let Some(out) = read_all(ZlibDecoder::new(raw)).await {
                Some(out)
            } else {
                read_all(DeflateRawDecoder::new(raw)).await
            }
        }
        Some(_) => Some(raw.to_vec()),
    }
}

async fn read_all<R>(mut decoder: R) -> Option<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await.ok()?;
    Some(out)
}

/// Raw (non-zlib-wrapped) DEFLATE, for servers that mislabel the stream.
struct DeflateRawDecoder<'a> {
    inner: async_compression::tokio::bufread::DeflateDecoder<&'a [u8]>,
}

impl<'a> DeflateRawDecoder<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self {
            inner: async_compression::tokio::bufread::DeflateDecoder::new(raw),
        }
    }
}

impl<'a> tokio::io::AsyncRead for DeflateRawDecoder<'a> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_json_as_textual() {
        assert!(is_textual(Some("application/json; charset=utf-8")));
    }

    #[test]
    fn classifies_image_as_non_textual() {
        assert!(!is_textual(Some("image/png")));
    }

    #[test]
    fn empty_content_type_is_textual() {
        assert!(is_textual(Some("")));
        assert!(is_textual(None));
    }

    #[tokio::test]
    async fn decompresses_gzip() {
        use async_compression::tokio::write::GzipEncoder;
        use tokio::io::AsyncWriteExt;

        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(b"hello world").await.unwrap();
        encoder.shutdown().await.unwrap();
        let compressed = encoder.into_inner();

        let out = decompress(&compressed, Some("gzip")).await.unwrap();
        assert_eq!(out, b"hello world");
    }
}
