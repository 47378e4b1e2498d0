use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use http::Method;
use http::header::CONTENT_RANGE;
use tracing::debug;

use crate::Result;
use crate::client::RestClient;
use crate::error::{BoxError, Error};
use crate::util::{parse_header_value, redact_uri_for_logs};

const ACCEPT_ANY: &str = "*/*";

/// Uploads a byte stream of unknown length in `Content-Range` chunks.
///
/// Every chunk but the last is sent with an unknown total (`bytes a-b/*`);
/// the last one carries the final length. Each chunk goes through the
/// client's full request path, so retries apply per chunk.
#[derive(Clone, Debug)]
pub struct RangeUploader {
    client: RestClient,
    method: Method,
    path: String,
    mime_type: String,
    chunk_size: usize,
}

impl RangeUploader {
    pub(crate) fn new(
        client: RestClient,
        method: Method,
        path: &str,
        mime_type: &str,
        chunk_size: usize,
    ) -> Self {
        Self {
            client,
            method,
            path: path.to_owned(),
            mime_type: mime_type.to_owned(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the text of the last chunk's response, or `None` when the
    /// source produced no bytes.
    pub async fn upload<S, E>(&self, source: S) -> Result<Option<String>>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let mut source = std::pin::pin!(source);
        let mut buffer = BytesMut::new();
        let mut position = 0_u64;
        let mut last_text = None;

        while let Some(item) = source.next().await {
            let bytes = item.map_err(|source| Error::UploadSource {
                source: source.into(),
            })?;
            buffer.extend_from_slice(&bytes);
            // Hold one byte back so the final chunk is never empty.
            while buffer.len() > self.chunk_size {
                let chunk = buffer.split_to(self.chunk_size).freeze();
                let length = chunk.len() as u64;
                last_text = Some(self.flush(chunk, position, None).await?);
                position += length;
            }
        }

        if buffer.is_empty() {
            return Ok(last_text);
        }
        let chunk = buffer.split().freeze();
        let total = position + chunk.len() as u64;
        Ok(Some(self.flush(chunk, position, Some(total)).await?))
    }

    async fn flush(&self, chunk: Bytes, start: u64, total: Option<u64>) -> Result<String> {
        let range = content_range(start, chunk.len() as u64, total);
        debug!(
            method = %self.method,
            uri = %redact_uri_for_logs(&self.path),
            content_range = %range,
            "restline uploading chunk"
        );
        let value = parse_header_value(CONTENT_RANGE.as_str(), &range)?;
        self.client
            .write_raw(
                self.method.clone(),
                &self.path,
                chunk,
                &self.mime_type,
                Some(ACCEPT_ANY),
            )
            .with_header_value(CONTENT_RANGE, value)
            .text()
            .await
    }
}

fn content_range(start: u64, length: u64, total: Option<u64>) -> String {
    let end = start + length.saturating_sub(1);
    match total {
        Some(total) => format!("bytes {start}-{end}/{total}"),
        None => format!("bytes {start}-{end}/*"),
    }
}

#[cfg(test)]
mod tests {
    use super::content_range;

    #[test]
    fn content_range_marks_unknown_total() {
        assert_eq!(content_range(0, 4, None), "bytes 0-3/*");
        assert_eq!(content_range(4, 2, Some(6)), "bytes 4-5/6");
        assert_eq!(content_range(8, 1, Some(9)), "bytes 8-8/9");
    }
}
