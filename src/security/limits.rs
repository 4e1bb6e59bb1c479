//! Request and response body ceilings.
//!
//! # Responsibilities
//! - Read the inbound request body through `maxRequestSizeInKb`
//! - Read the upstream response body through `maxResponseSizeInKb`
//! - Decode gzip upstream bodies before the ceiling applies
//!
//! # Design Decisions
//! - Ceilings truncate silently; oversize bodies are never an error
//! - Decoding is streamed, so a compressed bomb stops at the ceiling

use std::io;
use std::pin::pin;

use async_compression::tokio::bufread::GzipDecoder;
use axum::body::Body;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

/// Read at most `limit` bytes from `reader`, dropping the rest.
pub async fn read_capped<R: AsyncRead>(reader: R, limit: u64) -> io::Result<Bytes> {
    let reader = pin!(reader);
    let mut buf = Vec::new();
    reader.take(limit).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Read the inbound request body, truncated at `limit` bytes.
pub async fn read_request_body(body: Body, limit: u64) -> io::Result<Bytes> {
    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    read_capped(reader, limit).await
}

/// Read an upstream body, gunzipping first when `gzip` is set.
pub async fn read_response_body<S, E>(stream: S, gzip: bool, limit: u64) -> io::Result<Bytes>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let reader = StreamReader::new(stream.map_err(io::Error::other));
    if gzip {
        let mut decoder = GzipDecoder::new(reader);
        decoder.multiple_members(true);
        read_capped(decoder, limit).await
    } else {
        read_capped(reader, limit).await
    }
}
