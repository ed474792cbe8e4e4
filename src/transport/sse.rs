//! Server-sent-events decoding (Bytes -> JSON Value).
//!
//! The stream endpoint is called with `alt=sse`; every event carries one JSON
//! `GenerateContentResponse` in its `data:` field. Frames are separated by a blank line
//! (`\n\n` or `\r\n\r\n`). Bytes are buffered raw and only complete frames are decoded
//! as UTF-8, so a character split across network reads survives intact.

use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use serde_json::Value;

use crate::{BoxStream, Error};

const DELIMITERS: [&[u8]; 2] = [b"\r\n\r\n", b"\n\n"];

/// Position and length of the first frame delimiter in `buf`.
fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    DELIMITERS
        .iter()
        .filter_map(|d| {
            buf.windows(d.len())
                .position(|w| w == *d)
                .map(|idx| (idx, d.len()))
        })
        .min_by_key(|(idx, _)| *idx)
}

/// Strict UTF-8 decoding of one complete frame.
fn frame_text(frame: &[u8]) -> std::result::Result<&str, Error> {
    std::str::from_utf8(frame)
        .map_err(|e| Error::protocol(format!("stream frame is not valid UTF-8: {}", e)))
}

/// Decode and parse one frame.
fn parse_raw(frame: &[u8]) -> Option<std::result::Result<Value, Error>> {
    match frame_text(frame) {
        Ok(text) => parse_frame(text),
        Err(e) => Some(Err(e)),
    }
}

/// Extracts the JSON payload of one frame. Comment-only and empty frames yield `None`.
fn parse_frame(frame: &str) -> Option<std::result::Result<Value, Error>> {
    let mut data = String::new();
    for line in frame.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // `event:`, `id:` and `retry:` fields carry nothing for this API.
    }
    let payload = data.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(payload).map_err(|e| {
        Error::protocol(format!("stream frame is not valid JSON ({}): {}", e, payload))
    }))
}

/// Incrementally buffer bytes and emit one value per complete frame.
pub(crate) fn decode(input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
    let stream = stream::unfold(
        (input, BytesMut::new(), false),
        |(mut input, mut buf, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some((idx, len)) = find_delimiter(&buf) {
                    let frame = buf.split_to(idx + len);
                    match parse_raw(&frame[..idx]) {
                        Some(Ok(v)) => return Some((Ok(v), (input, buf, false))),
                        Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                        None => continue,
                    }
                }

                match input.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                    None => {
                        // EOF: a trailing frame may lack its blank line.
                        let rest = buf.split();
                        return parse_raw(&rest).map(|item| (item, (input, buf, true)));
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn bytes_stream(chunks: Vec<&'static str>) -> BoxStream<'static, Bytes> {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let input = bytes_stream(vec![
            "data: {\"a\":",
            " 1}\n\ndata: {\"a\": 2}\r\n\r\n",
            ": keepalive\n\n",
            "data: {\"a\": 3}",
        ]);
        let values: Vec<Value> = decode(input).try_collect().await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2]["a"], 3);
    }

    #[tokio::test]
    async fn test_bad_json_ends_stream_with_protocol_error() {
        let input = bytes_stream(vec!["data: {\"a\": 1}\n\ndata: nope\n\ndata: {\"a\": 2}\n\n"]);
        let mut out = decode(input);
        assert!(out.next().await.unwrap().is_ok());
        let err = out.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(crate::transport::TransportError::Protocol(_))
        ));
        assert!(out.next().await.is_none());
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_reads() {
        let frame = "data: {\"t\": \"é\"}\n\n".as_bytes();
        let split = frame.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(vec![
            Ok(Bytes::copy_from_slice(&frame[..split])),
            Ok(Bytes::copy_from_slice(&frame[split..])),
        ]));
        let values: Vec<Value> = decode(input).try_collect().await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["t"], "é");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_protocol_error() {
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(vec![Ok(
            Bytes::from_static(b"data: {\"t\": \"\xff\"}\n\n"),
        )]));
        let mut out = decode(input);
        let err = out.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(crate::transport::TransportError::Protocol(_))
        ));
        assert!(out.next().await.is_none());
    }
}
