//! Server-sent event framing (Bytes -> frames).
//!
//! Frames are split on a blank line. Within a frame, `event:`, `data:` and `id:`
//! fields are collected; multiple `data:` lines are joined with `\n` and lines
//! starting with `:` are comments. Payload interpretation happens later, in
//! [`crate::types::wire::StreamEvent`].

use crate::BoxStream;
use bytes::Bytes;
use futures::{stream, StreamExt};

/// One framed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse one frame (without its trailing blank line).
///
/// Returns `None` for frames that carry no fields, e.g. keep-alive comments.
pub fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut seen_field = false;

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => {
                frame.event = Some(value.to_string());
                seen_field = true;
            }
            "data" => {
                data_lines.push(value);
                seen_field = true;
            }
            "id" => {
                frame.id = Some(value.to_string());
                seen_field = true;
            }
            // `retry` and unknown fields carry nothing we act on.
            _ => {}
        }
    }

    if !seen_field {
        return None;
    }
    frame.data = data_lines.join("\n");
    Some(frame)
}

/// Position and delimiter length of the first frame boundary in `buf`.
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Incrementally buffer bytes and emit complete frames.
///
/// Bytes are buffered raw and only decoded per frame, so a multi-byte
/// character split across network chunks survives intact. Upstream errors are
/// passed through and the stream continues afterwards; a trailing frame without
/// its blank line is flushed at EOF.
pub fn decode_frames(input: BoxStream<'static, Bytes>) -> BoxStream<'static, SseFrame> {
    let frames = stream::unfold(
        (input, Vec::<u8>::new(), false),
        |(mut input, mut buf, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some((idx, delim_len)) = find_frame_end(&buf) {
                    let raw = String::from_utf8_lossy(&buf[..idx]).into_owned();
                    buf.drain(..idx + delim_len);
                    if let Some(frame) = parse_frame(&raw) {
                        return Some((Ok(frame), (input, buf, false)));
                    }
                    continue;
                }

                match input.next().await {
                    Some(Ok(bytes)) => {
                        buf.extend_from_slice(&bytes);
                        continue;
                    }
                    Some(Err(e)) => return Some((Err(e), (input, buf, false))),
                    None => {
                        let raw = String::from_utf8_lossy(&buf).into_owned();
                        return parse_frame(&raw)
                            .map(|frame| (Ok(frame), (input, Vec::new(), true)));
                    }
                }
            }
        },
    );
    Box::pin(frames)
}
