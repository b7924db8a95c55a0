// Demux the Engine log stream into structured entries.
//
// Without a TTY the Engine sends 8-byte multiplex headers
// {stream_id, 0, 0, 0, len_be32} before each payload; with one it sends
// plain newline-delimited text. Detection is per header, with fallback to
// plain parsing for anything that does not look multiplexed.

use crate::models::LogEntry;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

const MAX_MESSAGE_CHARS: usize = 4000;

pub async fn parse_log_stream<R>(
    reader: R,
    service_id: &str,
    container_id: &str,
    out: &mpsc::Sender<LogEntry>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut header = [0u8; 8];
    loop {
        let mut filled = 0;
        while filled < header.len() {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(());
        }
        if filled < header.len() || !is_multiplex_header(&header) {
            return parse_plain(&header[..filled], reader, service_id, container_id, out).await;
        }

        let stream = if header[0] == 2 { "stderr" } else { "stdout" };
        let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if size == 0 {
            continue;
        }
        let mut payload = vec![0u8; size];
        reader.read_exact(&mut payload).await?;
        emit(&payload, stream, service_id, container_id, out).await;
    }
}

fn is_multiplex_header(header: &[u8; 8]) -> bool {
    (header[0] == 1 || header[0] == 2) && header[1] == 0 && header[2] == 0 && header[3] == 0
}

async fn parse_plain<R>(
    prefix: &[u8],
    reader: R,
    service_id: &str,
    container_id: &str,
    out: &mpsc::Sender<LogEntry>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let head = std::io::Cursor::new(prefix.to_vec());
    let mut lines = BufReader::new(head.chain(reader)).lines();
    while let Some(line) = lines.next_line().await? {
        emit(line.as_bytes(), "stdout", service_id, container_id, out).await;
    }
    Ok(())
}

/// Build one entry from a raw payload or line and hand it to the sink.
/// Sends fail only when the worker is shutting down; the entry is dropped.
async fn emit(
    raw: &[u8],
    stream: &str,
    service_id: &str,
    container_id: &str,
    out: &mpsc::Sender<LogEntry>,
) {
    let text = String::from_utf8_lossy(raw);
    let mut msg = text.trim();
    let mut ts = Utc::now();
    if let Some((token, rest)) = msg.split_once(' ') {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(token) {
            ts = parsed.with_timezone(&Utc);
            msg = rest;
        }
    }
    let message = sanitize_message(msg);
    let entry = LogEntry {
        ts,
        service_id: service_id.to_string(),
        container_id: container_id.to_string(),
        level: infer_level(&message).to_string(),
        stream: stream.to_string(),
        message,
    };
    let _ = out.send(entry).await;
}

/// Keyword match against the upper-cased message, most severe first.
pub fn infer_level(msg: &str) -> &'static str {
    let upper = msg.to_uppercase();
    if upper.contains("ERROR") || upper.contains("FATAL") || upper.contains("PANIC") {
        "ERROR"
    } else if upper.contains("WARN") {
        "WARN"
    } else if upper.contains("DEBUG") {
        "DEBUG"
    } else {
        "INFO"
    }
}

/// Trimmed, NUL-free, valid UTF-8 (invalid sequences become `?`), at most
/// 4000 chars.
pub fn sanitize_message(msg: &str) -> String {
    let cleaned: String = msg
        .trim()
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| if c == '\u{FFFD}' { '?' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.chars().count() > MAX_MESSAGE_CHARS {
        cleaned.chars().take(MAX_MESSAGE_CHARS).collect()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(stream_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![stream_id, 0, 0, 0];
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    async fn collect(input: &[u8]) -> Vec<LogEntry> {
        let (tx, mut rx) = mpsc::channel(16);
        parse_log_stream(input, "svc", "cid", &tx).await.unwrap();
        drop(tx);
        let mut out = Vec::new();
        while let Some(e) = rx.recv().await {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn multiplexed_frame_with_timestamp() {
        let input = frame(1, b"2026-01-01T00:00:00Z hello world\n");
        let entries = collect(&input).await;
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.service_id, "svc");
        assert_eq!(e.container_id, "cid");
        assert_eq!(e.level, "INFO");
        assert_eq!(e.stream, "stdout");
        assert_eq!(e.message, "hello world");
        assert_eq!(e.ts, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn stderr_frame_keeps_its_stream() {
        let mut input = frame(2, b"boom\n");
        input.extend_from_slice(&frame(1, b"fine\n"));
        let entries = collect(&input).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stream, "stderr");
        assert_eq!(entries[1].stream, "stdout");
    }

    #[tokio::test]
    async fn zero_length_frames_are_skipped() {
        let mut input = frame(1, b"");
        input.extend_from_slice(&frame(1, b"after\n"));
        let entries = collect(&input).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "after");
    }

    #[tokio::test]
    async fn plain_stream_falls_back_to_lines() {
        let entries = collect(b"first line\nsecond ERROR line\n").await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first line");
        assert_eq!(entries[0].stream, "stdout");
        assert_eq!(entries[1].level, "ERROR");
    }

    #[tokio::test]
    async fn short_input_parses_as_plain() {
        let entries = collect(b"hi\n").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "hi");
    }

    #[tokio::test]
    async fn line_without_timestamp_is_stamped_now() {
        let before = Utc::now();
        let entries = collect(b"no timestamp here\n").await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ts >= before);
        assert_eq!(entries[0].message, "no timestamp here");
    }

    #[test]
    fn level_precedence_is_case_insensitive() {
        assert_eq!(infer_level("fatal error happened"), "ERROR");
        assert_eq!(infer_level("Panic: unwind"), "ERROR");
        assert_eq!(infer_level("warn: bad"), "WARN");
        assert_eq!(infer_level("warning while debugging errors"), "ERROR");
        assert_eq!(infer_level("debug details"), "DEBUG");
        assert_eq!(infer_level("hello"), "INFO");
    }

    #[test]
    fn sanitize_strips_nul_and_clamps() {
        let out = sanitize_message("  a\0b  ");
        assert_eq!(out, "ab");
        let long: String = "x".repeat(5000);
        assert_eq!(sanitize_message(&long).chars().count(), 4000);
    }

    #[test]
    fn sanitize_replaces_invalid_utf8_marker() {
        let lossy = String::from_utf8_lossy(&[b'h', 0xFF, b'i']);
        assert_eq!(sanitize_message(&lossy), "h?i");
    }
}
