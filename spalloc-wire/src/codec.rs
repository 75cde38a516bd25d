//! Line-delimited UTF-8 JSON framing (spec §4.2).
//!
//! No length prefix; one message per `\n`-terminated line. Reading is
//! exposed as a free function rather than a `tokio_util::codec::Decoder`
//! because the session task needs to wrap each read in its own
//! cancellation-aware timeout (spec §4.5, §5), which doesn't compose
//! cleanly with `Framed`'s pull-based model.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use spalloc_error::{make_input_err, Error};

use crate::command::Command;
use crate::response::Frame;

/// Lines longer than this are rejected with a framing error (spec §4.2:
/// "≥ 64 KiB").
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Result of attempting to read one line.
pub enum ReadLine {
    /// A complete line, without its trailing `\n`.
    Line(Vec<u8>),
    /// The stream reached EOF with no further data.
    Eof,
}

/// Read one `\n`-terminated line, rejecting lines over `max_bytes`.
///
/// Callers that need a read timeout should wrap this call in
/// `tokio::time::timeout`.
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> std::io::Result<ReadLine> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(ReadLine::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > max_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("line exceeded max length of {max_bytes} bytes"),
        ));
    }
    Ok(ReadLine::Line(buf))
}

/// Decode one line into a `Command`, validating its invariants.
///
/// Any parse failure or missing/non-string `command` field is a framing
/// error (§7): the caller should respond with `ExceptionResponse` and keep
/// the session open.
pub fn decode_command(line: &[u8]) -> Result<Command, Error> {
    let text = std::str::from_utf8(line)
        .map_err(|e| make_input_err!("line was not valid UTF-8: {e}"))?;
    let command: Command =
        serde_json::from_str(text).map_err(|e| make_input_err!("JSON parse error: {e}"))?;
    command.validate()?;
    Ok(command)
}

/// Encode a response frame as a single JSON line, without the trailing
/// `\n` (callers append it; see `spalloc_util::SharedWriter::write_line`).
pub fn encode_frame(frame: &Frame) -> Result<String, Error> {
    serde_json::to_string(frame).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_single_line_without_newline() {
        let mut reader = BufReader::new(&b"hello\n"[..]);
        let line = read_line(&mut reader, DEFAULT_MAX_LINE_BYTES).await.unwrap();
        match line {
            ReadLine::Line(bytes) => assert_eq!(bytes, b"hello"),
            ReadLine::Eof => panic!("expected a line"),
        }
    }

    #[tokio::test]
    async fn reports_eof() {
        let mut reader = BufReader::new(&b""[..]);
        let line = read_line(&mut reader, DEFAULT_MAX_LINE_BYTES).await.unwrap();
        assert!(matches!(line, ReadLine::Eof));
    }

    #[tokio::test]
    async fn rejects_oversized_line() {
        let data = [b'x'; 128];
        let mut reader = BufReader::new(&data[..]);
        let result = read_line(&mut reader, 16).await;
        assert!(result.is_err());
    }

    #[test]
    fn decode_command_rejects_missing_command_field() {
        let err = decode_command(br#"{"args":[]}"#).unwrap_err();
        assert!(!err.as_exception_text().is_empty());
    }

    #[test]
    fn decode_command_defaults_args_and_kwargs() {
        let cmd = decode_command(br#"{"command":"version"}"#).unwrap();
        assert_eq!(cmd.command, "version");
        assert!(cmd.args.is_empty());
        assert!(cmd.kwargs.is_empty());
    }

    #[test]
    fn decode_command_ignores_unknown_fields() {
        let cmd = decode_command(br#"{"command":"version","bogus":123}"#).unwrap();
        assert_eq!(cmd.command, "version");
    }
}
