//! Raw byte source handling: binary vs. textual hex input.
//!
//! Sources are either raw framed binary or human-readable hex dumps (lines of
//! space-separated byte pairs such as `01 10 02 3f 00 41 05`). The mode is chosen
//! once per source from a leading sample.

use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, ErrorKind, Read};

/// Number of bytes read up front to choose the input mode.
pub const SAMPLE_SIZE: usize = 8192;

/// Number of leading sample bytes that must look like hex text.
pub const HEX_CHECK_LEN: usize = 4096;

/// How the raw source is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    Binary,
    HexText,
}

impl std::fmt::Display for InputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputMode::Binary => write!(f, "binary"),
            InputMode::HexText => write!(f, "hex text"),
        }
    }
}

/// Chooses hex mode only if every checked byte is a hex digit or whitespace.
///
/// An empty sample is treated as binary.
pub fn detect_input_mode(sample: &[u8]) -> InputMode {
    if sample.is_empty() {
        return InputMode::Binary;
    }

    let checked = &sample[..sample.len().min(HEX_CHECK_LEN)];
    let looks_like_hex = checked
        .iter()
        .all(|&b| b.is_ascii_hexdigit() || matches!(b, b' ' | b'\t' | b'\r' | b'\n'));

    if looks_like_hex {
        InputMode::HexText
    } else {
        InputMode::Binary
    }
}

/// Result of reading one line of hex text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexLine {
    Eof,
    /// A complete line is in the buffer; `consumed` counts its terminator too.
    Line { consumed: usize },
    /// The line ran past the limit and was skipped up to its terminator.
    Oversize { consumed: usize },
}

/// Reads the next line into `line` without buffering more than `limit + 1` bytes.
///
/// An oversize line is consumed to the next newline and leaves `line` empty.
pub fn read_hex_line<R: BufRead>(
    source: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> io::Result<HexLine> {
    line.clear();
    let n = source
        .by_ref()
        .take(limit as u64 + 1)
        .read_until(b'\n', line)?;
    if n == 0 {
        return Ok(HexLine::Eof);
    }
    if n <= limit || line.last() == Some(&b'\n') {
        return Ok(HexLine::Line { consumed: n });
    }

    line.clear();
    let skipped = skip_line(source)?;
    Ok(HexLine::Oversize {
        consumed: n + skipped,
    })
}

/// Discards input up to and including the next newline.
fn skip_line<R: BufRead>(source: &mut R) -> io::Result<usize> {
    let mut skipped = 0;
    loop {
        let (done, used) = {
            let available = match source.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (available.is_empty(), available.len()),
            }
        };
        source.consume(used);
        skipped += used;
        if done {
            return Ok(skipped);
        }
    }
}

/// Decodes one line of hex text into bytes.
///
/// Tokens are separated by ASCII whitespace and hold one or two hex digits.
/// A blank line decodes to an empty vector.
pub fn decode_hex_line(line: &[u8]) -> Result<Vec<u8>, hex::FromHexError> {
    let mut out = Vec::with_capacity(line.len() / 3 + 1);

    for token in line
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
    {
        let mut byte = [0u8; 1];
        match token.len() {
            1 => hex::decode_to_slice([b'0', token[0]], &mut byte)?,
            2 => hex::decode_to_slice(token, &mut byte)?,
            _ => return Err(hex::FromHexError::InvalidStringLength),
        }
        out.push(byte[0]);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn test_detect_hex_text() {
        assert_eq!(
            detect_input_mode(b"01 10 02 3F 00 41 05\r\n01 10 02 3f 00 41 05\n"),
            InputMode::HexText
        );
    }

    #[test]
    fn test_detect_binary() {
        assert_eq!(detect_input_mode(&[0x01, 0x10, 0x02, 0x05]), InputMode::Binary);
        assert_eq!(detect_input_mode(b"01 10\x00 05"), InputMode::Binary);
        assert_eq!(detect_input_mode(b"01 zz 05"), InputMode::Binary);
        assert_eq!(detect_input_mode(b""), InputMode::Binary);
    }

    #[test]
    fn test_only_leading_bytes_are_checked() {
        let mut sample = b"01 ".repeat(HEX_CHECK_LEN / 3 + 1);
        sample.extend_from_slice(&[0xff, 0x00]);
        assert_eq!(detect_input_mode(&sample), InputMode::HexText);
    }

    #[test]
    fn test_decode_hex_line() {
        assert_eq!(
            decode_hex_line(b"  01 1 ff\tA0 \r").unwrap(),
            vec![0x01, 0x01, 0xff, 0xa0]
        );
        assert_eq!(decode_hex_line(b"   ").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_read_hex_line_skips_oversize_lines() {
        let mut input = Vec::new();
        input.extend_from_slice(b"01 02\n");
        input.extend(b"ab ".repeat(100));
        input.extend_from_slice(b"\n03 04");
        let mut source = BufReader::with_capacity(16, input.as_slice());
        let mut line = Vec::new();

        assert_eq!(
            read_hex_line(&mut source, &mut line, 32).unwrap(),
            HexLine::Line { consumed: 6 }
        );
        assert_eq!(line, b"01 02\n");

        assert_eq!(
            read_hex_line(&mut source, &mut line, 32).unwrap(),
            HexLine::Oversize { consumed: 301 }
        );
        assert!(line.is_empty());

        assert_eq!(
            read_hex_line(&mut source, &mut line, 32).unwrap(),
            HexLine::Line { consumed: 5 }
        );
        assert_eq!(line, b"03 04");
        assert_eq!(read_hex_line(&mut source, &mut line, 32).unwrap(), HexLine::Eof);
    }

    #[test]
    fn test_read_hex_line_at_limit() {
        let mut source: &[u8] = b"0102\n0102";
        let mut line = Vec::new();

        assert_eq!(
            read_hex_line(&mut source, &mut line, 4).unwrap(),
            HexLine::Line { consumed: 5 }
        );
        assert_eq!(
            read_hex_line(&mut source, &mut line, 4).unwrap(),
            HexLine::Line { consumed: 4 }
        );
        assert_eq!(read_hex_line(&mut source, &mut line, 4).unwrap(), HexLine::Eof);
    }

    #[test]
    fn test_decode_hex_line_malformed() {
        assert!(decode_hex_line(b"01 zz 05").is_err());
        assert!(decode_hex_line(b"0102 05").is_err());
    }
}
