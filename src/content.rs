//! Helpers that materialize an entry's content stream in memory.
//!
//! These consume the stream by value, so a given entry's content can only be drained once.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, TransformError};

/// Text encodings understood by [`drain_to_string`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8; invalid sequences are an error.
    #[default]
    Utf8,
    /// 7-bit ASCII; any byte above 0x7f is an error.
    Ascii,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
    /// UTF-16, little endian, no byte order mark.
    Utf16Le,
    /// Lowercase hexadecimal rendering of the raw bytes.
    Hex,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin1",
            Encoding::Utf16Le => "utf-16le",
            Encoding::Hex => "hex",
        })
    }
}

/// Reads the content stream to its end and returns all of its bytes.
pub async fn drain_to_buffer(mut content: impl AsyncRead + Unpin) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    content
        .read_to_end(&mut buffer)
        .await
        .map_err(TransformError::StreamRead)?;
    Ok(buffer)
}

/// Reads the content stream to its end and decodes it as text.
pub async fn drain_to_string(
    content: impl AsyncRead + Unpin,
    encoding: Encoding,
) -> Result<String> {
    let bytes = drain_to_buffer(content).await?;
    decode(bytes, encoding)
}

fn decode(bytes: Vec<u8>, encoding: Encoding) -> Result<String> {
    let invalid = |reason: String| TransformError::Decode { encoding, reason };

    match encoding {
        Encoding::Utf8 => String::from_utf8(bytes).map_err(|e| invalid(e.utf8_error().to_string())),
        Encoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
            Some(pos) => Err(invalid(format!(
                "byte {:#04x} at offset {pos} is not ascii",
                bytes[pos]
            ))),
            // all bytes are ascii, so this can't fail
            None => String::from_utf8(bytes).map_err(|e| invalid(e.to_string())),
        },
        Encoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        Encoding::Utf16Le => {
            if bytes.len() % 2 != 0 {
                return Err(invalid(format!("odd number of bytes ({})", bytes.len())));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|e| invalid(e.to_string()))
        }
        Encoding::Hex => Ok(hex::encode(bytes)),
    }
}

#[cfg(test)]
mod test {
    use std::io::{Error, ErrorKind};

    use similar_asserts::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_drain_to_buffer() {
        let reader = tokio_test::io::Builder::new()
            .read(b"hello, ")
            .read(b"world")
            .build();
        assert_eq!(drain_to_buffer(reader).await.unwrap(), b"hello, world");

        assert_eq!(drain_to_buffer(&b""[..]).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_drain_to_buffer_broken_reader() {
        let reader = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(Error::from(ErrorKind::ConnectionReset))
            .build();

        match drain_to_buffer(reader).await {
            Err(TransformError::StreamRead(e)) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drain_to_string_utf8() {
        let text = drain_to_string("grüße".as_bytes(), Encoding::Utf8).await.unwrap();
        assert_eq!(text, "grüße");

        let err = drain_to_string(&[0x66, 0x6f, 0xff][..], Encoding::Utf8)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::Decode {
                encoding: Encoding::Utf8,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_drain_to_string_ascii() {
        assert_eq!(
            drain_to_string(&b"plain"[..], Encoding::Ascii).await.unwrap(),
            "plain"
        );
        let err = drain_to_string(&[b'o', b'k', 0xe9][..], Encoding::Ascii)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "content is not valid ascii: byte 0xe9 at offset 2 is not ascii"
        );
    }

    #[tokio::test]
    async fn test_drain_to_string_latin1() {
        let text = drain_to_string(&[b'c', b'a', b'f', 0xe9][..], Encoding::Latin1)
            .await
            .unwrap();
        assert_eq!(text, "café");
    }

    #[tokio::test]
    async fn test_drain_to_string_utf16le() {
        let text = drain_to_string(&[b'h', 0, b'i', 0][..], Encoding::Utf16Le)
            .await
            .unwrap();
        assert_eq!(text, "hi");

        assert!(drain_to_string(&[b'h', 0, b'i'][..], Encoding::Utf16Le)
            .await
            .is_err());
        // lone surrogate
        assert!(drain_to_string(&[0x00, 0xd8][..], Encoding::Utf16Le)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_drain_to_string_hex() {
        let text = drain_to_string(&[0xde, 0xad, 0x00][..], Encoding::Hex)
            .await
            .unwrap();
        assert_eq!(text, "dead00");
    }

    #[tokio::test]
    async fn test_drain_to_string_read_error() {
        let reader = tokio_test::io::Builder::new()
            .read_error(Error::from(ErrorKind::NetworkDown))
            .build();
        assert!(matches!(
            drain_to_string(reader, Encoding::Utf8).await,
            Err(TransformError::StreamRead(_))
        ));
    }
}
