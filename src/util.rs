use std::io::{ErrorKind, Result};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of a tar block.  Headers occupy one block; content is padded to a multiple of it.
pub(crate) const BLOCK_SIZE: usize = 512;

/// Number of zero bytes needed after `size` bytes of content to reach a block boundary.
pub(crate) fn padding_len(size: u64) -> usize {
    let block = BLOCK_SIZE as u64;
    ((block - size % block) % block) as usize
}

/// Fills `buf` completely from `reader`, distinguishing a clean EOF from a truncated read.
///
/// Returns Ok(true) if the buffer was filled, Ok(false) if the stream ended before any byte was
/// read, and an ErrorKind::UnexpectedEof error if it ended part-way through.  Interrupted reads are
/// retried; other errors are returned directly.
pub(crate) async fn read_exactish_async(
    reader: &mut (impl AsyncRead + Unpin),
    buf: &mut [u8],
) -> Result<bool> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(true)
}

#[cfg(test)]
mod test {
    use std::io::Error;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_padding_len() {
        assert_eq!(padding_len(0), 0);
        assert_eq!(padding_len(1), 511);
        assert_eq!(padding_len(511), 1);
        assert_eq!(padding_len(512), 0);
        assert_eq!(padding_len(513), 511);
        // sizes straight from an untrusted header
        assert_eq!(padding_len(u64::MAX), 1);
        assert_eq!(padding_len(u64::MAX - 10), 11);
        assert_eq!(padding_len(1 << 62), 0);
    }

    #[tokio::test]
    async fn test_read_exactish_async() {
        let mut buf = [0u8; 4];

        let mut r = &b""[..];
        assert_eq!(read_exactish_async(&mut r, &mut buf).await.unwrap(), false);

        // split across several reads, then a clean EOF
        let mut r = tokio_test::io::Builder::new()
            .read(b"ab")
            .read(b"cdef")
            .read(b"gh")
            .build();
        assert_eq!(read_exactish_async(&mut r, &mut buf).await.unwrap(), true);
        assert_eq!(&buf, b"abcd");
        assert_eq!(read_exactish_async(&mut r, &mut buf).await.unwrap(), true);
        assert_eq!(&buf, b"efgh");
        assert_eq!(read_exactish_async(&mut r, &mut buf).await.unwrap(), false);

        // truncated
        let mut r = &b"xyz"[..];
        assert_eq!(
            read_exactish_async(&mut r, &mut buf)
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::UnexpectedEof
        );
    }

    #[tokio::test]
    async fn test_read_exactish_async_broken_reader() {
        let mut reader = tokio_test::io::Builder::new()
            .read_error(Error::from(ErrorKind::NetworkDown))
            .build();

        assert_eq!(
            read_exactish_async(&mut reader, &mut [0; 9])
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NetworkDown
        );
    }
}
