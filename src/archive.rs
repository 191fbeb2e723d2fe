//! Reading and writing tar streams as sequences of [`TarEntry`] records.
//!
//! This is block framing only: a 512-byte header, the content, zero padding to the next block,
//! and two zero blocks at the end.  The only extensions understood are long names: GNU long-name
//! records and PAX `path` keys are folded into [`TarEntry::long_name`] on read, and written back
//! as GNU long-name records.  Other extension records travel through a transformation as
//! ordinary entries.
//!
//! [`transform_archive`] ties the pieces together: archive bytes in, transformed archive bytes
//! out, with a bounded [`channel`] between the transformer and the writer.

use std::io::{Cursor, ErrorKind};

use futures::{stream, Stream, StreamExt};
use log::{debug, trace};
use tar::{EntryType, Header};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    driver::drive,
    entry::TarEntry,
    error::{Result, TransformError},
    sink::channel,
    transformer::TarEntryTransformer,
    util::{padding_len, read_exactish_async, BLOCK_SIZE},
};

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Name GNU tar gives long-name records.
const GNU_LONG_LINK: &[u8] = b"././@LongLink";

fn map_eof(err: std::io::Error) -> TransformError {
    match err.kind() {
        ErrorKind::UnexpectedEof => TransformError::UnexpectedEof,
        _ => TransformError::Io(err),
    }
}

fn verify_checksum(header: &Header) -> Result<()> {
    let stored = header.cksum().map_err(TransformError::Header)?;
    // the checksum field itself counts as eight spaces
    let computed: u32 = header
        .as_bytes()
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { 32 } else { *b as u32 })
        .sum();

    if stored != computed {
        return Err(TransformError::BadChecksum { stored, computed });
    }
    Ok(())
}

async fn read_header_async(reader: &mut (impl AsyncRead + Unpin)) -> Result<Option<Header>> {
    let mut header = Header::new_old();
    if read_exactish_async(reader, header.as_mut_bytes())
        .await
        .map_err(map_eof)?
    {
        Ok(Some(header))
    } else {
        Ok(None)
    }
}

/// Splits PAX extended header data into its `path` value (if any) and the remaining records,
/// which are kept byte for byte.
fn split_pax_path(mut data: &[u8]) -> Result<(Option<Vec<u8>>, Vec<u8>)> {
    let mut path = None;
    let mut rest = Vec::with_capacity(data.len());

    while !data.is_empty() {
        // "<length> <key>=<value>\n", where length counts the whole record
        let space = data
            .iter()
            .position(|&b| b == b' ')
            .ok_or(TransformError::MalformedPax)?;
        let len: usize = std::str::from_utf8(&data[..space])
            .ok()
            .and_then(|len| len.parse().ok())
            .ok_or(TransformError::MalformedPax)?;
        if len > data.len() || len < space + 2 || data[len - 1] != b'\n' {
            return Err(TransformError::MalformedPax);
        }

        let record = &data[..len];
        let kv = &record[space + 1..len - 1];
        let eq = kv
            .iter()
            .position(|&b| b == b'=')
            .ok_or(TransformError::MalformedPax)?;
        if &kv[..eq] == b"path" {
            path = Some(kv[eq + 1..].to_vec());
        } else {
            rest.extend_from_slice(record);
        }

        data = &data[len..];
    }

    Ok((path, rest))
}

/// Long names seen since the last real entry.
#[derive(Debug, Default)]
struct PendingName {
    gnu_long_name: Option<Vec<u8>>,
    pax_path: Option<Vec<u8>>,
}

impl PendingName {
    fn is_empty(&self) -> bool {
        self.gnu_long_name.is_none() && self.pax_path.is_none()
    }

    /// PAX wins over GNU when both are present.
    fn take(&mut self) -> Option<Vec<u8>> {
        let pax = self.pax_path.take();
        let gnu = self.gnu_long_name.take();
        pax.or(gnu)
    }
}

/// Reads entries from a tar byte stream.
///
/// Each entry's content is read into memory as the entry is produced, so the reader is
/// positioned at the next header regardless of what the consumer does with the content.
///
/// GNU long-name records and the `path` key of PAX extended headers are folded into the
/// following entry's [`TarEntry::long_name`].  A PAX header left with other keys is still
/// produced as its own entry, ahead of the entry it describes; other extension records
/// (GNU long links, PAX global headers) are produced as-is.
#[derive(Debug)]
pub struct ArchiveReader<R> {
    reader: R,
    pending: PendingName,
}

impl<R: AsyncRead + Unpin> ArchiveReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: PendingName::default(),
        }
    }

    /// Reads `size` bytes of content and the padding after it.
    ///
    /// The size comes from an untrusted header, so memory is only allocated as data actually
    /// arrives.
    async fn read_content(&mut self, size: u64) -> Result<Vec<u8>> {
        let stored = size
            .checked_add(padding_len(size) as u64)
            .ok_or(TransformError::UnexpectedEof)?;

        let mut buffer = Vec::new();
        (&mut self.reader)
            .take(stored)
            .read_to_end(&mut buffer)
            .await
            .map_err(map_eof)?;
        if (buffer.len() as u64) < stored {
            return Err(TransformError::UnexpectedEof);
        }

        // size <= buffer.len(), so this fits
        buffer.truncate(size as usize);
        Ok(buffer)
    }

    /// Returns the next entry, or `None` at the end of the archive.
    ///
    /// All-zero blocks (the end-of-archive marker and any trailing padding) are skipped.  An
    /// archive that ends right after a long-name record fails with
    /// [`TransformError::UnexpectedEof`].
    pub async fn next_entry(&mut self) -> Result<Option<TarEntry>> {
        while let Some(mut header) = read_header_async(&mut self.reader).await? {
            if header.as_bytes() == &ZERO_BLOCK {
                continue;
            }
            verify_checksum(&header)?;

            let size = header.entry_size().map_err(TransformError::Header)?;
            let mut data = self.read_content(size).await?;

            match header.entry_type() {
                EntryType::GNULongName => {
                    while data.last() == Some(&0) {
                        data.pop();
                    }
                    trace!("long name {}", String::from_utf8_lossy(&data));
                    self.pending.gnu_long_name = Some(data);
                }
                EntryType::XHeader => {
                    let (path, rest) = split_pax_path(&data)?;
                    if path.is_some() {
                        self.pending.pax_path = path;
                    }
                    if !rest.is_empty() {
                        header.set_size(rest.len() as u64);
                        header.set_cksum();
                        return Ok(Some(TarEntry::new(header, Cursor::new(rest))));
                    }
                }
                _ => {
                    let mut entry = TarEntry::new(header, Cursor::new(data));
                    entry.long_name = self.pending.take();
                    trace!("read {} ({size} bytes)", entry.path());
                    return Ok(Some(entry));
                }
            }
        }

        if !self.pending.is_empty() {
            return Err(TransformError::UnexpectedEof);
        }
        Ok(None)
    }

    /// Turns the reader into a stream of entries.
    pub fn into_stream(self) -> impl Stream<Item = Result<TarEntry>> {
        stream::try_unfold(self, |mut reader| async move {
            let entry = reader.next_entry().await?;
            Ok::<_, TransformError>(entry.map(|entry| (entry, reader)))
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes entries as a tar byte stream.
#[derive(Debug)]
pub struct ArchiveWriter<W> {
    writer: W,
    entries: u64,
}

impl<W: AsyncWrite + Unpin> ArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, entries: 0 }
    }

    /// Writes a GNU long-name record carrying `name`.
    async fn write_long_name(&mut self, name: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.as_old_mut().name[..GNU_LONG_LINK.len()].copy_from_slice(GNU_LONG_LINK);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        // GNU tar counts the trailing nul
        let size = name.len() as u64 + 1;
        header.set_size(size);
        header.set_entry_type(EntryType::GNULongName);
        header.set_cksum();

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(name).await?;
        self.writer.write_all(&[0]).await?;
        self.writer
            .write_all(&ZERO_BLOCK[..padding_len(size)])
            .await?;
        Ok(())
    }

    /// Encodes one entry: a long-name record if it has one, its header (checksum recomputed),
    /// content and padding.
    ///
    /// Fails with [`TransformError::SizeMismatch`] if the content is shorter or longer than the
    /// header says.  The output is unusable after such a failure.
    pub async fn write_entry(&mut self, entry: TarEntry) -> Result<()> {
        let path = entry.path();
        let TarEntry {
            mut header,
            mut content,
            long_name,
        } = entry;
        let expected = header.entry_size().map_err(TransformError::Header)?;

        if let Some(name) = &long_name {
            self.write_long_name(name).await?;
        }

        header.set_cksum();
        self.writer.write_all(header.as_bytes()).await?;

        let written = io::copy(&mut (&mut content).take(expected), &mut self.writer).await?;
        let extra = io::copy(&mut content, &mut io::sink()).await?;
        if written != expected || extra != 0 {
            return Err(TransformError::SizeMismatch {
                path,
                expected,
                actual: written + extra,
            });
        }

        self.writer
            .write_all(&ZERO_BLOCK[..padding_len(expected)])
            .await?;
        self.entries += 1;
        trace!("wrote {path} ({expected} bytes)");
        Ok(())
    }

    /// Number of entries written so far.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Writes the end-of-archive marker, flushes, and returns the underlying writer.
    pub async fn finish(mut self) -> Result<W> {
        self.writer.write_all(&ZERO_BLOCK).await?;
        self.writer.write_all(&ZERO_BLOCK).await?;
        self.writer.flush().await?;
        debug!("archive finished with {} entries", self.entries);
        Ok(self.writer)
    }
}

/// Reads a tar archive from `input`, runs every entry through `transformer`, and writes the
/// resulting archive to `output`.
///
/// Reading, transforming and writing are interleaved in the calling task.  At most about
/// `high_water_mark` transformed entries are held in memory waiting for the writer (plus whatever
/// a single hook invocation pushes).  The first error ends the run and is returned unchanged;
/// output written up to that point is left as-is.
pub async fn transform_archive<T, R, W>(
    input: R,
    output: W,
    transformer: &mut TarEntryTransformer<T>,
    high_water_mark: usize,
) -> anyhow::Result<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = channel(high_water_mark);
    let entries = ArchiveReader::new(input).into_stream();

    let produce = drive(transformer, entries, tx);
    let consume = async move {
        let mut writer = ArchiveWriter::new(output);
        while let Some(entry) = rx.next().await {
            writer.write_entry(entry?).await?;
        }
        anyhow::Ok(writer.finish().await?)
    };

    let ((), output) = tokio::try_join!(produce, consume)?;
    Ok(output)
}
