//! Archive entries as they flow through a transformation.

use std::{cmp, fmt, io::Cursor, pin::Pin};

use tar::{EntryType, Header};
use tokio::io::AsyncRead;

use crate::error::{Result, TransformError};

/// The payload of an entry: an owned, readable byte stream.
///
/// Whoever holds the [`TarEntry`] owns the stream; pushing the entry downstream moves it along.
/// The stream may be read at most once.
pub type EntryContent = Pin<Box<dyn AsyncRead + Send>>;

/// Size of the name field in a tar header.
pub(crate) const NAME_FIELD_LEN: usize = 100;

/// One record of a streamed archive: a header plus the entry's content stream.
///
/// The header's size field is expected to match the length of the content stream.  This is not
/// checked here; [`crate::archive::ArchiveWriter`] verifies it when the entry is encoded.
pub struct TarEntry {
    /// The tar header for this entry (name, size, mode, type, ...).
    pub header: Header,
    /// The entry's payload bytes.
    pub content: EntryContent,
    /// The full path, when it doesn't fit in the header's name field.  The header then holds
    /// a truncated copy.  [`crate::archive::ArchiveReader`] fills this in from GNU long-name and
    /// PAX `path` records, and [`crate::archive::ArchiveWriter`] writes it back as a GNU
    /// long-name record.
    pub long_name: Option<Vec<u8>>,
}

impl TarEntry {
    /// Creates an entry from a header and any async reader producing its content.
    pub fn new(header: Header, content: impl AsyncRead + Send + 'static) -> Self {
        Self {
            header,
            content: Box::pin(content),
            long_name: None,
        }
    }

    /// Creates a regular-file entry (mode 0644) holding the given bytes in memory.
    pub fn from_bytes(path: &str, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_mtime(0);

        let mut entry = Self::new(header, Cursor::new(data));
        entry.rename(path)?;
        Ok(entry)
    }

    /// Replaces the header, dropping any long name the entry carried.  Used after renaming a
    /// header with [`crate::headers::with_new_name`].
    pub fn with_header(self, header: Header) -> Self {
        Self {
            header,
            content: self.content,
            long_name: None,
        }
    }

    /// Renames the entry in place.
    ///
    /// Names too long for the header's name field are kept in [`long_name`](Self::long_name),
    /// with the header holding the first 100 bytes.  The checksum is recomputed.
    pub fn rename(&mut self, name: &str) -> Result<()> {
        match self.header.set_path(name) {
            Ok(()) => self.long_name = None,
            Err(_) if name.len() > NAME_FIELD_LEN => {
                let field = &mut self.header.as_old_mut().name;
                let len = cmp::min(name.len(), NAME_FIELD_LEN);
                field.fill(0);
                field[..len].copy_from_slice(&name.as_bytes()[..len]);
                self.long_name = Some(name.as_bytes().to_vec());
            }
            Err(err) => return Err(TransformError::Header(err)),
        }
        self.header.set_cksum();
        Ok(())
    }

    /// Returns the entry's path, with invalid UTF-8 replaced.
    pub fn path(&self) -> String {
        match &self.long_name {
            Some(name) => String::from_utf8_lossy(name).into_owned(),
            None => String::from_utf8_lossy(&self.header.path_bytes()).into_owned(),
        }
    }

    /// Returns the content size recorded in the header.
    pub fn size(&self) -> Result<u64> {
        self.header.entry_size().map_err(TransformError::Header)
    }

    /// Splits the entry into its header and content.
    pub fn into_parts(self) -> (Header, EntryContent) {
        (self.header, self.content)
    }
}

impl fmt::Debug for TarEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarEntry")
            .field("path", &self.path())
            .field("entry_type", &self.header.entry_type())
            .field("size", &self.header.entry_size().ok())
            .finish_non_exhaustive()
    }
}
