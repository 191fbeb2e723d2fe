//! Producing edited copies of tar headers.

use tar::{EntryType, Header};

use crate::error::{Result, TransformError};

/// Header fields to replace when deriving a new header.  Fields left as `None` are copied from
/// the original.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderOverrides {
    pub path: Option<String>,
    pub mode: Option<u32>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub mtime: Option<u64>,
    pub size: Option<u64>,
    pub entry_type: Option<EntryType>,
}

impl HeaderOverrides {
    /// Overrides that only change the path.
    pub fn rename(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Returns a copy of `header` with the fields from `overrides` applied and the checksum
/// recomputed.  The original header is left untouched.
pub fn with_overrides(header: &Header, overrides: &HeaderOverrides) -> Result<Header> {
    let mut new = header.clone();

    if let Some(path) = &overrides.path {
        new.set_path(path).map_err(TransformError::Header)?;
    }
    if let Some(mode) = overrides.mode {
        new.set_mode(mode);
    }
    if let Some(uid) = overrides.uid {
        new.set_uid(uid);
    }
    if let Some(gid) = overrides.gid {
        new.set_gid(gid);
    }
    if let Some(mtime) = overrides.mtime {
        new.set_mtime(mtime);
    }
    if let Some(size) = overrides.size {
        new.set_size(size);
    }
    if let Some(entry_type) = overrides.entry_type {
        new.set_entry_type(entry_type);
    }

    new.set_cksum();
    Ok(new)
}

/// Returns a copy of `header` renamed to `name`.
pub fn with_new_name(header: &Header, name: &str) -> Result<Header> {
    with_overrides(header, &HeaderOverrides::rename(name))
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    fn sample_header() -> Header {
        let mut header = Header::new_gnu();
        header.set_path("a.txt").unwrap();
        header.set_mode(0o600);
        header.set_uid(1000);
        header.set_gid(100);
        header.set_mtime(1234567890);
        header.set_size(2);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        header
    }

    #[test]
    fn test_with_new_name() {
        let original = sample_header();
        let renamed = with_new_name(&original, "out/a.txt").unwrap();

        assert_eq!(renamed.path_bytes().into_owned(), b"out/a.txt".to_vec());
        assert_eq!(renamed.mode().unwrap(), 0o600);
        assert_eq!(renamed.uid().unwrap(), 1000);
        assert_eq!(renamed.gid().unwrap(), 100);
        assert_eq!(renamed.mtime().unwrap(), 1234567890);
        assert_eq!(renamed.entry_size().unwrap(), 2);

        // original untouched
        assert_eq!(original.path_bytes().into_owned(), b"a.txt".to_vec());
    }

    #[test]
    fn test_checksum_recomputed() {
        let renamed = with_new_name(&sample_header(), "b.txt").unwrap();
        let mut expected = renamed.clone();
        expected.set_cksum();
        assert_eq!(renamed.as_bytes(), expected.as_bytes());
        assert_ne!(
            sample_header().cksum().unwrap(),
            renamed.cksum().unwrap()
        );
    }

    #[test]
    fn test_with_overrides() {
        let overrides = HeaderOverrides {
            mode: Some(0o755),
            uid: Some(0),
            gid: Some(0),
            mtime: Some(1),
            size: Some(42),
            entry_type: Some(EntryType::Regular),
            ..Default::default()
        };
        let new = with_overrides(&sample_header(), &overrides).unwrap();

        assert_eq!(new.path_bytes().into_owned(), b"a.txt".to_vec());
        assert_eq!(new.mode().unwrap(), 0o755);
        assert_eq!(new.uid().unwrap(), 0);
        assert_eq!(new.gid().unwrap(), 0);
        assert_eq!(new.mtime().unwrap(), 1);
        assert_eq!(new.entry_size().unwrap(), 42);
    }

    #[test]
    fn test_empty_overrides_preserve_header() {
        let original = sample_header();
        let copy = with_overrides(&original, &HeaderOverrides::default()).unwrap();
        assert_eq!(original.as_bytes(), copy.as_bytes());
    }

    #[test]
    fn test_rename_too_long() {
        let name = "n".repeat(150);
        assert!(matches!(
            with_new_name(&sample_header(), &name),
            Err(TransformError::Header(_))
        ));
    }
}
