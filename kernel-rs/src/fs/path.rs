//! Paths and file names.
//!
//! Paths are absolute, `/`-separated, with components of at most
//! `FILE_NAME_MAX_LEN` bytes. `FileName` is one component, stored inline so
//! it can live inside directory entries and tables.

use core::fmt;
use core::str;

use crate::{
    error::KernelError,
    param::{FILE_NAME_MAX_LEN, PATH_MAX_LEN},
};

/// One path component.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileName {
    len: u8,
    bytes: [u8; FILE_NAME_MAX_LEN],
}

impl FileName {
    /// Accepts a non-empty component without `/` or NUL, at most
    /// `FILE_NAME_MAX_LEN` bytes.
    pub fn new(name: &str) -> Result<Self, KernelError> {
        let raw = name.as_bytes();
        if raw.is_empty() || raw.len() > FILE_NAME_MAX_LEN {
            return Err(KernelError::BadPath);
        }
        if raw.iter().any(|b| *b == b'/' || *b == 0) {
            return Err(KernelError::BadPath);
        }
        let mut bytes = [0; FILE_NAME_MAX_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            len: raw.len() as u8,
            bytes,
        })
    }

    /// Rebuild a name from a fixed on-disk field: everything up to the
    /// first NUL.
    pub fn from_stored(stored: &[u8]) -> Self {
        let len = stored
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(stored.len())
            .min(FILE_NAME_MAX_LEN);
        let mut bytes = [0; FILE_NAME_MAX_LEN];
        bytes[..len].copy_from_slice(&stored[..len]);
        Self {
            len: len as u8,
            bytes,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(self.as_bytes()).unwrap_or("?")
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A borrowed absolute path.
#[derive(Clone, Copy)]
pub struct Path<'p> {
    inner: &'p str,
}

impl<'p> Path<'p> {
    pub fn new(path: &'p str) -> Result<Self, KernelError> {
        if path.len() > PATH_MAX_LEN || !path.starts_with('/') {
            return Err(KernelError::BadPath);
        }
        Ok(Self { inner: path })
    }

    pub fn as_str(&self) -> &'p str {
        self.inner
    }

    /// True for `/` (possibly written with repeated slashes).
    pub fn is_root(&self) -> bool {
        self.components().next().is_none()
    }

    /// The path components, left to right, empty segments skipped.
    pub fn components(&self) -> impl Iterator<Item = &'p str> {
        self.inner.split('/').filter(|c| !c.is_empty())
    }

    /// The final component.
    pub fn file_name(&self) -> Result<FileName, KernelError> {
        let last = self.components().last().ok_or(KernelError::BadPath)?;
        FileName::new(last)
    }

    /// All components but the last: the directories to walk through.
    pub fn parent_components(&self) -> Result<Vec<FileName>, KernelError> {
        let all: Vec<&str> = self.components().collect();
        if all.is_empty() {
            return Err(KernelError::BadPath);
        }
        all[..all.len() - 1]
            .iter()
            .map(|c| FileName::new(c))
            .collect()
    }
}

impl fmt::Debug for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_skip_empty_segments() {
        let path = Path::new("///a//bb/c").unwrap();
        let parts: Vec<&str> = path.components().collect();
        assert_eq!(parts, vec!["a", "bb", "c"]);
        assert_eq!(path.file_name().unwrap().as_str(), "c");
        let parents: Vec<String> = path
            .parent_components()
            .unwrap()
            .iter()
            .map(|n| n.as_str().to_string())
            .collect();
        assert_eq!(parents, vec!["a", "bb"]);
    }

    #[test]
    fn root_has_no_file_name() {
        let root = Path::new("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.file_name(), Err(KernelError::BadPath));
    }

    #[test]
    fn relative_paths_are_rejected() {
        assert!(Path::new("a/b").is_err());
        assert!(Path::new("").is_err());
    }

    #[test]
    fn long_names_are_rejected() {
        assert!(FileName::new("123456789").is_ok());
        assert!(FileName::new("1234567890").is_err());
        assert!(FileName::new("").is_err());
        assert!(FileName::new("a/b").is_err());
    }

    #[test]
    fn stored_names_round_trip() {
        let name = FileName::new("hello").unwrap();
        let mut stored = [0u8; 10];
        stored[..5].copy_from_slice(b"hello");
        assert_eq!(FileName::from_stored(&stored), name);
    }
}
