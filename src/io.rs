use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use spin::Mutex;

use crate::error::{Error, Result};

/// An opened executable
pub trait OpenFile {
    /// Read up to `buf.len()` bytes at `offset`; returns how many were read
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where executables are looked up by name
pub trait ExecutableStore {
    /// Fails with `ExecutableNotFound` when no such executable exists
    fn open(&self, name: &str) -> Result<Box<dyn OpenFile>>;
}

/// Executables read from a host directory
pub struct HostFileStore {
    root: PathBuf,
}

impl HostFileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        HostFileStore {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ExecutableStore for HostFileStore {
    fn open(&self, name: &str) -> Result<Box<dyn OpenFile>> {
        let path = self.root.join(name);
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ExecutableNotFound(name.to_string()),
            _ => Error::Io(e),
        })?;
        let len = file.metadata()?.len() as usize;
        Ok(Box::new(HostFile {
            file: Mutex::new(file),
            len,
        }))
    }
}

struct HostFile {
    file: Mutex<File>,
    len: usize,
}

impl OpenFile for HostFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..])? {
                0 => break,
                n => read += n,
            }
        }
        Ok(read)
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Executables kept in memory, keyed by name
#[derive(Default)]
pub struct MemFileStore {
    files: HashMap<String, Arc<[u8]>>,
}

impl MemFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, image: impl Into<Vec<u8>>) {
        let image: Vec<u8> = image.into();
        self.files.insert(name.into(), Arc::from(image));
    }

    pub fn with(mut self, name: impl Into<String>, image: impl Into<Vec<u8>>) -> Self {
        self.insert(name, image);
        self
    }
}

impl ExecutableStore for MemFileStore {
    fn open(&self, name: &str) -> Result<Box<dyn OpenFile>> {
        let image = self
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ExecutableNotFound(name.to_string()))?;
        Ok(Box::new(MemFile { image }))
    }
}

struct MemFile {
    image: Arc<[u8]>,
}

impl OpenFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        if offset >= self.image.len() {
            return Ok(0);
        }
        let available = &self.image[offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn len(&self) -> usize {
        self.image.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_read_at() {
        let store = MemFileStore::new().with("prog", vec![1u8, 2, 3, 4, 5]);
        let file = store.open("prog").unwrap();
        assert_eq!(file.len(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(file.read_at(&mut buf, 1).unwrap(), 3);
        assert_eq!(buf, [2, 3, 4]);

        // short read at the end
        assert_eq!(file.read_at(&mut buf, 4).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(file.read_at(&mut buf, 9).unwrap(), 0);
    }

    #[test]
    fn test_mem_store_missing() {
        let store = MemFileStore::new();
        assert!(matches!(store.open("nope"), Err(Error::ExecutableNotFound(name)) if name == "nope"));
    }

    #[test]
    fn test_host_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("halt"), [10u8, 20, 30]).unwrap();
        let store = HostFileStore::new(dir.path());

        let file = store.open("halt").unwrap();
        assert_eq!(file.len(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 0).unwrap(), 3);
        assert_eq!(&buf[..3], &[10, 20, 30]);
        assert_eq!(file.read_at(&mut buf, 3).unwrap(), 0);

        assert!(matches!(store.open("missing"), Err(Error::ExecutableNotFound(_))));
    }
}
