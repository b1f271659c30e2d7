//! In-memory container filesystem.

use super::{DirEntryInfo, Filesystem, ROOT_DIR};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone)]
enum Node {
    Dir { modified_millis: i64 },
    File { data: Vec<u8>, modified_millis: i64 },
}

/// In-memory directory tree
///
/// Every mutation advances an internal clock by one second, so a write or
/// touch always yields a new modification time.
pub struct MemoryFs {
    nodes: RwLock<BTreeMap<String, Node>>,
    clock: AtomicI64,
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ROOT_DIR)
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_of(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "memory filesystem lock poisoned")
}

impl MemoryFs {
    /// Create an empty filesystem
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            clock: AtomicI64::new(1_600_000_000_000),
        }
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1000, Ordering::SeqCst) + 1000
    }

    fn make_parents(nodes: &mut BTreeMap<String, Node>, path: &str, now: i64) {
        let mut current = parent_of(path);
        while !current.is_empty() {
            nodes
                .entry(current.to_string())
                .or_insert(Node::Dir { modified_millis: now });
            current = parent_of(current);
        }
    }

    /// Create a directory and any missing parents
    pub fn create_dir_all(&self, path: &str) -> io::Result<()> {
        let path = normalize(path);
        let now = self.tick();
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        Self::make_parents(&mut nodes, &path, now);
        if !path.is_empty() {
            nodes
                .entry(path)
                .or_insert(Node::Dir { modified_millis: now });
        }
        Ok(())
    }

    /// Create or replace a file, creating parent directories as needed
    pub fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let path = normalize(path);
        let now = self.tick();
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        if let Some(Node::Dir { .. }) = nodes.get(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", path),
            ));
        }
        Self::make_parents(&mut nodes, &path, now);
        nodes.insert(
            path,
            Node::File {
                data: data.to_vec(),
                modified_millis: now,
            },
        );
        Ok(())
    }

    /// Bump a file's modification time without changing its content
    pub fn touch(&self, path: &str) -> io::Result<()> {
        let path = normalize(path);
        let now = self.tick();
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        match nodes.get_mut(&path) {
            Some(Node::File {
                modified_millis, ..
            })
            | Some(Node::Dir { modified_millis }) => {
                *modified_millis = now;
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, path)),
        }
    }

    /// Remove a single file
    pub fn remove_file(&self, path: &str) -> io::Result<()> {
        let path = normalize(path);
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        match nodes.get(&path) {
            Some(Node::File { .. }) => {
                nodes.remove(&path);
                Ok(())
            }
            _ => Err(io::Error::new(io::ErrorKind::NotFound, path)),
        }
    }

    /// Remove a directory and everything below it
    pub fn remove_tree(&self, path: &str) -> io::Result<()> {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        if !nodes.contains_key(&path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path));
        }
        nodes.retain(|key, _| key != &path && !key.starts_with(&prefix));
        Ok(())
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for MemoryFs {
    fn read_dir(&self, dir: &str) -> io::Result<Vec<io::Result<DirEntryInfo>>> {
        let dir = normalize(dir);
        let nodes = self.nodes.read().map_err(|_| poisoned())?;

        if !dir.is_empty() && !matches!(nodes.get(&dir), Some(Node::Dir { .. })) {
            return Err(io::Error::new(io::ErrorKind::NotFound, dir));
        }

        let entries = nodes
            .iter()
            .filter(|(path, _)| parent_of(path) == dir)
            .map(|(path, node)| {
                let name = path.rsplit('/').next().unwrap_or(path).to_string();
                Ok(match node {
                    Node::Dir { modified_millis } => DirEntryInfo {
                        name,
                        is_dir: true,
                        size: 0,
                        modified_millis: *modified_millis,
                    },
                    Node::File {
                        data,
                        modified_millis,
                    } => DirEntryInfo {
                        name,
                        is_dir: false,
                        size: data.len() as u64,
                        modified_millis: *modified_millis,
                    },
                })
            })
            .collect();

        Ok(entries)
    }

    fn open(&self, dir: &str, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let path = normalize(&super::join(dir, name));
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        match nodes.get(&path) {
            Some(Node::File { data, .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, path)),
        }
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(fs: &MemoryFs, dir: &str) -> Vec<String> {
        fs.read_dir(dir)
            .unwrap()
            .into_iter()
            .map(|e| e.unwrap().name)
            .collect()
    }

    #[test]
    fn write_creates_parent_directories() {
        let fs = MemoryFs::new();
        fs.write("test/2021-12-26/Darks/image06.fits", b"DUMMY").unwrap();

        assert_eq!(names(&fs, "."), vec!["test"]);
        assert_eq!(names(&fs, "test"), vec!["2021-12-26"]);
        assert_eq!(names(&fs, "test/2021-12-26/Darks"), vec!["image06.fits"]);
    }

    #[test]
    fn touch_advances_modification_time() {
        let fs = MemoryFs::new();
        fs.write("a.fits", b"x").unwrap();
        let before = fs.read_dir(".").unwrap()[0].as_ref().unwrap().modified_millis;

        fs.touch("a.fits").unwrap();
        let after = fs.read_dir(".").unwrap()[0].as_ref().unwrap().modified_millis;

        assert!(after > before);
    }

    #[test]
    fn remove_tree_drops_descendants_only() {
        let fs = MemoryFs::new();
        fs.write("keep/a.fits", b"x").unwrap();
        fs.write("drop/b.fits", b"x").unwrap();
        fs.write("drop/sub/c.fits", b"x").unwrap();
        fs.write("dropped.fits", b"x").unwrap();

        fs.remove_tree("drop").unwrap();

        assert_eq!(names(&fs, "."), vec!["dropped.fits", "keep"]);
        assert!(fs.read_dir("drop").is_err());
    }

    #[test]
    fn open_returns_content() {
        let fs = MemoryFs::new();
        fs.write("dir/x.fit", b"content").unwrap();

        let mut buf = Vec::new();
        fs.open("dir", "x.fit").unwrap().read_to_end(&mut buf).unwrap();

        assert_eq!(buf, b"content");
    }

    #[test]
    fn remove_missing_file_fails() {
        let fs = MemoryFs::new();
        assert!(fs.remove_file("nope.fits").is_err());
    }
}
