//! An in-memory file system.

use std::collections::BTreeMap;

use super::device::Device;
use super::{path, FileSystem, Handle};

enum Node {
    Dir,
    File(Vec<u8>),
    Device(Box<dyn Device>),
}

/// A [`FileSystem`] kept entirely in host memory.
///
/// This is the file system used for host simulation of the kernel.
/// It supports directories, plain files and mounted [`Device`]s.
///
/// Storage can be artificially limited with [`MemFs::set_capacity`],
/// which makes [`FileSystem::create`] and [`FileSystem::resize`] fail
/// once the total size of all files would exceed the limit.
///
/// ```
/// use bytekernel::fs::{FileSystem, MemFs};
///
/// let mut fs = MemFs::new();
/// assert!(fs.add_file("/bin/hello", b"hi".to_vec()));
///
/// let fd = fs.open("/bin/hello").unwrap();
/// let mut buf = [0; 4];
/// assert_eq!(fs.read(fd, 0, &mut buf), 2);
/// assert_eq!(&buf[..2], b"hi");
/// ```
pub struct MemFs {
    nodes: BTreeMap<String, Node>,
    handles: BTreeMap<u16, String>,
    capacity: Option<u32>,
    resize_calls: usize,
}

impl MemFs {
    /// Creates a file system containing only the root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);

        Self { nodes, handles: BTreeMap::new(), capacity: None, resize_calls: 0 }
    }

    /// Creates a directory along with any missing parents.
    ///
    /// This fails if something other than a directory is in the way.
    pub fn mkdir(&mut self, dir: &str) -> bool {
        let dir = path::normalise(dir);
        match self.nodes.get(&dir) {
            Some(Node::Dir) => return true,
            Some(_) => return false,
            None => {},
        }

        let (parent, _) = path::split(&dir);
        if !self.mkdir(&parent) { return false; }
        self.nodes.insert(dir, Node::Dir);
        true
    }

    /// Adds a file with the given contents, creating any missing parent directories.
    ///
    /// An existing file at the path is replaced. Capacity limits do not apply.
    pub fn add_file(&mut self, file: &str, contents: Vec<u8>) -> bool {
        let file = path::normalise(file);
        let (parent, _) = path::split(&file);
        if file == "/" || !self.mkdir(&parent) { return false; }
        if matches!(self.nodes.get(&file), Some(Node::Dir | Node::Device(_))) { return false; }

        self.nodes.insert(file, Node::File(contents));
        true
    }

    /// Mounts a device at the given path, creating any missing parent directories.
    pub fn add_device(&mut self, dev_path: &str, device: impl Device + 'static) -> bool {
        let dev_path = path::normalise(dev_path);
        let (parent, _) = path::split(&dev_path);
        if dev_path == "/" || self.nodes.contains_key(&dev_path) || !self.mkdir(&parent) {
            return false;
        }

        self.nodes.insert(dev_path, Node::Device(Box::new(device)));
        true
    }

    /// Gets the contents of a file.
    pub fn contents(&self, file: &str) -> Option<&[u8]> {
        match self.nodes.get(&path::normalise(file)) {
            Some(Node::File(data)) => Some(data),
            _ => None,
        }
    }

    /// Limits the total number of bytes all files may hold (or removes the limit with `None`).
    pub fn set_capacity(&mut self, capacity: Option<u32>) {
        self.capacity = capacity;
    }

    /// The number of times [`FileSystem::resize`] has been called, successful or not.
    pub fn resize_calls(&self) -> usize {
        self.resize_calls
    }

    /// The number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn used(&self) -> u64 {
        self.nodes.values()
            .map(|n| match n {
                Node::File(data) => data.len() as u64,
                _ => 0,
            })
            .sum()
    }

    /// Checks whether replacing a file of length `old` with one of length `new` fits in the capacity.
    fn fits(&self, old: usize, new: u32) -> bool {
        match self.capacity {
            Some(cap) => self.used() - old as u64 + u64::from(new) <= u64::from(cap),
            None => true,
        }
    }

    fn node_mut(&mut self, handle: Handle) -> Option<&mut Node> {
        let p = self.handles.get(&handle.get())?;
        self.nodes.get_mut(p)
    }

    fn children(&self, dir: &str) -> impl Iterator<Item = &String> + '_ {
        let dir = dir.to_string();
        self.nodes.keys()
            .filter(move |k| k.as_str() != "/" && path::split(k).0 == dir)
    }
}
impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for MemFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFs")
            .field("paths", &self.nodes.keys().collect::<Vec<_>>())
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

impl FileSystem for MemFs {
    fn open(&mut self, p: &str) -> Option<Handle> {
        let p = path::normalise(p);
        if !self.nodes.contains_key(&p) { return None; }

        // lowest free non-zero handle
        let raw = (1..=u16::MAX).find(|h| !self.handles.contains_key(h))?;
        self.handles.insert(raw, p);
        Some(Handle(raw))
    }

    fn close(&mut self, handle: Handle) {
        self.handles.remove(&handle.get());
    }

    fn read(&mut self, handle: Handle, offset: u32, buf: &mut [u8]) -> usize {
        match self.node_mut(handle) {
            Some(Node::File(data)) => {
                let start = (offset as usize).min(data.len());
                let src = &data[start..];
                let n = src.len().min(buf.len());
                buf[..n].copy_from_slice(&src[..n]);
                n
            },
            Some(Node::Device(dev)) => {
                let mut n = 0;
                for slot in buf.iter_mut() {
                    let Some(b) = dev.read_byte() else { break };
                    *slot = b;
                    n += 1;
                }
                n
            },
            Some(Node::Dir) | None => 0,
        }
    }

    fn write(&mut self, handle: Handle, offset: u32, data: &[u8]) -> usize {
        match self.node_mut(handle) {
            Some(Node::File(contents)) => {
                let start = (offset as usize).min(contents.len());
                let dst = &mut contents[start..];
                let n = dst.len().min(data.len());
                dst[..n].copy_from_slice(&data[..n]);
                n
            },
            Some(Node::Device(dev)) => data.iter().take_while(|&&b| dev.write_byte(b)).count(),
            Some(Node::Dir) | None => 0,
        }
    }

    fn create(&mut self, p: &str, size: u32) -> bool {
        let p = path::normalise(p);
        let (parent, _) = path::split(&p);
        if !matches!(self.nodes.get(&parent), Some(Node::Dir)) { return false; }

        let old = match self.nodes.get(&p) {
            Some(Node::File(data)) => data.len(),
            Some(_) => return false,
            None => 0,
        };
        if !self.fits(old, size) { return false; }

        self.nodes.insert(p, Node::File(vec![0; size as usize]));
        true
    }

    fn resize(&mut self, p: &str, size: u32) -> bool {
        self.resize_calls += 1;

        let p = path::normalise(p);
        let old = match self.nodes.get(&p) {
            Some(Node::File(data)) => data.len(),
            _ => return false,
        };
        if !self.fits(old, size) { return false; }

        match self.nodes.get_mut(&p) {
            Some(Node::File(data)) => {
                data.resize(size as usize, 0);
                true
            },
            _ => false,
        }
    }

    fn delete(&mut self, p: &str) -> bool {
        let p = path::normalise(p);
        match self.nodes.get(&p) {
            None => return false,
            Some(Node::Dir) if p == "/" || self.children(&p).next().is_some() => return false,
            Some(_) => {},
        }
        // handle numbers are reused, so an open handle must never outlive its file
        if self.handles.values().any(|hp| *hp == p) { return false; }

        self.nodes.remove(&p);
        true
    }

    fn exists(&self, p: &str) -> bool {
        self.nodes.contains_key(&path::normalise(p))
    }

    fn is_dir(&self, p: &str) -> bool {
        matches!(self.nodes.get(&path::normalise(p)), Some(Node::Dir))
    }

    fn len(&self, p: &str) -> Option<u32> {
        match self.nodes.get(&path::normalise(p)) {
            Some(Node::File(data)) => u32::try_from(data.len()).ok(),
            _ => None,
        }
    }

    fn path_of(&self, handle: Handle) -> Option<String> {
        self.handles.get(&handle.get()).cloned()
    }

    fn child(&self, handle: Handle, n: u16) -> Option<String> {
        let dir = self.handles.get(&handle.get())?;
        if !matches!(self.nodes.get(dir), Some(Node::Dir)) { return None; }

        self.children(dir).nth(usize::from(n)).cloned()
    }

    fn can_read(&mut self, handle: Handle) -> bool {
        match self.node_mut(handle) {
            Some(Node::Device(dev)) => dev.ready(),
            Some(_) => true,
            None => false,
        }
    }
}
