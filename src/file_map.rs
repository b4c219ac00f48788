//! `FileMap`: an ordered, gap-aware set of files searchable by name and by
//! address (§3, §4.3).

use crate::error::{Error, Result};
use crate::file_info::{FileInfo, DEFINITION_BASE};

/// Ordered, non-overlapping collection of [`FileInfo`] entries.
#[derive(Debug, Default)]
pub struct FileMap {
    // Kept sorted by address at all times.
    files: Vec<FileInfo>,
}

impl FileMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Number of files currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True if no files are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn overlaps(&self, address: u32, size: u32) -> bool {
        let end = address.saturating_add(size);
        self.files
            .iter()
            .any(|f| address < f.end_address() && f.address < end)
    }

    /// Insert `file`, preserving address order. Rejects the insert if it
    /// would overlap an existing file.
    pub fn insert(&mut self, file: FileInfo) -> Result<()> {
        if self.overlaps(file.address, file.size) {
            return Err(Error::InvalidArgument(format!(
                "file {:?} at {:#x} (size {}) overlaps an existing file",
                file.name, file.address, file.size
            )));
        }
        let pos = self
            .files
            .partition_point(|f| f.address < file.address);
        self.files.insert(pos, file);
        Ok(())
    }

    /// Compute the next free address starting at `from`, such that a file
    /// of `size` bytes placed there would not overlap anything.
    fn next_free_address(&self, from: u32, size: u32) -> u32 {
        let mut candidate = from;
        loop {
            match self
                .files
                .iter()
                .filter(|f| f.end_address() > candidate)
                .min_by_key(|f| f.address)
            {
                Some(f) if f.address < candidate.saturating_add(size) => {
                    candidate = f.end_address();
                }
                _ => return candidate,
            }
        }
    }

    /// Insert `file` at the next free address starting at 0x0000, for
    /// node port-data files (§4.3 invariant ii).
    pub fn auto_insert_port_data(&mut self, mut file: FileInfo) -> Result<u32> {
        let addr = self.next_free_address(0, file.size);
        file.address = addr;
        self.insert(file)?;
        Ok(addr)
    }

    /// Insert `file` at the next free address at or above
    /// [`DEFINITION_BASE`], for node definition files (§4.3 invariant iii).
    pub fn auto_insert_definition(&mut self, mut file: FileInfo) -> Result<u32> {
        let addr = self.next_free_address(DEFINITION_BASE, file.size);
        file.address = addr;
        self.insert(file)?;
        Ok(addr)
    }

    /// Find the unique file whose `[address, address+size)` contains `addr`.
    #[must_use]
    pub fn find_by_address(&self, addr: u32) -> Option<&FileInfo> {
        let pos = self.files.partition_point(|f| f.address <= addr);
        if pos == 0 {
            return None;
        }
        let f = &self.files[pos - 1];
        f.contains(addr).then_some(f)
    }

    /// Mutable version of [`FileMap::find_by_address`].
    pub fn find_by_address_mut(&mut self, addr: u32) -> Option<&mut FileInfo> {
        let pos = self.files.partition_point(|f| f.address <= addr);
        if pos == 0 {
            return None;
        }
        let f = &mut self.files[pos - 1];
        if f.contains(addr) { Some(f) } else { None }
    }

    /// Find a file by exact name (linear scan, per §4.3).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Mutable version of [`FileMap::find_by_name`].
    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut FileInfo> {
        self.files.iter_mut().find(|f| f.name == name)
    }

    /// Remove the file with this name, if any, returning it.
    pub fn remove_by_name(&mut self, name: &str) -> Option<FileInfo> {
        let pos = self.files.iter().position(|f| f.name == name)?;
        Some(self.files.remove(pos))
    }

    /// Iterate all files in ascending address order.
    pub fn iter_in_address_order(&self) -> impl Iterator<Item = &FileInfo> {
        self.files.iter()
    }

    /// Drop all tracked files without any further bookkeeping. Used on
    /// disconnect, where ownership of the `FileInfo` values themselves has
    /// already been (or is about to be) moved into a detach list by the
    /// caller — this call just empties the index referencing them.
    pub fn clear_weak(&mut self) -> Vec<FileInfo> {
        std::mem::take(&mut self.files)
    }
}
