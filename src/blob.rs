use std::{
    fs,
    path::{Path, PathBuf},
};

use bevy::{log::error, utils::HashMap};

/// Where save files are written to and read from. Failures are reported by returning `false`,
/// `None` or an empty list.
pub trait BlobStore {
    fn write_file(&mut self, path: &Path, bytes: &[u8]) -> bool;

    fn read_file(&self, path: &Path) -> Option<Vec<u8>>;

    /// Names of the files in `dir` whose extension is `extension`, sorted
    fn list_files(&self, dir: &Path, extension: &str) -> Vec<String>;
}

/// A [`BlobStore`] on the local file system. Missing directories are created on write.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsBlobStore;

impl BlobStore for FsBlobStore {
    fn write_file(&mut self, path: &Path, bytes: &[u8]) -> bool {
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                error!("failed to create {:?}: {}", parent, err);
                return false;
            }
        }
        match fs::write(path, bytes) {
            Ok(_) => true,
            Err(err) => {
                error!("failed to write {:?}: {}", path, err);
                false
            }
        }
    }

    fn read_file(&self, path: &Path) -> Option<Vec<u8>> {
        match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                error!("failed to read {:?}: {}", path, err);
                None
            }
        }
    }

    fn list_files(&self, dir: &Path, extension: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return vec![];
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_extension(path, extension))
            .filter_map(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.to_string())
            })
            .collect();
        names.sort();
        names
    }
}

/// A [`BlobStore`] kept entirely in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryBlobStore {
    pub files: HashMap<PathBuf, Vec<u8>>,
}

impl BlobStore for MemoryBlobStore {
    fn write_file(&mut self, path: &Path, bytes: &[u8]) -> bool {
        self.files.insert(path.to_path_buf(), bytes.to_vec());
        true
    }

    fn read_file(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    fn list_files(&self, dir: &Path, extension: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir) && has_extension(path, extension))
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .map(|name| name.to_string())
            .collect();
        names.sort();
        names
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(extension)
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::{BlobStore, FsBlobStore, MemoryBlobStore};

    #[test]
    fn test_memory_store_lists_by_directory_and_extension() {
        let mut store = MemoryBlobStore::default();
        assert!(store.write_file(Path::new("saves/world_a.sav"), &[1]));
        assert!(store.write_file(Path::new("saves/notes.txt"), &[2]));
        assert!(store.write_file(Path::new("other/world_b.sav"), &[3]));

        assert_eq!(
            store.list_files(Path::new("saves"), "sav"),
            vec!["world_a.sav".to_string()]
        );
        assert_eq!(store.read_file(Path::new("saves/world_a.sav")), Some(vec![1]));
        assert_eq!(store.read_file(Path::new("saves/missing.sav")), None);
    }

    #[test]
    fn test_fs_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("bevy_state_save_blob_{}", std::process::id()));
        let mut store = FsBlobStore;

        assert!(store.write_file(&dir.join("harbor_one.sav"), &[4, 5, 6]));
        assert!(store.write_file(&dir.join("ignored.log"), &[0]));
        assert_eq!(store.read_file(&dir.join("harbor_one.sav")), Some(vec![4, 5, 6]));
        assert_eq!(store.list_files(&dir, "sav"), vec!["harbor_one.sav".to_string()]);
        assert!(store.read_file(&dir.join("absent.sav")).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
