//! In-memory catalog backend for testing.

use super::{
    CatalogStats, CatalogStore, CatalogTx, FileRecord, ImageSet, NewFile, Root,
    UnclassifiedImage, UnprocessedFile,
};
use crate::core::grouper::SetKey;
use crate::core::header::HeaderCard;
use crate::error::StoreError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct ImageRow {
    file_id: i64,
    set_id: Option<i64>,
    cards: Vec<HeaderCard>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    roots: BTreeMap<i64, Root>,
    files: BTreeMap<i64, FileRecord>,
    images: BTreeMap<i64, ImageRow>,
    sets: BTreeMap<i64, ImageSet>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn root_named(&self, name: &str) -> Option<&Root> {
        self.roots.values().find(|r| r.name == name)
    }
}

/// In-memory catalog backend
///
/// Keeps the same uniqueness and cascade rules as the SQLite backend. A
/// transaction works on a copy of the state that replaces the original only
/// on success.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryTx<'s> {
    state: &'s mut MemoryState,
}

impl CatalogTx for MemoryTx<'_> {
    fn add_root(&mut self, name: &str, path: &Path) -> Result<Root, StoreError> {
        if self.state.root_named(name).is_some() {
            return Err(StoreError::DuplicateKey(format!("root {}", name)));
        }

        let root = Root {
            id: self.state.allocate_id(),
            name: name.to_string(),
            path: path.to_path_buf(),
        };
        self.state.roots.insert(root.id, root.clone());
        Ok(root)
    }

    fn set_root_path(&mut self, name: &str, path: &Path) -> Result<Root, StoreError> {
        let root = self
            .state
            .roots
            .values_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| StoreError::UnknownRoot(name.to_string()))?;
        root.path = path.to_path_buf();
        Ok(root.clone())
    }

    fn insert_files(&mut self, files: &[NewFile]) -> Result<(), StoreError> {
        for file in files {
            if !self.state.roots.contains_key(&file.root_id) {
                return Err(StoreError::UnknownRoot(file.root_id.to_string()));
            }

            let taken = self.state.files.values().any(|f| {
                f.root_id == file.root_id && f.path == file.path && f.name == file.name
            });
            if taken {
                return Err(StoreError::DuplicateKey(format!("file {}/{}", file.path, file.name)));
            }

            let id = self.state.allocate_id();
            self.state.files.insert(
                id,
                FileRecord {
                    id,
                    root_id: file.root_id,
                    path: file.path.clone(),
                    name: file.name.clone(),
                    size: file.size,
                    mtime_millis: file.mtime_millis,
                },
            );
        }
        Ok(())
    }

    fn delete_files(&mut self, ids: &[i64]) -> Result<(), StoreError> {
        for id in ids {
            self.state.files.remove(id);
        }
        self.state
            .images
            .retain(|_, image| !ids.contains(&image.file_id));
        Ok(())
    }

    fn insert_image(&mut self, file_id: i64, cards: &[HeaderCard]) -> Result<i64, StoreError> {
        if !self.state.files.contains_key(&file_id) {
            return Err(StoreError::QueryFailed(format!("no file with id {}", file_id)));
        }

        let mut keys = BTreeSet::new();
        if let Some(card) = cards.iter().find(|c| !keys.insert(c.key.as_str())) {
            return Err(StoreError::DuplicateKey(format!("image meta {}", card.key)));
        }

        let id = self.state.allocate_id();
        self.state.images.insert(
            id,
            ImageRow {
                file_id,
                set_id: None,
                cards: cards.to_vec(),
            },
        );
        Ok(id)
    }

    fn find_matching_set(
        &mut self,
        key: &SetKey,
        tolerance: f64,
    ) -> Result<Option<ImageSet>, StoreError> {
        Ok(self
            .state
            .sets
            .values()
            .find(|set| key.matches(&set.key, tolerance))
            .cloned())
    }

    fn create_set(&mut self, key: &SetKey) -> Result<ImageSet, StoreError> {
        let set = ImageSet {
            id: self.state.allocate_id(),
            key: key.clone(),
        };
        self.state.sets.insert(set.id, set.clone());
        Ok(set)
    }

    fn assign_set(&mut self, image_id: i64, set_id: i64) -> Result<(), StoreError> {
        if !self.state.sets.contains_key(&set_id) {
            return Err(StoreError::QueryFailed(format!("no set with id {}", set_id)));
        }
        if let Some(image) = self.state.images.get_mut(&image_id) {
            image.set_id = Some(set_id);
        }
        Ok(())
    }
}

impl CatalogStore for MemoryStore {
    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn CatalogTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut draft = state.clone();
        work(&mut MemoryTx { state: &mut draft })?;
        *state = draft;
        Ok(())
    }

    fn roots(&self) -> Result<Vec<Root>, StoreError> {
        let mut roots: Vec<_> = self.read()?.roots.values().cloned().collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roots)
    }

    fn root_by_name(&self, name: &str) -> Result<Option<Root>, StoreError> {
        Ok(self.read()?.root_named(name).cloned())
    }

    fn files_in_dir(&self, root_id: i64, path: &str) -> Result<Vec<FileRecord>, StoreError> {
        let mut files: Vec<_> = self
            .read()?
            .files
            .values()
            .filter(|f| f.root_id == root_id && f.path == path)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn file_dirs(&self, root_id: i64) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .read()?
            .files
            .values()
            .filter(|f| f.root_id == root_id)
            .map(|f| f.path.clone())
            .collect())
    }

    fn unprocessed_files(&self) -> Result<Vec<UnprocessedFile>, StoreError> {
        let state = self.read()?;
        let processed: BTreeSet<i64> = state.images.values().map(|i| i.file_id).collect();

        Ok(state
            .files
            .values()
            .filter(|f| !processed.contains(&f.id))
            .filter_map(|f| {
                state.roots.get(&f.root_id).map(|root| UnprocessedFile {
                    file: f.clone(),
                    root: root.clone(),
                })
            })
            .collect())
    }

    fn unclassified_images(&self) -> Result<Vec<UnclassifiedImage>, StoreError> {
        let state = self.read()?;

        Ok(state
            .images
            .iter()
            .filter(|(_, image)| image.set_id.is_none() && !image.cards.is_empty())
            .filter_map(|(id, image)| {
                state.files.get(&image.file_id).map(|file| UnclassifiedImage {
                    image_id: *id,
                    root_id: file.root_id,
                    path: file.path.clone(),
                    file_name: file.name.clone(),
                    cards: image.cards.clone(),
                })
            })
            .collect())
    }

    fn image_sets(&self) -> Result<Vec<ImageSet>, StoreError> {
        Ok(self.read()?.sets.values().cloned().collect())
    }

    fn set_members(&self, set_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .read()?
            .images
            .iter()
            .filter(|(_, image)| image.set_id == Some(set_id))
            .map(|(id, _)| *id)
            .collect())
    }

    fn stats(&self) -> Result<CatalogStats, StoreError> {
        let state = self.read()?;
        Ok(CatalogStats {
            roots: state.roots.len(),
            files: state.files.len(),
            images: state.images.len(),
            image_meta: state.images.values().map(|i| i.cards.len()).sum(),
            image_sets: state.sets.len(),
            classified_images: state.images.values().filter(|i| i.set_id.is_some()).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::in_transaction;

    fn store_with_root() -> (MemoryStore, Root) {
        let store = MemoryStore::new();
        let root = in_transaction(&store, |tx| tx.add_root("archive", Path::new("/mnt/astro")))
            .unwrap();
        (store, root)
    }

    fn new_file(root: &Root, name: &str) -> NewFile {
        NewFile {
            root_id: root.id,
            path: ".".to_string(),
            name: name.to_string(),
            size: 10,
            mtime_millis: 1,
        }
    }

    #[test]
    fn failed_transaction_leaves_state_untouched() {
        let (store, root) = store_with_root();

        let result = in_transaction(&store, |tx| {
            tx.insert_files(&[new_file(&root, "a.fits")])?;
            tx.insert_files(&[new_file(&root, "a.fits")])
        });

        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert_eq!(store.stats().unwrap().files, 0);
    }

    #[test]
    fn delete_cascades_to_images() {
        let (store, root) = store_with_root();
        in_transaction(&store, |tx| tx.insert_files(&[new_file(&root, "a.fits")])).unwrap();
        let file = store.files_in_dir(root.id, ".").unwrap().remove(0);
        in_transaction(&store, |tx| tx.insert_image(file.id, &[HeaderCard::new("A", "1")]))
            .unwrap();

        in_transaction(&store, |tx| tx.delete_files(&[file.id])).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.images, 0);
        assert_eq!(stats.image_meta, 0);
    }

    #[test]
    fn duplicate_meta_keys_rejected() {
        let (store, root) = store_with_root();
        in_transaction(&store, |tx| tx.insert_files(&[new_file(&root, "a.fits")])).unwrap();
        let file = store.files_in_dir(root.id, ".").unwrap().remove(0);

        let result = in_transaction(&store, |tx| {
            tx.insert_image(file.id, &[HeaderCard::new("A", "1"), HeaderCard::new("A", "2")])
        });

        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert_eq!(store.stats().unwrap().images, 0);
    }

    #[test]
    fn image_without_cards_is_not_classifiable() {
        let (store, root) = store_with_root();
        in_transaction(&store, |tx| tx.insert_files(&[new_file(&root, "a.fits")])).unwrap();
        let file = store.files_in_dir(root.id, ".").unwrap().remove(0);
        in_transaction(&store, |tx| tx.insert_image(file.id, &[])).unwrap();

        assert!(store.unprocessed_files().unwrap().is_empty());
        assert!(store.unclassified_images().unwrap().is_empty());
    }
}
