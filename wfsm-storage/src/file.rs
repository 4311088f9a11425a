//! File-backed entity store.
//!
//! Layout under the store directory:
//!
//! ```text
//! <dir>/index.json          checksum + schedule metadata for every entity
//! <dir>/<kind>/<id>.json    one JSON document per entity
//! ```
//!
//! The index is loaded into memory at open and rewritten on every change, so
//! due-time scans never touch entity files that are not due. Every entity read
//! is verified against the crc32c recorded in the index.

use crate::error::StorageError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use wfsm_core::{Entity, EntityStore, StoreError};

const INDEX_FILE: &str = "index.json";

/// File store configuration.
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Base directory for all entity files.
    pub dir: PathBuf,
    /// fsync entity files before they replace the previous version.
    pub fsync: bool,
}

impl FileStoreConfig {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            fsync: true,
        }
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}

/// Index entry stored alongside each entity file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub kind: String,
    pub id: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub next_transition_at: i64,
    pub updated_at: i64,
}

impl EntityMeta {
    fn is_due(&self, now: i64) -> bool {
        self.next_transition_at > wfsm_core::NO_PENDING_TRANSITION && self.next_transition_at <= now
    }
}

type IndexKey = (String, String);

/// Durable [`EntityStore`] keeping one checksummed JSON document per entity.
pub struct FileStore {
    config: FileStoreConfig,
    index: RwLock<HashMap<IndexKey, EntityMeta>>,
}

impl FileStore {
    /// Opens or creates a file store with default options.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with(FileStoreConfig::new(dir))
    }

    /// Opens or creates a file store.
    ///
    /// A missing or unreadable index is rebuilt from the entity files.
    pub fn open_with(config: FileStoreConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.dir)?;

        let store = Self {
            config,
            index: RwLock::new(HashMap::new()),
        };
        store.load_index()?;

        tracing::info!(
            dir = %store.config.dir.display(),
            entities = store.len(),
            "file store opened"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Index metadata for all entities of `kind`.
    pub fn list(&self, kind: &str) -> Vec<EntityMeta> {
        let mut metas: Vec<EntityMeta> = self
            .index
            .read()
            .values()
            .filter(|m| m.kind == kind)
            .cloned()
            .collect();
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        metas
    }

    /// Index metadata for one entity.
    pub fn meta(&self, kind: &str, id: &str) -> Option<EntityMeta> {
        self.index
            .read()
            .get(&(kind.to_string(), id.to_string()))
            .cloned()
    }

    fn load_index(&self) -> Result<(), StorageError> {
        let index_path = self.config.dir.join(INDEX_FILE);
        if index_path.exists() {
            let file = File::open(&index_path)?;
            match serde_json::from_reader::<_, Vec<EntityMeta>>(BufReader::new(file)) {
                Ok(metas) => {
                    *self.index.write() = metas
                        .into_iter()
                        .map(|m| ((m.kind.clone(), m.id.clone()), m))
                        .collect();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "entity index unreadable, rebuilding");
                }
            }
        }

        self.rebuild_index()
    }

    /// Rebuilds the index by scanning every entity file.
    fn rebuild_index(&self) -> Result<(), StorageError> {
        let mut index = HashMap::new();

        for kind_entry in fs::read_dir(&self.config.dir)? {
            let kind_dir = kind_entry?.path();
            if !kind_dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&kind_dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e != "json").unwrap_or(true) {
                    continue;
                }
                let data = fs::read(&path)?;
                let entity: Entity = match serde_json::from_slice(&data) {
                    Ok(entity) => entity,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entity file");
                        continue;
                    }
                };
                let meta = meta_for(&entity, &data);
                index.insert((meta.kind.clone(), meta.id.clone()), meta);
            }
        }

        tracing::info!(entities = index.len(), "entity index rebuilt");
        *self.index.write() = index;
        self.save_index(&self.index.read())
    }

    fn save_index(&self, index: &HashMap<IndexKey, EntityMeta>) -> Result<(), StorageError> {
        let mut metas: Vec<&EntityMeta> = index.values().collect();
        metas.sort_by(|a, b| (&a.kind, &a.id).cmp(&(&b.kind, &b.id)));

        let index_path = self.config.dir.join(INDEX_FILE);
        let tmp_path = index_path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, &metas)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &index_path)?;
        Ok(())
    }

    fn entity_path(&self, kind: &str, id: &str) -> PathBuf {
        self.config
            .dir
            .join(path_component(kind))
            .join(format!("{}.json", path_component(id)))
    }

    /// Writes `data` to `path` via a temporary file and rename.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            if self.config.fsync {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_entity(&self, meta: &EntityMeta) -> Result<Entity, StorageError> {
        let corruption = |reason: String| StorageError::Corruption {
            kind: meta.kind.clone(),
            entity_id: meta.id.clone(),
            reason,
        };

        let path = self.entity_path(&meta.kind, &meta.id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(corruption("indexed entity file is missing".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = checksum(&data);
        if actual != meta.checksum {
            return Err(corruption(format!(
                "checksum mismatch (expected {}, found {})",
                meta.checksum, actual
            )));
        }

        let entity: Entity = serde_json::from_slice(&data)?;
        if entity.kind != meta.kind || entity.id != meta.id {
            return Err(corruption(format!(
                "file holds {}/{}",
                entity.kind, entity.id
            )));
        }
        Ok(entity)
    }

    /// Replaces the entity file, then the index. If the index cannot be
    /// written the previous file and index entry are put back.
    fn write_entity(&self, entity: &Entity) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(entity)?;
        let meta = meta_for(entity, &data);
        let key = (meta.kind.clone(), meta.id.clone());
        let path = self.entity_path(&entity.kind, &entity.id);

        let mut index = self.index.write();
        let previous = match fs::read(&path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        self.write_atomic(&path, &data)?;

        let replaced = index.insert(key.clone(), meta);
        if let Err(e) = self.save_index(&index) {
            match replaced {
                Some(old) => index.insert(key, old),
                None => index.remove(&key),
            };
            self.restore_file(&path, previous.as_deref());
            return Err(e);
        }

        tracing::debug!(
            kind = %entity.kind,
            entity_id = %entity.id,
            state = %entity.state,
            next_transition_at = entity.next_transition_at,
            "entity saved"
        );
        Ok(())
    }

    /// Drops the index entry first; the file goes only once the index no
    /// longer points at it.
    fn remove_entity(&self, kind: &str, id: &str) -> Result<(), StorageError> {
        let key = (kind.to_string(), id.to_string());
        let mut index = self.index.write();
        if let Some(meta) = index.remove(&key) {
            if let Err(e) = self.save_index(&index) {
                index.insert(key, meta);
                return Err(e);
            }
            tracing::debug!(kind, entity_id = id, "entity deleted");
        }

        let path = self.entity_path(kind, id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Unindexed files are only seen again by an index rebuild.
                tracing::warn!(path = %path.display(), error = %e, "failed to remove deleted entity file");
            }
        }
        Ok(())
    }

    /// Puts `previous` back at `path`, or removes the file if there was none.
    fn restore_file(&self, path: &Path, previous: Option<&[u8]>) {
        let restored = match previous {
            Some(data) => self.write_atomic(path, data),
            None => fs::remove_file(path).map_err(StorageError::from),
        };
        if let Err(e) = restored {
            tracing::error!(path = %path.display(), error = %e, "failed to roll back entity file");
        }
    }
}

impl EntityStore for FileStore {
    fn find_due(&self, kind: &str, now: i64) -> Result<Vec<Entity>, StoreError> {
        let mut due: Vec<EntityMeta> = self
            .index
            .read()
            .values()
            .filter(|m| m.kind == kind && m.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|m| m.next_transition_at);

        let mut entities = Vec::with_capacity(due.len());
        for meta in &due {
            match self.read_entity(meta) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    tracing::warn!(
                        kind,
                        entity_id = %meta.id,
                        error = %e,
                        "skipping unreadable due entity"
                    );
                }
            }
        }
        Ok(entities)
    }

    fn load(&self, kind: &str, id: &str) -> Result<Option<Entity>, StoreError> {
        match self.meta(kind, id) {
            Some(meta) => Ok(Some(self.read_entity(&meta)?)),
            None => Ok(None),
        }
    }

    fn save(&self, entity: &Entity) -> Result<(), StoreError> {
        Ok(self.write_entity(entity)?)
    }

    fn delete(&self, entity: &Entity) -> Result<(), StoreError> {
        Ok(self.remove_entity(&entity.kind, &entity.id)?)
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.config.dir)
            .field("fsync", &self.config.fsync)
            .field("entities", &self.len())
            .finish()
    }
}

fn checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

fn meta_for(entity: &Entity, data: &[u8]) -> EntityMeta {
    EntityMeta {
        kind: entity.kind.clone(),
        id: entity.id.clone(),
        checksum: checksum(data),
        size_bytes: data.len() as u64,
        next_transition_at: entity.next_transition_at,
        updated_at: entity.updated_at,
    }
}

/// File-system-safe name for a kind or ID. Plain names are kept readable;
/// anything else is hex-encoded behind a `~` prefix that plain names never use.
fn path_component(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("~{}", hex::encode(name))
    }
}
