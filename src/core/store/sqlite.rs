//! SQLite catalog backend for persistent storage.

use super::{
    CatalogStats, CatalogStore, CatalogTx, FileRecord, ImageSet, NewFile, Root,
    UnclassifiedImage, UnprocessedFile,
};
use crate::core::grouper::SetKey;
use crate::core::header::HeaderCard;
use crate::core::normalizer::FrameKind;
use crate::error::StoreError;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS roots (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        path TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        root_id INTEGER NOT NULL REFERENCES roots(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        name TEXT NOT NULL,
        size INTEGER NOT NULL,
        mtime_millis INTEGER NOT NULL,
        UNIQUE (root_id, path, name)
    );

    CREATE TABLE IF NOT EXISTS image_sets (
        id INTEGER PRIMARY KEY,
        root_id INTEGER NOT NULL REFERENCES roots(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        frame_kind TEXT NOT NULL,
        session_date TEXT,
        object_name TEXT,
        filter_name TEXT,
        exposure REAL,
        camera_name TEXT,
        xbin INTEGER,
        ybin INTEGER,
        gain INTEGER,
        camera_offset INTEGER,
        telescope TEXT,
        camera_temperature REAL
    );

    CREATE INDEX IF NOT EXISTS idx_image_sets_lookup
        ON image_sets(root_id, path, frame_kind);

    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        set_id INTEGER REFERENCES image_sets(id) ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS idx_images_file ON images(file_id);
    CREATE INDEX IF NOT EXISTS idx_images_set ON images(set_id);

    CREATE TABLE IF NOT EXISTS image_meta (
        image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (image_id, key)
    );
";

const SET_COLUMNS: &str = "id, root_id, path, frame_kind, session_date, object_name, \
     filter_name, exposure, camera_name, xbin, ybin, gain, camera_offset, telescope, \
     camera_temperature";

const SESSION_DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed persistent catalog
///
/// Uses WAL (Write-Ahead Logging) mode so readers proceed while a batch is
/// being written.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create a catalog database at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, path.to_path_buf())
    }

    /// Open a private in-memory catalog
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, db_path: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn root_from_row(row: &Row<'_>) -> rusqlite::Result<Root> {
    Ok(Root {
        id: row.get(0)?,
        name: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        root_id: row.get(1)?,
        path: row.get(2)?,
        name: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        mtime_millis: row.get(5)?,
    })
}

fn set_from_row(row: &Row<'_>) -> rusqlite::Result<ImageSet> {
    let session_date = row
        .get::<_, Option<String>>(4)?
        .and_then(|s| NaiveDate::parse_from_str(&s, SESSION_DATE_FORMAT).ok());

    Ok(ImageSet {
        id: row.get(0)?,
        key: SetKey {
            root_id: row.get(1)?,
            path: row.get(2)?,
            frame_kind: FrameKind::from_name(&row.get::<_, String>(3)?),
            session_date,
            object_name: row.get(5)?,
            filter: row.get(6)?,
            exposure: row.get(7)?,
            camera_name: row.get(8)?,
            xbin: row.get(9)?,
            ybin: row.get(10)?,
            gain: row.get(11)?,
            offset: row.get(12)?,
            telescope: row.get(13)?,
            camera_temperature: row.get(14)?,
        },
    })
}

fn root_by_name(conn: &Connection, name: &str) -> Result<Option<Root>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, path FROM roots WHERE name = ?1",
            [name],
            root_from_row,
        )
        .optional()?)
}

/// Transaction handle over a borrowed connection
struct SqliteTx<'c> {
    conn: &'c Connection,
}

impl CatalogTx for SqliteTx<'_> {
    fn add_root(&mut self, name: &str, path: &Path) -> Result<Root, StoreError> {
        self.conn.execute(
            "INSERT INTO roots (name, path) VALUES (?1, ?2)",
            params![name, path.to_string_lossy()],
        )?;

        Ok(Root {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            path: path.to_path_buf(),
        })
    }

    fn set_root_path(&mut self, name: &str, path: &Path) -> Result<Root, StoreError> {
        let updated = self.conn.execute(
            "UPDATE roots SET path = ?2 WHERE name = ?1",
            params![name, path.to_string_lossy()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownRoot(name.to_string()));
        }

        root_by_name(self.conn, name)?.ok_or_else(|| StoreError::UnknownRoot(name.to_string()))
    }

    fn insert_files(&mut self, files: &[NewFile]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO files (root_id, path, name, size, mtime_millis)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;

        for file in files {
            stmt.execute(params![
                file.root_id,
                file.path,
                file.name,
                file.size as i64,
                file.mtime_millis,
            ])?;
        }

        Ok(())
    }

    fn delete_files(&mut self, ids: &[i64]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached("DELETE FROM files WHERE id = ?1")?;
        for id in ids {
            stmt.execute([id])?;
        }
        Ok(())
    }

    fn insert_image(&mut self, file_id: i64, cards: &[HeaderCard]) -> Result<i64, StoreError> {
        self.conn
            .execute("INSERT INTO images (file_id) VALUES (?1)", [file_id])?;
        let image_id = self.conn.last_insert_rowid();

        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO image_meta (image_id, key, value) VALUES (?1, ?2, ?3)")?;
        for card in cards {
            stmt.execute(params![image_id, card.key, card.value])?;
        }

        Ok(image_id)
    }

    fn find_matching_set(
        &mut self,
        key: &SetKey,
        tolerance: f64,
    ) -> Result<Option<ImageSet>, StoreError> {
        let sql = format!(
            "SELECT {} FROM image_sets
             WHERE root_id = ?1 AND path = ?2 AND frame_kind = ?3
               AND session_date IS ?4 AND object_name IS ?5 AND filter_name IS ?6
               AND exposure IS ?7 AND camera_name IS ?8 AND xbin IS ?9 AND ybin IS ?10
               AND gain IS ?11 AND camera_offset IS ?12 AND telescope IS ?13
               AND CASE WHEN ?14 IS NULL THEN camera_temperature IS NULL
                   ELSE camera_temperature BETWEEN ?14 - ?15 AND ?14 + ?15 END
             ORDER BY id LIMIT 1",
            SET_COLUMNS
        );

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let set = stmt
            .query_row(
                params![
                    key.root_id,
                    key.path,
                    key.frame_kind.as_str(),
                    key.session_date
                        .map(|d| d.format(SESSION_DATE_FORMAT).to_string()),
                    key.object_name,
                    key.filter,
                    key.exposure,
                    key.camera_name,
                    key.xbin,
                    key.ybin,
                    key.gain,
                    key.offset,
                    key.telescope,
                    key.camera_temperature,
                    tolerance,
                ],
                set_from_row,
            )
            .optional()?;

        Ok(set)
    }

    fn create_set(&mut self, key: &SetKey) -> Result<ImageSet, StoreError> {
        self.conn.execute(
            "INSERT INTO image_sets (root_id, path, frame_kind, session_date, object_name,
                 filter_name, exposure, camera_name, xbin, ybin, gain, camera_offset,
                 telescope, camera_temperature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                key.root_id,
                key.path,
                key.frame_kind.as_str(),
                key.session_date
                    .map(|d| d.format(SESSION_DATE_FORMAT).to_string()),
                key.object_name,
                key.filter,
                key.exposure,
                key.camera_name,
                key.xbin,
                key.ybin,
                key.gain,
                key.offset,
                key.telescope,
                key.camera_temperature,
            ],
        )?;

        Ok(ImageSet {
            id: self.conn.last_insert_rowid(),
            key: key.clone(),
        })
    }

    fn assign_set(&mut self, image_id: i64, set_id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE images SET set_id = ?2 WHERE id = ?1",
            params![image_id, set_id],
        )?;
        Ok(())
    }
}

impl CatalogStore for SqliteStore {
    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn CatalogTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        // Rolled back on drop unless committed
        let tx = conn.transaction()?;
        work(&mut SqliteTx { conn: &tx })?;
        tx.commit()?;
        Ok(())
    }

    fn roots(&self) -> Result<Vec<Root>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, path FROM roots ORDER BY name")?;
        let roots = stmt
            .query_map([], root_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(roots)
    }

    fn root_by_name(&self, name: &str) -> Result<Option<Root>, StoreError> {
        let conn = self.lock()?;
        root_by_name(&conn, name)
    }

    fn files_in_dir(&self, root_id: i64, path: &str) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, root_id, path, name, size, mtime_millis FROM files
             WHERE root_id = ?1 AND path = ?2 ORDER BY name",
        )?;
        let files = stmt
            .query_map(params![root_id, path], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    fn file_dirs(&self, root_id: i64) -> Result<BTreeSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT DISTINCT path FROM files WHERE root_id = ?1")?;
        let dirs = stmt
            .query_map([root_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(dirs)
    }

    fn unprocessed_files(&self) -> Result<Vec<UnprocessedFile>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.root_id, f.path, f.name, f.size, f.mtime_millis,
                    r.id, r.name, r.path
             FROM files f JOIN roots r ON r.id = f.root_id
             WHERE NOT EXISTS (SELECT 1 FROM images i WHERE i.file_id = f.id)
             ORDER BY f.id",
        )?;

        let files = stmt
            .query_map([], |row| {
                Ok(UnprocessedFile {
                    file: file_from_row(row)?,
                    root: Root {
                        id: row.get(6)?,
                        name: row.get(7)?,
                        path: PathBuf::from(row.get::<_, String>(8)?),
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    fn unclassified_images(&self) -> Result<Vec<UnclassifiedImage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT i.id, f.root_id, f.path, f.name
             FROM images i JOIN files f ON f.id = i.file_id
             WHERE i.set_id IS NULL
               AND EXISTS (SELECT 1 FROM image_meta m WHERE m.image_id = i.id)
             ORDER BY i.id",
        )?;

        let mut images = stmt
            .query_map([], |row| {
                Ok(UnclassifiedImage {
                    image_id: row.get(0)?,
                    root_id: row.get(1)?,
                    path: row.get(2)?,
                    file_name: row.get(3)?,
                    cards: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut cards_stmt = conn.prepare_cached(
            "SELECT key, value FROM image_meta WHERE image_id = ?1 ORDER BY rowid",
        )?;
        for image in &mut images {
            image.cards = cards_stmt
                .query_map([image.image_id], |row| {
                    Ok(HeaderCard::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
        }

        Ok(images)
    }

    fn image_sets(&self) -> Result<Vec<ImageSet>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM image_sets ORDER BY id", SET_COLUMNS))?;
        let sets = stmt
            .query_map([], set_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sets)
    }

    fn set_members(&self, set_id: i64) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT id FROM images WHERE set_id = ?1 ORDER BY id")?;
        let members = stmt
            .query_map([set_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(members)
    }

    fn stats(&self) -> Result<CatalogStats, StoreError> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<usize, StoreError> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as usize)
        };

        Ok(CatalogStats {
            roots: count("SELECT COUNT(*) FROM roots")?,
            files: count("SELECT COUNT(*) FROM files")?,
            images: count("SELECT COUNT(*) FROM images")?,
            image_meta: count("SELECT COUNT(*) FROM image_meta")?,
            image_sets: count("SELECT COUNT(*) FROM image_sets")?,
            classified_images: count("SELECT COUNT(*) FROM images WHERE set_id IS NOT NULL")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::in_transaction;
    use tempfile::TempDir;

    fn store_with_root() -> (SqliteStore, Root) {
        let store = SqliteStore::open_in_memory().unwrap();
        let root = in_transaction(&store, |tx| tx.add_root("archive", Path::new("/mnt/astro")))
            .unwrap();
        (store, root)
    }

    fn new_file(root: &Root, path: &str, name: &str) -> NewFile {
        NewFile {
            root_id: root.id,
            path: path.to_string(),
            name: name.to_string(),
            size: 2880,
            mtime_millis: 1_640_000_000_000,
        }
    }

    fn set_key(root: &Root, filter: &str, temperature: Option<f64>) -> SetKey {
        SetKey {
            root_id: root.id,
            path: "Light".to_string(),
            frame_kind: FrameKind::Light,
            session_date: NaiveDate::from_ymd_opt(2020, 5, 29),
            object_name: Some("NGC 1111".to_string()),
            filter: Some(filter.to_string()),
            exposure: Some(30.0),
            camera_name: Some("ZWO ASI294MC Pro".to_string()),
            xbin: Some(1),
            ybin: Some(1),
            gain: Some(120),
            offset: Some(30),
            telescope: None,
            camera_temperature: temperature,
        }
    }

    #[test]
    fn sqlite_store_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("catalog.db");

        let store = SqliteStore::open(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.path(), db_path.as_path());
        assert_eq!(store.stats().unwrap(), CatalogStats::default());
    }

    #[test]
    fn root_names_are_unique() {
        let (store, _) = store_with_root();
        let result = in_transaction(&store, |tx| tx.add_root("archive", Path::new("/other")));
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
    }

    #[test]
    fn root_can_be_repointed() {
        let (store, root) = store_with_root();
        let moved = in_transaction(&store, |tx| tx.set_root_path("archive", Path::new("/data")))
            .unwrap();

        assert_eq!(moved.id, root.id);
        assert_eq!(
            store.root_by_name("archive").unwrap().unwrap().path,
            PathBuf::from("/data")
        );

        let missing = in_transaction(&store, |tx| tx.set_root_path("nope", Path::new("/x")));
        assert!(matches!(missing, Err(StoreError::UnknownRoot(_))));
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let (store, root) = store_with_root();
        let files = vec![new_file(&root, ".", "a.fits"), new_file(&root, ".", "a.fits")];

        let result = in_transaction(&store, |tx| tx.insert_files(&files));

        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert_eq!(store.stats().unwrap().files, 0);
    }

    #[test]
    fn files_listed_by_directory() {
        let (store, root) = store_with_root();
        in_transaction(&store, |tx| {
            tx.insert_files(&[
                new_file(&root, ".", "image01.fits"),
                new_file(&root, "Light", "image02.fits"),
                new_file(&root, "Light", "image04.fits"),
            ])
        })
        .unwrap();

        let names: Vec<_> = store
            .files_in_dir(root.id, "Light")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["image02.fits", "image04.fits"]);

        let dirs: Vec<_> = store.file_dirs(root.id).unwrap().into_iter().collect();
        assert_eq!(dirs, vec![".", "Light"]);
    }

    #[test]
    fn deleting_file_cascades_to_image_and_meta() {
        let (store, root) = store_with_root();
        in_transaction(&store, |tx| tx.insert_files(&[new_file(&root, ".", "a.fits")])).unwrap();
        let file = store.files_in_dir(root.id, ".").unwrap().remove(0);

        in_transaction(&store, |tx| {
            tx.insert_image(file.id, &[HeaderCard::new("IMAGETYP", "LIGHT")])
        })
        .unwrap();
        assert_eq!(store.stats().unwrap().image_meta, 1);
        assert!(store.unprocessed_files().unwrap().is_empty());

        in_transaction(&store, |tx| tx.delete_files(&[file.id])).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.images, 0);
        assert_eq!(stats.image_meta, 0);
    }

    #[test]
    fn unclassified_images_keep_card_order() {
        let (store, root) = store_with_root();
        in_transaction(&store, |tx| tx.insert_files(&[new_file(&root, ".", "a.fits")])).unwrap();
        let file = store.unprocessed_files().unwrap().remove(0);
        assert_eq!(file.root, root);

        let cards = vec![
            HeaderCard::new("SIMPLE", "T"),
            HeaderCard::new("IMAGETYP", "LIGHT"),
            HeaderCard::new("EXPOSURE", "30"),
        ];
        in_transaction(&store, |tx| tx.insert_image(file.file.id, &cards)).unwrap();

        let images = store.unclassified_images().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].cards, cards);
        assert_eq!(images[0].file_name, "a.fits");
    }

    #[test]
    fn set_matching_uses_null_safe_equality_and_tolerance() {
        let (store, root) = store_with_root();
        let created = in_transaction(&store, |tx| tx.create_set(&set_key(&root, "R", Some(-17.5))))
            .unwrap();

        let find = |key: SetKey| in_transaction(&store, |tx| tx.find_matching_set(&key, 1.0)).unwrap();

        assert_eq!(find(set_key(&root, "R", Some(-16.6))).map(|s| s.id), Some(created.id));
        assert_eq!(find(set_key(&root, "R", Some(-16.4))), None);
        assert_eq!(find(set_key(&root, "B", Some(-17.5))), None);
        assert_eq!(find(set_key(&root, "R", None)), None);

        let no_temp = in_transaction(&store, |tx| tx.create_set(&set_key(&root, "R", None))).unwrap();
        assert_eq!(find(set_key(&root, "R", None)).map(|s| s.id), Some(no_temp.id));
    }

    #[test]
    fn sets_round_trip_through_rows() {
        let (store, root) = store_with_root();
        let key = set_key(&root, "HaOIII", Some(-10.0));
        in_transaction(&store, |tx| tx.create_set(&key)).unwrap();

        let sets = store.image_sets().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].key, key);
    }

    #[test]
    fn assigned_image_leaves_unclassified_list() {
        let (store, root) = store_with_root();
        in_transaction(&store, |tx| tx.insert_files(&[new_file(&root, "Light", "a.fits")])).unwrap();
        let file = store.unprocessed_files().unwrap().remove(0);
        let image_id = in_transaction(&store, |tx| {
            tx.insert_image(file.file.id, &[HeaderCard::new("IMAGETYP", "LIGHT")])
        })
        .unwrap();

        let set = in_transaction(&store, |tx| {
            let set = tx.create_set(&set_key(&root, "R", None))?;
            tx.assign_set(image_id, set.id)?;
            Ok(set)
        })
        .unwrap();

        assert!(store.unclassified_images().unwrap().is_empty());
        assert_eq!(store.set_members(set.id).unwrap(), vec![image_id]);
        assert_eq!(store.stats().unwrap().classified_images, 1);
    }
}
