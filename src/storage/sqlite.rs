use super::{BlockIndex, BlockIndexMut, UnmappedSpan};
use crate::{
    Error, Result,
    error::StoreRole,
    types::{BlockEntry, GroupExtent},
};
use rusqlite::{Connection, OpenFlags, Row, params};
use std::path::{Path, PathBuf};

/// Schema of an htsnexus index database.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS htsfiles (
        _dbid TEXT PRIMARY KEY,
        format TEXT NOT NULL,
        namespace TEXT NOT NULL,
        accession TEXT NOT NULL,
        url TEXT NOT NULL,
        file_size INTEGER CHECK(file_size IS NULL OR file_size > 0)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS htsfiles_namespace_accession
        ON htsfiles(namespace, accession, format);
    CREATE TABLE IF NOT EXISTS htsfiles_blocks_meta (
        _dbid TEXT PRIMARY KEY,
        reference TEXT NOT NULL,
        header TEXT NOT NULL,
        slice_prefix BLOB,
        slice_suffix BLOB,
        FOREIGN KEY(_dbid) REFERENCES htsfiles(_dbid)
    );
    CREATE TABLE IF NOT EXISTS htsfiles_blocks (
        _dbid TEXT NOT NULL,
        byteLo INTEGER NOT NULL CHECK(byteLo >= 0),
        byteHi INTEGER NOT NULL CHECK(byteHi > byteLo),
        seq TEXT CHECK(seq IS NOT NULL OR (seqLo IS NULL AND seqHi IS NULL)),
        seqLo INTEGER CHECK(seq IS NULL OR (seqLo IS NOT NULL AND seqLo >= 0)),
        seqHi INTEGER CHECK(seq IS NULL OR (seqHi IS NOT NULL AND seqHi >= seqLo)),
        block_prefix BLOB,
        block_suffix BLOB,
        FOREIGN KEY(_dbid) REFERENCES htsfiles_blocks_meta(_dbid)
    );
    CREATE INDEX IF NOT EXISTS htsfiles_blocks_index1 ON htsfiles_blocks(_dbid, seq, seqLo, seqHi);
    CREATE INDEX IF NOT EXISTS htsfiles_blocks_index2 ON htsfiles_blocks(_dbid, seq, seqHi);
";

const SCAN_GROUP: &str = "SELECT byteLo, byteHi, seqLo, seqHi, block_prefix, block_suffix \
     FROM htsfiles_blocks WHERE _dbid = ?1 AND seq = ?2 ORDER BY byteLo, byteHi";

const GROUP_EXTENTS: &str = "SELECT _dbid, seq, min(seqLo), max(seqHi), min(byteLo), max(byteHi) \
     FROM htsfiles_blocks GROUP BY _dbid, seq ORDER BY _dbid, seq";

/// SQLite-backed block index.
pub struct SqliteStorage {
    connection: Connection,
    path: PathBuf,
    role: StoreRole,
}

impl SqliteStorage {
    /// Open an existing index read-only.
    pub fn open_source<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Self::open_with_flags(path.as_ref(), flags, StoreRole::Source)
    }

    /// Open an existing index for writing. The file must already exist.
    pub fn open_destination<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Self::open_with_flags(path.as_ref(), flags, StoreRole::Destination)
    }

    /// Open an index for writing, creating the file and schema if necessary.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let storage = Self::open_with_flags(path.as_ref(), flags, StoreRole::Destination)?;
        storage
            .connection
            .execute_batch(&format!("BEGIN; {SCHEMA} COMMIT;"))
            .map_err(Error::store(storage.role, "apply schema"))?;
        Ok(storage)
    }

    fn open_with_flags(path: &Path, flags: OpenFlags, role: StoreRole) -> Result<Self> {
        let connection =
            Connection::open_with_flags(path, flags).map_err(Error::store(role, "open database"))?;
        // Indexers write through plain sqlite3, which leaves foreign keys
        // unenforced; blocks need not have a meta row.
        connection
            .pragma_update(None, "foreign_keys", false)
            .map_err(Error::store(role, "disable foreign keys"))?;
        Ok(Self {
            connection,
            path: path.to_path_buf(),
            role,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying connection, for tables the block index does not model.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Start the write transaction that [`commit`](Self::commit) ends.
    ///
    /// Dropping the storage before committing rolls back every write.
    pub fn begin(&self) -> Result<()> {
        self.connection
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(Error::store(self.role, "begin transaction"))
    }

    pub fn commit(&self) -> Result<()> {
        self.connection
            .execute_batch("COMMIT")
            .map_err(Error::store(self.role, "commit transaction"))
    }

    /// Reclaim the space freed by replacing the block table.
    pub fn vacuum(&self) -> Result<()> {
        self.connection
            .execute_batch("VACUUM")
            .map_err(Error::store(self.role, "vacuum database"))
    }

    /// Total number of block entries.
    pub fn block_count(&self) -> Result<u64> {
        self.connection
            .query_row("SELECT count(*) FROM htsfiles_blocks", [], |row| row.get(0))
            .map_err(Error::store(self.role, "count blocks"))
    }

    fn distinct_text(&self, sql: &str, operation: &'static str) -> Result<Vec<String>> {
        let mut stmt = self
            .connection
            .prepare(sql)
            .map_err(Error::store(self.role, operation))?;
        let values = stmt
            .query_map([], |row| row.get(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .map_err(Error::store(self.role, operation))?;
        Ok(values)
    }
}

fn mapped_entry(row: &Row<'_>, file_id: &str, seq: &str) -> rusqlite::Result<BlockEntry> {
    Ok(BlockEntry {
        file_id: file_id.to_string(),
        byte_lo: row.get(0)?,
        byte_hi: row.get(1)?,
        seq: Some(seq.to_string()),
        seq_lo: row.get(2)?,
        seq_hi: row.get(3)?,
        block_prefix: row.get(4)?,
        block_suffix: row.get(5)?,
    })
}

fn group_extent(row: &Row<'_>) -> rusqlite::Result<GroupExtent> {
    Ok(GroupExtent {
        file_id: row.get(0)?,
        seq: row.get(1)?,
        seq_lo: row.get(2)?,
        seq_hi: row.get(3)?,
        byte_lo: row.get(4)?,
        byte_hi: row.get(5)?,
    })
}

impl BlockIndex for SqliteStorage {
    fn file_ids(&self) -> Result<Vec<String>> {
        self.distinct_text(
            "SELECT DISTINCT _dbid FROM htsfiles_blocks ORDER BY _dbid",
            "list files",
        )
    }

    fn sequences(&self) -> Result<Vec<String>> {
        self.distinct_text(
            "SELECT DISTINCT seq FROM htsfiles_blocks WHERE seq IS NOT NULL ORDER BY seq",
            "list sequences",
        )
    }

    fn scan_group(
        &self,
        file_id: &str,
        seq: &str,
        visit: &mut dyn FnMut(BlockEntry) -> Result<()>,
    ) -> Result<()> {
        let mut stmt = self
            .connection
            .prepare_cached(SCAN_GROUP)
            .map_err(Error::store(self.role, "prepare block scan"))?;
        let mut rows = stmt
            .query((file_id, seq))
            .map_err(Error::store(self.role, "scan blocks"))?;

        while let Some(row) = rows.next().map_err(Error::store(self.role, "scan blocks"))? {
            let entry =
                mapped_entry(row, file_id, seq).map_err(Error::store(self.role, "read block"))?;
            visit(entry)?;
        }
        Ok(())
    }

    fn unmapped_span(&self, file_id: &str) -> Result<Option<UnmappedSpan>> {
        let (byte_lo, byte_hi, entries): (Option<i64>, Option<i64>, u64) = self
            .connection
            .query_row(
                "SELECT min(byteLo), max(byteHi), count(*) FROM htsfiles_blocks \
                 WHERE _dbid = ?1 AND seq IS NULL",
                (file_id,),
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(Error::store(self.role, "aggregate unmapped blocks"))?;

        Ok(match (byte_lo, byte_hi) {
            (Some(byte_lo), Some(byte_hi)) => Some(UnmappedSpan {
                byte_lo,
                byte_hi,
                entries,
            }),
            _ => None,
        })
    }

    fn group_extents(&self) -> Result<Vec<GroupExtent>> {
        let mut stmt = self
            .connection
            .prepare(GROUP_EXTENTS)
            .map_err(Error::store(self.role, "aggregate group extents"))?;
        let extents = stmt
            .query_map([], group_extent)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(Error::store(self.role, "aggregate group extents"))?;
        Ok(extents)
    }
}

impl BlockIndexMut for SqliteStorage {
    fn clear_blocks(&mut self) -> Result<()> {
        self.connection
            .execute("DELETE FROM htsfiles_blocks", [])
            .map_err(Error::store(self.role, "delete blocks"))?;
        Ok(())
    }

    fn insert_block(&mut self, entry: &BlockEntry) -> Result<()> {
        let mut stmt = self
            .connection
            .prepare_cached("INSERT INTO htsfiles_blocks VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)")
            .map_err(Error::store(self.role, "prepare block insert"))?;
        stmt.execute(params![
            entry.file_id,
            entry.byte_lo,
            entry.byte_hi,
            entry.seq,
            entry.seq_lo,
            entry.seq_hi,
            entry.block_prefix,
            entry.block_suffix,
        ])
        .map_err(Error::store(self.role, "insert block"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated(dir: &TempDir) -> SqliteStorage {
        let mut storage = SqliteStorage::create(dir.path().join("index.db")).unwrap();
        for entry in [
            BlockEntry::mapped("f1", (200, 300), "chr2", (0, 10)),
            BlockEntry::mapped("f1", (100, 200), "chr2", (10, 20)),
            BlockEntry::mapped("f1", (0, 100), "chr1", (5, 50)),
            BlockEntry::unmapped("f1", (900, 1000)),
            BlockEntry::unmapped("f1", (300, 400)),
            BlockEntry::mapped("f0", (0, 64), "chr1", (0, 1)),
        ] {
            storage.insert_block(&entry).unwrap();
        }
        storage
    }

    #[test]
    fn test_distinct_files_and_sequences() {
        let dir = TempDir::new().unwrap();
        let storage = populated(&dir);
        assert_eq!(storage.file_ids().unwrap(), vec!["f0", "f1"]);
        assert_eq!(storage.sequences().unwrap(), vec!["chr1", "chr2"]);
        assert_eq!(storage.block_count().unwrap(), 6);
    }

    #[test]
    fn test_scan_group_is_ordered_by_byte_offset() {
        let dir = TempDir::new().unwrap();
        let storage = populated(&dir);

        let mut seen = Vec::new();
        storage
            .scan_group("f1", "chr2", &mut |entry| {
                seen.push((entry.byte_lo, entry.byte_hi));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(100, 200), (200, 300)]);

        let mut none = 0;
        storage
            .scan_group("f0", "chr2", &mut |_| {
                none += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(none, 0);
    }

    #[test]
    fn test_unmapped_span() {
        let dir = TempDir::new().unwrap();
        let storage = populated(&dir);
        assert_eq!(
            storage.unmapped_span("f1").unwrap(),
            Some(UnmappedSpan {
                byte_lo: 300,
                byte_hi: 1000,
                entries: 2
            })
        );
        assert_eq!(storage.unmapped_span("f0").unwrap(), None);
    }

    #[test]
    fn test_group_extents_put_unmapped_first() {
        let dir = TempDir::new().unwrap();
        let storage = populated(&dir);
        let extents = storage.group_extents().unwrap();
        let keys: Vec<_> = extents
            .iter()
            .map(|e| (e.file_id.as_str(), e.seq.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("f0", Some("chr1")),
                ("f1", None),
                ("f1", Some("chr1")),
                ("f1", Some("chr2")),
            ]
        );
        assert_eq!(extents[1].seq_lo, None);
        assert_eq!((extents[3].seq_lo, extents[3].seq_hi), (Some(0), Some(20)));
        assert_eq!((extents[3].byte_lo, extents[3].byte_hi), (100, 300));
    }

    #[test]
    fn test_foreign_keys_not_enforced() {
        let dir = TempDir::new().unwrap();
        let storage = populated(&dir);
        let enforced: bool = storage
            .connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert!(!enforced);

        let meta_rows: i64 = storage
            .connection()
            .query_row("SELECT count(*) FROM htsfiles_blocks_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(meta_rows, 0);
    }

    #[test]
    fn test_open_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = SqliteStorage::open_source(dir.path().join("missing.db"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Store {
                role: StoreRole::Source,
                ..
            }
        ));
    }

    #[test]
    fn test_source_is_read_only() {
        let dir = TempDir::new().unwrap();
        let path = populated(&dir).path().to_path_buf();
        let mut source = SqliteStorage::open_source(&path).unwrap();
        assert!(source.clear_blocks().is_err());
    }

    #[test]
    fn test_rollback_without_commit() {
        let dir = TempDir::new().unwrap();
        let path = populated(&dir).path().to_path_buf();
        {
            let mut dest = SqliteStorage::open_destination(&path).unwrap();
            dest.begin().unwrap();
            dest.clear_blocks().unwrap();
            assert_eq!(dest.block_count().unwrap(), 0);
        }
        let reopened = SqliteStorage::open_source(&path).unwrap();
        assert_eq!(reopened.block_count().unwrap(), 6);
    }
}
