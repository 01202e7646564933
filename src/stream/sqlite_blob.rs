//! SQLite blob stream
//!
//! Addresses one BLOB (or text) cell in a SQLite database by table, column
//! and row. SQLite only reads from host files, so a database reached through
//! deeper layers is first materialized into a temporary file; the cell bytes
//! are then fetched once and served from memory.

use std::io::SeekFrom;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::path_spec::RowSelector;
use crate::stream::{resolve_seek, FileObject, StreamReader};

pub struct SqliteBlobStream {
    data: Vec<u8>,
    offset: u64,
}

impl SqliteBlobStream {
    /// Opens a blob from a database file on the host.
    pub fn open_from_path(
        path: &str,
        table_name: &str,
        column_name: &str,
        row: &RowSelector,
    ) -> VfsResult<Self> {
        validate_identifier(table_name)?;
        validate_identifier(column_name)?;

        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let value: rusqlite::types::Value = match row {
            RowSelector::Index(index) => {
                let query = format!(
                    "SELECT {} FROM {} LIMIT 1 OFFSET {}",
                    column_name, table_name, index
                );
                connection.query_row(&query, [], |row| row.get(0))?
            }
            RowSelector::Condition {
                column,
                operator,
                value,
            } => {
                validate_identifier(column)?;
                // The operator set was validated at construction.
                let query = format!(
                    "SELECT {} FROM {} WHERE {} {} ?",
                    column_name, table_name, column, operator
                );
                connection.query_row(&query, [value], |row| row.get(0))?
            }
        };

        let data = match value {
            rusqlite::types::Value::Blob(bytes) => bytes,
            rusqlite::types::Value::Text(text) => text.into_bytes(),
            rusqlite::types::Value::Null => {
                return Err(VfsError::NotFound(format!(
                    "{}.{} is NULL for the selected row",
                    table_name, column_name
                )))
            }
            other => {
                return Err(VfsError::InvalidData(format!(
                    "{}.{} holds a non-blob value: {:?}",
                    table_name, column_name, other
                )))
            }
        };

        debug!(
            table_name,
            column_name,
            size = data.len(),
            "Fetched blob cell"
        );
        Ok(Self { data, offset: 0 })
    }

    /// Opens a blob from a database reached through a parent stream by
    /// materializing it into a temporary file first.
    pub fn open_from_stream(
        parent: &mut dyn FileObject,
        table_name: &str,
        column_name: &str,
        row: &RowSelector,
    ) -> VfsResult<Self> {
        let mut temp = tempfile::NamedTempFile::new()?;
        parent.seek(SeekFrom::Start(0))?;
        std::io::copy(&mut StreamReader::new(parent), &mut temp)?;
        let path = temp.path().to_string_lossy().to_string();
        Self::open_from_path(&path, table_name, column_name, row)
    }
}

fn validate_identifier(name: &str) -> VfsResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().expect("non-empty").is_ascii_digit();
    if !valid {
        return Err(VfsError::PathSpec(format!(
            "invalid SQLite identifier: {}",
            name
        )));
    }
    Ok(())
}

impl FileObject for SqliteBlobStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let size = self.data.len() as u64;
        if self.offset >= size {
            return Ok(0);
        }
        let start = self.offset as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.offset += count as u64;
        Ok(count)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.data.len() as u64;
        self.offset = resolve_seek(pos, self.offset, || Ok(size))?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture_db(dir: &TempDir) -> String {
        let path = dir.path().join("evidence.db");
        let connection = Connection::open(&path).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE files (name TEXT, data BLOB);
                 INSERT INTO files VALUES ('syslog', x'48656c6c6f');
                 INSERT INTO files VALUES ('empty', NULL);",
            )
            .unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_row_index() {
        let dir = TempDir::new().unwrap();
        let path = fixture_db(&dir);

        let mut stream =
            SqliteBlobStream::open_from_path(&path, "files", "data", &RowSelector::Index(0))
                .unwrap();
        assert_eq!(stream.size().unwrap(), 5);
        let mut buf = [0u8; 5];
        stream.read(&mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn test_row_condition() {
        let dir = TempDir::new().unwrap();
        let path = fixture_db(&dir);

        let row = RowSelector::Condition {
            column: "name".to_string(),
            operator: "=".to_string(),
            value: "syslog".to_string(),
        };
        let mut stream =
            SqliteBlobStream::open_from_path(&path, "files", "data", &row).unwrap();
        let mut buf = [0u8; 5];
        stream.read(&mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn test_missing_row() {
        let dir = TempDir::new().unwrap();
        let path = fixture_db(&dir);

        let err =
            SqliteBlobStream::open_from_path(&path, "files", "data", &RowSelector::Index(9));
        assert!(matches!(err, Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_null_cell() {
        let dir = TempDir::new().unwrap();
        let path = fixture_db(&dir);

        let err =
            SqliteBlobStream::open_from_path(&path, "files", "data", &RowSelector::Index(1));
        assert!(matches!(err, Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_identifier_validation() {
        let dir = TempDir::new().unwrap();
        let path = fixture_db(&dir);

        let err = SqliteBlobStream::open_from_path(
            &path,
            "files; DROP TABLE files",
            "data",
            &RowSelector::Index(0),
        );
        assert!(matches!(err, Err(VfsError::PathSpec(_))));
    }

    #[test]
    fn test_open_from_stream() {
        let dir = TempDir::new().unwrap();
        let path = fixture_db(&dir);
        let bytes = std::fs::read(&path).unwrap();

        let mut parent = crate::stream::fake::FakeStream::new(bytes);
        let mut stream = SqliteBlobStream::open_from_stream(
            &mut parent,
            "files",
            "data",
            &RowSelector::Index(0),
        )
        .unwrap();
        let mut buf = [0u8; 5];
        stream.read(&mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
    }
}
