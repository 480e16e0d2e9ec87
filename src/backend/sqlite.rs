use crate::backend::{password_digest, Bucket, ClusterBackend};
use crate::document::{unix_now, Cas, Document, Expiry};
use crate::error::{Error, Result};
use crate::request::{slot, validate_key, Credentials};
use crate::Location;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension as _};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest serialized document accepted, in bytes.
pub(crate) const MAX_VALUE_LEN: usize = 20 * 1024 * 1024;

/// Tables shared by every bucket of a cluster.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv_sequence (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        value INTEGER NOT NULL
    );
    INSERT OR IGNORE INTO kv_sequence (id, value) VALUES (0, 0);
    CREATE TABLE IF NOT EXISTS kv_users (
        username TEXT PRIMARY KEY,
        password_digest BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS kv_buckets (
        name TEXT PRIMARY KEY,
        password_digest BLOB
    );
    CREATE TABLE IF NOT EXISTS kv_documents (
        bucket TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        cas INTEGER NOT NULL,
        expires_at INTEGER,
        PRIMARY KEY (bucket, key)
    );
";

/// A cluster stored in an SQLite database.
///
/// In-memory clusters use SQLite's `memdb` VFS so that every connection opened by this backend
/// shares one database. The backend keeps a connection of its own open for as long as it lives, as
/// the database is discarded when its last connection closes.
#[derive(Debug)]
pub struct Sqlite {
    location: Location,
    initialized: AtomicBool,
    /// Keeps an in-memory database alive.
    _anchor: Option<Mutex<Connection>>,
}

impl Sqlite {
    /// Open a connection with the given flags and apply per-connection settings.
    fn open(&self, flags: OpenFlags) -> Result<Connection> {
        let conn = match &self.location {
            Location::InMemory { name } => {
                Connection::open_with_flags(format!("file:/{name}?vfs=memdb"), OpenFlags::default())
            }
            Location::OnDisk { path } => Connection::open_with_flags(path, flags),
        }
        .map_err(|err| self.connection_error(&err))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| self.connection_error(&err))?;
        if let Location::OnDisk { .. } = self.location {
            let _mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(|err| self.connection_error(&err))?;
        }
        Ok(conn)
    }

    /// Report a failure to reach this cluster.
    fn connection_error(&self, err: &rusqlite::Error) -> Error {
        Error::Connection {
            server: self.location.to_string(),
            reason: err.to_string(),
        }
    }

    /// Whether `name` is a bucket of this cluster.
    fn bucket_exists(connection: &Connection, name: &str) -> Result<bool> {
        let found = connection
            .query_row("SELECT 1 FROM kv_buckets WHERE name = ?1", [name], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

impl ClusterBackend for Sqlite {
    type Connection = Connection;
    type Bucket<'c> = SqliteBucket<'c>;

    fn at_location(location: Location) -> Result<Self> {
        let mut backend = Self {
            location,
            initialized: AtomicBool::new(false),
            _anchor: None,
        };
        if let Location::InMemory { .. } = backend.location {
            let anchor = backend.open(OpenFlags::default())?;
            backend.initialize(&anchor)?;
            backend._anchor = Some(Mutex::new(anchor));
        }
        Ok(backend)
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn connect(&self) -> Result<Self::Connection> {
        // Without `SQLITE_OPEN_CREATE`, a missing cluster file is reported as unreachable.
        self.open(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    fn create(&self) -> Result<Self::Connection> {
        let conn = self.open(OpenFlags::default())?;
        self.initialize(&conn)?;
        Ok(conn)
    }

    fn initialize(&self, connection: &Self::Connection) -> Result<()> {
        connection
            .execute_batch(SCHEMA)
            .map_err(|err| self.connection_error(&err))?;
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn connect_cluster(&self) -> Result<Self::Connection> {
        let conn = self.connect()?;
        if !self.initialized.load(Ordering::Relaxed) {
            self.initialize(&conn)?;
        }
        Ok(conn)
    }

    fn authenticate(
        &self,
        connection: &Self::Connection,
        credentials: &Credentials,
    ) -> Result<()> {
        let stored: Option<Vec<u8>> = connection
            .query_row(
                "SELECT password_digest FROM kv_users WHERE username = ?1",
                [&credentials.username],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(digest)
                if digest == password_digest(&credentials.username, &credentials.password) =>
            {
                Ok(())
            }
            _ => Err(Error::Authentication {
                username: credentials.username.clone(),
            }),
        }
    }

    fn open_bucket<'c>(
        &'c self,
        connection: &'c Self::Connection,
        name: &str,
        password: &str,
    ) -> Result<Self::Bucket<'c>> {
        let stored: Option<Option<Vec<u8>>> = connection
            .query_row(
                "SELECT password_digest FROM kv_buckets WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        let rejected = |reason: &str| Error::BucketOpen {
            bucket: name.to_owned(),
            reason: reason.to_owned(),
        };
        match stored {
            None => Err(rejected("bucket does not exist")),
            Some(Some(digest)) if digest != password_digest(name, password) => {
                Err(rejected("bucket password rejected"))
            }
            Some(_) => Ok(SqliteBucket {
                connection,
                name: name.to_owned(),
            }),
        }
    }

    fn create_user(&self, connection: &Self::Connection, credentials: &Credentials) -> Result<()> {
        if credentials.username.is_empty() {
            return Err(Error::invalid_input(slot::USERNAME, "must not be empty"));
        }
        let _rows = connection.execute(
            "INSERT INTO kv_users (username, password_digest) VALUES (?1, ?2)
             ON CONFLICT (username) DO UPDATE SET password_digest = excluded.password_digest",
            params![
                credentials.username,
                password_digest(&credentials.username, &credentials.password)
            ],
        )?;
        debug!(username = %credentials.username, "user provisioned");
        Ok(())
    }

    fn create_bucket(
        &self,
        connection: &Self::Connection,
        name: &str,
        password: Option<&str>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_input(slot::BUCKET, "must not be empty"));
        }
        let digest = password.map(|password| password_digest(name, password));
        let _rows = connection.execute(
            "INSERT INTO kv_buckets (name, password_digest) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET password_digest = excluded.password_digest",
            params![name, digest],
        )?;
        debug!(bucket = %name, protected = password.is_some(), "bucket provisioned");
        Ok(())
    }

    fn drop_bucket(&self, connection: &Self::Connection, name: &str) -> Result<bool> {
        let tx = connection.unchecked_transaction()?;
        let _documents = tx.execute("DELETE FROM kv_documents WHERE bucket = ?1", [name])?;
        let existed = tx.execute("DELETE FROM kv_buckets WHERE name = ?1", [name])? > 0;
        tx.commit()?;
        Ok(existed)
    }

    fn flush_bucket(&self, connection: &Self::Connection, name: &str) -> Result<usize> {
        if !Self::bucket_exists(connection, name)? {
            return Err(Error::BucketOpen {
                bucket: name.to_owned(),
                reason: "bucket does not exist".to_owned(),
            });
        }
        Ok(connection.execute("DELETE FROM kv_documents WHERE bucket = ?1", [name])?)
    }
}

/// A bucket of an [`Sqlite`] cluster, borrowing the connection it was opened on.
#[derive(Debug)]
pub struct SqliteBucket<'c> {
    connection: &'c Connection,
    name: String,
}

impl SqliteBucket<'_> {
    /// Serialize a document value, enforcing the size limit.
    fn encode(key: &str, value: &Value) -> Result<String> {
        validate_key(key)?;
        let text = serde_json::to_string(value)?;
        if text.len() > MAX_VALUE_LEN {
            return Err(Error::ValueTooLarge {
                key: key.to_owned(),
                size: text.len(),
            });
        }
        Ok(text)
    }

    /// Write a document, allocating its token in the same transaction.
    ///
    /// With `overwrite` unset, an existing document is only replaced if it has expired.
    fn write(&self, key: &str, value: &Value, expiry: Expiry, overwrite: bool) -> Result<Cas> {
        let text = Self::encode(key, value)?;
        let now = unix_now();
        let deadline = expiry.deadline(now).map(to_sql_int);
        let sql = if overwrite {
            "INSERT INTO kv_documents (bucket, key, value, cas, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (bucket, key) DO UPDATE SET
                 value = excluded.value, cas = excluded.cas, expires_at = excluded.expires_at"
        } else {
            "INSERT INTO kv_documents (bucket, key, value, cas, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (bucket, key) DO UPDATE SET
                 value = excluded.value, cas = excluded.cas, expires_at = excluded.expires_at
             WHERE kv_documents.expires_at IS NOT NULL AND kv_documents.expires_at <= ?6"
        };

        let tx = self.connection.unchecked_transaction()?;
        let cas = next_cas(&tx)?;
        let cas_raw = to_sql_int(cas.get());
        let written = if overwrite {
            tx.execute(sql, params![self.name, key, text, cas_raw, deadline])?
        } else {
            tx.execute(
                sql,
                params![self.name, key, text, cas_raw, deadline, to_sql_int(now)],
            )?
        };
        if written == 0 {
            // Dropping the transaction rolls back the token allocation as well.
            return Err(Error::DuplicateKey {
                key: key.to_owned(),
            });
        }
        tx.commit()?;
        trace!(bucket = %self.name, %key, %cas, "document written");
        Ok(cas)
    }
}

impl Bucket for SqliteBucket<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, key: &str, value: &Value, expiry: Expiry) -> Result<Cas> {
        self.write(key, value, expiry, false)
    }

    fn upsert(&self, key: &str, value: &Value, expiry: Expiry) -> Result<Cas> {
        self.write(key, value, expiry, true)
    }

    fn remove(&self, key: &str) -> Result<Cas> {
        let now = to_sql_int(unix_now());
        let tx = self.connection.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM kv_documents
             WHERE bucket = ?1 AND key = ?2 AND (expires_at IS NULL OR expires_at > ?3)",
            params![self.name, key, now],
        )?;
        if removed == 0 {
            // Purge an expired copy, if any, so it does not linger.
            let _expired = tx.execute(
                "DELETE FROM kv_documents WHERE bucket = ?1 AND key = ?2",
                params![self.name, key],
            )?;
            tx.commit()?;
            return Err(Error::NotFound {
                key: key.to_owned(),
            });
        }
        let cas = next_cas(&tx)?;
        tx.commit()?;
        trace!(bucket = %self.name, %key, %cas, "document removed");
        Ok(cas)
    }

    fn get(&self, key: &str) -> Result<Document> {
        let row: Option<(String, i64, Option<i64>)> = self
            .connection
            .query_row(
                "SELECT value, cas, expires_at FROM kv_documents WHERE bucket = ?1 AND key = ?2",
                params![self.name, key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let now = to_sql_int(unix_now());
        match row {
            Some((_, _, Some(expires_at))) if expires_at <= now => {
                let _expired = self.connection.execute(
                    "DELETE FROM kv_documents
                     WHERE bucket = ?1 AND key = ?2 AND expires_at <= ?3",
                    params![self.name, key, now],
                )?;
                Err(Error::NotFound {
                    key: key.to_owned(),
                })
            }
            Some((text, cas, _)) => Ok(Document {
                value: serde_json::from_str(&text)?,
                cas: from_sql_cas(cas)?,
            }),
            None => Err(Error::NotFound {
                key: key.to_owned(),
            }),
        }
    }
}

/// Allocate the next change token of the cluster.
fn next_cas(connection: &Connection) -> Result<Cas> {
    let raw: i64 = connection.query_row(
        "UPDATE kv_sequence SET value = value + 1 WHERE id = 0 RETURNING value",
        [],
        |row| row.get(0),
    )?;
    from_sql_cas(raw)
}

/// Read back a stored token.
fn from_sql_cas(raw: i64) -> Result<Cas> {
    u64::try_from(raw)
        .ok()
        .and_then(Cas::new)
        .ok_or(Error::Storage(rusqlite::Error::IntegralValueOutOfRange(1, raw)))
}

/// SQLite integers are signed; saturate rather than wrap.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    static NEXT_CLUSTER: AtomicUsize = AtomicUsize::new(0);

    fn memory_cluster() -> Sqlite {
        let name = format!("sqlite-test-{}", NEXT_CLUSTER.fetch_add(1, Ordering::Relaxed));
        let backend = Sqlite::at_location(Location::InMemory { name }).unwrap();
        let conn = backend.connect_cluster().unwrap();
        backend
            .create_user(&conn, &Credentials::new("app", "secret"))
            .unwrap();
        backend.create_bucket(&conn, "orders", None).unwrap();
        backend
            .create_bucket(&conn, "vault", Some("bucket-pw"))
            .unwrap();
        backend
    }

    #[test]
    fn memory_cluster_is_shared_between_connections() {
        let backend = memory_cluster();
        let writer = backend.connect_cluster().unwrap();
        let reader = backend.connect_cluster().unwrap();

        let cas = backend
            .open_bucket(&writer, "orders", "")
            .unwrap()
            .upsert("order-1", &json!({"qty": 2}), Expiry::NEVER)
            .unwrap();
        let document = backend
            .open_bucket(&reader, "orders", "")
            .unwrap()
            .get("order-1")
            .unwrap();
        assert_eq!(document.value, json!({"qty": 2}));
        assert_eq!(document.cas, cas);
    }

    #[test]
    fn authenticate_checks_password() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        backend
            .authenticate(&conn, &Credentials::new("app", "secret"))
            .unwrap();
        assert!(matches!(
            backend.authenticate(&conn, &Credentials::new("app", "wrong")),
            Err(Error::Authentication { username }) if username == "app"
        ));
        assert!(matches!(
            backend.authenticate(&conn, &Credentials::new("nobody", "secret")),
            Err(Error::Authentication { .. })
        ));
    }

    #[test]
    fn open_bucket_checks_existence_and_password() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        assert!(backend.open_bucket(&conn, "vault", "bucket-pw").is_ok());
        assert!(matches!(
            backend.open_bucket(&conn, "vault", "nope"),
            Err(Error::BucketOpen { reason, .. }) if reason == "bucket password rejected"
        ));
        assert!(matches!(
            backend.open_bucket(&conn, "missing", ""),
            Err(Error::BucketOpen { reason, .. }) if reason == "bucket does not exist"
        ));
        // A bucket without a password accepts any.
        assert!(backend.open_bucket(&conn, "orders", "anything").is_ok());
    }

    #[test]
    fn tokens_increase_across_buckets() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        let orders = backend.open_bucket(&conn, "orders", "").unwrap();
        let vault = backend.open_bucket(&conn, "vault", "bucket-pw").unwrap();

        let first = orders.upsert("a", &json!(1), Expiry::NEVER).unwrap();
        let second = vault.upsert("a", &json!(1), Expiry::NEVER).unwrap();
        let third = orders.remove("a").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn failed_insert_does_not_consume_a_token() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        let bucket = backend.open_bucket(&conn, "orders", "").unwrap();

        let first = bucket.insert("k", &json!("v1"), Expiry::NEVER).unwrap();
        assert!(matches!(
            bucket.insert("k", &json!("v2"), Expiry::NEVER),
            Err(Error::DuplicateKey { key }) if key == "k"
        ));
        let next = bucket.upsert("other", &json!(0), Expiry::NEVER).unwrap();
        assert_eq!(next.get(), first.get() + 1);
        assert_eq!(bucket.get("k").unwrap().value, json!("v1"));
    }

    #[test]
    fn expired_documents_are_absent() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        let bucket = backend.open_bucket(&conn, "orders", "").unwrap();
        // Beyond the relative limit, so an absolute timestamp in 2001.
        let long_ago = Expiry::from_secs(1_000_000_000);

        let _cas = bucket.upsert("stale", &json!(1), long_ago).unwrap();
        assert!(matches!(bucket.get("stale"), Err(Error::NotFound { .. })));

        let _cas = bucket.upsert("stale", &json!(2), long_ago).unwrap();
        assert!(matches!(bucket.remove("stale"), Err(Error::NotFound { .. })));

        let _cas = bucket.upsert("stale", &json!(3), long_ago).unwrap();
        let _cas = bucket.insert("stale", &json!(4), Expiry::NEVER).unwrap();
        assert_eq!(bucket.get("stale").unwrap().value, json!(4));
    }

    #[test]
    fn buckets_are_isolated() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        let orders = backend.open_bucket(&conn, "orders", "").unwrap();
        let vault = backend.open_bucket(&conn, "vault", "bucket-pw").unwrap();

        let _cas = orders.upsert("shared", &json!("orders"), Expiry::NEVER).unwrap();
        assert!(matches!(vault.get("shared"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn oversized_documents_are_rejected() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        let bucket = backend.open_bucket(&conn, "orders", "").unwrap();
        let huge = Value::String("x".repeat(MAX_VALUE_LEN));

        assert!(matches!(
            bucket.upsert("huge", &huge, Expiry::NEVER),
            Err(Error::ValueTooLarge { size, .. }) if size == MAX_VALUE_LEN + 2
        ));
    }

    #[test]
    fn flush_and_drop() {
        let backend = memory_cluster();
        let conn = backend.connect_cluster().unwrap();
        {
            let bucket = backend.open_bucket(&conn, "orders", "").unwrap();
            let _cas = bucket.upsert("a", &json!(1), Expiry::NEVER).unwrap();
            let _cas = bucket.upsert("b", &json!(2), Expiry::NEVER).unwrap();
        }
        assert_eq!(backend.flush_bucket(&conn, "orders").unwrap(), 2);
        assert!(backend.drop_bucket(&conn, "orders").unwrap());
        assert!(!backend.drop_bucket(&conn, "orders").unwrap());
        assert!(matches!(
            backend.flush_bucket(&conn, "orders"),
            Err(Error::BucketOpen { .. })
        ));
    }

    #[test]
    fn missing_cluster_file_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Sqlite::at_location(Location::OnDisk {
            path: dir.path().join("absent.db"),
        })
        .unwrap();
        assert!(matches!(
            backend.connect_cluster(),
            Err(Error::Connection { .. })
        ));

        let _created = backend.create().unwrap();
        assert!(backend.connect_cluster().is_ok());
    }
}
