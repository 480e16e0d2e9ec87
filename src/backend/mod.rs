//! The seam between the activity and the cluster that stores its buckets.

mod sqlite;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::sqlite::Sqlite {}
}

pub use self::sqlite::{Sqlite, SqliteBucket};
use crate::document::{Cas, Document, Expiry};
use crate::error::Result;
use crate::request::Credentials;
use crate::Location;
use serde_json::Value;
use sha2::{Digest as _, Sha256};

/// A cluster of buckets reachable at one [`Location`].
///
/// A backend is created once per location and shared between threads; connections are created
/// from it as needed and used by one invocation at a time.
pub trait ClusterBackend: sealed::Sealed + Sized + Send + Sync {
    /// An open connection to the cluster.
    type Connection: Send;
    /// A bucket opened over a borrowed connection.
    type Bucket<'c>: Bucket
    where
        Self: 'c;

    /// Prepare a backend for the cluster at `location` without necessarily connecting to it.
    fn at_location(location: Location) -> Result<Self>;
    /// Where the cluster lives.
    fn location(&self) -> &Location;

    /// Open a connection to an existing cluster.
    ///
    /// Note: Backends provide their own version of [`connect_cluster`](Self::connect_cluster)
    /// that initializes the cluster as necessary. It is recommended to **not** call this method
    /// directly unless you are implementing a new backend.
    fn connect(&self) -> Result<Self::Connection>;

    /// Open a connection, creating the cluster if it does not exist yet.
    fn create(&self) -> Result<Self::Connection> {
        self.connect()
    }

    /// Create the cluster's tables if they do not exist.
    fn initialize(&self, connection: &Self::Connection) -> Result<()>;

    /// Open a connection to an existing cluster, initialized and ready for use.
    fn connect_cluster(&self) -> Result<Self::Connection> {
        let conn = self.connect()?;
        self.initialize(&conn)?;
        Ok(conn)
    }

    /// Check a username and password against the cluster's users.
    fn authenticate(&self, connection: &Self::Connection, credentials: &Credentials)
        -> Result<()>;

    /// Open a bucket, checking its password if it has one.
    fn open_bucket<'c>(
        &'c self,
        connection: &'c Self::Connection,
        name: &str,
        password: &str,
    ) -> Result<Self::Bucket<'c>>;

    /// Create a user, or replace the password of an existing one.
    fn create_user(&self, connection: &Self::Connection, credentials: &Credentials) -> Result<()>;

    /// Create a bucket, or replace the password of an existing one. `None` means no password.
    fn create_bucket(
        &self,
        connection: &Self::Connection,
        name: &str,
        password: Option<&str>,
    ) -> Result<()>;

    /// Delete a bucket and its documents. Returns whether the bucket existed.
    fn drop_bucket(&self, connection: &Self::Connection, name: &str) -> Result<bool>;

    /// Delete every document in a bucket. Returns how many were removed.
    fn flush_bucket(&self, connection: &Self::Connection, name: &str) -> Result<usize>;
}

/// The four key/value primitives of an open bucket.
pub trait Bucket {
    /// The bucket name.
    fn name(&self) -> &str;
    /// Store a new document. Fails with `DuplicateKey` if the key holds a live document.
    fn insert(&self, key: &str, value: &Value, expiry: Expiry) -> Result<Cas>;
    /// Store a document, overwriting any existing one.
    fn upsert(&self, key: &str, value: &Value, expiry: Expiry) -> Result<Cas>;
    /// Delete a document. Fails with `NotFound` if the key holds no live document.
    fn remove(&self, key: &str) -> Result<Cas>;
    /// Read a document. Fails with `NotFound` if the key holds no live document.
    fn get(&self, key: &str) -> Result<Document>;
}

/// The stored form of a password: SHA-256 over the principal name, a separator and the password.
pub(crate) fn password_digest(principal: &str, password: &str) -> Vec<u8> {
    Sha256::new()
        .chain_update(principal.as_bytes())
        .chain_update([0_u8])
        .chain_update(password.as_bytes())
        .finalize()
        .to_vec()
}
