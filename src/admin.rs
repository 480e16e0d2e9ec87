//! Provisioning of users and buckets.

use crate::backend::{ClusterBackend, Sqlite};
use crate::error::Result;
use crate::pool::{ClusterPool, PooledConnection};
use crate::request::Credentials;
use tracing::info;

impl<Backend: ClusterBackend> ClusterPool<Backend> {
    /// Administer the cluster at `server`, creating it if it does not exist yet.
    pub fn provision(&self, server: &str) -> Result<ClusterAdmin<Backend>> {
        Ok(ClusterAdmin {
            connection: self.checkout(server, true)?,
        })
    }
}

/// Management operations on one cluster.
#[derive(Debug)]
pub struct ClusterAdmin<Backend: ClusterBackend = Sqlite> {
    connection: PooledConnection<Backend>,
}

impl<Backend: ClusterBackend> ClusterAdmin<Backend> {
    /// Create a user, or replace the password of an existing one.
    pub fn create_user(&self, username: &str, password: &str) -> Result<()> {
        self.connection
            .backend()
            .create_user(&*self.connection, &Credentials::new(username, password))?;
        info!(%username, "created user");
        Ok(())
    }

    /// Create a bucket, or replace the password of an existing one.
    pub fn create_bucket(&self, name: &str, password: Option<&str>) -> Result<()> {
        self.connection
            .backend()
            .create_bucket(&*self.connection, name, password)?;
        info!(bucket = %name, "created bucket");
        Ok(())
    }

    /// Delete a bucket with all of its documents. Returns whether it existed.
    pub fn drop_bucket(&self, name: &str) -> Result<bool> {
        let existed = self
            .connection
            .backend()
            .drop_bucket(&*self.connection, name)?;
        info!(bucket = %name, existed, "dropped bucket");
        Ok(existed)
    }

    /// Delete every document of a bucket. Returns how many were removed.
    pub fn flush_bucket(&self, name: &str) -> Result<usize> {
        let removed = self
            .connection
            .backend()
            .flush_bucket(&*self.connection, name)?;
        info!(bucket = %name, removed, "flushed bucket");
        Ok(removed)
    }
}

#[cfg(test)]
mod test {
    use crate::error::Error;
    use crate::pool::ClusterPool;

    #[test]
    fn provisioning_creates_missing_cluster_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = format!("sqlite://{}", dir.path().join("cluster.db").display());
        let pool: ClusterPool = ClusterPool::new();

        assert!(matches!(pool.acquire(&server), Err(Error::Connection { .. })));

        let admin = pool.provision(&server).unwrap();
        admin.create_user("app", "secret").unwrap();
        admin.create_bucket("orders", None).unwrap();
        drop(admin);

        assert!(pool.acquire(&server).is_ok());
    }

    #[test]
    fn empty_names_are_rejected() {
        let pool: ClusterPool = ClusterPool::new();
        let admin = pool.provision("memory://admin-empty").unwrap();
        assert!(matches!(
            admin.create_user("", "pw"),
            Err(Error::InvalidInput { slot: "username", .. })
        ));
        assert!(matches!(
            admin.create_bucket("", None),
            Err(Error::InvalidInput { slot: "bucket", .. })
        ));
    }
}
