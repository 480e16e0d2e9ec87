//! Shared cluster connections with scoped release.
//!
//! A [`ClusterPool`] keeps one backend per cluster location and a bounded queue of idle connections
//! for each. Connections are checked out as [`PooledConnection`] guards and return to the queue when
//! the guard drops, on every exit path.

use crate::backend::{ClusterBackend, Sqlite};
use crate::error::{Error, Result};
use crate::Location;
use crossbeam::queue::ArrayQueue;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Tuning for a [`ClusterPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// How many idle connections are kept per cluster. Connections released beyond this are
    /// closed. Values below one are treated as one.
    pub max_idle_per_cluster: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_cluster: 8,
        }
    }
}

/// One cluster known to the pool.
struct Cluster<Backend: ClusterBackend> {
    backend: Backend,
    idle: ArrayQueue<Backend::Connection>,
}

/// Connections to any number of clusters, keyed by their parsed server address.
pub struct ClusterPool<Backend: ClusterBackend = Sqlite> {
    config: PoolConfig,
    clusters: Mutex<HashMap<Location, Arc<Cluster<Backend>>>>,
    opened: AtomicUsize,
}

impl<Backend: ClusterBackend> fmt::Debug for ClusterPool<Backend> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clusters = self
            .clusters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ClusterPool")
            .field("config", &self.config)
            .field("clusters", &clusters)
            .field("opened", &self.opened.load(Ordering::Relaxed))
            .finish()
    }
}

impl<Backend: ClusterBackend> Default for ClusterPool<Backend> {
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl<Backend: ClusterBackend> ClusterPool<Backend> {
    /// A pool with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool with a custom configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            config,
            clusters: Mutex::new(HashMap::new()),
            opened: AtomicUsize::new(0),
        }
    }

    /// Check out a connection to the existing cluster at `server`.
    ///
    /// Fails with [`Error::Connection`] if the address is malformed or the cluster cannot be
    /// reached.
    pub fn acquire(&self, server: &str) -> Result<PooledConnection<Backend>> {
        self.checkout(server, false)
    }

    /// Check out a connection, creating the cluster at `server` if it does not exist yet.
    pub(crate) fn checkout(&self, server: &str, create: bool) -> Result<PooledConnection<Backend>> {
        let cluster = self.cluster(server)?;
        let connection = match cluster.idle.pop() {
            Some(connection) => {
                trace!(%server, "reusing idle connection");
                connection
            }
            None => {
                let connection = if create {
                    cluster.backend.create()?
                } else {
                    cluster.backend.connect_cluster()?
                };
                let _previous = self.opened.fetch_add(1, Ordering::Relaxed);
                debug!(%server, "opened connection");
                connection
            }
        };
        Ok(PooledConnection {
            cluster,
            connection: Some(connection),
        })
    }

    /// The cluster entry for `server`, preparing a backend the first time it is seen.
    fn cluster(&self, server: &str) -> Result<Arc<Cluster<Backend>>> {
        let location: Location = server.parse().map_err(|err| Error::Connection {
            server: server.to_owned(),
            reason: format!("{err}"),
        })?;

        let mut clusters = self.clusters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cluster) = clusters.get(&location) {
            return Ok(Arc::clone(cluster));
        }
        let cluster = Arc::new(Cluster {
            backend: Backend::at_location(location.clone())?,
            idle: ArrayQueue::new(self.config.max_idle_per_cluster.max(1)),
        });
        let _previous = clusters.insert(location, Arc::clone(&cluster));
        Ok(cluster)
    }

    /// How many connections this pool has opened over its lifetime.
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// How many idle connections are held for `server`. Unknown or malformed addresses have none.
    pub fn idle_connections(&self, server: &str) -> usize {
        let Ok(location) = server.parse::<Location>() else {
            return 0;
        };
        self.clusters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&location)
            .map_or(0, |cluster| cluster.idle.len())
    }

    /// Forget every cluster, closing idle connections.
    ///
    /// Connections that are checked out stay open until released. An in-memory cluster is
    /// discarded once its last connection closes.
    pub fn clear(&self) {
        self.clusters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// A connection checked out of a [`ClusterPool`]. Returned to the pool on drop.
pub struct PooledConnection<Backend: ClusterBackend> {
    cluster: Arc<Cluster<Backend>>,
    /// Only `None` while dropping.
    connection: Option<Backend::Connection>,
}

impl<Backend: ClusterBackend> PooledConnection<Backend> {
    /// The backend of the cluster this connection belongs to.
    pub fn backend(&self) -> &Backend {
        &self.cluster.backend
    }
}

impl<Backend: ClusterBackend> fmt::Debug for PooledConnection<Backend> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("location", self.cluster.backend.location())
            .finish_non_exhaustive()
    }
}

impl<Backend: ClusterBackend> Deref for PooledConnection<Backend> {
    type Target = Backend::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("connection is present until the guard drops")
    }
}

impl<Backend: ClusterBackend> Drop for PooledConnection<Backend> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.cluster.idle.push(connection).is_err() {
                trace!(location = %self.cluster.backend.location(), "idle queue full; closing connection");
            }
        }
    }
}
