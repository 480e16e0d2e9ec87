use kvactivity::context::SlotContext;
use kvactivity::pool::ClusterPool;
use kvactivity::request::slot;
use kvactivity::KeyValueActivity;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_CLUSTER: AtomicUsize = AtomicUsize::new(0);

/// A provisioned cluster with one user (`app`/`secret`) and two buckets: `orders` without a
/// password and `vault` protected by `vault-pw`.
pub(crate) struct TestCluster {
    pub(crate) server: String,
    pub(crate) activity: Arc<KeyValueActivity>,
}

impl TestCluster {
    /// A fresh in-memory cluster, unique to the calling test.
    pub(crate) fn in_memory() -> Self {
        let server = format!(
            "memory://integration-{}",
            NEXT_CLUSTER.fetch_add(1, Ordering::Relaxed)
        );
        Self::provisioned(server)
    }

    /// A cluster at `server`, created if necessary.
    pub(crate) fn provisioned(server: String) -> Self {
        let pool: Arc<ClusterPool> = Arc::default();
        let admin = pool.provision(&server).expect("provision cluster");
        admin.create_user("app", "secret").expect("create user");
        admin.create_bucket("orders", None).expect("create bucket");
        admin
            .create_bucket("vault", Some("vault-pw"))
            .expect("create bucket");
        drop(admin);

        Self {
            server,
            activity: Arc::new(KeyValueActivity::new(pool)),
        }
    }

    /// Inputs for `method` on `key` in the `orders` bucket.
    pub(crate) fn inputs(&self, method: &str, key: &str) -> SlotContext {
        SlotContext::new()
            .with_input(slot::METHOD, method)
            .with_input(slot::KEY, key)
            .with_input(slot::SERVER, self.server.as_str())
            .with_input(slot::USERNAME, "app")
            .with_input(slot::PASSWORD, "secret")
            .with_input(slot::BUCKET, "orders")
    }
}
