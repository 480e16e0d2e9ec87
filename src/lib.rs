//! A flow-engine activity that performs one key/value operation per invocation.
//!
//! The host binds input slots (`method`, `key`, `data`, `expiry`, `server`, `username`,
//! `password`, `bucket`, `bucketPassword`) on an [`ActivityContext`](context::ActivityContext) and
//! calls [`Activity::eval`]. The activity validates the inputs, checks out a connection from its
//! [`ClusterPool`](pool::ClusterPool), authenticates, opens the bucket and runs one of `Insert`,
//! `Upsert`, `Remove` or `Get`. The change token or the retrieved document is written to the
//! `output` slot.
//!
//! ```no_run
//! use kvactivity::context::SlotContext;
//! use kvactivity::pool::ClusterPool;
//! use kvactivity::{Activity as _, KeyValueActivity};
//! use std::sync::Arc;
//!
//! # fn main() -> kvactivity::Result<()> {
//! let pool: Arc<ClusterPool> = Arc::default();
//! let activity = KeyValueActivity::new(pool);
//!
//! let mut context = SlotContext::new()
//!     .with_input("method", "Get")
//!     .with_input("key", "order-1")
//!     .with_input("server", "sqlite:///var/lib/kv/cluster.db")
//!     .with_input("username", "app")
//!     .with_input("password", "secret")
//!     .with_input("bucket", "orders");
//! activity.eval(&mut context)?;
//! println!("{:?}", context.output("output"));
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod admin;
pub mod backend;
pub mod context;
pub mod document;
pub mod error;
mod location;
pub mod metadata;
pub mod pool;
pub mod request;

pub use self::activity::{Activity, KeyValueActivity};
pub use self::error::{Error, ErrorKind, Result};
pub use self::location::{Location, LocationError};
