//! The key/value activity invoked by the host.

use crate::backend::{Bucket, ClusterBackend, Sqlite};
use crate::context::ActivityContext;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::pool::ClusterPool;
use crate::request::{slot, Method, OperationRequest, OperationResult};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Dispatch};

/// A unit of work a host engine can run as one step of a flow.
pub trait Activity {
    /// The activity's descriptor.
    fn metadata(&self) -> &Metadata;

    /// Run the activity against the slots in `context`.
    ///
    /// Returns `Ok(true)` once the outputs are written. On error no output is written.
    fn eval(&self, context: &mut dyn ActivityContext) -> Result<bool>;
}

/// Performs one of `Insert`, `Upsert`, `Remove` or `Get` against a bucket per invocation.
///
/// Connections come from an injected [`ClusterPool`] and are returned to it when the invocation
/// ends, whether it succeeded or not. Logging goes to the [`Dispatch`] captured when the activity
/// was built; each invocation runs in its own span.
pub struct KeyValueActivity<Backend: ClusterBackend = Sqlite> {
    metadata: Metadata,
    pool: Arc<ClusterPool<Backend>>,
    dispatch: Dispatch,
}

impl<Backend: ClusterBackend> fmt::Debug for KeyValueActivity<Backend> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueActivity")
            .field("name", &self.metadata.name)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<Backend: ClusterBackend> KeyValueActivity<Backend> {
    /// Build an activity drawing connections from `pool`.
    ///
    /// Logs go to the dispatcher that is current on the calling thread; use
    /// [`with_dispatch`](Self::with_dispatch) to choose another.
    pub fn new(pool: Arc<ClusterPool<Backend>>) -> Self {
        Self {
            metadata: Metadata::key_value(),
            pool,
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Send this activity's logs to `dispatch`.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// The pool this activity draws connections from.
    pub const fn pool(&self) -> &Arc<ClusterPool<Backend>> {
        &self.pool
    }

    /// Perform one operation.
    ///
    /// Failures are logged once at error level and returned.
    pub fn execute(&self, request: &OperationRequest) -> Result<OperationResult> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            let span = info_span!(
                "kv_operation",
                method = %request.method,
                key = %request.key,
                bucket = %request.bucket,
            );
            let _entered = span.enter();

            match self.run(request) {
                Ok(result) => {
                    info!("operation succeeded");
                    Ok(result)
                }
                Err(err) => {
                    error!(error = %err, "operation failed");
                    Err(err)
                }
            }
        })
    }

    /// Perform one operation on tokio's blocking pool.
    pub async fn execute_async(self: Arc<Self>, request: OperationRequest) -> Result<OperationResult>
    where
        Backend: 'static,
        Backend::Connection: 'static,
    {
        let dispatch = self.dispatch.clone();
        tokio::task::spawn_blocking(move || self.execute(&request))
            .await
            .map_err(|err| runtime_failure(&dispatch, &err))?
    }

    /// Connect, authenticate, open the bucket and dispatch. Every resource is released when this
    /// returns.
    fn run(&self, request: &OperationRequest) -> Result<OperationResult> {
        debug!(server = %request.server, "connecting");
        let connection = self.pool.acquire(&request.server)?;
        let backend = connection.backend();

        debug!(username = %request.credentials.username, "authenticating");
        backend.authenticate(&*connection, &request.credentials)?;

        debug!("opening bucket");
        let bucket = backend.open_bucket(&*connection, &request.bucket, &request.bucket_password)?;

        debug!("dispatching");
        dispatch(&bucket, request)
    }
}

/// Log a blocking task that did not complete and convert it to [`Error::Runtime`].
fn runtime_failure(dispatch: &Dispatch, err: &tokio::task::JoinError) -> Error {
    let err = Error::Runtime(err.to_string());
    tracing::dispatcher::with_default(dispatch, || {
        error!(error = %err, "operation failed");
    });
    err
}

/// Invoke the primitive named by the request's method.
fn dispatch(bucket: &impl Bucket, request: &OperationRequest) -> Result<OperationResult> {
    Ok(match request.method {
        Method::Insert => bucket.insert(&request.key, data(request)?, request.expiry)?.into(),
        Method::Upsert => bucket.upsert(&request.key, data(request)?, request.expiry)?.into(),
        Method::Remove => bucket.remove(&request.key)?.into(),
        Method::Get => bucket.get(&request.key)?.into(),
    })
}

/// The value a write stores.
fn data(request: &OperationRequest) -> Result<&Value> {
    request
        .data
        .as_ref()
        .ok_or_else(|| Error::invalid_input(slot::DATA, format!("required by {}", request.method)))
}

impl<Backend: ClusterBackend> Activity for KeyValueActivity<Backend> {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn eval(&self, context: &mut dyn ActivityContext) -> Result<bool> {
        let request = match OperationRequest::from_context(context) {
            Ok(request) => request,
            Err(err) => {
                tracing::dispatcher::with_default(&self.dispatch, || {
                    error!(error = %err, "rejected activity inputs");
                });
                return Err(err);
            }
        };

        let OperationResult { value } = self.execute(&request)?;
        context.set_output(slot::OUTPUT, value);
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::SlotContext;
    use serde_json::json;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    static NEXT_CLUSTER: AtomicUsize = AtomicUsize::new(0);

    /// A provisioned in-memory cluster and inputs pointing at it.
    fn setup() -> (KeyValueActivity, SlotContext) {
        let server = format!(
            "memory://activity-test-{}",
            NEXT_CLUSTER.fetch_add(1, Ordering::Relaxed)
        );
        let pool: Arc<ClusterPool> = Arc::default();
        let admin = pool.provision(&server).unwrap();
        admin.create_user("app", "secret").unwrap();
        admin.create_bucket("orders", None).unwrap();
        drop(admin);

        let inputs = SlotContext::new()
            .with_input(slot::SERVER, server)
            .with_input(slot::USERNAME, "app")
            .with_input(slot::PASSWORD, "secret")
            .with_input(slot::BUCKET, "orders");
        (KeyValueActivity::new(pool), inputs)
    }

    #[test]
    fn upsert_then_get() {
        let (activity, inputs) = setup();

        let mut upsert = inputs
            .clone()
            .with_input(slot::METHOD, "Upsert")
            .with_input(slot::KEY, "order-1")
            .with_input(slot::DATA, "{\"qty\":2}")
            .with_input(slot::EXPIRY, 0);
        assert!(activity.eval(&mut upsert).unwrap());
        assert!(upsert.output(slot::OUTPUT).unwrap().as_u64().unwrap() > 0);

        let mut get = inputs
            .with_input(slot::METHOD, "Get")
            .with_input(slot::KEY, "order-1");
        assert!(activity.eval(&mut get).unwrap());
        assert_eq!(get.output(slot::OUTPUT), Some(&json!("{\"qty\":2}")));
    }

    #[test]
    fn failures_write_no_output() {
        let (activity, inputs) = setup();
        let mut get = inputs
            .with_input(slot::METHOD, "Get")
            .with_input(slot::KEY, "absent");

        assert!(matches!(
            activity.eval(&mut get),
            Err(Error::NotFound { key }) if key == "absent"
        ));
        assert!(get.outputs().is_empty());
    }

    #[test]
    fn connection_is_returned_after_failure() {
        let (activity, inputs) = setup();
        let server = inputs.input(slot::SERVER).unwrap().as_str().unwrap().to_owned();
        let mut wrong_password = inputs
            .with_input(slot::PASSWORD, "wrong")
            .with_input(slot::METHOD, "Get")
            .with_input(slot::KEY, "k");

        assert!(matches!(
            activity.eval(&mut wrong_password),
            Err(Error::Authentication { .. })
        ));
        assert_eq!(activity.pool().idle_connections(&server), 1);
    }

    #[test]
    fn missing_data_is_rejected_by_dispatch() {
        let (activity, inputs) = setup();
        let mut request = OperationRequest::from_context(
            &inputs
                .with_input(slot::METHOD, "Upsert")
                .with_input(slot::KEY, "k")
                .with_input(slot::DATA, 1),
        )
        .unwrap();
        request.data = None;

        assert!(matches!(
            activity.execute(&request),
            Err(Error::InvalidInput { slot: "data", .. })
        ));
    }

    /// Collects formatted log lines.
    #[derive(Clone, Default)]
    struct Logs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Logs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn runtime_failures_are_logged() {
        let logs = Logs::default();
        let writer = logs.clone();
        let dispatch = Dispatch::new(
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish(),
        );

        let join_err = tokio::spawn(async { panic!("worker lost") })
            .await
            .unwrap_err();
        let err = runtime_failure(&dispatch, &join_err);

        assert!(matches!(err, Error::Runtime(_)));
        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("operation failed"), "{logs}");
        assert!(logs.contains("runtime error"), "{logs}");
    }
}
