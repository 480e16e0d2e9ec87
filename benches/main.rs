#![allow(
    missing_docs,
    clippy::missing_docs_in_private_items,
    unused_results,
    clippy::unwrap_used
)]


use criterion::Criterion;
use tracing::Dispatch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::prelude::*;

fn main() {
    // Without a filter every invocation would log at info level and dominate the timings.
    let subscriber = tracing_subscriber::registry().with(
        Layer::new()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"))),
    );
    tracing::dispatcher::set_global_default(Dispatch::new(subscriber))
        .expect("setting tracing default failed");

    kv::kv();

    Criterion::default().configure_from_args().final_summary();
}
