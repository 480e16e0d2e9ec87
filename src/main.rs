//! A command-line host for the key/value activity.
//!
//! For usage, run `cargo run --features binary -- --help`.

mod cli;

use crate::cli::{Args, ClusterArgs, Command, EvalArgs, ProvisionCommand, DEFAULT_SERVER};
use clap::Parser as _;
use kvactivity::context::{ActivityContext as _, SlotContext};
use kvactivity::metadata::Metadata;
use kvactivity::pool::{ClusterPool, PoolConfig};
use kvactivity::request::slot;
use kvactivity::{Activity as _, KeyValueActivity};
use serde_json::Value;
use std::io::{self, Write as _};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A custom error message.
#[derive(Debug)]
struct ErrStr(&'static str);

impl std::error::Error for ErrStr {}

impl std::fmt::Display for ErrStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let Args { cluster, command } = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kvactivity=info")),
        )
        .with_writer(io::stderr)
        .init();

    let ClusterArgs { server, max_idle } = cluster;
    let pool: Arc<ClusterPool> = Arc::new(ClusterPool::with_config(PoolConfig {
        max_idle_per_cluster: max_idle,
    }));

    match command {
        Command::Eval(args) => eval(pool, server, args),
        Command::Provision(command) => {
            provision(&pool, server.as_deref().unwrap_or(DEFAULT_SERVER), command)
        }
        Command::Metadata => {
            writeln!(io::stdout().lock(), "{}", Metadata::key_value().to_json_pretty()?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Evaluate the activity once.
///
/// # stdout
///
/// The value of the `output` slot, as JSON.
fn eval(
    pool: Arc<ClusterPool>,
    server: Option<String>,
    args: EvalArgs,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut context = eval_context(server, args)?;

    let activity = KeyValueActivity::new(pool);
    let _done = activity.eval(&mut context)?;

    let output = context.output(slot::OUTPUT).unwrap_or(&Value::Null);
    writeln!(io::stdout().lock(), "{output}")?;
    Ok(ExitCode::SUCCESS)
}

/// Bind the input slots for `eval`.
///
/// Slots from the `--inputs` file are bound first and flags given on the command line replace them.
/// The server falls back to [`DEFAULT_SERVER`] only when neither supplies one.
fn eval_context(
    server: Option<String>,
    EvalArgs {
        inputs,
        method,
        key,
        data,
        data_text,
        expiry,
        username,
        password,
        bucket,
        bucket_password,
    }: EvalArgs,
) -> Result<SlotContext, Box<dyn std::error::Error>> {
    let mut context = match inputs {
        Some(path) => match serde_json::from_slice(&std::fs::read(path)?)? {
            Value::Object(inputs) => SlotContext::from_inputs(inputs),
            _ => return Err(Box::new(ErrStr("--inputs must contain a JSON object"))),
        },
        None => SlotContext::new(),
    };

    let data = match (data, data_text) {
        (Some(json), _) => Some(serde_json::from_str::<Value>(&json)?),
        (None, Some(text)) => Some(Value::String(text)),
        (None, None) => None,
    };
    let strings = [
        (slot::SERVER, server),
        (slot::METHOD, method),
        (slot::KEY, key),
        (slot::USERNAME, username),
        (slot::PASSWORD, password),
        (slot::BUCKET, bucket),
        (slot::BUCKET_PASSWORD, bucket_password),
    ];
    for (name, value) in strings {
        if let Some(value) = value {
            context.set_input(name, value);
        }
    }
    if let Some(data) = data {
        context.set_input(slot::DATA, data);
    }
    if let Some(expiry) = expiry {
        context.set_input(slot::EXPIRY, expiry);
    }
    if context.input(slot::SERVER).is_none() {
        context.set_input(slot::SERVER, DEFAULT_SERVER);
    }
    Ok(context)
}

/// Provision users and buckets, creating the cluster if it does not exist.
///
/// # stdout
///
/// For `flush`, the number of documents removed. Nothing otherwise.
fn provision(
    pool: &ClusterPool,
    server: &str,
    command: ProvisionCommand,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let admin = pool.provision(server)?;
    match command {
        ProvisionCommand::User { username, password } => admin.create_user(&username, &password)?,
        ProvisionCommand::Bucket {
            name,
            bucket_password,
        } => admin.create_bucket(&name, bucket_password.as_deref())?,
        ProvisionCommand::DropBucket { name } => {
            if !admin.drop_bucket(&name)? {
                return Err(Box::new(ErrStr("bucket does not exist")));
            }
        }
        ProvisionCommand::Flush { name } => {
            let removed = admin.flush_bucket(&name)?;
            writeln!(io::stdout().lock(), "{removed}")?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
