//! Command-line interface for the key/value activity.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// The cluster used when no server is given.
pub(crate) const DEFAULT_SERVER: &str = "sqlite://kv_cluster.db";

/// Command-line arguments for kvactivity.
#[derive(Debug, Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Args {
    /// Settings shared by every command.
    #[command(flatten)]
    pub(crate) cluster: ClusterArgs,
    /// The operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Where the cluster is and how to pool connections to it.
#[derive(Debug, ClapArgs)]
pub(crate) struct ClusterArgs {
    /// The cluster address, e.g. `sqlite:///var/lib/kv/cluster.db` or `memory://scratch`.
    ///
    /// Defaults to `sqlite://kv_cluster.db` unless `eval --inputs` supplies one.
    #[arg(short, long, env = "KV_SERVER", global = true)]
    pub(crate) server: Option<String>,
    /// How many idle connections to keep per cluster.
    #[arg(long, env = "KV_MAX_IDLE", global = true, default_value_t = 8)]
    pub(crate) max_idle: usize,
}

/// What operation to perform.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Evaluate the activity once and print its output as JSON.
    #[clap(aliases = ["run", "invoke"])]
    Eval(EvalArgs),
    /// Create users and buckets.
    #[clap(subcommand)]
    Provision(ProvisionCommand),
    /// Print the activity descriptor as JSON.
    #[clap(alias = "describe")]
    Metadata,
}

/// Input slots for one evaluation.
///
/// Slots can be read from a JSON file with `--inputs`; flags given on the command line take
/// precedence over the file.
#[derive(Debug, Parser)]
pub(crate) struct EvalArgs {
    /// A JSON object of input slots.
    #[arg(long)]
    pub(crate) inputs: Option<PathBuf>,
    /// One of `Insert`, `Upsert`, `Remove` or `Get`.
    #[arg(short, long)]
    pub(crate) method: Option<String>,
    /// The document key.
    #[arg(short, long)]
    pub(crate) key: Option<String>,
    /// The document value, as JSON.
    #[arg(short, long, conflicts_with = "data_text")]
    pub(crate) data: Option<String>,
    /// The document value, stored as a JSON string.
    #[arg(long)]
    pub(crate) data_text: Option<String>,
    /// Seconds until the document expires; 0 never expires.
    #[arg(short, long)]
    pub(crate) expiry: Option<u32>,
    /// The cluster user.
    #[arg(short, long, env = "KV_USERNAME")]
    pub(crate) username: Option<String>,
    /// The cluster password.
    #[arg(short, long, env = "KV_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,
    /// The bucket to operate on.
    #[arg(short, long, env = "KV_BUCKET")]
    pub(crate) bucket: Option<String>,
    /// The bucket password, if the bucket has one.
    #[arg(long, env = "KV_BUCKET_PASSWORD", hide_env_values = true)]
    pub(crate) bucket_password: Option<String>,
}

/// Provision the cluster, creating it if necessary.
#[derive(Debug, Subcommand)]
pub(crate) enum ProvisionCommand {
    /// Create a user, or change the password of an existing one.
    User {
        /// The user name.
        username: String,
        /// The password.
        password: String,
    },
    /// Create a bucket, or change the password of an existing one.
    Bucket {
        /// The bucket name.
        name: String,
        /// Protect the bucket with a password.
        #[arg(long)]
        bucket_password: Option<String>,
    },
    /// Delete a bucket and all of its documents.
    #[clap(aliases = ["drop", "rm"])]
    DropBucket {
        /// The bucket name.
        name: String,
    },
    /// Delete every document in a bucket.
    Flush {
        /// The bucket name.
        name: String,
    },
}
