use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The location of a cluster, parsed from a server address.
///
/// Two schemes are understood:
///
/// - `memory://<name>` names an in-memory cluster. Every connection to the same name within one
///   process sees the same data for as long as the cluster is held open.
/// - `sqlite://<path>` names a cluster stored in a file on disk.
#[non_exhaustive] // future-proofing for options like network clusters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Location {
    /// An in-memory cluster. This is useful for short-lived data and tests.
    InMemory {
        /// The name shared by all connections to this cluster.
        name: String,
    },
    /// A cluster stored on the disk. This is useful for long-lived data.
    OnDisk {
        /// The path to the cluster file. This is permitted to be a path to a network file system,
        /// if desired.
        path: PathBuf,
    },
}

/// Scheme prefix for in-memory clusters.
const MEMORY_SCHEME: &str = "memory";
/// Scheme prefix for on-disk clusters.
const SQLITE_SCHEME: &str = "sqlite";

/// Why a server address could not be turned into a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// The address has no `scheme://` prefix.
    #[error("address `{0}` is missing a scheme")]
    MissingScheme(String),
    /// The scheme is not one this crate can connect to.
    #[error("scheme `{0}` is not supported")]
    UnsupportedScheme(String),
    /// The part after the scheme is empty or contains disallowed characters.
    #[error("cluster name `{0}` is invalid")]
    InvalidName(String),
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let address = address.trim();
        let Some((scheme, rest)) = address.split_once("://") else {
            return Err(LocationError::MissingScheme(address.to_owned()));
        };

        match scheme {
            MEMORY_SCHEME => {
                let valid = !rest.is_empty()
                    && rest
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
                if valid {
                    Ok(Self::InMemory {
                        name: rest.to_owned(),
                    })
                } else {
                    Err(LocationError::InvalidName(rest.to_owned()))
                }
            }
            SQLITE_SCHEME if rest.is_empty() => Err(LocationError::InvalidName(rest.to_owned())),
            SQLITE_SCHEME => Ok(Self::OnDisk {
                path: PathBuf::from(rest),
            }),
            _ => Err(LocationError::UnsupportedScheme(scheme.to_owned())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory { name } => write!(f, "{MEMORY_SCHEME}://{name}"),
            Self::OnDisk { path } => write!(f, "{SQLITE_SCHEME}://{}", path.display()),
        }
    }
}
