//! Error types for ticketq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{subject}: cannot {action} from status {from}")]
    InvalidState {
        subject: String,
        from: String,
        action: &'static str,
    },

    /// Lease exclusivity violation. Distinct from `InvalidState` so callers
    /// can suggest waiting for the lease to lapse.
    #[error("ticket {ticket} is already claimed{}", holder_suffix(.holder))]
    AlreadyClaimed {
        ticket: String,
        holder: Option<String>,
    },

    #[error("dependency {ticket} -> {depends_on} would create a cycle")]
    CircularDependency { ticket: String, depends_on: String },

    #[error("ticket {ticket} has unresolved dependencies: {}", .blocking.join(", "))]
    UnresolvedDependencies {
        ticket: String,
        blocking: Vec<String>,
    },

    #[error("ticket {ticket} has {remaining} incomplete task(s)")]
    IncompleteTasks { ticket: String, remaining: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error ({context}): {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn holder_suffix(holder: &Option<String>) -> String {
    holder
        .as_ref()
        .map(|w| format!(" by {w}"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach a context label to a storage error.
pub(crate) trait StorageContext<T> {
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, sqlx::Error> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Storage { context, source })
    }
}

impl Error {
    /// True when the storage layer rejected a write on a uniqueness constraint.
    pub(crate) fn is_unique_violation(&self) -> bool {
        match self {
            Error::Storage { source, .. } => source
                .as_database_error()
                .is_some_and(|e| e.is_unique_violation()),
            _ => false,
        }
    }
}
