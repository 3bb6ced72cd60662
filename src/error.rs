use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error taxonomy. Storage faults are folded into the domain
/// variants where the mapping is unambiguous; everything else stays under
/// `Storage` with the source preserved.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("name \"{name}\" is already taken")]
    DuplicateName { name: String },

    #[error("authentication failed")]
    Authentication,

    #[error("not authorized to {action}")]
    Authorization { action: &'static str },

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("storage failure")]
    Storage(#[source] sqlx::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound { entity: "record" },
            sqlx::Error::PoolTimedOut => {
                Error::BackendUnavailable("timed out acquiring a database connection".into())
            }
            sqlx::Error::PoolClosed => Error::BackendUnavailable("database pool is closed".into()),
            sqlx::Error::Io(io) => Error::BackendUnavailable(io.to_string()),
            other => Error::Storage(other),
        }
    }
}

/// SQLite reports uniqueness violations as constraint errors; callers that
/// know which name collided translate these into `DuplicateName`.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = Error::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn pool_closed_maps_to_backend_unavailable() {
        let err = Error::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[test]
    fn display_carries_the_offending_name() {
        let err = Error::DuplicateName {
            name: "Sunrise".into(),
        };
        assert_eq!(err.to_string(), "name \"Sunrise\" is already taken");
    }
}
