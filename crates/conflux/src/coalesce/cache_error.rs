use thiserror::Error;

/// An error that a cache generation resolved to.
///
/// This error enum is delivered identically to every [`ValueFuture`] bound to
/// the failed generation, and is cached for the same TTL window as a success
/// would be. There is no automatic retry; only a later lookup observing
/// staleness starts a new attempt.
///
/// [`ValueFuture`]: super::ValueFuture
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The generator reported that no value exists for the key.
    #[error("not found")]
    NotFound,
    /// The generator failed to produce a value.
    ///
    /// The attached string contains the generator's description of the
    /// failure.
    #[error("generation failed: {0}")]
    Failed(String),
    /// An unexpected error in the cache itself.
    ///
    /// This is also the resolution observed when a generation task died
    /// without writing a result.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    /// Logs the given error and turns it into an opaque
    /// [`InternalError`](Self::InternalError).
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The result of a cache generation, either a value or the error the
/// generation resolved to.
pub type CacheResult<T = ()> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(CacheError::NotFound.to_string(), "not found");
        assert_eq!(
            CacheError::Failed("the upstream is on fire".into()).to_string(),
            "generation failed: the upstream is on fire"
        );
        assert_eq!(CacheError::InternalError.to_string(), "internal error");
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "oops");
        assert_eq!(CacheError::from(err), CacheError::InternalError);
    }
}
