use std::{error::Error as StdError, sync::Arc};

use thiserror::Error;

/// A data source failed to produce records.
///
/// The coalescer itself never creates these: it forwards whatever error
/// the source returns, cloned once per attached caller. `FetchFailure` is
/// provided for sources that don't already have a cloneable error type. It
/// is cheap to clone, since both the reason and the cause are shared.
#[derive(Debug, Clone, Error)]
#[error("data source failed to produce records: {reason}")]
pub struct FetchFailure {
    reason: Arc<str>,

    #[source]
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl FetchFailure {
    pub fn new(reason: impl Into<Arc<str>>) -> Self {
        Self {
            reason: reason.into(),
            cause: None,
        }
    }

    /// Wrap an underlying error (an I/O or protocol failure, for instance)
    /// so that it can be fanned out to several callers.
    pub fn caused_by(
        reason: impl Into<Arc<str>>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl PartialEq for FetchFailure {
    /// Two failures are equal if they have the same reason. Causes are
    /// compared by identity, so clones of one failure are always equal.
    fn eq(&self, other: &Self) -> bool {
        self.reason == other.reason
            && match (&self.cause, &other.cause) {
                (None, None) => true,
                (Some(lhs), Some(rhs)) => Arc::ptr_eq(lhs, rhs),
                _ => false,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn display_and_source() {
        let failure = FetchFailure::caused_by(
            "catalog unavailable",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );

        assert_eq!(
            failure.to_string(),
            "data source failed to produce records: catalog unavailable"
        );
        assert_eq!(failure.source().map(|err| err.to_string()), Some("refused".into()));
        assert_eq!(failure.reason(), "catalog unavailable");
        assert_eq!(failure.clone(), failure);
    }

    #[test]
    fn distinct_causes_are_distinct() {
        let lhs = FetchFailure::caused_by("boom", io::Error::from(io::ErrorKind::Other));
        let rhs = FetchFailure::caused_by("boom", io::Error::from(io::ErrorKind::Other));

        assert_ne!(lhs, rhs);
        assert_eq!(FetchFailure::new("boom"), FetchFailure::new("boom"));
    }
}
