//! Role-scoped dashboard panels
//!
//! A panel loads its slice of data, derives aggregates, and performs the one
//! or two writes its role allows. Every backend call runs inside the panel's
//! view scope; once the scope is cancelled no result is applied. Loaded data
//! is replaced only after a complete, successful fetch.

mod admin;
mod instructor;
mod student;

use log::{debug, error};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::error::Error;
use crate::notify::Notifier;

pub use admin::{AdminOverview, AdminPanel, REVENUE_FACTOR};
pub use instructor::{CourseDraft, InstructorCourse, InstructorPanel, InstructorTotals};
pub use student::{EnrolledCourse, StudentPanel, StudentStats};

/// What every panel carries: backend, notices, and its view scope
#[derive(Clone)]
pub(crate) struct PanelContext {
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    scope: CancellationToken,
}

impl PanelContext {
    pub(crate) fn new(backend: Arc<dyn Backend>, notifier: Notifier, scope: CancellationToken) -> Self {
        Self {
            backend,
            notifier,
            scope,
        }
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run `fut` unless the scope is, or becomes, cancelled
    pub(crate) async fn scoped<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        if self.scope.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }

    /// Report a failed read
    pub(crate) fn fetch_failed(&self, panel: &str, err: &Error) {
        if let Error::Cancelled = err {
            debug!("{} panel load cancelled", panel);
            return;
        }
        error!("{} panel load failed: {}", panel, err);
        self.notifier
            .error(format!("Error fetching data: {}", err.user_message()));
    }

    pub(crate) fn close(&self) {
        self.scope.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }
}

/// Case-insensitive substring match
pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::notify::NoticeLevel;

    #[tokio::test]
    async fn cancelled_scope_short_circuits() {
        let (notifier, mut notices) = Notifier::channel();
        let ctx = PanelContext::new(
            Arc::new(MemoryBackend::new()),
            notifier,
            CancellationToken::new(),
        );
        ctx.close();

        let result: Result<(), Error> = ctx.scoped(async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));

        ctx.fetch_failed("test", &Error::Cancelled);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn fetch_failure_produces_error_notice() {
        let (notifier, mut notices) = Notifier::channel();
        let ctx = PanelContext::new(
            Arc::new(MemoryBackend::new()),
            notifier,
            CancellationToken::new(),
        );

        ctx.fetch_failed("test", &Error::Network("connection refused".into()));

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.message, "Error fetching data: connection refused");
    }

    #[test]
    fn search_ignores_case() {
        assert!(contains_ignore_case("Jane Doe", "jane"));
        assert!(!contains_ignore_case("Jane Doe", "john"));
    }
}
