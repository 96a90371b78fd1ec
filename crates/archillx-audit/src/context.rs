//! Task-local request context propagated from the HTTP boundary into every
//! audit record written on that task.

use std::future::Future;

use serde::Serialize;

#[derive(Clone, Debug, Default, Serialize)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
}

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Run `fut` with `ctx` installed as the task's request context.
pub async fn with_request_context<F>(ctx: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, fut).await
}

/// The calling task's request context; empty outside any scope (background
/// workers, tests).
pub fn current_request_context() -> RequestContext {
    CURRENT.try_with(|ctx| ctx.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_scope_is_empty() {
        let ctx = current_request_context();
        assert!(ctx.request_id.is_none());
        assert!(ctx.session_id.is_none());
        assert!(ctx.task_id.is_none());
    }

    #[tokio::test]
    async fn scope_carries_ids_into_sync_callees() {
        let ctx = RequestContext {
            request_id: Some("req-1".into()),
            session_id: Some("sess-9".into()),
            task_id: None,
        };
        let seen = with_request_context(ctx, async {
            // Sync code running on the same task observes the slot.
            current_request_context()
        })
        .await;
        assert_eq!(seen.request_id.as_deref(), Some("req-1"));
        assert_eq!(seen.session_id.as_deref(), Some("sess-9"));
    }
}
