//! HTTP routes.

pub mod health;
pub mod status;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the server router.
///
/// The status API exposes repository and runner names, so it is only
/// mounted when `expose_status` is set.
pub fn router(state: AppState, expose_status: bool) -> Router {
    let mut router = Router::new()
        .nest("/hooks", webhooks::router())
        .merge(health::router());

    if expose_status {
        router = router.nest("/api/v1", status::router());
    }

    router.with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::AppState;
    use axum::body::{Body, to_bytes};
    use axum::http::Response;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;
    use vmfleet_provisioner::OrkaProvisioner;
    use vmfleet_scheduler::Coordinator;

    pub(crate) const SECRET: &str = "It's a Secret to Everybody";

    /// State whose provisioner is never reached; no workers run in these tests.
    pub(crate) fn state() -> AppState {
        let orka = OrkaProvisioner::new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        AppState::new(Arc::new(Coordinator::new(Arc::new(orka), 2)), SECRET)
    }

    pub(crate) async fn body_string(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
