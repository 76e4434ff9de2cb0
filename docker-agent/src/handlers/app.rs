use axum::{extract::DefaultBodyLimit, routing, Router};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use super::{dockers, AgentState};

pub fn add_routes(
    router: Router,
    state: AgentState,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    let container_routes = Router::new()
        .route("/dockers", routing::post(dockers::create))
        .route("/dockers/port", routing::get(dockers::free_ports))
        .route("/dockers/image", routing::post(dockers::load_image))
        .route("/dockers/image/:id", routing::get(dockers::image_status))
        .route(
            "/dockers/:id",
            routing::get(dockers::status).delete(dockers::delete),
        )
        .route("/dockers/:id/stop", routing::post(dockers::stop))
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state);

    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index))
        .merge(container_routes)
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "docker agent"
}
