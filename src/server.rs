//! The request pipeline as a warp filter tree:
//! CORS → body ceilings → identity → admission → (welcome | asset | forward).

use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Body, HeaderMap};
use tracing::info;
use warp::{Filter, Rejection, Reply};

use crate::handlers::{self, handle_rejection};
use crate::middleware;
use crate::models::{Admission, AppState, CookieJar, RequestContext};
use crate::services::identity::IdentityExtractor;
use crate::services::proxy::UpstreamClient;

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "OK");

    // `/api-getway` is the path existing clients call; `/api-gateway` is kept
    // alongside it.
    let welcome = warp::path("api-getway")
        .or(warp::path("api-gateway"))
        .unify()
        .and(warp::path::end())
        .and(warp::get())
        .and(
            admitted(&state)
                .map(handlers::welcome)
                .recover(handle_rejection),
        );

    let assets = warp::path(state.config.asset_prefix.clone()).and(
        admitted(&state)
            .and(warp::fs::dir(state.config.assets_dir.clone()))
            .map(handlers::serve_asset)
            .recover(handle_rejection),
    );

    let forward = warp::method()
        .and(warp::path::full())
        .and(
            warp::query::raw()
                .or_else(|_| async { Ok::<(String,), Infallible>((String::new(),)) }),
        )
        .and(warp::header::headers_cloned())
        .and(admitted(&state))
        .and(with_upstream(state.upstream.clone()))
        .and_then(handlers::forward)
        .recover(handle_rejection);

    health
        .or(welcome)
        .or(assets)
        .or(forward)
        .with(middleware::cors(&state.config.allowed_origins))
        .recover(handle_rejection)
        .with(warp::log::custom(access_log))
}

/// Edge policy, identity and admission for one request. Each route applies
/// this once, after its own path match, so a request is charged at most once.
fn admitted(state: &AppState) -> impl Filter<Extract = (Admission,), Error = Rejection> + Clone {
    let limiter = state.limiter.clone();

    middleware::body_limits(state.body_limits())
        .and(request_context(state.identity.clone()))
        .and_then(move |body: Body, context: RequestContext| {
            let limiter = limiter.clone();
            async move {
                let status = limiter
                    .check(&context)
                    .await
                    .map_err(warp::reject::custom)?;
                Ok::<_, Rejection>(Admission {
                    context,
                    status,
                    body,
                })
            }
        })
}

fn request_context(
    extractor: Arc<IdentityExtractor>,
) -> impl Filter<Extract = (RequestContext,), Error = Infallible> + Clone {
    warp::addr::remote()
        .and(warp::header::headers_cloned())
        .and(middleware::cookies())
        .map(move |remote, headers: HeaderMap, cookies: CookieJar| {
            extractor.context(remote, &headers, cookies)
        })
}

fn with_upstream(
    upstream: Arc<UpstreamClient>,
) -> impl Filter<Extract = (Arc<UpstreamClient>,), Error = Infallible> + Clone {
    warp::any().map(move || upstream.clone())
}

fn access_log(info: warp::log::Info) {
    info!(
        method = %info.method(),
        path = info.path(),
        status = info.status().as_u16(),
        elapsed_ms = info.elapsed().as_millis() as u64,
        remote = ?info.remote_addr(),
        "request"
    );
}
