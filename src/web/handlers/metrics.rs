use salvo::http::header::{CONTENT_TYPE, HeaderValue};
use salvo::prelude::*;

use crate::web::metrics::format_prometheus;
use crate::web::state_or_unavailable;

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let body = format_prometheus(
        state.started_at.elapsed().as_secs(),
        state.router.registry().len(),
    );

    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    res.body(body);
}
