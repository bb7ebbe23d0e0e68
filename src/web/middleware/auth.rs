use salvo::prelude::*;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::web::handlers::{
    accounts::{delete_account, get_account, list_deliveries, put_account},
    appservice::{put_transaction, query_room_alias, query_user},
    content::push_content_event,
    health::health_check,
    links::list_links,
    metrics::metrics_endpoint,
};
use crate::web::{render_error, state_or_unavailable};

fn presented_token(req: &Request) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .or_else(|| req.query::<String>("access_token"))
}

/// Rejects requests that do not carry the homeserver token.
#[handler]
pub async fn require_hs_token(req: &mut Request, res: &mut Response, ctrl: &mut FlowCtrl) {
    let Some(state) = state_or_unavailable(res) else {
        ctrl.skip_rest();
        return;
    };

    match presented_token(req) {
        None => {
            render_error(
                res,
                StatusCode::UNAUTHORIZED,
                "M_UNAUTHORIZED",
                "missing access token",
            );
            ctrl.skip_rest();
        }
        Some(token) if token != state.hs_token.expose_secret() => {
            debug!("rejected request to {} with a bad token", req.uri().path());
            render_error(res, StatusCode::FORBIDDEN, "M_FORBIDDEN", "bad access token");
            ctrl.skip_rest();
        }
        Some(_) => {}
    }
}

pub fn create_router(metrics_enabled: bool) -> Router {
    let mut router = Router::new().push(Router::with_path("health").get(health_check));
    if metrics_enabled {
        router = router.push(Router::with_path("metrics").get(metrics_endpoint));
    }

    router
        .push(
            Router::with_path("_matrix/app/v1")
                .hoop(require_hs_token)
                .push(Router::with_path("transactions/{txn_id}").put(put_transaction))
                .push(Router::with_path("users/{user_id}").get(query_user))
                .push(Router::with_path("rooms/{alias}").get(query_room_alias)),
        )
        .push(
            Router::with_path("_bridge/content/events")
                .hoop(require_hs_token)
                .post(push_content_event),
        )
        .push(
            Router::with_path("admin")
                .hoop(require_hs_token)
                .push(Router::with_path("links").get(list_links))
                .push(
                    Router::with_path("accounts/{handle}")
                        .get(get_account)
                        .put(put_account)
                        .delete(delete_account),
                )
                .push(Router::with_path("posts/{post_id}/deliveries").get(list_deliveries)),
        )
}
