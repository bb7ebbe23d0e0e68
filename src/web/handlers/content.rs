use salvo::prelude::*;
use serde_json::json;
use tracing::{debug, warn};

use crate::instagram::ContentEvent;
use crate::web::{render_error, state_or_unavailable};

/// Ingress for notifications from the polling side.
#[handler]
pub async fn push_content_event(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let event = match req.parse_json::<ContentEvent>().await {
        Ok(event) => event,
        Err(err) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "M_BAD_JSON",
                &format!("invalid content event: {}", err),
            );
            return;
        }
    };

    let handle = event.account_handle().to_string();
    if state.content_tx.send(event).await.is_err() {
        warn!("content event channel closed, rejecting event for {}", handle);
        render_error(
            res,
            StatusCode::SERVICE_UNAVAILABLE,
            "M_UNKNOWN",
            "bridge is shutting down",
        );
        return;
    }

    debug!("queued content event for {}", handle);
    res.status_code(StatusCode::ACCEPTED);
    res.render(Json(json!({ "queued": true })));
}
