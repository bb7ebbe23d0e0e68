use salvo::prelude::*;
use serde_json::json;

use crate::web::state_or_unavailable;

#[handler]
pub async fn health_check(res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };

    res.render(Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "control_rooms": state.router.registry().len(),
        "version": env!("CARGO_PKG_VERSION"),
    })));
}
