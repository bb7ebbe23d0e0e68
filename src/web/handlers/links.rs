use salvo::prelude::*;
use serde_json::json;

use crate::web::{render_error, state_or_unavailable};

#[handler]
pub async fn list_links(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let limit = req.query::<i64>("limit").unwrap_or(100).clamp(1, 1000);
    let offset = req.query::<i64>("offset").unwrap_or(0).max(0);

    match state.links.list_room_links(limit, offset).await {
        Ok(links) => {
            res.render(Json(json!({
                "links": links,
                "count": links.len(),
                "limit": limit,
                "offset": offset,
            })));
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "M_UNKNOWN",
                &format!("database error: {}", err),
            );
        }
    }
}
