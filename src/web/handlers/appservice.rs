use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::web::{render_error, state_or_unavailable};

/// `#localpart:server` to `localpart`.
fn alias_localpart(alias: &str) -> Option<&str> {
    let (localpart, server) = alias.strip_prefix('#')?.split_once(':')?;
    if localpart.is_empty() || server.is_empty() {
        return None;
    }
    Some(localpart)
}

#[handler]
pub async fn put_transaction(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let txn_id = req.param::<String>("txn_id").unwrap_or_default();
    let body = match req.parse_json::<Value>().await {
        Ok(body) => body,
        Err(err) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "M_NOT_JSON",
                &format!("invalid transaction body: {}", err),
            );
            return;
        }
    };

    let handled = state.processor.process_transaction(&txn_id, &body).await;
    debug!("transaction {} handled {} event(s)", txn_id, handled);
    res.render(Json(json!({})));
}

#[handler]
pub async fn query_user(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let user_id = req.param::<String>("user_id").unwrap_or_default();

    match state.router.on_identity_query(&user_id).await {
        Ok(Some(descriptor)) => {
            debug!("user query answered for {:?}", descriptor);
            res.render(Json(json!({})));
        }
        Ok(None) => render_error(res, StatusCode::NOT_FOUND, "M_NOT_FOUND", "user not managed"),
        Err(err) => {
            error!("user query for {} failed: {:#}", user_id, err);
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "M_UNKNOWN",
                "failed to create user",
            );
        }
    }
}

#[handler]
pub async fn query_room_alias(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let alias = req.param::<String>("alias").unwrap_or_default();
    let Some(localpart) = alias_localpart(&alias) else {
        render_error(res, StatusCode::NOT_FOUND, "M_NOT_FOUND", "malformed alias");
        return;
    };

    let params = match state.router.on_alias_query(localpart).await {
        Ok(params) => params,
        Err(err) => {
            render_error(res, StatusCode::NOT_FOUND, "M_NOT_FOUND", &err.to_string());
            return;
        }
    };

    let room_id = match state.transport.create_room(&params).await {
        Ok(room_id) => room_id,
        Err(err) => {
            error!("failed to create room for {}: {:#}", alias, err);
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "M_UNKNOWN",
                "room creation failed",
            );
            return;
        }
    };

    if let Err(err) = state.router.on_alias_created(&params, &room_id).await {
        error!("failed to record room {} for {}: {:#}", room_id, alias, err);
        render_error(
            res,
            StatusCode::INTERNAL_SERVER_ERROR,
            "M_UNKNOWN",
            "room created but could not be linked",
        );
        return;
    }
    info!("alias {} now points at {}", alias, room_id);
    res.render(Json(json!({})));
}
