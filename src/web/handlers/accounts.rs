use chrono::Utc;
use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::db::AccountAuthorization;
use crate::web::{render_error, state_or_unavailable};

/// Body posted by the OAuth callback once an account grants access.
#[derive(Debug, Deserialize)]
pub struct AuthorizationRequest {
    pub internal_id: String,
    pub access_token: String,
}

impl AuthorizationRequest {
    fn into_authorization(self, handle: &str) -> Result<AccountAuthorization, &'static str> {
        if handle.trim().is_empty() {
            return Err("handle cannot be empty");
        }
        if self.internal_id.trim().is_empty() {
            return Err("internal_id cannot be empty");
        }
        if self.access_token.trim().is_empty() {
            return Err("access_token cannot be empty");
        }
        Ok(AccountAuthorization {
            handle: handle.to_string(),
            internal_id: self.internal_id,
            access_token: self.access_token,
            granted_at: Utc::now(),
        })
    }
}

fn database_error(res: &mut Response, err: impl std::fmt::Display) {
    error!("account store failed: {}", err);
    render_error(
        res,
        StatusCode::INTERNAL_SERVER_ERROR,
        "M_UNKNOWN",
        &format!("database error: {}", err),
    );
}

#[handler]
pub async fn get_account(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let handle = req.param::<String>("handle").unwrap_or_default();

    let auth = match state.accounts.get_authorization(&handle).await {
        Ok(Some(auth)) => auth,
        Ok(None) => {
            render_error(res, StatusCode::NOT_FOUND, "M_NOT_FOUND", "account not authorized");
            return;
        }
        Err(err) => return database_error(res, err),
    };

    match state.media.get_expiration_marker(&auth.internal_id).await {
        Ok(media_expires_at) => res.render(Json(json!({
            "authorization": auth,
            "media_expires_at": media_expires_at,
        }))),
        Err(err) => database_error(res, err),
    }
}

#[handler]
pub async fn put_account(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let handle = req.param::<String>("handle").unwrap_or_default();
    let request = match req.parse_json::<AuthorizationRequest>().await {
        Ok(request) => request,
        Err(err) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "M_BAD_JSON",
                &format!("invalid authorization: {}", err),
            );
            return;
        }
    };
    let auth = match request.into_authorization(&handle) {
        Ok(auth) => auth,
        Err(reason) => {
            render_error(res, StatusCode::BAD_REQUEST, "M_INVALID_PARAM", reason);
            return;
        }
    };

    match state.accounts.save_authorization(&auth).await {
        Ok(()) => {
            info!("stored authorization for {}", handle);
            res.render(Json(json!({})));
        }
        Err(err) => database_error(res, err),
    }
}

#[handler]
pub async fn delete_account(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let handle = req.param::<String>("handle").unwrap_or_default();

    match state.accounts.revoke_authorization(&handle).await {
        Ok(()) => {
            info!("revoked authorization for {}", handle);
            res.render(Json(json!({})));
        }
        Err(err) => database_error(res, err),
    }
}

#[handler]
pub async fn list_deliveries(req: &mut Request, res: &mut Response) {
    let Some(state) = state_or_unavailable(res) else {
        return;
    };
    let post_id = req.param::<String>("post_id").unwrap_or_default();

    match state.media.get_deliveries_for_post(&post_id).await {
        Ok(deliveries) => res.render(Json(json!({
            "post_id": post_id,
            "count": deliveries.len(),
            "deliveries": deliveries,
        }))),
        Err(err) => database_error(res, err),
    }
}
