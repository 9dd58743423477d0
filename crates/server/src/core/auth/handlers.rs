//! Auth handlers

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::middleware::extract_token;
use super::Registration;
use crate::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use crate::core::json::ValidJson;
use crate::core::models::User;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub name: String,
    pub uname: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OtpVerifyRequest {
    pub email: String,
    pub otp: String,
}

pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidJson(req): ValidJson<CreateUserRequest>,
) -> Result<Json<Value>> {
    info!("POST /api/auth/createuser - {}", req.email);

    let registration = Registration {
        name: req.name,
        uname: req.uname,
        email: req.email,
        password: req.password,
    };

    if state.auth.issues_tokens() {
        let (_, token) = state.auth.register(registration).await?;
        return Ok(Json(json!({ "success": true, "token": token })));
    }

    // Provider mode: the caller already holds a token, the body carries the profile.
    let token = extract_token(&headers).ok_or(Error::Unauthorized("No token provided"))?;
    let subject = state.tokens.verify(token).await?;
    state.auth.provision(&subject, registration).await?;

    Ok(Json(json!({ "success": true, "token": token })))
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<Json<Value>> {
    info!("POST /api/auth/login - {}", req.email);

    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(Error::validation("Email and password are required"));
    }

    let (user, token) = state.auth.login(req.email.trim(), &req.password).await?;

    Ok(Json(json!({
        "success": true,
        "token": token,
        "uname": user.uname,
        "id": user.id,
    })))
}

pub async fn get_user(State(state): State<AppState>, ctx: Ctx) -> Result<Json<User>> {
    info!("POST /api/auth/getuser - {}", ctx.user_id());
    Ok(Json(state.auth.get_user(ctx.user_id()).await?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    info!("DELETE /api/auth/deleteuser/{}", id);

    let user = state.auth.delete_user(ctx.user_id(), &id).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

pub async fn list_users(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Value>> {
    info!("GET /api/auth/getallusers - {}", ctx.user_id());

    let users = state.auth.list_users().await?;
    Ok(Json(json!({ "users": users })))
}

pub async fn send_email_otp(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<OtpRequest>,
) -> Result<Json<Value>> {
    info!("POST /api/auth/send-email-otp - {}", req.email);

    state.auth.send_otp(req.email.trim()).await?;
    Ok(Json(json!({ "success": true, "message": "OTP sent" })))
}

pub async fn verify_email_otp(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<OtpVerifyRequest>,
) -> Result<Json<Value>> {
    info!("POST /api/auth/verify-email-otp - {}", req.email);

    state.auth.verify_otp(req.email.trim(), &req.otp).await?;
    Ok(Json(json!({ "success": true, "message": "Email verified" })))
}
