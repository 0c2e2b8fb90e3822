use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use wagate::{DispatchReport, Gateway, GatewayError, SentMessage, parse_recipient_list};

/// Upper bound on a multipart upload request.
pub const MAX_UPLOAD_BYTES: usize = 64 << 20;

pub fn router(gateway: Arc<Gateway>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/qr", get(qr))
        .route("/send", post(send_text))
        .route("/send-bulk", post(send_text_bulk))
        .route("/status", get(status))
        .route("/check-user", post(check_user))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/devices", get(devices))
        .route("/presence", post(presence))
        .route("/logout", post(logout))
        .fallback(not_found)
        .layer(cors)
        .with_state(gateway)
}

// ---- errors ----

#[derive(Debug)]
pub enum ApiError {
    Gateway(GatewayError),
    BadRequest(String),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

pub fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::InvalidRecipient { .. } => StatusCode::BAD_REQUEST,
        GatewayError::UnauthenticatedSession(_) => StatusCode::UNAUTHORIZED,
        GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        GatewayError::PairingAbandoned(_) => StatusCode::REQUEST_TIMEOUT,
        GatewayError::QrRender(_) | GatewayError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Gateway(e) => (status_for(&e), e.code(), e.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
        };
        if status.is_server_error() {
            tracing::error!(%code, %message, "request failed");
        } else {
            tracing::debug!(%code, %message, "request rejected");
        }
        (status, Json(json!({ "message": message, "code": code }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---- request shapes ----

#[derive(Debug, Deserialize)]
pub struct SenderQuery {
    sender: Option<String>,
}

impl SenderQuery {
    fn sender(&self) -> ApiResult<&str> {
        match self.sender.as_deref().map(str::trim) {
            Some(sender) if !sender.is_empty() => Ok(sender),
            _ => Err(ApiError::BadRequest("sender should be filled".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendTextBody {
    recipient: String,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendBulkBody {
    recipients: Vec<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckUserBody {
    recipients: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FailureView {
    target: String,
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    sent: Vec<SentMessage>,
    failed: Vec<FailureView>,
}

impl From<DispatchReport> for UploadResponse {
    fn from(report: DispatchReport) -> Self {
        Self {
            sent: report.sent,
            failed: report
                .failed
                .into_iter()
                .map(|f| FailureView {
                    target: f.target,
                    code: f.error.code(),
                    message: f.error.to_string(),
                })
                .collect(),
        }
    }
}

// ---- handlers ----

async fn qr(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
) -> ApiResult<Response> {
    let png = gateway.start_or_resume_pairing(query.sender()?).await?;
    if png.is_empty() {
        return Ok(Json(json!({ "message": "you are already login" })).into_response());
    }
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn send_text(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
    Json(body): Json<SendTextBody>,
) -> ApiResult<Json<Value>> {
    let id = gateway
        .send_text(query.sender()?, &body.recipient, &body.message)
        .await?;
    Ok(Json(json!({ "message": "success", "id": id })))
}

async fn send_text_bulk(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
    Json(body): Json<SendBulkBody>,
) -> ApiResult<Json<Value>> {
    gateway
        .send_text_bulk(query.sender()?, body.recipients, body.message)
        .await?;
    Ok(Json(json!({ "message": "success" })))
}

async fn status(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
) -> ApiResult<Json<wagate::SessionStatus>> {
    Ok(Json(gateway.status(query.sender()?)?))
}

async fn check_user(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
    Json(body): Json<CheckUserBody>,
) -> ApiResult<Json<Vec<wagate::RecipientCheck>>> {
    let checks = gateway
        .check_recipients(query.sender()?, &body.recipients)
        .await?;
    Ok(Json(checks))
}

struct UploadedFile {
    name: Option<String>,
    data: Vec<u8>,
}

/// Multipart form: one or more `file` parts, a comma-separated `recipients`
/// field and an optional `caption`. Each file is dispatched on its own.
async fn upload(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let sender = query.sender()?.to_string();
    // Fail before reading the body when the session is not usable.
    gateway.registry().logged_in(&wagate::session_key(&sender))?;

    let mut files = Vec::new();
    let mut recipients = String::new();
    let mut caption = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?;
                files.push(UploadedFile {
                    name,
                    data: data.to_vec(),
                });
            }
            Some("recipients") => {
                recipients = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read recipients: {e}")))?;
            }
            Some("caption") => {
                caption = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read caption: {e}")))?;
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("no file uploaded".to_string()));
    }
    let recipients = parse_recipient_list(&recipients)?;

    let mut report = DispatchReport::default();
    for file in files {
        let part = gateway
            .send_media(&sender, recipients.clone(), file.data, file.name, &caption)
            .await?;
        report.extend(part);
    }
    Ok(Json(report.into()))
}

async fn devices(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Vec<wagate::DeviceInfo>>> {
    Ok(Json(gateway.list_devices().await?))
}

async fn presence(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
) -> ApiResult<Json<Value>> {
    gateway.send_presence(query.sender()?).await?;
    Ok(Json(json!({ "message": "success" })))
}

async fn logout(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<SenderQuery>,
) -> ApiResult<Json<Value>> {
    gateway.logout(query.sender()?).await?;
    Ok(Json(json!({ "message": "success logout" })))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Not Matching of Any Routes" })),
    )
}
