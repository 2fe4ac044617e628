use crate::common::error::InvocationError;
use crate::common::response::{ApiResponse, ApiSuccess};
use crate::config::settings::Credentials;
use crate::infrastructure::media::{FfmpegExecutor, FfprobeAdapter};
use crate::infrastructure::storage::StorageService;
use crate::modules::transcode::events::TranscodeEvent;
use crate::modules::transcode::model::{InvocationOutcome, OutcomeKind};
use crate::state::AppState;
use crate::workers::transcoder::TranscodeWorker;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{error, info_span, Instrument};
use uuid::Uuid;

pub const ACCESS_KEY_HEADER: &str = "x-cff-access-key";
pub const SECRET_KEY_HEADER: &str = "x-cff-secret-key";
pub const SECURITY_TOKEN_HEADER: &str = "x-cff-security-token";
pub const REQUEST_ID_HEADER: &str = "x-cff-request-id";

#[utoipa::path(
    post,
    path = "/invoke",
    request_body = TranscodeEvent,
    responses(
        (status = 200, description = "Transcoded or skipped", body = ApiResponse<InvocationOutcome>),
        (status = 400, description = "Body is not an event or has no usable record"),
        (status = 401, description = "Access key or secret key missing"),
        (status = 500, description = "Storage, probe, transcode or filesystem failure")
    ),
    tag = "Transcode"
)]
pub async fn invoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TranscodeEvent>, JsonRejection>,
) -> Result<ApiSuccess<InvocationOutcome>, InvocationError> {
    let request_id = header_value(&headers, REQUEST_ID_HEADER)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = info_span!("invocation", request_id = %request_id);

    async move {
        let credentials = resolve_credentials(&headers, &state.fallback_credentials);
        if !credentials.is_complete() {
            error!("ak or sk is empty. Please set an agency.");
            return Err(InvocationError::Config(
                "ak or sk is empty. Please set an agency.".to_string(),
            ));
        }

        let Json(event) = payload.map_err(|rejection| {
            error!("rejected invocation body: {}", rejection.body_text());
            InvocationError::InvalidEvent(rejection.body_text())
        })?;
        let record = event.first_record()?;

        let config = &state.config;
        let worker = TranscodeWorker::new(
            StorageService::new(&config.obs, &credentials, config.transfer.clone()),
            FfprobeAdapter::new(&config.tools.ffprobe),
            FfmpegExecutor::new(&config.tools.ffmpeg),
            config.invocation.clone(),
            config.mount_root.clone(),
        );

        let outcome = worker.run(&record).await?;
        let message = match outcome.outcome {
            OutcomeKind::Skipped => "File already matches the destination format",
            OutcomeKind::Transcoded => "File transcoded successfully",
        };
        Ok(ApiSuccess(ApiResponse::success(outcome, message), StatusCode::OK))
    }
    .instrument(span)
    .await
}

/// Platform-injected headers take precedence over the process environment.
fn resolve_credentials(headers: &HeaderMap, fallback: &Credentials) -> Credentials {
    match (
        header_value(headers, ACCESS_KEY_HEADER),
        header_value(headers, SECRET_KEY_HEADER),
    ) {
        (Some(access_key), Some(secret_key)) => Credentials {
            access_key,
            secret_key,
            security_token: header_value(headers, SECURITY_TOKEN_HEADER),
        },
        _ => fallback.clone(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{AppConfig, InvocationConfig, ObsConfig, ToolPaths, TransferConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(mount: &std::path::Path, fallback: Credentials) -> AppState {
        let config = AppConfig {
            server_port: 0,
            mount_root: mount.to_path_buf(),
            tools: ToolPaths {
                ffmpeg: "/bin/false".into(),
                ffprobe: "/bin/false".into(),
            },
            obs: ObsConfig {
                endpoint: "http://127.0.0.1:1".into(),
                region: "us-east-1".into(),
                path_style: true,
            },
            invocation: InvocationConfig {
                transcode_bucket: "dst".into(),
                dst_format: "mp4".into(),
                dst_height: "360".into(),
                dst_width: "640".into(),
            },
            transfer: TransferConfig::default(),
        };
        AppState::new(config, fallback)
    }

    fn no_credentials() -> Credentials {
        Credentials {
            access_key: String::new(),
            secret_key: String::new(),
            security_token: None,
        }
    }

    fn invoke_request(body: &str, with_keys: bool) -> Request<Body> {
        let mut builder = Request::post("/invoke").header("content-type", "application/json");
        if with_keys {
            builder = builder
                .header("X-CFF-Access-Key", "ak")
                .header("X-CFF-Secret-Key", "sk");
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    const EVENT: &str = r#"{"Records":[{"s3":{"bucket":{"name":"src"},"object":{"key":"clip.mp4"}}}]}"#;

    #[tokio::test]
    async fn missing_credentials_fail_before_any_work() {
        let mount = tempfile::tempdir().unwrap();
        let app = crate::app::create_app(state(mount.path(), no_credentials()));

        let response = app.oneshot(invoke_request(EVENT, false)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(std::fs::read_dir(mount.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn event_without_records_is_bad_request() {
        let mount = tempfile::tempdir().unwrap();
        let app = crate::app::create_app(state(mount.path(), no_credentials()));

        let response = app.oneshot(invoke_request(r#"{"Records":[]}"#, true)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_gets_error_envelope() {
        let mount = tempfile::tempdir().unwrap();
        let app = crate::app::create_app(state(mount.path(), no_credentials()));

        let response = app
            .oneshot(invoke_request(r#"{"Records": [ not json"#, true))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["message"].as_str().unwrap().starts_with("invalid event"));
        assert_eq!(std::fs::read_dir(mount.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn wrongly_typed_records_get_error_envelope() {
        let mount = tempfile::tempdir().unwrap();
        let app = crate::app::create_app(state(mount.path(), no_credentials()));

        let response = app
            .oneshot(invoke_request(r#"{"Records": "clip.mp4"}"#, true))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn storage_failure_is_reported_and_workspace_removed() {
        let mount = tempfile::tempdir().unwrap();
        let app = crate::app::create_app(state(mount.path(), no_credentials()));

        let response = app.oneshot(invoke_request(EVENT, true)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["message"].as_str().unwrap().starts_with("storage error"));
        assert_eq!(std::fs::read_dir(mount.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let mount = tempfile::tempdir().unwrap();
        let app = crate::app::create_app(state(mount.path(), no_credentials()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn header_credentials_override_environment() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_KEY_HEADER, "header-ak".parse().unwrap());
        headers.insert(SECRET_KEY_HEADER, "header-sk".parse().unwrap());
        headers.insert(SECURITY_TOKEN_HEADER, "token".parse().unwrap());
        let fallback = Credentials {
            access_key: "env-ak".into(),
            secret_key: "env-sk".into(),
            security_token: None,
        };

        let creds = resolve_credentials(&headers, &fallback);
        assert_eq!(creds.access_key, "header-ak");
        assert_eq!(creds.security_token.as_deref(), Some("token"));

        let creds = resolve_credentials(&HeaderMap::new(), &fallback);
        assert_eq!(creds.access_key, "env-ak");
    }
}
