use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::pipeline::{Pipeline, PostRequest};

/// Message returned to callers for any request that could not be completed.
/// Upstream details stay in the server logs.
pub const GENERIC_FAILURE: &str = "Failed to generate post";

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            started_at: Utc::now(),
            pipeline,
        }
    }
}

/// Request body for `POST /api/v1/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub topic: String,
    pub platform: String,
    #[serde(default)]
    pub options: GenerateOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    #[serde(default)]
    pub image: bool,
    pub article_count: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub text_post: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (Status, Json<ErrorBody>);

fn api_error(status: Status, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    default_article_count: usize,
    max_article_count: usize,
    image_generation: bool,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning simple JSON with uptime and pipeline settings.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let settings = state.pipeline.settings();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        default_article_count: settings.article_count,
        max_article_count: settings.max_article_count,
        image_generation: state.pipeline.image_generation_enabled(),
    })
}

impl GenerateRequest {
    /// Check the body and turn it into a pipeline request.
    fn validate(self, max_article_count: usize) -> Result<PostRequest, String> {
        PostRequest::validated(
            &self.topic,
            &self.platform,
            self.options.image,
            self.options.article_count,
            max_article_count,
        )
    }
}

/// Generate a social post for a topic and platform.
#[post("/api/v1/generate", data = "<body>")]
async fn generate(state: &State<AppState>, body: Json<GenerateRequest>) -> Result<Json<GenerateResponse>, ApiError> {
    let request = body
        .into_inner()
        .validate(state.pipeline.settings().max_article_count)
        .map_err(|msg| api_error(Status::BadRequest, msg))?;

    let span = tracing::info_span!(
        "generate",
        request_id = %Uuid::new_v4(),
        platform = %request.platform,
        image = request.include_image
    );

    async move {
        info!(topic = %request.topic, "generation requested");
        match state.pipeline.generate(&request).await {
            Ok(post) => {
                info!(chars = post.text.len(), image = post.image_data_uri.is_some(), "generation completed");
                Ok(Json(GenerateResponse {
                    text_post: post.text,
                    image_url: post.image_data_uri,
                }))
            }
            // Already logged with full detail by the pipeline
            Err(_) => Err(api_error(Status::InternalServerError, GENERIC_FAILURE)),
        }
    }
    .instrument(span)
    .await
}

#[catch(400)]
fn bad_request() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "malformed request body".to_string(),
    })
}

#[catch(422)]
fn unprocessable() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "request body must be {topic, platform, options}".to_string(),
    })
}

#[catch(404)]
fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "not found".to_string(),
    })
}

#[catch(500)]
fn internal_error() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: GENERIC_FAILURE.to_string(),
    })
}

/// Rocket figment with `[server] bind/port` merged over Rocket's own sources.
pub fn figment(server: &common::ServerConfig) -> Figment {
    rocket::Config::figment()
        .merge(("address", server.bind.clone()))
        .merge(("port", server.port))
}

/// Build the Rocket instance with managed state, routes and JSON catchers.
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .mount("/", routes![health, status, generate])
        .register("/", catchers![bad_request, unprocessable, not_found, internal_error])
}

/// Build and launch a Rocket server.
///
/// This function blocks until the Rocket server shuts down (it awaits `rocket.launch().await`).
pub async fn launch_rocket(state: AppState, server: &common::ServerConfig) -> Result<()> {
    tracing::info!("Starting Rocket HTTP server on {}:{}", server.bind, server.port);
    build_rocket(state, figment(server))
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(topic: &str, platform: &str, count: Option<usize>) -> GenerateRequest {
        GenerateRequest {
            topic: topic.to_string(),
            platform: platform.to_string(),
            options: GenerateOptions {
                image: true,
                article_count: count,
            },
        }
    }

    #[test]
    fn validate_trims_and_maps_fields() {
        let req = body("  electric vehicles ", " LinkedIn", Some(4)).validate(10).expect("valid");
        assert_eq!(req.topic, "electric vehicles");
        assert_eq!(req.platform, "LinkedIn");
        assert!(req.include_image);
        assert_eq!(req.article_count, Some(4));
    }

    #[test]
    fn validate_rejects_blank_fields_and_bad_counts() {
        assert!(body("   ", "X", None).validate(10).is_err());
        assert!(body("topic", "", None).validate(10).is_err());
        assert!(body("topic", "X", Some(0)).validate(10).is_err());
        assert!(body("topic", "X", Some(11)).validate(10).is_err());
    }

    #[test]
    fn request_body_defaults_options() {
        let req: GenerateRequest =
            serde_json::from_str(r#"{"topic": "ai", "platform": "X"}"#).expect("parse body");
        assert!(!req.options.image);
        assert!(req.options.article_count.is_none());

        let req: GenerateRequest =
            serde_json::from_str(r#"{"topic": "ai", "platform": "X", "options": {"image": true, "articleCount": 2}}"#)
                .expect("parse body");
        assert!(req.options.image);
        assert_eq!(req.options.article_count, Some(2));
    }

    #[test]
    fn response_uses_camel_case() {
        let json = serde_json::to_value(GenerateResponse {
            text_post: "hello".to_string(),
            image_url: None,
        })
        .expect("serialize");
        assert_eq!(json, serde_json::json!({"textPost": "hello", "imageUrl": null}));
    }
}
