//! Handler-level API tests over an in-memory repository and a stub
//! renderer, so no TeX toolchain or database is needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use grafite::application::images::{ImageRenderer, ImageService};
use grafite::application::render::{RenderError, RenderedImage};
use grafite::application::repos::{ImagesRepo, RepoError};
use grafite::cache::{CacheConfig, build_field_cache};
use grafite::domain::entities::LatexImageRecord;
use grafite::domain::keys::build_key;
use grafite::domain::types::{ImageFormat, TexCompiler};
use grafite::infra::http::api::handlers;
use grafite::infra::http::api::models::{CreateImageBody, FieldsQuery};
use grafite::infra::http::api::state::ApiState;
use grafite::infra::storage::ImageStorage;

#[derive(Default)]
struct MemoryImagesRepo {
    records: Mutex<HashMap<String, LatexImageRecord>>,
    find_calls: AtomicUsize,
}

impl MemoryImagesRepo {
    fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImagesRepo for MemoryImagesRepo {
    async fn insert(&self, record: &LatexImageRecord) -> Result<(), RepoError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.tex_key) {
            return Err(RepoError::Duplicate {
                constraint: "latex_images_tex_key_unique".to_string(),
            });
        }
        records.insert(record.tex_key.clone(), record.clone());
        Ok(())
    }

    async fn find_by_key(&self, tex_key: &str) -> Result<Option<LatexImageRecord>, RepoError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.lock().unwrap().get(tex_key).cloned())
    }

    async fn delete_by_key(&self, tex_key: &str) -> Result<LatexImageRecord, RepoError> {
        self.records
            .lock()
            .unwrap()
            .remove(tex_key)
            .ok_or(RepoError::NotFound)
    }
}

enum StubOutcome {
    Image,
    CompileError(&'static str),
    ConvertError,
}

struct StubRenderer {
    outcome: StubOutcome,
    calls: AtomicUsize,
}

impl StubRenderer {
    fn new(outcome: StubOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageRenderer for StubRenderer {
    fn render(
        &self,
        tex_key: &str,
        _tex_source: &str,
        _compiler: TexCompiler,
        format: ImageFormat,
    ) -> Result<RenderedImage, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            StubOutcome::Image => Ok(RenderedImage {
                file_name: format!("{tex_key}.{}", format.extension()),
                bytes: b"fake image bytes".to_vec(),
                data_url: format!("data:image/{format};base64,ZmFrZQ=="),
            }),
            StubOutcome::CompileError(log) => Err(RenderError::LatexCompile {
                log: (*log).to_string(),
            }),
            StubOutcome::ConvertError => Err(RenderError::ImageConvert {
                detail: "no image was generated".to_string(),
            }),
        }
    }
}

fn build_state(
    renderer: Arc<StubRenderer>,
) -> (ApiState, Arc<MemoryImagesRepo>, tempfile::TempDir) {
    let media = tempfile::tempdir().expect("media dir");
    let storage = Arc::new(ImageStorage::new(media.path().to_path_buf()).expect("storage"));
    let repo = Arc::new(MemoryImagesRepo::default());
    let cache_config = CacheConfig::default();
    let images = ImageService::new(
        Arc::clone(&repo) as Arc<dyn ImagesRepo>,
        build_field_cache(&cache_config),
        cache_config,
        Arc::clone(&storage),
        renderer,
        None,
    );
    (
        ApiState {
            images: Arc::new(images),
            storage,
        },
        repo,
        media,
    )
}

fn create_body(value: Value) -> CreateImageBody {
    serde_json::from_value(value).expect("valid create body")
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn fields_query(fields: &str) -> Query<FieldsQuery> {
    Query(FieldsQuery {
        fields: Some(fields.to_string()),
    })
}

const SOURCE: &str = "\\documentclass{standalone}\\begin{document}$x^2$\\end{document}";

// ============ Create ============

#[tokio::test]
async fn create_renders_persists_and_serves_media() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(Arc::clone(&renderer));
    let expected_key = build_key(SOURCE, TexCompiler::Latex, ImageFormat::Png);

    let response = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": SOURCE,
            "image_format": "png",
        }))),
    )
    .await
    .expect("create image");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["tex_key"], json!(expected_key));
    assert_eq!(body["image"], json!(format!("{expected_key}.png")));
    assert_eq!(body["creator"], json!("anonymous"));
    assert!(body["data_url"].as_str().unwrap().starts_with("data:image/"));
    assert!(body.get("compile_error").is_none());
    assert_eq!(renderer.calls(), 1);

    let media = handlers::serve_media(
        State(state.clone()),
        Path(format!("{expected_key}.png")),
    )
    .await
    .expect("serve media");
    assert_eq!(media.status(), StatusCode::OK);
    assert_eq!(
        media.headers().get("content-type").unwrap(),
        "image/png"
    );
}

#[tokio::test]
async fn repeated_create_returns_existing_without_rendering() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(Arc::clone(&renderer));
    let body = json!({
        "compiler": "pdflatex",
        "tex_source": SOURCE,
        "image_format": "svg",
    });

    let first = handlers::create_image(State(state.clone()), Json(create_body(body.clone())))
        .await
        .expect("first create");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = handlers::create_image(State(state.clone()), Json(create_body(body)))
        .await
        .expect("second create");
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn concurrent_creates_collapse_to_one_render() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(Arc::clone(&renderer));
    let body = json!({
        "compiler": "xelatex",
        "tex_source": SOURCE,
        "image_format": "png",
    });

    let (a, b) = tokio::join!(
        handlers::create_image(State(state.clone()), Json(create_body(body.clone()))),
        handlers::create_image(State(state.clone()), Json(create_body(body))),
    );
    let statuses = [a.unwrap().status(), b.unwrap().status()];
    assert!(statuses.contains(&StatusCode::CREATED));
    assert!(statuses.contains(&StatusCode::OK));
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn compile_error_is_persisted_and_reported() {
    let renderer = StubRenderer::new(StubOutcome::CompileError("! Undefined control sequence."));
    let (state, _repo, _media) = build_state(Arc::clone(&renderer));

    let response = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": "\\badmacro",
            "image_format": "png",
        }))),
    )
    .await
    .expect("create returns the error record");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["compile_error"], json!("! Undefined control sequence."));
    assert_eq!(body["image"], Value::Null);
    assert_eq!(body["data_url"], Value::Null);

    // The error record is durable; re-creating does not compile again.
    let retry = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": "\\badmacro",
            "image_format": "png",
        }))),
    )
    .await
    .expect("retry serves the stored record");
    assert_eq!(retry.status(), StatusCode::BAD_REQUEST);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn transient_render_failure_is_not_persisted() {
    let renderer = StubRenderer::new(StubOutcome::ConvertError);
    let (state, _repo, _media) = build_state(Arc::clone(&renderer));
    let body = json!({
        "compiler": "latex",
        "tex_source": SOURCE,
        "image_format": "png",
    });

    let error = handlers::create_image(State(state.clone()), Json(create_body(body.clone())))
        .await
        .expect_err("conversion failure is an error");
    assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);

    // Nothing durable was written, so a retry renders again.
    let _ = handlers::create_image(State(state.clone()), Json(create_body(body)))
        .await
        .expect_err("still failing");
    assert_eq!(renderer.calls(), 2);
}

#[tokio::test]
async fn missing_compile_inputs_are_rejected() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let error = handlers::create_image(
        State(state),
        Json(create_body(json!({ "compiler": "latex" }))),
    )
    .await
    .expect_err("incomplete request");

    let response = error.into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let hint = body["error"]["hint"].as_str().unwrap();
    assert!(hint.contains("tex_source"));
    assert!(hint.contains("image_format"));
}

#[tokio::test]
async fn tikz_latex_png_upgrades_to_svg() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);
    let source = "\\begin{tikzpicture}\\draw (0,0) -- (1,1);\\end{tikzpicture}";

    let response = handlers::create_image(
        State(state),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": source,
            "image_format": "png",
        }))),
    )
    .await
    .expect("create image");

    let body = body_json(response).await;
    let tex_key = body["tex_key"].as_str().unwrap();
    assert!(tex_key.ends_with("_latex_svg_v1"), "unexpected key: {tex_key}");
    assert!(body["image"].as_str().unwrap().ends_with(".svg"));
}

#[tokio::test]
async fn create_adopts_existing_storage_file() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(Arc::clone(&renderer));
    let tex_key = build_key(SOURCE, TexCompiler::Latex, ImageFormat::Png);
    state
        .storage
        .store(
            &format!("{tex_key}.png"),
            bytes::Bytes::from_static(b"pre-existing"),
        )
        .await
        .expect("seed storage");

    let response = handlers::create_image(
        State(state),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": SOURCE,
            "image_format": "png",
            "use_storage_file_if_exists": true,
        }))),
    )
    .await
    .expect("create image");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["image"], json!(format!("{tex_key}.png")));
    // Adopted files are never re-rendered, so no data URL exists.
    assert_eq!(body["data_url"], Value::Null);
    assert_eq!(renderer.calls(), 0);
}

// ============ Field cache paths ============

#[tokio::test]
async fn create_single_field_fast_path_serves_from_cache() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(Arc::clone(&renderer));

    let created = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": SOURCE,
            "image_format": "png",
        }))),
    )
    .await
    .expect("create image");
    let tex_key = body_json(created).await["tex_key"]
        .as_str()
        .unwrap()
        .to_string();

    let response = handlers::create_image(
        State(state),
        Json(create_body(json!({
            "tex_key": tex_key,
            "fields": ["image"],
        }))),
    )
    .await
    .expect("fast path lookup");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["image"], json!(format!("{tex_key}.png")));
    assert_eq!(body.as_object().unwrap().len(), 1);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn fast_path_miss_asks_for_compile_inputs() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let error = handlers::create_image(
        State(state),
        Json(create_body(json!({
            "tex_key": "unknown-key",
            "fields": ["data_url"],
        }))),
    )
    .await
    .expect_err("nothing cached for the key");

    let response = error.into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let hint = body["error"]["hint"].as_str().unwrap();
    assert!(hint.starts_with("No cache found"), "unexpected hint: {hint}");
}

#[tokio::test]
async fn single_field_read_surfaces_cached_compile_error() {
    let renderer = StubRenderer::new(StubOutcome::CompileError("! Missing $ inserted."));
    let (state, _repo, _media) = build_state(renderer);

    let created = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "pdflatex",
            "tex_source": "x^2$",
            "image_format": "png",
        }))),
    )
    .await
    .expect("create error record");
    let tex_key = body_json(created).await["tex_key"]
        .as_str()
        .unwrap()
        .to_string();

    let response = handlers::get_image(
        State(state),
        Path(tex_key),
        fields_query("data_url"),
    )
    .await
    .expect("field lookup");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["compile_error"], json!("! Missing $ inserted."));
}

#[tokio::test]
async fn compile_error_field_status_does_not_depend_on_cache_state() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, repo, _media) = build_state(renderer);
    repo.insert(&LatexImageRecord::failed(
        "err_latex_png_v1",
        "! Missing $ inserted.",
        "tests",
    ))
    .await
    .expect("seed error record");

    // Cold read comes from the durable store and warms the error slot.
    let cold = handlers::get_image(
        State(state.clone()),
        Path("err_latex_png_v1".to_string()),
        fields_query("compile_error"),
    )
    .await
    .expect("cold read");
    assert_eq!(cold.status(), StatusCode::BAD_REQUEST);

    // Warm read is served from the cache slot with the same status.
    let warm = handlers::get_image(
        State(state),
        Path("err_latex_png_v1".to_string()),
        fields_query("compile_error"),
    )
    .await
    .expect("warm read");
    assert_eq!(warm.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(warm).await,
        json!({ "compile_error": "! Missing $ inserted." })
    );
}

#[tokio::test]
async fn second_single_field_read_skips_the_store() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, repo, _media) = build_state(renderer);

    let created = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": SOURCE,
            "image_format": "png",
        }))),
    )
    .await
    .expect("create image");
    let tex_key = body_json(created).await["tex_key"]
        .as_str()
        .unwrap()
        .to_string();

    // data_url is not cached on save by default, so the first read pays
    // one store lookup and populates the slot.
    let baseline = repo.find_calls();
    let first = handlers::get_image(
        State(state.clone()),
        Path(tex_key.clone()),
        fields_query("data_url"),
    )
    .await
    .expect("first read");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(repo.find_calls(), baseline + 1);

    let second = handlers::get_image(State(state), Path(tex_key), fields_query("data_url"))
        .await
        .expect("second read");
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(repo.find_calls(), baseline + 1);
}

#[tokio::test]
async fn get_single_field_missing_returns_empty_object() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let response = handlers::get_image(
        State(state),
        Path("no-such-key".to_string()),
        fields_query("data_url"),
    )
    .await
    .expect("lookup succeeds");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({}));
}

// ============ Get ============

#[tokio::test]
async fn get_projects_requested_fields() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let created = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": SOURCE,
            "image_format": "svg",
            "creator": "tests",
        }))),
    )
    .await
    .expect("create image");
    let tex_key = body_json(created).await["tex_key"]
        .as_str()
        .unwrap()
        .to_string();

    let response = handlers::get_image(
        State(state),
        Path(tex_key.clone()),
        fields_query("tex_key,creator"),
    )
    .await
    .expect("projected lookup");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "tex_key": tex_key, "creator": "tests" }));
}

#[tokio::test]
async fn get_unknown_record_returns_404() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let error = handlers::get_image(
        State(state),
        Path("no-such-key".to_string()),
        Query(FieldsQuery::default()),
    )
    .await
    .expect_err("no record");
    assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_rejects_unknown_field_names() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let error = handlers::get_image(
        State(state),
        Path("any".to_string()),
        fields_query("tex_key,bogus"),
    )
    .await
    .expect_err("bad projection");

    let response = error.into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(
        body["error"]["hint"].as_str().unwrap().contains("bogus"),
        "hint names the field"
    );
}

// ============ Delete ============

#[tokio::test]
async fn delete_removes_record_file_and_cache_slots() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let created = handlers::create_image(
        State(state.clone()),
        Json(create_body(json!({
            "compiler": "latex",
            "tex_source": SOURCE,
            "image_format": "png",
        }))),
    )
    .await
    .expect("create image");
    let body = body_json(created).await;
    let tex_key = body["tex_key"].as_str().unwrap().to_string();
    let image_path = body["image"].as_str().unwrap().to_string();

    // Warm the field cache before deleting.
    let warmed = handlers::get_image(
        State(state.clone()),
        Path(tex_key.clone()),
        fields_query("image"),
    )
    .await
    .expect("warm cache");
    assert_eq!(warmed.status(), StatusCode::OK);

    let status = handlers::delete_image(State(state.clone()), Path(tex_key.clone()))
        .await
        .expect("delete image");
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(state.storage.size(&image_path).await.unwrap(), None);

    let cached = handlers::get_image(
        State(state.clone()),
        Path(tex_key.clone()),
        fields_query("image"),
    )
    .await
    .expect("post-delete lookup");
    assert_eq!(body_json(cached).await, json!({}));

    let gone = handlers::get_image(
        State(state),
        Path(tex_key),
        Query(FieldsQuery::default()),
    )
    .await
    .expect_err("record gone");
    assert_eq!(gone.into_response().status(), StatusCode::NOT_FOUND);
}

// ============ Router ============

#[tokio::test]
async fn router_wires_all_routes() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);
    let router = grafite::infra::http::build_router(state);

    let health = router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::NO_CONTENT);

    let created = router
        .clone()
        .oneshot(
            Request::post("/api/v1/images")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "compiler": "latex",
                        "tex_source": SOURCE,
                        "image_format": "png",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await;
    let tex_key = body["tex_key"].as_str().unwrap();
    let image = body["image"].as_str().unwrap();

    let media = router
        .clone()
        .oneshot(
            Request::get(format!("/media/{image}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(media.status(), StatusCode::OK);

    let fetched = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/images/{tex_key}?fields=tex_key"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(body_json(fetched).await, json!({ "tex_key": tex_key }));

    let deleted = router
        .clone()
        .oneshot(
            Request::delete(format!("/api/v1/images/{tex_key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn router_rejects_unknown_body_keys() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);
    let router = grafite::infra::http::build_router(state);

    let response = router
        .oneshot(
            Request::post("/api/v1/images")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "compiler": "latex", "texsource": "$x$" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn delete_unknown_record_returns_404() {
    let renderer = StubRenderer::new(StubOutcome::Image);
    let (state, _repo, _media) = build_state(renderer);

    let error = handlers::delete_image(State(state), Path("no-such-key".to_string()))
        .await
        .expect_err("nothing to delete");
    assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
}
