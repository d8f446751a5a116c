//! # Pipeline Orchestration Tests
//!
//! Drives the double and triple workflows end to end against mock
//! OpenRouter and Ollama servers, covering mode selection, the caption
//! override, configuration precedence, context routing, and step-failure
//! abort semantics.

mod common;

use common::{fixture_image, setup_tracing};
use imagemeta::providers::vision::local::{VlmEngine, VlmLoader};
use imagemeta::{
    Backend, ImageReference, MetadataPipeline, MetadataPipelineBuilder, PipelineConfig,
    PipelineError, PipelineMode, PipelineOptions, ProviderError,
};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Prompt fragments that uniquely identify each call kind.
const AC_MARKER: &str = "exactly two fields";
const TEXT_META_MARKER: &str = "From the caption,";
const VISION_META_MARKER: &str = "From this image and caption";
const ALT_MARKER: &str = "Return one sentence only";

fn test_config() -> PipelineConfig {
    PipelineConfig {
        caption_model: "cap-model".to_string(),
        metadata_text_model: "text-model".to_string(),
        metadata_vision_model: "vision-model".to_string(),
        caption_backend: Backend::OpenRouter,
        metadata_vision_backend: Backend::OpenRouter,
        local_vlm_id: "mock-vlm".to_string(),
        ollama_host: "http://localhost:11434".to_string(),
    }
}

fn pipeline_for(server: &MockServer, config: PipelineConfig) -> MetadataPipeline {
    MetadataPipelineBuilder::new()
        .config(config)
        .api_key("test-key")
        .openrouter_url(format!("{}/chat/completions", server.uri()))
        .retry_policy(3, Duration::from_millis(5))
        .build()
        .expect("pipeline build")
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

async fn mount_ac_reply(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(AC_MARKER))
        .respond_with(chat_reply(
            "```json\n{\"alt_text\": \"A cat on a sofa.\", \"caption\": \"A tabby cat sits on a grey sofa near a window.\"}\n```",
        ))
        .mount(server)
        .await;
}

async fn mount_alt_reply(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(ALT_MARKER))
        .respond_with(chat_reply("A cat on a sofa."))
        .mount(server)
        .await;
}

const METADATA_JSON: &str = r#"{"media_type": "photo", "objects": ["cat", "sofa"], "scene": ["indoor"], "place": null, "people": {"count": 0}}"#;

#[tokio::test]
async fn double_mode_extracts_metadata_from_caption_text() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    mount_ac_reply(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(TEXT_META_MARKER))
        .respond_with(chat_reply(&format!("Here you go: {METADATA_JSON}")))
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    let output = pipeline
        .run(&image, &PipelineOptions::default())
        .await
        .unwrap();

    // --- 3. Assert ---
    assert_eq!(output.alt_text, "A cat on a sofa.");
    assert_eq!(
        output.caption,
        "A tabby cat sits on a grey sofa near a window."
    );
    assert_eq!(output.metadata["media_type"], json!("photo"));
    assert_eq!(
        output.metadata["people"],
        json!({"count": 0, "faces_visible": false})
    );
    assert_eq!(
        output.metadata["tags"],
        json!(["photo", "indoor", "cat", "sofa"])
    );
    assert!(!output.metadata.contains_key("place"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let metadata_body = String::from_utf8_lossy(&requests[1].body).to_string();
    // Step 2 consumed the caption produced by step 1, text-only.
    assert!(metadata_body.contains("A tabby cat sits on a grey sofa near a window."));
    assert!(!metadata_body.contains("image_url"));
    assert!(metadata_body.contains("\"model\":\"text-model\""));
}

#[tokio::test]
async fn triple_mode_represents_the_image_for_metadata() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    mount_ac_reply(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(VISION_META_MARKER))
        .respond_with(chat_reply(METADATA_JSON))
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    let output = pipeline
        .run(
            &image,
            &PipelineOptions {
                mode: PipelineMode::Triple,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // --- 3. Assert ---
    assert_eq!(output.metadata["media_type"], json!("photo"));
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let with_image = requests
        .iter()
        .filter(|r| String::from_utf8_lossy(&r.body).contains("image_url"))
        .count();
    assert_eq!(with_image, 2, "both steps must carry the image");
    let metadata_body = String::from_utf8_lossy(&requests[1].body).to_string();
    assert!(metadata_body.contains("\"model\":\"vision-model\""));
}

#[tokio::test]
async fn caption_override_skips_generation_in_double_mode() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    mount_alt_reply(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(TEXT_META_MARKER))
        .respond_with(chat_reply(METADATA_JSON))
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    let output = pipeline
        .run(
            &image,
            &PipelineOptions {
                caption_override: Some("A cat on a sofa.".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // --- 3. Assert ---
    assert_eq!(output.caption, "A cat on a sofa.");
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    // No combined alt+caption call was made.
    assert!(requests
        .iter()
        .all(|r| !String::from_utf8_lossy(&r.body).contains(AC_MARKER)));
    // Only the standalone alt-text call saw the image.
    let with_image = requests
        .iter()
        .filter(|r| String::from_utf8_lossy(&r.body).contains("image_url"))
        .count();
    assert_eq!(with_image, 1);
    // Metadata came purely from the override text.
    let metadata_body = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .find(|b| b.contains(TEXT_META_MARKER))
        .unwrap();
    assert!(metadata_body.contains("CAPTION: 'A cat on a sofa.'"));
}

#[tokio::test]
async fn caption_override_still_requeries_image_in_triple_mode() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    mount_alt_reply(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(VISION_META_MARKER))
        .respond_with(chat_reply(METADATA_JSON))
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    pipeline
        .run(
            &image,
            &PipelineOptions {
                mode: PipelineMode::Triple,
                caption_override: Some("A cat on a sofa.".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // --- 3. Assert ---
    let requests = server.received_requests().await.unwrap();
    let with_image = requests
        .iter()
        .filter(|r| String::from_utf8_lossy(&r.body).contains("image_url"))
        .count();
    assert_eq!(with_image, 2, "triple mode must re-present the image");
}

#[tokio::test]
async fn per_call_override_beats_config_file_beats_default() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    mount_alt_reply(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(TEXT_META_MARKER))
        .respond_with(chat_reply(METADATA_JSON))
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // Config file uses the legacy alias on purpose.
    let mut config_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    config_file
        .write_all(br#"{"meta_text_model": "file-model"}"#)
        .unwrap();

    let base_opts = PipelineOptions {
        caption_override: Some("A cat.".to_string()),
        config_path: Some(config_file.path().to_path_buf()),
        ..Default::default()
    };

    // --- 2. Act ---
    // First run: the file layer wins over the pipeline default.
    pipeline.run(&image, &base_opts).await.unwrap();
    // Second run: the per-call override wins over the file.
    pipeline
        .run(
            &image,
            &PipelineOptions {
                metadata_text_model: Some("override-model".to_string()),
                ..base_opts.clone()
            },
        )
        .await
        .unwrap();

    // --- 3. Assert ---
    let requests = server.received_requests().await.unwrap();
    let models: Vec<String> = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .filter(|b| b.contains(TEXT_META_MARKER))
        .collect();
    assert_eq!(models.len(), 2);
    assert!(models[0].contains("\"model\":\"file-model\""));
    assert!(models[1].contains("\"model\":\"override-model\""));
}

#[tokio::test]
async fn context_routing_respects_the_caption_flag() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    mount_ac_reply(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(VISION_META_MARKER))
        .respond_with(chat_reply(METADATA_JSON))
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    pipeline
        .run(
            &image,
            &PipelineOptions {
                mode: PipelineMode::Triple,
                context: Some("taken at a film festival".to_string()),
                use_context_for_caption: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // --- 3. Assert ---
    let requests = server.received_requests().await.unwrap();
    let ac_body = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .find(|b| b.contains(AC_MARKER))
        .unwrap();
    let metadata_body = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .find(|b| b.contains(VISION_META_MARKER))
        .unwrap();
    // The flag suppressed context on the caption step, but vision-grounded
    // metadata extraction always receives it.
    assert!(!ac_body.contains("taken at a film festival"));
    assert!(metadata_body.contains("taken at a film festival"));
}

#[tokio::test]
async fn step_one_failure_aborts_the_pipeline() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(AC_MARKER))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(TEXT_META_MARKER))
        .respond_with(chat_reply(METADATA_JSON))
        .expect(0)
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    let err = pipeline
        .run(&image, &PipelineOptions::default())
        .await
        .unwrap_err();

    // --- 3. Assert ---
    assert!(matches!(
        err,
        PipelineError::Caption(ProviderError::Api { status: 500, .. })
    ));
    server.verify().await;
}

#[tokio::test]
async fn unparseable_metadata_surfaces_malformed_output() {
    // --- 1. Arrange ---
    setup_tracing();
    let server = MockServer::start().await;
    mount_ac_reply(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(TEXT_META_MARKER))
        .respond_with(chat_reply("I'm sorry, I cannot analyze this caption."))
        .mount(&server)
        .await;
    let pipeline = pipeline_for(&server, test_config());
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    let err = pipeline
        .run(&image, &PipelineOptions::default())
        .await
        .unwrap_err();

    // --- 3. Assert ---
    match err {
        PipelineError::MalformedMetadata(inner) => {
            assert!(inner.to_string().contains("cannot analyze"));
        }
        other => panic!("expected MalformedMetadata, got {other:?}"),
    }
}

#[tokio::test]
async fn ollama_backend_serves_the_vision_metadata_step() {
    // --- 1. Arrange ---
    setup_tracing();
    let openrouter = MockServer::start().await;
    mount_ac_reply(&openrouter).await;
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llava:13b",
            "message": {"role": "assistant", "content": METADATA_JSON},
            "done": true
        })))
        .expect(1)
        .mount(&ollama)
        .await;

    let config = PipelineConfig {
        metadata_vision_backend: Backend::Ollama,
        metadata_vision_model: "llava:13b".to_string(),
        ollama_host: ollama.uri(),
        ..test_config()
    };
    let pipeline = pipeline_for(&openrouter, config);
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    let output = pipeline
        .run(
            &image,
            &PipelineOptions {
                mode: PipelineMode::Triple,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // --- 3. Assert ---
    assert_eq!(output.metadata["media_type"], json!("photo"));
    let requests = ollama.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(body.contains("\"model\":\"llava:13b\""));
    assert!(body.contains("\"images\""));
    assert!(body.contains("\"stream\":false"));
    ollama.verify().await;
}

// --- Local backend mocks ---

struct MockVlmEngine {
    model_id: String,
    response: String,
}

impl VlmEngine for MockVlmEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&mut self, image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        assert!(!image.is_empty(), "engine must receive image bytes");
        assert!(prompt.contains(VISION_META_MARKER));
        Ok(self.response.clone())
    }
}

struct MockVlmLoader {
    loads: Arc<AtomicUsize>,
}

impl VlmLoader for MockVlmLoader {
    fn load(&self, model_id: &str) -> Result<Box<dyn VlmEngine>, ProviderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockVlmEngine {
            model_id: model_id.to_string(),
            response: METADATA_JSON.to_string(),
        }))
    }
}

#[tokio::test]
async fn local_backend_loads_once_and_is_reused() {
    // --- 1. Arrange ---
    setup_tracing();
    let openrouter = MockServer::start().await;
    mount_ac_reply(&openrouter).await;
    let loads = Arc::new(AtomicUsize::new(0));
    let config = PipelineConfig {
        metadata_vision_backend: Backend::Local,
        ..test_config()
    };
    let pipeline = MetadataPipelineBuilder::new()
        .config(config)
        .api_key("test-key")
        .openrouter_url(format!("{}/chat/completions", openrouter.uri()))
        .vlm_loader(Arc::new(MockVlmLoader {
            loads: loads.clone(),
        }))
        .build()
        .unwrap();
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());
    let opts = PipelineOptions {
        mode: PipelineMode::Triple,
        ..Default::default()
    };

    // --- 2. Act ---
    let first = pipeline.run(&image, &opts).await.unwrap();
    let second = pipeline.run(&image, &opts).await.unwrap();

    // --- 3. Assert ---
    assert_eq!(first.metadata["media_type"], json!("photo"));
    assert_eq!(second.metadata, first.metadata);
    assert_eq!(
        loads.load(Ordering::SeqCst),
        1,
        "the local model must be loaded once and reused"
    );
}

#[tokio::test]
async fn local_backend_without_loader_is_a_clear_error() {
    // --- 1. Arrange ---
    setup_tracing();
    let openrouter = MockServer::start().await;
    mount_ac_reply(&openrouter).await;
    let config = PipelineConfig {
        metadata_vision_backend: Backend::Local,
        ..test_config()
    };
    let pipeline = pipeline_for(&openrouter, config);
    let fixture = fixture_image();
    let image = ImageReference::LocalPath(fixture.path().to_path_buf());

    // --- 2. Act ---
    let err = pipeline
        .run(
            &image,
            &PipelineOptions {
                mode: PipelineMode::Triple,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    // --- 3. Assert ---
    assert!(matches!(
        err,
        PipelineError::Metadata(ProviderError::LocalUnavailable(_))
    ));
}
