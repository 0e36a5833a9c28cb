use std::sync::{Arc, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{
    config::{ProgressionSettings, Settings},
    redis::RedisHandle,
    state::AppState,
};
use crate::db::models::{Course, CourseLevel, SchoolClass};
use crate::repositories::memory::{CatalogSeed, MemoryStore};

pub(crate) const COURSE_ID: i64 = 1;
pub(crate) const BASIC_LEVEL_ID: i64 = 10;
pub(crate) const INTERMEDIATE_LEVEL_ID: i64 = 11;
pub(crate) const FINAL_LEVEL_ID: i64 = 12;
pub(crate) const BASIC_CLASS_ID: i64 = 100;
pub(crate) const INTERMEDIATE_CLASS_ID: i64 = 101;
pub(crate) const FINAL_CLASS_ID: i64 = 102;

const PROGRESSION_ENV_VARS: &[&str] = &[
    "PROGRESSION_HOST",
    "PROGRESSION_PORT",
    "PROGRESSION_ENV",
    "ENVIRONMENT",
    "PROGRESSION_STRICT_CONFIG",
    "PROJECT_NAME",
    "VERSION",
    "API_V1_STR",
    "BACKEND_CORS_ORIGINS",
    "DATABASE_URL",
    "POSTGRES_PASSWORD",
    "POSTGRES_MAX_CONNECTIONS",
    "PROGRESSION_STORE",
    "PROGRESSION_CATALOG_PATH",
    "PROGRESSION_PASS_RULE",
    "PROGRESSION_RECOVERY_ENABLED",
    "PROGRESSION_AUTO_FINALIZE",
    "PROGRESSION_SWEEP_INTERVAL_SECONDS",
    "PROGRESSION_PROGRESS_CACHE_TTL_SECONDS",
    "PROGRESSION_LOG_LEVEL",
    "PROGRESSION_LOG_JSON",
    "PROMETHEUS_ENABLED",
];

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

/// Removes every variable `Settings::load` reads so tests start from defaults.
pub(crate) fn clear_progression_env() {
    for name in PROGRESSION_ENV_VARS {
        std::env::remove_var(name);
    }
}

pub(crate) fn set_test_env() {
    clear_progression_env();
    std::env::set_var("PROGRESSION_ENV", "test");
    std::env::set_var("PROGRESSION_STRICT_CONFIG", "0");
    std::env::set_var("PROGRESSION_STORE", "memory");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
}

/// One course with three chained levels of four periods, one class per level.
pub(crate) fn catalog_seed() -> CatalogSeed {
    let level = |id: i64, level_number: i32, name: &str, next_level_id: Option<i64>| CourseLevel {
        id,
        course_id: COURSE_ID,
        level_number,
        name: name.to_string(),
        period_count: 4,
        next_level_id,
    };

    CatalogSeed {
        courses: vec![Course { id: COURSE_ID, name: "Inglês".to_string() }],
        levels: vec![
            level(BASIC_LEVEL_ID, 1, "Básico", Some(INTERMEDIATE_LEVEL_ID)),
            level(INTERMEDIATE_LEVEL_ID, 2, "Intermediário", Some(FINAL_LEVEL_ID)),
            level(FINAL_LEVEL_ID, 3, "Avançado", None),
        ],
        classes: vec![
            SchoolClass { id: BASIC_CLASS_ID, level_id: BASIC_LEVEL_ID, name: "B1-manhã".into() },
            SchoolClass {
                id: INTERMEDIATE_CLASS_ID,
                level_id: INTERMEDIATE_LEVEL_ID,
                name: "I1-tarde".into(),
            },
            SchoolClass { id: FINAL_CLASS_ID, level_id: FINAL_LEVEL_ID, name: "A1-noite".into() },
        ],
    }
}

async fn load_test_settings(prometheus_enabled: bool) -> Settings {
    let _guard = env_lock().await;
    set_test_env();
    if prometheus_enabled {
        std::env::set_var("PROMETHEUS_ENABLED", "1");
    }
    let settings = Settings::load().expect("settings");
    clear_progression_env();
    settings
}

fn build_state(settings: Settings) -> AppState {
    let store = MemoryStore::with_catalog(catalog_seed()).expect("memory store");
    let redis = RedisHandle::new(settings.redis().redis_url());
    AppState::new(settings, Arc::new(store), redis)
}

/// Memory-backed state with default progression settings and no Redis connection.
pub(crate) async fn memory_state() -> AppState {
    memory_state_with(|_| {}).await
}

pub(crate) async fn memory_state_with(
    configure: impl FnOnce(&mut ProgressionSettings),
) -> AppState {
    let mut settings = load_test_settings(false).await;
    configure(settings.progression_mut());
    build_state(settings)
}

pub(crate) async fn setup_test_context() -> TestContext {
    setup_test_context_with(|_| {}, false).await
}

pub(crate) async fn setup_test_context_with(
    configure: impl FnOnce(&mut ProgressionSettings),
    prometheus_enabled: bool,
) -> TestContext {
    let mut settings = load_test_settings(prometheus_enabled).await;
    configure(settings.progression_mut());

    let state = build_state(settings);
    let app = api::router::router(state.clone());
    let guard = env_lock().await;

    TestContext { state, app, _guard: guard }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
