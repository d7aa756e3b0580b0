#[path = "common/mod.rs"]
mod common;

use common::EnvGuard;
use exam_assist::{build_state_from_env, AppConfig};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[tokio::test]
async fn rejects_non_numeric_temperature() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    env.set("INFERENCE_TEMPERATURE", "warm");
    let err = AppConfig::from_env().expect_err("expected invalid temperature to error");
    assert!(format!("{}", err).contains("INFERENCE_TEMPERATURE"));
}

#[tokio::test]
async fn state_from_env_creates_output_directory() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("reports").join("eye");
    env.set_many(&[
        ("OUTPUT_DIR", out.to_str().unwrap()),
        ("API_TOKEN", "from-env"),
        ("INFERENCE_MODEL", "llama3.1"),
    ]);
    env.remove("INFERENCE_TEMPERATURE");
    env.remove("MAX_REQUEST_BYTES");

    let state = build_state_from_env().unwrap();
    assert!(out.is_dir());
    assert_eq!(state.store.dir(), out.as_path());
    assert_eq!(state.api_token, "from-env");
    assert_eq!(state.inference.model(), "llama3.1");
}
