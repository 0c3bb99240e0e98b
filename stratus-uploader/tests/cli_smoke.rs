use std::process::Command;

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn run_upload(args: &[&str], envs: &[(&str, &str)]) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_stratus-upload");
    Command::new(exe)
        .args(args)
        .env_remove("STRATUS_TOKEN")
        .env_remove("STRATUS_API_URL")
        .envs(envs.iter().copied())
        .output()
        .expect("stratus-upload should execute")
}

#[test]
fn help_lists_options() {
    let output = run_upload(&["--help"], &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--dest"));
    assert!(stdout.contains("--json"));
}

#[test]
fn missing_paths_is_an_error() {
    let output = run_upload(&[], &[]);
    assert!(!output.status.success());
}

#[test]
fn missing_token_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "hello").unwrap();
    let output = run_upload(&[file.to_str().unwrap()], &[]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("STRATUS_TOKEN"));
}

#[tokio::test(flavor = "multi_thread")]
async fn uploads_a_directory_and_prints_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/nodes/root/folders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "f1",
            "name": "docs",
            "type": "folder"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/nodes/f1/content"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "n1",
            "name": "a.txt",
            "type": "file",
            "size": 5
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(docs.join("a.txt"), "hello").unwrap();

    let uri = server.uri();
    let docs_arg = docs.to_str().unwrap().to_string();
    let output = tokio::task::spawn_blocking(move || {
        run_upload(
            &["--json", &docs_arg],
            &[("STRATUS_TOKEN", "secret"), ("STRATUS_API_URL", &uri)],
        )
    })
    .await
    .unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find('[').expect("json array in output");
    let json_end = stdout.rfind(']').expect("json array in output");
    let items: Value = serde_json::from_str(&stdout[json_start..=json_end]).unwrap();
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item["status"] == "completed"));
    assert!(stdout.contains("Uploaded 1 of 1 item(s), 0 failed"));
}
