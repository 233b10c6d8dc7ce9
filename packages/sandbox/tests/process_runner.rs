// ABOUTME: Tests the real process runner with the same argv shapes the file gateway sends into containers
// ABOUTME: Payloads with shell metacharacters must land byte-for-byte through stdin

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pretty_assertions::assert_eq;
use sorobox_sandbox::{CommandRunner, CommandSpec, ProcessRunner};

#[tokio::test]
async fn test_base64_stdin_write_preserves_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("lib.rs");
    let content = b"fn main() { println!(\"$(whoami) `id` '; rm -rf /\"); }\n\x00\xfe".to_vec();

    let output = ProcessRunner::new()
        .run(
            CommandSpec::new("sh")
                .args(["-c", "base64 -d > \"$1\"", "sh"])
                .arg(target.to_string_lossy())
                .stdin(STANDARD.encode(&content).into_bytes()),
        )
        .await;
    assert!(output.success(), "{}", output.failure_summary());
    assert_eq!(std::fs::read(&target).unwrap(), content);

    let read = ProcessRunner::new()
        .run(CommandSpec::new("base64").arg(target.to_string_lossy()))
        .await;
    let compact: String = read
        .stdout_lossy()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    assert_eq!(STANDARD.decode(compact).unwrap(), content);
}

#[tokio::test]
async fn test_path_with_spaces_is_a_single_argument() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("my file; touch pwned");

    let output = ProcessRunner::new()
        .run(
            CommandSpec::new("sh")
                .args(["-c", "base64 -d > \"$1\"", "sh"])
                .arg(target.to_string_lossy())
                .stdin(STANDARD.encode("ok").into_bytes()),
        )
        .await;
    assert!(output.success());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "ok");
    assert!(!dir.path().join("pwned").exists());
}
