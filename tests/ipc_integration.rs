//! Integration tests against real backend processes.
//!
//! Each test spawns a small `sh` script that speaks one of the wire
//! protocols, so the whole stack runs: process spawning, pipes, framing,
//! decoding, mapping and shutdown.
//!
//! # Running
//!
//! ```bash
//! cargo test --test ipc_integration -- --nocapture
//! ```
//!
//! Tests can be skipped on machines without a POSIX shell by setting
//! `FINDER_IPC_SKIP_PROCESS_TESTS=1`.

#![cfg(unix)]

use std::time::Duration;

use finder_ipc::config::BackendConfig;
use finder_ipc::ipc::{
    BackendClient, BackendCommand, ClientError, ClientOptions, ProtocolKind, SessionState,
    StderrMode,
};
use finder_ipc::models::{Classification, Entry};
use finder_ipc::results::ResultSet;
use pretty_assertions::assert_eq;
use tokio::time::timeout;

/// Test timeout to prevent hanging tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// gf-style backend: answers `q:<query>` with two paths derived from the query.
const TEXT_BACKEND: &str = r#"
while IFS= read -r line; do
  q="${line#q:}"
  printf '2\n/tmp/%s.txt\n/tmp/%s.png\n' "$q" "$q"
done
"#;

/// gf-style backend that returns the query itself as the only path.
const ECHO_PATH_BACKEND: &str = r#"
while IFS= read -r line; do
  printf '1\n%s\n' "${line#q:}"
done
"#;

/// pop-launcher-style backend. Exits on "Exit"; delays the query `slow`.
const JSON_BACKEND: &str = r#"
while IFS= read -r line; do
  case "$line" in
    '"Exit"') exit 0 ;;
    *Search*)
      q=$(printf '%s' "$line" | sed -e 's/^{"Search":"//' -e 's/"}$//')
      if [ "$q" = "slow" ]; then sleep 0.5; fi
      printf '{"Update":[{"id":0,"name":"%s.md","description":"~/%s.md","icon":{"Mime":"text/markdown"}},{"id":1,"name":"%s","description":"~/%s","icon":{"Mime":"inode/directory"}}]}\n' "$q" "$q" "$q" "$q"
      ;;
  esac
done
"#;

/// gf-style backend that answers the query `slow` late, together with the
/// next answer.
const SLOW_TEXT_BACKEND: &str = r#"
pending=''
while IFS= read -r line; do
  q="${line#q:}"
  if [ "$q" = "slow" ]; then pending="$q"; continue; fi
  if [ -n "$pending" ]; then
    printf '1\n/tmp/%s\n1\n/tmp/%s\n' "$pending" "$q"
    pending=''
  else
    printf '1\n/tmp/%s\n' "$q"
  fi
done
"#;

/// Answers one query, then exits.
const ONE_SHOT_BACKEND: &str = r#"
IFS= read -r line
printf '1\n/tmp/once.txt\n'
"#;

fn should_skip_process_tests() -> bool {
    std::env::var("FINDER_IPC_SKIP_PROCESS_TESTS").is_ok()
}

fn script(body: &str) -> BackendCommand {
    BackendCommand::new("sh").args(["-c", body])
}

fn client(body: &str, protocol: ProtocolKind, options: ClientOptions) -> BackendClient {
    BackendClient::new(Box::new(script(body)), protocol.codec(), options)
}

fn titles(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(|e| e.title.as_str()).collect()
}

async fn search(client: &BackendClient, query: &str) -> Result<Vec<Entry>, ClientError> {
    timeout(TEST_TIMEOUT, client.search(query))
        .await
        .expect("Test timed out")
}

#[tokio::test]
async fn test_text_backend_search_and_close() {
    if should_skip_process_tests() {
        eprintln!("Skipping: FINDER_IPC_SKIP_PROCESS_TESTS is set");
        return;
    }

    let client = client(TEXT_BACKEND, ProtocolKind::Text, ClientOptions::default());
    client.connect().await.expect("connect");

    let entries = search(&client, "alpha").await.expect("search");
    assert_eq!(titles(&entries), vec!["alpha.txt", "alpha.png"]);
    assert_eq!(
        entries.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(entries[0].path.as_deref(), Some("/tmp/alpha.txt"));

    let entries = search(&client, "beta").await.expect("second search");
    assert_eq!(titles(&entries), vec!["beta.txt", "beta.png"]);

    timeout(TEST_TIMEOUT, client.close())
        .await
        .expect("Test timed out")
        .expect("close");
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_json_backend_with_query_prefix() {
    if should_skip_process_tests() {
        return;
    }

    let options = ClientOptions {
        query_prefix: "find ".into(),
        resolve_mime: false,
    };
    let client = client(JSON_BACKEND, ProtocolKind::Json, options);
    client.connect().await.expect("connect");

    let entries = search(&client, "notes").await.expect("search");
    assert_eq!(titles(&entries), vec!["find notes.md", "find notes"]);
    assert_eq!(entries[0].classification, Classification::Text);
    assert_eq!(entries[1].classification, Classification::Directory);
    assert_eq!(entries[1].mime.as_deref(), Some("inode/directory"));

    // The backend exits on "Exit" well within the grace period
    timeout(TEST_TIMEOUT, client.close())
        .await
        .expect("Test timed out")
        .expect("close");
}

#[tokio::test]
async fn test_late_response_goes_to_nobody() {
    if should_skip_process_tests() {
        return;
    }

    let client = client(JSON_BACKEND, ProtocolKind::Json, ClientOptions::default());
    client.connect().await.expect("connect");

    let mut results = ResultSet::new();
    let slow = results.begin();
    let err = client
        .search_with_timeout("slow", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "got {:?}", err);
    assert_eq!(client.state(), SessionState::Ready);

    let fast = results.begin();
    let entries = search(&client, "fast").await.expect("search after timeout");
    assert_eq!(titles(&entries), vec!["fast.md", "fast"]);
    assert!(results.apply(fast, entries));
    assert!(!results.apply(slow, Vec::new()));
    assert_eq!(results.len(), 2);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_text_late_response_goes_to_nobody() {
    if should_skip_process_tests() {
        return;
    }

    let client = client(SLOW_TEXT_BACKEND, ProtocolKind::Text, ClientOptions::default());
    client.connect().await.expect("connect");

    let err = client
        .search_with_timeout("slow", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "got {:?}", err);

    let entries = search(&client, "fast").await.expect("search after timeout");
    assert_eq!(titles(&entries), vec!["fast"]);
    let entries = search(&client, "next").await.expect("next search");
    assert_eq!(titles(&entries), vec!["next"]);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_missing_executable_is_connect_error() {
    let command = BackendCommand::new("/nonexistent/finder-ipc-backend");
    let client = BackendClient::new(
        Box::new(command),
        ProtocolKind::Text.codec(),
        ClientOptions::default(),
    );

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Connect(_)), "got {:?}", err);
    assert!(matches!(
        client.search("x").await,
        Err(ClientError::BackendDied(_))
    ));
    client.close().await.expect("close after failed connect");
}

#[tokio::test]
async fn test_backend_exit_then_reconnect() {
    if should_skip_process_tests() {
        return;
    }

    let client = client(ONE_SHOT_BACKEND, ProtocolKind::Text, ClientOptions::default());
    client.connect().await.expect("connect");

    let entries = search(&client, "first").await.expect("first search");
    assert_eq!(titles(&entries), vec!["once.txt"]);

    let err = search(&client, "second").await.unwrap_err();
    assert!(matches!(err, ClientError::BackendDied(_)), "got {:?}", err);
    assert_eq!(client.state(), SessionState::Failed);
    assert!(matches!(
        search(&client, "third").await,
        Err(ClientError::BackendDied(_))
    ));

    client.connect().await.expect("reconnect");
    let entries = search(&client, "again").await.expect("search after reconnect");
    assert_eq!(titles(&entries), vec!["once.txt"]);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_piped_stderr_does_not_block() {
    if should_skip_process_tests() {
        return;
    }

    // Enough stderr output to fill an undrained pipe
    let body = format!(
        "i=0; while [ $i -lt 2000 ]; do echo \"noise line $i padding padding padding\" >&2; i=$((i+1)); done\n{}",
        TEXT_BACKEND
    );
    let command = script(&body).stderr(StderrMode::Piped);
    let client = BackendClient::new(
        Box::new(command),
        ProtocolKind::Text.codec(),
        ClientOptions::default(),
    );
    client.connect().await.expect("connect");

    let entries = search(&client, "quiet").await.expect("search");
    assert_eq!(titles(&entries), vec!["quiet.txt", "quiet.png"]);
    client.close().await.expect("close");
}

#[tokio::test]
async fn test_mime_resolution_for_paths() {
    if should_skip_process_tests() {
        return;
    }
    let has_file = std::process::Command::new("file")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !has_file {
        eprintln!("Skipping: `file` command not available");
        return;
    }

    let options = ClientOptions {
        query_prefix: String::new(),
        resolve_mime: true,
    };
    let client = client(ECHO_PATH_BACKEND, ProtocolKind::Text, options);
    client.connect().await.expect("connect");

    let dir = std::env::temp_dir();
    let entries = search(&client, &dir.to_string_lossy()).await.expect("search");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].classification, Classification::Directory);
    assert_eq!(entries[0].mime.as_deref(), Some("inode/directory"));

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_close_is_idempotent_then_disconnected() {
    if should_skip_process_tests() {
        return;
    }

    let client = client(TEXT_BACKEND, ProtocolKind::Text, ClientOptions::default());
    client.connect().await.expect("connect");
    client.close().await.expect("close");
    client.close().await.expect("second close");

    assert!(matches!(
        client.search("late").await,
        Err(ClientError::Disconnected)
    ));
    assert!(matches!(
        client.activate(0).await,
        Err(ClientError::Disconnected)
    ));
}

#[tokio::test]
async fn test_client_from_config() {
    if should_skip_process_tests() {
        return;
    }

    let config = BackendConfig {
        name: "script".into(),
        command: "sh".into(),
        args: vec!["-c".into(), TEXT_BACKEND.into()],
        protocol: ProtocolKind::Text,
        stderr: StderrMode::Null,
        query_prefix: String::new(),
        resolve_mime: false,
        search_timeout_ms: 2_000,
    };
    let client = BackendClient::from_config(&config);
    assert_eq!(client.protocol(), "delimited-text");
    client.connect().await.expect("connect");

    let entries = client
        .search_with_timeout("cfg", config.search_timeout())
        .await
        .expect("search");
    assert_eq!(titles(&entries), vec!["cfg.txt", "cfg.png"]);
    client.close().await.expect("close");
}
