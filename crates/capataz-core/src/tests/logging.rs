//! Category D: Log capture and rotation falsification tests (F031-F040).

use std::path::Path;
use std::time::Duration;

use serde_json::json;

use crate::tests::harness::{CHATTY, READY_THEN_SLEEP, TestHarness, child};

/// Prints every channel line to stdout.
const LOGGER: &str = r#"echo ready >&3; while read -r line <&3; do echo "$line"; done"#;

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

async fn wait_for_content(h: &TestHarness, path: &Path, needle: &str) -> bool {
    h.wait_for(Duration::from_secs(2), || read(path).contains(needle))
        .await
}

/// F031: stdout and stderr land in per-child files
#[tokio::test]
async fn f031_streams_are_captured() {
    let h = TestHarness::with_logs();
    h.prepare("web", CHATTY);
    h.supervisor().start(&child("web", 7000)).await.unwrap();

    let out = h.log_dir().join("web_7000.out.log");
    let err = h.log_dir().join("web_7000.err.log");
    assert!(wait_for_content(&h, &out, "to-stdout").await);
    assert!(wait_for_content(&h, &err, "to-stderr").await);
    assert!(!read(&out).contains("to-stderr"));

    h.shutdown().await;
}

/// F032: Rotation archives the active file without stopping the process
#[tokio::test]
async fn f032_rotate_while_running() {
    let h = TestHarness::with_logs();
    h.prepare("web", LOGGER);
    h.supervisor().start(&child("web", 1)).await.unwrap();
    let pid = h.supervisor().group("web").unwrap().child(1).pid();

    let active = h.log_dir().join("web_1.out.log");
    h.supervisor().send(&child("web", 1), &json!("before")).unwrap();
    assert!(wait_for_content(&h, &active, "before").await);

    let rotated = h.supervisor().rotate_logs(&child("web", 1)).await.unwrap();
    let archive = rotated.out.expect("stdout archive");
    assert!(rotated.err.is_some());
    assert!(read(&archive).contains("before"));
    assert!(!read(&active).contains("before"));

    h.supervisor().send(&child("web", 1), &json!("after")).unwrap();
    assert!(wait_for_content(&h, &active, "after").await);
    assert!(!read(&archive).contains("after"));
    assert_eq!(h.supervisor().group("web").unwrap().child(1).pid(), pid);

    h.shutdown().await;
}

/// F033: Rotation without log capture reports no archives
#[tokio::test]
async fn f033_rotate_without_log_dir() {
    let h = TestHarness::new();
    h.prepare("web", READY_THEN_SLEEP);
    h.supervisor().start(&child("web", 1)).await.unwrap();

    let rotated = h.supervisor().rotate_logs(&child("web", 1)).await.unwrap();
    assert!(rotated.out.is_none());
    assert!(rotated.err.is_none());
    assert!(h.supervisor().group("web").unwrap().child(1).is_running());

    h.shutdown().await;
}

/// F034: With rotate-on-start, each spawn begins with a fresh file
#[tokio::test]
async fn f034_rotate_on_start() {
    let h = TestHarness::with_logs_rotated_on_start();
    h.prepare("web", CHATTY);
    let out = h.log_dir().join("web_1.out.log");

    h.supervisor().start(&child("web", 1)).await.unwrap();
    assert!(wait_for_content(&h, &out, "to-stdout").await);
    h.supervisor()
        .start(&child("web", 1).with_restart(true))
        .await
        .unwrap();
    assert!(wait_for_content(&h, &out, "to-stdout").await);

    assert_eq!(read(&out).matches("to-stdout").count(), 1);
    let archives = std::fs::read_dir(h.log_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with("web_1.out.") && name != "web_1.out.log"
        })
        .count();
    assert!(archives >= 1);

    h.shutdown().await;
}

/// F035: Child environment overrides the group environment
#[tokio::test]
async fn f035_child_env_wins() {
    let h = TestHarness::with_logs();
    let group = TestHarness::group("web", r#"echo "greeting=$GREETING port=$CAPATAZ_PORT"; echo ready >&3; exec sleep 30"#)
        .with_env("GREETING", "from-group");
    h.supervisor().prepare(group).unwrap();

    h.supervisor().start(&child("web", 1)).await.unwrap();
    h.supervisor()
        .start(&child("web", 2).with_env("GREETING", "from-child"))
        .await
        .unwrap();

    assert!(wait_for_content(&h, &h.log_dir().join("web_1.out.log"), "greeting=from-group port=1").await);
    assert!(wait_for_content(&h, &h.log_dir().join("web_2.out.log"), "greeting=from-child port=2").await);

    h.shutdown().await;
}

/// F036: Output written just before an exit is not lost
#[tokio::test]
async fn f036_output_before_exit_is_kept() {
    let h = TestHarness::with_logs();
    h.prepare("brief", "echo ready >&3; sleep 0.1; echo last-words; exit 0");
    h.supervisor().on(
        crate::event::EXIT,
        &crate::subscription::SubscribeOptions::new().group("brief"),
        crate::event::handler(|_, info, _| info.handled = true),
    );

    assert!(h.supervisor().start(&child("brief", 1)).await.unwrap().ready);
    let c = h.supervisor().group("brief").unwrap().child(1);
    assert!(h.wait_for(Duration::from_secs(2), || c.crash_count() == 1).await);
    assert!(read(&h.log_dir().join("brief_1.out.log")).contains("last-words"));
}
