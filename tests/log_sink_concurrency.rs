//! Operator log under concurrent appenders
//!
//! Every entry must land in the file whole, exactly once, with no bytes from
//! another entry inside it.

use pld_control::log_sink::{LogSink, TIMESTAMP_FORMAT};
use std::collections::HashSet;

const TASKS: usize = 16;
const MESSAGES: usize = 50;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let sink = LogSink::open_truncated(dir.path().join("pldcontrol_log_file.aki"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for task in 0..TASKS {
        let sink = sink.clone();
        handles.push(tokio::spawn(async move {
            for msg in 0..MESSAGES {
                sink.append(format!("task-{task} message-{msg} {}", "x".repeat(200)))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }

    let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
    assert!(content.ends_with("\n\n"));

    let entries: Vec<&str> = content
        .split_terminator("\n\n")
        .collect();
    assert_eq!(entries.len(), TASKS * MESSAGES);

    let mut seen = HashSet::new();
    let mut last_per_task = vec![None::<usize>; TASKS];
    for entry in entries {
        let (stamp, message) = entry.split_once(" > ").unwrap();
        assert!(
            chrono::NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok(),
            "bad timestamp in {entry:?}"
        );

        let mut words = message.split(' ');
        let task: usize = words.next().unwrap()["task-".len()..].parse().unwrap();
        let msg: usize = words.next().unwrap()["message-".len()..].parse().unwrap();
        assert_eq!(words.next().unwrap().len(), 200);
        assert!(words.next().is_none());

        assert!(seen.insert((task, msg)), "duplicate entry {task}/{msg}");
        // Each task appends sequentially, so its own entries stay in order.
        if let Some(prev) = last_per_task[task] {
            assert!(msg > prev);
        }
        last_per_task[task] = Some(msg);
    }
}

#[tokio::test]
async fn viewer_sees_entries_in_file_order() {
    let dir = tempfile::tempdir().unwrap();
    let sink = LogSink::open_truncated(dir.path().join("log.aki")).await.unwrap();
    let mut viewer = sink.subscribe();

    for i in 0..5 {
        sink.append(format!("PC->NL: entry {i}")).await.unwrap();
    }

    let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
    let mut rendered = String::new();
    for _ in 0..5 {
        rendered.push_str(&viewer.recv().await.unwrap().render());
    }
    assert_eq!(rendered, content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn viewer_order_matches_file_under_contention() {
    const WRITERS: usize = 8;
    const EACH: usize = 25;

    let dir = tempfile::tempdir().unwrap();
    let sink = LogSink::open_truncated(dir.path().join("log.aki")).await.unwrap();
    let mut viewer = sink.subscribe();

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let sink = sink.clone();
            tokio::spawn(async move {
                for msg in 0..EACH {
                    sink.append(format!("writer-{writer} message-{msg}"))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }

    let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
    let mut rendered = String::new();
    for _ in 0..WRITERS * EACH {
        rendered.push_str(&viewer.recv().await.unwrap().render());
    }
    assert_eq!(rendered, content);
}
