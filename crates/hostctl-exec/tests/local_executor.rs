//! End-to-end tests of the executor over the local transport

use std::sync::Arc;
use std::time::Duration;

use hostctl_exec::{
    CommandRequest, ExecConfig, ExecError, Executor, FileTransfer, LocalConnector, RemoteExecutor,
};

fn scratch(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("hostctl_{name}_{}", std::process::id()))
        .display()
        .to_string()
}

fn local() -> Arc<Executor> {
    Arc::new(Executor::new(
        Arc::new(LocalConnector::new()),
        ExecConfig::default(),
    ))
}

#[tokio::test]
async fn commands_are_applied_in_issuance_order() {
    let executor = local();
    let path = scratch("order");

    for i in 0..5 {
        let line = format!("echo {i} >> '{path}'");
        executor
            .run_checked(&CommandRequest::shell(line))
            .await
            .unwrap();
    }

    let content = executor
        .run_checked(&CommandRequest::new(["cat", path.as_str()]))
        .await
        .unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(content, "0\n1\n2\n3\n4\n");
}

#[tokio::test]
async fn upload_and_download_are_verified() {
    let executor = local();
    let transfer = FileTransfer::new(executor.clone());
    let path = scratch("transfer");
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();

    let report = transfer.upload(&payload, &path).await.unwrap();
    let back = transfer.download(&path).await.unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(report.bytes, payload.len() as u64);
    assert!(report.checksum_verified);
    assert_eq!(back, payload);
}

#[tokio::test]
async fn download_of_missing_file_is_not_found() {
    let transfer = FileTransfer::new(local());
    let err = transfer
        .download("/nonexistent/hostctl/file")
        .await
        .unwrap_err();

    assert_eq!(err, ExecError::NotFound("/nonexistent/hostctl/file".into()));
}

#[tokio::test]
async fn closed_executor_rejects_commands() {
    let executor = local();
    executor.run(&CommandRequest::new(["true"])).await.unwrap();
    executor.close().await.unwrap();

    let err = executor
        .run(&CommandRequest::new(["true"]))
        .await
        .unwrap_err();
    assert_eq!(err, ExecError::Closed);
}

#[tokio::test]
async fn local_host_is_connective() {
    let executor = local();
    assert!(executor.is_connective(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn streamed_lines_arrive_before_the_command_ends() {
    let executor = local();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let request = CommandRequest::shell("echo first; sleep 1; printf 'second\\nthird'");

    let follow = async {
        let first = rx.recv().await;
        let started = std::time::Instant::now();
        let mut rest = Vec::new();
        while let Some(line) = rx.recv().await {
            rest.push(line);
        }
        (first, started.elapsed(), rest)
    };
    let (result, (first, waited, rest)) = tokio::join!(executor.run_streaming(&request, tx), follow);

    let result = result.unwrap();
    assert!(result.success());
    assert_eq!(first.as_deref(), Some("first"));
    // The first line was delivered while the command was still sleeping
    assert!(waited >= Duration::from_millis(500));
    assert_eq!(rest, ["second", "third"]);
    assert_eq!(result.stdout, "first\nsecond\nthird");
}
