// Manager: single active restore, slot release and restart after success

mod common;

use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use warden_core::config::AppConfig;
use warden_core::{Manifest, ProcessState, RestoreHeader, RestoreId};
use warden_restore::{ErrorKind, FormatRegistry, Manager, Restarter, RestoreError};

#[derive(Default)]
struct CountingRestarter {
    restarts: AtomicUsize,
}

impl Restarter for CountingRestarter {
    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

fn manager(dir: &TempDir) -> (Arc<Manager>, Arc<CountingRestarter>, SharedBytes) {
    let (recorder, received) = RecordingHandler::new();
    let registry = FormatRegistry::new();
    registry
        .register_format(single_format("roxdbv1", &["bolt.db"], recorder))
        .unwrap();

    let config = AppConfig::for_testing(dir.path()).restore;
    let restarter = Arc::new(CountingRestarter::default());
    let manager = Arc::new(Manager::new(
        Arc::new(registry),
        config,
        restarter.clone(),
    ));
    (manager, restarter, received)
}

fn header(data: &[u8]) -> RestoreHeader {
    RestoreHeader {
        format_name: "roxdbv1".to_string(),
        manifest: Manifest::new(vec![manifest_file("bolt.db", data)]),
    }
}

#[tokio::test]
async fn test_second_launch_is_rejected_while_active() {
    let dir = TempDir::new().unwrap();
    let (manager, _, _) = manager(&dir);

    let (reader, mut writer) = tokio::io::duplex(64);
    let (first, _) = manager
        .launch_restore_process(header(b"bolt"), Box::new(reader), Some("alice".to_string()))
        .unwrap();
    assert_eq!(first.state(), ProcessState::InProgress);

    let err = manager
        .launch_restore_process(header(b"bolt"), static_reader(b"bolt".to_vec()), None)
        .map(|_| ())
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("an active restore process already exists"),
        "{err}"
    );
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert!(Arc::ptr_eq(&manager.active_process().unwrap(), &first));

    writer.write_all(b"bolt").await.unwrap();
    drop(writer);
    first.wait().await.unwrap();
}

#[tokio::test]
async fn test_unknown_format_and_bad_manifest_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (manager, _, _) = manager(&dir);

    let mut unknown = header(b"bolt");
    unknown.format_name = "nope".to_string();
    let err = manager
        .launch_restore_process(unknown, static_reader(Vec::new()), None)
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, RestoreError::UnknownFormat(_)));

    let mut missing = header(b"bolt");
    missing.manifest = Manifest::new(vec![manifest_file("other.db", b"x")]);
    let err = manager
        .launch_restore_process(missing, static_reader(Vec::new()), None)
        .map(|_| ())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    assert!(manager.active_process().is_none());
}

#[tokio::test]
async fn test_failed_restore_releases_slot() {
    let dir = TempDir::new().unwrap();
    let (manager, _, _) = manager(&dir);

    let mut bad = header(b"bolt");
    bad.manifest.files[0].decoded_crc32 ^= 1;
    let (first, _) = manager
        .launch_restore_process(bad, static_reader(b"bolt".to_vec()), None)
        .unwrap();
    first.wait().await.unwrap_err();

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.active_process().is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (second, _) = manager
        .launch_restore_process(header(b"bolt"), static_reader(b"bolt".to_vec()), None)
        .unwrap();
    assert_ne!(first.id(), second.id());
    second.wait().await.unwrap();
}

#[tokio::test]
async fn test_success_restarts_and_keeps_slot() {
    let dir = TempDir::new().unwrap();
    let (manager, restarter, received) = manager(&dir);

    let (process, attempt) = manager
        .launch_restore_process(header(b"bolt"), static_reader(b"bolt".to_vec()), None)
        .unwrap();
    attempt.wait().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while restarter.restarts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(received.lock().unwrap()["bolt.db"], b"bolt");
    assert!(Arc::ptr_eq(&manager.active_process().unwrap(), &process));
    let err = manager
        .launch_restore_process(header(b"bolt"), static_reader(b"bolt".to_vec()), None)
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, RestoreError::AlreadyActive(_)));
}

#[tokio::test]
async fn test_lookup_interrupt_and_cancel_by_id() {
    let dir = TempDir::new().unwrap();
    let (manager, _, _) = manager(&dir);

    let (reader, mut writer) = tokio::io::duplex(64);
    let (process, attempt) = manager
        .launch_restore_process(header(b"bolt"), Box::new(reader), None)
        .unwrap();

    let err = manager.get_process(RestoreId::new()).map(|_| ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    writer.write_all(b"bo").await.unwrap();
    wait_for_bytes(&process, 2).await;
    let resume = manager
        .interrupt(process.id(), attempt.attempt_id())
        .await
        .unwrap();
    assert_eq!(resume.pos, 2);

    manager.cancel(process.id()).unwrap();
    assert!(process.wait().await.unwrap_err().is_canceled());
}
