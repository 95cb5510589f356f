//! End-to-end scenarios over local streams and files.

mod common;

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stitch_index::VerifyOutcome;
use stitch_index::mem::{MemoryIndex, MemoryTarget};
use stitch_install::{Error, PatchInstaller};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn repairs_corrupt_target_from_local_stream() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(1024, 7);
    let index = common::split_index(&source, 2);
    common::seed_target(dir.path(), &vec![0u8; 1024]);

    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(index);

    installer.attach_all_for_read(dir.path()).await.unwrap();
    installer.verify_files(&cancel).await.unwrap();
    assert_eq!(installer.missing_parts(0), vec![0, 1]);
    assert_eq!(installer.missing_for_source(0), vec![(0, 0), (0, 1)]);
    assert_eq!(installer.verify_progress(), (1024, 1024));

    installer.attach_missing_for_write(dir.path()).await.unwrap();
    installer
        .queue_stream_install(0, Cursor::new(source.clone()))
        .unwrap();
    assert_eq!(installer.queued_task_count(), 1);
    installer.install(4, &cancel).await.unwrap();
    installer.detach_all().await;

    assert_eq!(common::read_target(dir.path()), source);

    // Second cycle: everything verifies, nothing queues, install is a
    // no-op. The repair is idempotent.
    installer.attach_all_for_read(dir.path()).await.unwrap();
    installer.verify_files(&cancel).await.unwrap();
    assert!(installer.is_clean());
    installer
        .queue_stream_install(0, Cursor::new(source.clone()))
        .unwrap();
    assert_eq!(installer.queued_task_count(), 0);
    installer.install(4, &cancel).await.unwrap();
}

#[tokio::test]
async fn verification_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(1024, 1);
    let index = common::split_index(&source, 4);

    // Corrupt the third part only.
    let mut on_disk = source.clone();
    on_disk[600] ^= 0xff;
    common::seed_target(dir.path(), &on_disk);

    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(index);
    installer.attach_all_for_read(dir.path()).await.unwrap();

    installer.verify_files(&cancel).await.unwrap();
    let first = (
        installer.missing_parts(0),
        installer.missing_for_source(0),
        installer.size_mismatch_targets(),
    );
    assert_eq!(first.0, vec![2]);

    installer.verify_files(&cancel).await.unwrap();
    let second = (
        installer.missing_parts(0),
        installer.missing_for_source(0),
        installer.size_mismatch_targets(),
    );
    assert_eq!(first, second);
}

#[tokio::test]
async fn corruption_events_carry_part_and_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(512, 9);
    let index = common::split_index(&source, 2);

    // First part corrupt, second part cut off.
    let mut on_disk = source[..400].to_vec();
    on_disk[10] ^= 0x55;
    common::seed_target(dir.path(), &on_disk);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let events = {
        let seen = seen.clone();
        stitch_install::InstallEvents::new().on_corruption_found(move |t, p, outcome| {
            seen.lock().unwrap().push((t, p, outcome));
        })
    };

    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(index).with_events(events);
    installer.attach_all_for_read(dir.path()).await.unwrap();
    installer.verify_files(&cancel).await.unwrap();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_by_key(|&(t, p, _)| (t, p));
    assert_eq!(
        seen,
        vec![
            (0, 0, VerifyOutcome::Mismatch),
            (0, 1, VerifyOutcome::NotEnoughData),
        ]
    );
}

#[tokio::test]
async fn unverifiable_part_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = MemoryIndex::new("1.0.0");
    index.add_source(64);
    let mut target = MemoryTarget::new("game/data.bin", 64);
    target.push_unverifiable_part(0, 64, 0, 0);
    index.push_target(target);

    common::seed_target(dir.path(), &vec![0u8; 64]);

    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(Arc::new(index));
    installer.attach_all_for_read(dir.path()).await.unwrap();
    let err = installer.verify_files(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnverifiablePart { target: 0, part: 0 }
    ));
}

#[tokio::test]
async fn missing_file_rebuilt_from_index_data_alone() {
    // One 16-byte target made of a single non-patch part; no source
    // patches, no install tasks. The non-patch reconstructor does all the
    // work.
    let dir = tempfile::tempdir().unwrap();
    let bytes: Vec<u8> = (0u8..16).collect();

    let mut index = MemoryIndex::new("1.0.0");
    let mut target = MemoryTarget::new("game/data.bin", 16);
    target.push_literal_part(0, bytes.clone());
    index.push_target(target);

    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(Arc::new(index));
    installer.attach_all_for_read(dir.path()).await.unwrap();
    assert_eq!(installer.missing_parts(0), vec![0]);

    installer.attach_missing_for_write(dir.path()).await.unwrap();
    assert_eq!(installer.queued_task_count(), 0);
    installer.install(1, &cancel).await.unwrap();
    installer.detach_all().await;

    assert_eq!(common::read_target(dir.path()), bytes);
}

#[tokio::test]
async fn size_mismatch_reopens_target_even_when_parts_verify() {
    let dir = tempfile::tempdir().unwrap();
    let head = common::pattern(1000, 5);

    // The index expects 1024 bytes but only describes the first 1000.
    let mut index = MemoryIndex::new("1.0.0");
    index.add_source(1000);
    let mut target = MemoryTarget::new("game/data.bin", 1024);
    target.push_source_part(0, 0, 0, &head);
    index.push_target(target);

    common::seed_target(dir.path(), &head);

    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(Arc::new(index));
    installer.attach_all_for_read(dir.path()).await.unwrap();
    installer.verify_files(&cancel).await.unwrap();

    assert!(installer.missing_parts(0).is_empty());
    assert_eq!(installer.size_mismatch_targets(), vec![0]);

    installer.attach_missing_for_write(dir.path()).await.unwrap();
    installer.detach_all().await;
    let len = std::fs::metadata(dir.path().join("game/data.bin"))
        .unwrap()
        .len();
    assert_eq!(len, 1024);
}

#[tokio::test]
async fn cancellation_mid_install_leaves_no_partial_part() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(1536, 2);
    let index = common::split_index(&source, 3);
    common::seed_target(dir.path(), &vec![0u8; 1536]);

    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(index);
    installer.attach_all_for_read(dir.path()).await.unwrap();
    installer.verify_files(&cancel).await.unwrap();
    installer.attach_missing_for_write(dir.path()).await.unwrap();

    // A source that never produces a byte: reconstruction of part 1
    // blocks until cancellation.
    let (reader, _writer) = tokio::io::duplex(64);
    installer.queue_stream_install(0, reader).unwrap();

    let install_cancel = CancellationToken::new();
    let trigger = install_cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = installer.install(1, &install_cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    installer.detach_all().await;

    // Nothing was reconstructed, so the target is untouched.
    assert_eq!(common::read_target(dir.path()), vec![0u8; 1536]);
}

#[tokio::test]
async fn writes_version_sidecar_files() {
    let dir = tempfile::tempdir().unwrap();
    let index = common::split_index(&common::pattern(512, 0), 1);
    let installer = PatchInstaller::new(index);

    installer.write_version_files(dir.path()).await.unwrap();

    let version = "2024.03.21.0000.0001";
    assert_eq!(
        std::fs::read_to_string(dir.path().join(format!("{version}.ver"))).unwrap(),
        version
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join(format!("{version}.bck"))).unwrap(),
        version
    );
}
