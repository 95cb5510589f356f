//! End-to-end scenarios against a mock HTTP source.

mod common;

use std::sync::Arc;

use stitch_index::mem::{MemoryIndex, MemoryTarget};
use stitch_index::PatchIndex;
use stitch_install::{Error, PatchInstaller};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOURCE_PATH: &str = "/patch/base.patch";

fn multipart_body(boundary: &str, parts: &[(u64, &[u8])], total: u64) -> Vec<u8> {
    let mut body = Vec::new();
    for (start, data) in parts {
        body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        body.extend_from_slice(
            format!(
                "Content-Range: bytes {}-{}/{}\r\n\r\n",
                start,
                start + data.len() as u64 - 1,
                total
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
    }
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn single_range_response(source: &[u8], start: u64, end: u64) -> ResponseTemplate {
    ResponseTemplate::new(206)
        .insert_header(
            "Content-Range",
            format!("bytes {}-{}/{}", start, end - 1, source.len()).as_str(),
        )
        .set_body_raw(
            source[start as usize..end as usize].to_vec(),
            "application/octet-stream",
        )
}

async fn verified_installer(
    dir: &std::path::Path,
    index: Arc<dyn PatchIndex>,
    on_disk: &[u8],
) -> PatchInstaller {
    common::seed_target(dir, on_disk);
    let cancel = CancellationToken::new();
    let mut installer = PatchInstaller::new(index);
    installer.attach_all_for_read(dir).await.unwrap();
    installer.verify_files(&cancel).await.unwrap();
    installer.attach_missing_for_write(dir).await.unwrap();
    installer
}

#[tokio::test]
async fn adjacent_parts_coalesce_into_one_range_request() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(1024, 11);
    let index = common::split_index(&source, 2);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .and(header("Range", "bytes=0-1023"))
        .respond_with(single_range_response(&source, 0, 1024))
        .expect(1)
        .mount(&server)
        .await;

    let mut installer = verified_installer(dir.path(), index, &vec![0u8; 1024]).await;
    let parts = installer.missing_for_source(0);
    installer
        .queue_http_install_parts(0, format!("{}{SOURCE_PATH}", server.uri()), None, parts)
        .unwrap();
    assert_eq!(installer.queued_task_count(), 1);

    let cancel = CancellationToken::new();
    installer.install(2, &cancel).await.unwrap();
    installer.detach_all().await;

    assert_eq!(common::read_target(dir.path()), source);
}

#[tokio::test]
async fn distant_parts_arrive_as_multipart_byteranges() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(4096, 13);

    // Target of 200 bytes assembled from two distant source regions.
    let mut index = MemoryIndex::new("1.0.0");
    index.add_source(4096);
    let mut target = MemoryTarget::new("game/data.bin", 200);
    target.push_source_part(0, 0, 0, &source[..100]);
    target.push_source_part(100, 0, 2000, &source[2000..2100]);
    index.push_target(target);
    let index: Arc<dyn PatchIndex> = Arc::new(index);

    let boundary = "3d6b6a416f9b5";
    let body = multipart_body(boundary, &[(0, &source[..100]), (2000, &source[2000..2100])], 4096);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .and(header("Range", "bytes=0-99, 2000-2099"))
        .and(header("X-Patch-Unique-Id", "sess-1"))
        .respond_with(ResponseTemplate::new(206).set_body_raw(
            body,
            &format!("multipart/byteranges; boundary={boundary}"),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut installer = verified_installer(dir.path(), index, &vec![0u8; 200]).await;
    let parts = installer.missing_for_source(0);
    installer
        .queue_http_install_parts(
            0,
            format!("{}{SOURCE_PATH}", server.uri()),
            Some("sess-1"),
            parts,
        )
        .unwrap();

    let cancel = CancellationToken::new();
    installer.install(1, &cancel).await.unwrap();
    installer.detach_all().await;

    let mut expected = source[..100].to_vec();
    expected.extend_from_slice(&source[2000..2100]);
    assert_eq!(common::read_target(dir.path()), expected);
}

#[tokio::test]
async fn split_by_distributes_parts_across_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(1536, 17);
    let index = common::split_index(&source, 3);

    let server = MockServer::start().await;
    // Three tasks of one part each, one ranged request per task.
    for start in [0u64, 512, 1024] {
        Mock::given(method("GET"))
            .and(path(SOURCE_PATH))
            .and(header("Range", format!("bytes={}-{}", start, start + 511).as_str()))
            .respond_with(single_range_response(&source, start, start + 512))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut installer = verified_installer(dir.path(), index, &vec![0u8; 1536]).await;
    installer
        .queue_http_install(0, format!("{}{SOURCE_PATH}", server.uri()), None)
        .unwrap();
    assert_eq!(installer.queued_task_count(), 3);

    let cancel = CancellationToken::new();
    installer.install(3, &cancel).await.unwrap();
    installer.detach_all().await;

    assert_eq!(common::read_target(dir.path()), source);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_backoff_and_no_progress_double_count() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(1024, 19);
    let index = common::split_index(&source, 2);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .respond_with(single_range_response(&source, 0, 1024))
        .expect(1)
        .mount(&server)
        .await;

    let mut installer = verified_installer(dir.path(), index, &vec![0u8; 1024]).await;
    let parts = installer.missing_for_source(0);
    installer
        .queue_http_install_parts(0, format!("{}{SOURCE_PATH}", server.uri()), None, parts)
        .unwrap();

    let cancel = CancellationToken::new();
    installer.install(1, &cancel).await.unwrap();
    installer.detach_all().await;

    assert_eq!(common::read_target(dir.path()), source);
    // Retries never re-add part sizes to the aggregate.
    assert_eq!(installer.install_progress(), (1024, 1024));
}

#[tokio::test(start_paused = true)]
async fn permanently_failing_source_stops_after_eight_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let source = common::pattern(512, 23);
    let index = common::split_index(&source, 1);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(8)
        .mount(&server)
        .await;

    let mut installer = verified_installer(dir.path(), index, &vec![0u8; 512]).await;
    let parts = installer.missing_for_source(0);
    installer
        .queue_http_install_parts(0, format!("{}{SOURCE_PATH}", server.uri()), None, parts)
        .unwrap();

    let cancel = CancellationToken::new();
    let err = installer.install(1, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ExhaustedRetries {
            source: 0,
            attempts: 8,
            ..
        }
    ));
}
