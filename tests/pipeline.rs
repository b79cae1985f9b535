mod common;

use std::{fs, sync::Arc};

use common::{FailingArchive, RecordingArchive, TestServer, fetcher};
use hls_squirrel::{
    error::{JobError, ManifestError},
    hls::{BaseResolution, ManifestContext, download_bundle},
    job::{JobRunner, JobSpec, JobStatus},
};
use indicatif::ProgressBar;
use indoc::indoc;
use tokio_util::sync::CancellationToken;

const MASTER: &str = indoc! {"
    #EXTM3U
    #EXT-X-STREAM-INF:BANDWIDTH=800000
    low.m3u8
    #EXT-X-STREAM-INF:BANDWIDTH=3000000
    high.m3u8
"};

const HIGH: &str = indoc! {"
    #EXTM3U
    #EXTINF:10,
    seg0.ts
    #EXTINF:10,
    seg1.ts
"};

const REWRITTEN: &str = indoc! {"
    #EXTM3U
    #EXTINF:10,
    ts_files/seg0.ts
    #EXTINF:10,
    ts_files/seg1.ts
"};

async fn vod_server() -> TestServer {
    TestServer::serving(&[
        ("/vod/master.m3u8", MASTER),
        ("/vod/high.m3u8", HIGH),
        ("/vod/seg0.ts", "SEGMENT-0"),
        ("/vod/seg1.ts", "SEGMENT-1"),
    ])
    .await
}

#[tokio::test]
async fn collapses_master_and_downloads_segments() {
    let server = vod_server().await;
    let dir = tempfile::tempdir().unwrap();
    let context = ManifestContext::new(server.url("/vod/master.m3u8"), dir.path());

    let bundle = download_bundle(&fetcher(), &context, &ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(bundle.variant_url, server.url("/vod/high.m3u8"));
    assert_eq!(bundle.segments, vec!["seg0.ts", "seg1.ts"]);
    assert_eq!(bundle.segment_bytes, 18);
    assert_eq!(
        fs::read_to_string(dir.path().join("master.m3u8")).unwrap(),
        REWRITTEN
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("ts_files/seg0.ts")).unwrap(),
        "SEGMENT-0"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("ts_files/seg1.ts")).unwrap(),
        "SEGMENT-1"
    );
    // master, high variant, two segments; low.m3u8 never requested
    assert_eq!(server.hits(), 4);
}

#[tokio::test]
async fn master_without_variants_stops_before_any_variant_fetch() {
    let server = TestServer::serving(&[("/vod/master.m3u8", HIGH)]).await;
    let dir = tempfile::tempdir().unwrap();
    let context = ManifestContext::new(server.url("/vod/master.m3u8"), dir.path());

    let err = download_bundle(&fetcher(), &context, &ProgressBar::hidden())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Manifest(ManifestError::NoVariant)));
    assert_eq!(server.hits(), 1);
    assert!(!dir.path().join("ts_files").exists());
}

#[tokio::test]
async fn variant_without_segments_fails() {
    let server = TestServer::serving(&[
        ("/vod/master.m3u8", MASTER),
        ("/vod/high.m3u8", "#EXTM3U\n#EXT-X-ENDLIST\n"),
    ])
    .await;
    let dir = tempfile::tempdir().unwrap();
    let context = ManifestContext::new(server.url("/vod/master.m3u8"), dir.path());

    let err = download_bundle(&fetcher(), &context, &ProgressBar::hidden())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Manifest(ManifestError::NoSegments)));
}

#[tokio::test]
async fn archived_job_removes_local_directory() {
    let server = vod_server().await;
    let root = tempfile::tempdir().unwrap();
    let archive = Arc::new(RecordingArchive::default());
    let runner = JobRunner::new(fetcher(), archive.clone(), root.path());
    let spec = JobSpec::new("1", "My Video", server.url("/vod/master.m3u8"));

    let result = runner
        .run(spec.clone(), &ProgressBar::hidden(), &CancellationToken::new())
        .await;

    assert_eq!(result.status(), JobStatus::Success);
    assert_eq!(result.storage_status(), JobStatus::Success);
    assert_eq!(result.error(), None);
    assert!(!root.path().join("1__My_Video").exists());

    let uploads = archive.uploads();
    assert_eq!(uploads.len(), 1);
    let (local, prefix, files) = &uploads[0];
    assert_eq!(local, &root.path().join("1__My_Video"));
    assert_eq!(prefix, "1__My_Video");
    assert_eq!(
        files,
        &vec!["master.m3u8", "ts_files/seg0.ts", "ts_files/seg1.ts"]
    );
}

#[tokio::test]
async fn failed_upload_keeps_local_directory() {
    let server = vod_server().await;
    let root = tempfile::tempdir().unwrap();
    let runner = JobRunner::new(fetcher(), Arc::new(FailingArchive), root.path());
    let spec = JobSpec::new("2", "Kept", server.url("/vod/master.m3u8"));

    let result = runner
        .run(spec, &ProgressBar::hidden(), &CancellationToken::new())
        .await;

    assert_eq!(result.status(), JobStatus::Success);
    assert_eq!(result.storage_status(), JobStatus::Failed);
    let local = root.path().join("2__Kept");
    assert_eq!(
        fs::read_to_string(local.join("master.m3u8")).unwrap(),
        REWRITTEN
    );
    assert!(local.join("ts_files/seg0.ts").is_file());
    assert!(local.join("ts_files/seg1.ts").is_file());
}

#[tokio::test]
async fn keep_local_skips_cleanup_after_upload() {
    let server = vod_server().await;
    let root = tempfile::tempdir().unwrap();
    let runner = JobRunner::new(fetcher(), Arc::new(RecordingArchive::default()), root.path())
        .with_keep_local(true);

    let result = runner
        .run(
            JobSpec::new("3", "x", server.url("/vod/master.m3u8")),
            &ProgressBar::hidden(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.storage_status(), JobStatus::Success);
    assert!(root.path().join("3__x/master.m3u8").is_file());
}

#[tokio::test]
async fn missing_segment_fails_the_whole_job() {
    let server = TestServer::serving(&[
        ("/vod/master.m3u8", MASTER),
        ("/vod/high.m3u8", HIGH),
        ("/vod/seg0.ts", "SEGMENT-0"),
    ])
    .await;
    let root = tempfile::tempdir().unwrap();
    let archive = Arc::new(RecordingArchive::default());
    let runner = JobRunner::new(fetcher(), archive.clone(), root.path());
    let url = server.url("/vod/master.m3u8");

    let result = runner
        .run(
            JobSpec::new("4", "broken", url.clone()),
            &ProgressBar::hidden(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status(), JobStatus::Failed);
    assert_eq!(result.storage_status(), JobStatus::Failed);
    let error = result.error().unwrap();
    assert!(error.starts_with(&format!("Error processing URL {url}")));
    assert!(error.contains("seg1.ts"));
    assert!(error.contains("404"));
    assert!(archive.uploads().is_empty());
    assert!(root.path().join("4__broken/ts_files/seg0.ts").is_file());
}

#[tokio::test]
async fn invalid_url_never_reaches_the_network() {
    let server = vod_server().await;
    let root = tempfile::tempdir().unwrap();
    let runner = JobRunner::new(fetcher(), Arc::new(RecordingArchive::default()), root.path());
    let url = server.url("/vod/master.m3u8").replace("http://", "ftp://");

    let result = runner
        .run(
            JobSpec::new("5", "bad", url.clone()),
            &ProgressBar::hidden(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status(), JobStatus::Failed);
    assert!(result.error().unwrap().contains(&url));
    assert_eq!(server.hits(), 0);
}

const NESTED_MASTER: &str = indoc! {"
    #EXTM3U
    #EXT-X-STREAM-INF:BANDWIDTH=1000,RESOLUTION=640x360
    360p/index.m3u8
    #EXT-X-STREAM-INF:BANDWIDTH=5000,RESOLUTION=1280x720
    720p/index.m3u8
"};

const NESTED_VARIANT: &str = indoc! {"
    #EXTM3U
    #EXT-X-TARGETDURATION:6
    #EXTINF:6.0,
    part0.ts
    #EXT-X-ENDLIST
"};

async fn nested_server() -> TestServer {
    TestServer::serving(&[
        ("/vod/master.m3u8", NESTED_MASTER),
        ("/vod/720p/index.m3u8", NESTED_VARIANT),
        ("/vod/720p/part0.ts", "PART-0"),
    ])
    .await
}

#[tokio::test]
async fn source_directory_resolution_misses_nested_segments() {
    let server = nested_server().await;
    let dir = tempfile::tempdir().unwrap();
    let context = ManifestContext::new(server.url("/vod/master.m3u8"), dir.path());

    let err = download_bundle(&fetcher(), &context, &ProgressBar::hidden())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("/vod/part0.ts"));
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn enclosing_playlist_resolution_follows_nested_segments() {
    let server = nested_server().await;
    let dir = tempfile::tempdir().unwrap();
    let context = ManifestContext::new(server.url("/vod/master.m3u8"), dir.path())
        .with_resolution(BaseResolution::EnclosingPlaylist);

    let bundle = download_bundle(&fetcher(), &context, &ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(bundle.variant_url, server.url("/vod/720p/index.m3u8"));
    assert_eq!(
        fs::read_to_string(dir.path().join("master.m3u8")).unwrap(),
        indoc! {"
            #EXTM3U
            #EXT-X-TARGETDURATION:6
            #EXTINF:6.0,
            ts_files/part0.ts
            #EXT-X-ENDLIST
        "}
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("ts_files/part0.ts")).unwrap(),
        "PART-0"
    );
}

#[tokio::test]
async fn row_id_cannot_move_the_job_outside_the_output_root() {
    let server = vod_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let archive = Arc::new(RecordingArchive::default());
    let runner = JobRunner::new(fetcher(), archive.clone(), &root).with_keep_local(true);
    let absolute_id = tmp.path().join("outside").display().to_string();

    for id in [absolute_id.as_str(), "../outside"] {
        let spec = JobSpec::new(id, "t", server.url("/vod/master.m3u8"));
        let local = runner.local_directory(&spec);
        assert_eq!(local.parent(), Some(root.as_path()));

        let result = runner
            .run(spec, &ProgressBar::hidden(), &CancellationToken::new())
            .await;

        assert_eq!(result.status(), JobStatus::Success);
        assert!(local.join("master.m3u8").is_file());
    }

    assert!(!tmp.path().join("outside__t").exists());
    assert!(!tmp.path().join("outside").exists());
    for (local, prefix, _) in archive.uploads() {
        assert_eq!(local.parent(), Some(root.as_path()));
        assert!(!prefix.contains('/'), "key prefix {prefix} is not a single component");
    }
}
