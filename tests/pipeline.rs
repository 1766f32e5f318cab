//! End-to-end pipeline tests: remote origin -> partitioned file -> local
//! range server and growing-file upload through an invoker pool.

mod common;

use common::{CollectingSink, RangeResponder, random_bytes, reassemble, sha256};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tentacle::{
    ChunkDownloadEngine, CompletionSignal, Config, Event, HttpRangeSource, InvokerPool,
    PartialContentServer, ServeMode, SourceDescriptor, StreamUploader, UploadPart,
};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer};

const PIPELINE_CONFIG: &str = r#"{
    "download": { "concurrency": 3, "part_timeout": 5000 },
    "retry": { "initial_delay": 1, "max_delay": 1 },
    "stream": { "chunk_size": 65536, "poll_interval": 1, "upload_concurrency": 3 },
    "server": { "bind_address": "127.0.0.1:0", "mode": "availability_gated", "poll_interval": 1 }
}"#;

async fn origin(data: &[u8]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(path("/movie.mp4"))
        .respond_with(RangeResponder {
            data: data.to_vec(),
        })
        .mount(&server)
        .await;
    server
}

fn http_source(origin: &MockServer, hint: i64) -> Arc<HttpRangeSource> {
    let descriptor = SourceDescriptor::from_json(
        &serde_json::json!({
            "url": format!("{}/movie.mp4", origin.uri()),
            "headers": { "Referer": "https://example.com/" },
            "chunk_size_hint": hint,
        })
        .to_string(),
    )
    .unwrap();
    Arc::new(HttpRangeSource::new(reqwest::Client::new(), &descriptor).unwrap())
}

#[tokio::test]
async fn gated_server_streams_file_while_it_downloads() {
    let data = random_bytes(1_500_000, 7);
    let origin = origin(&data).await;
    let config = Config::from_json(PIPELINE_CONFIG).unwrap();
    let engine = ChunkDownloadEngine::new(config.clone());
    let cancel = CancellationToken::new();
    let dir = TempDir::new().unwrap();

    let source = http_source(&origin, 100_003);
    let file = Arc::new(
        engine
            .prepare(&*source, dir.path().join("movie.mp4"), &cancel)
            .await
            .unwrap(),
    );
    assert_eq!(file.parts().len(), 15);

    let server = PartialContentServer::new(config.server.clone());
    server.register("movie.mp4", Arc::clone(&file)).await.unwrap();
    let listener = server.bind().await.unwrap();
    let address = listener.local_addr().unwrap();
    let serving = {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { server.serve(listener, cancel).await })
    };

    // Ask for the tail before the download starts
    let reader = tokio::spawn(async move {
        let response = reqwest::Client::new()
            .get(format!("http://{address}/movie.mp4"))
            .header("Range", "bytes=1000000-")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 206);
        response.bytes().await.unwrap().to_vec()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(file.available_bytes(), 0);

    engine
        .download_parts(source, &file, &cancel)
        .await
        .unwrap();
    assert!(file.is_complete());

    let tail = tokio::time::timeout(Duration::from_secs(10), reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sha256(&tail), sha256(&data[1_000_000..]));
    assert_eq!(
        sha256(&std::fs::read(file.path()).unwrap()),
        sha256(&data)
    );

    cancel.cancel();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn growing_file_uploads_through_pool() {
    let data = random_bytes(1_000_000, 11);
    let config = Config::from_json(PIPELINE_CONFIG).unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("encoded.mp4");
    tokio::fs::File::create(&path).await.unwrap();

    let sinks: Vec<Arc<CollectingSink>> = (0..3).map(|_| CollectingSink::new()).collect();
    let pool: InvokerPool<UploadPart, ()> = InvokerPool::new();
    for sink in &sinks {
        pool.add(sink.clone());
    }

    let done = CompletionSignal::new();
    let writer = {
        let path = path.clone();
        let data = data.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut out = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .unwrap();
            // Odd-sized appends, like an encoder flushing its buffers
            for block in data.chunks(77_777) {
                out.write_all(block).await.unwrap();
                out.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            done.fire();
        })
    };

    let (event_tx, mut events) = tokio::sync::broadcast::channel(256);
    let summary = StreamUploader::new(Arc::new(pool), config.stream.clone())
        .with_events(event_tx)
        .upload_growing_file(99, &path, &done, &CancellationToken::new())
        .await
        .unwrap();
    writer.await.unwrap();

    let expected_parts = data.len().div_ceil(65_536) as u64;
    assert_eq!(summary.parts, expected_parts);
    assert_eq!(summary.bytes, data.len() as u64);

    let (bytes, parts) = reassemble(&sinks);
    assert_eq!(sha256(&bytes), sha256(&data));
    for (i, part) in parts.iter().enumerate() {
        assert_eq!(part.part_index, i as u64);
        assert_eq!(part.file_id, 99);
        let is_last = i as u64 == expected_parts - 1;
        assert_eq!(part.total_parts.is_some(), is_last);
        if !is_last {
            assert_eq!(part.bytes.len(), 65_536);
        }
    }
    assert_eq!(parts.last().unwrap().total_parts, Some(expected_parts));

    // Strict rotation spreads parts evenly across the pool
    for sink in &sinks {
        let count = sink.count() as u64;
        assert!(count == expected_parts / 3 || count == expected_parts / 3 + 1);
    }

    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        if let Event::UploadComplete { parts, .. } = event {
            assert_eq!(parts, expected_parts);
            completed = true;
        }
    }
    assert!(completed);
}

#[tokio::test]
async fn downloaded_file_feeds_uploader() {
    let data = random_bytes(300_000, 3);
    let origin = origin(&data).await;
    let mut config = Config::from_json(PIPELINE_CONFIG).unwrap();
    config.server.mode = ServeMode::Direct;
    let engine = ChunkDownloadEngine::new(config.clone());
    let mut downloads = engine.subscribe();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let file = engine
        .download(http_source(&origin, 0), dir.path().join("movie.mp4"), &cancel)
        .await
        .unwrap();
    assert_eq!(file.parts().len(), 1);
    assert!(matches!(
        downloads.try_recv(),
        Ok(Event::PartDownloaded { actual_size: 300_000, .. })
    ));

    let sink = CollectingSink::new();
    let done = CompletionSignal::new();
    done.fire();
    let summary = StreamUploader::new(sink.clone(), config.stream.clone())
        .upload_growing_file(1, file.path(), &done, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.bytes, 300_000);
    let (bytes, _) = reassemble(&[sink]);
    assert_eq!(sha256(&bytes), sha256(&data));
}
