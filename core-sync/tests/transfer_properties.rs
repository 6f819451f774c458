//! Batch and atomicity behaviour of the transfer pipeline against the
//! in-memory virtual device.

use bridge_desktop::{TokioFileSystem, VirtualDevice, VirtualDeviceAssistant};
use bridge_traits::device::{ConnectionAssistant, FileType, NativeTrack};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_async::worker::WorkerPool;
use core_device::{DeviceSession, SessionOptions};
use core_library::{HostTrack, LibraryBridge};
use core_runtime::events::{CoreEvent, EventBus, JobOutcome, TransferEvent};
use core_sync::{ItemOutcome, PipelineSettings, StagingArea, TransferPipeline, TransferStatus};
use std::sync::Arc;
use tempfile::TempDir;

fn song(title: &str) -> NativeTrack {
    NativeTrack {
        title: Some(title.into()),
        artist: Some("Foo".into()),
        album: Some("Bar".into()),
        file_type: FileType::Mp3,
        filename: format!("{}.mp3", title),
        ..Default::default()
    }
}

async fn pipeline(device: &VirtualDevice, tmp: &TempDir, events: EventBus) -> TransferPipeline {
    let raw = device.raw().await;
    let descriptor = VirtualDeviceAssistant.describe(&raw).unwrap();
    let session = Arc::new(DeviceSession::new(descriptor, Box::new(device.driver())));
    session.open(&SessionOptions::default()).await.unwrap();

    let library = Arc::new(LibraryBridge::new(session));
    library.rescan().await.unwrap();

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::with_directories(
        tmp.path().join("cache"),
        tmp.path().join("data"),
    ));
    let staging = Arc::new(StagingArea::new(Arc::clone(&fs), None).await.unwrap());
    TransferPipeline::new(
        library,
        staging,
        fs,
        WorkerPool::new("transfers", 2),
        events,
        PipelineSettings::default(),
    )
}

#[core_async::test]
async fn copy_out_isolates_a_failing_item() {
    let device = VirtualDevice::new("usb:001,007");
    let mut ids = Vec::new();
    for n in 1..=5 {
        let id = device
            .seed_track(&["Music"], song(&format!("Song {}", n)), Bytes::from(vec![n as u8; 16]))
            .await;
        ids.push(id);
    }
    device.fail_get(ids[2]).await;

    let tmp = tempfile::tempdir().unwrap();
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let pipeline = pipeline(&device, &tmp, events).await;

    let mut keys = Vec::new();
    for id in &ids {
        keys.push(pipeline.session().key_of(*id).await.unwrap());
    }

    let job = pipeline.copy_out(keys).await.wait().await.unwrap();

    assert_eq!(job.status, TransferStatus::Done);
    assert_eq!(job.results.len(), 5);
    assert_eq!(job.failed_indices(), vec![2]);
    for index in [0, 1, 3, 4] {
        let result = job.result(index).unwrap();
        assert_eq!(result.outcome, ItemOutcome::Succeeded);
        assert!(result.local_path.as_ref().unwrap().exists());
    }
    assert_eq!(
        job.outcome(),
        Some(JobOutcome::Done {
            succeeded: 4,
            failed: 1,
            rejected_fields: 0
        })
    );

    let mut item_failures = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Transfer(TransferEvent::ItemFailed { item_index, .. }) = event {
            item_failures.push(item_index);
        }
    }
    assert_eq!(item_failures, vec![2]);
}

#[core_async::test]
async fn failed_copy_in_leaves_nothing_registered() {
    let device = VirtualDevice::new("usb:001,008");
    device
        .seed_track(&["Music", "Foo", "Bar"], song("Song A"), Bytes::from_static(b"a"))
        .await;
    device.fail_nth_send(1).await;

    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&device, &tmp, EventBus::new(16)).await;

    let source = tmp.path().join("song-b.mp3");
    std::fs::write(&source, vec![7u8; 256]).unwrap();
    let track = HostTrack::new("Song B")
        .with_artist("Foo")
        .with_album("Bar")
        .with_local_path(source);
    let host_id = track.id;

    let job = pipeline.copy_in(vec![track]).await.wait().await.unwrap();

    assert_eq!(job.status, TransferStatus::Failed);
    assert!(job.failure_reason().unwrap().contains("transfer aborted"));

    let library = pipeline.library();
    assert!(library.native_key(host_id).await.is_none());
    assert_eq!(library.identity_count().await, 1);
    assert_eq!(pipeline.session().track_count().await, 1);

    // A fresh enumeration does not see the discarded shell either.
    library.rescan().await.unwrap();
    assert_eq!(library.track_count().await, 1);
    assert_eq!(device.track_count().await, 1);
}
