//! End-to-end tests for SpotterPipeline

mod common;

use common::{config_in, frame, FailingBackend, FirstByteBackend, FixedProbe};
use sharkspot_core::{AdmissionPolicy, Size};
use sharkspot_eye::recording::read_raw_video_index;
use sharkspot_eye::{
    DirectoryLibrary, OverlayRenderer, OverlayScene, PredictionStore, RawVideoSinkFactory, ReplaySource,
    SpotterPipeline, VisionError,
};
use std::sync::Arc;
use std::time::Duration;

fn pipeline(config: sharkspot_core::SpotterConfig) -> SpotterPipeline {
    let library = Arc::new(DirectoryLibrary::new(config.recording.library_dir.clone()));
    SpotterPipeline::new(
        config,
        &FirstByteBackend,
        Arc::new(RawVideoSinkFactory),
        library,
        Arc::new(FixedProbe::default()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_three_target_frames_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_in(dir.path()));

    let info = pipeline.start_recording().unwrap();
    for sequence in 1..=3 {
        let batch = pipeline.process_frame(&frame(sequence, true)).unwrap();
        assert!(batch.contains_target());
    }
    let summary = pipeline.stop_recording().await.unwrap();

    assert_eq!(summary.frames_admitted, 3);
    assert_eq!(summary.predictions_dir, info.predictions_dir);

    let persisted = PredictionStore::load_session(&summary.predictions_dir).unwrap();
    assert_eq!(persisted.len(), 3);
    assert!(persisted.iter().all(|frame| frame[0].identifier == "shark"));

    // Sink finalized: the artifact is complete and readable
    let index = read_raw_video_index(&info.output_path).unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(index.iter().map(|h| h.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(summary.library_item.exists());
    assert!(!pipeline.is_recording());
}

#[tokio::test]
async fn test_non_target_frames_are_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_in(dir.path()));

    pipeline.start_recording().unwrap();
    pipeline.process_frame(&frame(1, false));
    pipeline.process_frame(&frame(2, true));
    pipeline.process_frame(&frame(3, false));
    let summary = pipeline.stop_recording().await.unwrap();

    assert_eq!(summary.frames_admitted, 1);
    assert_eq!(PredictionStore::load_session(&summary.predictions_dir).unwrap().len(), 1);
}

#[tokio::test]
async fn test_while_recording_policy_keeps_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.recording.admission = AdmissionPolicy::WhileRecording;
    let pipeline = pipeline(config);

    pipeline.start_recording().unwrap();
    pipeline.process_frame(&frame(1, false));
    pipeline.process_frame(&frame(2, true));
    let summary = pipeline.stop_recording().await.unwrap();

    assert_eq!(summary.frames_admitted, 2);
    assert_eq!(summary.duration, pipeline.config().recording.frame_duration() * 2);
}

#[tokio::test]
async fn test_sessions_get_separate_prediction_folders() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_in(dir.path()));

    let mut folders = Vec::new();
    for _ in 0..3 {
        pipeline.start_recording().unwrap();
        pipeline.process_frame(&frame(1, true));
        folders.push(pipeline.stop_recording().await.unwrap().predictions_dir);
    }

    let names: Vec<_> = folders
        .iter()
        .map(|path| path.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Predictions", "Predictions_1", "Predictions_2"]);
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_in(dir.path()));

    pipeline.start_recording().unwrap();
    assert!(matches!(
        pipeline.start_recording(),
        Err(VisionError::InvalidTransition { .. })
    ));
    assert!(pipeline.is_recording());
    pipeline.stop_recording().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_stream() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_in(dir.path()));

    let mut broken = frame(1, true);
    broken.data = broken.data.slice(0..10);
    assert!(pipeline.process_frame(&broken).is_none());
    assert!(pipeline.process_frame(&frame(2, true)).is_some());

    let status = pipeline.status();
    assert_eq!(status.frames_skipped, 1);
    assert_eq!(status.frames_inferred, 1);
    assert!(status.target_in_view);
    assert!(!status.recording);
}

#[test]
fn test_model_load_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let result = SpotterPipeline::new(
        config.clone(),
        &FailingBackend,
        Arc::new(RawVideoSinkFactory),
        Arc::new(DirectoryLibrary::new(config.recording.library_dir.clone())),
        Arc::new(FixedProbe::default()),
    );
    assert!(matches!(result, Err(VisionError::Model(_))));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.metrics.sampling_interval_ms = 0;
    let result = SpotterPipeline::new(
        config,
        &FirstByteBackend,
        Arc::new(RawVideoSinkFactory),
        Arc::new(DirectoryLibrary::new(dir.path())),
        Arc::new(FixedProbe::default()),
    );
    assert!(matches!(result, Err(VisionError::Config(_))));
}

#[tokio::test]
async fn test_detections_are_broadcast_for_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_in(dir.path()));
    let mut detections = pipeline.subscribe_detections();

    pipeline.process_frame(&frame(7, true));
    let batch = detections.recv().await.unwrap();
    assert_eq!(batch.frame_sequence, 7);

    let mapper = pipeline.mapper_for(Size::new(390.0, 844.0)).unwrap();
    let mut scene = OverlayScene::new();
    let mut renderer = OverlayRenderer::new();
    let boxes = renderer.render(&mut scene, &batch, &mapper);

    assert_eq!(boxes.len(), 1);
    assert_eq!(scene.label_texts(), vec!["shark (0.87)"]);
    // Bottom-left box spanning 0.3..0.5 from the bottom starts at the midline
    assert!((boxes[0].rect().y() - 422.0).abs() < 1e-9);
    assert!((boxes[0].rect().height() - 168.8).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attached_source_is_processed_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.recording.admission = AdmissionPolicy::WhileRecording;
    let pipeline = pipeline(config);

    let frames: Vec<_> = (1..=20).map(|i| frame(i, i % 2 == 0)).collect();
    let mut source = ReplaySource::new(frames, Duration::from_millis(5));

    pipeline.start_recording().unwrap();
    let worker = pipeline.attach(&mut source).unwrap();
    source.finished().await;
    worker.await.unwrap();
    let summary = pipeline.stop_recording().await.unwrap();

    let index = read_raw_video_index(&pipeline.config().recording.output_path).unwrap();
    assert!(!index.is_empty());
    assert!(index.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    assert_eq!(index.len() as u64, summary.frames_admitted);
    assert_eq!(pipeline.status().frames_inferred, summary.frames_admitted);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_published_while_recording() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_in(dir.path()));
    let mut metrics = pipeline.subscribe_metrics();

    pipeline.start_recording().unwrap();
    for i in 0..12 {
        pipeline.process_frame(&frame(i, true));
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(metrics.has_changed().unwrap());
    let snapshot = metrics.borrow_and_update().clone();
    assert_eq!(snapshot.frames_per_second, 12.0);
    assert!((snapshot.cpu_utilization - 0.5).abs() < 1e-12);
    assert_eq!(snapshot.resident_memory_bytes, 64 * 1024 * 1024);
    assert_eq!(pipeline.status().metrics, snapshot);

    pipeline.stop_recording().await.unwrap();
}
