//! Print the frame index of a raw recording and the predictions of a session folder

use sharkspot_eye::error::VisionError;
use sharkspot_eye::recording::read_raw_video_index;
use sharkspot_eye::PredictionStore;
use std::env;
use std::path::Path;

fn main() -> Result<(), VisionError> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: inspect_recording <recording.ssrv> [predictions_dir]");
        std::process::exit(1);
    }

    let index = read_raw_video_index(Path::new(&args[1]))?;
    println!("{} frames in {}", index.len(), args[1]);
    for header in &index {
        println!(
            "  #{:<6} pts {:>10.3}s  {}x{} {}  {} bytes",
            header.sequence,
            header.presentation_time.as_secs_f64(),
            header.width,
            header.height,
            header.format,
            header.payload_len
        );
    }

    if let Some(dir) = args.get(2) {
        let frames = PredictionStore::load_session(Path::new(dir))?;
        let detections: usize = frames.iter().map(Vec::len).sum();
        println!("{} prediction frames, {} detections in {}", frames.len(), detections, dir);
        for (i, records) in frames.iter().enumerate() {
            let labels: Vec<String> = records
                .iter()
                .map(|r| format!("{} ({})", r.identifier, r.confidence))
                .collect();
            println!("  [{}] {}", i, labels.join(", "));
        }
    }

    Ok(())
}
