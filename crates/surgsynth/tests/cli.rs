use assert_cmd::Command;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use predicates::prelude::*;
use std::fs;

fn surgsynth() -> Command {
    Command::cargo_bin("surgsynth").unwrap()
}

#[test]
fn composite_writes_into_default_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("renders");
    let backgrounds = dir.path().join("bgs");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&backgrounds).unwrap();
    for i in 0..3 {
        RgbaImage::from_pixel(16, 12, Rgba([200, 0, 0, 255]))
            .save(images.join(format!("{i:06}.png")))
            .unwrap();
    }
    RgbImage::from_pixel(40, 30, Rgb([0, 0, 200]))
        .save(backgrounds.join("room.png"))
        .unwrap();

    surgsynth()
        .args(["--log-level", "warn", "composite", "--seed", "7"])
        .arg("--images")
        .arg(&images)
        .arg("--backgrounds")
        .arg(&backgrounds)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote 3 composites"));

    for i in 0..3 {
        let out = image::open(images.join(format!("output/{i:06}.png"))).unwrap();
        assert_eq!((out.width(), out.height()), (16, 12));
    }
}

#[test]
fn overlay_image_without_predictions_keeps_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("frame.png");
    let output = dir.path().join("overlay.png");
    let predictions = dir.path().join("predictions.json");
    let frame = RgbImage::from_fn(20, 10, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 7]));
    frame.save(&input).unwrap();
    fs::write(&predictions, r#"{ "frames": [ { "detections": [] } ] }"#).unwrap();

    surgsynth()
        .args(["overlay", "image"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--predictions")
        .arg(&predictions)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 detections"));

    assert_eq!(image::open(&output).unwrap().to_rgb8(), frame);
}

#[test]
fn render_with_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    surgsynth()
        .arg("render")
        .arg("--config")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.json"));
}

#[cfg(not(feature = "tracing"))]
#[test]
fn unknown_log_level_is_rejected() {
    surgsynth()
        .args(["--log-level", "chatty", "overlay", "image"])
        .args(["--input", "a.png", "--output", "b.png", "--predictions", "p.json"])
        .assert()
        .failure();
}

#[test]
fn overlay_video_reads_a_frame_directory() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("frames");
    fs::create_dir_all(&frames).unwrap();
    for i in 0..2u8 {
        RgbImage::from_pixel(12, 8, Rgb([i * 50, 10, 10]))
            .save(frames.join(format!("{i:04}.png")))
            .unwrap();
    }
    let predictions = dir.path().join("predictions.json");
    fs::write(&predictions, r#"{ "frames": [] }"#).unwrap();

    surgsynth()
        .args(["overlay", "video"])
        .arg("--input")
        .arg(&frames)
        .arg("--output")
        .arg(dir.path().join("out"))
        .arg("--predictions")
        .arg(&predictions)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 frames, 0 detections"));
    assert!(dir.path().join("out/sequence.json").is_file());
}

#[cfg(not(feature = "video"))]
#[test]
fn overlay_video_file_names_the_missing_feature() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("clip.mp4");
    fs::write(&clip, b"not decoded").unwrap();
    surgsynth()
        .args(["overlay", "video"])
        .arg("--input")
        .arg(&clip)
        .arg("--output")
        .arg(dir.path().join("out.mp4"))
        .args(["--predictions", "p.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--features video"));
}

#[cfg(not(feature = "onnx"))]
#[test]
fn overlay_model_names_the_missing_feature() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("frame.png");
    RgbImage::new(4, 4).save(&input).unwrap();
    surgsynth()
        .args(["overlay", "image"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("out.png"))
        .args(["--model", "best.onnx", "--classes", "Tweezers,Needle_driver"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--features onnx"));
}

#[test]
fn overlay_needs_predictions_or_model() {
    surgsynth()
        .args(["overlay", "image", "--input", "a.png", "--output", "b.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--predictions"));
}
