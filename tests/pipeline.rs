//! End-to-end tests: dataset on disk, transform chain, loader and evaluator.

use face_parts::{
    calculate_centroids, evaluate, ArtifactWriter, Augment, Compose, DataLoader, Error,
    ErrorAccumulator, EvalConfig, ImageDataset, MaskDirectory, OnError, OutputSize, PartLayout,
    PartSelection, PartSpec, ToTensor, NUM_SOURCE_LABELS,
};
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array4;
use std::fs;
use std::path::Path;

/// Writes `names` as `h x w` samples whose label 2 covers the block
/// `rows x cols` and whose label 3 is a single column at `w - 2`.
fn write_dataset(root: &Path, names: &[&str], h: u32, w: u32) {
    fs::create_dir_all(root.join("images")).unwrap();
    let list: Vec<String> = names
        .iter()
        .enumerate()
        .map(|(i, n)| format!("{}, {}", i + 1, n))
        .collect();
    fs::write(root.join("list.txt"), list.join("\n")).unwrap();

    for name in names {
        let dir = root.join("labels").join(name);
        fs::create_dir_all(&dir).unwrap();
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 128]))
            .save(root.join("images").join(format!("{}.jpg", name)))
            .unwrap();
        for label in 0..NUM_SOURCE_LABELS {
            let mask = GrayImage::from_fn(w, h, |x, y| {
                let on = match label {
                    2 => (1..4).contains(&y) && (2..6).contains(&x),
                    3 => x == w - 2,
                    _ => false,
                };
                Luma([if on { 255 } else { 0 }])
            });
            mask.save(dir.join(format!("{}_lbl{:02}.png", name, label)))
                .unwrap();
        }
    }
}

fn two_part_layout() -> PartLayout {
    PartLayout::new(vec![
        PartSpec::new("block", vec![0]),
        PartSpec::new("stripe", vec![1]),
    ])
}

#[test]
fn shifted_predictions_give_unit_error() {
    // Two samples, three channels. Channel 0 holds a single pixel at
    // (5, 5) and (10, 10); predictions move it by one pixel.
    let mut truth = Array4::<f32>::zeros((2, 3, 16, 16));
    truth[[0, 0, 5, 5]] = 1.0;
    truth[[1, 0, 10, 10]] = 1.0;
    for n in 0..2 {
        truth[[n, 1, 3, 12]] = 1.0;
        truth[[n, 2, 8, 2]] = 1.0;
    }

    let mut pred = truth.clone();
    pred[[0, 0, 5, 5]] = 0.0;
    pred[[0, 0, 6, 5]] = 1.0;
    pred[[1, 0, 10, 10]] = 0.0;
    pred[[1, 0, 10, 9]] = 1.0;

    let truth_centroids = calculate_centroids(truth.view());
    assert!((truth_centroids[[0, 0, 0]] - 5.0).abs() < 1e-4);
    assert!((truth_centroids[[1, 0, 1]] - 10.0).abs() < 1e-4);

    let mut acc = ErrorAccumulator::new(3);
    acc.update(calculate_centroids(pred.view()).view(), truth_centroids.view())
        .unwrap();
    assert_eq!(acc.count(), 2);

    let layout = PartLayout::new(vec![PartSpec::new("spot", vec![0])]);
    let report = acc.finalize(&layout).unwrap();
    assert!((report.part("spot").unwrap().error - 1.0).abs() < 1e-4);
    assert!(report.channel_errors[1].abs() < 1e-4);
    assert!(report.channel_errors[2].abs() < 1e-4);
    assert!((report.overall - 1.0 / 3.0).abs() < 1e-4);
}

#[test]
fn stored_ground_truth_as_predictions_scores_near_zero() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_dataset(&root, &["a", "b", "c"], 8, 10);

    let config = EvalConfig {
        root: root.clone(),
        list: "list.txt".into(),
        foreground: Some(vec![2, 3]),
        batch_size: 2,
        seed: Some(1),
        parts: two_part_layout(),
        on_error: OnError::Abort,
        ..EvalConfig::default()
    };
    config.validate().unwrap();

    let dataset = config.open_dataset().unwrap();
    assert_eq!(dataset.num_labels(), 3);
    let loader = config.loader(&dataset, 1).unwrap();
    let model = MaskDirectory::for_loader(root.join("labels"), &loader).unwrap();

    let artifacts = dir.path().join("artifacts");
    let writer = ArtifactWriter::new(&artifacts, &dataset, config.overlay_frame()).unwrap();
    let (acc, stats) = evaluate(&loader, &model, |e| writer.write(e)).unwrap();

    assert_eq!(stats.samples, 3);
    assert_eq!(stats.batches, 2);
    let report = acc.finalize(&config.parts).unwrap();
    assert_eq!(report.samples, 3);
    for part in &report.parts {
        assert!(part.error < 0.05, "{} error {}", part.name, part.error);
    }
    for name in ["a", "b", "c"] {
        assert!(artifacts.join(format!("{}_loc.png", name)).exists());
        assert!(artifacts.join(format!("{}_map.png", name)).exists());
    }
}

#[test]
fn mirrored_run_scores_stored_ground_truth_as_exact() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_dataset(&root, &["a", "b"], 8, 10);

    let config = EvalConfig {
        root: root.clone(),
        list: "list.txt".into(),
        foreground: Some(vec![2, 3]),
        invert: true,
        seed: Some(1),
        parts: two_part_layout(),
        on_error: OnError::Abort,
        ..EvalConfig::default()
    };
    let dataset = config.open_dataset().unwrap();
    let loader = config.loader(&dataset, 1).unwrap();
    // Stored masks are in source geometry; the run mirrors the ground truth.
    let model = MaskDirectory::for_loader(root.join("labels"), &loader).unwrap();

    let artifacts = dir.path().join("artifacts");
    let writer = ArtifactWriter::new(&artifacts, &dataset, config.overlay_frame()).unwrap();
    let (acc, _) = evaluate(&loader, &model, |e| writer.write(e)).unwrap();

    let report = acc.finalize(&config.parts).unwrap();
    for part in &report.parts {
        assert!(part.error < 0.05, "{} error {}", part.name, part.error);
    }
    assert!(artifacts.join("a_loc.png").exists());
}

#[test]
fn augmented_run_scores_stored_ground_truth_as_exact() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_dataset(&root, &["a", "b", "c"], 8, 10);

    let selection = PartSelection::Foreground(vec![2, 3]);
    let chain = Compose::new()
        .then(Augment::new(2, 0.0).unwrap())
        .then(ToTensor);
    let dataset = ImageDataset::open(&root, "list.txt", &selection)
        .unwrap()
        .with_transform(chain);
    let loader = DataLoader::new(&dataset, 2, 9)
        .unwrap()
        .on_error(OnError::Abort);
    let model = MaskDirectory::for_loader(root.join("labels"), &loader).unwrap();

    let (acc, stats) = evaluate(&loader, &model, |_| Ok(())).unwrap();
    assert_eq!(stats.samples, 3);

    let report = acc.finalize(&two_part_layout()).unwrap();
    for part in &report.parts {
        assert!(part.error < 0.05, "{} error {}", part.name, part.error);
    }
}

#[test]
fn sharded_runs_merge_to_the_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_dataset(&root, &["a", "b"], 8, 10);
    let preds = dir.path().join("preds");
    // Predictions are the ground truth mirrored left-right.
    for name in ["a", "b"] {
        fs::create_dir_all(preds.join(name)).unwrap();
        for label in [2, 3] {
            let file = format!("{}_lbl{:02}.png", name, label);
            let mut mask = image::open(root.join("labels").join(name).join(&file))
                .unwrap()
                .to_luma8();
            image::imageops::flip_horizontal_in_place(&mut mask);
            mask.save(preds.join(name).join(&file)).unwrap();
        }
    }

    let selection = PartSelection::Foreground(vec![2, 3]);
    let run = |list: &str| {
        let dataset = ImageDataset::open(&root, list, &selection)
            .unwrap()
            .with_transform(Compose::new().then(ToTensor));
        let loader = DataLoader::new(&dataset, 4, 0).unwrap();
        let model = MaskDirectory::for_loader(&preds, &loader).unwrap();
        evaluate(&loader, &model, |_| Ok(())).unwrap().0
    };

    fs::write(root.join("first.txt"), "1, a\n").unwrap();
    fs::write(root.join("second.txt"), "2, b\n").unwrap();
    let full = run("list.txt");

    let shard_path = dir.path().join("shard.bin");
    run("first.txt").save(&shard_path).unwrap();
    let mut merged = ErrorAccumulator::load(&shard_path).unwrap();
    merged.merge(&run("second.txt")).unwrap();

    assert_eq!(merged.count(), full.count());
    for (a, b) in merged.sum_error().iter().zip(full.sum_error()) {
        assert!((a - b).abs() < 1e-6);
    }

    // The block spans columns 2..6 of 10; mirrored it spans 4..8.
    let report = full.finalize(&two_part_layout()).unwrap();
    assert!((report.part("block").unwrap().error - 2.0).abs() < 0.05);
}

#[test]
fn rescale_rejects_content_larger_than_the_canvas() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_dataset(&root, &["wide", "tall"], 8, 10);
    // 12 x 5 at short edge 64 resizes to 153 x 64, past a 128 canvas.
    let tall = root.join("labels").join("tall");
    RgbImage::from_pixel(5, 12, Rgb([0, 0, 0]))
        .save(root.join("images").join("tall.jpg"))
        .unwrap();
    for label in 0..NUM_SOURCE_LABELS {
        GrayImage::from_pixel(5, 12, Luma([0]))
            .save(tall.join(format!("tall_lbl{:02}.png", label)))
            .unwrap();
    }

    let config = EvalConfig {
        root: root.clone(),
        list: "list.txt".into(),
        foreground: Some(vec![2, 3]),
        output_size: Some(OutputSize::ShortEdge(64)),
        parts: two_part_layout(),
        ..EvalConfig::default()
    };
    let dataset = config.open_dataset().unwrap();
    let loader = config.loader(&dataset, 0).unwrap();

    let wide = loader.load_sample(0).unwrap();
    assert_eq!(wide.image_dims(), (3, 128, 128));
    let err = loader.load_sample(1).unwrap_err();
    assert!(matches!(err, Error::CanvasOverflow { .. }));

    // The default policy leaves the oversized sample out.
    let mut seen = Vec::new();
    let stats = loader
        .for_each_batch(|batch| {
            seen.extend(batch.indices);
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, vec![0]);
    assert_eq!(stats.skipped, 1);
}
