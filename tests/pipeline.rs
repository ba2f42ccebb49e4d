use std::path::Path;

use image::{ImageOutputFormat, Rgb, RgbImage};

use ferrite_food::data::loader::{DatasetConfig, DatasetLoader, LoadingMode, ValidationSource};
use ferrite_food::data::preprocess::{preprocess_bytes, INPUT_SIZE};
use ferrite_food::data::taxonomy::{ClassTaxonomy, FallbackClasses};
use ferrite_food::data::{Augmentation, DatasetSource};
use ferrite_food::inference::{classify_request, ArtifactPaths, InferenceService, Prediction, ServiceStatus};
use ferrite_food::network::{BackboneSpec, HeadSpec, ModelSpec, StageSpec};
use ferrite_food::train::{evaluate, train, EarlyStoppingConfig, Evaluation, TrainConfig, TrainingSettings};
use ferrite_food::{evaluate_saved, train_from_config, FoodError, Model, PipelineConfig};

const SIZE: u32 = 32;

fn small_model() -> ModelSpec {
    ModelSpec {
        backbone: BackboneSpec::plain(SIZE as usize, vec![StageSpec { filters: 8, stride: 2 }, StageSpec { filters: 16, stride: 4 }]),
        head: HeadSpec { hidden_units: vec![16], ..HeadSpec::default() },
        ..ModelSpec::default()
    }
}

fn write_class(root: &Path, split: &str, class: &str, count: usize, color: [u8; 3]) {
    let dir = root.join(split).join(class);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let img = RgbImage::from_fn(40, 30, |x, y| {
            let jitter = ((x + y + i as u32) % 16) as u8;
            Rgb([color[0].saturating_add(jitter), color[1].saturating_add(jitter), color[2]])
        });
        img.save(dir.join(format!("{}_{}.jpg", class.replace(' ', "_"), i))).unwrap();
    }
}

fn dataset_config(root: &Path) -> DatasetConfig {
    DatasetConfig {
        root: root.to_path_buf(),
        batch_size: 4,
        input_size: SIZE,
        prefetch: 0,
        ..DatasetConfig::default()
    }
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(300, 200, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

#[test]
fn preprocessing_yields_single_224_batch_in_unit_range() {
    let batch = preprocess_bytes(&png_bytes(), INPUT_SIZE).unwrap();
    assert_eq!(batch.shape(), [1, 224, 224, 3]);
    let (lo, hi) = batch.images()[0].value_range();
    assert!(lo >= 0.0 && hi <= 1.0);
}

#[test]
fn two_class_single_epoch_run_writes_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_class(&root, "Training", "Apple 10", 5, [200, 30, 30]);
    write_class(&root, "Training", "Banana 1", 5, [220, 210, 40]);
    write_class(&root, "Validation", "Apple 10", 2, [200, 30, 30]);
    write_class(&root, "Validation", "Banana 1", 2, [220, 210, 40]);

    let mut splits = DatasetLoader::new(dataset_config(&root)).load().unwrap();
    assert_eq!(splits.taxonomy.names(), &["Apple 10".to_string(), "Banana 1".to_string()]);

    let (mut model, mut optimizer) = small_model().compile(&splits.taxonomy).unwrap();
    let artifacts = dir.path().join("artifacts");
    let config = TrainConfig::new(TrainingSettings { epochs: 1, ..TrainingSettings::default() })
        .with_checkpoint(artifacts.join("model.json"), artifacts.join("classes.txt"));

    let run = train(&mut model, splits.training.as_mut(), splits.validation.as_mut(), optimizer.as_mut(), &config).unwrap();

    assert_eq!(run.train_loss().len(), 1);
    assert_eq!(run.val_loss().len(), 1);
    assert_eq!(run.train_accuracy().len(), 1);
    assert_eq!(run.val_accuracy().len(), 1);
    assert_eq!(run.best_epoch, 1);
    assert!(!run.stopped_early);

    assert!(artifacts.join("model.json").is_file());
    let saved = Model::load_json(artifacts.join("model.json")).unwrap();
    assert_eq!(saved.num_classes(), 2);
    assert_eq!(ClassTaxonomy::load(artifacts.join("classes.txt")).unwrap(), splits.taxonomy);

    // No Test/ directory: evaluation reports the absence of data.
    assert_eq!(evaluate(&model, splits.test.as_mut()).unwrap(), Evaluation::NoData);

    // The checkpoint serves predictions named from the persisted class list.
    let service = InferenceService::start(
        ArtifactPaths { model: artifacts.join("model.json"), classes: artifacts.join("classes.txt") },
        FallbackClasses::None,
    );
    assert_eq!(service.status(), ServiceStatus::Ready);
    let first = service.classify(&png_bytes()).unwrap();
    assert_eq!(service.classify(&png_bytes()).unwrap(), first);
    assert!(splits.taxonomy.index_of(&first.class).is_some());
}

#[test]
fn generator_mode_with_hold_out_split() {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), "Training", "Pear 1", 5, [150, 200, 60]);
    write_class(dir.path(), "Training", "Plum 1", 5, [90, 20, 110]);
    write_class(dir.path(), "Test", "Pear 1", 2, [150, 200, 60]);

    let config = DatasetConfig {
        loading: LoadingMode::Generator,
        validation: ValidationSource::HoldOut { fraction: 0.2 },
        augmentation: Augmentation::default(),
        ..dataset_config(dir.path())
    };
    let mut splits = DatasetLoader::new(config).load().unwrap();
    assert_eq!(splits.training.num_samples(), 8);
    assert_eq!(splits.validation.num_samples(), 2);

    let (mut model, mut optimizer) = small_model().compile(&splits.taxonomy).unwrap();
    let config = TrainConfig::new(TrainingSettings { epochs: 2, ..TrainingSettings::default() });
    let run = train(&mut model, splits.training.as_mut(), splits.validation.as_mut(), optimizer.as_mut(), &config).unwrap();
    assert_eq!(run.epochs.len(), 2);

    match evaluate(&model, splits.test.as_mut()).unwrap() {
        Evaluation::Scored { samples, accuracy, confusion, .. } => {
            assert_eq!(samples, 2);
            assert!((0.0..=1.0).contains(&accuracy));
            assert_eq!(confusion.total(), 2);
        }
        Evaluation::NoData => panic!("test split should have data"),
    }
}

#[test]
fn corrupt_file_is_skipped_during_eager_load() {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), "Training", "Apple 10", 9, [200, 30, 30]);
    std::fs::write(dir.path().join("Training/Apple 10/broken.jpg"), b"\xff\xd8 truncated").unwrap();
    write_class(dir.path(), "Validation", "Apple 10", 1, [200, 30, 30]);

    let config = DatasetConfig { loading: LoadingMode::Eager, ..dataset_config(dir.path()) };
    let splits = DatasetLoader::new(config).load().unwrap();
    assert_eq!(splits.training.num_samples(), 9);
}

#[test]
fn non_image_upload_is_rejected_without_a_model() {
    let dir = tempfile::tempdir().unwrap();
    let service = InferenceService::start(
        ArtifactPaths { model: dir.path().join("missing.json"), classes: dir.path().join("missing.txt") },
        FallbackClasses::None,
    );

    let response = classify_request(&service, Some("text/plain"), b"apple");
    assert_eq!(response.status, 400);
    assert!(response.body.get("detail").is_some());

    let response = classify_request(&service, Some("image/png"), &png_bytes());
    assert_eq!(response.status, 200);
    assert_eq!(response.body["class"], "modelo_no_cargado");
    assert_eq!(response.body["confidence"], 0.0);
    assert_eq!(service.classify(&png_bytes()).unwrap(), Prediction::model_not_loaded());
}

fn pipeline_config(dir: &Path, training: TrainingSettings) -> PipelineConfig {
    PipelineConfig {
        dataset: dataset_config(&dir.join("data")),
        model: small_model(),
        training,
        artifacts: ArtifactPaths { model: dir.join("model.json"), classes: dir.join("classes.txt") },
        ..PipelineConfig::default()
    }
}

#[test]
fn saved_artifact_keeps_best_epoch_without_restore() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_class(&root, "Training", "Apple 10", 5, [200, 30, 30]);
    write_class(&root, "Training", "Banana 1", 5, [220, 210, 40]);
    // Colours swapped against training, so later epochs score worse.
    write_class(&root, "Validation", "Apple 10", 2, [220, 210, 40]);
    write_class(&root, "Validation", "Banana 1", 2, [200, 30, 30]);

    let training = TrainingSettings {
        epochs: 4,
        early_stopping: EarlyStoppingConfig { patience: 1, restore_best: false },
        ..TrainingSettings::default()
    };
    let config = pipeline_config(dir.path(), training);
    let outcome = train_from_config(&config).unwrap();
    assert!(!outcome.run.restored_best);
    assert_eq!(outcome.test, Evaluation::NoData);

    let saved = Model::load_json(&config.artifacts.model).unwrap();
    let mut validation = DatasetLoader::new(config.dataset.clone()).load().unwrap().validation;
    let (saved_loss, _) = evaluate(&saved, validation.as_mut()).unwrap().metrics().unwrap();
    assert!((saved_loss - outcome.run.best_val_loss).abs() < 1e-6);

    let last = outcome.run.epochs.last().unwrap();
    if last.epoch != outcome.run.best_epoch {
        assert_ne!(saved.head, outcome.model.head);
        let (returned_loss, _) = evaluate(&outcome.model, validation.as_mut()).unwrap().metrics().unwrap();
        assert!((returned_loss - last.val_loss).abs() < 1e-9);
    }
}

#[test]
fn evaluation_uses_the_saved_class_list() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_class(&root, "Training", "Apple 10", 5, [200, 30, 30]);
    write_class(&root, "Training", "Banana 1", 5, [220, 210, 40]);
    write_class(&root, "Validation", "Apple 10", 2, [200, 30, 30]);
    write_class(&root, "Validation", "Banana 1", 2, [220, 210, 40]);
    let config = pipeline_config(dir.path(), TrainingSettings { epochs: 1, ..TrainingSettings::default() });
    train_from_config(&config).unwrap();

    // Only one class has test images and the training folders are gone.
    std::fs::remove_dir_all(root.join("Training")).unwrap();
    std::fs::remove_dir_all(root.join("Validation")).unwrap();
    write_class(&root, "Test", "Banana 1", 3, [220, 210, 40]);

    match evaluate_saved(&config).unwrap() {
        Evaluation::Scored { samples, confusion, .. } => {
            assert_eq!(samples, 3);
            assert_eq!(confusion.labels, vec!["Apple 10".to_string(), "Banana 1".to_string()]);
            assert_eq!(confusion.counts[1].iter().sum::<usize>(), 3);
            assert_eq!(confusion.counts[0].iter().sum::<usize>(), 0);
        }
        Evaluation::NoData => panic!("test split should have data"),
    }

    // A folder the model never saw cannot be scored.
    write_class(&root, "Test", "Kiwi 1", 1, [90, 160, 40]);
    assert!(matches!(evaluate_saved(&config), Err(FoodError::Config(_))));
    std::fs::remove_dir_all(root.join("Test/Kiwi 1")).unwrap();

    // Same count, different order: the class list no longer matches the model.
    ClassTaxonomy::new(vec!["Banana 1".into(), "Apple 10".into()])
        .unwrap()
        .save(&config.artifacts.classes)
        .unwrap();
    assert!(matches!(evaluate_saved(&config), Err(FoodError::Artifact(_))));
}
