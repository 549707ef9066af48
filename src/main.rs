use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use rs_age_gender_tflite::age_gender_lite::estimator::WideResNet;
use rs_age_gender_tflite::age_gender_lite::face_detection::{FaceDetection, FaceDetectionModel};
use rs_age_gender_tflite::age_gender_lite::pipeline::{format_report, process_image};
use rs_age_gender_tflite::age_gender_lite::render::{draw_detection_boxes, Colors};
use rs_age_gender_tflite::age_gender_lite::utils::convert_image_to_mat;
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Detect faces in a folder of JPEG images and estimate age and gender
/// for the detected faces.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the estimation network weight file
    #[arg(long = "weight_file", default_value = "pretrained_models/weights.18-4.06.hdf5")]
    weight_file: PathBuf,

    /// Depth of the network
    #[arg(long = "depth", default_value_t = 16)]
    depth: i32,

    /// Width of the network
    #[arg(long = "width", default_value_t = 8)]
    width: i32,

    /// Directory containing the face detection models
    #[arg(long = "detector_path")]
    detector_path: Option<String>,

    /// Directory scanned for *.jpg input images
    #[arg(long = "image_dir", default_value = "test")]
    image_dir: PathBuf,

    /// If set, save copies of the inputs with detection boxes drawn
    #[arg(long = "output_dir")]
    output_dir: Option<PathBuf>,
}

fn run(args: Args) -> Result<()> {
    let detector = FaceDetection::new(FaceDetectionModel::BackCamera, args.detector_path.clone())
        .context("failed to load face detection model")?;
    let estimator = WideResNet::new(args.weight_file.clone(), args.depth, args.width)
        .context("failed to load age/gender weights")?;

    if let Some(output_dir) = &args.output_dir {
        fs::create_dir_all(output_dir)
            .context("failed to create output directory")?;
    }

    let mut image_paths: Vec<PathBuf> = WalkDir::new(&args.image_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase() == "jpg")
                .unwrap_or(false)
        })
        .map(|e| e.path().to_owned())
        .collect();
    image_paths.sort();

    info!("found {} images in {:?}", image_paths.len(), args.image_dir);
    if image_paths.is_empty() {
        warn!("no .jpg images found in {:?}", args.image_dir);
        return Ok(());
    }

    for path in &image_paths {
        let im_bytes = fs::read(path)
            .with_context(|| format!("failed to read image: {:?}", path))?;
        let image = convert_image_to_mat(&im_bytes)
            .with_context(|| format!("failed to decode image: {:?}", path))?;

        let report = process_image(&detector, &estimator, &image)?;
        println!("{}", format_report(&path.to_string_lossy(), &report));

        if let Some(output_dir) = &args.output_dir {
            let decoded = image::load_from_memory(&im_bytes)
                .with_context(|| format!("failed to decode image: {:?}", path))?;
            let annotated = draw_detection_boxes(&decoded, &report.boxes, Colors::RED, 2);

            let stem = path.file_stem().unwrap_or_default().to_string_lossy();
            let out_path = output_dir.join(format!("{}_bbox.png", stem));
            annotated.save(&out_path)
                .with_context(|| format!("failed to save annotated image: {:?}", out_path))?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    run(args)
}
