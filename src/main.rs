use std::path::PathBuf;

use clap::Parser;
use rapidocr::{DetectionOptions, RapidOCRBuilder};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Print the reading-ordered transcript of an image.
#[derive(Parser, Debug)]
#[command(name = "rapidocr")]
struct Args {
    /// Image to read
    image: PathBuf,

    /// Text detection model
    #[arg(long)]
    det: PathBuf,

    /// Rotation classifier model; rotation is not classified without it
    #[arg(long)]
    cls: Option<PathBuf>,

    /// Text recognition model
    #[arg(long)]
    rec: PathBuf,

    /// Recognizer dictionary, one character per line
    #[arg(long)]
    keys: PathBuf,

    #[arg(long, default_value_t = 4)]
    threads: usize,

    #[arg(long)]
    gpu_index: Option<u32>,

    #[arg(long, default_value_t = 50)]
    padding: u32,

    /// Long side the detector works at, 0 keeps the image's own
    #[arg(long, default_value_t = 1024)]
    max_side_len: u32,

    #[arg(long, default_value_t = 0.5)]
    box_score_thresh: f32,

    #[arg(long, default_value_t = 0.3)]
    box_thresh: f32,

    #[arg(long, default_value_t = 1.6)]
    unclip_ratio: f32,

    /// Skip rotation classification
    #[arg(long)]
    no_angle: bool,

    /// Classify each region on its own instead of taking the majority
    #[arg(long)]
    no_most_angle: bool,

    /// Save every cropped region into this directory
    #[arg(long)]
    part_images: Option<PathBuf>,

    /// Also write the transcript to this file
    #[arg(long)]
    result_text: Option<PathBuf>,

    /// Save the page with the kept text boxes outlined
    #[arg(long)]
    result_image: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut builder = RapidOCRBuilder::new()
        .threads(args.threads)
        .gpu_index(args.gpu_index)
        .det_model(&args.det)
        .rec_model(&args.rec, &args.keys)
        .max_side_len(args.max_side_len.max(1024) + 2 * args.padding);
    if let Some(cls) = &args.cls {
        builder = builder.cls_model(cls);
    }
    if let Some(dir) = &args.part_images {
        builder = builder.save_part_images(dir);
    }
    if let Some(path) = &args.result_text {
        builder = builder.save_result_text(path);
    }
    if let Some(path) = &args.result_image {
        builder = builder.save_result_image(path);
    }
    let ocr = builder.build()?;

    let options = DetectionOptions {
        padding: args.padding,
        max_side_len: args.max_side_len,
        box_score_threshold: args.box_score_thresh,
        box_threshold: args.box_thresh,
        unclip_ratio: args.unclip_ratio,
        do_angle: !args.no_angle,
        most_angle: !args.no_most_angle,
        ..Default::default()
    };
    let result = ocr.detect_path(&args.image, options)?;
    log::debug!(
        "{} blocks, detection {:?}, total {:?}",
        result.text_blocks.len(),
        result.detection_time,
        result.total_time
    );
    println!("{}", result.text);
    Ok(())
}
