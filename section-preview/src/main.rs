/// Section thumbnail exporter entry point
use constants::host::{ANNOTATION_BINS, ANNOTATION_CONFIG, GLOBAL_CONFIG, LAZ_BYTES};
use indicatif::{ProgressBar, ProgressStyle};
use point_cloud_attributes::host::BinMap;
use point_cloud_attributes::section::discover_sections;
use point_cloud_attributes::{AttributeRepository, HostBridge, HostValue, MemoryModel};
use section_preview::{CpuBackend, PreviewConfig, PreviewEvent, PreviewPalette, PreviewScheduler};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn read_json(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Every `<name>.bin` in `dir`, keyed by `name`.
fn read_bins(dir: &Path) -> Result<BinMap, Box<dyn std::error::Error>> {
    let mut bins = BinMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bin") {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
            bins.insert(name.to_string(), Arc::from(fs::read(&path)?));
        }
    }
    Ok(bins)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 5 && args.len() != 6 {
        eprintln!(
            "Usage: {} <input.laz> <annotation_config.json> <bins_dir> <output_dir> [global_config.json]",
            args[0]
        );
        std::process::exit(1);
    }

    let output_dir = Path::new(&args[4]);
    fs::create_dir_all(output_dir)?;

    let mut model = MemoryModel::new();
    model.set(LAZ_BYTES, HostValue::Bytes(Arc::from(fs::read(&args[1])?)));
    model.set(ANNOTATION_CONFIG, HostValue::Json(read_json(Path::new(&args[2]))?));
    model.set(ANNOTATION_BINS, HostValue::Bins(read_bins(Path::new(&args[3]))?));
    if let Some(global) = args.get(5) {
        model.set(GLOBAL_CONFIG, HostValue::Json(read_json(Path::new(global))?));
    }

    let bridge = HostBridge::attach(&mut model, Arc::new(AttributeRepository::new()));
    for issue in bridge.issues() {
        eprintln!("Warning: {:?}", issue);
    }

    let snapshot = bridge.snapshot();
    let config = PreviewConfig::from(&bridge.global_config());
    let sections = discover_sections(&snapshot, &config.slice_key);
    if sections.is_empty() {
        eprintln!("No sections found for slice key '{}'", config.slice_key);
        std::process::exit(1);
    }
    println!(
        "{} points, {} sections on '{}'",
        snapshot.point_count(),
        sections.len(),
        config.slice_key
    );

    let pb = ProgressBar::new(sections.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} sections ({percent}%) {msg}")?
            .progress_chars("▉▊▋▌▍▎▏ "),
    );
    let progress = pb.clone();
    let scheduler = PreviewScheduler::new(CpuBackend::new(), config).with_observer(move |event| {
        match event {
            PreviewEvent::Started { .. } => {}
            PreviewEvent::Captured { section, .. } => {
                progress.set_message(format!("section {}", section));
                progress.inc(1);
            }
            PreviewEvent::Failed { section, reason } => {
                progress.println(format!("Section {} failed: {}", section, reason));
                progress.inc(1);
            }
            PreviewEvent::TimedOut { section } => {
                progress.println(format!("Section {} timed out", section));
                progress.inc(1);
            }
        }
    });

    let palette = PreviewPalette::from_snapshot(&snapshot);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let summary = runtime.block_on(scheduler.submit(snapshot, &palette, &sections));
    pb.finish_with_message("done");

    for (section, image) in scheduler.previews() {
        fs::write(output_dir.join(format!("section_{}.png", section)), &image.png)?;
    }

    println!(
        "Wrote {} thumbnails to {} ({} failed, {} timed out)",
        summary.captured,
        output_dir.display(),
        summary.failed,
        summary.timed_out
    );
    Ok(())
}
