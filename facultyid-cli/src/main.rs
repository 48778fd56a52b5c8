use clap::{Parser, Subcommand};
use facultyid_core::capture::Camera;
use facultyid_core::overlay::{annotate, load_font, LiveTracker};
use facultyid_core::scrape::build_dataset;
use facultyid_core::{Config, FacultyRegistry, MatchResolver, OnnxEngine, Outcome};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "facultyid")]
#[command(about = "Faculty face recognition tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the system/user fallback chain)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the faculty member in an image file
    Recognize {
        /// Image to recognize
        image: PathBuf,
    },
    /// Annotate live camera frames with recognized faculty
    Watch {
        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<u64>,
        /// Write the annotated frame here after every poll
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Scrape the faculty directory into the gallery and faculty data file
    BuildDb {
        /// Directory page to scrape instead of the configured one
        #[arg(long)]
        url: Option<String>,
    },
    /// Report how an image decodes and how many faces it contains
    Probe {
        /// Image URL or file path
        source: String,
    },
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Recognize { image } => cmd_recognize(&config, &image),
        Commands::Watch { frames, output } => cmd_watch(&config, frames, output),
        Commands::BuildDb { url } => cmd_build_db(config, url),
        Commands::Probe { source } => cmd_probe(&config, &source),
        Commands::Config { validate } => cmd_config(&config, validate),
    }
}

fn cmd_recognize(config: &Config, image: &Path) -> anyhow::Result<()> {
    let pixels = image::open(image)?.to_rgb8();
    let mut service = facultyid_core::open_service(config)?;

    let start = Instant::now();
    let outcome = service.recognize_image(&pixels);
    let duration = start.elapsed();

    println!();
    match &outcome {
        Outcome::Success(record) => {
            println!("✅ {}", record.full_name);
            println!("   {}", record.designation);
            println!("   {}", record.department);
        }
        other => {
            println!(
                "❌ {}: {}",
                other.status(),
                other.message().unwrap_or_default()
            );
        }
    }
    println!("Total time: {:.2}ms", duration.as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_watch(config: &Config, frames: Option<u64>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let registry = FacultyRegistry::load(&config.storage.data_path);
    let engine = OnnxEngine::load(&config.engine)?;
    let mut resolver = MatchResolver::new(engine, &config.storage.gallery_dir);
    let mut camera = Camera::open(&config.camera)?;

    let font = config.overlay.font_path.as_deref().and_then(load_font);
    if font.is_none() {
        log::warn!("No caption font loaded; faces will be boxed without names");
    }

    let interval = Duration::from_secs(config.live.poll_interval_secs);
    let mut tracker = LiveTracker::new(interval, Instant::now());
    let mut shown: Vec<String> = Vec::new();
    let mut count = 0u64;

    println!("Watching camera {} (Ctrl+C to stop)...", config.camera.device);

    while frames.map_or(true, |limit| count < limit) {
        let mut frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Camera read failed, stopping: {}", e);
                break;
            }
        };
        count += 1;

        let polled = tracker.tick(Instant::now(), &frame, &mut resolver, &registry);
        annotate(&mut frame, tracker.faces(), font.as_ref());

        if !polled {
            continue;
        }

        let names: Vec<String> = tracker
            .faces()
            .iter()
            .map(|f| f.record.full_name.clone())
            .collect();
        if names != shown {
            if names.is_empty() {
                println!("No known faces");
            } else {
                println!("Recognized: {}", names.join(", "));
            }
            shown = names;
        }

        if let Some(path) = &output {
            if let Err(e) = frame.save(path) {
                log::warn!("Failed to save annotated frame to {}: {}", path.display(), e);
            }
        }
    }

    println!("Processed {} frames", count);
    Ok(())
}

fn cmd_build_db(mut config: Config, url: Option<String>) -> anyhow::Result<()> {
    if let Some(url) = url {
        config.scrape.url = url;
    }

    let report = build_dataset(
        &config.scrape,
        &config.storage.gallery_dir,
        &config.storage.data_path,
    )?;

    println!("\n✓ Dataset built");
    println!("Faculty found: {}", report.entries);
    println!("Photos saved:  {}", report.images_saved);
    if report.failures > 0 {
        println!("Failures:      {}", report.failures);
    }
    println!("Gallery: {}", config.storage.gallery_dir.display());
    println!("Data:    {}", config.storage.data_path.display());

    Ok(())
}

fn cmd_probe(config: &Config, source: &str) -> anyhow::Result<()> {
    println!("Probing image: {}", source);

    let bytes = match read_source(source) {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("❌ Could not read image: {}", e);
            return Ok(());
        }
    };

    match image::guess_format(&bytes) {
        Ok(format) => println!("Format: {:?}", format),
        Err(_) => println!("Format: unknown"),
    }

    let decoded = match image::load_from_memory(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            println!("❌ Could not decode image: {}", e);
            return Ok(());
        }
    };
    println!("Colour type: {:?}", decoded.color());

    let rgb = decoded.to_rgb8();
    println!("Resolution (RGB): {}x{}", rgb.width(), rgb.height());

    let mut engine = match OnnxEngine::load(&config.engine) {
        Ok(engine) => engine,
        Err(e) => {
            println!("❌ Could not load the face detector: {}", e);
            return Ok(());
        }
    };

    match engine.detect_faces(&rgb) {
        Ok(faces) if faces.is_empty() => println!("❌ No face detected"),
        Ok(faces) => {
            println!("✓ Detected {} face(s)", faces.len());
            for (i, face) in faces.iter().enumerate() {
                let region = face.region(rgb.width(), rgb.height());
                println!(
                    "  #{} score {:.2} at {},{} {}x{}",
                    i + 1,
                    face.score,
                    region.x,
                    region.y,
                    region.width,
                    region.height
                );
            }
        }
        Err(e) => println!("❌ Detection failed: {}", e),
    }

    Ok(())
}

fn read_source(source: &str) -> anyhow::Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::blocking::get(source)?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    } else {
        Ok(std::fs::read(source)?)
    }
}

fn cmd_config(config: &Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[storage]");
    println!("  gallery_dir = {:?}", config.storage.gallery_dir);
    println!("  data_path = {:?}", config.storage.data_path);
    println!();

    println!("[engine]");
    println!("  model = {}", config.engine.model);
    println!("  detector = {}", config.engine.detector);
    println!("  model_dir = {:?}", config.engine.model_dir);
    println!(
        "  confidence_threshold = {}",
        config.engine.confidence_threshold
    );
    println!(
        "  distance_threshold = {}",
        config.engine.effective_distance_threshold()
    );
    println!();

    println!("[camera]");
    println!("  device = {:?}", config.camera.device);
    println!("  resolution = {}x{}", config.camera.width, config.camera.height);
    println!();

    println!("[live]");
    println!("  poll_interval = {}s", config.live.poll_interval_secs);
    println!();

    println!("[overlay]");
    match &config.overlay.font_path {
        Some(path) => println!("  font_path = {:?}", path),
        None => println!("  font_path = (none)"),
    }
    println!();

    println!("[server]");
    println!("  bind = {}", config.server.bind);
    println!("  max_body_bytes = {}", config.server.max_body_bytes);
    println!();

    println!("[scrape]");
    println!("  url = {}", config.scrape.url);
    println!("  department = {}", config.scrape.department);

    Ok(())
}
