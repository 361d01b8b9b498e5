use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use iriscap_hw::{
    DeviceId, DeviceManager, DeviceSource, Frame, FrameSize, Readiness, SourceConfig,
    V4l2Backend, WriteOutcome,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "iriscap", about = "iriscap camera diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that open a device.
#[derive(Args)]
struct DeviceArgs {
    /// Native device id (the N in /dev/videoN)
    #[arg(short, long, default_value = "0")]
    id: DeviceId,
    /// Sensor configuration file
    #[arg(short, long, default_value = "/etc/iriscap/ov9281.toml")]
    config: PathBuf,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Frames per second
    #[arg(long, default_value_t = 60)]
    fps: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached cameras
    List,
    /// Open a camera and report whether it comes up
    Probe(DeviceArgs),
    /// Capture frames and save them as PNG
    Capture {
        #[command(flatten)]
        device: DeviceArgs,
        /// Number of frames to capture
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Read or set the sensor exposure (lines)
    Exposure {
        #[command(flatten)]
        device: DeviceArgs,
        /// New exposure value
        #[arg(long)]
        set: Option<u32>,
    },
    /// Read the sensor frame length (lines)
    FrameLength(DeviceArgs),
}

fn open(args: &DeviceArgs) -> DeviceSource<V4l2Backend> {
    let config = SourceConfig {
        frame_size: FrameSize::new(args.width, args.height),
        frame_rate: args.fps,
        config_path: args.config.clone(),
    };
    DeviceSource::with_id(V4l2Backend::new(), args.id, config)
}

fn describe(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Ready => "ready".to_string(),
        Readiness::Inert(reason) => format!("inert: {reason}"),
    }
}

fn save_frame(frame: &Frame, dir: &Path, index: usize) -> Result<PathBuf> {
    let path = dir.join(format!("frame-{index:04}.png"));
    let image = image::GrayImage::from_raw(frame.width(), frame.height(), frame.to_vec())
        .context("frame buffer does not match its dimensions")?;
    image
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            let mut manager = DeviceManager::new(V4l2Backend::new());
            let devices = manager.enumerate()?;
            if devices.is_empty() {
                println!("No cameras found");
            }
            for device in devices {
                println!("/dev/video{}\t{}", device.index, device.serial);
            }
        }
        Commands::Probe(args) => {
            let source = open(&args);
            println!("camera {}: {}", args.id, describe(&source.readiness()));
            if let Some(exposure) = source.get_exposure()? {
                println!("  exposure:     {exposure}");
            }
            if let Some(length) = source.get_frame_length()? {
                println!("  frame length: {length}");
            }
        }
        Commands::Capture {
            device,
            count,
            output,
        } => {
            let source = open(&device);
            let readiness = source.readiness();
            if !readiness.is_ready() {
                bail!("camera {}: {}", device.id, describe(&readiness));
            }
            std::fs::create_dir_all(&output)
                .with_context(|| format!("failed to create {}", output.display()))?;

            let mut blank = 0usize;
            for index in 0..count {
                let frame = match source.capture() {
                    Ok(frame) => frame,
                    Err(err) => {
                        eprintln!("frame {index}: {err}");
                        continue;
                    }
                };
                if frame.is_degraded() {
                    blank += 1;
                }
                let path = save_frame(&frame, &output, index)?;
                println!("{}", path.display());
            }
            if blank > 0 {
                println!("{blank} of {count} frames were blank");
            }
        }
        Commands::Exposure { device, set } => {
            let source = open(&device);
            if let Some(value) = set {
                match source.set_exposure(value)? {
                    WriteOutcome::Applied => println!("exposure set to {value}"),
                    WriteOutcome::Skipped => println!("exposure unchanged (registers unavailable)"),
                }
            }
            match source.get_exposure()? {
                Some(value) => println!("exposure: {value}"),
                None => println!("exposure: unavailable"),
            }
        }
        Commands::FrameLength(args) => {
            let source = open(&args);
            match source.get_frame_length()? {
                Some(value) => println!("frame length: {value}"),
                None => println!("frame length: unavailable"),
            }
        }
    }

    Ok(())
}
