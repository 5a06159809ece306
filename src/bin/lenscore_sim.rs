use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use lenscore::hardware::{PreviewTarget, Size};
use lenscore::mode::{HandlerContext, PhotoCaptureMode, PhotoModeHandler};
use lenscore::testing::{
    back_main_descriptor, front_descriptor, FixedOrientation, MemoryMediaStore, SimulatedHardware,
    SimulatedRecorder,
};
use lenscore::{
    CaptureMode, CoreConfig, DeviceOrchestrator, MediaLocator, OrchestratorBuilder, ReferenceFrame,
};

const USAGE: &str = "Usage: lenscore-sim [--config <file>] [--json] <command> [args]

Commands:
  cameras                 list discovered cameras
  photo [mode]            capture a photo (single|burst|hdr|raw|night|portrait)
  night                   multi-frame night capture
  record [ms]             record video for ms milliseconds (default 500)
  zoom <ratio>            set zoom and print the crop region
  settings                print the current controller settings";

struct Options {
    config: Option<String>,
    json: bool,
    command: String,
    rest: Vec<String>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut config = None;
    let mut json = false;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| anyhow!("--config needs a path"))?;
                config = Some(path.clone());
            }
            "--json" => json = true,
            other => positional.push(other.to_string()),
        }
        i += 1;
    }
    if positional.is_empty() {
        bail!("{}", USAGE);
    }
    let command = positional.remove(0);
    Ok(Options {
        config,
        json,
        command,
        rest: positional,
    })
}

/// Orchestrator over two simulated units, with a handle on its photo handler.
fn build(config: CoreConfig) -> anyhow::Result<(DeviceOrchestrator, Arc<PhotoModeHandler>)> {
    let hardware = SimulatedHardware::new(vec![back_main_descriptor(), front_descriptor()]);
    let store = Arc::new(MemoryMediaStore::new());
    let orientation = Arc::new(FixedOrientation::degrees(0));
    let recorder = Arc::new(SimulatedRecorder::new());

    let orchestrator = OrchestratorBuilder::new(
        Arc::new(hardware.clone()),
        Arc::new(hardware),
        store.clone(),
        orientation.clone(),
        recorder.clone(),
    )
    .config(config.clone())
    .build()?;

    let photo = Arc::new(PhotoModeHandler::new(HandlerContext {
        config: Arc::new(config),
        store,
        orientation,
        recorder,
        fusion: Arc::new(ReferenceFrame),
    }));
    orchestrator.register_mode_handler(CaptureMode::Photo, photo.clone());
    Ok((orchestrator, photo))
}

fn parse_photo_mode(name: &str) -> anyhow::Result<PhotoCaptureMode> {
    Ok(match name {
        "single" => PhotoCaptureMode::Single,
        "burst" => PhotoCaptureMode::Burst,
        "hdr" => PhotoCaptureMode::Hdr,
        "raw" => PhotoCaptureMode::Raw,
        "night" => PhotoCaptureMode::Night,
        "portrait" => PhotoCaptureMode::Portrait,
        other => bail!("Unknown photo mode: {}", other),
    })
}

async fn switch_mode(core: &DeviceOrchestrator, mode: CaptureMode) -> anyhow::Result<()> {
    core.set_camera_mode(mode)
        .await
        .context("mode switch task panicked")??;
    Ok(())
}

async fn run(options: Options) -> anyhow::Result<()> {
    let config = match &options.config {
        Some(path) => CoreConfig::load_layered(path)?,
        None => CoreConfig::load_or_default(),
    };
    let (core, photo) = build(config)?;
    core.initialize().await?;
    core.start_preview(PreviewTarget::new(Size::new(1440, 1080))).await?;
    let controllers = core.await_controllers().await;
    log::info!("Controllers: {:?}", controllers);

    match options.command.as_str() {
        "cameras" => {
            let cameras = core.available_cameras();
            if options.json {
                println!("{}", serde_json::to_string_pretty(&cameras)?);
            } else {
                for (id, capability) in cameras {
                    println!(
                        "{:?}: physical {} ({:?}), max zoom {}x, {} modes",
                        id,
                        capability.physical_id,
                        capability.facing,
                        capability.max_zoom,
                        capability.supported_modes.len()
                    );
                }
            }
        }
        "photo" => {
            let name = options.rest.first().map(String::as_str).unwrap_or("single");
            photo.set_capture_mode(parse_photo_mode(name)?);
            let locator = core.capture().await?;
            print_locator(&options, locator)?;
        }
        "night" => {
            switch_mode(&core, CaptureMode::Night).await?;
            core.await_controllers().await;
            let locator = core.capture().await?;
            print_locator(&options, locator)?;
        }
        "record" => {
            let ms: u64 = match options.rest.first() {
                Some(value) => value.parse().context("record duration")?,
                None => 500,
            };
            switch_mode(&core, CaptureMode::Video).await?;
            core.start_recording().await?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let locator = core.stop_recording().await?;
            print_locator(&options, locator)?;
        }
        "zoom" => {
            let ratio: f32 = options
                .rest
                .first()
                .ok_or_else(|| anyhow!("zoom needs a ratio"))?
                .parse()
                .context("zoom ratio")?;
            if !core.set_zoom(ratio).await {
                bail!("Zoom {} rejected (max {}x)", ratio, core.max_zoom());
            }
            let crop = core.registry().zoom().crop_region();
            if options.json {
                println!("{}", serde_json::to_string(&crop)?);
            } else {
                println!("zoom {}x -> crop {:?}", core.current_zoom(), crop);
            }
        }
        "settings" => {
            let settings = core.current_settings();
            if options.json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                println!("{:#?}", settings);
                for (name, state) in core.controller_states() {
                    println!("{}: {}", name, state);
                }
            }
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }

    core.close().await;
    Ok(())
}

fn print_locator(options: &Options, locator: Option<MediaLocator>) -> anyhow::Result<()> {
    match locator {
        Some(locator) if options.json => println!("{}", serde_json::to_string(&locator)?),
        Some(locator) => println!("saved: {}", locator),
        None => println!("nothing captured"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lenscore::init_logging();
    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    run(options).await
}
