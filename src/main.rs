//! emulator-bridge CLI
//!
//! Tools for the chunk addressing scheme and directory snapshots, plus a
//! demo that runs the UI sync engine against a worker thread.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use emulator_bridge::config::Config;
use emulator_bridge::disk::{chunk_url, load_manifest, next_chunk_url, ChunkedFileSpec};
use emulator_bridge::input::InputEvent;
use emulator_bridge::logging::init_logging;
use emulator_bridge::persist::DirectoryExtraction;
use emulator_bridge::sync::{create_engine_channels, SyncCommand, SyncEngine, SyncStatus};
use emulator_bridge::transport::{fallback_channel, FileUpload, TransportPlan, VideoBlit};
use emulator_bridge::worker::{DemoCore, EmulatorWorker, WorkerConfig};

const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config_override = take_option(&mut args, "--config")?;

    let config = match &config_override {
        Some(path) => Config::load_from(Path::new(path))?,
        None => Config::load()?,
    };

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            None
        }
    };
    info!("Configuration loaded from {:?}", config.config_path());

    let command = args.remove(0);
    let result = match command.as_str() {
        "chunk-url" => cmd_chunk_url(&args),
        "next-chunk-url" => cmd_next_chunk_url(&args),
        "manifest" => cmd_manifest(&args),
        "snapshot" => cmd_snapshot(&args),
        "restore" => cmd_restore(&args),
        "demo" => cmd_demo(&config, args.iter().any(|a| a == "--fallback")),
        other => {
            print_help();
            bail!("Unknown command: {}", other)
        }
    };

    if let Err(e) = &result {
        error!("{} failed: {:#}", command, e);
    }
    result
}

/// Remove `--name value` from `args`, returning the value
fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{} requires a value", name);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("missing argument <{}>", what))
}

fn cmd_chunk_url(args: &[String]) -> Result<()> {
    let specs = load_manifest(Path::new(arg(args, 0, "manifest")?))?;
    let name = arg(args, 1, "name")?;
    let index: usize = arg(args, 2, "index")?
        .parse()
        .context("index must be a non-negative integer")?;

    let spec = specs
        .iter()
        .find(|spec| spec.name == name)
        .with_context(|| format!("no disk named {} in manifest", name))?;
    println!("{}", chunk_url(spec, index)?);
    Ok(())
}

fn cmd_next_chunk_url(args: &[String]) -> Result<()> {
    let specs = load_manifest(Path::new(arg(args, 0, "manifest")?))?;
    let url = arg(args, 1, "url")?;
    println!("{}", next_chunk_url(url, &specs)?);
    Ok(())
}

fn cmd_manifest(args: &[String]) -> Result<()> {
    let path = PathBuf::from(arg(args, 0, "file")?);
    let base_url = arg(args, 1, "base-url")?;
    let chunk_size = match args.get(2) {
        Some(size) => size.parse().context("chunk size must be a positive integer")?,
        None => DEFAULT_CHUNK_SIZE,
    };

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{:?} has no usable file name", path))?;
    let file = std::fs::File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
    let spec = ChunkedFileSpec::from_reader(name, base_url, std::io::BufReader::new(file), chunk_size)
        .with_context(|| format!("Failed to hash {:?}", path))?;

    info!(
        "Hashed {} ({} bytes, {} chunks)",
        spec.name,
        spec.total_size,
        spec.chunks.len()
    );
    println!("{}", serde_json::to_string_pretty(&vec![spec])?);
    Ok(())
}

fn cmd_snapshot(args: &[String]) -> Result<()> {
    let dir = Path::new(arg(args, 0, "dir")?);
    let out = Path::new(arg(args, 1, "out")?);

    let extraction = DirectoryExtraction::from_dir(dir)?;
    std::fs::write(out, extraction.to_msgpack()?)
        .with_context(|| format!("Failed to write snapshot: {:?}", out))?;

    info!(
        "Wrote {:?}: {} files, {} bytes",
        out,
        extraction.file_count(),
        extraction.total_bytes()
    );
    Ok(())
}

fn cmd_restore(args: &[String]) -> Result<()> {
    let snapshot = Path::new(arg(args, 0, "snapshot")?);
    let dest = Path::new(arg(args, 1, "dir")?);

    let extraction = read_snapshot(snapshot)?;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {:?}", dest))?;
    extraction.restore_into(dest)?;

    info!("Restored {} files into {:?}", extraction.file_count(), dest);
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<DirectoryExtraction> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read snapshot: {:?}", path))?;
    Ok(DirectoryExtraction::from_msgpack(&bytes)?)
}

/// Events replayed by the demo, in the order a user might produce them
fn demo_script() -> Vec<InputEvent> {
    vec![
        InputEvent::MouseMove { dx: 12, dy: 8 },
        InputEvent::MouseMove { dx: 3, dy: 3 },
        InputEvent::TouchStart { dx: 20, dy: 10 },
        InputEvent::MouseUp,
        InputEvent::KeyDown { key_code: 0x24 },
        InputEvent::KeyUp { key_code: 0x24 },
        InputEvent::Stop,
        InputEvent::Start,
    ]
}

fn cmd_demo(config: &Config, force_fallback: bool) -> Result<()> {
    let plan = TransportPlan::from_config(&config.transport, !force_fallback);
    plan.validate()?;
    info!(
        "Transport plan: video {}, input {}, audio {}, files {}",
        plan.video.kind(),
        plan.input.kind(),
        plan.audio.kind(),
        plan.files.kind()
    );

    let (commands_tx, commands_rx) = if plan.needs_command_channel() {
        let (tx, rx) = fallback_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let mut worker_config = WorkerConfig::new(&config.worker, &plan);
    if let Some(manifest) = &config.disks.manifest {
        worker_config = worker_config.with_disks(load_manifest(manifest)?);
    }
    if let Some(path) = &config.worker.persisted_data {
        worker_config = worker_config.with_persisted_data(read_snapshot(path)?);
    }

    let core = DemoCore::new(config.transport.screen_width, config.transport.screen_height);
    let (blit_tx, mut blit_rx) = mpsc::unbounded_channel();
    let mut worker = EmulatorWorker::new(worker_config, core, commands_rx)?.with_blit_sender(blit_tx);
    worker.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let worker_running = running.clone();
    let pace = config.sync.interval();
    let worker_handle = std::thread::Builder::new()
        .name("emulator-worker".to_string())
        .spawn(move || {
            if let Err(e) = worker.run(&worker_running, pace) {
                error!("Worker error: {:#}", e);
            }
            worker
        })
        .context("Failed to spawn worker thread")?;

    let (cmd_tx, cmd_rx, status_tx, mut status_rx) = create_engine_channels();
    let mut engine = SyncEngine::new(
        &config.sync,
        plan.input_sink(commands_tx.as_ref(), config.sync.spin_limit)?,
        plan.file_sink(commands_tx.as_ref())?,
        cmd_rx,
        status_tx,
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let engine_handle = tokio::spawn(async move { engine.run().await });

        let status_handle = tokio::spawn(async move {
            while let Ok(status) = status_rx.recv().await {
                match status {
                    SyncStatus::Error(e) => warn!("Sync error: {}", e),
                    other => info!("Sync status: {:?}", other),
                }
            }
        });

        cmd_tx
            .send(SyncCommand::UploadFile(FileUpload {
                name: "ReadMe.txt".to_string(),
                url: "blob:demo/readme".to_string(),
                size: 0,
            }))
            .await?;
        for event in demo_script() {
            cmd_tx.send(SyncCommand::Input(event)).await?;
            tokio::time::sleep(pace).await;
        }

        // Let the worker drain deferred events before shutting down.
        tokio::time::sleep(pace * 8).await;
        cmd_tx.send(SyncCommand::Shutdown).await?;
        engine_handle.await??;
        status_handle.abort();
        anyhow::Ok(())
    })?;

    std::thread::sleep(pace * 2);
    running.store(false, Ordering::Release);
    let worker = worker_handle
        .join()
        .map_err(|_| anyhow::anyhow!("Worker thread panicked"))?;

    let mut shared_blits = 0;
    let mut fallback_blits = 0;
    while let Ok(blit) = blit_rx.try_recv() {
        match blit {
            VideoBlit::SharedMemory => shared_blits += 1,
            VideoBlit::Fallback { .. } => fallback_blits += 1,
        }
    }

    let core = worker.core();
    info!(
        "Demo finished after {} worker cycles: pointer at {:?}, {} shared and {} fallback frames, files {:?}, disks {:?}",
        worker.cycles(),
        core.pointer(),
        shared_blits,
        fallback_blits,
        core.files(),
        core.disks()
    );
    Ok(())
}

fn print_help() {
    println!("emulator-bridge - UI/worker sync protocol tools");
    println!();
    println!("USAGE:");
    println!("    emulator-bridge [--config <path>] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    chunk-url <manifest> <name> <index>      Print the URL of one chunk");
    println!("    next-chunk-url <manifest> <url>          Print the URL following <url>");
    println!("    manifest <file> <base-url> [chunk-size]  Hash a disk image into a manifest");
    println!("    snapshot <dir> <out>                     Capture a directory snapshot");
    println!("    restore <snapshot> <dir>                 Restore a directory snapshot");
    println!("    demo [--fallback]                        Run the sync engine against a demo worker");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help         Print this help message");
    println!("    --config <path>    Use this config file instead of the default");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                   Set log level (e.g., debug, info, warn)");
    println!("    EMULATOR_BRIDGE_LOG_PATH   Directory for log files");
}
