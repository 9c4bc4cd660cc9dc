use clap::Parser;
use dmg_emu_headless::config::{self, Bgp};
use dmg_emu_headless::{RunOptions, run};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(about = "Run a DMG ROM without a display")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Config file (defaults to the per-user dmg-emu/headless.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<u64>,

    /// BGP value installed on load
    #[arg(long, value_enum)]
    bgp: Option<Bgp>,

    /// Write the last frame to this PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Print every executed instruction
    #[arg(long)]
    trace: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let mut cfg = config::load_from_file(&config_path);
    if let Some(frames) = args.frames {
        cfg.frames = frames;
    }
    if let Some(bgp) = args.bgp {
        cfg.bgp = bgp;
    }
    if args.screenshot.is_some() {
        cfg.screenshot = args.screenshot;
    }

    let opts = RunOptions {
        rom: args.rom,
        config: cfg,
        trace: args.trace,
    };
    match run(&opts, &mut std::io::stdout().lock()) {
        Ok(summary) => {
            println!(
                "{} frames, {} cycles, header {}; {}",
                summary.frames,
                summary.cycles,
                if summary.header_ok { "ok" } else { "bad" },
                summary.cpu_state
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
