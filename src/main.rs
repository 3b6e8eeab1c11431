use anyhow::Context as _;
use clap::Parser;
use log::{error, LevelFilter};
use rfshot::cdp::CdpEngine;
use rfshot::Renderer;
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::io;
use std::process::ExitCode;

mod cli;

use cli::Cli;

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = &cli.log {
        // appended to, so a re-exec under xvfb keeps the parent's lines
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }

    CombinedLogger::init(loggers)?;
    Ok(())
}

/// Replace this process with `xvfb-run <self> <args without --xvfb> --headful`.
#[cfg(unix)]
fn exec_under_xvfb(width: u32, height: u32) -> anyhow::Error {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return anyhow::Error::new(e).context("cannot locate own executable"),
    };
    let args = cli::xvfb_child_args(std::env::args_os().skip(1));
    log::debug!("Executing xvfb-run {} {:?}", exe.display(), args);

    let err = std::process::Command::new("xvfb-run")
        .arg(format!("--server-args=-screen 0, {}x{}x24", width, height))
        .arg(exe)
        .args(args)
        .exec();
    anyhow::Error::new(err).context("Failed to execute 'xvfb-run'")
}

#[cfg(not(unix))]
fn exec_under_xvfb(_width: u32, _height: u32) -> anyhow::Error {
    anyhow::anyhow!("--xvfb is only supported on unix systems")
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let request = cli.render_request();
    // fail on a bad URL before paying for a browser launch
    request.validate()?;

    let engine = CdpEngine::launch(cli.engine_config())?;
    let renderer = Renderer::new(&engine);
    match &cli.output {
        // the file is only created once the image is encoded, never left half written
        Some(path) => {
            let bytes = renderer.render_to_bytes(&request)?;
            fs::write(path, bytes).with_context(|| format!("cannot write {}", path.display()))?;
        }
        None => renderer.render_to_writer(&request, io::stdout().lock())?,
    }
    engine.close()?;
    Ok(())
}

fn report(err: &anyhow::Error) {
    error!("{:#}", err);
    if !log::log_enabled!(log::Level::Error) {
        eprintln!("rfshot: {:#}", err);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("rfshot: logging disabled: {:#}", e);
    }

    if let Some(screen) = &cli.xvfb {
        let err = exec_under_xvfb(screen[0], screen[1]);
        report(&err);
        return ExitCode::from(1);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(1)
        }
    }
}
