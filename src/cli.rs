//! Command-line surface of the `rfshot` binary

use clap::{Parser, ValueEnum};
use rfshot::{
    AspectRatio, CaptureMode, EngineConfig, OutputFormat, RenderRequest, ScaleSpec, Viewport,
};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "rfshot",
    version,
    about = "Creates a screenshot of a website using a headless browser.",
    after_help = "Honors the http_proxy environment variable for outbound requests."
)]
pub struct Cli {
    /// URL of the page to render
    pub url: String,

    /// Write output to FILE instead of STDOUT
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output image format
    #[arg(short, long, value_name = "FORMAT", default_value = "png", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Geometry of the virtual browser window (0 means 'autodetect')
    #[arg(short, long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], default_values_t = [0u32, 0u32])]
    pub geometry: Vec<u32>,

    /// Scale the image to this size
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    pub scale: Option<Vec<u32>>,

    /// How scaling treats the aspect ratio
    #[arg(long = "aspect-ratio", value_enum, default_value_t = AspectRatioArg::Ignore)]
    pub aspect_ratio: AspectRatioArg,

    /// Time before the request will be canceled (0 waits forever)
    #[arg(short, long, value_name = "SECONDS", default_value_t = 0)]
    pub timeout: u64,

    /// Time to wait after loading before the screenshot is taken
    #[arg(short, long, value_name = "SECONDS", default_value_t = 0)]
    pub wait: u64,

    /// Grab the whole window instead of the frame (may be required for plugins)
    #[arg(short = 'W', long)]
    pub window: bool,

    /// Render the page on a transparent background
    #[arg(short = 'T', long, conflicts_with = "window")]
    pub transparent: bool,

    /// Enable an additional browser feature (repeatable)
    #[arg(short = 'F', long = "feature", value_enum, value_name = "FEATURE")]
    pub features: Vec<FeatureArg>,

    /// Start an 'xvfb' instance with the given screen size and run inside it
    #[arg(short = 'x', long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], conflicts_with = "display")]
    pub xvfb: Option<Vec<u32>>,

    /// Connect to X server at DISPLAY (runs a visible browser)
    #[arg(short, long, value_name = "DISPLAY")]
    pub display: Option<String>,

    /// Run a visible browser on the current display
    #[arg(long)]
    pub headful: bool,

    /// Browser executable to launch
    #[arg(long, value_name = "PATH")]
    pub chrome: Option<PathBuf>,

    /// Treat a failed page load as an error instead of capturing it anyway
    #[arg(long)]
    pub strict: bool,

    /// Show debugging information
    #[arg(long)]
    pub debug: bool,

    /// Also write log messages to FILE
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AspectRatioArg {
    Ignore,
    Keep,
    Expand,
    Crop,
}

impl From<AspectRatioArg> for AspectRatio {
    fn from(value: AspectRatioArg) -> Self {
        match value {
            AspectRatioArg::Ignore => AspectRatio::Ignore,
            AspectRatioArg::Keep => AspectRatio::Keep,
            AspectRatioArg::Expand => AspectRatio::Expand,
            AspectRatioArg::Crop => AspectRatio::Crop,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeatureArg {
    Javascript,
    Plugins,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse::<OutputFormat>().map_err(|e| e.to_string())
}

impl Cli {
    fn feature(&self, feature: FeatureArg) -> bool {
        self.features.contains(&feature)
    }

    fn geometry(&self) -> Viewport {
        Viewport {
            width: self.geometry.first().copied().unwrap_or(0),
            height: self.geometry.get(1).copied().unwrap_or(0),
        }
    }

    pub fn render_request(&self) -> RenderRequest {
        let capture_mode = if self.window {
            CaptureMode::WholeWindow
        } else if self.transparent {
            CaptureMode::TransparentFrame
        } else {
            CaptureMode::Frame
        };

        let scale = self.scale.as_ref().map(|size| ScaleSpec {
            width: size[0],
            height: size[1],
            aspect_ratio: self.aspect_ratio.into(),
        });

        RenderRequest {
            viewport: self.geometry(),
            timeout: Duration::from_secs(self.timeout),
            wait: Duration::from_secs(self.wait),
            capture_mode,
            scale,
            enable_javascript: self.feature(FeatureArg::Javascript),
            enable_plugins: self.feature(FeatureArg::Plugins),
            output_format: self.format,
            fail_on_load_error: self.strict,
            ..RenderRequest::new(self.url.clone())
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        config.headless = !self.headful;
        config.display = self.display.clone();
        config.chrome_path = self.chrome.clone();
        config.enable_plugins = self.feature(FeatureArg::Plugins);

        let geometry = self.geometry();
        if geometry.width > 0 {
            config.window.width = geometry.width;
        }
        if geometry.height > 0 {
            config.window.height = geometry.height;
        }
        config
    }
}

/// Arguments for re-running ourselves inside `xvfb-run`: the xvfb option and
/// its two values are dropped and `--headful` is added.
pub fn xvfb_child_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut skip = 0;
    for arg in args {
        if skip > 0 {
            skip -= 1;
            continue;
        }
        if arg == "-x" || arg == "--xvfb" {
            skip = 2;
            continue;
        }
        out.push(arg);
    }
    out.push(OsString::from("--headful"));
    out
}
