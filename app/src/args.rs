//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Backend selection for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliBackend {
    /// Prefer the native Vulkan backend, fall back to the simulated one.
    #[default]
    Auto,
    /// Native Vulkan backend via ash.
    Vulkan,
    /// Simulated device for machines without a GPU (headless).
    Sim,
}

/// Bindless compute filter sample.
#[derive(Parser, Debug)]
#[command(
    name = "cinder",
    about = "Runs a bindless compute filter over an image and presents the result",
    version
)]
pub struct Args {
    /// Image to filter. A built-in test pattern is used when omitted.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Graphics backend to use.
    #[arg(long, default_value = "auto", value_enum)]
    pub backend: CliBackend,

    /// Exit after rendering N frames (useful for testing).
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Disable vertical sync.
    #[arg(long)]
    pub no_vsync: bool,

    /// Enable GPU validation layers (slower but helps catch bugs).
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Disable GPU validation layers.
    #[arg(long, conflicts_with = "validation")]
    pub no_validation: bool,
}

impl Args {
    /// Parse the process arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether validation layers should be enabled.
    ///
    /// Explicit flags win; otherwise validation follows debug builds.
    pub fn validation_enabled(&self) -> bool {
        self.validation || (!self.no_validation && cfg!(debug_assertions))
    }
}
