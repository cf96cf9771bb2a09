//! Bindless compute filter sample.
//!
//! Filters a source image with a single compute dispatch each frame and
//! presents the result through a triple-buffered swapchain. Resources are
//! addressed by bindless descriptor-table indices packed into an inline
//! record.

mod app;
mod args;
mod loader;
mod stats;

use args::{Args, CliBackend};
use loader::DecodedImage;

/// Test pattern size when no image is supplied.
const DEFAULT_PATTERN_SIZE: u32 = 512;

fn main() {
    let args = Args::parse_args();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    cinder_graphics::init();

    let source_image = match load_source(&args) {
        Ok(image) => image,
        Err(e) => {
            // Fatal setup failure: no partial or degraded mode.
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let result = match args.backend {
        CliBackend::Sim => app::run_sim(&args, &source_image),
        CliBackend::Vulkan => run_vulkan(args, source_image, false),
        CliBackend::Auto => run_vulkan(args, source_image, true),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn load_source(args: &Args) -> Result<DecodedImage, cinder_graphics::GraphicsError> {
    match &args.image {
        Some(path) => loader::load_image(path),
        None => {
            log::info!(
                "No --image given; using a {}x{} test pattern",
                DEFAULT_PATTERN_SIZE,
                DEFAULT_PATTERN_SIZE
            );
            Ok(loader::test_pattern(DEFAULT_PATTERN_SIZE, DEFAULT_PATTERN_SIZE))
        }
    }
}

#[cfg(feature = "vulkan-backend")]
fn run_vulkan(
    args: Args,
    source_image: DecodedImage,
    fall_back: bool,
) -> Result<(), cinder_graphics::GraphicsError> {
    use cinder_graphics::backend::vulkan::VulkanBackend;

    match VulkanBackend::new(args.validation_enabled()) {
        Ok(backend) => {
            app::run_windowed(args, source_image, std::sync::Arc::new(backend));
            Ok(())
        }
        Err(e) if fall_back => {
            log::warn!("Vulkan unavailable ({}), falling back to simulated device", e);
            app::run_sim(&args, &source_image)
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(feature = "vulkan-backend"))]
fn run_vulkan(
    args: Args,
    source_image: DecodedImage,
    fall_back: bool,
) -> Result<(), cinder_graphics::GraphicsError> {
    if fall_back {
        log::info!("Built without the Vulkan backend; using the simulated device");
        return app::run_sim(&args, &source_image);
    }
    Err(cinder_graphics::GraphicsError::FeatureNotSupported(
        "this binary was built without the vulkan-backend feature".to_string(),
    ))
}
