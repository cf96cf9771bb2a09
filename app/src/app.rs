//! Application drivers: the windowed Vulkan path and the headless
//! simulated path.

use std::sync::Arc;

use cinder_graphics::{
    DescriptorIndexAllocator, Extent2d, FilterIndices, FilterRenderer, GpuQueue, GraphicsError,
    ImageDesc, ImageUsage, ResourceId, SamplerPreset, SimGpu, TextureFormat, ViewDesc, WaitPolicy,
    DEFAULT_WAIT_TIMEOUT,
};

use crate::args::Args;
use crate::loader::DecodedImage;
use crate::stats::FrameStats;

/// Frames in flight, matching the swapchain image count.
pub const FRAME_COUNT: usize = 3;

/// Default frame budget for headless runs when `--max-frames` is absent.
const DEFAULT_SIM_FRAMES: u64 = 120;

/// Allocate the filter's bindless indices.
///
/// Table exhaustion or a rejected view is fatal here: the dispatch cannot
/// run without its handles.
fn allocate_filter_indices(
    allocator: &mut DescriptorIndexAllocator<'_>,
    source: ResourceId,
    result: ResourceId,
) -> Result<FilterIndices, GraphicsError> {
    let tex_in = allocator.allocate_view(ViewDesc::sampled(source));
    let tex_out = allocator.allocate_view(ViewDesc::storage(result));
    if !tex_in.is_valid() || !tex_out.is_valid() {
        return Err(GraphicsError::DescriptorTableFull("resource"));
    }

    let smp_linear = allocator.allocate_sampler(SamplerPreset::PointClamp);
    if !smp_linear.is_valid() {
        return Err(GraphicsError::DescriptorTableFull("sampler"));
    }

    Ok(FilterIndices {
        tex_in: tex_in.get(),
        tex_out: tex_out.get(),
        smp_linear: smp_linear.get(),
    })
}

/// Run the sample headless on the simulated device.
pub fn run_sim(args: &Args, source_image: &DecodedImage) -> Result<(), GraphicsError> {
    let gpu = SimGpu::new(FRAME_COUNT);
    log::info!("Using {} backend", gpu.name());

    let extent = Extent2d::new(source_image.width, source_image.height);
    let source = gpu.create_image(
        &ImageDesc::new(
            extent.width,
            extent.height,
            TextureFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        )
        .with_label("source"),
    )?;
    let result = gpu.create_image(
        &ImageDesc::new(
            extent.width,
            extent.height,
            TextureFormat::Rgba8Unorm,
            ImageUsage::STORAGE | ImageUsage::COPY_SRC,
        )
        .with_label("result"),
    )?;

    // Stage the source texels; the uploaders collection stays alive until
    // the initial wait confirms the upload completed.
    let mut uploaders = Vec::new();
    let upload_done = gpu.upload_image(source, &source_image.pixels, &mut uploaders)?;
    gpu.wait_until(upload_done, Some(DEFAULT_WAIT_TIMEOUT))?;
    gpu.retire_staging(uploaders);

    let mut allocator = DescriptorIndexAllocator::new(&gpu);
    let indices = allocate_filter_indices(&mut allocator, source, result)?;
    let pipeline = gpu.create_filter_pipeline()?;

    let mut renderer = FilterRenderer::new(
        Arc::new(gpu.clone()),
        FRAME_COUNT,
        WaitPolicy::default(),
        pipeline,
        source,
        result,
        extent,
        indices,
    );

    let frames = args.max_frames.unwrap_or(DEFAULT_SIM_FRAMES);
    let mut stats = FrameStats::new();
    for _ in 0..frames {
        renderer.render_frame(&gpu)?;
        if let Some(fps) = stats.tick() {
            log::info!("fps: {:.2}", fps);
        }
    }

    renderer.wait_idle()?;
    log::info!("Rendered {} frames on the simulated device", frames);
    Ok(())
}

#[cfg(feature = "vulkan-backend")]
pub use windowed::run_windowed;

#[cfg(feature = "vulkan-backend")]
mod windowed {
    use super::*;

    use winit::application::ApplicationHandler;
    use winit::event::{ElementState, WindowEvent};
    use winit::event_loop::{ActiveEventLoop, EventLoop};
    use winit::keyboard::{Key, NamedKey};
    use winit::window::{Window, WindowId};

    use cinder_graphics::backend::vulkan::swapchain::SurfaceConfig;
    use cinder_graphics::backend::vulkan::VulkanBackend;

    const FILTER_KERNEL: &str = include_str!("../shaders/image_filter.wgsl");

    struct RenderContext {
        backend: Arc<VulkanBackend>,
        renderer: FilterRenderer,
    }

    /// Windowed application driving the Vulkan backend.
    pub struct WindowedApp {
        args: Args,
        source_image: DecodedImage,
        backend: Option<Arc<VulkanBackend>>,
        window: Option<Window>,
        context: Option<RenderContext>,
        stats: FrameStats,
        frame_number: u64,
        paused: bool,
        show_fps: bool,
        running: bool,
    }

    impl WindowedApp {
        fn new(args: Args, source_image: DecodedImage, backend: Arc<VulkanBackend>) -> Self {
            Self {
                args,
                source_image,
                backend: Some(backend),
                window: None,
                context: None,
                stats: FrameStats::new(),
                frame_number: 0,
                paused: false,
                show_fps: true,
                running: true,
            }
        }

        /// Configure the surface and build the renderer.
        fn init_graphics(&mut self) -> Result<(), GraphicsError> {
            let window = self.window.as_ref().expect("window must exist");
            let backend = self.backend.take().expect("backend must exist");

            let extent = Extent2d::new(self.source_image.width, self.source_image.height);
            backend.create_surface(
                window,
                &SurfaceConfig {
                    width: extent.width,
                    height: extent.height,
                    format: TextureFormat::Bgra8Unorm,
                    image_count: FRAME_COUNT as u32,
                    vsync: !self.args.no_vsync,
                },
            )?;

            let source = backend.create_image(
                &ImageDesc::new(
                    extent.width,
                    extent.height,
                    TextureFormat::Rgba8Unorm,
                    ImageUsage::SAMPLED | ImageUsage::COPY_DST,
                )
                .with_label("source"),
            )?;
            let result = backend.create_image(
                &ImageDesc::new(
                    extent.width,
                    extent.height,
                    TextureFormat::Rgba8Unorm,
                    ImageUsage::STORAGE | ImageUsage::COPY_SRC,
                )
                .with_label("result"),
            )?;

            let mut uploaders = Vec::new();
            let upload_done =
                backend.upload_image(source, &self.source_image.pixels, &mut uploaders)?;
            backend.wait_until(upload_done, Some(DEFAULT_WAIT_TIMEOUT))?;
            backend.retire_staging(uploaders);

            let mut allocator = DescriptorIndexAllocator::new(backend.as_ref());
            let indices = allocate_filter_indices(&mut allocator, source, result)?;
            drop(allocator);

            let pipeline = backend.create_filter_pipeline(FILTER_KERNEL)?;

            let renderer = FilterRenderer::new(
                backend.clone(),
                FRAME_COUNT,
                WaitPolicy::default(),
                pipeline,
                source,
                result,
                extent,
                indices,
            );

            log::info!(
                "Graphics initialized: {} ({}x{}, {} frames in flight)",
                backend.name(),
                extent.width,
                extent.height,
                FRAME_COUNT
            );

            self.context = Some(RenderContext { backend, renderer });
            Ok(())
        }

        fn render_frame(&mut self) {
            let Some(ctx) = &mut self.context else {
                return;
            };

            match ctx.renderer.render_frame(ctx.backend.as_ref()) {
                Ok(()) => {
                    self.frame_number += 1;
                }
                Err(GraphicsError::SurfaceOutdated) => {
                    log::warn!("surface outdated; skipping frame");
                    return;
                }
                Err(e) => {
                    log::error!("render failed: {}", e);
                    self.running = false;
                    return;
                }
            }

            if let Some(fps) = self.stats.tick() {
                if let Some(window) = &self.window {
                    let title = if self.show_fps {
                        format!("Cinder    fps: {:.2}", fps)
                    } else {
                        "Cinder    fps: [F1]".to_string()
                    };
                    window.set_title(&title);
                }
            }

            if let Some(max_frames) = self.args.max_frames {
                if self.frame_number >= max_frames {
                    log::info!("Reached max frames limit ({}), exiting", max_frames);
                    self.running = false;
                }
            }
        }

        /// Drain the device before tearing anything down.
        fn shutdown(&mut self) {
            if let Some(ctx) = &mut self.context {
                if let Err(e) = ctx.renderer.wait_idle() {
                    log::error!("wait_idle on shutdown failed: {}", e);
                }
            }
        }
    }

    impl ApplicationHandler for WindowedApp {
        fn resumed(&mut self, event_loop: &ActiveEventLoop) {
            if self.window.is_some() {
                return;
            }

            // The window matches the image, like the sample it descends
            // from.
            let attributes = Window::default_attributes()
                .with_title("Cinder")
                .with_inner_size(winit::dpi::PhysicalSize::new(
                    self.source_image.width,
                    self.source_image.height,
                ))
                .with_resizable(false);

            match event_loop.create_window(attributes) {
                Ok(window) => {
                    self.window = Some(window);
                }
                Err(e) => {
                    log::error!("Failed to create window: {}", e);
                    event_loop.exit();
                    return;
                }
            }

            if let Err(e) = self.init_graphics() {
                log::error!("Failed to initialize graphics: {}", e);
                event_loop.exit();
            }
        }

        fn window_event(
            &mut self,
            event_loop: &ActiveEventLoop,
            _id: WindowId,
            event: WindowEvent,
        ) {
            match event {
                WindowEvent::CloseRequested => {
                    self.running = false;
                    self.shutdown();
                    event_loop.exit();
                }

                WindowEvent::RedrawRequested => {
                    if self.running && !self.paused {
                        self.render_frame();
                    }

                    if !self.running {
                        self.shutdown();
                        event_loop.exit();
                    } else if let Some(window) = &self.window {
                        window.request_redraw();
                    }
                }

                WindowEvent::KeyboardInput { event, .. } => {
                    if event.state != ElementState::Released {
                        return;
                    }
                    match event.logical_key {
                        Key::Named(NamedKey::Escape) => {
                            self.running = false;
                            self.shutdown();
                            event_loop.exit();
                        }
                        Key::Named(NamedKey::Space) => {
                            self.paused = !self.paused;
                            if !self.paused {
                                if let Some(window) = &self.window {
                                    window.request_redraw();
                                }
                            }
                        }
                        Key::Named(NamedKey::F1) => {
                            self.show_fps = !self.show_fps;
                            if let Some(window) = &self.window {
                                let title = match (self.show_fps, self.stats.fps()) {
                                    (true, Some(fps)) => format!("Cinder    fps: {:.2}", fps),
                                    (true, None) => "Cinder".to_string(),
                                    (false, _) => "Cinder    fps: [F1]".to_string(),
                                };
                                window.set_title(&title);
                            }
                        }
                        _ => {}
                    }
                }

                _ => {}
            }
        }

        fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
            if let Some(window) = &self.window {
                if !self.paused {
                    window.request_redraw();
                }
            }
        }
    }

    /// Run the windowed sample on a pre-created Vulkan backend.
    pub fn run_windowed(args: Args, source_image: DecodedImage, backend: Arc<VulkanBackend>) {
        let event_loop = EventLoop::new().expect("Failed to create event loop");
        let mut app = WindowedApp::new(args, source_image, backend);
        event_loop.run_app(&mut app).expect("Event loop error");
    }
}
