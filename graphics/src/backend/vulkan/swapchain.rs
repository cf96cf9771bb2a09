//! Vulkan swapchain and surface implementation.
//!
//! The swapchain images are registered as resources so the recorded
//! command stream can target them by handle like any other image. Binary
//! semaphores pace acquisition and presentation: each acquire consumes a
//! rotating acquire semaphore, the frame's submission waits on it and
//! signals the per-image render-finished semaphore, and the present waits
//! on that.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::device::SwapSurface;
use crate::error::GraphicsError;
use crate::types::{Extent2d, ResourceId, TextureFormat};

use super::VulkanBackend;

/// How the surface should be configured.
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Preferred backbuffer format.
    pub format: TextureFormat,
    /// Number of backbuffer images to request.
    pub image_count: u32,
    /// Whether presentation waits for vertical sync.
    pub vsync: bool,
}

struct AcquiredFrame {
    index: u32,
    acquire_semaphore: vk::Semaphore,
    submitted: bool,
}

/// Swapchain state owned by the backend.
pub struct VulkanSurface {
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    image_ids: Vec<ResourceId>,
    /// Rotating semaphores for image acquisition (one more than images, so
    /// a free one always exists).
    acquire_semaphores: Vec<vk::Semaphore>,
    acquire_cursor: usize,
    /// Per-image semaphores signaled by the frame's submission and waited
    /// on by the present.
    render_finished: Vec<vk::Semaphore>,
    acquired: Option<AcquiredFrame>,
}

impl VulkanSurface {
    /// Hand the pending frame's binary semaphores to the next submission.
    ///
    /// Returns `(wait, signal)` semaphore lists. Only the first submission
    /// after an acquire consumes the acquire semaphore.
    pub(crate) fn take_frame_semaphores(&mut self) -> (Vec<vk::Semaphore>, Vec<vk::Semaphore>) {
        match self.acquired.as_mut() {
            Some(frame) if !frame.submitted => {
                frame.submitted = true;
                (
                    vec![frame.acquire_semaphore],
                    vec![self.render_finished[frame.index as usize]],
                )
            }
            _ => (Vec::new(), Vec::new()),
        }
    }

    pub(crate) fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface_loader: &ash::khr::surface::Instance,
    ) {
        unsafe {
            for semaphore in &self.acquire_semaphores {
                device.destroy_semaphore(*semaphore, None);
            }
            for semaphore in &self.render_finished {
                device.destroy_semaphore(*semaphore, None);
            }
            swapchain_loader.destroy_swapchain(self.swapchain, None);
            surface_loader.destroy_surface(self.surface, None);
        }
    }
}

impl VulkanBackend {
    /// Create the window surface and swapchain.
    ///
    /// The swapchain images are registered as copy-destination resources
    /// and become reachable through the [`SwapSurface`] trait.
    pub fn create_surface<W>(&self, window: &W, config: &SurfaceConfig) -> Result<(), GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display_handle = window.display_handle().map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to get display handle: {e}"))
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to get window handle: {e}"))
        })?;

        let surface = unsafe {
            ash_window::create_surface(
                self.entry(),
                self.instance(),
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create surface: {:?}", e))
        })?;

        let supported = unsafe {
            self.surface_loader().get_physical_device_surface_support(
                self.physical_device(),
                self.queue_family(),
                surface,
            )
        }
        .unwrap_or(false);
        if !supported {
            unsafe { self.surface_loader().destroy_surface(surface, None) };
            return Err(GraphicsError::InitializationFailed(
                "Queue family cannot present to this surface".to_string(),
            ));
        }

        let capabilities = unsafe {
            self.surface_loader()
                .get_physical_device_surface_capabilities(self.physical_device(), surface)
        }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to query surface capabilities: {:?}",
                e
            ))
        })?;

        let formats = unsafe {
            self.surface_loader()
                .get_physical_device_surface_formats(self.physical_device(), surface)
        }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to query surface formats: {:?}", e))
        })?;

        let requested = super::convert_format(config.format);
        let surface_format = formats
            .iter()
            .find(|f| f.format == requested)
            .copied()
            .unwrap_or(formats[0]);

        let present_modes = unsafe {
            self.surface_loader()
                .get_physical_device_surface_present_modes(self.physical_device(), surface)
        }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to query present modes: {:?}",
                e
            ))
        })?;

        let present_mode = if config.vsync {
            vk::PresentModeKHR::FIFO
        } else if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            vk::PresentModeKHR::IMMEDIATE
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: config.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: config.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = config.image_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe {
            self.swapchain_loader()
                .create_swapchain(&swapchain_info, None)
        }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create swapchain: {:?}", e))
        })?;

        let images = unsafe { self.swapchain_loader().get_swapchain_images(swapchain) }.map_err(
            |e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to get swapchain images: {:?}",
                    e
                ))
            },
        )?;

        let image_ids: Vec<ResourceId> = images
            .iter()
            .map(|&image| {
                self.register_swapchain_image(
                    image,
                    surface_format.format,
                    Extent2d::new(extent.width, extent.height),
                )
            })
            .collect();

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let make_semaphore = || {
            unsafe { self.device().create_semaphore(&semaphore_info, None) }.map_err(|e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create semaphore: {:?}",
                    e
                ))
            })
        };

        let mut acquire_semaphores = Vec::with_capacity(images.len() + 1);
        for _ in 0..images.len() + 1 {
            acquire_semaphores.push(make_semaphore()?);
        }
        let mut render_finished = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            render_finished.push(make_semaphore()?);
        }

        log::info!(
            "Created swapchain: {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            present_mode
        );

        *self.surface.lock() = Some(VulkanSurface {
            surface,
            swapchain,
            image_ids,
            acquire_semaphores,
            acquire_cursor: 0,
            render_finished,
            acquired: None,
        });

        Ok(())
    }
}

impl SwapSurface for VulkanBackend {
    fn image_count(&self) -> usize {
        self.surface
            .lock()
            .as_ref()
            .map(|s| s.image_ids.len())
            .unwrap_or(0)
    }

    fn current_image_index(&self) -> usize {
        let mut guard = self.surface.lock();
        let surface = guard.as_mut().expect("surface not configured");

        if let Some(frame) = &surface.acquired {
            return frame.index as usize;
        }

        let semaphore = surface.acquire_semaphores[surface.acquire_cursor];
        surface.acquire_cursor = (surface.acquire_cursor + 1) % surface.acquire_semaphores.len();

        let (index, suboptimal) = unsafe {
            self.swapchain_loader().acquire_next_image(
                surface.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .expect("failed to acquire swapchain image");
        if suboptimal {
            log::trace!("swapchain suboptimal on acquire");
        }

        surface.acquired = Some(AcquiredFrame {
            index,
            acquire_semaphore: semaphore,
            submitted: false,
        });
        index as usize
    }

    fn image(&self, index: usize) -> ResourceId {
        self.surface
            .lock()
            .as_ref()
            .expect("surface not configured")
            .image_ids[index]
    }

    fn present(&self) -> Result<(), GraphicsError> {
        let mut guard = self.surface.lock();
        let surface = guard.as_mut().expect("surface not configured");

        let frame = surface.acquired.take().ok_or_else(|| {
            GraphicsError::InvalidParameter("present with no acquired image".to_string())
        })?;
        if !frame.submitted {
            return Err(GraphicsError::InvalidParameter(
                "present before submitting the frame".to_string(),
            ));
        }

        let wait_semaphores = [surface.render_finished[frame.index as usize]];
        let swapchains = [surface.swapchain];
        let image_indices = [frame.index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader()
                .queue_present(self.graphics_queue(), &present_info)
        };

        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::trace!("swapchain suboptimal on present");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GraphicsError::SurfaceOutdated),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(GraphicsError::SurfaceLost),
            Err(e) => Err(GraphicsError::Internal(format!(
                "Failed to present: {:?}",
                e
            ))),
        }
    }
}
