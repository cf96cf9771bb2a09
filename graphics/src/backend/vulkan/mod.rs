//! Native Vulkan backend using ash.
//!
//! Implements the device collaborator traits over a real device:
//!
//! - the completion counter is a timeline semaphore; `wait_until` maps to
//!   `vkWaitSemaphores` and `completed_value` to
//!   `vkGetSemaphoreCounterValue`
//! - recorded command lists are translated into a one-time-submit command
//!   buffer at submission; spent buffers are freed once the timeline passes
//!   their signal value
//! - the bindless tables live in two update-after-bind descriptor sets
//!   (see [`descriptors`])
//!
//! Validation layers are enabled on request and surface their output
//! through the debug-utils messenger.

pub mod descriptors;
mod pipeline;
pub mod swapchain;

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;

use crate::barrier::{BarrierDesc, ResourceState};
use crate::bindless::{DescriptorIndex, TableKind, ViewDesc, ViewKind};
use crate::command::{Command, CommandList};
use crate::device::{DescriptorSink, GpuQueue};
use crate::error::GraphicsError;
use crate::staging::StagingBuffer;
use crate::types::{Extent2d, ImageDesc, ImageUsage, PipelineHandle, ResourceId, SamplerPreset, TextureFormat};

use self::descriptors::BindlessTables;
use self::swapchain::VulkanSurface;

/// Required Vulkan API version. Timeline semaphores and descriptor indexing
/// are core in 1.2.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// An image tracked by the backend.
pub(crate) struct VulkanImage {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) format: vk::Format,
    pub(crate) extent: Extent2d,
    allocation: Option<Allocation>,
    /// Swapchain images are owned by the swapchain, not by us.
    owned: bool,
}

/// A buffer tracked by the backend (staging only in this sample).
struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

/// Native Vulkan backend.
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    allocator: Mutex<Option<Allocator>>,
    command_pool: vk::CommandPool,
    /// The completion counter.
    timeline: vk::Semaphore,
    /// Signal values for setup submissions (uploads), issued before the
    /// frame scheduler exists.
    setup_value: AtomicU64,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    bindless: BindlessTables,
    images: Mutex<HashMap<ResourceId, VulkanImage>>,
    buffers: Mutex<HashMap<ResourceId, VulkanBuffer>>,
    pipelines: Mutex<HashMap<u64, pipeline::ComputePipeline>>,
    next_id: AtomicU64,
    /// Command buffers in flight, retired once the timeline passes their
    /// signal value.
    in_flight: Mutex<Vec<(u64, vk::CommandBuffer)>>,
    pub(crate) surface: Mutex<Option<VulkanSurface>>,
}

impl VulkanBackend {
    /// Create the backend: instance, device, queue, allocator, timeline,
    /// and bindless tables.
    pub fn new(validation: bool) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let (instance, debug_messenger, debug_utils) = create_instance(&entry, validation)?;
        let physical_device = select_physical_device(&instance)?;
        let queue_family = find_graphics_queue_family(&instance, physical_device)?;
        let device = create_logical_device(&instance, physical_device, queue_family)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let command_pool =
            unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create command pool: {:?}",
                    e
                ))
            })?;

        // The completion counter: a timeline semaphore starting at 0.
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let timeline = unsafe { device.create_semaphore(&semaphore_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to create timeline semaphore: {:?}",
                e
            ))
        })?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let bindless = BindlessTables::new(device.clone())?;

        log::info!("Vulkan backend initialized (validation: {})", validation);

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            debug_utils,
            physical_device,
            device,
            queue,
            queue_family,
            allocator: Mutex::new(Some(allocator)),
            command_pool,
            timeline,
            setup_value: AtomicU64::new(0),
            surface_loader,
            swapchain_loader,
            bindless,
            images: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(Vec::new()),
            surface: Mutex::new(None),
        })
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        "Vulkan (ash)"
    }

    pub(crate) fn device(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub(crate) fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub(crate) fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    pub(crate) fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub(crate) fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub(crate) fn graphics_queue(&self) -> vk::Queue {
        self.queue
    }

    pub(crate) fn issue_id(&self) -> ResourceId {
        ResourceId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register_swapchain_image(
        &self,
        image: vk::Image,
        format: vk::Format,
        extent: Extent2d,
    ) -> ResourceId {
        let id = self.issue_id();
        self.images.lock().insert(
            id,
            VulkanImage {
                image,
                view: vk::ImageView::null(),
                format,
                extent,
                allocation: None,
                owned: false,
            },
        );
        id
    }

    /// Create a GPU-only 2D image with a color view.
    pub fn create_image(&self, desc: &ImageDesc) -> Result<ResourceId, GraphicsError> {
        let format = convert_format(desc.format);
        let usage = convert_image_usage(desc.usage);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self
            .allocator
            .lock()
            .as_mut()
            .expect("allocator destroyed")
            .allocate(&AllocationCreateDesc {
                name: desc.label.as_deref().unwrap_or("image"),
                requirements,
                location: gpu_allocator::MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate image memory: {}",
                    e
                ))
            })?;

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to bind image memory: {:?}", e))
        })?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })?;

        let id = self.issue_id();
        self.images.lock().insert(
            id,
            VulkanImage {
                image,
                view,
                format,
                extent: desc.extent,
                allocation: Some(allocation),
                owned: true,
            },
        );

        log::trace!(
            "created image {:?} {}x{} ({:?})",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            format
        );
        Ok(id)
    }

    /// Upload texel data into an image through a staging buffer.
    ///
    /// The staging handle is pushed into `uploaders`, which must stay alive
    /// until the returned signal value completes; pass the collection to
    /// [`retire_staging`](Self::retire_staging) afterwards. The image ends
    /// in `ShaderResource` state.
    pub fn upload_image(
        &self,
        image: ResourceId,
        data: &[u8],
        uploaders: &mut Vec<StagingBuffer>,
    ) -> Result<u64, GraphicsError> {
        let (vk_image, extent) = {
            let images = self.images.lock();
            let entry = images.get(&image).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("unknown image {:?}", image))
            })?;
            (entry.image, entry.extent)
        };

        // Staging buffer in host-visible memory.
        let buffer_info = vk::BufferCreateInfo::default()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create staging buffer: {:?}",
                e
            ))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = self
            .allocator
            .lock()
            .as_mut()
            .expect("allocator destroyed")
            .allocate(&AllocationCreateDesc {
                name: "staging",
                requirements,
                location: gpu_allocator::MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate staging memory: {}",
                    e
                ))
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            GraphicsError::Internal(format!("Failed to bind staging memory: {:?}", e))
        })?;

        let mapped = allocation
            .mapped_ptr()
            .ok_or_else(|| GraphicsError::Internal("staging buffer is not mapped".to_string()))?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr() as *mut u8, data.len());
        }

        // Record the transfer.
        let cmd = self.allocate_command_buffer()?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to begin upload command buffer: {:?}", e))
        })?;

        let to_transfer = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk_image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
        }

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                vk_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        let to_shader = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk_image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        }

        unsafe { self.device.end_command_buffer(cmd) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to end upload command buffer: {:?}", e))
        })?;

        // Setup submissions claim timeline values before the scheduler
        // exists; the scheduler starts its markers above the completed
        // value after the initial wait.
        let signal = self.setup_value.fetch_add(1, Ordering::SeqCst) + 1;
        self.submit_raw(cmd, &[], &[], signal)?;

        let staging_id = self.issue_id();
        self.buffers.lock().insert(
            staging_id,
            VulkanBuffer {
                buffer,
                allocation: Some(allocation),
                size: data.len() as u64,
            },
        );
        uploaders.push(StagingBuffer::new(
            staging_id,
            data.len(),
            Some(format!("upload-{}", image.raw())),
        ));

        Ok(signal)
    }

    /// Destroy retired staging buffers. The submissions referencing them
    /// must have completed.
    pub fn retire_staging(&self, uploaders: Vec<StagingBuffer>) {
        let mut buffers = self.buffers.lock();
        let mut allocator_guard = self.allocator.lock();
        let allocator = allocator_guard.as_mut().expect("allocator destroyed");
        for staging in uploaders {
            if let Some(entry) = buffers.remove(&staging.id()) {
                if let Some(allocation) = entry.allocation {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free staging allocation: {}", e);
                    }
                }
                unsafe { self.device.destroy_buffer(entry.buffer, None) };
            }
        }
    }

    /// Compile the filter kernel and build its compute pipeline.
    pub fn create_filter_pipeline(
        &self,
        wgsl_source: &str,
    ) -> Result<PipelineHandle, GraphicsError> {
        let entry_point = CString::new("main").unwrap();
        let set_layouts = self.bindless.set_layouts();
        let compiled = pipeline::create_filter_pipeline(
            &self.device,
            &set_layouts,
            wgsl_source,
            &entry_point,
        )?;

        let handle = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pipelines.lock().insert(handle, compiled);
        Ok(PipelineHandle::from_raw(handle))
    }

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer, GraphicsError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to allocate command buffer: {:?}", e))
        })?;
        Ok(buffers[0])
    }

    /// Free command buffers whose signal value the timeline has passed.
    fn reclaim_spent_command_buffers(&self) {
        let completed = self.completed_value();
        let mut in_flight = self.in_flight.lock();
        let mut spent = Vec::new();
        in_flight.retain(|(value, cmd)| {
            if *value <= completed {
                spent.push(*cmd);
                false
            } else {
                true
            }
        });
        if !spent.is_empty() {
            unsafe { self.device.free_command_buffers(self.command_pool, &spent) };
        }
    }

    /// Submit a recorded command buffer, signaling the timeline with
    /// `signal_value` plus any binary semaphores the surface needs.
    fn submit_raw(
        &self,
        cmd: vk::CommandBuffer,
        wait_binary: &[vk::Semaphore],
        signal_binary: &[vk::Semaphore],
        signal_value: u64,
    ) -> Result<(), GraphicsError> {
        let mut wait_semaphores = Vec::with_capacity(wait_binary.len());
        let mut wait_stages = Vec::with_capacity(wait_binary.len());
        let mut wait_values = Vec::with_capacity(wait_binary.len());
        for sem in wait_binary {
            wait_semaphores.push(*sem);
            wait_stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
            wait_values.push(0);
        }

        let mut signal_semaphores = vec![self.timeline];
        let mut signal_values = vec![signal_value];
        for sem in signal_binary {
            signal_semaphores.push(*sem);
            signal_values.push(0);
        }

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
            other => GraphicsError::Internal(format!("Queue submit failed: {:?}", other)),
        })?;

        self.in_flight.lock().push((signal_value, cmd));
        Ok(())
    }

    /// Translate a recorded command list into Vulkan commands.
    fn encode(&self, cmd: vk::CommandBuffer, commands: &CommandList) -> Result<(), GraphicsError> {
        let images = self.images.lock();
        let pipelines = self.pipelines.lock();
        let mut bound_layout: Option<vk::PipelineLayout> = None;

        for command in commands.commands() {
            match command {
                Command::Transition(barriers) => {
                    self.encode_barriers(cmd, barriers, &images)?;
                }
                Command::BindComputePipeline(handle) => {
                    let compiled = pipelines.get(&handle.raw()).ok_or_else(|| {
                        GraphicsError::InvalidParameter(format!(
                            "unknown pipeline {:?}",
                            handle
                        ))
                    })?;
                    unsafe {
                        self.device.cmd_bind_pipeline(
                            cmd,
                            vk::PipelineBindPoint::COMPUTE,
                            compiled.pipeline,
                        );
                        self.device.cmd_bind_descriptor_sets(
                            cmd,
                            vk::PipelineBindPoint::COMPUTE,
                            compiled.layout,
                            0,
                            &self.bindless.sets(),
                            &[],
                        );
                    }
                    bound_layout = Some(compiled.layout);
                }
                Command::PushRecord(record) => {
                    let layout = bound_layout.ok_or_else(|| {
                        GraphicsError::InvalidParameter(
                            "push record with no bound pipeline".to_string(),
                        )
                    })?;
                    unsafe {
                        self.device.cmd_push_constants(
                            cmd,
                            layout,
                            vk::ShaderStageFlags::COMPUTE,
                            0,
                            record.bytes(),
                        );
                    }
                }
                Command::Dispatch { groups } => unsafe {
                    self.device.cmd_dispatch(cmd, groups[0], groups[1], groups[2]);
                },
                Command::CopyImage { src, dst } => {
                    self.encode_copy(cmd, *src, *dst, &images)?;
                }
            }
        }
        Ok(())
    }

    fn encode_barriers(
        &self,
        cmd: vk::CommandBuffer,
        barriers: &[BarrierDesc],
        images: &HashMap<ResourceId, VulkanImage>,
    ) -> Result<(), GraphicsError> {
        let mut image_barriers = Vec::with_capacity(barriers.len());
        let mut src_stages = vk::PipelineStageFlags::empty();
        let mut dst_stages = vk::PipelineStageFlags::empty();

        for barrier in barriers {
            let entry = images.get(&barrier.resource).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "barrier on unknown resource {:?}",
                    barrier.resource
                ))
            })?;

            image_barriers.push(
                vk::ImageMemoryBarrier::default()
                    .old_layout(state_layout(barrier.from))
                    .new_layout(state_layout(barrier.to))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(entry.image)
                    .subresource_range(color_subresource_range())
                    .src_access_mask(state_access(barrier.from))
                    .dst_access_mask(state_access(barrier.to)),
            );
            src_stages |= state_stage(barrier.from);
            dst_stages |= state_stage(barrier.to);
        }

        if !image_barriers.is_empty() {
            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    src_stages,
                    dst_stages,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &image_barriers,
                );
            }
        }
        Ok(())
    }

    fn encode_copy(
        &self,
        cmd: vk::CommandBuffer,
        src: ResourceId,
        dst: ResourceId,
        images: &HashMap<ResourceId, VulkanImage>,
    ) -> Result<(), GraphicsError> {
        let src_entry = images.get(&src).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("copy from unknown resource {:?}", src))
        })?;
        let dst_entry = images.get(&dst).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("copy to unknown resource {:?}", dst))
        })?;

        let extent = src_entry.extent;
        if src_entry.format == dst_entry.format {
            let region = vk::ImageCopy::default()
                .src_subresource(color_subresource_layers())
                .dst_subresource(color_subresource_layers())
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            unsafe {
                self.device.cmd_copy_image(
                    cmd,
                    src_entry.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_entry.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        } else {
            // Raw copies between differing formats would reinterpret bits
            // (RGBA result into a BGRA backbuffer swaps channels); blit
            // converts instead.
            let src_offsets = [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: extent.width as i32,
                    y: extent.height as i32,
                    z: 1,
                },
            ];
            let dst_offsets = [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_entry.extent.width as i32,
                    y: dst_entry.extent.height as i32,
                    z: 1,
                },
            ];
            let region = vk::ImageBlit::default()
                .src_subresource(color_subresource_layers())
                .src_offsets(src_offsets)
                .dst_subresource(color_subresource_layers())
                .dst_offsets(dst_offsets);
            unsafe {
                self.device.cmd_blit_image(
                    cmd,
                    src_entry.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_entry.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                    vk::Filter::NEAREST,
                );
            }
        }
        Ok(())
    }
}

impl GpuQueue for VulkanBackend {
    fn submit(&self, commands: &CommandList, signal_value: u64) -> Result<(), GraphicsError> {
        self.reclaim_spent_command_buffers();

        let cmd = self.allocate_command_buffer()?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to begin command buffer: {:?}", e))
        })?;

        self.encode(cmd, commands)?;

        unsafe { self.device.end_command_buffer(cmd) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to end command buffer: {:?}", e))
        })?;

        // If a swapchain image is acquired but not yet rendered to, this
        // submission consumes its acquire semaphore and signals the
        // per-image render-finished semaphore for the present.
        let (wait_binary, signal_binary) = {
            let mut surface = self.surface.lock();
            match surface.as_mut() {
                Some(surface) => surface.take_frame_semaphores(),
                None => (Vec::new(), Vec::new()),
            }
        };

        self.submit_raw(cmd, &wait_binary, &signal_binary, signal_value)
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.device.get_semaphore_counter_value(self.timeline) }.unwrap_or_else(|e| {
            log::error!("Failed to read timeline value: {:?}", e);
            0
        })
    }

    fn wait_until(&self, value: u64, timeout: Option<Duration>) -> Result<(), GraphicsError> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        let timeout_ns = timeout.map_or(u64::MAX, |t| t.as_nanos().min(u64::MAX as u128) as u64);
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GraphicsError::DeviceTimeout {
                value,
                timeout: timeout.unwrap_or(Duration::MAX),
            }),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GraphicsError::DeviceLost),
            Err(e) => Err(GraphicsError::Internal(format!(
                "Timeline wait failed: {:?}",
                e
            ))),
        }
    }
}

impl DescriptorSink for VulkanBackend {
    fn bind_view(&self, index: DescriptorIndex, view: &ViewDesc) -> Result<(), GraphicsError> {
        match view.kind {
            ViewKind::SampledImage | ViewKind::StorageImage => {
                let images = self.images.lock();
                let entry = images.get(&view.resource).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!(
                        "view over unknown image {:?}",
                        view.resource
                    ))
                })?;
                if entry.view == vk::ImageView::null() {
                    return Err(GraphicsError::InvalidParameter(
                        "image has no shader-visible view".to_string(),
                    ));
                }
                if view.kind == ViewKind::SampledImage {
                    self.bindless.write_sampled_image(index.get(), entry.view);
                } else {
                    self.bindless.write_storage_image(index.get(), entry.view);
                }
            }
            ViewKind::UniformBuffer | ViewKind::StorageBuffer => {
                let buffers = self.buffers.lock();
                let entry = buffers.get(&view.resource).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!(
                        "view over unknown buffer {:?}",
                        view.resource
                    ))
                })?;
                self.bindless.write_buffer(
                    index.get(),
                    entry.buffer,
                    entry.size,
                    view.kind == ViewKind::UniformBuffer,
                );
            }
        }
        Ok(())
    }

    fn bind_sampler(
        &self,
        index: DescriptorIndex,
        preset: SamplerPreset,
    ) -> Result<(), GraphicsError> {
        self.bindless.write_sampler(index.get(), preset)
    }

    fn table_capacity(&self, table: TableKind) -> u32 {
        self.bindless.capacity(table)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            if let Some(surface) = self.surface.lock().take() {
                surface.destroy(&self.device, &self.swapchain_loader, &self.surface_loader);
            }

            let in_flight: Vec<vk::CommandBuffer> = self
                .in_flight
                .lock()
                .drain(..)
                .map(|(_, cmd)| cmd)
                .collect();
            if !in_flight.is_empty() {
                self.device
                    .free_command_buffers(self.command_pool, &in_flight);
            }

            for (_, compiled) in self.pipelines.lock().drain() {
                self.device.destroy_pipeline(compiled.pipeline, None);
                self.device.destroy_pipeline_layout(compiled.layout, None);
            }

            {
                let mut allocator_guard = self.allocator.lock();
                for (_, entry) in self.buffers.lock().drain() {
                    if let (Some(allocation), Some(allocator)) =
                        (entry.allocation, allocator_guard.as_mut())
                    {
                        let _ = allocator.free(allocation);
                    }
                    self.device.destroy_buffer(entry.buffer, None);
                }
                for (_, entry) in self.images.lock().drain() {
                    if !entry.owned {
                        continue;
                    }
                    if let (Some(allocation), Some(allocator)) =
                        (entry.allocation, allocator_guard.as_mut())
                    {
                        let _ = allocator.free(allocation);
                    }
                    self.device.destroy_image_view(entry.view, None);
                    self.device.destroy_image(entry.image, None);
                }
                // Drop the allocator before the device goes away.
                *allocator_guard = None;
            }

            self.bindless.destroy();
            self.device.destroy_semaphore(self.timeline, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);

            if let (Some(messenger), Some(debug_utils)) =
                (self.debug_messenger, self.debug_utils.as_ref())
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

// ============================================================================
// State mapping
// ============================================================================

/// The layout a tracked state maps to. `Common` is only ever a *source*
/// state (fresh images); mapping it to `UNDEFINED` lets the first
/// transition discard contents, as fresh images have none worth keeping.
fn state_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Common => vk::ImageLayout::UNDEFINED,
        ResourceState::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,
        ResourceState::CopySrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn state_access(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Common => vk::AccessFlags::empty(),
        ResourceState::ShaderResource => vk::AccessFlags::SHADER_READ,
        ResourceState::UnorderedAccess => {
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
        }
        ResourceState::CopySrc => vk::AccessFlags::TRANSFER_READ,
        ResourceState::CopyDst => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::Present => vk::AccessFlags::empty(),
    }
}

fn state_stage(state: ResourceState) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Common => vk::PipelineStageFlags::TOP_OF_PIPE,
        ResourceState::ShaderResource => vk::PipelineStageFlags::COMPUTE_SHADER,
        ResourceState::UnorderedAccess => vk::PipelineStageFlags::COMPUTE_SHADER,
        ResourceState::CopySrc => vk::PipelineStageFlags::TRANSFER,
        ResourceState::CopyDst => vk::PipelineStageFlags::TRANSFER,
        ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn convert_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
    }
}

fn convert_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    flags
}

// ============================================================================
// Instance and device setup
// ============================================================================

fn create_instance(
    entry: &ash::Entry,
    validation: bool,
) -> Result<
    (
        ash::Instance,
        Option<vk::DebugUtilsMessengerEXT>,
        Option<ash::ext::debug_utils::Instance>,
    ),
    GraphicsError,
> {
    let validation_available = validation && check_validation_layer_support(entry);
    if validation && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new("Cinder").unwrap();
    let engine_name = CString::new("Cinder").unwrap();

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];

    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "windows")]
    {
        extensions.push(ash::khr::win32_surface::NAME.as_ptr());
    }

    #[cfg(target_os = "linux")]
    {
        extensions.push(ash::khr::xlib_surface::NAME.as_ptr());
        extensions.push(ash::khr::wayland_surface::NAME.as_ptr());
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let (debug_messenger, debug_utils) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger = create_debug_messenger(&debug_utils)?;
        (Some(messenger), Some(debug_utils))
    } else {
        (None, None)
    };

    Ok((instance, debug_messenger, debug_utils))
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}

fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
    })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the driver hands us a valid callback data struct.
    let p_message = unsafe { (*callback_data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let message = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {}", message);
    } else {
        log::warn!("[vulkan] {}", message);
    }
    vk::FALSE
}

fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice, GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device
        .ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, GraphicsError> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    for (index, family) in queue_families.iter().enumerate() {
        if family
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        {
            return Ok(index as u32);
        }
    }

    Err(GraphicsError::InitializationFailed(
        "No graphics+compute queue family found".to_string(),
    ))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities);
    let queue_create_infos = [queue_create_info];

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default();

    // Timeline semaphores for the completion counter, descriptor indexing
    // for the bindless tables.
    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .descriptor_binding_uniform_buffer_update_after_bind(true)
        .descriptor_binding_storage_buffer_update_after_bind(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .shader_storage_image_array_non_uniform_indexing(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
