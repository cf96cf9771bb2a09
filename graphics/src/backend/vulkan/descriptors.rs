//! Bindless descriptor tables for the Vulkan backend.
//!
//! The two global tables map onto two descriptor sets:
//!
//! - set 0, the mixed resource table: one binding per view flavor (sampled
//!   images, storage images, uniform buffers, storage buffers), all sharing
//!   the dense index space handed out by the allocator. Bindings are
//!   partially bound, so a slot only has to be valid at the indices the
//!   shader actually reads.
//! - set 1, the sampler table: one array of samplers.
//!
//! Both sets use update-after-bind so setup can keep writing slots after
//! the sets have been bound once.

use std::collections::HashMap;

use ash::vk;
use parking_lot::Mutex;

use crate::bindless::TableKind;
use crate::error::GraphicsError;
use crate::types::SamplerPreset;

/// Capacity of each view-flavor array in the mixed resource table.
pub const RESOURCE_TABLE_CAPACITY: u32 = 1024;
/// Capacity of the sampler table.
pub const SAMPLER_TABLE_CAPACITY: u32 = 64;

/// Binding slots inside set 0, one per view flavor.
pub const BINDING_SAMPLED_IMAGE: u32 = 0;
pub const BINDING_STORAGE_IMAGE: u32 = 1;
pub const BINDING_UNIFORM_BUFFER: u32 = 2;
pub const BINDING_STORAGE_BUFFER: u32 = 3;

/// The descriptor pool, layouts, and the two global sets.
pub struct BindlessTables {
    device: ash::Device,
    pool: vk::DescriptorPool,
    resource_layout: vk::DescriptorSetLayout,
    sampler_layout: vk::DescriptorSetLayout,
    resource_set: vk::DescriptorSet,
    sampler_set: vk::DescriptorSet,
    /// Samplers created per preset, destroyed with the tables.
    samplers: Mutex<HashMap<SamplerPreset, vk::Sampler>>,
}

impl BindlessTables {
    /// Create the pool, layouts, and sets.
    pub fn new(device: ash::Device) -> Result<Self, GraphicsError> {
        let resource_layout = create_resource_table_layout(&device)?;
        let sampler_layout = create_sampler_table_layout(&device)?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: RESOURCE_TABLE_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: RESOURCE_TABLE_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: RESOURCE_TABLE_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: RESOURCE_TABLE_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: SAMPLER_TABLE_CAPACITY,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(2)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to create bindless descriptor pool: {:?}",
                e
            ))
        })?;

        let layouts = [resource_layout, sampler_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to allocate bindless descriptor sets: {:?}",
                e
            ))
        })?;

        log::info!(
            "Bindless tables ready: {} resource slots per flavor, {} sampler slots",
            RESOURCE_TABLE_CAPACITY,
            SAMPLER_TABLE_CAPACITY
        );

        Ok(Self {
            device,
            pool,
            resource_layout,
            sampler_layout,
            resource_set: sets[0],
            sampler_set: sets[1],
            samplers: Mutex::new(HashMap::new()),
        })
    }

    /// The set layouts, in set order, for pipeline layout creation.
    pub fn set_layouts(&self) -> [vk::DescriptorSetLayout; 2] {
        [self.resource_layout, self.sampler_layout]
    }

    /// The global sets, in set order, for binding.
    pub fn sets(&self) -> [vk::DescriptorSet; 2] {
        [self.resource_set, self.sampler_set]
    }

    /// Write a sampled-image view at `index`.
    pub fn write_sampled_image(&self, index: u32, view: vk::ImageView) {
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.resource_set)
            .dst_binding(BINDING_SAMPLED_IMAGE)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write a storage-image view at `index`.
    pub fn write_storage_image(&self, index: u32, view: vk::ImageView) {
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.resource_set)
            .dst_binding(BINDING_STORAGE_IMAGE)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write a buffer view at `index`.
    pub fn write_buffer(&self, index: u32, buffer: vk::Buffer, size: u64, uniform: bool) {
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(size)];
        let (binding, ty) = if uniform {
            (BINDING_UNIFORM_BUFFER, vk::DescriptorType::UNIFORM_BUFFER)
        } else {
            (BINDING_STORAGE_BUFFER, vk::DescriptorType::STORAGE_BUFFER)
        };
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.resource_set)
            .dst_binding(binding)
            .dst_array_element(index)
            .descriptor_type(ty)
            .buffer_info(&buffer_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    /// Write a sampler preset at `index`, creating the sampler on first use.
    pub fn write_sampler(&self, index: u32, preset: SamplerPreset) -> Result<(), GraphicsError> {
        let sampler = self.get_or_create_sampler(preset)?;
        let image_info = [vk::DescriptorImageInfo::default().sampler(sampler)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.sampler_set)
            .dst_binding(0)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    /// Table capacity, for the allocator's exhaustion check.
    pub fn capacity(&self, table: TableKind) -> u32 {
        match table {
            TableKind::Resource => RESOURCE_TABLE_CAPACITY,
            TableKind::Sampler => SAMPLER_TABLE_CAPACITY,
        }
    }

    fn get_or_create_sampler(&self, preset: SamplerPreset) -> Result<vk::Sampler, GraphicsError> {
        let mut samplers = self.samplers.lock();
        if let Some(sampler) = samplers.get(&preset) {
            return Ok(*sampler);
        }

        let (filter, address_mode) = match preset {
            SamplerPreset::LinearClamp => (vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE),
            SamplerPreset::LinearWrap => (vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT),
            SamplerPreset::PointClamp => (vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_EDGE),
            SamplerPreset::PointWrap => (vk::Filter::NEAREST, vk::SamplerAddressMode::REPEAT),
        };

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create sampler: {:?}", e))
        })?;

        samplers.insert(preset, sampler);
        Ok(sampler)
    }

    /// Destroy all Vulkan objects. The device must be idle.
    pub fn destroy(&self) {
        unsafe {
            for (_, sampler) in self.samplers.lock().drain() {
                self.device.destroy_sampler(sampler, None);
            }
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .destroy_descriptor_set_layout(self.resource_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.sampler_layout, None);
        }
    }
}

fn create_resource_table_layout(
    device: &ash::Device,
) -> Result<vk::DescriptorSetLayout, GraphicsError> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_SAMPLED_IMAGE)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(RESOURCE_TABLE_CAPACITY)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_STORAGE_IMAGE)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(RESOURCE_TABLE_CAPACITY)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_UNIFORM_BUFFER)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(RESOURCE_TABLE_CAPACITY)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_STORAGE_BUFFER)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(RESOURCE_TABLE_CAPACITY)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
    ];

    let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
        | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND; 4];
    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
        .bindings(&bindings)
        .push_next(&mut flags_info);

    unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to create resource table layout: {:?}",
            e
        ))
    })
}

fn create_sampler_table_layout(
    device: &ash::Device,
) -> Result<vk::DescriptorSetLayout, GraphicsError> {
    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::SAMPLER)
        .descriptor_count(SAMPLER_TABLE_CAPACITY)
        .stage_flags(vk::ShaderStageFlags::COMPUTE)];

    let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
        | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND];
    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
        .bindings(&bindings)
        .push_next(&mut flags_info);

    unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to create sampler table layout: {:?}",
            e
        ))
    })
}
