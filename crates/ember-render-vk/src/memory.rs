// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::context::DeviceContext;
use crate::error::{GpuError, VkResultExt};

/// First memory type, in table order, that is allowed by `type_filter` and
/// carries every flag in `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, GpuError> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(GpuError::NoSuitableMemoryType {
            type_filter,
            required,
        })
}

/// `len` as a device size, if it fits in a buffer of `capacity` bytes.
pub fn checked_len(len: usize, capacity: vk::DeviceSize) -> Result<vk::DeviceSize, GpuError> {
    let want = len as vk::DeviceSize;
    if want > capacity {
        return Err(GpuError::BufferOverflow {
            len: want,
            capacity,
        });
    }
    Ok(want)
}

unsafe fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory, GpuError> {
    let memory_type_index = find_memory_type(&ctx.memory_properties, req.memory_type_bits, props)?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    ctx.device.allocate_memory(&mai, None).call("vkAllocateMemory")
}

/// A buffer with its own dedicated allocation, bound once at creation.
pub struct GpuBuffer {
    device: ash::Device,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self, GpuError> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = ctx.device.create_buffer(&bci, None).call("vkCreateBuffer")?;
        // from here on Drop cleans up whatever has been created
        let mut out = GpuBuffer {
            device: ctx.device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };
        let req = ctx.device.get_buffer_memory_requirements(buffer);
        out.memory = allocate(ctx, req, props)?;
        ctx.device
            .bind_buffer_memory(buffer, out.memory, 0)
            .call("vkBindBufferMemory")?;
        Ok(out)
    }

    /// Host-visible, coherent buffer for CPU writes.
    pub unsafe fn host_visible(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, GpuError> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Map, copy, unmap. The memory must be host-visible and no GPU work may
    /// be reading it.
    pub unsafe fn write(&self, bytes: &[u8]) -> Result<(), GpuError> {
        let len = checked_len(bytes.len(), self.size)?;
        let ptr = self
            .device
            .map_memory(self.memory, 0, len, vk::MemoryMapFlags::empty())
            .call("vkMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        self.device.unmap_memory(self.memory);
        Ok(())
    }

    /// Like [`Self::write`], but hands the mapped range to `fill`.
    pub unsafe fn write_with(
        &self,
        len: usize,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<(), GpuError> {
        let size = checked_len(len, self.size)?;
        let ptr = self
            .device
            .map_memory(self.memory, 0, size, vk::MemoryMapFlags::empty())
            .call("vkMapMemory")?;
        fill(std::slice::from_raw_parts_mut(ptr as *mut u8, len));
        self.device.unmap_memory(self.memory);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// 2D optimal-tiling image with a dedicated allocation and (optionally) one view.
pub struct GpuImage {
    device: ash::Device,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
}

impl GpuImage {
    pub unsafe fn new(
        ctx: &DeviceContext,
        desc: ImageDesc,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self, GpuError> {
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = ctx.device.create_image(&ici, None).call("vkCreateImage")?;
        let mut out = GpuImage {
            device: ctx.device.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            mip_levels: desc.mip_levels,
        };
        let req = ctx.device.get_image_memory_requirements(image);
        out.memory = allocate(ctx, req, props)?;
        ctx.device
            .bind_image_memory(image, out.memory, 0)
            .call("vkBindImageMemory")?;
        Ok(out)
    }

    pub unsafe fn create_view(&mut self, aspect: vk::ImageAspectFlags) -> Result<(), GpuError> {
        self.view =
            create_image_view(&self.device, self.image, self.format, aspect, self.mip_levels)?;
        Ok(())
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView, GpuError> {
    let ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    device.create_image_view(&ci, None).call("vkCreateImageView")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &f) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = f;
        }
        props
    }

    const DL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HV: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HC: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    #[test]
    fn returns_first_match_in_table_order() {
        let props = table(&[DL, HV | HC, HV | HC | DL, HV | HC]);
        assert_eq!(find_memory_type(&props, 0b1111, HV | HC).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b1111, DL).unwrap(), 0);
        assert_eq!(find_memory_type(&props, 0b1100, HV | HC).unwrap(), 2);
    }

    #[test]
    fn filter_bits_exclude_types() {
        let props = table(&[HV | HC, DL]);
        assert_eq!(find_memory_type(&props, 0b10, DL).unwrap(), 1);
        let err = find_memory_type(&props, 0b10, HV).unwrap_err();
        assert!(matches!(
            err,
            GpuError::NoSuitableMemoryType { type_filter: 0b10, .. }
        ));
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut props = table(&[DL]);
        props.memory_types[1].property_flags = HV | HC;
        assert!(find_memory_type(&props, u32::MAX, HV).is_err());
    }

    #[test]
    fn writes_past_capacity_are_refused() {
        assert_eq!(checked_len(64, 64).unwrap(), 64);
        assert_eq!(checked_len(0, 0).unwrap(), 0);
        let err = checked_len(65, 64).unwrap_err();
        assert!(matches!(
            err,
            GpuError::BufferOverflow {
                len: 65,
                capacity: 64
            }
        ));
        assert_eq!(err.class(), crate::error::ErrorClass::Resource);
    }

    #[test]
    fn empty_requirement_matches_first_allowed() {
        let props = table(&[DL, HV]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).unwrap(),
            1
        );
    }
}
