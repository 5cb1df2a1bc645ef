// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use ash::vk;
use tracing::{debug, warn};

use crate::error::{GpuError, VkResultExt};

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

/// Cache file name keyed by vendor, device, driver and cache UUID, so data
/// from another driver is never fed back in.
pub fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "ember_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

/// A `VkPipelineCache` seeded from disk and written back on drop. With no
/// path it is an in-memory cache only.
pub struct PipelineCache {
    device: ash::Device,
    pub handle: vk::PipelineCache,
    path: Option<PathBuf>,
}

impl PipelineCache {
    pub unsafe fn new(device: &ash::Device, path: Option<PathBuf>) -> Result<Self, GpuError> {
        let data = path.as_deref().and_then(|p| fs::read(p).ok());
        let (p_initial_data, initial_data_size) = match &data {
            Some(bytes) => (bytes.as_ptr() as *const std::ffi::c_void, bytes.len()),
            None => (std::ptr::null(), 0),
        };
        if let (Some(p), Some(bytes)) = (&path, &data) {
            debug!("vk: pipeline cache {} ({} bytes)", p.display(), bytes.len());
        }

        let ci = vk::PipelineCacheCreateInfo {
            s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
            initial_data_size,
            p_initial_data,
            ..Default::default()
        };
        let handle = device
            .create_pipeline_cache(&ci, None)
            .call("vkCreatePipelineCache")?;
        Ok(PipelineCache {
            device: device.clone(),
            handle,
            path,
        })
    }

    unsafe fn save(&self, path: &Path) {
        // some drivers fail here when the cache is empty or the device is lost
        let Ok(bytes) = self.device.get_pipeline_cache_data(self.handle) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(path, &bytes) {
            warn!("vk: could not write pipeline cache {}: {e}", path.display());
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            if let Some(path) = &self.path {
                self.save(path);
            }
            self.device.destroy_pipeline_cache(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_encodes_device_identity() {
        let mut props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2484,
            driver_version: 0x0123_4567,
            ..Default::default()
        };
        props.pipeline_cache_uuid = [0xab; vk::UUID_SIZE];
        let name = pipeline_cache_path(&props);
        let name = name.to_string_lossy();
        assert!(name.starts_with("ember_pipeline_cache_10de_2484_01234567_abab"), "{name}");
        assert!(name.ends_with(".bin"));
        assert_eq!(hex_bytes(&[0x00, 0x0f, 0xf0]), "000ff0");
    }
}
