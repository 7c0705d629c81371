use candle_core::Device;
use tracing::{info, warn};

use imgsearch_core::config::DeviceKind;
use imgsearch_core::{Error, Result};

pub fn select_device(kind: DeviceKind) -> Result<Device> {
    match kind {
        DeviceKind::Cpu => Ok(cpu()),
        DeviceKind::Metal => metal().ok_or_else(|| Error::InvalidConfig("Metal device requested but unavailable".into())),
        DeviceKind::Cuda => cuda().ok_or_else(|| Error::InvalidConfig("CUDA device requested but unavailable".into())),
        DeviceKind::Auto => Ok(cuda().or_else(metal).unwrap_or_else(cpu)),
    }
}

/// Block until queued device work finished so buffers freed by a dropped
/// model are reclaimed before the next model allocates.
pub fn release_device_memory(device: &Device) {
    if let Err(e) = device.synchronize() {
        warn!(error = %e, "device synchronize after unload failed");
    }
}

fn cpu() -> Device {
    info!("Device: CPU");
    Device::Cpu
}

#[cfg(feature = "metal")]
fn metal() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(dev) => { info!("Device: Metal (MPS)"); Some(dev) }
        Err(e) => { warn!(error = %e, "Metal unavailable"); None }
    }
}

#[cfg(not(feature = "metal"))]
fn metal() -> Option<Device> { None }

#[cfg(feature = "cuda")]
fn cuda() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(dev) => { info!("Device: CUDA:0"); Some(dev) }
        Err(e) => { warn!(error = %e, "CUDA unavailable"); None }
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda() -> Option<Device> { None }
