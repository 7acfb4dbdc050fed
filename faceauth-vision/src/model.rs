use std::path::Path;

use anyhow::{Context, Result};
#[allow(unused_imports)]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA device index.
    Gpu(i32),
}

impl Device {
    /// Negative indices mean CPU, matching the usual `--gpu -1` convention.
    pub fn from_index(index: i32) -> Self {
        if index < 0 {
            Device::Cpu
        } else {
            Device::Gpu(index)
        }
    }
}

pub fn session_builder(device: Device) -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort::Error::<()>::from)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    match device {
        Device::Cpu => {}
        #[cfg(feature = "cuda")]
        Device::Gpu(id) => {
            let ep = ep::CUDA::default().with_device_id(id);
            if ep.is_available()? {
                ep.register(&mut builder)?;
            } else {
                log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
            }
        }
        #[cfg(not(feature = "cuda"))]
        Device::Gpu(id) => {
            log::warn!("gpu {} requested but built without the cuda feature, using cpu", id)
        }
    }

    Ok(builder)
}

pub fn load_session(path: &Path, device: Device) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("model file not found: {}", path.display());
    }
    session_builder(device)?
        .commit_from_file(path)
        .with_context(|| format!("load model {}", path.display()))
}
