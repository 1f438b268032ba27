//! Adapter selection settings.

use serde::{Deserialize, Serialize};

/// Which adapter to prefer when several are available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    /// Prefer a discrete GPU.
    #[default]
    HighPerformance,
    /// Prefer an integrated GPU.
    LowPower,
}

/// Graphics APIs the adapter may come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// Vulkan, Metal, DX12 and browser WebGPU.
    #[default]
    Primary,
    /// Every backend wgpu was built with.
    All,
    /// OpenGL / GLES only.
    Gl,
    /// Vulkan only.
    Vulkan,
    /// Metal only.
    Metal,
    /// DirectX 12 only.
    Dx12,
}

/// GPU context settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Adapter power preference.
    pub power_preference: PowerPreference,
    /// Allowed graphics backends.
    pub backends: BackendSelection,
    /// Force a software adapter.
    pub force_fallback_adapter: bool,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

impl From<BackendSelection> for wgpu::Backends {
    fn from(selection: BackendSelection) -> Self {
        match selection {
            BackendSelection::Primary => wgpu::Backends::PRIMARY,
            BackendSelection::All => wgpu::Backends::all(),
            BackendSelection::Gl => wgpu::Backends::GL,
            BackendSelection::Vulkan => wgpu::Backends::VULKAN,
            BackendSelection::Metal => wgpu::Backends::METAL,
            BackendSelection::Dx12 => wgpu::Backends::DX12,
        }
    }
}
