//! Abstract-to-concrete texture format translation

use crate::error::{DenoiseError, Result, Stage};
use crate::library::Format;

/// Abstract formats that have a concrete equivalent
pub const SUPPORTED_FORMATS: &[Format] = &[
    Format::R8Unorm,
    Format::R8Snorm,
    Format::R8Uint,
    Format::R8Sint,
    Format::Rg8Unorm,
    Format::Rg8Snorm,
    Format::Rg8Uint,
    Format::Rg8Sint,
    Format::Rgba8Unorm,
    Format::Rgba8Snorm,
    Format::Rgba8Uint,
    Format::Rgba8Sint,
    Format::Rgba8Srgb,
    Format::R16Unorm,
    Format::R16Snorm,
    Format::R16Uint,
    Format::R16Sint,
    Format::R16Sfloat,
    Format::Rg16Unorm,
    Format::Rg16Snorm,
    Format::Rg16Uint,
    Format::Rg16Sint,
    Format::Rg16Sfloat,
    Format::Rgba16Unorm,
    Format::Rgba16Snorm,
    Format::Rgba16Uint,
    Format::Rgba16Sint,
    Format::Rgba16Sfloat,
    Format::R32Uint,
    Format::R32Sint,
    Format::R32Sfloat,
    Format::Rg32Uint,
    Format::Rg32Sint,
    Format::Rg32Sfloat,
    Format::Rgba32Uint,
    Format::Rgba32Sint,
    Format::Rgba32Sfloat,
    Format::R10G10B10A2Unorm,
    Format::R10G10B10A2Uint,
    Format::R11G11B10Ufloat,
    Format::R9G9B9E5Ufloat,
];

/// Translates an abstract library format into a concrete texture format
///
/// The table is explicit. Formats without an exact equivalent (the
/// three-channel 32-bit family) fail instead of being widened.
///
/// # Arguments
/// * `format` - The library's abstract format
///
/// # Returns
/// The matching `wgpu::TextureFormat`, or a configuration error
pub fn translate_format(format: Format) -> Result<wgpu::TextureFormat> {
    use wgpu::TextureFormat as T;

    let concrete = match format {
        Format::R8Unorm => T::R8Unorm,
        Format::R8Snorm => T::R8Snorm,
        Format::R8Uint => T::R8Uint,
        Format::R8Sint => T::R8Sint,
        Format::Rg8Unorm => T::Rg8Unorm,
        Format::Rg8Snorm => T::Rg8Snorm,
        Format::Rg8Uint => T::Rg8Uint,
        Format::Rg8Sint => T::Rg8Sint,
        Format::Rgba8Unorm => T::Rgba8Unorm,
        Format::Rgba8Snorm => T::Rgba8Snorm,
        Format::Rgba8Uint => T::Rgba8Uint,
        Format::Rgba8Sint => T::Rgba8Sint,
        Format::Rgba8Srgb => T::Rgba8UnormSrgb,
        Format::R16Unorm => T::R16Unorm,
        Format::R16Snorm => T::R16Snorm,
        Format::R16Uint => T::R16Uint,
        Format::R16Sint => T::R16Sint,
        Format::R16Sfloat => T::R16Float,
        Format::Rg16Unorm => T::Rg16Unorm,
        Format::Rg16Snorm => T::Rg16Snorm,
        Format::Rg16Uint => T::Rg16Uint,
        Format::Rg16Sint => T::Rg16Sint,
        Format::Rg16Sfloat => T::Rg16Float,
        Format::Rgba16Unorm => T::Rgba16Unorm,
        Format::Rgba16Snorm => T::Rgba16Snorm,
        Format::Rgba16Uint => T::Rgba16Uint,
        Format::Rgba16Sint => T::Rgba16Sint,
        Format::Rgba16Sfloat => T::Rgba16Float,
        Format::R32Uint => T::R32Uint,
        Format::R32Sint => T::R32Sint,
        Format::R32Sfloat => T::R32Float,
        Format::Rg32Uint => T::Rg32Uint,
        Format::Rg32Sint => T::Rg32Sint,
        Format::Rg32Sfloat => T::Rg32Float,
        Format::Rgba32Uint => T::Rgba32Uint,
        Format::Rgba32Sint => T::Rgba32Sint,
        Format::Rgba32Sfloat => T::Rgba32Float,
        Format::R10G10B10A2Unorm => T::Rgb10a2Unorm,
        Format::R10G10B10A2Uint => T::Rgb10a2Uint,
        Format::R11G11B10Ufloat => T::Rg11b10Ufloat,
        Format::R9G9B9E5Ufloat => T::Rgb9e5Ufloat,
        Format::Rgb32Uint | Format::Rgb32Sint | Format::Rgb32Sfloat => {
            return Err(DenoiseError::configuration(Stage::Translation, format!("format {format:?} has no texture equivalent")));
        }
    };

    Ok(concrete)
}
