//! Serialized configuration surface
//!
//! The host stores the pass configuration as an opaque key-value bag. This
//! module reads it into a typed [`DenoiserConfig`] and writes it back.

use crate::error::{DenoiseError, Result, Stage};
use crate::library::{MethodSettings, ReblurSettings, RelaxDiffuseSettings, RelaxDiffuseSpecularSettings};
use crate::method::DenoisingMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::Span;

const ENABLED: &str = "enabled";
const METHOD: &str = "method";
const OUTPUT_SIZE: &str = "outputSize";
const WORLD_SPACE_MOTION: &str = "worldSpaceMotion";
const DISOCCLUSION_THRESHOLD: &str = "disocclusionThreshold";
const MAX_INTENSITY: &str = "maxIntensity";

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "'{value}'"),
        }
    }
}

/// Ordered key-value property bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML mapping
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_norway::from_str(source).map_err(|err| DenoiseError::configuration(Stage::Translation, format!("invalid properties: {err}")))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_norway::to_string(self).map_err(|err| DenoiseError::configuration(Stage::Translation, format!("cannot serialize properties: {err}")))
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A value that can be read from and written to a property
pub trait PropertyField: Sized {
    fn from_property(value: &PropertyValue) -> Option<Self>;
    fn to_property(&self) -> PropertyValue;
}

impl PropertyField for bool {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    fn to_property(&self) -> PropertyValue {
        PropertyValue::Bool(*self)
    }
}

impl PropertyField for u32 {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Int(value) => u32::try_from(*value).ok(),
            _ => None,
        }
    }

    fn to_property(&self) -> PropertyValue {
        PropertyValue::Int(i64::from(*self))
    }
}

impl PropertyField for f32 {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Float(value) => Some(*value as f32),
            PropertyValue::Int(value) => Some(*value as f32),
            _ => None,
        }
    }

    fn to_property(&self) -> PropertyValue {
        PropertyValue::Float(f64::from(*self))
    }
}

fn wrong_type(key: &str, value: &PropertyValue) -> DenoiseError {
    DenoiseError::configuration(Stage::Translation, format!("property '{key}' has a value of the wrong type: {value}"))
}

fn read<T: PropertyField>(key: &str, value: &PropertyValue) -> Result<T> {
    T::from_property(value).ok_or_else(|| wrong_type(key, value))
}

/// Tuning values addressable by property key
pub trait TuningParameters {
    /// Every key the settings understand
    const KEYS: &'static [&'static str];

    /// Sets the field named by `key`; returns false for keys it does not know
    fn set(&mut self, key: &str, value: &PropertyValue) -> Result<bool>;

    /// Writes every field into `properties`
    fn write(&self, properties: &mut Properties);
}

macro_rules! tuning_parameters {
    ($settings:ty { $($key:literal => $($field:ident).+),* $(,)? }) => {
        impl TuningParameters for $settings {
            const KEYS: &'static [&'static str] = &[$($key),*];

            fn set(&mut self, key: &str, value: &PropertyValue) -> Result<bool> {
                match key {
                    $($key => self.$($field).+ = read(key, value)?,)*
                    _ => return Ok(false),
                }
                Ok(true)
            }

            fn write(&self, properties: &mut Properties) {
                $(properties.insert($key, self.$($field).+.to_property());)*
            }
        }
    };
}

tuning_parameters!(RelaxDiffuseSpecularSettings {
    "diffusePrepassBlurRadius" => diffuse_prepass_blur_radius,
    "specularPrepassBlurRadius" => specular_prepass_blur_radius,
    "diffuseMaxAccumulatedFrameNum" => diffuse_max_accumulated_frame_num,
    "specularMaxAccumulatedFrameNum" => specular_max_accumulated_frame_num,
    "diffuseMaxFastAccumulatedFrameNum" => diffuse_max_fast_accumulated_frame_num,
    "specularMaxFastAccumulatedFrameNum" => specular_max_fast_accumulated_frame_num,
    "diffusePhiLuminance" => diffuse_phi_luminance,
    "specularPhiLuminance" => specular_phi_luminance,
    "diffuseLobeAngleFraction" => diffuse_lobe_angle_fraction,
    "specularLobeAngleFraction" => specular_lobe_angle_fraction,
    "roughnessFraction" => roughness_fraction,
    "diffuseHistoryRejectionNormalThreshold" => diffuse_history_rejection_normal_threshold,
    "specularVarianceBoost" => specular_variance_boost,
    "specularLobeAngleSlack" => specular_lobe_angle_slack,
    "disocclusionFixEdgeStoppingNormalPower" => disocclusion_fix_edge_stopping_normal_power,
    "disocclusionFixMaxRadius" => disocclusion_fix_max_radius,
    "disocclusionFixNumFramesToFix" => disocclusion_fix_num_frames_to_fix,
    "historyClampingColorBoxSigmaScale" => history_clamping_color_box_sigma_scale,
    "spatialVarianceEstimationHistoryThreshold" => spatial_variance_estimation_history_threshold,
    "atrousIterationNum" => atrous_iteration_num,
    "minLuminanceWeight" => min_luminance_weight,
    "depthThreshold" => depth_threshold,
    "roughnessEdgeStoppingRelaxation" => roughness_edge_stopping_relaxation,
    "normalEdgeStoppingRelaxation" => normal_edge_stopping_relaxation,
    "luminanceEdgeStoppingRelaxation" => luminance_edge_stopping_relaxation,
    "enableAntiFirefly" => enable_anti_firefly,
    "enableReprojectionTestSkippingWithoutMotion" => enable_reprojection_test_skipping_without_motion,
    "enableSpecularVirtualHistoryClamping" => enable_specular_virtual_history_clamping,
    "enableRoughnessEdgeStopping" => enable_roughness_edge_stopping,
    "enableMaterialTestForDiffuse" => enable_material_test_for_diffuse,
    "enableMaterialTestForSpecular" => enable_material_test_for_specular,
});

tuning_parameters!(RelaxDiffuseSettings {
    "diffusePrepassBlurRadius" => prepass_blur_radius,
    "diffuseMaxAccumulatedFrameNum" => diffuse_max_accumulated_frame_num,
    "diffuseMaxFastAccumulatedFrameNum" => diffuse_max_fast_accumulated_frame_num,
    "diffusePhiLuminance" => diffuse_phi_luminance,
    "diffuseLobeAngleFraction" => diffuse_lobe_angle_fraction,
    "disocclusionFixEdgeStoppingNormalPower" => history_fix_edge_stopping_normal_power,
    "disocclusionFixMaxRadius" => history_fix_max_radius,
    "disocclusionFixNumFramesToFix" => history_fix_frame_num,
    "historyClampingColorBoxSigmaScale" => history_clamping_color_box_sigma_scale,
    "spatialVarianceEstimationHistoryThreshold" => spatial_variance_estimation_history_threshold,
    "atrousIterationNum" => atrous_iteration_num,
    "minLuminanceWeight" => min_luminance_weight,
    "depthThreshold" => depth_threshold,
    "enableAntiFirefly" => enable_anti_firefly,
    "enableReprojectionTestSkippingWithoutMotion" => enable_reprojection_test_skipping_without_motion,
    "enableMaterialTestForDiffuse" => enable_material_test,
});

tuning_parameters!(ReblurSettings {
    "hitDistanceA" => hit_distance_parameters.a,
    "hitDistanceB" => hit_distance_parameters.b,
    "hitDistanceC" => hit_distance_parameters.c,
    "hitDistanceD" => hit_distance_parameters.d,
    "maxAccumulatedFrameNum" => max_accumulated_frame_num,
    "maxFastAccumulatedFrameNum" => max_fast_accumulated_frame_num,
    "historyFixFrameNum" => history_fix_frame_num,
    "diffusePrepassBlurRadius" => diffuse_prepass_blur_radius,
    "specularPrepassBlurRadius" => specular_prepass_blur_radius,
    "minBlurRadius" => min_blur_radius,
    "maxBlurRadius" => max_blur_radius,
    "lobeAngleFraction" => lobe_angle_fraction,
    "roughnessFraction" => roughness_fraction,
    "planeDistanceSensitivity" => plane_distance_sensitivity,
    "enableAntiFirefly" => enable_anti_firefly,
    "enableReferenceAccumulation" => enable_reference_accumulation,
});

/// How the pass derives its output resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSize {
    /// The host's default texture dimensions
    #[default]
    Default,
    /// Keep the previously resolved size
    Fixed,
    /// Full window size
    Full,
    Half,
    Quarter,
    Double,
}

impl OutputSize {
    const ALL: [OutputSize; 6] = [Self::Default, Self::Fixed, Self::Full, Self::Half, Self::Quarter, Self::Double];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Fixed => "Fixed",
            Self::Full => "Full",
            Self::Half => "Half",
            Self::Quarter => "Quarter",
            Self::Double => "Double",
        }
    }

    /// Resolves the output size
    ///
    /// # Arguments
    /// * `previous` - The size resolved at the previous compile
    /// * `default_dims` - The host's default texture dimensions
    ///
    /// # Returns
    /// The output size; a zero dimension falls back to `default_dims`
    pub fn resolve(&self, previous: (u32, u32), default_dims: (u32, u32)) -> (u32, u32) {
        let (width, height) = default_dims;
        let size = match self {
            Self::Default | Self::Full => default_dims,
            Self::Fixed => previous,
            Self::Half => (width / 2, height / 2),
            Self::Quarter => (width / 4, height / 4),
            Self::Double => (width.saturating_mul(2), height.saturating_mul(2)),
        };

        if size.0 == 0 || size.1 == 0 { default_dims } else { size }
    }
}

impl FromStr for OutputSize {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|size| size.name() == s)
            .ok_or_else(|| DenoiseError::configuration(Stage::Translation, format!("unknown output size '{s}'")))
    }
}

/// Typed pass configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DenoiserConfig {
    pub enabled: bool,
    pub method: DenoisingMethod,
    pub output_size: OutputSize,
    pub world_space_motion: bool,
    /// Relative depth threshold in percent
    pub disocclusion_threshold: f32,
    /// Luminance the radiance prepass clamps to
    pub max_intensity: f32,
    pub relax_diffuse_specular: RelaxDiffuseSpecularSettings,
    pub relax_diffuse: RelaxDiffuseSettings,
    pub reblur: ReblurSettings,
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: DenoisingMethod::default(),
            output_size: OutputSize::default(),
            world_space_motion: true,
            disocclusion_threshold: 2.0,
            max_intensity: 1000.0,
            relax_diffuse_specular: RelaxDiffuseSpecularSettings::default(),
            relax_diffuse: RelaxDiffuseSettings::default(),
            reblur: ReblurSettings::default(),
        }
    }
}

impl DenoiserConfig {
    /// Reads a configuration from a property bag
    ///
    /// The method is read before anything else so that tuning keys are
    /// interpreted against the selected method regardless of key order.
    /// Tuning keys of another method and unknown keys are logged and skipped;
    /// a known key holding the wrong type is an error.
    ///
    /// # Arguments
    /// * `properties` - The serialized configuration
    /// * `logger` - Span that warnings are recorded under
    pub fn from_properties(properties: &Properties, logger: &Span) -> Result<Self> {
        let _entered = logger.enter();
        let mut config = Self::default();

        if let Some(value) = properties.get(METHOD) {
            let name: String = match value {
                PropertyValue::String(name) => name.clone(),
                other => return Err(wrong_type(METHOD, other)),
            };
            config.method = name.parse()?;
        }

        for (key, value) in properties.iter() {
            match key {
                METHOD => {}
                ENABLED => config.enabled = read(key, value)?,
                OUTPUT_SIZE => match value {
                    PropertyValue::String(name) => config.output_size = name.parse()?,
                    other => return Err(wrong_type(key, other)),
                },
                WORLD_SPACE_MOTION => config.world_space_motion = read(key, value)?,
                DISOCCLUSION_THRESHOLD => config.disocclusion_threshold = read(key, value)?,
                MAX_INTENSITY => config.max_intensity = read(key, value)?,
                _ => config.set_tuning(key, value)?,
            }
        }

        Ok(config)
    }

    fn set_tuning(&mut self, key: &str, value: &PropertyValue) -> Result<()> {
        let applied = match self.method {
            DenoisingMethod::RelaxDiffuseSpecular => self.relax_diffuse_specular.set(key, value)?,
            DenoisingMethod::RelaxDiffuse => self.relax_diffuse.set(key, value)?,
            DenoisingMethod::ReblurDiffuseSpecular => self.reblur.set(key, value)?,
            DenoisingMethod::SpecularReflectionMv | DenoisingMethod::SpecularDeltaMv => false,
        };
        if applied {
            return Ok(());
        }

        let owners: Vec<&str> = [
            (DenoisingMethod::RelaxDiffuseSpecular, RelaxDiffuseSpecularSettings::KEYS),
            (DenoisingMethod::RelaxDiffuse, RelaxDiffuseSettings::KEYS),
            (DenoisingMethod::ReblurDiffuseSpecular, ReblurSettings::KEYS),
        ]
        .into_iter()
        .filter(|(_, keys)| keys.contains(&key))
        .map(|(method, _)| method.name())
        .collect();

        if owners.is_empty() {
            tracing::warn!(key, "Unknown property in denoiser properties");
        } else {
            tracing::warn!(key, method = %self.method, applies_to = ?owners, "Property does not apply to the selected method, ignoring");
        }
        Ok(())
    }

    /// Writes the common keys and the selected method's tuning keys
    pub fn to_properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert(ENABLED, self.enabled.to_property());
        properties.insert(METHOD, PropertyValue::String(self.method.name().to_string()));
        properties.insert(OUTPUT_SIZE, PropertyValue::String(self.output_size.name().to_string()));
        properties.insert(WORLD_SPACE_MOTION, self.world_space_motion.to_property());
        properties.insert(DISOCCLUSION_THRESHOLD, self.disocclusion_threshold.to_property());
        properties.insert(MAX_INTENSITY, self.max_intensity.to_property());

        match self.method {
            DenoisingMethod::RelaxDiffuseSpecular => self.relax_diffuse_specular.write(&mut properties),
            DenoisingMethod::RelaxDiffuse => self.relax_diffuse.write(&mut properties),
            DenoisingMethod::ReblurDiffuseSpecular => self.reblur.write(&mut properties),
            DenoisingMethod::SpecularReflectionMv | DenoisingMethod::SpecularDeltaMv => {}
        }

        properties
    }

    /// Settings handed to the library for the selected method
    pub fn method_settings(&self) -> MethodSettings {
        match self.method {
            DenoisingMethod::RelaxDiffuseSpecular => MethodSettings::RelaxDiffuseSpecular(self.relax_diffuse_specular),
            DenoisingMethod::RelaxDiffuse => MethodSettings::RelaxDiffuse(self.relax_diffuse),
            DenoisingMethod::ReblurDiffuseSpecular => MethodSettings::ReblurDiffuseSpecular(self.reblur),
            DenoisingMethod::SpecularReflectionMv => MethodSettings::SpecularReflectionMv,
            DenoisingMethod::SpecularDeltaMv => MethodSettings::SpecularDeltaMv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        tracing::info_span!("denoiser-test")
    }

    #[test]
    fn test_method_applies_regardless_of_key_order() {
        let properties = Properties::from_yaml("atrousIterationNum: 3\nmethod: RelaxDiffuse\nenabled: false\n").unwrap();
        let config = DenoiserConfig::from_properties(&properties, &span()).unwrap();

        assert_eq!(config.method, DenoisingMethod::RelaxDiffuse);
        assert!(!config.enabled);
        assert_eq!(config.relax_diffuse.atrous_iteration_num, 3);
        assert_eq!(config.relax_diffuse_specular, RelaxDiffuseSpecularSettings::default());
    }

    #[test]
    fn test_foreign_and_unknown_keys_are_skipped() {
        let properties = Properties::from_yaml("method: ReblurDiffuseSpecular\nspecularVarianceBoost: 4.0\ntemporalStabilization: 1.0\nhitDistanceA: 5\n").unwrap();
        let config = DenoiserConfig::from_properties(&properties, &span()).unwrap();

        assert_eq!(config.relax_diffuse_specular, RelaxDiffuseSpecularSettings::default());
        assert_eq!(config.reblur.hit_distance_parameters.a, 5.0);
        assert!(config.to_properties().get("temporalStabilization").is_none());
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let properties = Properties::from_yaml("enabled: 3\n").unwrap();
        let err = DenoiserConfig::from_properties(&properties, &span()).unwrap_err();
        assert!(matches!(err, DenoiseError::Configuration { stage: Stage::Translation, .. }));

        let properties = Properties::from_yaml("method: RelaxDiffuseSpecular\natrousIterationNum: -2\n").unwrap();
        assert!(DenoiserConfig::from_properties(&properties, &span()).is_err());

        let properties = Properties::from_yaml("method: Svgf\n").unwrap();
        assert!(DenoiserConfig::from_properties(&properties, &span()).is_err());
    }

    #[test]
    fn test_properties_round_trip() {
        let mut config = DenoiserConfig {
            method: DenoisingMethod::RelaxDiffuseSpecular,
            output_size: OutputSize::Half,
            world_space_motion: false,
            disocclusion_threshold: 1.5,
            max_intensity: 250.0,
            ..DenoiserConfig::default()
        };
        config.relax_diffuse_specular.atrous_iteration_num = 4;
        config.relax_diffuse_specular.enable_anti_firefly = false;
        config.relax_diffuse_specular.depth_threshold = 0.05;

        let yaml = config.to_properties().to_yaml().unwrap();
        let properties = Properties::from_yaml(&yaml).unwrap();
        let read_back = DenoiserConfig::from_properties(&properties, &span()).unwrap();
        assert_eq!(read_back, config);
    }

    #[test]
    fn test_max_intensity_applies_to_every_method() {
        let properties = Properties::from_yaml("maxIntensity: 64\nmethod: SpecularDeltaMv\n").unwrap();
        let config = DenoiserConfig::from_properties(&properties, &span()).unwrap();
        assert_eq!(config.max_intensity, 64.0);
        assert_eq!(config.to_properties().get("maxIntensity"), Some(&PropertyValue::Float(64.0)));
        assert_eq!(DenoiserConfig::default().max_intensity, 1000.0);

        let properties = Properties::from_yaml("maxIntensity: high\n").unwrap();
        assert!(DenoiserConfig::from_properties(&properties, &span()).is_err());
    }

    #[test]
    fn test_output_size_resolution() {
        assert_eq!(OutputSize::Default.resolve((0, 0), (1280, 720)), (1280, 720));
        assert_eq!(OutputSize::Half.resolve((0, 0), (1280, 720)), (640, 360));
        assert_eq!(OutputSize::Quarter.resolve((0, 0), (1280, 720)), (320, 180));
        assert_eq!(OutputSize::Double.resolve((0, 0), (1280, 720)), (2560, 1440));
        assert_eq!(OutputSize::Fixed.resolve((800, 600), (1280, 720)), (800, 600));
        assert_eq!(OutputSize::Fixed.resolve((0, 0), (1280, 720)), (1280, 720));
        assert_eq!(OutputSize::Quarter.resolve((0, 0), (2, 2)), (2, 2));
    }

    #[test]
    fn test_method_settings_follow_method() {
        let config = DenoiserConfig {
            method: DenoisingMethod::SpecularDeltaMv,
            ..DenoiserConfig::default()
        };
        assert_eq!(config.method_settings(), MethodSettings::SpecularDeltaMv);
        assert!(config.to_properties().get("atrousIterationNum").is_none());
    }
}
