//! PipelineBlueprint - Config Loader output
//!
//! Describes one pipeline deployment: where inputs and derivatives live,
//! which template files to use, how runs behave, and every per-stage tool
//! parameter. Parameters are addressed by dotted keys (`n4.shrink_factor`)
//! from stage argument templates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use validator::Validate;

use crate::RunMode;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    #[validate(nested)]
    pub paths: PathsConfig,

    #[serde(default)]
    #[validate(nested)]
    pub inputs: InputNaming,

    #[serde(default)]
    #[validate(nested)]
    pub templates: TemplateFiles,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    #[validate(nested)]
    pub parameters: PipelineParameters,
}

/// Dataset roots
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PathsConfig {
    /// BIDS dataset root (read only)
    pub bids_root: PathBuf,

    /// Derivatives root, one directory per subject
    pub derivatives_root: PathBuf,

    /// Directory holding template, masks and atlas
    pub template_dir: PathBuf,
}

/// File name suffixes of raw inputs, appended to the subject id
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InputNaming {
    #[validate(length(min = 1))]
    pub t1w: String,
    #[validate(length(min = 1))]
    pub dwi: String,
    #[validate(length(min = 1))]
    pub bval: String,
    #[validate(length(min = 1))]
    pub bvec: String,
    /// Reverse phase-encoded b=0 pair used for distortion correction
    #[validate(length(min = 1))]
    pub fmap_b0_pair: String,
}

impl Default for InputNaming {
    fn default() -> Self {
        Self {
            t1w: "_T1w.nii.gz".into(),
            dwi: "_dwi.nii.gz".into(),
            bval: "_dwi.bval".into(),
            bvec: "_dwi.bvec".into(),
            fmap_b0_pair: "_dir-PA_epi.nii.gz".into(),
        }
    }
}

/// Reference files inside `paths.template_dir`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TemplateFiles {
    /// Population template (T1w contrast)
    #[validate(length(min = 1))]
    pub template: String,

    /// Brain probability mask for brain extraction
    #[validate(length(min = 1))]
    pub brain_probability_mask: String,

    /// Registration (extraction) mask
    #[validate(length(min = 1))]
    pub registration_mask: String,

    /// Parcellation atlas in template space
    #[validate(length(min = 1))]
    pub atlas: String,
}

impl Default for TemplateFiles {
    fn default() -> Self {
        Self {
            template: "tpl-MNI152NLin2009cAsym_res-01_T1w.nii.gz".into(),
            brain_probability_mask: "tpl-MNI152NLin2009cAsym_res-01_label-brain_probseg.nii.gz".into(),
            registration_mask: "tpl-MNI152NLin2009cAsym_res-01_desc-brain_mask.nii.gz".into(),
            atlas: "tpl-MNI152NLin2009cAsym_res-01_atlas-Schaefer2018_desc-400Parcels7Networks_dseg.nii.gz"
                .into(),
        }
    }
}

/// Run behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Resume (skip satisfied stages) or force a full rerun
    #[serde(default)]
    pub mode: RunMode,

    /// Stop attempting independent stages after the first failure
    #[serde(default = "default_true")]
    pub halt_on_failure: bool,

    /// Write `{subject}_pipeline-run.json` next to the derivatives
    #[serde(default = "default_true")]
    pub write_manifest: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Resume,
            halt_on_failure: true,
            write_manifest: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// External tool environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Program name -> executable path overrides
    #[serde(default)]
    pub programs: BTreeMap<String, String>,

    /// Extra environment for every tool call (thread counts, FSL output type, ...)
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ToolsConfig {
    /// Executable for a program, honouring overrides
    pub fn resolve_program<'a>(&'a self, program: &'a str) -> &'a str {
        self.programs.get(program).map(String::as_str).unwrap_or(program)
    }
}

/// Per-stage tool parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PipelineParameters {
    #[serde(default)]
    #[validate(nested)]
    pub n4: N4Params,

    #[serde(default)]
    #[validate(nested)]
    pub brain_extraction: BrainExtractionParams,

    #[serde(default)]
    #[validate(nested)]
    pub registration: RegistrationParams,

    #[serde(default)]
    #[validate(nested)]
    pub segmentation: SegmentationParams,

    #[serde(default)]
    #[validate(nested)]
    pub dwi: DwiParams,

    #[serde(default)]
    #[validate(nested)]
    pub csd: CsdParams,

    #[serde(default)]
    #[validate(nested)]
    pub tractography: TractographyParams,

    #[serde(default)]
    #[validate(nested)]
    pub sift2: Sift2Params,

    #[serde(default)]
    #[validate(nested)]
    pub connectome: ConnectomeParams,
}

impl PipelineParameters {
    /// Look up a parameter by dotted key and render it as a command-line value
    ///
    /// ```
    /// use contracts::PipelineParameters;
    ///
    /// let params = PipelineParameters::default();
    /// assert_eq!(params.lookup("n4.shrink_factor").as_deref(), Some("4"));
    /// assert!(params.lookup("n4.missing").is_none());
    /// ```
    pub fn lookup(&self, key: &str) -> Option<String> {
        let tree = serde_json::to_value(self).ok()?;
        let pointer = format!("/{}", key.replace('.', "/"));
        match tree.pointer(&pointer)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// N4 bias field correction
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct N4Params {
    #[validate(range(min = 1, max = 16))]
    pub shrink_factor: u32,

    /// `[iterations per level, threshold]`
    #[validate(length(min = 1))]
    pub convergence: String,

    /// `[spline distance]`
    #[validate(length(min = 1))]
    pub bspline_fitting: String,
}

impl Default for N4Params {
    fn default() -> Self {
        Self {
            shrink_factor: 4,
            convergence: "[50x50x50x50,0.0000001]".into(),
            bspline_fitting: "[200]".into(),
        }
    }
}

/// Template-based brain extraction
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BrainExtractionParams {
    /// 1 keeps intermediate files
    #[validate(range(max = 1))]
    pub keep_temporary: u8,

    /// 1 uses a random seed for registration sampling
    #[validate(range(max = 1))]
    pub random_seeding: u8,
}

impl Default for BrainExtractionParams {
    fn default() -> Self {
        Self {
            keep_temporary: 0,
            random_seeding: 0,
        }
    }
}

/// Registration (template normalization and T1w-to-b0 alignment)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RegistrationParams {
    /// Transform type for template normalization (`s` = rigid+affine+SyN)
    #[validate(length(min = 1))]
    pub mni_transform_type: String,

    /// Transform type for T1w-to-b0 alignment (`r` = rigid, `a` = affine)
    #[validate(length(min = 1))]
    pub dwi_transform_type: String,

    #[validate(range(min = 1))]
    pub threads: u32,

    /// Interpolation for label images
    #[validate(length(min = 1))]
    pub label_interpolation: String,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            mni_transform_type: "s".into(),
            dwi_transform_type: "r".into(),
            threads: 1,
            label_interpolation: "NearestNeighbor".into(),
        }
    }
}

/// Five-tissue-type segmentation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SegmentationParams {
    #[validate(length(min = 1))]
    pub algorithm: String,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            algorithm: "fsl".into(),
        }
    }
}

/// Diffusion preprocessing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DwiParams {
    /// Phase encoding direction of the main series
    #[validate(length(min = 1))]
    pub phase_encoding_direction: String,

    /// Total readout time in seconds
    #[validate(range(min = 0.0, max = 1.0))]
    pub readout_time: f64,

    /// Reverse phase-encoding design (`pair`, `none`, ...)
    #[validate(length(min = 1))]
    pub rpe_mode: String,

    /// Options forwarded to eddy
    pub eddy_options: String,

    /// Bias field estimation backend
    #[validate(length(min = 1))]
    pub bias_algorithm: String,

    /// Brain mask backend
    #[validate(length(min = 1))]
    pub mask_algorithm: String,
}

impl Default for DwiParams {
    fn default() -> Self {
        Self {
            phase_encoding_direction: "AP".into(),
            readout_time: 0.1,
            rpe_mode: "pair".into(),
            eddy_options: " --slm=linear ".into(),
            bias_algorithm: "ants".into(),
            mask_algorithm: "legacy".into(),
        }
    }
}

/// Response function and fiber orientation estimation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CsdParams {
    #[validate(length(min = 1))]
    pub response_algorithm: String,

    #[validate(length(min = 1))]
    pub fod_algorithm: String,
}

impl Default for CsdParams {
    fn default() -> Self {
        Self {
            response_algorithm: "dhollander".into(),
            fod_algorithm: "msmt_csd".into(),
        }
    }
}

/// Anatomically constrained tractography
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TractographyParams {
    #[validate(length(min = 1))]
    pub algorithm: String,

    /// Number of streamlines to select
    #[validate(range(min = 1))]
    pub select: u64,

    /// Minimum streamline length (mm)
    #[validate(range(min = 0.0))]
    pub min_length: f64,

    /// Maximum streamline length (mm)
    #[validate(range(min = 0.0))]
    pub max_length: f64,

    /// FOD amplitude cutoff
    #[validate(range(min = 0.0, max = 1.0))]
    pub cutoff: f64,
}

impl Default for TractographyParams {
    fn default() -> Self {
        Self {
            algorithm: "iFOD2".into(),
            select: 10_000_000,
            min_length: 10.0,
            max_length: 250.0,
            cutoff: 0.06,
        }
    }
}

/// SIFT2 streamline weighting
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Sift2Params {
    #[validate(range(min = 0.0))]
    pub reg_tikhonov: f64,

    #[validate(range(min = 0.0))]
    pub reg_tv: f64,
}

impl Default for Sift2Params {
    fn default() -> Self {
        Self {
            reg_tikhonov: 0.0,
            reg_tv: 0.1,
        }
    }
}

/// Connectome construction
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConnectomeParams {
    /// Radial search distance for streamline endpoint assignment (mm)
    #[validate(range(min = 0.0))]
    pub assignment_radius: f64,

    /// Edge scaling suffix (`invnodevol`, `length`, `invlength`)
    #[validate(length(min = 1))]
    pub scale: String,
}

impl Default for ConnectomeParams {
    fn default() -> Self {
        Self {
            assignment_radius: 2.0,
            scale: "invnodevol".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_renders_numbers_and_strings() {
        let params = PipelineParameters::default();
        assert_eq!(params.lookup("tractography.select").as_deref(), Some("10000000"));
        assert_eq!(params.lookup("tractography.cutoff").as_deref(), Some("0.06"));
        assert_eq!(params.lookup("csd.fod_algorithm").as_deref(), Some("msmt_csd"));
    }

    #[test]
    fn test_lookup_rejects_sections() {
        let params = PipelineParameters::default();
        assert!(params.lookup("tractography").is_none());
        assert!(params.lookup("nope.select").is_none());
    }

    #[test]
    fn test_default_parameters_validate() {
        assert!(PipelineParameters::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_cutoff_is_rejected() {
        let mut params = PipelineParameters::default();
        params.tractography.cutoff = 2.0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_program_override() {
        let mut tools = ToolsConfig::default();
        tools
            .programs
            .insert("tckgen".into(), "/opt/mrtrix3/bin/tckgen".into());
        assert_eq!(tools.resolve_program("tckgen"), "/opt/mrtrix3/bin/tckgen");
        assert_eq!(tools.resolve_program("tcksift2"), "tcksift2");
    }
}
