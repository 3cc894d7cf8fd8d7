//! Structural connectome pipeline
//!
//! Anatomical branch (T1w): bias correction, brain extraction, template
//! normalization, five-tissue-type segmentation and atlas warping.
//! Diffusion branch: conversion, denoising, unringing, distortion/motion
//! correction, bias correction, masking and the mean b=0 reference.
//! The branches meet through a T1w-to-b0 registration; tissue maps and the
//! atlas are carried into diffusion space, followed by response/FOD
//! estimation, anatomically constrained tractography, SIFT2 weighting and
//! connectome construction.

use contracts::arg::{chain, concat, input, lit, output, param, prefix};
use contracts::{
    BidsDatatype, CoordinateSpace, Modality, PipelineBlueprint, PipelineDefinition, SourceDecl,
    StageSpec, TransformDecl, TransformKind,
};

use CoordinateSpace::{DwiB0, Mni, Native};

/// Version recorded in every run manifest
pub const PIPELINE_VERSION: &str = "connectome-v1";

const MRTRIX_FORCE: &str = "-force";

/// Pipeline inputs: raw BIDS files of the subject and template files
pub fn sources(blueprint: &PipelineBlueprint) -> Vec<SourceDecl> {
    let inputs = &blueprint.inputs;
    let templates = &blueprint.templates;
    vec![
        SourceDecl::bids("t1w_raw", Native, BidsDatatype::Anat, &inputs.t1w),
        SourceDecl::bids("dwi_raw", DwiB0, BidsDatatype::Dwi, &inputs.dwi),
        SourceDecl::bids("dwi_bval", DwiB0, BidsDatatype::Dwi, &inputs.bval),
        SourceDecl::bids("dwi_bvec", DwiB0, BidsDatatype::Dwi, &inputs.bvec),
        SourceDecl::bids("fmap_b0_pair", DwiB0, BidsDatatype::Fmap, &inputs.fmap_b0_pair),
        SourceDecl::template("template", Mni, &templates.template),
        SourceDecl::template(
            "template_brain_probability_mask",
            Mni,
            &templates.brain_probability_mask,
        ),
        SourceDecl::template("template_registration_mask", Mni, &templates.registration_mask),
        SourceDecl::template("atlas_mni", Mni, &templates.atlas),
    ]
}

/// The full pipeline definition for a configuration
pub fn definition(blueprint: &PipelineBlueprint) -> PipelineDefinition {
    let mut stages = anatomical_stages();
    stages.extend(diffusion_stages());
    stages.extend(coregistration_stages());
    stages.extend(tractography_stages());
    PipelineDefinition {
        version: PIPELINE_VERSION.to_string(),
        sources: sources(blueprint),
        stages,
    }
}

fn anatomical_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("t1w_bias_correction", Modality::Anat, "N4BiasFieldCorrection")
            .describe("N4 bias field correction of the T1w image")
            .requires(&["t1w_raw"])
            .produces("t1w_bias_corrected", "desc-biascorrected_T1w.nii.gz", Native)
            .args([
                lit("-d"),
                lit("3"),
                lit("-i"),
                input("t1w_raw"),
                lit("-s"),
                param("n4.shrink_factor"),
                lit("-c"),
                param("n4.convergence"),
                lit("-b"),
                param("n4.bspline_fitting"),
                lit("-o"),
                output("t1w_bias_corrected"),
            ]),
        StageSpec::new("t1w_brain_extraction", Modality::Anat, "antsBrainExtraction.sh")
            .describe("Template-based skull stripping")
            .requires(&[
                "t1w_bias_corrected",
                "template",
                "template_brain_probability_mask",
                "template_registration_mask",
            ])
            .produces("t1w_brain_extracted", "desc-brain_BrainExtractionBrain.nii.gz", Native)
            .produces("t1w_brain_mask", "desc-brain_BrainExtractionMask.nii.gz", Native)
            .args([
                lit("-d"),
                lit("3"),
                lit("-a"),
                input("t1w_bias_corrected"),
                lit("-e"),
                input("template"),
                lit("-m"),
                input("template_brain_probability_mask"),
                lit("-f"),
                input("template_registration_mask"),
                lit("-k"),
                param("brain_extraction.keep_temporary"),
                lit("-u"),
                param("brain_extraction.random_seeding"),
                lit("-o"),
                prefix("desc-brain_"),
            ]),
        StageSpec::new("mni_normalization", Modality::Anat, "antsRegistrationSyN.sh")
            .describe("Nonlinear registration of the brain-extracted T1w to the template")
            .requires(&["template", "t1w_brain_extracted"])
            .produces("mni_affine_file", "from-T1w_to-MNI_0GenericAffine.mat", Mni)
            .produces("mni_warp_file", "from-T1w_to-MNI_1Warp.nii.gz", Mni)
            .produces("mni_inverse_warp_file", "from-T1w_to-MNI_1InverseWarp.nii.gz", Native)
            .produces("t1w_in_mni", "from-T1w_to-MNI_Warped.nii.gz", Mni)
            .produces_transform(TransformDecl {
                name: "native_to_mni_affine".into(),
                source_space: Native,
                target_space: Mni,
                kind: TransformKind::Affine,
                file: "mni_affine_file".into(),
                inverse_file: None,
            })
            .produces_transform(TransformDecl {
                name: "native_to_mni_warp".into(),
                source_space: Native,
                target_space: Mni,
                kind: TransformKind::Warp,
                file: "mni_warp_file".into(),
                inverse_file: Some("mni_inverse_warp_file".into()),
            })
            .args([
                lit("-d"),
                lit("3"),
                lit("-f"),
                input("template"),
                lit("-m"),
                input("t1w_brain_extracted"),
                lit("-t"),
                param("registration.mni_transform_type"),
                lit("-n"),
                param("registration.threads"),
                lit("-o"),
                prefix("from-T1w_to-MNI_"),
            ]),
        StageSpec::new("tissue_segmentation", Modality::Anat, "5ttgen")
            .describe("Five-tissue-type segmentation for anatomically constrained tractography")
            .requires(&["t1w_brain_extracted"])
            .produces("five_tissue_types", "desc-5tt_probseg.nii.gz", Native)
            .args([
                param("segmentation.algorithm"),
                input("t1w_brain_extracted"),
                output("five_tissue_types"),
                lit("-premasked"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("atlas_to_native", Modality::Anat, "antsApplyTransforms")
            .describe("Parcellation atlas warped into T1w space")
            .requires(&["atlas_mni", "t1w_brain_extracted"])
            .requires_transforms(&["native_to_mni_affine", "native_to_mni_warp"])
            .produces("atlas_native", "space-T1w_desc-atlas_dseg.nii.gz", Native)
            .args([
                lit("-d"),
                lit("3"),
                lit("-i"),
                input("atlas_mni"),
                lit("-r"),
                input("t1w_brain_extracted"),
                lit("-n"),
                param("registration.label_interpolation"),
                chain(Mni, Native),
                lit("-o"),
                output("atlas_native"),
            ]),
    ]
}

fn diffusion_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("dwi_conversion", Modality::Dwi, "mrconvert")
            .describe("Raw DWI with FSL gradient table to MRtrix format")
            .requires(&["dwi_raw", "dwi_bval", "dwi_bvec"])
            .produces("dwi_mif", "dwi.mif", DwiB0)
            .args([
                input("dwi_raw"),
                output("dwi_mif"),
                lit("-fslgrad"),
                input("dwi_bvec"),
                input("dwi_bval"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("dwi_denoising", Modality::Dwi, "dwidenoise")
            .describe("MP-PCA denoising")
            .requires(&["dwi_mif"])
            .produces("dwi_denoised", "desc-denoised_dwi.mif", DwiB0)
            .produces("dwi_noise_map", "desc-noise_dwi.mif", DwiB0)
            .args([
                input("dwi_mif"),
                output("dwi_denoised"),
                lit("-noise"),
                output("dwi_noise_map"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("dwi_unringing", Modality::Dwi, "mrdegibbs")
            .describe("Gibbs ringing removal")
            .requires(&["dwi_denoised"])
            .produces("dwi_unringed", "desc-unringed_dwi.mif", DwiB0)
            .args([input("dwi_denoised"), output("dwi_unringed")])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("dwi_preprocessing", Modality::Dwi, "dwifslpreproc")
            .describe("Susceptibility, eddy current and motion correction")
            .requires(&["dwi_unringed", "fmap_b0_pair"])
            .produces("dwi_preprocessed", "desc-preproc_dwi.mif", DwiB0)
            .args([
                input("dwi_unringed"),
                output("dwi_preprocessed"),
                lit("-pe_dir"),
                param("dwi.phase_encoding_direction"),
                concat([lit("-rpe_"), param("dwi.rpe_mode")]),
                lit("-se_epi"),
                input("fmap_b0_pair"),
                lit("-readout_time"),
                param("dwi.readout_time"),
                lit("-eddy_options"),
                param("dwi.eddy_options"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("dwi_bias_correction", Modality::Dwi, "dwibiascorrect")
            .describe("B1 field inhomogeneity correction")
            .requires(&["dwi_preprocessed"])
            .produces("dwi_bias_corrected", "desc-biascorrected_dwi.mif", DwiB0)
            .args([
                param("dwi.bias_algorithm"),
                input("dwi_preprocessed"),
                output("dwi_bias_corrected"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("dwi_brain_mask", Modality::Dwi, "dwi2mask")
            .describe("Diffusion brain mask")
            .requires(&["dwi_bias_corrected"])
            .produces("dwi_mask", "desc-brain_mask.mif", DwiB0)
            .args([
                param("dwi.mask_algorithm"),
                input("dwi_bias_corrected"),
                output("dwi_mask"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("b0_extraction", Modality::Dwi, "dwiextract")
            .describe("b=0 volumes of the preprocessed series")
            .requires(&["dwi_bias_corrected"])
            .produces("b0_volumes", "desc-b0_dwi.mif", DwiB0)
            .args([
                input("dwi_bias_corrected"),
                output("b0_volumes"),
                lit("-bzero"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("b0_mean", Modality::Dwi, "mrmath")
            .describe("Mean b=0 image, the reference of diffusion space")
            .requires(&["b0_volumes"])
            .produces("b0_mean_preproc", "desc-b0mean_dwi.nii.gz", DwiB0)
            .args([
                input("b0_volumes"),
                lit("mean"),
                output("b0_mean_preproc"),
                lit("-axis"),
                lit("3"),
            ])
            .force_flag(MRTRIX_FORCE),
    ]
}

fn coregistration_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("t1w_to_dwi_registration", Modality::Dwi, "antsRegistrationSyN.sh")
            .describe("Rigid alignment of the T1w brain to the mean b=0 image")
            .requires(&["b0_mean_preproc", "t1w_brain_extracted"])
            .produces("dwi_affine_file", "from-T1w_to-dwi_0GenericAffine.mat", DwiB0)
            .produces("t1w_in_dwi", "from-T1w_to-dwi_Warped.nii.gz", DwiB0)
            .produces_transform(TransformDecl {
                name: "native_to_dwi_affine".into(),
                source_space: Native,
                target_space: DwiB0,
                kind: TransformKind::Affine,
                file: "dwi_affine_file".into(),
                inverse_file: None,
            })
            .args([
                lit("-d"),
                lit("3"),
                lit("-f"),
                input("b0_mean_preproc"),
                lit("-m"),
                input("t1w_brain_extracted"),
                lit("-t"),
                param("registration.dwi_transform_type"),
                lit("-n"),
                param("registration.threads"),
                lit("-o"),
                prefix("from-T1w_to-dwi_"),
            ]),
        StageSpec::new("tissue_to_dwi", Modality::Dwi, "antsApplyTransforms")
            .describe("Five-tissue-type image carried into diffusion space")
            .requires(&["five_tissue_types", "b0_mean_preproc"])
            .requires_transforms(&["native_to_dwi_affine"])
            .produces("five_tissue_types_dwi", "space-dwi_desc-5tt_probseg.nii.gz", DwiB0)
            .args([
                lit("-d"),
                lit("3"),
                lit("-e"),
                lit("3"),
                lit("-i"),
                input("five_tissue_types"),
                lit("-r"),
                input("b0_mean_preproc"),
                chain(Native, DwiB0),
                lit("-o"),
                output("five_tissue_types_dwi"),
            ]),
        StageSpec::new("gmwm_interface", Modality::Dwi, "5tt2gmwmi")
            .describe("Grey/white matter interface seeding mask")
            .requires(&["five_tissue_types_dwi"])
            .produces("gmwm_interface_dwi", "space-dwi_desc-gmwmi_probseg.nii.gz", DwiB0)
            .args([input("five_tissue_types_dwi"), output("gmwm_interface_dwi")])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("atlas_to_dwi", Modality::Dwi, "antsApplyTransforms")
            .describe("Parcellation atlas carried from template to diffusion space")
            .requires(&["atlas_mni", "b0_mean_preproc"])
            .requires_transforms(&[
                "native_to_mni_affine",
                "native_to_mni_warp",
                "native_to_dwi_affine",
            ])
            .produces("atlas_in_dwi_space", "space-dwi_desc-atlas_dseg.nii.gz", DwiB0)
            .args([
                lit("-d"),
                lit("3"),
                lit("-i"),
                input("atlas_mni"),
                lit("-r"),
                input("b0_mean_preproc"),
                lit("-n"),
                param("registration.label_interpolation"),
                chain(Mni, DwiB0),
                lit("-o"),
                output("atlas_in_dwi_space"),
            ]),
    ]
}

fn tractography_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("response_estimation", Modality::Dwi, "dwi2response")
            .describe("Tissue response functions")
            .requires(&["dwi_bias_corrected", "dwi_mask"])
            .produces("response_wm", "desc-wm_response.txt", DwiB0)
            .produces("response_gm", "desc-gm_response.txt", DwiB0)
            .produces("response_csf", "desc-csf_response.txt", DwiB0)
            .args([
                param("csd.response_algorithm"),
                input("dwi_bias_corrected"),
                output("response_wm"),
                output("response_gm"),
                output("response_csf"),
                lit("-mask"),
                input("dwi_mask"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("fod_estimation", Modality::Dwi, "dwi2fod")
            .describe("Multi-tissue fiber orientation distributions")
            .requires(&[
                "dwi_bias_corrected",
                "dwi_mask",
                "response_wm",
                "response_gm",
                "response_csf",
            ])
            .produces("fod_wm", "desc-wm_fod.mif", DwiB0)
            .produces("fod_gm", "desc-gm_fod.mif", DwiB0)
            .produces("fod_csf", "desc-csf_fod.mif", DwiB0)
            .args([
                param("csd.fod_algorithm"),
                input("dwi_bias_corrected"),
                input("response_wm"),
                output("fod_wm"),
                input("response_gm"),
                output("fod_gm"),
                input("response_csf"),
                output("fod_csf"),
                lit("-mask"),
                input("dwi_mask"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("intensity_normalization", Modality::Dwi, "mtnormalise")
            .describe("Multi-tissue intensity normalisation of the FODs")
            .requires(&["fod_wm", "fod_gm", "fod_csf", "dwi_mask"])
            .produces("fod_wm_norm", "desc-wmnorm_fod.mif", DwiB0)
            .produces("fod_gm_norm", "desc-gmnorm_fod.mif", DwiB0)
            .produces("fod_csf_norm", "desc-csfnorm_fod.mif", DwiB0)
            .args([
                input("fod_wm"),
                output("fod_wm_norm"),
                input("fod_gm"),
                output("fod_gm_norm"),
                input("fod_csf"),
                output("fod_csf_norm"),
                lit("-mask"),
                input("dwi_mask"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("tractography", Modality::Dwi, "tckgen")
            .describe("Anatomically constrained probabilistic tractography")
            .requires(&["fod_wm_norm", "five_tissue_types_dwi", "gmwm_interface_dwi"])
            .produces("tractogram", "desc-tracks_tractography.tck", DwiB0)
            .args([
                input("fod_wm_norm"),
                output("tractogram"),
                lit("-algorithm"),
                param("tractography.algorithm"),
                lit("-act"),
                input("five_tissue_types_dwi"),
                lit("-backtrack"),
                lit("-seed_gmwmi"),
                input("gmwm_interface_dwi"),
                lit("-select"),
                param("tractography.select"),
                lit("-minlength"),
                param("tractography.min_length"),
                lit("-maxlength"),
                param("tractography.max_length"),
                lit("-cutoff"),
                param("tractography.cutoff"),
            ])
            .force_flag(MRTRIX_FORCE)
            .non_idempotent(),
        StageSpec::new("sift2_filtering", Modality::Dwi, "tcksift2")
            .describe("SIFT2 streamline weights")
            .requires(&["tractogram", "fod_wm_norm", "five_tissue_types_dwi"])
            .produces("sift2_weights", "desc-sift2_weights.csv", DwiB0)
            .args([
                input("tractogram"),
                input("fod_wm_norm"),
                output("sift2_weights"),
                lit("-act"),
                input("five_tissue_types_dwi"),
                lit("-reg_tikhonov"),
                param("sift2.reg_tikhonov"),
                lit("-reg_tv"),
                param("sift2.reg_tv"),
            ])
            .force_flag(MRTRIX_FORCE),
        StageSpec::new("connectome_construction", Modality::Dwi, "tck2connectome")
            .describe("Weighted structural connectivity matrix")
            .requires(&["tractogram", "atlas_in_dwi_space", "sift2_weights"])
            .produces("connectome", "desc-sift2_connectome.csv", DwiB0)
            .produces("connectome_assignments", "desc-sift2_assignments.txt", DwiB0)
            .args([
                input("tractogram"),
                input("atlas_in_dwi_space"),
                output("connectome"),
                lit("-tck_weights_in"),
                input("sift2_weights"),
                lit("-assignment_radial_search"),
                param("connectome.assignment_radius"),
                concat([lit("-scale_"), param("connectome.scale")]),
                lit("-symmetric"),
                lit("-zero_diagonal"),
                lit("-out_assignments"),
                output("connectome_assignments"),
            ])
            .force_flag(MRTRIX_FORCE),
    ]
}
