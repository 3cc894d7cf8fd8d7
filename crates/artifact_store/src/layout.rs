//! SubjectLayout - deterministic per-subject paths
//!
//! Every artifact path is a pure function of (roots, subject, declaration),
//! so a file's presence at its path is the completion marker of the stage
//! that writes it.

use std::path::{Path, PathBuf};

use contracts::{Modality, PathsConfig, PipelineError, SourceDecl, SourceLocation, SubjectId};

/// Path templating for one subject
#[derive(Debug, Clone)]
pub struct SubjectLayout {
    subject: SubjectId,
    bids_root: PathBuf,
    derivatives_root: PathBuf,
    template_dir: PathBuf,
}

impl SubjectLayout {
    /// # Errors
    /// `ConfigValidation` when the subject id is empty or could escape the
    /// dataset roots (path separators, `..`).
    pub fn new(subject: SubjectId, paths: &PathsConfig) -> Result<Self, PipelineError> {
        validate_subject_id(&subject)?;
        Ok(Self {
            subject,
            bids_root: paths.bids_root.clone(),
            derivatives_root: paths.derivatives_root.clone(),
            template_dir: paths.template_dir.clone(),
        })
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// `{bids_root}/{subject}`
    pub fn bids_subject_dir(&self) -> PathBuf {
        self.bids_root.join(self.subject.as_str())
    }

    /// `{derivatives_root}/{subject}`
    pub fn subject_dir(&self) -> PathBuf {
        self.derivatives_root.join(self.subject.as_str())
    }

    /// `{derivatives_root}/{subject}/{anat|dwi}`
    pub fn modality_dir(&self, modality: Modality) -> PathBuf {
        self.subject_dir().join(modality.dir_name())
    }

    /// `{derivatives_root}/{subject}/{anat|dwi}/{subject}_{file_name}`
    pub fn derivative_path(&self, modality: Modality, file_name: &str) -> PathBuf {
        self.modality_dir(modality)
            .join(format!("{}_{}", self.subject, file_name))
    }

    /// Path prefix handed to tools that name their outputs themselves
    ///
    /// ANTs scripts append e.g. `0GenericAffine.mat` to the prefix.
    pub fn output_prefix(&self, modality: Modality, prefix: &str) -> PathBuf {
        self.derivative_path(modality, prefix)
    }

    /// Location of a pipeline input
    pub fn source_path(&self, source: &SourceDecl) -> PathBuf {
        match &source.location {
            SourceLocation::Bids { datatype, suffix } => self
                .bids_subject_dir()
                .join(datatype.dir_name())
                .join(format!("{}{}", self.subject, suffix)),
            SourceLocation::Template { file_name } => self.template_dir.join(file_name),
        }
    }

    /// `{derivatives_root}/{subject}/{subject}_pipeline-run.json`
    pub fn manifest_path(&self) -> PathBuf {
        self.subject_dir()
            .join(format!("{}_pipeline-run.json", self.subject))
    }

    pub fn derivatives_root(&self) -> &Path {
        &self.derivatives_root
    }
}

fn validate_subject_id(subject: &str) -> Result<(), PipelineError> {
    if subject.is_empty() {
        return Err(PipelineError::config_validation("subject", "subject id cannot be empty"));
    }
    if subject.contains(['/', '\\']) || subject == "." || subject == ".." {
        return Err(PipelineError::config_validation(
            "subject",
            format!("'{subject}' is not a plain directory name"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BidsDatatype, CoordinateSpace};

    fn paths() -> PathsConfig {
        PathsConfig {
            bids_root: "/data/bids".into(),
            derivatives_root: "/data/derivatives".into(),
            template_dir: "/data/templates".into(),
        }
    }

    #[test]
    fn test_derivative_path() {
        let layout = SubjectLayout::new("sub-001".into(), &paths()).unwrap();
        assert_eq!(
            layout.derivative_path(Modality::Dwi, "desc-preproc_dwi.mif"),
            PathBuf::from("/data/derivatives/sub-001/dwi/sub-001_desc-preproc_dwi.mif")
        );
        assert_eq!(
            layout.manifest_path(),
            PathBuf::from("/data/derivatives/sub-001/sub-001_pipeline-run.json")
        );
    }

    #[test]
    fn test_source_paths() {
        let layout = SubjectLayout::new("sub-001".into(), &paths()).unwrap();
        let t1w = SourceDecl::bids("t1w_raw", CoordinateSpace::Native, BidsDatatype::Anat, "_T1w.nii.gz");
        assert_eq!(
            layout.source_path(&t1w),
            PathBuf::from("/data/bids/sub-001/anat/sub-001_T1w.nii.gz")
        );

        let atlas = SourceDecl::template("atlas_mni", CoordinateSpace::Mni, "atlas.nii.gz");
        assert_eq!(layout.source_path(&atlas), PathBuf::from("/data/templates/atlas.nii.gz"));
    }

    #[test]
    fn test_rejects_path_like_subject() {
        assert!(SubjectLayout::new("".into(), &paths()).is_err());
        assert!(SubjectLayout::new("../sub-001".into(), &paths()).is_err());
        assert!(SubjectLayout::new("..".into(), &paths()).is_err());
    }
}
