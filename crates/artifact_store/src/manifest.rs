//! Run manifest - JSON record of one subject run

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use contracts::{Artifact, PipelineError, PipelineRun, Transform};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stage outcomes plus the final artifact and transform state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run: PipelineRun,
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
}

impl RunManifest {
    /// Write pretty JSON next to `path`, then rename into place
    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.partial");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, self)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Manifest written");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(|e| {
            PipelineError::Other(format!("invalid manifest {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CoordinateSpace, Producer, RunMode, StageStatus};
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub-001").join("sub-001_pipeline-run.json");

        let mut run = PipelineRun::new("sub-001".into(), "v1", RunMode::Resume, ["b0_mean".into()]);
        run.stages[0].status = StageStatus::Succeeded;
        let manifest = RunManifest {
            run,
            artifacts: vec![Artifact::pending(
                "b0_mean_preproc".into(),
                "/d/b0.nii.gz",
                CoordinateSpace::DwiB0,
                Producer::Stage("b0_mean".into()),
            )],
            transforms: vec![],
        };
        manifest.write(&path).unwrap();
        assert!(!path.with_extension("json.partial").exists());

        let back = RunManifest::read(&path).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.run.status_of("b0_mean"), Some(StageStatus::Succeeded));
    }
}
