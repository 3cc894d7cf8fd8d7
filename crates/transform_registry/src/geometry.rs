//! Geometric evaluation of transform chains
//!
//! Models every transform as a 4x4 homogeneous matrix so chains can be
//! applied to points. Displacement fields are approximated by their affine
//! part; this is enough to check that resolved chains compose and invert
//! consistently, not to resample images.

use std::collections::HashMap;
use std::path::Path;

use contracts::{PipelineError, TransformName};
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use crate::TransformChain;

/// Matrix of each named transform, in its forward direction
#[derive(Debug, Clone, Default)]
pub struct SpatialModel {
    matrices: HashMap<TransformName, Matrix4<f64>>,
}

impl SpatialModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: TransformName, matrix: Matrix4<f64>) {
        self.matrices.insert(name, matrix);
    }

    /// Read an ITK text affine (`.txt`) for `name`
    pub fn load_itk_affine(&mut self, name: TransformName, path: &Path) -> Result<(), PipelineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::transform_file(path, e.to_string()))?;
        let matrix = parse_itk_affine(&content).map_err(|msg| PipelineError::transform_file(path, msg))?;
        self.insert(name, matrix);
        Ok(())
    }

    /// Matrix of the whole chain (first entry applied first)
    ///
    /// # Errors
    /// `InvalidTransformChain` when an entry is unknown to the model or an
    /// inverse entry refers to a singular matrix.
    pub fn compose(&self, chain: &TransformChain) -> Result<Matrix4<f64>, PipelineError> {
        let mut total = Matrix4::identity();
        for t in chain.entries() {
            let forward = self.matrices.get(&t.name).ok_or_else(|| {
                PipelineError::InvalidTransformChain {
                    message: format!("no geometry for transform '{}'", t.name),
                }
            })?;
            let m = if t.kind.is_inverse() {
                forward.try_inverse().ok_or_else(|| PipelineError::InvalidTransformChain {
                    message: format!("transform '{}' is not invertible", t.name),
                })?
            } else {
                *forward
            };
            total = m * total;
        }
        Ok(total)
    }

    /// Map a point through the chain
    pub fn apply(&self, chain: &TransformChain, point: &Point3<f64>) -> Result<Point3<f64>, PipelineError> {
        Ok(self.compose(chain)?.transform_point(point))
    }
}

/// Parse an ITK `AffineTransform_double_3_3` text file
///
/// ITK stores the 3x3 matrix row-major followed by the translation, and a
/// center of rotation as fixed parameters:
/// `y = A (x - c) + t + c`.
pub fn parse_itk_affine(content: &str) -> Result<Matrix4<f64>, String> {
    let mut kind = None;
    let mut params: Option<Vec<f64>> = None;
    let mut fixed: Option<Vec<f64>> = None;

    for line in content.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Transform:") {
            kind = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("FixedParameters:") {
            fixed = Some(parse_numbers(rest)?);
        } else if let Some(rest) = line.strip_prefix("Parameters:") {
            params = Some(parse_numbers(rest)?);
        }
    }

    let kind = kind.ok_or("missing 'Transform:' line")?;
    if !(kind.starts_with("AffineTransform_") || kind.starts_with("MatrixOffsetTransformBase_")) {
        return Err(format!("unsupported transform type '{kind}'"));
    }
    let params = params.ok_or("missing 'Parameters:' line")?;
    if params.len() != 12 {
        return Err(format!("expected 12 parameters, found {}", params.len()));
    }
    let center = match fixed {
        Some(c) if c.len() == 3 => Vector3::new(c[0], c[1], c[2]),
        Some(c) => return Err(format!("expected 3 fixed parameters, found {}", c.len())),
        None => Vector3::zeros(),
    };

    let linear = Matrix3::from_row_slice(&params[..9]);
    let translation = Vector3::new(params[9], params[10], params[11]);
    let offset = translation + center - linear * center;

    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(&linear);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(&offset);
    Ok(m)
}

fn parse_numbers(raw: &str) -> Result<Vec<f64>, String> {
    raw.split_whitespace()
        .map(|s| s.parse::<f64>().map_err(|e| format!("invalid number '{s}': {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransformRegistry;
    use contracts::CoordinateSpace::{DwiB0, Mni, Native};
    use contracts::TransformKind::{Affine, Warp};
    use std::io::Write;

    const EPS: f64 = 1e-9;

    fn rigid(angle: f64, axis: Vector3<f64>, shift: Vector3<f64>) -> Matrix4<f64> {
        Matrix4::new_translation(&shift) * Matrix4::new_rotation(axis * angle)
    }

    fn registry_and_model() -> (TransformRegistry, SpatialModel) {
        let mut reg = TransformRegistry::new();
        reg.register("native_to_mni_affine".into(), Native, Mni, Affine, "/d/0GenericAffine.mat")
            .unwrap();
        reg.register_with_inverse(
            "native_to_mni_warp".into(),
            Native,
            Mni,
            Warp,
            "/d/1Warp.nii.gz",
            "/d/1InverseWarp.nii.gz",
        )
        .unwrap();
        reg.register("native_to_dwi_affine".into(), Native, DwiB0, Affine, "/d/dwi.mat")
            .unwrap();

        let mut model = SpatialModel::new();
        model.insert(
            "native_to_mni_affine".into(),
            Matrix4::new_nonuniform_scaling(&Vector3::new(1.1, 0.95, 1.05))
                * rigid(0.2, Vector3::z(), Vector3::new(-3.0, 12.5, 7.0)),
        );
        model.insert(
            "native_to_mni_warp".into(),
            rigid(0.03, Vector3::x(), Vector3::new(0.4, -0.2, 1.1)),
        );
        model.insert(
            "native_to_dwi_affine".into(),
            rigid(-0.1, Vector3::y(), Vector3::new(2.0, 0.0, -4.5)),
        );
        (reg, model)
    }

    #[test]
    fn test_native_dwi_round_trip() {
        let (reg, model) = registry_and_model();
        let there = reg.resolve(Native, DwiB0).unwrap();
        let back = reg.resolve(DwiB0, Native).unwrap();

        for p in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(-45.2, 18.0, 60.7),
            Point3::new(90.0, -120.0, 33.3),
        ] {
            let q = model.apply(&back, &model.apply(&there, &p).unwrap()).unwrap();
            assert!((q - p).norm() < EPS, "{p} -> {q}");
        }
    }

    #[test]
    fn test_mni_dwi_round_trip_through_native() {
        let (reg, model) = registry_and_model();
        let there = reg.resolve(Mni, DwiB0).unwrap();
        let back = reg.resolve(DwiB0, Mni).unwrap();
        assert_eq!(there.len(), 3);

        let p = Point3::new(12.0, -7.5, 3.25);
        let q = model.apply(&back, &model.apply(&there, &p).unwrap()).unwrap();
        assert!((q - p).norm() < EPS);
    }

    #[test]
    fn test_composite_applies_affine_before_warp() {
        let (reg, model) = registry_and_model();
        let chain = reg.resolve(Native, Mni).unwrap();
        let p = Point3::new(1.0, 2.0, 3.0);
        let expected = model.matrices[&TransformName::from("native_to_mni_warp")]
            * model.matrices[&TransformName::from("native_to_mni_affine")];
        let q = model.apply(&chain, &p).unwrap();
        assert!((q - expected.transform_point(&p)).norm() < EPS);
    }

    #[test]
    fn test_unknown_geometry() {
        let (reg, _) = registry_and_model();
        let chain = reg.resolve(Native, DwiB0).unwrap();
        let empty = SpatialModel::new();
        assert!(empty.apply(&chain, &Point3::origin()).is_err());
    }

    #[test]
    fn test_parse_itk_affine_with_center() {
        let content = "\
#Insight Transform File V1.0
#Transform 0
Transform: AffineTransform_double_3_3
Parameters: 0 -1 0 1 0 0 0 0 1 5 0 0
FixedParameters: 1 1 0
";
        let m = parse_itk_affine(content).unwrap();
        // Rotation of 90 degrees about (1, 1, 0), then shift by 5 along x
        let q = m.transform_point(&Point3::new(2.0, 1.0, 0.0));
        assert!((q - Point3::new(6.0, 2.0, 0.0)).norm() < EPS, "{q}");
    }

    #[test]
    fn test_parse_itk_rejects_other_types() {
        let content = "Transform: Euler3DTransform_double_3_3\nParameters: 0 0 0 1 2 3\n";
        assert!(parse_itk_affine(content).unwrap_err().contains("unsupported"));
        assert!(parse_itk_affine("Transform: AffineTransform_double_3_3\nParameters: 1 2\n").is_err());
    }

    #[test]
    fn test_load_itk_affine_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Transform: AffineTransform_double_3_3").unwrap();
        writeln!(file, "Parameters: 1 0 0 0 1 0 0 0 1 1 2 3").unwrap();

        let mut model = SpatialModel::new();
        model.load_itk_affine("t".into(), file.path()).unwrap();
        let chain = TransformChain::new(
            Native,
            Mni,
            vec![contracts::Transform::new("t".into(), Native, Mni, Affine, file.path())],
        )
        .unwrap();
        let q = model.apply(&chain, &Point3::origin()).unwrap();
        assert!((q - Point3::new(1.0, 2.0, 3.0)).norm() < EPS);
    }
}
