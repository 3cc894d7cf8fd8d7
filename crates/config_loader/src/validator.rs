//! Configuration validation
//!
//! Rules:
//! - field ranges and non-empty strings declared on the blueprint types
//!   (`validator` derive)
//! - bids_root and derivatives_root are distinct
//! - tractography min_length < max_length
//! - phase encoding direction and reverse phase-encoding mode are known
//! - program overrides and tool environment keys are non-empty

use std::borrow::Cow;

use contracts::{PipelineBlueprint, PipelineError};
use ::validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

const PHASE_ENCODING_DIRECTIONS: [&str; 6] = ["AP", "PA", "LR", "RL", "IS", "SI"];
const RPE_MODES: [&str; 4] = ["none", "pair", "all", "header"];

/// Validate a PipelineBlueprint
///
/// Returns the first violation found, or Ok(()).
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), PipelineError> {
    validate_declared_rules(blueprint)?;
    validate_paths(blueprint)?;
    validate_tractography(blueprint)?;
    validate_dwi(blueprint)?;
    validate_tools(blueprint)?;
    Ok(())
}

/// Rules declared with `#[validate(...)]` on the blueprint types
fn validate_declared_rules(blueprint: &PipelineBlueprint) -> Result<(), PipelineError> {
    match blueprint.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let (field, message) = first_violation(&errors, "")
                .unwrap_or_else(|| ("<unknown>".to_string(), errors.to_string()));
            Err(PipelineError::config_validation(field, message))
        }
    }
}

/// Walk nested validation errors to the first field error, in key order
fn first_violation(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut keys: Vec<&Cow<'static, str>> = errors.errors().keys().collect();
    keys.sort();

    for key in keys {
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match &errors.errors()[key] {
            ValidationErrorsKind::Field(field_errors) => {
                if let Some(err) = field_errors.first() {
                    return Some((path, describe(err)));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_violation(inner, &path) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    if let Some(found) = first_violation(inner, &format!("{path}[{idx}]")) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

fn describe(err: &ValidationError) -> String {
    if let Some(message) = &err.message {
        return message.to_string();
    }
    let mut params: Vec<_> = err
        .params
        .iter()
        .filter(|(k, _)| k.as_ref() != "value")
        .map(|(k, v)| format!("{k} = {v}"))
        .collect();
    params.sort();
    let value = err
        .params
        .get("value")
        .map(|v| format!(", got {v}"))
        .unwrap_or_default();
    if params.is_empty() {
        format!("{} check failed{value}", err.code)
    } else {
        format!("{} check failed ({}){value}", err.code, params.join(", "))
    }
}

/// Dataset roots
fn validate_paths(blueprint: &PipelineBlueprint) -> Result<(), PipelineError> {
    let paths = &blueprint.paths;
    for (field, path) in [
        ("paths.bids_root", &paths.bids_root),
        ("paths.derivatives_root", &paths.derivatives_root),
        ("paths.template_dir", &paths.template_dir),
    ] {
        if path.as_os_str().is_empty() {
            return Err(PipelineError::config_validation(field, "path cannot be empty"));
        }
    }

    if paths.bids_root == paths.derivatives_root {
        return Err(PipelineError::config_validation(
            "paths.derivatives_root",
            "derivatives must not be written into the BIDS root",
        ));
    }
    Ok(())
}

/// Streamline length window
fn validate_tractography(blueprint: &PipelineBlueprint) -> Result<(), PipelineError> {
    let t = &blueprint.parameters.tractography;
    if t.min_length >= t.max_length {
        return Err(PipelineError::config_validation(
            "parameters.tractography.min_length / parameters.tractography.max_length",
            format!(
                "min_length ({}) must be < max_length ({})",
                t.min_length, t.max_length
            ),
        ));
    }
    Ok(())
}

/// Acquisition parameters of the diffusion series
fn validate_dwi(blueprint: &PipelineBlueprint) -> Result<(), PipelineError> {
    let dwi = &blueprint.parameters.dwi;
    if !PHASE_ENCODING_DIRECTIONS.contains(&dwi.phase_encoding_direction.as_str()) {
        return Err(PipelineError::config_validation(
            "parameters.dwi.phase_encoding_direction",
            format!(
                "'{}' is not one of {}",
                dwi.phase_encoding_direction,
                PHASE_ENCODING_DIRECTIONS.join(", ")
            ),
        ));
    }
    if !RPE_MODES.contains(&dwi.rpe_mode.as_str()) {
        return Err(PipelineError::config_validation(
            "parameters.dwi.rpe_mode",
            format!("'{}' is not one of {}", dwi.rpe_mode, RPE_MODES.join(", ")),
        ));
    }
    Ok(())
}

/// Program overrides and tool environment
fn validate_tools(blueprint: &PipelineBlueprint) -> Result<(), PipelineError> {
    for (program, path) in &blueprint.tools.programs {
        if path.trim().is_empty() {
            return Err(PipelineError::config_validation(
                format!("tools.programs.{program}"),
                "override path cannot be empty",
            ));
        }
    }
    for key in blueprint.tools.env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(PipelineError::config_validation(
                format!("tools.env[{key}]"),
                "invalid environment variable name",
            ));
        }
    }
    Ok(())
}
