//! StageSpec - declarative description of one pipeline step
//!
//! A stage names the artifacts and transforms it consumes, the ones it
//! produces, and the external command line that turns the former into the
//! latter. The command line is a template of [`ArgToken`]s that is rendered
//! against a subject's artifact paths and the configured parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{ArtifactName, BidsDatatype, CoordinateSpace, Modality, StageId, TransformKind, TransformName};

/// One element of a stage's argument template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "token", content = "value")]
pub enum ArgToken {
    /// Passed through verbatim
    Literal(String),
    /// Path of a required artifact
    Input(ArtifactName),
    /// Path of a produced artifact
    Output(ArtifactName),
    /// Output path prefix for tools that derive file names themselves
    OutputPrefix(String),
    /// Configured parameter, dotted key such as `tractography.select`
    Param(String),
    /// Resolved transform chain, expanded to `-t <file>` pairs
    Chain {
        from: CoordinateSpace,
        to: CoordinateSpace,
    },
    /// Several tokens joined into a single argument
    Concat(Vec<ArgToken>),
}

impl ArgToken {
    /// Visit this token and every nested token
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ArgToken)) {
        visit(self);
        if let ArgToken::Concat(parts) = self {
            for part in parts {
                part.walk(visit);
            }
        }
    }
}

impl fmt::Display for ArgToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Input(name) => write!(f, "{{in:{name}}}"),
            Self::Output(name) => write!(f, "{{out:{name}}}"),
            Self::OutputPrefix(prefix) => write!(f, "{{prefix:{prefix}}}"),
            Self::Param(key) => write!(f, "{{param:{key}}}"),
            Self::Chain { from, to } => write!(f, "{{chain:{from}->{to}}}"),
            Self::Concat(parts) => {
                for part in parts {
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

/// Shorthand constructors for argument templates
pub mod arg {
    use super::ArgToken;
    use crate::CoordinateSpace;

    pub fn lit(s: impl Into<String>) -> ArgToken {
        ArgToken::Literal(s.into())
    }

    pub fn input(name: &str) -> ArgToken {
        ArgToken::Input(name.into())
    }

    pub fn output(name: &str) -> ArgToken {
        ArgToken::Output(name.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> ArgToken {
        ArgToken::OutputPrefix(prefix.into())
    }

    pub fn param(key: impl Into<String>) -> ArgToken {
        ArgToken::Param(key.into())
    }

    pub fn chain(from: CoordinateSpace, to: CoordinateSpace) -> ArgToken {
        ArgToken::Chain { from, to }
    }

    pub fn concat(parts: impl IntoIterator<Item = ArgToken>) -> ArgToken {
        ArgToken::Concat(parts.into_iter().collect())
    }
}

/// External command of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Program name, resolved through `PATH` unless overridden in config
    pub program: String,

    /// Argument template
    pub args: Vec<ArgToken>,

    /// Flag that lets the tool overwrite its own previous outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_flag: Option<String>,
}

/// Declared output artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDecl {
    pub name: ArtifactName,

    /// File name below the subject's modality directory, without the subject prefix
    pub file_name: String,

    pub space: CoordinateSpace,
}

/// Declared output transform, backed by produced artifact files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformDecl {
    pub name: TransformName,
    pub source_space: CoordinateSpace,
    pub target_space: CoordinateSpace,
    pub kind: TransformKind,

    /// Artifact holding the forward transform
    pub file: ArtifactName,

    /// Artifact holding the inverse displacement field, if the tool writes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_file: Option<ArtifactName>,
}

/// Where a pipeline input lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLocation {
    /// `{bids_root}/{subject}/{datatype}/{subject}{suffix}`
    Bids {
        datatype: BidsDatatype,
        suffix: String,
    },
    /// `{template_dir}/{file_name}`
    Template { file_name: String },
}

/// Declared pipeline input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDecl {
    pub name: ArtifactName,
    pub space: CoordinateSpace,
    pub location: SourceLocation,
}

impl SourceDecl {
    pub fn bids(name: &str, space: CoordinateSpace, datatype: BidsDatatype, suffix: &str) -> Self {
        Self {
            name: name.into(),
            space,
            location: SourceLocation::Bids {
                datatype,
                suffix: suffix.to_string(),
            },
        }
    }

    pub fn template(name: &str, space: CoordinateSpace, file_name: &str) -> Self {
        Self {
            name: name.into(),
            space,
            location: SourceLocation::Template {
                file_name: file_name.to_string(),
            },
        }
    }
}

/// Declarative description of one pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: StageId,

    #[serde(default)]
    pub description: String,

    /// Derivatives directory the stage writes into
    pub modality: Modality,

    pub required_artifacts: BTreeSet<ArtifactName>,

    pub required_transforms: BTreeSet<TransformName>,

    pub produced_artifacts: Vec<ArtifactDecl>,

    pub produced_transforms: Vec<TransformDecl>,

    pub command: ToolCommand,

    /// Re-running on the same inputs yields the same outputs
    pub idempotent: bool,
}

impl StageSpec {
    /// Start a stage declaration
    pub fn new(id: &str, modality: Modality, program: &str) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            modality,
            required_artifacts: BTreeSet::new(),
            required_transforms: BTreeSet::new(),
            produced_artifacts: Vec::new(),
            produced_transforms: Vec::new(),
            command: ToolCommand {
                program: program.to_string(),
                args: Vec::new(),
                force_flag: None,
            },
            idempotent: true,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn requires(mut self, names: &[&str]) -> Self {
        self.required_artifacts
            .extend(names.iter().map(|n| ArtifactName::from(*n)));
        self
    }

    pub fn requires_transforms(mut self, names: &[&str]) -> Self {
        self.required_transforms
            .extend(names.iter().map(|n| TransformName::from(*n)));
        self
    }

    pub fn produces(mut self, name: &str, file_name: &str, space: CoordinateSpace) -> Self {
        self.produced_artifacts.push(ArtifactDecl {
            name: name.into(),
            file_name: file_name.to_string(),
            space,
        });
        self
    }

    pub fn produces_transform(mut self, decl: TransformDecl) -> Self {
        self.produced_transforms.push(decl);
        self
    }

    pub fn arg(mut self, token: ArgToken) -> Self {
        self.command.args.push(token);
        self
    }

    pub fn args(mut self, tokens: impl IntoIterator<Item = ArgToken>) -> Self {
        self.command.args.extend(tokens);
        self
    }

    pub fn force_flag(mut self, flag: &str) -> Self {
        self.command.force_flag = Some(flag.to_string());
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn produced_artifact_names(&self) -> impl Iterator<Item = &ArtifactName> {
        self.produced_artifacts.iter().map(|a| &a.name)
    }

    pub fn produced_transform_names(&self) -> impl Iterator<Item = &TransformName> {
        self.produced_transforms.iter().map(|t| &t.name)
    }

    /// Argument tokens in template order, nested tokens included
    pub fn tokens(&self) -> Vec<&ArgToken> {
        let mut out = Vec::new();
        for token in &self.command.args {
            token.walk(&mut |t| out.push(t));
        }
        out
    }

    /// Printable form of the argument template
    pub fn command_template(&self) -> String {
        let mut line = self.command.program.clone();
        for token in &self.command.args {
            line.push(' ');
            line.push_str(&token.to_string());
        }
        line
    }
}

/// A fixed, versioned pipeline: inputs plus ordered stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub version: String,
    pub sources: Vec<SourceDecl>,
    pub stages: Vec<StageSpec>,
}
