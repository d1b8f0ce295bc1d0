//! Typed error hierarchy for the chiplet operator-graph compiler.
//!
//! Every fatal failure mode named in the design (config, spec validation,
//! composition, emission, and internal invariant violations) is a variant of
//! [`ChipletCompilerError`]. The CLI front-end never matches on error text —
//! it formats the single diagnostic line straight from `Display`.

use std::path::PathBuf;

/// Errors raised while loading or validating a [`crate::config::Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised while validating or lowering a model-spec JSON document.
#[derive(Debug, thiserror::Error)]
pub enum SpecValidationError {
    #[error("stage {stage}: forward reference to stage {dep} (only earlier stages may be named in `deps`)")]
    ForwardReference { stage: usize, dep: usize },
    #[error("stage {stage}: unknown stage type `{kind}`")]
    UnknownType { stage: usize, kind: String },
    #[error("stage {stage}: negative shape or latency field `{field}`")]
    NegativeField { stage: usize, field: &'static str },
    #[error("stage {stage}: moe_linear stage has zero experts")]
    NoExperts { stage: usize },
    #[error("stage {stage}: transfer direction `{direction}` is not one of digital_to_rram, rram_to_digital, host_to_digital, digital_to_host")]
    BadDirection { stage: usize, direction: String },
    #[error("cannot read model spec {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse model spec {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Raised by the Composer when rebasing or stitching sub-graphs fails.
/// Every case here indicates a bug in this crate, not bad input.
#[derive(Debug, thiserror::Error)]
pub enum ComposerError {
    #[error("id space overflow: {count} commands exceed the dense 32-bit id range")]
    IdOverflow { count: usize },
    #[error("dangling dependency {dep} on command {id} after rebase by {offset}")]
    DanglingDependency { id: i32, dep: i32, offset: i32 },
}

/// Raised by the Emitter on filesystem failure.
#[derive(Debug, thiserror::Error)]
pub enum EmissionError {
    #[error("cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize command graph: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

/// A post-construction check found the emitted graph violates one of the
/// invariants of the command descriptor model. This is always a compiler
/// bug: by construction every library factory and the spec compiler should
/// emit a valid sub-DAG.
#[derive(Debug, thiserror::Error)]
pub enum InternalInvariantViolation {
    #[error("command {id} has id != its position {position}")]
    IdNotDense { id: i32, position: usize },
    #[error("command {id} depends on {dep}, which is not strictly earlier")]
    ForwardDependency { id: i32, dep: i32 },
    #[error("command {id} lists dependency {dep} more than once")]
    DuplicateDependency { id: i32, dep: i32 },
    #[error("command {id} references unit {unit} on chiplet {chiplet}, outside the topology")]
    UnknownUnit { id: i32, chiplet: i32, unit: i32 },
    #[error("transfer command {id} does not carry exactly one direction flag (flags={flags:#x})")]
    BadTransferFlags { id: i32, flags: u32 },
    #[error("RramExecute command {id} has no RramStageAct predecessor on chiplet {chiplet}")]
    MissingStage { id: i32, chiplet: i32 },
    #[error("RramExecute command {id} is not followed by an RramPost on chiplet {chiplet}")]
    MissingPost { id: i32, chiplet: i32 },
}

/// Non-fatal oracle failures. The caller always falls back to a spec-provided
/// or default latency; these exist purely for logging and for `Display`.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("cannot spawn oracle process {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("oracle handshake failed{}", details.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    Handshake { details: Option<String> },
    #[error("oracle request timed out after {deadline_ms}ms{}", details.as_ref().map(|d| format!(" (noise: {d})")).unwrap_or_default())]
    Timeout { deadline_ms: u64, details: Option<String> },
    #[error("oracle transport error: {reason}{}", details.as_ref().map(|d| format!(" (noise: {d})")).unwrap_or_default())]
    Transport { reason: String, details: Option<String> },
    #[error("oracle is disabled for the remainder of this run")]
    Disabled,
}

/// Top-level error returned by the CLI front-end. Each variant wraps the
/// structured detail produced by the component that raised it, so the
/// diagnostic line required by the error-handling design is just this type's
/// `Display` output.
#[derive(Debug, thiserror::Error)]
pub enum ChipletCompilerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("model spec error: {0}")]
    Spec(#[from] SpecValidationError),
    #[error("composer error: {0}")]
    Composer(#[from] ComposerError),
    #[error("emission error: {0}")]
    Emission(#[from] EmissionError),
    #[error("internal invariant violation: {0}")]
    Internal(#[from] InternalInvariantViolation),
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}
