//! ABI glue generation between a native value-semantics runtime and a
//! managed host runtime.
//!
//! Given a fact base of reflected declarations, generates the code that
//! lets host code subclass native classes and implement native protocols,
//! with calls crossing the boundary in both directions.
//!
//! ## Modules
//!
//! - [`strategy`]: Per-type marshaling strategies and slot signatures
//! - [`marshal_to_host`]: Engine A, receiving native vtable calls in host code
//! - [`marshal_to_native`]: Engine B, calling native slots and wrappers from host code
//! - [`correlate`]: Matching declarations to their generated wrappers
//! - [`vtable`]: Virtual member walks and slot layout
//! - [`synth`]: Subclass, protocol conformance, and proxy synthesis
//! - [`registry`]: The object registry capability
//! - [`config`]: `crossbind.toml` configuration
//! - [`diagnostic`]: Stable codes and the diagnostics sink

pub mod config;
pub mod correlate;
pub mod diagnostic;
pub mod error;
pub mod marshal_to_host;
pub mod marshal_to_native;
pub mod registry;
pub mod strategy;
pub mod synth;
pub mod vtable;

pub use config::{ConflictPolicy, GlueConfig, NamingConfig};
pub use correlate::{Correlation, Correlator, WrapperNaming};
pub use diagnostic::{Diagnostic, DiagnosticSink, Diagnostics, ErrorCode, Severity};
pub use error::{ErrorKind, GlueError, Result};
pub use marshal_to_host::HostMarshaler;
pub use marshal_to_native::{marshal_to_native, ArgumentOrder, NativeCall};
pub use registry::{ObjectRegistry, RuntimeRegistry};
pub use strategy::{AbiContext, MarshalStrategy, ReceiverKind};
pub use synth::{SynthesizedMember, SynthesizedUnit, Synthesizer};
pub use vtable::{Slot, VTableBuilder, VTableLayout};
