//! Generator configuration, read from a `crossbind.toml` file.
//!
//! ```toml
//! [naming]
//! wrapper-prefix = "glue_"
//! wrapper-module = "GlueWrapping"
//!
//! [synthesis]
//! protocol-conflicts = "reject"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GlueError, Result};

/// Names and prefixes used in generated code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NamingConfig {
    /// Prefix of separately generated wrapper functions.
    pub wrapper_prefix: String,
    /// Module holding the wrapper functions.
    pub wrapper_module: String,
    /// Prefix of super trampolines.
    pub super_prefix: String,
    /// Prefix of generated subclasses.
    pub subclass_prefix: String,
    /// Prefix of proxy classes for protocols with associated types.
    pub proxy_prefix: String,
    /// Suffix of vtable struct names.
    pub vtable_suffix: String,
    /// Stored vtable of a non-generic type.
    pub vtable_variable: String,
    /// Suffix of the per-type-key vtable cache of a generic type.
    pub cache_suffix: String,
    /// Per-instance initialization guard.
    pub init_guard: String,
    /// Open type standing in for any conforming instance.
    pub placeholder: String,
    /// Prefix of vtable slot fields.
    pub slot_prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            wrapper_prefix: "glue_".to_string(),
            wrapper_module: "GlueWrapping".to_string(),
            super_prefix: "glue_super_".to_string(),
            subclass_prefix: "glue_sub_".to_string(),
            proxy_prefix: "glue_proxy_".to_string(),
            vtable_suffix: "_glue_vtable".to_string(),
            vtable_variable: "_vtable".to_string(),
            cache_suffix: "_glueVtableCache".to_string(),
            init_guard: "_glueClassIsInitialized".to_string(),
            placeholder: "GlueRuntime.EveryProtocol".to_string(),
            slot_prefix: "func".to_string(),
        }
    }
}

impl NamingConfig {
    /// Field name of slot `index`.
    pub fn slot_name(&self, index: usize) -> String {
        format!("{}{index}", self.slot_prefix)
    }

    fn fields(&self) -> [(&'static str, &str); 11] {
        [
            ("wrapper-prefix", self.wrapper_prefix.as_str()),
            ("wrapper-module", self.wrapper_module.as_str()),
            ("super-prefix", self.super_prefix.as_str()),
            ("subclass-prefix", self.subclass_prefix.as_str()),
            ("proxy-prefix", self.proxy_prefix.as_str()),
            ("vtable-suffix", self.vtable_suffix.as_str()),
            ("vtable-variable", self.vtable_variable.as_str()),
            ("cache-suffix", self.cache_suffix.as_str()),
            ("init-guard", self.init_guard.as_str()),
            ("placeholder", self.placeholder.as_str()),
            ("slot-prefix", self.slot_prefix.as_str()),
        ]
    }
}

/// What to do when unrelated inherited protocols declare the same member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the first declaration in walk order and record a warning.
    #[default]
    Warn,
    /// Abort the protocol.
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SynthesisConfig {
    pub protocol_conflicts: ConflictPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlueConfig {
    pub naming: NamingConfig,
    pub synthesis: SynthesisConfig,
}

impl GlueConfig {
    /// Parse and validate a configuration from TOML.
    pub fn parse(input: &str) -> Result<Self> {
        let config: GlueConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.naming.fields() {
            if value.trim().is_empty() {
                return Err(GlueError::InvalidConfig {
                    detail: format!("naming.{key} must not be empty"),
                });
            }
            if value.chars().any(char::is_whitespace) {
                return Err(GlueError::InvalidConfig {
                    detail: format!("naming.{key} must not contain whitespace: '{value}'"),
                });
            }
        }
        Ok(())
    }
}
