use std::path::Path;

use cranelift_codegen::isa::{self, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use target_lexicon::Triple;
use serde::Deserialize;

use crate::diagnostics::TranslateError;

/// Cranelift's own optimization level, applied while compiling each function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Settings for one translation unit, usually read from a flat TOML file:
///
/// ```toml
/// target = "x86_64-unknown-linux-gnu"
/// pic = true
/// opt_level = "speed"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranslatorConfig {
    /// Target triple. The host is used when absent.
    pub target: Option<String>,
    pub pic: bool,
    pub opt_level: OptLevel,
    pub enable_verifier: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self { target: None, pic: true, opt_level: OptLevel::None, enable_verifier: true }
    }
}

impl TranslatorConfig {
    pub fn from_toml(content: &str) -> Result<Self, TranslateError> {
        toml::from_str(content).map_err(|e| TranslateError::config(format!("invalid translator config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, TranslateError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| TranslateError::config(format!("{}: {e}", path.display())))
    }

    pub fn with_pic(mut self, pic: bool) -> Self {
        self.pic = pic;
        self
    }

    pub fn build_isa(&self) -> Result<OwnedTargetIsa, TranslateError> {
        let mut flag_builder = settings::builder();
        let flags = [
            ("is_pic", if self.pic { "true" } else { "false" }),
            ("opt_level", self.opt_level.as_setting()),
            ("enable_verifier", if self.enable_verifier { "true" } else { "false" }),
        ];
        for (name, value) in flags {
            flag_builder
                .set(name, value)
                .map_err(|e| TranslateError::config(format!("setting {name}={value}: {e}")))?;
        }

        let isa_builder = match &self.target {
            Some(name) => {
                let triple: Triple = name
                    .parse()
                    .map_err(|e| TranslateError::config(format!("malformed target '{name}': {e}")))?;
                isa::lookup(triple)
                    .map_err(|e| TranslateError::config(format!("unsupported target '{name}': {e}")))?
            }
            None => cranelift_native::builder()
                .map_err(|e| TranslateError::config(format!("host machine is not supported: {e}")))?,
        };
        isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| TranslateError::config(format!("ISA error: {e}")))
    }
}
