// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use ember_render::PresentModePreference;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "ember".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.01, 0.01, 0.01, 1.0],
            present_mode: PresentModeCfg::Mailbox,
            validation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

impl From<PresentModeCfg> for PresentModePreference {
    fn from(mode: PresentModeCfg) -> Self {
        match mode {
            PresentModeCfg::Mailbox => PresentModePreference::Mailbox,
            PresentModeCfg::Fifo => PresentModePreference::Fifo,
            PresentModeCfg::Immediate => PresentModePreference::Immediate,
        }
    }
}

pub fn parse(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Read `path`; a missing file or a malformed one both fall back to
/// defaults, the latter with a warning.
pub fn load(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(text) => parse(&text).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}
