use dmg_emu_core::mmu::BgpConvention;
use dmg_emu_core::render::DMG_PALETTE;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Post-load BGP value, as spelled in config files and on the command line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Bgp {
    #[default]
    Dmg,
    Identity,
}

impl From<Bgp> for BgpConvention {
    fn from(bgp: Bgp) -> Self {
        match bgp {
            Bgp::Dmg => BgpConvention::Dmg,
            Bgp::Identity => BgpConvention::Identity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    pub frames: u64,
    pub bgp: Bgp,
    pub screenshot: Option<PathBuf>,
    /// Four 0xRRGGBB shades, lightest first.
    pub palette: [u32; 4],
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frames: 60,
            bgp: Bgp::default(),
            screenshot: None,
            palette: DMG_PALETTE,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("dmg-emu").join("headless.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("dmg-emu").join("headless.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("dmg-emu")
            .join("headless.toml");
    }

    PathBuf::from("headless.toml")
}

/// Missing files give the defaults silently; unparsable ones warn first.
pub fn load_from_file(path: &Path) -> HeadlessConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return HeadlessConfig::default(),
    };

    match toml::from_str::<HeadlessConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            HeadlessConfig::default()
        }
    }
}
