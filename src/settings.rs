use std::path::{Path, PathBuf};

use crate::ops::adjustments::DitherKernel;

/// Editor settings that persist across sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    /// Maximum number of undo steps
    pub max_undo_steps: usize,
    /// Pixel visits per flood-fill batch before yielding to the host
    pub fill_batch_size: usize,
    /// Longest source edge before the resampler pre-shrinks with nearest-fit
    pub resample_threshold: u32,
    /// Draw the pixel grid over the canvas
    pub show_grid: bool,
    /// Keep the exported-icon preview up to date after every commit
    pub show_preview: bool,
    /// Persist the raster after every commit
    pub autosave: bool,
    /// Diffusion kernel preselected in the adjust tool
    pub default_kernel: DitherKernel,
    /// Alternate scan direction per row when dithering
    pub serpentine: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            fill_batch_size: 30_000,
            resample_threshold: 1024,
            show_grid: true,
            show_preview: true,
            autosave: true,
            default_kernel: DitherKernel::FloydSteinberg,
            serpentine: false,
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/iconfe/iconfe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\IconFE\iconfe_settings.cfg
    /// On macOS:   ~/Library/Application Support/IconFE/iconfe_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("iconfe");
            return Some(config_dir.join("iconfe_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("IconFE").join("iconfe_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("IconFE")
                    .join("iconfe_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("iconfe_settings.cfg")))
        }
    }

    /// Load settings from the platform path (default if missing or corrupt).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to the platform path. Failures are logged, never fatal.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        self.save_to(&path);
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, self.to_config_string()) {
            log::warn!("could not write settings to {}: {}", path.display(), e);
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_undo_steps={}\n\
             fill_batch_size={}\n\
             resample_threshold={}\n\
             show_grid={}\n\
             show_preview={}\n\
             autosave={}\n\
             default_kernel={}\n\
             serpentine={}\n",
            self.max_undo_steps,
            self.fill_batch_size,
            self.resample_threshold,
            self.show_grid,
            self.show_preview,
            self.autosave,
            self.default_kernel.key(),
            self.serpentine,
        )
    }

    /// Parse `key=value` lines. Unknown keys are skipped and malformed
    /// values keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse().unwrap_or(50);
                }
                "fill_batch_size" => {
                    s.fill_batch_size = val.parse().ok().filter(|n| *n > 0).unwrap_or(30_000);
                }
                "resample_threshold" => {
                    s.resample_threshold = val.parse().ok().filter(|n| *n > 0).unwrap_or(1024);
                }
                "show_grid" => {
                    s.show_grid = val == "true";
                }
                "show_preview" => {
                    s.show_preview = val == "true";
                }
                "autosave" => {
                    s.autosave = val == "true";
                }
                "default_kernel" => {
                    s.default_kernel = DitherKernel::from_key(val).unwrap_or_default();
                }
                "serpentine" => {
                    s.serpentine = val == "true";
                }
                _ => {}
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_string_round_trips() {
        let settings = EditorSettings {
            max_undo_steps: 12,
            fill_batch_size: 500,
            show_grid: false,
            default_kernel: DitherKernel::Atkinson,
            serpentine: true,
            ..Default::default()
        };
        assert_eq!(EditorSettings::parse(&settings.to_config_string()), settings);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let s = EditorSettings::parse("max_undo_steps=lots\nfill_batch_size=0\nbogus=1\nno equals sign");
        assert_eq!(s.max_undo_steps, 50);
        assert_eq!(s.fill_batch_size, 30_000);
    }

    #[test]
    fn save_and_load_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("iconfe_settings.cfg");
        let settings = EditorSettings { resample_threshold: 300, ..Default::default() };
        settings.save_to(&path);
        assert_eq!(EditorSettings::load_from(&path), settings);
    }
}
