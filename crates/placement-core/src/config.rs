//! Editor configuration
//!
//! Everything the editor needs at construction time, loaded from TOML or
//! built in code.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::fields::FieldDefaults;
use crate::rasterizer::ViewportParams;
use crate::writer::Rgb;

/// Lowest render scale
pub const MIN_SCALE: f64 = 1.0;
/// Highest render scale
pub const MAX_SCALE: f64 = 2.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Page rendered on open (1-based)
    pub page_number: u32,
    /// Render scale, clamped to [`MIN_SCALE`]..=[`MAX_SCALE`]
    pub scale: f64,
    /// Page rotation in degrees
    pub rotation: u16,
    pub default_font_size: f64,
    pub default_font_family: String,
    /// Hex colour of stamped text
    pub text_color: String,
    /// Suggested file name of the modified document
    pub download_name: String,
    /// Field keys registered on open, in order
    pub fields: Vec<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            page_number: 1,
            scale: 1.0,
            rotation: 0,
            default_font_size: 11.0,
            default_font_family: "Helvetica".to_string(),
            text_color: "#F21A1A".to_string(),
            download_name: "stamped.pdf".to_string(),
            fields: Vec::new(),
        }
    }
}

impl EditorConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the TOML is malformed
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string; missing keys take defaults
    ///
    /// # Example
    ///
    /// ```
    /// use placement_core::config::EditorConfig;
    ///
    /// let config = EditorConfig::from_str(r#"
    ///     page_number = 2
    ///     fields = ["name", "date"]
    /// "#)?;
    /// assert_eq!(config.page_number, 2);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML configuration")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.page_number == 0 {
            bail!("page_number must be 1 or greater");
        }
        if self.rotation % 90 != 0 {
            bail!("rotation must be a multiple of 90, got {}", self.rotation);
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            bail!("scale must be positive, got {}", self.scale);
        }
        if !(self.default_font_size.is_finite() && self.default_font_size > 0.0) {
            bail!(
                "default_font_size must be positive, got {}",
                self.default_font_size
            );
        }
        if Rgb::from_hex(&self.text_color).is_none() {
            bail!("text_color is not a hex colour: {:?}", self.text_color);
        }
        Ok(())
    }

    pub fn clamped_scale(&self) -> f64 {
        self.scale.clamp(MIN_SCALE, MAX_SCALE)
    }

    pub fn viewport_params(&self) -> ViewportParams {
        ViewportParams {
            scale: self.clamped_scale(),
            rotation: self.rotation % 360,
        }
    }

    pub fn field_defaults(&self) -> FieldDefaults {
        FieldDefaults {
            font_size: self.default_font_size,
            font_family: self.default_font_family.clone(),
            ..FieldDefaults::default()
        }
    }

    /// Stamp colour; falls back to black when the colour does not parse
    pub fn color(&self) -> Rgb {
        Rgb::from_hex(&self.text_color).unwrap_or(Rgb::BLACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.page_number, 1);
        assert_eq!(config.default_font_size, 11.0);
        assert_eq!(config.default_font_family, "Helvetica");
        assert!(config.validate().is_ok());

        let color = config.color();
        assert!((color.r - 0.95).abs() < 0.01);
        assert!((color.g - 0.1).abs() < 0.01);
        assert!((color.b - 0.1).abs() < 0.01);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = EditorConfig::from_str(
            r#"
            page_number = 3
            scale = 1.5
            default_font_family = "Times"
            fields = ["name", "date"]
            "#,
        )
        .unwrap();

        assert_eq!(config.page_number, 3);
        assert_eq!(config.scale, 1.5);
        assert_eq!(config.fields, vec!["name".to_string(), "date".to_string()]);
        assert_eq!(config.download_name, "stamped.pdf");
        assert_eq!(config.field_defaults().font_family, "Times");
    }

    #[test]
    fn test_scale_is_clamped() {
        let mut config = EditorConfig::default();
        config.scale = 5.0;
        assert_eq!(config.clamped_scale(), MAX_SCALE);
        config.scale = 0.5;
        assert_eq!(config.viewport_params().scale, MIN_SCALE);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            EditorConfig {
                page_number: 0,
                ..Default::default()
            },
            EditorConfig {
                rotation: 45,
                ..Default::default()
            },
            EditorConfig {
                default_font_size: 0.0,
                ..Default::default()
            },
            EditorConfig {
                text_color: "red".to_string(),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "accepted {:?}", config);
        }
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(EditorConfig::from_str("page_number = \"one\"").is_err());
        assert!(EditorConfig::from_file("/definitely/not/here.toml").is_err());
    }
}
