use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::store::StorageBackend;

/// Where the `[Image: <url>]` marker lands relative to the entry content
/// when an activation is spliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePosition {
    Before,
    After,
}

/// User-facing switches and upload limits, persisted as one JSON blob
/// under its own storage key. Field names are camelCase on the wire,
/// matching the host's JSON conventions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_show_previews")]
    pub show_previews: bool,
    #[serde(default = "default_include_in_prompt")]
    pub include_in_prompt: bool,
    #[serde(default = "default_image_position")]
    pub image_position: ImagePosition,
    #[serde(default = "default_max_image_size_bytes")]
    pub max_image_size_bytes: u64,
    #[serde(default = "default_max_image_width")]
    pub max_image_width: u32,
    #[serde(default = "default_max_image_height")]
    pub max_image_height: u32,
    #[serde(default = "default_image_quality")]
    pub image_quality: f32,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            show_previews: default_show_previews(),
            include_in_prompt: default_include_in_prompt(),
            image_position: default_image_position(),
            max_image_size_bytes: default_max_image_size_bytes(),
            max_image_width: default_max_image_width(),
            max_image_height: default_max_image_height(),
            image_quality: default_image_quality(),
        }
    }
}

impl ExtensionSettings {
    /// Loads from the substrate. A missing blob is not an error; a corrupt
    /// one resets to defaults and reports the problem instead of failing
    /// startup. Unknown fields are ignored, missing fields defaulted.
    pub fn load(storage: &dyn StorageBackend, key: &str) -> (Self, Option<StoreError>) {
        let raw = match storage.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return (Self::default(), None),
            Err(err) => return (Self::default(), Some(StoreError::Load(format!("{err:#}")))),
        };
        match serde_json::from_str::<Self>(&raw) {
            Ok(settings) => (settings.clamped(), None),
            Err(err) => (Self::default(), Some(StoreError::Load(err.to_string()))),
        }
    }

    /// Flushes the whole object. Called on every settings change.
    pub fn save(&self, storage: &mut dyn StorageBackend, key: &str) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(&self.clamped())
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
        storage
            .write(key, &raw)
            .map_err(|err| StoreError::Persistence(format!("{err:#}")))
    }

    fn clamped(&self) -> Self {
        let mut settings = self.clone();
        settings.image_quality = settings.image_quality.clamp(0.1, 1.0);
        settings
    }
}

fn default_enabled() -> bool {
    true
}

fn default_show_previews() -> bool {
    true
}

fn default_include_in_prompt() -> bool {
    true
}

fn default_image_position() -> ImagePosition {
    ImagePosition::After
}

fn default_max_image_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_max_image_width() -> u32 {
    800
}

fn default_max_image_height() -> u32 {
    600
}

fn default_image_quality() -> f32 {
    0.8
}
