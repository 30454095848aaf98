use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lorepix_contracts::errors::{
    HostIntegrationUnavailable, ImageLoadError, StoreError, ValidationError,
};
use lorepix_contracts::identity::{self, EntryView, ResolvedId};
use lorepix_contracts::prompt::{self, ActivatedEntry};
use lorepix_contracts::settings::ExtensionSettings;
use lorepix_contracts::store::{AssociationStore, ImageRecord, StorageBackend};
use lorepix_contracts::watcher::{ChangeWatcher, InputDebouncer, WatcherConfig};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SETTINGS_STORAGE_KEY: &str = "lorepix_settings";
pub const ASSOCIATIONS_STORAGE_KEY: &str = "lorepix_images";

pub const ALLOWED_IMAGE_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

const RECORD_ID_LEN: usize = 16;
const URL_INPUT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("image could not be processed: {0}")]
    Process(String),
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Admits an uploaded payload into storable form: allow-list and size
/// checks, then a bounded aspect-preserving downscale and re-encode at
/// the configured quality. Lossy and one-way; the original bytes are not
/// retained. PNG stays PNG to keep transparency, everything else becomes
/// JPEG over a white background.
pub fn process_upload(
    bytes: &[u8],
    declared_mime: &str,
    filename: &str,
    settings: &ExtensionSettings,
) -> Result<ImageRecord, UploadError> {
    let mime = declared_mime.trim().to_ascii_lowercase();
    if !ALLOWED_IMAGE_TYPES.iter().any(|allowed| *allowed == mime) {
        return Err(ValidationError::InvalidType(declared_mime.trim().to_string()).into());
    }
    let size = bytes.len() as u64;
    if size > settings.max_image_size_bytes {
        return Err(ValidationError::TooLarge {
            size,
            limit: settings.max_image_size_bytes,
        }
        .into());
    }

    let decoded =
        image::load_from_memory(bytes).map_err(|err| UploadError::Process(err.to_string()))?;
    let bounded = if decoded.width() > settings.max_image_width
        || decoded.height() > settings.max_image_height
    {
        decoded.resize(
            settings.max_image_width,
            settings.max_image_height,
            FilterType::Triangle,
        )
    } else {
        decoded
    };

    let (encoded, stored_mime) = if mime == "image/png" {
        let mut out = Vec::new();
        bounded
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|err| UploadError::Process(err.to_string()))?;
        (out, "image/png")
    } else {
        let flattened = flatten_alpha(&bounded);
        let mut out = Vec::new();
        let mut encoder =
            JpegEncoder::new_with_quality(&mut out, jpeg_quality(settings.image_quality));
        encoder
            .encode_image(&DynamicImage::ImageRgb8(flattened))
            .map_err(|err| UploadError::Process(err.to_string()))?;
        (out, "image/jpeg")
    };

    let digest = hex::encode(Sha256::digest(&encoded));
    let id = digest[..RECORD_ID_LEN].to_string();
    Ok(ImageRecord::inline(id, encoded, stored_mime, filename))
}

fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

fn jpeg_quality(quality: f32) -> u8 {
    (quality.clamp(0.1, 1.0) * 100.0).round() as u8
}

pub fn mime_for_filename(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, ImageLoadError>;
}

/// Blocking preview/test fetch. No timeout is enforced: a stalled fetch
/// leaves that entry loading until it errors or the user edits the URL.
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: HttpClient::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, ImageLoadError> {
        let trimmed = url.trim();
        let load_error = |reason: String| ImageLoadError {
            url: trimmed.to_string(),
            reason,
        };
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(load_error(
                "URL must start with http:// or https://".to_string(),
            ));
        }
        let response = self
            .client
            .get(trimmed)
            .send()
            .map_err(|err| load_error(err.to_string()))?;
        if !response.status().is_success() {
            return Err(load_error(format!("HTTP status {}", response.status())));
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
        if let Some(mime) = &mime_type {
            if !mime.starts_with("image/") {
                return Err(load_error(format!("response is '{mime}', not an image")));
            }
        }
        let bytes = response
            .bytes()
            .map_err(|err| load_error(err.to_string()))?
            .to_vec();
        Ok(FetchedImage { bytes, mime_type })
    }
}

/// Per-entry supersession of in-flight preview loads. `begin` notes the
/// URL currently in the input field; when a fetch completes, `accept`
/// is true only if the requested URL still matches, so a stale result is
/// discarded on arrival. No ordering exists across entries.
#[derive(Debug, Clone, Default)]
pub struct PreviewTracker {
    current: HashMap<String, String>,
}

impl PreviewTracker {
    pub fn begin(&mut self, entry_id: &str, url: &str) {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            self.current.remove(entry_id);
        } else {
            self.current.insert(entry_id.to_string(), trimmed.to_string());
        }
    }

    pub fn current(&self, entry_id: &str) -> Option<&str> {
        self.current.get(entry_id).map(String::as_str)
    }

    pub fn accept(&self, entry_id: &str, requested_url: &str) -> bool {
        self.current(entry_id) == Some(requested_url.trim())
    }
}

/// Capability seam over the host's entry list. The adapter exposes entry
/// nodes as [`EntryView`] snapshots plus a per-node marker; the core
/// never touches the real tree.
pub trait EntryPanel {
    fn entry_count(&self) -> usize;
    fn entry_view(&self, index: usize) -> EntryView;
    fn is_marked(&self, index: usize) -> bool;
    fn set_marked(&mut self, index: usize);
}

/// Rendering collaborator: called once per newly marked node with the
/// records the store currently holds for it (possibly none). Actual UI
/// construction happens outside the core.
pub trait AttachmentRenderer {
    fn render(&mut self, id: &ResolvedId, records: &[ImageRecord]);
}

/// Injection sweep over the panel. Idempotent per node: anything already
/// carrying the marker is skipped, so re-running after every host
/// re-render is safe.
pub fn run_sweep(
    panel: &mut dyn EntryPanel,
    renderer: &mut dyn AttachmentRenderer,
    store: &AssociationStore,
    settings: &ExtensionSettings,
) -> usize {
    if !settings.enabled {
        return 0;
    }
    let mut rendered = 0;
    for index in 0..panel.entry_count() {
        if panel.is_marked(index) {
            continue;
        }
        let resolved = identity::resolve(&panel.entry_view(index));
        panel.set_marked(index);
        let records = store.get(&resolved.token).unwrap_or_default();
        renderer.render(&resolved, records);
        rendered += 1;
    }
    rendered
}

/// Host event-bus seam. A successful subscription means the adapter will
/// route every activation event through
/// [`Extension::apply_image_markers`]; an unavailable hook degrades the
/// extension to UI-only mode instead of failing it.
pub trait HostBus {
    fn subscribe_entries_activated(&mut self) -> Result<(), HostIntegrationUnavailable>;
}

/// The extension context: owns the substrate, settings, store, watcher
/// and preview state, and is passed to every component explicitly. There
/// is no module-level mutable state anywhere in the core.
pub struct Extension {
    storage: Box<dyn StorageBackend>,
    settings: ExtensionSettings,
    store: AssociationStore,
    watcher: ChangeWatcher,
    url_inputs: InputDebouncer,
    previews: PreviewTracker,
    host_connected: bool,
    warnings: Vec<String>,
}

impl Extension {
    /// Loads settings and associations from the substrate. Both loads are
    /// fail-soft: corrupt state resets to defaults/empty and lands in
    /// [`warnings`](Self::warnings) instead of failing startup.
    pub fn init(storage: Box<dyn StorageBackend>) -> Self {
        let mut warnings = Vec::new();
        let (settings, settings_warning) =
            ExtensionSettings::load(storage.as_ref(), SETTINGS_STORAGE_KEY);
        if let Some(warning) = settings_warning {
            warnings.push(warning.to_string());
        }
        let (store, store_warning) =
            AssociationStore::load(storage.as_ref(), ASSOCIATIONS_STORAGE_KEY);
        if let Some(warning) = store_warning {
            warnings.push(warning.to_string());
        }
        Self {
            storage,
            settings,
            store,
            watcher: ChangeWatcher::new(WatcherConfig::default()),
            url_inputs: InputDebouncer::new(std::time::Duration::from_millis(
                URL_INPUT_DEBOUNCE_MS,
            )),
            previews: PreviewTracker::default(),
            host_connected: false,
            warnings,
        }
    }

    pub fn settings(&self) -> &ExtensionSettings {
        &self.settings
    }

    pub fn store(&self) -> &AssociationStore {
        &self.store
    }

    pub fn previews(&mut self) -> &mut PreviewTracker {
        &mut self.previews
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn host_connected(&self) -> bool {
        self.host_connected
    }

    pub fn start(&mut self, now: Instant) {
        self.watcher.start(now);
    }

    pub fn note_mutation(&mut self, now: Instant) {
        self.watcher.note_mutation(now);
    }

    /// Runs the injection sweep when the watcher says a batch is due.
    /// Returns how many nodes were newly rendered.
    pub fn poll_sweep(
        &mut self,
        now: Instant,
        panel: &mut dyn EntryPanel,
        renderer: &mut dyn AttachmentRenderer,
    ) -> usize {
        if !self.watcher.poll(now) {
            return 0;
        }
        run_sweep(panel, renderer, &self.store, &self.settings)
    }

    pub fn connect_host(&mut self, bus: &mut dyn HostBus) -> bool {
        match bus.subscribe_entries_activated() {
            Ok(()) => {
                self.host_connected = true;
                true
            }
            Err(err) => {
                self.warnings.push(err.to_string());
                self.host_connected = false;
                false
            }
        }
    }

    pub fn apply_image_markers(&self, entries: &mut [ActivatedEntry]) {
        prompt::apply_image_markers(entries, &self.store, &self.settings);
    }

    /// Keystroke endpoint for the URL input field. Nothing is persisted
    /// here; the burst settles through
    /// [`settle_url_inputs`](Self::settle_url_inputs). The preview
    /// tracker moves immediately so in-flight loads of the old URL are
    /// discarded on arrival.
    pub fn note_url_input(&mut self, entry_id: &str, url: &str, now: Instant) {
        self.url_inputs.note_input(entry_id, url, now);
        self.previews.begin(entry_id, url);
    }

    /// Persists every input burst whose debounce window has run out, one
    /// write per settled entry. Returns how many entries were flushed;
    /// the first persistence failure aborts the pass.
    pub fn settle_url_inputs(&mut self, now: Instant) -> Result<usize, StoreError> {
        let settled = self.url_inputs.settle(now);
        let flushed = settled.len();
        for (entry_id, url) in settled {
            self.apply_remote_url(&entry_id, &url)?;
        }
        Ok(flushed)
    }

    /// Immediate (non-debounced) variant: an empty URL clears the
    /// association, anything else replaces it. The preview tracker is
    /// updated so an in-flight load of the old URL is discarded on
    /// arrival.
    pub fn set_remote_url(&mut self, entry_id: &str, url: &str) -> Result<(), StoreError> {
        self.apply_remote_url(entry_id, url)?;
        self.previews.begin(entry_id, url);
        Ok(())
    }

    fn apply_remote_url(&mut self, entry_id: &str, url: &str) -> Result<(), StoreError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            self.store.remove(self.storage.as_mut(), entry_id)?;
        } else {
            self.store
                .set(self.storage.as_mut(), entry_id, ImageRecord::remote(trimmed))?;
        }
        Ok(())
    }

    pub fn attach_upload(
        &mut self,
        entry_id: &str,
        bytes: &[u8],
        declared_mime: &str,
        filename: &str,
    ) -> Result<ImageRecord, AttachError> {
        let record = process_upload(bytes, declared_mime, filename, &self.settings)?;
        self.store
            .push(self.storage.as_mut(), entry_id, record.clone())?;
        Ok(record)
    }

    pub fn remove_entry(&mut self, entry_id: &str) -> Result<bool, StoreError> {
        let removed = self.store.remove(self.storage.as_mut(), entry_id)?;
        if removed {
            self.previews.begin(entry_id, "");
        }
        Ok(removed)
    }

    pub fn remove_image(&mut self, entry_id: &str, image_id: &str) -> Result<bool, StoreError> {
        self.store
            .remove_image(self.storage.as_mut(), entry_id, image_id)
    }

    pub fn clear_associations(&mut self) -> Result<(), StoreError> {
        self.store.clear(self.storage.as_mut())
    }

    /// Settings edits persist before they take effect; a rejected write
    /// leaves the in-memory settings unchanged.
    pub fn update_settings(
        &mut self,
        update: impl FnOnce(&mut ExtensionSettings),
    ) -> Result<(), StoreError> {
        let mut next = self.settings.clone();
        update(&mut next);
        next.save(self.storage.as_mut(), SETTINGS_STORAGE_KEY)?;
        self.settings = next;
        Ok(())
    }
}
