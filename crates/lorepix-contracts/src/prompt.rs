use serde::{Deserialize, Serialize};

use crate::settings::{ExtensionSettings, ImagePosition};
use crate::store::AssociationStore;

/// One entry of the host's activation event: the host hands over the
/// entries it is about to feed into the downstream prompt, and splicing
/// mutates `content` in place. This is the only host data the core ever
/// mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivatedEntry {
    pub id: String,
    pub content: String,
}

pub fn image_marker(url: &str) -> String {
    format!("[Image: {url}]")
}

/// Splices an image marker into every activated entry that has a remote
/// URL association. Inline payloads are never spliced: a base64 data URI
/// inside prompt text is dead weight for the downstream model.
pub fn apply_image_markers(
    entries: &mut [ActivatedEntry],
    store: &AssociationStore,
    settings: &ExtensionSettings,
) {
    if !settings.enabled || !settings.include_in_prompt {
        return;
    }
    for entry in entries {
        let Some(url) = store.first(&entry.id).and_then(|record| record.url()) else {
            continue;
        };
        let marker = image_marker(url);
        entry.content = match settings.image_position {
            ImagePosition::Before => format!("{marker}\n{}", entry.content),
            ImagePosition::After => format!("{}\n{marker}", entry.content),
        };
    }
}

#[cfg(test)]
mod tests {
    use crate::settings::{ExtensionSettings, ImagePosition};
    use crate::store::{AssociationStore, ImageRecord, MemoryStorage};

    use super::{apply_image_markers, ActivatedEntry};

    fn store_with_url(id: &str, url: &str) -> AssociationStore {
        let mut storage = MemoryStorage::new();
        let mut store = AssociationStore::new("associations");
        store
            .set(&mut storage, id, ImageRecord::remote(url))
            .expect("seed store");
        store
    }

    fn entries() -> Vec<ActivatedEntry> {
        vec![ActivatedEntry {
            id: "e1".to_string(),
            content: "Hello".to_string(),
        }]
    }

    #[test]
    fn marker_is_appended_after_content() {
        let store = store_with_url("e1", "https://x/a.png");
        let settings = ExtensionSettings::default();
        let mut activated = entries();
        apply_image_markers(&mut activated, &store, &settings);
        assert_eq!(activated[0].content, "Hello\n[Image: https://x/a.png]");
    }

    #[test]
    fn marker_is_prepended_when_position_is_before() {
        let store = store_with_url("e1", "https://x/a.png");
        let mut settings = ExtensionSettings::default();
        settings.image_position = ImagePosition::Before;
        let mut activated = entries();
        apply_image_markers(&mut activated, &store, &settings);
        assert_eq!(activated[0].content, "[Image: https://x/a.png]\nHello");
    }

    #[test]
    fn disabled_flags_leave_content_untouched() {
        let store = store_with_url("e1", "https://x/a.png");

        let mut settings = ExtensionSettings::default();
        settings.include_in_prompt = false;
        let mut activated = entries();
        apply_image_markers(&mut activated, &store, &settings);
        assert_eq!(activated[0].content, "Hello");

        let mut settings = ExtensionSettings::default();
        settings.enabled = false;
        let mut activated = entries();
        apply_image_markers(&mut activated, &store, &settings);
        assert_eq!(activated[0].content, "Hello");
    }

    #[test]
    fn entries_without_association_are_untouched() {
        let store = store_with_url("other", "https://x/a.png");
        let settings = ExtensionSettings::default();
        let mut activated = entries();
        apply_image_markers(&mut activated, &store, &settings);
        assert_eq!(activated[0].content, "Hello");
    }

    #[test]
    fn inline_records_are_not_spliced() {
        let mut storage = MemoryStorage::new();
        let mut store = AssociationStore::new("associations");
        store
            .set(
                &mut storage,
                "e1",
                ImageRecord::inline("id", vec![1, 2], "image/png", "a.png"),
            )
            .expect("seed store");
        let settings = ExtensionSettings::default();
        let mut activated = entries();
        apply_image_markers(&mut activated, &store, &settings);
        assert_eq!(activated[0].content, "Hello");
    }
}
