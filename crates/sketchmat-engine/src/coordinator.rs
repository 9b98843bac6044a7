use serde_json::json;
use sketchmat_contracts::events::{EventWriter, SessionEvent};
use sketchmat_contracts::gallery::{GalleryEntry, GalleryStore, StoreError};
use sketchmat_contracts::image_ref::ImageReference;
use sketchmat_contracts::params::{GenerationParameters, ParameterError, ParameterUpdate};

use crate::{map_object, sniff_mime};

/// Owns the preview, the active gallery id, the cached gallery listing and
/// the generation parameters. Nothing else mutates them.
pub struct StateCoordinator {
    store: Box<dyn GalleryStore>,
    parameters: GenerationParameters,
    current_preview: Option<ImageReference>,
    active_gallery_id: Option<i64>,
    gallery: Vec<GalleryEntry>,
    events: Option<EventWriter>,
}

impl StateCoordinator {
    pub fn new(store: Box<dyn GalleryStore>) -> Self {
        Self {
            store,
            parameters: GenerationParameters::default(),
            current_preview: None,
            active_gallery_id: None,
            gallery: Vec::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn parameters(&self) -> &GenerationParameters {
        &self.parameters
    }

    pub fn current_preview(&self) -> Option<&ImageReference> {
        self.current_preview.as_ref()
    }

    pub fn active_gallery_id(&self) -> Option<i64> {
        self.active_gallery_id
    }

    pub fn gallery(&self) -> &[GalleryEntry] {
        &self.gallery
    }

    pub fn store(&self) -> &dyn GalleryStore {
        self.store.as_ref()
    }

    pub fn refresh_gallery(&mut self) -> Result<(), StoreError> {
        self.gallery = self.store.list_all()?;
        Ok(())
    }

    /// Shows `bytes` as the preview and persists them with the current
    /// parameters.
    ///
    /// The preview is set before the save. When the save fails the preview
    /// keeps the new image while the active id and listing stay as they were.
    pub fn on_image_produced(&mut self, bytes: &[u8], prompt: &str) -> Result<i64, StoreError> {
        let mime_type = sniff_mime(bytes, "image/png");
        self.current_preview = Some(ImageReference::from_bytes(bytes, mime_type));

        let metadata = self.parameters.snapshot();
        let id = match self.store.save(bytes, prompt, &metadata) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(error = %err, "gallery save failed");
                self.emit(
                    SessionEvent::GallerySaveFailed,
                    json!({ "prompt": prompt, "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        self.active_gallery_id = Some(id);
        if let Err(err) = self.refresh_gallery() {
            tracing::warn!(id, error = %err, "gallery refresh after save failed");
        }
        tracing::info!(id, bytes = bytes.len(), "image saved to gallery");
        self.emit(
            SessionEvent::ImageSaved,
            json!({
                "id": id,
                "prompt": prompt,
                "mime_type": mime_type,
                "bytes": bytes.len(),
                "metadata": metadata,
            }),
        );
        Ok(id)
    }

    pub fn on_history_select(&mut self, entry: &GalleryEntry) {
        let mime_type = sniff_mime(&entry.image_data, "image/png");
        self.current_preview = Some(ImageReference::from_bytes(&entry.image_data, mime_type));
        self.active_gallery_id = Some(entry.id);
        self.emit(SessionEvent::HistorySelected, json!({ "id": entry.id }));
    }

    pub fn update_parameters(&mut self, update: ParameterUpdate) -> Result<(), ParameterError> {
        if update.is_empty() {
            return Ok(());
        }
        self.parameters.apply(update)?;
        self.emit(
            SessionEvent::ParametersUpdated,
            json!({ "parameters": self.parameters }),
        );
        Ok(())
    }

    fn emit(&self, event: SessionEvent, payload: serde_json::Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event, map_object(payload)) {
            tracing::warn!(event = event.as_str(), error = %format!("{err:#}"), "event write failed");
        }
    }
}
