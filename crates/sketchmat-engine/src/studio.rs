use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use sketchmat_contracts::conversation::{ConversationTurn, TurnInput};
use sketchmat_contracts::events::{EventWriter, SessionEvent};
use sketchmat_contracts::gallery::{GalleryEntry, GalleryStore};
use sketchmat_contracts::params::{AspectRatio, ParameterError, ParameterUpdate};

use crate::coordinator::StateCoordinator;
use crate::providers::GenerationClient;
use crate::resolve::resolve_to_bytes;
use crate::router::{ConversationRouter, RouteOutcome, SubmitError};
use crate::{extension_for, map_object, timestamp_millis};

/// What happened to one chat submission.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: RouteOutcome,
    /// Gallery id of the produced image, when one was produced and saved.
    pub gallery_id: Option<i64>,
    pub save_error: Option<String>,
}

/// One interactive session: router, state and client wired together.
pub struct Studio {
    client: Arc<dyn GenerationClient>,
    router: ConversationRouter,
    state: StateCoordinator,
    events: Option<EventWriter>,
}

impl Studio {
    pub fn new(client: Arc<dyn GenerationClient>, store: Box<dyn GalleryStore>) -> Result<Self> {
        Self::build(client, store, None)
    }

    pub fn with_events(
        client: Arc<dyn GenerationClient>,
        store: Box<dyn GalleryStore>,
        events: EventWriter,
    ) -> Result<Self> {
        Self::build(client, store, Some(events))
    }

    fn build(
        client: Arc<dyn GenerationClient>,
        store: Box<dyn GalleryStore>,
        events: Option<EventWriter>,
    ) -> Result<Self> {
        let mut router = ConversationRouter::new(Arc::clone(&client));
        let mut state = StateCoordinator::new(store);
        if let Some(events) = events.as_ref() {
            router = router.with_events(events.clone());
            state = state.with_events(events.clone());
        }
        state
            .refresh_gallery()
            .context("failed to load gallery history")?;

        let studio = Self {
            client,
            router,
            state,
            events,
        };
        studio.emit(
            SessionEvent::SessionStarted,
            json!({
                "provider": studio.client.name(),
                "gallery_size": studio.state.gallery().len(),
            }),
        );
        Ok(studio)
    }

    pub fn provider_name(&self) -> &str {
        self.client.name()
    }

    pub fn state(&self) -> &StateCoordinator {
        &self.state
    }

    pub fn transcript(&self) -> Vec<ConversationTurn> {
        self.router.transcript()
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    /// Routes a chat turn against the current preview and saves any
    /// produced image. A failed save is reported, not raised.
    pub fn send(&mut self, input: TurnInput) -> Result<TurnReport, SubmitError> {
        if input.is_blank() {
            return Err(SubmitError::EmptyInput);
        }
        let canvas = self.state.current_preview().cloned();
        let outcome = self.router.submit(input, canvas.as_ref())?;

        let mut gallery_id = None;
        let mut save_error = None;
        if let Some(produced) = outcome.produced.as_ref() {
            match self.state.on_image_produced(&produced.bytes, &produced.prompt) {
                Ok(id) => gallery_id = Some(id),
                Err(err) => save_error = Some(err.to_string()),
            }
        }
        Ok(TurnReport {
            outcome,
            gallery_id,
            save_error,
        })
    }

    /// Text-to-image generation straight into the preview and gallery.
    pub fn imagine(&mut self, prompt: &str, aspect_ratio: AspectRatio) -> Result<i64> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("imagine needs a prompt");
        }
        let bytes = self
            .client
            .generate_from_text(prompt, aspect_ratio)
            .with_context(|| format!("{} text-to-image failed", self.client.name()))?;
        let id = self.state.on_image_produced(&bytes, prompt)?;
        self.emit(
            SessionEvent::ImagineFinished,
            json!({
                "id": id,
                "prompt": prompt,
                "aspect_ratio": aspect_ratio.as_str(),
            }),
        );
        Ok(id)
    }

    pub fn select_history(&mut self, id: i64) -> Result<GalleryEntry> {
        let cached = self
            .state
            .gallery()
            .iter()
            .find(|entry| entry.id == id)
            .cloned();
        let entry = match cached {
            Some(entry) => entry,
            None => match self.state.store().get(id)? {
                Some(entry) => entry,
                None => bail!("no gallery entry with id {id}"),
            },
        };
        self.state.on_history_select(&entry);
        Ok(entry)
    }

    pub fn update_parameters(&mut self, update: ParameterUpdate) -> Result<(), ParameterError> {
        self.state.update_parameters(update)
    }

    /// Writes the current preview to `dir/render-<millis>.<ext>`.
    pub fn export_preview(&self, dir: &Path) -> Result<PathBuf> {
        let Some(preview) = self.state.current_preview() else {
            bail!("nothing to export: no image in the preview");
        };
        let bytes = resolve_to_bytes(preview)?;
        let path = write_render(dir, &bytes)?;
        self.emit(
            SessionEvent::PreviewExported,
            json!({
                "path": path.display().to_string(),
                "gallery_id": self.state.active_gallery_id(),
            }),
        );
        Ok(path)
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

/// Writes image bytes to `dir/render-<millis>.<ext>`, creating `dir`.
pub fn write_render(dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!(
        "render-{}.{}",
        timestamp_millis(),
        extension_for(bytes)
    ));
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
