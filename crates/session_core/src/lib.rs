use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gemini_integration::GeminiClient;
use shared::{
    domain::{Image, SessionId},
    error::{FailureKind, SessionFailure},
    protocol::{RequestKind, SessionEvent, SessionView},
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

pub mod history;

pub use history::HistoryStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const DOWNLOAD_FILENAME_PREFIX: &str = "gemini-image";

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn create(&self, prompt: &str) -> Result<Image>;
    async fn transform(&self, prompt: &str, source: &Image) -> Result<Image>;
}

pub struct MissingImageProvider;

#[async_trait]
impl ImageProvider for MissingImageProvider {
    async fn create(&self, _prompt: &str) -> Result<Image> {
        Err(anyhow!("image provider is unavailable"))
    }

    async fn transform(&self, _prompt: &str, _source: &Image) -> Result<Image> {
        Err(anyhow!("image provider is unavailable"))
    }
}

#[async_trait]
impl ImageProvider for GeminiClient {
    async fn create(&self, prompt: &str) -> Result<Image> {
        Ok(self.generate_image(prompt).await?)
    }

    async fn transform(&self, prompt: &str, source: &Image) -> Result<Image> {
        Ok(self.edit_image(prompt, source).await?)
    }
}

/// Host-provided sink for downloads.
#[async_trait]
pub trait ImageSaver: Send + Sync {
    async fn save(&self, filename: &str, image: &Image) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ImageSaver for DirectorySaver {
    async fn save(&self, filename: &str, image: &Image) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await.with_context(|| {
            format!(
                "failed to create download directory '{}'",
                self.dir.display()
            )
        })?;
        let path = self.dir.join(filename);
        tokio::fs::write(&path, image.bytes())
            .await
            .with_context(|| format!("failed to write image to '{}'", path.display()))?;
        Ok(path)
    }
}

pub fn download_filename(image: &Image, at: DateTime<Utc>) -> String {
    format!(
        "{DOWNLOAD_FILENAME_PREFIX}-{}.{}",
        at.timestamp_millis(),
        image.file_extension()
    )
}

/// Why an intent was ignored. Rejections never reach `last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("a request is already in flight")]
    Busy,
    #[error("there is no image to edit")]
    NoCurrentImage,
    #[error("an image already exists; start a new image first")]
    ImageAlreadyPresent,
}

struct SessionState {
    session_id: SessionId,
    history: HistoryStore,
    original: Option<Image>,
    busy: bool,
    last_error: Option<SessionFailure>,
    generate_prompt: String,
    edit_prompt: String,
}

impl SessionState {
    fn new() -> Self {
        Self {
            session_id: SessionId::new(),
            history: HistoryStore::new(),
            original: None,
            busy: false,
            last_error: None,
            generate_prompt: String::new(),
            edit_prompt: String::new(),
        }
    }

    fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id,
            current: self.history.current().cloned(),
            busy: self.busy,
            last_error: self.last_error.clone(),
            can_go_previous: self.history.can_go_previous(),
            can_go_next: self.history.can_go_next(),
            history_len: self.history.len(),
            position: self.history.position(),
            has_original: self.original.is_some(),
            generate_prompt: self.generate_prompt.clone(),
            edit_prompt: self.edit_prompt.clone(),
        }
    }
}

/// Owns one image session and serializes provider requests against it.
///
/// At most one `generate`/`edit` is in flight at a time. Navigation, reads and
/// downloads stay available while a request is pending. The state lock is
/// never held across the provider call.
pub struct SessionController {
    provider: Arc<dyn ImageProvider>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(provider: Arc<dyn ImageProvider>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            provider,
            state: Mutex::new(SessionState::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn view(&self) -> SessionView {
        self.lock().view()
    }

    pub fn current_image(&self) -> Option<Image> {
        self.lock().history.current().cloned()
    }

    pub fn original_image(&self) -> Option<Image> {
        self.lock().original.clone()
    }

    pub fn history(&self) -> Vec<Image> {
        self.lock().history.entries().to_vec()
    }

    pub fn cursor(&self) -> usize {
        self.lock().history.cursor()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn set_generate_prompt(&self, text: impl Into<String>) -> SessionView {
        let mut state = self.lock();
        state.generate_prompt = text.into();
        self.publish_view(&state)
    }

    pub fn set_edit_prompt(&self, text: impl Into<String>) -> SessionView {
        let mut state = self.lock();
        state.edit_prompt = text.into();
        self.publish_view(&state)
    }

    /// Starts a fresh session round from `prompt`. Only allowed while the
    /// history is empty; the history stays empty if the provider fails.
    pub async fn generate(&self, prompt: &str) -> Result<SessionView, Rejection> {
        {
            let mut state = self.lock();
            if state.busy {
                return Err(self.reject(RequestKind::Generate, Rejection::Busy));
            }
            if prompt.trim().is_empty() {
                return Err(self.reject(RequestKind::Generate, Rejection::EmptyPrompt));
            }
            if !state.history.is_empty() {
                return Err(self.reject(
                    RequestKind::Generate,
                    Rejection::ImageAlreadyPresent,
                ));
            }

            state.busy = true;
            state.last_error = None;
            state.history.reset();
            state.original = None;
            state.generate_prompt = prompt.to_string();
            info!(session = %state.session_id, "session: generate dispatched");
            self.publish(SessionEvent::RequestStarted {
                kind: RequestKind::Generate,
                prompt: prompt.to_string(),
            });
            self.publish_view(&state);
        }
        let mut in_flight = InFlight::new(self);

        let result = self.provider.create(prompt).await;

        let mut state = self.lock();
        state.busy = false;
        in_flight.disarm();
        let failure = match result {
            Ok(image) => {
                info!(
                    session = %state.session_id,
                    mime_type = image.mime_type(),
                    bytes = image.len(),
                    "session: generate completed"
                );
                state.history.append(image.clone());
                state.original = Some(image);
                None
            }
            Err(err) => {
                error!(session = %state.session_id, "session: generate failed: {err:#}");
                let failure =
                    SessionFailure::from_provider(FailureKind::Generation, format!("{err:#}"));
                state.last_error = Some(failure.clone());
                Some(failure)
            }
        };
        Ok(self.finish(&state, failure))
    }

    /// Applies `prompt` to the image currently being viewed. On success every
    /// entry after the viewed one is discarded and the result becomes the
    /// tail. On failure the history and cursor are left untouched.
    pub async fn edit(&self, prompt: &str) -> Result<SessionView, Rejection> {
        let (source, anchor) = {
            let mut state = self.lock();
            if state.busy {
                return Err(self.reject(RequestKind::Edit, Rejection::Busy));
            }
            if prompt.trim().is_empty() {
                return Err(self.reject(RequestKind::Edit, Rejection::EmptyPrompt));
            }
            let Some(source) = state.history.current().cloned() else {
                return Err(self.reject(RequestKind::Edit, Rejection::NoCurrentImage));
            };

            state.busy = true;
            state.last_error = None;
            state.edit_prompt = prompt.to_string();
            let anchor = state.history.cursor();
            info!(
                session = %state.session_id,
                position = anchor + 1,
                history_len = state.history.len(),
                "session: edit dispatched"
            );
            self.publish(SessionEvent::RequestStarted {
                kind: RequestKind::Edit,
                prompt: prompt.to_string(),
            });
            self.publish_view(&state);
            (source, anchor)
        };
        let mut in_flight = InFlight::new(self);

        let result = self.provider.transform(prompt, &source).await;

        let mut state = self.lock();
        state.busy = false;
        in_flight.disarm();
        let failure = match result {
            Ok(image) => {
                // The history cannot change length while busy, so the
                // dispatch-time cursor is still a valid branch point.
                state.history.truncate_after(anchor);
                state.history.append(image);
                info!(
                    session = %state.session_id,
                    history_len = state.history.len(),
                    "session: edit completed"
                );
                None
            }
            Err(err) => {
                error!(session = %state.session_id, "session: edit failed: {err:#}");
                let failure =
                    SessionFailure::from_provider(FailureKind::Editing, format!("{err:#}"));
                state.last_error = Some(failure.clone());
                Some(failure)
            }
        };
        Ok(self.finish(&state, failure))
    }

    pub fn navigate_previous(&self) -> SessionView {
        self.navigate(HistoryStore::step_back)
    }

    pub fn navigate_next(&self) -> SessionView {
        self.navigate(HistoryStore::step_forward)
    }

    /// Clears the session for a new round. Rejected while a request is in
    /// flight so the pending result never lands on a discarded session.
    pub fn new_image(&self) -> Result<SessionView, Rejection> {
        let mut state = self.lock();
        if state.busy {
            debug!(session = %state.session_id, "session: new image rejected while busy");
            return Err(Rejection::Busy);
        }
        *state = SessionState::new();
        info!(session = %state.session_id, "session: started new image");
        Ok(self.publish_view(&state))
    }

    pub fn dismiss_error(&self) -> SessionView {
        let mut state = self.lock();
        if state.last_error.take().is_some() {
            self.publish_view(&state)
        } else {
            state.view()
        }
    }

    /// Hands the viewed image to `saver` under a timestamped filename.
    /// Returns `None` when there is nothing to save.
    pub async fn download(&self, saver: &dyn ImageSaver) -> Result<Option<PathBuf>> {
        let Some(image) = self.current_image() else {
            return Ok(None);
        };
        let filename = download_filename(&image, Utc::now());
        let path = saver.save(&filename, &image).await?;
        info!(path = %path.display(), "session: image saved");
        Ok(Some(path))
    }

    fn navigate(&self, step: fn(&mut HistoryStore)) -> SessionView {
        let mut state = self.lock();
        let before = state.history.cursor();
        step(&mut state.history);
        if state.history.cursor() != before {
            self.publish_view(&state)
        } else {
            state.view()
        }
    }

    fn finish(&self, state: &SessionState, failure: Option<SessionFailure>) -> SessionView {
        if let Some(failure) = failure {
            self.publish(SessionEvent::Failed(failure));
        }
        self.publish_view(state)
    }

    fn reject(&self, kind: RequestKind, rejection: Rejection) -> Rejection {
        debug!(?kind, %rejection, "session: request ignored");
        rejection
    }

    /// Publishes the current view. Callers hold the state lock so that
    /// subscribers receive views in the order the state changed.
    fn publish_view(&self, state: &SessionState) -> SessionView {
        let view = state.view();
        self.publish(SessionEvent::Updated(view.clone()));
        view
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the busy flag if a request future is dropped before the provider
/// resolves.
struct InFlight<'a> {
    controller: &'a SessionController,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(controller: &'a SessionController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.controller.lock();
            state.busy = false;
            debug!(session = %state.session_id, "session: request abandoned before completion");
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
