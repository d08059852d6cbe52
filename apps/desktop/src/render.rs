//! Text rendering of session projections and events.

use shared::protocol::{RequestKind, SessionEvent, SessionView};
use tokio::sync::broadcast::{self, error::RecvError};

pub fn describe_view(view: &SessionView) -> String {
    let mut line = match &view.current {
        Some(image) => format!(
            "image {} of {} ({}, {} bytes)",
            view.position,
            view.history_len,
            image.mime_type(),
            image.len()
        ),
        None => "no image yet; use `generate <prompt>`".to_string(),
    };

    let mut nav = Vec::new();
    if view.can_go_previous {
        nav.push("prev");
    }
    if view.can_go_next {
        nav.push("next");
    }
    if !nav.is_empty() {
        line.push_str(&format!(" [{}]", nav.join(" | ")));
    }
    if view.busy {
        line.push_str(" (working...)");
    }
    if let Some(failure) = &view.last_error {
        line.push_str(&format!("\n  error: {failure} (type `dismiss` to clear)"));
    }
    line
}

/// Turns session events into terminal text.
///
/// The view published together with `RequestStarted` only flips the busy flag
/// on, so it is folded into the start line. Later busy views (navigation while
/// a request is pending) are rendered.
#[derive(Debug, Default)]
pub struct EventRenderer {
    fold_next_update: bool,
}

impl EventRenderer {
    pub fn render(&mut self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::RequestStarted { kind, prompt } => {
                self.fold_next_update = true;
                let verb = match kind {
                    RequestKind::Generate => "generating",
                    RequestKind::Edit => "editing",
                };
                Some(format!("{verb}: \"{prompt}\"..."))
            }
            SessionEvent::Updated(view) => {
                if std::mem::take(&mut self.fold_next_update) && view.busy {
                    return None;
                }
                Some(describe_view(view))
            }
            // The following update carries the error banner.
            SessionEvent::Failed(_) => None,
        }
    }
}

pub async fn render_events(mut rx: broadcast::Receiver<SessionEvent>) {
    let mut renderer = EventRenderer::default();
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(text) = renderer.render(&event) {
                    println!("{text}");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                renderer = EventRenderer::default();
                tracing::warn!(skipped, "render: dropped session events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
