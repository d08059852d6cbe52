use std::{
    collections::VecDeque,
    env,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use super::*;
use tokio::sync::{Mutex as AsyncMutex, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProviderCall {
    Create { prompt: String },
    Transform { prompt: String, source: Image },
}

struct TestImageProvider {
    results: AsyncMutex<VecDeque<Result<Image, String>>>,
    calls: AsyncMutex<Vec<ProviderCall>>,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl TestImageProvider {
    fn returning(results: Vec<Result<Image, String>>) -> Arc<Self> {
        Arc::new(Self {
            results: AsyncMutex::new(results.into()),
            calls: AsyncMutex::new(Vec::new()),
            gated: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    fn gated(results: Vec<Result<Image, String>>) -> Arc<Self> {
        let provider = Self::returning(results);
        provider.hold_requests();
        provider
    }

    /// Subsequent calls park until `release` is notified.
    fn hold_requests(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().await.clone()
    }

    async fn respond(&self, call: ProviderCall) -> Result<Image> {
        self.calls.lock().await.push(call);
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        match self.results.lock().await.pop_front() {
            Some(Ok(image)) => Ok(image),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted provider response")),
        }
    }
}

#[async_trait]
impl ImageProvider for TestImageProvider {
    async fn create(&self, prompt: &str) -> Result<Image> {
        self.respond(ProviderCall::Create {
            prompt: prompt.to_string(),
        })
        .await
    }

    async fn transform(&self, prompt: &str, source: &Image) -> Result<Image> {
        self.respond(ProviderCall::Transform {
            prompt: prompt.to_string(),
            source: source.clone(),
        })
        .await
    }
}

#[derive(Default)]
struct RecordingSaver {
    saved: AsyncMutex<Vec<(String, Image)>>,
}

#[async_trait]
impl ImageSaver for RecordingSaver {
    async fn save(&self, filename: &str, image: &Image) -> Result<PathBuf> {
        self.saved
            .lock()
            .await
            .push((filename.to_string(), image.clone()));
        Ok(PathBuf::from("/downloads").join(filename))
    }
}

fn image(tag: &str) -> Image {
    Image::new("image/png", tag.as_bytes().to_vec())
}

/// Runs scenarios A and B: history `[X, Y]` with the cursor on `Y`.
async fn controller_with_two_images(
    extra: Vec<Result<Image, String>>,
) -> (Arc<SessionController>, Arc<TestImageProvider>) {
    let mut results = vec![Ok(image("X")), Ok(image("Y"))];
    results.extend(extra);
    let provider = TestImageProvider::returning(results);
    let controller = SessionController::new(provider.clone());
    controller.generate("a red cube").await.expect("generate");
    controller.edit("make it blue").await.expect("edit");
    (controller, provider)
}

#[tokio::test]
async fn generate_success_yields_single_entry_history() {
    let provider = TestImageProvider::returning(vec![Ok(image("X"))]);
    let controller = SessionController::new(provider.clone());

    let view = controller.generate("a red cube").await.expect("generate");

    assert_eq!(controller.history(), vec![image("X")]);
    assert_eq!(controller.cursor(), 0);
    assert_eq!(view.current, Some(image("X")));
    assert_eq!(view.position, 1);
    assert_eq!(view.history_len, 1);
    assert!(view.has_original);
    assert!(!view.busy);
    assert!(!view.can_go_previous);
    assert!(!view.can_go_next);
    assert_eq!(view.generate_prompt, "a red cube");
    assert_eq!(controller.original_image(), Some(image("X")));
    assert_eq!(
        provider.calls().await,
        vec![ProviderCall::Create {
            prompt: "a red cube".to_string()
        }]
    );
}

#[tokio::test]
async fn edit_composes_on_current_image_and_advances_cursor() {
    let (controller, provider) = controller_with_two_images(Vec::new()).await;

    assert_eq!(controller.history(), vec![image("X"), image("Y")]);
    assert_eq!(controller.cursor(), 1);
    assert_eq!(controller.current_image(), Some(image("Y")));
    assert_eq!(
        provider.calls().await[1],
        ProviderCall::Transform {
            prompt: "make it blue".to_string(),
            source: image("X"),
        }
    );
    assert_eq!(controller.view().edit_prompt, "make it blue");
}

#[tokio::test]
async fn edit_after_navigating_back_discards_forward_branch() {
    let (controller, provider) = controller_with_two_images(vec![Ok(image("Z"))]).await;

    let view = controller.navigate_previous();
    assert_eq!(view.current, Some(image("X")));
    assert!(view.can_go_next);

    let view = controller.edit("make it green").await.expect("edit");

    assert_eq!(controller.history(), vec![image("X"), image("Z")]);
    assert_eq!(controller.cursor(), 1);
    assert_eq!(view.current, Some(image("Z")));
    assert!(!view.can_go_next);
    assert_eq!(
        provider.calls().await[2],
        ProviderCall::Transform {
            prompt: "make it green".to_string(),
            source: image("X"),
        }
    );
    // The original marker still points at the first generation.
    assert_eq!(controller.original_image(), Some(image("X")));
}

#[tokio::test]
async fn branch_discard_holds_for_every_cursor_position() {
    for cursor in 0..4 {
        let provider = TestImageProvider::returning(vec![
            Ok(image("0")),
            Ok(image("1")),
            Ok(image("2")),
            Ok(image("3")),
            Ok(image("new")),
        ]);
        let controller = SessionController::new(provider);
        controller.generate("start").await.expect("generate");
        for step in 1..4 {
            controller.edit(&format!("step {step}")).await.expect("edit");
        }
        let before = controller.history();
        while controller.cursor() > cursor {
            controller.navigate_previous();
        }

        controller.edit("branch").await.expect("edit");

        let mut expected = before[..=cursor].to_vec();
        expected.push(image("new"));
        assert_eq!(controller.history(), expected, "cursor {cursor}");
        assert_eq!(controller.cursor(), expected.len() - 1);
    }
}

#[tokio::test]
async fn empty_prompt_generate_is_rejected_without_provider_call() {
    let provider = TestImageProvider::returning(vec![Ok(image("X"))]);
    let controller = SessionController::new(provider.clone());
    let before = controller.view();

    assert_eq!(controller.generate("").await, Err(Rejection::EmptyPrompt));
    assert_eq!(controller.generate("   \n\t").await, Err(Rejection::EmptyPrompt));

    assert_eq!(controller.view(), before);
    assert!(provider.calls().await.is_empty());
}

#[tokio::test]
async fn edit_without_image_is_rejected_without_provider_call() {
    let provider = TestImageProvider::returning(vec![Ok(image("Y"))]);
    let controller = SessionController::new(provider.clone());

    assert_eq!(
        controller.edit("make it blue").await,
        Err(Rejection::NoCurrentImage)
    );
    assert!(controller.history().is_empty());
    assert!(provider.calls().await.is_empty());
}

#[tokio::test]
async fn empty_prompt_edit_is_rejected() {
    let (controller, provider) = controller_with_two_images(Vec::new()).await;

    assert_eq!(controller.edit("  ").await, Err(Rejection::EmptyPrompt));
    assert_eq!(provider.calls().await.len(), 2);
    assert_eq!(controller.view().edit_prompt, "make it blue");
}

#[tokio::test]
async fn generate_is_rejected_once_history_exists() {
    let (controller, provider) = controller_with_two_images(Vec::new()).await;

    assert_eq!(
        controller.generate("a new scene").await,
        Err(Rejection::ImageAlreadyPresent)
    );
    assert_eq!(controller.history().len(), 2);
    assert_eq!(provider.calls().await.len(), 2);
}

#[tokio::test]
async fn failed_edit_leaves_history_and_cursor_untouched() {
    let (controller, _provider) =
        controller_with_two_images(vec![Err("quota exhausted".to_string())]).await;
    controller.navigate_previous();
    let history_before = controller.history();

    let view = controller.edit("make it green").await.expect("dispatched");

    assert_eq!(controller.history(), history_before);
    assert_eq!(controller.cursor(), 0);
    assert!(!view.busy);
    let failure = view.last_error.expect("error recorded");
    assert_eq!(failure.kind, FailureKind::Editing);
    assert_eq!(failure.message, "Failed to edit image: quota exhausted");
}

#[tokio::test]
async fn failed_generate_leaves_history_empty_and_controller_usable() {
    let provider =
        TestImageProvider::returning(vec![Err("network down".to_string()), Ok(image("X"))]);
    let controller = SessionController::new(provider);

    let view = controller.generate("a red cube").await.expect("dispatched");
    assert!(controller.history().is_empty());
    assert!(view.current.is_none());
    assert!(!view.has_original);
    assert!(!view.busy);
    let failure = view.last_error.expect("error recorded");
    assert_eq!(failure.kind, FailureKind::Generation);
    assert_eq!(failure.message, "Failed to generate image: network down");

    let view = controller.generate("a red cube").await.expect("retry");
    assert_eq!(view.current, Some(image("X")));
    assert!(view.last_error.is_none());
}

#[tokio::test]
async fn requests_while_busy_do_not_touch_state() {
    let provider = TestImageProvider::gated(vec![Ok(image("X"))]);
    let controller = SessionController::new(provider.clone());

    let pending = tokio::spawn({
        let controller = controller.clone();
        async move { controller.generate("a red cube").await }
    });
    provider.entered.notified().await;

    let during = controller.view();
    assert!(during.busy);
    assert_eq!(
        controller.generate("another cube").await,
        Err(Rejection::Busy)
    );
    assert_eq!(controller.edit("make it blue").await, Err(Rejection::Busy));
    assert_eq!(controller.new_image(), Err(Rejection::Busy));
    assert_eq!(controller.view(), during);

    provider.release.notify_one();
    let view = pending.await.expect("join").expect("generate");
    assert_eq!(view.current, Some(image("X")));
    assert!(!view.busy);
    assert_eq!(provider.calls().await.len(), 1);
}

#[tokio::test]
async fn navigation_stays_available_while_edit_is_in_flight() {
    let (controller, provider) = controller_with_two_images(vec![Ok(image("Z"))]).await;
    provider.hold_requests();

    let pending = tokio::spawn({
        let controller = controller.clone();
        async move { controller.edit("make it green").await }
    });
    provider.entered.notified().await;

    let view = controller.navigate_previous();
    assert!(view.busy);
    assert_eq!(view.current, Some(image("X")));
    let view = controller.navigate_next();
    assert_eq!(view.current, Some(image("Y")));
    controller.navigate_previous();

    provider.release.notify_one();
    pending.await.expect("join").expect("edit");

    // The edit branched from the image viewed at dispatch time.
    assert_eq!(
        controller.history(),
        vec![image("X"), image("Y"), image("Z")]
    );
    assert_eq!(controller.cursor(), 2);
}

#[tokio::test]
async fn abandoned_request_releases_busy_flag() {
    let provider = TestImageProvider::gated(vec![Ok(image("X"))]);
    let controller = SessionController::new(provider);

    let outcome =
        tokio::time::timeout(Duration::from_millis(20), controller.generate("a red cube")).await;

    assert!(outcome.is_err(), "provider is never released");
    assert!(!controller.is_busy());
    assert!(controller.history().is_empty());
}

#[tokio::test]
async fn navigation_is_inverse_away_from_boundaries() {
    let (controller, _provider) =
        controller_with_two_images(vec![Ok(image("Z"))]).await;
    controller.edit("make it green").await.expect("edit");
    controller.navigate_previous();
    assert_eq!(controller.cursor(), 1);

    controller.navigate_previous();
    controller.navigate_next();
    assert_eq!(controller.cursor(), 1);

    let view = controller.navigate_next();
    assert_eq!(view.position, 3);
    let view = controller.navigate_next();
    assert_eq!(view.position, 3);
    assert!(!view.can_go_next);
}

#[tokio::test]
async fn navigation_on_empty_history_is_noop() {
    let controller = SessionController::new(Arc::new(MissingImageProvider));
    let view = controller.navigate_previous();
    assert_eq!(view.position, 0);
    let view = controller.navigate_next();
    assert_eq!(view.position, 0);
    assert!(view.current.is_none());
}

#[tokio::test]
async fn new_image_resets_everything() {
    let (controller, _provider) =
        controller_with_two_images(vec![Err("boom".to_string())]).await;
    controller.edit("make it green").await.expect("dispatched");
    controller.set_generate_prompt("draft");
    let before = controller.view();
    assert!(before.last_error.is_some());

    let view = controller.new_image().expect("reset");

    assert!(controller.history().is_empty());
    assert_eq!(controller.cursor(), 0);
    assert!(view.current.is_none());
    assert!(view.last_error.is_none());
    assert!(!view.has_original);
    assert!(view.generate_prompt.is_empty());
    assert!(view.edit_prompt.is_empty());
    assert_ne!(view.session_id, before.session_id);

    let again = controller.new_image().expect("reset twice");
    assert_eq!(again.history_len, 0);
    assert!(again.last_error.is_none());
}

#[tokio::test]
async fn dismiss_error_only_clears_error() {
    let (controller, _provider) =
        controller_with_two_images(vec![Err("boom".to_string())]).await;
    controller.edit("make it green").await.expect("dispatched");

    let view = controller.dismiss_error();

    assert!(view.last_error.is_none());
    assert_eq!(view.history_len, 2);
    assert_eq!(view.position, 2);
    assert!(!view.busy);
}

#[tokio::test]
async fn missing_provider_surfaces_generation_failure() {
    let controller = SessionController::new(Arc::new(MissingImageProvider));

    let view = controller.generate("a red cube").await.expect("dispatched");

    assert_eq!(
        view.last_error.map(|failure| failure.message),
        Some("Failed to generate image: image provider is unavailable".to_string())
    );
}

#[tokio::test]
async fn publishes_start_failure_and_update_events() {
    let provider = TestImageProvider::returning(vec![Err("boom".to_string())]);
    let controller = SessionController::new(provider);
    let mut rx = controller.subscribe();

    controller.generate("a red cube").await.expect("dispatched");

    match rx.recv().await.expect("event") {
        SessionEvent::RequestStarted { kind, prompt } => {
            assert_eq!(kind, RequestKind::Generate);
            assert_eq!(prompt, "a red cube");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match rx.recv().await.expect("event") {
        SessionEvent::Updated(view) => assert!(view.busy),
        other => panic!("unexpected event: {other:?}"),
    }
    match rx.recv().await.expect("event") {
        SessionEvent::Failed(failure) => assert_eq!(failure.kind, FailureKind::Generation),
        other => panic!("unexpected event: {other:?}"),
    }
    match rx.recv().await.expect("event") {
        SessionEvent::Updated(view) => {
            assert!(!view.busy);
            assert!(view.last_error.is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_published_view_matches_state_after_navigation_races_completion() {
    let (controller, provider) = controller_with_two_images(vec![Ok(image("Z"))]).await;
    provider.hold_requests();
    let mut rx = controller.subscribe();

    let pending = tokio::spawn({
        let controller = controller.clone();
        async move { controller.edit("make it green").await }
    });
    provider.entered.notified().await;

    let navigator = tokio::task::spawn_blocking({
        let controller = controller.clone();
        move || {
            for _ in 0..20 {
                controller.navigate_previous();
                controller.navigate_next();
            }
        }
    });
    provider.release.notify_one();
    pending.await.expect("join").expect("edit");
    navigator.await.expect("join");

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::Updated(view) = event {
            last = Some(view);
        }
    }
    assert_eq!(last, Some(controller.view()));
}

#[tokio::test]
async fn rejections_are_not_published() {
    let controller = SessionController::new(Arc::new(MissingImageProvider));
    let mut rx = controller.subscribe();

    let _ = controller.generate(" ").await;
    let _ = controller.edit("make it blue").await;
    controller.navigate_next();

    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn download_hands_current_image_to_saver() {
    let (controller, _provider) = controller_with_two_images(Vec::new()).await;
    controller.navigate_previous();
    let saver = RecordingSaver::default();

    let path = controller
        .download(&saver)
        .await
        .expect("download")
        .expect("image present");

    let saved = saver.saved.lock().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].1, image("X"));
    assert!(saved[0].0.starts_with("gemini-image-"));
    assert!(saved[0].0.ends_with(".png"));
    assert_eq!(path, PathBuf::from("/downloads").join(&saved[0].0));
}

#[tokio::test]
async fn download_without_image_saves_nothing() {
    let controller = SessionController::new(Arc::new(MissingImageProvider));
    let saver = RecordingSaver::default();

    assert!(controller.download(&saver).await.expect("download").is_none());
    assert!(saver.saved.lock().await.is_empty());
}

#[tokio::test]
async fn directory_saver_creates_missing_directory() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("image_session_saver_test_{suffix}"));
    let saver = DirectorySaver::new(temp_root.join("nested"));
    assert_eq!(saver.dir(), temp_root.join("nested").as_path());

    let path = saver
        .save("gemini-image-1.png", &image("bytes"))
        .await
        .expect("save");

    assert_eq!(path, temp_root.join("nested").join("gemini-image-1.png"));
    assert_eq!(tokio::fs::read(&path).await.expect("read"), b"bytes");

    tokio::fs::remove_dir_all(temp_root).await.expect("cleanup");
}

#[test]
fn download_filename_uses_timestamp_and_extension() {
    let at: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().expect("timestamp");
    let jpeg = Image::new("image/jpeg", Vec::new());
    assert_eq!(
        download_filename(&jpeg, at),
        format!("gemini-image-{}.jpg", at.timestamp_millis())
    );
}
