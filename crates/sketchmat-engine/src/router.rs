use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use serde_json::json;
use sketchmat_contracts::chat::{classify_turn, RouteAction};
use sketchmat_contracts::conversation::{ConversationTurn, Transcript, TurnInput};
use sketchmat_contracts::events::{EventWriter, SessionEvent};
use sketchmat_contracts::image_ref::ImageReference;

use crate::providers::GenerationClient;
use crate::resolve::resolve_to_bytes;
use crate::{error_chain_text, map_object};

pub const ACK_ATTACHMENT_RENDER: &str =
    "I've materialized your sketch based on our architectural DNA. Check the main canvas.";
pub const ATTACHMENT_RENDER_EMPTY: &str =
    "I analyzed the sketch but had trouble generating the render. Could you try a clearer view?";
pub const DEFAULT_ANALYSIS_QUESTION: &str = "What do you see in this architectural context?";
pub const ATTACHMENT_ANALYSIS_FALLBACK: &str =
    "I've analyzed the image. It looks like a complex architectural layout.";
pub const ACK_CANVAS_RENDER: &str = "Updated the render with your requested adjustments.";
pub const CANVAS_RENDER_EMPTY: &str =
    "Adjusting the current render failed. Please try a more specific text prompt.";
pub const CANVAS_ANALYSIS_FALLBACK: &str = "Analysis complete.";
pub const PROMPT_FOR_INPUT: &str =
    "Please upload a sketch or render to begin our architectural dialogue.";
pub const REMOTE_FAILURE_APOLOGY: &str =
    "My neural architects are experiencing a brief delay. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("a request is already in flight")]
    Busy,
    #[error("nothing to send: add text or an attachment")]
    EmptyInput,
}

/// Image bytes produced by a transform, with the text that asked for them.
#[derive(Clone, PartialEq)]
pub struct ProducedImage {
    pub bytes: Vec<u8>,
    pub prompt: String,
}

impl std::fmt::Debug for ProducedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducedImage")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("prompt", &self.prompt)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub action: RouteAction,
    pub user_turn: ConversationTurn,
    pub model_turn: ConversationTurn,
    pub produced: Option<ProducedImage>,
    /// The remote call (or byte resolution) failed and the apology was sent.
    pub failed: bool,
}

/// Routes each user turn to at most one remote operation.
///
/// - one model turn is appended per accepted submission, whatever happens
/// - only the first attachment is sent to the service
/// - a submission made while another is pending is rejected with `Busy`
pub struct ConversationRouter {
    client: Arc<dyn GenerationClient>,
    transcript: Mutex<Transcript>,
    in_flight: AtomicBool,
    events: Option<EventWriter>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SubmitError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| SubmitError::Busy)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ConversationRouter {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self {
            client,
            transcript: Mutex::new(Transcript::new()),
            in_flight: AtomicBool::new(false),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn transcript(&self) -> Vec<ConversationTurn> {
        self.lock_transcript().turns().to_vec()
    }

    pub fn submit(
        &self,
        input: TurnInput,
        canvas: Option<&ImageReference>,
    ) -> Result<RouteOutcome, SubmitError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        let user_turn = self.lock_transcript().push_user(&input);
        let action = classify_turn(&input.text, input.attachments.len(), canvas.is_some());
        tracing::debug!(turn = %user_turn.id, action = action.as_str(), "routing turn");

        let target = match action {
            RouteAction::TransformAttachment | RouteAction::AnalyzeAttachment => {
                input.attachments.first()
            }
            RouteAction::TransformCanvas | RouteAction::AnalyzeCanvas => canvas,
            RouteAction::PromptForInput => None,
        };

        let (reply, produced, failed) = match target {
            None => (PROMPT_FOR_INPUT.to_string(), None, false),
            Some(reference) => match self.call_remote(action, reference, &input.text) {
                Ok((reply, produced)) => (reply, produced, false),
                Err(err) => {
                    let detail = error_chain_text(&err, 600);
                    tracing::warn!(turn = %user_turn.id, action = action.as_str(), error = %detail, "remote call failed");
                    self.emit(
                        SessionEvent::TurnFailed,
                        json!({
                            "turn_id": user_turn.id,
                            "action": action.as_str(),
                            "error": detail,
                        }),
                    );
                    (REMOTE_FAILURE_APOLOGY.to_string(), None, true)
                }
            },
        };

        let model_turn = self.lock_transcript().push_model(reply);
        self.emit(
            SessionEvent::TurnRouted,
            json!({
                "turn_id": user_turn.id,
                "reply_id": model_turn.id,
                "action": action.as_str(),
                "attachments": user_turn.images.len(),
                "produced_image": produced.is_some(),
                "failed": failed,
            }),
        );

        Ok(RouteOutcome {
            action,
            user_turn,
            model_turn,
            produced,
            failed,
        })
    }

    fn call_remote(
        &self,
        action: RouteAction,
        reference: &ImageReference,
        text: &str,
    ) -> Result<(String, Option<ProducedImage>)> {
        let bytes = resolve_to_bytes(reference)?;
        if action.is_transform() {
            let (ack, empty) = if action == RouteAction::TransformAttachment {
                (ACK_ATTACHMENT_RENDER, ATTACHMENT_RENDER_EMPTY)
            } else {
                (ACK_CANVAS_RENDER, CANVAS_RENDER_EMPTY)
            };
            return Ok(match self.client.transform(&bytes, text)? {
                Some(image) => (
                    ack.to_string(),
                    Some(ProducedImage {
                        bytes: image,
                        prompt: text.to_string(),
                    }),
                ),
                None => (empty.to_string(), None),
            });
        }

        let question = if text.is_empty() {
            DEFAULT_ANALYSIS_QUESTION
        } else {
            text
        };
        let fallback = if action == RouteAction::AnalyzeAttachment {
            ATTACHMENT_ANALYSIS_FALLBACK
        } else {
            CANVAS_ANALYSIS_FALLBACK
        };
        let analysis = self.client.analyze(&bytes, question)?;
        if analysis.is_empty() {
            Ok((fallback.to_string(), None))
        } else {
            Ok((analysis, None))
        }
    }

    fn lock_transcript(&self) -> MutexGuard<'_, Transcript> {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
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

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use anyhow::{anyhow, Result};
    use sketchmat_contracts::chat::RouteAction;
    use sketchmat_contracts::conversation::{Role, TurnInput};
    use sketchmat_contracts::events::EventWriter;
    use sketchmat_contracts::image_ref::ImageReference;
    use sketchmat_contracts::params::AspectRatio;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Analyze(Vec<u8>, String),
        Transform(Vec<u8>, String),
    }

    struct RecordingClient {
        calls: Mutex<Vec<Call>>,
        analysis: String,
        render: Option<Vec<u8>>,
    }

    impl RecordingClient {
        fn new(analysis: &str, render: Option<&[u8]>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                analysis: analysis.to_string(),
                render: render.map(<[u8]>::to_vec),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl GenerationClient for RecordingClient {
        fn name(&self) -> &str {
            "recording"
        }

        fn analyze(&self, image: &[u8], question: &str) -> Result<String> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(Call::Analyze(image.to_vec(), question.to_string()));
            }
            Ok(self.analysis.clone())
        }

        fn transform(&self, image: &[u8], instruction: &str) -> Result<Option<Vec<u8>>> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(Call::Transform(image.to_vec(), instruction.to_string()));
            }
            Ok(self.render.clone())
        }

        fn generate_from_text(&self, _prompt: &str, _aspect_ratio: AspectRatio) -> Result<Vec<u8>> {
            Err(anyhow!("not used by the router"))
        }
    }

    struct FailingClient;

    impl GenerationClient for FailingClient {
        fn name(&self) -> &str {
            "failing"
        }

        fn analyze(&self, _image: &[u8], _question: &str) -> Result<String> {
            Err(anyhow!("503 service unavailable"))
        }

        fn transform(&self, _image: &[u8], _instruction: &str) -> Result<Option<Vec<u8>>> {
            Err(anyhow!("connection reset"))
        }

        fn generate_from_text(&self, _prompt: &str, _aspect_ratio: AspectRatio) -> Result<Vec<u8>> {
            Err(anyhow!("connection reset"))
        }
    }

    /// Blocks inside `analyze` until the test releases it.
    struct BlockingClient {
        entered: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
    }

    impl GenerationClient for BlockingClient {
        fn name(&self) -> &str {
            "blocking"
        }

        fn analyze(&self, _image: &[u8], _question: &str) -> Result<String> {
            self.entered
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .send(())?;
            self.release.lock().map_err(|_| anyhow!("poisoned"))?.recv()?;
            Ok("done".to_string())
        }

        fn transform(&self, _image: &[u8], _instruction: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn generate_from_text(&self, _prompt: &str, _aspect_ratio: AspectRatio) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn sketch() -> ImageReference {
        ImageReference::from_bytes(b"sketch-bytes", "image/png")
    }

    fn canvas() -> ImageReference {
        ImageReference::from_bytes(b"canvas-bytes", "image/png")
    }

    #[test]
    fn attachment_with_render_intent_transforms_first_attachment_only() -> Result<()> {
        let client = RecordingClient::new("unused", Some(b"render-bytes"));
        let router = ConversationRouter::new(client.clone());
        let input = TurnInput::with_attachments(
            "render this in walnut and concrete",
            vec![sketch(), ImageReference::from_bytes(b"second", "image/png")],
        );

        let outcome = router.submit(input, Some(&canvas()))?;

        assert_eq!(outcome.action, RouteAction::TransformAttachment);
        assert_eq!(
            client.calls(),
            vec![Call::Transform(
                b"sketch-bytes".to_vec(),
                "render this in walnut and concrete".to_string()
            )]
        );
        assert_eq!(outcome.model_turn.text, ACK_ATTACHMENT_RENDER);
        let produced = outcome.produced.ok_or_else(|| anyhow!("expected an image"))?;
        assert_eq!(produced.bytes, b"render-bytes".to_vec());
        assert_eq!(produced.prompt, "render this in walnut and concrete");
        assert_eq!(outcome.user_turn.images.len(), 2);
        assert!(!outcome.failed);
        Ok(())
    }

    #[test]
    fn attachment_without_render_intent_is_analyzed() -> Result<()> {
        let client = RecordingClient::new("A brutalist stair core.", Some(b"unused"));
        let router = ConversationRouter::new(client.clone());

        let outcome = router.submit(
            TurnInput::with_attachments("What era is this facade?", vec![sketch()]),
            None,
        )?;

        assert_eq!(outcome.action, RouteAction::AnalyzeAttachment);
        assert_eq!(
            client.calls(),
            vec![Call::Analyze(
                b"sketch-bytes".to_vec(),
                "What era is this facade?".to_string()
            )]
        );
        assert_eq!(outcome.model_turn.text, "A brutalist stair core.");
        assert!(outcome.produced.is_none());
        Ok(())
    }

    #[test]
    fn empty_attachment_analysis_uses_default_question_and_fallback() -> Result<()> {
        let client = RecordingClient::new("", None);
        let router = ConversationRouter::new(client.clone());

        let outcome = router.submit(TurnInput::with_attachments("", vec![sketch()]), None)?;

        assert_eq!(
            client.calls(),
            vec![Call::Analyze(
                b"sketch-bytes".to_vec(),
                DEFAULT_ANALYSIS_QUESTION.to_string()
            )]
        );
        assert_eq!(outcome.model_turn.text, ATTACHMENT_ANALYSIS_FALLBACK);
        Ok(())
    }

    #[test]
    fn whitespace_text_and_analysis_pass_through_as_given() -> Result<()> {
        let client = RecordingClient::new(" ", None);
        let router = ConversationRouter::new(client.clone());

        let outcome = router.submit(TurnInput::with_attachments("  ", vec![sketch()]), None)?;

        assert_eq!(
            client.calls(),
            vec![Call::Analyze(b"sketch-bytes".to_vec(), "  ".to_string())]
        );
        assert_eq!(outcome.model_turn.text, " ");
        Ok(())
    }

    #[test]
    fn attachment_render_without_image_reports_trouble() -> Result<()> {
        let router = ConversationRouter::new(RecordingClient::new("unused", None));

        let outcome = router.submit(
            TurnInput::with_attachments("Visualize it at night", vec![sketch()]),
            None,
        )?;

        assert_eq!(outcome.model_turn.text, ATTACHMENT_RENDER_EMPTY);
        assert!(outcome.produced.is_none());
        assert!(!outcome.failed);
        Ok(())
    }

    #[test]
    fn canvas_with_render_intent_transforms_canvas() -> Result<()> {
        let client = RecordingClient::new("unused", Some(b"adjusted"));
        let router = ConversationRouter::new(client.clone());

        let outcome = router.submit(TurnInput::text("MATERIALIZE with more glazing"), Some(&canvas()))?;

        assert_eq!(outcome.action, RouteAction::TransformCanvas);
        assert_eq!(
            client.calls(),
            vec![Call::Transform(
                b"canvas-bytes".to_vec(),
                "MATERIALIZE with more glazing".to_string()
            )]
        );
        assert_eq!(outcome.model_turn.text, ACK_CANVAS_RENDER);
        assert!(outcome.produced.is_some());

        let empty = ConversationRouter::new(RecordingClient::new("unused", None));
        let outcome = empty.submit(TurnInput::text("re-render it"), Some(&canvas()))?;
        assert_eq!(outcome.model_turn.text, CANVAS_RENDER_EMPTY);
        Ok(())
    }

    #[test]
    fn blank_text_with_canvas_analyzes_canvas() -> Result<()> {
        let client = RecordingClient::new("Strong horizontal datum lines.", None);
        let router = ConversationRouter::new(client.clone());

        let outcome = router.submit(TurnInput::text(""), Some(&canvas()))?;

        assert_eq!(outcome.action, RouteAction::AnalyzeCanvas);
        assert_eq!(
            client.calls(),
            vec![Call::Analyze(
                b"canvas-bytes".to_vec(),
                DEFAULT_ANALYSIS_QUESTION.to_string()
            )]
        );
        assert_eq!(outcome.model_turn.text, "Strong horizontal datum lines.");

        let silent = ConversationRouter::new(RecordingClient::new("", None));
        let outcome = silent.submit(TurnInput::text("thoughts?"), Some(&canvas()))?;
        assert_eq!(outcome.model_turn.text, CANVAS_ANALYSIS_FALLBACK);
        Ok(())
    }

    #[test]
    fn nothing_to_work_on_prompts_without_remote_call() -> Result<()> {
        let client = RecordingClient::new("unused", Some(b"unused"));
        let router = ConversationRouter::new(client.clone());

        let outcome = router.submit(TurnInput::text("render a villa"), None)?;

        assert_eq!(outcome.action, RouteAction::PromptForInput);
        assert!(client.calls().is_empty());
        assert_eq!(outcome.model_turn.text, PROMPT_FOR_INPUT);
        Ok(())
    }

    #[test]
    fn remote_failure_becomes_apology_turn() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let router = ConversationRouter::new(Arc::new(FailingClient))
            .with_events(EventWriter::new(&events_path, "session-1"));

        let outcome = router.submit(
            TurnInput::with_attachments("render it", vec![sketch()]),
            None,
        )?;

        assert!(outcome.failed);
        assert_eq!(outcome.model_turn.text, REMOTE_FAILURE_APOLOGY);
        assert!(!router.is_pending());

        let log = std::fs::read_to_string(&events_path)?;
        assert!(log.contains("\"type\":\"turn_failed\""));
        assert!(log.contains("connection reset"));
        assert!(log.contains("\"type\":\"turn_routed\""));
        Ok(())
    }

    #[test]
    fn unresolvable_canvas_is_treated_as_remote_failure() -> Result<()> {
        let client = RecordingClient::new("unused", None);
        let router = ConversationRouter::new(client.clone());
        let missing = ImageReference::handle("/no/such/render.png");

        let outcome = router.submit(TurnInput::text("what is this"), Some(&missing))?;

        assert!(outcome.failed);
        assert_eq!(outcome.model_turn.text, REMOTE_FAILURE_APOLOGY);
        assert!(client.calls().is_empty());
        Ok(())
    }

    #[test]
    fn canvas_fetch_error_is_treated_as_remote_failure() -> Result<()> {
        let (url, server) = crate::resolve::loopback::serve_once(404, b"gone")?;
        let client = RecordingClient::new("unused", None);
        let router = ConversationRouter::new(client.clone());

        let outcome = router.submit(
            TurnInput::text("what is this"),
            Some(&ImageReference::handle(url)),
        )?;

        server.join().map_err(|_| anyhow!("server panicked"))??;
        assert_eq!(outcome.action, RouteAction::AnalyzeCanvas);
        assert!(outcome.failed);
        assert_eq!(outcome.model_turn.text, REMOTE_FAILURE_APOLOGY);
        assert!(client.calls().is_empty());
        Ok(())
    }

    #[test]
    fn every_submission_appends_user_then_model_turn() -> Result<()> {
        let router = ConversationRouter::new(RecordingClient::new("ok", Some(b"img")));
        router.submit(TurnInput::text("hello"), None)?;
        router.submit(TurnInput::with_attachments("render", vec![sketch()]), None)?;

        let transcript = router.transcript();
        let roles: Vec<Role> = transcript.iter().map(|turn| turn.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User, Role::Model]);
        let ids: Vec<&str> = transcript.iter().map(|turn| turn.id.as_str()).collect();
        assert_eq!(ids, vec!["turn-1", "turn-2", "turn-3", "turn-4"]);
        Ok(())
    }

    #[test]
    fn overlapping_submission_is_rejected_while_pending() -> Result<()> {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let router = Arc::new(ConversationRouter::new(Arc::new(BlockingClient {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        })));

        let worker = {
            let router = Arc::clone(&router);
            thread::spawn(move || router.submit(TurnInput::text("first"), Some(&canvas())))
        };
        entered_rx.recv()?;

        assert!(router.is_pending());
        let rejected = router.submit(TurnInput::text("second"), Some(&canvas()));
        assert_eq!(rejected.err(), Some(SubmitError::Busy));

        release_tx.send(())?;
        let first = worker
            .join()
            .map_err(|_| anyhow!("worker panicked"))??;
        assert_eq!(first.model_turn.text, "done");
        assert!(!router.is_pending());
        assert_eq!(router.transcript().len(), 2);
        Ok(())
    }
}
