use serde::{Deserialize, Serialize};

/// Case-insensitive substrings that mark a turn as asking for an image rather
/// than an analysis. Matching is by substring, so "rendering" and "re-render"
/// both count.
pub const RENDER_INTENT_KEYWORDS: &[&str] = &["render", "visualize", "materialize"];

pub fn is_render_request(text: &str) -> bool {
    let lowered = text.to_lowercase();
    RENDER_INTENT_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// The five mutually exclusive ways a user turn can be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    TransformAttachment,
    AnalyzeAttachment,
    TransformCanvas,
    AnalyzeCanvas,
    PromptForInput,
}

impl RouteAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteAction::TransformAttachment => "transform_attachment",
            RouteAction::AnalyzeAttachment => "analyze_attachment",
            RouteAction::TransformCanvas => "transform_canvas",
            RouteAction::AnalyzeCanvas => "analyze_canvas",
            RouteAction::PromptForInput => "prompt_for_input",
        }
    }

    pub fn is_transform(self) -> bool {
        matches!(
            self,
            RouteAction::TransformAttachment | RouteAction::TransformCanvas
        )
    }
}

/// First match wins; the order of these checks is part of the contract.
pub fn classify_turn(text: &str, attachment_count: usize, has_canvas: bool) -> RouteAction {
    let render = is_render_request(text);
    if attachment_count > 0 && render {
        RouteAction::TransformAttachment
    } else if attachment_count > 0 {
        RouteAction::AnalyzeAttachment
    } else if has_canvas && render {
        RouteAction::TransformCanvas
    } else if has_canvas {
        RouteAction::AnalyzeCanvas
    } else {
        RouteAction::PromptForInput
    }
}
