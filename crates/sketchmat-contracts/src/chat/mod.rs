mod command_registry;
mod intent_parser;
mod render_intent;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use intent_parser::{parse_intent, Intent};
pub use render_intent::{classify_turn, is_render_request, RouteAction, RENDER_INTENT_KEYWORDS};
