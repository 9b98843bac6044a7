use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, IMAGINE_COMMAND, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, PARAMETER_COMMANDS,
    SELECT_COMMAND, SINGLE_PATH_COMMANDS,
};
use crate::params::{AspectRatio, LightingPreset, ParameterError, ParameterUpdate};

/// A parsed REPL line: either a slash command or a chat message to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }

    fn invalid(raw: &str, command: &str, error: String) -> Self {
        let mut intent = Intent::new("invalid", raw);
        intent
            .command_args
            .insert("command".to_string(), Value::String(command.to_string()));
        intent
            .command_args
            .insert("error".to_string(), Value::String(error));
        intent
    }

    /// Converts `settings_update` into a typed parameter update.
    pub fn parameter_update(&self) -> Result<ParameterUpdate, ParameterError> {
        let mut update = ParameterUpdate::default();
        if let Some(label) = self.settings_update.get("lighting").and_then(Value::as_str) {
            update.lighting = Some(label.parse::<LightingPreset>()?);
        }
        if let Some(value) = self.settings_update.get("consistency").and_then(Value::as_f64) {
            update.consistency = Some(value);
        }
        if let Some(value) = self.settings_update.get("style_reference") {
            update.style_reference = Some(value.as_str().map(str::to_string));
        }
        Ok(update)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn parse_parameter_command(command: &str, arg: &str, raw: &str) -> Intent {
    let action = find_action(command, PARAMETER_COMMANDS).unwrap_or("set_parameters");
    let mut intent = Intent::new(action, raw);
    match command {
        "lighting" => match arg.parse::<LightingPreset>() {
            Ok(preset) => {
                intent.settings_update.insert(
                    "lighting".to_string(),
                    Value::String(preset.label().to_string()),
                );
            }
            Err(err) => return Intent::invalid(raw, command, err.to_string()),
        },
        "consistency" => match arg.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                intent
                    .settings_update
                    .insert("consistency".to_string(), Value::from(value));
            }
            _ => {
                return Intent::invalid(
                    raw,
                    command,
                    format!("'{}' is not a number", arg.trim()),
                )
            }
        },
        _ => {
            let path = parse_single_path_arg(arg);
            intent.settings_update.insert(
                "style_reference".to_string(),
                if path.is_empty() {
                    Value::Null
                } else {
                    Value::String(path)
                },
            );
        }
    }
    intent
}

fn parse_imagine_args(arg: &str, raw: &str) -> Intent {
    let trimmed = arg.trim();
    let (aspect_ratio, prompt) = match trimmed.split_once(char::is_whitespace) {
        Some((head, tail)) => match head.parse::<AspectRatio>() {
            Ok(ratio) => (ratio, tail.trim()),
            Err(_) => (AspectRatio::default(), trimmed),
        },
        None => match trimmed.parse::<AspectRatio>() {
            Ok(ratio) => (ratio, ""),
            Err(_) => (AspectRatio::default(), trimmed),
        },
    };
    if prompt.is_empty() {
        return Intent::invalid(raw, IMAGINE_COMMAND.command, "a prompt is required".to_string());
    }
    let mut intent = Intent::new(IMAGINE_COMMAND.action, raw);
    intent.prompt = Some(prompt.to_string());
    intent.command_args.insert(
        "aspect_ratio".to_string(),
        Value::String(aspect_ratio.as_str().to_string()),
    );
    intent
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if find_action(&command, PARAMETER_COMMANDS).is_some() {
                return parse_parameter_command(&command, arg, text);
            }

            if command == IMAGINE_COMMAND.command {
                return parse_imagine_args(arg, text);
            }

            if command == SELECT_COMMAND.command {
                return match arg.parse::<i64>() {
                    Ok(id) => {
                        let mut intent = Intent::new(SELECT_COMMAND.action, text);
                        intent
                            .command_args
                            .insert("id".to_string(), Value::Number(id.into()));
                        intent
                    }
                    Err(_) => Intent::invalid(
                        text,
                        SELECT_COMMAND.command,
                        format!("'{arg}' is not a gallery id"),
                    ),
                };
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, MULTI_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "paths".to_string(),
                    Value::Array(
                        parse_path_args(arg)
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    ),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("send", text);
    intent.prompt = Some(text.to_string());
    intent
}
