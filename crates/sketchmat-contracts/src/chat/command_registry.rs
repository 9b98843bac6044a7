#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const PARAMETER_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "lighting",
        action: "set_parameters",
    },
    CommandSpec {
        command: "consistency",
        action: "set_parameters",
    },
    CommandSpec {
        command: "style",
        action: "set_parameters",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "export",
    action: "export",
}];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "attach",
    action: "attach",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "detach",
        action: "clear_attachments",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub(crate) const SELECT_COMMAND: CommandSpec = CommandSpec {
    command: "select",
    action: "select_history",
};

pub(crate) const IMAGINE_COMMAND: CommandSpec = CommandSpec {
    command: "imagine",
    action: "imagine",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/attach",
    "/detach",
    "/lighting",
    "/consistency",
    "/style",
    "/imagine",
    "/history",
    "/select",
    "/export",
    "/status",
    "/help",
];
