//! Intents typed at the prompt, parsed into commands for the session controller.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Generate { prompt: String },
    Edit { prompt: String },
    Previous,
    Next,
    NewImage,
    DismissError,
    Save,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "generate" | "gen" | "g" => ReplCommand::Generate {
            prompt: rest.to_string(),
        },
        "edit" | "e" => ReplCommand::Edit {
            prompt: rest.to_string(),
        },
        "prev" | "previous" | "p" => ReplCommand::Previous,
        "next" | "n" => ReplCommand::Next,
        "new" => ReplCommand::NewImage,
        "dismiss" | "d" => ReplCommand::DismissError,
        "save" | "download" => ReplCommand::Save,
        "status" | "s" => ReplCommand::Status,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => ReplCommand::Unknown(other.to_string()),
    }
}

pub const HELP: &str = "\
commands:
  generate <prompt>   create a new image (only when no image exists)
  edit <prompt>       edit the image currently shown
  prev / next         move through the image history
  new                 discard the history and start over
  dismiss             clear the last error
  save                write the current image to the output directory
  status              show the current session state
  quit                exit";

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
