//! Console command parsing.

use tubeseg_core::{EntityId, TubeUid};

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Register an image backed by `path`.
    Open { id: EntityId, path: String },
    /// Select an image, or nothing.
    Select(Option<EntityId>),
    /// Destroy an image.
    Close(EntityId),
    /// Segment at a voxel of the active image.
    Segment([i64; 3]),
    /// Show (`None`) or set the scale.
    Scale(Option<String>),
    Enable(bool),
    Delete(TubeUid),
    Toggle(TubeUid),
    Save(String),
    Tubes,
    Images,
    Log,
    ClearLog,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  open <id> <path>   register an image file
  select <id>|none   select an image
  close <id>         close an image
  segment <i> <j> <k> segment a tube at a voxel
  scale [value]      show or set the segmentation scale
  enable on|off      switch segmentation on or off
  delete <uid>       delete a tube
  toggle <uid>       show or hide a tube
  save <path>        save the tubes of the selected image
  tubes              list the tubes of the selected image
  images             list open images
  log                print the output log
  clear-log          clear the output log
  quit               exit";

/// Parse one line. `Ok(None)` for blank lines and comments.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match (name, rest.as_slice()) {
        ("open", [id, path @ ..]) if !path.is_empty() => {
            ConsoleCommand::Open { id: EntityId::from(*id), path: path.join(" ") }
        }
        ("select", ["none"]) => ConsoleCommand::Select(None),
        ("select", [id]) => ConsoleCommand::Select(Some(EntityId::from(*id))),
        ("close", [id]) => ConsoleCommand::Close(EntityId::from(*id)),
        ("segment", [i, j, k]) => ConsoleCommand::Segment([voxel(i)?, voxel(j)?, voxel(k)?]),
        ("scale", []) => ConsoleCommand::Scale(None),
        ("scale", [value]) => ConsoleCommand::Scale(Some((*value).to_string())),
        ("enable", ["on"]) => ConsoleCommand::Enable(true),
        ("enable", ["off"]) => ConsoleCommand::Enable(false),
        ("delete", [uid]) => ConsoleCommand::Delete(tube_uid(uid)?),
        ("toggle", [uid]) => ConsoleCommand::Toggle(tube_uid(uid)?),
        ("save", path) if !path.is_empty() => ConsoleCommand::Save(path.join(" ")),
        ("tubes", []) => ConsoleCommand::Tubes,
        ("images", []) => ConsoleCommand::Images,
        ("log", []) => ConsoleCommand::Log,
        ("clear-log", []) => ConsoleCommand::ClearLog,
        ("help", []) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        _ => return Err(format!("Unrecognized command: {} (type 'help')", line)),
    };
    Ok(Some(command))
}

fn voxel(text: &str) -> Result<i64, String> {
    text.parse().map_err(|_| format!("Invalid voxel coordinate: {}", text))
}

fn tube_uid(text: &str) -> Result<TubeUid, String> {
    text.parse().map(TubeUid).map_err(|_| format!("Invalid tube id: {}", text))
}
