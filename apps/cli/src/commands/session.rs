//! Interactive segmentation console.
//!
//! Plays the role of the viewer: `open` and `close` register and destroy
//! images, everything else goes to the segmentation editor.

use std::collections::{BTreeMap, HashSet};

use anyhow::Context;
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use tokio::io::{AsyncBufReadExt, BufReader};
use tubeseg_core::rpc::transport::WebSocketConnector;
use tubeseg_core::{
    ClientConfig, EntityId, ImageSource, SegmentOutcome, SegmentationEditor, Session, Tube, TubeApi,
};

use super::console::{self, ConsoleCommand};

/// Execute the session command.
pub async fn execute(config: &ClientConfig) -> anyhow::Result<()> {
    let session_config = config.session();
    let url = session_config.endpoint.url();
    let session = Session::new(session_config, WebSocketConnector::new());
    session.connect().await.with_context(|| format!("Backend at {} is not reachable", url))?;
    println!("{} {}", "Connected to".green(), url);

    let mut console = Console::new(SegmentationEditor::new(TubeApi::new(&session)));
    console.editor.append_log(&format!("Connected to {}", url));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match console::parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => console.run(command).await,
            Err(message) => eprintln!("{}", message.red()),
        }
    }

    session.close();
    Ok(())
}

struct Console {
    editor: SegmentationEditor,
    images: BTreeMap<EntityId, ImageSource>,
}

impl Console {
    fn new(editor: SegmentationEditor) -> Self {
        Self { editor, images: BTreeMap::new() }
    }

    async fn run(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Open { id, path } => {
                println!("Opened {} ({})", id.as_str().bold(), path.dimmed());
                self.images.insert(id.clone(), ImageSource { id, path });
            }
            ConsoleCommand::Select(None) => {
                if self.editor.select_image(None).await.is_ok() {
                    println!("Selection cleared");
                }
            }
            ConsoleCommand::Select(Some(id)) => {
                let Some(source) = self.images.get(&id).cloned() else {
                    eprintln!("{}", format!("Unknown image: {}", id).red());
                    return;
                };
                match self.editor.select_image(Some(source)).await {
                    Ok(()) => println!("Selected {}", id.as_str().bold()),
                    Err(err) => report(&err),
                }
            }
            ConsoleCommand::Close(id) => {
                if self.images.remove(&id).is_none() {
                    eprintln!("{}", format!("Unknown image: {}", id).red());
                    return;
                }
                let live: HashSet<EntityId> = self.images.keys().cloned().collect();
                match self.editor.retain_images(&live).await {
                    Ok(_) => println!("Closed {}", id.as_str().bold()),
                    Err(err) => report(&err),
                }
            }
            ConsoleCommand::Segment(ijk) => match self.editor.segment_at(ijk).await {
                Ok(SegmentOutcome::Added(uid)) => println!("{} {}", "Added tube".green(), uid),
                Ok(SegmentOutcome::NoTube) => println!("{}", "No tube found".yellow()),
                Ok(SegmentOutcome::Stale) => println!("{}", "Image changed, result dropped".yellow()),
                Ok(SegmentOutcome::Disabled) => println!("{}", "Segmentation is disabled".yellow()),
                Err(err) => report(&err),
            },
            ConsoleCommand::Scale(None) => println!("Scale: {}", self.editor.scale()),
            ConsoleCommand::Scale(Some(text)) => match self.editor.set_scale_text(&text) {
                Ok(scale) => println!("Scale: {}", scale),
                Err(err) => report(&err),
            },
            ConsoleCommand::Enable(enabled) => {
                if let Err(err) = self.editor.set_segmentation_enabled(enabled) {
                    report(&err);
                } else {
                    println!("Segmentation {}", if enabled { "enabled" } else { "disabled" });
                }
            }
            ConsoleCommand::Delete(uid) => match self.editor.delete_tube(uid).await {
                Ok(()) => println!("Deleted tube {}", uid),
                Err(err) => report(&err),
            },
            ConsoleCommand::Toggle(uid) => {
                if self.editor.toggle_visibility(uid) {
                    println!("Toggled tube {}", uid);
                } else {
                    eprintln!("{}", format!("No tube {}", uid).red());
                }
            }
            ConsoleCommand::Save(path) => match self.editor.save_tubes(&path).await {
                Ok(()) => println!("Saved tubes to {}", path),
                Err(err) => report(&err),
            },
            ConsoleCommand::Tubes => println!("{}", tube_table(&self.editor.tubes())),
            ConsoleCommand::Images => self.print_images(),
            ConsoleCommand::Log => print!("{}", self.editor.output_log().contents()),
            ConsoleCommand::ClearLog => self.editor.clear_log(),
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::Quit => {}
        }
    }

    fn print_images(&self) {
        if self.images.is_empty() {
            println!("{}", "No images open".dimmed());
            return;
        }
        let active = self.editor.active_image();
        for (id, source) in &self.images {
            let marker = if active.as_ref() == Some(id) { "*" } else { " " };
            let loaded = self.editor.image_id(id).map_or_else(|| "-".to_string(), |image| image.to_string());
            println!("{} {} {} (backend id {})", marker, id.as_str().bold(), source.path.dimmed(), loaded);
        }
    }
}

fn report(err: &tubeseg_core::EditorError) {
    eprintln!("{} {}", "Error:".red().bold(), err);
}

fn tube_table(tubes: &[Tube]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Parent", "Points", "Visible"]);

    for tube in tubes {
        let parent = tube.parent().map_or_else(|| "-".to_string(), |p| p.to_string());
        let visible = if tube.is_visible() {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(tube.uid()),
            Cell::new(parent),
            Cell::new(tube.points().len()),
            visible,
        ]);
    }
    table
}
