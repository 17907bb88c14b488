//! Line-oriented command scripts for driving an editor session.
//!
//! One command per line, coordinates in view pixels. Blank lines and lines
//! starting with `#` are skipped.

use std::io::BufRead;
use std::str::FromStr;

use roiscope_core::Point;
use roiscope_editor::{EditorError, EditorSession, UndoOutcome};

use crate::{CliError, Result};

/// One editor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Draw,
    Point(Point),
    Pop,
    Commit,
    Cancel,
    Click(Point),
    Delete,
    DeleteAt(Point),
    Undo,
    Zoom(Point, Point),
    ResetZoom,
    Save,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or("empty command")?;
        let args: Vec<i32> = words
            .map(|w| w.parse().map_err(|_| format!("bad coordinate {w:?}")))
            .collect::<std::result::Result<_, _>>()?;

        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(format!("{name} takes {n} arguments, got {}", args.len()))
            }
        };
        let point = |i: usize| Point::new(args[i], args[i + 1]);

        let command = match name {
            "draw" => arity(0).map(|()| Self::Draw),
            "point" => arity(2).map(|()| Self::Point(point(0))),
            "pop" => arity(0).map(|()| Self::Pop),
            "commit" => arity(0).map(|()| Self::Commit),
            "cancel" => arity(0).map(|()| Self::Cancel),
            "click" => arity(2).map(|()| Self::Click(point(0))),
            "delete" => arity(0).map(|()| Self::Delete),
            "delete-at" => arity(2).map(|()| Self::DeleteAt(point(0))),
            "undo" => arity(0).map(|()| Self::Undo),
            "zoom" => arity(4).map(|()| Self::Zoom(point(0), point(2))),
            "reset-zoom" => arity(0).map(|()| Self::ResetZoom),
            "save" => arity(0).map(|()| Self::Save),
            "quit" => arity(0).map(|()| Self::Quit),
            other => Err(format!("unknown command {other:?}")),
        }?;
        Ok(command)
    }
}

/// Parse a whole script.
///
/// # Errors
/// Returns [`CliError::Script`] with the 1-based line number of the first
/// line that does not parse.
pub fn parse<R: BufRead>(input: R) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = line.parse().map_err(|message| CliError::Script {
            line: index + 1,
            message,
        })?;
        commands.push(command);
    }
    Ok(commands)
}

/// Apply commands to a session until the end or `quit`.
///
/// Editing errors are reported and the script continues; save failures stop
/// it. Returns the number of commands applied.
///
/// # Errors
/// Returns [`CliError::Editor`] if a `save` fails.
pub fn run(session: &mut EditorSession, commands: &[Command]) -> Result<usize> {
    let mut applied = 0;
    for &command in commands {
        applied += 1;
        match apply(session, command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e @ (EditorError::Io(_) | EditorError::NoRoiPath)) => return Err(e.into()),
            Err(e) => log::warn!("{command:?}: {e}"),
        }
    }
    Ok(applied)
}

/// Returns `Ok(false)` on `quit`.
fn apply(session: &mut EditorSession, command: Command) -> roiscope_editor::Result<bool> {
    match command {
        Command::Draw => session.start_drawing(),
        Command::Point(p) => {
            if !session.add_point(p) {
                log::warn!("point {} {} ignored: not drawing", p.x, p.y);
            }
        }
        Command::Pop => {
            session.remove_last_point();
        }
        Command::Commit => {
            let roi = session.commit_polygon()?;
            log::info!("added ROI {}", roi.label);
        }
        Command::Cancel => session.cancel_drawing(),
        Command::Click(p) => match session.click(p) {
            Some(index) => log::info!("selected ROI {}", session.rois()[index].label),
            None => log::info!("selection cleared"),
        },
        Command::Delete => {
            if let Some(roi) = session.delete_selected()? {
                log::info!("deleted ROI {}", roi.label);
            }
        }
        Command::DeleteAt(p) => {
            if let Some(roi) = session.delete_at(p)? {
                log::info!("deleted ROI {}", roi.label);
            }
        }
        Command::Undo => {
            if let UndoOutcome::Restored { index } = session.undo()? {
                log::info!("restored ROI {}", session.rois()[index].label);
            }
        }
        Command::Zoom(a, b) => {
            session.begin_zoom_selection(a);
            session.update_zoom_selection(b);
            session.finish_zoom_selection()?;
        }
        Command::ResetZoom => session.reset_zoom(),
        Command::Save => session.save()?,
        Command::Quit => return Ok(false),
    }
    Ok(true)
}
