//! Line-oriented control surface: `a amp phase freq`, `r freq`, `l`, `q`.

use std::io::{BufRead, Write};

use tonebank_core::control::{self, ControlReply, LineCommand};
use tonebank_core::{SynthError, WaveTable};
use tracing::{debug, error, warn};

const PROMPT: &str = "input command (a, r, l, q): ";

/// Serve commands from `input` until `q`, end of input, or until `fault`
/// reports that the stream behind the table has halted.
pub fn run<R, W, F>(table: &WaveTable, input: R, mut output: W, fault: F) -> anyhow::Result<()>
where
    R: BufRead,
    W: Write,
    F: Fn() -> Option<SynthError>,
{
    let mut lines = input.lines();
    loop {
        if let Some(err) = fault() {
            error!(%err, "stream halted, leaving command loop");
            writeln!(output, "stream halted: {err}")?;
            break;
        }

        write!(output, "{PROMPT}")?;
        output.flush()?;

        let Some(line) = lines.next() else {
            writeln!(output)?;
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<LineCommand>() {
            Ok(LineCommand::Quit) => break,
            Ok(LineCommand::List) => {
                for (i, wave) in table.snapshot().iter().enumerate() {
                    writeln!(output, "{i}: {wave}")?;
                }
            }
            Ok(LineCommand::Apply(command)) => match control::apply(table, command) {
                Ok(ControlReply::Added { count }) => writeln!(output, "{count} waves")?,
                Ok(ControlReply::Removed(outcome)) => writeln!(
                    output,
                    "removed {}, {} waves",
                    outcome.removed, outcome.remaining
                )?,
                Err(e) => {
                    warn!(error = %e, "command failed");
                    writeln!(output, "error: {e}")?;
                }
            },
            Err(e) => {
                debug!(%line, "unparsable command");
                writeln!(output, "error: {e}")?;
            }
        }
    }
    Ok(())
}
