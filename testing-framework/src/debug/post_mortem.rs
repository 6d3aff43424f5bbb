//! Line oriented post-mortem inspector
//!
//! Reads commands from any `BufRead` and answers on any `Write`, production
//! uses stdin and stdout. The session ends on `continue`, `quit` or end of
//! input.

use super::{PostMortem, PostMortemSession};
use crate::runtime::format_run_info;
use log::warn;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};

const PROMPT: &str = "(post-mortem) ";

const HELP: &str = "\
Commands:
  where     (w)  unit that faulted and how long it ran
  fault     (f)  the fault with its causes
  units     (u)  units still alive
  continue  (c)  leave the session, the suite carries on
  quit      (q)  same as continue
  help      (h)  this message";

enum Command {
    Where,
    Fault,
    Units,
    Continue,
    Help,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let command = match line.trim() {
            "" => return None,
            "where" | "w" | "bt" => Self::Where,
            "fault" | "f" | "p" => Self::Fault,
            "units" | "u" => Self::Units,
            "continue" | "c" | "quit" | "q" | "exit" => Self::Continue,
            "help" | "h" | "?" => Self::Help,
            other => Self::Unknown(other.to_string()),
        };
        Some(command)
    }
}

struct Terminal<R, W> {
    input: R,
    output: W,
}

/// Interactive inspector over a reader and a writer
pub struct InteractivePostMortem<R, W> {
    terminal: Mutex<Terminal<R, W>>,
}

impl InteractivePostMortem<BufReader<Stdin>, Stdout> {
    /// Inspector on the process's terminal
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead + Send, W: Write + Send> InteractivePostMortem<R, W> {
    /// Inspector reading `input` and answering on `output`
    pub fn new(input: R, output: W) -> Self {
        Self {
            terminal: Mutex::new(Terminal { input, output }),
        }
    }

    /// Give back the reader and the writer
    pub fn into_inner(self) -> (R, W) {
        let terminal = self.terminal.into_inner();
        (terminal.input, terminal.output)
    }

    fn run(&self, session: &PostMortemSession) -> io::Result<()> {
        let mut terminal = self.terminal.lock();
        let Terminal { input, output } = &mut *terminal;

        writeln!(
            output,
            "*** Unhandled fault in {} {}: {}",
            session.unit, session.name, session.fault
        )?;
        writeln!(output, "Entering post-mortem session, type `help` for commands")?;

        let mut line = String::new();
        loop {
            write!(output, "{}", PROMPT)?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(output)?;
                break;
            }

            match Command::parse(&line) {
                None => continue,
                Some(Command::Where) => writeln!(
                    output,
                    "{} {} ({:?}) alive for {:.3}s",
                    session.unit,
                    session.name,
                    session.kind,
                    session.age.as_secs_f64()
                )?,
                Some(Command::Fault) => writeln!(output, "{}", session.fault)?,
                Some(Command::Units) => {
                    writeln!(output, "{}", format_run_info(&session.live_units))?
                }
                Some(Command::Help) => writeln!(output, "{}", HELP)?,
                Some(Command::Continue) => break,
                Some(Command::Unknown(command)) => writeln!(
                    output,
                    "Unknown command `{}`, type `help` for commands",
                    command
                )?,
            }
        }

        writeln!(output, "Leaving post-mortem session")?;
        output.flush()
    }
}

impl<R: BufRead + Send, W: Write + Send> PostMortem for InteractivePostMortem<R, W> {
    fn open(&self, session: &PostMortemSession) {
        if let Err(err) = self.run(session) {
            warn!("Post-mortem session ended on I/O error: {}", err);
        }
    }
}
