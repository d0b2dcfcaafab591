use std::io::IsTerminal;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::commands::{execute_line, run_shell, Command, Console, Flow};

/// Run a shell on standard input.
///
/// On a terminal lines are read with line editing and history for the session. Ctrl-C discards
/// the current line, Ctrl-D leaves the shell like `exit`. Piped input is read as a script.
pub fn run_terminal_shell<S>(
    prompt: &str,
    commands: &[Command<S>],
    state: &mut S,
) -> anyhow::Result<()> {
    if !std::io::stdin().is_terminal() {
        log::debug!("Standard input is not a terminal, reading commands as a script");
        let mut input = std::io::stdin().lock();
        let mut output = std::io::stdout();
        let mut console = Console {
            input: &mut input,
            output: &mut output,
        };
        return run_shell(prompt, commands, state, &mut console);
    }

    let mut editor = DefaultEditor::new()?;
    let prompt = format!("{}> ", prompt);
    loop {
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if !line.trim().is_empty() {
            editor.add_history_entry(line.as_str())?;
        }
        // Commands such as `connect` prompt for more input.
        let mut input = std::io::stdin().lock();
        let mut output = std::io::stdout();
        let mut console = Console {
            input: &mut input,
            output: &mut output,
        };
        if execute_line(commands, state, &line, &mut console)? == Flow::Exit {
            return Ok(());
        }
    }
}
