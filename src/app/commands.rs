use std::io::{BufRead, Write};

use anyhow::anyhow;

/// Terminal the shell reads commands from and writes results to.
pub struct Console<'a> {
    pub input: &'a mut dyn BufRead,
    pub output: &'a mut dyn Write,
}

pub type Handler<S> = fn(&mut S, &str, &mut Console) -> anyhow::Result<()>;

/// One entry of a shell's dispatch table.
pub struct Command<S> {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub handler: Handler<S>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub fn write_help<S>(commands: &[Command<S>], output: &mut dyn Write) -> anyhow::Result<()> {
    let width = commands
        .iter()
        .map(|command| command.usage.len())
        .chain(["exit, quit".len()])
        .max()
        .unwrap_or_default();
    for command in commands {
        writeln!(output, "  {:width$}  {}", command.usage, command.help, width = width)?;
    }
    writeln!(output, "  {:width$}  {}", "help", "Show this help", width = width)?;
    writeln!(output, "  {:width$}  {}", "exit, quit", "Leave the shell", width = width)?;
    Ok(())
}

/// Run one command line against the dispatch table.
pub fn dispatch<S>(
    commands: &[Command<S>],
    state: &mut S,
    line: &str,
    console: &mut Console,
) -> anyhow::Result<Flow> {
    let line = line.trim();
    let (name, args) = match line.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (line, ""),
    };
    match name {
        "" => return Ok(Flow::Continue),
        "exit" | "quit" => return Ok(Flow::Exit),
        "help" => {
            write_help(commands, console.output)?;
            return Ok(Flow::Continue);
        }
        _ => {}
    }
    let command = commands
        .iter()
        .find(|command| command.name == name)
        .ok_or_else(|| anyhow!("Unknown command '{}', type 'help' to list commands", name))?;
    log::debug!("Running '{}' with arguments {:?}", command.name, args);
    (command.handler)(state, args, console)?;
    Ok(Flow::Continue)
}

/// Run one command line, reporting a failing command on the console instead of returning its
/// error. Only a failure to write to the console is returned.
pub fn execute_line<S>(
    commands: &[Command<S>],
    state: &mut S,
    line: &str,
    console: &mut Console,
) -> anyhow::Result<Flow> {
    match dispatch(commands, state, line, console) {
        Ok(flow) => Ok(flow),
        Err(err) => {
            log::debug!("Command failed: {:?}", err);
            writeln!(console.output, "Error: {:#}", err)?;
            Ok(Flow::Continue)
        }
    }
}

/// Read commands from the console input until `exit` or end of input. A failing command is
/// reported and the shell carries on.
pub fn run_shell<S>(
    prompt: &str,
    commands: &[Command<S>],
    state: &mut S,
    console: &mut Console,
) -> anyhow::Result<()> {
    loop {
        write!(console.output, "{}> ", prompt)?;
        console.output.flush()?;
        let mut line = String::new();
        if console.input.read_line(&mut line)? == 0 {
            writeln!(console.output)?;
            return Ok(());
        }
        if execute_line(commands, state, &line, console)? == Flow::Exit {
            return Ok(());
        }
    }
}
