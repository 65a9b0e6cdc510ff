use super::{Cli, Commands, SessionArgs, exec_command, languages_command, repl_command, task_command};
use anyhow::Result;

pub(crate) fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Repl { session }) => repl_command(session),
        Some(Commands::Task {
            prompt,
            file,
            session,
        }) => task_command(prompt, file, session),
        Some(Commands::Exec { source, session }) => exec_command(source, session),
        Some(Commands::Languages { probe }) => languages_command(probe),
        None => repl_command(SessionArgs::default()),
    }
}
