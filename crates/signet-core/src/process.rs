//! External tool invocation.

use tokio::process::Command;

/// Command for `program`; the child is killed when its handle is dropped.
pub(crate) fn command(program: &str) -> Command {
    let mut command = Command::new(program);
    command.kill_on_drop(true);
    command
}
