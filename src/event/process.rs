//! Runs one handler command and streams its output.

use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, PipeReader};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::debug;

/// A running handler. stdout and stderr share one pipe, stdin is
/// `/dev/null`.
#[derive(Debug)]
pub struct HandlerProcess {
    child: Child,
    output: BufReader<PipeReader>,
}

impl HandlerProcess {
    /// Starts `shell -c command` in `dir` with `env` added to the
    /// environment.
    pub fn spawn<'a, I>(shell: &Path, command: &str, dir: &Path, env: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a OsStr)>,
    {
        let (reader, writer) = io::pipe()?;
        let child = {
            let mut cmd = Command::new(shell);
            cmd.arg("-c")
                .arg(command)
                .current_dir(dir)
                .envs(env)
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer);
            // Our write ends close with `cmd`, so EOF comes once the child
            // and its descendants are done writing.
            cmd.spawn()?
        };
        Ok(Self {
            child,
            output: BufReader::new(reader),
        })
    }

    /// Next line of output without its newline, or `None` at EOF. Bytes
    /// that aren't UTF-8 are replaced.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        if self.output.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Kills the handler and reaps it.
    pub fn kill(mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Can't kill handler {}: {}", self.child.id(), e);
        }
        if let Err(e) = self.child.wait() {
            debug!("Can't reap handler {}: {}", self.child.id(), e);
        }
    }

    /// Waits for the handler and returns its exit code.
    pub fn wait(mut self) -> io::Result<i32> {
        let status = self.child.wait()?;
        Ok(exit_code(status))
    }
}

/// Shell convention: the exit code, or 128 + N for death by signal N.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run(command: &str) -> (Vec<String>, i32) {
        let dir = tempdir().unwrap();
        let mut handler = HandlerProcess::spawn(
            Path::new("/bin/sh"),
            command,
            dir.path(),
            [("DUMPSTER_TEST", OsStr::new("42"))],
        )
        .unwrap();
        let mut lines = Vec::new();
        while let Some(line) = handler.next_line().unwrap() {
            lines.push(line);
        }
        (lines, handler.wait().unwrap())
    }

    #[test]
    fn stdout_and_stderr_are_merged_in_order() {
        let (lines, code) = run("echo one; echo two >&2; echo three");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(code, 0);
    }

    #[test]
    fn exit_code_is_returned() {
        assert_eq!(run("exit 3").1, 3);
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        assert_eq!(run("kill -TERM $$").1, 128 + 15);
        assert_eq!(run("kill -KILL $$").1, 128 + 9);
    }

    #[test]
    fn environment_and_directory_are_set() {
        let (lines, _) = run("echo $DUMPSTER_TEST; pwd");
        assert_eq!(lines[0], "42");
        assert!(!lines[1].is_empty());
    }

    #[test]
    fn stdin_is_empty() {
        let (lines, code) = run("cat; echo done");
        assert_eq!(lines, vec!["done"]);
        assert_eq!(code, 0);
    }

    #[test]
    fn last_line_without_newline_is_kept() {
        let (lines, _) = run("printf 'a\\nb'");
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn kill_reaps_a_running_handler() {
        let dir = tempdir().unwrap();
        let handler = HandlerProcess::spawn(
            Path::new("/bin/sh"),
            "exec sleep 30",
            dir.path(),
            std::iter::empty::<(&str, &OsStr)>(),
        )
        .unwrap();
        let pid = nix::unistd::Pid::from_raw(handler.id() as i32);
        handler.kill();
        // Reaped, so the pid no longer names a process or a zombie.
        assert_eq!(
            nix::sys::signal::kill(pid, None),
            Err(nix::errno::Errno::ESRCH)
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let (lines, _) = run("printf 'x\\377y\\n'");
        assert_eq!(lines, vec!["x\u{fffd}y"]);
    }
}
