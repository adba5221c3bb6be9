//! Shell driver: an interactive shell attached to a pseudo-terminal.
//!
//! Commands are written to the shell line by line and their output is read back
//! until no new line arrives within `timeout`. Because the shell runs on a PTY,
//! everything sent is echoed back and output carries terminal control
//! sequences; both are filtered before lines are returned. After each command
//! the driver sends `echo $?` to learn its return code.
//!
//! `initialize` does not return until the shell has echoed a ready marker, so
//! whatever its startup files print never reaches the first command.
//!
//! Step params:
//!
//! | param                | default | meaning                                     |
//! |----------------------|---------|---------------------------------------------|
//! | `shell`              | `bash`  | program to spawn, looked up on `PATH`       |
//! | `args`               | `[]`    | arguments for the shell                     |
//! | `cwd`                | cwd     | working directory                           |
//! | `env`                | `{}`    | extra environment variables                 |
//! | `timeout`            | `2`     | seconds to wait for each line               |
//! | `debug`              | `false` | print captured lines to stdout              |
//! | `strict_return_code` | `false` | fail when the return code cannot be parsed  |
//!
//! A command is either a string or a mapping `{cmd, expect}`, with templates
//! already rendered by the step. With `expect`, the driver first waits for that
//! pattern (e.g. `password:`), then sends `cmd`; the return-code probe is
//! skipped and the text is not logged.

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize,
};
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use serde_json::Value;

use crate::action::{Action, ActionConfig, LineSink};
use crate::cancel::CancelToken;
use crate::error::{Result, VonzyError};
use crate::shell_env;
use crate::workflow::context::Context;
use crate::workflow::schema::CommandBody;

const DEFAULT_SHELL: &str = "bash";
const DEFAULT_TIMEOUT_SECS: f64 = 2.0;
const PTY_ROWS: u16 = 24;
/// Wide enough that echoed commands never wrap.
const PTY_COLS: u16 = 1000;
const POLL_SLICE: Duration = Duration::from_millis(50);
const DELAY_BEFORE_SEND: Duration = Duration::from_millis(100);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const READY_MARKER: &str = "__vonzy_ready_";
/// Output chunks examined for the echoed command before giving up on it.
const ECHO_SCAN_LINES: usize = 8;
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const LINE_BREAK: &str = r"\r\n|\n|\r";
const RETURN_CODE_PROBE: &str = "echo $?";

/// Strip CSI and OSC sequences plus carriage returns and newlines.
pub fn clean(text: &str) -> String {
    static CONTROL: OnceLock<Regex> = OnceLock::new();
    let control = CONTROL.get_or_init(|| {
        Regex::new(r"\x1B\][^\x07\x1B]*(\x07|\x1B\\)|(\x{9B}|\x1B\[)[0-?]*[ -/]*[@-~]")
            .expect("static control-sequence pattern is valid")
    });
    control
        .replace_all(text, "")
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect()
}

#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub debug: bool,
    pub strict_return_code: bool,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            debug: false,
            strict_return_code: false,
        }
    }
}

impl ShellSettings {
    pub fn from_config(config: &ActionConfig) -> Result<Self> {
        let timeout = config.f64_param("timeout")?.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(VonzyError::InvalidAction(format!(
                "Action '{}': timeout must be a positive number of seconds",
                config.name
            )));
        }

        Ok(Self {
            shell: config
                .str_param("shell")?
                .unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            args: config.list_param("args")?,
            cwd: config.str_param("cwd")?,
            env: config.map_param("env")?,
            timeout: Duration::from_secs_f64(timeout),
            debug: config.bool_param("debug")?.unwrap_or(false),
            strict_return_code: config.bool_param("strict_return_code")?.unwrap_or(false),
        })
    }
}

enum Expect {
    Matched { before: Vec<u8>, matched: Vec<u8> },
    Timeout,
    Eof,
}

/// A live shell: PTY master, writer, child and the reader thread's channel.
struct Session {
    _master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    output: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    eof: bool,
}

impl Session {
    fn spawn(settings: &ShellSettings, program: &str) -> Result<Self> {
        let resource = |what: &str, e: &dyn std::fmt::Display| {
            VonzyError::Resource(format!("{} for '{}': {}", what, settings.shell, e))
        };

        let PtyPair { master, slave } = native_pty_system()
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| resource("Failed to open PTY", &e))?;

        let mut cmd = CommandBuilder::new(program);
        for arg in &settings.args {
            cmd.arg(arg);
        }
        let cwd = match &settings.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?.to_string_lossy().to_string(),
        };
        cmd.cwd(&cwd);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &settings.env {
            cmd.env(key, value);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| resource("Failed to spawn shell", &e))?;
        drop(slave);

        let mut reader = master
            .try_clone_reader()
            .map_err(|e| resource("Failed to clone PTY reader", &e))?;
        let writer = master
            .take_writer()
            .map_err(|e| resource("Failed to take PTY writer", &e))?;

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("vonzy-pty-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .map_err(|e| resource("Failed to start PTY reader", &e))?;

        tracing::debug!("[Shell] Spawned '{}' in {}", program, cwd);

        Ok(Self {
            _master: master,
            writer,
            child,
            output: rx,
            buffer: Vec::new(),
            eof: false,
        })
    }

    fn receive(&mut self, wait: Duration) {
        match self.output.recv_timeout(wait) {
            Ok(chunk) => self.buffer.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.eof = true,
        }
    }

    /// Wait until `pattern` shows up in the output, the deadline passes or the
    /// shell goes away. Cancellation is checked every poll slice.
    fn expect(
        &mut self,
        pattern: &BytesRegex,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Expect> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(m) = pattern.find(&self.buffer) {
                let before = self.buffer[..m.start()].to_vec();
                let matched = self.buffer[m.start()..m.end()].to_vec();
                self.buffer.drain(..m.end());
                return Ok(Expect::Matched { before, matched });
            }
            if self.eof {
                return Ok(Expect::Eof);
            }
            cancel.check()?;

            let now = Instant::now();
            if now >= deadline {
                return Ok(Expect::Timeout);
            }
            self.receive((deadline - now).min(POLL_SLICE));
        }
    }

    /// Collect whatever arrives during `delay`, then forget it along with any
    /// tail left over by the previous capture.
    fn settle(&mut self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.eof {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.receive(deadline - now);
        }
        self.buffer.clear();
    }

    /// Echo a marker and wait for the shell to print it back.
    ///
    /// The marker is split by quotes when typed, so only the command's output
    /// can match, never its echo.
    fn handshake(&mut self, timeout: Duration, cancel: &CancelToken) -> Result<()> {
        let id = std::process::id();
        self.send_line(&format!("echo '{}''{}__'", READY_MARKER, id))?;
        let marker = compile(&format!(
            "{}{}__(?:{})",
            regex::escape(READY_MARKER),
            id,
            LINE_BREAK
        ))?;

        match self.expect(&marker, timeout, cancel)? {
            Expect::Matched { before, .. } => {
                tracing::trace!("[Shell] Startup output: {:?}", String::from_utf8_lossy(&before));
                self.settle(DELAY_BEFORE_SEND);
                Ok(())
            }
            Expect::Timeout => Err(VonzyError::Resource(format!(
                "Shell did not become ready within {}s",
                timeout.as_secs_f64()
            ))),
            Expect::Eof => Err(VonzyError::Resource("Shell exited during startup".to_string())),
        }
    }

    fn send_line(&mut self, text: &str) -> Result<()> {
        writeln!(self.writer, "{}", text)
            .and_then(|_| self.writer.flush())
            .map_err(|e| VonzyError::command(format!("Failed to write to shell: {}", e)))
    }

    /// Ask the shell to exit, then kill it if it does not.
    fn close(&mut self) -> Result<Option<i32>> {
        let _ = self.send_line("exit");

        let deadline = Instant::now() + CLOSE_GRACE;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status.exit_code() as i32));
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_SLICE);
        }

        tracing::debug!("[Shell] Shell did not exit, killing it");
        self.child.kill()?;
        let status = self.child.wait()?;
        Ok(Some(status.exit_code() as i32))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
    }
}

pub struct ShellDriver {
    settings: ShellSettings,
    program: String,
    cancel: CancelToken,
    on_line: Option<LineSink>,
    session: Option<Session>,
    line_break: BytesRegex,
}

impl ShellDriver {
    pub fn new(settings: ShellSettings, cancel: CancelToken) -> Result<Self> {
        let program = shell_env::which(&settings.shell).ok_or_else(|| {
            VonzyError::MissingDependency(format!("Shell '{}' not found on PATH", settings.shell))
        })?;
        let line_break = compile(LINE_BREAK)?;
        Ok(Self {
            settings,
            program,
            cancel,
            on_line: None,
            session: None,
            line_break,
        })
    }

    pub fn from_config(config: &ActionConfig) -> Result<Self> {
        let mut driver = Self::new(ShellSettings::from_config(config)?, config.cancel.clone())?;
        driver.on_line = config.on_line.clone();
        Ok(driver)
    }

    pub fn settings(&self) -> &ShellSettings {
        &self.settings
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_some()
    }

    /// Send `text` and capture its output lines.
    ///
    /// With `expect`, waits for that pattern before sending and also splits the
    /// captured output on it. `check_return_code` runs the `echo $?` probe.
    /// An `expect` pattern may already be waiting in the output: a prompt
    /// printed without a newline, such as `Password: `, is kept after the
    /// previous command.
    pub fn run(
        &mut self,
        text: &str,
        expect: Option<&str>,
        check_return_code: bool,
    ) -> Result<Vec<String>> {
        let timeout = self.settings.timeout;
        let cancel = self.cancel.clone();
        let session = self.session.as_mut().ok_or_else(|| {
            VonzyError::Resource("Shell is not running; call initialize() first".to_string())
        })?;

        let terminator = match expect {
            Some(pattern) => {
                tracing::debug!("[Shell] Waiting for {:?}", pattern);
                let wanted = compile(pattern)?;
                match session.expect(&wanted, timeout, &cancel)? {
                    Expect::Matched { .. } => {}
                    Expect::Timeout => {
                        return Err(VonzyError::command(format!(
                            "Timed out waiting for {:?}",
                            pattern
                        )))
                    }
                    Expect::Eof => {
                        return Err(VonzyError::command(format!(
                            "Shell exited while waiting for {:?}",
                            pattern
                        )))
                    }
                }
                compile(&format!("{}|{}", LINE_BREAK, pattern))?
            }
            None => {
                tracing::debug!("[Shell] $ {}", text);
                session.settle(DELAY_BEFORE_SEND);
                self.line_break.clone()
            }
        };

        session.send_line(text)?;
        let lines = capture(session, text, &terminator, timeout, &cancel)?;
        for line in &lines {
            if self.settings.debug {
                println!("{}", line);
            }
            if let Some(sink) = &self.on_line {
                sink.emit(line);
            }
            tracing::debug!("[Shell] > {}", line);
        }

        if check_return_code && expect.is_none() {
            self.check_return_code(text)?;
        }
        Ok(lines)
    }

    /// Return code of the last command, or `None` when the probe output is not
    /// an integer.
    pub fn return_code(&mut self) -> Result<Option<i32>> {
        let timeout = self.settings.timeout;
        let cancel = self.cancel.clone();
        let session = self.session.as_mut().ok_or_else(|| {
            VonzyError::Resource("Shell is not running; call initialize() first".to_string())
        })?;

        session.settle(DELAY_BEFORE_SEND);
        session.send_line(RETURN_CODE_PROBE)?;
        let lines = capture(session, RETURN_CODE_PROBE, &self.line_break, timeout, &cancel)?;
        let text = lines.concat();
        tracing::trace!("[Shell] Return code probe read {:?}", text);
        Ok(text.trim().parse::<i32>().ok())
    }

    fn check_return_code(&mut self, text: &str) -> Result<()> {
        match self.return_code()? {
            Some(0) => Ok(()),
            Some(code) => Err(VonzyError::CommandExecution {
                message: format!("'{}' exited with return code {}", text, code),
                code: Some(code),
            }),
            None if self.settings.strict_return_code => Err(VonzyError::command(format!(
                "Could not determine the return code of '{}'",
                text
            ))),
            None => {
                tracing::warn!("[Shell] Could not determine the return code of '{}'", text);
                Ok(())
            }
        }
    }
}

/// Read lines until the output goes quiet for `timeout`.
///
/// The first few chunks are searched for the echoed command (the terminal and
/// the line editor may both echo); it is dropped together with anything that
/// came before it. When no echo shows up, nothing is dropped. Lines that clean
/// to nothing are skipped. Output after the last terminator, usually the next
/// prompt, stays buffered for the next command.
fn capture(
    session: &mut Session,
    sent: &str,
    terminator: &BytesRegex,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Vec<String>> {
    let sent = sent.trim();
    let is_echo = |text: &str| !sent.is_empty() && text.ends_with(sent);
    let mut lines = Vec::new();
    let mut leading = Vec::new();
    let mut echo_seen = false;
    let mut scanning = true;

    loop {
        let (before, matched) = match session.expect(terminator, timeout, cancel)? {
            Expect::Matched { before, matched } => (before, matched),
            Expect::Timeout | Expect::Eof => break,
        };
        let text = clean(&String::from_utf8_lossy(&before));
        let line = format!("{}{}", text, clean(&String::from_utf8_lossy(&matched)));

        if scanning {
            if text.trim().is_empty() {
                continue;
            }
            if is_echo(&text) {
                leading.clear();
                echo_seen = true;
                continue;
            }
            if !echo_seen && leading.len() < ECHO_SCAN_LINES {
                leading.push(line);
                continue;
            }
            scanning = false;
            lines.append(&mut leading);
        }
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }

    lines.append(&mut leading);
    Ok(lines)
}

fn compile(pattern: &str) -> Result<BytesRegex> {
    BytesRegex::new(pattern).map_err(|e| {
        VonzyError::InvalidAction(format!("Invalid expect pattern {:?}: {}", pattern, e))
    })
}

/// Split a command into the text to send and its optional `expect` pattern.
fn command_parts(command: &CommandBody) -> Result<(String, Option<String>)> {
    match command {
        CommandBody::Text(text) => Ok((text.trim().to_string(), None)),
        CommandBody::Params(params) => {
            let cmd = match params.get("cmd") {
                Some(Value::String(cmd)) => cmd,
                _ => {
                    return Err(VonzyError::command(format!(
                        "Command {} has no 'cmd' string",
                        Value::Object(params.clone())
                    )))
                }
            };
            let expect = match params.get("expect") {
                None | Some(Value::Null) => None,
                Some(Value::String(pattern)) if pattern.is_empty() => None,
                Some(Value::String(pattern)) => Some(pattern.clone()),
                Some(other) => {
                    return Err(VonzyError::command(format!(
                        "'expect' must be a string, got {}",
                        other
                    )))
                }
            };
            Ok((cmd.trim().to_string(), expect))
        }
    }
}

impl Action for ShellDriver {
    fn initialize(&mut self) -> Result<()> {
        if self.session.is_none() {
            let mut session = Session::spawn(&self.settings, &self.program)?;
            session.handshake(self.settings.timeout.max(STARTUP_TIMEOUT), &self.cancel)?;
            self.session = Some(session);
        }
        Ok(())
    }

    fn execute(&mut self, command: &CommandBody, _context: &Context) -> Result<Vec<String>> {
        let (text, expect) = command_parts(command)?;
        self.run(&text, expect.as_deref(), true)
    }

    fn cleanup(&mut self) -> Result<Option<i32>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };
        let code = session.close()?;
        tracing::debug!("[Shell] '{}' exited with {:?}", self.settings.shell, code);
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_clean_strips_control_sequences() {
        assert_eq!(clean("\x1b[32mOK\x1b[0m\r\n"), "OK");
        assert_eq!(clean("\x1b[?2004l\r"), "");
        assert_eq!(clean("\x1b]0;user@host: ~\x07prompt$ "), "prompt$ ");
        assert_eq!(clean("\u{9b}1mbold"), "bold");
        assert_eq!(clean("plain text"), "plain text");
    }

    #[test]
    fn test_settings_from_params() {
        let mut params = Map::new();
        params.insert("shell".to_string(), json!("sh"));
        params.insert("timeout".to_string(), json!(0.5));
        params.insert("debug".to_string(), json!(true));
        params.insert("env".to_string(), json!({"GREETING": "hi"}));
        let settings = ShellSettings::from_config(&ActionConfig::new("shell", params)).unwrap();
        assert_eq!(settings.shell, "sh");
        assert_eq!(settings.timeout, Duration::from_millis(500));
        assert!(settings.debug);
        assert!(!settings.strict_return_code);
        assert_eq!(settings.env, vec![("GREETING".to_string(), "hi".to_string())]);

        let defaults = ShellSettings::from_config(&ActionConfig::new("shell", Map::new())).unwrap();
        assert_eq!(defaults.shell, "bash");
        assert_eq!(defaults.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_timeout() {
        let mut params = Map::new();
        params.insert("timeout".to_string(), json!(0));
        assert!(ShellSettings::from_config(&ActionConfig::new("shell", params)).is_err());
    }

    #[test]
    fn test_missing_shell_binary() {
        let settings = ShellSettings {
            shell: "no-such-shell-binary".to_string(),
            ..ShellSettings::default()
        };
        let err = ShellDriver::new(settings, CancelToken::new()).err().unwrap();
        assert!(matches!(err, VonzyError::MissingDependency(_)));
    }

    #[test]
    fn test_command_parts() {
        let (text, expect) = command_parts(&CommandBody::Text("  echo ada ".to_string())).unwrap();
        assert_eq!(text, "echo ada");
        assert_eq!(expect, None);

        let mut params = Map::new();
        params.insert("cmd".to_string(), json!("secret"));
        params.insert("expect".to_string(), json!("password:"));
        let (text, expect) = command_parts(&CommandBody::Params(params)).unwrap();
        assert_eq!(text, "secret");
        assert_eq!(expect.as_deref(), Some("password:"));

        assert!(command_parts(&CommandBody::Params(Map::new())).is_err());
    }

    #[test]
    fn test_execute_requires_initialize() {
        let Ok(mut driver) = ShellDriver::new(ShellSettings::default(), CancelToken::new()) else {
            return;
        };
        let err = driver
            .execute(&CommandBody::Text("echo hi".to_string()), &Context::new())
            .unwrap_err();
        assert!(matches!(err, VonzyError::Resource(_)));
        assert_eq!(driver.cleanup().unwrap(), None);
    }

    #[cfg(unix)]
    mod pty {
        use super::*;

        fn settings() -> ShellSettings {
            ShellSettings {
                args: vec!["--norc".to_string(), "--noprofile".to_string()],
                timeout: Duration::from_millis(500),
                ..ShellSettings::default()
            }
        }

        fn driver() -> Option<ShellDriver> {
            ShellDriver::new(settings(), CancelToken::new()).ok()
        }

        fn text(command: &str) -> CommandBody {
            CommandBody::Text(command.to_string())
        }

        #[test]
        fn test_echo_round_trip() {
            let Some(mut shell) = driver() else { return };
            shell.initialize().unwrap();
            assert!(shell.is_alive());

            let out = shell.execute(&text("echo vonzy-$((40 + 2))"), &Context::new()).unwrap();
            assert_eq!(out, vec!["vonzy-42"]);

            assert!(shell.cleanup().unwrap().is_some());
            assert!(!shell.is_alive());
        }

        #[test]
        fn test_nonzero_return_code() {
            let Some(mut shell) = driver() else { return };
            shell.initialize().unwrap();

            let err = shell.execute(&text("false"), &Context::new()).unwrap_err();
            assert_eq!(err.return_code(), Some(1));

            // The shell survives a failed command
            let out = shell.execute(&text("echo still-here"), &Context::new()).unwrap();
            assert_eq!(out, vec!["still-here"]);
            shell.cleanup().unwrap();
        }

        #[test]
        fn test_exit_code_is_carried() {
            let Some(mut shell) = driver() else { return };
            shell.initialize().unwrap();

            let err = shell.execute(&text("sh -c 'exit 3'"), &Context::new()).unwrap_err();
            assert!(matches!(err, VonzyError::CommandExecution { .. }));
            assert_eq!(err.return_code(), Some(3));
            shell.cleanup().unwrap();
        }

        #[test]
        fn test_expect_answers_pending_prompt() {
            let Some(mut shell) = driver() else { return };
            shell.initialize().unwrap();

            let out = shell.run("read -r -p 'Password: ' secret", None, false).unwrap();
            assert!(out.is_empty(), "{:?}", out);

            let mut params = Map::new();
            params.insert("cmd".to_string(), json!("hunter2"));
            params.insert("expect".to_string(), json!("Password:"));
            shell
                .execute(&CommandBody::Params(params), &Context::new())
                .unwrap();

            let out = shell.execute(&text("echo got-$secret"), &Context::new()).unwrap();
            assert_eq!(out, vec!["got-hunter2"]);
            shell.cleanup().unwrap();
        }

        #[test]
        fn test_expect_times_out_without_prompt() {
            let Some(mut shell) = driver() else { return };
            shell.initialize().unwrap();

            let err = shell.run("hunter2", Some("Password:"), false).unwrap_err();
            assert!(err.to_string().contains("Timed out"));
            shell.cleanup().unwrap();
        }

        #[test]
        fn test_slow_startup_output_is_not_captured() {
            let mut rc = tempfile::NamedTempFile::new().unwrap();
            writeln!(rc, "echo startup-noise; sleep 1; echo more-noise").unwrap();
            let settings = ShellSettings {
                args: vec![
                    "--noprofile".to_string(),
                    "--rcfile".to_string(),
                    rc.path().to_string_lossy().to_string(),
                ],
                ..settings()
            };
            let Ok(mut shell) = ShellDriver::new(settings, CancelToken::new()) else { return };
            shell.initialize().unwrap();

            let out = shell.execute(&text("echo first-$((1+1))"), &Context::new()).unwrap();
            assert_eq!(out, vec!["first-2"]);
            shell.cleanup().unwrap();
        }

        #[test]
        fn test_reinitialize_after_cleanup() {
            let Some(mut shell) = driver() else { return };
            shell.initialize().unwrap();
            shell.cleanup().unwrap();
            shell.initialize().unwrap();
            let out = shell.execute(&text("echo again"), &Context::new()).unwrap();
            assert_eq!(out, vec!["again"]);
            shell.cleanup().unwrap();
        }

        #[test]
        fn test_cancel_interrupts_wait() {
            let settings = ShellSettings {
                timeout: Duration::from_secs(5),
                ..settings()
            };
            let cancel = CancelToken::new();
            let Ok(mut shell) = ShellDriver::new(settings, cancel.clone()) else { return };
            shell.initialize().unwrap();
            cancel.cancel();

            let started = Instant::now();
            let err = shell.execute(&text("sleep 3"), &Context::new()).unwrap_err();
            assert!(matches!(err, VonzyError::Interrupted));
            assert!(started.elapsed() < Duration::from_secs(3));
            shell.cleanup().unwrap();
        }
    }
}
