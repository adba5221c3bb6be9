//! `rsync` action: pushes a local path to a remote host over ssh.
//!
//! The transfer runs inside a [`ShellDriver`] so ssh's interactive password
//! prompt can be answered. The transfer itself happens in `initialize`; step
//! commands, if any, run in the same shell afterwards.

use serde_json::Value;

use crate::action::shell::ShellDriver;
use crate::action::{Action, ActionConfig};
use crate::error::{Result, VonzyError};
use crate::shell_env;
use crate::workflow::context::Context;
use crate::workflow::schema::CommandBody;

const PASSWORD_PROMPT: &str = "password:";
const PERMISSION_DENIED: &str = "Permission denied, please try again.";

#[derive(Debug, Clone, PartialEq)]
pub struct RsyncSettings {
    pub ssh_user: String,
    pub ssh_host: String,
    pub ssh_port: Option<u64>,
    pub ssh_password: Option<String>,
    pub source: String,
    pub destination: String,
    pub options: Vec<String>,
    pub excludes: Vec<String>,
}

impl RsyncSettings {
    pub fn from_config(config: &ActionConfig) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            config.str_param(key)?.ok_or_else(|| {
                VonzyError::InvalidAction(format!(
                    "Action '{}': missing param '{}'",
                    config.name, key
                ))
            })
        };

        let options = match config.params.get("options") {
            Some(Value::String(line)) => split_words(line)?,
            _ => {
                let mut options = Vec::new();
                for option in config.list_param("options")? {
                    options.extend(split_words(&option)?);
                }
                options
            }
        };

        Ok(Self {
            ssh_user: required("ssh_user")?,
            ssh_host: required("ssh_host")?,
            ssh_port: config.u64_param("ssh_port")?,
            ssh_password: config.str_param("ssh_password")?,
            source: required("source")?,
            destination: required("destination")?,
            options,
            excludes: config.list_param("excludes")?,
        })
    }

    /// rsync arguments: options, `--rsh` for a non-default port, excludes,
    /// source and `user@host:destination`.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.options.clone();
        if let Some(port) = self.ssh_port.filter(|p| *p != 22) {
            args.push("--rsh".to_string());
            args.push(format!("ssh -p {}", port));
        }
        for pattern in &self.excludes {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        args.push(self.source.clone());
        args.push(format!("{}@{}:{}", self.ssh_user, self.ssh_host, self.destination));
        args
    }

    pub fn command_line(&self, program: &str) -> String {
        std::iter::once(program.to_string())
            .chain(self.args())
            .map(|arg| quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct RsyncAction {
    settings: RsyncSettings,
    shell: ShellDriver,
}

impl RsyncAction {
    pub fn from_config(config: &ActionConfig) -> Result<Self> {
        Ok(Self {
            settings: RsyncSettings::from_config(config)?,
            shell: ShellDriver::from_config(config)?,
        })
    }

    pub fn settings(&self) -> &RsyncSettings {
        &self.settings
    }
}

impl Action for RsyncAction {
    fn initialize(&mut self) -> Result<()> {
        let program = shell_env::which("rsync")
            .ok_or_else(|| VonzyError::MissingDependency("rsync command not found".to_string()))?;

        self.shell.initialize()?;
        let command = self.settings.command_line(&program);
        tracing::info!(
            "[Rsync] {} -> {}@{}:{}",
            self.settings.source,
            self.settings.ssh_user,
            self.settings.ssh_host,
            self.settings.destination
        );

        let Some(password) = self.settings.ssh_password.clone() else {
            self.shell.run(&command, None, true)?;
            return Ok(());
        };

        self.shell.run(&command, None, false)?;
        let lines = self.shell.run(&password, Some(PASSWORD_PROMPT), false)?;
        if lines.iter().any(|line| line.contains(PERMISSION_DENIED)) {
            return Err(VonzyError::CommandExecution {
                message: format!(
                    "Invalid password for {}@{}",
                    self.settings.ssh_user, self.settings.ssh_host
                ),
                code: None,
            });
        }
        match self.shell.return_code()? {
            Some(code) if code != 0 => Err(VonzyError::CommandExecution {
                message: format!("rsync exited with return code {}", code),
                code: Some(code),
            }),
            _ => Ok(()),
        }
    }

    fn execute(&mut self, command: &CommandBody, context: &Context) -> Result<Vec<String>> {
        self.shell.execute(command, context)
    }

    fn cleanup(&mut self) -> Result<Option<i32>> {
        self.shell.cleanup()
    }
}

/// Split a string into words the way a POSIX shell would, honouring single
/// quotes, double quotes and backslash escapes.
pub fn split_words(text: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(unbalanced(text)),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(unbalanced(text)),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(unbalanced(text)),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unbalanced(text: &str) -> VonzyError {
    VonzyError::InvalidAction(format!("Unbalanced quotes in {:?}", text))
}

/// Quote `word` for a POSIX shell when it contains anything but safe characters.
pub fn quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'"'"'"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn config(params: Value) -> ActionConfig {
        let Value::Object(map) = params else { unreachable!() };
        ActionConfig::new("rsync", map)
    }

    fn base_params() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "ssh_user": "deploy",
            "ssh_host": "example.org",
            "source": "./dist/",
            "destination": "/srv/www",
            "options": ["-avz --delete", "--chmod='u=rwX,go=rX'"],
            "excludes": [".git", "node_modules"]
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_args_with_custom_port() {
        let mut params = base_params();
        params.insert("ssh_port".to_string(), json!(2222));
        let settings = RsyncSettings::from_config(&ActionConfig::new("rsync", params)).unwrap();
        assert_eq!(
            settings.args(),
            vec![
                "-avz",
                "--delete",
                "--chmod=u=rwX,go=rX",
                "--rsh",
                "ssh -p 2222",
                "--exclude",
                ".git",
                "--exclude",
                "node_modules",
                "./dist/",
                "deploy@example.org:/srv/www",
            ]
        );
        assert_eq!(
            settings.command_line("/usr/bin/rsync"),
            "/usr/bin/rsync -avz --delete --chmod=u=rwX,go=rX --rsh 'ssh -p 2222' \
             --exclude .git --exclude node_modules ./dist/ deploy@example.org:/srv/www"
        );
    }

    #[test]
    fn test_default_port_has_no_rsh() {
        let mut params = base_params();
        params.insert("ssh_port".to_string(), json!(22));
        let settings = RsyncSettings::from_config(&ActionConfig::new("rsync", params)).unwrap();
        assert!(!settings.args().contains(&"--rsh".to_string()));
    }

    #[test]
    fn test_missing_required_param() {
        let err = RsyncSettings::from_config(&config(json!({"ssh_user": "deploy"}))).unwrap_err();
        assert!(matches!(err, VonzyError::InvalidAction(_)));
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("-e 'ssh -p 22' \"a b\" c\\ d").unwrap(),
            vec!["-e", "ssh -p 22", "a b", "c d"]
        );
        assert_eq!(split_words("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_words("''").unwrap(), vec![""]);
        assert!(split_words("'open").is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain-word"), "plain-word");
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(quote(""), "''");
    }
}
