use crate::config::Settings;
use crate::error::{GistError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One clause of a composite shell invocation. Steps are chained with `&&`,
/// so the first failing step stops the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellStep {
    Source(PathBuf),
    ChangeDir(PathBuf),
    MakeDirs(PathBuf),
    Export { name: String, value: String },
    /// `eval "$(program args...)"`, used for runtime variable exports.
    EvalOutput { program: String, args: Vec<String> },
    Run { program: String, args: Vec<String> },
}

impl ShellStep {
    pub fn run<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        ShellStep::Run {
            program: program.into(),
            args,
        }
    }

    pub fn render(&self) -> String {
        match self {
            ShellStep::Source(path) => format!("source {}", quote_path(path)),
            ShellStep::ChangeDir(path) => format!("cd {}", quote_path(path)),
            ShellStep::MakeDirs(path) => format!("mkdir -p {}", quote_path(path)),
            ShellStep::Export { name, value } => format!("export {}={}", name, shell_quote(value)),
            ShellStep::EvalOutput { program, args } => {
                format!("eval \"$({})\"", render_argv(program, args))
            }
            ShellStep::Run { program, args } => render_argv(program, args),
        }
    }
}

pub fn render_steps(steps: &[ShellStep]) -> String {
    steps
        .iter()
        .map(ShellStep::render)
        .collect::<Vec<_>>()
        .join(" && ")
}

fn render_argv(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(shell_quote(program));
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_' | '=' | ':' | '+' | ','));
    if plain {
        return value.to_string();
    }
    // foo'bar -> 'foo'\''bar'
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

pub trait ShellRunner {
    /// Runs `script` in a fresh shell with inherited stdio and returns the
    /// exit status code.
    fn run(&self, script: &str) -> io::Result<i32>;
}

pub struct BashRunner {
    program: PathBuf,
}

impl BashRunner {
    pub fn from_settings(settings: &Settings) -> Self {
        let requested = settings.shell.program.trim();
        let program = which::which(requested).unwrap_or_else(|err| {
            tracing::warn!("could not locate shell `{requested}` on PATH: {err}");
            PathBuf::from(requested)
        });
        Self { program }
    }
}

impl ShellRunner for BashRunner {
    fn run(&self, script: &str) -> io::Result<i32> {
        tracing::debug!(shell = %self.program.display(), script, "spawning shell");
        let status = Command::new(&self.program).arg("-c").arg(script).status()?;
        Ok(status
            .code()
            .unwrap_or(if status.success() { 0 } else { 1 }))
    }
}

/// Runs `steps` as one shell invocation, or prints them when `dry_run` is set.
/// Spawn failures and non-zero exits are turned into errors by `to_error`.
pub fn execute_steps<R, F>(runner: &R, steps: &[ShellStep], dry_run: bool, to_error: F) -> Result<()>
where
    R: ShellRunner,
    F: Fn(String) -> GistError,
{
    let script = render_steps(steps);
    if dry_run {
        println!("[dry-run] {script}");
        return Ok(());
    }
    let code = runner
        .run(&script)
        .map_err(|err| to_error(format!("failed to run `{script}`: {err}")))?;
    if code != 0 {
        return Err(to_error(format!(
            "command failed with status {code} while running `{script}`"
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::MockShellRunner;
    use super::*;

    #[test]
    fn quote_leaves_plain_words_alone() {
        assert_eq!(shell_quote("/tmp/g/snippet.py"), "/tmp/g/snippet.py");
        assert_eq!(shell_quote("CMSSW_13_0_0"), "CMSSW_13_0_0");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn quote_wraps_special_characters() {
        assert_eq!(shell_quote("my dir"), "'my dir'");
        assert_eq!(shell_quote("foo'bar"), "'foo'\\''bar'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn steps_render_in_order() {
        let steps = vec![
            ShellStep::Source(PathBuf::from("/cvmfs/cms.cern.ch/cmsset_default.sh")),
            ShellStep::MakeDirs(PathBuf::from("/work area")),
            ShellStep::ChangeDir(PathBuf::from("/work area")),
            ShellStep::Export {
                name: "SCRAM_ARCH".to_string(),
                value: "el8_amd64_gcc11".to_string(),
            },
            ShellStep::EvalOutput {
                program: "scram".to_string(),
                args: vec!["runtime".to_string(), "-sh".to_string()],
            },
            ShellStep::run("python", vec!["x.py".to_string()]),
        ];
        assert_eq!(
            render_steps(&steps),
            "source /cvmfs/cms.cern.ch/cmsset_default.sh && mkdir -p '/work area' && cd '/work area' \
             && export SCRAM_ARCH=el8_amd64_gcc11 && eval \"$(scram runtime -sh)\" && python x.py"
        );
    }

    #[test]
    fn dry_run_does_not_invoke_runner() {
        let runner = MockShellRunner::default();
        let steps = vec![ShellStep::run("true", Vec::new())];
        execute_steps(&runner, &steps, true, GistError::Execution).unwrap();
        assert!(runner.scripts().is_empty());
    }

    #[test]
    fn non_zero_exit_maps_through_error_constructor() {
        let runner = MockShellRunner::default();
        runner.push_code(3);
        let steps = vec![ShellStep::run("false", Vec::new())];
        let err = execute_steps(&runner, &steps, false, GistError::Provision)
            .expect_err("exit 3 should fail");
        assert!(matches!(err, GistError::Provision(_)));
        assert!(err.to_string().contains("status 3"));
        assert_eq!(runner.scripts(), vec!["false".to_string()]);
    }
}
