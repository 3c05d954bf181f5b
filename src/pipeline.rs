use crate::cleanup::CleanupList;
use crate::cli::RunArgs;
use crate::config::{expand_path, expand_vars, Settings};
use crate::environment::{absolutize, provision, resolve_run, AmbientEnv, EnvironmentTarget};
use crate::error::{GistError, Result};
use crate::gist::{fetch_metadata, materialize};
use crate::prompt::print_summary;
use crate::shell::{execute_steps, ShellRunner, ShellStep};
use chrono::Local;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Declined,
}

/// Prints a start line on creation and the elapsed time when dropped, which
/// also happens while an error propagates out of the timed scope.
pub struct StageTimer {
    label: String,
    started: Instant,
}

impl StageTimer {
    pub fn start<S: Into<String>>(label: S) -> Self {
        let label = label.into();
        println!(
            "{label}: started at {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        Self {
            label,
            started: Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        println!(
            "{}: finished in {:.2}s",
            self.label,
            self.started.elapsed().as_secs_f64()
        );
    }
}

pub struct ExecutionPlan<'a> {
    pub work_dir: &'a Path,
    /// Set when the environment still has to be sourced in the child shell.
    pub cmssw_base: Option<&'a Path>,
    pub setup_file: Option<&'a str>,
    pub executable: &'a str,
    pub script: &'a Path,
}

pub fn execution_steps(plan: &ExecutionPlan<'_>, settings: &Settings) -> Result<Vec<ShellStep>> {
    let mut steps = vec![ShellStep::ChangeDir(plan.work_dir.to_path_buf())];
    if let Some(base) = plan.cmssw_base {
        steps.push(ShellStep::Source(settings.bootstrap_script()));
        steps.push(ShellStep::ChangeDir(base.join("src")));
        steps.push(ShellStep::EvalOutput {
            program: settings.environment.project_command.clone(),
            args: vec!["runtime".to_string(), "-sh".to_string()],
        });
        steps.push(ShellStep::ChangeDir(plan.work_dir.to_path_buf()));
    }
    if let Some(setup_file) = plan.setup_file {
        steps.push(ShellStep::Source(resolve_setup_file(setup_file)?));
        steps.push(ShellStep::ChangeDir(plan.work_dir.to_path_buf()));
    }
    steps.push(ShellStep::run(
        plan.executable,
        vec![plan.script.to_string_lossy().to_string()],
    ));
    Ok(steps)
}

pub fn resolve_setup_file(raw: &str) -> Result<PathBuf> {
    let expanded = expand_vars(&expand_path(raw.trim()), |name| env::var(name).ok());
    absolutize(Path::new(&expanded))
}

/// Runs the whole pipeline for one invocation.
pub fn run<R: ShellRunner>(
    args: &RunArgs,
    ambient: &AmbientEnv,
    settings: &Settings,
    runner: &R,
    confirm: impl FnOnce() -> Result<bool>,
) -> Result<Outcome> {
    let mut cleanup = CleanupList::new();
    let (config, target) = resolve_run(args, ambient, &settings.scratch_root(), &mut cleanup)?;
    let gist = fetch_metadata(&config.gist, settings)?;

    print_summary(&config, &target, &gist);
    if !config.force_run && !config.dry_run && !confirm()? {
        tracing::info!("run declined at prompt");
        // Only the scratch area exists at this point.
        if config.temporary {
            cleanup.teardown()?;
        }
        return Ok(Outcome::Declined);
    }

    let cmssw_base = match &target {
        EnvironmentTarget::Active {
            base,
            version,
            arch,
        } => {
            if config.version.is_some() && config.version != *version {
                tracing::warn!(
                    "ignoring requested version {:?}: {} is already active",
                    config.version,
                    base.display()
                );
            }
            if config.arch.is_some() && config.arch != *arch {
                tracing::warn!("ignoring requested arch {:?}", config.arch);
            }
            None
        }
        EnvironmentTarget::Checkout {
            checkout_dir,
            version,
            arch,
        } => {
            let env = provision(
                checkout_dir,
                version,
                arch.as_deref(),
                settings,
                runner,
                config.dry_run,
                &mut cleanup,
            )?;
            tracing::info!(
                base = %env.base.display(),
                newly_created = env.newly_created,
                "environment ready"
            );
            Some(env.base)
        }
    };

    let script = materialize(&gist, &config.gist_dir, config.dry_run, &mut cleanup)?;

    let plan = ExecutionPlan {
        work_dir: &config.gist_dir,
        cmssw_base: cmssw_base.as_deref(),
        setup_file: config.setup_file.as_deref(),
        executable: &config.executable,
        script: &script,
    };
    let steps = execution_steps(&plan, settings)?;
    {
        let _timer = StageTimer::start(format!("Running {}", gist.filename));
        execute_steps(runner, &steps, config.dry_run, GistError::Execution)?;
    }

    if config.cleanup {
        cleanup.teardown()?;
    } else if !cleanup.is_empty() {
        tracing::debug!(count = cleanup.paths().len(), "leaving created paths in place");
    }
    Ok(Outcome::Completed)
}
