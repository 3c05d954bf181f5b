use crate::cleanup::{first_missing_ancestor, CleanupList};
use crate::cli::RunArgs;
use crate::config::Settings;
use crate::error::{GistError, Result};
use crate::shell::{execute_steps, ShellRunner, ShellStep};
use std::env;
use std::path::{Path, PathBuf};

pub const BASE_ENV: &str = "CMSSW_BASE";
pub const VERSION_ENV: &str = "CMSSW_VERSION";
pub const ARCH_ENV: &str = "SCRAM_ARCH";

/// Environment variables describing a CMSSW area that is already active in
/// the invoking shell. Captured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientEnv {
    pub cmssw_base: Option<PathBuf>,
    pub cmssw_version: Option<String>,
    pub scram_arch: Option<String>,
}

impl AmbientEnv {
    pub fn from_process() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            cmssw_base: read(BASE_ENV).map(PathBuf::from),
            cmssw_version: read(VERSION_ENV),
            scram_arch: read(ARCH_ENV),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentTarget {
    /// The caller already sourced an environment; nothing to provision.
    Active {
        base: PathBuf,
        version: Option<String>,
        arch: Option<String>,
    },
    Checkout {
        checkout_dir: PathBuf,
        version: String,
        arch: Option<String>,
    },
}

impl EnvironmentTarget {
    pub fn version(&self) -> Option<&str> {
        match self {
            EnvironmentTarget::Active { version, .. } => version.as_deref(),
            EnvironmentTarget::Checkout { version, .. } => Some(version),
        }
    }

    pub fn arch(&self) -> Option<&str> {
        match self {
            EnvironmentTarget::Active { arch, .. } | EnvironmentTarget::Checkout { arch, .. } => {
                arch.as_deref()
            }
        }
    }
}

/// Flags after defaults, `--temporary` and path normalization are applied.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub gist: String,
    pub version: Option<String>,
    pub arch: Option<String>,
    pub checkout_dir: PathBuf,
    pub gist_dir: PathBuf,
    pub setup_file: Option<String>,
    pub cleanup: bool,
    pub temporary: bool,
    pub executable: String,
    pub force_run: bool,
    pub dry_run: bool,
}

/// `scratch_root` is where a `--temporary` work area is created.
pub fn resolve_run(
    args: &RunArgs,
    ambient: &AmbientEnv,
    scratch_root: &Path,
    cleanup: &mut CleanupList,
) -> Result<(RunConfig, EnvironmentTarget)> {
    let version = args
        .cmssw_version
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if ambient.cmssw_base.is_none() && version.is_none() {
        return Err(GistError::Config(format!(
            "a CMSSW version is required (--cmssw-version) when {BASE_ENV} is not set"
        )));
    }

    let (checkout_dir, gist_dir, cleanup_flag) = if args.temporary {
        let scratch = tempfile::Builder::new()
            .prefix("cmsgist-")
            .tempdir_in(scratch_root)?
            .keep();
        tracing::info!(path = %scratch.display(), "created temporary work area");
        cleanup.push(scratch.clone());
        (scratch.clone(), scratch, true)
    } else {
        (
            absolutize(&args.checkout_dir)?,
            absolutize(&args.gist_dir)?,
            args.cleanup,
        )
    };

    let target = match &ambient.cmssw_base {
        Some(base) => EnvironmentTarget::Active {
            base: base.clone(),
            version: ambient.cmssw_version.clone(),
            arch: ambient.scram_arch.clone(),
        },
        None => EnvironmentTarget::Checkout {
            checkout_dir: checkout_dir.clone(),
            // Checked non-empty above when no environment is active.
            version: version.clone().unwrap_or_default(),
            arch: args.scram_arch.clone(),
        },
    };

    let config = RunConfig {
        gist: args.gist.clone(),
        version,
        arch: args.scram_arch.clone(),
        checkout_dir,
        gist_dir,
        setup_file: args.setup_file.clone(),
        cleanup: cleanup_flag,
        temporary: args.temporary,
        executable: args.executable.clone(),
        force_run: args.force_run,
        dry_run: args.dry_run,
    };
    Ok((config, target))
}

pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    // `components` drops interior `.` segments, so `./x` becomes `<cwd>/x`.
    Ok(env::current_dir()?.join(path).components().collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedEnv {
    pub base: PathBuf,
    pub newly_created: bool,
}

/// Creates `<checkout_dir>/<version>` with the project command unless its
/// `src` directory is already there.
pub fn provision<R: ShellRunner>(
    checkout_dir: &Path,
    version: &str,
    arch: Option<&str>,
    settings: &Settings,
    runner: &R,
    dry_run: bool,
    cleanup: &mut CleanupList,
) -> Result<ProvisionedEnv> {
    let base = checkout_dir.join(version);
    if base.join("src").is_dir() {
        println!("Using existing CMSSW area {}", base.display());
        return Ok(ProvisionedEnv {
            base,
            newly_created: false,
        });
    }

    let steps = provision_steps(checkout_dir, version, arch, settings);
    let created = first_missing_ancestor(&base);
    println!("Creating CMSSW area {}", base.display());
    execute_steps(runner, &steps, dry_run, GistError::Provision)?;
    if !dry_run {
        if let Some(created) = created {
            cleanup.push(created);
        }
    }
    Ok(ProvisionedEnv {
        base,
        newly_created: true,
    })
}

fn provision_steps(
    checkout_dir: &Path,
    version: &str,
    arch: Option<&str>,
    settings: &Settings,
) -> Vec<ShellStep> {
    let mut steps = vec![
        ShellStep::Source(settings.bootstrap_script()),
        ShellStep::MakeDirs(checkout_dir.to_path_buf()),
        ShellStep::ChangeDir(checkout_dir.to_path_buf()),
    ];
    if let Some(arch) = arch.map(str::trim).filter(|arch| !arch.is_empty()) {
        steps.push(ShellStep::Export {
            name: ARCH_ENV.to_string(),
            value: arch.to_string(),
        });
    }
    steps.push(ShellStep::run(
        settings.environment.project_command.clone(),
        vec![
            "project".to_string(),
            "CMSSW".to_string(),
            version.to_string(),
        ],
    ));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::MockShellRunner;
    use std::fs;
    use tempfile::tempdir;

    fn args_with_version(version: Option<&str>) -> RunArgs {
        RunArgs {
            gist: "abc123".to_string(),
            cmssw_version: version.map(str::to_string),
            checkout_dir: PathBuf::from("."),
            gist_dir: PathBuf::from("."),
            executable: "python".to_string(),
            ..RunArgs::default()
        }
    }

    #[test]
    fn ambient_env_ignores_blank_values() {
        let ambient = AmbientEnv::from_lookup(|name| match name {
            BASE_ENV => Some("/work/CMSSW_13_0_0".to_string()),
            VERSION_ENV => Some("CMSSW_13_0_0".to_string()),
            ARCH_ENV => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(ambient.cmssw_base, Some(PathBuf::from("/work/CMSSW_13_0_0")));
        assert_eq!(ambient.cmssw_version.as_deref(), Some("CMSSW_13_0_0"));
        assert_eq!(ambient.scram_arch, None);
    }

    #[test]
    fn version_required_without_active_environment() {
        let mut cleanup = CleanupList::new();
        let err = resolve_run(
            &args_with_version(None),
            &AmbientEnv::default(),
            &env::temp_dir(),
            &mut cleanup,
        )
            .expect_err("missing version");
        assert!(matches!(err, GistError::Config(_)));
        assert!(cleanup.is_empty());
    }

    #[test]
    fn active_environment_does_not_need_version() {
        let ambient = AmbientEnv {
            cmssw_base: Some(PathBuf::from("/work/CMSSW_13_0_0")),
            cmssw_version: Some("CMSSW_13_0_0".to_string()),
            scram_arch: Some("el8_amd64_gcc11".to_string()),
        };
        let mut cleanup = CleanupList::new();
        let (_, target) =
            resolve_run(&args_with_version(None), &ambient, &env::temp_dir(), &mut cleanup)
                .unwrap();
        assert_eq!(target.version(), Some("CMSSW_13_0_0"));
        assert_eq!(target.arch(), Some("el8_amd64_gcc11"));
        assert!(matches!(target, EnvironmentTarget::Active { .. }));
    }

    #[test]
    fn temporary_forces_shared_scratch_dir_and_cleanup() {
        let mut args = args_with_version(Some("CMSSW_13_0_0"));
        args.temporary = true;
        args.checkout_dir = PathBuf::from("/ignored/checkout");
        args.gist_dir = PathBuf::from("/ignored/gists");
        let scratch_root = tempdir().unwrap();
        let mut cleanup = CleanupList::new();

        let (config, target) =
            resolve_run(&args, &AmbientEnv::default(), scratch_root.path(), &mut cleanup).unwrap();

        assert!(config.cleanup);
        assert!(config.checkout_dir.starts_with(scratch_root.path()));
        assert_eq!(config.checkout_dir, config.gist_dir);
        assert!(config.checkout_dir.is_dir());
        assert_eq!(cleanup.paths(), &[config.checkout_dir.clone()]);
        assert_eq!(
            target,
            EnvironmentTarget::Checkout {
                checkout_dir: config.checkout_dir.clone(),
                version: "CMSSW_13_0_0".to_string(),
                arch: None,
            }
        );
    }

    #[test]
    fn relative_dirs_become_absolute() {
        let mut args = args_with_version(Some("CMSSW_13_0_0"));
        args.gist_dir = PathBuf::from("gists");
        let mut cleanup = CleanupList::new();
        args.checkout_dir = PathBuf::from("./area");
        let (config, _) =
            resolve_run(&args, &AmbientEnv::default(), &env::temp_dir(), &mut cleanup).unwrap();
        let cwd = env::current_dir().unwrap();
        assert_eq!(config.checkout_dir, cwd.join("area"));
        assert_eq!(config.gist_dir, cwd.join("gists"));
        assert_eq!(absolutize(Path::new(".")).unwrap(), cwd);
    }

    #[test]
    fn existing_checkout_is_reused_without_running_commands() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("CMSSW_13_0_0").join("src")).unwrap();
        let runner = MockShellRunner::default();
        let mut cleanup = CleanupList::new();

        let env = provision(
            dir.path(),
            "CMSSW_13_0_0",
            None,
            &Settings::default(),
            &runner,
            false,
            &mut cleanup,
        )
        .unwrap();

        assert!(!env.newly_created);
        assert_eq!(env.base, dir.path().join("CMSSW_13_0_0"));
        assert!(runner.scripts().is_empty());
        assert!(cleanup.is_empty());
    }

    #[test]
    fn new_checkout_runs_project_command_and_tracks_area() {
        let dir = tempdir().unwrap();
        let runner = MockShellRunner::default();
        let mut cleanup = CleanupList::new();

        let env = provision(
            dir.path(),
            "CMSSW_13_0_0",
            Some("el8_amd64_gcc11"),
            &Settings::default(),
            &runner,
            false,
            &mut cleanup,
        )
        .unwrap();

        assert!(env.newly_created);
        let scripts = runner.scripts();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].starts_with("source /cvmfs/cms.cern.ch/cmsset_default.sh && mkdir -p "));
        assert!(scripts[0].contains("export SCRAM_ARCH=el8_amd64_gcc11"));
        assert!(scripts[0].ends_with("scram project CMSSW CMSSW_13_0_0"));
        assert_eq!(cleanup.paths(), &[dir.path().join("CMSSW_13_0_0")]);
    }

    #[test]
    fn failed_checkout_is_a_provision_error() {
        let dir = tempdir().unwrap();
        let runner = MockShellRunner::default();
        runner.push_code(1);
        let mut cleanup = CleanupList::new();

        let err = provision(
            dir.path(),
            "CMSSW_99_0_0",
            None,
            &Settings::default(),
            &runner,
            false,
            &mut cleanup,
        )
        .expect_err("scram failure");
        assert!(matches!(err, GistError::Provision(_)));
        assert!(cleanup.is_empty());
    }

    #[test]
    fn dry_run_checkout_only_prints() {
        let dir = tempdir().unwrap();
        let runner = MockShellRunner::default();
        let mut cleanup = CleanupList::new();
        let env = provision(
            &dir.path().join("area"),
            "CMSSW_13_0_0",
            None,
            &Settings::default(),
            &runner,
            true,
            &mut cleanup,
        )
        .unwrap();
        assert!(env.newly_created);
        assert!(runner.scripts().is_empty());
        assert!(cleanup.is_empty());
        assert!(!dir.path().join("area").exists());
    }
}
