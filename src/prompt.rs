use crate::environment::{EnvironmentTarget, RunConfig};
use crate::error::{GistError, Result};
use crate::gist::GistMetadata;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Input;
use std::io::{self, BufRead, IsTerminal};
use std::process;
use std::sync::mpsc::{self, Receiver};
use std::thread;

const QUESTION: &str = "Run this gist? [y/N]";

pub fn summary_lines(
    config: &RunConfig,
    target: &EnvironmentTarget,
    gist: &GistMetadata,
) -> Vec<String> {
    let mut lines = Vec::new();
    match target {
        EnvironmentTarget::Active { base, .. } => {
            lines.push(format!("CMSSW base: {} (active)", base.display()));
        }
        EnvironmentTarget::Checkout { checkout_dir, .. } => {
            lines.push(format!("Checkout dir: {}", checkout_dir.display()));
        }
    }
    lines.push(format!("CMSSW version: {}", target.version().unwrap_or("-")));
    lines.push(format!("SCRAM arch: {}", target.arch().unwrap_or("-")));
    lines.push(format!("Gist dir: {}", config.gist_dir.display()));
    lines.push(format!(
        "Setup file: {}",
        config.setup_file.as_deref().unwrap_or("-")
    ));
    lines.push(format!("Executable: {}", config.executable));
    lines.push(format!("Cleanup: {}", yes_no(config.cleanup)));
    lines.push(format!("Temporary: {}", yes_no(config.temporary)));
    lines.push(format!("Dry run: {}", yes_no(config.dry_run)));
    lines.push(format!("Gist id: {}", gist.id));
    lines.push(format!("Gist file: {}", gist.filename));
    lines.push(format!("Gist location: {}", gist.location));
    lines.push(format!("Gist uri: {}", gist.uri));
    lines.push(format!("Gist owner: {}", gist.owner));
    lines.push(format!(
        "Gist description: {}",
        gist.description.as_deref().unwrap_or("-")
    ));
    lines
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub fn print_summary(config: &RunConfig, target: &EnvironmentTarget, gist: &GistMetadata) {
    for line in summary_lines(config, target, gist) {
        println!("{line}");
    }
}

/// Only an answer of exactly `y` (surrounding whitespace ignored) confirms.
pub fn is_confirmation(answer: &str) -> bool {
    answer.trim() == "y"
}

enum PromptEvent {
    Answered(Result<bool>),
    Interrupted,
}

/// Asks whether to run the gist. An interrupted or closed input counts as no.
///
/// The answer is read on a helper thread while a SIGINT handler reports
/// Ctrl-C on the same channel, so an interrupt ends the wait without killing
/// the process.
pub fn confirm_run() -> Result<bool> {
    let (events, answers) = mpsc::channel();
    let interrupts = events.clone();
    ctrlc::set_handler(move || {
        // Nobody listens once the prompt is over; exit as an unhandled SIGINT would.
        if interrupts.send(PromptEvent::Interrupted).is_err() {
            process::exit(130);
        }
    })?;
    thread::spawn(move || {
        let _ = events.send(PromptEvent::Answered(read_answer()));
    });
    await_answer(&answers)
}

fn await_answer(answers: &Receiver<PromptEvent>) -> Result<bool> {
    match answers.recv() {
        Ok(PromptEvent::Answered(answer)) => answer,
        Ok(PromptEvent::Interrupted) | Err(_) => {
            tracing::debug!("prompt interrupted, treating as no");
            println!();
            Ok(false)
        }
    }
}

fn read_answer() -> Result<bool> {
    if io::stdin().is_terminal() {
        let answer = Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(QUESTION)
            .allow_empty(true)
            .interact_text();
        return match answer {
            Ok(answer) => Ok(is_confirmation(&answer)),
            Err(dialoguer::Error::IO(err)) if err.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(err) => Err(GistError::Prompt(err)),
        };
    }
    println!("{QUESTION}");
    read_confirmation(&mut io::stdin().lock())
}

pub fn read_confirmation<R: BufRead>(input: &mut R) -> Result<bool> {
    let mut line = String::new();
    match input.read_line(&mut line)? {
        0 => Ok(false),
        _ => Ok(is_confirmation(&line)),
    }
}
