use crate::cleanup::{ensure_dir, CleanupList};
use crate::config::Settings;
use crate::environment::absolutize;
use crate::error::{GistError, Result};
use nix::unistd::{Uid, User};
use serde::Deserialize;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

const USER_AGENT: &str = "cmsgist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GistMetadata {
    pub id: String,
    pub filename: String,
    /// Human-facing location: the gist page, or the absolute local path.
    pub location: String,
    /// Raw content URL, or `file://` URL for local scripts.
    pub uri: String,
    pub owner: String,
    pub description: Option<String>,
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct GistPayload {
    html_url: String,
    #[serde(default)]
    owner: Option<GistOwner>,
    #[serde(default)]
    description: Option<String>,
    files: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GistOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    raw_url: String,
}

/// Resolves `input` as a local script when the path exists, otherwise as a
/// remote gist id.
pub fn fetch_metadata(input: &str, settings: &Settings) -> Result<GistMetadata> {
    let path = Path::new(input);
    if path.exists() {
        local_metadata(input, path)
    } else {
        remote_metadata(input, settings)
    }
}

/// Names the script after the path as given. A symlink keeps its own name.
pub fn local_metadata(id: &str, path: &Path) -> Result<GistMetadata> {
    let absolute = absolutize(path)?;
    let meta = fs::metadata(&absolute)?;
    if !meta.is_file() {
        return Err(GistError::Fetch(format!(
            "{} is not a regular file",
            absolute.display()
        )));
    }
    let filename = absolute
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            GistError::Fetch(format!("{} does not name a file", absolute.display()))
        })?;
    Ok(GistMetadata {
        id: id.to_string(),
        filename,
        location: absolute.display().to_string(),
        uri: format!("file://{}", absolute.display()),
        owner: owner_name(meta.uid())?,
        description: None,
        local_path: Some(absolute),
    })
}

fn owner_name(uid: u32) -> Result<String> {
    let user = User::from_uid(Uid::from_raw(uid))?;
    Ok(user.map_or_else(|| uid.to_string(), |user| user.name))
}

pub fn remote_metadata(id: &str, settings: &Settings) -> Result<GistMetadata> {
    let url = format!(
        "{}/gists/{}",
        settings.github.api_url.trim_end_matches('/'),
        id
    );
    tracing::info!(%url, "fetching gist metadata");
    let client = reqwest::blocking::Client::new();
    let mut request = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", USER_AGENT);
    if let Some(token) = settings.github_token() {
        request = request.bearer_auth(token);
    }
    let response = request.send()?;
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(GistError::Fetch(format!(
            "gist {id} lookup failed: HTTP {} {}",
            status,
            body.trim()
        )));
    }
    parse_gist_payload(id, &body)
}

pub fn parse_gist_payload(id: &str, body: &str) -> Result<GistMetadata> {
    let payload: GistPayload = serde_json::from_str(body)?;
    let (filename, file) = payload
        .files
        .into_iter()
        .next()
        .ok_or_else(|| GistError::Fetch(format!("gist {id} has no files")))?;
    if !is_plain_file_name(&filename) {
        return Err(GistError::Fetch(format!(
            "gist {id} has unsafe file name {filename:?}"
        )));
    }
    let file: GistFile = serde_json::from_value(file)?;
    let description = payload
        .description
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    Ok(GistMetadata {
        id: id.to_string(),
        filename,
        location: payload.html_url,
        uri: file.raw_url,
        owner: payload
            .owner
            .map_or_else(|| "anonymous".to_string(), |owner| owner.login),
        description,
        local_path: None,
    })
}

/// True for a single path component, so joining it onto a directory stays
/// inside that directory.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Places the script at `<gist_dir>/<filename>` and returns its path.
pub fn materialize(
    gist: &GistMetadata,
    gist_dir: &Path,
    dry_run: bool,
    cleanup: &mut CleanupList,
) -> Result<PathBuf> {
    match &gist.local_path {
        Some(source) => copy_local(source, gist_dir, dry_run, cleanup),
        None => download_remote(&gist.uri, &gist.filename, gist_dir, dry_run, cleanup),
    }
}

fn prepare_dir(gist_dir: &Path, dry_run: bool, cleanup: &mut CleanupList) -> Result<()> {
    if dry_run {
        if !gist_dir.is_dir() {
            println!("[dry-run] mkdir -p {}", gist_dir.display());
        }
        return Ok(());
    }
    if ensure_dir(gist_dir, cleanup)? {
        println!("Created {}", gist_dir.display());
    }
    Ok(())
}

pub fn copy_local(
    source: &Path,
    gist_dir: &Path,
    dry_run: bool,
    cleanup: &mut CleanupList,
) -> Result<PathBuf> {
    prepare_dir(gist_dir, dry_run, cleanup)?;
    let filename = source
        .file_name()
        .ok_or_else(|| GistError::Fetch(format!("{} does not name a file", source.display())))?;
    let destination = gist_dir.join(filename);
    if already_in_dir(source, gist_dir) {
        tracing::debug!(path = %source.display(), "script already in gist dir");
        return Ok(destination);
    }
    if dry_run {
        println!("[dry-run] cp -p {} {}", source.display(), destination.display());
        return Ok(destination);
    }
    let existed = destination.exists();
    fs::copy(source, &destination)?;
    let modified = fs::metadata(source)?.modified()?;
    fs::File::options()
        .write(true)
        .open(&destination)?
        .set_modified(modified)?;
    if !existed {
        cleanup.push(destination.clone());
    }
    println!("Copied {} to {}", source.display(), destination.display());
    Ok(destination)
}

fn already_in_dir(source: &Path, dir: &Path) -> bool {
    let parent = match source.parent() {
        Some(parent) => parent,
        None => return false,
    };
    match (fs::canonicalize(parent), fs::canonicalize(dir)) {
        (Ok(parent), Ok(dir)) => parent == dir,
        _ => false,
    }
}

pub fn download_remote(
    raw_url: &str,
    filename: &str,
    gist_dir: &Path,
    dry_run: bool,
    cleanup: &mut CleanupList,
) -> Result<PathBuf> {
    prepare_dir(gist_dir, dry_run, cleanup)?;
    let destination = gist_dir.join(filename);
    if dry_run {
        println!("[dry-run] download {} -> {}", raw_url, destination.display());
        return Ok(destination);
    }
    let client = reqwest::blocking::Client::new();
    let response = client.get(raw_url).header("User-Agent", USER_AGENT).send()?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(GistError::Fetch(format!(
            "download failed: {} (HTTP {} {})",
            raw_url,
            status,
            body.trim()
        )));
    }
    let bytes = response.bytes()?;
    // An existing file of the same name is overwritten but stays untracked.
    let existed = destination.exists();
    fs::write(&destination, &bytes)?;
    if !existed {
        cleanup.push(destination.clone());
    }
    println!("Downloaded {} to {}", raw_url, destination.display());
    Ok(destination)
}
