use std::{ffi::OsStr, io::{BufRead, BufReader, Cursor, Write}, path::{Path, PathBuf}, process::{Child, Command, Stdio}, sync::mpsc, thread::JoinHandle};

use curl::easy::Easy;
use flate2::read::GzDecoder;
use fs_extra::dir::CopyOptions;
use log::{error, info, trace, warn};
use zip::ZipArchive;

use crate::{error::{Error, Result}, schemas::Config};

const SUCCESS_MARKER: &str = "Success. Downloaded item";
const FAILURE_MARKER: &str = "ERROR! Download item";

// only one variant is used per platform
#[allow(dead_code)]
enum ArchiveKind {
    Zip,
    TarGz,
}

#[cfg(windows)]
const STEAMCMD_ARCHIVE: (&str, ArchiveKind) = ("https://steamcdn-a.akamaihd.net/client/installer/steamcmd.zip", ArchiveKind::Zip);
#[cfg(target_os = "macos")]
const STEAMCMD_ARCHIVE: (&str, ArchiveKind) = ("https://steamcdn-a.akamaihd.net/client/installer/steamcmd_osx.tar.gz", ArchiveKind::TarGz);
#[cfg(not(any(windows, target_os = "macos")))]
const STEAMCMD_ARCHIVE: (&str, ArchiveKind) = ("https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz", ArchiveKind::TarGz);

#[cfg(windows)]
const STEAMCMD_EXE: &str = "steamcmd.exe";
#[cfg(not(windows))]
const STEAMCMD_EXE: &str = "steamcmd.sh";

#[derive(Clone, Debug, PartialEq)]
pub enum DownloadOutcome {
    Succeeded,
    Failed { reason: String },
    Unexpected,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Succeeded)
    }
}

pub struct DownloadReport {
    pub outcome: DownloadOutcome,
    pub output: Vec<String>,
    pub exit_code: i32,
}

/// Install steamcmd into `steamcmd_dir`, replacing whatever is there.
/// The returned process is steamcmd's first run, which self-updates.
pub fn install_steamcmd(steamcmd_dir: impl AsRef<Path>) -> Result<WorkerProcess> {
    let steamcmd_dir = steamcmd_dir.as_ref();
    if steamcmd_dir.is_dir() {
        trace!("Removing existing steamcmd installation ...");
        std::fs::remove_dir_all(steamcmd_dir)?;
        trace!("Removed existing steamcmd installation")
    }

    let (url, kind) = STEAMCMD_ARCHIVE;
    let buf = download_bytes(url)?;
    match kind {
        ArchiveKind::Zip => unzip(buf, steamcmd_dir)?,
        ArchiveKind::TarGz => untar_gz(buf, steamcmd_dir)?,
    }

    WorkerProcess::spawn(&steamcmd_dir.join(STEAMCMD_EXE), &["+quit"])
}

pub fn steamcmd_exe_in(steamcmd_dir: impl AsRef<Path>) -> PathBuf {
    steamcmd_dir.as_ref().join(STEAMCMD_EXE)
}

/// Accepts `steamcmd`, `steamcmd.exe`, `steamcmd.sh` in any letter case
pub fn validate_steamcmd_path(steamcmd: impl AsRef<Path>) -> Result<()> {
    let steamcmd = steamcmd.as_ref();
    let stem = steamcmd
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase());
    if stem.as_deref() == Some("steamcmd") {
        Ok(())
    } else {
        Err(Error::InvalidSteamCmdPath(steamcmd.display().to_string()))
    }
}

pub fn runscript_contents(app_id: &str, workshop_item_id: &str) -> String {
    format!("login anonymous\nworkshop_download_item {} {}\nquit\n", app_id, workshop_item_id)
}

/// Run steamcmd for a single workshop item and classify what it printed
pub fn download_workshop_item(steamcmd: impl AsRef<Path>, app_id: impl AsRef<str>, workshop_item_id: impl AsRef<str>) -> Result<DownloadReport> {
    let mut script = tempfile::Builder::new()
        .prefix("steamcmd_script")
        .suffix(".txt")
        .tempfile()?;
    script.write_all(runscript_contents(app_id.as_ref(), workshop_item_id.as_ref()).as_bytes())?;
    script.flush()?;
    // close our handle so steamcmd can open it on every platform, the path is removed on drop
    let script_path = script.into_temp_path();

    let mut process = WorkerProcess::spawn(steamcmd.as_ref(), &[OsStr::new("+runscript"), script_path.as_os_str()])?;
    let mut output = vec![];
    for line in process.take_output() {
        info!("{}", line);
        output.push(line);
    }
    let exit_code = process.exit_code()?;
    script_path.close()?;

    let outcome = classify_output(&output.join("\n"));
    Ok(DownloadReport {
        outcome,
        output,
        exit_code,
    })
}

pub fn classify_output(stdout: &str) -> DownloadOutcome {
    if stdout.contains(SUCCESS_MARKER) {
        DownloadOutcome::Succeeded
    } else if stdout.contains(FAILURE_MARKER) {
        let reason = stdout
            .split("ERROR!")
            .nth(1)
            .and_then(|s| s.lines().next())
            .unwrap_or_default()
            .trim()
            .to_owned();
        DownloadOutcome::Failed { reason }
    } else {
        DownloadOutcome::Unexpected
    }
}

/// steamcmd leaves downloaded items at <steamcmddir>/steamapps/workshop/content/<appid>/<workshopid>
pub fn workshop_content_dir(steamcmd: impl AsRef<Path>, app_id: impl AsRef<str>, workshop_item_id: impl AsRef<str>) -> PathBuf {
    steamcmd_dir(steamcmd.as_ref())
        .join("steamapps/workshop/content")
        .join(app_id.as_ref())
        .join(workshop_item_id.as_ref())
}

pub fn copy_downloaded_workshop_item(steamcmd: impl AsRef<Path>, app_id: impl AsRef<str>, workshop_item_id: impl AsRef<str>, output_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let source_dir = workshop_content_dir(steamcmd, app_id, workshop_item_id.as_ref());
    if source_dir.is_dir() {
        std::fs::create_dir_all(output_dir.as_ref())?;
        let dest_dir = output_dir.as_ref().join(workshop_item_id.as_ref());
        trace!("Copying {} to {}", source_dir.display(), dest_dir.display());
        if dest_dir.exists() {
            trace!("Destination already exists, deleting");
            if dest_dir.is_file() {
                std::fs::remove_file(&dest_dir)?;
            } else {
                std::fs::remove_dir_all(&dest_dir)?;
            }
        }
        fs_extra::copy_items(&[source_dir], &dest_dir, &CopyOptions::new().copy_inside(true))?;
        Ok(dest_dir)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Directory {} not found", source_dir.display())).into())
    }
}

/// steamcmd keeps downloaded content in its own directory.
/// Purging it is safe once items have been copied out or are no longer wanted.
pub fn purge_download_cache(steamcmd: impl AsRef<Path>, app_id: impl AsRef<str>) -> Result<()> {
    let workshop_dir = steamcmd_dir(steamcmd.as_ref()).join("steamapps/workshop");
    for sub in ["content", "downloads"] {
        let dir = workshop_dir.join(sub).join(app_id.as_ref());
        if dir.is_dir() {
            trace!("Removing {}", dir.display());
            std::fs::remove_dir_all(dir)?;
        }
    }
    Ok(())
}

pub fn default_config() -> Config {
    Config {
        steamcmd_path: format!("steamcmd/{}", STEAMCMD_EXE),
        app_id: None,
        output_path: None,
    }
}

pub fn get_config_or_default() -> Result<Config> {
    load_or_create_config(get_config_file()?)
}

pub fn load_or_create_config(config_file: impl AsRef<Path>) -> Result<Config> {
    let config_file = config_file.as_ref();
    if !config_file.exists() {
        warn!("Config file does not exist, creating default at {}", config_file.display());
        save_config(config_file, &default_config())?;
    }
    Ok(toml::from_str::<Config>(&std::fs::read_to_string(config_file)?)?)
}

pub fn save_config(config_file: impl AsRef<Path>, config: &Config) -> Result<()> {
    std::fs::write(config_file, toml::to_string_pretty(config)?)?;
    Ok(())
}

pub fn get_config_file() -> Result<PathBuf> {
    Ok(get_root_dir()?.join("config.toml"))
}

/// Relative paths are relative to the executable's directory
pub fn resolve_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        Ok(get_root_dir()?.join(path))
    }
}

pub fn get_root_dir() -> Result<PathBuf> {
    let current_exe = dunce::canonicalize(std::env::current_exe()?)?;
    let dir = current_exe
        .parent()
        .ok_or_else(|| Error::Internal("executable has no parent directory".to_owned()))?;
    Ok(dir.into())
}

fn steamcmd_dir(steamcmd: &Path) -> PathBuf {
    steamcmd.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn download_bytes(url: &str) -> Result<Vec<u8>> {
    let mut curl = Easy::new();
    curl.follow_location(true)?;
    curl.fail_on_error(true)?;
    curl.url(url)?;
    let mut buf = Vec::new();
    {
        let mut transfer = curl.transfer();
        transfer.write_function(|data| {
            buf.extend_from_slice(data);
            Ok(data.len())
        })?;
        trace!("Downloading from {} ...", url);
        transfer.perform()?;
    }
    trace!("Download complete, downloaded {} bytes", buf.len());
    Ok(buf)
}

fn unzip(buf: Vec<u8>, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(buf))?;
    archive.extract(dest)?;
    trace!("Extracted to {}", dest.display());
    Ok(())
}

fn untar_gz(buf: Vec<u8>, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(buf)));
    archive.unpack(dest)?;
    trace!("Extracted to {}", dest.display());
    Ok(())
}

pub struct WorkerProcess {
    output: Option<mpsc::Receiver<String>>,
    proc: Child,
    _read_jh: JoinHandle<Result<()>>,
}

impl WorkerProcess {
    pub fn spawn<I, S>(program: &Path, args: I) -> Result<WorkerProcess>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>
    {
        let mut command = Command::new(program);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::null());

        trace!("spawning WorkerProcess with command {:?}", command);
        let mut proc = command.spawn()?;
        let out = proc
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout was not captured".to_owned()))?;

        let (lines_tx, lines_rx) = mpsc::channel();

        let read_jh = std::thread::spawn::<_, Result<()>>(move || {
            let mut br = BufReader::new(out);
            loop {
                let mut buf = vec![];
                match br.read_until(b'\n', &mut buf) {
                    Err(e) => {
                        error!("error in read_jh {}", e);
                        break;
                    },
                    Ok(0) => {
                        trace!("read_jh reached EOF");
                        break;
                    }
                    Ok(_) => {
                        // clean up steamcmd output
                        let stripped = strip_ansi_escapes::strip(&buf);
                        let line = String::from_utf8_lossy(&stripped);
                        let trimmed = line.trim().to_owned();
                        if !trimmed.is_empty() && lines_tx.send(trimmed).is_err() {
                            break;
                        }
                    }
                }
            }
            trace!("exiting read_jh");
            Ok(())
        });

        Ok(WorkerProcess {
            proc,
            output: Some(lines_rx),
            _read_jh: read_jh,
        })
    }

    /// Cleaned stdout lines; the receiver drains once the process closes stdout.
    /// Only the first call yields lines.
    pub fn take_output(&mut self) -> mpsc::Receiver<String> {
        self.output.take().unwrap_or_else(|| mpsc::channel().1)
    }

    pub fn exit_code(&mut self) -> Result<i32> {
        let exit = self.proc.wait()?;
        trace!("proc is done with {}", exit);
        Ok(exit.code().unwrap_or(-1))
    }

    pub fn wait(&mut self) -> Result<()> {
        match self.exit_code()? {
            0 => Ok(()),
            code => Err(Error::WorkerExitCode(code)),
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // no-op if the process already exited
        if let Ok(None) = self.proc.try_wait() {
            let _ = self.proc.kill();
            let _ = self.proc.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_marker_wins() {
        let out = "Loading Steam API...OK\nSuccess. Downloaded item 1234 to \"/steamapps/workshop/content/281990/1234\" (5 bytes)";
        assert_eq!(classify_output(out), DownloadOutcome::Succeeded);
        assert!(classify_output(out).is_success());
    }

    #[test]
    fn failure_reason_is_text_after_first_error() {
        let out = "Logging in user 'anonymous' to Steam Public...OK\nERROR! Download item 1234 failed (Failure).\nUnloading Steam API...OK";
        assert_eq!(classify_output(out), DownloadOutcome::Failed {
            reason: "Download item 1234 failed (Failure).".to_owned(),
        });
        assert!(!classify_output(out).is_success());
    }

    #[test]
    fn failure_reason_stops_at_next_error() {
        assert_eq!(classify_output("ERROR! Download item 1 failed ERROR! x"), DownloadOutcome::Failed {
            reason: "Download item 1 failed".to_owned(),
        });
    }

    #[test]
    fn unknown_output_is_unexpected() {
        assert_eq!(classify_output("ERROR! Failed to install app"), DownloadOutcome::Unexpected);
        assert_eq!(classify_output(""), DownloadOutcome::Unexpected);
    }

    #[cfg(windows)]
    #[test]
    fn steamcmd_backslash_path() {
        assert!(validate_steamcmd_path("C:\\steamcmd\\steamcmd.exe").is_ok());
    }

    #[test]
    fn runscript_logs_in_anonymously() {
        assert_eq!(
            runscript_contents("281990", "1234"),
            "login anonymous\nworkshop_download_item 281990 1234\nquit\n");
    }

    #[test]
    fn steamcmd_path_shape() {
        assert!(validate_steamcmd_path("C:/steamcmd/steamcmd.exe").is_ok());
        assert!(validate_steamcmd_path("/opt/steamcmd/STEAMCMD.EXE").is_ok());
        assert!(validate_steamcmd_path("/opt/steamcmd/steamcmd.sh").is_ok());
        assert!(validate_steamcmd_path("/usr/bin/steamcmd").is_ok());
        assert!(matches!(validate_steamcmd_path("/usr/bin/steam"), Err(Error::InvalidSteamCmdPath(_))));
        assert!(validate_steamcmd_path("").is_err());
    }

    #[test]
    fn content_dir_sits_next_to_steamcmd() {
        let dir = workshop_content_dir("/opt/steamcmd/steamcmd.sh", "281990", "1234");
        assert_eq!(dir, PathBuf::from("/opt/steamcmd/steamapps/workshop/content/281990/1234"));
    }

    #[test]
    fn copy_and_purge_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let steamcmd = root.path().join("steamcmd").join(STEAMCMD_EXE);
        let content = workshop_content_dir(&steamcmd, "281990", "1234");
        std::fs::create_dir_all(content.join("sub")).unwrap();
        std::fs::write(content.join("descriptor.mod"), "name=\"x\"").unwrap();
        std::fs::write(content.join("sub/file.txt"), "data").unwrap();
        let downloads = root.path().join("steamcmd/steamapps/workshop/downloads/281990");
        std::fs::create_dir_all(&downloads).unwrap();

        let out = root.path().join("mods");
        let copied = copy_downloaded_workshop_item(&steamcmd, "281990", "1234", &out).unwrap();
        assert_eq!(copied, out.join("1234"));
        assert!(copied.join("descriptor.mod").is_file());
        assert_eq!(std::fs::read_to_string(copied.join("sub/file.txt")).unwrap(), "data");

        // second copy replaces the first
        std::fs::write(copied.join("stale.txt"), "old").unwrap();
        copy_downloaded_workshop_item(&steamcmd, "281990", "1234", &out).unwrap();
        assert!(!copied.join("stale.txt").exists());

        purge_download_cache(&steamcmd, "281990").unwrap();
        assert!(!content.exists());
        assert!(!downloads.exists());
        assert!(copied.join("descriptor.mod").is_file());
    }

    #[test]
    fn copy_missing_item_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let steamcmd = root.path().join("steamcmd.exe");
        let result = copy_downloaded_workshop_item(&steamcmd, "1", "2", root.path().join("out"));
        assert!(matches!(result, Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn config_is_created_with_defaults() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("config.toml");
        let config = load_or_create_config(&file).unwrap();
        assert_eq!(config, default_config());
        assert!(file.is_file());

        let edited = Config {
            app_id: Some("294100".to_owned()),
            output_path: Some("mods".to_owned()),
            ..default_config()
        };
        save_config(&file, &edited).unwrap();
        assert_eq!(load_or_create_config(&file).unwrap(), edited);
    }

    #[cfg(unix)]
    #[test]
    fn download_runs_script_and_classifies() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let fake = root.path().join("steamcmd.sh");
        // echoes back the runscript so the test can see what was passed
        std::fs::write(&fake, "#!/bin/sh\ncat \"$2\"\nprintf '\\033[0mSuccess. Downloaded item 42 to somewhere\\n'\nexit 7\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let report = download_workshop_item(&fake, "281990", "42").unwrap();
        assert_eq!(report.outcome, DownloadOutcome::Succeeded);
        assert_eq!(report.exit_code, 7);
        assert_eq!(report.output, vec![
            "login anonymous",
            "workshop_download_item 281990 42",
            "quit",
            "Success. Downloaded item 42 to somewhere",
        ]);
    }
}
