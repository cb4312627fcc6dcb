use std::path::PathBuf;

use log::{trace, warn};

use crate::{command::{self, DownloadOutcome}, error::{Error, Result}};

#[derive(Clone, Debug, PartialEq)]
pub enum ItemStatus {
    Pending,
    Succeeded,
    Failed(String),
    Unexpected,
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemStatus::Succeeded)
    }
}

impl From<DownloadOutcome> for ItemStatus {
    fn from(value: DownloadOutcome) -> Self {
        match value {
            DownloadOutcome::Succeeded => ItemStatus::Succeeded,
            DownloadOutcome::Failed { reason } => ItemStatus::Failed(reason),
            DownloadOutcome::Unexpected => ItemStatus::Unexpected,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModEntry {
    pub id: String,
    pub status: ItemStatus,
}

impl ModEntry {
    pub fn new(id: impl Into<String>) -> ModEntry {
        ModEntry {
            id: id.into(),
            status: ItemStatus::Pending,
        }
    }
}

/// Ordered list of workshop items to download. Duplicates are kept.
#[derive(Clone, Debug, Default)]
pub struct ModQueue {
    entries: Vec<ModEntry>,
}

impl ModQueue {
    pub fn from_ids(ids: impl IntoIterator<Item = impl Into<String>>) -> ModQueue {
        let mut queue = ModQueue::default();
        queue.replace_all(ids);
        queue
    }

    pub fn replace_all(&mut self, ids: impl IntoIterator<Item = impl Into<String>>) {
        self.entries = ids.into_iter().map(ModEntry::new).collect();
    }

    pub fn push(&mut self, id: impl Into<String>) {
        self.entries.push(ModEntry::new(id));
    }

    pub fn remove(&mut self, index: usize) -> Option<ModEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn reset_statuses(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.status = ItemStatus::Pending;
        }
    }

    pub fn set_status(&mut self, index: usize, status: ItemStatus) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.status = status;
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn entries(&self) -> &[ModEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ModEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DownloadRequest {
    pub steamcmd_path: PathBuf,
    pub app_id: String,
    pub output_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

pub trait ItemDownloader {
    fn download(&self, request: &DownloadRequest, workshop_item_id: &str) -> Result<DownloadOutcome>;
}

/// Downloads through the steamcmd executable named in the request
pub struct SteamCmd;

impl ItemDownloader for SteamCmd {
    fn download(&self, request: &DownloadRequest, workshop_item_id: &str) -> Result<DownloadOutcome> {
        let report = command::download_workshop_item(&request.steamcmd_path, &request.app_id, workshop_item_id)?;
        if report.exit_code != 0 {
            trace!("steamcmd exited with code {} for {}", report.exit_code, workshop_item_id);
        }
        if report.outcome == DownloadOutcome::Unexpected {
            warn!("unexpected steamcmd output for {}, last line was {:?}", workshop_item_id, report.output.last());
        }
        if let (true, Some(output_dir)) = (report.outcome.is_success(), &request.output_dir) {
            command::copy_downloaded_workshop_item(&request.steamcmd_path, &request.app_id, workshop_item_id, output_dir)?;
        }
        Ok(report.outcome)
    }
}

pub fn validate(request: &DownloadRequest, queue: &ModQueue) -> Result<()> {
    command::validate_steamcmd_path(&request.steamcmd_path)?;
    if request.app_id.trim().is_empty() || request.steamcmd_path.as_os_str().is_empty() {
        return Err(Error::MissingFields());
    }
    if queue.is_empty() {
        return Err(Error::NoWorkshopItems());
    }
    Ok(())
}

pub fn status_message(workshop_item_id: &str, status: &ItemStatus) -> String {
    match status {
        ItemStatus::Pending => format!("Mod with ID: {} is waiting to be downloaded", workshop_item_id),
        ItemStatus::Succeeded => format!("Successfully downloaded mod with ID: {}", workshop_item_id),
        ItemStatus::Failed(reason) => format!("Failed to download mod with ID: {}. Reason: {}", workshop_item_id, reason),
        ItemStatus::Unexpected => format!("Unexpected output for mod with ID: {}. Please check manually.", workshop_item_id),
    }
}

/// Download every queued item in order, one at a time.
/// `on_progress` is called after each item with `(index, total, entry)`.
pub fn run_downloads<D: ItemDownloader>(
    queue: &mut ModQueue,
    downloader: &D,
    request: &DownloadRequest,
    mut on_progress: impl FnMut(usize, usize, &ModEntry),
) -> RunSummary {
    let total = queue.len();
    let mut summary = RunSummary::default();
    for (index, entry) in queue.entries.iter_mut().enumerate() {
        entry.status = match downloader.download(request, &entry.id) {
            Ok(outcome) => outcome.into(),
            Err(e) => {
                warn!("error downloading workshop item {}: {}", entry.id, e);
                ItemStatus::Failed(e.to_string())
            }
        };
        if entry.status.is_success() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
        on_progress(index, total, entry);
    }
    summary
}
