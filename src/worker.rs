use std::{path::PathBuf, sync::mpsc::{self, TryRecvError}, thread::JoinHandle};

use log::{trace, warn};
use tokio::runtime::Handle;

use crate::{error::{Error, Result}, queue::{self, DownloadRequest, ItemDownloader, ItemStatus, ModQueue}, schemas::CollectionListing, scrape::{self, WorkshopPageClient}};

#[derive(Debug, PartialEq)]
pub enum Job {
    LoadCollection(String),
    AddLink(String),
    AddFromFile(PathBuf),
    Download {
        request: DownloadRequest,
        ids: Vec<String>,
    },
}

#[derive(Debug, PartialEq)]
pub enum Event {
    Log(String),
    CollectionLoaded(CollectionListing),
    ItemsAdded {
        ids: Vec<String>,
        app_id: Option<String>,
    },
    ItemFinished {
        index: usize,
        total: usize,
        status: ItemStatus,
    },
    /// Sent after every job, the worker is ready for the next one
    Idle,
}

/// One background thread that runs jobs strictly one after another
pub struct Worker {
    jobs: mpsc::Sender<Job>,
    events: mpsc::Receiver<Event>,
    _jh: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<D>(runtime: Handle, downloader: D) -> Worker
    where
        D: ItemDownloader + Send + 'static
    {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (events_tx, events_rx) = mpsc::channel();

        let jh = std::thread::spawn(move || {
            let client = WorkshopPageClient::new();
            for job in jobs_rx {
                run_job(job, &runtime, &client, &downloader, &events_tx);
                if events_tx.send(Event::Idle).is_err() {
                    break;
                }
            }
            trace!("exiting worker thread");
        });

        Worker {
            jobs: jobs_tx,
            events: events_rx,
            _jh: jh,
        }
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| Error::Internal("worker thread has stopped".to_owned()))
    }

    pub fn try_recv(&self) -> Option<Event> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                warn!("worker thread disconnected");
                None
            }
        }
    }
}

fn run_job<D: ItemDownloader>(job: Job, runtime: &Handle, client: &WorkshopPageClient, downloader: &D, events: &mpsc::Sender<Event>) {
    let log = |msg: String| {
        let _ = events.send(Event::Log(msg));
    };

    match job {
        Job::LoadCollection(url) => {
            match runtime.block_on(client.fetch_collection(&url)) {
                Ok(listing) => {
                    log(format!("Loaded {} mods from collection", listing.items.len()));
                    if listing.app_id.is_none() {
                        log("Could not find the game ID on the collection page".to_owned());
                    }
                    let _ = events.send(Event::CollectionLoaded(listing));
                }
                Err(e) => log(format!("Error: {}", e)),
            }
        }
        Job::AddLink(link) => {
            match add_links(runtime, client, &[link], &log) {
                Ok(added) => {
                    let _ = events.send(added);
                }
                Err(e) => log(format!("Error: {}", e)),
            }
        }
        Job::AddFromFile(path) => {
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    log(format!("Error: could not read {}: {}", path.display(), e));
                    return;
                }
            };
            let links = scrape::workshop_links_in_text(&contents);
            if links.is_empty() {
                log(format!("No workshop links found in {}", path.display()));
                return;
            }
            match add_links(runtime, client, &links, &log) {
                Ok(added) => {
                    if let Event::ItemsAdded { ids, .. } = &added {
                        log(format!("Added {} mods from {}", ids.len(), path.display()));
                    }
                    let _ = events.send(added);
                }
                Err(e) => log(format!("Error: {}", e)),
            }
        }
        Job::Download { request, ids } => {
            let mut queue = ModQueue::from_ids(ids);
            let summary = queue::run_downloads(&mut queue, downloader, &request, |index, total, entry| {
                log(queue::status_message(&entry.id, &entry.status));
                let _ = events.send(Event::ItemFinished {
                    index,
                    total,
                    status: entry.status.clone(),
                });
            });
            log(format!("Done, {} succeeded and {} failed", summary.succeeded, summary.failed));
        }
    }
}

/// Resolve each link to an item ID and look up its game ID; the last game ID found wins
fn add_links(runtime: &Handle, client: &WorkshopPageClient, links: &[String], log: &impl Fn(String)) -> Result<Event> {
    let mut ids = vec![];
    let mut app_id = None;
    for link in links {
        let Some(id) = scrape::workshop_id_from_link(link) else {
            if links.len() == 1 {
                return Err(Error::NotWorkshopLink(link.clone()));
            }
            log(format!("Skipping '{}', no workshop item ID found", link));
            continue;
        };
        let page = if link.trim() == id {
            scrape::item_page_url(&id)
        } else {
            link.trim().to_owned()
        };
        match runtime.block_on(client.fetch_item_app_id(&page)) {
            Ok(Some(found)) => app_id = Some(found),
            Ok(None) => trace!("no game ID on page {}", page),
            Err(e) => log(format!("Could not look up the game ID for mod {}: {}", id, e)),
        }
        ids.push(id);
    }
    Ok(Event::ItemsAdded { ids, app_id })
}
