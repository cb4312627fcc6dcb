use std::{io::Write, path::PathBuf};

use clap::{Parser, Subcommand, Args};
use itertools::Itertools;
use log::{info, warn};
use queue::{DownloadRequest, ModQueue, SteamCmd};
use scrape::WorkshopPageClient;

mod command;
mod error;
mod queue;
mod schemas;
mod scrape;
mod ui;
mod worker;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        // log output would tear up the alternate screen
        let level = if matches!(cli.command, CliCommand::Ui) { "off" } else { "warn" };
        std::env::set_var("RUST_LOG", level);
    }
    pretty_env_logger::init();

    let mut config = command::get_config_or_default()?;
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        CliCommand::Init => {
            let steamcmd_dir = command::get_root_dir()?.join("steamcmd");
            println!("Installing steamcmd to {}", steamcmd_dir.display());
            let mut install = command::install_steamcmd(&steamcmd_dir)?;
            let lines = install.take_output().into_iter();
            std::thread::spawn(move || {
                for line in lines {
                    info!("{}", line);
                }
            });
            install.wait()?;
            config.steamcmd_path = command::steamcmd_exe_in(&steamcmd_dir).display().to_string();
            command::save_config(command::get_config_file()?, &config)?;
            println!("Done")
        },
        CliCommand::Load(args) => {
            let client = WorkshopPageClient::new();
            let listing = runtime.block_on(client.fetch_collection(&args.url))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("Game ID:       {}", listing.app_id.as_deref().unwrap_or("<not found>"));
                println!("{} items", listing.items.len());
                for id in listing.items {
                    println!("{}", id);
                }
            }
        },
        CliCommand::Download(args) => {
            let failed = download(&runtime, &config, args)?;
            if failed != 0 {
                std::process::exit(1);
            }
        },
        CliCommand::Ui => {
            ui::Ui::run(runtime.handle().clone(), &config)?;
        },
        CliCommand::Open(item) => {
            let id = scrape::workshop_id_from_link(&item.item)
                .ok_or_else(|| error::Error::NotWorkshopLink(item.item.clone()))?;
            let url = scrape::item_page_url(&id);
            println!("Opening {}", url);
            open::that(&url)?;
        },
        CliCommand::Cleanup(args) => {
            let steamcmd = command::resolve_path(&config.steamcmd_path)?;
            println!("Clearing steamcmd workshop cache for app {}", args.app_id);
            command::purge_download_cache(steamcmd, &args.app_id)?;
            println!("Done");
        },
    }

    Ok(())
}

/// Headless download run, returns the number of items that did not download
fn download(runtime: &tokio::runtime::Runtime, config: &schemas::Config, args: DownloadArgs) -> Result<usize, Box<dyn std::error::Error>> {
    let client = WorkshopPageClient::new();
    let mut ids = vec![];
    let mut collection_app_id = None;
    let mut item_app_id = None;

    if let Some(url) = &args.collection {
        let listing = runtime.block_on(client.fetch_collection(url))?;
        println!("Loaded {} mods from collection", listing.items.len());
        collection_app_id = listing.app_id;
        ids.extend(listing.items);
    }

    let file_links = match &args.file {
        Some(file) => scrape::workshop_links_in_text(&std::fs::read_to_string(file)?),
        None => vec![],
    };
    let need_app_id = args.app_id.is_none() && collection_app_id.is_none();
    for (link, id) in link_ids(&args.link, &file_links)? {
        if need_app_id {
            let page = if link.trim() == id { scrape::item_page_url(&id) } else { link.trim().to_owned() };
            match runtime.block_on(client.fetch_item_app_id(&page)) {
                Ok(Some(found)) => item_app_id = Some(found),
                Ok(None) => (),
                Err(e) => warn!("could not look up the game ID for mod {}: {}", id, e),
            }
        }
        ids.push(id);
    }

    let app_id = resolve_app_id(args.app_id, collection_app_id, item_app_id, config.app_id.clone());
    let steamcmd = PathBuf::from(args.steamcmd.unwrap_or_else(|| config.steamcmd_path.clone()));
    let output_dir = match args.output.or_else(|| config.output_path.clone()) {
        Some(dir) => Some(command::resolve_path(dir)?),
        None => None,
    };

    let mut queue = ModQueue::from_ids(ids);
    let mut request = DownloadRequest {
        steamcmd_path: steamcmd,
        app_id,
        output_dir,
    };
    queue::validate(&request, &queue)?;
    request.steamcmd_path = command::resolve_path(&request.steamcmd_path)?;

    // Confirm
    println!("---------------------");
    println!("Game ID:       {}", request.app_id);
    println!("steamcmd:      {}", request.steamcmd_path.display());
    println!("Workshop IDs:  {}", queue.ids().iter().join(" "));
    println!("---------------------");
    if !args.yes {
        print!("Download {} items? [Y/n] ", queue.len());
        std::io::stdout().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().is_empty() && input.trim().to_lowercase() != "y" {
            println!("Aborting");
            return Ok(0)
        }
    }

    let summary = queue::run_downloads(&mut queue, &SteamCmd, &request, |index, total, entry| {
        println!("[{}/{}] {}", index + 1, total, queue::status_message(&entry.id, &entry.status));
    });

    if summary.failed != 0 {
        println!("Done with {} errors", summary.failed);
    } else {
        println!("Done");
    }
    Ok(summary.failed)
}

/// Pairs each link with its workshop ID, `--link` values first.
/// A bad `--link` is an error, a bad line from a file is skipped.
fn link_ids(links: &[String], file_links: &[String]) -> error::Result<Vec<(String, String)>> {
    let mut ids = vec![];
    for link in links {
        let id = scrape::workshop_id_from_link(link)
            .ok_or_else(|| error::Error::NotWorkshopLink(link.clone()))?;
        ids.push((link.clone(), id));
    }
    for link in file_links {
        match scrape::workshop_id_from_link(link) {
            Some(id) => ids.push((link.clone(), id)),
            None => warn!("{}, skipping", error::Error::NotWorkshopLink(link.clone())),
        }
    }
    Ok(ids)
}

/// Flag, then collection page, then item pages, then config
fn resolve_app_id(flag: Option<String>, collection: Option<String>, item: Option<String>, config: Option<String>) -> String {
    flag.or(collection)
        .or(item)
        .or(config)
        .unwrap_or_default()
}

#[derive(Parser)]
#[command(about = "Download the mods of a Steam Workshop collection with steamcmd")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand
}

#[derive(Subcommand)]
enum CliCommand {
    /// Install steamcmd next to this executable
    Init,
    /// List the mods of a collection
    Load(LoadArgs),
    /// Download mods without the interactive UI
    Download(DownloadArgs),
    /// Interactive terminal UI
    Ui,
    /// Open a mod's workshop page in the browser
    Open(ItemArg),
    /// Clear steamcmd's workshop cache for a game
    Cleanup(AppIdArg),
}

#[derive(Args)]
struct LoadArgs {
    url: String,
    /// Print the listing as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DownloadArgs {
    /// Collection page to take the mod list from
    #[arg(long)]
    collection: Option<String>,
    /// Mod link or ID, may be repeated
    #[arg(long)]
    link: Vec<String>,
    /// Text file with one mod link per line
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long)]
    app_id: Option<String>,
    #[arg(long)]
    steamcmd: Option<String>,
    /// Copy each downloaded mod into this directory
    #[arg(long)]
    output: Option<String>,
    /// Don't ask for confirmation
    #[arg(short, long)]
    yes: bool,
}

#[derive(Args)]
struct ItemArg {
    item: String,
}

#[derive(Args)]
struct AppIdArg {
    #[arg(long)]
    app_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_owned())
    }

    #[test]
    fn app_id_precedence() {
        assert_eq!(resolve_app_id(s("1"), s("2"), s("3"), s("4")), "1");
        assert_eq!(resolve_app_id(None, s("2"), s("3"), s("4")), "2");
        assert_eq!(resolve_app_id(None, None, s("3"), s("4")), "3");
        assert_eq!(resolve_app_id(None, None, None, s("4")), "4");
        assert_eq!(resolve_app_id(None, None, None, None), "");
    }

    #[test]
    fn link_ids_keep_order() {
        let links = vec!["5".to_owned(), "https://steamcommunity.com/sharedfiles/filedetails/?id=6".to_owned()];
        let file_links = vec!["https://steamcommunity.com/sharedfiles/filedetails/?id=7&searchtext=".to_owned()];
        let ids: Vec<_> = link_ids(&links, &file_links).unwrap().into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, vec!["5", "6", "7"]);
    }

    #[test]
    fn bad_file_line_is_skipped() {
        let file_links = vec![
            "https://steamcommunity.com/sharedfiles/filedetails/?id=".to_owned(),
            "https://steamcommunity.com/sharedfiles/filedetails/?id=8".to_owned(),
        ];
        let ids = link_ids(&[], &file_links).unwrap();
        assert_eq!(ids, vec![("https://steamcommunity.com/sharedfiles/filedetails/?id=8".to_owned(), "8".to_owned())]);
    }

    #[test]
    fn bad_link_flag_is_an_error() {
        let links = vec!["https://example.com/".to_owned()];
        let file_links = vec!["https://steamcommunity.com/sharedfiles/filedetails/?id=8".to_owned()];
        assert!(matches!(link_ids(&links, &file_links), Err(error::Error::NotWorkshopLink(_))));
    }
}
