use std::{io, path::PathBuf, time::Duration};

use crossterm::{event::{self, DisableMouseCapture, EnableMouseCapture, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers}, terminal::{EnterAlternateScreen, LeaveAlternateScreen}};
use log::warn;
use ratatui::{backend::{Backend, CrosstermBackend}, layout::{Constraint, Direction, Layout, Rect}, style::{Color, Modifier, Style}, text::{Line, Span}, widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap}, Frame, Terminal};
use tokio::runtime::Handle;

use crate::{command, queue::{self, DownloadRequest, ItemStatus, ModQueue, SteamCmd}, schemas::Config, scrape, worker::{Event, Job, Worker}};

const CONSOLE_LINES: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Focus {
    CollectionLink,
    AppId,
    SteamCmdPath,
    ModList,
}

impl Focus {
    fn next(self) -> Focus {
        match self {
            Focus::CollectionLink => Focus::AppId,
            Focus::AppId => Focus::SteamCmdPath,
            Focus::SteamCmdPath => Focus::ModList,
            Focus::ModList => Focus::CollectionLink,
        }
    }

    fn prev(self) -> Focus {
        match self {
            Focus::CollectionLink => Focus::ModList,
            Focus::AppId => Focus::CollectionLink,
            Focus::SteamCmdPath => Focus::AppId,
            Focus::ModList => Focus::SteamCmdPath,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PromptKind {
    AddLink,
    AddFromFile,
}

#[derive(Clone, Debug, PartialEq)]
struct Prompt {
    kind: PromptKind,
    input: String,
}

#[derive(Debug, PartialEq)]
pub enum Action {
    Submit(Job),
    OpenPage(String),
}

/// State of the interactive form, independent of the terminal
pub struct App {
    collection_link: String,
    app_id: String,
    steamcmd_path: String,
    output_dir: Option<PathBuf>,
    queue: ModQueue,
    list_state: ListState,
    console: Vec<String>,
    progress: (usize, usize),
    focus: Focus,
    prompt: Option<Prompt>,
    busy: bool,
    should_quit: bool,
}

impl App {
    pub fn new(config: &Config) -> App {
        App {
            collection_link: String::new(),
            app_id: config.app_id.clone().unwrap_or_default(),
            steamcmd_path: config.steamcmd_path.clone(),
            output_dir: config.output_path.as_ref().map(PathBuf::from),
            queue: ModQueue::default(),
            list_state: ListState::default(),
            console: vec![],
            progress: (0, 0),
            focus: Focus::CollectionLink,
            prompt: None,
            busy: false,
            should_quit: false,
        }
    }

    pub fn write_to_console(&mut self, message: impl AsRef<str>) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.console.push(format!("[{}] {}", stamp, message.as_ref()));
        if self.console.len() > CONSOLE_LINES {
            let excess = self.console.len() - CONSOLE_LINES;
            self.console.drain(..excess);
        }
    }

    pub fn apply_event(&mut self, event: Event) {
        match event {
            Event::Log(msg) => self.write_to_console(msg),
            Event::CollectionLoaded(listing) => {
                self.queue.replace_all(listing.items);
                self.list_state.select((!self.queue.is_empty()).then_some(0));
                if let Some(app_id) = listing.app_id {
                    self.app_id = app_id;
                }
            }
            Event::ItemsAdded { ids, app_id } => {
                for id in ids {
                    self.queue.push(id);
                }
                if self.list_state.selected().is_none() && !self.queue.is_empty() {
                    self.list_state.select(Some(0));
                }
                if let Some(app_id) = app_id {
                    self.app_id = app_id;
                }
            }
            Event::ItemFinished { index, total, status } => {
                self.queue.set_status(index, status);
                self.progress = (index + 1, total);
            }
            Event::Idle => self.busy = false,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return None;
        }
        if self.prompt.is_some() {
            return self.handle_prompt_key(key);
        }

        match key.code {
            KeyCode::Esc => {
                self.should_quit = true;
                None
            }
            KeyCode::Tab => {
                self.focus = self.focus.next();
                None
            }
            KeyCode::BackTab => {
                self.focus = self.focus.prev();
                None
            }
            KeyCode::F(5) => self.start_download(),
            _ if self.focus == Focus::ModList => self.handle_list_key(key),
            _ => self.handle_field_key(key),
        }
    }

    fn handle_field_key(&mut self, key: KeyEvent) -> Option<Action> {
        if self.busy {
            return None;
        }
        let focus = self.focus;
        let field = match focus {
            Focus::CollectionLink => &mut self.collection_link,
            Focus::AppId => &mut self.app_id,
            Focus::SteamCmdPath => &mut self.steamcmd_path,
            Focus::ModList => return None,
        };
        match key.code {
            KeyCode::Char(c) => field.push(c),
            KeyCode::Backspace => {
                field.pop();
            }
            KeyCode::Enter if focus == Focus::CollectionLink => return self.load_collection(),
            KeyCode::Enter => self.focus = focus.next(),
            _ => (),
        }
        None
    }

    fn handle_list_key(&mut self, key: KeyEvent) -> Option<Action> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
                None
            }
            KeyCode::Enter | KeyCode::Char('o') => self.open_selected(),
            KeyCode::Char('r') => {
                self.reset();
                None
            }
            _ if self.busy => None,
            KeyCode::Char('d') | KeyCode::Delete => {
                self.delete_selected();
                None
            }
            KeyCode::Char('a') => {
                self.prompt = Some(Prompt { kind: PromptKind::AddLink, input: String::new() });
                None
            }
            KeyCode::Char('f') => {
                self.prompt = Some(Prompt { kind: PromptKind::AddFromFile, input: String::new() });
                None
            }
            KeyCode::Char('s') => self.start_download(),
            _ => None,
        }
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) -> Option<Action> {
        let prompt = self.prompt.as_mut()?;
        match key.code {
            KeyCode::Char(c) => prompt.input.push(c),
            KeyCode::Backspace => {
                prompt.input.pop();
            }
            KeyCode::Esc => self.prompt = None,
            KeyCode::Enter => {
                let prompt = self.prompt.take()?;
                let input = prompt.input.trim().to_owned();
                if input.is_empty() {
                    return None;
                }
                let job = match prompt.kind {
                    PromptKind::AddLink => Job::AddLink(input),
                    PromptKind::AddFromFile => Job::AddFromFile(PathBuf::from(input)),
                };
                return self.submit(job);
            }
            _ => (),
        }
        None
    }

    fn submit(&mut self, job: Job) -> Option<Action> {
        self.busy = true;
        Some(Action::Submit(job))
    }

    fn load_collection(&mut self) -> Option<Action> {
        let url = self.collection_link.trim().to_owned();
        if url.is_empty() {
            self.write_to_console("Error: Please provide a mod collection link before pressing 'Load'.");
            return None;
        }
        self.submit(Job::LoadCollection(url))
    }

    fn start_download(&mut self) -> Option<Action> {
        if self.busy {
            return None;
        }
        let mut request = DownloadRequest {
            steamcmd_path: PathBuf::from(self.steamcmd_path.trim()),
            app_id: self.app_id.trim().to_owned(),
            output_dir: self.output_dir.clone(),
        };
        if let Err(e) = queue::validate(&request, &self.queue) {
            self.write_to_console(format!("Error: {}", e));
            return None;
        }
        match command::resolve_path(&request.steamcmd_path) {
            Ok(path) => request.steamcmd_path = path,
            Err(e) => warn!("could not resolve steamcmd path: {}", e),
        }
        if let Some(output_dir) = request.output_dir.take() {
            request.output_dir = Some(match command::resolve_path(&output_dir) {
                Ok(path) => path,
                Err(e) => {
                    warn!("could not resolve output path: {}", e);
                    output_dir
                }
            });
        }
        self.queue.reset_statuses();
        self.progress = (0, self.queue.len());
        let ids = self.queue.ids();
        self.submit(Job::Download { request, ids })
    }

    fn open_selected(&mut self) -> Option<Action> {
        let entry = self.list_state.selected().and_then(|i| self.queue.get(i))?;
        Some(Action::OpenPage(scrape::item_page_url(&entry.id)))
    }

    fn delete_selected(&mut self) {
        let Some(selected) = self.list_state.selected() else {
            return;
        };
        self.queue.remove(selected);
        if self.queue.is_empty() {
            self.list_state.select(None);
        } else if selected >= self.queue.len() {
            self.list_state.select(Some(self.queue.len() - 1));
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.queue.is_empty() {
            return;
        }
        let last = self.queue.len() - 1;
        let next = match self.list_state.selected() {
            None => 0,
            Some(i) => i.saturating_add_signed(delta).min(last),
        };
        self.list_state.select(Some(next));
    }

    fn reset(&mut self) {
        if self.busy {
            self.write_to_console("Cannot reset while a job is running");
            return;
        }
        self.collection_link.clear();
        self.app_id.clear();
        self.queue.clear();
        self.list_state.select(None);
        self.console.clear();
        self.progress = (0, 0);
    }

    pub fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
                Constraint::Length(8),
                Constraint::Length(1),
            ])
            .split(f.size());

        f.render_widget(self.field("Mod collection link (Enter to load)", &self.collection_link, Focus::CollectionLink), chunks[0]);
        f.render_widget(self.field("Game ID", &self.app_id, Focus::AppId), chunks[1]);
        f.render_widget(self.field("Path to steamcmd", &self.steamcmd_path, Focus::SteamCmdPath), chunks[2]);

        let items: Vec<ListItem> = self.queue.entries().iter().map(|entry| {
            let (label, style) = match &entry.status {
                ItemStatus::Pending => (String::new(), Style::default()),
                ItemStatus::Succeeded => ("downloaded".to_owned(), Style::default().bg(Color::Green).fg(Color::Black)),
                ItemStatus::Failed(reason) => (format!("failed: {}", reason), Style::default().bg(Color::Red).fg(Color::White)),
                ItemStatus::Unexpected => ("check manually".to_owned(), Style::default().bg(Color::Red).fg(Color::White)),
            };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{:<14}", entry.id)),
                Span::raw(label),
            ])).style(style)
        }).collect();
        let list = List::new(items)
            .block(self.block(format!("Mods ({})", self.queue.len()), Focus::ModList))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
        f.render_stateful_widget(list, chunks[3], &mut self.list_state);

        let (done, total) = self.progress;
        let ratio = if total == 0 { 0.0 } else { (done as f64 / total as f64).min(1.0) };
        let gauge = Gauge::default()
            .block(Block::default().title("Progress").borders(Borders::ALL))
            .gauge_style(Style::default().fg(Color::Green))
            .ratio(ratio)
            .label(format!("{}/{}", done, total));
        f.render_widget(gauge, chunks[4]);

        let visible = chunks[5].height.saturating_sub(2) as usize;
        let start = self.console.len().saturating_sub(visible);
        let console_lines: Vec<Line> = self.console[start..].iter().map(|l| Line::from(l.as_str())).collect();
        let console = Paragraph::new(console_lines)
            .block(Block::default().title("Console output").borders(Borders::ALL))
            .wrap(Wrap { trim: false });
        f.render_widget(console, chunks[5]);

        let help = if self.busy {
            "working... | Esc quit"
        } else {
            "Tab focus | list: a add link, f add file, d delete, o open, s/F5 download, r reset, q quit"
        };
        f.render_widget(Paragraph::new(help).style(Style::default().fg(Color::DarkGray)), chunks[6]);

        if let Some(prompt) = &self.prompt {
            let title = match prompt.kind {
                PromptKind::AddLink => "Enter the mod link",
                PromptKind::AddFromFile => "Path to a text file of mod links",
            };
            let area = popup_area(f.size(), 60);
            f.render_widget(Clear, area);
            f.render_widget(
                Paragraph::new(prompt.input.as_str())
                    .block(Block::default().title(title).borders(Borders::ALL).border_style(Style::default().fg(Color::Yellow))),
                area);
        }
    }

    fn block(&self, title: impl Into<String>, focus: Focus) -> Block<'static> {
        let style = if self.focus == focus && self.prompt.is_none() {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        Block::default()
            .title(title.into())
            .borders(Borders::ALL)
            .border_style(style)
    }

    fn field<'a>(&self, title: &str, value: &'a str, focus: Focus) -> Paragraph<'a> {
        let style = if self.busy { Style::default().fg(Color::DarkGray) } else { Style::default() };
        Paragraph::new(value).style(style).block(self.block(title, focus))
    }
}

fn popup_area(area: Rect, percent_x: u16) -> Rect {
    let width = (u32::from(area.width) * u32::from(percent_x) / 100) as u16;
    let height = 3.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

pub struct Ui {
}

impl Ui {
    pub fn run(runtime: Handle, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let worker = Worker::spawn(runtime, SteamCmd);
        let mut app = App::new(config);

        // setup terminal
        crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let res = run_app(&mut terminal, &mut app, &worker);

        // restore terminal
        crossterm::terminal::disable_raw_mode()?;
        crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;

        res
    }
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App, worker: &Worker) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        while let Some(event) = worker.try_recv() {
            app.apply_event(event);
        }
        terminal.draw(|f| app.draw(f))?;

        if event::poll(Duration::from_millis(100))? {
            if let TermEvent::Key(key) = event::read()? {
                match app.handle_key(key) {
                    Some(Action::Submit(job)) => {
                        if let Err(e) = worker.submit(job) {
                            app.write_to_console(format!("Error: {}", e));
                            app.busy = false;
                        }
                    }
                    Some(Action::OpenPage(url)) => {
                        if let Err(e) = open::that(&url) {
                            app.write_to_console(format!("Error: could not open {}: {}", url, e));
                        }
                    }
                    None => (),
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use ratatui::backend::TestBackend;

    use crate::{command::default_config, schemas::CollectionListing};

    use super::*;

    fn press(app: &mut App, code: KeyCode) -> Option<Action> {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_str(app: &mut App, s: &str) {
        for c in s.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    fn app() -> App {
        App::new(&Config {
            steamcmd_path: "/opt/steamcmd/steamcmd.sh".to_owned(),
            app_id: None,
            output_path: None,
        })
    }

    fn screen(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
        terminal.backend().buffer().content.iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn blank_link_is_a_console_error() {
        let mut app = app();
        assert_eq!(press(&mut app, KeyCode::Enter), None);
        assert!(!app.busy);
        assert!(app.console[0].ends_with("Error: Please provide a mod collection link before pressing 'Load'."));
    }

    #[test]
    fn load_then_download() {
        let mut app = app();
        type_str(&mut app, "https://steamcommunity.com/sharedfiles/filedetails/?id=5");
        assert_eq!(
            press(&mut app, KeyCode::Enter),
            Some(Action::Submit(Job::LoadCollection("https://steamcommunity.com/sharedfiles/filedetails/?id=5".to_owned()))));
        assert!(app.busy);

        // editing is disabled while busy
        type_str(&mut app, "xyz");
        assert!(app.collection_link.ends_with("id=5"));

        app.apply_event(Event::CollectionLoaded(CollectionListing {
            app_id: Some("294100".to_owned()),
            items: vec!["1".to_owned(), "2".to_owned()],
        }));
        app.apply_event(Event::Idle);
        assert!(!app.busy);
        assert_eq!(app.app_id, "294100");
        assert_eq!(app.queue.ids(), vec!["1", "2"]);

        let action = press(&mut app, KeyCode::F(5));
        assert_eq!(action, Some(Action::Submit(Job::Download {
            request: DownloadRequest {
                steamcmd_path: PathBuf::from("/opt/steamcmd/steamcmd.sh"),
                app_id: "294100".to_owned(),
                output_dir: None,
            },
            ids: vec!["1".to_owned(), "2".to_owned()],
        })));
        assert_eq!(app.progress, (0, 2));

        app.apply_event(Event::ItemFinished { index: 0, total: 2, status: ItemStatus::Succeeded });
        app.apply_event(Event::ItemFinished { index: 1, total: 2, status: ItemStatus::Failed("nope".to_owned()) });
        app.apply_event(Event::Idle);
        assert_eq!(app.progress, (2, 2));
        assert_eq!(app.queue.get(1).map(|e| e.status.clone()), Some(ItemStatus::Failed("nope".to_owned())));

        let text = screen(&mut app);
        assert!(text.contains("downloaded"));
        assert!(text.contains("failed: nope"));
        assert!(text.contains("2/2"));
    }

    #[test]
    fn download_with_nothing_queued_is_refused() {
        let mut app = app();
        press(&mut app, KeyCode::Tab);
        type_str(&mut app, "281990");
        assert_eq!(press(&mut app, KeyCode::F(5)), None);
        assert!(app.console[0].ends_with("Error: No mod IDs provided. Please add mod links first."));

        app.steamcmd_path = "/usr/bin/steam".to_owned();
        assert_eq!(press(&mut app, KeyCode::F(5)), None);
        assert!(app.console[1].contains("does not point to steamcmd"));
    }

    #[test]
    fn list_actions() {
        let mut app = app();
        press(&mut app, KeyCode::BackTab);
        assert_eq!(app.focus, Focus::ModList);

        press(&mut app, KeyCode::Char('a'));
        type_str(&mut app, "https://steamcommunity.com/sharedfiles/filedetails/?id=9");
        assert!(screen(&mut app).contains("Enter the mod link"));
        assert_eq!(
            press(&mut app, KeyCode::Enter),
            Some(Action::Submit(Job::AddLink("https://steamcommunity.com/sharedfiles/filedetails/?id=9".to_owned()))));
        app.apply_event(Event::ItemsAdded { ids: vec!["9".to_owned(), "10".to_owned()], app_id: Some("4000".to_owned()) });
        app.apply_event(Event::Idle);
        assert_eq!(app.app_id, "4000");
        assert_eq!(app.list_state.selected(), Some(0));

        assert_eq!(
            press(&mut app, KeyCode::Char('o')),
            Some(Action::OpenPage("https://steamcommunity.com/sharedfiles/filedetails/?id=9".to_owned())));

        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Down);
        assert_eq!(app.list_state.selected(), Some(1));
        press(&mut app, KeyCode::Char('d'));
        assert_eq!(app.queue.ids(), vec!["9"]);
        assert_eq!(app.list_state.selected(), Some(0));

        press(&mut app, KeyCode::Char('f'));
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.prompt, None);
        assert!(!app.should_quit);

        press(&mut app, KeyCode::Char('r'));
        assert!(app.queue.is_empty());
        assert!(app.app_id.is_empty());
        assert!(app.console.is_empty());
        assert_eq!(app.steamcmd_path, "/opt/steamcmd/steamcmd.sh");

        press(&mut app, KeyCode::Char('q'));
        assert!(app.should_quit);
    }

    #[test]
    fn relative_output_dir_is_resolved_before_download() {
        let mut app = App::new(&Config {
            steamcmd_path: "/opt/steamcmd/steamcmd.sh".to_owned(),
            app_id: Some("281990".to_owned()),
            output_path: Some("mods".to_owned()),
        });
        app.apply_event(Event::ItemsAdded { ids: vec!["7".to_owned()], app_id: None });

        let Some(Action::Submit(Job::Download { request, .. })) = press(&mut app, KeyCode::F(5)) else {
            panic!("download was not submitted");
        };
        let output_dir = request.output_dir.unwrap();
        assert!(output_dir.is_absolute());
        assert!(output_dir.ends_with("mods"));
        assert_eq!(output_dir, command::get_root_dir().unwrap().join("mods"));
    }

    #[test]
    fn popup_fits_very_wide_terminals() {
        let area = Rect::new(0, 0, 2000, 50);
        let popup = popup_area(area, 60);
        assert_eq!(popup.width, 1200);
        assert_eq!(popup.x, 400);
        assert_eq!(popup.height, 3);

        let popup = popup_area(Rect::new(0, 0, u16::MAX, 2), 60);
        assert_eq!(popup.width, 39321);
        assert_eq!(popup.height, 2);
    }

    #[test]
    fn reset_refused_while_busy() {
        let mut app = App::new(&default_config());
        app.apply_event(Event::ItemsAdded { ids: vec!["1".to_owned()], app_id: None });
        app.busy = true;
        app.focus = Focus::ModList;
        press(&mut app, KeyCode::Char('r'));
        assert_eq!(app.queue.len(), 1);
        assert!(app.console[0].ends_with("Cannot reset while a job is running"));
    }
}
