//! 终端图形界面：输入 URL → 检查媒体 → 选择画质/条目 → 下载。
//!
//! 耗时操作都在工作线程里执行，结果通过 `WorkerMsg` 队列回到主循环，每帧轮询一次。

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, ListState, Paragraph, Wrap};
use tracing::{debug, info, warn};

mod home;

use crate::base_system::context::Config;
use crate::base_system::logging::take_broadcast_rx;
use crate::base_system::media_url::normalize_url;
use crate::download::downloader::{BatchOptions, ItemNotice, download_batch};
use crate::download::models::{BatchReport, DownloadRequest, ProbeResult, ProgressSnapshot};
use crate::download::plan::{playlist_request, probe_media, single_request};
use crate::extractor::MediaExtractor;

/// TUI 退出方式：直接退出，或切换到逐行提问的命令行界面。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuiExit {
    Quit,
    SwitchToCli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Input,
    Quality,
    Entries,
}

#[derive(Debug)]
enum WorkerMsg {
    MediaChecked(Result<ProbeResult>),
    NewItem(String),
    Progress(ProgressSnapshot),
    ItemFinished(String),
    ItemError(String),
    BatchFinished(Result<BatchReport>),
}

/// 播放列表中的一行：条目 + 是否勾选。
#[derive(Debug, Clone)]
struct EntryRow {
    id: String,
    title: String,
    checked: bool,
}

pub(super) struct App {
    input: String,
    focus: Focus,
    status: String,
    messages: Vec<String>,
    logs: Vec<String>,
    config: Config,
    extractor: Arc<dyn MediaExtractor>,
    exit: Option<TuiExit>,

    // media
    probe: Option<ProbeResult>,
    quality_state: ListState,
    entries: Vec<EntryRow>,
    // 第 0 行是 "Select All"
    entries_state: ListState,

    // layout cache (for mouse)
    last_home_layout: Option<home::HomeLayout>,

    // worker
    worker_tx: Sender<WorkerMsg>,
    worker_rx: Receiver<WorkerMsg>,
    busy: bool,

    // spinner
    spinner_active: bool,
    spinner_text: String,
    spinner_idx: usize,
    spinner_last: Instant,

    // download progress
    progress_label: String,
    progress: Option<ProgressSnapshot>,
    cancel_flag: Option<Arc<AtomicBool>>,

    // log
    log_rx: Option<crossbeam_channel::Receiver<String>>,
}

impl App {
    fn new(
        config: Config,
        extractor: Arc<dyn MediaExtractor>,
        worker_tx: Sender<WorkerMsg>,
        worker_rx: Receiver<WorkerMsg>,
    ) -> Self {
        Self {
            input: String::new(),
            focus: Focus::Input,
            status: "Enter a URL and press Enter to Check Media".to_string(),
            messages: Vec::new(),
            logs: Vec::new(),
            config,
            extractor,
            exit: None,
            probe: None,
            quality_state: ListState::default(),
            entries: Vec::new(),
            entries_state: ListState::default(),
            last_home_layout: None,
            worker_tx,
            worker_rx,
            busy: false,
            spinner_active: false,
            spinner_text: String::new(),
            spinner_idx: 0,
            spinner_last: Instant::now(),
            progress_label: String::new(),
            progress: None,
            cancel_flag: None,
            log_rx: take_broadcast_rx(),
        }
    }

    fn push_message(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
        if self.messages.len() > 8 {
            let overflow = self.messages.len() - 8;
            self.messages.drain(0..overflow);
        }
    }

    fn push_log(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        let trimmed = msg.trim_end_matches(['\r', '\n']);
        self.logs.push(trimmed.to_string());
        if self.logs.len() > 200 {
            let overflow = self.logs.len() - 200;
            self.logs.drain(0..overflow);
        }
    }

    fn is_playlist(&self) -> bool {
        self.probe.as_ref().is_some_and(ProbeResult::is_playlist)
    }

    fn all_checked(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.checked)
    }

    fn toggle_all(&mut self) {
        let target = !self.all_checked();
        for entry in &mut self.entries {
            entry.checked = target;
        }
    }

    /// 切换列表中第 `row` 行；第 0 行为 "Select All"。
    fn toggle_entry_row(&mut self, row: usize) {
        if row == 0 {
            self.toggle_all();
        } else if let Some(entry) = self.entries.get_mut(row - 1) {
            entry.checked = !entry.checked;
        }
    }

    fn selected_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.checked)
            .map(|e| e.id.clone())
            .collect()
    }

    fn selected_format_id(&self) -> Option<String> {
        let probe = self.probe.as_ref()?;
        let idx = self.quality_state.selected()?;
        probe.choices.choices.get(idx).map(|c| c.id.clone())
    }

    fn apply_probe(&mut self, probe: ProbeResult) {
        self.status = probe.headline();
        self.entries = probe
            .entries
            .iter()
            .map(|e| EntryRow {
                id: e.id.clone(),
                title: e.display_title().to_string(),
                checked: true,
            })
            .collect();
        self.entries_state
            .select(if self.entries.is_empty() { None } else { Some(0) });
        self.quality_state.select(
            probe
                .choices
                .default_choice()
                .and_then(|d| probe.choices.choices.iter().position(|c| c.id == d.id)),
        );
        self.focus = Focus::Quality;
        self.probe = Some(probe);
    }

    fn clear_media(&mut self) {
        self.probe = None;
        self.entries.clear();
        self.entries_state.select(None);
        self.quality_state.select(None);
    }

    /// 根据当前选择生成下载请求，校验失败时返回给用户看的提示。
    fn build_request(&self) -> Result<DownloadRequest> {
        let probe = self
            .probe
            .as_ref()
            .ok_or_else(|| anyhow!("Please check a URL first."))?;
        let format_id = self.selected_format_id().unwrap_or_default();
        if probe.is_playlist() {
            playlist_request(probe, &self.selected_ids(), &format_id)
        } else {
            single_request(probe, &format_id)
        }
    }
}

pub fn run(config: Config, extractor: Arc<dyn MediaExtractor>) -> Result<TuiExit> {
    let (worker_tx, worker_rx) = mpsc::channel();
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("init terminal")?;

    let mut app = App::new(config, extractor, worker_tx, worker_rx);
    let result = run_loop(&mut terminal, &mut app);

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), DisableMouseCapture, LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    if let Some(flag) = app.cancel_flag.as_ref() {
        flag.store(true, Ordering::Relaxed);
    }

    result.map(|_| app.exit.unwrap_or(TuiExit::Quit))
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    while app.exit.is_none() {
        tick_spinner(app);
        poll_worker(app);
        drain_log_channel(app);

        terminal.draw(|f| home::draw_home(f, app))?;

        handle_event(app)?;
    }
    Ok(())
}

fn handle_event(app: &mut App) -> Result<()> {
    if !event::poll(Duration::from_millis(200)).context("poll event")? {
        return Ok(());
    }
    let evt = event::read().context("read event")?;
    home::handle_event_home(app, evt)
}

const SPINNER_FRAMES: &[char] = &['|', '/', '-', '\\'];

const LOG_HEIGHT: u16 = 7;

fn start_spinner(app: &mut App, text: impl Into<String>) {
    app.spinner_active = true;
    app.spinner_text = text.into();
    app.spinner_idx = 0;
    app.spinner_last = Instant::now();
    app.status = format!("{} {}", app.spinner_text, SPINNER_FRAMES[app.spinner_idx]);
}

fn stop_spinner(app: &mut App) {
    app.spinner_active = false;
    app.spinner_text.clear();
}

fn tick_spinner(app: &mut App) {
    if !app.spinner_active {
        return;
    }
    if app.spinner_last.elapsed() < Duration::from_millis(140) {
        return;
    }
    app.spinner_idx = (app.spinner_idx + 1) % SPINNER_FRAMES.len();
    app.spinner_last = Instant::now();
    app.status = format!("{} {}", app.spinner_text, SPINNER_FRAMES[app.spinner_idx]);
}

fn split_with_log(area: Rect) -> (Rect, Rect) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(LOG_HEIGHT.max(4)),
            Constraint::Length(LOG_HEIGHT),
        ])
        .split(area);
    let main = layout.first().copied().unwrap_or(area);
    let log = layout.get(1).copied().unwrap_or(Rect {
        x: area.x,
        y: area
            .y
            .saturating_add(area.height.saturating_sub(LOG_HEIGHT)),
        width: area.width,
        height: LOG_HEIGHT,
    });
    (main, log)
}

fn render_log_box(frame: &mut ratatui::Frame, area: Rect, app: &App) {
    let mut lines = Vec::new();
    if app.logs.is_empty() {
        lines.push(Line::from("Log: empty"));
    } else {
        // 只取可见高度内的最新几行，视图始终停在末尾。
        let visible = area.height.saturating_sub(2).max(1) as usize;
        lines.extend(
            app.logs
                .iter()
                .rev()
                .take(visible)
                .rev()
                .map(|m| style_log_line(m)),
        );
    }

    let log = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Log"));
    frame.render_widget(log, area);
}

fn style_log_line(line: &str) -> Line<'static> {
    let mut parts = line.split_whitespace();
    let ts = parts.next().unwrap_or("");
    let level = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest: Vec<&str> = parts.collect();

    let mut spans: Vec<Span<'static>> = Vec::new();
    if !ts.is_empty() {
        spans.push(Span::styled(
            ts.to_string(),
            Style::default().fg(Color::DarkGray),
        ));
    }

    if !level.is_empty() {
        let color = match level.as_str() {
            "ERROR" => Color::Red,
            "WARN" => Color::Yellow,
            "INFO" => Color::Cyan,
            "DEBUG" | "TRACE" => Color::Gray,
            _ => Color::White,
        };
        if !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(
            level,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    }

    if let Some(target) = rest.first()
        && !target.is_empty()
    {
        if !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(
            (*target).to_string(),
            Style::default().fg(Color::LightBlue),
        ));
    }

    let message = rest.iter().skip(1).copied().collect::<Vec<_>>().join(" ");
    if !message.is_empty() {
        if !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::raw(message));
    }

    Line::from(spans)
}

fn drain_log_channel(app: &mut App) {
    if let Some(rx) = app.log_rx.as_ref() {
        let rx = rx.clone();
        for line in rx.try_iter() {
            app.push_log(line);
        }
    }
}

/// Check Media：在工作线程中探测 URL。
fn start_check_task(app: &mut App) {
    if app.busy {
        app.push_message("A task is already running.");
        return;
    }
    let text = app.input.trim().to_string();
    if text.is_empty() {
        app.status = "Please enter a URL.".to_string();
        return;
    }
    let Some(url) = normalize_url(&text) else {
        app.status = "That does not look like a URL.".to_string();
        return;
    };

    app.clear_media();
    app.busy = true;
    app.progress = None;
    app.progress_label.clear();
    start_spinner(app, "Analyzing URL...");
    info!(target: "ui", url = %url, "开始检查媒体");

    let tx = app.worker_tx.clone();
    let cfg = app.config.clone();
    let extractor = Arc::clone(&app.extractor);
    thread::spawn(move || {
        let result = probe_media(extractor.as_ref(), &cfg, &url);
        let _ = tx.send(WorkerMsg::MediaChecked(result));
    });
}

/// Download：校验选择后在工作线程里按顺序下载。
fn start_download_task(app: &mut App) {
    if app.busy {
        app.push_message("A task is already running.");
        return;
    }
    let request = match app.build_request() {
        Ok(r) => r,
        Err(err) => {
            app.status = err.to_string();
            return;
        }
    };

    info!(
        target: "ui",
        url = %request.url,
        items = request.items.len(),
        "启动下载任务"
    );
    debug!(target: "ui", format = %request.format_id, dir = %app.config.save_path, "下载参数");

    app.busy = true;
    app.messages.clear();
    app.progress = Some(ProgressSnapshot::new(request.items.len()));
    app.progress_label = "Starting download...".to_string();
    start_spinner(app, "Downloading...");

    let tx = app.worker_tx.clone();
    let progress_tx = app.worker_tx.clone();
    let item_tx = app.worker_tx.clone();
    let cfg = app.config.clone();
    let extractor = Arc::clone(&app.extractor);
    let cancel_flag = Arc::new(AtomicBool::new(false));
    app.cancel_flag = Some(Arc::clone(&cancel_flag));

    thread::spawn(move || {
        let options = BatchOptions {
            progress: Some(Box::new(move |snap: ProgressSnapshot| {
                let _ = progress_tx.send(WorkerMsg::Progress(snap));
            })),
            on_item: Some(Box::new(move |notice: ItemNotice| {
                let text = notice.message();
                let msg = match notice {
                    ItemNotice::Started { .. } => WorkerMsg::NewItem(text),
                    ItemNotice::Finished { .. } => WorkerMsg::ItemFinished(text),
                    ItemNotice::Failed { .. } => WorkerMsg::ItemError(text),
                };
                let _ = item_tx.send(msg);
            })),
        };
        let result = download_batch(
            extractor.as_ref(),
            &cfg,
            &request,
            options,
            Some(cancel_flag.as_ref()),
        );
        let _ = tx.send(WorkerMsg::BatchFinished(result));
    });
}

fn request_cancel(app: &mut App) {
    match app.cancel_flag.as_ref() {
        Some(flag) if app.busy => {
            flag.store(true, Ordering::Relaxed);
            app.status = "Stopping after the current step...".to_string();
            info!(target: "ui", "用户请求停止下载");
        }
        _ => app.push_message("Nothing to stop."),
    }
}

fn poll_worker(app: &mut App) {
    while let Ok(msg) = app.worker_rx.try_recv() {
        match msg {
            WorkerMsg::MediaChecked(res) => {
                stop_spinner(app);
                app.busy = false;
                match res {
                    Ok(probe) => {
                        info!(
                            target: "ui",
                            playlist = probe.is_playlist(),
                            choices = probe.choices.len(),
                            "媒体信息已获取"
                        );
                        app.apply_probe(probe);
                    }
                    Err(err) => {
                        let text = format!("Failed to fetch media info: {err:#}");
                        warn!(target: "ui", "获取媒体信息失败: {err:#}");
                        app.status = format!("Error: {text}");
                        app.push_message(text);
                    }
                }
            }
            WorkerMsg::NewItem(text) => {
                app.progress_label = text;
                if let Some(p) = app.progress.as_mut() {
                    p.percent = Some(0.0);
                }
            }
            WorkerMsg::Progress(snap) => {
                app.progress = Some(snap);
            }
            WorkerMsg::ItemFinished(text) => app.push_message(text),
            WorkerMsg::ItemError(text) => {
                app.status = format!("Error: {text}");
                app.push_message(text);
            }
            WorkerMsg::BatchFinished(res) => {
                stop_spinner(app);
                app.busy = false;
                app.cancel_flag = None;
                app.progress_label.clear();
                match res {
                    Ok(report) if report.canceled => {
                        app.status = "Download canceled.".to_string();
                    }
                    Ok(report) => {
                        app.status = "All downloads complete!".to_string();
                        if report.failed.is_empty() {
                            app.push_message("All selected media has been downloaded.");
                        } else {
                            app.push_message(format!(
                                "{} downloaded, {} failed.",
                                report.succeeded,
                                report.failed.len()
                            ));
                        }
                    }
                    Err(err) => {
                        warn!(target: "ui", "下载失败: {err:#}");
                        app.status = format!("Error: {err:#}");
                        app.push_message(format!("An error occurred: {err:#}"));
                    }
                }
            }
        }
    }
}
