//! TUI 主页面：绘制与按键/鼠标处理。

use super::*;

use crossterm::event::{
    KeyCode, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::layout::Alignment;
use ratatui::widgets::{Gauge, List, ListItem};

/// 上一帧各区域的位置，鼠标点击时用来命中测试。
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct HomeLayout {
    input: Rect,
    quality: Rect,
    entries: Option<Rect>,
    check_button: Rect,
    download_button: Rect,
    stop_button: Rect,
}

const BUTTONS: [&str; 3] = ["Check Media (Enter)", "Download (d)", "Stop (s)"];

pub(super) fn handle_event_home(app: &mut App, event: Event) -> Result<()> {
    match event {
        Event::Paste(s) => {
            if app.focus == Focus::Input {
                app.input.push_str(s.trim());
            }
        }
        Event::Key(key) if key.kind == KeyEventKind::Press => {
            if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                app.exit = Some(TuiExit::Quit);
                return Ok(());
            }
            if app.focus == Focus::Input {
                handle_typing(app, key.code, key.modifiers);
            } else {
                handle_command(app, key.code);
            }
        }
        Event::Mouse(me) => handle_mouse_home(app, me),
        _ => {}
    }
    Ok(())
}

fn handle_typing(app: &mut App, code: KeyCode, modifiers: KeyModifiers) {
    match code {
        KeyCode::Enter => start_check_task(app),
        KeyCode::Backspace => {
            app.input.pop();
        }
        KeyCode::Tab | KeyCode::Esc => cycle_focus(app),
        KeyCode::Char(c)
            if !modifiers.contains(KeyModifiers::CONTROL)
                && !modifiers.contains(KeyModifiers::ALT) =>
        {
            app.input.push(c);
        }
        _ => {}
    }
}

fn handle_command(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => app.exit = Some(TuiExit::Quit),
        KeyCode::Char('c') => {
            if app.busy {
                app.push_message("Wait for the current task before switching to the CLI.");
            } else {
                app.exit = Some(TuiExit::SwitchToCli);
            }
        }
        KeyCode::Char('i') => app.focus = Focus::Input,
        KeyCode::Char('d') => start_download_task(app),
        KeyCode::Char('s') => request_cancel(app),
        KeyCode::Char('a') if app.is_playlist() => app.toggle_all(),
        KeyCode::Char(' ') if app.focus == Focus::Entries => {
            if let Some(row) = app.entries_state.selected() {
                app.toggle_entry_row(row);
            }
        }
        KeyCode::Tab => cycle_focus(app),
        KeyCode::Up => move_selection(app, false),
        KeyCode::Down => move_selection(app, true),
        KeyCode::Enter => match app.focus {
            Focus::Quality => start_download_task(app),
            Focus::Entries => {
                if let Some(row) = app.entries_state.selected() {
                    app.toggle_entry_row(row);
                }
            }
            Focus::Input => start_check_task(app),
        },
        _ => {}
    }
}

fn cycle_focus(app: &mut App) {
    app.focus = match app.focus {
        Focus::Input => Focus::Quality,
        Focus::Quality if app.is_playlist() => Focus::Entries,
        Focus::Quality | Focus::Entries => Focus::Input,
    };
}

fn step(state: &mut ListState, len: usize, down: bool) {
    if len == 0 {
        state.select(None);
        return;
    }
    let next = match (state.selected(), down) {
        (Some(i), true) if i + 1 < len => i + 1,
        (Some(_), true) | (None, _) => 0,
        (Some(0), false) => len - 1,
        (Some(i), false) => i - 1,
    };
    state.select(Some(next));
}

fn move_selection(app: &mut App, down: bool) {
    match app.focus {
        Focus::Quality => {
            let len = app.probe.as_ref().map_or(0, |p| p.choices.len());
            step(&mut app.quality_state, len, down);
        }
        Focus::Entries => {
            let len = app.entries.len() + 1;
            step(&mut app.entries_state, len, down);
        }
        Focus::Input => {}
    }
}

fn pos_in(area: Rect, col: u16, row: u16) -> bool {
    col >= area.x
        && col < area.x.saturating_add(area.width)
        && row >= area.y
        && row < area.y.saturating_add(area.height)
}

/// 带边框列表中鼠标所在行对应的下标。
fn list_row_at(area: Rect, row: u16, state: &ListState, len: usize) -> Option<usize> {
    let top = area.y.saturating_add(1);
    let bottom = area.y.saturating_add(area.height.saturating_sub(1));
    if row < top || row >= bottom {
        return None;
    }
    let idx = state.offset() + (row - top) as usize;
    (idx < len).then_some(idx)
}

fn handle_mouse_home(app: &mut App, me: MouseEvent) {
    let Some(layout) = app.last_home_layout else {
        return;
    };
    match me.kind {
        MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
            let down = matches!(me.kind, MouseEventKind::ScrollDown);
            if pos_in(layout.quality, me.column, me.row) {
                app.focus = Focus::Quality;
                move_selection(app, down);
            } else if let Some(area) = layout.entries
                && pos_in(area, me.column, me.row)
            {
                app.focus = Focus::Entries;
                move_selection(app, down);
            }
        }
        MouseEventKind::Down(MouseButton::Left) => {
            if pos_in(layout.input, me.column, me.row) {
                app.focus = Focus::Input;
            } else if pos_in(layout.check_button, me.column, me.row) {
                start_check_task(app);
            } else if pos_in(layout.download_button, me.column, me.row) {
                start_download_task(app);
            } else if pos_in(layout.stop_button, me.column, me.row) {
                request_cancel(app);
            } else if pos_in(layout.quality, me.column, me.row) {
                app.focus = Focus::Quality;
                let len = app.probe.as_ref().map_or(0, |p| p.choices.len());
                if let Some(idx) = list_row_at(layout.quality, me.row, &app.quality_state, len) {
                    app.quality_state.select(Some(idx));
                }
            } else if let Some(area) = layout.entries
                && pos_in(area, me.column, me.row)
            {
                app.focus = Focus::Entries;
                let len = app.entries.len() + 1;
                if let Some(idx) = list_row_at(area, me.row, &app.entries_state, len) {
                    app.entries_state.select(Some(idx));
                    app.toggle_entry_row(idx);
                }
            }
        }
        _ => {}
    }
}

fn focus_style(app: &App, focus: Focus) -> Style {
    if app.focus == focus {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

pub(super) fn draw_home(frame: &mut ratatui::Frame, app: &mut App) {
    let (main, log_area) = split_with_log(frame.size());
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(4),
        ])
        .split(main);

    let header_line = Line::from(vec![
        Span::styled(
            format!("media-grab v{}", env!("CARGO_PKG_VERSION")),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  Save to: "),
        Span::styled(
            app.config.default_save_dir().display().to_string(),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  |  Tab: focus, c: CLI, q: quit"),
    ]);
    let header = Paragraph::new(header_line)
        .block(Block::default().borders(Borders::ALL).title("Media Downloader"));
    frame.render_widget(header, rows[0]);

    let input = Paragraph::new(format!("> {}", app.input))
        .style(focus_style(app, Focus::Input))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Video or playlist URL (Enter: Check Media)"),
        );
    frame.render_widget(input, rows[1]);

    let status = Paragraph::new(app.status.as_str())
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(status, rows[2]);

    let (quality_area, entries_area) = if app.is_playlist() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(36), Constraint::Min(20)])
            .split(rows[3]);
        (cols[0], Some(cols[1]))
    } else {
        (rows[3], None)
    };
    draw_quality(frame, app, quality_area);
    if let Some(area) = entries_area {
        draw_entries(frame, app, area);
    }

    let buttons = draw_buttons(frame, app, rows[4]);
    draw_progress(frame, app, rows[5]);

    let msg_lines: Vec<Line> = app
        .messages
        .iter()
        .rev()
        .take(rows[6].height.saturating_sub(2).max(1) as usize)
        .rev()
        .map(|m| Line::from(m.as_str()))
        .collect();
    let messages = Paragraph::new(msg_lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Messages"));
    frame.render_widget(messages, rows[6]);

    render_log_box(frame, log_area, app);

    app.last_home_layout = Some(HomeLayout {
        input: rows[1],
        quality: quality_area,
        entries: entries_area,
        check_button: buttons[0],
        download_button: buttons[1],
        stop_button: buttons[2],
    });
}

fn draw_quality(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let items: Vec<ListItem> = match app.probe.as_ref() {
        Some(probe) if !probe.choices.is_empty() => probe
            .choices
            .labels()
            .into_iter()
            .map(|l| ListItem::new(l.to_string()))
            .collect(),
        _ => vec![ListItem::new("Check a URL to list qualities")],
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Quality"))
        .highlight_style(focus_style(app, Focus::Quality).add_modifier(Modifier::BOLD))
        .highlight_symbol(">> ");
    frame.render_stateful_widget(list, area, &mut app.quality_state);
}

fn draw_entries(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let mark = |checked: bool| if checked { "[x]" } else { "[ ]" };
    let mut items = Vec::with_capacity(app.entries.len() + 1);
    items.push(ListItem::new(format!("{} Select All", mark(app.all_checked()))));
    items.extend(
        app.entries
            .iter()
            .map(|e| ListItem::new(format!("{} {}", mark(e.checked), e.title))),
    );
    let checked = app.entries.iter().filter(|e| e.checked).count();
    let title = format!(
        "Videos {checked}/{} (Space: toggle, a: all)",
        app.entries.len()
    );
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(focus_style(app, Focus::Entries).add_modifier(Modifier::BOLD))
        .highlight_symbol(">> ");
    frame.render_stateful_widget(list, area, &mut app.entries_state);
}

fn draw_buttons(frame: &mut ratatui::Frame, app: &App, area: Rect) -> [Rect; 3] {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(area);
    let enabled = [!app.busy, !app.busy && app.probe.is_some(), app.busy];
    let mut rects = [Rect::default(); 3];
    for (i, label) in BUTTONS.iter().enumerate() {
        let rect = cols.get(i).copied().unwrap_or(area);
        let style = if enabled[i] {
            Style::default()
                .fg(Color::White)
                .bg(Color::Blue)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let button = Paragraph::new(*label)
            .alignment(Alignment::Center)
            .style(style)
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(button, rect);
        rects[i] = rect;
    }
    rects
}

fn draw_progress(frame: &mut ratatui::Frame, app: &App, area: Rect) {
    let (ratio, label) = match app.progress.as_ref() {
        Some(snap) => {
            let ratio = snap.percent.unwrap_or(0.0).clamp(0.0, 100.0) / 100.0;
            let label = if snap.item_total > 1 {
                format!(
                    "{} ({}/{})",
                    snap.label(),
                    snap.item_index + 1,
                    snap.item_total
                )
            } else {
                snap.label()
            };
            (ratio, label)
        }
        None => (0.0, String::new()),
    };
    let title = if app.progress_label.is_empty() {
        "Progress".to_string()
    } else {
        app.progress_label.clone()
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(label);
    frame.render_widget(gauge, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEvent;

    use crate::download::formats::playlist_menu;
    use crate::download::models::MediaKind;
    use crate::download::test_support::FakeExtractor;
    use crate::extractor::models::PlaylistEntry;

    fn app() -> App {
        let (tx, rx) = mpsc::channel();
        App::new(Config::default(), Arc::new(FakeExtractor::default()), tx, rx)
    }

    fn press(app: &mut App, code: KeyCode) {
        handle_event_home(app, Event::Key(KeyEvent::new(code, KeyModifiers::NONE))).unwrap();
    }

    fn with_playlist(app: &mut App) {
        app.apply_probe(ProbeResult {
            kind: MediaKind::Playlist,
            url: "https://www.youtube.com/playlist?list=PL1".to_string(),
            title: "Mix".to_string(),
            video_id: "PL1".to_string(),
            choices: playlist_menu(),
            entries: vec![
                PlaylistEntry {
                    id: "a".to_string(),
                    title: None,
                    url: None,
                },
                PlaylistEntry {
                    id: "b".to_string(),
                    title: None,
                    url: None,
                },
            ],
            formats: Vec::new(),
        });
    }

    #[test]
    fn typing_q_in_input_does_not_quit() {
        let mut app = app();
        press(&mut app, KeyCode::Char('q'));
        assert_eq!(app.input, "q");
        assert!(app.exit.is_none());
        press(&mut app, KeyCode::Backspace);
        assert!(app.input.is_empty());
    }

    #[test]
    fn q_quits_outside_input() {
        let mut app = app();
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Char('q'));
        assert_eq!(app.exit, Some(TuiExit::Quit));
    }

    #[test]
    fn c_switches_to_cli() {
        let mut app = app();
        press(&mut app, KeyCode::Esc);
        press(&mut app, KeyCode::Char('c'));
        assert_eq!(app.exit, Some(TuiExit::SwitchToCli));
    }

    #[test]
    fn space_toggles_entries_and_a_toggles_all() {
        let mut app = app();
        with_playlist(&mut app);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.focus, Focus::Entries);
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Char(' '));
        assert_eq!(app.selected_ids(), vec!["b"]);
        press(&mut app, KeyCode::Char('a'));
        assert!(app.all_checked());
        press(&mut app, KeyCode::Char('a'));
        assert!(app.selected_ids().is_empty());
    }

    #[test]
    fn quality_selection_wraps() {
        let mut app = app();
        with_playlist(&mut app);
        assert_eq!(app.focus, Focus::Quality);
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Down);
        assert_eq!(app.quality_state.selected(), Some(0));
        press(&mut app, KeyCode::Up);
        assert_eq!(app.quality_state.selected(), Some(2));
    }

    #[test]
    fn stop_without_task_is_a_no_op() {
        let mut app = app();
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Char('s'));
        assert_eq!(app.messages.last().map(String::as_str), Some("Nothing to stop."));
    }

    #[test]
    fn row_lookup_respects_borders() {
        let area = Rect::new(0, 10, 30, 6);
        let state = ListState::default();
        assert_eq!(list_row_at(area, 10, &state, 5), None);
        assert_eq!(list_row_at(area, 11, &state, 5), Some(0));
        assert_eq!(list_row_at(area, 14, &state, 3), None);
    }
}
