use std::{cmp, io, sync::Arc, thread, time::Duration};

use about_time_core::{
    checkpoints::{highlight_labels, is_ending_block},
    error::{GenerationError, Rejection},
    llm::{generate, DeltaSink, Generator},
    session::{
        Game, Mode, PendingIntervention, PendingOutcome, StoryDraft, MAX_TURNS, STARTING_TICKETS,
    },
};
use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::{spawn, sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

const TICK_RATE: Duration = Duration::from_millis(250);
const MAX_INPUT_CHARS: usize = 300;
const MAX_NOTE_CHARS: usize = 2000;
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

const TITLE_BANNER: [&str; 2] = [
    "▄▀█ █▄▄ █▀█ █ █ ▀█▀   ▀█▀ █ █▀▄▀█ █▀▀",
    "█▀█ █▄█ █▄█ █▄█  █     █  █ █ ▀ █ ██▄",
];

#[derive(Debug, Clone)]
struct Theme {
    accent: Color,
    accent_alt: Color,
    muted: Color,
    label: Color,
    success: Color,
    warning: Color,
    danger: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            accent: Color::Cyan,
            accent_alt: Color::Magenta,
            muted: Color::DarkGray,
            label: Color::Yellow,
            success: Color::Green,
            warning: Color::Yellow,
            danger: Color::Red,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Title,
    Play,
}

/// Single text field edited in place. The cursor counts characters.
#[derive(Debug, Clone, Default)]
struct TextInput {
    value: String,
    cursor: usize,
    limit: usize,
}

impl TextInput {
    fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn set(&mut self, value: String) {
        self.cursor = value.chars().count();
        self.value = value;
    }

    fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    fn byte_index(&self) -> usize {
        self.value
            .char_indices()
            .nth(self.cursor)
            .map(|(index, _)| index)
            .unwrap_or(self.value.len())
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.value.chars().count() as isize;
        self.cursor = (self.cursor as isize + delta).clamp(0, len) as usize;
    }

    fn move_home(&mut self) {
        self.cursor = 0;
    }

    fn move_end(&mut self) {
        self.cursor = self.value.chars().count();
    }

    fn insert(&mut self, ch: char) {
        if ch.is_control() && ch != '\n' {
            return;
        }
        if self.value.chars().count() >= self.limit {
            return;
        }
        let index = self.byte_index();
        self.value.insert(index, ch);
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let index = self.byte_index();
        self.value.remove(index);
    }

    fn delete(&mut self) {
        if self.cursor < self.value.chars().count() {
            let index = self.byte_index();
            self.value.remove(index);
        }
    }

    /// Columns before the cursor, counting wide (non-ASCII) characters as two.
    fn cursor_columns(&self) -> u16 {
        self.value
            .chars()
            .take(self.cursor)
            .map(|ch| if ch.is_ascii() { 1 } else { 2 })
            .sum()
    }

    /// Apply an editing key. Returns false when the key was not an edit.
    fn handle_edit_key(&mut self, key: &KeyEvent) -> bool {
        match key.code {
            KeyCode::Left => self.move_cursor(-1),
            KeyCode::Right => self.move_cursor(1),
            KeyCode::Home => self.move_home(),
            KeyCode::End => self.move_end(),
            KeyCode::Backspace => self.backspace(),
            KeyCode::Delete => self.delete(),
            KeyCode::Char(ch)
                if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT =>
            {
                self.insert(ch)
            }
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone)]
struct NotesModal {
    input: TextInput,
}

#[derive(Debug)]
enum JobKind {
    Story,
    Reply(PendingIntervention),
    Outcome(PendingOutcome),
}

/// A generation call running on a spawned task.
struct Job {
    id: u64,
    kind: JobKind,
    handle: JoinHandle<()>,
    streamed: String,
}

enum AppEvent {
    Input(Event),
    Tick,
    Delta {
        job: u64,
        text: String,
    },
    StoryReady {
        job: u64,
        result: Result<StoryDraft, GenerationError>,
    },
    ReplyReady {
        job: u64,
        result: Result<String, GenerationError>,
    },
    OutcomeReady {
        job: u64,
        result: Result<String, GenerationError>,
    },
}

/// Terminal front end for one game.
pub struct AboutTimeApp {
    game: Game,
    generator: Arc<dyn Generator>,
    screen: Screen,
    input: TextInput,
    notes: Option<NotesModal>,
    cursor: usize,
    job: Option<Job>,
    next_job: u64,
    event_tx: Option<mpsc::Sender<AppEvent>>,
    status: String,
    ticks: usize,
    should_quit: bool,
    theme: Theme,
}

impl AboutTimeApp {
    pub fn new(game: Game, generator: Arc<dyn Generator>) -> Self {
        Self {
            game,
            generator,
            screen: Screen::Title,
            input: TextInput::with_limit(MAX_INPUT_CHARS),
            notes: None,
            cursor: 0,
            job: None,
            next_job: 0,
            event_tx: None,
            status: "Enter를 눌러 시작하세요.".to_string(),
            ticks: 0,
            should_quit: false,
            theme: Theme::default(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.hide_cursor()?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(256);
        spawn_input_thread(event_tx.clone());
        self.event_tx = Some(event_tx);

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }
            let maybe_event = event_rx.recv().await;
            if !self.process_app_event(maybe_event) || self.should_quit {
                break;
            }
        }

        if let Some(job) = self.job.take() {
            job.handle.abort();
        }
        restore_terminal(&mut terminal)?;
        self.event_tx = None;
        info!(
            turn = self.game.session().turn(),
            mode = ?self.game.session().mode(),
            "session closed"
        );
        Ok(())
    }

    fn process_app_event(&mut self, maybe_event: Option<AppEvent>) -> bool {
        match maybe_event {
            Some(AppEvent::Input(Event::Key(key))) => {
                if key.kind == KeyEventKind::Press {
                    if let Err(err) = self.handle_key(key) {
                        error!(?err, "input handling failed");
                        self.status = format!("오류: {err}");
                    }
                }
                true
            }
            Some(AppEvent::Input(_)) => true,
            Some(AppEvent::Tick) => {
                self.ticks = self.ticks.wrapping_add(1);
                true
            }
            Some(AppEvent::Delta { job, text }) => {
                if let Some(current) = self.job.as_mut().filter(|current| current.id == job) {
                    current.streamed.push_str(&text);
                }
                true
            }
            Some(AppEvent::StoryReady { job, result }) => {
                if let Some(JobKind::Story) = self.take_job(job) {
                    self.finish_story(result);
                }
                true
            }
            Some(AppEvent::ReplyReady { job, result }) => {
                if let Some(JobKind::Reply(pending)) = self.take_job(job) {
                    self.finish_reply(pending, result);
                }
                true
            }
            Some(AppEvent::OutcomeReady { job, result }) => {
                if let Some(JobKind::Outcome(pending)) = self.take_job(job) {
                    self.finish_outcome(pending, result);
                }
                true
            }
            None => false,
        }
    }

    fn take_job(&mut self, id: u64) -> Option<JobKind> {
        if self.job.as_ref().is_some_and(|job| job.id == id) {
            return self.job.take().map(|job| job.kind);
        }
        warn!(job = id, "dropping result of a cancelled request");
        None
    }

    fn finish_story(&mut self, result: Result<StoryDraft, GenerationError>) {
        match result {
            Ok(draft) => match self.game.install_story(draft) {
                Ok(()) => {
                    self.cursor = 0;
                    self.status =
                        "이야기가 준비되었습니다. 되돌아갈 체크포인트를 고르세요.".to_string();
                }
                Err(rejection) => self.status = rejection_message(&rejection),
            },
            Err(err) => {
                error!(%err, "story generation failed");
                self.status = format!("{} Enter로 다시 시도하세요.", generation_message(&err));
            }
        }
    }

    fn finish_reply(
        &mut self,
        pending: PendingIntervention,
        result: Result<String, GenerationError>,
    ) {
        match result {
            Ok(raw) => match self.game.apply_intervention(pending, &raw) {
                Ok(_) => {
                    let left = self.game.session().turns_left();
                    self.status = if left == 0 {
                        "마지막 턴을 썼습니다. Tab으로 현재로 돌아가세요.".to_string()
                    } else {
                        format!("남은 턴 {left}")
                    };
                }
                Err(rejection) => self.status = rejection_message(&rejection),
            },
            Err(err) => {
                error!(%err, "intervention request failed");
                self.input.set(pending.input);
                self.status = generation_message(&err);
            }
        }
    }

    fn finish_outcome(&mut self, pending: PendingOutcome, result: Result<String, GenerationError>) {
        match result {
            Ok(raw) => match self.game.apply_outcome(pending, &raw) {
                Ok(outcome) if outcome.is_success() => {
                    self.status = "비극을 막았습니다. Enter로 끝내세요.".to_string();
                }
                Ok(_) => self.status = self.failure_hint(),
                Err(rejection) => self.status = rejection_message(&rejection),
            },
            Err(err) => {
                error!(%err, "outcome request failed");
                self.status = format!("{} r로 다시 요청하세요.", generation_message(&err));
            }
        }
    }

    fn failure_hint(&self) -> String {
        if self.game.can_spend_ticket() {
            format!(
                "비극은 되풀이되었습니다. t로 티켓을 써서 다시 시도하세요 (남은 티켓 {}).",
                self.game.session().tickets()
            )
        } else {
            "비극은 되풀이되었습니다. Enter로 끝내세요.".to_string()
        }
    }

    fn next_job_id(&mut self) -> u64 {
        self.next_job += 1;
        self.next_job
    }

    fn is_busy(&mut self) -> bool {
        if self.job.is_some() {
            self.status = "응답을 기다리는 중입니다. Esc로 취소할 수 있습니다.".to_string();
            return true;
        }
        false
    }

    fn start_story(&mut self) {
        if self.is_busy() {
            return;
        }
        let Some(sender) = self.event_tx.clone() else {
            error!("event_channel_missing");
            return;
        };
        let id = self.next_job_id();
        let generator = Arc::clone(&self.generator);
        let sink = self.game.streams().then(|| delta_sink(id, sender.clone()));
        let limit = self.game.timeout();

        info!(job = id, "requesting story");
        let handle = spawn(async move {
            let result = StoryDraft::generate(generator.as_ref(), sink.as_ref(), limit).await;
            let _ = sender.send(AppEvent::StoryReady { job: id, result }).await;
        });
        self.job = Some(Job {
            id,
            kind: JobKind::Story,
            handle,
            streamed: String::new(),
        });
        self.status = "이야기를 쓰는 중…".to_string();
    }

    fn submit_intervention(&mut self) {
        if self.is_busy() {
            return;
        }
        let pending = match self.game.prepare_intervention(&self.input.value) {
            Ok(pending) => pending,
            Err(rejection) => {
                self.status = rejection_message(&rejection);
                return;
            }
        };
        let Some(sender) = self.event_tx.clone() else {
            error!("event_channel_missing");
            return;
        };
        self.input.clear();

        let id = self.next_job_id();
        let generator = Arc::clone(&self.generator);
        let sink = self.game.streams().then(|| delta_sink(id, sender.clone()));
        let limit = self.game.timeout();
        let request = pending.request.clone();

        info!(
            job = id,
            checkpoint = pending.checkpoint + 1,
            tone = pending.tone.label(),
            "requesting intervention reply"
        );
        let handle = spawn(async move {
            let result = generate(generator.as_ref(), &request, sink.as_ref(), limit).await;
            let _ = sender.send(AppEvent::ReplyReady { job: id, result }).await;
        });
        self.job = Some(Job {
            id,
            kind: JobKind::Reply(pending),
            handle,
            streamed: String::new(),
        });
        self.status = "상대가 반응하는 중…".to_string();
    }

    fn start_outcome(&mut self) {
        if self.is_busy() {
            return;
        }
        let pending = match self.game.outcome_request() {
            Ok(pending) => pending,
            Err(rejection) => {
                self.status = rejection_message(&rejection);
                return;
            }
        };
        let Some(sender) = self.event_tx.clone() else {
            error!("event_channel_missing");
            return;
        };

        let id = self.next_job_id();
        let generator = Arc::clone(&self.generator);
        let limit = self.game.timeout();
        let request = pending.request.clone();

        info!(job = id, verdict = ?pending.verdict, "requesting outcome");
        let handle = spawn(async move {
            let result = generate(generator.as_ref(), &request, None, limit).await;
            let _ = sender.send(AppEvent::OutcomeReady { job: id, result }).await;
        });
        self.job = Some(Job {
            id,
            kind: JobKind::Outcome(pending),
            handle,
            streamed: String::new(),
        });
        self.status = "현재가 어떻게 바뀌었는지 확인하는 중…".to_string();
    }

    fn cancel_job(&mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        job.handle.abort();
        info!(job = job.id, "request cancelled");
        if let JobKind::Reply(pending) = job.kind {
            self.input.set(pending.input);
        }
        self.status = "요청을 취소했습니다. 게임 상태는 그대로입니다.".to_string();
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        if key.modifiers == KeyModifiers::CONTROL {
            match key.code {
                KeyCode::Char('c') => {
                    self.should_quit = true;
                    return Ok(());
                }
                KeyCode::Char('n') if self.screen == Screen::Play => {
                    if self.notes.is_some() {
                        self.close_notes();
                    } else {
                        self.open_notes();
                    }
                    return Ok(());
                }
                _ => {}
            }
        }

        if self.notes.is_some() {
            self.handle_notes_key(key);
            return Ok(());
        }

        if key.code == KeyCode::Esc && self.job.is_some() {
            self.cancel_job();
            return Ok(());
        }

        match self.screen {
            Screen::Title => self.handle_title_key(key),
            Screen::Play => match self.game.session().mode() {
                Mode::SelectCheckpoint => self.handle_select_key(key),
                Mode::Past { .. } => self.handle_past_key(key),
                Mode::Present => self.handle_present_key(key),
                Mode::GameOver { .. } => self.handle_game_over_key(key),
            },
        }
        Ok(())
    }

    fn handle_title_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                self.screen = Screen::Play;
                if self.game.needs_story() {
                    self.start_story();
                }
            }
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            _ => {}
        }
    }

    fn handle_select_key(&mut self, key: KeyEvent) {
        if self.game.needs_story() {
            match key.code {
                KeyCode::Enter => self.start_story(),
                KeyCode::Char('q') => self.should_quit = true,
                _ => {}
            }
            return;
        }

        let last = *self.game.selectable_checkpoints().end();
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.cursor = cmp::min(self.cursor + 1, last.saturating_sub(1));
            }
            KeyCode::Char(ch @ '1'..='9') => {
                let number = ch as usize - '0' as usize;
                self.travel_to(number);
            }
            KeyCode::Enter => self.travel_to(self.cursor + 1),
            KeyCode::Char('q') => self.should_quit = true,
            _ => {}
        }
    }

    fn travel_to(&mut self, number: usize) {
        if self.is_busy() {
            return;
        }
        match self.game.select_checkpoint(number) {
            Ok(()) => {
                self.cursor = number - 1;
                self.input.clear();
                self.status = format!(
                    "체크포인트 {number}에 도착했습니다. {}로서 말하거나 행동하세요.",
                    self.game.session().player_role()
                );
            }
            Err(rejection) => self.status = rejection_message(&rejection),
        }
    }

    fn handle_past_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => self.submit_intervention(),
            KeyCode::Tab => {
                if self.is_busy() {
                    return;
                }
                match self.game.return_to_present() {
                    Ok(()) => {
                        self.input.clear();
                        if self.game.session().outcome().is_none() {
                            self.start_outcome();
                        }
                    }
                    Err(rejection) => self.status = rejection_message(&rejection),
                }
            }
            _ => {
                self.input.handle_edit_key(&key);
            }
        }
    }

    fn handle_present_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('t') => {
                if self.is_busy() {
                    return;
                }
                match self.game.spend_ticket() {
                    Ok(()) => {
                        self.cursor = self.game.session().selected_checkpoint().unwrap_or(0);
                        self.status = format!(
                            "티켓을 썼습니다. 남은 티켓 {}. 다시 돌아갈 체크포인트를 고르세요.",
                            self.game.session().tickets()
                        );
                    }
                    Err(rejection) => self.status = rejection_message(&rejection),
                }
            }
            KeyCode::Enter => {
                if self.is_busy() {
                    return;
                }
                match self.game.finish() {
                    Ok(true) => self.status = "그 사람은 살아남았습니다.".to_string(),
                    Ok(false) => self.status = "시간은 더 이상 되돌아가지 않습니다.".to_string(),
                    Err(rejection) => self.status = rejection_message(&rejection),
                }
            }
            KeyCode::Char('r') => {
                if self.game.session().outcome().is_none() {
                    self.start_outcome();
                }
            }
            KeyCode::Char('q') => self.should_quit = true,
            _ => {}
        }
    }

    fn handle_game_over_key(&mut self, key: KeyEvent) {
        if matches!(key.code, KeyCode::Char('q') | KeyCode::Enter | KeyCode::Esc) {
            self.should_quit = true;
        }
    }

    fn open_notes(&mut self) {
        let mut input = TextInput::with_limit(MAX_NOTE_CHARS);
        input.set(self.game.session().notes.clone());
        self.notes = Some(NotesModal { input });
    }

    fn close_notes(&mut self) {
        if let Some(modal) = self.notes.take() {
            *self.game.notes_mut() = modal.input.value;
            self.status = "메모를 저장했습니다.".to_string();
        }
    }

    fn handle_notes_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc {
            self.close_notes();
            return;
        }
        let Some(modal) = self.notes.as_mut() else {
            return;
        };
        if key.code == KeyCode::Enter {
            modal.input.insert('\n');
        } else {
            modal.input.handle_edit_key(&key);
        }
    }

    fn spinner(&self) -> &'static str {
        SPINNER[self.ticks % SPINNER.len()]
    }

    fn draw(&mut self, frame: &mut Frame) {
        match self.screen {
            Screen::Title => self.draw_title(frame),
            Screen::Play => self.draw_play(frame),
        }
        if let Some(modal) = &self.notes {
            self.render_notes(frame, modal);
        }
    }

    fn draw_title(&self, frame: &mut Frame) {
        let area = frame.size();
        let mut lines: Vec<Line> = Vec::new();
        let top_padding = area.height.saturating_sub(10) / 2;
        for _ in 0..top_padding {
            lines.push(Line::from(""));
        }
        for row in TITLE_BANNER {
            lines.push(Line::from(Span::styled(
                row,
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )));
        }
        lines.push(Line::from(""));
        lines.push(Line::from("되돌릴 수 있는 건 다섯 개의 순간, 주어진 말은 스무 마디."));
        lines.push(Line::from("연인의 비극을 막아 보세요."));
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled("Enter", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" 시작  "),
            Span::styled("q", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" 종료"),
        ]));

        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("About Time"))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn draw_play(&self, frame: &mut Frame) {
        let area = frame.size();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(10), Constraint::Length(4)])
            .split(area);
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(34), Constraint::Min(30)])
            .split(rows[0]);

        self.render_sidebar(frame, columns[0]);
        match self.game.session().mode() {
            Mode::SelectCheckpoint => self.render_select(frame, columns[1]),
            Mode::Past { checkpoint } => self.render_past(frame, columns[1], checkpoint),
            Mode::Present => self.render_present(frame, columns[1]),
            Mode::GameOver { success } => self.render_game_over(frame, columns[1], success),
        }
        self.render_status(frame, rows[1]);
    }

    fn render_sidebar(&self, frame: &mut Frame, area: Rect) {
        let session = self.game.session();
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let mut lines: Vec<Line> = Vec::new();

        lines.push(Line::from(Span::styled("등장인물", bold)));
        match session.cast() {
            Some(cast) => {
                lines.push(Line::from(format!("{} · {}", cast.first, cast.second)));
                lines.push(Line::from(vec![
                    Span::raw("나: "),
                    Span::styled(
                        cast.player_role().to_string(),
                        Style::default().fg(self.theme.accent),
                    ),
                ]));
                lines.push(Line::from(vec![
                    Span::raw("지켜야 할 사람: "),
                    Span::styled(cast.victim.clone(), Style::default().fg(self.theme.danger)),
                ]));
            }
            None => lines.push(Line::from(Span::styled(
                "아직 정해지지 않음",
                Style::default().fg(self.theme.muted),
            ))),
        }

        lines.push(Line::from(""));
        lines.push(Line::from(format!("턴     {}/{}", session.turn(), MAX_TURNS)));
        let ticket_style = if session.tickets() == 0 {
            Style::default().fg(self.theme.danger)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(
            format!("티켓   {}/{}", session.tickets(), STARTING_TICKETS),
            ticket_style,
        )));
        lines.push(Line::from(format!("위치   {}", mode_label(session.mode()))));

        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("메모 (Ctrl+N)", bold)));
        if session.notes.trim().is_empty() {
            lines.push(Line::from(Span::styled(
                "비어 있음",
                Style::default().fg(self.theme.muted),
            )));
        } else {
            for note in session.notes.lines().take(6) {
                lines.push(Line::from(note.to_string()));
            }
        }

        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("조작", bold)));
        for (keys, action) in help_entries(session.mode(), self.game.needs_story()) {
            lines.push(Line::from(vec![
                Span::styled(format!("{keys:<8}"), Style::default().fg(self.theme.accent)),
                Span::raw(action),
            ]));
        }

        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("상황"))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_select(&self, frame: &mut Frame, area: Rect) {
        let session = self.game.session();
        if self.game.needs_story() {
            let text = match &self.job {
                Some(job) if job.streamed.is_empty() => {
                    format!("이야기를 쓰는 중 {}", self.spinner())
                }
                Some(job) => job.streamed.clone(),
                None => "Enter를 눌러 이야기를 만드세요.".to_string(),
            };
            let paragraph = Paragraph::new(self.highlighted(&text))
                .block(Block::default().borders(Borders::ALL).title("원래 이야기"))
                .wrap(Wrap { trim: false })
                .scroll((scroll_to_bottom(&text, area), 0));
            frame.render_widget(paragraph, area);
            return;
        }

        let checkpoints = session.checkpoints();
        let list_height = checkpoints.len() as u16 + 2;
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(list_height), Constraint::Min(5)])
            .split(area);

        let selectable = self.game.selectable_checkpoints();
        let items: Vec<Line> = checkpoints
            .iter()
            .enumerate()
            .map(|(index, block)| {
                let title = block.lines().next().unwrap_or("").trim().to_string();
                let number = index + 1;
                if !selectable.contains(&number) {
                    let suffix = if is_ending_block(block) { "  (결말)" } else { "" };
                    Line::from(Span::styled(
                        format!("   {title}{suffix}"),
                        Style::default().fg(self.theme.muted),
                    ))
                } else if index == self.cursor {
                    Line::from(Span::styled(
                        format!(" ▶ {title}"),
                        Style::default()
                            .fg(self.theme.label)
                            .add_modifier(Modifier::BOLD),
                    ))
                } else {
                    let touched = if session.touched().contains(&index) { " *" } else { "" };
                    Line::from(format!("   {title}{touched}"))
                }
            })
            .collect();
        let list = Paragraph::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title("어느 순간으로 돌아갈까요?"),
        );
        frame.render_widget(list, rows[0]);

        let story = Paragraph::new(self.highlighted(session.story()))
            .block(Block::default().borders(Borders::ALL).title("원래 이야기"))
            .wrap(Wrap { trim: false });
        frame.render_widget(story, rows[1]);
    }

    fn render_past(&self, frame: &mut Frame, area: Rect, checkpoint: usize) {
        let session = self.game.session();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage(30),
                Constraint::Min(6),
                Constraint::Length(3),
            ])
            .split(area);

        let original = session.checkpoint_body(checkpoint).unwrap_or_default();
        let title = format!("체크포인트 {} · 원래 사건", checkpoint + 1);
        let paragraph = Paragraph::new(original)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, rows[0]);

        let role = session.player_role();
        let mut transcript = String::new();
        let mut lines: Vec<Line> = Vec::new();
        for exchange in session.log(checkpoint) {
            let said = format!("▷ {role}: {}", exchange.player_input);
            transcript.push_str(&said);
            transcript.push('\n');
            lines.push(Line::from(Span::styled(
                said,
                Style::default().fg(self.theme.accent),
            )));
            for line in exchange.reply.lines() {
                transcript.push_str(line);
                transcript.push('\n');
                lines.push(Line::from(line.to_string()));
            }
            transcript.push('\n');
            lines.push(Line::from(""));
        }
        if let Some(job) = &self.job {
            if let JobKind::Reply(pending) = &job.kind {
                let said = format!("▷ {role}: {}", pending.input);
                transcript.push_str(&said);
                transcript.push('\n');
                lines.push(Line::from(Span::styled(
                    said,
                    Style::default().fg(self.theme.accent),
                )));
                let reply = if job.streamed.is_empty() {
                    self.spinner().to_string()
                } else {
                    job.streamed.clone()
                };
                for line in reply.lines() {
                    transcript.push_str(line);
                    transcript.push('\n');
                    lines.push(Line::from(Span::styled(
                        line.to_string(),
                        Style::default().fg(self.theme.muted),
                    )));
                }
            }
        }
        if lines.is_empty() {
            lines.push(Line::from(Span::styled(
                "아직 아무것도 바꾸지 않았습니다.",
                Style::default().fg(self.theme.muted),
            )));
        }
        let log = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("개입 기록"))
            .wrap(Wrap { trim: false })
            .scroll((scroll_to_bottom(&transcript, rows[1]), 0));
        frame.render_widget(log, rows[1]);

        let exhausted = session.turns_left() == 0;
        let (prompt, style) = if exhausted {
            (
                "턴을 모두 썼습니다. Tab으로 현재로 돌아가세요.".to_string(),
                Style::default().fg(self.theme.warning),
            )
        } else {
            (self.input.value.clone(), Style::default())
        };
        let input = Paragraph::new(Line::from(vec![
            Span::styled("> ", Style::default().fg(self.theme.accent)),
            Span::styled(prompt, style),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{role}의 말 또는 행동")),
        );
        frame.render_widget(input, rows[2]);

        if !exhausted && self.notes.is_none() {
            let x = (rows[2].x + 3 + self.input.cursor_columns())
                .min(rows[2].x + rows[2].width.saturating_sub(2));
            frame.set_cursor(x, rows[2].y + 1);
        }
    }

    fn render_present(&self, frame: &mut Frame, area: Rect) {
        let session = self.game.session();
        let mut lines: Vec<Line> = Vec::new();
        match session.outcome() {
            Some(outcome) => {
                let (banner, color) = if outcome.is_success() {
                    ("비극을 막았습니다.", self.theme.success)
                } else {
                    ("비극은 되풀이되었습니다.", self.theme.danger)
                };
                lines.push(Line::from(Span::styled(
                    banner,
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(""));
                lines.extend(outcome.text.lines().map(|line| Line::from(line.to_string())));
                lines.push(Line::from(""));
                let next = if outcome.is_success() {
                    "Enter 끝내기".to_string()
                } else if self.game.can_spend_ticket() {
                    format!("t 티켓 사용 (남은 {})   Enter는 티켓을 다 쓴 뒤에", session.tickets())
                } else {
                    "Enter 끝내기".to_string()
                };
                lines.push(Line::from(Span::styled(
                    next,
                    Style::default().fg(self.theme.accent_alt),
                )));
            }
            None if self.job.is_some() => {
                lines.push(Line::from(format!(
                    "바뀐 현재를 확인하는 중 {}",
                    self.spinner()
                )));
            }
            None => {
                lines.push(Line::from(Span::styled(
                    "결말을 받지 못했습니다. r로 다시 요청하세요.",
                    Style::default().fg(self.theme.warning),
                )));
            }
        }

        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("현재"))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_game_over(&self, frame: &mut Frame, area: Rect, success: bool) {
        let session = self.game.session();
        let (banner, color) = if success {
            ("해피엔딩", self.theme.success)
        } else {
            ("게임 오버", self.theme.danger)
        };
        let mut lines = vec![
            Line::from(Span::styled(
                banner,
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
        ];
        if let Some(outcome) = session.outcome() {
            lines.extend(outcome.text.lines().map(|line| Line::from(line.to_string())));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(
                "사용한 턴 {}/{} · 남은 티켓 {}",
                session.turn(),
                MAX_TURNS,
                session.tickets()
            ),
            Style::default().fg(self.theme.muted),
        )));
        lines.push(Line::from("q 종료"));

        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("끝"))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("알림");
        let started = self
            .game
            .session()
            .started_at()
            .with_timezone(&Local)
            .format("%H:%M");
        let secondary = match &self.job {
            Some(_) => format!("응답 대기 중 {}  (Esc 취소)", self.spinner()),
            None => format!("{started} 시작"),
        };
        let paragraph = Paragraph::new(vec![
            Line::from(self.status.clone()),
            Line::from(Span::styled(
                secondary,
                Style::default().fg(self.theme.muted),
            )),
        ])
        .block(block)
        .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_notes(&self, frame: &mut Frame, modal: &NotesModal) {
        let area = centered_rect(60, 14, frame.size());
        frame.render_widget(Clear, area);

        let mut shown = modal.input.value.clone();
        shown.insert(modal.input.byte_index(), '▏');
        let mut lines: Vec<Line> = shown.lines().map(|line| Line::from(line.to_string())).collect();
        if shown.ends_with('\n') {
            lines.push(Line::from(""));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled("Enter", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" 줄바꿈  "),
            Span::styled("Esc", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" 저장하고 닫기"),
        ]));

        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("메모"))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    /// Lines of `text` with every checkpoint label emphasised.
    fn highlighted(&self, text: &str) -> Vec<Line<'static>> {
        let label_style = Style::default()
            .fg(self.theme.label)
            .add_modifier(Modifier::BOLD);
        text.lines()
            .map(|line| {
                let spans: Vec<Span<'static>> = highlight_labels(line)
                    .into_iter()
                    .map(|segment| {
                        if segment.is_label {
                            Span::styled(segment.text.to_string(), label_style)
                        } else {
                            Span::raw(segment.text.to_string())
                        }
                    })
                    .collect();
                Line::from(spans)
            })
            .collect()
    }
}

fn mode_label(mode: Mode) -> String {
    match mode {
        Mode::SelectCheckpoint => "체크포인트 선택".to_string(),
        Mode::Past { checkpoint } => format!("과거 · 체크포인트 {}", checkpoint + 1),
        Mode::Present => "현재".to_string(),
        Mode::GameOver { success: true } => "끝 · 성공".to_string(),
        Mode::GameOver { success: false } => "끝 · 실패".to_string(),
    }
}

fn help_entries(mode: Mode, needs_story: bool) -> Vec<(&'static str, &'static str)> {
    let mut entries = match mode {
        Mode::SelectCheckpoint if needs_story => vec![("Enter", "이야기 만들기")],
        Mode::SelectCheckpoint => vec![
            ("↑/↓", "고르기"),
            ("1-4", "바로 이동"),
            ("Enter", "돌아가기"),
        ],
        Mode::Past { .. } => vec![("Enter", "개입하기"), ("Tab", "현재로")],
        Mode::Present => vec![("t", "티켓 사용"), ("Enter", "끝내기"), ("r", "결말 재요청")],
        Mode::GameOver { .. } => vec![("q", "종료")],
    };
    entries.push(("Esc", "요청 취소"));
    entries.push(("Ctrl+N", "메모"));
    entries.push(("Ctrl+C", "종료"));
    entries
}

fn rejection_message(rejection: &Rejection) -> String {
    match rejection {
        Rejection::StoryNotReady => "이야기가 아직 준비되지 않았습니다.".to_string(),
        Rejection::StoryAlreadyInstalled => "이야기는 이미 준비되어 있습니다.".to_string(),
        Rejection::NoPlayerRole => "플레이어 역할이 정해지지 않았습니다.".to_string(),
        Rejection::CheckpointNotSelectable { number, max } => {
            format!("체크포인트 {number}(으)로는 갈 수 없습니다. 1~{max} 중에서 고르세요.")
        }
        Rejection::EmptyInput => "개입할 말이나 행동을 입력하세요.".to_string(),
        Rejection::TurnsExhausted { max } => {
            format!("{max}턴을 모두 썼습니다. 현재로 돌아가 결말을 확인하세요.")
        }
        Rejection::WrongMode { .. } => "지금은 할 수 없는 동작입니다.".to_string(),
        Rejection::OutcomeMissing => "아직 결말이 나오지 않았습니다.".to_string(),
        Rejection::OutcomeCached => "결말이 이미 나와 있습니다.".to_string(),
        Rejection::OutcomeNotFailure => "성공한 결말에는 티켓을 쓸 수 없습니다.".to_string(),
        Rejection::NoTickets => "남은 티켓이 없습니다. Enter로 끝내세요.".to_string(),
        Rejection::TicketsRemaining => {
            "티켓이 남아 있습니다. t로 다시 시도하세요.".to_string()
        }
        Rejection::Stale => "늦게 도착한 응답을 버렸습니다.".to_string(),
    }
}

fn generation_message(err: &GenerationError) -> String {
    if err.is_retryable() {
        format!("생성 요청 실패: {err}. 다시 시도할 수 있습니다.")
    } else {
        format!("생성 요청 실패: {err}.")
    }
}

/// Scroll offset that keeps the end of `text` visible inside `area`.
fn scroll_to_bottom(text: &str, area: Rect) -> u16 {
    let width = area.width.saturating_sub(2).max(1) as usize;
    let height = area.height.saturating_sub(2) as usize;
    let rows: usize = text
        .lines()
        .map(|line| {
            let columns: usize = line.chars().map(|ch| if ch.is_ascii() { 1 } else { 2 }).sum();
            cmp::max(1, columns.div_ceil(width))
        })
        .sum();
    rows.saturating_sub(height).min(u16::MAX as usize) as u16
}

fn delta_sink(job: u64, sender: mpsc::Sender<AppEvent>) -> DeltaSink {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(AppEvent::Delta { job, text }).await.is_err() {
                break;
            }
        }
    });
    tx
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = cmp::max(cmp::min(width, area.width.saturating_sub(4)), 24);
    let height = cmp::min(height, area.height.saturating_sub(2));
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}
