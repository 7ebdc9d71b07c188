use anyhow::Result;
use chrono::{Local, NaiveDate};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::ListState;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap};
use ratatui::Terminal;
use smartdo::assist::{AssistError, Assistant};
use smartdo::config::{Profile, Settings};
use smartdo::controller::{Planner, Summary};
use smartdo::filter::Filter;
use smartdo::grouping::{AnchorTracker, BucketKey, Granularity, Timeframe};
use smartdo::model::{format_date, parse_date, Task, TaskError, TaskId, TaskPatch};
use smartdo::notes::render_description;
use smartdo::ordering::DropTarget;
use smartdo::store::DataLocation;
use std::collections::HashSet;
use std::io::{stdout, Stdout};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub fn run(planner: Planner, location: DataLocation, settings: Settings) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let mut app = App::new(planner, location, &settings);
    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal)?;
    result
}

/// Results of assistant calls running on the runtime.
enum AssistEvent {
    Decomposed {
        goal: String,
        due: Option<NaiveDate>,
        outcome: Result<Vec<String>, AssistError>,
    },
    Summarized {
        key: BucketKey,
        title: String,
        outcome: Result<String, AssistError>,
    },
}

struct App {
    planner: Planner,
    location: DataLocation,
    assistant: Assistant,
    profile: Option<Profile>,
    filter: Filter,
    granularity: Granularity,
    today: NaiveDate,
    cursor: Option<TaskId>,
    offset: usize,
    anchor: AnchorTracker,
    last_change: Instant,
    status: String,
    mode: Mode,
    generating: Option<String>,
    summarizing: HashSet<BucketKey>,
    last_summary: Option<Summary>,
    events_tx: UnboundedSender<AssistEvent>,
    events_rx: UnboundedReceiver<AssistEvent>,
}

enum Mode {
    Normal,
    Creating { form: TaskForm, with_ai: bool },
    Editing { task_id: TaskId, form: TaskForm },
    ConfirmDelete { task_id: TaskId },
    Details,
    Reading { summary: Summary, scroll: u16 },
}

enum FormAction {
    Create,
    CreateWithAi,
    Edit(TaskId),
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum FormField {
    Text,
    Due,
    Start,
    Important,
    Notes,
}

struct TaskForm {
    text: FieldValue,
    due: FieldValue,
    start: FieldValue,
    important: bool,
    notes: FieldValue,
    field: FormField,
    detailed: bool,
}

#[derive(Clone)]
struct FieldValue {
    value: String,
    cursor: usize,
}

/// One line of the grouped list.
enum Row {
    Header {
        key: BucketKey,
        title: String,
        count: usize,
        timeframe: Timeframe,
        is_anchor: bool,
    },
    Task {
        id: TaskId,
    },
}

/// Snapshot of the current view, detached from the planner.
struct ListRows {
    rows: Vec<Row>,
    groups: Vec<(BucketKey, Vec<TaskId>)>,
}

impl ListRows {
    fn task_ids(&self) -> Vec<&TaskId> {
        self.groups.iter().flat_map(|(_, ids)| ids.iter()).collect()
    }

    fn row_of(&self, id: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| matches!(r, Row::Task { id: row_id } if row_id == id))
    }

    fn first_task_row(&self) -> Option<usize> {
        self.rows.iter().position(|r| matches!(r, Row::Task { .. }))
    }

    /// Bucket index and position inside it.
    fn locate(&self, id: &str) -> Option<(usize, usize)> {
        self.groups.iter().enumerate().find_map(|(b, (_, ids))| {
            ids.iter().position(|other| other == id).map(|i| (b, i))
        })
    }

    fn anchor_row(&self) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| matches!(r, Row::Header { is_anchor: true, .. }))
    }
}

impl FieldValue {
    fn new(value: &str) -> Self {
        FieldValue {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    fn move_left(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor = prev_grapheme(self.cursor, &self.value);
    }

    fn move_right(&mut self) {
        if self.cursor >= self.value.len() {
            return;
        }
        self.cursor = next_grapheme(self.cursor, &self.value);
    }

    fn move_up(&mut self) {
        let (line_starts, line_idx, col) = line_state(&self.value, self.cursor);
        if line_idx == 0 {
            return;
        }
        let target_start = line_starts[line_idx - 1];
        self.cursor = index_at_col(&self.value, target_start, col);
    }

    fn move_down(&mut self) {
        let (line_starts, line_idx, col) = line_state(&self.value, self.cursor);
        if line_idx + 1 >= line_starts.len() {
            return;
        }
        let target_start = line_starts[line_idx + 1];
        self.cursor = index_at_col(&self.value, target_start, col);
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let prev = prev_grapheme(self.cursor, &self.value);
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert_str(self.cursor, "▌");
        text
    }
}

impl App {
    fn new(planner: Planner, location: DataLocation, settings: &Settings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let assistant = Assistant::from_settings(settings);
        let status = format!(
            "Loaded {} tasks from {} (assistant: {})",
            planner.tasks().len(),
            location.tasks_path().display(),
            assistant.backend_name()
        );
        App {
            planner,
            location,
            assistant,
            profile: settings.profile.clone(),
            filter: Filter::All,
            granularity: Granularity::Day,
            today: Local::now().date_naive(),
            cursor: None,
            offset: 0,
            anchor: AnchorTracker::new(),
            last_change: Instant::now(),
            status,
            mode: Mode::Normal,
            generating: None,
            summarizing: HashSet::new(),
            last_summary: None,
            events_tx,
            events_rx,
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.today = Local::now().date_naive();
            self.process_events();
            self.sync_anchor();
            terminal.draw(|f| self.draw(f))?;
            if event::poll(Duration::from_millis(200))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn process_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                AssistEvent::Decomposed { goal, due, outcome } => {
                    self.generating = None;
                    match self.planner.apply_decomposition(&goal, due, outcome) {
                        Ok(ids) => {
                            self.cursor = ids.first().cloned();
                            self.touch(format!("Added {} task(s) for \"{}\"", ids.len(), goal));
                        }
                        Err(err) => self.status = format!("Could not add: {}", err),
                    }
                }
                AssistEvent::Summarized {
                    key,
                    title,
                    outcome,
                } => {
                    self.summarizing.remove(&key);
                    if let Some(summary) = self.planner.finish_summary(key, title, outcome) {
                        self.status = format!("Summary ready for {}", summary.title);
                        self.last_summary = Some(summary.clone());
                        if matches!(self.mode, Mode::Normal) {
                            self.mode = Mode::Reading { summary, scroll: 0 };
                        }
                    }
                }
            }
        }
    }

    /// Scrolls to the anchor bucket once per granularity.
    fn sync_anchor(&mut self) {
        if !self.anchor.should_anchor(self.granularity) {
            return;
        }
        let rows = self.list_rows();
        if let Some(row) = rows.anchor_row() {
            self.offset = row;
            if let Some(Row::Task { id }) = rows.rows.get(row + 1) {
                self.cursor = Some(id.clone());
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(true);
        }
        match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::Creating { .. } | Mode::Editing { .. } => self.handle_form_key(key),
            Mode::ConfirmDelete { .. } => self.handle_confirm_key(key),
            Mode::Details => self.handle_details_key(key),
            Mode::Reading { .. } => self.handle_reading_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.select_relative(1),
            KeyCode::Char('k') | KeyCode::Up => self.select_relative(-1),
            KeyCode::Char('J') => self.shift_within(1),
            KeyCode::Char('K') => self.shift_within(-1),
            KeyCode::Char(']') => self.shift_bucket(1),
            KeyCode::Char('[') => self.shift_bucket(-1),
            KeyCode::Tab => {
                self.filter = self.filter.next();
                self.status = format!("Showing {} tasks", self.filter.label().to_lowercase());
            }
            KeyCode::Char('g') => {
                self.granularity = self.granularity.next();
                self.status = format!("Grouping by {}", self.granularity.label().to_lowercase());
            }
            KeyCode::Char('t') => {
                self.anchor.reset();
                self.status = "Jumped to today".into();
            }
            KeyCode::Char('n') => {
                self.mode = Mode::Creating {
                    form: TaskForm::new(self.today),
                    with_ai: false,
                };
            }
            KeyCode::Char('a') => {
                if let Some(goal) = &self.generating {
                    self.status = format!("Still generating tasks for \"{}\"", goal);
                } else {
                    self.mode = Mode::Creating {
                        form: TaskForm::new(self.today),
                        with_ai: true,
                    };
                }
            }
            KeyCode::Char(' ') | KeyCode::Char('x') => self.toggle_current(),
            KeyCode::Char('e') => self.start_edit(),
            KeyCode::Char('d') => {
                if let Some(task_id) = self.current_id() {
                    self.mode = Mode::ConfirmDelete { task_id };
                }
            }
            KeyCode::Enter => {
                if let Some(id) = self.current_id() {
                    if self.planner.open_details(&id).is_ok() {
                        self.mode = Mode::Details;
                    }
                }
            }
            KeyCode::Char('s') => self.request_summary(),
            KeyCode::Char('v') => match self.last_summary.clone() {
                Some(summary) => self.mode = Mode::Reading { summary, scroll: 0 },
                None => self.status = "No summary yet; press s on a group".into(),
            },
            _ => {}
        }
        Ok(false)
    }

    fn handle_form_key(&mut self, key: KeyEvent) -> Result<bool> {
        let mut close_form = false;
        let mut mode = std::mem::replace(&mut self.mode, Mode::Normal);
        match &mut mode {
            Mode::Creating { form, with_ai } => {
                let action = if *with_ai {
                    FormAction::CreateWithAi
                } else {
                    FormAction::Create
                };
                close_form = self.process_form_key(action, form, key);
            }
            Mode::Editing { task_id, form } => {
                let id = task_id.clone();
                close_form = self.process_form_key(FormAction::Edit(id), form, key);
            }
            _ => {}
        }
        self.mode = if close_form { Mode::Normal } else { mode };
        Ok(false)
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) -> Result<bool> {
        let task_id = match &self.mode {
            Mode::ConfirmDelete { task_id } => task_id.clone(),
            _ => return Ok(false),
        };
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                match self.planner.delete(&task_id) {
                    Ok(task) => {
                        self.select_relative(1);
                        self.touch(format!("Deleted \"{}\"", task.text));
                    }
                    Err(err) => self.status = format!("Delete failed: {}", err),
                }
                self.mode = Mode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                self.status = "Delete canceled".into();
                self.mode = Mode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_details_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => {
                self.planner.close_details();
                self.mode = Mode::Normal;
            }
            KeyCode::Char('e') => {
                self.planner.close_details();
                self.mode = Mode::Normal;
                self.start_edit();
            }
            KeyCode::Char(' ') | KeyCode::Char('x') => self.toggle_current(),
            KeyCode::Char('d') => {
                if let Some(task_id) = self.current_id() {
                    self.mode = Mode::ConfirmDelete { task_id };
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_reading_key(&mut self, key: KeyEvent) -> Result<bool> {
        if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')) {
            self.mode = Mode::Normal;
            return Ok(false);
        }
        if let Mode::Reading { scroll, .. } = &mut self.mode {
            match key.code {
                KeyCode::Char('j') | KeyCode::Down => *scroll = scroll.saturating_add(1),
                KeyCode::Char('k') | KeyCode::Up => *scroll = scroll.saturating_sub(1),
                _ => {}
            }
        }
        Ok(false)
    }

    fn process_form_key(&mut self, action: FormAction, form: &mut TaskForm, key: KeyEvent) -> bool {
        let mut close_form = false;
        match key.code {
            KeyCode::Esc => {
                close_form = true;
                self.status = "Canceled".into();
            }
            KeyCode::Tab => form.next_field(),
            KeyCode::BackTab => form.prev_field(),
            KeyCode::Left => form.with_active(FieldValue::move_left),
            KeyCode::Right => form.with_active(FieldValue::move_right),
            KeyCode::Up => form.with_active(FieldValue::move_up),
            KeyCode::Down => form.with_active(FieldValue::move_down),
            KeyCode::Enter => {
                let control = key.modifiers.contains(KeyModifiers::CONTROL);
                if form.field == FormField::Notes && !control {
                    form.with_active(|f| f.insert_char('\n'));
                } else {
                    close_form = self.try_submit(action, form);
                }
            }
            KeyCode::Backspace => form.with_active(FieldValue::backspace),
            KeyCode::Char(' ') if form.field == FormField::Important => {
                form.important = !form.important;
            }
            KeyCode::Char(c) => {
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
                {
                    form.with_active(|f| f.insert_char(c));
                }
            }
            _ => {}
        }
        close_form
    }

    /// Returns true when the form should close.
    fn try_submit(&mut self, action: FormAction, form: &TaskForm) -> bool {
        let due = match parse_form_date(&form.due.value) {
            Ok(d) => d,
            Err(msg) => {
                self.status = msg;
                return false;
            }
        };
        match action {
            FormAction::Create => match self.planner.create(&form.text.value, due) {
                Ok(id) => {
                    self.cursor = Some(id);
                    self.touch("Added task");
                    true
                }
                Err(TaskError::EmptyText) => false,
                Err(err) => {
                    self.status = format!("Could not create: {}", err);
                    false
                }
            },
            FormAction::CreateWithAi => {
                let goal = form.text.value.trim().to_string();
                if goal.is_empty() {
                    return false;
                }
                self.spawn_decomposition(goal, due);
                true
            }
            FormAction::Edit(task_id) => {
                let start = match parse_form_date(&form.start.value) {
                    Ok(d) => d,
                    Err(msg) => {
                        self.status = msg;
                        return false;
                    }
                };
                let notes = form.notes.value.trim_end();
                let patch = TaskPatch {
                    text: Some(form.text.value.clone()),
                    due_date: Some(due),
                    start_date: Some(start),
                    is_important: Some(form.important),
                    description: Some((!notes.is_empty()).then(|| notes.to_string())),
                    ..TaskPatch::default()
                };
                match self.planner.update(&task_id, &patch) {
                    Ok(()) => {
                        self.touch("Updated task");
                        true
                    }
                    Err(TaskError::EmptyText) => false,
                    Err(err) => {
                        self.status = format!("Could not edit: {}", err);
                        false
                    }
                }
            }
        }
    }

    fn spawn_decomposition(&mut self, goal: String, due: Option<NaiveDate>) {
        self.status = format!("Generating tasks for \"{}\"...", goal);
        self.generating = Some(goal.clone());
        let assistant = self.assistant.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = assistant.decompose(&goal).await;
            let _ = tx.send(AssistEvent::Decomposed { goal, due, outcome });
        });
    }

    fn request_summary(&mut self) {
        let Some(id) = self.current_id() else {
            self.status = "Nothing to summarize".into();
            return;
        };
        let rows = self.list_rows();
        let Some((bucket, _)) = rows.locate(&id) else {
            return;
        };
        let key = rows.groups[bucket].0.clone();
        if self.summarizing.contains(&key) {
            self.status = "A summary for this group is already on its way".into();
            return;
        }
        let Some(request) =
            self.planner
                .summary_request(&key, self.filter, self.granularity, self.today)
        else {
            return;
        };
        self.status = format!("Summarizing {}...", request.title);
        self.summarizing.insert(key);
        let assistant = self.assistant.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = assistant
                .summarize(&request.title, &request.tasks, request.granularity)
                .await;
            let _ = tx.send(AssistEvent::Summarized {
                key: request.key,
                title: request.title,
                outcome,
            });
        });
    }

    fn start_edit(&mut self) {
        let Some(id) = self.current_id() else {
            return;
        };
        if let Some(task) = self.planner.get(&id) {
            self.mode = Mode::Editing {
                form: TaskForm::from_task(task),
                task_id: id,
            };
        }
    }

    fn toggle_current(&mut self) {
        let Some(id) = self.current_id() else {
            return;
        };
        match self.planner.toggle_complete(&id) {
            Ok(true) => self.touch("Marked completed"),
            Ok(false) => self.touch("Marked active"),
            Err(err) => self.status = format!("Toggle failed: {}", err),
        }
    }

    fn select_relative(&mut self, delta: isize) {
        let rows = self.list_rows();
        let ids = rows.task_ids();
        if ids.is_empty() {
            self.cursor = None;
            return;
        }
        let current = self
            .cursor
            .as_ref()
            .and_then(|c| ids.iter().position(|id| *id == c));
        let next = match current {
            Some(idx) => (idx as isize + delta).clamp(0, ids.len() as isize - 1) as usize,
            None => 0,
        };
        self.cursor = Some(ids[next].clone());
    }

    /// Drops the selected task onto its neighbour inside the same group.
    fn shift_within(&mut self, delta: isize) {
        let Some(id) = self.current_id() else {
            return;
        };
        let rows = self.list_rows();
        let Some((bucket, index)) = rows.locate(&id) else {
            return;
        };
        let members = &rows.groups[bucket].1;
        let target = index as isize + delta;
        if target < 0 || target as usize >= members.len() {
            self.status = "Edge of the group; use [ or ] to change group".into();
            return;
        }
        let target = DropTarget::Task(members[target as usize].clone());
        self.apply_move(&id, target);
    }

    /// Drops the selected task onto the header of the neighbouring group.
    fn shift_bucket(&mut self, delta: isize) {
        let Some(id) = self.current_id() else {
            return;
        };
        let rows = self.list_rows();
        let Some((bucket, _)) = rows.locate(&id) else {
            return;
        };
        let target = bucket as isize + delta;
        if target < 0 || target as usize >= rows.groups.len() {
            self.status = "No group in that direction".into();
            return;
        }
        let key = rows.groups[target as usize].0.clone();
        self.apply_move(&id, DropTarget::Bucket(key));
    }

    fn apply_move(&mut self, id: &str, target: DropTarget) {
        match self
            .planner
            .move_task(self.filter, self.granularity, self.today, id, &target)
        {
            Ok(true) => {
                self.cursor = Some(id.to_string());
                self.touch("Moved task");
            }
            Ok(false) => {}
            Err(err) => self.status = format!("Move failed: {}", err),
        }
    }

    fn current_id(&self) -> Option<TaskId> {
        if let Mode::Details = self.mode {
            if let Some(task) = self.planner.selected() {
                return Some(task.id.clone());
            }
        }
        let rows = self.list_rows();
        let ids = rows.task_ids();
        self.cursor
            .as_ref()
            .filter(|c| ids.contains(c))
            .cloned()
            .or_else(|| ids.first().map(|id| (*id).clone()))
    }

    fn list_rows(&self) -> ListRows {
        let buckets = self
            .planner
            .view(self.filter, self.granularity, self.today);
        let mut rows = Vec::new();
        let mut groups = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            rows.push(Row::Header {
                key: bucket.key.clone(),
                title: bucket.title.clone(),
                count: bucket.tasks.len(),
                timeframe: bucket.timeframe,
                is_anchor: bucket.is_anchor,
            });
            let ids: Vec<TaskId> = bucket.tasks.iter().map(|t| t.id.clone()).collect();
            rows.extend(ids.iter().map(|id| Row::Task { id: id.clone() }));
            groups.push((bucket.key.clone(), ids));
        }
        ListRows { rows, groups }
    }

    fn touch(&mut self, message: impl Into<String>) {
        self.last_change = Instant::now();
        self.status = message.into();
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(1),
                Constraint::Min(6),
                Constraint::Length(4),
            ])
            .split(f.size());

        self.draw_header(f, layout[0]);
        self.draw_tabs(f, layout[1]);
        self.draw_list(f, layout[2]);
        self.draw_footer(f, layout[3]);

        match &self.mode {
            Mode::Creating { form, with_ai } => {
                let title = if *with_ai { "New Tasks via AI" } else { "New Task" };
                self.draw_form(f, title, form);
            }
            Mode::Editing { form, .. } => self.draw_form(f, "Edit Task", form),
            Mode::ConfirmDelete { task_id } => self.draw_confirm(f, task_id),
            Mode::Details => self.draw_details(f),
            Mode::Reading { summary, scroll } => self.draw_summary(f, summary, *scroll),
            Mode::Normal => {}
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let who = self
            .profile
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "not signed in".into());
        let title = Line::from(vec![
            Span::styled(
                "smartdo ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(self.location.scope.label(), Style::default().fg(Color::Green)),
            Span::raw("  •  "),
            Span::styled(
                format!("{}", self.location.dir.display()),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw("  •  "),
            Span::styled(
                format!("changed {}", format_elapsed(self.last_change)),
                Style::default().fg(Color::Gray),
            ),
            Span::raw("  •  "),
            Span::styled(who, Style::default().fg(Color::Magenta)),
            Span::raw("  •  "),
            Span::styled(
                format!("ai {}", self.assistant.backend_name()),
                Style::default().fg(Color::LightBlue),
            ),
        ]);

        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        let paragraph = Paragraph::new(title)
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    fn draw_tabs(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let counts = self.planner.counts();
        let active = Style::default()
            .fg(Color::Black)
            .bg(Color::LightCyan)
            .add_modifier(Modifier::BOLD);
        let idle = Style::default().fg(Color::Gray);
        let mut spans = Vec::new();
        for filter in Filter::ALL {
            let style = if filter == self.filter { active } else { idle };
            spans.push(Span::styled(
                format!(" {} {} ", filter.label(), counts.get(filter)),
                style,
            ));
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled("  │  ", Style::default().fg(Color::DarkGray)));
        for granularity in Granularity::ALL {
            let style = if granularity == self.granularity {
                active
            } else {
                idle
            };
            spans.push(Span::styled(format!(" {} ", granularity.label()), style));
            spans.push(Span::raw(" "));
        }
        f.render_widget(
            Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
            area,
        );
    }

    fn draw_list(&mut self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = self.list_rows();
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .style(Style::default().bg(Color::Rgb(16, 18, 24)));
        if rows.rows.is_empty() {
            let hint = match self.filter {
                Filter::All => "No tasks yet. Press n to add one or a to plan with AI.",
                Filter::Active => "Nothing left to do.",
                Filter::Completed => "Nothing completed yet.",
            };
            let msg = Paragraph::new(hint).alignment(Alignment::Center).block(block);
            f.render_widget(Clear, area);
            f.render_widget(msg, area);
            return;
        }

        let selected = self
            .cursor
            .as_deref()
            .and_then(|id| rows.row_of(id))
            .or_else(|| rows.first_task_row());
        if let Some(Row::Task { id }) = selected.and_then(|idx| rows.rows.get(idx)) {
            self.cursor = Some(id.clone());
        }

        let width = area.width.saturating_sub(4) as usize;
        let items: Vec<ListItem<'static>> = rows
            .rows
            .iter()
            .map(|row| match row {
                Row::Header {
                    key,
                    title,
                    count,
                    timeframe,
                    is_anchor,
                } => header_item(
                    title,
                    *count,
                    *timeframe,
                    *is_anchor,
                    self.summarizing.contains(key),
                ),
                Row::Task { id } => match self.planner.get(id) {
                    Some(task) => task_item(task, width),
                    None => ListItem::new(Line::from(format!("  {} (missing)", id))),
                },
            })
            .collect();

        let viewport = area.height.saturating_sub(2) as usize;
        let mut state = ListState::default();
        if let Some(sel) = selected {
            self.offset = adjust_offset(sel, self.offset, viewport, 1, items.len());
            state.select(Some(sel));
        } else {
            self.offset = self.offset.min(items.len().saturating_sub(1));
        }
        *state.offset_mut() = self.offset;

        let list = List::new(items).block(block).highlight_style(
            Style::default()
                .bg(Color::LightCyan)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        );
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Length(2)])
            .split(area);

        let help_bar = Paragraph::new(self.footer_help_line())
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(help_bar, rows[0]);

        let bottom = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(rows[1]);

        let status = match self.planner.notice(Instant::now()) {
            Some(notice) => Paragraph::new(Span::styled(
                notice.to_string(),
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            None => Paragraph::new(self.status.clone()),
        };
        let status = status.wrap(Wrap { trim: true }).block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray)),
        );
        f.render_widget(status, bottom[0]);

        let detail_line = match self.current_id().and_then(|id| self.planner.get(&id)) {
            Some(task) => selected_task_detail(task),
            None => Line::from("No task selected"),
        };
        let detail = Paragraph::new(detail_line).wrap(Wrap { trim: true }).block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray))
                .title("Selected"),
        );
        f.render_widget(detail, bottom[1]);
    }

    fn footer_help_line(&self) -> Line<'static> {
        let key = |k: &'static str, color: Color| Span::styled(k, Style::default().fg(color));
        let mut spans = vec![
            key("j/k", Color::LightCyan),
            Span::raw(" browse  "),
            key("J/K", Color::LightGreen),
            Span::raw(" reorder  "),
            key("[ ]", Color::LightGreen),
            Span::raw(" change group  "),
            key("Tab", Color::LightCyan),
            Span::raw(" filter  "),
            key("g", Color::LightCyan),
            Span::raw(" grouping  "),
            key("n", Color::LightMagenta),
            Span::raw(" new  "),
        ];
        if self.generating.is_some() {
            spans.push(Span::styled("a", Style::default().fg(Color::DarkGray)));
            spans.push(Span::raw(" generating…  "));
        } else {
            spans.push(key("a", Color::LightMagenta));
            spans.push(Span::raw(" AI plan  "));
        }
        spans.extend([
            key("x", Color::LightGreen),
            Span::raw(" done  "),
            key("Enter", Color::LightYellow),
            Span::raw(" details  "),
            key("e", Color::LightYellow),
            Span::raw(" edit  "),
            key("s", Color::LightBlue),
            Span::raw(" summary  "),
            key("t", Color::LightCyan),
            Span::raw(" today  "),
            key("d", Color::LightRed),
            Span::raw(" delete  "),
            key("q", Color::LightRed),
            Span::raw(" quit"),
        ]);
        Line::from(spans)
    }

    fn draw_form(&self, f: &mut ratatui::Frame<'_>, title: &str, form: &TaskForm) {
        let area = centered_rect(70, 60, f.size());
        let mut fields = Vec::new();
        let text_label = if title.contains("AI") { "Goal" } else { "Title" };
        fields.extend(field_lines(
            text_label,
            &form.text,
            form.field == FormField::Text,
        ));
        fields.extend(field_lines(
            "Due (YYYY-MM-DD)",
            &form.due,
            form.field == FormField::Due,
        ));
        if form.detailed {
            fields.extend(field_lines(
                "Start (YYYY-MM-DD)",
                &form.start,
                form.field == FormField::Start,
            ));
            let mark = if form.important { "[x]" } else { "[ ]" };
            let style = Style::default().fg(if form.field == FormField::Important {
                Color::Cyan
            } else {
                Color::White
            });
            fields.push(Line::from(vec![
                Span::styled(
                    "Important: ",
                    Style::default()
                        .fg(Color::Gray)
                        .add_modifier(Modifier::BOLD | Modifier::DIM),
                ),
                Span::styled(format!("{} (Space toggles)", mark), style),
            ]));
            fields.extend(field_lines(
                "Notes",
                &form.notes,
                form.field == FormField::Notes,
            ));
        }
        let hint = if form.detailed {
            "Ctrl+Enter to save • Esc to cancel • Tab/Shift-Tab to move • Enter adds newline in Notes"
        } else {
            "Enter to save • Esc to cancel • Tab/Shift-Tab to move • clear Due for no date"
        };
        fields.push(Line::from(Span::styled(hint, Style::default().fg(Color::Gray))));
        let dialog = Paragraph::new(fields)
            .block(
                Block::default()
                    .title(Span::styled(
                        title.to_string(),
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: true });

        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }

    fn draw_confirm(&self, f: &mut ratatui::Frame<'_>, task_id: &str) {
        let area = centered_rect(50, 30, f.size());
        let title = self
            .planner
            .get(task_id)
            .map(|t| t.text.clone())
            .unwrap_or_else(|| task_id.to_string());
        let body = vec![
            Line::from(Span::styled(
                format!("Delete \"{}\"?", title),
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from("Press y to confirm, n or Esc to cancel"),
        ];
        let dialog = Paragraph::new(body).alignment(Alignment::Center).block(
            Block::default()
                .title(Span::styled(
                    "Confirm Delete",
                    Style::default()
                        .fg(Color::LightRed)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::LightRed)),
        );
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }

    fn draw_details(&self, f: &mut ratatui::Frame<'_>) {
        let Some(task) = self.planner.selected() else {
            return;
        };
        let area = centered_rect(75, 70, f.size());
        let width = area.width.saturating_sub(4) as usize;
        let label = Style::default()
            .fg(Color::Gray)
            .add_modifier(Modifier::BOLD | Modifier::DIM);
        let field = |name: &str, value: String| {
            Line::from(vec![
                Span::styled(format!("{:<10}", name), label),
                Span::raw(value),
            ])
        };
        let mut lines = vec![
            Line::from(Span::styled(
                task.text.clone(),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            field(
                "Status",
                if task.completed { "completed" } else { "active" }.into(),
            ),
            field("Due", display_date(task.due_date)),
            field("Start", display_date(task.start_date)),
            field("Important", if task.is_important { "yes" } else { "no" }.into()),
            field(
                "Created",
                task.created_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string(),
            ),
        ];
        if task.is_ai_generated {
            lines.push(field("Source", "generated by AI".into()));
        }
        lines.push(Line::from(""));
        match task.description.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(description) => {
                let rendered = render_description(description, &task.images);
                lines.extend(
                    rendered
                        .lines()
                        .map(|l| Line::from(truncate_text(l, width))),
                );
            }
            None => lines.push(Line::from(Span::styled(
                "No notes. Press e to add some.",
                Style::default().fg(Color::DarkGray),
            ))),
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "e edit • x toggle • d delete • Esc close",
            Style::default().fg(Color::Gray),
        )));
        let dialog = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
            Block::default()
                .title(Span::styled(
                    "Details",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        );
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }

    fn draw_summary(&self, f: &mut ratatui::Frame<'_>, summary: &Summary, scroll: u16) {
        let area = centered_rect(80, 80, f.size());
        let dialog = Paragraph::new(summary.content.clone())
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0))
            .block(
                Block::default()
                    .title(Span::styled(
                        format!("Summary: {}  (j/k scroll, Esc close)", summary.title),
                        Style::default()
                            .fg(Color::LightBlue)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::LightBlue)),
            );
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }
}

impl TaskForm {
    fn new(today: NaiveDate) -> Self {
        TaskForm {
            text: FieldValue::new(""),
            due: FieldValue::new(&format_date(today)),
            start: FieldValue::new(""),
            important: false,
            notes: FieldValue::new(""),
            field: FormField::Text,
            detailed: false,
        }
    }

    fn from_task(task: &Task) -> Self {
        TaskForm {
            text: FieldValue::new(&task.text),
            due: FieldValue::new(&task.due_date.map(format_date).unwrap_or_default()),
            start: FieldValue::new(&task.start_date.map(format_date).unwrap_or_default()),
            important: task.is_important,
            notes: FieldValue::new(task.description.as_deref().unwrap_or_default()),
            field: FormField::Text,
            detailed: true,
        }
    }

    fn fields(&self) -> &'static [FormField] {
        if self.detailed {
            &[
                FormField::Text,
                FormField::Due,
                FormField::Start,
                FormField::Important,
                FormField::Notes,
            ]
        } else {
            &[FormField::Text, FormField::Due]
        }
    }

    fn next_field(&mut self) {
        let fields = self.fields();
        let idx = fields.iter().position(|f| *f == self.field).unwrap_or(0);
        self.field = fields[(idx + 1) % fields.len()];
    }

    fn prev_field(&mut self) {
        let fields = self.fields();
        let idx = fields.iter().position(|f| *f == self.field).unwrap_or(0);
        self.field = fields[(idx + fields.len() - 1) % fields.len()];
    }

    /// Runs `edit` on the focused text field; the checkbox has none.
    fn with_active(&mut self, edit: impl FnOnce(&mut FieldValue)) {
        let field = match self.field {
            FormField::Text => &mut self.text,
            FormField::Due => &mut self.due,
            FormField::Start => &mut self.start,
            FormField::Notes => &mut self.notes,
            FormField::Important => return,
        };
        edit(field);
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn parse_form_date(input: &str) -> std::result::Result<Option<NaiveDate>, String> {
    let raw = input.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    parse_date(raw)
        .map(Some)
        .map_err(|_| format!("Invalid date (use YYYY-MM-DD): {}", raw))
}

fn display_date(date: Option<NaiveDate>) -> String {
    date.map(format_date).unwrap_or_else(|| "-".to_string())
}

fn adjust_offset(
    selected: usize,
    current_offset: usize,
    viewport: usize,
    scrolloff: usize,
    len: usize,
) -> usize {
    if viewport == 0 || len == 0 {
        return 0;
    }
    let max_offset = len.saturating_sub(viewport);
    let margin = scrolloff.min(viewport.saturating_sub(1));
    let mut offset = current_offset.min(max_offset);
    if selected < offset.saturating_add(margin) {
        offset = selected.saturating_sub(margin);
    } else {
        let upper = offset
            .saturating_add(viewport.saturating_sub(1))
            .saturating_sub(margin);
        if selected > upper {
            offset = selected.saturating_add(margin + 1).saturating_sub(viewport);
        }
    }
    offset.min(max_offset)
}

fn prev_grapheme(cursor: usize, text: &str) -> usize {
    text[..cursor]
        .char_indices()
        .next_back()
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn next_grapheme(cursor: usize, text: &str) -> usize {
    text[cursor..]
        .chars()
        .next()
        .map(|ch| cursor + ch.len_utf8())
        .unwrap_or(text.len())
}

fn line_state(text: &str, cursor: usize) -> (Vec<usize>, usize, usize) {
    let mut starts = vec![0];
    starts.extend(
        text.char_indices()
            .filter(|(_, ch)| *ch == '\n')
            .map(|(idx, _)| idx + 1),
    );
    let line_idx = starts.iter().rposition(|start| *start <= cursor).unwrap_or(0);
    let col = text[starts[line_idx]..cursor].chars().count();
    (starts, line_idx, col)
}

fn index_at_col(text: &str, start: usize, target_col: usize) -> usize {
    let slice = &text[start..];
    let limit = slice.find('\n').unwrap_or(slice.len());
    slice[..limit]
        .char_indices()
        .nth(target_col)
        .map(|(idx, _)| start + idx)
        .unwrap_or(start + limit)
}

fn truncate_text(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(&".".repeat(max - keep));
    out
}

fn header_item(
    title: &str,
    count: usize,
    timeframe: Timeframe,
    is_anchor: bool,
    pending: bool,
) -> ListItem<'static> {
    let color = match timeframe {
        Timeframe::Past => Color::DarkGray,
        Timeframe::Today => Color::Yellow,
        Timeframe::Future => Color::LightCyan,
        Timeframe::Undated => Color::LightMagenta,
    };
    let mut style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    if is_anchor {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    let mut spans = vec![
        Span::styled(format!("▸ {}", title), style),
        Span::styled(format!("  {}", count), Style::default().fg(Color::Gray)),
    ];
    if pending {
        spans.push(Span::styled(
            "  summarizing…",
            Style::default().fg(Color::LightBlue),
        ));
    }
    ListItem::new(Line::from(spans))
}

fn task_item(task: &Task, width: usize) -> ListItem<'static> {
    let check = if task.completed { "[x]" } else { "[ ]" };
    let text_style = if task.completed {
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::CROSSED_OUT)
    } else {
        Style::default().fg(Color::White)
    };
    let mut spans = vec![
        Span::raw("   "),
        Span::styled(format!("{} ", check), Style::default().fg(Color::Gray)),
        Span::styled(truncate_text(&task.text, width.saturating_sub(16)), text_style),
    ];
    if task.is_important {
        spans.push(Span::styled(" !", Style::default().fg(Color::LightRed)));
    }
    if task.is_ai_generated {
        spans.push(Span::styled(" ✦", Style::default().fg(Color::LightMagenta)));
    }
    if task.description.as_deref().is_some_and(|d| !d.trim().is_empty()) {
        spans.push(Span::styled(" ≡", Style::default().fg(Color::Gray)));
    }
    ListItem::new(Line::from(spans))
}

fn field_lines(label: &str, field: &FieldValue, active: bool) -> Vec<Line<'static>> {
    let label_style = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::BOLD | Modifier::DIM);
    let value_style = Style::default().fg(if active { Color::Cyan } else { Color::White });
    let prefix = format!("{}: ", label);
    let spacer = " ".repeat(prefix.chars().count());
    let text = if active {
        field.with_caret()
    } else {
        field.value.clone()
    };
    text.split('\n')
        .enumerate()
        .map(|(idx, line)| {
            let lead = if idx == 0 {
                prefix.clone()
            } else {
                spacer.clone()
            };
            Line::from(vec![
                Span::styled(lead, label_style),
                Span::styled(line.to_string(), value_style),
            ])
        })
        .collect()
}

fn selected_task_detail(task: &Task) -> Line<'static> {
    let mut spans = vec![Span::styled(
        task.text.clone(),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )];
    if let Some(due) = task.due_date {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("due {}", format_date(due)),
            Style::default().fg(Color::LightRed),
        ));
    }
    if let Some(start) = task.start_date {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("from {}", format_date(start)),
            Style::default().fg(Color::LightGreen),
        ));
    }
    if let Some(description) = task.description.as_deref() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            description.lines().next().unwrap_or_default().to_string(),
            Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
        ));
    }
    Line::from(spans)
}

fn format_elapsed(last: Instant) -> String {
    let secs = last.elapsed().as_secs();
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}
