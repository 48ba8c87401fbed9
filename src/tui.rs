use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::ShelfError;

const EVENTS_MAX: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Prepare,
    Fetch,
    Verify,
    Store,
}

impl Phase {
    const ALL: [Phase; 5] = [
        Phase::Resolve,
        Phase::Prepare,
        Phase::Fetch,
        Phase::Verify,
        Phase::Store,
    ];

    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Prepare => "Prepare",
            Phase::Fetch => "Fetch",
            Phase::Verify => "Verify",
            Phase::Store => "Store",
        }
    }

    fn index(self) -> usize {
        match self {
            Phase::Resolve => 0,
            Phase::Prepare => 1,
            Phase::Fetch => 2,
            Phase::Verify => 3,
            Phase::Store => 4,
        }
    }
}

#[derive(Debug)]
struct ViewState {
    status: String,
    phase: Phase,
    last_latency: Option<Duration>,
    events: VecDeque<String>,
    started: Instant,
    active: bool,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<ViewState>>,
}

struct TuiProgress {
    state: Arc<Mutex<ViewState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
            }
            if let Some(elapsed) = event.elapsed {
                state.last_latency = Some(elapsed);
            }
            push_event(&mut state.events, format!("[{}] {message}", timestamp()));
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(ViewState {
                status: "ready".to_string(),
                phase: Phase::Resolve,
                last_latency: None,
                events: VecDeque::new(),
                started: Instant::now(),
                active: false,
            })),
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. Leaving the
    /// view with `q`/Esc only restores the terminal; the worker still runs to
    /// completion and its result is returned. A terminal failure mid-run is
    /// logged and handled the same way.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, ShelfError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);
        let mut terminal = enter_terminal()?;

        let (tx, rx) = mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let outcome = self.draw_until_done(&mut terminal, &rx);

        self.set_active(false);
        drop(terminal);
        if let Err(report) = restore_terminal() {
            tracing::warn!(error = %report, "failed to restore terminal");
        }

        let result = settle(outcome, &rx);
        handle.join().ok();
        result
    }

    fn draw_until_done<R>(
        &self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
        rx: &Receiver<Result<R, ShelfError>>,
    ) -> miette::Result<Option<Result<R, ShelfError>>> {
        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                return Ok(Some(result));
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind == KeyEventKind::Press
                        && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                    {
                        return Ok(None);
                    }
                }
            }

            tick = tick.wrapping_add(1);
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }
}

fn enter_terminal() -> miette::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().into_diagnostic()?;
    let terminal = open_terminal();
    if terminal.is_err() {
        restore_terminal().ok();
    }
    terminal
}

fn open_terminal() -> miette::Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout)).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok(terminal)
}

/// Leaves the alternate screen and raw mode, attempting both even when the
/// first step fails.
fn restore_terminal() -> miette::Result<()> {
    let raw = disable_raw_mode().into_diagnostic();
    let screen = io::stdout()
        .execute(LeaveAlternateScreen)
        .map(|_| ())
        .into_diagnostic();
    raw.and(screen)
}

/// Turns the draw loop's outcome into the worker's result, waiting for the
/// worker when the view was left early or failed.
fn settle<R>(
    outcome: miette::Result<Option<Result<R, ShelfError>>>,
    rx: &Receiver<Result<R, ShelfError>>,
) -> miette::Result<R> {
    let result = match outcome {
        Ok(Some(result)) => result,
        Ok(None) => {
            eprintln!("waiting for the running operation to finish...");
            wait_for_worker(rx)?
        }
        Err(report) => {
            tracing::warn!(error = %report, "progress view failed, waiting for the operation");
            wait_for_worker(rx)?
        }
    };
    result.map_err(miette::Report::new)
}

fn wait_for_worker<R>(
    rx: &Receiver<Result<R, ShelfError>>,
) -> miette::Result<Result<R, ShelfError>> {
    rx.recv()
        .map_err(|_| miette::Report::msg("worker exited without a result"))
}

fn draw_ui(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &ViewState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(6),
            Constraint::Min(4),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = op_label(kind);
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "SOFTSHELF",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]))
    .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let latency = state
        .last_latency
        .map(|latency| format!("{} ms", latency.as_millis()))
        .unwrap_or_else(|| "-".to_string());
    let status = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(state.phase.label(), Style::default().fg(phase_color)),
            Span::raw("  "),
            Span::raw(phase_track(state.phase)),
        ]),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{:.1}s", state.started.elapsed().as_secs_f64())),
            Span::styled("   Download: ", Style::default().fg(Color::Gray)),
            Span::raw(latency),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Progress"))
    .wrap(Wrap { trim: true });
    frame.render_widget(status, chunks[1]);

    let events: Vec<Line> = state
        .events
        .iter()
        .map(|event| Line::from(event.clone()))
        .collect();
    let events = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title("Events"))
        .wrap(Wrap { trim: true });
    frame.render_widget(events, chunks[2]);

    let footer = Paragraph::new("q/Esc: leave view (operation keeps running)")
        .alignment(Alignment::Left)
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[3]);
}

fn op_label(kind: ProgressSinkKind) -> &'static str {
    match kind {
        ProgressSinkKind::Install => "Install",
        ProgressSinkKind::Update => "Update",
        ProgressSinkKind::Remove => "Remove",
    }
}

fn phase_track(current: Phase) -> String {
    Phase::ALL
        .iter()
        .map(|phase| {
            if phase.index() <= current.index() {
                '#'
            } else {
                '.'
            }
        })
        .collect()
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    let phase = Phase::ALL
        .into_iter()
        .find(|phase| phase.label() == label)?;
    Some((phase, payload.trim()))
}

fn push_event(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > EVENTS_MAX {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_messages_are_parsed() {
        assert_eq!(
            parse_phase("phase=Fetch; downloading x"),
            Some((Phase::Fetch, "downloading x"))
        );
        assert_eq!(parse_phase("phase=Bogus; x"), None);
        assert_eq!(parse_phase("download.response bytes=3"), None);
        assert_eq!(phase_track(Phase::Fetch), "###..");
    }

    #[test]
    fn header_names_the_running_action() {
        assert_eq!(op_label(ProgressSinkKind::Install), "Install");
        assert_eq!(op_label(ProgressSinkKind::Update), "Update");
        assert_eq!(op_label(ProgressSinkKind::Remove), "Remove");
    }

    #[test]
    fn event_buffer_is_bounded() {
        let mut buffer = VecDeque::new();
        for i in 0..20 {
            push_event(&mut buffer, i.to_string());
        }
        assert_eq!(buffer.len(), EVENTS_MAX);
        assert_eq!(buffer.front().map(String::as_str), Some("12"));
    }

    #[test]
    fn failed_view_still_returns_worker_result() {
        let (tx, rx) = mpsc::channel();
        tx.send(Ok::<_, ShelfError>(42)).unwrap();
        let outcome = Err(miette::Report::msg("terminal went away"));
        assert_eq!(settle(outcome, &rx).unwrap(), 42);
    }

    #[test]
    fn worker_error_is_propagated() {
        let (tx, rx) = mpsc::channel::<Result<u8, ShelfError>>();
        tx.send(Err(ShelfError::NotFound("x".to_string()))).unwrap();
        let err = settle(Ok(None), &rx).unwrap_err();
        assert!(err.downcast_ref::<ShelfError>().is_some());
    }

    #[test]
    fn vanished_worker_is_an_error() {
        let (tx, rx) = mpsc::channel::<Result<u8, ShelfError>>();
        drop(tx);
        assert!(settle(Ok(None), &rx).is_err());
    }
}
