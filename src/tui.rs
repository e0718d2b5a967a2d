use anyhow::Result;
use chrono::Utc;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap},
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::comfy_table::{ScreenMetric, format_timestamp, get_visibility_ratio};
use crate::engine::Engine;
use crate::errors::{ScreenerError, ToolError};
use crate::models::PatternType;
use crate::tools::{ToolRequest, ToolResponse, dispatch};

type Outcome = (usize, Result<ToolResponse, ScreenerError>);

// --- App State ---

struct App {
    screens: Vec<ToolRequest>,
    selected: usize,
    shown: Option<Outcome>,
    last_updated_timestamp: i64,
    is_refreshing: bool,
}

impl App {
    fn new() -> Self {
        Self {
            screens: ToolRequest::demo_suite(),
            selected: 0,
            shown: None,
            last_updated_timestamp: 0,
            is_refreshing: false,
        }
    }

    fn set_outcome(&mut self, outcome: Outcome) {
        self.shown = Some(outcome);
        self.last_updated_timestamp = Utc::now().timestamp_millis();
        self.is_refreshing = false;
    }

    fn select_previous(&mut self) {
        self.selected = self.selected.checked_sub(1).unwrap_or(self.screens.len() - 1);
    }

    fn select_next(&mut self) {
        self.selected = (self.selected + 1) % self.screens.len();
    }
}

// --- TUI ---

pub async fn run_tui(engine: Arc<Engine>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, engine).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, engine: Arc<Engine>) -> Result<()> {
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(1);
    let mut app = App::new();

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if let Ok(outcome) = outcome_rx.try_recv() {
            app.set_outcome(outcome);
        }

        // Resize events need no handling: the next draw picks up the new size.
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if !handle_key_event(key, &mut app, &engine, &outcome_tx) {
                    return Ok(());
                }
            }
        }
    }
}

fn handle_key_event(
    key: KeyEvent,
    app: &mut App,
    engine: &Arc<Engine>,
    tx: &mpsc::Sender<Outcome>,
) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::F(5) | KeyCode::Enter if !app.is_refreshing => {
            app.is_refreshing = true;
            let index = app.selected;
            let request = app.screens[index].clone();
            let engine = Arc::clone(engine);
            let tx_clone = tx.clone();
            tokio::spawn(async move {
                let result = dispatch(&engine, request).await;
                let _ = tx_clone.send((index, result)).await;
            });
        }
        KeyCode::Up => app.select_previous(),
        KeyCode::Down => app.select_next(),
        KeyCode::Char(c) => {
            if let Some(digit) = c.to_digit(10) {
                if digit > 0 && digit as usize <= app.screens.len() {
                    app.selected = digit as usize - 1;
                }
            }
        }
        _ => {}
    }
    true
}

fn ui(f: &mut Frame, app: &App) {
    let main_layout = Layout::horizontal([Constraint::Percentage(22), Constraint::Percentage(78)])
        .split(f.size());
    let right_chunks =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).split(main_layout[1]);

    // Sidebar
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("Screens")
        .title_alignment(Alignment::Center);
    let inner_sidebar_area = sidebar_block.inner(main_layout[0]);
    f.render_widget(sidebar_block, main_layout[0]);

    let sidebar_chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(1)])
        .split(inner_sidebar_area);

    let screen_lines: Vec<Line> = app
        .screens
        .iter()
        .enumerate()
        .map(|(i, screen)| {
            let line = Line::from(format!("{} {}", i + 1, screen.name()));
            if i == app.selected {
                line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray))
            } else {
                line
            }
        })
        .collect();
    f.render_widget(Paragraph::new(screen_lines), sidebar_chunks[0]);
    f.render_widget(
        Paragraph::new("F5 runs screen").alignment(Alignment::Center),
        sidebar_chunks[1],
    );

    let time_str = if app.last_updated_timestamp == 0 {
        "Never".to_string()
    } else {
        format_timestamp(app.last_updated_timestamp)
    };
    f.render_widget(
        Block::default()
            .borders(Borders::ALL)
            .title_alignment(Alignment::Center)
            .title(format!("Last Updated: {time_str}")),
        right_chunks[0],
    );

    let body = right_chunks[1];
    match &app.shown {
        None => f.render_widget(
            Paragraph::new("Select a screen and press F5.")
                .block(Block::default().borders(Borders::ALL)),
            body,
        ),
        Some((index, Err(err))) => {
            let doc = ToolError::from(err);
            let kind = serde_json::to_string(&doc.error).unwrap_or_default();
            f.render_widget(
                Paragraph::new(format!("{kind}\n\n{}", doc.message))
                    .wrap(Wrap { trim: true })
                    .style(Style::default().fg(Color::Red))
                    .block(Block::default().borders(Borders::ALL).title(app.screens[*index].name())),
                body,
            );
        }
        Some((index, Ok(response))) => {
            let title = app.screens[*index].name();
            f.render_widget(response_table(title, response), body);
        }
    }

    if app.is_refreshing {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Running screen...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn shaded(ratio: f64) -> Color {
    let v = (255.0 * ratio) as u8;
    Color::Rgb(0, v, v)
}

fn response_table<'a>(title: &'a str, response: &'a ToolResponse) -> Table<'a> {
    let (header, widths, rows): (Vec<&str>, Vec<Constraint>, Vec<Row>) = match response {
        ToolResponse::Screen(scan) => {
            let ratios = ScreenMetric::for_tool(title).ratios(&scan.results);
            let rows = scan
                .results
                .iter()
                .zip(ratios)
                .map(|(r, ratio)| {
                    Row::new([
                        Cell::from(r.rank.to_string()).style(Style::default().fg(Color::DarkGray)),
                        Cell::from(r.symbol.clone()).style(Style::default().fg(shaded(ratio))),
                        Cell::from(r.timeframe.to_string()),
                        Cell::from(format!("{:.4}", r.metric_value)),
                    ])
                })
                .collect();
            (
                vec!["Rank", "Asset", "Timeframe", "Value"],
                vec![
                    Constraint::Length(6),
                    Constraint::Percentage(35),
                    Constraint::Percentage(25),
                    Constraint::Percentage(35),
                ],
                rows,
            )
        }
        ToolResponse::Patterns(scan) => {
            let top = scan.results.first().map_or(1.0, |p| p.growth_percent);
            let rows = scan
                .results
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let ratio = get_visibility_ratio(p.growth_percent, top);
                    let direction = match p.pattern_type {
                        PatternType::Bullish => Color::Green,
                        PatternType::Bearish => Color::Red,
                    };
                    let timeframes: Vec<&str> = p.matched_timeframes.iter().map(|tf| tf.as_str()).collect();
                    Row::new([
                        Cell::from((i + 1).to_string()).style(Style::default().fg(Color::DarkGray)),
                        Cell::from(p.symbol.clone()).style(Style::default().fg(shaded(ratio))),
                        Cell::from(p.pattern_type.to_string()).style(Style::default().fg(direction)),
                        Cell::from(format!("{:.2}%", p.growth_percent)),
                        Cell::from(timeframes.join(", ")),
                    ])
                })
                .collect();
            (
                vec!["Rank", "Asset", "Pattern", "Growth", "Timeframes"],
                vec![
                    Constraint::Length(6),
                    Constraint::Percentage(25),
                    Constraint::Percentage(15),
                    Constraint::Percentage(20),
                    Constraint::Percentage(35),
                ],
                rows,
            )
        }
        ToolResponse::Analysis(report) => {
            let b = &report.bollinger;
            let fields = [
                ("Asset", format!("{}:{}", report.exchange, report.symbol)),
                ("Close", report.close.to_string()),
                ("Change (%)", format!("{:.2}", report.percent_change)),
                ("Bollinger", format!("{:.4} / {:.4} / {:.4}", b.lower, b.middle, b.upper)),
                ("Bandwidth", format!("{:.4}", b.bandwidth)),
                ("RSI", format!("{:.2}", report.rsi)),
                ("Rating", report.rating.to_string()),
                ("Patterns", report.patterns.len().to_string()),
            ];
            let rows = fields
                .into_iter()
                .map(|(k, v)| Row::new([Cell::from(k), Cell::from(v)]))
                .collect();
            (
                vec!["Field", "Value"],
                vec![Constraint::Percentage(30), Constraint::Percentage(70)],
                rows,
            )
        }
        ToolResponse::Exchanges(exchanges) => {
            let rows = exchanges
                .iter()
                .map(|e| {
                    let timeframes: Vec<&str> = e.supported_timeframes.iter().map(|tf| tf.as_str()).collect();
                    Row::new([
                        Cell::from(e.name.clone()).style(Style::default().fg(Color::Cyan)),
                        Cell::from(e.market_count.to_string()),
                        Cell::from(timeframes.join(" ")),
                    ])
                })
                .collect();
            (
                vec!["Exchange", "Markets", "Timeframes"],
                vec![
                    Constraint::Percentage(30),
                    Constraint::Percentage(20),
                    Constraint::Percentage(50),
                ],
                rows,
            )
        }
    };

    let header = Row::new(header).style(Style::default().bg(Color::DarkGray));
    Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
