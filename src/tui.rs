use std::io::stdout;
use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Axis, Bar, BarChart, BarGroup, Block, Chart, Clear, Dataset, GraphType, Paragraph, Tabs, Wrap,
};
use tokio::sync::mpsc;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::api::EndpointKey;
use crate::command::{Command, QueryOutcome};
use crate::error::FetchError;
use crate::error_log::ErrorLogStore;
use crate::nav::Page;
use crate::query::QueryCache;
use crate::transform::{
    ChartSpec, CorrelationChart, CostBreakdown, CostComparison, MetricRow, MetricValue,
    PredictionPanel, SeriesKind, TradeFrequency,
};
use crate::view::{LiquidityPanel, PageView, SymbolSelection, ViewStatus};

const LOADING_SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const BAR_RESOLUTION: u64 = 10_000;
const MIN_INVESTMENT: u64 = 100;
const MAX_AMOUNT_DIGITS: usize = 12;
const PERIOD_YEARS: (u32, u32) = (1, 10);

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Spinner {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn tick(&mut self) -> bool {
        let interval = Duration::from_millis(120);
        if self.last_tick.elapsed() < interval {
            return false;
        }
        self.index = (self.index + 1) % LOADING_SPINNER_FRAMES.len();
        self.last_tick = Instant::now();
        true
    }

    fn frame(&self) -> char {
        LOADING_SPINNER_FRAMES[self.index % LOADING_SPINNER_FRAMES.len()]
    }
}

pub struct TuiApp {
    cache: QueryCache,
    view: PageView,
    error_log: ErrorLogStore,
    api_base: String,
    last_draw: Instant,
    min_redraw_gap: Duration,
    status_message: Option<String>,
    status_visible_until: Option<Instant>,
    status_is_error: bool,
    exit_confirmation: bool,
    amount_input: Option<String>,
    spinner: Spinner,
    dirty: bool,
}

impl TuiApp {
    pub fn new(
        mut cache: QueryCache,
        error_log: ErrorLogStore,
        api_base: &str,
        min_redraw_gap: Duration,
    ) -> TuiApp {
        let view = PageView::bind(Page::default(), &mut cache);
        TuiApp {
            cache,
            view,
            error_log,
            api_base: api_base.to_string(),
            last_draw: Instant::now() - min_redraw_gap,
            min_redraw_gap,
            status_message: None,
            status_visible_until: None,
            status_is_error: false,
            exit_confirmation: false,
            amount_input: None,
            spinner: Spinner::new(),
            dirty: true,
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(3));
        self.status_is_error = false;
    }

    fn set_error_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(5));
        self.status_is_error = true;
    }

    /// Returns true when a visible message was cleared.
    fn clear_status_if_allowed(&mut self) -> bool {
        if let Some(visible_until) = self.status_visible_until {
            if Instant::now() < visible_until {
                return false;
            }
        }
        let had_message = self.status_message.is_some();
        self.status_message = None;
        self.status_visible_until = None;
        self.status_is_error = false;
        had_message
    }

    pub fn dispose(&self) {
        let _ = execute!(stdout(), DisableFocusChange);
        ratatui::restore();
    }

    pub async fn run(&mut self, rx: &mut mpsc::UnboundedReceiver<Command>) -> Result<()> {
        color_eyre::install()?;
        let mut terminal = ratatui::init();
        execute!(stdout(), EnableFocusChange)?;
        let mut input_tick = tokio::time::interval(self.min_redraw_gap);
        terminal.draw(|frame| self.render(frame))?;
        self.last_draw = Instant::now();
        self.dirty = false;
        loop {
            tokio::select! {
                biased;
                _ = input_tick.tick() => {
                    if self.poll_input()? {
                        return Ok(());
                    }
                    if self.spinner.tick() && self.view.is_refreshing() {
                        self.dirty = true;
                    }
                    if self.cache.tick(tokio::time::Instant::now()) > 0 {
                        self.dirty = true;
                    }
                    if self.clear_status_if_allowed() {
                        self.dirty = true;
                    }
                    if self.dirty && self.last_draw.elapsed() >= self.min_redraw_gap {
                        terminal.draw(|frame| self.render(frame))?;
                        self.last_draw = Instant::now();
                        self.dirty = false;
                    }
                }
                command = rx.recv() => match command {
                    Some(Command::QueryResolved(outcome)) => {
                        if self.settle(outcome) {
                            self.dirty = true;
                        }
                    }
                    Some(Command::Status(message)) => {
                        self.set_status_message(message);
                        self.dirty = true;
                    }
                    Some(Command::Error(message)) => {
                        self.record_error(message);
                        self.dirty = true;
                    }
                    None => return Ok(()),
                }
            }
        }
    }

    fn settle(&mut self, outcome: QueryOutcome) -> bool {
        let key = outcome.key.clone();
        let failure = outcome.result.as_ref().err().cloned();
        if !self.cache.apply(outcome) {
            return false;
        }
        if let Some(err) = failure {
            match self.error_log.append_failure(&key, &err) {
                Ok(()) => self.set_error_status_message(format!("{key}: {err}")),
                Err(log_err) => self.set_error_status_message(format!(
                    "{key}: {err} (cannot append to {}: {log_err})",
                    self.error_log.path().display()
                )),
            }
        }
        true
    }

    fn record_error(&mut self, message: String) {
        if let Err(err) = self.error_log.append_message(message.clone()) {
            self.set_error_status_message(format!(
                "{message} (cannot append to {}: {err})",
                self.error_log.path().display()
            ));
        } else {
            self.set_error_status_message(message);
        }
    }

    fn poll_input(&mut self) -> Result<bool> {
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    self.dirty = true;
                    if self.handle_key_event(key)? {
                        return Ok(true);
                    }
                }
                Event::FocusGained => {
                    let refetched = self.cache.on_focus();
                    if refetched > 0 {
                        self.set_status_message(format!("Refreshing {refetched} queries"));
                        self.dirty = true;
                    }
                }
                Event::Resize(_, _) => self.dirty = true,
                _ => {}
            }
        }
        Ok(false)
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> Result<bool> {
        if self.exit_confirmation {
            return self.handle_exit_confirmation_key(key);
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char('c') = key.code {
                self.prompt_exit_confirmation();
                return Ok(false);
            }
        }
        if self.amount_input.is_some() {
            self.handle_amount_input_key(key);
            return Ok(false);
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.prompt_exit_confirmation();
            }
            KeyCode::Tab => self.switch_page(self.view.page().next()),
            KeyCode::BackTab => self.switch_page(self.view.page().prev()),
            KeyCode::Char('r') => self.refresh_page(),
            KeyCode::Char('R') => {
                self.cache.invalidate_all();
                self.set_status_message("Refreshing all cached queries");
            }
            KeyCode::Char(ch) if ch.is_ascii_digit() => {
                if let Some(page) = Page::from_digit(ch) {
                    self.switch_page(page);
                }
            }
            _ => self.handle_page_key(key),
        }
        Ok(false)
    }

    fn prompt_exit_confirmation(&mut self) {
        if self.exit_confirmation {
            return;
        }
        self.exit_confirmation = true;
        self.set_status_message("Quit? Y/Enter to confirm · N/Esc to cancel");
    }

    fn handle_exit_confirmation_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char('c') = key.code {
                self.exit_confirmation = false;
                return Ok(true);
            }
        }
        match key.code {
            KeyCode::Char('y')
            | KeyCode::Char('Y')
            | KeyCode::Char('q')
            | KeyCode::Char('Q')
            | KeyCode::Enter => {
                self.exit_confirmation = false;
                Ok(true)
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.exit_confirmation = false;
                self.set_status_message("Quit cancelled");
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn switch_page(&mut self, page: Page) {
        if page == self.view.page() {
            return;
        }
        self.amount_input = None;
        self.view = PageView::bind(page, &mut self.cache);
        self.cache.release_unsubscribed();
    }

    fn refresh_page(&mut self) {
        let keys = self.view.keys();
        if keys.is_empty() {
            self.set_status_message("This page is computed locally; nothing to refresh");
            return;
        }
        let listed = keys
            .iter()
            .map(|key| key.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.view.refresh(&mut self.cache);
        self.set_status_message(format!("Refreshing {listed}"));
    }

    fn handle_page_key(&mut self, key: KeyEvent) {
        match &mut self.view {
            PageView::Liquidity(view) => {
                let forward = match key.code {
                    KeyCode::Right | KeyCode::Char('l') | KeyCode::Down | KeyCode::Char('j') => true,
                    KeyCode::Left | KeyCode::Char('h') | KeyCode::Up | KeyCode::Char('k') => false,
                    _ => return,
                };
                let count = match view.status() {
                    ViewStatus::Ready(panel) => panel.charts.len(),
                    _ => 0,
                };
                if count == 0 {
                    return;
                }
                let current = view.params().0.min(count - 1);
                let next = if forward {
                    (current + 1) % count
                } else {
                    (current + count - 1) % count
                };
                view.set_params(SymbolSelection(next), &mut self.cache);
            }
            PageView::Costs(view) => match key.code {
                KeyCode::Up | KeyCode::Char('+') | KeyCode::Char('=') => {
                    view.update_params(&mut self.cache, |params| {
                        params.years = (params.years + 1).min(PERIOD_YEARS.1);
                    });
                }
                KeyCode::Down | KeyCode::Char('-') => {
                    view.update_params(&mut self.cache, |params| {
                        params.years = params.years.saturating_sub(1).max(PERIOD_YEARS.0);
                    });
                }
                KeyCode::Right | KeyCode::Char('f') => {
                    view.update_params(&mut self.cache, |params| {
                        params.frequency = params.frequency.cycle(true);
                    });
                }
                KeyCode::Left | KeyCode::Char('F') => {
                    view.update_params(&mut self.cache, |params| {
                        params.frequency = params.frequency.cycle(false);
                    });
                }
                KeyCode::Char('a') | KeyCode::Enter => {
                    let current = view.params().amount.round().max(0.0) as u64;
                    self.amount_input = Some(current.to_string());
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn handle_amount_input_key(&mut self, key: KeyEvent) {
        let Some(input) = self.amount_input.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Char(ch) if ch.is_ascii_digit() => {
                if input.len() < MAX_AMOUNT_DIGITS {
                    input.push(ch);
                }
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Esc => {
                self.amount_input = None;
                self.set_status_message("Amount unchanged");
            }
            KeyCode::Enter => self.finalize_amount_input(),
            _ => {}
        }
    }

    fn finalize_amount_input(&mut self) {
        let Some(input) = self.amount_input.as_deref() else {
            return;
        };
        let amount = match input.parse::<u64>() {
            Ok(amount) if amount >= MIN_INVESTMENT => amount,
            _ => {
                self.set_error_status_message(format!(
                    "Investment amount must be at least ${MIN_INVESTMENT}"
                ));
                return;
            }
        };
        self.amount_input = None;
        if let PageView::Costs(view) = &mut self.view {
            view.update_params(&mut self.cache, |params| params.amount = amount as f64);
        }
        self.set_status_message(format!("Investment amount set to {}", format_money(amount as f64)));
    }

    fn render(&self, frame: &mut Frame) {
        let area = frame.area();
        let show_status = self.status_message.is_some() && area.height >= 12;
        let mut constraints = vec![Constraint::Length(3), Constraint::Min(5)];
        if show_status {
            constraints.push(Constraint::Length(3));
        }
        constraints.push(Constraint::Length(1));
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);
        self.render_tabs(frame, chunks[0]);
        self.render_page(frame, chunks[1]);
        if show_status {
            self.render_status(frame, chunks[2]);
        }
        self.render_help(frame, chunks[chunks.len() - 1]);
        if self.exit_confirmation {
            self.render_exit_confirmation(frame);
        }
    }

    fn render_tabs(&self, frame: &mut Frame, area: Rect) {
        let titles: Vec<Line> = Page::ALL
            .iter()
            .map(|page| Line::from(format!("{} {}", page.index() + 1, page.label())))
            .collect();
        let title = Line::from(vec![
            Span::styled(
                " BTC / ETF Analytics ",
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("{} ", self.api_base),
                Style::default().fg(Color::DarkGray),
            ),
        ]);
        let title = if self.view.is_refreshing() && !self.view.is_loading() {
            let mut spans = title.spans;
            spans.push(Span::styled(
                format!("{} refreshing ", self.spinner.frame()),
                Style::default().fg(Color::Yellow),
            ));
            Line::from(spans)
        } else {
            title
        };
        let tabs = Tabs::new(titles)
            .block(Block::bordered().title(title))
            .select(self.view.page().index())
            .highlight_style(
                Style::default()
                    .bg(Color::LightCyan)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .divider("|");
        frame.render_widget(tabs, area);
    }

    fn render_page(&self, frame: &mut Frame, area: Rect) {
        let title = self.view.page().label();
        match &self.view {
            PageView::Correlation(view) => {
                self.render_view(frame, area, title, view.status(), view.keys(), |frame, area, chart| {
                    self.render_correlation(frame, area, &chart)
                })
            }
            PageView::Liquidity(view) => {
                self.render_view(frame, area, title, view.status(), view.keys(), |frame, area, panel| {
                    self.render_liquidity(frame, area, &panel)
                })
            }
            PageView::Predictions(view) => {
                self.render_view(frame, area, title, view.status(), view.keys(), |frame, area, panel| {
                    self.render_predictions(frame, area, &panel)
                })
            }
            PageView::Costs(view) => {
                self.render_view(frame, area, title, view.status(), view.keys(), |frame, area, result| {
                    self.render_costs(frame, area, &result)
                })
            }
            PageView::Risk(view) => {
                self.render_view(frame, area, title, view.status(), view.keys(), |frame, area, rows| {
                    self.render_risk(frame, area, &rows)
                })
            }
        }
    }

    fn render_view<T>(
        &self,
        frame: &mut Frame,
        area: Rect,
        title: &str,
        status: ViewStatus<T>,
        keys: &[EndpointKey],
        ready: impl FnOnce(&mut Frame, Rect, T),
    ) {
        match status {
            ViewStatus::Ready(output) => ready(frame, area, output),
            ViewStatus::Loading => self.render_loading(frame, area, title, keys),
            ViewStatus::Failed(err) => render_failure(frame, area, title, &err),
        }
    }

    fn render_loading(&self, frame: &mut Frame, area: Rect, title: &str, keys: &[EndpointKey]) {
        let mut lines = vec![Line::from(Span::styled(
            format!("{} Loading...", self.spinner.frame()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ))];
        for key in keys {
            lines.push(Line::from(Span::styled(
                format!("GET {key}"),
                Style::default().fg(Color::DarkGray),
            )));
        }
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(title.to_string()));
        frame.render_widget(paragraph, area);
    }

    fn render_correlation(&self, frame: &mut Frame, area: Rect, result: &CorrelationChart) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(5), Constraint::Length(1)])
            .split(area);
        let points = result.points();
        let Some(series) = result.chart.series.first() else {
            return;
        };
        let color = series
            .style
            .color_at(0)
            .map(hex_color)
            .unwrap_or(Color::White);
        let x_bounds = padded_bounds(points.iter().map(|(x, _)| *x));
        let y_bounds = padded_bounds(points.iter().map(|(_, y)| *y));
        let marker = match series.style.marker_size {
            Some(size) if size >= 6 => symbols::Marker::Dot,
            _ => symbols::Marker::Braille,
        };
        let mut style = Style::default().fg(color);
        if series.style.opacity.is_some_and(|opacity| opacity < 1.0) {
            style = style.add_modifier(Modifier::DIM);
        }
        let dataset = Dataset::default()
            .name(series.label.clone())
            .marker(marker)
            .graph_type(GraphType::Scatter)
            .style(style)
            .data(&points);
        let layout = &result.chart.layout;
        let chart = Chart::new(vec![dataset])
            .block(Block::bordered().title(Line::from(Span::styled(
                layout.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ))))
            .x_axis(
                Axis::default()
                    .title(layout.x_title.clone())
                    .style(Style::default().fg(Color::Gray))
                    .labels(axis_labels(x_bounds))
                    .labels_alignment(Alignment::Left)
                    .bounds(x_bounds),
            )
            .y_axis(
                Axis::default()
                    .title(layout.y_title.clone())
                    .style(Style::default().fg(Color::Gray))
                    .labels(axis_labels(y_bounds))
                    .bounds(y_bounds),
            );
        frame.render_widget(chart, chunks[0]);

        let note = if result.truncated() {
            Span::styled(
                format!(
                    " Paired {} points by position (BTC closes: {}, ETFs: {}); pairs are not time-aligned",
                    result.paired, result.btc_points, result.etf_points
                ),
                Style::default().fg(Color::Yellow),
            )
        } else {
            Span::styled(
                format!(" {} points, paired by position", result.paired),
                Style::default().fg(Color::DarkGray),
            )
        };
        frame.render_widget(Paragraph::new(Line::from(note)), chunks[1]);
    }

    fn render_liquidity(&self, frame: &mut Frame, area: Rect, panel: &LiquidityPanel) {
        let Some(current) = panel.current() else {
            let paragraph = Paragraph::new("The ETF payload lists no symbols")
                .block(Block::bordered().title(Page::Liquidity.label()));
            frame.render_widget(paragraph, area);
            return;
        };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(5)])
            .split(area);
        let mut symbols = vec![Span::raw(" ")];
        for (idx, chart) in panel.charts.iter().enumerate() {
            let style = if idx == panel.selected {
                Style::default()
                    .bg(Color::LightCyan)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            symbols.push(Span::styled(format!(" {} ", chart.symbol), style));
            symbols.push(Span::raw(" "));
        }
        let mut details = format!(" Latest {}", trim_formatted_number(format!("{:.4}", current.latest_price)));
        if let Some(volume) = current.volume {
            details.push_str(&format!(" · Volume {}", trim_formatted_number(format!("{volume:.2}"))));
        }
        let header = Paragraph::new(vec![Line::from(symbols), Line::from(details)])
            .block(Block::bordered().title("Symbol (←/→)"));
        frame.render_widget(header, chunks[0]);
        render_bar_chart(frame, chunks[1], &current.chart);
    }

    fn render_predictions(&self, frame: &mut Frame, area: Rect, panel: &PredictionPanel) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);
        render_bar_chart(frame, chunks[0], &panel.chart);

        let bold = Style::default().add_modifier(Modifier::BOLD);
        let sentiment_color = match panel.sentiment.to_lowercase().as_str() {
            "bullish" => Color::Green,
            "bearish" => Color::Red,
            _ => Color::Yellow,
        };
        let mut lines = vec![
            Line::from(vec![
                Span::styled("Sentiment  ", bold),
                Span::styled(panel.sentiment.clone(), Style::default().fg(sentiment_color)),
            ]),
            Line::from(vec![
                Span::styled("Confidence ", bold),
                Span::raw(format!("{:.0}%", panel.confidence * 100.0)),
            ]),
        ];
        if let Some(direction) = &panel.price_direction {
            lines.push(Line::from(vec![
                Span::styled("Direction  ", bold),
                Span::raw(direction.clone()),
            ]));
        }
        for (label, outlook) in [
            ("Short term ", &panel.short_term_outlook),
            ("Medium term", &panel.medium_term_outlook),
        ] {
            if let Some(outlook) = outlook {
                lines.push(Line::from(vec![
                    Span::styled(format!("{label} "), bold),
                    Span::raw(outlook.clone()),
                ]));
            }
        }
        for (heading, items) in [
            ("Key factors", &panel.key_factors),
            ("Risk factors", &panel.risk_factors),
        ] {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(heading, bold)));
            if items.is_empty() {
                lines.push(Line::from(Span::styled(
                    "  none reported",
                    Style::default().fg(Color::DarkGray),
                )));
            }
            for item in items.iter() {
                lines.push(Line::from(format!("  • {item}")));
            }
        }
        if (panel.probability_total - 1.0).abs() > 0.01 {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                format!(
                    "Scenario probabilities add up to {:.1}%",
                    panel.probability_total * 100.0
                ),
                Style::default().fg(Color::Yellow),
            )));
        }
        let paragraph = Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title("Market Analysis"));
        frame.render_widget(paragraph, chunks[1]);
    }

    fn render_costs(&self, frame: &mut Frame, area: Rect, result: &CostComparison) {
        let PageView::Costs(view) = &self.view else {
            return;
        };
        let params = view.params();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(5),
                Constraint::Min(6),
                Constraint::Length(7),
            ])
            .split(area);

        let bold = Style::default().add_modifier(Modifier::BOLD);
        let amount_line = match &self.amount_input {
            Some(input) => Line::from(vec![
                Span::styled(" Amount    ", bold),
                Span::styled(
                    format!("${input}▏"),
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::LightCyan),
                ),
                Span::styled(
                    format!("  Enter to confirm (min ${MIN_INVESTMENT}) · Esc to cancel"),
                    Style::default().fg(Color::DarkGray),
                ),
            ]),
            None => Line::from(vec![
                Span::styled(" Amount    ", bold),
                Span::raw(format_money(params.amount)),
            ]),
        };
        let controls = Paragraph::new(vec![
            amount_line,
            Line::from(vec![
                Span::styled(" Period    ", bold),
                Span::raw(format!("{} years", params.years)),
            ]),
            frequency_selector(params.frequency),
        ])
        .block(Block::bordered().title("Investment Parameters"));
        frame.render_widget(controls, chunks[0]);

        render_bar_chart(frame, chunks[1], &result.chart);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[2]);
        for (breakdown, column) in [(&result.direct, columns[0]), (&result.wrapper, columns[1])] {
            let width = column.width.saturating_sub(2) as usize;
            frame.render_widget(breakdown_table(breakdown, width), column);
        }
    }

    fn render_risk(&self, frame: &mut Frame, area: Rect, rows: &[MetricRow]) {
        let block = Block::bordered().title("Risk Metrics");
        if rows.is_empty() {
            frame.render_widget(Paragraph::new("No metrics reported").block(block), area);
            return;
        }
        let inner_width = area.width.saturating_sub(2) as usize;
        let name_width = rows
            .iter()
            .map(|row| UnicodeWidthStr::width(row.name.as_str()))
            .max()
            .unwrap_or(0)
            .clamp(12, 40)
            .min(inner_width.saturating_sub(12));
        let value_width = inner_width.saturating_sub(name_width + 1);
        let mut lines = vec![Line::from(Span::styled(
            format_columns(&[
                ("Metric", ColumnAlign::Left, name_width),
                ("Value", ColumnAlign::Right, value_width),
            ]),
            Style::default().add_modifier(Modifier::BOLD),
        ))];
        for row in rows {
            let value = row.value.to_string();
            lines.push(Line::from(vec![
                Span::raw(format_columns(&[(row.name.as_str(), ColumnAlign::Left, name_width)])),
                Span::raw(" "),
                Span::styled(
                    format_columns(&[(value.as_str(), ColumnAlign::Right, value_width)]),
                    metric_style(&row.value),
                ),
            ]));
        }
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        if let Some(message) = &self.status_message {
            let color = if self.status_is_error {
                Color::Red
            } else {
                Color::Yellow
            };
            let block = Block::bordered().title("Status");
            let status = Paragraph::new(message.as_str())
                .style(Style::default().fg(color))
                .alignment(Alignment::Left)
                .block(block);
            frame.render_widget(status, area);
        }
    }

    fn render_help(&self, frame: &mut Frame, area: Rect) {
        let mut hints = String::from(" 1-5/Tab pages · r refresh · R refresh all · q quit");
        match self.view.page() {
            Page::Liquidity => hints.push_str(" · ←/→ symbol"),
            Page::Costs => hints.push_str(" · a amount · ↑/↓ period · ←/→ frequency"),
            _ => {}
        }
        if let Some(interval) = self.cache.policy().refetch_interval {
            hints.push_str(&format!(" · polling every {}s", interval.as_secs().max(1)));
        }
        let width = area.width as usize;
        let line = Paragraph::new(clip_to_width(&hints, width))
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(line, area);
    }

    fn render_exit_confirmation(&self, frame: &mut Frame) {
        let area = frame.area();
        if area.width < 24 || area.height < 5 {
            return;
        }
        let popup_width = area.width.saturating_sub(20).min(50).max(28);
        let popup_height = 5;
        let left = area.x + (area.width.saturating_sub(popup_width)) / 2;
        let top = area.y + (area.height.saturating_sub(popup_height)) / 2;
        let popup = Rect::new(left, top, popup_width, popup_height);
        let lines = vec![
            Line::from(Span::styled(
                "Quit the dashboard?",
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from("Y/Enter quit · N/Esc stay"),
            Line::from("q again also quits · Ctrl+C quits at once"),
        ];
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .block(Block::bordered().title("Confirm"));
        frame.render_widget(Clear, popup);
        frame.render_widget(paragraph, popup);
    }
}

fn failure_headline(err: &FetchError) -> &'static str {
    match err {
        FetchError::NetworkUnavailable(_) => "Backend unreachable",
        FetchError::HttpStatus { .. } => "Backend returned an error",
        FetchError::MalformedResponse { .. } => "Backend sent an unreadable response",
        FetchError::TransformPrecondition(_) => "Data is missing expected fields",
    }
}

fn render_failure(frame: &mut Frame, area: Rect, title: &str, err: &FetchError) {
    let lines = vec![
        Line::from(Span::styled(
            failure_headline(err),
            Style::default()
                .fg(Color::LightRed)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(err.to_string(), Style::default().fg(Color::Red))),
        Line::from(""),
        Line::from(Span::styled(
            "r retries this page · R refreshes everything",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(Block::bordered().title(title.to_string()));
    frame.render_widget(paragraph, area);
}

/// Draws bar and horizontal-bar descriptors. Each series becomes one bar group;
/// values are scaled onto a fixed integer range since the widget only takes `u64`.
fn render_bar_chart(frame: &mut Frame, area: Rect, spec: &ChartSpec) {
    let horizontal = spec
        .series
        .iter()
        .any(|series| series.kind == SeriesKind::HorizontalBar);
    let percent = spec.layout.y_range == Some((0.0, 100.0));
    let ceiling = spec
        .layout
        .y_range
        .map(|(_, high)| high)
        .unwrap_or_else(|| {
            spec.series
                .iter()
                .flat_map(|series| if horizontal { &series.x } else { &series.y })
                .filter_map(|value| value.as_number())
                .fold(0.0, f64::max)
        });

    let mut title = spec.layout.title.clone();
    let value_title = if horizontal {
        &spec.layout.x_title
    } else {
        &spec.layout.y_title
    };
    if !value_title.is_empty() {
        title.push_str(&format!(" · {value_title}"));
    }
    let mut chart = BarChart::default()
        .block(Block::bordered().title(Line::from(Span::styled(
            title,
            Style::default().add_modifier(Modifier::BOLD),
        ))))
        .max(BAR_RESOLUTION)
        .bar_gap(1)
        .group_gap(2);
    let bar_count: usize = spec.series.iter().map(|series| series.x.len()).sum();
    if horizontal {
        chart = chart.direction(Direction::Horizontal).bar_width(1);
    } else {
        let gaps = bar_count as u16 + 2 * spec.series.len() as u16;
        let usable = area.width.saturating_sub(2).saturating_sub(gaps);
        let width = (usable / bar_count.max(1) as u16).clamp(1, 14);
        chart = chart.bar_width(width);
    }

    for series in &spec.series {
        let bars: Vec<Bar> = series
            .x
            .iter()
            .zip(series.y.iter())
            .enumerate()
            .map(|(idx, (x, y))| {
                let (category, value) = if horizontal { (y, x) } else { (x, y) };
                let amount = value.as_number().unwrap_or(0.0);
                let color = series
                    .style
                    .color_at(idx)
                    .map(hex_color)
                    .unwrap_or(Color::White);
                Bar::default()
                    .value(scaled_bar_value(amount, ceiling))
                    .label(Line::from(category.label()))
                    .text_value(bar_text(amount, percent))
                    .style(Style::default().fg(color))
                    .value_style(Style::default().fg(Color::Black).bg(color))
            })
            .collect();
        let mut group = BarGroup::default().bars(&bars);
        if spec.series.len() > 1 {
            group = group.label(Line::from(series.label.clone()));
        }
        chart = chart.data(group);
    }
    frame.render_widget(chart, area);
}

fn frequency_selector(selected: TradeFrequency) -> Line<'static> {
    let mut spans = vec![Span::styled(
        " Frequency ",
        Style::default().add_modifier(Modifier::BOLD),
    )];
    for frequency in TradeFrequency::ALL {
        let style = if frequency == selected {
            Style::default()
                .bg(Color::LightCyan)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(format!(" {} ", frequency.label()), style));
    }
    Line::from(spans)
}

fn metric_style(value: &MetricValue) -> Style {
    match value {
        MetricValue::Number(number) if *number < 0.0 => Style::default().fg(Color::LightRed),
        MetricValue::Number(_) => Style::default().fg(Color::LightCyan),
        MetricValue::Text(_) => Style::default(),
    }
}

fn breakdown_table(breakdown: &CostBreakdown, width: usize) -> Paragraph<'static> {
    let amount_width = 14.min(width);
    let label_width = width.saturating_sub(amount_width + 1);
    let mut lines: Vec<Line> = breakdown
        .fees
        .iter()
        .map(|line| {
            let amount = format_money(line.amount);
            Line::from(format_columns(&[
                (line.label, ColumnAlign::Left, label_width),
                (amount.as_str(), ColumnAlign::Right, amount_width),
            ]))
        })
        .collect();
    let total = format_money(breakdown.total());
    lines.push(Line::from(Span::styled(
        format_columns(&[
            ("Total", ColumnAlign::Left, label_width),
            (total.as_str(), ColumnAlign::Right, amount_width),
        ]),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    Paragraph::new(lines).block(Block::bordered().title(breakdown.instrument))
}

fn scaled_bar_value(amount: f64, ceiling: f64) -> u64 {
    if !amount.is_finite() || amount <= 0.0 || !ceiling.is_finite() || ceiling <= 0.0 {
        return 0;
    }
    let ratio = (amount / ceiling).min(1.0);
    (ratio * BAR_RESOLUTION as f64).round() as u64
}

fn bar_text(amount: f64, percent: bool) -> String {
    if percent {
        format!("{amount:.0}%")
    } else {
        trim_formatted_number(format!("{amount:.2}"))
    }
}

/// `#RRGGBB` to a terminal color; anything else falls back to white.
fn hex_color(hex: &str) -> Color {
    let digits = hex.trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return Color::White;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Some(r), Some(g), Some(b)) => Color::Rgb(r, g, b),
        _ => Color::White,
    }
}

fn padded_bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (min, max) = values
        .filter(|value| value.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), value| {
            (low.min(value), high.max(value))
        });
    if !min.is_finite() || !max.is_finite() {
        return [0.0, 1.0];
    }
    if (max - min).abs() < f64::EPSILON {
        let padding = (max.abs() * 0.05).max(1.0);
        return [min - padding, max + padding];
    }
    let padding = (max - min) * 0.05;
    [min - padding, max + padding]
}

fn axis_labels(bounds: [f64; 2]) -> Vec<Span<'static>> {
    let mid = f64::midpoint(bounds[0], bounds[1]);
    vec![
        Span::styled(
            trim_formatted_number(format!("{:.2}", bounds[0])),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(trim_formatted_number(format!("{mid:.2}"))),
        Span::styled(
            trim_formatted_number(format!("{:.2}", bounds[1])),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ]
}

fn format_money(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, ch) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{cents}")
}

fn trim_formatted_number(mut formatted: String) -> String {
    if formatted.contains('.') {
        formatted = formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string();
    }
    if formatted == "-0" || formatted == "+0" {
        formatted = "0".to_string();
    }
    formatted
}

#[derive(Clone, Copy)]
enum ColumnAlign {
    Left,
    Right,
}

fn format_columns(columns: &[(&str, ColumnAlign, usize)]) -> String {
    let mut row = String::new();
    for (idx, (value, align, width)) in columns.iter().enumerate() {
        let clipped = clip_to_width(value, *width);
        let padded = pad_to_width(&clipped, *width, *align);
        row.push_str(&padded);
        if idx + 1 != columns.len() {
            row.push(' ');
        }
    }
    row
}

fn clip_to_width(value: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(value) <= width {
        return value.to_string();
    }
    let mut result = String::new();
    let mut remaining = width.saturating_sub(1);
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if ch_width > remaining {
            break;
        }
        result.push(ch);
        remaining = remaining.saturating_sub(ch_width);
    }
    result.push('…');
    result
}

fn pad_to_width(value: &str, width: usize, align: ColumnAlign) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    let padding = " ".repeat(width - current);
    match align {
        ColumnAlign::Left => format!("{value}{padding}"),
        ColumnAlign::Right => format!("{padding}{value}"),
    }
}
