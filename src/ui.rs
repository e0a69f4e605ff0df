use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use quartile_flow::{Category, FlowGraph, FlowRun, Palette};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Matrix,
    Flows,
    Nodes,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Matrix => Page::Flows,
            Page::Flows => Page::Nodes,
            Page::Nodes => Page::Matrix,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Matrix => Page::Nodes,
            Page::Flows => Page::Matrix,
            Page::Nodes => Page::Flows,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Matrix => "Transition Matrix",
            Page::Flows => "Flows",
            Page::Nodes => "Nodes",
        }
    }
}

pub struct App {
    pub run: FlowRun,
    pub palette: Palette,
    pub current_page: Page,

    /// Adjacent period pair shown on the matrix page
    pub pair: usize,

    pub flows_state: TableState,
    pub nodes_state: TableState,
}

impl App {
    pub fn new(run: FlowRun, palette: Palette) -> Self {
        let mut flows_state = TableState::default();
        if !run.graph.edges().is_empty() {
            flows_state.select(Some(0));
        }

        let mut nodes_state = TableState::default();
        if !run.graph.nodes().is_empty() {
            nodes_state.select(Some(0));
        }

        Self {
            run,
            palette,
            current_page: Page::Matrix,
            pair: 0,
            flows_state,
            nodes_state,
        }
    }

    fn graph(&self) -> &FlowGraph {
        &self.run.graph
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next_pair(&mut self) {
        let count = self.graph().matrices().len();
        if count > 0 {
            self.pair = (self.pair + 1) % count;
        }
    }

    pub fn previous_pair(&mut self) {
        let count = self.graph().matrices().len();
        if count > 0 {
            self.pair = (self.pair + count - 1) % count;
        }
    }

    /// Table state and row count of the page being scrolled
    fn scroll_target(&mut self) -> Option<(&mut TableState, usize)> {
        match self.current_page {
            Page::Flows => {
                let len = self.run.graph.edges().len();
                Some((&mut self.flows_state, len))
            }
            Page::Nodes => {
                let len = self.run.graph.nodes().len();
                Some((&mut self.nodes_state, len))
            }
            Page::Matrix => None,
        }
    }

    pub fn next(&mut self) {
        if let Some((state, len)) = self.scroll_target() {
            if len == 0 {
                return;
            }
            let i = match state.selected() {
                Some(i) if i >= len - 1 => 0,
                Some(i) => i + 1,
                None => 0,
            };
            state.select(Some(i));
        }
    }

    pub fn previous(&mut self) {
        if let Some((state, len)) = self.scroll_target() {
            if len == 0 {
                return;
            }
            let i = match state.selected() {
                Some(0) => len - 1,
                Some(i) => i - 1,
                None => 0,
            };
            state.select(Some(i));
        }
    }

    pub fn page_down(&mut self) {
        if let Some((state, len)) = self.scroll_target() {
            if len == 0 {
                return;
            }
            let i = state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
            state.select(Some(i));
        }
    }

    pub fn page_up(&mut self) {
        if let Some((state, _)) = self.scroll_target() {
            let i = state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
            state.select(Some(i));
        }
    }

    pub fn home(&mut self) {
        if let Some((state, len)) = self.scroll_target() {
            if len > 0 {
                state.select(Some(0));
            }
        }
    }

    pub fn end(&mut self) {
        if let Some((state, len)) = self.scroll_target() {
            if len > 0 {
                state.select(Some(len - 1));
            }
        }
    }

    /// Terminal color for a category, taken from the palette
    pub fn category_color(&self, category: Category) -> Color {
        let label = self.graph().categories().label(category);
        parse_rgb(self.palette.color(label))
            .map(|(r, g, b)| Color::Rgb(r, g, b))
            .unwrap_or(Color::White)
    }
}

/// Parse "rgb(r, g, b)" or "rgba(r, g, b, a)"; alpha is ignored
fn parse_rgb(css: &str) -> Option<(u8, u8, u8)> {
    let open = css.find('(')?;
    let close = css.rfind(')')?;
    let mut parts = css.get(open + 1..close)?.split(',').map(|p| p.trim().parse::<u8>());

    let r = parts.next()?.ok()?;
    let g = parts.next()?.ok()?;
    let b = parts.next()?.ok()?;
    Some((r, g, b))
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        tracing::error!("UI loop failed: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Right | KeyCode::Char('l') => app.next_pair(),
                KeyCode::Left | KeyCode::Char('h') => app.previous_pair(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.home(),
                KeyCode::End => app.end(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Matrix => render_matrix(f, chunks[1], app),
        Page::Flows => render_flows(f, chunks[1], app),
        Page::Nodes => render_nodes(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Matrix, Page::Flows, Page::Nodes];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }

    let report = &app.run.report;
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Journals: {}", report.entities),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Flow: {}", app.graph().total_weight()),
        Style::default().fg(Color::Cyan),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Dropped dups: {}", report.duplicates_dropped),
        Style::default().fg(Color::DarkGray),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn header_row<'a>(cells: Vec<String>) -> Row<'a> {
    Row::new(cells.into_iter().map(|h| {
        Cell::from(h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    }))
    .style(Style::default().bg(Color::DarkGray))
    .height(1)
}

fn render_matrix(f: &mut Frame, area: Rect, app: &App) {
    let graph = app.graph();
    let categories = graph.categories();

    let Some(matrix) = graph.transition_matrix(app.pair) else {
        let empty = Paragraph::new("  Fewer than two periods: no transitions to show.")
            .block(Block::default().borders(Borders::ALL).title(" Transition Matrix "));
        f.render_widget(empty, area);
        return;
    };

    let mut header = vec![format!("{} \\ {}", matrix.from, matrix.to)];
    header.extend(categories.all().map(|c| categories.label(c).to_string()));
    header.push("Total".to_string());

    let mut rows: Vec<Row> = categories
        .all()
        .map(|from| {
            let from_slot = categories.slot(from);
            let mut cells = vec![Cell::from(categories.label(from).to_string())
                .style(Style::default().fg(app.category_color(from)))];

            for to in categories.all() {
                let to_slot = categories.slot(to);
                let count = matrix.get(from_slot, to_slot);
                let style = if count == 0 {
                    Style::default().fg(Color::DarkGray)
                } else if from_slot == to_slot {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(app.category_color(to))
                };
                cells.push(Cell::from(count.to_string()).style(style));
            }

            cells.push(Cell::from(matrix.row_total(from_slot).to_string()));
            Row::new(cells).height(1)
        })
        .collect();

    let mut totals = vec![Cell::from("Total").style(Style::default().add_modifier(Modifier::BOLD))];
    totals.extend(
        categories
            .all()
            .map(|to| Cell::from(matrix.column_total(categories.slot(to)).to_string())),
    );
    totals.push(Cell::from(matrix.total().to_string()));
    rows.push(Row::new(totals).height(1));

    let mut widths = vec![Constraint::Length(22)];
    widths.extend(std::iter::repeat(Constraint::Length(16)).take(categories.len() + 1));

    let retained = if matrix.total() > 0 {
        matrix.retained() as f64 / matrix.total() as f64 * 100.0
    } else {
        0.0
    };

    let table = Table::new(rows, widths)
        .header(header_row(header))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(format!(
                    " {} → {}  ({} of {}, kept category: {:.1}%) ",
                    matrix.from,
                    matrix.to,
                    app.pair + 1,
                    graph.matrices().len(),
                    retained
                )),
        );

    f.render_widget(table, area);
}

fn render_flows(f: &mut Frame, area: Rect, app: &mut App) {
    let graph = &app.run.graph;

    let rows: Vec<Row> = graph
        .edges()
        .iter()
        .map(|edge| {
            let source = &graph.nodes()[edge.source];
            let target = &graph.nodes()[edge.target];
            let color = app.category_color(source.category);

            Row::new(vec![
                Cell::from(source.label.clone()).style(Style::default().fg(color)),
                Cell::from(target.label.clone()),
                Cell::from(format!("{:>8}", edge.weight)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(28),
            Constraint::Length(28),
            Constraint::Length(10),
        ],
    )
    .header(header_row(vec![
        "From".to_string(),
        "To".to_string(),
        "Journals".to_string(),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Flows by weight "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.flows_state);
}

fn render_nodes(f: &mut Frame, area: Rect, app: &mut App) {
    let graph = &app.run.graph;
    let throughput = graph.node_throughput();

    let rows: Vec<Row> = throughput
        .iter()
        .map(|t| {
            let node = &graph.nodes()[t.index];
            Row::new(vec![
                Cell::from(node.label.clone())
                    .style(Style::default().fg(app.category_color(node.category))),
                Cell::from(format!("{:>8}", t.inflow)),
                Cell::from(format!("{:>8}", t.outflow)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(28),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(header_row(vec![
        "Node".to_string(),
        "In".to_string(),
        "Out".to_string(),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Nodes "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.nodes_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![Span::styled(
        format!(" {} ", app.current_page.title()),
        Style::default().fg(Color::Cyan),
    )];

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    if app.current_page == Page::Matrix {
        status_spans.push(Span::styled("←/→", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" Years | "));
    } else {
        status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" Nav | "));
        status_spans.push(Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" Fast | "));
    }
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}
