/// prsim live visualizer. Attach to any running simulation at any time.
///
/// Run in a separate terminal:
///   cargo run --bin viz
/// while the simulator runs with `--live`.
///
/// Polls /tmp/prsim_live.json every 200ms and renders a live TUI dashboard:
///
///     ┌ header: workload / architecture / policy / status ─────────┐
///     │ core grid (one cell per core)   │ Stats: utilization, queue │
///     │ q/esc: quit  …footer…                                       │
///
/// Cores owned by the same kernel share a colour, so multi-core footprints
/// show up as blocks.
///
/// Press q or Esc to quit. The simulation keeps running unaffected.
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use prsim::components::ComponentStatus;
use prsim::metrics::{read_metrics, LiveMetrics, METRICS_PATH};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::{io, path::Path, time::Duration};

const KERNEL_COLORS: [Color; 6] = [
    Color::Green,
    Color::Yellow,
    Color::Magenta,
    Color::Cyan,
    Color::LightBlue,
    Color::LightRed,
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let metrics = read_metrics(Path::new(METRICS_PATH));
        terminal.draw(|f| render(f, metrics.as_ref()))?;

        // Non-blocking: poll for 200ms, then redraw regardless
        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Top-level layout
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, metrics: Option<&LiveMetrics>) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // grid + stats
            Constraint::Length(1), // footer
        ])
        .split(f.area());

    render_header(f, rows[0], metrics);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(rows[1]);

    render_grid(f, cols[0], metrics);
    render_stats(f, cols[1], metrics);
    render_footer(f, rows[2]);
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn render_header(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default()
        .title(Span::styled(
            " prsim live monitor ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let (workload, arch, policy, status) = metrics
        .map(|m| {
            (
                m.workload.as_str(),
                m.architecture.as_str(),
                m.scheduling_policy.as_str(),
                m.status.as_str(),
            )
        })
        .unwrap_or(("-", "-", "-", "idle"));

    let status_color = match status {
        "running" => Color::Green,
        "complete" => Color::Cyan,
        "stopped" => Color::Yellow,
        _ => Color::DarkGray,
    };

    let spans = vec![
        Span::styled("  workload: ", Style::default().fg(Color::DarkGray)),
        Span::styled(workload, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::styled("   arch: ", Style::default().fg(Color::DarkGray)),
        Span::raw(arch),
        Span::styled("   policy: ", Style::default().fg(Color::DarkGray)),
        Span::styled(policy, Style::default().fg(Color::Cyan)),
        Span::styled("   status: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            status.to_uppercase(),
            Style::default().fg(status_color).add_modifier(Modifier::BOLD),
        ),
    ];

    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

// ---------------------------------------------------------------------------
// Core grid
// ---------------------------------------------------------------------------

fn render_grid(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let title = metrics
        .map(|m| format!(" Cores {}x{} ({}) ", m.grid[0], m.grid[1], m.partition))
        .unwrap_or_else(|| " Cores ".to_string());

    let block = Block::default().title(title).borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(m) = metrics else {
        return;
    };

    let legend = Line::from(vec![
        Span::styled("██", Style::default().fg(Color::Green)),
        Span::raw(" used (colour = kernel)   "),
        Span::styled("▒▒", Style::default().fg(Color::Blue)),
        Span::raw(" reserved   "),
        Span::styled("░░", Style::default().fg(Color::DarkGray)),
        Span::raw(" idle"),
    ]);

    let mut lines: Vec<Line> = vec![legend, Line::raw("")];

    let width = m.grid[1].max(1);
    for row in m.cores.chunks(width) {
        let spans: Vec<Span> = row
            .iter()
            .flat_map(|core| {
                let (symbol, color) = match (core.status, core.kernel) {
                    (ComponentStatus::Used, Some(kernel)) => ("██", KERNEL_COLORS[kernel % KERNEL_COLORS.len()]),
                    (ComponentStatus::Used, None) => ("██", Color::Green),
                    (ComponentStatus::Reserved, _) => ("▒▒", Color::Blue),
                    (ComponentStatus::Idle, _) => ("░░", Color::DarkGray),
                };
                vec![Span::styled(symbol, Style::default().fg(color)), Span::raw(" ")]
            })
            .collect();
        lines.push(Line::from(spans));
    }

    let busy = m.cores.iter().filter(|c| c.status != ComponentStatus::Idle).count();
    lines.push(Line::raw(""));
    lines.push(Line::from(vec![Span::styled(
        format!("  {}/{} cores busy, {} kernel(s) running", busy, m.cores.len(), m.kernels_running),
        Style::default().fg(Color::DarkGray),
    )]));

    f.render_widget(Paragraph::new(lines), inner);
}

// ---------------------------------------------------------------------------
// Stats panel
// ---------------------------------------------------------------------------

fn render_stats(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Stats ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // utilization gauge
            Constraint::Length(1), // spacer
            Constraint::Length(2), // queue gauge
            Constraint::Length(1), // spacer
            Constraint::Length(2), // progress gauge
            Constraint::Length(1), // spacer
            Constraint::Min(0),    // text stats
        ])
        .split(inner);

    let Some(m) = metrics else {
        let msg = Paragraph::new(vec![
            Line::raw(""),
            Line::from(Span::styled(
                "  No simulation running.",
                Style::default().fg(Color::DarkGray),
            )),
            Line::from(Span::styled(
                "  Start prsim with --live to see live data.",
                Style::default().fg(Color::DarkGray),
            )),
        ]);
        f.render_widget(msg, inner);
        return;
    };

    let util_pct = (m.utilization * 100.0).clamp(0.0, 100.0) as u16;
    let util_color = match util_pct {
        0..=33 => Color::Red,
        34..=66 => Color::Yellow,
        _ => Color::Green,
    };
    let util_gauge = Gauge::default()
        .block(Block::default().title("Core utilization"))
        .gauge_style(Style::default().fg(util_color))
        .percent(util_pct)
        .label(format!("{:.1}%", m.utilization * 100.0));
    f.render_widget(util_gauge, rows[0]);

    let queue_gauge = Gauge::default()
        .block(Block::default().title("Task queue"))
        .gauge_style(Style::default().fg(Color::Magenta))
        .percent(percent(m.queue_depth, m.queue_capacity))
        .label(format!("{} / {}", m.queue_depth, m.queue_capacity));
    f.render_widget(queue_gauge, rows[2]);

    let progress_gauge = Gauge::default()
        .block(Block::default().title("Tasks done"))
        .gauge_style(Style::default().fg(Color::Blue))
        .percent(percent(m.tasks_done, m.tasks_expected))
        .label(format!("{} / {}", m.tasks_done, m.tasks_expected));
    f.render_widget(progress_gauge, rows[4]);

    let text = vec![
        Line::from(vec![
            Span::styled("Time:       ", Style::default().fg(Color::DarkGray)),
            Span::raw(m.sim_time.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Banks:      ", Style::default().fg(Color::DarkGray)),
            Span::raw(format!("{} / {}", m.banks_used, m.banks_total)),
        ]),
        Line::from(vec![
            Span::styled("Committed:  ", Style::default().fg(Color::DarkGray)),
            Span::raw(m.kernels_committed.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Partition:  ", Style::default().fg(Color::DarkGray)),
            Span::styled(m.partition.clone(), Style::default().fg(Color::Yellow)),
        ]),
    ];
    f.render_widget(Paragraph::new(text), rows[6]);
}

fn percent(part: usize, whole: usize) -> u16 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).clamp(0.0, 100.0) as u16
}

// ---------------------------------------------------------------------------
// Footer
// ---------------------------------------------------------------------------

fn render_footer(f: &mut Frame, area: Rect) {
    let text = Paragraph::new(Span::styled(
        format!("  q / esc: quit    auto-refreshes every 200ms    reads {}", METRICS_PATH),
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(text, area);
}
