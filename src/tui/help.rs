use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, desc: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(format!("{:pad$}{desc}", "")),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (q is typed as text in the wizard)"),
        ]),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Runs tab:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Navigate"),
        ]),
        key_line("s", 11, "Start or stop the selected run"),
        key_line("e", 11, "Edit the selected run"),
        key_line("l", 11, "Open logs (refreshed on every poll)"),
        key_line("d", 11, "Delete the selected run (asks y/n)"),
        key_line("n", 11, "New run wizard"),
        key_line("r", 11, "Refresh now"),
        key_line("Esc", 9, "Close logs"),
        key_line("PgUp/PgDn", 3, "Scroll logs"),
        Line::from(""),
        Line::from("Wizard:"),
        key_line("↑/↓", 9, "Move between fields"),
        key_line("←/→", 9, "Change a choice (type, optimizer, model, ...)"),
        key_line("Enter", 7, "Next step, or submit on the last step"),
        key_line("Esc", 9, "Previous step, or cancel on the first step"),
        key_line("Ctrl-A", 6, "Add a module"),
        key_line("Ctrl-G", 6, "Toggle code regeneration when editing"),
        Line::from(""),
        Line::from(vec![
            Span::styled("Run names: ", Style::default().fg(Color::Gray)),
            Span::raw("letters, digits and underscores; Python keywords are rejected."),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
