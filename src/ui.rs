use std::cmp::min;

use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};

use crate::app::{App, EditDraft, ErrorReport, Focus};
use crate::command::RuleAction;
use crate::envelope::Backend;
use crate::registry::{RowDetail, RuleRow};
use crate::snapshot::TableKind;
use crate::tail::{Tail, TailRow};
use crate::transport::{Connector, SessionState};

const APP_TITLE: &str = "Squidwarden";
const MIN_UI_WIDTH: u16 = 80;
const MIN_UI_HEIGHT: u16 = 20;

fn key_span(text: &'static str) -> Span<'static> {
    Span::styled(
        text,
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    )
}

fn desc_span(text: &'static str) -> Span<'static> {
    Span::styled(text, Style::default().fg(Color::Gray))
}

fn sep_span() -> Span<'static> {
    Span::styled(" | ", Style::default().fg(Color::DarkGray))
}

fn text_cells(text: &str) -> u16 {
    text.chars().count().min(u16::MAX as usize) as u16
}

fn truncate_with_ellipsis(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if text.chars().count() <= max_width {
        return text.to_string();
    }
    if max_width <= 3 {
        return ".".repeat(max_width);
    }
    let mut out: String = text.chars().take(max_width - 3).collect();
    out.push_str("...");
    out
}

fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = min(width, area.width);
    let height = min(height, area.height);
    Rect {
        x: area.x.saturating_add(area.width.saturating_sub(width) / 2),
        y: area.y.saturating_add(area.height.saturating_sub(height) / 2),
        width,
        height,
    }
}

fn feed_chip<C>(tail: &Tail<C>) -> (&'static str, Style) {
    let underlined = Modifier::BOLD | Modifier::UNDERLINED;
    if !tail.is_push() {
        if tail.is_refreshing() {
            return ("[refreshing]", Style::default().fg(Color::Yellow));
        }
        return ("[poll]", Style::default().fg(Color::LightCyan).add_modifier(underlined));
    }
    if tail.is_paused() {
        return ("[paused]", Style::default().fg(Color::Yellow).add_modifier(underlined));
    }
    match tail.state() {
        SessionState::Open => ("[live]", Style::default().fg(Color::LightGreen).add_modifier(underlined)),
        SessionState::Connecting => ("[connecting]", Style::default().fg(Color::Yellow)),
        SessionState::Closed => ("[offline]", Style::default().fg(Color::LightRed)),
    }
}

fn action_color(action: RuleAction) -> Color {
    match action {
        RuleAction::Allow => Color::Green,
        RuleAction::Block => Color::Red,
        RuleAction::Ignore => Color::Yellow,
    }
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let border = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(border)
        .title(title)
}

fn footer_help_lines(focus: Focus, editing: bool) -> Vec<Line<'static>> {
    if editing {
        return vec![Line::from(vec![
            key_span("type"),
            desc_span(" comment"),
            sep_span(),
            key_span("Tab"),
            desc_span(" action"),
            sep_span(),
            key_span("Enter"),
            desc_span(" save"),
            sep_span(),
            key_span("Esc"),
            desc_span(" cancel"),
        ])];
    }
    let global = vec![
        key_span("q"),
        desc_span(" quit"),
        sep_span(),
        key_span("Tab"),
        desc_span(" switch pane"),
        sep_span(),
        key_span("j/k"),
        desc_span(" move"),
    ];
    let pane = match focus {
        Focus::Tail => vec![
            key_span("1/2/3"),
            desc_span(" rule for domain/host/path"),
            sep_span(),
            key_span("a"),
            desc_span(" action"),
            sep_span(),
            key_span("p"),
            desc_span(" pause"),
            sep_span(),
            key_span("r"),
            desc_span(" refresh"),
            sep_span(),
            key_span("c"),
            desc_span(" clear"),
            sep_span(),
            key_span("y"),
            desc_span(" copy url"),
        ],
        Focus::Rules => vec![
            key_span("x"),
            desc_span(" check/grant"),
            sep_span(),
            key_span("Enter"),
            desc_span(" edit"),
            sep_span(),
            key_span(",/."),
            desc_span(" destination"),
            sep_span(),
            key_span("m"),
            desc_span(" move"),
            sep_span(),
            key_span("d"),
            desc_span(" delete"),
            sep_span(),
            key_span("s"),
            desc_span(" save"),
        ],
    };
    vec![Line::from(global), Line::from(pane)]
}

fn tail_row(row: &TailRow) -> Row<'static> {
    let event = &row.event;
    let method_style = if event.is_connect() {
        Style::default().fg(Color::LightMagenta)
    } else {
        Style::default().fg(Color::LightBlue)
    };
    let actions = row
        .actions
        .iter()
        .enumerate()
        .map(|(n, action)| format!("{}:{}", n + 1, action.label))
        .collect::<Vec<_>>()
        .join(" ");
    Row::new(vec![
        Cell::from(event.time.clone()),
        Cell::from(actions).style(Style::default().fg(Color::DarkGray)),
        Cell::from(event.client.clone()),
        Cell::from(event.method.clone()).style(method_style),
        Cell::from(event.host.clone()),
        Cell::from(event.display_path().to_string()),
    ])
}

fn rule_row(row: &RuleRow, editing: Option<&EditDraft>) -> Row<'static> {
    let draft = editing.filter(|draft| draft.id == row.id);
    // Access rows show the grant; a trailing + marks it unsaved.
    let marker = match (&row.detail, row.checked) {
        _ if draft.is_some() => "*",
        (RowDetail::Acl { granted: true, .. }, true) => "[x]+",
        (RowDetail::Acl { granted: true, .. }, false) => "[x]",
        (RowDetail::Acl { .. }, true) => "[ ]+",
        (_, true) => "[x]",
        (_, false) => "[ ]",
    };
    let comment = draft.map_or_else(|| row.comment.clone(), |draft| format!("{}_", draft.comment));
    let cells = match &row.detail {
        RowDetail::Rule {
            kind,
            value,
            action,
        } => {
            let action = draft.and_then(|draft| draft.action).unwrap_or(*action);
            vec![
                Cell::from(marker),
                Cell::from(kind.as_str()),
                Cell::from(value.clone()),
                Cell::from(action.as_str()).style(Style::default().fg(action_color(action))),
                Cell::from(comment),
            ]
        }
        RowDetail::Acl { name, .. } => vec![
            Cell::from(marker),
            Cell::from(name.clone()),
            Cell::from(comment),
        ],
    };
    let row_widget = Row::new(cells);
    if row.enabled {
        row_widget
    } else {
        row_widget.style(Style::default().fg(Color::DarkGray))
    }
}

fn draw_header<C: Connector, B: Backend>(frame: &mut Frame, app: &App<C, B>, area: Rect) {
    let (chip, chip_style) = feed_chip(&app.tail);
    let right_text = format!(
        "{}{} events | new rules: {}",
        if app.is_loading() { "Loading... " } else { "" },
        app.tail.view().len(),
        app.rule_action.as_str()
    );
    let left_width = text_cells(APP_TITLE)
        .saturating_add(1)
        .saturating_add(text_cells("[connecting]"));
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(left_width),
            Constraint::Min(1),
            Constraint::Length(text_cells(&right_text)),
        ])
        .split(area);

    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(APP_TITLE, Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" "),
            Span::styled(chip, chip_style),
        ])),
        chunks[0],
    );

    let center_style = if app.status.to_ascii_lowercase().contains("error")
        || app.status.to_ascii_lowercase().contains("failed")
    {
        Style::default().fg(Color::LightRed)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let center = truncate_with_ellipsis(&app.status, usize::from(chunks[1].width));
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(center, center_style))).alignment(Alignment::Center),
        chunks[1],
    );
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            right_text,
            Style::default().fg(Color::Yellow),
        )))
        .alignment(Alignment::Right),
        chunks[2],
    );
}

fn draw_tail<C: Connector, B: Backend>(frame: &mut Frame, app: &mut App<C, B>, area: Rect) {
    let viewport = usize::from(area.height.saturating_sub(3));
    let offset = app.tail.view_mut().follow_cursor(viewport);
    app.tail_state.select(app.tail.view().cursor());
    *app.tail_state.offset_mut() = offset;

    let rows: Vec<Row> = app.tail.view().rows().map(tail_row).collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(23),
            Constraint::Length(22),
            Constraint::Length(15),
            Constraint::Length(8),
            Constraint::Fill(2),
            Constraint::Fill(3),
        ],
    )
    .header(
        Row::new(vec!["Time", "Actions", "Client", "Method", "Host", "Path"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(pane_block("Tail".to_string(), app.focus == Focus::Tail))
    .row_highlight_style(
        Style::default()
            .fg(Color::Black)
            .bg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );
    frame.render_stateful_widget(table, area, &mut app.tail_state);
}

fn draw_rules<C: Connector, B: Backend>(frame: &mut Frame, app: &mut App<C, B>, area: Rect) {
    let Some(kind) = app.kind.as_ref() else {
        frame.render_widget(
            Paragraph::new("No rule table loaded. Start with --snapshot <file>.")
                .style(Style::default().fg(Color::DarkGray))
                .block(pane_block("Rules".to_string(), app.focus == Focus::Rules)),
            area,
        );
        return;
    };
    let title = format!(
        "{} ({} checked)",
        kind.title(),
        app.table.registry().checked_count()
    );
    let (header, widths) = match kind {
        TableKind::Acl { .. } => (
            Row::new(vec!["", "Type", "Value", "Action", "Comment"]),
            vec![
                Constraint::Length(3),
                Constraint::Length(12),
                Constraint::Fill(3),
                Constraint::Length(6),
                Constraint::Fill(2),
            ],
        ),
        TableKind::Access { .. } => (
            Row::new(vec!["", "ACL", "Comment"]),
            vec![
                Constraint::Length(3),
                Constraint::Fill(1),
                Constraint::Fill(2),
            ],
        ),
    };

    let viewport = usize::from(area.height.saturating_sub(3));
    let offset = app.table.follow_cursor(viewport);
    app.rules_state.select(app.table.cursor());
    *app.rules_state.offset_mut() = offset;

    let draft = app.draft.as_ref();
    let rows: Vec<Row> = app
        .table
        .registry()
        .rows()
        .iter()
        .map(|row| rule_row(row, draft))
        .collect();
    let table = Table::new(rows, widths)
        .header(header.style(Style::default().add_modifier(Modifier::BOLD)))
        .block(pane_block(title, app.focus == Focus::Rules))
        .row_highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_stateful_widget(table, area, &mut app.rules_state);
}

fn detail_text<C: Connector, B: Backend>(app: &App<C, B>) -> (&'static str, String) {
    if let Some(draft) = &app.draft {
        let action = draft
            .action
            .map(|action| format!(" action={}", action.as_str()))
            .unwrap_or_default();
        let saving = if draft.pending { " (saving...)" } else { "" };
        return (
            "Edit",
            format!("{} comment: {}_{}{}", draft.id, draft.comment, action, saving),
        );
    }
    match app.focus {
        Focus::Tail => {
            let view = app.tail.view();
            let text = match (view.selected(), app.tail.last_error()) {
                (Some(row), _) => row.event.url.clone(),
                (None, Some(err)) if view.is_empty() => format!("Last stream error: {}", err),
                (None, _) => "No events yet.".to_string(),
            };
            ("Request", text)
        }
        Focus::Rules => {
            let destination = app
                .destination()
                .map(|d| format!("move to: {} ({})", d.name, d.id))
                .unwrap_or_else(|| "move to: -".to_string());
            let trigger = if app.batch_pending() {
                "sending..."
            } else if app.table.registry().is_empty() {
                "no rows"
            } else if app.table.trigger_enabled() {
                "ready"
            } else if matches!(app.kind, Some(TableKind::Access { .. })) {
                "no unsaved changes"
            } else {
                "nothing checked"
            };
            ("Batch", format!("{} | {}", destination, trigger))
        }
    }
}

fn draw_error(frame: &mut Frame, report: &ErrorReport, area: Rect) {
    let mut lines = vec![
        Line::from(Span::styled(
            report.message.clone(),
            Style::default().fg(Color::White),
        )),
        Line::from(""),
    ];
    for link in &report.links {
        lines.push(Line::from(vec![
            Span::styled(link.text.clone(), Style::default().fg(Color::LightCyan)),
            Span::raw(" "),
            Span::styled(link.link.clone(), Style::default().fg(Color::DarkGray)),
        ]));
    }
    lines.push(Line::from(desc_span("Esc/Enter to close")));

    let height = u16::try_from(lines.len()).unwrap_or(u16::MAX).saturating_add(2);
    let popup = centered_rect(area, min(area.width.saturating_sub(4), 70), height);
    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: true }).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::LightRed))
                .title(report.title.clone()),
        ),
        popup,
    );
}

pub fn draw<C: Connector, B: Backend>(frame: &mut Frame, app: &mut App<C, B>) {
    app.refresh_status_lifetime();
    let area = frame.area();
    if area.width < MIN_UI_WIDTH || area.height < MIN_UI_HEIGHT {
        let popup = centered_rect(area, 56, 7);
        let msg = Paragraph::new(vec![
            Line::from(format!(
                "Terminal too small: {}x{}",
                area.width, area.height
            )),
            Line::from(format!("Need at least {}x{}", MIN_UI_WIDTH, MIN_UI_HEIGHT)),
            Line::from("Resize terminal to continue"),
        ])
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(APP_TITLE));
        frame.render_widget(msg, popup);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Fill(3),
            Constraint::Fill(2),
            Constraint::Length(3),
            Constraint::Length(2),
        ])
        .split(area);

    draw_header(frame, app, chunks[0]);
    draw_tail(frame, app, chunks[1]);
    draw_rules(frame, app, chunks[2]);

    let (detail_title, detail) = detail_text(app);
    frame.render_widget(
        Paragraph::new(detail).block(Block::default().borders(Borders::ALL).title(detail_title)),
        chunks[3],
    );

    let help = Paragraph::new(footer_help_lines(app.focus, app.draft.is_some())).wrap(Wrap { trim: true });
    frame.render_widget(help, chunks[4]);

    if let Some(report) = &app.error {
        draw_error(frame, report, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_marks_cut_text() {
        assert_eq!(truncate_with_ellipsis("www.example.com", 8), "www.e...");
        assert_eq!(truncate_with_ellipsis("short", 8), "short");
        assert_eq!(truncate_with_ellipsis("abcdef", 2), "..");
    }

    #[test]
    fn popup_is_centered_and_clamped() {
        let area = Rect::new(0, 0, 100, 30);
        assert_eq!(centered_rect(area, 60, 10), Rect::new(20, 10, 60, 10));
        assert_eq!(centered_rect(area, 200, 50), area);
    }

    #[test]
    fn access_rows_show_grant_and_unsaved_mark() {
        let mut row = RuleRow::acl("a1", "kids", "", true);
        assert_eq!(
            rule_row(&row, None),
            Row::new(vec![Cell::from("[x]"), Cell::from("kids"), Cell::from("")])
        );
        row.checked = true;
        assert_eq!(
            rule_row(&row, None),
            Row::new(vec![Cell::from("[x]+"), Cell::from("kids"), Cell::from("")])
        );
    }

    #[test]
    fn disabled_rows_render_gray_and_draft_marks_edit() {
        let mut row = RuleRow::acl("a1", "kids", "school", false);
        let draft = EditDraft {
            id: row.id.clone(),
            comment: "new".to_string(),
            action: None,
            pending: false,
        };
        assert_eq!(rule_row(&row, Some(&draft)), Row::new(vec![
            Cell::from("*"),
            Cell::from("kids"),
            Cell::from("new_"),
        ]));
        row.enabled = false;
        assert_eq!(
            rule_row(&row, None),
            Row::new(vec![
                Cell::from("[ ]"),
                Cell::from("kids"),
                Cell::from("school"),
            ])
            .style(Style::default().fg(Color::DarkGray))
        );
    }
}
