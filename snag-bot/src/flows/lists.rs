//! Paginated defect lists

use crate::db::{DefectQuery, ListOrder};
use crate::engine::{Engine, Handled};
use crate::inbound::{ButtonAction, DueChoice, ListKind};
use crate::messaging::{Button, MessageKind, OutboundMessage};
use chrono::{DateTime, Duration, Utc};
use snag_common::db::{Defect, DefectStatus};
use snag_common::{time, Result};

pub const PAGE_SIZE: u32 = 5;

/// Number of pages needed for `total` rows
pub fn page_count(total: i64) -> u32 {
    let page = i64::from(PAGE_SIZE);
    ((total.max(0) + page - 1) / page) as u32
}

pub fn title(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Overdue => "My overdue",
        ListKind::Today => "Due today",
        ListKind::Future => "On control (upcoming)",
        ListKind::All => "On control",
        ListKind::OverdueAll => "Overdue (everyone)",
    }
}

/// Store query behind one list page
///
/// Every list shows `on_control` defects only. Day boundaries use the
/// site's local time.
pub fn list_query(
    kind: ListKind,
    actor: &str,
    now: DateTime<Utc>,
    utc_offset_minutes: i32,
    page: u32,
) -> DefectQuery {
    let today_end = time::due_in_days(&now, 0, utc_offset_minutes);
    let after_today = today_end + Duration::seconds(1);

    let mut query = DefectQuery {
        assignee: Some(actor.to_string()),
        statuses: vec![DefectStatus::OnControl],
        order: ListOrder::DueAsc,
        limit: PAGE_SIZE,
        offset: page.saturating_mul(PAGE_SIZE),
        ..DefectQuery::default()
    };

    match kind {
        ListKind::Overdue => query.due_before = Some(now),
        ListKind::Today => {
            query.due_from = Some(now);
            query.due_before = Some(after_today);
        }
        ListKind::Future => query.due_from = Some(after_today),
        ListKind::All => {}
        ListKind::OverdueAll => {
            query.assignee = None;
            query.due_before = Some(now);
        }
    }
    query
}

pub fn render_mini_card(defect: &Defect, utc_offset_minutes: i32) -> String {
    let due = defect
        .due_date
        .map(|d| time::format_date(&d, utc_offset_minutes))
        .unwrap_or_else(|| "—".to_string());

    let mut text = format!("#{} · {}\nObject: {}\n", defect.human_id, defect.status.label(), defect.object);
    if let Some(floor) = &defect.floor {
        text.push_str(&format!("Floor: {}\n", floor));
    }
    text.push_str(&format!(
        "{} / {}\nDue: {}",
        defect.category.label(),
        defect.severity.label(),
        due
    ));
    text
}

/// Quick actions under a list item or reminder
pub fn mini_card_keyboard(human_id: &str) -> Vec<Vec<Button>> {
    let id = || human_id.to_string();
    vec![
        vec![
            Button::new("Fixed", &ButtonAction::SetFixed(id())),
            Button::new("+1 day", &ButtonAction::Due(DueChoice::PlusOne, id())),
            Button::new("+3 days", &ButtonAction::Due(DueChoice::PlusThree, id())),
        ],
        vec![
            Button::new("Custom date", &ButtonAction::DueCustom(id())),
            Button::new("Remove from control", &ButtonAction::ControlCancel(id())),
        ],
        vec![Button::new("Open card", &ButtonAction::Open(id()))],
    ]
}

fn pager_keyboard(kind: ListKind, page: u32, pages: u32) -> Vec<Vec<Button>> {
    let mut row = Vec::new();
    if page > 0 {
        row.push(Button::new("Back", &ButtonAction::List(kind, page - 1)));
    }
    if page + 1 < pages {
        row.push(Button::new("Next", &ButtonAction::List(kind, page + 1)));
    }
    vec![row]
}

impl Engine {
    pub(crate) async fn show_lists_menu(&self, actor: &str) -> Result<Handled> {
        let item = |kind: ListKind| Button::new(title(kind), &ButtonAction::List(kind, 0));
        self.deliver(
            OutboundMessage::new(actor, MessageKind::ListsMenu, "Which list?").with_keyboard(vec![
                vec![item(ListKind::Overdue), item(ListKind::Today)],
                vec![item(ListKind::Future), item(ListKind::All)],
                vec![item(ListKind::OverdueAll)],
            ]),
        )
        .await;
        Ok(Handled::Consumed)
    }

    pub(crate) async fn show_list(&self, actor: &str, kind: ListKind, page: u32) -> Result<Handled> {
        let offset = self.control.utc_offset_minutes;
        let query = list_query(kind, actor, time::now(), offset, page);
        let result = self.store.list_defects(&query).await?;

        if result.rows.is_empty() {
            self.deliver(OutboundMessage::new(
                actor,
                MessageKind::ListEmpty,
                format!("{}: empty.", title(kind)),
            ))
            .await;
            return Ok(Handled::Consumed);
        }

        for defect in &result.rows {
            self.deliver(
                OutboundMessage::new(actor, MessageKind::ListItem, render_mini_card(defect, offset))
                    .with_keyboard(mini_card_keyboard(&defect.human_id)),
            )
            .await;
        }

        let pages = page_count(result.total);
        if pages > 1 {
            self.deliver(
                OutboundMessage::new(
                    actor,
                    MessageKind::ListPage,
                    format!("{}: page {}/{}", title(kind), page + 1, pages),
                )
                .with_keyboard(pager_keyboard(kind, page, pages)),
            )
            .await;
        }
        Ok(Handled::Consumed)
    }
}
