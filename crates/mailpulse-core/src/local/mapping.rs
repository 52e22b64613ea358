//! Projected rows to normalized records.

use chrono::NaiveDate;
use tracing::debug;

use super::automation::{Cell, Column, Row, StoreInfo};
use crate::model::{
    DueBucket, FlagStatus, Importance, ItemReference, NormalizedEvent, NormalizedMessage,
    NormalizedTask, ResponseStatus,
};

/// Columns projected for mail.
pub const MESSAGE_COLUMNS: &[Column] = &[
    Column::EntryId,
    Column::Subject,
    Column::SenderName,
    Column::SenderEmailAddress,
    Column::ReceivedTime,
    Column::UnRead,
    Column::FlagStatus,
    Column::TaskDueDate,
    Column::Importance,
    Column::Categories,
    Column::HasAttachments,
    Column::BodyPreview,
];

/// Columns projected for appointments.
pub const EVENT_COLUMNS: &[Column] = &[
    Column::EntryId,
    Column::Subject,
    Column::Start,
    Column::End,
    Column::Location,
    Column::ResponseStatus,
    Column::IsRecurring,
    Column::AllDayEvent,
];

/// Columns projected for tasks.
pub const TASK_COLUMNS: &[Column] = &[
    Column::EntryId,
    Column::Subject,
    Column::DueDate,
    Column::Importance,
    Column::Complete,
    Column::ReminderSet,
];

fn reference(row: &Row, store: &StoreInfo) -> Option<ItemReference> {
    let Some(id) = row.text(Column::EntryId) else {
        debug!(store = %store.display_name, "Skipping row without entry id");
        return None;
    };
    Some(ItemReference::local(id, Some(store.id.clone())))
}

fn split_categories(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split([',', ';'])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

/// Maps a mail row.
#[must_use]
pub fn message(row: &Row, store: &StoreInfo) -> Option<NormalizedMessage> {
    let reference = reference(row, store)?;
    let Some(received) = row.date(Column::ReceivedTime) else {
        debug!(id = %reference.id, "Skipping message without received time");
        return None;
    };
    let preview = match row.cell(Column::BodyPreview) {
        Cell::Value(v) => v.as_text().map(|s| s.trim().to_string()),
        Cell::Empty | Cell::Unsupported => None,
    };
    let link = Some(format!("outlook:{}", reference.id));
    Some(NormalizedMessage {
        account: store.display_name.clone(),
        subject: row.text(Column::Subject).unwrap_or_default().to_string(),
        sender_name: row.text(Column::SenderName).unwrap_or_default().to_string(),
        sender_address: row
            .text(Column::SenderEmailAddress)
            .unwrap_or_default()
            .to_string(),
        received,
        is_read: !row.bool(Column::UnRead).unwrap_or(false),
        flag_status: FlagStatus::from_local(row.int(Column::FlagStatus).unwrap_or(0)),
        flag_due: row.date(Column::TaskDueDate),
        importance: Importance::from_local(row.int(Column::Importance).unwrap_or(1)),
        has_attachments: row.bool(Column::HasAttachments).unwrap_or(false),
        categories: split_categories(row.text(Column::Categories)),
        preview,
        link,
        reference,
    })
}

/// Maps an appointment row.
#[must_use]
pub fn event(row: &Row, store: &StoreInfo) -> Option<NormalizedEvent> {
    let reference = reference(row, store)?;
    let (Some(start), Some(end)) = (row.date(Column::Start), row.date(Column::End)) else {
        debug!(id = %reference.id, "Skipping appointment without start/end");
        return None;
    };
    Some(NormalizedEvent {
        account: store.display_name.clone(),
        subject: row.text(Column::Subject).unwrap_or_default().to_string(),
        start,
        end,
        location: row
            .text(Column::Location)
            .filter(|l| !l.is_empty())
            .map(String::from),
        response_status: ResponseStatus::from_local(row.int(Column::ResponseStatus).unwrap_or(0)),
        is_recurring: row.bool(Column::IsRecurring).unwrap_or(false),
        is_all_day: row.bool(Column::AllDayEvent).unwrap_or(false),
        reference,
    })
}

/// Maps a task row, bucketing its due date against `today`.
#[must_use]
pub fn task(row: &Row, store: &StoreInfo, today: NaiveDate) -> Option<NormalizedTask> {
    let reference = reference(row, store)?;
    let due = row.date(Column::DueDate);
    Some(NormalizedTask {
        account: store.display_name.clone(),
        subject: row.text(Column::Subject).unwrap_or_default().to_string(),
        due,
        importance: Importance::from_local(row.int(Column::Importance).unwrap_or(1)),
        is_complete: row.bool(Column::Complete).unwrap_or(false),
        has_reminder: row.bool(Column::ReminderSet).unwrap_or(false),
        bucket: DueBucket::classify(due, today),
        reference,
    })
}
