//! Card edit form state.
//!
//! A form is either a draft (a card that has never been saved, identified by
//! a sequence number) or an existing card. Edits mark fields dirty; saves
//! and sync changes merge around the dirty fields so typing is never lost.

mod autosave;

pub use autosave::*;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::models::{Card, CardChange, CardPatch};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormId {
    /// A card that has not been saved yet
    Draft(u64),
    Card(String),
}

impl Default for FormId {
    fn default() -> Self {
        FormId::Draft(0)
    }
}

impl From<&str> for FormId {
    fn from(id: &str) -> Self {
        FormId::Card(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditPhase {
    #[default]
    Empty,
    Loading,
    Ok,
    Dirty,
    NotFound,
}

/// The editable fields of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CardField {
    Question,
    Answer,
    Keywords,
    Tags,
}

impl CardField {
    pub const ALL: [CardField; 4] = [
        CardField::Question,
        CardField::Answer,
        CardField::Keywords,
        CardField::Tags,
    ];

    fn is_set(self, card: &CardPatch) -> bool {
        match self {
            CardField::Question => card.question.is_some(),
            CardField::Answer => card.answer.is_some(),
            CardField::Keywords => card.keywords.is_some(),
            CardField::Tags => card.tags.is_some(),
        }
    }

    fn differs(self, a: &CardPatch, b: &CardPatch) -> bool {
        match self {
            CardField::Question => a.question != b.question,
            CardField::Answer => a.answer != b.answer,
            CardField::Keywords => a.keywords != b.keywords,
            CardField::Tags => a.tags != b.tags,
        }
    }

    fn copy(self, from: &CardPatch, to: &mut CardPatch) {
        match self {
            CardField::Question => to.question = from.question.clone(),
            CardField::Answer => to.answer = from.answer.clone(),
            CardField::Keywords => to.keywords = from.keywords.clone(),
            CardField::Tags => to.tags = from.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditForm {
    pub form_id: FormId,
    pub phase: EditPhase,
    /// Card as shown in the form; `id` is unset for drafts
    pub card: CardPatch,
    /// Fields changed since the last save, in the order they were edited
    pub dirty_fields: Vec<CardField>,
    /// Set when the form shows a card that was deleted
    pub deleted: bool,
    pub save_error: Option<String>,
}

impl EditForm {
    pub fn is_dirty(&self) -> bool {
        self.phase == EditPhase::Dirty
    }

    fn with_phase(form_id: FormId, phase: EditPhase) -> Self {
        Self {
            form_id,
            phase,
            ..Self::default()
        }
    }

    fn not_found(form_id: FormId, deleted: bool) -> Self {
        Self {
            deleted,
            ..Self::with_phase(form_id, EditPhase::NotFound)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditAction {
    NewCard { id: u64 },
    LoadCard { id: String },
    FinishLoadCard { form_id: FormId, card: Card },
    /// `deleted` distinguishes a deleted card from one that never existed
    FailLoadCard { form_id: FormId, deleted: bool },
    EditCard { form_id: FormId, change: CardPatch },
    FinishSaveCard { form_id: FormId, card: Card },
    FailSaveCard { form_id: FormId, error: String },
    SyncEditCard { change: CardChange },
    DeleteEditCard { form_id: FormId },
}

impl EditAction {
    pub fn fail_load_card(form_id: FormId, error: &StoreError) -> Self {
        let deleted = error.reason() == Some("deleted");
        EditAction::FailLoadCard { form_id, deleted }
    }

    pub fn fail_save_card(form_id: FormId, error: &StoreError) -> Self {
        EditAction::FailSaveCard {
            form_id,
            error: error.to_string(),
        }
    }
}

/// Apply `action` to the form. Ignored actions return the same `Arc`.
pub fn edit(state: &Arc<EditForm>, action: &EditAction) -> Arc<EditForm> {
    match action {
        EditAction::NewCard { id } => {
            Arc::new(EditForm::with_phase(FormId::Draft(*id), EditPhase::Empty))
        }

        EditAction::LoadCard { id } => Arc::new(EditForm::with_phase(
            FormId::Card(id.clone()),
            EditPhase::Loading,
        )),

        EditAction::FinishLoadCard { form_id, card } => {
            if *form_id != state.form_id {
                return state.clone();
            }
            Arc::new(EditForm {
                form_id: FormId::Card(card.id.clone()),
                phase: EditPhase::Ok,
                card: CardPatch::from(card),
                ..EditForm::default()
            })
        }

        EditAction::FailLoadCard { form_id, deleted } => {
            if *form_id != state.form_id {
                return state.clone();
            }
            Arc::new(EditForm::not_found(form_id.clone(), *deleted))
        }

        EditAction::EditCard { form_id, change } => {
            if *form_id != state.form_id {
                return state.clone();
            }

            let mut next = (**state).clone();
            for field in CardField::ALL {
                if !field.is_set(change) {
                    continue;
                }
                if field.differs(change, &state.card) && !next.dirty_fields.contains(&field) {
                    next.dirty_fields.push(field);
                }
                field.copy(change, &mut next.card);
            }
            next.phase = EditPhase::Dirty;
            next.save_error = None;
            Arc::new(next)
        }

        EditAction::FinishSaveCard { form_id, card } => {
            if *form_id != state.form_id || state.deleted {
                return state.clone();
            }

            let saved = CardPatch::from(card);
            // Fields edited again while the save was in flight stay dirty.
            let dirty_fields: Vec<CardField> = CardField::ALL
                .into_iter()
                .filter(|field| field.differs(&saved, &state.card) && field.is_set(&state.card))
                .collect();

            let mut merged = saved;
            for field in CardField::ALL {
                if field.is_set(&state.card) {
                    field.copy(&state.card, &mut merged);
                }
            }

            Arc::new(EditForm {
                form_id: FormId::Card(card.id.clone()),
                phase: if dirty_fields.is_empty() {
                    EditPhase::Ok
                } else {
                    EditPhase::Dirty
                },
                card: merged,
                dirty_fields,
                deleted: false,
                save_error: None,
            })
        }

        EditAction::FailSaveCard { form_id, error } => {
            if *form_id != state.form_id || state.deleted {
                return state.clone();
            }
            let mut next = (**state).clone();
            next.save_error = Some(error.clone());
            Arc::new(next)
        }

        EditAction::SyncEditCard { change } => {
            if state.card.id.as_deref() != Some(change.id.as_str()) {
                return state.clone();
            }

            let card = match &change.card {
                Some(card) if !change.deleted => card,
                _ => return Arc::new(EditForm::not_found(state.form_id.clone(), true)),
            };

            let mut next = (**state).clone();
            let mut synced = CardPatch::from(card);
            for field in &state.dirty_fields {
                field.copy(&state.card, &mut synced);
            }
            next.card = synced;
            Arc::new(next)
        }

        EditAction::DeleteEditCard { form_id } => {
            if *form_id != state.form_id {
                return state.clone();
            }
            if state.card.id.is_none() {
                return Arc::new(EditForm::with_phase(form_id.clone(), EditPhase::Empty));
            }
            Arc::new(EditForm::not_found(form_id.clone(), true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Progress;
    use chrono::Utc;

    fn card(id: &str, question: &str, answer: &str) -> Card {
        let now = Utc::now();
        Card {
            id: id.to_string(),
            rev: "1-00".into(),
            question: question.to_string(),
            answer: answer.to_string(),
            keywords: vec![],
            tags: vec![],
            created: now,
            modified: now,
            progress: Progress::default(),
        }
    }

    fn ok_state(card: &Card) -> Arc<EditForm> {
        let loading = edit(
            &Arc::new(EditForm::default()),
            &EditAction::LoadCard {
                id: card.id.clone(),
            },
        );
        edit(
            &loading,
            &EditAction::FinishLoadCard {
                form_id: FormId::from(card.id.as_str()),
                card: card.clone(),
            },
        )
    }

    fn change(question: Option<&str>, answer: Option<&str>) -> CardPatch {
        CardPatch {
            question: question.map(str::to_string),
            answer: answer.map(str::to_string),
            ..CardPatch::default()
        }
    }

    fn edit_card(state: &Arc<EditForm>, patch: CardPatch) -> Arc<EditForm> {
        edit(
            state,
            &EditAction::EditCard {
                form_id: state.form_id.clone(),
                change: patch,
            },
        )
    }

    #[test]
    fn test_initial_state() {
        let form = EditForm::default();
        assert_eq!(form.form_id, FormId::Draft(0));
        assert_eq!(form.phase, EditPhase::Empty);
    }

    #[test]
    fn test_new_card_clears_form() {
        let state = edit_card(&ok_state(&card("abc", "Q", "A")), change(Some("yer"), None));
        let updated = edit(&state, &EditAction::NewCard { id: 2 });
        assert_eq!(*updated, EditForm::with_phase(FormId::Draft(2), EditPhase::Empty));
    }

    #[test]
    fn test_load_card() {
        let state = ok_state(&card("abc", "Q", "A"));
        let updated = edit(&state, &EditAction::LoadCard { id: "def".into() });
        assert_eq!(updated.form_id, FormId::from("def"));
        assert_eq!(updated.phase, EditPhase::Loading);
        assert_eq!(updated.card, CardPatch::default());
    }

    #[test]
    fn test_finish_load_card() {
        let loaded = card("abc", "Prompt", "Answer");
        let state = ok_state(&loaded);
        assert_eq!(state.phase, EditPhase::Ok);
        assert_eq!(state.card, CardPatch::from(&loaded));
        assert!(state.dirty_fields.is_empty());
    }

    #[test]
    fn test_finish_load_for_other_form_is_ignored() {
        let loading = edit(
            &Arc::new(EditForm::default()),
            &EditAction::LoadCard { id: "abc".into() },
        );
        let updated = edit(
            &loading,
            &EditAction::FinishLoadCard {
                form_id: FormId::from("def"),
                card: card("def", "Q", "A"),
            },
        );
        assert!(Arc::ptr_eq(&updated, &loading));
    }

    #[test]
    fn test_fail_load_card() {
        let loading = edit(
            &Arc::new(EditForm::default()),
            &EditAction::LoadCard { id: "abc".into() },
        );

        let missing = edit(
            &loading,
            &EditAction::fail_load_card(FormId::from("abc"), &StoreError::missing()),
        );
        assert_eq!(missing.phase, EditPhase::NotFound);
        assert!(!missing.deleted);

        let deleted = edit(
            &loading,
            &EditAction::fail_load_card(FormId::from("abc"), &StoreError::deleted()),
        );
        assert!(deleted.deleted);

        let other = edit(
            &loading,
            &EditAction::fail_load_card(FormId::from("def"), &StoreError::missing()),
        );
        assert!(Arc::ptr_eq(&other, &loading));
    }

    #[test]
    fn test_edit_marks_changed_fields_dirty() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let updated = edit_card(&state, change(Some("Updated prompt"), Some("Answer")));

        assert_eq!(updated.phase, EditPhase::Dirty);
        assert_eq!(updated.card.question.as_deref(), Some("Updated prompt"));
        assert_eq!(updated.dirty_fields, vec![CardField::Question]);
    }

    #[test]
    fn test_edit_new_card() {
        let state = edit(&Arc::new(EditForm::default()), &EditAction::NewCard { id: 7 });
        let updated = edit_card(&state, change(Some("Updated prompt"), Some("Updated answer")));

        assert_eq!(updated.form_id, FormId::Draft(7));
        assert_eq!(updated.dirty_fields, vec![CardField::Question, CardField::Answer]);
        assert!(updated.card.id.is_none());
    }

    #[test]
    fn test_edit_other_form_is_ignored() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let updated = edit(
            &state,
            &EditAction::EditCard {
                form_id: FormId::from("def"),
                change: change(Some("Updated"), None),
            },
        );
        assert!(Arc::ptr_eq(&updated, &state));
    }

    #[test]
    fn test_dirty_fields_accumulate() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let state = edit_card(&state, change(Some("Updated prompt"), None));
        let state = edit_card(&state, change(None, Some("Updated answer")));
        assert_eq!(state.dirty_fields, vec![CardField::Question, CardField::Answer]);
    }

    #[test]
    fn test_finish_save_clears_dirty() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let state = edit_card(&state, change(Some("Updated prompt"), None));

        let saved = card("abc", "Updated prompt", "Answer");
        let updated = edit(
            &state,
            &EditAction::FinishSaveCard {
                form_id: FormId::from("abc"),
                card: saved.clone(),
            },
        );
        assert_eq!(updated.phase, EditPhase::Ok);
        assert!(updated.dirty_fields.is_empty());
        assert_eq!(updated.card, CardPatch::from(&saved));
    }

    #[test]
    fn test_finish_save_keeps_fields_changed_since() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let state = edit_card(&state, change(Some("Updated #2"), Some("Updated answer")));

        let updated = edit(
            &state,
            &EditAction::FinishSaveCard {
                form_id: FormId::from("abc"),
                card: card("abc", "Updated #1", "Updated answer"),
            },
        );
        assert_eq!(updated.phase, EditPhase::Dirty);
        assert_eq!(updated.dirty_fields, vec![CardField::Question]);
        assert_eq!(updated.card.question.as_deref(), Some("Updated #2"));
    }

    #[test]
    fn test_finish_save_of_draft_adopts_id() {
        let state = edit(&Arc::new(EditForm::default()), &EditAction::NewCard { id: 17 });
        let state = edit_card(&state, change(Some("Updated #1"), Some("Updated #2")));

        let updated = edit(
            &state,
            &EditAction::FinishSaveCard {
                form_id: FormId::Draft(17),
                card: card("abc", "Updated #1", "Updated #1"),
            },
        );
        assert_eq!(updated.form_id, FormId::from("abc"));
        assert_eq!(updated.card.id.as_deref(), Some("abc"));
        assert_eq!(updated.card.answer.as_deref(), Some("Updated #2"));
        assert_eq!(updated.dirty_fields, vec![CardField::Answer]);
    }

    #[test]
    fn test_finish_save_ignored_for_other_form_or_deleted() {
        let state = edit(&Arc::new(EditForm::default()), &EditAction::NewCard { id: 12 });
        let state = edit_card(&state, change(Some("Prompt"), None));
        let other = edit(
            &state,
            &EditAction::FinishSaveCard {
                form_id: FormId::Draft(13),
                card: card("def", "Prompt", ""),
            },
        );
        assert!(Arc::ptr_eq(&other, &state));

        let deleted = Arc::new(EditForm::not_found(FormId::from("abc"), true));
        let updated = edit(
            &deleted,
            &EditAction::FinishSaveCard {
                form_id: FormId::from("abc"),
                card: card("abc", "Prompt", ""),
            },
        );
        assert!(Arc::ptr_eq(&updated, &deleted));
    }

    #[test]
    fn test_fail_save_keeps_form_dirty() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let state = edit_card(&state, change(Some("Edited"), None));

        let updated = edit(
            &state,
            &EditAction::FailSaveCard {
                form_id: FormId::from("abc"),
                error: "Bad bad bad".into(),
            },
        );
        assert_eq!(updated.phase, EditPhase::Dirty);
        assert_eq!(updated.dirty_fields, vec![CardField::Question]);
        assert_eq!(updated.save_error.as_deref(), Some("Bad bad bad"));

        let other = edit(
            &state,
            &EditAction::FailSaveCard {
                form_id: FormId::from("def"),
                error: "Bad".into(),
            },
        );
        assert!(Arc::ptr_eq(&other, &state));
    }

    #[test]
    fn test_sync_keeps_dirty_fields() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let state = edit_card(&state, change(Some("Prompt A"), None));

        let updated = edit(
            &state,
            &EditAction::SyncEditCard {
                change: CardChange::updated(card("abc", "Prompt B", "Answer B")),
            },
        );
        assert_eq!(updated.card.question.as_deref(), Some("Prompt A"));
        assert_eq!(updated.card.answer.as_deref(), Some("Answer B"));
        assert_eq!(updated.dirty_fields, vec![CardField::Question]);
        assert_eq!(updated.phase, EditPhase::Dirty);
    }

    #[test]
    fn test_sync_other_card_is_ignored() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let updated = edit(
            &state,
            &EditAction::SyncEditCard {
                change: CardChange::updated(card("def", "Prompt B", "Answer B")),
            },
        );
        assert!(Arc::ptr_eq(&updated, &state));
    }

    #[test]
    fn test_sync_delete_marks_not_found() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let updated = edit(
            &state,
            &EditAction::SyncEditCard {
                change: CardChange::deleted("abc"),
            },
        );
        assert_eq!(*updated, EditForm::not_found(FormId::from("abc"), true));
    }

    #[test]
    fn test_delete_edit_card() {
        let state = ok_state(&card("abc", "Prompt", "Answer"));
        let updated = edit(
            &state,
            &EditAction::DeleteEditCard {
                form_id: FormId::from("abc"),
            },
        );
        assert_eq!(*updated, EditForm::not_found(FormId::from("abc"), true));

        let ignored = edit(
            &state,
            &EditAction::DeleteEditCard {
                form_id: FormId::from("def"),
            },
        );
        assert!(Arc::ptr_eq(&ignored, &state));
    }

    #[test]
    fn test_delete_unsaved_card_empties_form() {
        let state = edit(&Arc::new(EditForm::default()), &EditAction::NewCard { id: 89 });
        let state = edit_card(&state, change(Some("Prompt"), None));

        let updated = edit(
            &state,
            &EditAction::DeleteEditCard {
                form_id: FormId::Draft(89),
            },
        );
        assert_eq!(*updated, EditForm::with_phase(FormId::Draft(89), EditPhase::Empty));
    }
}
