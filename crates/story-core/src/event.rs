use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of entity a change event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Story,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Emitted by a store after each committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub op: ChangeOp,
    pub ids: Vec<Uuid>,
}

impl ChangeEvent {
    pub fn story(op: ChangeOp, ids: Vec<Uuid>) -> Self {
        Self {
            kind: EntityKind::Story,
            op,
            ids,
        }
    }

    pub fn tag(op: ChangeOp, id: Uuid) -> Self {
        Self {
            kind: EntityKind::Tag,
            op,
            ids: vec![id],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        let id = Uuid::new_v4();
        let e = ChangeEvent::story(ChangeOp::Insert, vec![id]);
        assert_eq!(e.kind, EntityKind::Story);
        assert_eq!(e.ids, vec![id]);

        let e = ChangeEvent::tag(ChangeOp::Delete, id);
        assert_eq!(e.kind, EntityKind::Tag);
        assert_eq!(e.op, ChangeOp::Delete);
    }

    #[test]
    fn event_serde_round_trip() {
        let e = ChangeEvent::story(ChangeOp::Update, vec![Uuid::new_v4(), Uuid::new_v4()]);
        let json = serde_json::to_string(&e).unwrap();
        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }
}
