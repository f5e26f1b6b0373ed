//! Patch operation type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One patch operation targeting a pointer path within a document.
///
/// Matches the wire shape emitted by the server-side differ:
/// `{"op": "add", "path": "/items/-", "value": {...}}` and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert or overwrite the value at `path`.
    Add { path: String, value: Value },
    /// Delete the value at `path`.
    Remove { path: String },
    /// Overwrite the value at `path`; degrades to `add` when missing.
    Replace { path: String, value: Value },
    /// Remove the value at `from` and insert it at `path`.
    Move { from: String, path: String },
    /// Insert a deep clone of the value at `from` at `path`.
    Copy { from: String, path: String },
}

impl PatchOp {
    /// Target pointer of the operation.
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Replace { path, .. }
            | PatchOp::Move { path, .. }
            | PatchOp::Copy { path, .. } => path,
        }
    }

    /// Operation name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Remove { .. } => "remove",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Move { .. } => "move",
            PatchOp::Copy { .. } => "copy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_add() {
        let op: PatchOp =
            serde_json::from_value(json!({"op": "add", "path": "/a", "value": 1})).unwrap();
        assert_eq!(
            op,
            PatchOp::Add {
                path: "/a".into(),
                value: json!(1)
            }
        );
        assert_eq!(op.kind(), "add");
        assert_eq!(op.path(), "/a");
    }

    #[test]
    fn test_deserialize_move_and_copy() {
        let mv: PatchOp =
            serde_json::from_value(json!({"op": "move", "from": "/a", "path": "/b"})).unwrap();
        assert_eq!(
            mv,
            PatchOp::Move {
                from: "/a".into(),
                path: "/b".into()
            }
        );

        let cp: PatchOp =
            serde_json::from_value(json!({"op": "copy", "from": "/a", "path": "/b"})).unwrap();
        assert_eq!(cp.kind(), "copy");
    }

    #[test]
    fn test_unknown_op_rejected() {
        let res: Result<PatchOp, _> =
            serde_json::from_value(json!({"op": "test", "path": "/a", "value": 1}));
        assert!(res.is_err());
    }

    #[test]
    fn test_roundtrip() {
        let op = PatchOp::Replace {
            path: "/items/0/name".into(),
            value: json!("beta"),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "replace");
        let back: PatchOp = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
