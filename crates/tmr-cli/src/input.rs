//! JSON description of a transaction for `tmr commit`.
//!
//! ```json
//! {
//!   "objects": [
//!     { "id": "0000000000000000", "content": "root",
//!       "children": [ { "name": "docs", "id": "0000000000000001" },
//!                     { "name": "stats", "transient": "computed" } ] },
//!     { "id": "0000000000000001", "content": "docs" }
//!   ]
//! }
//! ```

use anyhow::Context;
use serde::Deserialize;
use tmr_store::ObjectState;
use tmr_types::ObjectId;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TxnFile {
    objects: Vec<ObjectJson>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ObjectJson {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    children: Vec<ChildJson>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChildJson {
    Persistent { name: String, id: String },
    Transient { name: String, transient: String },
}

/// Parse a transaction file into object states, in file order.
pub fn parse_txn(json: &str) -> anyhow::Result<Vec<(ObjectId, ObjectState)>> {
    let file: TxnFile = serde_json::from_str(json).context("invalid transaction file")?;
    anyhow::ensure!(!file.objects.is_empty(), "transaction file lists no objects");

    file.objects
        .into_iter()
        .map(|object| -> anyhow::Result<(ObjectId, ObjectState)> {
            let id = parse_id(&object.id)?;
            let mut state = ObjectState::new(object.content.into_bytes());
            for child in object.children {
                state = match child {
                    ChildJson::Persistent { name, id } => state.with_child(name, parse_id(&id)?),
                    ChildJson::Transient { name, transient } => {
                        state.with_transient(name, transient.into_bytes())
                    }
                };
            }
            Ok((id, state))
        })
        .collect()
}

fn parse_id(hex: &str) -> anyhow::Result<ObjectId> {
    ObjectId::from_hex(hex).with_context(|| format!("invalid object id {hex:?}"))
}
