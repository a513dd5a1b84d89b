//! redb table definitions for the instance ledger.
//!
//! Keys are `&str`, values `&[u8]` (JSON-serialized records). The instance
//! table key is `{owner_id}:{challenge_id}` — one slot per participant per
//! challenge.

use redb::TableDefinition;

/// Instance records keyed by `{owner_id}:{challenge_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
