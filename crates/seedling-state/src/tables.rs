//! redb table definitions for the Seedling state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Index tables map a unique attribute to a user ID.

use redb::TableDefinition;

/// Installation records keyed by `{owner_id}/{service_key}`.
pub const INSTALLATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("installations");

/// User records keyed by user ID.
pub const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Username → user ID.
pub const USERNAMES: TableDefinition<&str, u64> = TableDefinition::new("usernames");

/// Lowercased email → user ID.
pub const EMAILS: TableDefinition<&str, u64> = TableDefinition::new("emails");

/// Lifecycle events keyed by `{owner_id:020}:{sequence:020}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

/// Monotonic counters (`next_user_id`, `next_event_seq`).
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
