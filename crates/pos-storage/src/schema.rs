use crate::adapter::{CollectionDef, DocumentStore, Upgrade};
use crate::StorageError;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DB_NAME: &str = "personal-os";

/// v1: day cycle, journal, blocks, templates. v2: finance and gatekeeper.
/// v3: vault snapshots keyed by day.
pub const SCHEMA_VERSION: i64 = 3;

pub const SETTINGS: &str = "settings";
pub const JOURNAL_ENTRIES: &str = "journalEntries";
pub const CALENDAR_BLOCKS: &str = "calendarBlocks";
pub const DAY_TEMPLATES: &str = "dayTemplates";
pub const FINANCE_CATEGORIES: &str = "financeCategories";
pub const FINANCE_TRANSACTIONS: &str = "financeTransactions";
pub const GATEKEEPER_ITEMS: &str = "gatekeeperItems";

pub const VAULT_SNAPSHOTS: &str = "vaultSnapshots";
/// Used when `vaultSnapshots` already exists with a different key.
pub const VAULT_SNAPSHOTS_FALLBACK: &str = "vaultSnapshotsByDay";
pub const VAULT_KEY_PATH: &str = "dayKey";

/// Every name the vault collection may live under.
pub const VAULT_NAMES: [&str; 2] = [VAULT_SNAPSHOTS, VAULT_SNAPSHOTS_FALLBACK];

/// Layout decisions made while opening, handed to whoever needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLayout {
    pub version: i64,
    pub vault: String,
}

fn base_collections() -> Vec<CollectionDef> {
    vec![
        CollectionDef::keyed(SETTINGS, "id"),
        CollectionDef::keyed(JOURNAL_ENTRIES, "date"),
        CollectionDef::auto(CALENDAR_BLOCKS).indexed(&["date"]),
        CollectionDef::auto(DAY_TEMPLATES),
        CollectionDef::auto(FINANCE_CATEGORIES).indexed(&["type"]),
        CollectionDef::auto(FINANCE_TRANSACTIONS).indexed(&["month", "date", "categoryId"]),
        CollectionDef::auto(GATEKEEPER_ITEMS).indexed(&[
            "status",
            "unlockAt",
            "createdAt",
            "categoryId",
        ]),
    ]
}

/// Ensures every collection and index exists and picks the authoritative
/// vault collection. Safe to run on every open.
pub fn migrate(up: &Upgrade<'_>) -> Result<String, StorageError> {
    let mut created = 0;
    for def in base_collections() {
        created += usize::from(up.ensure_collection(&def)?);
    }
    debug!(
        event = "schema_migrate",
        from = up.old_version(),
        to = up.new_version(),
        created
    );
    resolve_vault(up)
}

fn resolve_vault(up: &Upgrade<'_>) -> Result<String, StorageError> {
    let primary = up.collection(VAULT_SNAPSHOTS)?;
    let fallback = up.collection(VAULT_SNAPSHOTS_FALLBACK)?;

    match (primary, fallback) {
        (Some(primary), _) if primary.key_path == VAULT_KEY_PATH => Ok(VAULT_SNAPSHOTS.to_string()),
        (Some(primary), fallback) => {
            if let Some(fallback) = &fallback {
                if fallback.key_path != VAULT_KEY_PATH {
                    return Err(StorageError::SchemaConflict(format!(
                        "{VAULT_SNAPSHOTS_FALLBACK} is keyed by {}, expected {VAULT_KEY_PATH}",
                        fallback.key_path
                    )));
                }
            } else {
                up.ensure_collection(&CollectionDef::keyed(
                    VAULT_SNAPSHOTS_FALLBACK,
                    VAULT_KEY_PATH,
                ))?;
                warn!(
                    event = "vault_fallback_collection",
                    legacy = VAULT_SNAPSHOTS,
                    legacy_key_path = %primary.key_path,
                    authoritative = VAULT_SNAPSHOTS_FALLBACK
                );
            }
            Ok(VAULT_SNAPSHOTS_FALLBACK.to_string())
        }
        (None, Some(fallback)) if fallback.key_path == VAULT_KEY_PATH => {
            Ok(VAULT_SNAPSHOTS_FALLBACK.to_string())
        }
        (None, _) => {
            up.ensure_collection(&CollectionDef::keyed(VAULT_SNAPSHOTS, VAULT_KEY_PATH))?;
            Ok(VAULT_SNAPSHOTS.to_string())
        }
    }
}

/// Opens the application store at `path` (in memory for `None`) at
/// [`SCHEMA_VERSION`].
pub fn open_store(path: Option<&Path>) -> Result<(DocumentStore, SchemaLayout), StorageError> {
    let mut vault = String::new();
    let store = DocumentStore::open(path, SCHEMA_VERSION, |up| {
        vault = migrate(up)?;
        Ok(())
    })?;
    info!(event = "store_open", version = SCHEMA_VERSION, vault = %vault);
    Ok((
        store,
        SchemaLayout {
            version: SCHEMA_VERSION,
            vault,
        },
    ))
}
