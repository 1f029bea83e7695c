//! A durable transactional provider backed by a Git repository.
//!
//! Every accepted write request becomes exactly one commit on `main`, so a
//! request is visible entirely or not at all. Conditions are evaluated
//! against the current `main` snapshot while the commit lock is held.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::durable::{
    AttributeValue, CancellationReason, Condition, ExpressionBindings, Item, ProviderError,
    TransactProvider, TransactWriteItem, TransactWriteRequest, UpdateAction, KEY_ATTR,
    MAX_BATCH_GET_KEYS, MAX_TOKEN_LEN, MAX_TRANSACT_ITEMS,
};
use crate::storage::commit::CommitMessage;
use crate::storage::error::StorageResult;
use crate::storage::repository::GitRepository;
use crate::storage::types::{ItemKey, TableName};

/// How long a request token is remembered.
pub const TOKEN_WINDOW_MINUTES: i64 = 10;

/// [`TransactProvider`] over a [`GitRepository`].
pub struct GitProvider {
    repo: GitRepository,
    commit_lock: Mutex<()>,
    token_window: Duration,
}

impl GitProvider {
    pub fn new(repo: GitRepository) -> Self {
        Self {
            repo,
            commit_lock: Mutex::new(()),
            token_window: Duration::minutes(TOKEN_WINDOW_MINUTES),
        }
    }

    /// Open the repository at `path`, initializing it if needed.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self::new(GitRepository::open_or_init(path)?))
    }

    /// Change how long request tokens are remembered.
    pub fn token_window(mut self, window: Duration) -> Self {
        self.token_window = window;
        self
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }
}

impl TransactProvider for GitProvider {
    fn get_item(&self, table: &str, key: &str) -> Result<Option<Item>, ProviderError> {
        let table = table_name(table)?;
        let head = self.repo.head()?;
        Ok(self.repo.read_item(&table, &ItemKey::new(key), head)?)
    }

    fn batch_get_item(&self, table: &str, keys: &[String]) -> Result<Vec<Item>, ProviderError> {
        if keys.len() > MAX_BATCH_GET_KEYS {
            return Err(ProviderError::Validation(format!(
                "too many keys requested: {} (limit {})",
                keys.len(),
                MAX_BATCH_GET_KEYS
            )));
        }
        let table = table_name(table)?;
        let keys: Vec<ItemKey> = keys.iter().map(ItemKey::new).collect();
        let head = self.repo.head()?;
        Ok(self.repo.read_items(&table, &keys, head)?)
    }

    fn transact_write_items(&self, request: &TransactWriteRequest) -> Result<(), ProviderError> {
        let table = table_name(&request.table)?;
        let token = request.client_request_token.as_str();
        validate_request(request)?;
        let ops = request
            .items
            .iter()
            .map(ResolvedOp::resolve)
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.commit_lock.lock();
        let head = self.repo.head()?;

        let since = Utc::now() - self.token_window;
        if let Some(commit) = self.repo.find_token_since(token, head, since)? {
            debug!(
                target: "kvdb::storage",
                token,
                commit = %commit.short(),
                "Request already committed"
            );
            return Ok(());
        }

        let mut reasons = Vec::with_capacity(ops.len());
        let mut writes = Vec::with_capacity(ops.len());
        for op in ops {
            let current = self.repo.read_item(&table, &op.key, head)?;
            match op.evaluate(current) {
                Ok(item) => {
                    reasons.push(CancellationReason::None);
                    writes.push((op.key, item));
                }
                Err(reason) => reasons.push(reason),
            }
        }

        if reasons.iter().any(|r| *r != CancellationReason::None) {
            warn!(
                target: "kvdb::storage",
                token,
                table = %table,
                "Transaction canceled"
            );
            return Err(ProviderError::TransactionCanceled { reasons });
        }

        let message = CommitMessage::transact(&table, writes.len(), token);
        self.repo.commit_items(&table, &writes, head, message)?;
        Ok(())
    }
}

impl std::fmt::Debug for GitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitProvider")
            .field("repo", &self.repo)
            .field("token_window", &self.token_window)
            .finish()
    }
}

fn table_name(name: &str) -> Result<TableName, ProviderError> {
    TableName::new(name).map_err(|e| ProviderError::Validation(format!("table '{}': {}", name, e)))
}

fn validate_request(request: &TransactWriteRequest) -> Result<(), ProviderError> {
    if request.items.is_empty() || request.items.len() > MAX_TRANSACT_ITEMS {
        return Err(ProviderError::Validation(format!(
            "a transaction must contain between 1 and {} operations, got {}",
            MAX_TRANSACT_ITEMS,
            request.items.len()
        )));
    }

    let token_len = request.client_request_token.chars().count();
    if token_len == 0 || token_len > MAX_TOKEN_LEN {
        return Err(ProviderError::Validation(format!(
            "request token must be 1 to {} characters, got {}",
            MAX_TOKEN_LEN, token_len
        )));
    }

    let mut seen = HashSet::new();
    for item in &request.items {
        if let Some(key) = item.key() {
            if !seen.insert(key) {
                return Err(ProviderError::Validation(format!(
                    "transaction cannot include multiple operations on one item: '{}'",
                    key
                )));
            }
        }
    }
    Ok(())
}

/// A condition with its attribute name resolved.
enum ResolvedCondition {
    Exists(String),
    NotExists(String),
}

impl ResolvedCondition {
    fn holds(&self, current: Option<&Item>) -> bool {
        let has = |name: &str| current.is_some_and(|item| item.contains_key(name));
        match self {
            ResolvedCondition::Exists(name) => has(name),
            ResolvedCondition::NotExists(name) => !has(name),
        }
    }
}

enum ResolvedAction {
    SetPath { path: Vec<String>, value: AttributeValue },
    ListAppend { attribute: String, value: AttributeValue },
}

enum Operation {
    Put(Item),
    Update(Vec<ResolvedAction>),
}

/// One write operation with every placeholder substituted.
struct ResolvedOp {
    key: ItemKey,
    condition: Option<ResolvedCondition>,
    operation: Operation,
}

impl ResolvedOp {
    fn resolve(item: &TransactWriteItem) -> Result<Self, ProviderError> {
        let key = item
            .key()
            .map(ItemKey::new)
            .ok_or_else(|| ProviderError::Validation(format!("operation has no string '{}' attribute", KEY_ATTR)))?;
        let bindings = item.bindings();

        let condition = item
            .condition()
            .map(|condition| -> Result<_, ProviderError> {
                let name = resolve_name(bindings, condition.placeholder())?;
                Ok(match condition {
                    Condition::AttributeExists(_) => ResolvedCondition::Exists(name),
                    Condition::AttributeNotExists(_) => ResolvedCondition::NotExists(name),
                })
            })
            .transpose()?;

        let operation = match item {
            TransactWriteItem::Put(put) => Operation::Put(put.item.clone()),
            TransactWriteItem::Update(update) => {
                let mut actions = Vec::with_capacity(update.expression.actions.len());
                for action in &update.expression.actions {
                    actions.push(match action {
                        UpdateAction::SetPath { path, value } => ResolvedAction::SetPath {
                            path: path
                                .iter()
                                .map(|p| resolve_name(bindings, p))
                                .collect::<Result<_, _>>()?,
                            value: resolve_value(bindings, value)?,
                        },
                        UpdateAction::ListAppend { attribute, value } => ResolvedAction::ListAppend {
                            attribute: resolve_name(bindings, attribute)?,
                            value: resolve_value(bindings, value)?,
                        },
                    });
                }
                Operation::Update(actions)
            }
        };

        Ok(Self {
            key,
            condition,
            operation,
        })
    }

    /// Check the condition against `current` and compute the new item.
    fn evaluate(&self, current: Option<Item>) -> Result<Item, CancellationReason> {
        if let Some(condition) = &self.condition {
            if !condition.holds(current.as_ref()) {
                return Err(CancellationReason::ConditionalCheckFailed);
            }
        }

        match &self.operation {
            Operation::Put(item) => Ok(item.clone()),
            Operation::Update(actions) => {
                let mut item = current.unwrap_or_else(|| {
                    let mut item = Item::new();
                    item.insert(KEY_ATTR.to_string(), AttributeValue::S(self.key.as_str().to_string()));
                    item
                });
                for action in actions {
                    apply_action(&mut item, action).map_err(CancellationReason::ValidationError)?;
                }
                Ok(item)
            }
        }
    }
}

fn resolve_name(bindings: &ExpressionBindings, placeholder: &str) -> Result<String, ProviderError> {
    bindings
        .name(placeholder)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Validation(format!("unresolved attribute name {}", placeholder)))
}

fn resolve_value(bindings: &ExpressionBindings, placeholder: &str) -> Result<AttributeValue, ProviderError> {
    bindings
        .value(placeholder)
        .cloned()
        .ok_or_else(|| ProviderError::Validation(format!("unresolved attribute value {}", placeholder)))
}

fn apply_action(item: &mut Item, action: &ResolvedAction) -> Result<(), String> {
    match action {
        ResolvedAction::SetPath { path, value } => set_path(item, path, value.clone()),
        ResolvedAction::ListAppend { attribute, value } => {
            let appended = match value {
                AttributeValue::L(values) => values,
                other => return Err(format!("list_append operand is a {}, not a list", other.type_tag())),
            };
            match item.get_mut(attribute) {
                Some(AttributeValue::L(list)) => {
                    list.extend(appended.iter().cloned());
                    Ok(())
                }
                Some(other) => Err(format!("attribute '{}' is a {}, not a list", attribute, other.type_tag())),
                None => Err(format!("attribute '{}' does not exist", attribute)),
            }
        }
    }
}

fn set_path(item: &mut Item, path: &[String], value: AttributeValue) -> Result<(), String> {
    let (last, parents) = path.split_last().ok_or("empty document path")?;
    if path.len() == 1 && last == KEY_ATTR {
        return Err("cannot update the key attribute".to_string());
    }

    let mut map: &mut BTreeMap<String, AttributeValue> = item;
    for name in parents {
        map = match map.get_mut(name) {
            Some(AttributeValue::M(inner)) => inner,
            Some(other) => {
                return Err(format!("document path '{}' is a {}, not a map", name, other.type_tag()))
            }
            None => return Err(format!("document path '{}' does not exist", name)),
        };
    }
    map.insert(last.clone(), value);
    Ok(())
}
