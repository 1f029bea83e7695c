//! Durable backend adapter.
//!
//! Translates a [`WriteTransaction`] into one conditional multi-item commit
//! request and hands it to a [`TransactProvider`]. The provider guarantees
//! all-or-nothing application itself, so the adapter never rolls back.
//!
//! Stored item shape:
//!
//! ```text
//! { "key": S, "rawJson": <attribute value>, "strList": L<S> }
//! ```
//!
//! Operation groups map to item operations as follows:
//!
//! | group              | operation | condition                      |
//! |--------------------|-----------|--------------------------------|
//! | creates            | put       | `attribute_not_exists(#key)`   |
//! | str_list_creates   | put       | `attribute_not_exists(#key)`   |
//! | overwrites         | put       | `attribute_not_exists(#strList)` |
//! | set_fields         | update    | `attribute_exists(#json)`      |
//! | str_list_appends   | update    | `attribute_exists(#strList)`   |

mod attribute;
mod provider;
mod request;

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::{
    KeyValueStore, Precondition, RawRecord, RequestToken, StoreError, StoreResult, TxGroup,
    WriteTransaction,
};

pub use attribute::{
    from_attribute, from_string_list, string_list, to_attribute, AttributeValue, Item, JSON_ATTR,
    KEY_ATTR, STR_LIST_ATTR,
};
pub use provider::{
    CancellationReason, ProviderError, TransactProvider, MAX_BATCH_GET_KEYS, MAX_TOKEN_LEN,
    MAX_TRANSACT_ITEMS,
};
pub use request::{
    Condition, ExpressionBindings, Put, TransactWriteItem, TransactWriteRequest, Update,
    UpdateAction, UpdateExpression,
};

const KEY_NAME: &str = "#key";
const JSON_NAME: &str = "#json";
const STR_LIST_NAME: &str = "#strList";
const APPEND_ITEMS: &str = ":items";

/// Durable backend configuration.
#[derive(Debug, Clone)]
pub struct DurableConfig {
    /// Provider table holding every record.
    pub table: String,
    /// Longest request token the provider accepts.
    pub max_token_len: usize,
}

impl DurableConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            max_token_len: MAX_TOKEN_LEN,
        }
    }

    pub fn max_token_len(mut self, len: usize) -> Self {
        self.max_token_len = len;
        self
    }
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self::new("kvdb")
    }
}

/// A translated transaction: the request plus where each operation came from.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: TransactWriteRequest,
    /// `origins[i]` is the group and key that produced `request.items[i]`.
    pub origins: Vec<(TxGroup, String)>,
}

/// Store backed by a durable transactional provider.
pub struct DurableStore<P> {
    provider: P,
    config: DurableConfig,
}

impl<P: TransactProvider> DurableStore<P> {
    /// Create a store over a provider.
    pub fn new(provider: P, config: DurableConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    fn get_item(&self, key: &str) -> StoreResult<Option<Item>> {
        self.provider
            .get_item(&self.config.table, key)
            .map_err(|e| StoreError::backend(&format!("cannot read '{}' from database", key), e))
    }

    /// Translate a transaction into a provider request.
    ///
    /// Validation failures are reported before anything is sent.
    pub fn prepare(&self, tx: &WriteTransaction, token: RequestToken) -> StoreResult<PreparedRequest> {
        tx.validate()?;

        let mut items = Vec::new();
        let mut origins = Vec::new();

        for (key, value) in &tx.creates {
            let mut item = key_item(key);
            item.insert(JSON_ATTR.to_string(), to_attribute(value));
            items.push(put(item, Condition::AttributeNotExists(KEY_NAME.into()), KEY_NAME, KEY_ATTR));
            origins.push((TxGroup::Creates, key.clone()));
        }

        for key in tx.list_creates() {
            let mut item = key_item(key);
            item.insert(STR_LIST_ATTR.to_string(), string_list(&[]));
            items.push(put(item, Condition::AttributeNotExists(KEY_NAME.into()), KEY_NAME, KEY_ATTR));
            origins.push((TxGroup::StrListCreates, key.to_string()));
        }

        for (key, value) in &tx.overwrites {
            let mut item = key_item(key);
            item.insert(JSON_ATTR.to_string(), to_attribute(value));
            items.push(put(
                item,
                Condition::AttributeNotExists(STR_LIST_NAME.into()),
                STR_LIST_NAME,
                STR_LIST_ATTR,
            ));
            origins.push((TxGroup::Overwrites, key.clone()));
        }

        // an empty field map still carries the existence condition
        for (key, fields) in &tx.set_fields {
            items.push(set_fields_update(key, fields));
            origins.push((TxGroup::SetFields, key.clone()));
        }

        for (key, appended) in &tx.str_list_appends {
            items.push(append_update(key, appended));
            origins.push((TxGroup::StrListAppends, key.clone()));
        }

        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::Backend(format!(
                "transaction has {} operations, the provider accepts at most {}",
                items.len(),
                MAX_TRANSACT_ITEMS
            )));
        }

        let request = TransactWriteRequest {
            table: self.config.table.clone(),
            items,
            client_request_token: token.truncated(self.config.max_token_len).into_string(),
        };
        Ok(PreparedRequest { request, origins })
    }

    /// Map a provider failure back onto the transaction.
    fn commit_error(&self, err: ProviderError, origins: &[(TxGroup, String)]) -> StoreError {
        if let Some(index) = err.failed_condition() {
            if let Some((group, key)) = origins.get(index) {
                let reason = match group {
                    TxGroup::Creates | TxGroup::StrListCreates => Precondition::MustNotExist,
                    TxGroup::Overwrites => Precondition::KindConflict,
                    TxGroup::SetFields | TxGroup::StrListAppends => Precondition::MustExist,
                };
                return StoreError::precondition(key.as_str(), *group, reason);
            }
        }
        // a set_fields target that is not a JSON object
        if let ProviderError::TransactionCanceled { reasons } = &err {
            for (reason, (group, key)) in reasons.iter().zip(origins) {
                if let (CancellationReason::ValidationError(msg), TxGroup::SetFields) = (reason, group) {
                    return StoreError::decode(key.as_str(), msg);
                }
            }
        }
        StoreError::backend("failed to write to database", err)
    }
}

impl<P: TransactProvider> KeyValueStore for DurableStore<P> {
    fn has_key(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get_item(key)?.is_some())
    }

    fn get_json_value(&self, key: &str) -> StoreResult<Value> {
        let item = self.get_item(key)?.ok_or_else(|| StoreError::not_found(key))?;
        let raw = item.get(JSON_ATTR).ok_or_else(|| StoreError::not_found(key))?;
        from_attribute(raw).map_err(|e| with_key(e, key))
    }

    fn get_jsons(&self, keys: &[String]) -> StoreResult<Vec<RawRecord>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = keys.iter().filter(|k| seen.insert(k.as_str())).cloned().collect();

        let mut records = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(MAX_BATCH_GET_KEYS) {
            let items = self
                .provider
                .batch_get_item(&self.config.table, chunk)
                .map_err(|e| StoreError::backend("cannot fetch jsons from database", e))?;
            records.extend(items.into_iter().map(RawRecord::Attributes));
        }
        Ok(records)
    }

    fn get_string_list(&self, key: &str) -> StoreResult<Vec<String>> {
        let item = self.get_item(key)?.ok_or_else(|| StoreError::not_found(key))?;
        let raw = item.get(STR_LIST_ATTR).ok_or_else(|| StoreError::not_found(key))?;
        from_string_list(raw).map_err(|e| with_key(e, key))
    }

    fn execute_transaction(&self, tx: &WriteTransaction) -> StoreResult<()> {
        let prepared = self.prepare(tx, RequestToken::generate())?;
        if prepared.request.items.is_empty() {
            return Ok(());
        }

        let token = prepared.request.client_request_token.clone();
        debug!(
            target: "kvdb::durable",
            table = %self.config.table,
            token = %token,
            items = prepared.request.items.len(),
            "Submitting transaction"
        );

        match self.provider.transact_write_items(&prepared.request) {
            Ok(()) => {
                debug!(target: "kvdb::durable", token = %token, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(target: "kvdb::durable", token = %token, error = %e, "Transaction aborted");
                Err(self.commit_error(e, &prepared.origins))
            }
        }
    }

    fn decode_value(&self, raw: &RawRecord) -> StoreResult<Value> {
        let item = match raw {
            RawRecord::Attributes(item) => item,
            other => {
                return Err(StoreError::Decode {
                    key: None,
                    reason: format!("expected an attribute map, got {}", other.kind()),
                })
            }
        };
        let key = item.get(KEY_ATTR).and_then(AttributeValue::as_s).unwrap_or("?");
        let json = item
            .get(JSON_ATTR)
            .ok_or_else(|| StoreError::decode(key, format!("expected the record to contain '{}'", JSON_ATTR)))?;
        from_attribute(json).map_err(|e| with_key(e, key))
    }

    fn backend_name(&self) -> &'static str {
        "durable"
    }
}

impl<P> std::fmt::Debug for DurableStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("table", &self.config.table)
            .finish()
    }
}

fn key_item(key: &str) -> Item {
    let mut item = Item::new();
    item.insert(KEY_ATTR.to_string(), AttributeValue::S(key.to_string()));
    item
}

fn put(item: Item, condition: Condition, placeholder: &str, name: &str) -> TransactWriteItem {
    let mut bindings = ExpressionBindings::default();
    bindings.bind_name(placeholder, name);
    TransactWriteItem::Put(Put {
        item,
        condition: Some(condition),
        bindings,
    })
}

fn set_fields_update(key: &str, fields: &Map<String, Value>) -> TransactWriteItem {
    let mut bindings = ExpressionBindings::default();
    let json = bindings.bind_name(JSON_NAME, JSON_ATTR);

    let actions = fields
        .iter()
        .enumerate()
        .map(|(i, (field, value))| {
            let name = bindings.bind_name(format!("#f{}", i), field.as_str());
            let value = bindings.bind_value(format!(":v{}", i), to_attribute(value));
            UpdateAction::SetPath {
                path: vec![json.clone(), name],
                value,
            }
        })
        .collect();

    TransactWriteItem::Update(Update {
        key: key_item(key),
        expression: UpdateExpression { actions },
        condition: Some(Condition::AttributeExists(json)),
        bindings,
    })
}

fn append_update(key: &str, appended: &[String]) -> TransactWriteItem {
    let mut bindings = ExpressionBindings::default();
    let list = bindings.bind_name(STR_LIST_NAME, STR_LIST_ATTR);
    let value = bindings.bind_value(APPEND_ITEMS, string_list(appended));

    TransactWriteItem::Update(Update {
        key: key_item(key),
        expression: UpdateExpression {
            actions: vec![UpdateAction::ListAppend {
                attribute: list.clone(),
                value,
            }],
        },
        condition: Some(Condition::AttributeExists(list)),
        bindings,
    })
}

fn with_key(err: StoreError, key: &str) -> StoreError {
    match err {
        StoreError::Decode { key: None, reason } => StoreError::Decode {
            key: Some(key.to_string()),
            reason,
        },
        other => other,
    }
}
