//! Conditional write requests understood by a durable provider.
//!
//! Expressions are kept typed so a provider can evaluate them directly;
//! `Display` renders them in the provider's textual syntax for logs and
//! wire encodings. Attribute names never appear in expression text: they
//! are bound through `#name` placeholders, and values through `:value`
//! placeholders.

use std::collections::BTreeMap;
use std::fmt;

use crate::durable::attribute::{AttributeValue, Item, KEY_ATTR};

/// A condition on the item's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `attribute_exists(#name)`
    AttributeExists(String),
    /// `attribute_not_exists(#name)`
    AttributeNotExists(String),
}

impl Condition {
    /// The attribute-name placeholder the condition refers to.
    pub fn placeholder(&self) -> &str {
        match self {
            Condition::AttributeExists(name) | Condition::AttributeNotExists(name) => name,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::AttributeExists(name) => write!(f, "attribute_exists({})", name),
            Condition::AttributeNotExists(name) => write!(f, "attribute_not_exists({})", name),
        }
    }
}

/// One clause of a `SET` update expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    /// `#a.#b = :v` - set a (possibly nested) attribute path.
    SetPath { path: Vec<String>, value: String },
    /// `#a = list_append(#a, :v)` - extend a list attribute.
    ListAppend { attribute: String, value: String },
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateAction::SetPath { path, value } => write!(f, "{} = {}", path.join("."), value),
            UpdateAction::ListAppend { attribute, value } => {
                write!(f, "{0} = list_append({0}, {1})", attribute, value)
            }
        }
    }
}

/// A `SET` update expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateExpression {
    pub actions: Vec<UpdateAction>,
}

impl fmt::Display for UpdateExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self.actions.iter().map(ToString::to_string).collect();
        write!(f, "SET {}", clauses.join(", "))
    }
}

/// Placeholder bindings shared by puts and updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionBindings {
    /// `#placeholder` -> attribute name
    pub names: BTreeMap<String, String>,
    /// `:placeholder` -> value
    pub values: BTreeMap<String, AttributeValue>,
}

impl ExpressionBindings {
    /// Resolve a name placeholder. Names without a leading `#` are literal.
    pub fn name<'a>(&'a self, placeholder: &'a str) -> Option<&'a str> {
        if placeholder.starts_with('#') {
            self.names.get(placeholder).map(String::as_str)
        } else {
            Some(placeholder)
        }
    }

    /// Resolve a value placeholder.
    pub fn value(&self, placeholder: &str) -> Option<&AttributeValue> {
        self.values.get(placeholder)
    }

    /// Bind an attribute name and return its placeholder.
    pub fn bind_name(&mut self, placeholder: impl Into<String>, name: impl Into<String>) -> String {
        let placeholder = placeholder.into();
        self.names.insert(placeholder.clone(), name.into());
        placeholder
    }

    /// Bind a value and return its placeholder.
    pub fn bind_value(&mut self, placeholder: impl Into<String>, value: AttributeValue) -> String {
        let placeholder = placeholder.into();
        self.values.insert(placeholder.clone(), value);
        placeholder
    }
}

/// Replace a whole item.
#[derive(Debug, Clone, PartialEq)]
pub struct Put {
    pub item: Item,
    pub condition: Option<Condition>,
    pub bindings: ExpressionBindings,
}

/// Modify attributes of an item in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Primary key of the target item.
    pub key: Item,
    pub expression: UpdateExpression,
    pub condition: Option<Condition>,
    pub bindings: ExpressionBindings,
}

/// One item-level operation of a transactional write.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWriteItem {
    Put(Put),
    Update(Update),
}

impl TransactWriteItem {
    /// The record key this operation targets.
    pub fn key(&self) -> Option<&str> {
        let item = match self {
            TransactWriteItem::Put(put) => &put.item,
            TransactWriteItem::Update(update) => &update.key,
        };
        item.get(KEY_ATTR).and_then(AttributeValue::as_s)
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            TransactWriteItem::Put(put) => put.condition.as_ref(),
            TransactWriteItem::Update(update) => update.condition.as_ref(),
        }
    }

    pub fn bindings(&self) -> &ExpressionBindings {
        match self {
            TransactWriteItem::Put(put) => &put.bindings,
            TransactWriteItem::Update(update) => &update.bindings,
        }
    }
}

impl fmt::Display for TransactWriteItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key().unwrap_or("?");
        match self {
            TransactWriteItem::Put(_) => write!(f, "PUT {}", key)?,
            TransactWriteItem::Update(update) if update.expression.actions.is_empty() => {
                write!(f, "UPDATE {}", key)?
            }
            TransactWriteItem::Update(update) => write!(f, "UPDATE {} {}", key, update.expression)?,
        }
        if let Some(condition) = self.condition() {
            write!(f, " IF {}", condition)?;
        }
        Ok(())
    }
}

/// A batch of conditional writes committed all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactWriteRequest {
    pub table: String,
    pub items: Vec<TransactWriteItem>,
    /// Lets the provider recognize a retried submission.
    pub client_request_token: String,
}
