//! Customer metafields as the ledger store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{user_errors, AdminClient, AdminError};
use crate::model::CustomerId;
use crate::store::{CustomerDirectory, FieldMap, FieldWrite, MetafieldStore, Result, StoreError};

const CUSTOMER_METAFIELDS_QUERY: &str = r#"
query CustomerMetafields($id: ID!, $namespace: String!) {
  customer(id: $id) {
    id
    metafields(first: 50, namespace: $namespace) {
      edges { node { key value } }
    }
  }
}"#;

const METAFIELDS_SET_MUTATION: &str = r#"
mutation SetLedgerFields($metafields: [MetafieldsSetInput!]!) {
  metafieldsSet(metafields: $metafields) {
    metafields { key }
    userErrors { field message }
  }
}"#;

const CUSTOMER_BY_EMAIL_QUERY: &str = r#"
query CustomerByEmail($query: String!) {
  customers(first: 1, query: $query) {
    edges { node { id email } }
  }
}"#;

pub struct ShopifyMetafieldStore {
    client: Arc<AdminClient>,
}

impl ShopifyMetafieldStore {
    pub fn new(client: Arc<AdminClient>) -> Self {
        Self { client }
    }
}

impl From<AdminError> for StoreError {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::Rejected(msg) | AdminError::GraphQl(msg) => StoreError::Validation(msg),
            AdminError::Malformed(msg) => StoreError::Malformed(msg),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Pick the requested keys out of a `customer.metafields` payload.
fn extract_fields(customer: &CustomerId, data: &Value, keys: &[&str]) -> Result<FieldMap> {
    let node = data
        .get("customer")
        .filter(|c| !c.is_null())
        .ok_or_else(|| StoreError::CustomerNotFound(customer.to_string()))?;

    let edges = node
        .pointer("/metafields/edges")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Malformed("customer.metafields.edges missing".to_string()))?;

    let mut fields = FieldMap::new();
    for edge in edges {
        let key = edge.pointer("/node/key").and_then(Value::as_str);
        let value = edge.pointer("/node/value").and_then(Value::as_str);
        if let (Some(key), Some(value)) = (key, value) {
            if keys.contains(&key) {
                fields.insert(key.to_string(), value.to_string());
            }
        }
    }
    Ok(fields)
}

/// Search expression matching one exact email address.
fn email_search(email: &str) -> String {
    let escaped = email.trim().replace('\\', "\\\\").replace('"', "\\\"");
    format!("email:\"{}\"", escaped)
}

fn metafield_inputs(owner_gid: &str, namespace: &str, writes: &[FieldWrite]) -> Value {
    Value::Array(
        writes
            .iter()
            .map(|w| {
                json!({
                    "ownerId": owner_gid,
                    "namespace": namespace,
                    "key": w.key,
                    "value": w.value,
                    "type": w.kind.as_str(),
                })
            })
            .collect(),
    )
}

#[async_trait]
impl MetafieldStore for ShopifyMetafieldStore {
    async fn get_fields(&self, customer: &CustomerId, keys: &[&str]) -> Result<FieldMap> {
        let data = self
            .client
            .graphql(
                CUSTOMER_METAFIELDS_QUERY,
                json!({ "id": customer.to_gid(), "namespace": self.client.namespace() }),
            )
            .await?;

        let fields = extract_fields(customer, &data, keys)?;
        debug!(customer_id = %customer, found = fields.len(), "Loaded metafields");
        Ok(fields)
    }

    async fn set_fields(&self, customer: &CustomerId, writes: Vec<FieldWrite>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let inputs = metafield_inputs(&customer.to_gid(), self.client.namespace(), &writes);
        let data = self
            .client
            .graphql(METAFIELDS_SET_MUTATION, json!({ "metafields": inputs }))
            .await?;

        let payload = data
            .get("metafieldsSet")
            .ok_or_else(|| StoreError::Malformed("metafieldsSet missing".to_string()))?;
        if let Some(message) = user_errors(payload) {
            warn!(customer_id = %customer, errors = %message, "metafieldsSet rejected");
            return Err(StoreError::Validation(message));
        }

        debug!(customer_id = %customer, count = writes.len(), "Metafields written");
        Ok(())
    }
}

#[async_trait]
impl CustomerDirectory for ShopifyMetafieldStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<CustomerId>> {
        let data = self
            .client
            .graphql(CUSTOMER_BY_EMAIL_QUERY, json!({ "query": email_search(email) }))
            .await?;

        let gid = data
            .pointer("/customers/edges/0/node/id")
            .and_then(Value::as_str);
        match gid {
            Some(gid) => CustomerId::parse(gid)
                .map(Some)
                .map_err(|_| StoreError::Malformed(format!("unexpected customer id {}", gid))),
            None => {
                debug!(email, "No customer with email");
                Ok(None)
            }
        }
    }
}
