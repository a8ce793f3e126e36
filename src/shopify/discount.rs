//! Customer-specific discount codes as the redemption side effect.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{user_errors, AdminClient, AdminError};
use crate::discount::{DiscountError, DiscountRequest, DiscountService, Result};

const DISCOUNT_CREATE_MUTATION: &str = r#"
mutation CreateLoyaltyDiscount($discount: DiscountCodeBasicInput!) {
  discountCodeBasicCreate(basicCodeDiscount: $discount) {
    codeDiscountNode { id }
    userErrors { field message }
  }
}"#;

const DISCOUNT_DELETE_MUTATION: &str = r#"
mutation DeleteLoyaltyDiscount($id: ID!) {
  discountCodeDelete(id: $id) {
    deletedCodeDiscountId
    userErrors { field message }
  }
}"#;

const DISCOUNT_BY_CODE_QUERY: &str = r#"
query LoyaltyDiscountByCode($code: String!) {
  codeDiscountNodeByCode(code: $code) { id }
}"#;

/// Codes carry a random suffix, so an existing node with the requested code
/// is one this service created on an earlier attempt.
pub struct ShopifyDiscountService {
    client: Arc<AdminClient>,
}

impl From<AdminError> for DiscountError {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::Rejected(msg) | AdminError::GraphQl(msg) => DiscountError::Rejected(msg),
            other => DiscountError::Unavailable(other.to_string()),
        }
    }
}

/// Fixed-amount, once-per-customer code restricted to one customer.
fn discount_input(request: &DiscountRequest) -> Value {
    json!({
        "title": format!("Loyalty Reward {}", request.code),
        "code": request.code,
        "startsAt": request.starts_at.to_rfc3339(),
        "endsAt": request.ends_at.to_rfc3339(),
        "customerSelection": {
            "customers": { "add": [request.customer.to_gid()] }
        },
        "customerGets": {
            "value": {
                "discountAmount": {
                    "amount": request.amount.to_string(),
                    "appliesOnEachItem": false
                }
            },
            "items": { "all": true }
        },
        "appliesOncePerCustomer": true,
        "usageLimit": 1
    })
}

impl ShopifyDiscountService {
    pub fn new(client: Arc<AdminClient>) -> Self {
        Self { client }
    }

    /// Id of the discount holding `code`, if any.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<String>> {
        let data = self
            .client
            .graphql(DISCOUNT_BY_CODE_QUERY, json!({ "code": code }))
            .await?;
        Ok(data
            .pointer("/codeDiscountNodeByCode/id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn submit_create(&self, request: &DiscountRequest) -> Result<String> {
        let data = self
            .client
            .graphql(
                DISCOUNT_CREATE_MUTATION,
                json!({ "discount": discount_input(request) }),
            )
            .await?;

        let payload = data
            .get("discountCodeBasicCreate")
            .ok_or_else(|| DiscountError::Unavailable("discountCodeBasicCreate missing".to_string()))?;
        if let Some(message) = user_errors(payload) {
            warn!(customer_id = %request.customer, code = %request.code, errors = %message, "Discount rejected");
            return Err(DiscountError::Rejected(message));
        }

        let id = payload
            .pointer("/codeDiscountNode/id")
            .and_then(Value::as_str)
            .ok_or_else(|| DiscountError::Unavailable("discount node id missing".to_string()))?;

        info!(customer_id = %request.customer, code = %request.code, discount_id = id, "Discount created");
        Ok(id.to_string())
    }

    /// Adopt the node an earlier attempt already committed, or return `failure`.
    async fn recover_committed(
        &self,
        request: &DiscountRequest,
        failure: DiscountError,
    ) -> Result<String> {
        match self.find_by_code(&request.code).await {
            Ok(Some(id)) => {
                warn!(
                    customer_id = %request.customer,
                    code = %request.code,
                    discount_id = %id,
                    error = %failure,
                    "Discount already committed, adopting it"
                );
                Ok(id)
            }
            Ok(None) => Err(failure),
            Err(e) => {
                warn!(code = %request.code, error = %e, "Discount lookup failed");
                Err(failure)
            }
        }
    }
}

/// Shopify's rejection for a code that is already in use.
fn is_duplicate_code(message: &str) -> bool {
    message.to_ascii_lowercase().contains("must be unique")
}

#[async_trait]
impl DiscountService for ShopifyDiscountService {
    /// Create is retried on transport failures, so an attempt whose response
    /// was lost can collide with itself. Both a duplicate-code rejection and
    /// exhausted retries resolve the code before reporting failure.
    async fn create_discount(&self, request: &DiscountRequest) -> Result<String> {
        match self.submit_create(request).await {
            Ok(id) => Ok(id),
            Err(DiscountError::Rejected(message)) if is_duplicate_code(&message) => {
                self.recover_committed(request, DiscountError::Rejected(message))
                    .await
            }
            Err(failure @ DiscountError::Unavailable(_)) => {
                self.recover_committed(request, failure).await
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_discount(&self, discount_id: &str) -> Result<()> {
        let data = self
            .client
            .graphql(DISCOUNT_DELETE_MUTATION, json!({ "id": discount_id }))
            .await?;

        let payload = data
            .get("discountCodeDelete")
            .ok_or_else(|| DiscountError::Unavailable("discountCodeDelete missing".to_string()))?;
        if let Some(message) = user_errors(payload) {
            return Err(DiscountError::Rejected(message));
        }

        info!(discount_id, "Discount deleted");
        Ok(())
    }
}
