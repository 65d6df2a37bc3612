//! Account lookup against the core banking system.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use vop_protocol::{AccountStatus, AccountType};

#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub iban: String,
    pub account_holder: String,
    pub account_type: AccountType,
    pub status: AccountStatus,
}

#[async_trait]
pub trait AccountLookup: Send + Sync {
    async fn find_by_iban(&self, iban: &str) -> anyhow::Result<Option<AccountRecord>>;
}

pub struct PgAccountLookup {
    pool: Arc<PgPool>,
}

impl PgAccountLookup {
    pub fn new(pool: Arc<PgPool>) -> Self {
        PgAccountLookup { pool }
    }
}

#[async_trait]
impl AccountLookup for PgAccountLookup {
    async fn find_by_iban(&self, iban: &str) -> anyhow::Result<Option<AccountRecord>> {
        let row = sqlx::query(
            r#"
            SELECT acc.iban, cust.customer_name, acc.account_type, acc.account_status
            FROM accounts acc
            JOIN customers cust ON acc.customer_id = cust.customer_id
            WHERE acc.iban = $1
            "#,
        )
        .bind(iban)
        .fetch_optional(self.pool.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(AccountRecord {
            iban: row.try_get("iban")?,
            account_holder: row.try_get("customer_name")?,
            account_type: parse_account_type(row.try_get("account_type")?),
            status: parse_account_status(row.try_get("account_status")?),
        }))
    }
}

fn parse_account_type(value: String) -> AccountType {
    match value.as_str() {
        "BUSINESS" => AccountType::Business,
        _ => AccountType::Personal,
    }
}

fn parse_account_status(value: String) -> AccountStatus {
    match value.as_str() {
        "INACTIVE" => AccountStatus::Inactive,
        "CLOSED" => AccountStatus::Closed,
        "BLOCKED" => AccountStatus::Blocked,
        _ => AccountStatus::Active,
    }
}

/// In-memory account book for tests and local runs.
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: AccountRecord) {
        self.accounts
            .write()
            .await
            .insert(record.iban.clone(), record);
    }
}

#[async_trait]
impl AccountLookup for InMemoryAccounts {
    async fn find_by_iban(&self, iban: &str) -> anyhow::Result<Option<AccountRecord>> {
        Ok(self.accounts.read().await.get(iban).cloned())
    }
}
