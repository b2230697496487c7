//! # Store
//!
//! Everything the handlers persist goes through [`Store`]. Two backends:
//!
//! - [`crate::database::RedisStore`] for deployments
//! - [`MemoryStore`] for tests and `STORE=memory` local runs
//!
//! Stock levels and customer dues only move through [`Store::record`],
//! [`Store::revise`] and [`Store::remove`], which write the transaction and
//! apply its [`Settlement`] as one atomic step. The `expected` argument makes
//! revise/remove conditional on nobody having changed the transaction since it
//! was read, so a bill deleted twice is only reversed once.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    ledger::Settlement,
    models::{BankAccount, Customer, Product, ResetTicket, Role, Transaction, TxnType, User},
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Corrupt number {value:?} in {key}")]
    CorruptNumber { key: String, value: String },

    #[error("{0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Optional filters for transaction listings.
#[derive(Debug, Clone, Default)]
pub struct TxnQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub txn_type: Option<TxnType>,
    pub customer_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl TxnQuery {
    pub fn matches(&self, txn: &Transaction) -> bool {
        self.from.is_none_or(|from| txn.date >= from)
            && self.to.is_none_or(|to| txn.date <= to)
            && self.txn_type.is_none_or(|t| txn.txn_type == t)
            && self.customer_id.is_none_or(|c| txn.customer_id == Some(c))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn save_user(&self, user: &User) -> StoreResult<()>;
    async fn user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn staff(&self, owner: Uuid) -> StoreResult<Vec<User>>;

    async fn put_reset(&self, ticket: &ResetTicket, ttl: Duration) -> StoreResult<()>;
    /// Expired tickets are never returned.
    async fn reset(&self, token: &str) -> StoreResult<Option<ResetTicket>>;
    async fn delete_reset(&self, token: &str) -> StoreResult<()>;

    async fn products(&self, owner: Uuid) -> StoreResult<Vec<Product>>;
    async fn product(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Product>>;
    /// Creates a product with its opening stock.
    async fn put_product(&self, product: &Product) -> StoreResult<()>;
    /// Replaces the catalog fields. The stored stock level is only overwritten
    /// when `qty` is given.
    async fn update_product(&self, product: &Product, qty: Option<Decimal>) -> StoreResult<()>;
    async fn delete_product(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;

    async fn customers(&self, owner: Uuid) -> StoreResult<Vec<Customer>>;
    async fn customer(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Customer>>;
    /// Creates a customer with the given opening due.
    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()>;
    /// Replaces the profile. The stored due is left alone.
    async fn update_customer(&self, customer: &Customer) -> StoreResult<()>;

    async fn bank_accounts(&self, owner: Uuid) -> StoreResult<Vec<BankAccount>>;
    async fn insert_bank_account(&self, account: &BankAccount) -> StoreResult<()>;

    async fn next_invoice_number(&self, owner: Uuid) -> StoreResult<u64>;
    async fn transactions(&self, owner: Uuid, query: &TxnQuery) -> StoreResult<Vec<Transaction>>;
    async fn transaction(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Transaction>>;

    /// Writes a new transaction and applies its movements.
    async fn record(&self, txn: &Transaction, settlement: &Settlement) -> StoreResult<()>;
    /// Replaces `expected` with `updated` and applies `settlement`.
    async fn revise(
        &self,
        expected: &Transaction,
        updated: &Transaction,
        settlement: &Settlement,
    ) -> StoreResult<()>;
    /// Deletes `expected` and applies `settlement`, usually its reversal.
    async fn remove(&self, expected: &Transaction, settlement: &Settlement) -> StoreResult<()>;
}

pub(crate) fn stale(id: Uuid) -> StoreError {
    StoreError::Conflict(format!("Transaction {id} was changed by someone else, reload and retry"))
}

#[derive(Default)]
struct Shop {
    products: HashMap<Uuid, Product>,
    customers: HashMap<Uuid, Customer>,
    accounts: HashMap<Uuid, BankAccount>,
    transactions: HashMap<Uuid, Transaction>,
    invoice_counter: u64,
}

impl Shop {
    fn apply(&mut self, settlement: &Settlement) {
        if let Some((id, delta)) = settlement.customer_due {
            if let Some(customer) = self.customers.get_mut(&id) {
                customer.total_due += delta;
            }
        }

        for (id, delta) in &settlement.stock {
            if let Some(product) = self.products.get_mut(id) {
                product.qty += *delta;
            }
        }
    }
}

#[derive(Default)]
struct Memory {
    users: HashMap<Uuid, User>,
    resets: HashMap<String, ResetTicket>,
    shops: HashMap<Uuid, Shop>,
}

/// Process-local store. One lock covers every shop, which keeps settlement
/// trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Memory>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut memory = self.inner.write();

        if memory.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("{} already registered", user.email)));
        }

        memory.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        self.inner.write().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn staff(&self, owner: Uuid) -> StoreResult<Vec<User>> {
        let mut staff: Vec<User> = self
            .inner
            .read()
            .users
            .values()
            .filter(|u| u.role == Role::Staff && u.owner_id == Some(owner))
            .cloned()
            .collect();
        staff.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(staff)
    }

    async fn put_reset(&self, ticket: &ResetTicket, _ttl: Duration) -> StoreResult<()> {
        self.inner
            .write()
            .resets
            .insert(ticket.token.clone(), ticket.clone());
        Ok(())
    }

    async fn reset(&self, token: &str) -> StoreResult<Option<ResetTicket>> {
        Ok(self
            .inner
            .read()
            .resets
            .get(token)
            .filter(|t| t.expires_at > Utc::now())
            .cloned())
    }

    async fn delete_reset(&self, token: &str) -> StoreResult<()> {
        self.inner.write().resets.remove(token);
        Ok(())
    }

    async fn products(&self, owner: Uuid) -> StoreResult<Vec<Product>> {
        Ok(self
            .inner
            .read()
            .shops
            .get(&owner)
            .map(|shop| shop.products.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn product(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self
            .inner
            .read()
            .shops
            .get(&owner)
            .and_then(|shop| shop.products.get(&id).cloned()))
    }

    async fn put_product(&self, product: &Product) -> StoreResult<()> {
        self.inner
            .write()
            .shops
            .entry(product.owner_id)
            .or_default()
            .products
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&self, product: &Product, qty: Option<Decimal>) -> StoreResult<()> {
        let mut memory = self.inner.write();
        let shop = memory.shops.entry(product.owner_id).or_default();

        let qty = qty
            .or_else(|| shop.products.get(&product.id).map(|p| p.qty))
            .unwrap_or(product.qty);

        shop.products.insert(
            product.id,
            Product {
                qty,
                ..product.clone()
            },
        );
        Ok(())
    }

    async fn delete_product(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        Ok(self
            .inner
            .write()
            .shops
            .get_mut(&owner)
            .and_then(|shop| shop.products.remove(&id))
            .is_some())
    }

    async fn customers(&self, owner: Uuid) -> StoreResult<Vec<Customer>> {
        Ok(self
            .inner
            .read()
            .shops
            .get(&owner)
            .map(|shop| shop.customers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn customer(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Customer>> {
        Ok(self
            .inner
            .read()
            .shops
            .get(&owner)
            .and_then(|shop| shop.customers.get(&id).cloned()))
    }

    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        self.inner
            .write()
            .shops
            .entry(customer.owner_id)
            .or_default()
            .customers
            .insert(customer.id, customer.clone());
        Ok(())
    }

    async fn update_customer(&self, customer: &Customer) -> StoreResult<()> {
        let mut memory = self.inner.write();
        let shop = memory.shops.entry(customer.owner_id).or_default();

        let total_due = shop
            .customers
            .get(&customer.id)
            .map(|c| c.total_due)
            .unwrap_or(Decimal::ZERO);

        shop.customers.insert(
            customer.id,
            Customer {
                total_due,
                ..customer.clone()
            },
        );
        Ok(())
    }

    async fn bank_accounts(&self, owner: Uuid) -> StoreResult<Vec<BankAccount>> {
        Ok(self
            .inner
            .read()
            .shops
            .get(&owner)
            .map(|shop| shop.accounts.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_bank_account(&self, account: &BankAccount) -> StoreResult<()> {
        self.inner
            .write()
            .shops
            .entry(account.owner_id)
            .or_default()
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }

    async fn next_invoice_number(&self, owner: Uuid) -> StoreResult<u64> {
        let mut memory = self.inner.write();
        let shop = memory.shops.entry(owner).or_default();
        shop.invoice_counter += 1;

        Ok(shop.invoice_counter)
    }

    async fn transactions(&self, owner: Uuid, query: &TxnQuery) -> StoreResult<Vec<Transaction>> {
        let memory = self.inner.read();
        let Some(shop) = memory.shops.get(&owner) else {
            return Ok(Vec::new());
        };

        let mut txns: Vec<Transaction> = shop
            .transactions
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        txns.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));

        if let Some(limit) = query.limit {
            txns.truncate(limit);
        }

        Ok(txns)
    }

    async fn transaction(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Transaction>> {
        Ok(self
            .inner
            .read()
            .shops
            .get(&owner)
            .and_then(|shop| shop.transactions.get(&id).cloned()))
    }

    async fn record(&self, txn: &Transaction, settlement: &Settlement) -> StoreResult<()> {
        let mut memory = self.inner.write();
        let shop = memory.shops.entry(txn.owner_id).or_default();

        if shop.transactions.contains_key(&txn.id) {
            return Err(StoreError::Conflict(format!("Transaction {} already exists", txn.id)));
        }

        shop.transactions.insert(txn.id, txn.clone());
        shop.apply(settlement);
        Ok(())
    }

    async fn revise(
        &self,
        expected: &Transaction,
        updated: &Transaction,
        settlement: &Settlement,
    ) -> StoreResult<()> {
        let mut memory = self.inner.write();
        let shop = memory.shops.entry(expected.owner_id).or_default();

        if shop.transactions.get(&expected.id) != Some(expected) {
            return Err(stale(expected.id));
        }

        shop.transactions.insert(updated.id, updated.clone());
        shop.apply(settlement);
        Ok(())
    }

    async fn remove(&self, expected: &Transaction, settlement: &Settlement) -> StoreResult<()> {
        let mut memory = self.inner.write();
        let shop = memory.shops.entry(expected.owner_id).or_default();

        if shop.transactions.get(&expected.id) != Some(expected) {
            return Err(stale(expected.id));
        }

        shop.transactions.remove(&expected.id);
        shop.apply(settlement);
        Ok(())
    }
}
