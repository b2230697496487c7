//! # Redis
//!
//! RAM database holding every shop.
//!
//! ## Layout
//!
//! Users are global, everything else lives under the owner's id.
//!
//! - `khaad:users` hash: user id to user JSON
//! - `khaad:users:email` hash: email to user id, `HSETNX` makes signup race free
//! - `khaad:staff:{owner}` set: staff user ids
//! - `khaad:reset:{token}` string with TTL: pending password reset
//! - `khaad:shop:{owner}:products` / `:customers` / `:accounts` / `:transactions` hashes: id to JSON
//! - `khaad:shop:{owner}:stock` hash: product id to quantity
//! - `khaad:shop:{owner}:dues` hash: customer id to outstanding due
//! - `khaad:shop:{owner}:ledger` sorted set: transaction ids scored by date in millis
//! - `khaad:shop:{owner}:invoice` counter
//!
//! ## Counters
//!
//! Stock and dues are kept out of the JSON documents so they can move with
//! `HINCRBYFLOAT` instead of read-modify-write. Reads merge them back in. Values
//! are decimal strings, which `HINCRBYFLOAT` accepts and returns as-is for the
//! two decimal places money needs.
//!
//! A transaction write and its stock/due movements run in one Lua script, so
//! either all of it lands or none of it does.
use std::{collections::HashMap, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use rust_decimal::Decimal;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;
use uuid::Uuid;

use crate::{
    ledger::Settlement,
    models::{BankAccount, Customer, Product, ResetTicket, Role, Transaction, User},
    store::{Store, StoreError, StoreResult, TxnQuery, stale},
};

const USERS: &str = "khaad:users";
const USER_EMAILS: &str = "khaad:users:email";

/// KEYS: transactions, ledger, stock, dues, products, customers
/// ARGV: id, expected JSON ('' = must not exist), new JSON ('' = delete), score,
/// customer id ('' = none), due delta, then product id / qty delta pairs
const SETTLE: &str = r"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if ARGV[2] == '' then
  if current then return 0 end
elseif current ~= ARGV[2] then
  return 0
end

if ARGV[3] == '' then
  redis.call('HDEL', KEYS[1], ARGV[1])
  redis.call('ZREM', KEYS[2], ARGV[1])
else
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
end

if ARGV[5] ~= '' and redis.call('HEXISTS', KEYS[6], ARGV[5]) == 1 then
  redis.call('HINCRBYFLOAT', KEYS[4], ARGV[5], ARGV[6])
end

for i = 7, #ARGV, 2 do
  if redis.call('HEXISTS', KEYS[5], ARGV[i]) == 1 then
    redis.call('HINCRBYFLOAT', KEYS[3], ARGV[i], ARGV[i + 1])
  end
end

return 1
";

pub async fn init_redis(redis_url: &str) -> StoreResult<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

pub struct RedisStore {
    connection: ConnectionManager,
    settle: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            settle: Script::new(SETTLE),
        }
    }

    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        Ok(Self::new(init_redis(redis_url).await?))
    }

    async fn write_ledger(
        &self,
        owner: Uuid,
        id: Uuid,
        expected: Option<&Transaction>,
        updated: Option<&Transaction>,
        settlement: &Settlement,
    ) -> StoreResult<bool> {
        let mut con = self.connection.clone();

        let expected = expected.map(to_json).transpose()?.unwrap_or_default();
        let new = updated.map(to_json).transpose()?.unwrap_or_default();
        let score = updated.map(|t| t.date.timestamp_millis()).unwrap_or_default();

        let mut invocation = self.settle.key(shop_key(owner, "transactions"));
        invocation
            .key(shop_key(owner, "ledger"))
            .key(shop_key(owner, "stock"))
            .key(shop_key(owner, "dues"))
            .key(shop_key(owner, "products"))
            .key(shop_key(owner, "customers"))
            .arg(id.to_string())
            .arg(expected)
            .arg(new)
            .arg(score);

        match settlement.customer_due {
            Some((customer, delta)) => invocation.arg(customer.to_string()).arg(delta.to_string()),
            None => invocation.arg("").arg("0"),
        };

        for (product, delta) in &settlement.stock {
            invocation.arg(product.to_string()).arg(delta.to_string());
        }

        let applied: i64 = invocation.invoke_async(&mut con).await?;
        debug!("Ledger script for {id} returned {applied}");

        Ok(applied == 1)
    }

    async fn documents<T: DeserializeOwned>(&self, key: String) -> StoreResult<Vec<T>> {
        let mut con = self.connection.clone();
        let raw: HashMap<String, String> = con.hgetall(key).await?;

        raw.values().map(|json| from_json(json)).collect()
    }

    async fn document<T: DeserializeOwned>(&self, key: String, id: Uuid) -> StoreResult<Option<T>> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.hget(key, id.to_string()).await?;

        raw.as_deref().map(from_json).transpose()
    }

    /// Documents whose numeric field lives in a side counter hash.
    async fn counted<T: DeserializeOwned>(
        &self,
        docs_key: String,
        counter_key: String,
        set: impl Fn(&mut T, Decimal),
    ) -> StoreResult<Vec<T>> {
        let mut con = self.connection.clone();
        let (docs, counters): (HashMap<String, String>, HashMap<String, String>) = redis::pipe()
            .hgetall(&docs_key)
            .hgetall(&counter_key)
            .query_async(&mut con)
            .await?;

        docs.iter()
            .map(|(id, json)| {
                let mut doc: T = from_json(json)?;
                if let Some(value) = counters.get(id) {
                    set(&mut doc, parse_decimal(&counter_key, value)?);
                }
                Ok(doc)
            })
            .collect()
    }

    async fn counted_one<T: DeserializeOwned>(
        &self,
        docs_key: String,
        counter_key: String,
        id: Uuid,
        set: impl Fn(&mut T, Decimal),
    ) -> StoreResult<Option<T>> {
        let mut con = self.connection.clone();
        let field = id.to_string();
        let (doc, counter): (Option<String>, Option<String>) = redis::pipe()
            .hget(&docs_key, &field)
            .hget(&counter_key, &field)
            .query_async(&mut con)
            .await?;

        let Some(json) = doc else {
            return Ok(None);
        };

        let mut doc: T = from_json(&json)?;
        if let Some(value) = counter {
            set(&mut doc, parse_decimal(&counter_key, &value)?);
        }

        Ok(Some(doc))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut con = self.connection.clone();

        let claimed: bool = con
            .hset_nx(USER_EMAILS, &user.email, user.id.to_string())
            .await?;
        if !claimed {
            return Err(StoreError::Conflict(format!("{} already registered", user.email)));
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(USERS, user.id.to_string(), to_json(user)?)
            .ignore();
        if let (Role::Staff, Some(owner)) = (user.role, user.owner_id) {
            pipe.sadd(staff_key(owner), user.id.to_string()).ignore();
        }
        pipe.query_async::<()>(&mut con).await?;

        Ok(())
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        let mut con = self.connection.clone();
        con.hset::<_, _, _, ()>(USERS, user.id.to_string(), to_json(user)?)
            .await?;

        Ok(())
    }

    async fn user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.document(USERS.to_string(), id).await
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let mut con = self.connection.clone();
        let id: Option<String> = con.hget(USER_EMAILS, email).await?;

        match id.and_then(|id| Uuid::parse_str(&id).ok()) {
            Some(id) => self.user(id).await,
            None => Ok(None),
        }
    }

    async fn staff(&self, owner: Uuid) -> StoreResult<Vec<User>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con.smembers(staff_key(owner)).await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut staff = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = con.hget(USERS, &id).await?;
            if let Some(json) = raw {
                staff.push(from_json::<User>(&json)?);
            }
        }
        staff.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(staff)
    }

    async fn put_reset(&self, ticket: &ResetTicket, ttl: Duration) -> StoreResult<()> {
        let mut con = self.connection.clone();
        con.set_ex::<_, _, ()>(reset_key(&ticket.token), to_json(ticket)?, ttl.as_secs().max(1))
            .await?;

        Ok(())
    }

    async fn reset(&self, token: &str) -> StoreResult<Option<ResetTicket>> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.get(reset_key(token)).await?;

        Ok(raw
            .as_deref()
            .map(from_json::<ResetTicket>)
            .transpose()?
            .filter(|t| t.expires_at > Utc::now()))
    }

    async fn delete_reset(&self, token: &str) -> StoreResult<()> {
        let mut con = self.connection.clone();
        con.del::<_, ()>(reset_key(token)).await?;

        Ok(())
    }

    async fn products(&self, owner: Uuid) -> StoreResult<Vec<Product>> {
        self.counted(shop_key(owner, "products"), shop_key(owner, "stock"), |p: &mut Product, qty| {
            p.qty = qty
        })
        .await
    }

    async fn product(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Product>> {
        self.counted_one(
            shop_key(owner, "products"),
            shop_key(owner, "stock"),
            id,
            |p: &mut Product, qty| p.qty = qty,
        )
        .await
    }

    async fn put_product(&self, product: &Product) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let field = product.id.to_string();

        redis::pipe()
            .atomic()
            .hset(shop_key(product.owner_id, "products"), &field, to_json(product)?)
            .ignore()
            .hset(shop_key(product.owner_id, "stock"), &field, product.qty.to_string())
            .ignore()
            .query_async::<()>(&mut con)
            .await?;

        Ok(())
    }

    async fn update_product(&self, product: &Product, qty: Option<Decimal>) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let field = product.id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(shop_key(product.owner_id, "products"), &field, to_json(product)?)
            .ignore();
        if let Some(qty) = qty {
            pipe.hset(shop_key(product.owner_id, "stock"), &field, qty.to_string())
                .ignore();
        }
        pipe.query_async::<()>(&mut con).await?;

        Ok(())
    }

    async fn delete_product(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut con = self.connection.clone();
        let field = id.to_string();

        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .hdel(shop_key(owner, "products"), &field)
            .hdel(shop_key(owner, "stock"), &field)
            .query_async(&mut con)
            .await?;

        Ok(removed > 0)
    }

    async fn customers(&self, owner: Uuid) -> StoreResult<Vec<Customer>> {
        self.counted(shop_key(owner, "customers"), shop_key(owner, "dues"), |c: &mut Customer, due| {
            c.total_due = due
        })
        .await
    }

    async fn customer(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Customer>> {
        self.counted_one(
            shop_key(owner, "customers"),
            shop_key(owner, "dues"),
            id,
            |c: &mut Customer, due| c.total_due = due,
        )
        .await
    }

    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let field = customer.id.to_string();

        redis::pipe()
            .atomic()
            .hset(shop_key(customer.owner_id, "customers"), &field, to_json(customer)?)
            .ignore()
            .hset(shop_key(customer.owner_id, "dues"), &field, customer.total_due.to_string())
            .ignore()
            .query_async::<()>(&mut con)
            .await?;

        Ok(())
    }

    async fn update_customer(&self, customer: &Customer) -> StoreResult<()> {
        let mut con = self.connection.clone();
        con.hset::<_, _, _, ()>(
            shop_key(customer.owner_id, "customers"),
            customer.id.to_string(),
            to_json(customer)?,
        )
        .await?;

        Ok(())
    }

    async fn bank_accounts(&self, owner: Uuid) -> StoreResult<Vec<BankAccount>> {
        self.documents(shop_key(owner, "accounts")).await
    }

    async fn insert_bank_account(&self, account: &BankAccount) -> StoreResult<()> {
        let mut con = self.connection.clone();
        con.hset::<_, _, _, ()>(
            shop_key(account.owner_id, "accounts"),
            account.id.to_string(),
            to_json(account)?,
        )
        .await?;

        Ok(())
    }

    async fn next_invoice_number(&self, owner: Uuid) -> StoreResult<u64> {
        let mut con = self.connection.clone();

        Ok(con.incr(shop_key(owner, "invoice"), 1u64).await?)
    }

    async fn transactions(&self, owner: Uuid, query: &TxnQuery) -> StoreResult<Vec<Transaction>> {
        let mut con = self.connection.clone();

        let max = query
            .to
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_else(|| "+inf".to_string());
        let min = query
            .from
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_else(|| "-inf".to_string());

        let ids: Vec<String> = con
            .zrevrangebyscore(shop_key(owner, "ledger"), max, min)
            .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(shop_key(owner, "transactions"))
            .arg(&ids)
            .query_async(&mut con)
            .await?;

        let mut txns = Vec::new();
        for json in raw.into_iter().flatten() {
            let txn: Transaction = from_json(&json)?;
            if query.matches(&txn) {
                txns.push(txn);
            }
            if query.limit.is_some_and(|limit| txns.len() >= limit) {
                break;
            }
        }

        Ok(txns)
    }

    async fn transaction(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Transaction>> {
        self.document(shop_key(owner, "transactions"), id).await
    }

    async fn record(&self, txn: &Transaction, settlement: &Settlement) -> StoreResult<()> {
        if !self
            .write_ledger(txn.owner_id, txn.id, None, Some(txn), settlement)
            .await?
        {
            return Err(StoreError::Conflict(format!("Transaction {} already exists", txn.id)));
        }

        Ok(())
    }

    async fn revise(
        &self,
        expected: &Transaction,
        updated: &Transaction,
        settlement: &Settlement,
    ) -> StoreResult<()> {
        if !self
            .write_ledger(expected.owner_id, expected.id, Some(expected), Some(updated), settlement)
            .await?
        {
            return Err(stale(expected.id));
        }

        Ok(())
    }

    async fn remove(&self, expected: &Transaction, settlement: &Settlement) -> StoreResult<()> {
        if !self
            .write_ledger(expected.owner_id, expected.id, Some(expected), None, settlement)
            .await?
        {
            return Err(stale(expected.id));
        }

        Ok(())
    }
}

fn shop_key(owner: Uuid, collection: &str) -> String {
    format!("khaad:shop:{owner}:{collection}")
}

fn staff_key(owner: Uuid) -> String {
    format!("khaad:staff:{owner}")
}

fn reset_key(token: &str) -> String {
    format!("khaad:reset:{token}")
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(json: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(json)?)
}

fn parse_decimal(key: &str, value: &str) -> StoreResult<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| StoreError::CorruptNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
}
