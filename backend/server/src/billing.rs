//! # Billing
//!
//! Turns a counter's draft into a stored transaction: find or create the
//! customer, pin each line to a catalog product, settle the money in
//! [`crate::ledger`], then let the store book document and movements together.
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::Session,
    error::{AppError, AppResult},
    ledger::{self, PaymentDraft, Settlement, TransactionDraft},
    models::{Customer, Payment, Product, Transaction, TxnType},
    resolve::{match_customer, split_display_name},
    store::{Store, TxnQuery},
    utils::{day_range, sanitize},
};

/// Query string of the transaction listing. Dates are `YYYY-MM-DD` and inclusive.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub txn_type: Option<String>,
    pub limit: Option<usize>,
}

impl ListParams {
    pub fn to_query(&self) -> TxnQuery {
        let from = self.start_date.map(|d| day_range(d, d).0);
        let to = self.end_date.map(|d| day_range(d, d).1);

        let txn_type = match self.txn_type.as_deref().map(str::to_uppercase).as_deref() {
            Some("SALE") => Some(TxnType::Sale),
            Some("PURCHASE") => Some(TxnType::Purchase),
            Some("PAYMENT") => Some(TxnType::Payment),
            Some("EXPENSE") => Some(TxnType::Expense),
            _ => None,
        };

        TxnQuery {
            from,
            to,
            txn_type,
            customer_id: None,
            limit: self.limit,
        }
    }
}

/// Later payments against an open bill.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PaymentUpdate {
    pub payments: Vec<PaymentDraft>,
    pub description: Option<String>,
    pub date: Option<chrono::DateTime<Utc>>,
}

/// Strict stock lookup for a bill line: id, then name and company, then name.
pub fn find_stock<'a>(
    products: &'a [Product],
    id: Option<Uuid>,
    name: &str,
    company: &str,
) -> Option<&'a Product> {
    if let Some(found) = id.and_then(|id| products.iter().find(|p| p.id == id)) {
        return Some(found);
    }

    let name = sanitize(name);
    if name.is_empty() {
        return None;
    }
    let company = sanitize(company);

    products
        .iter()
        .find(|p| sanitize(&p.item_name) == name && sanitize(&p.company) == company)
        .or_else(|| products.iter().find(|p| sanitize(&p.item_name) == name))
}

pub async fn create_transaction(
    store: &dyn Store,
    session: &Session,
    mut draft: TransactionDraft,
) -> AppResult<Transaction> {
    let owner = session.owner_id;
    let now = Utc::now();

    let customer = resolve_customer(store, owner, &draft).await?;
    let products = store.products(owner).await?;

    let mut items = Vec::with_capacity(draft.items.len());
    for item in &mut draft.items {
        let (name, company) = split_display_name(&item.item_name, &item.company);
        if name.is_empty() && item.product_id.is_none() {
            continue;
        }

        let product = find_stock(&products, item.product_id, &name, &company);
        item.item_name = name;
        item.company = company;
        items.push(ledger::price_item(item, product));
    }

    let bill = ledger::settle_bill(&draft, items, now)?;
    check_accounts(store, owner, bill.bank_account_id, &bill.payments).await?;

    let invoice_number = match draft.txn_type {
        TxnType::Sale => Some(store.next_invoice_number(owner).await?),
        _ => None,
    };

    let customer_name = customer
        .as_ref()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| draft.customer_name.trim().to_string());

    let txn = Transaction {
        id: Uuid::new_v4(),
        owner_id: owner,
        created_by: session.user_id,
        date: draft.date.unwrap_or(now),
        txn_type: draft.txn_type,
        customer_name,
        customer_id: customer.map(|c| c.id),
        items: bill.items,
        labour_charges: bill.labour_charges,
        total_amount: bill.total_amount,
        paid_amount: bill.paid_amount,
        due_amount: bill.due_amount,
        payment_mode: bill.payment_mode,
        bank_account_id: bill.bank_account_id,
        payer_name: bill.payer_name,
        payments: bill.payments,
        description: draft.description.trim().to_string(),
        vehicle_number: draft.vehicle_number.trim().to_string(),
        is_delivered: draft.is_delivered.unwrap_or(true),
        invoice_number,
        created_at: now,
    };

    let settlement = Settlement::of(&txn);
    store.record(&txn, &settlement).await?;

    info!(
        "Recorded {} {} for shop {owner}: total {}, paid {}, due {}, {} stock moves",
        txn.txn_type.as_str(),
        txn.id,
        txn.total_amount,
        txn.paid_amount,
        txn.due_amount,
        settlement.stock.len()
    );

    Ok(txn)
}

pub async fn list_transactions(
    store: &dyn Store,
    session: &Session,
    params: &ListParams,
) -> AppResult<Vec<Transaction>> {
    Ok(store.transactions(session.owner_id, &params.to_query()).await?)
}

pub async fn customer_transactions(
    store: &dyn Store,
    session: &Session,
    customer_id: Uuid,
) -> AppResult<Vec<Transaction>> {
    if store.customer(session.owner_id, customer_id).await?.is_none() {
        return Err(AppError::NotFound("Customer not found"));
    }

    let query = TxnQuery {
        customer_id: Some(customer_id),
        ..Default::default()
    };

    Ok(store.transactions(session.owner_id, &query).await?)
}

pub async fn add_payments(
    store: &dyn Store,
    session: &Session,
    id: Uuid,
    mut update: PaymentUpdate,
) -> AppResult<Transaction> {
    let owner = session.owner_id;
    let txn = store
        .transaction(owner, id)
        .await?
        .ok_or(AppError::NotFound("Transaction not found"))?;

    for row in &mut update.payments {
        row.date = row.date.or(update.date);
    }

    let (mut updated, settlement) = ledger::apply_payments(&txn, &update.payments, Utc::now())?;
    check_accounts(store, owner, None, &updated.payments[txn.payments.len()..]).await?;

    if let Some(description) = update.description.as_deref().map(str::trim) {
        if !description.is_empty() {
            updated.description = description.to_string();
        }
    }

    store.revise(&txn, &updated, &settlement).await?;

    info!(
        "Added {} payment(s) to {} {id} for shop {owner}: due {} -> {}",
        update.payments.len(),
        txn.txn_type.as_str(),
        txn.due_amount,
        updated.due_amount
    );

    Ok(updated)
}

pub async fn delete_transaction(store: &dyn Store, session: &Session, id: Uuid) -> AppResult<()> {
    session.require_owner("Only owner can delete transactions")?;

    let txn = store
        .transaction(session.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("Transaction not found"))?;

    let reversal = Settlement::of(&txn).reversed();
    store.remove(&txn, &reversal).await?;

    info!(
        "Deleted {} {id} for shop {}, reversed {} stock moves",
        txn.txn_type.as_str(),
        session.owner_id,
        reversal.stock.len()
    );

    Ok(())
}

async fn resolve_customer(
    store: &dyn Store,
    owner: Uuid,
    draft: &TransactionDraft,
) -> AppResult<Option<Customer>> {
    if let Some(id) = draft.customer_id {
        return store
            .customer(owner, id)
            .await?
            .map(Some)
            .ok_or(AppError::NotFound("Customer not found"));
    }

    let name = draft.customer_name.trim();
    if name.is_empty() {
        return Ok(None);
    }

    let customers = store.customers(owner).await?;
    if let Some(found) = match_customer(name, &customers) {
        return Ok(Some(found.clone()));
    }

    match draft.txn_type {
        TxnType::Sale | TxnType::Payment => {
            let now = Utc::now();
            let customer = Customer {
                id: Uuid::new_v4(),
                owner_id: owner,
                name: name.to_string(),
                mobile: String::new(),
                address: String::new(),
                gst_number: String::new(),
                dealer_id: String::new(),
                total_due: rust_decimal::Decimal::ZERO,
                created_at: now,
                updated_at: now,
            };
            store.insert_customer(&customer).await?;

            info!("Created customer {} ({name}) for shop {owner} while billing", customer.id);
            Ok(Some(customer))
        }
        TxnType::Purchase | TxnType::Expense => Ok(None),
    }
}

/// Every account a payment names must belong to the shop.
async fn check_accounts(
    store: &dyn Store,
    owner: Uuid,
    bill_account: Option<Uuid>,
    payments: &[Payment],
) -> AppResult<()> {
    let wanted: Vec<Uuid> = bill_account
        .into_iter()
        .chain(payments.iter().filter_map(|p| p.bank_account_id))
        .collect();

    if wanted.is_empty() {
        return Ok(());
    }

    let accounts = store.bank_accounts(owner).await?;
    match wanted.iter().find(|id| !accounts.iter().any(|a| a.id == **id)) {
        Some(_) => Err(AppError::BadRequest("Bank account not found".to_string())),
        None => Ok(()),
    }
}
