//! Dashboard numbers, the dues list and the day book.
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    models::{Customer, PaymentMode, Product, Transaction, TxnType},
    utils::start_of_today,
};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub today_sales: Decimal,
    pub total_due: Decimal,
    pub low_stock_count: usize,
    pub total_products: usize,
}

pub fn dashboard_stats(
    txns: &[Transaction],
    customers: &[Customer],
    products: &[Product],
) -> DashboardStats {
    let since = start_of_today();

    DashboardStats {
        today_sales: txns
            .iter()
            .filter(|t| t.txn_type == TxnType::Sale && t.date >= since)
            .map(|t| t.total_amount)
            .sum(),
        total_due: customers.iter().map(|c| c.total_due).sum(),
        low_stock_count: products.iter().filter(|p| p.is_low_stock()).count(),
        total_products: products.len(),
    }
}

/// Customers who owe money, largest due first.
pub fn dues(mut customers: Vec<Customer>) -> Vec<Customer> {
    customers.retain(|c| c.total_due > Decimal::ZERO);
    customers.sort_by(|a, b| b.total_due.cmp(&a.total_due).then_with(|| a.name.cmp(&b.name)));
    customers
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayBook {
    pub total_sales: Decimal,
    pub total_purchase: Decimal,
    pub total_expenses: Decimal,
    /// Money received in cash from sales and customer payments.
    pub total_cash: Decimal,
    /// Money received online from sales and customer payments.
    pub total_online: Decimal,
    /// Received minus expenses.
    pub net_collection: Decimal,
    pub transaction_count: usize,
}

pub fn day_book(txns: &[Transaction]) -> DayBook {
    let mut book = DayBook {
        transaction_count: txns.len(),
        ..Default::default()
    };

    for txn in txns {
        match txn.txn_type {
            TxnType::Sale => book.total_sales += txn.total_amount,
            TxnType::Purchase => {
                book.total_purchase += txn.total_amount;
                continue;
            }
            TxnType::Expense => {
                book.total_expenses += txn.total_amount;
                continue;
            }
            TxnType::Payment => {}
        }

        let (cash, online) = collected(txn);
        book.total_cash += cash;
        book.total_online += online;
    }

    book.net_collection = book.total_cash + book.total_online - book.total_expenses;
    book
}

/// Cash and online parts of what a transaction brought in. Split rows count
/// under their own mode; older documents without rows fall back to the header.
fn collected(txn: &Transaction) -> (Decimal, Decimal) {
    if txn.payments.is_empty() {
        return match txn.payment_mode {
            PaymentMode::Online => (Decimal::ZERO, txn.paid_amount),
            PaymentMode::Cash | PaymentMode::Split => (txn.paid_amount, Decimal::ZERO),
        };
    }

    txn.payments
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(cash, online), p| match p.mode {
            PaymentMode::Online => (cash, online + p.amount),
            PaymentMode::Cash | PaymentMode::Split => (cash + p.amount, online),
        })
}

pub const CSV_HEADERS: [&str; 7] = ["Date", "Type", "Customer", "Amount", "Paid", "Due", "Payment Mode"];

pub fn export_csv(txns: &[Transaction]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS)?;

    for txn in txns {
        writer.write_record([
            txn.date.format("%Y-%m-%d").to_string(),
            txn.txn_type.as_str().to_string(),
            txn.customer_name.clone(),
            txn.total_amount.to_string(),
            txn.paid_amount.to_string(),
            txn.due_amount.to_string(),
            txn.payment_mode.as_str().to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
