//! # Settlement
//!
//! Pure arithmetic behind a bill: line amounts, totals, split payments, dues and
//! the stock/due movements a transaction causes. Nothing in here touches the
//! store, so the same rules apply to every backend.
//!
//! ## Movements
//!
//! | type     | stock          | customer due |
//! |----------|----------------|--------------|
//! | SALE     | `-qty` per item | `+due`       |
//! | PURCHASE | `+qty` per item | none         |
//! | PAYMENT  | none           | `-paid`      |
//! | EXPENSE  | none           | none         |
//!
//! Deleting a transaction books [`Settlement::reversed`] of what it booked.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::{LineItem, Payment, PaymentMode, Product, Transaction, TxnType},
    utils::blank_uuid,
};

/// Slack allowed when comparing money typed by hand against computed totals.
pub const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    #[error("{0} cannot be negative")]
    Negative(&'static str),

    #[error("Payment amount must be greater than zero")]
    NonPositivePayment,

    #[error("Split payment needs at least one payment row")]
    EmptySplit,

    #[error("Payment rows must be CASH or ONLINE")]
    NestedSplit,

    #[error("Please select a bank account for online payments")]
    MissingBankAccount,

    #[error("Paid amount {paid} exceeds bill total {total}")]
    Overpaid { paid: Decimal, total: Decimal },

    #[error("Total exceeds remaining due ({due})")]
    ExceedsDue { due: Decimal },

    #[error("Only sale or purchase bills carry a due")]
    NotABill,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    #[serde(default, deserialize_with = "blank_uuid")]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub qty: Decimal,
    pub rate: Option<Decimal>,
    pub amount: Option<Decimal>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDraft {
    #[serde(default)]
    pub mode: PaymentMode,
    pub amount: Decimal,
    #[serde(default, deserialize_with = "blank_uuid")]
    pub bank_account_id: Option<Uuid>,
    #[serde(default)]
    pub payer_name: String,
    pub date: Option<DateTime<Utc>>,
}

/// A bill as submitted by the counter, before any of it is trusted.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    #[serde(rename = "type", default)]
    pub txn_type: TxnType,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default, deserialize_with = "blank_uuid")]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<ItemDraft>,
    pub labour_charges: Option<Decimal>,
    pub total_amount: Option<Decimal>,
    pub paid_amount: Option<Decimal>,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    #[serde(default, deserialize_with = "blank_uuid")]
    pub bank_account_id: Option<Uuid>,
    #[serde(default)]
    pub payer_name: String,
    #[serde(default)]
    pub payments: Vec<PaymentDraft>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vehicle_number: String,
    pub is_delivered: Option<bool>,
    pub date: Option<DateTime<Utc>>,
}

/// Money side of a transaction once the draft has been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Bill {
    pub items: Vec<LineItem>,
    pub labour_charges: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_amount: Decimal,
    pub payment_mode: PaymentMode,
    pub bank_account_id: Option<Uuid>,
    pub payer_name: String,
    pub payments: Vec<Payment>,
}

/// Prices one line. The catalog rate fills in a missing rate; a given amount is
/// only used when there is no rate at all.
pub fn price_item(item: &ItemDraft, product: Option<&Product>) -> LineItem {
    let rate = item.rate.or_else(|| product.map(|p| p.rate));

    let (rate, amount) = match (rate, item.amount) {
        (Some(rate), _) => (rate, (item.qty * rate).round_dp(2)),
        (None, Some(amount)) if !item.qty.is_zero() => ((amount / item.qty).round_dp(2), amount),
        (None, Some(amount)) => (Decimal::ZERO, amount),
        (None, None) => (Decimal::ZERO, Decimal::ZERO),
    };

    LineItem {
        product_id: product.map(|p| p.id),
        item_name: product
            .map(|p| p.item_name.clone())
            .unwrap_or_else(|| item.item_name.trim().to_string()),
        company: product
            .map(|p| p.company.clone())
            .unwrap_or_else(|| item.company.trim().to_string()),
        qty: item.qty,
        rate,
        amount,
    }
}

/// Checks a draft and works out totals, paid and due.
pub fn settle_bill(
    draft: &TransactionDraft,
    items: Vec<LineItem>,
    now: DateTime<Utc>,
) -> Result<Bill, LedgerError> {
    for item in &items {
        non_negative(item.qty, "Quantity")?;
        non_negative(item.rate, "Rate")?;
        non_negative(item.amount, "Amount")?;
    }

    let labour = draft.labour_charges.unwrap_or_default();
    non_negative(labour, "Labour charges")?;
    non_negative(draft.total_amount.unwrap_or_default(), "Total amount")?;
    non_negative(draft.paid_amount.unwrap_or_default(), "Paid amount")?;

    let (items, labour) = match draft.txn_type {
        TxnType::Sale | TxnType::Purchase => (items, labour),
        TxnType::Payment | TxnType::Expense => (Vec::new(), Decimal::ZERO),
    };

    let total = match draft.txn_type {
        TxnType::Sale | TxnType::Purchase if !items.is_empty() => {
            items.iter().map(|i| i.amount).sum::<Decimal>() + labour
        }
        TxnType::Sale | TxnType::Purchase | TxnType::Expense => {
            draft.total_amount.unwrap_or_default()
        }
        TxnType::Payment => Decimal::ZERO,
    };

    let (payment_mode, payments) = if draft.payment_mode == PaymentMode::Split {
        (PaymentMode::Split, split_rows(&draft.payments, now)?)
    } else {
        let paid = match draft.txn_type {
            TxnType::Expense => draft.paid_amount.unwrap_or(total),
            _ => draft.paid_amount.unwrap_or_default(),
        };
        let row = PaymentDraft {
            mode: draft.payment_mode,
            amount: paid,
            bank_account_id: draft.bank_account_id,
            payer_name: draft.payer_name.clone(),
            date: draft.date,
        };

        let rows = if paid.is_zero() {
            Vec::new()
        } else {
            vec![payment_row(&row, now)?]
        };

        (draft.payment_mode, rows)
    };

    let paid: Decimal = payments.iter().map(|p| p.amount).sum();

    if draft.txn_type == TxnType::Payment && paid <= Decimal::ZERO {
        return Err(LedgerError::NonPositivePayment);
    }

    let due = if draft.txn_type.is_bill() {
        if paid > total + TOLERANCE {
            return Err(LedgerError::Overpaid { paid, total });
        }
        (total - paid).max(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    let (bank_account_id, payer_name) = match payment_mode {
        PaymentMode::Online => (draft.bank_account_id, draft.payer_name.trim().to_string()),
        _ => (None, String::new()),
    };

    Ok(Bill {
        items,
        labour_charges: labour,
        total_amount: total,
        paid_amount: paid,
        due_amount: due,
        payment_mode,
        bank_account_id,
        payer_name,
        payments,
    })
}

/// Applies later payments against an outstanding bill. Returns the updated
/// transaction and the movement it causes.
pub fn apply_payments(
    txn: &Transaction,
    rows: &[PaymentDraft],
    now: DateTime<Utc>,
) -> Result<(Transaction, Settlement), LedgerError> {
    if !txn.txn_type.is_bill() {
        return Err(LedgerError::NotABill);
    }

    let rows = split_rows(rows, now)?;
    let paying: Decimal = rows.iter().map(|p| p.amount).sum();

    if paying > txn.due_amount + TOLERANCE {
        return Err(LedgerError::ExceedsDue {
            due: txn.due_amount,
        });
    }

    let mut updated = txn.clone();
    let new_due = (txn.due_amount - paying).max(Decimal::ZERO);
    let cleared = txn.due_amount - new_due;

    updated.payments.extend(rows);
    updated.paid_amount += paying;
    updated.due_amount = new_due;
    updated.payment_mode = mode_of(&updated.payments);

    if updated.payment_mode != PaymentMode::Online {
        updated.bank_account_id = None;
        updated.payer_name.clear();
    } else if let Some(last) = updated.payments.last() {
        updated.bank_account_id = last.bank_account_id;
        updated.payer_name = last.payer_name.clone();
    }

    let settlement = match (txn.txn_type, txn.customer_id) {
        (TxnType::Sale, Some(customer)) if !cleared.is_zero() => Settlement {
            customer_due: Some((customer, -cleared)),
            stock: Vec::new(),
        },
        _ => Settlement::default(),
    };

    Ok((updated, settlement))
}

/// Stock and due movements caused by a stored transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settlement {
    pub customer_due: Option<(Uuid, Decimal)>,
    pub stock: Vec<(Uuid, Decimal)>,
}

impl Settlement {
    pub fn of(txn: &Transaction) -> Self {
        let stock_sign = match txn.txn_type {
            TxnType::Sale => Decimal::NEGATIVE_ONE,
            TxnType::Purchase => Decimal::ONE,
            TxnType::Payment | TxnType::Expense => Decimal::ZERO,
        };

        let mut stock: Vec<(Uuid, Decimal)> = Vec::new();
        if !stock_sign.is_zero() {
            for item in &txn.items {
                let Some(product_id) = item.product_id else {
                    continue;
                };

                match stock.iter_mut().find(|(id, _)| *id == product_id) {
                    Some((_, delta)) => *delta += item.qty * stock_sign,
                    None => stock.push((product_id, item.qty * stock_sign)),
                }
            }
        }
        stock.retain(|(_, delta)| !delta.is_zero());

        let due = match txn.txn_type {
            TxnType::Sale => txn.due_amount,
            TxnType::Payment => -txn.paid_amount,
            TxnType::Purchase | TxnType::Expense => Decimal::ZERO,
        };

        let customer_due = txn
            .customer_id
            .filter(|_| !due.is_zero())
            .map(|customer| (customer, due));

        Self {
            customer_due,
            stock,
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            customer_due: self.customer_due.map(|(id, delta)| (id, -delta)),
            stock: self.stock.iter().map(|(id, delta)| (*id, -*delta)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.customer_due.is_none() && self.stock.is_empty()
    }
}

fn non_negative(value: Decimal, what: &'static str) -> Result<(), LedgerError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(LedgerError::Negative(what));
    }

    Ok(())
}

fn split_rows(rows: &[PaymentDraft], now: DateTime<Utc>) -> Result<Vec<Payment>, LedgerError> {
    if rows.is_empty() {
        return Err(LedgerError::EmptySplit);
    }

    rows.iter()
        .map(|row| {
            if row.amount <= Decimal::ZERO {
                return Err(LedgerError::NonPositivePayment);
            }
            payment_row(row, now)
        })
        .collect()
}

fn payment_row(row: &PaymentDraft, now: DateTime<Utc>) -> Result<Payment, LedgerError> {
    match row.mode {
        PaymentMode::Split => Err(LedgerError::NestedSplit),
        PaymentMode::Online if row.bank_account_id.is_none() => {
            Err(LedgerError::MissingBankAccount)
        }
        PaymentMode::Online => Ok(Payment {
            mode: PaymentMode::Online,
            amount: row.amount,
            bank_account_id: row.bank_account_id,
            payer_name: row.payer_name.trim().to_string(),
            date: row.date.unwrap_or(now),
        }),
        PaymentMode::Cash => Ok(Payment {
            mode: PaymentMode::Cash,
            amount: row.amount,
            bank_account_id: None,
            payer_name: String::new(),
            date: row.date.unwrap_or(now),
        }),
    }
}

fn mode_of(payments: &[Payment]) -> PaymentMode {
    let mut modes = payments.iter().map(|p| p.mode);

    match modes.next() {
        None => PaymentMode::Cash,
        Some(first) if modes.all(|m| m == first) => first,
        Some(_) => PaymentMode::Split,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn item(qty: Decimal, rate: Decimal, product_id: Option<Uuid>) -> LineItem {
        LineItem {
            product_id,
            item_name: "Urea".into(),
            company: "IPL".into(),
            qty,
            rate,
            amount: qty * rate,
        }
    }

    fn sale(items: Vec<LineItem>, bill: &Bill, customer_id: Option<Uuid>) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            date: now,
            txn_type: TxnType::Sale,
            customer_name: "Raju".into(),
            customer_id,
            items,
            labour_charges: bill.labour_charges,
            total_amount: bill.total_amount,
            paid_amount: bill.paid_amount,
            due_amount: bill.due_amount,
            payment_mode: bill.payment_mode,
            bank_account_id: bill.bank_account_id,
            payer_name: bill.payer_name.clone(),
            payments: bill.payments.clone(),
            description: String::new(),
            vehicle_number: String::new(),
            is_delivered: true,
            invoice_number: Some(1),
            created_at: now,
        }
    }

    #[test]
    fn rate_comes_from_catalog_when_missing() {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            item_name: "DAP".into(),
            company: "Kisan".into(),
            qty: dec!(40),
            rate: dec!(1350),
            unit: "Bag".into(),
            low_stock_threshold: dec!(10),
            created_at: now,
            updated_at: now,
        };
        let draft = ItemDraft {
            item_name: "dap".into(),
            qty: dec!(2),
            amount: Some(dec!(1)),
            ..Default::default()
        };

        let line = price_item(&draft, Some(&product));

        assert_eq!(line.product_id, Some(product.id));
        assert_eq!(line.item_name, "DAP");
        assert_eq!(line.rate, dec!(1350));
        assert_eq!(line.amount, dec!(2700));
    }

    #[test]
    fn amount_without_rate_back_fills_rate() {
        let draft = ItemDraft {
            item_name: "Neem Khali".into(),
            qty: dec!(4),
            amount: Some(dec!(1000)),
            ..Default::default()
        };

        let line = price_item(&draft, None);

        assert_eq!(line.rate, dec!(250));
        assert_eq!(line.amount, dec!(1000));
        assert!(line.product_id.is_none());
    }

    #[test]
    fn sale_total_includes_labour_and_due_is_remainder() {
        let draft = TransactionDraft {
            labour_charges: Some(dec!(50)),
            paid_amount: Some(dec!(2000)),
            total_amount: Some(dec!(1)),
            ..Default::default()
        };
        let items = vec![item(dec!(10), dec!(266.5), None)];

        let bill = settle_bill(&draft, items, Utc::now()).unwrap();

        assert_eq!(bill.total_amount, dec!(2715));
        assert_eq!(bill.paid_amount, dec!(2000));
        assert_eq!(bill.due_amount, dec!(715));
        assert_eq!(bill.payments.len(), 1);
        assert_eq!(bill.payments[0].mode, PaymentMode::Cash);
    }

    #[test]
    fn overpaying_a_bill_is_rejected() {
        let draft = TransactionDraft {
            paid_amount: Some(dec!(6000)),
            ..Default::default()
        };
        let items = vec![item(dec!(10), dec!(500), None)];

        let err = settle_bill(&draft, items, Utc::now()).unwrap_err();

        assert_eq!(
            err,
            LedgerError::Overpaid {
                paid: dec!(6000),
                total: dec!(5000)
            }
        );
    }

    #[test]
    fn udhaar_sale_leaves_everything_due() {
        let draft = TransactionDraft::default();
        let items = vec![item(dec!(20), dec!(1350), None)];

        let bill = settle_bill(&draft, items, Utc::now()).unwrap();

        assert_eq!(bill.paid_amount, Decimal::ZERO);
        assert_eq!(bill.due_amount, dec!(27000));
        assert!(bill.payments.is_empty());
    }

    #[test]
    fn split_payment_sums_rows_and_requires_accounts() {
        let account = Uuid::new_v4();
        let mut draft = TransactionDraft {
            payment_mode: PaymentMode::Split,
            payments: vec![
                PaymentDraft {
                    mode: PaymentMode::Cash,
                    amount: dec!(1000),
                    bank_account_id: Some(account),
                    payer_name: "ignored".into(),
                    date: None,
                },
                PaymentDraft {
                    mode: PaymentMode::Online,
                    amount: dec!(1500),
                    bank_account_id: Some(account),
                    payer_name: " Raju ".into(),
                    date: None,
                },
            ],
            ..Default::default()
        };
        let items = vec![item(dec!(10), dec!(300), None)];

        let bill = settle_bill(&draft, items.clone(), Utc::now()).unwrap();

        assert_eq!(bill.payment_mode, PaymentMode::Split);
        assert_eq!(bill.paid_amount, dec!(2500));
        assert_eq!(bill.due_amount, dec!(500));
        assert_eq!(bill.payments[0].bank_account_id, None);
        assert_eq!(bill.payments[1].payer_name, "Raju");
        assert_eq!(bill.bank_account_id, None);

        draft.payments[1].bank_account_id = None;
        assert_eq!(
            settle_bill(&draft, items.clone(), Utc::now()).unwrap_err(),
            LedgerError::MissingBankAccount
        );

        draft.payments.clear();
        assert_eq!(
            settle_bill(&draft, items, Utc::now()).unwrap_err(),
            LedgerError::EmptySplit
        );
    }

    #[test]
    fn online_payment_without_account_is_rejected() {
        let draft = TransactionDraft {
            payment_mode: PaymentMode::Online,
            paid_amount: Some(dec!(100)),
            ..Default::default()
        };

        let err = settle_bill(&draft, vec![item(dec!(1), dec!(100), None)], Utc::now());

        assert_eq!(err.unwrap_err(), LedgerError::MissingBankAccount);
    }

    #[test]
    fn payment_has_no_total_or_due() {
        let draft = TransactionDraft {
            txn_type: TxnType::Payment,
            total_amount: Some(dec!(999)),
            paid_amount: Some(dec!(2000)),
            ..Default::default()
        };

        let bill = settle_bill(&draft, Vec::new(), Utc::now()).unwrap();

        assert_eq!(bill.total_amount, Decimal::ZERO);
        assert_eq!(bill.paid_amount, dec!(2000));
        assert_eq!(bill.due_amount, Decimal::ZERO);

        let empty = TransactionDraft {
            txn_type: TxnType::Payment,
            ..Default::default()
        };
        assert_eq!(
            settle_bill(&empty, Vec::new(), Utc::now()).unwrap_err(),
            LedgerError::NonPositivePayment
        );
    }

    #[test]
    fn negative_inputs_are_rejected() {
        let draft = TransactionDraft {
            labour_charges: Some(dec!(-5)),
            ..Default::default()
        };

        assert_eq!(
            settle_bill(&draft, Vec::new(), Utc::now()).unwrap_err(),
            LedgerError::Negative("Labour charges")
        );
    }

    #[test]
    fn sale_settlement_moves_stock_and_due_and_reverses_exactly() {
        let product = Uuid::new_v4();
        let customer = Uuid::new_v4();
        let items = vec![
            item(dec!(3), dec!(100), Some(product)),
            item(dec!(2), dec!(100), Some(product)),
            item(dec!(7), dec!(10), None),
        ];
        let draft = TransactionDraft {
            paid_amount: Some(dec!(200)),
            ..Default::default()
        };
        let bill = settle_bill(&draft, items.clone(), Utc::now()).unwrap();
        let txn = sale(items, &bill, Some(customer));

        let settlement = Settlement::of(&txn);

        assert_eq!(settlement.stock, vec![(product, dec!(-5))]);
        assert_eq!(settlement.customer_due, Some((customer, dec!(370))));

        let reversal = settlement.reversed();
        assert_eq!(reversal.stock, vec![(product, dec!(5))]);
        assert_eq!(reversal.customer_due, Some((customer, dec!(-370))));
    }

    #[test]
    fn purchase_adds_stock_without_touching_dues() {
        let product = Uuid::new_v4();
        let items = vec![item(dec!(50), dec!(500), Some(product))];
        let bill = settle_bill(&TransactionDraft::default(), items.clone(), Utc::now()).unwrap();
        let mut txn = sale(items, &bill, Some(Uuid::new_v4()));
        txn.txn_type = TxnType::Purchase;

        let settlement = Settlement::of(&txn);

        assert_eq!(settlement.stock, vec![(product, dec!(50))]);
        assert!(settlement.customer_due.is_none());
    }

    #[test]
    fn expense_moves_nothing() {
        let bill = settle_bill(
            &TransactionDraft {
                txn_type: TxnType::Expense,
                total_amount: Some(dec!(500)),
                ..Default::default()
            },
            Vec::new(),
            Utc::now(),
        )
        .unwrap();
        let mut txn = sale(Vec::new(), &bill, Some(Uuid::new_v4()));
        txn.txn_type = TxnType::Expense;

        assert_eq!(bill.paid_amount, dec!(500));
        assert!(Settlement::of(&txn).is_empty());
    }

    #[test]
    fn later_payments_clear_due_and_switch_to_split() {
        let customer = Uuid::new_v4();
        let account = Uuid::new_v4();
        let items = vec![item(dec!(10), dec!(100), None)];
        let draft = TransactionDraft {
            paid_amount: Some(dec!(400)),
            ..Default::default()
        };
        let bill = settle_bill(&draft, items.clone(), Utc::now()).unwrap();
        let txn = sale(items, &bill, Some(customer));

        let rows = vec![PaymentDraft {
            mode: PaymentMode::Online,
            amount: dec!(600),
            bank_account_id: Some(account),
            payer_name: String::new(),
            date: None,
        }];
        let (updated, settlement) = apply_payments(&txn, &rows, Utc::now()).unwrap();

        assert_eq!(updated.paid_amount, dec!(1000));
        assert_eq!(updated.due_amount, Decimal::ZERO);
        assert_eq!(updated.payment_mode, PaymentMode::Split);
        assert_eq!(updated.payments.len(), 2);
        assert_eq!(settlement.customer_due, Some((customer, dec!(-600))));

        let too_much = vec![PaymentDraft {
            amount: dec!(1),
            ..rows[0].clone()
        }];
        assert_eq!(
            apply_payments(&updated, &too_much, Utc::now()).unwrap_err(),
            LedgerError::ExceedsDue {
                due: Decimal::ZERO
            }
        );
    }

    #[test]
    fn payments_cannot_be_applied_to_an_expense() {
        let bill = settle_bill(
            &TransactionDraft {
                txn_type: TxnType::Expense,
                total_amount: Some(dec!(20)),
                ..Default::default()
            },
            Vec::new(),
            Utc::now(),
        )
        .unwrap();
        let mut txn = sale(Vec::new(), &bill, None);
        txn.txn_type = TxnType::Expense;

        let rows = vec![PaymentDraft {
            mode: PaymentMode::Cash,
            amount: dec!(5),
            bank_account_id: None,
            payer_name: String::new(),
            date: None,
        }];

        assert_eq!(
            apply_payments(&txn, &rows, Utc::now()).unwrap_err(),
            LedgerError::NotABill
        );
    }
}
