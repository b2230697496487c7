//! Plain-text invoice, sized for an 80 column thermal printer.
use std::fmt::Write;

use rust_decimal::Decimal;

use crate::models::{ShopConfig, Transaction};

const WIDTH: usize = 64;

pub fn render(shop: &ShopConfig, txn: &Transaction) -> String {
    let mut out = String::new();
    let rule = "-".repeat(WIDTH);

    let _ = writeln!(out, "{:^WIDTH$}", shop.shop_name);
    if !shop.address.is_empty() {
        let _ = writeln!(out, "{:^WIDTH$}", shop.address);
    }
    if !shop.gst_number.is_empty() {
        let _ = writeln!(out, "{:^WIDTH$}", format!("GSTIN: {}", shop.gst_number));
    }
    let _ = writeln!(out, "{rule}");

    let number = txn
        .invoice_number
        .map(|n| format!("Invoice #{n}"))
        .unwrap_or_else(|| txn.txn_type.as_str().to_string());
    let _ = writeln!(
        out,
        "{number:<32}{:>32}",
        txn.date.format("%d-%m-%Y %H:%M").to_string()
    );

    let customer = if txn.customer_name.is_empty() { "Cash Sale" } else { &txn.customer_name };
    let _ = writeln!(out, "Customer: {customer}");
    if !txn.vehicle_number.is_empty() {
        let _ = writeln!(out, "Vehicle: {}", txn.vehicle_number);
    }
    let _ = writeln!(out, "{rule}");

    if !txn.items.is_empty() {
        let _ = writeln!(out, "{:<30}{:>8}{:>12}{:>14}", "Item", "Qty", "Rate", "Amount");
        for item in &txn.items {
            let name = if item.company.is_empty() {
                item.item_name.clone()
            } else {
                format!("{} | {}", item.item_name, item.company)
            };
            let _ = writeln!(
                out,
                "{:<30}{:>8}{:>12}{:>14}",
                truncate(&name, 29),
                item.qty.normalize(),
                money(item.rate),
                money(item.amount)
            );
        }
        let _ = writeln!(out, "{rule}");
    }

    if !txn.labour_charges.is_zero() {
        let _ = writeln!(out, "{:<50}{:>14}", "Labour", money(txn.labour_charges));
    }
    let _ = writeln!(out, "{:<50}{:>14}", "Total", money(txn.total_amount));
    let _ = writeln!(out, "{:<50}{:>14}", "Paid", money(txn.paid_amount));
    let _ = writeln!(out, "{:<50}{:>14}", "Due", money(txn.due_amount));

    if !txn.payments.is_empty() {
        let _ = writeln!(out, "{rule}");
        for payment in &txn.payments {
            let label = format!(
                "{} {}",
                payment.date.format("%d-%m-%Y"),
                payment.mode.as_str()
            );
            let _ = writeln!(out, "{label:<50}{:>14}", money(payment.amount));
        }
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "{:^WIDTH$}", "Thank you!");
    out
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
