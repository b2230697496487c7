//! # Catalog matching
//!
//! Names coming from the counter or the voice assistant are free text. They are
//! matched against the shop's own customers and products with plain linear
//! scans over [`sanitize`]d names:
//!
//! - customers: exact, then either name containing the other
//! - products: name and company, then name alone, then either name containing the other
//!
//! An empty name never matches anything.
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    models::{Customer, PaymentMode, Product, TxnType},
    utils::sanitize,
    voice::VoiceDraft,
};

pub fn match_customer<'a>(name: &str, customers: &'a [Customer]) -> Option<&'a Customer> {
    let wanted = sanitize(name);
    if wanted.is_empty() {
        return None;
    }

    let names: Vec<(String, &Customer)> = customers
        .iter()
        .map(|c| (sanitize(&c.name), c))
        .filter(|(n, _)| !n.is_empty())
        .collect();

    names
        .iter()
        .find(|(n, _)| *n == wanted)
        .or_else(|| {
            names
                .iter()
                .find(|(n, _)| n.contains(&wanted) || wanted.contains(n.as_str()))
        })
        .map(|(_, c)| *c)
}

pub fn match_product<'a>(name: &str, company: &str, products: &'a [Product]) -> Option<&'a Product> {
    let wanted = sanitize(name);
    if wanted.is_empty() {
        return None;
    }
    let wanted_company = sanitize(company);

    let names: Vec<(String, String, &Product)> = products
        .iter()
        .map(|p| (sanitize(&p.item_name), sanitize(&p.company), p))
        .filter(|(n, _, _)| !n.is_empty())
        .collect();

    names
        .iter()
        .find(|(n, c, _)| *n == wanted && *c == wanted_company)
        .or_else(|| names.iter().find(|(n, _, _)| *n == wanted))
        .or_else(|| {
            names
                .iter()
                .find(|(n, _, _)| n.contains(&wanted) || wanted.contains(n.as_str()))
        })
        .map(|(_, _, p)| *p)
}

/// Splits the counter's `Urea | IPL` display form back into name and company.
pub fn split_display_name(item_name: &str, company: &str) -> (String, String) {
    match item_name.split_once('|') {
        Some((name, from_name)) if company.trim().is_empty() => {
            (name.trim().to_string(), from_name.trim().to_string())
        }
        Some((name, _)) => (name.trim().to_string(), company.trim().to_string()),
        None => (item_name.trim().to_string(), company.trim().to_string()),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedItem {
    pub product_id: Uuid,
    pub item_name: String,
    pub company: String,
    pub display_name: String,
    pub qty: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
}

/// A voice bill checked against the catalog, ready for the counter to review
/// and submit as a normal transaction.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVoice {
    #[serde(rename = "type")]
    pub txn_type: TxnType,
    /// What the assistant heard, whether or not it matched.
    pub spoken_customer_name: String,
    pub customer_name: String,
    pub customer_id: Option<Uuid>,
    pub is_customer_known: bool,
    pub items: Vec<ResolvedItem>,
    /// Spoken item names with no product behind them.
    pub unmatched_items: Vec<String>,
    pub labour_charges: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub payment_mode: PaymentMode,
    pub description: String,
}

pub fn resolve(draft: VoiceDraft, products: &[Product], customers: &[Customer]) -> ResolvedVoice {
    let customer = match_customer(&draft.customer_name, customers);

    let mut items = Vec::new();
    let mut unmatched_items = Vec::new();

    for spoken in &draft.items {
        let (name, company) = split_display_name(&spoken.item_name, &spoken.company);

        let Some(product) = match_product(&name, &company, products) else {
            if !name.is_empty() {
                unmatched_items.push(name);
            }
            continue;
        };

        let qty = spoken.qty.unwrap_or_default().max(Decimal::ZERO);
        let rate = if product.rate > Decimal::ZERO {
            product.rate
        } else {
            spoken.rate.unwrap_or_default().max(Decimal::ZERO)
        };

        items.push(ResolvedItem {
            product_id: product.id,
            item_name: product.item_name.clone(),
            company: product.company.clone(),
            display_name: product.display_name(),
            qty,
            rate,
            amount: (qty * rate).round_dp(2),
        });
    }

    let labour_charges = draft.labour_charges.unwrap_or_default().max(Decimal::ZERO);
    let total_amount = match draft.txn_type {
        TxnType::Sale | TxnType::Purchase => {
            items.iter().map(|i| i.amount).sum::<Decimal>() + labour_charges
        }
        TxnType::Payment => Decimal::ZERO,
        TxnType::Expense => draft.total_amount.unwrap_or_default().max(Decimal::ZERO),
    };

    ResolvedVoice {
        txn_type: draft.txn_type,
        spoken_customer_name: draft.customer_name.clone(),
        customer_name: customer.map(|c| c.name.clone()).unwrap_or_default(),
        customer_id: customer.map(|c| c.id),
        is_customer_known: customer.is_some(),
        items,
        unmatched_items,
        labour_charges,
        total_amount,
        paid_amount: draft.paid_amount.unwrap_or_default().max(Decimal::ZERO),
        payment_mode: draft.payment_mode,
        description: draft.description,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::voice::VoiceItem;

    fn product(name: &str, company: &str, rate: Decimal) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            owner_id: Uuid::nil(),
            item_name: name.into(),
            company: company.into(),
            qty: dec!(100),
            rate,
            unit: "Bag".into(),
            low_stock_threshold: dec!(10),
            created_at: now,
            updated_at: now,
        }
    }

    fn customer(name: &str) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            owner_id: Uuid::nil(),
            name: name.into(),
            mobile: String::new(),
            address: String::new(),
            gst_number: String::new(),
            dealer_id: String::new(),
            total_due: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    fn spoken(name: &str, company: &str, qty: Decimal) -> VoiceItem {
        VoiceItem {
            item_name: name.into(),
            company: company.into(),
            qty: Some(qty),
            rate: None,
            amount: None,
        }
    }

    #[test]
    fn customers_match_exactly_before_partially() {
        let customers = vec![customer("Ramesh Kumar"), customer("Ramesh")];

        assert_eq!(match_customer("  RAMESH ", &customers).unwrap().name, "Ramesh");
        assert_eq!(match_customer("ramesh kumar ji", &customers).unwrap().name, "Ramesh Kumar");
        assert_eq!(match_customer("रमेश", &[customer("रमेश यादव")]).unwrap().name, "रमेश यादव");
        assert!(match_customer("", &customers).is_none());
        assert!(match_customer("Suresh", &customers).is_none());
    }

    #[test]
    fn products_prefer_company_then_name_then_partial() {
        let products = vec![
            product("Urea", "IPL", dec!(266.5)),
            product("Urea", "Kisan", dec!(270)),
            product("MOP (Potash)", "Matrix", dec!(1700)),
        ];

        assert_eq!(match_product("urea", "kisan", &products).unwrap().company, "Kisan");
        assert_eq!(match_product("Urea", "Nobody", &products).unwrap().company, "IPL");
        assert_eq!(match_product("potash", "", &products).unwrap().company, "Matrix");
        assert!(match_product("DAP", "IPL", &products).is_none());
        assert!(match_product("", "IPL", &products).is_none());
    }

    #[test]
    fn display_names_split_back() {
        assert_eq!(
            split_display_name("Urea | IPL", ""),
            ("Urea".to_string(), "IPL".to_string())
        );
        assert_eq!(
            split_display_name("Urea | IPL", "Kisan"),
            ("Urea".to_string(), "Kisan".to_string())
        );
        assert_eq!(split_display_name(" DAP ", ""), ("DAP".to_string(), String::new()));
    }

    #[test]
    fn catalog_rates_win_and_unknown_items_are_reported() {
        let products = vec![product("Urea", "IPL", dec!(266.5)), product("Zinc", "Paras", dec!(0))];
        let customers = vec![customer("Raju")];
        let draft = VoiceDraft {
            customer_name: "raju".into(),
            items: vec![
                VoiceItem {
                    rate: Some(dec!(999)),
                    ..spoken("urea", "ipl", dec!(10))
                },
                VoiceItem {
                    rate: Some(dec!(80)),
                    ..spoken("zinc", "", dec!(2))
                },
                spoken("Tractor", "", dec!(1)),
            ],
            labour_charges: Some(dec!(50)),
            paid_amount: Some(dec!(1000)),
            ..Default::default()
        };

        let resolved = resolve(draft, &products, &customers);

        assert!(resolved.is_customer_known);
        assert_eq!(resolved.customer_id, Some(customers[0].id));
        assert_eq!(resolved.items.len(), 2);
        assert_eq!(resolved.items[0].rate, dec!(266.5));
        assert_eq!(resolved.items[0].amount, dec!(2665));
        assert_eq!(resolved.items[0].display_name, "Urea | IPL");
        assert_eq!(resolved.items[1].rate, dec!(80));
        assert_eq!(resolved.unmatched_items, vec!["Tractor".to_string()]);
        assert_eq!(resolved.total_amount, dec!(2875));
        assert_eq!(resolved.paid_amount, dec!(1000));
    }

    #[test]
    fn unknown_customer_is_flagged_not_invented() {
        let resolved = resolve(
            VoiceDraft {
                customer_name: "Mahesh".into(),
                ..Default::default()
            },
            &[],
            &[customer("Raju")],
        );

        assert!(!resolved.is_customer_known);
        assert_eq!(resolved.spoken_customer_name, "Mahesh");
        assert_eq!(resolved.customer_name, "");
        assert_eq!(resolved.total_amount, Decimal::ZERO);
    }
}
