//! Maintenance jobs for a shop's product catalog.
//!
//! 1. `seed` adds every item and company pair of the standard fertilizer
//!    catalog that the shop does not have yet, with zero stock and zero rate.
//!
//! 2. `dedupe` finds products with the same item name and company, keeps the
//!    oldest and deletes the rest.
//!
//! 3. `rename-company` rewrites a misspelled company on every product, e.g.
//!    `Harul` to `HURL`.
//!
//! Names are compared after [`khaad::utils::sanitize`], so `Urea | IPL`,
//! `urea  ipl` and `UREA_IPL` are the same product.
use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use khaad::{
    models::{DEFAULT_LOW_STOCK_THRESHOLD, Product, Role},
    store::Store,
    utils::{normalize_email, sanitize},
};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

pub mod catalog;

use catalog::{SEED_UNIT, entries};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub changed: usize,
    pub skipped: usize,
}

/// Owner id for an owner's email. Staff emails are refused.
pub async fn find_owner(store: &dyn Store, email: &str) -> Result<Uuid> {
    let Some(user) = store.user_by_email(&normalize_email(email)).await? else {
        bail!("No user found with email {email}");
    };

    if user.role != Role::Owner {
        bail!("{email} is a staff account, pass the shop owner's email");
    }

    Ok(user.id)
}

fn key(product: &Product) -> (String, String) {
    (sanitize(&product.item_name), sanitize(&product.company))
}

fn progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

pub async fn seed_catalog(store: &dyn Store, owner: Uuid) -> Result<Report> {
    let mut existing: HashSet<(String, String)> =
        store.products(owner).await?.iter().map(key).collect();

    let pairs: Vec<_> = entries().collect();
    let pb = progress(pairs.len());
    let mut report = Report::default();

    for (item_name, company) in pairs {
        pb.set_message(format!("{item_name} | {company}"));

        if !existing.insert((sanitize(item_name), sanitize(company))) {
            report.skipped += 1;
            pb.inc(1);
            continue;
        }

        let now = Utc::now();
        store
            .put_product(&Product {
                id: Uuid::new_v4(),
                owner_id: owner,
                item_name: item_name.to_string(),
                company: company.to_string(),
                qty: Decimal::ZERO,
                rate: Decimal::ZERO,
                unit: SEED_UNIT.to_string(),
                low_stock_threshold: Decimal::from(DEFAULT_LOW_STOCK_THRESHOLD),
                created_at: now,
                updated_at: now,
            })
            .await?;

        report.changed += 1;
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    info!("Seeded {} products into shop {owner}, {} already present", report.changed, report.skipped);

    Ok(report)
}

/// Duplicate groups, oldest product first in each.
pub async fn duplicates(store: &dyn Store, owner: Uuid) -> Result<Vec<Vec<Product>>> {
    let mut products = store.products(owner).await?;
    products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut groups: HashMap<(String, String), Vec<Product>> = HashMap::new();
    let mut order = Vec::new();
    for product in products {
        let k = key(&product);
        if !groups.contains_key(&k) {
            order.push(k.clone());
        }
        groups.entry(k).or_default().push(product);
    }

    Ok(order
        .into_iter()
        .filter_map(|k| groups.remove(&k))
        .filter(|group| group.len() > 1)
        .collect())
}

pub async fn dedupe_catalog(store: &dyn Store, owner: Uuid, dry_run: bool) -> Result<Report> {
    let groups = duplicates(store, owner).await?;
    let pb = progress(groups.len());
    let mut report = Report::default();

    for group in groups {
        let Some((keep, extra)) = group.split_first() else {
            continue;
        };
        pb.set_message(keep.display_name());
        info!("Keeping {} for {}, removing {} others", keep.id, keep.display_name(), extra.len());

        for product in extra {
            if dry_run {
                report.skipped += 1;
            } else if store.delete_product(owner, product.id).await? {
                report.changed += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(report)
}

pub async fn rename_company(store: &dyn Store, owner: Uuid, from: &str, to: &str) -> Result<Report> {
    let to = to.trim();
    if to.is_empty() {
        bail!("New company name cannot be empty");
    }

    let wanted = sanitize(from);
    let mut report = Report::default();

    for mut product in store.products(owner).await? {
        if sanitize(&product.company) != wanted {
            report.skipped += 1;
            continue;
        }

        product.company = to.to_string();
        product.updated_at = Utc::now();
        store.update_product(&product, None).await?;
        report.changed += 1;
    }

    info!("Renamed company {from} to {to} on {} products", report.changed);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use khaad::{
        models::{ShopConfig, User},
        store::MemoryStore,
    };

    use super::*;

    fn product(owner: Uuid, name: &str, company: &str, age_days: i64) -> Product {
        let at = Utc::now() - Duration::days(age_days);
        Product {
            id: Uuid::new_v4(),
            owner_id: owner,
            item_name: name.into(),
            company: company.into(),
            qty: Decimal::ONE,
            rate: Decimal::ONE,
            unit: SEED_UNIT.into(),
            low_stock_threshold: Decimal::TEN,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn seeding_twice_adds_nothing_new() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        store.put_product(&product(owner, "urea", "ipl", 1)).await.unwrap();

        let total = entries().count();
        let first = seed_catalog(&store, owner).await.unwrap();
        let second = seed_catalog(&store, owner).await.unwrap();

        assert_eq!(first, Report { changed: total - 1, skipped: 1 });
        assert_eq!(second, Report { changed: 0, skipped: total });
        assert_eq!(store.products(owner).await.unwrap().len(), total);
    }

    #[tokio::test]
    async fn dedupe_keeps_the_oldest() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let oldest = product(owner, "DAP", "Kisan", 10);
        store.put_product(&oldest).await.unwrap();
        store.put_product(&product(owner, "dap", " KISAN", 2)).await.unwrap();
        store.put_product(&product(owner, "DAP", "Kisan", 1)).await.unwrap();
        store.put_product(&product(owner, "DAP", "IPL", 1)).await.unwrap();

        let dry = dedupe_catalog(&store, owner, true).await.unwrap();
        assert_eq!(dry, Report { changed: 0, skipped: 2 });
        assert_eq!(store.products(owner).await.unwrap().len(), 4);

        let report = dedupe_catalog(&store, owner, false).await.unwrap();
        assert_eq!(report.changed, 2);

        let left = store.products(owner).await.unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.iter().any(|p| p.id == oldest.id));
    }

    #[tokio::test]
    async fn rename_only_touches_matching_company() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        store.put_product(&product(owner, "Urea", "Harul", 1)).await.unwrap();
        store.put_product(&product(owner, "Urea", "IPL", 1)).await.unwrap();

        let report = rename_company(&store, owner, "harul", "HURL").await.unwrap();

        assert_eq!(report, Report { changed: 1, skipped: 1 });
        let mut companies: Vec<String> =
            store.products(owner).await.unwrap().into_iter().map(|p| p.company).collect();
        companies.sort();
        assert_eq!(companies, vec!["HURL".to_string(), "IPL".to_string()]);
    }

    #[tokio::test]
    async fn staff_emails_are_refused() {
        let store = MemoryStore::new();
        let staff = User {
            id: Uuid::new_v4(),
            name: "Sonu".into(),
            email: "sonu@example.com".into(),
            password_hash: String::new(),
            mobile: String::new(),
            role: Role::Staff,
            shop_config: ShopConfig::default(),
            owner_id: Some(Uuid::new_v4()),
            created_at: Utc::now(),
        };
        store.insert_user(&staff).await.unwrap();

        assert!(find_owner(&store, "SONU@example.com").await.is_err());
        assert!(find_owner(&store, "nobody@example.com").await.is_err());
    }
}
