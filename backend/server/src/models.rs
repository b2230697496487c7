//! # Documents
//!
//! Every document except [`User`] belongs to exactly one shop, keyed by the
//! owner's user id. Staff accounts carry the id of the owner they work for.
//!
//! Money and quantities are exact decimals. They travel as plain JSON numbers so
//! the browser can do arithmetic on them without parsing strings.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_SHOP_NAME: &str = "My Fertilizer Shop";
pub const DEFAULT_UNIT: &str = "Kg";
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Owner,
    Staff,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShopConfig {
    pub shop_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub logo_url: String,
    #[serde(default)]
    pub gst_number: String,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            shop_name: DEFAULT_SHOP_NAME.to_string(),
            address: String::new(),
            logo_url: String::new(),
            gst_number: String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub mobile: String,
    pub role: Role,
    #[serde(default)]
    pub shop_config: ShopConfig,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            mobile: self.mobile.clone(),
            role: self.role,
            owner_id: self.owner_id,
            shop_config: self.shop_config.clone(),
        }
    }
}

/// What leaves the server about a user. Never includes the password hash.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub role: Role,
    pub owner_id: Option<Uuid>,
    pub shop_config: ShopConfig,
}

/// Pending password reset, looked up by its token.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResetTicket {
    pub token: String,
    pub user_id: Uuid,
    pub otp: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub item_name: String,
    #[serde(default)]
    pub company: String,
    pub qty: Decimal,
    pub rate: Decimal,
    pub unit: String,
    pub low_stock_threshold: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.qty <= self.low_stock_threshold
    }

    /// `Urea | IPL`, or just the item name when the company is blank.
    pub fn display_name(&self) -> String {
        if self.company.is_empty() {
            self.item_name.clone()
        } else {
            format!("{} | {}", self.item_name, self.company)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub gst_number: String,
    #[serde(default)]
    pub dealer_id: String,
    pub total_due: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_name: String,
    #[serde(default)]
    pub account_number: String,
    #[serde(default)]
    pub ifsc_code: String,
    #[serde(default)]
    pub upi_id: String,
    pub opening_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxnType {
    #[default]
    Sale,
    Purchase,
    Payment,
    Expense,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnType::Sale => "SALE",
            TxnType::Purchase => "PURCHASE",
            TxnType::Payment => "PAYMENT",
            TxnType::Expense => "EXPENSE",
        }
    }

    /// Bills carry line items and a due; payments and expenses do not.
    pub fn is_bill(&self) -> bool {
        matches!(self, TxnType::Sale | TxnType::Purchase)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMode {
    #[default]
    Cash,
    Online,
    Split,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "CASH",
            PaymentMode::Online => "ONLINE",
            PaymentMode::Split => "SPLIT",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Catalog product the stock movement was booked against, if any matched.
    pub product_id: Option<Uuid>,
    pub item_name: String,
    #[serde(default)]
    pub company: String,
    pub qty: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Only `CASH` or `ONLINE`; a split bill is a list of these.
    pub mode: PaymentMode,
    pub amount: Decimal,
    pub bank_account_id: Option<Uuid>,
    #[serde(default)]
    pub payer_name: String,
    pub date: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub created_by: Uuid,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub txn_type: TxnType,
    #[serde(default)]
    pub customer_name: String,
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub labour_charges: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_amount: Decimal,
    pub payment_mode: PaymentMode,
    pub bank_account_id: Option<Uuid>,
    #[serde(default)]
    pub payer_name: String,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vehicle_number: String,
    pub is_delivered: bool,
    pub invoice_number: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_use_uppercase_wire_names() {
        assert_eq!(serde_json::to_string(&TxnType::Purchase).unwrap(), "\"PURCHASE\"");
        assert_eq!(serde_json::to_string(&PaymentMode::Split).unwrap(), "\"SPLIT\"");
        assert_eq!(serde_json::to_string(&Role::Staff).unwrap(), "\"STAFF\"");
        assert_eq!(
            serde_json::from_str::<TxnType>("\"EXPENSE\"").unwrap(),
            TxnType::Expense
        );
    }

    #[test]
    fn profiles_hide_the_password_hash() {
        let owner_id = Uuid::new_v4();
        let staff = User {
            id: Uuid::new_v4(),
            name: "Sonu".into(),
            email: "sonu@example.com".into(),
            password_hash: String::new(),
            mobile: String::new(),
            role: Role::Staff,
            shop_config: ShopConfig::default(),
            owner_id: Some(owner_id),
            created_at: Utc::now(),
        };

        let profile = serde_json::to_value(staff.profile()).unwrap();
        assert_eq!(profile["ownerId"], owner_id.to_string());
        assert!(profile.get("passwordHash").is_none());
    }
}
