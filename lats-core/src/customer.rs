//! Customer records and their normalization table.

use crate::error::LatsResult;
use crate::record::{decode_row, lenient, NormalizedRecord, RawRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const CUSTOMERS: &str = "customers";

/// Categorical customer tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    #[default]
    New,
    Vip,
    Complainer,
    Purchased,
}

/// Every spelling the store has been seen to contain, lowercased.
const COLOR_TAG_ALIASES: &[(&str, ColorTag)] = &[
    ("new", ColorTag::New),
    ("normal", ColorTag::New),
    ("not normal", ColorTag::New),
    ("regular", ColorTag::New),
    ("standard", ColorTag::New),
    ("basic", ColorTag::New),
    ("vip", ColorTag::Vip),
    ("premium", ColorTag::Vip),
    ("important", ColorTag::Vip),
    ("priority", ColorTag::Vip),
    ("complainer", ColorTag::Complainer),
    ("problem", ColorTag::Complainer),
    ("issue", ColorTag::Complainer),
    ("purchased", ColorTag::Purchased),
    ("buyer", ColorTag::Purchased),
    ("customer", ColorTag::Purchased),
    ("buying", ColorTag::Purchased),
];

impl ColorTag {
    /// Map a raw tag onto the canonical set. Unknown or missing tags are `New`.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return ColorTag::default();
        };
        let key = raw.trim().to_lowercase();
        COLOR_TAG_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, tag)| *tag)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorTag::New => "new",
            ColorTag::Vip => "vip",
            ColorTag::Complainer => "complainer",
            ColorTag::Purchased => "purchased",
        }
    }
}

/// Defaults substituted for missing columns. Kept in one place so the
/// normalization rules can be read at a glance.
pub struct CustomerDefaults;

impl CustomerDefaults {
    pub const NAME: &'static str = "";
    pub const COLOR_TAG: ColorTag = ColorTag::New;
    pub const TOTAL_SPENT: f64 = 0.0;
    pub const POINTS: i64 = 0;
    pub const TOTAL_RETURNS: i64 = 0;
    pub const IS_ACTIVE: bool = true;
    pub const NOTE_CONTENT: &'static str = "";
    pub const PAYMENT_AMOUNT: f64 = 0.0;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerNote {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default = "default_note_content")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_datetime")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_note_content() -> String {
    CustomerDefaults::NOTE_CONTENT.to_string()
}

/// A device registered to a customer (embedded from `devices`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub serial_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_datetime")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A payment made by a customer (embedded from `customer_payments`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    #[serde(default = "default_payment_amount", deserialize_with = "amount")]
    pub amount: f64,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_datetime")]
    pub payment_date: Option<DateTime<Utc>>,
}

fn default_payment_amount() -> f64 {
    CustomerDefaults::PAYMENT_AMOUNT
}

fn amount<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(lenient::opt_f64(d)?.unwrap_or(CustomerDefaults::PAYMENT_AMOUNT))
}

/// Fully normalized customer with its embedded sub-collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub city: Option<String>,
    pub loyalty_level: Option<String>,
    pub color_tag: ColorTag,
    pub referred_by: Option<String>,
    pub total_spent: f64,
    pub points: i64,
    pub last_visit: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub referral_source: Option<String>,
    pub birth_month: Option<String>,
    pub birth_day: Option<String>,
    pub total_returns: i64,
    pub profile_image: Option<String>,
    pub whatsapp: Option<String>,
    pub initial_notes: Option<String>,
    pub notes: Vec<CustomerNote>,
    pub referrals: Vec<String>,
    pub customer_tag: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub devices: Vec<Device>,
    #[serde(rename = "customer_payments")]
    pub payments: Vec<Payment>,
}

/// Narrow listing projection without sub-collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub color_tag: ColorTag,
    pub points: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Loosely-typed input schema shared by both customer projections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCustomerRow {
    pub id: Uuid,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub loyalty_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub color_tag: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub referred_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub total_spent: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub points: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_datetime")]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub referral_source: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub birth_month: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub birth_day: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub total_returns: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub profile_image: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub whatsapp: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub initial_notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub notes: Vec<CustomerNote>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub referrals: Vec<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub customer_tag: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub devices: Vec<Device>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub customer_payments: Vec<Payment>,
}

impl From<RawCustomerRow> for Customer {
    fn from(raw: RawCustomerRow) -> Self {
        Self {
            id: raw.id,
            name: raw.name.unwrap_or_else(|| CustomerDefaults::NAME.to_string()),
            email: raw.email,
            phone: raw.phone,
            gender: raw.gender,
            city: raw.city,
            loyalty_level: raw.loyalty_level,
            color_tag: ColorTag::normalize(raw.color_tag.as_deref()),
            referred_by: raw.referred_by,
            total_spent: raw.total_spent.unwrap_or(CustomerDefaults::TOTAL_SPENT),
            points: raw.points.unwrap_or(CustomerDefaults::POINTS),
            last_visit: raw.last_visit,
            is_active: raw.is_active.unwrap_or(CustomerDefaults::IS_ACTIVE),
            referral_source: raw.referral_source,
            birth_month: raw.birth_month,
            birth_day: raw.birth_day,
            total_returns: raw.total_returns.unwrap_or(CustomerDefaults::TOTAL_RETURNS),
            profile_image: raw.profile_image,
            whatsapp: raw.whatsapp,
            initial_notes: raw.initial_notes,
            notes: raw.notes,
            referrals: raw.referrals,
            customer_tag: raw.customer_tag,
            created_by: raw.created_by,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            devices: raw.devices,
            payments: raw.customer_payments,
        }
    }
}

impl From<RawCustomerRow> for CustomerSummary {
    fn from(raw: RawCustomerRow) -> Self {
        Self {
            id: raw.id,
            name: raw.name.unwrap_or_else(|| CustomerDefaults::NAME.to_string()),
            phone: raw.phone,
            email: raw.email,
            color_tag: ColorTag::normalize(raw.color_tag.as_deref()),
            points: raw.points.unwrap_or(CustomerDefaults::POINTS),
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        }
    }
}

const CUSTOMER_COLUMNS: &str = "id,name,email,phone,gender,city,loyalty_level,color_tag,\
referred_by,total_spent,points,last_visit,is_active,referral_source,birth_month,birth_day,\
total_returns,profile_image,whatsapp,initial_notes,notes,referrals,customer_tag,created_by,\
created_at,updated_at,devices(*),customer_payments(*)";

const CUSTOMER_SUMMARY_COLUMNS: &str =
    "id,name,phone,email,color_tag,points,created_at,updated_at";

impl NormalizedRecord for Customer {
    const COLLECTION: &'static str = CUSTOMERS;

    fn columns() -> &'static str {
        CUSTOMER_COLUMNS
    }

    fn normalize(row: RawRow) -> LatsResult<Self> {
        decode_row::<RawCustomerRow>(CUSTOMERS, row).map(Customer::from)
    }
}

impl NormalizedRecord for CustomerSummary {
    const COLLECTION: &'static str = CUSTOMERS;

    fn columns() -> &'static str {
        CUSTOMER_SUMMARY_COLUMNS
    }

    fn write_through() -> bool {
        false
    }

    fn normalize(row: RawRow) -> LatsResult<Self> {
        decode_row::<RawCustomerRow>(CUSTOMERS, row).map(CustomerSummary::from)
    }
}

// ============================================================================
// WRITE PAYLOADS
// ============================================================================

/// Payload for creating a customer. Absent fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loyalty_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip)]
    pub notes: Vec<CustomerNote>,
}

impl NewCustomer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn to_row(&self) -> LatsResult<RawRow> {
        let mut row = to_object(CUSTOMERS, self)?;
        normalize_color_tag_column(&mut row);
        if !self.notes.is_empty() {
            row.insert("notes".to_string(), encode_json_text(CUSTOMERS, &self.notes)?);
        }
        Ok(row)
    }
}

/// Partial update for a customer. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CustomerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loyalty_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_spent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_returns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_tag: Option<String>,
    #[serde(skip)]
    pub notes: Option<Vec<CustomerNote>>,
    #[serde(skip)]
    pub referrals: Option<Vec<String>>,
}

impl CustomerPatch {
    pub fn is_empty(&self) -> bool {
        self == &CustomerPatch::default()
    }

    /// Row form of the patch, stamped with `updated_at`.
    pub fn to_row(&self, now: DateTime<Utc>) -> LatsResult<RawRow> {
        let mut row = to_object(CUSTOMERS, self)?;
        normalize_color_tag_column(&mut row);
        if let Some(notes) = &self.notes {
            row.insert("notes".to_string(), encode_json_text(CUSTOMERS, notes)?);
        }
        if let Some(referrals) = &self.referrals {
            row.insert(
                "referrals".to_string(),
                encode_json_text(CUSTOMERS, referrals)?,
            );
        }
        row.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
        Ok(row)
    }
}

fn to_object<T: Serialize>(collection: &str, value: &T) -> LatsResult<RawRow> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(crate::record::malformed(collection, "payload is not an object")),
        Err(e) => Err(crate::record::malformed(collection, e.to_string())),
    }
}

fn normalize_color_tag_column(row: &mut RawRow) {
    if let Some(Value::String(tag)) = row.get("color_tag") {
        let tag = ColorTag::normalize(Some(tag)).as_str().to_string();
        row.insert("color_tag".to_string(), Value::String(tag));
    }
}

/// Array columns are stored as JSON text.
fn encode_json_text<T: Serialize>(collection: &str, value: &T) -> LatsResult<Value> {
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|e| crate::record::malformed(collection, e.to_string()))
}
