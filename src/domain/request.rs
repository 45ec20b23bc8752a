//! Caller payloads and their validation.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::batch::{Location, Quantity, QuantityUnit};
use super::types::{BatchId, QrCode};
use crate::infra::{BatchError, Result};

pub const MAX_HERB_NAME_LEN: usize = 200;
pub const MAX_REMARKS_LEN: usize = 2000;
pub const MAX_FIELD_LEN: usize = 2000;
/// Largest accepted quantity; its thousandths still fit the ledger's integer field.
pub const MAX_QUANTITY: f64 = 1.0e12;

/// Quantity as submitted: either a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuantityInput {
    Number(f64),
    Text(String),
}

impl QuantityInput {
    fn parse(&self) -> Option<f64> {
        match self {
            QuantityInput::Number(v) => Some(*v),
            QuantityInput::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Farmer-submitted creation payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub herb_name: Option<String>,
    #[serde(default)]
    pub quantity: Option<QuantityInput>,
    #[serde(default)]
    pub unit: Option<String>,
    /// `YYYY-MM-DD` or an RFC 3339 timestamp.
    #[serde(default)]
    pub harvest_date: Option<String>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub photo_ref: Option<String>,
}

/// A creation payload that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBatch {
    pub batch_id: Option<BatchId>,
    pub herb_name: String,
    pub quantity: Quantity,
    pub harvest_date: NaiveDate,
    pub location: Location,
    pub certifications: BTreeSet<String>,
    pub additional_info: Option<String>,
    pub photo_ref: Option<String>,
}

impl CreateBatchRequest {
    pub fn validate(&self) -> Result<ValidatedBatch> {
        let batch_id = match non_blank(&self.batch_id) {
            Some(id) if QrCode::is_token_shaped(&id) => {
                return Err(invalid(format!("batchId {id} is reserved for QR codes")))
            }
            Some(id) if BatchId::is_well_formed(&id) => Some(BatchId::new(id)),
            Some(id) => return Err(invalid(format!("malformed batchId: {id}"))),
            None => None,
        };

        let herb_name = non_blank(&self.herb_name).ok_or_else(|| invalid("herbName is required"))?;
        if herb_name.chars().count() > MAX_HERB_NAME_LEN {
            return Err(invalid(format!(
                "herbName exceeds {MAX_HERB_NAME_LEN} characters"
            )));
        }

        let value = self
            .quantity
            .as_ref()
            .ok_or_else(|| invalid("quantity is required"))?
            .parse()
            .ok_or_else(|| invalid("quantity must be numeric"))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid("quantity must be a positive number"));
        }
        if value > MAX_QUANTITY {
            return Err(invalid(format!("quantity exceeds {MAX_QUANTITY}")));
        }

        let unit = match non_blank(&self.unit) {
            Some(u) => u.parse::<QuantityUnit>().map_err(invalid)?,
            None => QuantityUnit::default(),
        };

        let harvest_date = non_blank(&self.harvest_date)
            .ok_or_else(|| invalid("harvestDate is required"))
            .and_then(|s| parse_harvest_date(&s))?;

        let certifications = self
            .certifications
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ValidatedBatch {
            batch_id,
            herb_name,
            quantity: Quantity::new(value, unit),
            harvest_date,
            location: trim_location(&self.location),
            certifications,
            additional_info: bounded("additionalInfo", &self.additional_info)?,
            photo_ref: non_blank(&self.photo_ref),
        })
    }
}

/// Fields a manufacturer may set after collecting a batch. Absent fields keep
/// their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturerDetails {
    #[serde(default)]
    pub processing_details: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub storage_location: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
    /// Move a Collected batch to Processed.
    #[serde(default)]
    pub advance_to_processed: bool,
}

impl ManufacturerDetails {
    /// Trim fields, drop blanks and reject empty or oversized updates.
    pub fn validate(&self) -> Result<ManufacturerDetails> {
        let cleaned = ManufacturerDetails {
            processing_details: bounded("processingDetails", &self.processing_details)?,
            remarks: bounded("remarks", &self.remarks)?,
            storage_location: bounded("storageLocation", &self.storage_location)?,
            batch_number: bounded("batchNumber", &self.batch_number)?,
            advance_to_processed: self.advance_to_processed,
        };
        if !cleaned.has_fields() && !cleaned.advance_to_processed {
            return Err(invalid("manufacturer update contains no fields"));
        }
        Ok(cleaned)
    }

    pub fn has_fields(&self) -> bool {
        self.processing_details.is_some()
            || self.remarks.is_some()
            || self.storage_location.is_some()
            || self.batch_number.is_some()
    }
}

/// Normalize admin remarks. Rejections must explain themselves.
pub fn validate_remarks(remarks: &str, required: bool) -> Result<String> {
    let remarks = remarks.trim();
    if required && remarks.is_empty() {
        return Err(invalid("remarks are required when rejecting a batch"));
    }
    if remarks.chars().count() > MAX_REMARKS_LEN {
        return Err(invalid(format!("remarks exceed {MAX_REMARKS_LEN} characters")));
    }
    Ok(remarks.to_string())
}

fn parse_harvest_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.date_naive()))
        .map_err(|_| invalid(format!("harvestDate is not a valid date: {s}")))
}

fn trim_location(location: &Location) -> Location {
    Location {
        description: non_blank(&location.description),
        village: non_blank(&location.village),
        city: non_blank(&location.city),
        pincode: non_blank(&location.pincode),
        state: non_blank(&location.state),
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn bounded(field: &str, value: &Option<String>) -> Result<Option<String>> {
    let value = non_blank(value);
    if let Some(v) = &value {
        if v.chars().count() > MAX_FIELD_LEN {
            return Err(invalid(format!("{field} exceeds {MAX_FIELD_LEN} characters")));
        }
    }
    Ok(value)
}

fn invalid(msg: impl Into<String>) -> BatchError {
    BatchError::ValidationFailed(msg.into())
}
