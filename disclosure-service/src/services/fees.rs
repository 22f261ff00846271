//! Platform fee, commission and refund arithmetic.
//!
//! All amounts are exact decimals. Each reported field is rounded to two
//! places exactly once, from unrounded inputs; rounded intermediates are
//! never fed into another field.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::check_rate;
use crate::models::ProjectRecord;
use crate::services::ServiceError;

/// Fee package a creator chose for the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Basic,
    Plus,
}

impl std::str::FromStr for PackageType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(PackageType::Basic),
            "plus" => Ok(PackageType::Plus),
            _ => Err(ServiceError::Validation(format!(
                "Unknown package type: {}",
                s
            ))),
        }
    }
}

/// Configurable rates. Rates are fractions, percentages are display values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub basic_rate: Decimal,
    pub basic_displayed_percentage: Decimal,
    pub plus_rate: Decimal,
    pub plus_displayed_percentage: Decimal,
    pub plus_partnership_percentage: Decimal,
    pub marketing_commission_rate: Decimal,
    pub refund_gateway_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            basic_rate: Decimal::new(65, 3),
            basic_displayed_percentage: Decimal::new(60, 1),
            plus_rate: Decimal::new(3, 2),
            plus_displayed_percentage: Decimal::new(25, 1),
            plus_partnership_percentage: Decimal::new(20, 1),
            marketing_commission_rate: Decimal::new(5, 3),
            refund_gateway_rate: Decimal::new(2, 2),
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<(), String> {
        check_rate("FEE_BASIC_RATE", self.basic_rate)?;
        check_rate("FEE_PLUS_RATE", self.plus_rate)?;
        check_rate("FEE_MARKETING_COMMISSION_RATE", self.marketing_commission_rate)?;
        check_rate("FEE_REFUND_GATEWAY_RATE", self.refund_gateway_rate)?;
        Ok(())
    }
}

/// Fee breakdown for one pledge/funding amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFees {
    pub package_type: PackageType,
    pub amount: Decimal,
    pub gross_fee: Decimal,
    pub marketing_commission: Decimal,
    pub net_platform_fee: Decimal,
    pub net_to_creator: Decimal,
    pub displayed_percentage: Decimal,
    pub partnership_percentage: Decimal,
}

/// Half-away-from-zero to cents.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    schedule: FeeSchedule,
}

impl FeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn marketing_commission(&self, amount: Decimal) -> Decimal {
        round_currency(amount * self.schedule.marketing_commission_rate)
    }

    pub fn platform_fees(
        &self,
        amount: Decimal,
        package_type: PackageType,
    ) -> Result<PlatformFees, ServiceError> {
        ensure_non_negative(amount)?;

        let s = &self.schedule;
        let (rate, displayed_percentage, partnership_percentage) = match package_type {
            PackageType::Basic => (s.basic_rate, s.basic_displayed_percentage, Decimal::ZERO),
            PackageType::Plus => (
                s.plus_rate,
                s.plus_displayed_percentage,
                s.plus_partnership_percentage,
            ),
        };

        let gross_exact = amount * rate;
        let commission_exact = amount * s.marketing_commission_rate;

        Ok(PlatformFees {
            package_type,
            amount,
            gross_fee: round_currency(gross_exact),
            marketing_commission: round_currency(commission_exact),
            net_platform_fee: round_currency(gross_exact - commission_exact),
            net_to_creator: round_currency(amount - gross_exact),
            displayed_percentage,
            partnership_percentage,
        })
    }

    /// Amount returned to a backer after the gateway keeps its fee.
    pub fn refund_amount(&self, amount: Decimal) -> Result<Decimal, ServiceError> {
        ensure_non_negative(amount)?;
        Ok(amount - round_currency(amount * self.schedule.refund_gateway_rate))
    }

    pub fn is_funding_expired(project: &ProjectRecord, now: DateTime<Utc>) -> bool {
        project.funding_end_utc.is_some_and(|end| now > end)
    }

    pub fn is_funding_complete(project: &ProjectRecord) -> bool {
        project.current_funding >= project.funding_goal
    }
}

fn ensure_non_negative(amount: Decimal) -> Result<(), ServiceError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ServiceError::Validation(
            "Amount must not be negative".to_string(),
        ));
    }
    Ok(())
}
