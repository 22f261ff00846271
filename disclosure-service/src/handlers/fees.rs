use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::services::{PackageType, PlatformFees};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FeeQuoteQuery {
    pub amount: Decimal,
    pub package: String,
}

pub async fn quote_fees(
    State(state): State<AppState>,
    Query(query): Query<FeeQuoteQuery>,
) -> Result<Json<PlatformFees>, AppError> {
    let package_type: PackageType = query.package.parse()?;
    Ok(Json(state.fees.platform_fees(query.amount, package_type)?))
}

#[derive(Debug, Deserialize)]
pub struct RefundQuery {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RefundQuote {
    pub amount: Decimal,
    pub refund_amount: Decimal,
}

pub async fn quote_refund(
    State(state): State<AppState>,
    Query(query): Query<RefundQuery>,
) -> Result<Json<RefundQuote>, AppError> {
    let refund_amount = state.fees.refund_amount(query.amount)?;
    Ok(Json(RefundQuote {
        amount: query.amount,
        refund_amount,
    }))
}
