//! Risk Manager
//!
//! Gates intents before an order is created. Checks run in a fixed order
//! and stop at the first violation:
//!
//! | Step | Check                          | Code                      |
//! |------|--------------------------------|---------------------------|
//! | a    | instrument whitelisted         | `INSTRUMENT_NOT_TRADABLE` |
//! | b    | worst-case position within limit| `EXCEEDS_POSITION_LIMIT` |
//! | c    | resulting exposure within limit| `EXCEEDS_EXPOSURE_LIMIT`  |
//! | d    | quantity/price sanity          | `INVALID_*`, `*_SIZE_*`   |
//!
//! Validation is a pure function of its inputs; rejections have no side
//! effects.

use rust_decimal::Decimal;

use crate::domain::order_execution::{Intent, OrderPrice};
use crate::domain::risk_management::value_objects::{
    RejectionCode, RiskContext, RiskDecision, RiskLimits, RiskRejection,
};

/// Validates intents against configured limits.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    /// Create a risk manager with the given limits.
    #[must_use]
    pub const fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Configured limits.
    #[must_use]
    pub const fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate an intent against the current position and exposure.
    #[must_use]
    pub fn validate(&self, intent: &Intent, context: &RiskContext) -> RiskDecision {
        match self.check(intent, context) {
            Ok(()) => RiskDecision::Approved,
            Err(rejection) => RiskDecision::Rejected(rejection),
        }
    }

    fn check(&self, intent: &Intent, context: &RiskContext) -> Result<(), RiskRejection> {
        self.check_tradable(intent)?;
        let resulting = self.check_position(intent, context)?;
        self.check_exposure(intent, context, resulting)?;
        self.check_sanity(intent)
    }

    fn check_tradable(&self, intent: &Intent) -> Result<(), RiskRejection> {
        if self.limits.is_tradable(&intent.instrument) {
            Ok(())
        } else {
            Err(RiskRejection::new(
                RejectionCode::InstrumentNotTradable,
                format!("{} is not tradable", intent.instrument),
            ))
        }
    }

    /// Returns the worst-case absolute position after the intent.
    fn check_position(
        &self,
        intent: &Intent,
        context: &RiskContext,
    ) -> Result<Decimal, RiskRejection> {
        let current = context.position.worst_case();
        let after = context.position.with_open(intent.side, intent.quantity);
        let resulting = after.worst_case();
        let limit = self.limits.position_limit(&intent.instrument);
        if resulting > limit && resulting > current {
            return Err(RiskRejection::new(
                RejectionCode::ExceedsPositionLimit,
                format!(
                    "{} position could reach {} (long {}, short {}, limit {})",
                    intent.instrument,
                    resulting.normalize(),
                    after.long_extreme().normalize(),
                    after.short_extreme().normalize(),
                    limit.normalize()
                ),
            ));
        }
        Ok(resulting)
    }

    fn check_exposure(
        &self,
        intent: &Intent,
        context: &RiskContext,
        resulting_position: Decimal,
    ) -> Result<(), RiskRejection> {
        let Some(price) = context.reference_price else {
            return Err(RiskRejection::new(
                RejectionCode::MissingReferencePrice,
                format!("no price available to value {}", intent.instrument),
            ));
        };
        let instrument_after = resulting_position * price.amount();
        let resulting =
            context.current_exposure - context.instrument_exposure + instrument_after;
        let limit = self.limits.max_aggregate_exposure;
        if resulting > limit && resulting > context.current_exposure {
            return Err(RiskRejection::new(
                RejectionCode::ExceedsExposureLimit,
                format!(
                    "aggregate exposure would be {} (limit {})",
                    resulting.normalize(),
                    limit.normalize()
                ),
            ));
        }
        Ok(())
    }

    fn check_sanity(&self, intent: &Intent) -> Result<(), RiskRejection> {
        if !intent.quantity.is_positive() {
            return Err(RiskRejection::new(
                RejectionCode::InvalidQuantity,
                format!("quantity must be positive, got {}", intent.quantity),
            ));
        }
        if let OrderPrice::Limit(price) = intent.price {
            if !price.is_positive() {
                return Err(RiskRejection::new(
                    RejectionCode::InvalidPrice,
                    format!("limit price must be positive, got {price}"),
                ));
            }
        }

        let Some(rules) = self.limits.rules(&intent.instrument) else {
            return Ok(());
        };
        if let Some(min) = rules.min_quantity {
            if intent.quantity.amount() < min {
                return Err(RiskRejection::new(
                    RejectionCode::InvalidQuantity,
                    format!("quantity {} below minimum {}", intent.quantity, min.normalize()),
                ));
            }
        }
        if let Some(lot) = rules.lot_size {
            if !intent.quantity.is_multiple_of(lot) {
                return Err(RiskRejection::new(
                    RejectionCode::LotSizeViolation,
                    format!("quantity {} is not a multiple of {}", intent.quantity, lot.normalize()),
                ));
            }
        }
        if let (Some(tick), OrderPrice::Limit(price)) = (rules.tick_size, intent.price) {
            if !price.is_on_tick(tick) {
                return Err(RiskRejection::new(
                    RejectionCode::TickSizeViolation,
                    format!("price {price} is not on tick {}", tick.normalize()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_execution::OrderSide;
    use crate::domain::risk_management::value_objects::{InstrumentRules, ProjectedPosition};
    use crate::domain::shared::{IdempotencyKey, InstrumentId, Price, Quantity};
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn limits() -> RiskLimits {
        let mut limits = RiskLimits {
            max_position_per_instrument: dec!(2.0),
            max_aggregate_exposure: dec!(200000),
            ..RiskLimits::default()
        };
        limits.tradable_instruments.insert(InstrumentId::new("BTC-USD"));
        limits.tradable_instruments.insert(InstrumentId::new("ETH-USD"));
        limits.instruments.insert(
            InstrumentId::new("ETH-USD"),
            InstrumentRules {
                max_position: Some(dec!(100)),
                tick_size: Some(dec!(0.01)),
                lot_size: Some(dec!(0.001)),
                min_quantity: Some(dec!(0.01)),
            },
        );
        limits
    }

    fn market(instrument: &str, side: OrderSide, qty: Decimal) -> Intent {
        Intent::market(
            IdempotencyKey::generate(),
            InstrumentId::new(instrument),
            side,
            Quantity::new(qty),
        )
    }

    fn ctx(position: Decimal, exposure: Decimal, price: Decimal) -> RiskContext {
        RiskContext {
            position: ProjectedPosition::filled(position),
            current_exposure: exposure,
            instrument_exposure: position.abs() * price,
            reference_price: Some(Price::new(price)),
        }
    }

    #[test]
    fn approves_within_limits() {
        let rm = RiskManager::new(limits());
        let decision = rm.validate(
            &market("BTC-USD", OrderSide::Buy, dec!(1.0)),
            &ctx(Decimal::ZERO, Decimal::ZERO, dec!(50000)),
        );
        assert_eq!(decision, RiskDecision::Approved);
    }

    #[test]
    fn rejects_position_limit() {
        let rm = RiskManager::new(limits());
        let decision = rm.validate(
            &market("BTC-USD", OrderSide::Buy, dec!(5.0)),
            &ctx(Decimal::ZERO, Decimal::ZERO, dec!(50000)),
        );
        assert_eq!(decision.code(), Some(RejectionCode::ExceedsPositionLimit));
    }

    #[test]
    fn reducing_an_oversized_position_is_allowed() {
        let rm = RiskManager::new(limits());
        let decision = rm.validate(
            &market("BTC-USD", OrderSide::Sell, dec!(1.0)),
            &ctx(dec!(4.0), dec!(200000), dec!(50000)),
        );
        assert!(decision.is_approved());
    }

    #[test]
    fn rejects_exposure_limit() {
        let rm = RiskManager::new(limits());
        // ETH at 3000 x 60 = 180000 plus 50000 already on BTC
        let context = RiskContext {
            position: ProjectedPosition::default(),
            current_exposure: dec!(50000),
            instrument_exposure: Decimal::ZERO,
            reference_price: Some(Price::new(dec!(3000))),
        };
        let decision = rm.validate(&market("ETH-USD", OrderSide::Buy, dec!(60)), &context);
        assert_eq!(decision.code(), Some(RejectionCode::ExceedsExposureLimit));
    }

    #[test]
    fn missing_reference_price() {
        let rm = RiskManager::new(limits());
        let decision = rm.validate(
            &market("BTC-USD", OrderSide::Buy, dec!(1)),
            &RiskContext::flat(None),
        );
        assert_eq!(decision.code(), Some(RejectionCode::MissingReferencePrice));
    }

    #[test]
    fn whitelist_checked_first() {
        let rm = RiskManager::new(limits());
        // also over the position limit, but tradability short-circuits
        let decision = rm.validate(
            &market("DOGE-USD", OrderSide::Buy, dec!(1000)),
            &ctx(Decimal::ZERO, Decimal::ZERO, dec!(1)),
        );
        assert_eq!(decision.code(), Some(RejectionCode::InstrumentNotTradable));
    }

    #[test_case(dec!(0), RejectionCode::InvalidQuantity ; "zero quantity")]
    #[test_case(dec!(-1), RejectionCode::InvalidQuantity ; "negative quantity")]
    #[test_case(dec!(0.005), RejectionCode::InvalidQuantity ; "below minimum")]
    #[test_case(dec!(0.0155), RejectionCode::LotSizeViolation ; "off lot")]
    fn sanity_quantity(qty: Decimal, code: RejectionCode) {
        let rm = RiskManager::new(limits());
        let decision = rm.validate(
            &market("ETH-USD", OrderSide::Buy, qty),
            &ctx(Decimal::ZERO, Decimal::ZERO, dec!(3000)),
        );
        assert_eq!(decision.code(), Some(code));
    }

    #[test_case(dec!(0), RejectionCode::InvalidPrice ; "zero price")]
    #[test_case(dec!(3000.005), RejectionCode::TickSizeViolation ; "off tick")]
    fn sanity_price(price: Decimal, code: RejectionCode) {
        let rm = RiskManager::new(limits());
        let intent = Intent::limit(
            IdempotencyKey::generate(),
            InstrumentId::new("ETH-USD"),
            OrderSide::Buy,
            Quantity::new(dec!(1)),
            Price::new(price),
        );
        let decision = rm.validate(&intent, &ctx(Decimal::ZERO, Decimal::ZERO, dec!(3000)));
        assert_eq!(decision.code(), Some(code));
    }

    #[test]
    fn resting_sell_does_not_make_room_for_buys() {
        let rm = RiskManager::new(limits());
        let mut context = ctx(Decimal::ZERO, dec!(100000), dec!(50000));
        context.position = ProjectedPosition::default()
            .with_open(OrderSide::Buy, Quantity::new(dec!(2)))
            .with_open(OrderSide::Sell, Quantity::new(dec!(2)));
        let decision = rm.validate(&market("BTC-USD", OrderSide::Buy, dec!(2)), &context);
        assert_eq!(decision.code(), Some(RejectionCode::ExceedsPositionLimit));
    }

    #[test]
    fn closing_order_is_allowed_beside_resting_orders() {
        let rm = RiskManager::new(limits());
        let mut context = ctx(dec!(2), dec!(100000), dec!(50000));
        context.position = ProjectedPosition::filled(dec!(2))
            .with_open(OrderSide::Sell, Quantity::new(dec!(1)));
        let decision = rm.validate(&market("BTC-USD", OrderSide::Sell, dec!(1)), &context);
        assert!(decision.is_approved());
    }

    #[test]
    fn rejections_are_deterministic() {
        let rm = RiskManager::new(limits());
        let intent = market("BTC-USD", OrderSide::Buy, dec!(5.0));
        let context = ctx(Decimal::ZERO, Decimal::ZERO, dec!(50000));
        assert_eq!(rm.validate(&intent, &context), rm.validate(&intent, &context));
    }
}
