use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kore_core::{
    DomainError, DomainResult, Entity, Immutable, MovementId, ProductId, Quantity, UserId, WarehouseId,
};

use crate::stock::{StockKey, StockLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    In,
    Out,
    /// `quantity` is the counted on-hand target, not a delta.
    Adjustment,
    Transfer,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::Adjustment => "adjustment",
            MovementKind::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "in" => Ok(MovementKind::In),
            "out" => Ok(MovementKind::Out),
            "adjustment" => Ok(MovementKind::Adjustment),
            "transfer" => Ok(MovementKind::Transfer),
            other => Err(DomainError::validation(format!("unknown movement kind '{other}'"))),
        }
    }
}

/// Immutable log record of one applied stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product: ProductId,
    pub warehouse: WarehouseId,
    /// Signed change applied to the level.
    pub delta: Quantity,
    pub kind: MovementKind,
    pub reference: String,
    pub notes: String,
    pub actor: UserId,
    pub timestamp: DateTime<Utc>,
}

impl StockMovement {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product, self.warehouse)
    }
}

impl Entity for StockMovement {
    type Id = MovementId;
    const RECORD: &'static str = "stock_movement";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Immutable for StockMovement {}

/// Command: apply one movement to a (product, warehouse) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyMovement {
    pub product: ProductId,
    pub warehouse: WarehouseId,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub reference: String,
    pub notes: String,
    pub actor: UserId,
}

/// Command: move stock of one product between two warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub product: ProductId,
    pub from: WarehouseId,
    pub to: WarehouseId,
    pub quantity: Decimal,
    pub reference: String,
    pub notes: String,
    pub actor: UserId,
}

/// Outcome of planning a movement against the locked level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementPlan {
    pub delta: Quantity,
    pub new_level: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub source: MovementPlan,
    pub destination: MovementPlan,
}

fn quantity(raw: Decimal) -> DomainResult<Quantity> {
    if raw.is_sign_negative() && !raw.is_zero() {
        return Err(DomainError::NegativeQuantity(raw));
    }
    Quantity::new(raw)
}

fn positive(raw: Decimal) -> DomainResult<Quantity> {
    let q = quantity(raw)?;
    if q.is_zero() {
        return Err(DomainError::validation("quantity must be greater than zero"));
    }
    Ok(q)
}

fn withdraw(level: &StockLevel, q: Quantity) -> DomainResult<MovementPlan> {
    let available = level.quantity();
    if available < q {
        return Err(DomainError::InsufficientStock {
            product: level.product(),
            warehouse: level.warehouse(),
            available: available.value(),
            requested: q.value(),
        });
    }
    Ok(MovementPlan {
        delta: -q,
        new_level: available.checked_sub(q)?,
    })
}

fn deposit(level: &StockLevel, q: Quantity) -> DomainResult<MovementPlan> {
    Ok(MovementPlan {
        delta: q,
        new_level: level.quantity().checked_add(q)?,
    })
}

impl ApplyMovement {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product, self.warehouse)
    }

    /// Compute the signed delta and resulting level. Pure: `level` is the
    /// current value read under the row lock.
    pub fn plan(&self, level: &StockLevel) -> DomainResult<MovementPlan> {
        match self.kind {
            MovementKind::In => deposit(level, positive(self.quantity)?),
            MovementKind::Out => withdraw(level, positive(self.quantity)?),
            MovementKind::Adjustment => {
                let target = quantity(self.quantity)?;
                Ok(MovementPlan {
                    delta: target.checked_sub(level.quantity())?,
                    new_level: target,
                })
            }
            MovementKind::Transfer => Err(DomainError::validation(
                "transfer movements need a source and a destination; use a transfer",
            )),
        }
    }

    pub fn record(&self, id: MovementId, plan: &MovementPlan, timestamp: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            product: self.product,
            warehouse: self.warehouse,
            delta: plan.delta,
            kind: self.kind,
            reference: self.reference.clone(),
            notes: self.notes.clone(),
            actor: self.actor,
            timestamp,
        }
    }
}

impl Transfer {
    pub fn source(&self) -> StockKey {
        StockKey::new(self.product, self.from)
    }

    pub fn destination(&self) -> StockKey {
        StockKey::new(self.product, self.to)
    }

    /// Validate the command alone, before any level is read.
    pub fn validate(&self) -> DomainResult<Quantity> {
        if self.from == self.to {
            return Err(DomainError::validation(
                "transfer source and destination must differ",
            ));
        }
        positive(self.quantity)
    }

    pub fn plan(&self, source: &StockLevel, destination: &StockLevel) -> DomainResult<TransferPlan> {
        let q = self.validate()?;
        Ok(TransferPlan {
            source: withdraw(source, q)?,
            destination: deposit(destination, q)?,
        })
    }

    /// The two log records: withdrawal at the source, deposit at the destination.
    pub fn record(
        &self,
        ids: (MovementId, MovementId),
        plan: &TransferPlan,
        timestamp: DateTime<Utc>,
    ) -> (StockMovement, StockMovement) {
        let leg = |id, warehouse, delta| StockMovement {
            id,
            product: self.product,
            warehouse,
            delta,
            kind: MovementKind::Transfer,
            reference: self.reference.clone(),
            notes: self.notes.clone(),
            actor: self.actor,
            timestamp,
        };
        (
            leg(ids.0, self.from, plan.source.delta),
            leg(ids.1, self.to, plan.destination.delta),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::Aggregate;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn level(q: Decimal) -> StockLevel {
        StockLevel::restore(
            StockKey::new(ProductId::new(), WarehouseId::new()),
            Quantity::new(q).unwrap(),
            Utc::now(),
        )
    }

    fn cmd(level: &StockLevel, kind: MovementKind, quantity: Decimal) -> ApplyMovement {
        ApplyMovement {
            product: level.product(),
            warehouse: level.warehouse(),
            kind,
            quantity,
            reference: "PO-1".to_string(),
            notes: String::new(),
            actor: UserId::new(),
        }
    }

    #[test]
    fn out_beyond_level_is_insufficient() {
        let lvl = level(dec!(10));
        let err = cmd(&lvl, MovementKind::Out, dec!(15)).plan(&lvl).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                product: lvl.product(),
                warehouse: lvl.warehouse(),
                available: dec!(10.000),
                requested: dec!(15.000),
            }
        );
    }

    #[test]
    fn adjustment_targets_absolute_level() {
        let lvl = level(dec!(10));
        let plan = cmd(&lvl, MovementKind::Adjustment, dec!(7)).plan(&lvl).unwrap();
        assert_eq!(plan.delta, Quantity::new(dec!(-3)).unwrap());
        assert_eq!(plan.new_level, Quantity::new(dec!(7)).unwrap());

        let zero = cmd(&lvl, MovementKind::Adjustment, dec!(0)).plan(&lvl).unwrap();
        assert_eq!(zero.new_level, Quantity::ZERO);
    }

    #[test]
    fn quantities_are_checked() {
        let lvl = level(dec!(1));
        assert_eq!(
            cmd(&lvl, MovementKind::In, dec!(-2)).plan(&lvl).unwrap_err(),
            DomainError::NegativeQuantity(dec!(-2))
        );
        assert!(matches!(
            cmd(&lvl, MovementKind::In, dec!(0)).plan(&lvl),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            cmd(&lvl, MovementKind::In, dec!(0.0001)).plan(&lvl),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            cmd(&lvl, MovementKind::Transfer, dec!(1)).plan(&lvl),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn deposits_beyond_column_range_are_refused() {
        let lvl = level(dec!(999999999999));
        assert!(matches!(
            cmd(&lvl, MovementKind::In, dec!(1)).plan(&lvl),
            Err(DomainError::Validation(msg)) if msg.contains("overflows")
        ));
        assert!(matches!(
            cmd(&lvl, MovementKind::In, dec!(40000000000000000000000000000)).plan(&lvl),
            Err(DomainError::Validation(_))
        ));
        let drained = cmd(&lvl, MovementKind::Adjustment, dec!(0)).plan(&lvl).unwrap();
        assert_eq!(drained.delta, -Quantity::new(dec!(999999999999)).unwrap());
    }

    #[test]
    fn transfer_withdraws_and_deposits() {
        let product = ProductId::new();
        let (a, b) = (WarehouseId::new(), WarehouseId::new());
        let src = StockLevel::restore(StockKey::new(product, a), Quantity::from_minor(5_000), Utc::now());
        let dst = StockLevel::empty(StockKey::new(product, b), Utc::now());
        let t = Transfer {
            product,
            from: a,
            to: b,
            quantity: dec!(2),
            reference: String::new(),
            notes: String::new(),
            actor: UserId::new(),
        };
        let plan = t.plan(&src, &dst).unwrap();
        assert_eq!(plan.source.new_level, Quantity::from_minor(3_000));
        assert_eq!(plan.destination.new_level, Quantity::from_minor(2_000));

        let (out, inn) = t.record((MovementId::new(), MovementId::new()), &plan, Utc::now());
        assert_eq!(out.delta + inn.delta, Quantity::ZERO);
        assert_eq!(out.kind, MovementKind::Transfer);

        let same = Transfer { to: a, ..t };
        assert!(same.validate().is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        In(i64),
        Out(i64),
        Adjust(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..5_000).prop_map(Op::In),
            (1i64..5_000).prop_map(Op::Out),
            (0i64..5_000).prop_map(Op::Adjust),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn level_equals_sum_of_logged_deltas(ops in prop::collection::vec(op(), 1..40)) {
            let mut running = level(dec!(0));
            let mut log = Vec::new();
            for op in ops {
                let (kind, minor) = match op {
                    Op::In(q) => (MovementKind::In, q),
                    Op::Out(q) => (MovementKind::Out, q),
                    Op::Adjust(q) => (MovementKind::Adjustment, q),
                };
                let c = cmd(&running, kind, Decimal::new(minor, 3));
                match c.plan(&running) {
                    Ok(plan) => {
                        let m = c.record(MovementId::new(), &plan, Utc::now());
                        running.apply(&m);
                        prop_assert_eq!(running.quantity(), plan.new_level);
                        log.push(m);
                    }
                    Err(DomainError::InsufficientStock { .. }) => {}
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                }
                prop_assert!(!running.quantity().is_negative());
            }
            let mut replayed = StockLevel::empty(running.key(), Utc::now());
            replayed.replay(&log);
            prop_assert_eq!(replayed.quantity(), running.quantity());
        }
    }
}
