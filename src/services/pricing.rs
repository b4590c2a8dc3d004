use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Flat tax rate applied to every order subtotal.
pub const TAX_RATE: Decimal = dec!(0.10);

/// Orders with a subtotal strictly above this amount ship for free.
pub const FREE_SHIPPING_THRESHOLD: Decimal = dec!(100);

/// Flat shipping rate below the free-shipping threshold.
pub const FLAT_SHIPPING_RATE: Decimal = dec!(10);

/// Number of decimal places money is rounded to at the persistence boundary.
pub const CURRENCY_SCALE: u32 = 2;

/// A quantity at its snapshotted unit price, the pricing calculator's
/// only view of a line item.
#[derive(Debug, Clone, Copy)]
pub struct PricedItem {
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// Rounds every amount to currency precision. Applied exactly once,
    /// where totals enter the order record; intermediate arithmetic stays
    /// exact so long carts accumulate no drift.
    pub fn rounded(self) -> OrderTotals {
        OrderTotals {
            subtotal: self.subtotal.round_dp(CURRENCY_SCALE),
            tax: self.tax.round_dp(CURRENCY_SCALE),
            shipping: self.shipping.round_dp(CURRENCY_SCALE),
            total: self.total.round_dp(CURRENCY_SCALE),
        }
    }
}

/// Prices a set of line items: subtotal from snapshotted unit prices,
/// flat-rate tax, free shipping above the threshold, and their sum.
pub fn price_items(items: &[PricedItem]) -> OrderTotals {
    let subtotal: Decimal = items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum();

    let tax = subtotal * TAX_RATE;
    let shipping = if subtotal > FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else {
        FLAT_SHIPPING_RATE
    };
    let total = subtotal + tax + shipping;

    OrderTotals {
        subtotal,
        tax,
        shipping,
        total,
    }
}
