//! Value objects for the order domain.

use common::{BookId, City, OrderEntryId};
use serde::{Deserialize, Serialize};

/// Money amount represented in minor units (cents) to avoid floating point issues.
///
/// Prices are carried through fulfillment untouched; tax, discounts and
/// payment happen elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in cents (e.g., 1000 = $10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * quantity as i64,
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// Whether a line item is a physical book or a digital copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    /// Shipped from a warehouse; consumes stock.
    Physical,
    /// Delivered electronically; never touches stock.
    Digital,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Physical => "PHYSICAL",
            ItemType::Digital => "DIGITAL",
        }
    }
}

/// Delivery address attached to an order.
///
/// The structure is owned by the checkout layer; fulfillment only copies it
/// onto consignments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShippingAddress(serde_json::Value);

impl ShippingAddress {
    /// Wraps an arbitrary JSON address document.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Returns the raw JSON document.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

/// A line item of an order.
///
/// Entries are immutable once the order is created. `city` is required for
/// physical entries and absent for digital ones; [`Order::new`](super::Order::new)
/// enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
    #[serde(default)]
    pub id: OrderEntryId,
    pub book_id: BookId,
    pub item_type: ItemType,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    pub city: Option<City>,
}

impl OrderEntry {
    /// Creates a physical line item shipped to `city`.
    pub fn physical(book_id: BookId, quantity: u32, unit_price: Money, city: City) -> Self {
        Self {
            id: OrderEntryId::new(),
            book_id,
            item_type: ItemType::Physical,
            quantity,
            unit_price,
            total_price: unit_price.multiply(quantity),
            city: Some(city),
        }
    }

    /// Creates a digital line item.
    pub fn digital(book_id: BookId, quantity: u32, unit_price: Money) -> Self {
        Self {
            id: OrderEntryId::new(),
            book_id,
            item_type: ItemType::Digital,
            quantity,
            unit_price,
            total_price: unit_price.multiply(quantity),
            city: None,
        }
    }

    /// Returns true if this entry ships from a warehouse.
    pub fn is_physical(&self) -> bool {
        self.item_type == ItemType::Physical
    }
}
