use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier is a distinct type so a `BookId` can never be passed where
/// a `WarehouseId` is expected, even though both wrap a UUID.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a book in the catalog.
    BookId
);
uuid_id!(
    /// Identifier of a warehouse.
    WarehouseId
);
uuid_id!(
    /// Identifier of an order.
    OrderId
);
uuid_id!(
    /// Identifier of a single line item of an order.
    OrderEntryId
);
uuid_id!(
    /// Identifier of a consignment (shipment batch).
    ConsignmentId
);
uuid_id!(
    /// Identifier of a consignment entry.
    ConsignmentEntryId
);

/// The closed set of cities the store ships from and to.
///
/// Each city is served by at most one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum City {
    Hanoi,
    HoChiMinh,
    DaNang,
    HaiPhong,
    CanTho,
}

impl City {
    /// Every supported city, in declaration order.
    pub const ALL: [City; 5] = [
        City::Hanoi,
        City::HoChiMinh,
        City::DaNang,
        City::HaiPhong,
        City::CanTho,
    ];

    /// Returns the canonical upper-case code of the city.
    pub fn as_str(&self) -> &'static str {
        match self {
            City::Hanoi => "HANOI",
            City::HoChiMinh => "HO_CHI_MINH",
            City::DaNang => "DA_NANG",
            City::HaiPhong => "HAI_PHONG",
            City::CanTho => "CAN_THO",
        }
    }
}

impl std::fmt::Display for City {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A city code that is not part of the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported city: {0}")]
pub struct UnknownCity(pub String);

impl FromStr for City {
    type Err = UnknownCity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        City::ALL
            .into_iter()
            .find(|city| city.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCity(s.to_string()))
    }
}

/// Identifies one stock counter: a book held at a warehouse.
///
/// The derived ordering compares the warehouse first and the book second.
/// Every multi-key lock acquisition walks keys in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub warehouse_id: WarehouseId,
    pub book_id: BookId,
}

impl LedgerKey {
    /// Creates a key for the given book at the given warehouse.
    pub fn new(book_id: BookId, warehouse_id: WarehouseId) -> Self {
        Self {
            warehouse_id,
            book_id,
        }
    }
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "book {} @ warehouse {}", self.book_id, self.warehouse_id)
    }
}
